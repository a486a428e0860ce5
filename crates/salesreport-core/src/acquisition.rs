use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use polars::prelude::*;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::Row;
use thiserror::Error;
use tokio::task;
use tracing::{info, warn};

use crate::db::DbPool;
use crate::tables::{ColumnKind, SourceTable, TableRequest};

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("query for table {table} failed: {source}")]
    Query {
        table: SourceTable,
        #[source]
        source: sqlx::Error,
    },
    #[error("query for table {table} timed out after {seconds}s")]
    Timeout { table: SourceTable, seconds: u64 },
    #[error("failed to decode column {column} of table {table}: {source}")]
    Decode {
        table: SourceTable,
        column: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("table {table} has no column {column}")]
    MissingColumn { table: SourceTable, column: String },
    #[error("table {table} is not available from {origin}")]
    NotFound { table: SourceTable, origin: String },
    #[error("row filters are not supported by {origin} (table {table})")]
    UnsupportedFilter { table: SourceTable, origin: String },
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
    #[error("background read for table {table} failed: {message}")]
    Worker { table: SourceTable, message: String },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("data source unavailable, no table could be loaded: {}", describe_failures(.0))]
    SourceUnavailable(Vec<TableFailure>),
}

#[derive(Debug, Clone, Serialize)]
pub struct TableFailure {
    pub table: SourceTable,
    pub cause: String,
}

fn describe_failures(failures: &[TableFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.table, failure.cause))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Anything that can hand back a source table as a DataFrame.
#[async_trait]
pub trait TableSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch(&self, request: &TableRequest) -> Result<DataFrame, AcquisitionError>;
}

/// Tables acquired for one run, plus the tables that could not be acquired.
#[derive(Debug, Default)]
pub struct SourceTables {
    frames: BTreeMap<SourceTable, DataFrame>,
    pub failures: Vec<TableFailure>,
}

impl SourceTables {
    pub fn get(&self, table: SourceTable) -> Option<&DataFrame> {
        self.frames.get(&table)
    }

    pub fn is_loaded(&self, table: SourceTable) -> bool {
        self.frames.contains_key(&table)
    }

    pub fn loaded(&self) -> impl Iterator<Item = (SourceTable, &DataFrame)> {
        self.frames.iter().map(|(table, df)| (*table, df))
    }
}

/// Fetches every requested table in order, each under its own timeout.
///
/// A table that fails or times out is recorded and skipped; only losing every table
/// is an error.
pub async fn load_tables(
    source: &dyn TableSource,
    requests: &[TableRequest],
    timeout: Duration,
) -> Result<SourceTables, AcquisitionError> {
    let mut tables = SourceTables::default();

    for request in requests {
        let outcome = match tokio::time::timeout(timeout, source.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(AcquisitionError::Timeout {
                table: request.table,
                seconds: timeout.as_secs(),
            }),
        };

        match outcome.and_then(|frame| validate_projection(request, frame)) {
            Ok(frame) => {
                info!(
                    table = %request.table,
                    rows = frame.height(),
                    columns = frame.width(),
                    "Loaded table"
                );
                tables.frames.insert(request.table, frame);
            }
            Err(err) => {
                warn!(table = %request.table, error = %err, "Failed to load table");
                tables.failures.push(TableFailure {
                    table: request.table,
                    cause: err.to_string(),
                });
            }
        }
    }

    if tables.frames.is_empty() && !tables.failures.is_empty() {
        return Err(AcquisitionError::SourceUnavailable(tables.failures));
    }

    Ok(tables)
}

fn validate_projection(request: &TableRequest, frame: DataFrame) -> Result<DataFrame, AcquisitionError> {
    for def in &request.columns {
        if frame.column(def.name).is_err() {
            return Err(AcquisitionError::MissingColumn {
                table: request.table,
                column: def.name.to_string(),
            });
        }
    }
    Ok(frame)
}

/// Projects `frame` onto the requested columns, casting each to its declared kind.
/// Values that do not fit the kind become nulls.
fn coerce_projection(request: &TableRequest, frame: &DataFrame) -> Result<DataFrame, AcquisitionError> {
    let mut columns = Vec::with_capacity(request.columns.len());
    for def in &request.columns {
        let column = frame
            .column(def.name)
            .map_err(|_| AcquisitionError::MissingColumn {
                table: request.table,
                column: def.name.to_string(),
            })?;
        let dtype = match def.kind {
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Text => DataType::String,
        };
        columns.push(column.cast(&dtype)?);
    }
    Ok(DataFrame::new(columns)?)
}

pub struct PgTableSource {
    pool: DbPool,
    table_prefix: String,
}

impl PgTableSource {
    pub fn new(pool: DbPool, table_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.into(),
        }
    }

    /// Builds the projection query. Every column is read as text and coerced client-side,
    /// so a malformed value becomes a null instead of failing the query.
    pub fn select_statement(&self, request: &TableRequest) -> String {
        select_statement(&self.table_prefix, request)
    }
}

pub fn select_statement(table_prefix: &str, request: &TableRequest) -> String {
    let projection = request
        .columns
        .iter()
        .map(|def| {
            let ident = quote_ident(def.name);
            format!("CAST({ident} AS TEXT) AS {ident}")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let table = request
        .table
        .physical_name(table_prefix)
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".");

    let mut sql = format!("SELECT {projection} FROM {table}");
    if let Some(filter) = request.filter.as_deref() {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl TableSource for PgTableSource {
    fn describe(&self) -> String {
        "postgres".to_string()
    }

    async fn fetch(&self, request: &TableRequest) -> Result<DataFrame, AcquisitionError> {
        let sql = self.select_statement(request);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| AcquisitionError::Query {
                table: request.table,
                source,
            })?;
        rows_to_frame(request, &rows)
    }
}

fn rows_to_frame(request: &TableRequest, rows: &[PgRow]) -> Result<DataFrame, AcquisitionError> {
    let mut columns: Vec<Column> = Vec::with_capacity(request.columns.len());
    for (idx, def) in request.columns.iter().enumerate() {
        let values = decode_text(request.table, def.name, idx, rows)?;
        columns.push(Series::new(def.name.into(), values).into());
    }
    coerce_projection(request, &DataFrame::new(columns)?)
}

fn decode_text(
    table: SourceTable,
    column: &'static str,
    idx: usize,
    rows: &[PgRow],
) -> Result<Vec<Option<String>>, AcquisitionError> {
    rows.iter()
        .map(|row| {
            row.try_get::<Option<String>, _>(idx)
                .map_err(|source| AcquisitionError::Decode {
                    table,
                    column,
                    source,
                })
        })
        .collect()
}

/// Reads `<dir>/<prefix><table>.csv` files.
pub struct CsvTableSource {
    dir: PathBuf,
    table_prefix: String,
}

impl CsvTableSource {
    pub fn new(dir: impl Into<PathBuf>, table_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            table_prefix: table_prefix.into(),
        }
    }

    pub fn path_for(&self, table: SourceTable) -> PathBuf {
        self.dir
            .join(format!("{}.csv", table.physical_name(&self.table_prefix)))
    }
}

fn read_csv(path: &Path) -> Result<DataFrame, AcquisitionError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|source| AcquisitionError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl TableSource for CsvTableSource {
    fn describe(&self) -> String {
        format!("csv directory {}", self.dir.display())
    }

    async fn fetch(&self, request: &TableRequest) -> Result<DataFrame, AcquisitionError> {
        if request.filter.is_some() {
            return Err(AcquisitionError::UnsupportedFilter {
                table: request.table,
                origin: self.describe(),
            });
        }

        let path = self.path_for(request.table);
        if !path.is_file() {
            return Err(AcquisitionError::NotFound {
                table: request.table,
                origin: self.describe(),
            });
        }

        let table = request.table;
        let frame = task::spawn_blocking(move || read_csv(&path))
            .await
            .map_err(|err| AcquisitionError::Worker {
                table,
                message: err.to_string(),
            })??;

        coerce_projection(request, &frame)
    }
}

/// Frames held in memory, keyed by table.
#[derive(Debug, Default, Clone)]
pub struct MemoryTableSource {
    frames: BTreeMap<SourceTable, DataFrame>,
}

impl MemoryTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: SourceTable, frame: DataFrame) -> Self {
        self.frames.insert(table, frame);
        self
    }
}

#[async_trait]
impl TableSource for MemoryTableSource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn fetch(&self, request: &TableRequest) -> Result<DataFrame, AcquisitionError> {
        if request.filter.is_some() {
            return Err(AcquisitionError::UnsupportedFilter {
                table: request.table,
                origin: self.describe(),
            });
        }

        let frame = self
            .frames
            .get(&request.table)
            .ok_or_else(|| AcquisitionError::NotFound {
                table: request.table,
                origin: self.describe(),
            })?;

        coerce_projection(request, frame)
    }
}
