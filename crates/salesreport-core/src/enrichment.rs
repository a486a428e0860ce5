use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use thiserror::Error;
use tracing::{error, info};

use crate::acquisition::SourceTables;
use crate::calendar;
use crate::frame;
use crate::tables::SourceTable;

const ROW_INDEX: &str = "__fact_row";

/// Product attributes carried onto every sales line.
pub const PRODUCT_ATTRIBUTES: &[&str] = &[
    "ProductName",
    "Unit_Price_USD",
    "Unit_Cost_USD",
    "UnitMargin",
    "Category",
];

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("{dimension} key {key} is not unique ({duplicates} duplicate values)")]
    DuplicateKey {
        dimension: String,
        key: String,
        duplicates: usize,
    },
    #[error("left join with {dimension} on {key} changed the row count from {expected} to {found}")]
    RowCountChanged {
        dimension: String,
        key: String,
        expected: usize,
        found: usize,
    },
}

/// A requested input table that is not available for this run.
#[derive(Debug, Clone, Error)]
#[error("missing input table {table}: {reason}")]
pub struct MissingInput {
    pub table: SourceTable,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

impl From<JoinKind> for JoinType {
    fn from(kind: JoinKind) -> Self {
        match kind {
            JoinKind::Left => JoinType::Left,
            JoinKind::Inner => JoinType::Inner,
        }
    }
}

/// What the caller asserts about the dimension side's join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCardinality {
    /// At most one dimension row per key; duplicates are rejected.
    Unique,
    /// Several dimension rows may share a key and each matching fact row is repeated.
    FanOut,
}

#[derive(Debug, Clone)]
pub struct JoinSpec<'a> {
    pub dimension: &'a str,
    pub left_on: &'a str,
    pub right_on: &'a str,
    pub columns: &'a [&'a str],
    pub kind: JoinKind,
    pub cardinality: KeyCardinality,
}

impl<'a> JoinSpec<'a> {
    pub fn left_unique(dimension: &'a str, key: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            dimension,
            left_on: key,
            right_on: key,
            columns,
            kind: JoinKind::Left,
            cardinality: KeyCardinality::Unique,
        }
    }

    pub fn inner_unique(dimension: &'a str, key: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            kind: JoinKind::Inner,
            ..Self::left_unique(dimension, key, columns)
        }
    }
}

/// Joins dimension attributes onto `fact` by key equality.
///
/// Fact row order is preserved. Unmatched left-join rows carry nulls for the dimension
/// columns. With `KeyCardinality::Unique` a left join returns exactly `fact.height()` rows.
pub fn join_dimension(
    fact: &DataFrame,
    dimension: &DataFrame,
    spec: &JoinSpec<'_>,
) -> Result<DataFrame, EnrichmentError> {
    let duplicates = duplicate_key_count(dimension, spec.right_on)?;
    if duplicates > 0 && spec.cardinality == KeyCardinality::Unique {
        return Err(EnrichmentError::DuplicateKey {
            dimension: spec.dimension.to_string(),
            key: spec.right_on.to_string(),
            duplicates,
        });
    }

    let mut projection = Vec::with_capacity(spec.columns.len() + 1);
    projection.push(col(spec.right_on));
    projection.extend(spec.columns.iter().map(|name| col(*name)));

    let joined = fact
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            dimension.clone().lazy().select(projection),
            [col(spec.left_on)],
            [col(spec.right_on)],
            JoinArgs::new(spec.kind.into()),
        )
        .sort_by_exprs(
            [col(ROW_INDEX)],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?
        .drop(ROW_INDEX)?;

    match (spec.kind, spec.cardinality) {
        (JoinKind::Left, KeyCardinality::Unique) if joined.height() != fact.height() => {
            return Err(EnrichmentError::RowCountChanged {
                dimension: spec.dimension.to_string(),
                key: spec.left_on.to_string(),
                expected: fact.height(),
                found: joined.height(),
            });
        }
        (_, KeyCardinality::FanOut) if joined.height() > fact.height() => {
            info!(
                dimension = spec.dimension,
                key = spec.right_on,
                fact_rows = fact.height(),
                joined_rows = joined.height(),
                "Join fanned out on non-unique dimension key"
            );
        }
        _ => {}
    }

    Ok(joined)
}

fn duplicate_key_count(df: &DataFrame, key: &str) -> PolarsResult<usize> {
    let values = frame::string_values(df, key)?;
    let mut seen = HashSet::with_capacity(values.len());
    let mut duplicates = 0;
    for value in values.into_iter().flatten() {
        if !seen.insert(value) {
            duplicates += 1;
        }
    }
    Ok(duplicates)
}

/// Parses a text (or already typed) date column; unparseable values become `None`.
pub fn parse_date_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<NaiveDate>>> {
    if frame::is_date(df, name)? {
        return frame::date_values(df, name);
    }
    let raw = frame::string_values(df, name)?;
    Ok(raw
        .iter()
        .map(|value| value.as_deref().and_then(calendar::parse_date))
        .collect())
}

pub fn normalize_products(products: &DataFrame) -> Result<DataFrame, EnrichmentError> {
    let normalized = products
        .clone()
        .lazy()
        .rename(["Product_Name"], ["ProductName"], true)
        .with_column((col("Unit_Price_USD") - col("Unit_Cost_USD")).alias("UnitMargin"))
        .collect()?;
    Ok(normalized)
}

pub fn normalize_customers(
    customers: &DataFrame,
    reference_year: i32,
) -> Result<DataFrame, EnrichmentError> {
    let mut normalized = customers
        .clone()
        .lazy()
        .rename(["Name"], ["CustomerName"], true)
        .collect()?;

    let birthdays = parse_date_column(&normalized, "Birthday")?;
    let ages: Vec<Option<i32>> = birthdays
        .iter()
        .map(|birthday| birthday.map(|date| reference_year - date.year()))
        .collect();

    normalized.with_column(frame::date_series("Birthday", &birthdays)?)?;
    normalized.with_column(Series::new("Age".into(), ages))?;
    Ok(normalized)
}

pub fn normalize_stores(stores: &DataFrame) -> Result<DataFrame, EnrichmentError> {
    let normalized = stores
        .clone()
        .lazy()
        .rename(["Square_Meters"], ["StoreSize"], true)
        .with_column(col("StoreSize").cast(DataType::Float64))
        .collect()?;
    Ok(normalized)
}

pub fn normalize_exchange_rates(rates: &DataFrame) -> Result<DataFrame, EnrichmentError> {
    let mut normalized = rates.clone();
    let dates = parse_date_column(&normalized, "Date")?;
    normalized.with_column(frame::date_series("Date", &dates)?)?;
    Ok(normalized)
}

/// Builds the enriched fact table from raw sales and normalized products.
///
/// Adds `Revenue`, `Profit`, `Month` (first day of the order month), `Year` and `Quarter`.
/// Orders with an unparseable `Order_Date` keep their row with null date parts.
pub fn enrich_sales(sales: &DataFrame, products: &DataFrame) -> Result<DataFrame, EnrichmentError> {
    let mut facts = sales.clone();
    let order_dates = parse_date_column(&facts, "Order_Date")?;
    facts.with_column(frame::date_series("Order_Date", &order_dates)?)?;

    let joined = join_dimension(
        &facts,
        products,
        &JoinSpec::left_unique(SourceTable::Products.name(), "ProductKey", PRODUCT_ATTRIBUTES),
    )?;

    let mut enriched = joined
        .lazy()
        .with_columns([
            (col("Quantity").cast(DataType::Float64) * col("Unit_Price_USD")).alias("Revenue"),
            (col("Quantity").cast(DataType::Float64) * col("UnitMargin")).alias("Profit"),
        ])
        .collect()?;

    let months: Vec<Option<NaiveDate>> = order_dates
        .iter()
        .map(|date| date.and_then(calendar::month_start))
        .collect();
    let years: Vec<Option<i32>> = order_dates.iter().map(|date| date.map(|d| d.year())).collect();
    let quarters: Vec<Option<i32>> = order_dates
        .iter()
        .map(|date| date.map(calendar::quarter))
        .collect();

    enriched.with_column(frame::date_series("Month", &months)?)?;
    enriched.with_column(Series::new("Year".into(), years))?;
    enriched.with_column(Series::new("Quarter".into(), quarters))?;
    Ok(enriched)
}

/// The enriched fact table and normalized dimensions shared by every analysis.
#[derive(Debug, Default)]
pub struct EnrichedData {
    frames: BTreeMap<SourceTable, DataFrame>,
    unavailable: BTreeMap<SourceTable, String>,
}

impl EnrichedData {
    /// Normalizes whatever was acquired. A table that fails to normalize, or whose
    /// dependency is missing, is recorded as unavailable rather than aborting the run.
    pub fn build(tables: &SourceTables, reference_year: i32) -> Self {
        let mut data = EnrichedData::default();

        for failure in &tables.failures {
            data.unavailable
                .insert(failure.table, format!("not acquired ({})", failure.cause));
        }

        data.stage(tables, SourceTable::Products, normalize_products);
        data.stage(tables, SourceTable::Stores, normalize_stores);
        data.stage(tables, SourceTable::ExchangeRates, normalize_exchange_rates);
        data.stage(tables, SourceTable::Customers, |df| {
            normalize_customers(df, reference_year)
        });

        match (tables.get(SourceTable::Sales), data.frames.get(&SourceTable::Products)) {
            (Some(sales), Some(products)) => match enrich_sales(sales, products) {
                Ok(enriched) => {
                    info!(rows = enriched.height(), "Built enriched sales table");
                    data.frames.insert(SourceTable::Sales, enriched);
                }
                Err(err) => {
                    error!(error = %err, "Failed to enrich sales");
                    data.unavailable
                        .insert(SourceTable::Sales, format!("enrichment failed: {err}"));
                }
            },
            (Some(_), None) => {
                data.unavailable.insert(
                    SourceTable::Sales,
                    "requires the products table, which is unavailable".to_string(),
                );
            }
            (None, _) => {
                data.unavailable
                    .entry(SourceTable::Sales)
                    .or_insert_with(|| "not acquired".to_string());
            }
        }

        data
    }

    fn stage<F>(&mut self, tables: &SourceTables, table: SourceTable, normalize: F)
    where
        F: FnOnce(&DataFrame) -> Result<DataFrame, EnrichmentError>,
    {
        let Some(raw) = tables.get(table) else {
            self.unavailable
                .entry(table)
                .or_insert_with(|| "not acquired".to_string());
            return;
        };

        match normalize(raw) {
            Ok(frame) => {
                self.frames.insert(table, frame);
            }
            Err(err) => {
                error!(table = %table, error = %err, "Failed to normalize table");
                self.unavailable
                    .insert(table, format!("normalization failed: {err}"));
            }
        }
    }

    pub fn require(&self, table: SourceTable) -> Result<&DataFrame, MissingInput> {
        self.frames.get(&table).ok_or_else(|| MissingInput {
            table,
            reason: self
                .unavailable
                .get(&table)
                .cloned()
                .unwrap_or_else(|| "not acquired".to_string()),
        })
    }

    pub fn is_available(&self, table: SourceTable) -> bool {
        self.frames.contains_key(&table)
    }
}
