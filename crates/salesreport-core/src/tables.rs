use std::fmt;

use serde::Serialize;

/// Storage type a source column is coerced to when it is acquired.
///
/// Date-like columns are acquired as `Text` and parsed during enrichment so that a
/// malformed value becomes a null instead of failing the whole query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn column(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef { name, kind }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Customers,
    Sales,
    Products,
    ExchangeRates,
    Stores,
}

impl SourceTable {
    pub const ALL: [SourceTable; 5] = [
        SourceTable::Customers,
        SourceTable::Sales,
        SourceTable::Products,
        SourceTable::ExchangeRates,
        SourceTable::Stores,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceTable::Customers => "customers",
            SourceTable::Sales => "sales",
            SourceTable::Products => "products",
            SourceTable::ExchangeRates => "exchange_rates",
            SourceTable::Stores => "stores",
        }
    }

    /// Name of the table in the backing store, e.g. `proj_sales` for prefix `proj_`.
    pub fn physical_name(self, prefix: &str) -> String {
        format!("{prefix}{}", self.name())
    }

    pub fn columns(self) -> &'static [ColumnDef] {
        use ColumnKind::{Float, Integer, Text};

        const CUSTOMERS: &[ColumnDef] = &[
            column("CustomerKey", Integer),
            column("Name", Text),
            column("Birthday", Text),
        ];
        const SALES: &[ColumnDef] = &[
            column("Order_Date", Text),
            column("Quantity", Integer),
            column("ProductKey", Integer),
            column("StoreKey", Integer),
            column("CustomerKey", Integer),
            column("Order_Number", Integer),
        ];
        const PRODUCTS: &[ColumnDef] = &[
            column("ProductKey", Integer),
            column("Product_Name", Text),
            column("Unit_Price_USD", Float),
            column("Unit_Cost_USD", Float),
            column("Category", Text),
        ];
        const EXCHANGE_RATES: &[ColumnDef] = &[
            column("Date", Text),
            column("Exchange", Float),
            column("Currency", Text),
        ];
        const STORES: &[ColumnDef] = &[
            column("StoreKey", Integer),
            column("State", Text),
            column("Country", Text),
            column("Square_Meters", Float),
        ];

        match self {
            SourceTable::Customers => CUSTOMERS,
            SourceTable::Sales => SALES,
            SourceTable::Products => PRODUCTS,
            SourceTable::ExchangeRates => EXCHANGE_RATES,
            SourceTable::Stores => STORES,
        }
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single acquisition: which table, which columns, and an optional row filter.
///
/// The filter is a raw SQL predicate and is only honoured by SQL-backed sources.
#[derive(Debug, Clone)]
pub struct TableRequest {
    pub table: SourceTable,
    pub columns: Vec<ColumnDef>,
    pub filter: Option<String>,
}

impl TableRequest {
    pub fn full(table: SourceTable) -> Self {
        Self {
            table,
            columns: table.columns().to_vec(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// The default request set: every source table with its full projection.
pub fn default_requests() -> Vec<TableRequest> {
    SourceTable::ALL.iter().copied().map(TableRequest::full).collect()
}
