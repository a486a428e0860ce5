//! Catalogue of report analyses.
//!
//! Each analysis reads from [`EnrichedData`] and returns the charts and console tables it
//! wants produced; rendering and printing belong to the report runner.

mod products;
mod ranking;
mod stores;
mod trends;

use std::collections::HashSet;

use once_cell::sync::Lazy;
use polars::prelude::*;
use thiserror::Error;

use crate::charts::ChartJob;
use crate::config::AnalysisSettings;
use crate::console::ConsoleTable;
use crate::enrichment::{EnrichedData, EnrichmentError, MissingInput};
use crate::frame;
use crate::tables::SourceTable;

pub use products::{
    flag_discounts, quarter_leaders, MarketBasket, ProfitMarginVsSalesVolume,
    QuarterProfitComparison, QuarterQuantityComparison, YearlyTopProducts,
    YEARLY_TOP_PRODUCTS_PROFIT, YEARLY_TOP_PRODUCTS_QUANTITY,
};
pub use ranking::{DimensionLookup, RankingAnalysis, RANKINGS};
pub use stores::{RevenueVsStoreSize, StatePerformance, StoreEfficiency};
pub use trends::{
    monthly_totals, AdjustedRevenueTrends, AverageOrderValue, CustomerAgeRevenue,
    DipPeriodsRevenue, MonthlySalesTrends, TopProductsOverTime,
    TOP_PRODUCTS_PROFITABILITY_OVER_TIME, TOP_PRODUCTS_QUANTITY_OVER_TIME,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    MissingInput(#[from] MissingInput),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),
}

#[derive(Debug, Default)]
pub struct AnalysisOutput {
    pub charts: Vec<ChartJob>,
    pub tables: Vec<ConsoleTable>,
}

impl AnalysisOutput {
    pub fn chart(mut self, job: ChartJob) -> Self {
        self.charts.push(job);
        self
    }

    pub fn table(mut self, table: ConsoleTable) -> Self {
        self.tables.push(table);
        self
    }
}

pub trait Analysis: Send + Sync {
    /// Stable identifier, also the artifact stem for single-chart analyses.
    fn code(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Tables that must be available; the runner fails the analysis up front otherwise.
    fn required_tables(&self) -> &'static [SourceTable];
    fn run(
        &self,
        data: &EnrichedData,
        settings: &AnalysisSettings,
    ) -> Result<AnalysisOutput, AnalysisError>;
}

static ANALYSES: Lazy<Vec<&'static dyn Analysis>> = Lazy::new(|| {
    let mut all: Vec<&'static dyn Analysis> =
        vec![&MonthlySalesTrends as &dyn Analysis, &DipPeriodsRevenue];
    all.extend(RANKINGS.iter().map(|ranking| ranking as &dyn Analysis));
    all.extend([
        &TOP_PRODUCTS_QUANTITY_OVER_TIME as &dyn Analysis,
        &TOP_PRODUCTS_PROFITABILITY_OVER_TIME,
        &RevenueVsStoreSize,
        &StoreEfficiency,
        &ProfitMarginVsSalesVolume,
        &AdjustedRevenueTrends,
        &MarketBasket,
        &CustomerAgeRevenue,
        &AverageOrderValue,
        &QuarterProfitComparison,
        &QuarterQuantityComparison,
        &YEARLY_TOP_PRODUCTS_PROFIT,
        &YEARLY_TOP_PRODUCTS_QUANTITY,
        &StatePerformance,
    ]);
    all
});

pub fn all_analyses() -> &'static [&'static dyn Analysis] {
    ANALYSES.as_slice()
}

pub fn find_analysis(code: &str) -> Option<&'static dyn Analysis> {
    all_analyses()
        .iter()
        .copied()
        .find(|analysis| analysis.code() == code)
}

const SALES: &[SourceTable] = &[SourceTable::Sales];
const SALES_STORES: &[SourceTable] = &[SourceTable::Sales, SourceTable::Stores];
const SALES_CUSTOMERS: &[SourceTable] = &[SourceTable::Sales, SourceTable::Customers];
const SALES_RATES: &[SourceTable] = &[SourceTable::Sales, SourceTable::ExchangeRates];

/// Keeps the rows whose entry in `keep` is true.
fn filter_rows(df: &DataFrame, keep: &[bool]) -> PolarsResult<DataFrame> {
    df.filter(&BooleanChunked::from_slice("mask".into(), keep))
}

/// Keeps rows whose `column` value, compared as text, equals `value`. Empty and all-null
/// columns simply match nothing.
fn filter_eq(df: &DataFrame, column: &str, value: impl ToString) -> PolarsResult<DataFrame> {
    let wanted = value.to_string();
    let mask: Vec<bool> = frame::string_values(df, column)?
        .iter()
        .map(|current| current.as_deref() == Some(wanted.as_str()))
        .collect();
    filter_rows(df, &mask)
}

/// Keeps rows whose `column` value (compared as text) is in `keys`.
fn filter_in(df: &DataFrame, column: &str, keys: &HashSet<String>) -> PolarsResult<DataFrame> {
    let mask: Vec<bool> = frame::string_values(df, column)?
        .iter()
        .map(|value| value.as_ref().is_some_and(|v| keys.contains(v)))
        .collect();
    filter_rows(df, &mask)
}

/// Distinct non-null years of the enriched sales table, ascending.
fn order_years(sales: &DataFrame) -> PolarsResult<Vec<i32>> {
    let mut years: Vec<i32> = frame::i64_values(sales, "Year")?
        .into_iter()
        .flatten()
        .map(|year| year as i32)
        .collect();
    years.sort_unstable();
    years.dedup();
    Ok(years)
}

/// Adds a text `Label` column joining `columns` with ", ". Labels that would repeat are
/// suffixed with the row's `key` so every category stays distinct.
fn with_label(df: &DataFrame, columns: &[&str], key: Option<&str>) -> PolarsResult<DataFrame> {
    let parts = columns
        .iter()
        .map(|column| frame::string_values(df, column))
        .collect::<PolarsResult<Vec<_>>>()?;

    let mut labels: Vec<String> = (0..df.height())
        .map(|row| {
            parts
                .iter()
                .map(|values| values[row].clone().unwrap_or_default())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect();

    if let Some(key) = key {
        let keys = frame::string_values(df, key)?;
        let repeated: HashSet<String> = labels
            .iter()
            .enumerate()
            .filter(|(idx, label)| labels[..*idx].contains(*label))
            .map(|(_, label)| label.clone())
            .collect();
        for (label, key) in labels.iter_mut().zip(keys) {
            if repeated.contains(label.as_str()) {
                label.push_str(&format!(" (#{})", key.unwrap_or_default()));
            }
        }
    }

    let mut out = df.clone();
    out.with_column(Series::new("Label".into(), labels))?;
    Ok(out)
}

/// Adds a `Period` column formatting the date column `column` as `%Y-%m`.
fn with_period(df: &DataFrame, column: &str) -> PolarsResult<DataFrame> {
    let periods: Vec<Option<String>> = frame::date_values(df, column)?
        .into_iter()
        .map(|date| date.map(|d| d.format("%Y-%m").to_string()))
        .collect();
    let mut out = df.clone();
    out.with_column(Series::new("Period".into(), periods))?;
    Ok(out)
}
