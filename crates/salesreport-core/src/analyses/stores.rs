use std::collections::HashSet;

use polars::prelude::*;

use super::{
    filter_eq, filter_rows, with_label, Analysis, AnalysisError, AnalysisOutput, SALES_STORES,
};
use crate::aggregation::{self, Measure};
use crate::charts::{ChartJob, ChartSpec};
use crate::config::AnalysisSettings;
use crate::console::ConsoleTable;
use crate::enrichment::{join_dimension, EnrichedData, JoinSpec};
use crate::frame;
use crate::tables::SourceTable;

/// Revenue summed per store, joined to the store's state and size.
fn store_revenue(data: &EnrichedData) -> Result<DataFrame, AnalysisError> {
    let per_store = aggregation::group_reduce(
        data.require(SourceTable::Sales)?,
        &["StoreKey"],
        &[Measure::sum("Revenue")],
    )?;
    Ok(join_dimension(
        &per_store,
        data.require(SourceTable::Stores)?,
        &JoinSpec::inner_unique(SourceTable::Stores.name(), "StoreKey", &["State", "StoreSize"]),
    )?)
}

/// `numerator / denominator` per row, null where the denominator is missing or not positive.
fn ratio(df: &DataFrame, numerator: &str, denominator: &str, alias: &str) -> PolarsResult<DataFrame> {
    let tops = frame::f64_values(df, numerator)?;
    let bottoms = frame::f64_values(df, denominator)?;
    let values: Vec<Option<f64>> = tops
        .iter()
        .zip(&bottoms)
        .map(|(top, bottom)| match (top, bottom) {
            (Some(top), Some(bottom)) if *bottom > 0.0 => Some(top / bottom),
            _ => None,
        })
        .collect();
    let mut out = df.clone();
    out.with_column(Series::new(alias.into(), values))?;
    Ok(out)
}

pub struct RevenueVsStoreSize;

impl Analysis for RevenueVsStoreSize {
    fn code(&self) -> &'static str {
        "revenue_vs_store_size"
    }

    fn description(&self) -> &'static str {
        "Per-store revenue against store floor area"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES_STORES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let stores = store_revenue(data)?;
        let spec = ChartSpec::scatter(self.code(), "StoreSize", "Revenue", "Store Size vs Revenue")
            .with_labels("Store Size (Square Meters)", "Revenue (USD)");
        Ok(AnalysisOutput::default().chart(ChartJob::new(spec, stores)))
    }
}

pub struct StoreEfficiency;

impl StoreEfficiency {
    /// Stores with a positive size ranked by revenue per square metre.
    pub fn ranked(data: &EnrichedData) -> Result<DataFrame, AnalysisError> {
        let stores = store_revenue(data)?;
        let sized: Vec<bool> = frame::f64_values(&stores, "StoreSize")?
            .iter()
            .map(|size| size.is_some_and(|s| s > 0.0))
            .collect();
        let stores = filter_rows(&stores, &sized)?;
        let stores = ratio(&stores, "Revenue", "StoreSize", "Efficiency")?;
        let top = aggregation::top_n(&stores, "Efficiency", 10)?;
        Ok(with_label(&top, &["State"], Some("StoreKey"))?)
    }
}

impl Analysis for StoreEfficiency {
    fn code(&self) -> &'static str {
        "store_efficiency"
    }

    fn description(&self) -> &'static str {
        "Top 10 stores by revenue per square metre"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES_STORES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let top = Self::ranked(data)?;
        let spec = ChartSpec::horizontal_bar(self.code(), "Label", "Efficiency", "Top 10 Most Efficient Stores")
            .with_labels("Revenue per Square Meter", "State");
        let table = top.select(["StoreKey", "State", "Revenue", "StoreSize", "Efficiency"])?;
        Ok(AnalysisOutput::default()
            .chart(ChartJob::new(spec, top))
            .table(ConsoleTable::new("Most efficient stores", table)))
    }
}

/// Profit, floor area and profit per square metre by store state.
pub struct StatePerformance;

impl StatePerformance {
    /// Sales lines restricted to known stores, carrying `State` and `StoreSize`.
    fn sales_with_stores(data: &EnrichedData) -> Result<DataFrame, AnalysisError> {
        Ok(join_dimension(
            data.require(SourceTable::Sales)?,
            data.require(SourceTable::Stores)?,
            &JoinSpec::inner_unique(SourceTable::Stores.name(), "StoreKey", &["State", "StoreSize"]),
        )?)
    }

    /// One row per state in first-seen order: `Profit`, `StoreSize` (each store counted
    /// once) and `Efficiency` (null when the state has no positive floor area).
    pub fn by_state(data: &EnrichedData) -> Result<DataFrame, AnalysisError> {
        let joined = Self::sales_with_stores(data)?;
        let profit = aggregation::group_reduce(&joined, &["State"], &[Measure::sum("Profit")])?;

        let stores = aggregation::group_reduce(
            &joined,
            &["State", "StoreKey"],
            &[Measure::mean("StoreSize")],
        )?;
        let floor = aggregation::group_reduce(&stores, &["State"], &[Measure::sum("StoreSize")])?;

        let states = join_dimension(
            &profit,
            &floor,
            &JoinSpec::left_unique("state floor area", "State", &["StoreSize"]),
        )?;
        Ok(ratio(&states, "Profit", "StoreSize", "Efficiency")?)
    }

    /// States in the top five by profit, then any further states from the top five by
    /// efficiency, with a `Metric` column naming the list that contributed each.
    pub fn combined(profit_top: &DataFrame, efficiency_top: &DataFrame) -> PolarsResult<DataFrame> {
        let profit_states: HashSet<String> = frame::string_values(profit_top, "State")?
            .into_iter()
            .flatten()
            .collect();
        let extra = efficiency_top.filter(&BooleanChunked::from_slice(
            "mask".into(),
            &frame::string_values(efficiency_top, "State")?
                .iter()
                .map(|state| state.as_ref().is_some_and(|s| !profit_states.contains(s)))
                .collect::<Vec<_>>(),
        ))?;

        let mut combined = profit_top.vstack(&extra)?;
        let metrics: Vec<&str> = (0..combined.height())
            .map(|row| if row < profit_top.height() { "Profit" } else { "Efficiency" })
            .collect();
        combined.with_column(Series::new("Metric".into(), metrics))?;
        Ok(combined)
    }
}

impl Analysis for StatePerformance {
    fn code(&self) -> &'static str {
        "state_performance"
    }

    fn description(&self) -> &'static str {
        "Top states by profit and by profit per square metre, with their best products"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES_STORES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let states = Self::by_state(data)?;
        let profit_top = aggregation::top_n(&states, "Profit", 5)?;
        let efficiency_top = aggregation::top_n(
            &states
                .clone()
                .lazy()
                .filter(col("Efficiency").is_not_null())
                .collect()?,
            "Efficiency",
            5,
        )?;
        let combined = Self::combined(&profit_top, &efficiency_top)?;

        let mut output = AnalysisOutput::default()
            .chart(ChartJob::new(
                ChartSpec::bar("top_5_states_profit", "State", "Profit", "Top 5 States by Profit")
                    .with_labels("State", "Profit (USD)"),
                profit_top.clone(),
            ))
            .chart(ChartJob::new(
                ChartSpec::bar(
                    "top_5_states_efficiency",
                    "State",
                    "Efficiency",
                    "Top 5 Efficient States by Profit per Square Meter",
                )
                .with_labels("State", "Efficiency (Profit/Square Meter)"),
                efficiency_top.clone(),
            ))
            .chart(ChartJob::new(
                ChartSpec::bar(
                    "combined_top_states",
                    "State",
                    "Profit",
                    "Combined Top States by Profit and Efficiency",
                )
                .with_hue("Metric")
                .with_hue_order(vec!["Profit".to_string(), "Efficiency".to_string()])
                .with_labels("State", "Profit (USD)"),
                combined.clone(),
            ))
            .table(ConsoleTable::new("Top 5 states by profit", profit_top))
            .table(ConsoleTable::new("Top 5 states by efficiency", efficiency_top));

        let joined = Self::sales_with_stores(data)?;
        let per_product = aggregation::group_reduce(
            &joined,
            &["State", "ProductKey", "ProductName"],
            &[Measure::sum("Profit"), Measure::sum("Quantity")],
        )?;

        for state in frame::string_values(&combined, "State")?.into_iter().flatten() {
            let products = filter_eq(&per_product, "State", &state)?;
            let top = aggregation::top_n(&products, "Profit", 5)?;
            let spec = ChartSpec::bar_with_line(
                &format!("top_5_products_combined_{state}"),
                "ProductName",
                "Profit",
                "Quantity",
                &format!("Top 5 Products by Profit and Quantity in {state}"),
            )
            .with_labels("Product Name", "Profit (USD)")
            .with_secondary_label("Quantity Sold");
            output = output.chart(ChartJob::new(spec, top));
        }

        Ok(output)
    }
}
