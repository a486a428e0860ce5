use std::collections::HashMap;

use polars::prelude::*;

use super::{
    filter_eq, filter_rows, order_years, with_label, Analysis, AnalysisError, AnalysisOutput,
    SALES,
};
use crate::aggregation::{self, Measure};
use crate::charts::{ChartJob, ChartSpec};
use crate::config::AnalysisSettings;
use crate::console::ConsoleTable;
use crate::enrichment::EnrichedData;
use crate::frame;
use crate::tables::SourceTable;

pub struct ProfitMarginVsSalesVolume;

impl Analysis for ProfitMarginVsSalesVolume {
    fn code(&self) -> &'static str {
        "profit_margin_vs_sales_volume"
    }

    fn description(&self) -> &'static str {
        "Per-line unit margin against quantity sold"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let lines = data
            .require(SourceTable::Sales)?
            .select(["UnitMargin", "Quantity"])?;
        let spec = ChartSpec::scatter(
            self.code(),
            "UnitMargin",
            "Quantity",
            "Profit Margin vs Sales Volume",
        )
        .with_labels("Profit Margin per Unit (USD)", "Quantity Sold");
        Ok(AnalysisOutput::default().chart(ChartJob::new(spec, lines)))
    }
}

pub struct MarketBasket;

impl MarketBasket {
    /// Counts, for every unordered pair of distinct products, the orders containing both.
    ///
    /// Products are identified by `ProductKey`; names only label the pair. Pairs come out
    /// in first-seen order with the two products sorted by name, as columns `ProductA`,
    /// `ProductB`, `Pair` ("A & B"), `PairKeys` ("1 & 2") and `Orders`.
    pub fn product_pairs(sales: &DataFrame) -> PolarsResult<DataFrame> {
        let orders = frame::i64_values(sales, "Order_Number")?;
        let keys = frame::i64_values(sales, "ProductKey")?;
        let names = frame::string_values(sales, "ProductName")?;

        let mut basket_index: HashMap<i64, usize> = HashMap::new();
        let mut baskets: Vec<Vec<(String, i64)>> = Vec::new();
        for ((order, key), name) in orders.into_iter().zip(keys).zip(names) {
            let (Some(order), Some(key), Some(name)) = (order, key, name) else {
                continue;
            };
            let slot = *basket_index.entry(order).or_insert_with(|| {
                baskets.push(Vec::new());
                baskets.len() - 1
            });
            if !baskets[slot].iter().any(|(_, known)| *known == key) {
                baskets[slot].push((name, key));
            }
        }

        for basket in &mut baskets {
            basket.sort();
        }

        let mut pair_index: HashMap<(i64, i64), usize> = HashMap::new();
        let mut pairs: Vec<(&(String, i64), &(String, i64), i64)> = Vec::new();
        for basket in &baskets {
            for (i, first) in basket.iter().enumerate() {
                for second in &basket[i + 1..] {
                    match pair_index.get(&(first.1, second.1)) {
                        Some(&slot) => pairs[slot].2 += 1,
                        None => {
                            pair_index.insert((first.1, second.1), pairs.len());
                            pairs.push((first, second, 1));
                        }
                    }
                }
            }
        }

        let firsts: Vec<&str> = pairs.iter().map(|(a, _, _)| a.0.as_str()).collect();
        let seconds: Vec<&str> = pairs.iter().map(|(_, b, _)| b.0.as_str()).collect();
        let labels: Vec<String> = pairs
            .iter()
            .map(|(a, b, _)| format!("{} & {}", a.0, b.0))
            .collect();
        let pair_keys: Vec<String> = pairs
            .iter()
            .map(|(a, b, _)| format!("{} & {}", a.1, b.1))
            .collect();
        let counts: Vec<i64> = pairs.iter().map(|(_, _, n)| *n).collect();

        df!(
            "ProductA" => firsts,
            "ProductB" => seconds,
            "Pair" => labels,
            "PairKeys" => pair_keys,
            "Orders" => counts,
        )
    }
}

impl Analysis for MarketBasket {
    fn code(&self) -> &'static str {
        "market_basket"
    }

    fn description(&self) -> &'static str {
        "Top 10 product pairs bought in the same order"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let pairs = Self::product_pairs(data.require(SourceTable::Sales)?)?;
        let top = with_label(
            &aggregation::top_n(&pairs, "Orders", 10)?,
            &["Pair"],
            Some("PairKeys"),
        )?;
        let spec = ChartSpec::horizontal_bar(self.code(), "Label", "Orders", "Top 10 Product Pairs")
            .with_labels("Number of Orders", "Product Pair");
        let table = top.select(["Label", "Orders"])?;
        Ok(AnalysisOutput::default()
            .chart(ChartJob::new(spec, top))
            .table(ConsoleTable::new("Top product pairs", table)))
    }
}

/// The top `n` products by `measure` in Q1 and in Q4 of `sales`, Q1 rows first.
///
/// `Quarter` is rewritten to the labels `Q1`/`Q4`.
pub fn quarter_leaders(sales: &DataFrame, measure: &str, n: usize) -> PolarsResult<DataFrame> {
    let in_edges: Vec<bool> = frame::i64_values(sales, "Quarter")?
        .iter()
        .map(|quarter| matches!(quarter, Some(1 | 4)))
        .collect();
    let edges = filter_rows(sales, &in_edges)?;
    let grouped = aggregation::group_reduce(
        &edges,
        &["Quarter", "ProductKey", "ProductName"],
        &[Measure::sum(measure)],
    )?;
    let mut leaders = aggregation::top_n_per_group(&grouped, "Quarter", measure, n)?;

    let labels: Vec<Option<String>> = frame::i64_values(&leaders, "Quarter")?
        .into_iter()
        .map(|quarter| quarter.map(|q| format!("Q{q}")))
        .collect();
    leaders.with_column(Series::new("Quarter".into(), labels))?;
    Ok(leaders)
}

/// Mean `Unit_Price_USD` per product over all sales in `quarter`, keyed by ProductKey text.
fn average_prices(sales: &DataFrame, quarter: i32) -> PolarsResult<HashMap<String, f64>> {
    let in_quarter = filter_eq(sales, "Quarter", quarter)?;
    let prices = aggregation::group_reduce(
        &in_quarter,
        &["ProductKey"],
        &[Measure::mean("Unit_Price_USD")],
    )?;
    let keys = frame::string_values(&prices, "ProductKey")?;
    let means = frame::f64_values(&prices, "Unit_Price_USD")?;
    Ok(keys
        .into_iter()
        .zip(means)
        .filter_map(|(key, mean)| Some((key?, mean?)))
        .collect())
}

/// Adds `Discount`: "Discount" when the product's average Q4 price is below its Q1
/// price, "No Discount" otherwise (including when either quarter has no sales).
pub fn flag_discounts(
    leaders: &DataFrame,
    q1_prices: &HashMap<String, f64>,
    q4_prices: &HashMap<String, f64>,
) -> PolarsResult<DataFrame> {
    let flags: Vec<&str> = frame::string_values(leaders, "ProductKey")?
        .iter()
        .map(|key| {
            let discounted = key.as_ref().is_some_and(|key| {
                matches!((q1_prices.get(key), q4_prices.get(key)), (Some(q1), Some(q4)) if q4 < q1)
            });
            if discounted {
                "Discount"
            } else {
                "No Discount"
            }
        })
        .collect();
    let mut out = leaders.clone();
    out.with_column(Series::new("Discount".into(), flags))?;
    Ok(out)
}

fn quarter_hues() -> Vec<String> {
    vec!["Q1".to_string(), "Q4".to_string()]
}

pub struct QuarterProfitComparison;

impl Analysis for QuarterProfitComparison {
    fn code(&self) -> &'static str {
        "quarter_profit_comparison"
    }

    fn description(&self) -> &'static str {
        "Per year, the three most profitable products in Q1 and Q4 with discount flags"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let sales = data.require(SourceTable::Sales)?;
        let q1_prices = average_prices(sales, 1)?;
        let q4_prices = average_prices(sales, 4)?;

        let mut output = AnalysisOutput::default();
        for year in order_years(sales)? {
            let leaders = quarter_leaders(&filter_eq(sales, "Year", year)?, "Profit", 3)?;
            if leaders.height() == 0 {
                continue;
            }
            let flagged = flag_discounts(&leaders, &q1_prices, &q4_prices)?;
            let spec = ChartSpec::bar(
                &format!("top_products_profit_q1_vs_q4_{year}_discounts"),
                "ProductName",
                "Profit",
                &format!("Top 3 Most Profitable Products: Q1 vs Q4 in {year}"),
            )
            .with_hue("Quarter")
            .with_hue_order(quarter_hues())
            .with_annotation("Discount")
            .with_labels("Product Name", "Profit (USD)");
            output = output.chart(ChartJob::new(spec, flagged));
        }
        Ok(output)
    }
}

pub struct QuarterQuantityComparison;

impl Analysis for QuarterQuantityComparison {
    fn code(&self) -> &'static str {
        "quarter_quantity_comparison"
    }

    fn description(&self) -> &'static str {
        "Per year in the configured window, the three most bought products in Q1 and Q4"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(
        &self,
        data: &EnrichedData,
        settings: &AnalysisSettings,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let sales = data.require(SourceTable::Sales)?;
        let (first, last) = settings.quarter_window;

        let mut output = AnalysisOutput::default();
        for year in order_years(sales)?.into_iter().filter(|y| (first..=last).contains(y)) {
            let leaders = quarter_leaders(&filter_eq(sales, "Year", year)?, "Quantity", 3)?;
            if leaders.height() == 0 {
                continue;
            }
            let spec = ChartSpec::bar(
                &format!("top_3_products_q1_vs_q4_{year}"),
                "ProductName",
                "Quantity",
                &format!("Top 3 Most Bought Products: Q1 vs Q4 in {year}"),
            )
            .with_hue("Quarter")
            .with_hue_order(quarter_hues())
            .with_labels("Product Name", "Quantity Sold");
            output = output.chart(ChartJob::new(spec, leaders));
        }
        Ok(output)
    }
}

/// The top five products per order year by a summed measure, one chart per year.
pub struct YearlyTopProducts {
    pub code: &'static str,
    pub description: &'static str,
    pub measure: &'static str,
    pub stem: &'static str,
    pub title: &'static str,
    pub y_label: &'static str,
}

pub static YEARLY_TOP_PRODUCTS_PROFIT: YearlyTopProducts = YearlyTopProducts {
    code: "yearly_top_products_profit",
    description: "Top 5 products by profit in each year",
    measure: "Profit",
    stem: "top_5_products_profit",
    title: "Top 5 Products by Profit",
    y_label: "Profit (USD)",
};

pub static YEARLY_TOP_PRODUCTS_QUANTITY: YearlyTopProducts = YearlyTopProducts {
    code: "yearly_top_products_quantity",
    description: "Top 5 products by quantity in each year",
    measure: "Quantity",
    stem: "top_5_products_quantity",
    title: "Top 5 Products by Quantity",
    y_label: "Quantity Sold",
};

impl YearlyTopProducts {
    pub fn leaders(&self, sales: &DataFrame) -> PolarsResult<DataFrame> {
        let grouped = aggregation::group_reduce(
            sales,
            &["Year", "ProductKey", "ProductName"],
            &[Measure::sum(self.measure)],
        )?;
        aggregation::top_n_per_group(&grouped, "Year", self.measure, 5)
    }
}

impl Analysis for YearlyTopProducts {
    fn code(&self) -> &'static str {
        self.code
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let sales = data.require(SourceTable::Sales)?;
        let leaders = self.leaders(sales)?;

        let mut output = AnalysisOutput::default();
        for year in order_years(&leaders)? {
            let spec = ChartSpec::bar(
                &format!("{}_{year}", self.stem),
                "ProductName",
                self.measure,
                &format!("{} in {year}", self.title),
            )
            .with_labels("Product Name", self.y_label);
            output = output.chart(ChartJob::new(spec, filter_eq(&leaders, "Year", year)?));
        }

        let table = leaders.select(["Year", "ProductName", self.measure])?;
        Ok(output.table(ConsoleTable::new(format!("{} per year", self.title), table)))
    }
}
