use std::collections::HashSet;

use polars::prelude::*;

use super::{
    filter_in, with_period, Analysis, AnalysisError, AnalysisOutput, SALES, SALES_CUSTOMERS,
    SALES_RATES,
};
use crate::aggregation::{self, Measure};
use crate::charts::{ChartJob, ChartSpec};
use crate::config::AnalysisSettings;
use crate::console::ConsoleTable;
use crate::enrichment::{join_dimension, EnrichedData, JoinKind, JoinSpec, KeyCardinality};
use crate::frame;
use crate::tables::SourceTable;

/// Revenue and profit summed per order month, oldest first.
pub fn monthly_totals(sales: &DataFrame) -> PolarsResult<DataFrame> {
    let monthly = aggregation::group_reduce(
        sales,
        &["Month"],
        &[Measure::sum("Revenue"), Measure::sum("Profit")],
    )?;
    aggregation::sort_by(&monthly, "Month", false)
}

pub struct MonthlySalesTrends;

impl Analysis for MonthlySalesTrends {
    fn code(&self) -> &'static str {
        "monthly_sales_trends"
    }

    fn description(&self) -> &'static str {
        "Monthly revenue and profit with the highest and lowest months"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let monthly = monthly_totals(data.require(SourceTable::Sales)?)?;

        let spec = ChartSpec::line(
            self.code(),
            "Month",
            &["Revenue", "Profit"],
            "Monthly Sales and Profit Trends",
        )
        .with_markers()
        .with_labels("Month", "Amount (USD)");

        let mut output = AnalysisOutput::default().chart(ChartJob::new(spec, monthly.clone()));
        for measure in ["Revenue", "Profit"] {
            let extremes = aggregation::extremes(&monthly, "Month", measure)?;
            output = output.table(ConsoleTable::new(
                format!("Highest and lowest {} months", measure.to_lowercase()),
                extremes,
            ));
        }
        Ok(output)
    }
}

pub struct DipPeriodsRevenue;

impl Analysis for DipPeriodsRevenue {
    fn code(&self) -> &'static str {
        "dip_periods_revenue"
    }

    fn description(&self) -> &'static str {
        "The ten largest month-over-month revenue drops"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let monthly = monthly_totals(data.require(SourceTable::Sales)?)?;
        let changes = aggregation::period_changes(&monthly, "Revenue", "Change")?;
        let dips = with_period(&aggregation::largest_dips(&changes, "Change", 10)?, "Month")?;

        let spec = ChartSpec::bar(self.code(), "Period", "Change", "Top Dip Periods in Revenue")
            .with_labels("Month", "Revenue Change (USD)");
        let table = dips.select(["Period", "Revenue", "Change"])?;

        Ok(AnalysisOutput::default()
            .chart(ChartJob::new(spec, dips))
            .table(ConsoleTable::new("Largest revenue dips", table)))
    }
}

/// Top five products by a summed measure, drawn as one monthly line per product.
pub struct TopProductsOverTime {
    pub code: &'static str,
    pub description: &'static str,
    pub measure: &'static str,
    /// Reported alongside the ranking measure in the console table.
    pub companion: &'static str,
    pub title: &'static str,
    pub y_label: &'static str,
}

pub static TOP_PRODUCTS_QUANTITY_OVER_TIME: TopProductsOverTime = TopProductsOverTime {
    code: "top_products_quantity_over_time",
    description: "Monthly units sold for the five best-selling products",
    measure: "Quantity",
    companion: "Profit",
    title: "Top Products by Quantity Sold Over Time",
    y_label: "Quantity Sold",
};

pub static TOP_PRODUCTS_PROFITABILITY_OVER_TIME: TopProductsOverTime = TopProductsOverTime {
    code: "top_products_profitability_over_time",
    description: "Monthly profit for the five most profitable products",
    measure: "Profit",
    companion: "Quantity",
    title: "Top Products by Profitability Over Time",
    y_label: "Profit (USD)",
};

impl Analysis for TopProductsOverTime {
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

        let totals = aggregation::group_reduce(
            sales,
            &["ProductKey", "ProductName"],
            &[Measure::sum(self.measure), Measure::sum(self.companion)],
        )?;
        let top = aggregation::top_n(&totals, self.measure, 5)?;

        let keys: HashSet<String> = frame::string_values(&top, "ProductKey")?
            .into_iter()
            .flatten()
            .collect();
        let ranking: Vec<String> = frame::string_values(&top, "ProductName")?
            .into_iter()
            .flatten()
            .collect();

        let trend = aggregation::group_reduce(
            &filter_in(sales, "ProductKey", &keys)?,
            &["Month", "ProductName"],
            &[Measure::sum(self.measure)],
        )?;
        let trend = aggregation::sort_by(&trend, "Month", false)?;

        let spec = ChartSpec::line(self.code, "Month", &[self.measure], self.title)
            .with_markers()
            .with_hue("ProductName")
            .with_hue_order(ranking)
            .with_labels("Month", self.y_label);
        let table = top.select(["ProductName", self.measure, self.companion])?;

        Ok(AnalysisOutput::default()
            .chart(ChartJob::new(spec, trend))
            .table(ConsoleTable::new(self.title, table)))
    }
}

/// Sales priced in each quoted currency on the order date.
///
/// Rates are matched on exact date equality; a sale dated on a day with no quotes keeps a
/// null currency and so drops out of the per-currency averages.
pub struct AdjustedRevenueTrends;

impl AdjustedRevenueTrends {
    pub fn adjusted(&self, data: &EnrichedData) -> Result<DataFrame, AnalysisError> {
        let sales = data.require(SourceTable::Sales)?;
        let rates = data.require(SourceTable::ExchangeRates)?;

        let joined = join_dimension(
            sales,
            rates,
            &JoinSpec {
                dimension: SourceTable::ExchangeRates.name(),
                left_on: "Order_Date",
                right_on: "Date",
                columns: &["Exchange", "Currency"],
                kind: JoinKind::Left,
                cardinality: KeyCardinality::FanOut,
            },
        )?;

        let adjusted = joined
            .lazy()
            .with_column((col("Revenue") * col("Exchange")).alias("AdjustedRevenue"))
            .collect()?;

        let averaged = aggregation::group_reduce(
            &adjusted,
            &["Order_Date", "Currency"],
            &[Measure::mean("AdjustedRevenue")],
        )?;
        Ok(aggregation::sort_by(&averaged, "Order_Date", false)?)
    }
}

impl Analysis for AdjustedRevenueTrends {
    fn code(&self) -> &'static str {
        "adjusted_revenue_trends"
    }

    fn description(&self) -> &'static str {
        "Average revenue per order date converted into each quoted currency"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES_RATES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let averaged = self.adjusted(data)?;
        let spec = ChartSpec::line(
            self.code(),
            "Order_Date",
            &["AdjustedRevenue"],
            "Adjusted Revenue Trends by Exchange Rates",
        )
        .with_hue("Currency")
        .with_labels("Date", "Adjusted Revenue");

        Ok(AnalysisOutput::default().chart(ChartJob::new(spec, averaged)))
    }
}

pub struct CustomerAgeRevenue;

impl Analysis for CustomerAgeRevenue {
    fn code(&self) -> &'static str {
        "customer_age_revenue"
    }

    fn description(&self) -> &'static str {
        "Revenue by customer age"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES_CUSTOMERS
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let with_age = join_dimension(
            data.require(SourceTable::Sales)?,
            data.require(SourceTable::Customers)?,
            &JoinSpec::left_unique(SourceTable::Customers.name(), "CustomerKey", &["Age"]),
        )?;
        let by_age = aggregation::group_reduce(&with_age, &["Age"], &[Measure::sum("Revenue")])?;
        let by_age = aggregation::sort_by(&by_age, "Age", false)?;

        let spec = ChartSpec::line(self.code(), "Age", &["Revenue"], "Revenue by Customer Age")
            .with_markers()
            .with_labels("Age", "Revenue (USD)");
        Ok(AnalysisOutput::default().chart(ChartJob::new(spec, by_age)))
    }
}

pub struct AverageOrderValue;

impl AverageOrderValue {
    /// Mean order total per order date, where an order total is the revenue summed over
    /// the order's lines.
    pub fn per_date(sales: &DataFrame) -> PolarsResult<DataFrame> {
        let orders = aggregation::group_reduce(
            sales,
            &["Order_Number", "Order_Date"],
            &[Measure::sum("Revenue").alias("OrderTotal")],
        )?;
        let per_date = aggregation::group_reduce(
            &orders,
            &["Order_Date"],
            &[Measure::mean("OrderTotal").alias("AverageOrderValue")],
        )?;
        aggregation::sort_by(&per_date, "Order_Date", false)
    }
}

impl Analysis for AverageOrderValue {
    fn code(&self) -> &'static str {
        "average_order_value"
    }

    fn description(&self) -> &'static str {
        "Average order value per order date"
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        SALES
    }

    fn run(&self, data: &EnrichedData, _: &AnalysisSettings) -> Result<AnalysisOutput, AnalysisError> {
        let per_date = Self::per_date(data.require(SourceTable::Sales)?)?;
        let spec = ChartSpec::line(
            self.code(),
            "Order_Date",
            &["AverageOrderValue"],
            "Average Order Value Over Time",
        )
        .with_labels("Order Date", "Average Revenue per Order (USD)");
        Ok(AnalysisOutput::default().chart(ChartJob::new(spec, per_date)))
    }
}
