use polars::prelude::*;

use super::{with_label, Analysis, AnalysisError, AnalysisOutput, SALES, SALES_CUSTOMERS, SALES_STORES};
use crate::aggregation::{self, Measure};
use crate::charts::{ChartJob, ChartSpec};
use crate::config::AnalysisSettings;
use crate::console::ConsoleTable;
use crate::enrichment::{join_dimension, EnrichedData, JoinSpec};
use crate::tables::SourceTable;

/// Dimension attributes left-joined onto the sales lines before grouping.
#[derive(Debug, Clone, Copy)]
pub struct DimensionLookup {
    pub table: SourceTable,
    pub key: &'static str,
    pub columns: &'static [&'static str],
}

/// "Sum a measure per key, rank, draw a horizontal bar chart."
#[derive(Debug, Clone, Copy)]
pub struct RankingAnalysis {
    pub code: &'static str,
    pub description: &'static str,
    pub required: &'static [SourceTable],
    pub lookup: Option<DimensionLookup>,
    pub group_by: &'static [&'static str],
    /// Columns joined into the category label; repeats are disambiguated by `group_by[0]`.
    pub label: &'static [&'static str],
    pub measure: &'static str,
    pub top: Option<usize>,
    pub title: &'static str,
    pub value_label: &'static str,
    pub category_label: &'static str,
}

const STORE_LOCATION: DimensionLookup = DimensionLookup {
    table: SourceTable::Stores,
    key: "StoreKey",
    columns: &["State", "Country"],
};

const CUSTOMER_NAME: DimensionLookup = DimensionLookup {
    table: SourceTable::Customers,
    key: "CustomerKey",
    columns: &["CustomerName"],
};

pub static RANKINGS: &[RankingAnalysis] = &[
    RankingAnalysis {
        code: "top_products_by_revenue",
        description: "Top 10 products by total revenue",
        required: SALES,
        lookup: None,
        group_by: &["ProductKey", "ProductName"],
        label: &["ProductName"],
        measure: "Revenue",
        top: Some(10),
        title: "Top 10 Products by Revenue",
        value_label: "Revenue (USD)",
        category_label: "Product",
    },
    RankingAnalysis {
        code: "top_states_by_revenue",
        description: "Top 10 store states by total revenue",
        required: SALES_STORES,
        lookup: Some(STORE_LOCATION),
        group_by: &["State"],
        label: &["State"],
        measure: "Revenue",
        top: Some(10),
        title: "Top 10 States by Revenue",
        value_label: "Revenue (USD)",
        category_label: "State",
    },
    RankingAnalysis {
        code: "top_customers_by_revenue",
        description: "Top 10 customers by total revenue",
        required: SALES_CUSTOMERS,
        lookup: Some(CUSTOMER_NAME),
        group_by: &["CustomerKey", "CustomerName"],
        label: &["CustomerName"],
        measure: "Revenue",
        top: Some(10),
        title: "Top 10 Customers by Revenue",
        value_label: "Revenue (USD)",
        category_label: "Customer",
    },
    RankingAnalysis {
        code: "top_customers_by_orders",
        description: "Top 10 customers by units ordered",
        required: SALES_CUSTOMERS,
        lookup: Some(CUSTOMER_NAME),
        group_by: &["CustomerKey", "CustomerName"],
        label: &["CustomerName"],
        measure: "Quantity",
        top: Some(10),
        title: "Top 10 Customers by Total Orders",
        value_label: "Total Orders",
        category_label: "Customer",
    },
    RankingAnalysis {
        code: "product_profitability",
        description: "Top 10 products by total profit",
        required: SALES,
        lookup: None,
        group_by: &["ProductKey", "ProductName"],
        label: &["ProductName"],
        measure: "Profit",
        top: Some(10),
        title: "Top 10 Products by Profitability",
        value_label: "Total Profit (USD)",
        category_label: "Product",
    },
    RankingAnalysis {
        code: "top_regions_by_revenue",
        description: "Top 10 (state, country) regions by revenue",
        required: SALES_STORES,
        lookup: Some(STORE_LOCATION),
        group_by: &["State", "Country"],
        label: &["State", "Country"],
        measure: "Revenue",
        top: Some(10),
        title: "Top 10 Regions by Revenue",
        value_label: "Revenue (USD)",
        category_label: "Region",
    },
    RankingAnalysis {
        code: "top_regions_by_profit",
        description: "Top 10 (state, country) regions by profit",
        required: SALES_STORES,
        lookup: Some(STORE_LOCATION),
        group_by: &["State", "Country"],
        label: &["State", "Country"],
        measure: "Profit",
        top: Some(10),
        title: "Top 10 Regions by Profit",
        value_label: "Profit (USD)",
        category_label: "Region",
    },
    RankingAnalysis {
        code: "product_category_revenue",
        description: "Revenue per product category",
        required: SALES,
        lookup: None,
        group_by: &["Category"],
        label: &["Category"],
        measure: "Revenue",
        top: None,
        title: "Revenue by Product Category",
        value_label: "Revenue (USD)",
        category_label: "Category",
    },
];

impl RankingAnalysis {
    /// The ranked frame: group keys, the summed measure and a `Label` column.
    pub fn ranked(&self, data: &EnrichedData) -> Result<DataFrame, AnalysisError> {
        let sales = data.require(SourceTable::Sales)?;
        let base = match &self.lookup {
            Some(lookup) => join_dimension(
                sales,
                data.require(lookup.table)?,
                &JoinSpec::left_unique(lookup.table.name(), lookup.key, lookup.columns),
            )?,
            None => sales.clone(),
        };

        let grouped = aggregation::group_reduce(&base, self.group_by, &[Measure::sum(self.measure)])?;
        let ranked = match self.top {
            Some(n) => aggregation::top_n(&grouped, self.measure, n)?,
            None => aggregation::sort_by(&grouped, self.measure, true)?,
        };
        Ok(with_label(&ranked, self.label, self.group_by.first().copied())?)
    }
}

impl Analysis for RankingAnalysis {
    fn code(&self) -> &'static str {
        self.code
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn required_tables(&self) -> &'static [SourceTable] {
        self.required
    }

    fn run(
        &self,
        data: &EnrichedData,
        _settings: &AnalysisSettings,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let ranked = self.ranked(data)?;
        let spec = ChartSpec::horizontal_bar(self.code, "Label", self.measure, self.title)
            .with_labels(self.value_label, self.category_label);
        let table = ranked.select(["Label", self.measure])?;

        Ok(AnalysisOutput::default()
            .chart(ChartJob::new(spec, ranked))
            .table(ConsoleTable::new(self.title, table)))
    }
}
