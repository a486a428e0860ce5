mod common;

use std::collections::HashMap;

use common::{f64_column, str_column};
use polars::prelude::*;
use salesreport_core::analyses::{
    all_analyses, find_analysis, flag_discounts, quarter_leaders, AdjustedRevenueTrends,
    Analysis, AverageOrderValue, MarketBasket, StatePerformance, StoreEfficiency,
    TOP_PRODUCTS_QUANTITY_OVER_TIME,
};
use salesreport_core::charts::ChartKind;
use salesreport_core::config::AnalysisSettings;
use salesreport_core::tables::SourceTable;

fn strings(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

fn settings() -> AnalysisSettings {
    AnalysisSettings {
        reference_year: Some(2024),
        ..AnalysisSettings::default()
    }
}

#[test]
fn market_basket_counts_orders_per_product_pair() -> PolarsResult<()> {
    let lines = df!(
        "Order_Number" => &[1i64, 1, 1, 2, 2, 3, 4, 4],
        "ProductKey" => &[1i64, 2, 3, 2, 1, 1, 3, 3],
        "ProductName" => &["A", "B", "C", "B", "A", "A", "C", "C"],
    )?;

    let pairs = MarketBasket::product_pairs(&lines)?;

    assert_eq!(str_column(&pairs, "Pair"), strings(&["A & B", "A & C", "B & C"]));
    assert_eq!(str_column(&pairs, "PairKeys"), strings(&["1 & 2", "1 & 3", "2 & 3"]));
    assert_eq!(f64_column(&pairs, "Orders"), vec![Some(2.0), Some(1.0), Some(1.0)]);
    Ok(())
}

#[test]
fn market_basket_keeps_same_named_products_apart() -> PolarsResult<()> {
    let lines = df!(
        "Order_Number" => &[1i64, 1, 2, 2, 3, 3],
        "ProductKey" => &[10i64, 30, 20, 30, 10, 30],
        "ProductName" => &["A", "B", "A", "B", "A", "B"],
    )?;

    let pairs = MarketBasket::product_pairs(&lines)?;

    assert_eq!(str_column(&pairs, "Pair"), strings(&["A & B", "A & B"]));
    assert_eq!(str_column(&pairs, "PairKeys"), strings(&["10 & 30", "20 & 30"]));
    assert_eq!(f64_column(&pairs, "Orders"), vec![Some(2.0), Some(1.0)]);
    Ok(())
}

#[test]
fn discount_flag_requires_lower_q4_price() -> PolarsResult<()> {
    let leaders = df!(
        "Quarter" => &["Q1", "Q4", "Q4"],
        "ProductKey" => &[1i64, 2, 3],
        "ProductName" => &["Lamp", "Desk", "Chair"],
        "Profit" => &[10.0f64, 8.0, 6.0],
    )?;
    let q1 = HashMap::from([("1".to_string(), 10.0), ("2".to_string(), 20.0)]);
    let q4 = HashMap::from([("1".to_string(), 9.0), ("2".to_string(), 20.0), ("3".to_string(), 1.0)]);

    let flagged = flag_discounts(&leaders, &q1, &q4)?;

    assert_eq!(
        str_column(&flagged, "Discount"),
        strings(&["Discount", "No Discount", "No Discount"])
    );
    Ok(())
}

#[tokio::test]
async fn quarter_leaders_rank_q1_then_q4() {
    let data = common::enriched(&common::full_source()).await;
    let sales = data.require(SourceTable::Sales).expect("sales");
    let year = sales
        .clone()
        .lazy()
        .filter(col("Year").eq(lit(2016)))
        .collect()
        .expect("filter");

    let leaders = quarter_leaders(&year, "Profit", 3).expect("leaders");

    assert_eq!(str_column(&leaders, "Quarter"), strings(&["Q1", "Q1", "Q1", "Q4", "Q4"]));
    assert_eq!(
        str_column(&leaders, "ProductName"),
        strings(&["Chair", "Lamp", "Desk", "Chair", "Mug"])
    );
    assert_eq!(
        f64_column(&leaders, "Profit"),
        vec![Some(40.0), Some(12.0), Some(5.0), Some(20.0), Some(12.0)]
    );
}

#[tokio::test]
async fn state_efficiency_counts_each_store_once() {
    let data = common::enriched(&common::full_source()).await;

    let states = StatePerformance::by_state(&data).expect("states");

    assert_eq!(str_column(&states, "State"), strings(&["Ohio", "Texas"]));
    assert_eq!(f64_column(&states, "Profit"), vec![Some(102.0), Some(24.0)]);
    assert_eq!(f64_column(&states, "StoreSize"), vec![Some(150.0), Some(0.0)]);
    let efficiency = f64_column(&states, "Efficiency");
    assert!((efficiency[0].expect("ohio") - 0.68).abs() < 1e-9);
    assert_eq!(efficiency[1], None);
}

#[tokio::test]
async fn state_performance_charts_each_combined_state() {
    let data = common::enriched(&common::full_source()).await;
    let analysis = find_analysis("state_performance").expect("registered");

    let output = analysis.run(&data, &settings()).expect("runs");
    let stems: Vec<&str> = output.charts.iter().map(|job| job.spec.file_stem.as_str()).collect();

    assert_eq!(
        stems,
        vec![
            "top_5_states_profit",
            "top_5_states_efficiency",
            "combined_top_states",
            "top_5_products_combined_Ohio",
            "top_5_products_combined_Texas",
        ]
    );
    assert_eq!(output.charts[4].spec.kind, ChartKind::BarWithLine);
}

#[tokio::test]
async fn store_efficiency_skips_zero_area_and_disambiguates_states() {
    let data = common::enriched(&common::full_source()).await;

    let ranked = StoreEfficiency::ranked(&data).expect("ranked");

    assert_eq!(str_column(&ranked, "Label"), strings(&["Ohio (#2)", "Ohio (#1)"]));
    assert_eq!(f64_column(&ranked, "Efficiency"), vec![Some(2.8), Some(1.25)]);
}

#[tokio::test]
async fn product_revenue_ranking_uses_product_names() {
    let data = common::enriched(&common::full_source()).await;
    let analysis = find_analysis("top_products_by_revenue").expect("registered");

    let output = analysis.run(&data, &settings()).expect("runs");

    assert_eq!(output.charts.len(), 1);
    let chart = &output.charts[0];
    assert_eq!(chart.spec.kind, ChartKind::Bar { horizontal: true });
    assert_eq!(str_column(&chart.data, "Label"), strings(&["Chair", "Lamp", "Desk", "Mug"]));
    assert_eq!(
        f64_column(&chart.data, "Revenue"),
        vec![Some(150.0), Some(90.0), Some(60.0), Some(25.0)]
    );
    assert_eq!(output.tables.len(), 1);
}

#[tokio::test]
async fn quantity_trend_legend_follows_ranking() {
    let data = common::enriched(&common::full_source()).await;

    let output = TOP_PRODUCTS_QUANTITY_OVER_TIME
        .run(&data, &settings())
        .expect("runs");

    assert_eq!(
        output.charts[0].spec.hue_order,
        vec!["Lamp".to_string(), "Mug".to_string(), "Desk".to_string(), "Chair".to_string()]
    );
}

#[tokio::test]
async fn average_order_value_sums_lines_before_averaging() {
    let data = common::enriched(&common::full_source()).await;

    let per_date = AverageOrderValue::per_date(data.require(SourceTable::Sales).expect("sales"))
        .expect("aov");

    assert_eq!(
        str_column(&per_date, "Order_Date")[0],
        Some("2016-01-05".to_string())
    );
    assert_eq!(f64_column(&per_date, "AverageOrderValue")[0], Some(50.0));
    assert_eq!(per_date.column("Order_Date").expect("date").null_count(), 0);
}

#[tokio::test]
async fn adjusted_revenue_only_keeps_exact_rate_dates() {
    let data = common::enriched(&common::full_source()).await;

    let adjusted = AdjustedRevenueTrends.adjusted(&data).expect("adjusted");

    assert_eq!(adjusted.height(), 3);
    let currencies = str_column(&adjusted, "Currency");
    let values = f64_column(&adjusted, "AdjustedRevenue");
    let cad = currencies
        .iter()
        .zip(&values)
        .find(|(currency, _)| currency.as_deref() == Some("CAD"))
        .and_then(|(_, value)| *value)
        .expect("CAD row");
    assert!((cad - 32.5).abs() < 1e-9);
}

#[tokio::test]
async fn every_analysis_runs_on_the_fixture() {
    let data = common::enriched(&common::full_source()).await;

    for analysis in all_analyses() {
        let output = analysis
            .run(&data, &settings())
            .unwrap_or_else(|err| panic!("{} failed: {err}", analysis.code()));
        assert!(!output.charts.is_empty(), "{} produced no charts", analysis.code());
    }
}
