mod common;

use common::{f64_column, str_column};
use polars::prelude::*;
use salesreport_core::acquisition::MemoryTableSource;
use salesreport_core::aggregation::{group_reduce, Measure};
use salesreport_core::enrichment::{
    enrich_sales, join_dimension, normalize_customers, normalize_products, EnrichmentError,
    JoinKind, JoinSpec, KeyCardinality,
};
use salesreport_core::tables::SourceTable;

fn two_products() -> DataFrame {
    df!(
        "ProductKey" => &[1i64, 2],
        "Product_Name" => &["Lamp", "Desk"],
        "Unit_Price_USD" => &[10.0f64, 20.0],
        "Unit_Cost_USD" => &[6.0f64, 15.0],
        "Category" => &["Home", "Office"],
    )
    .expect("products")
}

fn facts(dates: &[&str], keys: &[i64], quantities: &[i64]) -> DataFrame {
    df!(
        "Order_Date" => dates,
        "ProductKey" => keys,
        "Quantity" => quantities,
    )
    .expect("facts")
}

#[test]
fn revenue_and_profit_follow_unit_price_and_margin() -> PolarsResult<()> {
    let products = normalize_products(&two_products()).expect("normalize");
    let sales = facts(&["2016-01-05", "2016-01-06"], &[1, 2], &[3, 1]);

    let enriched = enrich_sales(&sales, &products).expect("enrich");

    assert_eq!(f64_column(&enriched, "Revenue"), vec![Some(30.0), Some(20.0)]);
    assert_eq!(f64_column(&enriched, "Profit"), vec![Some(12.0), Some(5.0)]);

    let grouped = group_reduce(&enriched, &["ProductKey"], &[Measure::sum("Profit")])?;
    assert_eq!(f64_column(&grouped, "ProductKey"), vec![Some(1.0), Some(2.0)]);
    assert_eq!(f64_column(&grouped, "Profit"), vec![Some(12.0), Some(5.0)]);
    Ok(())
}

#[test]
fn products_are_renamed_and_gain_margin() {
    let products = normalize_products(&two_products()).expect("normalize");
    assert!(products.column("Product_Name").is_err());
    assert_eq!(
        str_column(&products, "ProductName"),
        vec![Some("Lamp".to_string()), Some("Desk".to_string())]
    );
    assert_eq!(f64_column(&products, "UnitMargin"), vec![Some(4.0), Some(5.0)]);
}

#[test]
fn unparseable_order_date_yields_null_month_and_is_not_grouped() -> PolarsResult<()> {
    let products = normalize_products(&two_products()).expect("normalize");
    let sales = facts(&["2016-01-05", "2024-13-01"], &[1, 1], &[1, 1]);

    let enriched = enrich_sales(&sales, &products).expect("enrich");
    assert_eq!(enriched.height(), 2);
    assert_eq!(enriched.column("Month")?.null_count(), 1);
    assert_eq!(enriched.column("Year")?.null_count(), 1);

    let monthly = group_reduce(&enriched, &["Month"], &[Measure::sum("Revenue")])?;
    assert_eq!(monthly.height(), 1);
    assert_eq!(f64_column(&monthly, "Revenue"), vec![Some(10.0)]);
    Ok(())
}

#[test]
fn month_year_quarter_derive_from_order_date() -> PolarsResult<()> {
    let products = normalize_products(&two_products()).expect("normalize");
    let sales = facts(&["2016-11-20", "2017-02-01"], &[1, 2], &[1, 1]);

    let enriched = enrich_sales(&sales, &products).expect("enrich");
    assert_eq!(
        str_column(&enriched, "Month"),
        vec![Some("2016-11-01".to_string()), Some("2017-02-01".to_string())]
    );
    assert_eq!(f64_column(&enriched, "Year"), vec![Some(2016.0), Some(2017.0)]);
    assert_eq!(f64_column(&enriched, "Quarter"), vec![Some(4.0), Some(1.0)]);
    Ok(())
}

#[test]
fn left_join_keeps_unmatched_rows_with_null_attributes() {
    let products = normalize_products(&two_products()).expect("normalize");
    let sales = facts(&["2016-01-05", "2016-01-05", "2016-01-05"], &[2, 9, 1], &[1, 1, 1]);

    let enriched = enrich_sales(&sales, &products).expect("enrich");

    assert_eq!(enriched.height(), 3);
    assert_eq!(
        str_column(&enriched, "ProductName"),
        vec![Some("Desk".to_string()), None, Some("Lamp".to_string())]
    );
    assert_eq!(f64_column(&enriched, "Revenue"), vec![Some(20.0), None, Some(10.0)]);
}

#[test]
fn duplicate_product_keys_are_rejected() {
    let mut products = two_products();
    products
        .with_column(Series::new("ProductKey".into(), vec![1i64, 1]))
        .expect("overwrite keys");
    let products = normalize_products(&products).expect("normalize");
    let sales = facts(&["2016-01-05"], &[1], &[1]);

    let err = enrich_sales(&sales, &products).expect_err("duplicate keys");
    assert!(matches!(err, EnrichmentError::DuplicateKey { duplicates: 1, .. }));
}

#[test]
fn fan_out_join_repeats_fact_rows_in_order() -> PolarsResult<()> {
    let fact = df!(
        "Day" => &["a", "b", "c"],
        "Revenue" => &[1.0f64, 2.0, 3.0],
    )?;
    let rates = df!(
        "Day" => &["b", "a", "b"],
        "Currency" => &["EUR", "CAD", "GBP"],
    )?;

    let joined = join_dimension(
        &fact,
        &rates,
        &JoinSpec {
            dimension: "rates",
            left_on: "Day",
            right_on: "Day",
            columns: &["Currency"],
            kind: JoinKind::Left,
            cardinality: KeyCardinality::FanOut,
        },
    )
    .expect("fan-out join");

    assert_eq!(joined.height(), 4);
    assert_eq!(f64_column(&joined, "Revenue"), vec![Some(1.0), Some(2.0), Some(2.0), Some(3.0)]);
    assert_eq!(joined.column("Currency")?.null_count(), 1);
    Ok(())
}

#[test]
fn inner_join_drops_unmatched_rows() -> PolarsResult<()> {
    let fact = df!("StoreKey" => &[1i64, 5, 2])?;
    let stores = df!(
        "StoreKey" => &[1i64, 2],
        "State" => &["Ohio", "Texas"],
    )?;

    let joined = join_dimension(&fact, &stores, &JoinSpec::inner_unique("stores", "StoreKey", &["State"]))
        .expect("inner join");

    assert_eq!(
        str_column(&joined, "State"),
        vec![Some("Ohio".to_string()), Some("Texas".to_string())]
    );
    Ok(())
}

#[test]
fn customer_age_uses_reference_year_and_tolerates_bad_birthdays() -> PolarsResult<()> {
    let customers = normalize_customers(&common::customers(), 2024).expect("normalize");

    assert!(customers.column("CustomerName").is_ok());
    assert_eq!(f64_column(&customers, "Age"), vec![Some(34.0), Some(39.0), None]);
    assert_eq!(customers.column("Birthday")?.dtype(), &DataType::Date);
    Ok(())
}

#[tokio::test]
async fn sales_without_products_is_reported_missing() {
    let source = MemoryTableSource::new().with_table(SourceTable::Sales, common::sales());
    let data = common::enriched(&source).await;

    let missing = data.require(SourceTable::Sales).expect_err("sales needs products");
    assert_eq!(missing.table, SourceTable::Sales);
    assert!(missing.reason.contains("products"));

    let stores = data.require(SourceTable::Stores).expect_err("stores never loaded");
    assert!(stores.to_string().contains("stores"));
}

#[tokio::test]
async fn full_fixture_enriches_every_table() {
    let data = common::enriched(&common::full_source()).await;
    for table in SourceTable::ALL {
        assert!(data.is_available(table), "{table} should be available");
    }
    let sales = data.require(SourceTable::Sales).expect("sales");
    assert_eq!(sales.height(), 9);
}
