#![allow(dead_code)]

use std::time::Duration;

use polars::prelude::*;
use salesreport_core::acquisition::{load_tables, MemoryTableSource};
use salesreport_core::enrichment::EnrichedData;
use salesreport_core::tables::{default_requests, SourceTable};

pub fn products() -> DataFrame {
    df!(
        "ProductKey" => &[1i64, 2, 3, 4],
        "Product_Name" => &["Lamp", "Desk", "Chair", "Mug"],
        "Unit_Price_USD" => &[10.0f64, 20.0, 50.0, 5.0],
        "Unit_Cost_USD" => &[6.0f64, 15.0, 30.0, 2.0],
        "Category" => &["Home", "Office", "Office", "Kitchen"],
    )
    .expect("products")
}

pub fn customers() -> DataFrame {
    df!(
        "CustomerKey" => &[10i64, 11, 12],
        "Name" => &["Ana", "Ben", "Cy"],
        "Birthday" => &["1990-05-01", "1985-02-11", "unknown"],
    )
    .expect("customers")
}

pub fn stores() -> DataFrame {
    df!(
        "StoreKey" => &[1i64, 2, 3],
        "State" => &["Ohio", "Ohio", "Texas"],
        "Country" => &["United States", "United States", "United States"],
        "Square_Meters" => &[100.0f64, 50.0, 0.0],
    )
    .expect("stores")
}

pub fn exchange_rates() -> DataFrame {
    df!(
        "Date" => &["2016-01-05", "2016-01-05", "2016-04-02"],
        "Exchange" => &[0.9f64, 1.3, 0.92],
        "Currency" => &["EUR", "CAD", "EUR"],
    )
    .expect("exchange rates")
}

/// Nine order lines over 2016-2017; the last carries an impossible date.
pub fn sales() -> DataFrame {
    df!(
        "Order_Date" => &[
            "2016-01-05", "2016-01-05", "2016-02-10", "2016-04-02", "2016-11-20",
            "2016-11-20", "2017-02-01", "2017-12-24", "2024-13-01",
        ],
        "Quantity" => &[3i64, 1, 2, 1, 4, 1, 2, 5, 1],
        "ProductKey" => &[1i64, 2, 3, 1, 4, 3, 2, 1, 4],
        "StoreKey" => &[1i64, 1, 2, 3, 1, 1, 2, 3, 1],
        "CustomerKey" => &[10i64, 10, 11, 12, 11, 11, 10, 12, 10],
        "Order_Number" => &[100i64, 100, 101, 102, 103, 103, 104, 105, 106],
    )
    .expect("sales")
}

pub fn full_source() -> MemoryTableSource {
    MemoryTableSource::new()
        .with_table(SourceTable::Sales, sales())
        .with_table(SourceTable::Products, products())
        .with_table(SourceTable::Customers, customers())
        .with_table(SourceTable::Stores, stores())
        .with_table(SourceTable::ExchangeRates, exchange_rates())
}

pub async fn enriched(source: &MemoryTableSource) -> EnrichedData {
    let tables = load_tables(source, &default_requests(), Duration::from_secs(5))
        .await
        .expect("tables load");
    EnrichedData::build(&tables, 2024)
}

pub fn f64_column(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    df.column(name)
        .expect("column")
        .cast(&DataType::Float64)
        .expect("cast")
        .f64()
        .expect("f64")
        .into_iter()
        .collect()
}

pub fn str_column(df: &DataFrame, name: &str) -> Vec<Option<String>> {
    df.column(name)
        .expect("column")
        .cast(&DataType::String)
        .expect("cast")
        .str()
        .expect("str")
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect()
}
