//! Row-wise accessors over polars columns, coercing to a single physical type first.

use chrono::NaiveDate;
use polars::prelude::*;

use crate::calendar;

pub fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    let values = column.f64()?.into_iter().collect();
    Ok(values)
}

pub fn i64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    let values = column.i64()?.into_iter().collect();
    Ok(values)
}

pub fn string_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect();
    Ok(values)
}

/// Reads a `Date` column back into chrono dates.
pub fn date_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<NaiveDate>>> {
    let column = df.column(name)?.cast(&DataType::Int32)?;
    let values = column
        .i32()?
        .into_iter()
        .map(|days| days.and_then(calendar::from_epoch_days))
        .collect();
    Ok(values)
}

pub fn date_series(name: &str, dates: &[Option<NaiveDate>]) -> PolarsResult<Series> {
    let days: Vec<Option<i32>> = dates
        .iter()
        .map(|date| date.map(calendar::to_epoch_days))
        .collect();
    Series::new(name.into(), days).cast(&DataType::Date)
}

pub fn is_date(df: &DataFrame, name: &str) -> PolarsResult<bool> {
    Ok(matches!(df.column(name)?.dtype(), DataType::Date))
}

pub fn is_numeric(df: &DataFrame, name: &str) -> PolarsResult<bool> {
    Ok(matches!(
        df.column(name)?.dtype(),
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    ))
}
