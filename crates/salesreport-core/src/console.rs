use comfy_table::{presets::UTF8_FULL, Table};
use polars::prelude::*;

use crate::frame;

/// A titled result set destined for standard output.
#[derive(Debug, Clone)]
pub struct ConsoleTable {
    pub title: String,
    pub frame: DataFrame,
}

impl ConsoleTable {
    pub fn new(title: impl Into<String>, frame: DataFrame) -> Self {
        Self {
            title: title.into(),
            frame,
        }
    }

    /// Renders the frame as a UTF-8 grid. Floats get two decimals, dates use `%Y-%m-%d`
    /// and nulls are empty cells.
    pub fn render(&self) -> PolarsResult<String> {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(
            self.frame
                .get_column_names()
                .iter()
                .map(|name| name.to_string())
                .collect::<Vec<_>>(),
        );

        let cells = self
            .frame
            .get_columns()
            .iter()
            .map(|column| column_cells(&self.frame, column.name().as_str()))
            .collect::<PolarsResult<Vec<_>>>()?;

        for row in 0..self.frame.height() {
            table.add_row(cells.iter().map(|column| column[row].clone()).collect::<Vec<_>>());
        }

        Ok(format!("{}\n{table}", self.title))
    }
}

fn column_cells(df: &DataFrame, name: &str) -> PolarsResult<Vec<String>> {
    let dtype = df.column(name)?.dtype().clone();
    let cells = match dtype {
        DataType::Float32 | DataType::Float64 => frame::f64_values(df, name)?
            .into_iter()
            .map(|value| value.map(|v| format!("{v:.2}")).unwrap_or_default())
            .collect(),
        DataType::Date => frame::date_values(df, name)?
            .into_iter()
            .map(|value| value.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default())
            .collect(),
        _ => frame::string_values(df, name)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect(),
    };
    Ok(cells)
}
