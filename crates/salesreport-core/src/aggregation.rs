//! Grouped reductions and rankings over the enriched sales table.
//!
//! Every function returns a new frame; inputs are never modified. Rows whose grouping key
//! is null never contribute to a group.

use polars::prelude::*;

use crate::frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    Count,
}

/// One reduced output column: `reduction(column) AS alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub column: String,
    pub reduction: Reduction,
    pub alias: String,
}

impl Measure {
    pub fn new(column: &str, reduction: Reduction) -> Self {
        Self {
            column: column.to_string(),
            reduction,
            alias: column.to_string(),
        }
    }

    pub fn sum(column: &str) -> Self {
        Self::new(column, Reduction::Sum)
    }

    pub fn mean(column: &str) -> Self {
        Self::new(column, Reduction::Mean)
    }

    pub fn count(column: &str) -> Self {
        Self::new(column, Reduction::Count)
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_string();
        self
    }

    fn expr(&self) -> Expr {
        let column = col(self.column.as_str());
        let reduced = match self.reduction {
            Reduction::Sum => column.sum(),
            Reduction::Mean => column.mean(),
            Reduction::Count => column.count().cast(DataType::Int64),
        };
        reduced.alias(self.alias.as_str())
    }
}

fn keys_not_null(keys: &[&str]) -> PolarsResult<Expr> {
    let mut iter = keys.iter();
    let Some(first) = iter.next() else {
        return Err(PolarsError::ComputeError(
            "grouping requires at least one key column".into(),
        ));
    };
    Ok(iter.fold(col(*first).is_not_null(), |acc, key| {
        acc.and(col(*key).is_not_null())
    }))
}

/// Groups by `keys` and applies each measure.
///
/// Groups come out in the order their key tuple first appears.
pub fn group_reduce(df: &DataFrame, keys: &[&str], measures: &[Measure]) -> PolarsResult<DataFrame> {
    let present = keys_not_null(keys)?;
    df.clone()
        .lazy()
        .filter(present)
        .group_by_stable(keys.iter().map(|key| col(*key)).collect::<Vec<_>>())
        .agg(measures.iter().map(Measure::expr).collect::<Vec<_>>())
        .collect()
}

fn descending_stable() -> SortMultipleOptions {
    SortMultipleOptions::default()
        .with_order_descending(true)
        .with_nulls_last(true)
        .with_maintain_order(true)
}

/// The `n` rows with the largest `by`, in descending order. Ties keep input order and
/// nulls sort last.
pub fn top_n(df: &DataFrame, by: &str, n: usize) -> PolarsResult<DataFrame> {
    let sorted = df
        .clone()
        .lazy()
        .sort_by_exprs([col(by)], descending_stable())
        .collect()?;
    Ok(sorted.head(Some(n)))
}

/// Applies [`top_n`] independently inside each `group`, with groups in ascending key
/// order. Rows with a null group key are dropped.
pub fn top_n_per_group(df: &DataFrame, group: &str, by: &str, n: usize) -> PolarsResult<DataFrame> {
    let sorted = df
        .clone()
        .lazy()
        .filter(col(group).is_not_null())
        .sort_by_exprs(
            [col(group), col(by)],
            SortMultipleOptions::default()
                .with_order_descending_multi([false, true])
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .collect()?;

    let groups = frame::string_values(&sorted, group)?;
    let mut keep = Vec::with_capacity(groups.len());
    let mut current: Option<&String> = None;
    let mut taken = 0usize;
    for value in &groups {
        if value.as_ref() != current {
            current = value.as_ref();
            taken = 0;
        }
        keep.push(taken < n);
        taken += 1;
    }

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    sorted.filter(&mask)
}

/// Stable sort on a single column.
pub fn sort_by(df: &DataFrame, by: &str, descending: bool) -> PolarsResult<DataFrame> {
    df.clone()
        .lazy()
        .sort_by_exprs(
            [col(by)],
            SortMultipleOptions::default()
                .with_order_descending(descending)
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .collect()
}

/// Adds `alias` holding each row's `value` minus the previous row's; the first row (and
/// any row next to a null) is null.
pub fn period_changes(df: &DataFrame, value: &str, alias: &str) -> PolarsResult<DataFrame> {
    let values = frame::f64_values(df, value)?;
    let mut changes = Vec::with_capacity(values.len());
    let mut previous: Option<f64> = None;
    for (idx, current) in values.iter().enumerate() {
        let change = match (idx, previous, current) {
            (0, _, _) => None,
            (_, Some(prev), Some(cur)) => Some(cur - prev),
            _ => None,
        };
        changes.push(change);
        previous = *current;
    }

    let mut out = df.clone();
    out.with_column(Series::new(alias.into(), changes))?;
    Ok(out)
}

/// Rows with a negative `change`, most negative first, limited to `n`.
pub fn largest_dips(df: &DataFrame, change: &str, n: usize) -> PolarsResult<DataFrame> {
    let negative: Vec<bool> = frame::f64_values(df, change)?
        .iter()
        .map(|value| value.is_some_and(|v| v < 0.0))
        .collect();
    let dips = df
        .filter(&BooleanChunked::from_slice("negative".into(), &negative))?
        .lazy()
        .sort_by_exprs(
            [col(change)],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?;
    Ok(dips.head(Some(n)))
}

/// The first row holding the maximum of `value` and the first holding its minimum, as a
/// two-row frame `[Extreme, key, value]`. Empty when `value` has no non-null entries.
pub fn extremes(df: &DataFrame, key: &str, value: &str) -> PolarsResult<DataFrame> {
    let values = frame::f64_values(df, value)?;
    let mut max: Option<(usize, f64)> = None;
    let mut min: Option<(usize, f64)> = None;
    for (idx, current) in values.iter().enumerate() {
        let Some(current) = *current else { continue };
        if max.map_or(true, |(_, best)| current > best) {
            max = Some((idx, current));
        }
        if min.map_or(true, |(_, best)| current < best) {
            min = Some((idx, current));
        }
    }

    let (rows, labels): (Vec<IdxSize>, Vec<&str>) = match (max, min) {
        (Some((hi, _)), Some((lo, _))) => (
            vec![hi as IdxSize, lo as IdxSize],
            vec!["highest", "lowest"],
        ),
        _ => (Vec::new(), Vec::new()),
    };

    let indices = IdxCa::from_vec("rows".into(), rows);
    let mut picked = df.select([key, value])?.take(&indices)?;
    picked.insert_column(0, Series::new("Extreme".into(), labels))?;
    Ok(picked)
}
