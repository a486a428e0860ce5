//! Declarative chart descriptions and the renderer seam that turns them into files.

mod render;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use thiserror::Error;

pub use render::{Domain, Point, PreparedChart, PreparedSeries, PlottersRenderer};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("chart {chart} has no plottable rows")]
    NoData { chart: String },
    #[error("chart {chart} is misconfigured: {message}")]
    InvalidSpec { chart: String, message: String },
    #[error("failed to prepare output location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line { markers: bool },
    /// Bars per x category; with a hue, one bar per hue value inside each category.
    Bar { horizontal: bool },
    Scatter,
    /// Bars for the first y column and a line for the second on a right-hand axis.
    BarWithLine,
}

/// Everything needed to draw one chart from one frame.
///
/// `x_label` and `y_label` name the axes as drawn, so a horizontal bar chart puts the
/// value label in `x_label`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub file_stem: String,
    pub kind: ChartKind,
    pub x: String,
    pub y: Vec<String>,
    pub hue: Option<String>,
    pub hue_order: Vec<String>,
    pub annotation: Option<String>,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub secondary_y_label: Option<String>,
}

impl ChartSpec {
    fn new(file_stem: &str, kind: ChartKind, x: &str, y: &[&str], title: &str) -> Self {
        Self {
            file_stem: file_stem.to_string(),
            kind,
            x: x.to_string(),
            y: y.iter().map(|name| name.to_string()).collect(),
            hue: None,
            hue_order: Vec::new(),
            annotation: None,
            title: title.to_string(),
            x_label: x.to_string(),
            y_label: y.first().map(|name| name.to_string()).unwrap_or_default(),
            secondary_y_label: None,
        }
    }

    pub fn line(file_stem: &str, x: &str, y: &[&str], title: &str) -> Self {
        Self::new(file_stem, ChartKind::Line { markers: false }, x, y, title)
    }

    pub fn bar(file_stem: &str, x: &str, y: &str, title: &str) -> Self {
        Self::new(file_stem, ChartKind::Bar { horizontal: false }, x, &[y], title)
    }

    /// Categories on the vertical axis, first row at the top.
    pub fn horizontal_bar(file_stem: &str, category: &str, value: &str, title: &str) -> Self {
        let mut spec = Self::new(
            file_stem,
            ChartKind::Bar { horizontal: true },
            category,
            &[value],
            title,
        );
        spec.x_label = value.to_string();
        spec.y_label = category.to_string();
        spec
    }

    pub fn scatter(file_stem: &str, x: &str, y: &str, title: &str) -> Self {
        Self::new(file_stem, ChartKind::Scatter, x, &[y], title)
    }

    pub fn bar_with_line(file_stem: &str, x: &str, bars: &str, line: &str, title: &str) -> Self {
        let mut spec = Self::new(file_stem, ChartKind::BarWithLine, x, &[bars, line], title);
        spec.secondary_y_label = Some(line.to_string());
        spec
    }

    pub fn with_markers(mut self) -> Self {
        if let ChartKind::Line { .. } = self.kind {
            self.kind = ChartKind::Line { markers: true };
        }
        self
    }

    pub fn with_hue(mut self, hue: &str) -> Self {
        self.hue = Some(hue.to_string());
        self
    }

    /// Fixes the legend order; hue values not listed follow in first-seen order.
    pub fn with_hue_order(mut self, order: Vec<String>) -> Self {
        self.hue_order = order;
        self
    }

    /// Text column drawn next to each bar.
    pub fn with_annotation(mut self, column: &str) -> Self {
        self.annotation = Some(column.to_string());
        self
    }

    pub fn with_labels(mut self, x_label: &str, y_label: &str) -> Self {
        self.x_label = x_label.to_string();
        self.y_label = y_label.to_string();
        self
    }

    pub fn with_secondary_label(mut self, label: &str) -> Self {
        self.secondary_y_label = Some(label.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChartJob {
    pub spec: ChartSpec,
    pub data: DataFrame,
}

impl ChartJob {
    pub fn new(spec: ChartSpec, data: DataFrame) -> Self {
        Self { spec, data }
    }
}

pub trait ChartRenderer: Send + Sync {
    /// Writes the chart into `dir` and returns the artifact path.
    fn render(&self, job: &ChartJob, dir: &Path) -> Result<PathBuf, ExportError>;
}

/// `stem` with every character outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<dir>/<stem>.png`, with the stem sanitized.
pub fn artifact_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.png", sanitize_stem(stem)))
}

/// Hands out sanitized artifact stems that are unique within one run.
///
/// A stem that sanitizes to one already claimed gets `_2`, `_3`, ... appended.
#[derive(Debug, Default)]
pub struct StemRegistry {
    claimed: HashSet<String>,
}

impl StemRegistry {
    pub fn claim(&mut self, stem: &str) -> String {
        let base = sanitize_stem(stem);
        let mut candidate = base.clone();
        let mut n = 1;
        while !self.claimed.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{base}_{n}");
        }
        candidate
    }
}
