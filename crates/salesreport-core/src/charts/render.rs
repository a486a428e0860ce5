use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use polars::prelude::DataFrame;
use tracing::debug;

use super::{artifact_path, ChartJob, ChartKind, ChartRenderer, ChartSpec, ExportError};
use crate::calendar;
use crate::frame;

type DrawResult = Result<(), Box<dyn std::error::Error>>;

const BAR_GROUP_WIDTH: f64 = 0.8;

/// How the x values of a chart are placed on its axis.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// One slot per distinct value, in first-seen order; x is the slot index.
    Categories(Vec<String>),
    Numeric,
    /// x is days since 1970-01-01.
    Dates,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSeries {
    pub name: String,
    pub points: Vec<Point>,
}

/// A chart job resolved to plain coordinates, with null rows removed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedChart {
    pub domain: Domain,
    pub series: Vec<PreparedSeries>,
}

impl PreparedChart {
    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.series.iter().flat_map(|s| s.points.iter().map(|p| p.y))
    }

    fn xs(&self) -> impl Iterator<Item = f64> + '_ {
        self.series.iter().flat_map(|s| s.points.iter().map(|p| p.x))
    }
}

/// Draws PNG charts with the plotters bitmap backend.
#[derive(Debug, Clone, Copy)]
pub struct PlottersRenderer {
    pub width: u32,
    pub height: u32,
}

impl PlottersRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn prepare(job: &ChartJob) -> Result<PreparedChart, ExportError> {
        let spec = &job.spec;
        let df = &job.data;

        if spec.y.is_empty() {
            return Err(invalid(spec, "no value column"));
        }
        if spec.kind == ChartKind::BarWithLine && spec.y.len() != 2 {
            return Err(invalid(spec, "bar-with-line charts need exactly two value columns"));
        }

        let domain = if frame::is_date(df, &spec.x)? {
            Domain::Dates
        } else if frame::is_numeric(df, &spec.x)? && !matches!(spec.kind, ChartKind::Bar { .. } | ChartKind::BarWithLine) {
            Domain::Numeric
        } else {
            Domain::Categories(Vec::new())
        };

        let (xs, categories) = x_positions(df, &spec.x, &domain)?;
        let annotations = match &spec.annotation {
            Some(column) => Some(frame::string_values(df, column)?),
            None => None,
        };

        let hue = match (&spec.hue, spec.kind) {
            (Some(hue), kind) if kind != ChartKind::BarWithLine => Some(hue.as_str()),
            _ => None,
        };

        let mut series = match hue {
            Some(hue) => {
                let ys = frame::f64_values(df, &spec.y[0])?;
                let hues = frame::string_values(df, hue)?;
                hue_names(&hues, &spec.hue_order)
                    .into_iter()
                    .map(|name| PreparedSeries {
                        points: collect_points(&xs, &ys, annotations.as_deref(), |row| {
                            hues[row].as_deref() == Some(name.as_str())
                        }),
                        name,
                    })
                    .collect::<Vec<_>>()
            }
            None => spec
                .y
                .iter()
                .map(|column| {
                    let ys = frame::f64_values(df, column)?;
                    Ok(PreparedSeries {
                        name: column.clone(),
                        points: collect_points(&xs, &ys, annotations.as_deref(), |_| true),
                    })
                })
                .collect::<Result<Vec<_>, ExportError>>()?,
        };

        if matches!(spec.kind, ChartKind::Line { .. }) {
            for s in &mut series {
                s.points.sort_by(|a, b| a.x.total_cmp(&b.x));
            }
        }

        if series.iter().all(|s| s.points.is_empty()) {
            return Err(ExportError::NoData {
                chart: spec.file_stem.clone(),
            });
        }

        let domain = match domain {
            Domain::Categories(_) => Domain::Categories(categories),
            other => other,
        };

        Ok(PreparedChart { domain, series })
    }

    fn draw(&self, spec: &ChartSpec, chart: &PreparedChart, path: &Path) -> DrawResult {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        match spec.kind {
            ChartKind::Line { markers } => draw_xy(&root, spec, chart, Some(markers))?,
            ChartKind::Scatter => draw_xy(&root, spec, chart, None)?,
            ChartKind::Bar { horizontal: false } => draw_vertical_bars(&root, spec, chart)?,
            ChartKind::Bar { horizontal: true } => draw_horizontal_bars(&root, spec, chart)?,
            ChartKind::BarWithLine => draw_bar_with_line(&root, spec, chart)?,
        }

        root.present()?;
        Ok(())
    }
}

impl ChartRenderer for PlottersRenderer {
    fn render(&self, job: &ChartJob, dir: &Path) -> Result<PathBuf, ExportError> {
        let prepared = Self::prepare(job)?;

        fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = artifact_path(dir, &job.spec.file_stem);
        self.draw(&job.spec, &prepared, &path)
            .map_err(|err| ExportError::Render {
                path: path.clone(),
                message: err.to_string(),
            })?;

        debug!(chart = %job.spec.file_stem, path = %path.display(), "Rendered chart");
        Ok(path)
    }
}

fn invalid(spec: &ChartSpec, message: &str) -> ExportError {
    ExportError::InvalidSpec {
        chart: spec.file_stem.clone(),
        message: message.to_string(),
    }
}

fn x_positions(
    df: &DataFrame,
    column: &str,
    domain: &Domain,
) -> Result<(Vec<Option<f64>>, Vec<String>), ExportError> {
    match domain {
        Domain::Dates => {
            let xs = frame::date_values(df, column)?
                .into_iter()
                .map(|date| date.map(|d| calendar::to_epoch_days(d) as f64))
                .collect();
            Ok((xs, Vec::new()))
        }
        Domain::Numeric => Ok((frame::f64_values(df, column)?, Vec::new())),
        Domain::Categories(_) => {
            let raw = frame::string_values(df, column)?;
            let mut categories: Vec<String> = Vec::new();
            let xs = raw
                .into_iter()
                .map(|value| {
                    value.map(|label| {
                        let slot = match categories.iter().position(|known| *known == label) {
                            Some(slot) => slot,
                            None => {
                                categories.push(label);
                                categories.len() - 1
                            }
                        };
                        slot as f64
                    })
                })
                .collect();
            Ok((xs, categories))
        }
    }
}

fn hue_names(hues: &[Option<String>], order: &[String]) -> Vec<String> {
    let mut names: Vec<String> = order
        .iter()
        .filter(|name| hues.iter().any(|hue| hue.as_deref() == Some(name.as_str())))
        .cloned()
        .collect();
    for hue in hues.iter().flatten() {
        if !names.contains(hue) {
            names.push(hue.clone());
        }
    }
    names
}

fn collect_points<F>(
    xs: &[Option<f64>],
    ys: &[Option<f64>],
    annotations: Option<&[Option<String>]>,
    include: F,
) -> Vec<Point>
where
    F: Fn(usize) -> bool,
{
    xs.iter()
        .zip(ys)
        .enumerate()
        .filter(|(row, _)| include(*row))
        .filter_map(|(row, (x, y))| {
            Some(Point {
                x: (*x)?,
                y: (*y)?,
                annotation: annotations.and_then(|a| a[row].clone()),
            })
        })
        .collect()
}

fn span(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Axis range around `[lo, hi]`; bar axes always include zero.
fn padded(lo: f64, hi: f64, anchor_zero: bool) -> Range<f64> {
    let (lo, hi) = if anchor_zero {
        (lo.min(0.0), hi.max(0.0))
    } else {
        (lo, hi)
    };
    let pad = if hi > lo { (hi - lo) * 0.08 } else { 1.0 };
    let lower = if anchor_zero && lo == 0.0 { 0.0 } else { lo - pad };
    let upper = if anchor_zero && hi == 0.0 { 0.0 } else { hi + pad };
    if upper > lower {
        lower..upper
    } else {
        lower..lower + 1.0
    }
}

fn category_range(count: usize) -> Range<f64> {
    -0.5..(count.max(1) as f64 - 0.5)
}

fn category_label(categories: &[String], position: f64) -> String {
    let rounded = position.round();
    if (position - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    categories.get(rounded as usize).cloned().unwrap_or_default()
}

fn series_color(idx: usize) -> RGBAColor {
    Palette99::pick(idx).to_rgba()
}

fn x_formatter(domain: &Domain) -> Box<dyn Fn(&f64) -> String + '_> {
    match domain {
        Domain::Categories(categories) => Box::new(move |v| category_label(categories, *v)),
        Domain::Dates => Box::new(|v| {
            calendar::from_epoch_days(v.round() as i32)
                .map(|d| d.format("%Y-%m").to_string())
                .unwrap_or_default()
        }),
        Domain::Numeric => Box::new(|v| format!("{v}")),
    }
}

fn annotation_style() -> TextStyle<'static> {
    TextStyle::from(("sans-serif", 14).into_font()).pos(Pos::new(HPos::Center, VPos::Bottom))
}

fn draw_xy(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    prepared: &PreparedChart,
    line_markers: Option<bool>,
) -> DrawResult {
    let x_range = match &prepared.domain {
        Domain::Categories(categories) => category_range(categories.len()),
        _ => {
            let (lo, hi) = span(prepared.xs());
            padded(lo, hi, false)
        }
    };
    let (lo, hi) = span(prepared.values());
    let y_range = padded(lo, hi, false);

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(15)
        .x_label_area_size(60)
        .y_label_area_size(90)
        .build_cartesian_2d(x_range, y_range)?;

    let formatter = x_formatter(&prepared.domain);
    let mut mesh = chart.configure_mesh();
    mesh.x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .x_label_formatter(&*formatter);
    if let Domain::Categories(categories) = &prepared.domain {
        mesh.x_labels(categories.len() + 1);
    }
    mesh.draw()?;

    for (idx, series) in prepared.series.iter().enumerate() {
        let color = series_color(idx);
        let points = series.points.iter().map(|p| (p.x, p.y));
        let drawn = match line_markers {
            Some(markers) => {
                let line = LineSeries::new(points, color.stroke_width(2));
                let line = if markers { line.point_size(4) } else { line };
                chart.draw_series(line)?
            }
            None => chart.draw_series(points.map(|p| Circle::new(p, 3, color.filled())))?,
        };
        drawn
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));
    }

    if prepared.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

/// Left edge and width of bar `series` among `count` bars sharing one category slot.
fn bar_slot(center: f64, series: usize, count: usize) -> (f64, f64) {
    let width = BAR_GROUP_WIDTH / count.max(1) as f64;
    (center - BAR_GROUP_WIDTH / 2.0 + series as f64 * width, width)
}

fn draw_vertical_bars(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    prepared: &PreparedChart,
) -> DrawResult {
    let categories = match &prepared.domain {
        Domain::Categories(categories) => categories.as_slice(),
        _ => &[],
    };
    let (lo, hi) = span(prepared.values());

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(15)
        .x_label_area_size(80)
        .y_label_area_size(90)
        .build_cartesian_2d(category_range(categories.len()), padded(lo, hi, true))?;

    let formatter = x_formatter(&prepared.domain);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(categories.len() + 1)
        .x_label_formatter(&*formatter)
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;

    let count = prepared.series.len();
    for (idx, series) in prepared.series.iter().enumerate() {
        let color = series_color(idx);
        chart
            .draw_series(series.points.iter().map(|p| {
                let (left, width) = bar_slot(p.x, idx, count);
                Rectangle::new([(left, 0.0), (left + width, p.y)], color.filled())
            }))?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));

        chart.draw_series(series.points.iter().filter_map(|p| {
            let text = p.annotation.clone()?;
            let (left, width) = bar_slot(p.x, idx, count);
            Some(Text::new(text, (left + width / 2.0, p.y), annotation_style()))
        }))?;
    }

    if count > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_horizontal_bars(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    prepared: &PreparedChart,
) -> DrawResult {
    let categories = match &prepared.domain {
        Domain::Categories(categories) => categories.clone(),
        _ => Vec::new(),
    };
    let slots = categories.len();
    // First category at the top.
    let row = move |x: f64| (slots as f64 - 1.0) - x;
    let (lo, hi) = span(prepared.values());

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(15)
        .x_label_area_size(60)
        .y_label_area_size(220)
        .build_cartesian_2d(padded(lo, hi, true), category_range(slots))?;

    let reversed: Vec<String> = categories.iter().rev().cloned().collect();
    let y_formatter = |v: &f64| category_label(&reversed, *v);
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(slots + 1)
        .y_label_formatter(&y_formatter)
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;

    let count = prepared.series.len();
    for (idx, series) in prepared.series.iter().enumerate() {
        let color = series_color(idx);
        chart
            .draw_series(series.points.iter().map(|p| {
                let (bottom, height) = bar_slot(row(p.x), idx, count);
                Rectangle::new([(0.0, bottom), (p.y, bottom + height)], color.filled())
            }))?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));
    }

    if count > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_bar_with_line(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    prepared: &PreparedChart,
) -> DrawResult {
    let categories = match &prepared.domain {
        Domain::Categories(categories) => categories.as_slice(),
        _ => &[],
    };
    let (bars, line) = match prepared.series.as_slice() {
        [bars, line] => (bars, line),
        _ => return Err("bar-with-line chart needs a bar series and a line series".into()),
    };

    let (bar_lo, bar_hi) = span(bars.points.iter().map(|p| p.y));
    let (line_lo, line_hi) = span(line.points.iter().map(|p| p.y));
    let x_range = category_range(categories.len());

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(15)
        .x_label_area_size(80)
        .y_label_area_size(90)
        .right_y_label_area_size(90)
        .build_cartesian_2d(x_range.clone(), padded(bar_lo, bar_hi, true))?
        .set_secondary_coord(x_range, padded(line_lo, line_hi, true));

    let formatter = x_formatter(&prepared.domain);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(categories.len() + 1)
        .x_label_formatter(&*formatter)
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;
    chart
        .configure_secondary_axes()
        .y_desc(spec.secondary_y_label.as_deref().unwrap_or(line.name.as_str()))
        .draw()?;

    let bar_color = series_color(0);
    let line_color = series_color(1);
    chart
        .draw_series(bars.points.iter().map(|p| {
            let (left, width) = bar_slot(p.x, 0, 1);
            Rectangle::new([(left, 0.0), (left + width, p.y)], bar_color.filled())
        }))?
        .label(bars.name.as_str())
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], bar_color.filled()));
    chart
        .draw_secondary_series(
            LineSeries::new(line.points.iter().map(|p| (p.x, p.y)), line_color.stroke_width(3))
                .point_size(4),
        )?
        .label(line.name.as_str())
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], line_color.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}
