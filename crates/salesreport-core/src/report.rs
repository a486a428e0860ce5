use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::acquisition::{load_tables, SourceTables, TableSource};
use crate::analyses::{all_analyses, find_analysis, Analysis, AnalysisError};
use crate::charts::{ChartRenderer, StemRegistry};
use crate::config::ReportConfig;
use crate::enrichment::EnrichedData;
use crate::tables::{default_requests, SourceTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table: SourceTable,
    pub status: LoadStatus,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
    pub chart: String,
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub code: String,
    pub status: AnalysisStatus,
    pub error: Option<String>,
    pub artifacts: Vec<ArtifactOutcome>,
}

impl AnalysisOutcome {
    fn new(code: &str, status: AnalysisStatus) -> Self {
        Self {
            code: code.to_string(),
            status,
            error: None,
            artifacts: Vec::new(),
        }
    }

    fn failed(code: &str, err: impl ToString) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(code, AnalysisStatus::Failed)
        }
    }
}

/// What happened during one run, serializable as the JSON run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub output_dir: PathBuf,
    pub tables: Vec<TableOutcome>,
    pub analyses: Vec<AnalysisOutcome>,
}

impl ReportSummary {
    fn new(output_dir: PathBuf, tables: &SourceTables) -> Self {
        let mut outcomes: Vec<TableOutcome> = tables
            .loaded()
            .map(|(table, df)| TableOutcome {
                table,
                status: LoadStatus::Loaded,
                rows: Some(df.height()),
                error: None,
            })
            .collect();
        outcomes.extend(tables.failures.iter().map(|failure| TableOutcome {
            table: failure.table,
            status: LoadStatus::Failed,
            rows: None,
            error: Some(failure.cause.clone()),
        }));
        outcomes.sort_by_key(|outcome| outcome.table);

        Self {
            output_dir,
            tables: outcomes,
            analyses: Vec::new(),
        }
    }

    pub fn count(&self, status: AnalysisStatus) -> usize {
        self.analyses
            .iter()
            .filter(|analysis| analysis.status == status)
            .count()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &PathBuf> {
        self.analyses
            .iter()
            .flat_map(|analysis| analysis.artifacts.iter())
            .filter_map(|artifact| artifact.path.as_ref())
    }

    pub fn analysis(&self, code: &str) -> Option<&AnalysisOutcome> {
        self.analyses.iter().find(|analysis| analysis.code == code)
    }
}

/// Runs the whole pipeline: acquisition, enrichment, then every selected analysis in
/// catalogue order.
///
/// Only losing every source table is fatal. A failing analysis or chart is logged and
/// recorded in the summary and the run moves on.
pub async fn run_report(
    source: &dyn TableSource,
    config: &ReportConfig,
    renderer: &dyn ChartRenderer,
) -> Result<ReportSummary> {
    for code in &config.analysis.only {
        if find_analysis(code).is_none() {
            warn!(analysis = %code, "Unknown analysis code requested; ignoring");
        }
    }

    info!(source = %source.describe(), "Acquiring source tables");
    let timeout = Duration::from_secs(config.source.query_timeout_secs);
    let tables = load_tables(source, &default_requests(), timeout)
        .await
        .with_context(|| format!("failed to acquire data from {}", source.describe()))?;

    let data = EnrichedData::build(&tables, config.analysis.reference_year());
    let mut summary = ReportSummary::new(config.output.dir.clone(), &tables);
    let mut stems = StemRegistry::default();

    for analysis in all_analyses() {
        summary
            .analyses
            .push(run_analysis(*analysis, &data, config, renderer, &mut stems));
    }

    info!(
        succeeded = summary.count(AnalysisStatus::Success),
        failed = summary.count(AnalysisStatus::Failed),
        skipped = summary.count(AnalysisStatus::Skipped),
        artifacts = summary.artifacts().count(),
        "Report finished"
    );
    Ok(summary)
}

/// Runs one analysis and exports its charts and console tables.
///
/// Each chart's stem is claimed from `stems` first, so artifacts never overwrite one
/// another within a run.
pub fn run_analysis(
    analysis: &dyn Analysis,
    data: &EnrichedData,
    config: &ReportConfig,
    renderer: &dyn ChartRenderer,
    stems: &mut StemRegistry,
) -> AnalysisOutcome {
    let code = analysis.code();
    if !config.analysis.is_selected(code) {
        return AnalysisOutcome::new(code, AnalysisStatus::Skipped);
    }

    for table in analysis.required_tables() {
        if let Err(missing) = data.require(*table) {
            let err = AnalysisError::MissingInput(missing);
            warn!(analysis = code, error = %err, "Skipping analysis with missing input");
            return AnalysisOutcome::failed(code, err);
        }
    }

    let output = match analysis.run(data, &config.analysis) {
        Ok(output) => output,
        Err(err) => {
            error!(analysis = code, error = %err, "Analysis failed");
            return AnalysisOutcome::failed(code, err);
        }
    };

    let mut outcome = AnalysisOutcome::new(code, AnalysisStatus::Success);
    for mut job in output.charts {
        job.spec.file_stem = stems.claim(&job.spec.file_stem);
        let artifact = match renderer.render(&job, &config.output.dir) {
            Ok(path) => {
                info!(analysis = code, path = %path.display(), "Wrote chart");
                ArtifactOutcome {
                    chart: job.spec.file_stem.clone(),
                    path: Some(path),
                    error: None,
                }
            }
            Err(err) => {
                error!(analysis = code, chart = %job.spec.file_stem, error = %err, "Chart export failed");
                ArtifactOutcome {
                    chart: job.spec.file_stem.clone(),
                    path: None,
                    error: Some(err.to_string()),
                }
            }
        };
        outcome.artifacts.push(artifact);
    }

    let failed_charts = outcome
        .artifacts
        .iter()
        .filter(|artifact| artifact.error.is_some())
        .count();
    if failed_charts > 0 {
        outcome.status = AnalysisStatus::Failed;
        outcome.error = Some(format!(
            "{failed_charts} of {} charts failed to export",
            outcome.artifacts.len()
        ));
    }

    if config.output.print_tables {
        for table in &output.tables {
            match table.render() {
                Ok(rendered) => println!("{rendered}\n"),
                Err(err) => warn!(analysis = code, table = %table.title, error = %err, "Failed to format console table"),
            }
        }
    }

    outcome
}
