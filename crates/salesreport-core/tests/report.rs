mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use polars::prelude::*;
use salesreport_core::acquisition::MemoryTableSource;
use salesreport_core::analyses::all_analyses;
use salesreport_core::charts::{artifact_path, ChartJob, ChartRenderer, ExportError, PlottersRenderer};
use salesreport_core::config::ReportConfig;
use salesreport_core::report::{run_report, AnalysisStatus, LoadStatus};
use salesreport_core::tables::SourceTable;

/// Records every chart it is asked for and fails the one named `fail_on`.
#[derive(Default)]
struct RecordingRenderer {
    rendered: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingRenderer {
    fn failing_on(stem: &'static str) -> Self {
        Self {
            fail_on: Some(stem),
            ..Self::default()
        }
    }

    fn stems(&self) -> Vec<String> {
        self.rendered.lock().expect("lock").clone()
    }
}

impl ChartRenderer for RecordingRenderer {
    fn render(&self, job: &ChartJob, dir: &Path) -> Result<PathBuf, ExportError> {
        let path = artifact_path(dir, &job.spec.file_stem);
        if self.fail_on == Some(job.spec.file_stem.as_str()) {
            return Err(ExportError::Render {
                path,
                message: "backend refused".to_string(),
            });
        }
        self.rendered
            .lock()
            .expect("lock")
            .push(job.spec.file_stem.clone());
        Ok(path)
    }
}

fn config(dir: &Path) -> ReportConfig {
    let mut config = ReportConfig::default();
    config.output.dir = dir.to_path_buf();
    config.output.print_tables = false;
    config.analysis.reference_year = Some(2024);
    config.source.query_timeout_secs = 5;
    config
}

#[tokio::test]
async fn full_fixture_runs_every_analysis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let renderer = RecordingRenderer::default();

    let summary = run_report(&common::full_source(), &config(dir.path()), &renderer)
        .await
        .expect("report runs");

    assert_eq!(summary.count(AnalysisStatus::Failed), 0);
    assert_eq!(summary.count(AnalysisStatus::Skipped), 0);
    assert!(summary.tables.iter().all(|t| t.status == LoadStatus::Loaded));
    assert_eq!(summary.artifacts().count(), renderer.stems().len());
    assert!(renderer.stems().contains(&"monthly_sales_trends".to_string()));
}

#[tokio::test]
async fn missing_stores_only_fails_store_analyses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = MemoryTableSource::new()
        .with_table(SourceTable::Sales, common::sales())
        .with_table(SourceTable::Products, common::products())
        .with_table(SourceTable::Customers, common::customers())
        .with_table(SourceTable::ExchangeRates, common::exchange_rates());

    let summary = run_report(&source, &config(dir.path()), &RecordingRenderer::default())
        .await
        .expect("partial data still reports");

    let store_codes = [
        "top_states_by_revenue",
        "top_regions_by_revenue",
        "top_regions_by_profit",
        "revenue_vs_store_size",
        "store_efficiency",
        "state_performance",
    ];
    for code in store_codes {
        let outcome = summary.analysis(code).expect("recorded");
        assert_eq!(outcome.status, AnalysisStatus::Failed, "{code}");
        assert!(
            outcome.error.as_deref().is_some_and(|e| e.contains("stores")),
            "{code}: {:?}",
            outcome.error
        );
        assert!(outcome.artifacts.is_empty());
    }
    for outcome in &summary.analyses {
        if !store_codes.contains(&outcome.code.as_str()) {
            assert_eq!(outcome.status, AnalysisStatus::Success, "{}", outcome.code);
        }
    }

    let stores = summary
        .tables
        .iter()
        .find(|t| t.table == SourceTable::Stores)
        .expect("stores outcome");
    assert_eq!(stores.status, LoadStatus::Failed);
}

#[tokio::test]
async fn failed_chart_does_not_stop_its_siblings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let renderer = RecordingRenderer::failing_on("top_5_states_profit");

    let summary = run_report(&common::full_source(), &config(dir.path()), &renderer)
        .await
        .expect("report runs");

    let outcome = summary.analysis("state_performance").expect("recorded");
    assert_eq!(outcome.status, AnalysisStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("1 of 5 charts failed to export"));

    let stems = renderer.stems();
    assert!(!stems.contains(&"top_5_states_profit".to_string()));
    assert!(stems.contains(&"top_5_states_efficiency".to_string()));
    assert!(stems.contains(&"top_5_products_combined_Ohio".to_string()));
    assert_eq!(summary.count(AnalysisStatus::Failed), 1);
}

#[tokio::test]
async fn unselected_analyses_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(dir.path());
    config.analysis.only = vec!["market_basket".to_string(), "no_such_analysis".to_string()];
    let renderer = RecordingRenderer::default();

    let summary = run_report(&common::full_source(), &config, &renderer)
        .await
        .expect("report runs");

    assert_eq!(summary.count(AnalysisStatus::Success), 1);
    assert_eq!(summary.count(AnalysisStatus::Skipped), summary.analyses.len() - 1);
    assert_eq!(renderer.stems(), vec!["market_basket".to_string()]);
}

#[tokio::test]
async fn empty_source_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");

    let err = run_report(&MemoryTableSource::new(), &config(dir.path()), &RecordingRenderer::default())
        .await
        .expect_err("nothing loaded");

    assert!(err.to_string().contains("failed to acquire data"));
}

#[tokio::test]
async fn summary_serializes_statuses_in_snake_case() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(dir.path());
    config.analysis.only = vec!["market_basket".to_string()];

    let summary = run_report(&common::full_source(), &config, &RecordingRenderer::default())
        .await
        .expect("report runs");
    let json = serde_json::to_value(&summary).expect("serialize");

    assert_eq!(json["analyses"][0]["status"], "skipped");
    assert_eq!(json["tables"][0]["status"], "loaded");
}

fn source_with_sales(sales: DataFrame) -> MemoryTableSource {
    common::full_source().with_table(SourceTable::Sales, sales)
}

#[tokio::test]
async fn empty_sales_table_still_reports_every_analysis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = source_with_sales(common::sales().head(Some(0)));

    let summary = run_report(&source, &config(dir.path()), &RecordingRenderer::default())
        .await
        .expect("report runs");

    assert_eq!(summary.analyses.len(), all_analyses().len());
    assert_eq!(summary.count(AnalysisStatus::Skipped), 0);
    let sales = summary
        .tables
        .iter()
        .find(|t| t.table == SourceTable::Sales)
        .expect("sales outcome");
    assert_eq!(sales.rows, Some(0));
}

#[tokio::test]
async fn unparseable_order_dates_still_report_every_analysis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut sales = common::sales().head(Some(2));
    sales
        .with_column(Series::new("Order_Date".into(), &["2024-13-01", "garbage"]))
        .expect("replace dates");

    let summary = run_report(&source_with_sales(sales), &config(dir.path()), &RecordingRenderer::default())
        .await
        .expect("report runs");

    assert_eq!(summary.analyses.len(), all_analyses().len());
    assert_eq!(summary.count(AnalysisStatus::Skipped), 0);
    for code in ["quarter_profit_comparison", "quarter_quantity_comparison", "yearly_top_products_profit"] {
        assert!(summary.analysis(code).is_some(), "{code}");
    }
}

#[tokio::test]
async fn blocked_output_dir_fails_charts_but_not_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocked = dir.path().join("blocked");
    fs::write(&blocked, "").expect("placeholder file");

    let summary = run_report(&common::full_source(), &config(&blocked), &PlottersRenderer::new(640, 480))
        .await
        .expect("report runs");

    assert_eq!(summary.analyses.len(), all_analyses().len());
    assert_eq!(summary.artifacts().count(), 0);
    for outcome in &summary.analyses {
        assert!(outcome.artifacts.iter().all(|a| a.path.is_none() && a.error.is_some()));
        if !outcome.artifacts.is_empty() {
            assert_eq!(outcome.status, AnalysisStatus::Failed, "{}", outcome.code);
        }
    }

    let trends = summary.analysis("monthly_sales_trends").expect("recorded");
    let error = trends.artifacts[0].error.as_deref().expect("chart error");
    assert!(error.starts_with("failed to prepare output location"), "{error}");
    assert!(summary.analyses.iter().filter(|a| !a.artifacts.is_empty()).count() > 1);
}

#[tokio::test]
async fn states_that_sanitize_alike_get_distinct_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stores = df!(
        "StoreKey" => &[1i64, 2, 3],
        "State" => &["New York", "New_York", "Texas"],
        "Country" => &["United States", "United States", "United States"],
        "Square_Meters" => &[100.0f64, 50.0, 0.0],
    )
    .expect("stores");
    let source = common::full_source().with_table(SourceTable::Stores, stores);
    let mut config = config(dir.path());
    config.analysis.only = vec!["state_performance".to_string()];
    let renderer = RecordingRenderer::default();

    let summary = run_report(&source, &config, &renderer).await.expect("report runs");

    let stems = renderer.stems();
    assert!(stems.contains(&"top_5_products_combined_New_York".to_string()), "{stems:?}");
    assert!(stems.contains(&"top_5_products_combined_New_York_2".to_string()), "{stems:?}");
    let paths: Vec<&PathBuf> = summary.artifacts().collect();
    let mut unique = paths.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(paths.len(), unique.len());
}
