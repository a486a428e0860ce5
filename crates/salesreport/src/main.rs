use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use salesreport_core::{
    analyses::all_analyses,
    charts::PlottersRenderer,
    db,
    report::{run_report, AnalysisStatus},
    CsvTableSource, PgTableSource, ReportConfig, TableSource,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sales analytics report generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire the source tables, run the analyses and write the charts
    Run(RunArgs),
    /// List the available analyses
    List,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory the chart images are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Read `<prefix><table>.csv` files from this directory instead of the database
    #[arg(long)]
    csv_dir: Option<PathBuf>,
    /// Only run these analysis codes (repeatable)
    #[arg(long = "only", value_name = "CODE")]
    only: Vec<String>,
    /// Write a JSON run summary to this path
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Do not print console tables
    #[arg(long)]
    no_tables: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => handle_run(args).await,
        Command::List => handle_list(),
    }
}

async fn handle_run(args: RunArgs) -> Result<()> {
    dotenvy::dotenv().ok();

    let mut config = ReportConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    if let Some(dir) = args.csv_dir {
        config.source.csv_dir = Some(dir);
    }
    if !args.only.is_empty() {
        config.analysis.only = args.only;
    }
    if args.no_tables {
        config.output.print_tables = false;
    }

    let source: Box<dyn TableSource> = match &config.source.csv_dir {
        Some(dir) => Box::new(CsvTableSource::new(dir, config.source.table_prefix.clone())),
        None => {
            let pool = db::connect(&config.database).await?;
            Box::new(PgTableSource::new(pool, config.source.table_prefix.clone()))
        }
    };

    let renderer = PlottersRenderer::new(config.output.width, config.output.height);
    let summary = run_report(source.as_ref(), &config, &renderer).await?;

    if let Some(path) = args.summary {
        let json = serde_json::to_string_pretty(&summary).context("failed to serialize run summary")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote run summary");
    }

    let failed = summary.count(AnalysisStatus::Failed);
    if failed > 0 {
        warn!(failed, "Some analyses did not complete");
    }

    Ok(())
}

fn handle_list() -> Result<()> {
    for analysis in all_analyses() {
        let tables = analysis
            .required_tables()
            .iter()
            .map(|table| table.name())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{:<40} {} [{}]", analysis.code(), analysis.description(), tables);
    }
    Ok(())
}
