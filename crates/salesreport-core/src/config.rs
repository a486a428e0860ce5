use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Complete configuration for one report run.
///
/// Loaded from an optional TOML file; every section falls back to its defaults, and the
/// database URL can come from the environment instead of the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub output: OutputConfig,
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Prepended to each logical table name, e.g. `proj_` + `sales`.
    pub table_prefix: String,
    /// When set, tables are read from `<csv_dir>/<table>.csv` instead of the database.
    pub csv_dir: Option<PathBuf>,
    pub query_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            table_prefix: "proj_".to_string(),
            csv_dir: None,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub print_tables: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("visualizations"),
            width: 1400,
            height: 800,
            print_tables: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Year customer ages are computed against. Defaults to the current year.
    pub reference_year: Option<i32>,
    /// Inclusive year window for the Q1/Q4 quantity comparison.
    pub quarter_window: (i32, i32),
    /// Restrict the run to these analysis codes; empty means all.
    pub only: Vec<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            reference_year: None,
            quarter_window: (2016, 2021),
            only: Vec::new(),
        }
    }
}

impl AnalysisSettings {
    pub fn reference_year(&self) -> i32 {
        self.reference_year.unwrap_or_else(|| Utc::now().year())
    }

    pub fn is_selected(&self, code: &str) -> bool {
        self.only.is_empty() || self.only.iter().any(|selected| selected == code)
    }
}

impl ReportConfig {
    /// Reads `path` when given (defaults otherwise) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL").or_else(|_| env::var("SALESREPORT_DATABASE_URL")) {
            self.database.url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ReportConfig::from_toml_str("").unwrap();
        assert_eq!(config.source.table_prefix, "proj_");
        assert_eq!(config.output.dir, PathBuf::from("visualizations"));
        assert_eq!(config.analysis.quarter_window, (2016, 2021));
        assert!(config.output.print_tables);
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = ReportConfig::from_toml_str(
            r#"
                [source]
                table_prefix = "dbo_"
                query_timeout_secs = 5

                [output]
                dir = "out"

                [analysis]
                reference_year = 2024
                only = ["monthly_sales_trends"]
            "#,
        )
        .unwrap();

        assert_eq!(config.source.table_prefix, "dbo_");
        assert_eq!(config.source.query_timeout_secs, 5);
        assert_eq!(config.output.dir, PathBuf::from("out"));
        assert_eq!(config.output.width, 1400);
        assert_eq!(config.analysis.reference_year(), 2024);
        assert!(config.analysis.is_selected("monthly_sales_trends"));
        assert!(!config.analysis.is_selected("market_basket"));
    }
}
