pub mod acquisition;
pub mod aggregation;
pub mod analyses;
pub mod calendar;
pub mod charts;
pub mod config;
pub mod console;
pub mod db;
pub mod enrichment;
pub mod frame;
pub mod report;
pub mod tables;

pub use acquisition::{AcquisitionError, CsvTableSource, MemoryTableSource, PgTableSource, TableSource};
pub use config::ReportConfig;
pub use report::{run_report, ReportSummary};
