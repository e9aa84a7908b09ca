use std::io;

use thiserror::Error;
use time::Date;

/// Failures that stop an analysis run or a CLI command.
///
/// Field-level parse misses and unclassifiable products are not errors: the
/// extractor falls back to defaults and reports them as diagnostics instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("end date {end} is before start date {start}")]
    InvalidRange { start: Date, end: Date },
    #[error("no chat export found at '{0}'")]
    MissingExport(String),
    #[error("could not write '{0}' to storage")]
    StorageWrite(String),
    #[error("unrecognised date '{0}', expected DD/MM/YYYY or YYYY-MM-DD")]
    BadDateArg(String),
    #[error("config key '{0}' has an unexpected type")]
    BadConfigShape(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("config edit error: {0}")]
    ConfigEdit(#[from] toml_edit::TomlError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
