//! Configuration errors raised while building a dataset request.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid source '{0}', expected one of ERA5 (1), GCM (2), GSOD (3)")]
    InvalidSource(String),

    #[error("Invalid GCM scenario '{0}', expected SSP245 (1) or SSP585 (2)")]
    InvalidScenario(String),

    #[error("GCM source requires a scenario (SSP245 or SSP585)")]
    MissingScenario,

    #[error("Incorrect data type '{0}'")]
    UnknownVariable(String),

    #[error("Invalid data type '{variable}' for source {source_name}")]
    UnmappedVariable { variable: String, source_name: String },

    #[error("Data type '{0}' requested more than once")]
    DuplicateVariable(String),

    #[error("At least one data type is required")]
    NoVariables,

    #[error("End date {end} is before start date {start}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid date '{0}', expected YYYY-MM-DD or YYYY-MM-DDTHH")]
    InvalidDate(String),

    #[error("Invalid dataset '{0}', expected SOURCE[/SCENARIO][:VARS[:START[:END]]]")]
    InvalidDataset(String),

    #[error("Invalid merge technique '{0}', expected 'saveall' or 'combine'")]
    InvalidTechnique(String),

    #[error("Dataset {0} is not preprocessed")]
    NotPreprocessed(String),

    #[error("Working data needs at least one dataset")]
    EmptyWorkingData,

    #[error("Cannot read config file '{0}'")]
    ReadFile(PathBuf, #[source] std::io::Error),

    #[error("Cannot parse config file '{0}'")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Configuration value out of bounds: {0}")]
    OutOfBounds(&'static str),
}
