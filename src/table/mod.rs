//! The normalized tabular extract every preprocessor produces, and its
//! CSV and _parquet_ encodings.

pub mod csv;
pub mod parquet;

use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

pub const TIME: &str = "time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Ok(OutputFormat::Csv),
            Some("parquet") => Ok(OutputFormat::Parquet),
            _ => Err(anyhow!("Unsupported extract file `{}`", path.display())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One grid node (or station cell) on one day.
pub struct Row {
    pub time: NaiveDate,
    pub latitude: f32,
    pub longitude: f32,
    /// One entry per extract variable, in the extract's column order.
    pub values: Vec<Option<f32>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extract {
    /// Value column names, after `time`, `latitude` and `longitude`.
    pub variables: Vec<String>,
    pub rows: Vec<Row>,
}

impl Extract {
    pub fn new(variables: Vec<String>) -> Self {
        Extract {
            variables,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All column names in file order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![TIME.to_string(), LATITUDE.to_string(), LONGITUDE.to_string()];
        columns.extend(self.variables.iter().cloned());
        columns
    }
}

/// Writes `extract` in the format implied by the file extension.
pub fn write(extract: &Extract, path: &Path) -> Result<()> {
    match OutputFormat::from_path(path)? {
        OutputFormat::Csv => csv::save(extract, path),
        OutputFormat::Parquet => parquet::save(extract, path),
    }
}

/// Reads a whole extract.
pub fn read(path: &Path) -> Result<Extract> {
    match OutputFormat::from_path(path)? {
        OutputFormat::Csv => csv::load(path),
        OutputFormat::Parquet => parquet::load(path),
    }
}

/// Reads only the column names of an extract.
pub fn read_columns(path: &Path) -> Result<Vec<String>> {
    match OutputFormat::from_path(path)? {
        OutputFormat::Csv => csv::columns(path),
        OutputFormat::Parquet => parquet::columns(path),
    }
}

// -- Tests -------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_pick_format_from_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("a/data.csv")).unwrap(),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("data.parquet")).unwrap(),
            OutputFormat::Parquet
        );
        assert!(OutputFormat::from_path(Path::new("data.nc")).is_err());
    }

    #[test]
    fn should_list_columns() {
        let extract = test_support::extract_fixture();

        assert_eq!(extract.columns(), vec!["time", "latitude", "longitude", "tmp"]);
        assert_eq!(extract.len(), 8);
    }
}
