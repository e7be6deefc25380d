//! Merging preprocessed extracts into one working dataset.

use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::PathBuf,
    str::FromStr,
};

use anyhow::{bail, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::{
    config::Settings,
    error::ConfigError,
    paths::working_file,
    table::{self, Extract, Row},
    validate::{check_extract, Expectation},
    weather_data::WeatherData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    /// Concatenate all rows; absent variables are missing.
    SaveAll,
    /// One row per `(time, latitude, longitude)`, averaging each variable.
    Combine,
}

impl FromStr for Technique {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "saveall" | "save_all" | "save-all" => Ok(Technique::SaveAll),
            "combine" => Ok(Technique::Combine),
            other => Err(ConfigError::InvalidTechnique(other.to_string())),
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Technique::SaveAll => f.write_str("saveall"),
            Technique::Combine => f.write_str("combine"),
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    label: String,
    extract: PathBuf,
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct WorkingData {
    name: String,
    members: Vec<Member>,
    output: PathBuf,
    resolution: f64,
}

impl WorkingData {
    /// Fails unless every dataset has been preprocessed.
    pub fn new(name: &str, datasets: &[&WeatherData], settings: &Settings) -> Result<Self, ConfigError> {
        if datasets.is_empty() {
            return Err(ConfigError::EmptyWorkingData);
        }

        let members = datasets
            .iter()
            .map(|data| {
                if !data.preprocessed() {
                    return Err(ConfigError::NotPreprocessed(data.to_string()));
                }
                Ok(Member {
                    label: data.to_string(),
                    extract: data.layout().extract_file(),
                    start: data.request().start().date_naive(),
                    end: data.request().end().date_naive(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WorkingData {
            name: name.to_string(),
            members,
            output: working_file(&settings.root, name, settings.format),
            resolution: settings.resolution,
        })
    }

    /// Merges the members, checks the result and writes it to the working
    /// folder. Returns the written file.
    pub fn merge(&self, technique: Technique) -> Result<PathBuf> {
        let mut extracts = Vec::with_capacity(self.members.len());
        for member in &self.members {
            info!("Loading {}", member.label);
            extracts.push(table::read(&member.extract)?);
        }

        let merged = match (extracts.len(), technique) {
            (1, _) => extracts.remove(0),
            (_, Technique::SaveAll) => save_all(&extracts),
            (_, Technique::Combine) => combine(&extracts),
        };

        let expect = Expectation {
            variables: merged.variables.clone(),
            start: self.members.iter().map(|m| m.start).min().unwrap_or(NaiveDate::MIN),
            end: self.members.iter().map(|m| m.end).max().unwrap_or(NaiveDate::MAX),
            resolution: self.resolution,
            gridded: false,
            unique: technique == Technique::Combine || self.members.len() == 1,
        };
        let report = check_extract(&merged, &expect, Default::default());
        if !report.passed() {
            for failure in report.failures() {
                warn!("{}", failure);
            }
            bail!("Merged working data `{}` failed validation", self.name);
        }

        if let Some(dir) = self.output.parent() {
            fs::create_dir_all(dir)?;
        }
        table::write(&merged, &self.output)?;
        info!(
            "Merged {} dataset(s) with {} into {} rows",
            self.members.len(),
            technique,
            merged.len()
        );

        Ok(self.output.clone())
    }
}

/// Variable names in order of first appearance.
fn union_of_variables(extracts: &[Extract]) -> Vec<String> {
    let mut variables: Vec<String> = Vec::new();
    for name in extracts.iter().flat_map(|e| &e.variables) {
        if !variables.contains(name) {
            variables.push(name.clone());
        }
    }
    variables
}

/// For each extract, the merged column each of its variables lands in.
fn column_maps(extracts: &[Extract], variables: &[String]) -> Vec<Vec<usize>> {
    extracts
        .iter()
        .map(|e| {
            e.variables
                .iter()
                .filter_map(|v| variables.iter().position(|u| u == v))
                .collect()
        })
        .collect()
}

fn save_all(extracts: &[Extract]) -> Extract {
    let variables = union_of_variables(extracts);
    let maps = column_maps(extracts, &variables);

    let mut merged = Extract::new(variables);
    for (extract, map) in extracts.iter().zip(&maps) {
        for row in &extract.rows {
            let mut values = vec![None; merged.variables.len()];
            for (value, &column) in row.values.iter().zip(map) {
                values[column] = *value;
            }
            merged.rows.push(Row {
                values,
                ..row.clone()
            });
        }
    }

    merged
}

fn combine(extracts: &[Extract]) -> Extract {
    let variables = union_of_variables(extracts);
    let maps = column_maps(extracts, &variables);
    let width = variables.len();

    type Key = (NaiveDate, i64, i64);
    let key = |c: f32| (c as f64 * 10_000.0).round() as i64;
    let mut cells: BTreeMap<Key, (f32, f32, Vec<(f64, usize)>)> = BTreeMap::new();

    for (extract, map) in extracts.iter().zip(&maps) {
        for row in &extract.rows {
            let (_, _, sums) = cells
                .entry((row.time, key(row.latitude), key(row.longitude)))
                .or_insert_with(|| (row.latitude, row.longitude, vec![(0.0, 0); width]));
            for (value, &column) in row.values.iter().zip(map) {
                if let Some(v) = value {
                    sums[column].0 += *v as f64;
                    sums[column].1 += 1;
                }
            }
        }
    }

    let mut merged = Extract::new(variables);
    merged.rows = cells
        .into_iter()
        .map(|((time, _, _), (latitude, longitude, sums))| Row {
            time,
            latitude,
            longitude,
            values: sums
                .into_iter()
                .map(|(sum, count)| (count > 0).then(|| (sum / count as f64) as f32))
                .collect(),
        })
        .collect();

    merged
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::{
        registry::{Source, Variable},
        request::{parse_date, DatasetRequest},
        table::test_support::extract_fixture,
        weather_data::tests::{era5_request, settings, Mocks},
    };

    use super::*;

    fn gsod_request() -> DatasetRequest {
        DatasetRequest::new(
            Source::Gsod,
            Some(vec![Variable::Tmp]),
            Some(parse_date("2023-04-01", 0).unwrap()),
            Some(parse_date("2023-04-30", 23).unwrap()),
            false,
        )
        .unwrap()
    }

    async fn preprocessed(request: DatasetRequest, settings: &Settings) -> WeatherData {
        let mut data = WeatherData::with_stages(request, settings, Mocks::new().stages());
        assert!(data.download().await);
        assert!(data.preprocess().await);
        data
    }

    /// Rewrites the member's extract with the fixture's values under `precip`.
    fn as_precip(data: &WeatherData) {
        let mut extract = extract_fixture();
        extract.variables = vec!["precip".to_string()];
        table::write(&extract, &data.layout().extract_file()).unwrap();
    }

    #[test]
    fn should_parse_techniques() {
        assert_eq!("saveall".parse::<Technique>().unwrap(), Technique::SaveAll);
        assert_eq!("Combine".parse::<Technique>().unwrap(), Technique::Combine);
        assert!(matches!(
            "average".parse::<Technique>(),
            Err(ConfigError::InvalidTechnique(_))
        ));
    }

    #[test]
    fn should_require_datasets() {
        let dir = TempDir::new().unwrap();

        let result = WorkingData::new("empty", &[], &settings(dir.path()));

        assert!(matches!(result, Err(ConfigError::EmptyWorkingData)));
    }

    #[test]
    fn should_require_preprocessed_datasets() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let data = WeatherData::with_stages(era5_request(false), &settings, Mocks::new().stages());

        let result = WorkingData::new("raw", &[&data], &settings);

        assert!(matches!(result, Err(ConfigError::NotPreprocessed(_))));
    }

    #[tokio::test]
    async fn should_reject_dataset_that_was_only_validated() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let mut data = WeatherData::with_stages(era5_request(false), &settings, Mocks::new().stages());
        assert!(data.validate().await);

        let result = WorkingData::new("validated", &[&data], &settings);

        assert!(matches!(result, Err(ConfigError::NotPreprocessed(_))));
    }

    #[tokio::test]
    async fn should_rewrite_single_member() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let data = preprocessed(gsod_request(), &settings).await;

        let working = WorkingData::new("single", &[&data], &settings).unwrap();
        let output = working.merge(Technique::Combine).unwrap();

        assert_eq!(output, dir.path().join("working").join("single").join("data.csv"));
        assert_eq!(table::read(&output).unwrap(), extract_fixture());
    }

    #[tokio::test]
    async fn should_save_all_rows_over_union_of_variables() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let era5 = preprocessed(era5_request(false), &settings).await;
        let gsod = preprocessed(gsod_request(), &settings).await;
        as_precip(&gsod);

        let working = WorkingData::new("all", &[&era5, &gsod], &settings).unwrap();
        let merged = table::read(&working.merge(Technique::SaveAll).unwrap()).unwrap();

        assert_eq!(merged.variables, vec!["tmp", "precip"]);
        assert_eq!(merged.len(), 16);
        assert_eq!(merged.rows[0].values, vec![Some(10.0), None]);
        assert_eq!(merged.rows[8].values, vec![None, Some(10.0)]);
    }

    #[tokio::test]
    async fn should_combine_matching_cells() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let era5 = preprocessed(era5_request(false), &settings).await;
        let gsod = preprocessed(gsod_request(), &settings).await;
        let mut shifted = extract_fixture();
        for row in &mut shifted.rows {
            row.values = row.values.iter().map(|v| v.map(|v| v + 2.0)).collect();
        }
        table::write(&shifted, &gsod.layout().extract_file()).unwrap();

        let working = WorkingData::new("combined", &[&era5, &gsod], &settings).unwrap();
        let merged = table::read(&working.merge(Technique::Combine).unwrap()).unwrap();

        assert_eq!(merged.variables, vec!["tmp"]);
        assert_eq!(merged.len(), 8);
        assert_eq!(merged.rows[0].values, vec![Some(11.0)]);
        assert_eq!(merged.rows[7].values, vec![None]);
    }

    #[tokio::test]
    async fn should_combine_different_variables_side_by_side() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let era5 = preprocessed(era5_request(false), &settings).await;
        let gsod = preprocessed(gsod_request(), &settings).await;
        as_precip(&gsod);

        let working = WorkingData::new("both", &[&era5, &gsod], &settings).unwrap();
        let merged = table::read(&working.merge(Technique::Combine).unwrap()).unwrap();

        assert_eq!(merged.len(), 8);
        assert_eq!(merged.rows[0].values, vec![Some(10.0), Some(10.0)]);
    }
}
