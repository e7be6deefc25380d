use std::fmt;

use anyhow::{bail, Result};

use crate::{config::Settings, request::DatasetSpec, weather_data::WeatherData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Download,
    Preprocess,
    Validate,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Download, Step::Preprocess, Step::Validate];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Download => f.write_str("download"),
            Step::Preprocess => f.write_str("preprocess"),
            Step::Validate => f.write_str("validate"),
        }
    }
}

/// Builds the datasets named on the command line.
pub fn build(specs: &[DatasetSpec], force: bool, settings: &Settings) -> Result<Vec<WeatherData>> {
    specs
        .iter()
        .map(|spec| -> Result<WeatherData> {
            let request = spec.clone().into_request(force)?;
            Ok(WeatherData::new(request, settings))
        })
        .collect()
}

/// Runs `steps` in order on every dataset. A dataset stops at its first
/// failed step; the others carry on.
pub async fn run_steps(
    specs: &[DatasetSpec],
    force: bool,
    steps: &[Step],
    settings: &Settings,
) -> Result<String> {
    let mut report = Vec::new();
    let mut failed = 0;

    for mut data in build(specs, force, settings)? {
        let mut outcome = "ok".to_string();
        for step in steps {
            let passed = match step {
                Step::Download => data.download().await,
                Step::Preprocess => data.preprocess().await,
                Step::Validate => data.validate().await,
            };
            if !passed {
                outcome = format!("{} failed", step);
                failed += 1;
                break;
            }
        }
        report.push(format!("{}: {}", data, outcome));
    }

    if failed > 0 {
        bail!("{} of {} dataset(s) failed\n{}", failed, report.len(), report.join("\n"));
    }

    Ok(report.join("\n"))
}

/// Where each dataset's raw data and extract live.
pub fn paths(specs: &[DatasetSpec], settings: &Settings) -> Result<String> {
    let lines = build(specs, false, settings)?
        .iter()
        .map(|data| {
            format!(
                "{}\n  raw:     {}\n  extract: {}",
                data,
                data.layout().raw_dir().display(),
                data.layout().extract_file().display()
            )
        })
        .collect::<Vec<_>>();

    Ok(lines.join("\n"))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;

    fn specs(texts: &[&str]) -> Vec<DatasetSpec> {
        texts.iter().map(|t| t.parse().unwrap()).collect()
    }

    #[test]
    fn should_list_paths() {
        let settings = Settings {
            root: Path::new("/data").to_path_buf(),
            ..Default::default()
        };

        let text = paths(&specs(&["era5:tmp:2023-04-02:2023-04-30"]), &settings).unwrap();

        assert!(text.starts_with("WeatherData source ERA5, type(s) tmp"));
        assert!(text.contains("/data/downloads/1/tmp/from 2023-04-02 - 2023-04-30"));
        assert!(text.contains("/data/preprocessed/1/tmp/from 2023-04-02 - 2023-04-30/data.csv"));
    }

    #[test]
    fn should_reject_unmapped_variables() {
        let result = build(&specs(&["era5:precip"]), false, &Settings::default());

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn should_report_datasets_that_fail() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = run_steps(&specs(&["gsod:tmp:2023-04-01:2023-04-30"]), false, &[Step::Preprocess], &settings).await;

        let message = result.unwrap_err().to_string();
        assert!(message.contains("1 of 1 dataset(s) failed"));
        assert!(message.contains("preprocess failed"));
    }
}
