//! Deterministic on-disk layout of downloads and extracts.
//!
//! Paths depend only on the request's source, variables and date range so a
//! later run finds what an earlier one produced.

use std::path::{Path, PathBuf};

use crate::{request::DatasetRequest, table::OutputFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    raw_dir: PathBuf,
    preprocessed_dir: PathBuf,
    raw_marker: &'static str,
    extract_name: String,
}

impl Layout {
    pub fn resolve(root: &Path, request: &DatasetRequest, format: OutputFormat) -> Self {
        let relative = PathBuf::from(request.source().path_segment())
            .join(request.type_string())
            .join(request.time_string());

        Layout {
            raw_dir: root.join("downloads").join(&relative),
            preprocessed_dir: root.join("preprocessed").join(&relative),
            raw_marker: request.source().raw_marker(),
            extract_name: format!("data.{}", format.extension()),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn preprocessed_dir(&self) -> &Path {
        &self.preprocessed_dir
    }

    /// File that marks a finished download.
    pub fn raw_marker(&self) -> PathBuf {
        self.raw_dir.join(self.raw_marker)
    }

    /// The preprocessed extract, which doubles as its completion marker.
    pub fn extract_file(&self) -> PathBuf {
        self.preprocessed_dir.join(&self.extract_name)
    }
}

/// Folder that merged working data for `name` is written to.
pub fn working_dir(root: &Path, name: &str) -> PathBuf {
    root.join("working").join(name)
}

/// The merged extract of working data `name`.
pub fn working_file(root: &Path, name: &str, format: OutputFormat) -> PathBuf {
    working_dir(root, name).join(format!("data.{}", format.extension()))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{
        registry::{Scenario, Source, Variable},
        request::parse_date,
    };

    use super::*;

    fn era5_april() -> DatasetRequest {
        DatasetRequest::new(
            Source::Era5,
            Some(vec![Variable::Tmp]),
            Some(parse_date("2023-04-02", 0).unwrap()),
            Some(parse_date("2023-04-30", 0).unwrap()),
            false,
        )
        .unwrap()
    }

    #[test]
    fn should_resolve_era5_layout() {
        let layout = Layout::resolve(Path::new("."), &era5_april(), OutputFormat::Csv);

        assert_eq!(
            layout.raw_dir(),
            Path::new("./downloads/1/tmp/from 2023-04-02 - 2023-04-30/")
        );
        assert_eq!(
            layout.preprocessed_dir(),
            Path::new("./preprocessed/1/tmp/from 2023-04-02 - 2023-04-30/")
        );
        assert_eq!(
            layout.raw_marker(),
            PathBuf::from("./downloads/1/tmp/from 2023-04-02 - 2023-04-30/data.nc")
        );
        assert_eq!(
            layout.extract_file(),
            PathBuf::from("./preprocessed/1/tmp/from 2023-04-02 - 2023-04-30/data.csv")
        );
    }

    #[test]
    fn should_be_stable_across_construction() {
        let a = Layout::resolve(Path::new("."), &era5_april(), OutputFormat::Csv);
        let b = Layout::resolve(Path::new("."), &era5_april(), OutputFormat::Csv);

        assert_eq!(a, b);
    }

    #[test]
    fn should_separate_gcm_scenarios() {
        let ssp245 = DatasetRequest::new(Source::Gcm(Scenario::Ssp245), None, None, None, false)
            .unwrap();
        let ssp585 = DatasetRequest::new(Source::Gcm(Scenario::Ssp585), None, None, None, false)
            .unwrap();

        let a = Layout::resolve(Path::new("."), &ssp245, OutputFormat::Parquet);
        let b = Layout::resolve(Path::new("."), &ssp585, OutputFormat::Parquet);

        assert_ne!(a.raw_dir(), b.raw_dir());
        assert_eq!(
            a.raw_marker(),
            PathBuf::from("./downloads/2-ssp245/tmp/from 1979-01-01 - 2100-01-01/manifest.json")
        );
        assert!(a.extract_file().ends_with("data.parquet"));
    }

    #[test]
    fn should_place_working_file_under_root() {
        let file = working_file(Path::new("/data"), "study", OutputFormat::Parquet);

        assert_eq!(file, PathBuf::from("/data/working/study/data.parquet"));
    }
}
