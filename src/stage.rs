//! The three stages a dataset goes through, as traits so each source plugs
//! in its own implementation.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::Settings,
    registry::{Binding, Source},
    sources::{era5, gcm, gsod},
    validate::{ExtractValidator, ValidationReport},
};

#[derive(Debug, Clone, Copy)]
/// Everything a stage needs to know about the request it serves.
pub struct Job<'a> {
    pub source: Source,
    pub bindings: &'a [Binding],
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Target grid spacing in degrees.
    pub resolution: f64,
    /// Replace raw files already on disk instead of keeping them.
    pub force: bool,
}

impl Job<'_> {
    /// Logical variable names, which become the extract's value columns.
    pub fn variable_names(&self) -> Vec<String> {
        self.bindings
            .iter()
            .map(|b| b.variable.name().to_string())
            .collect()
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches raw data into `destination`, writing the source's completion
    /// marker last.
    async fn download(&self, job: &Job<'_>, destination: &Path) -> Result<()>;
}

#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Turns the raw data in `source_dir` into an extract at `output`.
    async fn preprocess(&self, job: &Job<'_>, source_dir: &Path, output: &Path) -> Result<()>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, job: &Job<'_>, extract: &Path) -> Result<ValidationReport>;
}

/// The stage implementations for one source.
pub struct Stages {
    pub downloader: Box<dyn Downloader>,
    pub preprocessor: Box<dyn Preprocessor>,
    pub validator: Box<dyn Validator>,
}

impl Stages {
    pub fn for_source(source: &Source, settings: &Settings) -> Self {
        let (downloader, preprocessor): (Box<dyn Downloader>, Box<dyn Preprocessor>) = match source {
            Source::Era5 => (
                Box::new(era5::Era5Downloader::new(settings.cds.clone())),
                Box::new(era5::Era5Preprocessor),
            ),
            Source::Gcm(_) => (
                Box::new(gcm::GcmDownloader::new(settings.gcm.clone())),
                Box::new(gcm::GcmPreprocessor),
            ),
            Source::Gsod => (
                Box::new(gsod::GsodDownloader::new(settings.gsod.clone())),
                Box::new(gsod::GsodPreprocessor),
            ),
        };
        let validator = if source.is_gridded() {
            ExtractValidator::gridded()
        } else {
            ExtractValidator::stations()
        };

        Stages {
            downloader,
            preprocessor,
            validator: Box::new(validator),
        }
    }
}
