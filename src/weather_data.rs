//! One dataset request and the stages that bring it from nothing to a
//! validated extract.

use std::{fmt, fs};

use tracing::{error, info, warn};

use crate::{
    config::Settings,
    paths::Layout,
    request::DatasetRequest,
    stage::{Job, Stages},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
/// How far a dataset has come. Only ever moves forward.
pub enum Lifecycle {
    #[default]
    Pending,
    Downloaded,
    Preprocessed,
    Validated,
}

impl Lifecycle {
    fn next(self) -> Option<Lifecycle> {
        match self {
            Lifecycle::Pending => Some(Lifecycle::Downloaded),
            Lifecycle::Downloaded => Some(Lifecycle::Preprocessed),
            Lifecycle::Preprocessed => Some(Lifecycle::Validated),
            Lifecycle::Validated => None,
        }
    }

    /// Moves to `to` when it is the next state. Returns false if `to` would
    /// skip a stage; reaching an earlier state is a no-op.
    pub fn advance(&mut self, to: Lifecycle) -> bool {
        if *self >= to {
            return true;
        }
        if self.next() != Some(to) {
            return false;
        }
        *self = to;
        true
    }
}

pub struct WeatherData {
    request: DatasetRequest,
    layout: Layout,
    stages: Stages,
    resolution: f64,
    state: Lifecycle,
}

impl WeatherData {
    pub fn new(request: DatasetRequest, settings: &Settings) -> Self {
        let stages = Stages::for_source(request.source(), settings);
        Self::with_stages(request, settings, stages)
    }

    pub fn with_stages(request: DatasetRequest, settings: &Settings, stages: Stages) -> Self {
        let layout = Layout::resolve(&settings.root, &request, settings.format);

        WeatherData {
            request,
            layout,
            stages,
            resolution: settings.resolution,
            state: Lifecycle::Pending,
        }
    }

    pub fn request(&self) -> &DatasetRequest {
        &self.request
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn downloaded(&self) -> bool {
        self.state >= Lifecycle::Downloaded
    }

    pub fn preprocessed(&self) -> bool {
        self.state >= Lifecycle::Preprocessed
    }

    pub fn validated(&self) -> bool {
        self.state >= Lifecycle::Validated
    }

    fn job(&self) -> Job<'_> {
        Job {
            source: *self.request.source(),
            bindings: self.request.bindings(),
            start: self.request.start(),
            end: self.request.end(),
            resolution: self.resolution,
            force: self.request.force(),
        }
    }

    /// Fetches the raw data unless a finished download is already on disk.
    pub async fn download(&mut self) -> bool {
        let raw_dir = self.layout.raw_dir();
        if let Err(e) = fs::create_dir_all(raw_dir) {
            error!("{}: cannot create `{}`: {}", self, raw_dir.display(), e);
            return false;
        }
        if !self.request.force() && self.layout.raw_marker().exists() {
            info!("{}: already downloaded to `{}`", self, raw_dir.display());
            return self.state.advance(Lifecycle::Downloaded);
        }

        info!("{}: downloading to `{}`", self, raw_dir.display());
        let result = self.stages.downloader.download(&self.job(), raw_dir).await;
        match result {
            Ok(()) => self.state.advance(Lifecycle::Downloaded),
            Err(e) => {
                error!("{}: download failed: {:#}", self, e);
                false
            }
        }
    }

    /// Builds the extract from downloaded data. Refuses to run when no
    /// download is known, in this run or on disk.
    pub async fn preprocess(&mut self) -> bool {
        if !self.downloaded() {
            if !self.layout.raw_marker().exists() {
                error!("{}: cannot preprocess before downloading", self);
                return false;
            }
            self.state.advance(Lifecycle::Downloaded);
        }

        let preprocessed_dir = self.layout.preprocessed_dir();
        if let Err(e) = fs::create_dir_all(preprocessed_dir) {
            error!("{}: cannot create `{}`: {}", self, preprocessed_dir.display(), e);
            return false;
        }
        let extract = self.layout.extract_file();
        if !self.request.force() && extract.exists() {
            info!("{}: already preprocessed to `{}`", self, extract.display());
            return self.state.advance(Lifecycle::Preprocessed);
        }

        info!("{}: preprocessing to `{}`", self, extract.display());
        let result = self
            .stages
            .preprocessor
            .preprocess(&self.job(), self.layout.raw_dir(), &extract)
            .await;
        match result {
            Ok(()) => self.state.advance(Lifecycle::Preprocessed),
            Err(e) => {
                error!("{}: preprocessing failed: {:#}", self, e);
                false
            }
        }
    }

    /// Checks the extract. Runs every time it is called; only a dataset
    /// preprocessed in this run is marked validated.
    pub async fn validate(&mut self) -> bool {
        let extract = self.layout.extract_file();
        let result = self.stages.validator.validate(&self.job(), &extract).await;

        match result {
            Ok(report) if report.passed() => {
                info!("{}: {} rows passed validation", self, report.rows);
                if self.preprocessed() {
                    self.state.advance(Lifecycle::Validated);
                }
                true
            }
            Ok(report) => {
                warn!(
                    "{}: validation failed ({} checks)",
                    self,
                    report.failures().count()
                );
                false
            }
            Err(e) => {
                error!("{}: validation failed: {:#}", self, e);
                false
            }
        }
    }
}

impl fmt::Display for WeatherData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WeatherData source {}, type(s) {}, {}",
            self.request.source(),
            self.request.type_string(),
            self.request.time_string()
        )
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::{
        registry::{Source, Variable},
        request::parse_date,
        stage::{Downloader, Preprocessor, Validator},
        table::{self, test_support::extract_fixture},
        validate::ValidationReport,
    };

    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct Counting {
        pub calls: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl Counting {
        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn call(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("stage failed");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Downloader for Counting {
        async fn download(&self, job: &Job<'_>, destination: &Path) -> Result<()> {
            self.call()?;
            fs::write(destination.join(job.source.raw_marker()), b"")?;
            Ok(())
        }
    }

    #[async_trait]
    impl Preprocessor for Counting {
        async fn preprocess(&self, _job: &Job<'_>, _source_dir: &Path, output: &Path) -> Result<()> {
            self.call()?;
            table::write(&extract_fixture(), output)
        }
    }

    #[async_trait]
    impl Validator for Counting {
        async fn validate(&self, _job: &Job<'_>, _extract: &Path) -> Result<ValidationReport> {
            self.call()?;
            Ok(ValidationReport::default())
        }
    }

    pub(crate) struct Mocks {
        pub downloader: Counting,
        pub preprocessor: Counting,
        pub validator: Counting,
    }

    impl Mocks {
        pub fn new() -> Self {
            Mocks {
                downloader: Counting::default(),
                preprocessor: Counting::default(),
                validator: Counting::default(),
            }
        }

        pub fn stages(&self) -> Stages {
            Stages {
                downloader: Box::new(self.downloader.clone()),
                preprocessor: Box::new(self.preprocessor.clone()),
                validator: Box::new(self.validator.clone()),
            }
        }
    }

    pub(crate) fn era5_request(force: bool) -> DatasetRequest {
        DatasetRequest::new(
            Source::Era5,
            Some(vec![Variable::Tmp]),
            Some(parse_date("2023-04-02", 0).unwrap()),
            Some(parse_date("2023-04-30", 23).unwrap()),
            force,
        )
        .unwrap()
    }

    pub(crate) fn settings(root: &Path) -> Settings {
        Settings {
            root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn should_only_move_forward() {
        let mut state = Lifecycle::Preprocessed;

        assert!(state.advance(Lifecycle::Downloaded));
        assert_eq!(state, Lifecycle::Preprocessed);

        assert!(state.advance(Lifecycle::Validated));
        assert_eq!(state, Lifecycle::Validated);
    }

    #[test]
    fn should_not_skip_stages() {
        let mut state = Lifecycle::Pending;

        assert!(!state.advance(Lifecycle::Preprocessed));
        assert!(!state.advance(Lifecycle::Validated));
        assert_eq!(state, Lifecycle::Pending);
    }

    #[test]
    fn should_display_request() {
        let dir = TempDir::new().unwrap();
        let data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), Mocks::new().stages());

        assert_eq!(
            data.to_string(),
            "WeatherData source ERA5, type(s) tmp, from 2023-04-02 - 2023-04-30"
        );
    }

    #[tokio::test]
    async fn should_download_once_without_force() {
        let dir = TempDir::new().unwrap();
        let mocks = Mocks::new();
        let mut data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());

        assert!(data.download().await);
        assert!(data.download().await);

        assert_eq!(mocks.downloader.count(), 1);
        assert!(data.downloaded());
        assert!(!data.preprocessed());
    }

    #[tokio::test]
    async fn should_download_again_with_force() {
        let dir = TempDir::new().unwrap();
        let mocks = Mocks::new();
        let mut data = WeatherData::with_stages(era5_request(true), &settings(dir.path()), mocks.stages());

        assert!(data.download().await);
        assert!(data.download().await);

        assert_eq!(mocks.downloader.count(), 2);
    }

    #[tokio::test]
    async fn should_report_failed_download() {
        let dir = TempDir::new().unwrap();
        let mut mocks = Mocks::new();
        mocks.downloader.fail = true;
        let mut data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());

        assert!(!data.download().await);
        assert!(!data.downloaded());
        assert!(data.layout().raw_dir().is_dir());
    }

    #[tokio::test]
    async fn should_refuse_to_preprocess_before_download() {
        let dir = TempDir::new().unwrap();
        let mocks = Mocks::new();
        let mut data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());

        assert!(!data.preprocess().await);

        assert_eq!(mocks.preprocessor.count(), 0);
        assert!(!data.preprocessed());
    }

    #[tokio::test]
    async fn should_infer_download_from_marker_on_disk() {
        let dir = TempDir::new().unwrap();
        let mocks = Mocks::new();
        let mut first = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());
        assert!(first.download().await);

        let mut second = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());
        assert!(second.preprocess().await);

        assert!(second.downloaded());
        assert!(second.preprocessed());
        assert_eq!(mocks.downloader.count(), 1);
        assert_eq!(mocks.preprocessor.count(), 1);
    }

    #[tokio::test]
    async fn should_run_full_lifecycle_and_validate_every_time() {
        let dir = TempDir::new().unwrap();
        let mocks = Mocks::new();
        let mut data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());

        assert!(data.download().await);
        assert!(data.preprocess().await);
        assert!(data.preprocess().await);
        assert!(data.validate().await);
        assert!(data.validate().await);

        assert_eq!(mocks.preprocessor.count(), 1);
        assert_eq!(mocks.validator.count(), 2);
        assert_eq!(data.state(), Lifecycle::Validated);
        assert!(data.layout().extract_file().exists());
    }

    #[tokio::test]
    async fn should_validate_without_marking_earlier_stages() {
        let dir = TempDir::new().unwrap();
        let mocks = Mocks::new();
        let mut data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());

        assert!(data.validate().await);

        assert_eq!(mocks.validator.count(), 1);
        assert_eq!(mocks.downloader.count(), 0);
        assert_eq!(mocks.preprocessor.count(), 0);
        assert_eq!(data.state(), Lifecycle::Pending);
        assert!(!data.downloaded());
        assert!(!data.preprocessed());
        assert!(!data.validated());
        assert!(!data.layout().raw_marker().exists());
    }

    #[tokio::test]
    async fn should_not_mark_failed_validation() {
        let dir = TempDir::new().unwrap();
        let mut mocks = Mocks::new();
        mocks.validator.fail = true;
        let mut data = WeatherData::with_stages(era5_request(false), &settings(dir.path()), mocks.stages());

        assert!(data.download().await);
        assert!(data.preprocess().await);
        assert!(!data.validate().await);

        assert!(data.preprocessed());
        assert!(!data.validated());
    }
}
