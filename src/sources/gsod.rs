//! NOAA Global Surface Summary of the Day station archives.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use futures::future::join_all;
use indicatif::ProgressBar;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::{
    cli::{create_indeterminate_progress_bar, create_progress_bar},
    config::GsodSettings,
    download::{download_file, extract_tar},
    grid::TargetGrid,
    manifest::{Manifest, ManifestEntry},
    registry::Binding,
    stage::{Downloader, Job, Preprocessor},
    table::{self, Extract, Row},
};

const DATE: &str = "DATE";
const LATITUDE: &str = "LATITUDE";
const LONGITUDE: &str = "LONGITUDE";

/// Manifest entries for yearly archives hold every variable.
const ALL_VARIABLES: &str = "*";

pub fn archive_url(settings: &GsodSettings, year: i32) -> String {
    format!("{}/{}.tar.gz", settings.base_url.trim_end_matches('/'), year)
}

/// Value GSOD writes when a field was not observed.
fn sentinel(dataset_id: &str) -> Option<f32> {
    match dataset_id {
        "TEMP" | "DEWP" | "MAX" | "MIN" => Some(9999.9),
        "PRCP" => Some(99.99),
        _ => None,
    }
}

pub struct GsodDownloader {
    settings: GsodSettings,
    client: reqwest::Client,
}

impl GsodDownloader {
    pub fn new(settings: GsodSettings) -> Self {
        GsodDownloader {
            settings,
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_year(&self, year: i32, year_dir: &Path) -> Result<()> {
        let temp_dir = TempDir::new()?;
        let tarball = temp_dir.path().join(format!("{}.tar.gz", year));

        let bar = create_indeterminate_progress_bar(format!("Downloading GSOD {}", year));
        download_file(&self.client, &archive_url(&self.settings, year), &tarball, &bar).await?;
        bar.finish_and_clear();

        // Unpack beside the final directory so it only appears once complete.
        let partial = year_dir.with_extension("partial");
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        let bar = create_indeterminate_progress_bar(format!("Extracting GSOD {}", year));
        let count = extract_tar(&tarball, &partial, &bar)?;
        bar.finish_and_clear();
        if year_dir.exists() {
            fs::remove_dir_all(year_dir)?;
        }
        fs::rename(&partial, year_dir)?;
        info!("Extracted {} station files for {}", count, year);

        Ok(())
    }
}

#[async_trait]
impl Downloader for GsodDownloader {
    async fn download(&self, job: &Job<'_>, destination: &Path) -> Result<()> {
        fs::create_dir_all(destination)?;
        let years: Vec<i32> = (job.start.year()..=job.end.year()).collect();

        let overall = create_progress_bar(years.len() as u64, "Downloading GSOD".to_string());
        let mut entries = Vec::new();
        for year in years {
            let year_dir = destination.join(year.to_string());
            if year_dir.is_dir() && !job.force {
                info!("Keeping `{}`", year_dir.display());
            } else {
                self.fetch_year(year, &year_dir).await?;
            }
            entries.push(ManifestEntry {
                variable: ALL_VARIABLES.to_string(),
                year,
                path: year.to_string(),
            });
            overall.inc(1);
        }
        overall.finish_with_message("Downloaded GSOD");

        Manifest::for_job(job, entries).save(destination)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One station-day, values already in canonical units.
pub struct Observation {
    pub date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    pub values: Vec<Option<f32>>,
}

/// Reads one station CSV, keeping days inside `[start, end]`. Rows without
/// coordinates are dropped; sentinel or unparsable values become missing.
pub fn parse_station_file(
    path: &Path,
    bindings: &[Binding],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Observation>> {
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open `{}`", path.display()))?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("`{}` has no {} column", path.display(), name))
    };

    let date_col = column(DATE)?;
    let lat_col = column(LATITUDE)?;
    let lon_col = column(LONGITUDE)?;
    let value_cols = bindings
        .iter()
        .map(|b| column(b.dataset_id))
        .collect::<Result<Vec<_>>>()?;

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let date = NaiveDate::parse_from_str(field(date_col), "%Y-%m-%d")
            .with_context(|| format!("Bad date `{}` in `{}`", field(date_col), path.display()))?;
        if date < start || date > end {
            continue;
        }
        let (Ok(latitude), Ok(longitude)) = (field(lat_col).parse::<f64>(), field(lon_col).parse::<f64>())
        else {
            continue;
        };

        let values = bindings
            .iter()
            .zip(&value_cols)
            .map(|(binding, &col)| {
                let value = field(col).parse::<f32>().ok()?;
                match sentinel(binding.dataset_id) {
                    Some(missing) if (value - missing).abs() < 1e-3 => None,
                    _ => Some(binding.conversion.apply(value)),
                }
            })
            .collect();

        observations.push(Observation {
            date,
            latitude,
            longitude,
            values,
        });
    }

    Ok(observations)
}

/// Parses every file on its own task. Files that fail are logged and skipped.
pub async fn parse_stations(
    files: Vec<PathBuf>,
    bindings: Arc<Vec<Binding>>,
    start: NaiveDate,
    end: NaiveDate,
    progress_bar: ProgressBar,
) -> Vec<Observation> {
    let tasks: Vec<_> = files
        .into_iter()
        .map(|file| {
            let bindings = Arc::clone(&bindings);
            let pb = progress_bar.clone();
            tokio::spawn(async move {
                let result = parse_station_file(&file, &bindings, start, end);
                pb.inc(1);
                result
            })
        })
        .collect();

    let mut observations = Vec::new();
    for result in join_all(tasks).await {
        match result {
            Ok(Ok(file_observations)) => observations.extend(file_observations),
            Ok(Err(e)) => warn!("Error processing file: {:#}", e),
            Err(e) => warn!("Task join error: {:?}", e),
        }
    }

    observations
}

/// Snaps each observation to the nearest node of the global grid and
/// averages every variable per `(date, node)`, ignoring missing values.
pub fn aggregate(observations: &[Observation], variables: Vec<String>, resolution: f64) -> Extract {
    let target = TargetGrid::global(resolution);
    let width = variables.len();

    let mut cells: BTreeMap<(NaiveDate, usize, usize), Vec<(f64, usize)>> = BTreeMap::new();
    for obs in observations {
        let i = target.nearest_latitude(obs.latitude, resolution);
        let j = target.nearest_longitude(obs.longitude, resolution);
        let sums = cells
            .entry((obs.date, i, j))
            .or_insert_with(|| vec![(0.0, 0); width]);
        for (sum, value) in sums.iter_mut().zip(&obs.values) {
            if let Some(v) = value {
                sum.0 += *v as f64;
                sum.1 += 1;
            }
        }
    }

    let mut extract = Extract::new(variables);
    extract.rows = cells
        .into_iter()
        .map(|((time, i, j), sums)| Row {
            time,
            latitude: target.latitudes[i] as f32,
            longitude: target.longitudes[j] as f32,
            values: sums
                .into_iter()
                .map(|(sum, count)| (count > 0).then(|| (sum / count as f64) as f32))
                .collect(),
        })
        .collect();

    extract
}

fn station_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read `{}`", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

pub struct GsodPreprocessor;

#[async_trait]
impl Preprocessor for GsodPreprocessor {
    async fn preprocess(&self, job: &Job<'_>, source_dir: &Path, output: &Path) -> Result<()> {
        let manifest = Manifest::load(source_dir)?;
        let bindings = Arc::new(job.bindings.to_vec());
        let (start, end) = (job.start.date_naive(), job.end.date_naive());

        let mut observations = Vec::new();
        for entry in manifest.files_for(ALL_VARIABLES) {
            let files = station_files(&source_dir.join(&entry.path))?;
            let pb = create_progress_bar(files.len() as u64, format!("Processing GSOD {}", entry.year));
            observations.extend(parse_stations(files, Arc::clone(&bindings), start, end, pb.clone()).await);
            pb.finish_with_message(format!("Processed GSOD {}", entry.year));
        }
        if observations.is_empty() {
            bail!("No GSOD observations between {} and {}", start, end);
        }

        let extract = aggregate(&observations, job.variable_names(), job.resolution);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        table::write(&extract, output)?;
        info!(
            "Aggregated {} observations into {} rows at `{}`",
            observations.len(),
            extract.len(),
            output.display()
        );

        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
