//! Daily CMIP6 projections from the NEX-GDDP-CMIP6 archive.

use std::{fs, path::Path};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Datelike;
use tracing::info;

use super::gridded;
use crate::{
    cli::{create_indeterminate_progress_bar, create_progress_bar},
    config::GcmSettings,
    download::download_file,
    grid::netcdf::NetcdfGrid,
    manifest::{Manifest, ManifestEntry},
    registry::{Scenario, Source},
    stage::{Downloader, Job, Preprocessor},
    table,
};

/// First year covered by the scenario runs; earlier years are `historical`.
pub const FIRST_PROJECTION_YEAR: i32 = 2015;

pub fn experiment(scenario: Scenario, year: i32) -> &'static str {
    if year < FIRST_PROJECTION_YEAR {
        "historical"
    } else {
        scenario.experiment()
    }
}

/// File name of one variable-year, e.g.
/// `tas_day_ACCESS-CM2_ssp245_r1i1p1f1_gn_2050.nc`.
pub fn gcm_file_name(settings: &GcmSettings, scenario: Scenario, variable: &str, year: i32) -> String {
    format!(
        "{var}_day_{model}_{experiment}_{member}_{grid}_{year}.nc",
        var = variable,
        model = settings.model,
        experiment = experiment(scenario, year),
        member = settings.member,
        grid = settings.grid,
        year = year
    )
}

pub fn gcm_file_url(settings: &GcmSettings, scenario: Scenario, variable: &str, year: i32) -> String {
    format!(
        "{base}/{model}/{experiment}/{member}/{var}/{file}",
        base = settings.base_url.trim_end_matches('/'),
        model = settings.model,
        experiment = experiment(scenario, year),
        member = settings.member,
        var = variable,
        file = gcm_file_name(settings, scenario, variable, year)
    )
}

pub struct GcmDownloader {
    settings: GcmSettings,
    client: reqwest::Client,
}

impl GcmDownloader {
    pub fn new(settings: GcmSettings) -> Self {
        GcmDownloader {
            settings,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Downloader for GcmDownloader {
    async fn download(&self, job: &Job<'_>, destination: &Path) -> Result<()> {
        let scenario = match job.source {
            Source::Gcm(scenario) => scenario,
            other => return Err(anyhow!("GCM downloader cannot serve {}", other)),
        };
        let years: Vec<i32> = (job.start.year()..=job.end.year()).collect();

        let overall = create_progress_bar(
            (years.len() * job.bindings.len()) as u64,
            format!("Downloading GCM {}", scenario),
        );
        let mut entries = Vec::new();
        for binding in job.bindings {
            let dir = destination.join(binding.download_id);
            fs::create_dir_all(&dir)?;

            for &year in &years {
                let name = gcm_file_name(&self.settings, scenario, binding.download_id, year);
                let path = dir.join(&name);
                if path.exists() && !job.force {
                    info!("Keeping `{}`", path.display());
                } else {
                    let url = gcm_file_url(&self.settings, scenario, binding.download_id, year);
                    let bar = create_indeterminate_progress_bar(name.clone());
                    download_file(&self.client, &url, &path, &bar).await?;
                    bar.finish_and_clear();
                }
                entries.push(ManifestEntry {
                    variable: binding.dataset_id.to_string(),
                    year,
                    path: format!("{}/{}", binding.download_id, name),
                });
                overall.inc(1);
            }
        }
        overall.finish_with_message(format!("Downloaded GCM {}", scenario));

        Manifest::for_job(job, entries).save(destination)
    }
}

pub struct GcmPreprocessor;

#[async_trait]
impl Preprocessor for GcmPreprocessor {
    async fn preprocess(&self, job: &Job<'_>, source_dir: &Path, output: &Path) -> Result<()> {
        let manifest = Manifest::load(source_dir)?;

        let extract = gridded::build_extract(job, |binding| {
            let files = manifest
                .files_for(binding.dataset_id)
                .map(|entry| NetcdfGrid::open(&source_dir.join(&entry.path), binding.dataset_id))
                .collect::<Result<Vec<_>>>()?;
            if files.is_empty() {
                bail!("No `{}` files in the manifest", binding.dataset_id);
            }
            Ok(files)
        })?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        table::write(&extract, output)?;
        info!("Wrote {} rows to `{}`", extract.len(), output.display());

        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
