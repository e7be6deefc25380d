//! ERA5 single-level reanalysis from the Copernicus Climate Data Store.

use std::{fs, path::Path};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use serde_json::{json, Value};
use tracing::info;

use super::{cds::CdsClient, gridded};
use crate::{
    config::CdsSettings,
    grid::netcdf::NetcdfGrid,
    stage::{Downloader, Job, Preprocessor},
    table,
};

pub const DATASET: &str = "reanalysis-era5-single-levels";

/// Single NetCDF file holding every requested variable.
pub const DATA_FILE: &str = "data.nc";

/// ERA5 analyses are available every hour but only 6-hourly steps are fetched.
const STEP_HOURS: usize = 6;

/// Builds the CDS request body. Years always span the range; months and days
/// are narrowed only when the range sits inside one year or month.
pub fn era5_request(job: &Job<'_>) -> Result<Value> {
    let (start, end) = (job.start, job.end);
    if end.time() < start.time() {
        bail!(
            "ERA5 end time {} is earlier in the day than start time {}",
            end.format("%H:%M"),
            start.format("%H:%M")
        );
    }

    let variables: Vec<&str> = job.bindings.iter().map(|b| b.download_id).collect();
    let years: Vec<String> = (start.year()..=end.year()).map(|y| y.to_string()).collect();
    let months: Vec<String> = if start.year() == end.year() {
        (start.month()..=end.month()).map(two_digits).collect()
    } else {
        (1..=12).map(two_digits).collect()
    };
    let days: Vec<String> = if start.year() == end.year() && start.month() == end.month() {
        (start.day()..=end.day()).map(two_digits).collect()
    } else {
        (1..=31).map(two_digits).collect()
    };
    let times: Vec<String> = (start.hour()..=end.hour())
        .step_by(STEP_HOURS)
        .map(|h| format!("{:02}:00", h))
        .collect();

    Ok(json!({
        "product_type": ["reanalysis"],
        "variable": variables,
        "year": years,
        "month": months,
        "day": days,
        "time": times,
        "data_format": "netcdf",
        "download_format": "unarchived",
    }))
}

fn two_digits(n: u32) -> String {
    format!("{:02}", n)
}

pub struct Era5Downloader {
    settings: CdsSettings,
}

impl Era5Downloader {
    pub fn new(settings: CdsSettings) -> Self {
        Era5Downloader { settings }
    }
}

#[async_trait]
impl Downloader for Era5Downloader {
    async fn download(&self, job: &Job<'_>, destination: &Path) -> Result<()> {
        let request = era5_request(job)?;
        let client = CdsClient::from_settings(&self.settings)?;

        fs::create_dir_all(destination)?;
        client
            .retrieve(DATASET, &request, &destination.join(DATA_FILE))
            .await
    }
}

pub struct Era5Preprocessor;

#[async_trait]
impl Preprocessor for Era5Preprocessor {
    async fn preprocess(&self, job: &Job<'_>, source_dir: &Path, output: &Path) -> Result<()> {
        let path = source_dir.join(DATA_FILE);
        let extract = gridded::build_extract(job, |binding| {
            Ok(vec![NetcdfGrid::open(&path, binding.dataset_id)?])
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
