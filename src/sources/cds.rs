//! Minimal client for the Copernicus Climate Data Store retrieve API.

use std::{env, fs, path::Path, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    cli::{create_spinner, create_indeterminate_progress_bar},
    config::CdsSettings,
    download::download_file,
};

const DEFAULT_URL: &str = "https://cds.climate.copernicus.eu/api";

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub url: String,
    pub key: String,
}

/// Finds the API url and key: config first, then `CDSAPI_URL`/`CDSAPI_KEY`,
/// then the `url:`/`key:` lines of `rc_file`.
pub fn resolve_credentials(
    settings: &CdsSettings,
    env: impl Fn(&str) -> Option<String>,
    rc_file: Option<&Path>,
) -> Result<Credentials> {
    let (rc_url, rc_key) = match rc_file {
        Some(path) if path.exists() => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Cannot read `{}`", path.display()))?;
            parse_cdsapirc(&text)
        }
        _ => (None, None),
    };

    let url = settings
        .url
        .clone()
        .or_else(|| env("CDSAPI_URL"))
        .or(rc_url)
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let key = settings
        .key
        .clone()
        .or_else(|| env("CDSAPI_KEY"))
        .or(rc_key)
        .ok_or_else(|| {
            anyhow!("No CDS API key: set [cds] key, CDSAPI_KEY or a ~/.cdsapirc file")
        })?;

    Ok(Credentials {
        url: url.trim_end_matches('/').to_string(),
        key,
    })
}

fn parse_cdsapirc(text: &str) -> (Option<String>, Option<String>) {
    let mut url = None;
    let mut key = None;
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim() {
                "url" => url = Some(value.trim().to_string()),
                "key" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    (url, key)
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

pub struct CdsClient {
    client: reqwest::Client,
    credentials: Credentials,
    poll_interval: Duration,
}

impl CdsClient {
    pub fn from_settings(settings: &CdsSettings) -> Result<Self> {
        let rc_file = dirs::home_dir().map(|home| home.join(".cdsapirc"));
        let credentials =
            resolve_credentials(settings, |name| env::var(name).ok(), rc_file.as_deref())?;

        Ok(CdsClient {
            client: reqwest::Client::new(),
            credentials,
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
        })
    }

    /// Submits `request` for `dataset`, waits for the job and streams the
    /// result to `target`.
    pub async fn retrieve(&self, dataset: &str, request: &Value, target: &Path) -> Result<()> {
        let url = format!(
            "{}/retrieve/v1/processes/{}/execution",
            self.credentials.url, dataset
        );
        debug!("Submitting {} request: {}", dataset, request);
        let mut job: JobStatus = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.credentials.key)
            .json(&json!({ "inputs": request }))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("CDS rejected the {} request", dataset))?
            .json()
            .await?;
        info!("CDS job {} submitted", job.job_id);

        let spinner = create_spinner(format!("Waiting for CDS job {}", job.job_id));
        let job_url = format!("{}/retrieve/v1/jobs/{}", self.credentials.url, job.job_id);
        loop {
            match job.status.as_str() {
                "successful" => break,
                "failed" | "rejected" | "dismissed" => {
                    spinner.finish_and_clear();
                    bail!("CDS job {} {}", job.job_id, job.status);
                }
                status => spinner.set_message(format!("CDS job {} {}", job.job_id, status)),
            }
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_json(&job_url).await?;
        }
        spinner.finish_and_clear();

        let results: JobResults = self.get_json(&format!("{}/results", job_url)).await?;
        let bar = create_indeterminate_progress_bar(format!("Downloading {}", dataset));
        let bytes = download_file(&self.client, &results.asset.value.href, target, &bar).await?;
        bar.finish_with_message(format!("Downloaded {}", dataset));
        info!("Saved {} bytes to `{}`", bytes, target.display());

        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        Ok(self
            .client
            .get(url)
            .header("PRIVATE-TOKEN", &self.credentials.key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

// -- Tests -------------------------------------------------------------------
