//! Record of a finished multi-file download. Written last, so its presence
//! marks the download as complete.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Job;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: String,
    pub variables: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Dataset identifier the file holds, or `*` for archives holding all.
    pub variable: String,
    pub year: i32,
    /// Path relative to the download directory.
    pub path: String,
}

impl Manifest {
    pub fn new(
        source: &str,
        variables: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        files: Vec<ManifestEntry>,
    ) -> Self {
        Manifest {
            source: source.to_string(),
            variables,
            start,
            end,
            files,
            created: Utc::now(),
        }
    }

    pub fn for_job(job: &Job<'_>, files: Vec<ManifestEntry>) -> Self {
        Self::new(
            &job.source.to_string(),
            job.variable_names(),
            job.start,
            job.end,
            files,
        )
    }

    /// Written to `manifest.json.part`, then renamed into place.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let partial = dir.join(format!("{}.part", MANIFEST_FILE));
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&partial, text).with_context(|| format!("Cannot write `{}`", partial.display()))?;
        fs::rename(&partial, &path).with_context(|| format!("Cannot move manifest to `{}`", path.display()))
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text =
            fs::read_to_string(&path).with_context(|| format!("Cannot read `{}`", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Malformed `{}`", path.display()))
    }

    /// Files holding `variable`, in year order.
    pub fn files_for<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a ManifestEntry> {
        let mut entries: Vec<&ManifestEntry> = self
            .files
            .iter()
            .filter(|e| e.variable == variable || e.variable == "*")
            .collect();
        entries.sort_by_key(|e| e.year);
        entries.into_iter()
    }
}

// -- Tests -------------------------------------------------------------------
