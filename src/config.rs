//! Optional TOML configuration. Every key has a default, so running without
//! a config file is the common case.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{error::ConfigError, table::OutputFormat};

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "wxingest.toml";

/// Grid spacing, in degrees, that preprocessing interpolates to.
pub const DEFAULT_RESOLUTION: f64 = 1.25;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory holding `downloads/`, `preprocessed/` and `working/`.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Interpolation resolution in degrees.
    #[serde(default = "default_resolution")]
    pub resolution: f64,

    /// Format of preprocessed and merged extracts.
    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub cds: CdsSettings,

    #[serde(default)]
    pub gcm: GcmSettings,

    #[serde(default)]
    pub gsod: GsodSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// Copernicus Climate Data Store access. Unset credentials fall back to
/// `CDSAPI_URL`/`CDSAPI_KEY` and then `~/.cdsapirc`.
pub struct CdsSettings {
    pub url: Option<String>,
    pub key: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// NEX-GDDP-CMIP6 mirror and the model run to fetch.
pub struct GcmSettings {
    #[serde(default = "default_gcm_base_url")]
    pub base_url: String,
    #[serde(default = "default_gcm_model")]
    pub model: String,
    #[serde(default = "default_gcm_member")]
    pub member: String,
    #[serde(default = "default_gcm_grid")]
    pub grid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GsodSettings {
    #[serde(default = "default_gsod_base_url")]
    pub base_url: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_resolution() -> f64 {
    DEFAULT_RESOLUTION
}
fn default_poll_interval() -> u64 {
    5
}
fn default_gcm_base_url() -> String {
    "https://nex-gddp-cmip6.s3-us-west-2.amazonaws.com/NEX-GDDP-CMIP6".to_string()
}
fn default_gcm_model() -> String {
    "ACCESS-CM2".to_string()
}
fn default_gcm_member() -> String {
    "r1i1p1f1".to_string()
}
fn default_gcm_grid() -> String {
    "gn".to_string()
}
fn default_gsod_base_url() -> String {
    "https://www.ncei.noaa.gov/data/global-summary-of-the-day/archive".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: default_root(),
            resolution: default_resolution(),
            format: OutputFormat::default(),
            cds: CdsSettings::default(),
            gcm: GcmSettings::default(),
            gsod: GsodSettings::default(),
        }
    }
}

impl Default for CdsSettings {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for GcmSettings {
    fn default() -> Self {
        Self {
            base_url: default_gcm_base_url(),
            model: default_gcm_model(),
            member: default_gcm_member(),
            grid: default_gcm_grid(),
        }
    }
}

impl Default for GsodSettings {
    fn default() -> Self {
        Self {
            base_url: default_gsod_base_url(),
        }
    }
}

impl Settings {
    /// Loads `path`, or `wxingest.toml` from the working directory if it
    /// exists, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Settings::default());
                }
                fallback
            }
        };

        let text = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile(path.clone(), e))?;
        Self::from_toml(&text, &path)
    }

    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        settings.check()
    }

    fn check(self) -> Result<Self, ConfigError> {
        if !(self.resolution > 0.0 && self.resolution <= 90.0) {
            return Err(ConfigError::OutOfBounds("resolution must be in (0, 90] degrees"));
        }
        if self.cds.poll_interval_secs == 0 {
            return Err(ConfigError::OutOfBounds("cds.poll_interval_secs must be positive"));
        }

        Ok(self)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_every_key() {
        let settings = Settings::from_toml("", Path::new("test.toml")).unwrap();

        assert_eq!(settings.root, PathBuf::from("."));
        assert_eq!(settings.resolution, 1.25);
        assert_eq!(settings.format, OutputFormat::Csv);
        assert_eq!(settings.gcm.model, "ACCESS-CM2");
        assert!(settings.cds.key.is_none());
    }

    #[test]
    fn should_parse_overrides() {
        let text = r#"
            root = "/data/climate"
            resolution = 2.5
            format = "parquet"

            [cds]
            key = "abc"
            poll_interval_secs = 10

            [gcm]
            model = "MRI-ESM2-0"
        "#;
        let settings = Settings::from_toml(text, Path::new("test.toml")).unwrap();

        assert_eq!(settings.root, PathBuf::from("/data/climate"));
        assert_eq!(settings.resolution, 2.5);
        assert_eq!(settings.format, OutputFormat::Parquet);
        assert_eq!(settings.cds.key.as_deref(), Some("abc"));
        assert_eq!(settings.cds.poll_interval_secs, 10);
        assert_eq!(settings.gcm.model, "MRI-ESM2-0");
        assert_eq!(settings.gcm.member, "r1i1p1f1");
    }

    #[test]
    fn should_reject_unknown_keys() {
        let result = Settings::from_toml("colour = \"red\"", Path::new("test.toml"));

        assert!(matches!(result, Err(ConfigError::Parse(..))));
    }

    #[test]
    fn should_reject_bad_resolution() {
        let result = Settings::from_toml("resolution = 0.0", Path::new("test.toml"));

        assert!(matches!(result, Err(ConfigError::OutOfBounds(_))));
    }

    #[test]
    fn should_fail_on_missing_explicit_file() {
        let result = Settings::load(Some(Path::new("/nonexistent/wxingest.toml")));

        assert!(matches!(result, Err(ConfigError::ReadFile(..))));
    }
}
