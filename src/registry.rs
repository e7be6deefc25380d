//! Sources, scenarios and variables, and how a logical variable maps onto
//! the identifiers each source uses.

use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};

use crate::{error::ConfigError, manifest::MANIFEST_FILE, sources::era5};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Shared socioeconomic pathway of a GCM projection.
pub enum Scenario {
    Ssp245,
    Ssp585,
}

impl Scenario {
    pub const ALL: [Scenario; 2] = [Scenario::Ssp245, Scenario::Ssp585];

    pub fn code(&self) -> u8 {
        match self {
            Scenario::Ssp245 => 1,
            Scenario::Ssp585 => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Ssp245 => "SSP245",
            Scenario::Ssp585 => "SSP585",
        }
    }

    /// Experiment identifier used in CMIP6 file names.
    pub fn experiment(&self) -> &'static str {
        match self {
            Scenario::Ssp245 => "ssp245",
            Scenario::Ssp585 => "ssp585",
        }
    }
}

impl FromStr for Scenario {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Scenario::ALL
            .into_iter()
            .find(|scenario| {
                scenario.name().eq_ignore_ascii_case(s) || scenario.code().to_string() == s
            })
            .ok_or_else(|| ConfigError::InvalidScenario(s.to_string()))
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Source as named by a caller, before a GCM scenario is attached.
pub enum SourceKind {
    Era5,
    Gcm,
    Gsod,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Era5, SourceKind::Gcm, SourceKind::Gsod];

    pub fn code(&self) -> u8 {
        match self {
            SourceKind::Era5 => 1,
            SourceKind::Gcm => 2,
            SourceKind::Gsod => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Era5 => "ERA5",
            SourceKind::Gcm => "GCM",
            SourceKind::Gsod => "GSOD",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            SourceKind::Era5 => "ERA5",
            SourceKind::Gcm => "IPCC Global Climate Model (GCM) Output",
            SourceKind::Gsod => "Global Surface Summary of the Day - GSOD",
        }
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        SourceKind::ALL
            .into_iter()
            .find(|kind| {
                kind.name().eq_ignore_ascii_case(s)
                    || kind.long_name().eq_ignore_ascii_case(s)
                    || kind.code().to_string() == s
            })
            .ok_or_else(|| ConfigError::InvalidSource(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Era5,
    Gcm(Scenario),
    Gsod,
}

impl Source {
    /// Attaches the scenario to a source kind. GCM output is meaningless
    /// without one; other sources ignore it.
    pub fn new(kind: SourceKind, scenario: Option<Scenario>) -> Result<Self, ConfigError> {
        match (kind, scenario) {
            (SourceKind::Era5, _) => Ok(Source::Era5),
            (SourceKind::Gsod, _) => Ok(Source::Gsod),
            (SourceKind::Gcm, Some(scenario)) => Ok(Source::Gcm(scenario)),
            (SourceKind::Gcm, None) => Err(ConfigError::MissingScenario),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Era5 => SourceKind::Era5,
            Source::Gcm(_) => SourceKind::Gcm,
            Source::Gsod => SourceKind::Gsod,
        }
    }

    pub fn code(&self) -> u8 {
        self.kind().code()
    }

    /// Directory segment identifying the source in download and
    /// preprocessed paths.
    pub fn path_segment(&self) -> String {
        match self {
            Source::Gcm(scenario) => format!("{}-{}", self.code(), scenario.experiment()),
            _ => self.code().to_string(),
        }
    }

    /// Date range used when a request does not override it.
    pub fn default_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = utc(1979, 1, 1, 0);
        match self {
            Source::Era5 => (start, utc(2015, 1, 1, 23)),
            Source::Gcm(_) => (start, utc(2100, 1, 1, 23)),
            Source::Gsod => (start, utc(2023, 1, 1, 23)),
        }
    }

    /// File whose presence in the download directory signals a complete
    /// download.
    pub fn raw_marker(&self) -> &'static str {
        match self {
            Source::Era5 => era5::DATA_FILE,
            Source::Gcm(_) | Source::Gsod => MANIFEST_FILE,
        }
    }

    /// Whether preprocessing produces a full global grid per day.
    pub fn is_gridded(&self) -> bool {
        !matches!(self, Source::Gsod)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Gcm(scenario) => write!(f, "GCM {}", scenario),
            _ => f.write_str(self.kind().name()),
        }
    }
}

fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid constant date")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Logical variable, independent of any source.
pub enum Variable {
    Tmp,
    Precip,
}

impl Variable {
    pub const ALL: [Variable; 2] = [Variable::Tmp, Variable::Precip];

    pub fn name(&self) -> &'static str {
        match self {
            Variable::Tmp => "tmp",
            Variable::Precip => "precip",
        }
    }
}

impl FromStr for Variable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tmp" => Ok(Variable::Tmp),
            "precip" | "percip" => Ok(Variable::Precip),
            other => Err(ConfigError::UnknownVariable(other.to_string())),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Conversion from a source's native unit to the canonical unit (°C, mm).
pub enum Conversion {
    KelvinToCelsius,
    FahrenheitToCelsius,
    InchesToMillimetres,
}

impl Conversion {
    pub fn apply(&self, value: f32) -> f32 {
        match self {
            Conversion::KelvinToCelsius => value - 273.15,
            Conversion::FahrenheitToCelsius => (value - 32.0) * 5.0 / 9.0,
            Conversion::InchesToMillimetres => value * 25.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A logical variable resolved for one source.
pub struct Binding {
    pub variable: Variable,
    /// Name used when requesting the data.
    pub download_id: &'static str,
    /// Name of the variable inside the downloaded files.
    pub dataset_id: &'static str,
    pub conversion: Conversion,
}

/// Looks up the identifiers of `variable` for `source`.
pub fn binding(source: &Source, variable: Variable) -> Option<Binding> {
    let (download_id, dataset_id, conversion) = match (source, variable) {
        (Source::Era5, Variable::Tmp) => ("2m_temperature", "t2m", Conversion::KelvinToCelsius),
        (Source::Gcm(_), Variable::Tmp) => ("tas", "tas", Conversion::KelvinToCelsius),
        (Source::Gsod, Variable::Tmp) => ("TEMP", "TEMP", Conversion::FahrenheitToCelsius),
        (Source::Gsod, Variable::Precip) => ("PRCP", "PRCP", Conversion::InchesToMillimetres),
        _ => return None,
    };

    Some(Binding {
        variable,
        download_id,
        dataset_id,
        conversion,
    })
}

/// Resolves every variable for `source`, failing on the first one without a
/// mapping.
pub fn resolve(source: &Source, variables: &[Variable]) -> Result<Vec<Binding>, ConfigError> {
    variables
        .iter()
        .map(|&variable| {
            binding(source, variable).ok_or_else(|| ConfigError::UnmappedVariable {
                variable: variable.name().to_string(),
                source_name: source.to_string(),
            })
        })
        .collect()
}

/// Variables fetched when a request does not name any.
pub fn default_variables(_source: &Source) -> Vec<Variable> {
    vec![Variable::Tmp]
}

// -- Tests -------------------------------------------------------------------
