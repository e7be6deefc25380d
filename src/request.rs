//! Dataset requests: what a caller asks for, validated up front.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::warn;

use crate::{
    error::ConfigError,
    registry::{self, Binding, Scenario, Source, SourceKind, Variable},
};

#[derive(Debug, Clone, PartialEq)]
/// A validated request for one dataset. Construction resolves every variable
/// against the registry, so a request that exists is always consistent.
pub struct DatasetRequest {
    source: Source,
    variables: Vec<Variable>,
    bindings: Vec<Binding>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    force: bool,
}

impl DatasetRequest {
    /// Builds a request, filling omitted variables and dates from the
    /// source defaults.
    pub fn new(
        source: Source,
        variables: Option<Vec<Variable>>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        force: bool,
    ) -> Result<Self, ConfigError> {
        let variables = match variables {
            Some(variables) => {
                check_unique(&variables)?;
                variables
            }
            None => registry::default_variables(&source),
        };
        let bindings = registry::resolve(&source, &variables)?;

        if let Some(missing) = one_sided(start, end) {
            warn!("{}, using the {} default", missing, source);
        }
        let (default_start, default_end) = source.default_range();
        let start = start.unwrap_or(default_start);
        let end = end.unwrap_or(default_end);

        if end < start {
            return Err(ConfigError::InvalidDateRange { start, end });
        }
        if end == start {
            warn!("requesting a single instant of data from {}", source);
        }

        Ok(DatasetRequest {
            source,
            variables,
            bindings,
            start,
            end,
            force,
        })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn force(&self) -> bool {
        self.force
    }

    /// Logical variable names as they appear in paths, e.g. `tmp, precip`.
    pub fn type_string(&self) -> String {
        self.variables
            .iter()
            .map(Variable::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Date range as it appears in paths, e.g. `from 2023-04-02 - 2023-04-30`.
    pub fn time_string(&self) -> String {
        format!(
            "from {} - {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

fn check_unique(variables: &[Variable]) -> Result<(), ConfigError> {
    if variables.is_empty() {
        return Err(ConfigError::NoVariables);
    }

    for (i, variable) in variables.iter().enumerate() {
        if variables[..i].contains(variable) {
            return Err(ConfigError::DuplicateVariable(variable.name().to_string()));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
/// Dataset as written on the command line:
/// `SOURCE[/SCENARIO][:VARS[:START[:END]]]`.
pub struct DatasetSpec {
    pub source: SourceKind,
    pub scenario: Option<Scenario>,
    pub variables: Option<Vec<Variable>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DatasetSpec {
    pub fn into_request(self, force: bool) -> Result<DatasetRequest, ConfigError> {
        let source = Source::new(self.source, self.scenario)?;
        DatasetRequest::new(source, self.variables, self.start, self.end, force)
    }
}

impl FromStr for DatasetSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').map(str::trim).collect();
        if fields.len() > 4 || fields[0].is_empty() {
            return Err(ConfigError::InvalidDataset(s.to_string()));
        }

        let (source, scenario): (SourceKind, Option<Scenario>) = match fields[0].split_once('/') {
            Some((source, scenario)) => (source.parse()?, Some(scenario.parse()?)),
            None => (fields[0].parse()?, None),
        };

        let variables = match fields.get(1) {
            Some(list) if !list.is_empty() => Some(
                list.split(',')
                    .map(str::parse::<Variable>)
                    .collect::<Result<Vec<Variable>, _>>()?,
            ),
            _ => None,
        };

        let start = match fields.get(2) {
            Some(date) if !date.is_empty() => Some(parse_date(date, 0)?),
            _ => None,
        };
        let end = match fields.get(3) {
            Some(date) if !date.is_empty() => Some(parse_date(date, 23)?),
            _ => None,
        };

        Ok(DatasetSpec {
            source,
            scenario,
            variables,
            start,
            end,
        })
    }
}

/// Parses `YYYY-MM-DD` (at `default_hour` UTC) or `YYYY-MM-DDTHH`.
pub fn parse_date(s: &str, default_hour: u32) -> Result<DateTime<Utc>, ConfigError> {
    let invalid = || ConfigError::InvalidDate(s.to_string());

    let (date, hour) = match s.split_once('T') {
        Some((date, hour)) => (date, hour.parse::<u32>().map_err(|_| invalid())?),
        None => (s, default_hour),
    };
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
    let datetime = date.and_hms_opt(hour, 0, 0).ok_or_else(invalid)?;

    Ok(Utc.from_utc_datetime(&datetime))
}

/// Describes a range given by only one of its bounds.
fn one_sided(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<&'static str> {
    match (start, end) {
        (Some(_), None) => Some("start date provided but not end date"),
        (None, Some(_)) => Some("end date provided but not start date"),
        _ => None,
    }
}

// -- Tests -------------------------------------------------------------------
