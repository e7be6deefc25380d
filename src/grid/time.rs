//! CF convention time axes: `<unit> since <reference>` with a calendar.

use anyhow::{anyhow, bail, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

const SECONDS_PER_DAY: i64 = 86_400;

/// Cumulative day count at the start of each month of a 365 day year.
const NOLEAP_MONTH_START: [i64; 13] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calendar {
    /// `standard`, `gregorian` and `proleptic_gregorian`.
    Standard,
    /// `noleap` and `365_day`.
    NoLeap,
}

impl Calendar {
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name.map(|n| n.trim().to_lowercase()).as_deref() {
            None | Some("standard") | Some("gregorian") | Some("proleptic_gregorian") => {
                Ok(Calendar::Standard)
            }
            Some("noleap") | Some("365_day") => Ok(Calendar::NoLeap),
            Some(other) => bail!("Unsupported calendar `{}`", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    unit_seconds: f64,
    reference: NaiveDateTime,
    calendar: Calendar,
}

impl TimeAxis {
    pub fn parse(units: &str, calendar: Option<&str>) -> Result<Self> {
        let (unit, reference) = units
            .split_once(" since ")
            .ok_or_else(|| anyhow!("Time units `{}` are not `<unit> since <date>`", units))?;

        let unit_seconds = match unit.trim().to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "h" => 3600.0,
            "days" | "day" | "d" => SECONDS_PER_DAY as f64,
            other => bail!("Unsupported time unit `{}`", other),
        };

        Ok(TimeAxis {
            unit_seconds,
            reference: parse_reference(reference)?,
            calendar: Calendar::parse(calendar)?,
        })
    }

    /// Converts a raw axis value to a timestamp in the proleptic Gregorian
    /// calendar.
    pub fn decode(&self, value: f64) -> Result<NaiveDateTime> {
        if !value.is_finite() {
            bail!("Non-finite time value {}", value);
        }
        let offset_millis = (value * self.unit_seconds * 1000.0).round() as i64;

        match self.calendar {
            Calendar::Standard => self
                .reference
                .checked_add_signed(Duration::milliseconds(offset_millis))
                .ok_or_else(|| anyhow!("Time value {} out of range", value)),
            Calendar::NoLeap => decode_noleap(self.reference, offset_millis / 1000),
        }
    }
}

fn parse_reference(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim().trim_end_matches("UTC").trim_end_matches('Z').trim();

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(datetime);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow!("Cannot parse time reference `{}`", s))
}

fn decode_noleap(reference: NaiveDateTime, offset_seconds: i64) -> Result<NaiveDateTime> {
    let month0 = reference.month0() as usize;
    if reference.month() == 2 && reference.day() == 29 {
        bail!("Reference date {} does not exist in a noleap calendar", reference);
    }

    let reference_day = reference.year() as i64 * 365
        + NOLEAP_MONTH_START[month0]
        + reference.day0() as i64;
    let total = reference_day * SECONDS_PER_DAY
        + reference.num_seconds_from_midnight() as i64
        + offset_seconds;

    let days = total.div_euclid(SECONDS_PER_DAY);
    let seconds = total.rem_euclid(SECONDS_PER_DAY) as u32;
    let year = days.div_euclid(365);
    let day_of_year = days.rem_euclid(365);
    let month0 = NOLEAP_MONTH_START
        .iter()
        .rposition(|&start| start <= day_of_year)
        .unwrap_or(0);
    let day = day_of_year - NOLEAP_MONTH_START[month0] + 1;

    NaiveDate::from_ymd_opt(year as i32, month0 as u32 + 1, day as u32)
        .and_then(|d| d.and_hms_opt(seconds / 3600, (seconds % 3600) / 60, seconds % 60))
        .ok_or_else(|| anyhow!("Noleap offset {}s out of range", offset_seconds))
}

// -- Tests -------------------------------------------------------------------
