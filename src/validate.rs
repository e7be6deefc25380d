//! Structural checks on a preprocessed extract.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::Path,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::{
    grid::TargetGrid,
    stage::{Job, Validator},
    table::{self, Extract, LATITUDE, LONGITUDE, TIME},
};

/// Tolerance, in grid steps, for a coordinate to count as on the grid.
const ALIGNMENT_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Check {
    Readable,
    Columns,
    NotEmpty,
    LatitudeRange,
    LongitudeRange,
    DateRange,
    Unique,
    Alignment,
    CompleteDays,
    ContiguousDays,
}

#[derive(Debug, Clone, PartialEq)]
/// A failed check, how often it failed, and the first offending value.
pub struct Failure {
    pub check: Check,
    pub count: usize,
    pub example: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failed {} time(s), e.g. {}", self.check, self.count, self.example)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    pub rows: usize,
    pub missing_values: usize,
    failures: BTreeMap<Check, Failure>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.failures.values()
    }

    pub fn failed(&self, check: Check) -> bool {
        self.failures.contains_key(&check)
    }

    fn fail(&mut self, check: Check, example: impl FnOnce() -> String) {
        self.failures
            .entry(check)
            .and_modify(|f| f.count += 1)
            .or_insert_with(|| Failure {
                check,
                count: 1,
                example: example(),
            });
    }
}

#[derive(Debug, Clone)]
/// What an extract is expected to look like.
pub struct Expectation {
    pub variables: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub resolution: f64,
    /// Every present day must carry the complete global grid, with no gaps.
    pub gridded: bool,
    pub unique: bool,
}

impl Expectation {
    pub fn from_job(job: &Job<'_>, gridded: bool) -> Self {
        Expectation {
            variables: job.variable_names(),
            start: job.start.date_naive(),
            end: job.end.date_naive(),
            resolution: job.resolution,
            gridded,
            unique: true,
        }
    }
}

/// Validates the extract file at `path`.
pub fn check_file(path: &Path, expect: &Expectation) -> ValidationReport {
    let mut report = ValidationReport::default();

    let columns = match table::read_columns(path) {
        Ok(columns) => columns,
        Err(e) => {
            report.fail(Check::Readable, || format!("{:#}", e));
            return report;
        }
    };
    let required = [TIME, LATITUDE, LONGITUDE]
        .into_iter()
        .map(str::to_string)
        .chain(expect.variables.iter().cloned());
    for column in required {
        if !columns.contains(&column) {
            report.fail(Check::Columns, || format!("missing column `{}`", column));
        }
    }
    if !report.passed() {
        return report;
    }

    match table::read(path) {
        Ok(extract) => check_extract(&extract, expect, report),
        Err(e) => {
            report.fail(Check::Readable, || format!("{:#}", e));
            report
        }
    }
}

/// Runs the row level checks on an extract already in memory.
pub fn check_extract(
    extract: &Extract,
    expect: &Expectation,
    mut report: ValidationReport,
) -> ValidationReport {
    report.rows = extract.len();
    if extract.is_empty() {
        report.fail(Check::NotEmpty, || "no rows".to_string());
        return report;
    }

    let mut seen = HashSet::new();
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();

    for row in &extract.rows {
        report.missing_values += row.values.iter().filter(|v| v.is_none()).count();

        if !(-90.0..=90.0).contains(&row.latitude) {
            report.fail(Check::LatitudeRange, || row.latitude.to_string());
        }
        if !(0.0..=360.0).contains(&row.longitude) {
            report.fail(Check::LongitudeRange, || row.longitude.to_string());
        }
        if row.time < expect.start || row.time > expect.end {
            report.fail(Check::DateRange, || row.time.to_string());
        }
        if !aligned(row.latitude as f64 + 90.0, expect.resolution)
            || !aligned(row.longitude as f64, expect.resolution)
        {
            report.fail(Check::Alignment, || {
                format!("({}, {})", row.latitude, row.longitude)
            });
        }
        if expect.unique && !seen.insert((row.time, key(row.latitude), key(row.longitude))) {
            report.fail(Check::Unique, || {
                format!("{} ({}, {})", row.time, row.latitude, row.longitude)
            });
        }

        *per_day.entry(row.time).or_default() += 1;
    }

    if expect.gridded {
        let expected = TargetGrid::global(expect.resolution).cells();
        for (day, &rows) in &per_day {
            if rows != expected {
                report.fail(Check::CompleteDays, || {
                    format!("{} has {} rows, expected {}", day, rows, expected)
                });
            }
        }
        let days: Vec<&NaiveDate> = per_day.keys().collect();
        for pair in days.windows(2) {
            if pair[1].signed_duration_since(*pair[0]).num_days() != 1 {
                report.fail(Check::ContiguousDays, || format!("gap after {}", pair[0]));
            }
        }
    }

    report
}

fn aligned(offset: f64, resolution: f64) -> bool {
    let steps = offset / resolution;
    (steps - steps.round()).abs() < ALIGNMENT_TOLERANCE
}

fn key(coordinate: f32) -> i64 {
    (coordinate as f64 * 10_000.0).round() as i64
}

/// The validator shared by every source; gridded sources additionally
/// require complete, contiguous days.
pub struct ExtractValidator {
    gridded: bool,
}

impl ExtractValidator {
    pub fn gridded() -> Self {
        ExtractValidator { gridded: true }
    }

    pub fn stations() -> Self {
        ExtractValidator { gridded: false }
    }
}

#[async_trait]
impl Validator for ExtractValidator {
    async fn validate(&self, job: &Job<'_>, extract: &Path) -> Result<ValidationReport> {
        let expect = Expectation::from_job(job, self.gridded);
        let report = check_file(extract, &expect);

        if report.missing_values > 0 {
            warn!(
                "{} missing values in `{}`",
                report.missing_values,
                extract.display()
            );
        } else {
            info!("No missing values in `{}`", extract.display());
        }
        for failure in report.failures() {
            warn!("{}", failure);
        }

        Ok(report)
    }
}

// -- Tests -------------------------------------------------------------------
