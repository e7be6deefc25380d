//! Maps of one variable on one day, read back from an extract.
//!
//! Rendering needs the `plot` cargo feature (plotlars over polars) and writes
//! a self-contained HTML page.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;

use crate::table::Extract;

#[derive(Debug, Clone, PartialEq)]
/// One variable on one day, one entry per extract row of that day.
pub struct DayField {
    pub variable: String,
    pub day: NaiveDate,
    pub latitudes: Vec<f32>,
    pub longitudes: Vec<f32>,
    pub values: Vec<Option<f32>>,
}

impl DayField {
    pub fn from_extract(extract: &Extract, variable: &str, day: NaiveDate) -> Result<Self> {
        let column = extract
            .variables
            .iter()
            .position(|v| v == variable)
            .ok_or_else(|| {
                anyhow!(
                    "No `{}` column, the extract has: {}",
                    variable,
                    extract.variables.join(", ")
                )
            })?;

        let mut field = DayField {
            variable: variable.to_string(),
            day,
            latitudes: Vec::new(),
            longitudes: Vec::new(),
            values: Vec::new(),
        };
        for row in extract.rows.iter().filter(|row| row.time == day) {
            field.latitudes.push(row.latitude);
            field.longitudes.push(row.longitude);
            field.values.push(row.values[column]);
        }
        if field.values.is_empty() {
            bail!("No rows on {}", day);
        }

        Ok(field)
    }

    /// Mean of the present values.
    pub fn mean(&self) -> Option<f32> {
        let present: Vec<f32> = self.values.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }
        Some(present.iter().sum::<f32>() / present.len() as f32)
    }

    pub fn title(&self) -> String {
        format!("Daily mean {} for {}", self.variable, self.day.format("%Y-%m-%d"))
    }
}

/// `{variable}_{day}.html` beside the extract.
pub fn default_output(extract: &Path, variable: &str, day: NaiveDate) -> PathBuf {
    extract.with_file_name(format!("{}_{}.html", variable, day.format("%Y-%m-%d")))
}

#[cfg(feature = "plot")]
/// Writes `field` as a latitude/longitude heat map to `output`.
pub fn render(field: &DayField, output: &Path) -> Result<()> {
    use plotlars::{HeatMap, Plot, Text};
    use polars::prelude::*;

    let data = df!(
        "longitude" => &field.longitudes,
        "latitude" => &field.latitudes,
        field.variable.as_str() => &field.values
    )?;

    HeatMap::builder()
        .data(&data)
        .x("longitude")
        .y("latitude")
        .z(field.variable.as_str())
        .plot_title(Text::from(field.title().as_str()))
        .x_title("Longitude")
        .y_title("Latitude")
        .build()
        .write_html(output.to_string_lossy().into_owned());

    Ok(())
}

#[cfg(not(feature = "plot"))]
pub fn render(_field: &DayField, output: &Path) -> Result<()> {
    bail!(
        "Cannot write `{}`: built without plotting support (enable the `plot` feature)",
        output.display()
    )
}

// -- Tests -------------------------------------------------------------------
