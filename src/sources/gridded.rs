//! Turning gridded fields (ERA5, GCM) into a daily extract on the target grid.

use anyhow::{bail, Result};
use tracing::info;

use crate::{
    grid::{day_chunks, Grid, GridSource, TargetGrid},
    registry::Binding,
    stage::Job,
    table::{Extract, Row},
};

/// Days read from a source in one go.
const CHUNK_DAYS: usize = 31;

/// Opens the sources of each bound variable with `open` (one per file, in
/// time order), reduces them to daily means on the global grid, converts
/// units and joins the variables into one extract.
pub fn build_extract<S: GridSource>(
    job: &Job<'_>,
    mut open: impl FnMut(&Binding) -> Result<Vec<S>>,
) -> Result<Extract> {
    let target = TargetGrid::global(job.resolution);

    let mut grids = Vec::with_capacity(job.bindings.len());
    for binding in job.bindings {
        let daily = daily_grid(job, binding, &open(binding)?, &target)?;
        if daily.times.is_empty() {
            bail!(
                "No `{}` time steps between {} and {}",
                binding.dataset_id,
                job.start,
                job.end
            );
        }
        grids.push(daily);
    }

    to_extract(job.variable_names(), &grids)
}

/// Daily means of one variable on `target`, read a month of days at a time.
fn daily_grid<S: GridSource>(
    job: &Job<'_>,
    binding: &Binding,
    sources: &[S],
    target: &TargetGrid,
) -> Result<Grid> {
    let mut daily = Grid::new(
        Vec::new(),
        target.latitudes.clone(),
        target.longitudes.clone(),
        Vec::new(),
    )?;

    for source in sources {
        for steps in day_chunks(source.times(), job.start, job.end, CHUNK_DAYS) {
            let raw = source.read(steps)?;
            info!(
                "Regridding {} time steps of `{}` to {} degrees",
                raw.times.len(),
                binding.dataset_id,
                job.resolution
            );
            let mut chunk = raw.daily_mean().regrid(target);
            chunk.convert(binding.conversion);
            daily.append(chunk)?;
        }
    }

    Ok(daily)
}

fn to_extract(variables: Vec<String>, grids: &[Grid]) -> Result<Extract> {
    let Some(first) = grids.first() else {
        bail!("No variables to extract");
    };
    if let Some(other) = grids.iter().find(|g| g.times != first.times) {
        bail!(
            "Variables cover different days ({} vs {})",
            first.times.len(),
            other.times.len()
        );
    }

    let cells = first.latitudes.len() * first.longitudes.len();
    let mut extract = Extract::new(variables);
    extract.rows.reserve(first.times.len() * cells);

    for (t, time) in first.times.iter().enumerate() {
        for (i, latitude) in first.latitudes.iter().enumerate() {
            for (j, longitude) in first.longitudes.iter().enumerate() {
                let index = t * cells + i * first.longitudes.len() + j;
                let values = grids
                    .iter()
                    .map(|g| Some(g.values[index]).filter(|v| !v.is_nan()))
                    .collect();
                extract.rows.push(Row {
                    time: time.date(),
                    latitude: *latitude as f32,
                    longitude: *longitude as f32,
                    values,
                });
            }
        }
    }

    Ok(extract)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use chrono::{NaiveDate, NaiveDateTime};

    use crate::{
        registry::{self, Source, Variable},
        request::parse_date,
    };

    use super::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 4, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    /// A global 90 degree field in Kelvin, constant per time step.
    fn kelvin_grid(times: Vec<NaiveDateTime>) -> Grid {
        let latitudes = vec![-90.0, 0.0];
        let longitudes = vec![0.0, 90.0, 180.0, 270.0];
        let values = times
            .iter()
            .enumerate()
            .flat_map(|(t, _)| std::iter::repeat(273.15 + t as f32).take(8))
            .collect();
        Grid::new(times, latitudes, longitudes, values).unwrap()
    }

    #[test]
    fn should_build_daily_celsius_extract() {
        let bindings = registry::resolve(&Source::Era5, &[Variable::Tmp]).unwrap();
        let job = Job {
            source: Source::Era5,
            bindings: &bindings,
            start: parse_date("2023-04-02", 0).unwrap(),
            end: parse_date("2023-04-03", 23).unwrap(),
            resolution: 90.0,
            force: false,
        };
        let grid = kelvin_grid(vec![at(1, 0), at(2, 0), at(2, 12), at(3, 0), at(4, 0)]);

        let extract = build_extract(&job, |_| Ok(vec![grid.clone()])).unwrap();

        assert_eq!(extract.variables, vec!["tmp"]);
        assert_eq!(extract.len(), 2 * 8);
        let first = &extract.rows[0];
        assert_eq!(first.time, NaiveDate::from_ymd_opt(2023, 4, 2).unwrap());
        assert_eq!((first.latitude, first.longitude), (-90.0, 0.0));
        assert!((first.values[0].unwrap() - 1.5).abs() < 1e-3);
        assert!((extract.rows[8].values[0].unwrap() - 3.0).abs() < 1e-3);
    }

    #[test]
    fn should_fail_without_steps_in_range() {
        let bindings = registry::resolve(&Source::Era5, &[Variable::Tmp]).unwrap();
        let job = Job {
            source: Source::Era5,
            bindings: &bindings,
            start: parse_date("2024-01-01", 0).unwrap(),
            end: parse_date("2024-01-02", 23).unwrap(),
            resolution: 90.0,
            force: false,
        };

        let result = build_extract(&job, |_| Ok(vec![kelvin_grid(vec![at(1, 0)])]));

        assert!(result.is_err());
    }

    #[test]
    fn should_propagate_load_errors() {
        let bindings = registry::resolve(&Source::Era5, &[Variable::Tmp]).unwrap();
        let job = Job {
            source: Source::Era5,
            bindings: &bindings,
            start: parse_date("2023-04-01", 0).unwrap(),
            end: parse_date("2023-04-02", 23).unwrap(),
            resolution: 90.0,
            force: false,
        };

        let result = build_extract(&job, |b| -> Result<Vec<Grid>> {
            Err(anyhow!("no {}", b.dataset_id))
        });

        assert_eq!(result.unwrap_err().to_string(), "no t2m");
    }

    #[test]
    fn should_join_files_and_span_chunks() {
        let bindings = registry::resolve(&Source::Era5, &[Variable::Tmp]).unwrap();
        let job = Job {
            source: Source::Era5,
            bindings: &bindings,
            start: parse_date("2023-03-01", 0).unwrap(),
            end: parse_date("2023-05-31", 23).unwrap(),
            resolution: 90.0,
            force: false,
        };
        // Two files with one step per day: 40 days from 1 April, then one more.
        let day = |d: i64| at(1, 12) + chrono::Duration::days(d);
        let first = kelvin_grid((0..40).map(day).collect());
        let second = kelvin_grid(vec![day(40)]);

        let extract = build_extract(&job, |_| Ok(vec![first.clone(), second.clone()])).unwrap();

        assert_eq!(extract.len(), 41 * 8);
        assert_eq!(extract.rows[0].time, NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
        assert!((extract.rows[39 * 8].values[0].unwrap() - 39.0).abs() < 1e-3);
        assert_eq!(extract.rows[40 * 8].time, NaiveDate::from_ymd_opt(2023, 5, 11).unwrap());
        assert!(extract.rows[40 * 8].values[0].unwrap().abs() < 1e-3);
    }
}
