//! Gridded fields in memory: regridding onto the global target grid and
//! daily averaging.

pub mod netcdf;
pub mod time;

use std::{collections::BTreeMap, ops::Range};

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::registry::Conversion;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
/// A `time x latitude x longitude` field, time-major. Missing values are NaN.
pub struct Grid {
    pub times: Vec<NaiveDateTime>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Vec<f32>,
}

impl Grid {
    pub fn new(
        times: Vec<NaiveDateTime>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        values: Vec<f32>,
    ) -> Result<Self> {
        let expected = times.len() * latitudes.len() * longitudes.len();
        if values.len() != expected {
            bail!(
                "Grid has {} values, expected {} ({} x {} x {})",
                values.len(),
                expected,
                times.len(),
                latitudes.len(),
                longitudes.len()
            );
        }

        Ok(Grid {
            times,
            latitudes,
            longitudes,
            values,
        })
    }

    fn cells(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    /// Values of one time step, latitude-major.
    pub fn slice(&self, t: usize) -> &[f32] {
        let cells = self.cells();
        &self.values[t * cells..(t + 1) * cells]
    }

    /// Appends `other` along the time axis. Both must share coordinates.
    pub fn append(&mut self, other: Grid) -> Result<()> {
        if self.latitudes != other.latitudes || self.longitudes != other.longitudes {
            bail!("Cannot join grids with different coordinates");
        }
        self.times.extend(other.times);
        self.values.extend(other.values);

        Ok(())
    }

    pub fn convert(&mut self, conversion: Conversion) {
        for value in self.values.iter_mut().filter(|v| !v.is_nan()) {
            *value = conversion.apply(*value);
        }
    }

    /// Bilinear interpolation onto `target`. Longitudes wrap around when the
    /// source grid spans the globe; points outside the source are missing.
    pub fn regrid(&self, target: &TargetGrid) -> Grid {
        let lat_axis = SourceAxis::new(&self.latitudes, false);
        let lon_axis = SourceAxis::new(&self.longitudes, true);
        let lat_stencils: Vec<Option<Stencil>> =
            target.latitudes.iter().map(|&l| lat_axis.stencil(l)).collect();
        let lon_stencils: Vec<Option<Stencil>> =
            target.longitudes.iter().map(|&l| lon_axis.stencil(l)).collect();

        let n_lon = self.longitudes.len();
        let mut values = Vec::with_capacity(self.times.len() * target.cells());

        for t in 0..self.times.len() {
            let slice = self.slice(t);
            for lat in &lat_stencils {
                for lon in &lon_stencils {
                    let value = match (lat, lon) {
                        (Some(lat), Some(lon)) => bilinear(slice, n_lon, lat, lon),
                        _ => f32::NAN,
                    };
                    values.push(value);
                }
            }
        }

        Grid {
            times: self.times.clone(),
            latitudes: target.latitudes.clone(),
            longitudes: target.longitudes.clone(),
            values,
        }
    }

    /// Averages all time steps of each UTC day, ignoring missing values.
    /// Result times are midnight of each day.
    pub fn daily_mean(&self) -> Grid {
        let mut days: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (t, time) in self.times.iter().enumerate() {
            days.entry(time.date()).or_default().push(t);
        }

        let cells = self.cells();
        let mut times = Vec::with_capacity(days.len());
        let mut values = Vec::with_capacity(days.len() * cells);

        for (day, steps) in days {
            times.push(day.and_time(NaiveTime::MIN));
            for cell in 0..cells {
                let (sum, count) = steps
                    .iter()
                    .map(|&t| self.values[t * cells + cell])
                    .filter(|v| !v.is_nan())
                    .fold((0.0f64, 0usize), |(sum, count), v| (sum + v as f64, count + 1));
                values.push(if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                });
            }
        }

        Grid {
            times,
            latitudes: self.latitudes.clone(),
            longitudes: self.longitudes.clone(),
            values,
        }
    }
}

/// A field that can be read a few time steps at a time.
pub trait GridSource {
    fn times(&self) -> &[NaiveDateTime];

    fn read(&self, steps: Range<usize>) -> Result<Grid>;
}

impl GridSource for Grid {
    fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    fn read(&self, steps: Range<usize>) -> Result<Grid> {
        let cells = self.cells();
        Grid::new(
            self.times[steps.clone()].to_vec(),
            self.latitudes.clone(),
            self.longitudes.clone(),
            self.values[steps.start * cells..steps.end * cells].to_vec(),
        )
    }
}

/// Groups the steps inside `[start, end]` into runs of whole days, at most
/// `max_days` days per run. `times` must be in order.
pub fn day_chunks(
    times: &[NaiveDateTime],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_days: usize,
) -> Vec<Range<usize>> {
    let (start, end) = (start.naive_utc(), end.naive_utc());
    let mut chunks = Vec::new();
    // Current run, the number of days in it and its last day.
    let mut current: Option<(Range<usize>, usize, NaiveDate)> = None;

    for (t, time) in times.iter().enumerate() {
        if *time < start || *time > end {
            chunks.extend(current.take().map(|(steps, _, _)| steps));
            continue;
        }

        let day = time.date();
        let extend = match &current {
            Some((_, days, last)) => day == *last || *days < max_days,
            None => false,
        };
        if extend {
            if let Some((steps, days, last)) = current.as_mut() {
                steps.end = t + 1;
                if day != *last {
                    *days += 1;
                    *last = day;
                }
            }
        } else {
            chunks.extend(current.take().map(|(steps, _, _)| steps));
            current = Some((t..t + 1, 1, day));
        }
    }
    chunks.extend(current.map(|(steps, _, _)| steps));

    chunks
}

#[derive(Debug, Clone, PartialEq)]
/// Regular global grid: latitudes from -90 and longitudes from 0, both
/// excluding the upper bound.
pub struct TargetGrid {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

impl TargetGrid {
    pub fn global(resolution: f64) -> Self {
        TargetGrid {
            latitudes: arange(-90.0, 90.0, resolution),
            longitudes: arange(0.0, 360.0, resolution),
        }
    }

    pub fn cells(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    /// Index of the node nearest to `latitude`, clamped to the grid.
    pub fn nearest_latitude(&self, latitude: f64, resolution: f64) -> usize {
        let i = ((latitude + 90.0) / resolution).round().max(0.0) as usize;
        i.min(self.latitudes.len() - 1)
    }

    /// Index of the node nearest to `longitude`, wrapping around 360.
    pub fn nearest_longitude(&self, longitude: f64, resolution: f64) -> usize {
        let j = (longitude.rem_euclid(360.0) / resolution).round() as usize;
        j % self.longitudes.len()
    }
}

fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = ((stop - start) / step - EPSILON).ceil().max(0.0) as usize;
    (0..n).map(|k| start + k as f64 * step).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Linear interpolation between two source indices:
/// `(1 - weight) * v[lo] + weight * v[hi]`.
struct Stencil {
    lo: usize,
    hi: usize,
    weight: f64,
}

/// Source coordinates sorted ascending, remembering original indices.
struct SourceAxis {
    coords: Vec<f64>,
    order: Vec<usize>,
    periodic: bool,
}

impl SourceAxis {
    fn new(coords: &[f64], longitude: bool) -> Self {
        let normalize = |c: f64| if longitude { c.rem_euclid(360.0) } else { c };
        let mut order: Vec<usize> = (0..coords.len()).collect();
        order.sort_by(|&a, &b| normalize(coords[a]).total_cmp(&normalize(coords[b])));
        let sorted: Vec<f64> = order.iter().map(|&i| normalize(coords[i])).collect();

        let periodic = longitude && is_global(&sorted);

        SourceAxis {
            coords: sorted,
            order,
            periodic,
        }
    }

    fn stencil(&self, target: f64) -> Option<Stencil> {
        let n = self.coords.len();
        if n == 0 {
            return None;
        }
        let target = if self.periodic {
            target.rem_euclid(360.0)
        } else {
            target
        };
        let first = self.coords[0];
        let last = self.coords[n - 1];

        if (target - first).abs() < EPSILON {
            return Some(self.exact(0));
        }
        if (target - last).abs() < EPSILON {
            return Some(self.exact(n - 1));
        }

        if target < first || target > last {
            if !self.periodic {
                return None;
            }
            // Between the last node and the first node shifted by 360.
            let lower = last;
            let upper = first + 360.0;
            let shifted = if target < first { target + 360.0 } else { target };
            return Some(Stencil {
                lo: self.order[n - 1],
                hi: self.order[0],
                weight: (shifted - lower) / (upper - lower),
            });
        }

        let p = self.coords.partition_point(|&c| c <= target);
        let (lo, hi) = (p - 1, p);
        if (target - self.coords[lo]).abs() < EPSILON {
            return Some(self.exact(lo));
        }

        Some(Stencil {
            lo: self.order[lo],
            hi: self.order[hi],
            weight: (target - self.coords[lo]) / (self.coords[hi] - self.coords[lo]),
        })
    }

    fn exact(&self, sorted_index: usize) -> Stencil {
        let i = self.order[sorted_index];
        Stencil {
            lo: i,
            hi: i,
            weight: 0.0,
        }
    }
}

/// Whether sorted longitudes cover the full circle, leaving at most one
/// regular step between the last and first node.
fn is_global(sorted: &[f64]) -> bool {
    if sorted.len() < 2 {
        return false;
    }
    let span = sorted[sorted.len() - 1] - sorted[0];
    let step = span / (sorted.len() - 1) as f64;

    360.0 - span <= step * 1.5
}

fn bilinear(slice: &[f32], n_lon: usize, lat: &Stencil, lon: &Stencil) -> f32 {
    let corners = [
        (lat.lo, lon.lo, (1.0 - lat.weight) * (1.0 - lon.weight)),
        (lat.lo, lon.hi, (1.0 - lat.weight) * lon.weight),
        (lat.hi, lon.lo, lat.weight * (1.0 - lon.weight)),
        (lat.hi, lon.hi, lat.weight * lon.weight),
    ];

    let mut sum = 0.0f64;
    for (i, j, weight) in corners {
        if weight <= 0.0 {
            continue;
        }
        let value = slice[i * n_lon + j];
        if value.is_nan() {
            return f32::NAN;
        }
        sum += weight * value as f64;
    }

    sum as f32
}

// -- Tests -------------------------------------------------------------------
