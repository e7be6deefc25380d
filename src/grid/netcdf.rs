//! Reading a `time x latitude x longitude` variable from a NetCDF file.
//!
//! Needs the `netcdf` cargo feature, which links the system netCDF-C
//! library. Without it, opening a file fails with an explanatory error.

use std::{ops::Range, path::Path};

use anyhow::Result;
use chrono::NaiveDateTime;

use super::{Grid, GridSource};

#[cfg(feature = "netcdf")]
/// An open variable. Coordinates and the time axis are read up front,
/// values only for the steps asked for.
pub struct NetcdfGrid {
    file: ::netcdf::File,
    name: String,
    times: Vec<NaiveDateTime>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    scale: f64,
    offset: f64,
    fills: Vec<f64>,
}

#[cfg(feature = "netcdf")]
impl NetcdfGrid {
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        use anyhow::{anyhow, bail, Context};

        use super::time::TimeAxis;

        let file = ::netcdf::open(path).with_context(|| format!("Cannot open `{}`", path.display()))?;
        let var = file
            .variable(name)
            .ok_or_else(|| anyhow!("Variable `{}` not found in `{}`", name, path.display()))?;

        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        if dims.len() != 3 {
            bail!(
                "Variable `{}` has dimensions {:?}, expected time, latitude, longitude",
                name,
                dims
            );
        }

        let time_var = file
            .variable(&dims[0])
            .ok_or_else(|| anyhow!("Time coordinate `{}` not found", dims[0]))?;
        let units = string_attribute(&time_var, "units")
            .ok_or_else(|| anyhow!("Time coordinate `{}` has no units", dims[0]))?;
        let calendar = string_attribute(&time_var, "calendar");
        let axis = TimeAxis::parse(&units, calendar.as_deref())?;
        let times = time_var
            .get_values::<f64, _>(..)?
            .into_iter()
            .map(|v| axis.decode(v))
            .collect::<Result<Vec<_>>>()?;

        let latitudes = read_coordinate(&file, &dims[1])?;
        let longitudes = read_coordinate(&file, &dims[2])?;

        let scale = numeric_attribute(&var, "scale_factor").unwrap_or(1.0);
        let offset = numeric_attribute(&var, "add_offset").unwrap_or(0.0);
        let fills: Vec<f64> = ["_FillValue", "missing_value"]
            .iter()
            .filter_map(|attr| numeric_attribute(&var, attr))
            .collect();

        Ok(NetcdfGrid {
            name: name.to_string(),
            times,
            latitudes,
            longitudes,
            scale,
            offset,
            fills,
            file,
        })
    }

    fn unpack(&self, raw: f64) -> f32 {
        if raw.is_nan() || self.fills.iter().any(|f| (raw - f).abs() <= f.abs() * 1e-6) {
            f32::NAN
        } else {
            (raw * self.scale + self.offset) as f32
        }
    }
}

#[cfg(feature = "netcdf")]
impl GridSource for NetcdfGrid {
    fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    fn read(&self, steps: Range<usize>) -> Result<Grid> {
        let var = self
            .file
            .variable(&self.name)
            .ok_or_else(|| anyhow::anyhow!("Variable `{}` disappeared", self.name))?;
        let values = var
            .get_values::<f64, _>((steps.clone(), .., ..))?
            .into_iter()
            .map(|raw| self.unpack(raw))
            .collect();

        Grid::new(
            self.times[steps].to_vec(),
            self.latitudes.clone(),
            self.longitudes.clone(),
            values,
        )
    }
}

#[cfg(feature = "netcdf")]
fn read_coordinate(file: &::netcdf::File, name: &str) -> Result<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| anyhow::anyhow!("Coordinate `{}` not found", name))?;
    Ok(var.get_values::<f64, _>(..)?)
}

#[cfg(feature = "netcdf")]
fn numeric_attribute(var: &::netcdf::Variable, name: &str) -> Option<f64> {
    use ::netcdf::AttributeValue;

    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Schar(v) => Some(v as f64),
        _ => None,
    }
}

#[cfg(feature = "netcdf")]
fn string_attribute(var: &::netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        ::netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

#[cfg(not(feature = "netcdf"))]
pub struct NetcdfGrid(std::convert::Infallible);

#[cfg(not(feature = "netcdf"))]
impl NetcdfGrid {
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        anyhow::bail!(
            "Cannot read `{}` from `{}`: built without NetCDF support (enable the `netcdf` feature)",
            name,
            path.display()
        )
    }
}

#[cfg(not(feature = "netcdf"))]
impl GridSource for NetcdfGrid {
    fn times(&self) -> &[NaiveDateTime] {
        match self.0 {}
    }

    fn read(&self, _steps: Range<usize>) -> Result<Grid> {
        match self.0 {}
    }
}

// -- Tests -------------------------------------------------------------------


#[cfg(all(test, feature = "netcdf"))]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;

    const FILL: i16 = -32767;

    /// Two days of packed temperatures on a 2 x 3 grid, ERA5 style: latitude
    /// north to south, values stored as `i16` with scale and offset.
    fn write_packed(path: &Path) {
        let mut file = ::netcdf::create(path).unwrap();
        file.add_dimension("time", 2).unwrap();
        file.add_dimension("latitude", 2).unwrap();
        file.add_dimension("longitude", 3).unwrap();

        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "hours since 2023-04-01 00:00:00").unwrap();
        time.put_attribute("calendar", "standard").unwrap();
        time.put_values(&[0.0, 30.0], ..).unwrap();

        let mut latitude = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
        latitude.put_values(&[10.0, 0.0], ..).unwrap();

        let mut longitude = file.add_variable::<f64>("longitude", &["longitude"]).unwrap();
        longitude.put_values(&[0.0, 10.0, 20.0], ..).unwrap();

        let mut t2m = file
            .add_variable::<i16>("t2m", &["time", "latitude", "longitude"])
            .unwrap();
        t2m.put_attribute("_FillValue", FILL).unwrap();
        t2m.put_attribute("missing_value", -9999i16).unwrap();
        t2m.put_attribute("scale_factor", 0.5f64).unwrap();
        t2m.put_attribute("add_offset", 273.0f64).unwrap();
        t2m.put_values(
            &[
                0i16, 2, 4, //
                6, FILL, 10, //
                20, -9999, 24, //
                26, 28, 30,
            ],
            ..,
        )
        .unwrap();
    }

    #[test]
    fn should_read_coordinates_and_time_axis() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.nc");
        write_packed(&path);

        let grid = NetcdfGrid::open(&path, "t2m").unwrap();

        let day = |d, h| NaiveDate::from_ymd_opt(2023, 4, d).unwrap().and_hms_opt(h, 0, 0).unwrap();
        assert_eq!(grid.times(), &[day(1, 0), day(2, 6)]);
        assert_eq!(grid.latitudes, vec![10.0, 0.0]);
        assert_eq!(grid.longitudes, vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn should_unpack_and_mask_selected_steps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.nc");
        write_packed(&path);
        let grid = NetcdfGrid::open(&path, "t2m").unwrap();

        let first = grid.read(0..1).unwrap();
        let second = grid.read(1..2).unwrap();

        assert_eq!(first.times.len(), 1);
        assert_eq!(first.values[0], 273.0);
        assert_eq!(first.values[1], 274.0);
        assert!(first.values[4].is_nan());
        assert_eq!(first.values[5], 278.0);
        assert_eq!(second.values[0], 283.0);
        assert!(second.values[1].is_nan());
        assert_eq!(second.values[5], 288.0);
    }

    #[test]
    fn should_fail_on_missing_variable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.nc");
        write_packed(&path);

        assert!(NetcdfGrid::open(&path, "tp").is_err());
    }
}
