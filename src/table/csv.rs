//! CSV encoding of an extract. Missing values are written as `NA`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;

use super::{Extract, Row, LATITUDE, LONGITUDE, TIME};

const MISSING: &str = "NA";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn save(extract: &Extract, file_path: &Path) -> Result<()> {
    let mut writer = ::csv::Writer::from_path(file_path)
        .with_context(|| format!("Cannot create `{}`", file_path.display()))?;

    writer.write_record(extract.columns())?;

    for row in &extract.rows {
        let mut record = Vec::with_capacity(3 + row.values.len());
        record.push(row.time.format(DATE_FORMAT).to_string());
        record.push(row.latitude.to_string());
        record.push(row.longitude.to_string());
        for value in &row.values {
            record.push(match value {
                Some(v) => v.to_string(),
                None => MISSING.to_string(),
            });
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn columns(file_path: &Path) -> Result<Vec<String>> {
    let mut reader = ::csv::Reader::from_path(file_path)
        .with_context(|| format!("Cannot open `{}`", file_path.display()))?;

    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

pub fn load(file_path: &Path) -> Result<Extract> {
    let mut reader = ::csv::Reader::from_path(file_path)
        .with_context(|| format!("Cannot open `{}`", file_path.display()))?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("Column `{}` not found in `{}`", name, file_path.display()))
    };
    let time_idx = position(TIME)?;
    let lat_idx = position(LATITUDE)?;
    let lon_idx = position(LONGITUDE)?;

    let value_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| ![time_idx, lat_idx, lon_idx].contains(i))
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut extract = Extract::new(value_columns.iter().map(|(_, h)| h.clone()).collect());

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let time = NaiveDate::parse_from_str(field(time_idx), DATE_FORMAT)
            .with_context(|| format!("Bad time on data line {}", line + 1))?;
        let latitude = field(lat_idx)
            .parse::<f32>()
            .with_context(|| format!("Bad latitude on data line {}", line + 1))?;
        let longitude = field(lon_idx)
            .parse::<f32>()
            .with_context(|| format!("Bad longitude on data line {}", line + 1))?;
        let values = value_columns
            .iter()
            .map(|(idx, _)| parse_value(field(*idx)))
            .collect();

        extract.rows.push(Row {
            time,
            latitude,
            longitude,
            values,
        });
    }

    Ok(extract)
}

fn parse_value(s: &str) -> Option<f32> {
    if s.is_empty() || s == MISSING {
        return None;
    }
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::table::test_support::extract_fixture;

    use super::*;

    #[test]
    fn should_write_na_for_missing_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");

        save(&extract_fixture(), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "time,latitude,longitude,tmp");
        assert_eq!(lines[1], "2023-04-01,-90,0,10");
        assert_eq!(lines[8], "2023-04-02,-88.75,1.25,NA");
    }

    #[test]
    fn should_load_written_extract() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        let extract = extract_fixture();

        save(&extract, &path).unwrap();

        assert_eq!(load(&path).unwrap(), extract);
        assert_eq!(columns(&path).unwrap(), extract.columns());
    }

    #[test]
    fn should_fail_on_missing_coordinate_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "time,longitude,tmp\n2023-04-01,0,1\n").unwrap();

        let err = load(&path).unwrap_err();

        assert!(err.to_string().contains("latitude"));
    }

    #[test]
    fn should_parse_values() {
        assert_eq!(parse_value(" "), None);
        assert_eq!(parse_value("NA"), None);
        assert_eq!(parse_value("nan"), None);
        assert_eq!(parse_value("-1.5"), Some(-1.5));
    }
}
