//! _parquet_ encoding of an extract: `time` as Date32, coordinates and
//! values as nullable Float32.

use std::{fs::File, path::Path, sync::Arc};

use ::parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};
use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{Array, ArrayRef, Date32Array, Date32Builder, Float32Array, Float32Builder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::{Datelike, NaiveDate};

use crate::cli::create_progress_bar;

use super::{Extract, Row, LATITUDE, LONGITUDE, TIME};

const CHUNK_SIZE: usize = 100_000;

pub fn save(extract: &Extract, file_path: &Path) -> Result<()> {
    let file = File::create(file_path)
        .with_context(|| format!("Cannot create `{}`", file_path.display()))?;
    let schema = schema(&extract.variables);

    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
    let pb = create_progress_bar(extract.len() as u64, "Writing parquet file".to_string());

    let mut builders = Builders::new(extract.variables.len());
    let epoch_offset = epoch_offset();

    for (count, row) in extract.rows.iter().enumerate() {
        builders.push(row, epoch_offset);

        if builders.rows >= CHUNK_SIZE {
            writer.write(&builders.finish(&schema)?)?;
        }
        if (count + 1) % 10_000 == 0 {
            pb.set_position((count + 1) as u64);
        }
    }

    if builders.rows > 0 {
        writer.write(&builders.finish(&schema)?)?;
    }

    pb.finish_with_message("Finished writing parquet file");
    writer.close()?;
    Ok(())
}

pub fn columns(file_path: &Path) -> Result<Vec<String>> {
    let file = File::open(file_path)
        .with_context(|| format!("Cannot open `{}`", file_path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    Ok(builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect())
}

pub fn load(file_path: &Path) -> Result<Extract> {
    let file = File::open(file_path)
        .with_context(|| format!("Cannot open `{}`", file_path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let variables: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| ![TIME, LATITUDE, LONGITUDE].contains(&name.as_str()))
        .collect();
    let mut extract = Extract::new(variables);
    let epoch_offset = epoch_offset();

    for batch in builder.build()? {
        let batch = batch?;

        let times = column::<Date32Array>(&batch, TIME)?;
        let lats = column::<Float32Array>(&batch, LATITUDE)?;
        let lons = column::<Float32Array>(&batch, LONGITUDE)?;
        let values = extract
            .variables
            .iter()
            .map(|name| column::<Float32Array>(&batch, name))
            .collect::<Result<Vec<_>>>()?;

        for i in 0..batch.num_rows() {
            let time = NaiveDate::from_num_days_from_ce_opt(times.value(i) + epoch_offset)
                .ok_or_else(|| anyhow!("Date out of range in `{}`", file_path.display()))?;

            extract.rows.push(Row {
                time,
                latitude: lats.value(i),
                longitude: lons.value(i),
                values: values
                    .iter()
                    .map(|array| (!array.is_null(i)).then(|| array.value(i)))
                    .collect(),
            });
        }
    }

    Ok(extract)
}

fn schema(variables: &[String]) -> Arc<Schema> {
    let mut fields = vec![
        Field::new(TIME, DataType::Date32, false),
        Field::new(LATITUDE, DataType::Float32, false),
        Field::new(LONGITUDE, DataType::Float32, false),
    ];
    fields.extend(
        variables
            .iter()
            .map(|name| Field::new(name, DataType::Float32, true)),
    );

    Arc::new(Schema::new(fields))
}

fn epoch_offset() -> i32 {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .map(|d| d.num_days_from_ce())
        .unwrap_or(719_163)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("Column `{}` missing or of unexpected type", name))
}

struct Builders {
    time: Date32Builder,
    latitude: Float32Builder,
    longitude: Float32Builder,
    values: Vec<Float32Builder>,
    rows: usize,
}

impl Builders {
    fn new(variables: usize) -> Self {
        Builders {
            time: Date32Builder::with_capacity(CHUNK_SIZE),
            latitude: Float32Builder::with_capacity(CHUNK_SIZE),
            longitude: Float32Builder::with_capacity(CHUNK_SIZE),
            values: (0..variables)
                .map(|_| Float32Builder::with_capacity(CHUNK_SIZE))
                .collect(),
            rows: 0,
        }
    }

    fn push(&mut self, row: &Row, epoch_offset: i32) {
        self.time
            .append_value(row.time.num_days_from_ce() - epoch_offset);
        self.latitude.append_value(row.latitude);
        self.longitude.append_value(row.longitude);
        for (builder, value) in self.values.iter_mut().zip(&row.values) {
            builder.append_option(*value);
        }
        self.rows += 1;
    }

    fn finish(&mut self, schema: &Arc<Schema>) -> Result<RecordBatch> {
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(self.time.finish()),
            Arc::new(self.latitude.finish()),
            Arc::new(self.longitude.finish()),
        ];
        columns.extend(
            self.values
                .iter_mut()
                .map(|builder| Arc::new(builder.finish()) as ArrayRef),
        );
        self.rows = 0;

        Ok(RecordBatch::try_new(schema.clone(), columns)?)
    }
}

// -- Tests -------------------------------------------------------------------
