use arrow::{
    array::{ArrayRef, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use csv::Writer;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::{basic::Compression, file::properties::WriterProperties};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    common::{ensure_parent_dir, tmp_path_for},
    error::{PipelineError, Result},
    normalize::{CellValue, NormalizedTable},
};

const PARQUET_BATCH_ROWS: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|x| x.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            _ => Err(PipelineError::Config(format!(
                "unsupported output extension for {}; use .csv or .parquet",
                path.display()
            ))),
        }
    }
}

/// `<input stem>-created.csv` next to the input.
pub fn default_output_path(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|x| x.to_str())
        .unwrap_or("cases");
    input_path.with_file_name(format!("{stem}-created.csv"))
}

pub fn write_table(
    table: &NormalizedTable,
    output_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(table, output_path),
        OutputFormat::Parquet => write_parquet(table, output_path),
    }?;
    tracing::info!(rows = table.rows.len(), path = %output_path.display(), "Wrote created cases");
    Ok(())
}

fn write_csv(table: &NormalizedTable, output_path: &Path) -> Result<()> {
    ensure_parent_dir(output_path)?;
    let tmp_path = tmp_path_for(output_path, "cases.csv");

    let mut writer = Writer::from_path(&tmp_path)?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.values().iter().map(CellValue::render))?;
    }
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp_path, output_path)?;
    Ok(())
}

fn parquet_error(context: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Parquet(format!("{context}: {err}"))
}

/// Streaming Parquet writer for all-string tables; empty cells are written as nulls.
struct StringParquetWriter {
    output_path: PathBuf,
    tmp_path: PathBuf,
    schema: Arc<Schema>,
    writer: ArrowWriter<File>,
    builders: Vec<StringBuilder>,
    rows_in_batch: usize,
}

impl StringParquetWriter {
    fn try_new(output_path: &Path, columns: &[&str]) -> Result<Self> {
        ensure_parent_dir(output_path)?;
        let tmp_path = tmp_path_for(output_path, "cases.parquet");

        let fields: Vec<Field> = columns
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let file = File::create(&tmp_path)?;
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))
            .map_err(|err| parquet_error("creating writer", err))?;
        let builders = (0..columns.len()).map(|_| StringBuilder::new()).collect();

        Ok(Self {
            output_path: output_path.to_path_buf(),
            tmp_path,
            schema,
            writer,
            builders,
            rows_in_batch: 0,
        })
    }

    fn push_row(&mut self, values: &[CellValue]) -> Result<()> {
        if values.len() != self.builders.len() {
            return Err(PipelineError::Parquet(format!(
                "expected {} columns, got {}",
                self.builders.len(),
                values.len()
            )));
        }
        for (builder, value) in self.builders.iter_mut().zip(values) {
            match value {
                CellValue::Empty => builder.append_null(),
                other => builder.append_value(other.render()),
            }
        }
        self.rows_in_batch += 1;
        if self.rows_in_batch >= PARQUET_BATCH_ROWS {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.flush_batch()?;
        self.writer
            .close()
            .map_err(|err| parquet_error("closing writer", err))?;
        fs::rename(&self.tmp_path, &self.output_path)?;
        Ok(())
    }

    fn abort(self) {
        let _ = self.writer.close();
        let _ = fs::remove_file(&self.tmp_path);
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.rows_in_batch == 0 {
            return Ok(());
        }
        let arrays: Vec<ArrayRef> = self
            .builders
            .iter_mut()
            .map(|b| Arc::new(b.finish()) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .map_err(|err| parquet_error("building record batch", err))?;
        self.writer
            .write(&batch)
            .map_err(|err| parquet_error("writing record batch", err))?;
        self.rows_in_batch = 0;
        Ok(())
    }
}

fn write_parquet(table: &NormalizedTable, output_path: &Path) -> Result<()> {
    let mut writer = StringParquetWriter::try_new(output_path, &table.columns)?;
    for row in &table.rows {
        if let Err(err) = writer.push_row(row.values()) {
            writer.abort();
            return Err(err);
        }
    }
    writer.finish()
}
