//! Delimited and columnar dumps of the merged table

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::Local;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use serde::Serialize;
use thiserror::Error;

use crate::projection::Projection;
use crate::table::LogTable;

/// File name prefix for snapshot exports
const SNAPSHOT_PREFIX: &str = "traffic_logs";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
}

/// Paths written by one snapshot export
#[derive(Clone, Debug, Default, Serialize)]
pub struct SnapshotFiles {
    pub csv: Option<PathBuf>,
    pub parquet: Option<PathBuf>,
}

/// Render `rows` of `table` as CSV with the projection's columns as header
pub fn render_csv<I>(table: &LogTable, projection: &Projection, rows: I) -> Result<String, SnapshotError>
where
    I: IntoIterator<Item = usize>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_rows(&mut writer, table, projection, rows)?;
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_rows<W, I>(
    writer: &mut csv::Writer<W>,
    table: &LogTable,
    projection: &Projection,
    rows: I,
) -> Result<(), SnapshotError>
where
    W: io::Write,
    I: IntoIterator<Item = usize>,
{
    if projection.columns().is_empty() {
        return Ok(());
    }
    writer.write_record(projection.columns())?;
    for row in rows {
        let fields = projection.text_row(table, row);
        writer.write_record(fields.iter().map(|f| f.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every row of `table` to a CSV file
pub fn write_csv(path: &Path, table: &LogTable) -> Result<(), SnapshotError> {
    let mut writer = csv::Writer::from_path(path)?;
    write_rows(&mut writer, table, &Projection::natural(table), 0..table.len())
}

/// Write every row of `table` to a Parquet file, one nullable string column
/// per table column
pub fn write_parquet(path: &Path, table: &LogTable) -> Result<(), SnapshotError> {
    let projection = Projection::natural(table);
    let fields: Vec<Field> = projection
        .columns()
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let arrays: Vec<ArrayRef> = projection
        .indices()
        .iter()
        .map(|&col| {
            let values: Vec<Option<String>> = (0..table.len())
                .map(|row| table.cell(row, col).and_then(|cell| cell.to_text()))
                .collect();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Export `table` as `traffic_logs_<tag>.csv` and `.parquet` under `dir`.
///
/// Failures are logged and otherwise ignored; the returned paths only list
/// files that were written.
pub fn export_snapshot(table: &LogTable, dir: &Path) -> SnapshotFiles {
    let mut files = SnapshotFiles::default();
    if let Err(e) = fs::create_dir_all(dir) {
        tracing::debug!(dir = %dir.display(), error = %e, "snapshot directory unavailable");
        return files;
    }

    let tag = Local::now().format("%Y%m%d-%H%M%S");
    let csv_path = dir.join(format!("{SNAPSHOT_PREFIX}_{tag}.csv"));
    match write_csv(&csv_path, table) {
        Ok(()) => files.csv = Some(csv_path),
        Err(e) => tracing::debug!(error = %e, "csv snapshot failed"),
    }

    let parquet_path = dir.join(format!("{SNAPSHOT_PREFIX}_{tag}.parquet"));
    match write_parquet(&parquet_path, table) {
        Ok(()) => files.parquet = Some(parquet_path),
        Err(e) => {
            tracing::debug!(error = %e, "parquet snapshot failed");
            let _ = fs::remove_file(&parquet_path);
        }
    }

    files
}
