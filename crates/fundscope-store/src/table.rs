//! Format-agnostic tabular view of a persisted snapshot.
//!
//! Cells are kept as optional strings: blank cells become `None`, and
//! numeric interpretation is left to the caller.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use arrow::array::Array;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Csv,
    Parquet,
    Json,
}

impl SnapshotFormat {
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" | "pq" => Ok(Self::Parquet),
            "json" => Ok(Self::Json),
            _ => Err(StoreError::UnsupportedFormat { extension }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl SnapshotTable {
    /// Builds a table, padding or truncating each row to the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, None);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Loads a snapshot file, dispatching on its extension.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        match SnapshotFormat::from_path(path)? {
            SnapshotFormat::Csv => Self::from_csv_reader(File::open(path)?),
            SnapshotFormat::Json => {
                let mut raw = String::new();
                File::open(path)?.read_to_string(&mut raw)?;
                Self::from_json_str(&raw)
            }
            SnapshotFormat::Parquet => Self::from_parquet(File::open(path)?),
        }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, StoreError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns = reader.headers()?.iter().map(|h| h.trim().to_owned()).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(cell).collect());
        }
        Ok(Self::new(columns, rows))
    }

    /// Accepts an array of records, or an object wrapping one under
    /// `holdings`/`data`/`records`.
    pub fn from_json_str(raw: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(raw)?;
        let records = match &value {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => ["holdings", "data", "records"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };

        let mut columns: Vec<String> = Vec::new();
        for record in records {
            if let Value::Object(map) = record {
                for key in map.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(Value::as_object)
            .map(|map| {
                columns
                    .iter()
                    .map(|column| map.get(column).and_then(json_cell))
                    .collect()
            })
            .collect();

        Ok(Self::new(columns, rows))
    }

    pub fn from_parquet(file: File) -> Result<Self, StoreError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|err| StoreError::Parquet(err.to_string()))?;
        let columns = builder
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();
        let reader = builder
            .build()
            .map_err(|err| StoreError::Parquet(err.to_string()))?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|err| StoreError::Parquet(err.to_string()))?;
            for row in 0..batch.num_rows() {
                let mut cells = Vec::with_capacity(batch.num_columns());
                for column in batch.columns() {
                    if column.is_null(row) {
                        cells.push(None);
                        continue;
                    }
                    let rendered = array_value_to_string(column, row)
                        .map_err(|err| StoreError::Parquet(err.to_string()))?;
                    cells.push(cell(&rendered));
                }
                rows.push(cells);
            }
        }

        Ok(Self::new(columns, rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact name match first, then case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|column| column.eq_ignore_ascii_case(name))
            })
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row.get(index).and_then(|v| v.as_deref())).collect())
    }
}

fn cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn json_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => cell(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}
