use std::{path::Path, sync::Arc};

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::{
    config::{DateWindow, SchemaMapping},
    error::{PipelineError, Result},
};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%Y%m%d"];

/// Parse the date spellings found in laboratory extracts and platform payloads.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.date_naive());
    }
    if let Some((date_part, _)) = trimmed.split_once('T') {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            return Some(date);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// One input record. Column order follows the input header.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 1-based position in the input, used in error messages.
    pub line: usize,
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl SourceRow {
    pub fn new(line: usize, columns: Arc<[String]>, values: Vec<String>) -> Self {
        Self {
            line,
            columns,
            values,
        }
    }

    /// Trimmed value of `column`; blank cells read as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values
            .get(idx)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// The full input batch as read from disk.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub header: Vec<String>,
    pub rows: Vec<SourceRow>,
}

impl SourceBatch {
    pub fn from_records<I, R>(header: Vec<String>, records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = String>,
    {
        let columns: Arc<[String]> = header.clone().into();
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(idx, values)| {
                SourceRow::new(idx + 1, Arc::clone(&columns), values.into_iter().collect())
            })
            .collect();
        Self { header, rows }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.header.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn read_source_csv(path: &Path) -> Result<SourceBatch> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let mut values: Vec<String> = record.iter().map(str::to_string).collect();
        values.resize(header.len(), String::new());
        records.push(values);
    }
    tracing::info!(rows = records.len(), path = %path.display(), "Loaded input rows");
    Ok(SourceBatch::from_records(header, records))
}

/// An existing platform record, as far as deduplication needs it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LookupRecord {
    pub id: String,
    pub visual_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub age_years: Option<u32>,
    /// Date the record was reported; the date window applies to it.
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    pub records: Vec<LookupRecord>,
}

impl LookupTable {
    pub fn new(records: Vec<LookupRecord>) -> Self {
        Self { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records whose reference date falls inside `window`. Undated records are dropped.
    pub fn restricted_to(&self, window: &DateWindow) -> LookupTable {
        let undated = self
            .records
            .iter()
            .filter(|r| r.reference_date.is_none())
            .count();
        if undated > 0 {
            tracing::warn!(
                undated,
                total = self.records.len(),
                "Existing records without a reporting date are ignored by duplicate screening"
            );
        }
        let records = self
            .records
            .iter()
            .filter(|r| r.reference_date.is_some_and(|d| window.contains(d)))
            .cloned()
            .collect();
        LookupTable { records }
    }
}

const LOOKUP_DATE_COLUMN: &str = "date_of_reporting";

#[derive(Debug, Deserialize)]
struct LookupCsvRow {
    id: String,
    #[serde(default)]
    visual_id: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    dob: String,
    #[serde(default)]
    age: String,
    date_of_reporting: String,
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Read a lookup export with columns
/// `id, visual_id, first_name, last_name, dob, age, date_of_reporting`.
pub fn read_lookup_csv(path: &Path) -> Result<LookupTable> {
    let mut reader = csv::Reader::from_path(path)?;
    if !reader
        .headers()?
        .iter()
        .any(|h| h.trim() == LOOKUP_DATE_COLUMN)
    {
        return Err(PipelineError::MissingColumn {
            role: "reporting date",
            column: LOOKUP_DATE_COLUMN.to_string(),
        });
    }
    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<LookupCsvRow>().enumerate() {
        let row = row?;
        let age_years = match non_blank(row.age) {
            Some(age) => Some(age.parse::<u32>().map_err(|err| PipelineError::InvalidValue {
                row: idx + 1,
                column: "age".to_string(),
                value: age.clone(),
                reason: err.to_string(),
            })?),
            None => None,
        };
        records.push(LookupRecord {
            id: row.id.trim().to_string(),
            visual_id: non_blank(row.visual_id),
            first_name: non_blank(row.first_name),
            last_name: non_blank(row.last_name),
            dob: parse_date(&row.dob),
            age_years,
            reference_date: parse_date(&row.date_of_reporting),
        });
    }
    tracing::info!(records = records.len(), path = %path.display(), "Loaded lookup table");
    Ok(LookupTable::new(records))
}

/// Header names bound by `mapping` that are absent from `batch`.
pub fn missing_bound_columns(
    batch: &SourceBatch,
    mapping: &SchemaMapping,
) -> Vec<(&'static str, String)> {
    mapping
        .bound_columns()
        .into_iter()
        .filter(|(_, column)| !batch.has_column(column))
        .map(|(role, column)| (role, column.to_string()))
        .collect()
}
