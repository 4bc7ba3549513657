//! Flattens the export-job payload into a fixed table.
//!
//! Stages, applied in order:
//! 1. nulls and absent scalars become [`CellValue::Empty`], nested objects are flattened
//!    into `parent_child` keys;
//! 2. the `documents` array is unnested into `documents_<field>` columns, one row per
//!    document, keeping records that have none;
//! 3. cells are typed per column, platform date-times becoming `DateTime<Utc>`;
//! 4. the person-type code loses its category prefix and is lower-cased;
//! 5. cells are laid out in the canonical column order.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::{
    constants::PERSON_TYPE_PREFIX,
    error::{PipelineError, Result},
};

pub const NESTED_SEPARATOR: &str = "_";
pub const DOCUMENTS_KEY: &str = "documents";
const DOCUMENT_FIELDS: &[&str] = &["type", "number"];
const PAYLOAD_ENDPOINT: &str = "export download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Number,
    DateTime,
    PersonType,
}

struct ColumnSpec {
    name: &'static str,
    /// Flattened source key.
    source: &'static str,
    kind: ColumnKind,
}

const fn col(name: &'static str, source: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, source, kind }
}

const CANONICAL_COLUMNS: &[ColumnSpec] = &[
    col("id", "id", ColumnKind::Text),
    col("visual_id", "visualId", ColumnKind::Text),
    col("type", "type", ColumnKind::PersonType),
    col("classification", "classification", ColumnKind::Text),
    col("first_name", "firstName", ColumnKind::Text),
    col("middle_name", "middleName", ColumnKind::Text),
    col("last_name", "lastName", ColumnKind::Text),
    col("gender", "gender", ColumnKind::Text),
    col("dob", "dob", ColumnKind::DateTime),
    col("age_years", "age_years", ColumnKind::Number),
    col("age_months", "age_months", ColumnKind::Number),
    col("date_of_onset", "dateOfOnset", ColumnKind::DateTime),
    col("date_of_reporting", "dateOfReporting", ColumnKind::DateTime),
    col("documents_type", "documents_type", ColumnKind::Text),
    col("documents_number", "documents_number", ColumnKind::Text),
    col("outbreak_id", "outbreakId", ColumnKind::Text),
    col("created_on", "createdOn", ColumnKind::Text),
    col("notes", "notes", ColumnKind::Text),
    col("created_at", "createdAt", ColumnKind::DateTime),
    col("created_by", "createdBy", ColumnKind::Text),
    col("updated_at", "updatedAt", ColumnKind::DateTime),
    col("updated_by", "updatedBy", ColumnKind::Text),
];

pub fn canonical_columns() -> Vec<&'static str> {
    CANONICAL_COLUMNS.iter().map(|c| c.name).collect()
}

fn column_index(name: &str) -> Option<usize> {
    CANONICAL_COLUMNS.iter().position(|c| c.name == name)
}

/// One typed cell. `Empty` is the marker for missing or null values.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    DateTime(DateTime<Utc>),
}

impl CellValue {
    /// Text form used by the file writers; `Empty` renders as "".
    pub fn render(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::DateTime(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// One output row; values follow [`canonical_columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    values: Vec<CellValue>,
}

impl NormalizedRecord {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        column_index(column).and_then(|idx| self.values.get(idx))
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<&'static str>,
    pub rows: Vec<NormalizedRecord>,
}

/// Either a table or the explicit marker that the job produced nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    NoRecords,
    Records(NormalizedTable),
}

type FlatRow = HashMap<String, Option<Value>>;

struct FlatDocument {
    scalars: FlatRow,
    documents: Vec<FlatRow>,
}

fn flatten_into(prefix: &str, object: &Map<String, Value>, out: &mut FlatRow) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{NESTED_SEPARATOR}{key}")
        };
        match value {
            Value::Null => {
                out.insert(name, None);
            }
            Value::Object(inner) => flatten_into(&name, inner, out),
            // Other repeating structures are not part of the output.
            Value::Array(_) => {}
            scalar => {
                out.insert(name, Some(scalar.clone()));
            }
        }
    }
}

/// Stage 1.
fn flatten_document(idx: usize, doc: &Value) -> Result<FlatDocument> {
    let Value::Object(object) = doc else {
        return Err(PipelineError::decode(
            PAYLOAD_ENDPOINT,
            format!("record {idx} is not an object"),
        ));
    };

    let mut scalars = FlatRow::new();
    flatten_into("", object, &mut scalars);

    let documents = match object.get(DOCUMENTS_KEY) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(|item| {
                let mut flat = FlatRow::new();
                flatten_into("", item, &mut flat);
                flat
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(FlatDocument { scalars, documents })
}

/// Stage 2.
fn unnest_documents(doc: FlatDocument) -> Vec<FlatRow> {
    let nested_key = |field: &str| format!("{DOCUMENTS_KEY}{NESTED_SEPARATOR}{field}");

    if doc.documents.is_empty() {
        let mut row = doc.scalars;
        for field in DOCUMENT_FIELDS {
            row.insert(nested_key(field), None);
        }
        return vec![row];
    }

    doc.documents
        .into_iter()
        .map(|mut document| {
            let mut row = doc.scalars.clone();
            for field in DOCUMENT_FIELDS {
                row.insert(nested_key(field), document.remove(*field).flatten());
            }
            row
        })
        .collect()
}

pub fn parse_platform_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn type_error(column: &str, value: &Value, expected: &str) -> PipelineError {
    PipelineError::decode(
        PAYLOAD_ENDPOINT,
        format!("column {column}: expected {expected}, got {value}"),
    )
}

/// Stage 3.
fn type_cell(spec: &ColumnSpec, value: Option<&Value>) -> Result<CellValue> {
    let Some(value) = value else {
        return Ok(CellValue::Empty);
    };
    match (spec.kind, value) {
        (ColumnKind::Text | ColumnKind::PersonType, Value::String(s)) if s.trim().is_empty() => {
            Ok(CellValue::Empty)
        }
        (ColumnKind::Text | ColumnKind::PersonType, Value::String(s)) => {
            Ok(CellValue::Text(s.clone()))
        }
        (ColumnKind::Text | ColumnKind::PersonType, other) => Ok(CellValue::Text(other.to_string())),
        (ColumnKind::Number, Value::Number(n)) => n
            .as_f64()
            .map(CellValue::Number)
            .ok_or_else(|| type_error(spec.name, value, "a number")),
        (ColumnKind::Number, Value::String(s)) if s.trim().is_empty() => Ok(CellValue::Empty),
        (ColumnKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(CellValue::Number)
            .map_err(|_| type_error(spec.name, value, "a number")),
        (ColumnKind::DateTime, Value::String(s)) if s.trim().is_empty() => Ok(CellValue::Empty),
        (ColumnKind::DateTime, Value::String(s)) => parse_platform_datetime(s)
            .map(CellValue::DateTime)
            .ok_or_else(|| type_error(spec.name, value, "a date-time")),
        (_, other) => Err(type_error(spec.name, other, "a scalar")),
    }
}

/// Stage 4.
fn strip_person_type(cell: CellValue) -> CellValue {
    match cell {
        CellValue::Text(code) => {
            let short = code.strip_prefix(PERSON_TYPE_PREFIX).unwrap_or(&code);
            CellValue::Text(short.to_lowercase())
        }
        other => other,
    }
}

/// Stages 3 to 5 for one unnested row.
fn finish_row(row: &FlatRow) -> Result<NormalizedRecord> {
    let values = CANONICAL_COLUMNS
        .iter()
        .map(|spec| {
            let cell = type_cell(spec, row.get(spec.source).and_then(Option::as_ref))?;
            Ok(match spec.kind {
                ColumnKind::PersonType => strip_person_type(cell),
                _ => cell,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(NormalizedRecord { values })
}

fn payload_documents(payload: &Value) -> Result<Vec<&Value>> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(_) => Ok(vec![payload]),
        other => Err(PipelineError::decode(
            PAYLOAD_ENDPOINT,
            format!("expected a JSON array of records, got {other}"),
        )),
    }
}

/// Normalize a downloaded export payload.
pub fn normalize_payload(payload: &Value) -> Result<NormalizeOutcome> {
    let documents = payload_documents(payload)?;
    if documents.is_empty() {
        return Ok(NormalizeOutcome::NoRecords);
    }

    let mut rows = Vec::with_capacity(documents.len());
    for (idx, doc) in documents.into_iter().enumerate() {
        for flat in unnest_documents(flatten_document(idx, doc)?) {
            rows.push(finish_row(&flat)?);
        }
    }
    tracing::debug!(rows = rows.len(), "Normalized export payload");
    Ok(NormalizeOutcome::Records(NormalizedTable {
        columns: canonical_columns(),
        rows,
    }))
}
