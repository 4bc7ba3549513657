use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{
    config::{BirthColumn, CaseDefaults, SchemaMapping},
    error::{PipelineError, Result},
    identifier::{IdentifierGenerator, MAX_BATCH_SIZE},
    source::{SourceRow, parse_date},
};

/// Dates are sent as UTC midnight with millisecond precision.
pub fn encode_date(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeYears {
    pub years: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
}

/// One case as the platform expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationCandidate {
    pub visual_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<AgeYears>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    pub date_of_onset: String,
    pub date_of_reporting: String,
    pub classification: String,
    pub created_on: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<CaseDocument>,
    /// Input line the candidate came from.
    #[serde(skip)]
    pub source_line: usize,
}

/// Non-empty, ordered set of candidates sent as one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationBatch {
    candidates: Vec<CreationCandidate>,
}

impl CreationBatch {
    /// `None` for an empty candidate list: nothing is submitted in that case.
    pub fn new(candidates: Vec<CreationCandidate>) -> Option<Self> {
        (!candidates.is_empty()).then_some(Self { candidates })
    }

    pub fn candidates(&self) -> &[CreationCandidate] {
        &self.candidates
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.visual_id.as_str()).collect()
    }

    /// Compact JSON array body.
    pub fn to_request_body(&self) -> Result<String> {
        serde_json::to_string(&self.candidates)
            .map_err(|err| PipelineError::Config(format!("failed serializing cases: {err}")))
    }
}

pub struct RequestBuilder<'a> {
    mapping: &'a SchemaMapping,
    defaults: &'a CaseDefaults,
    reporting_date: String,
    identifiers: IdentifierGenerator,
}

fn check_batch_size(rows: &[SourceRow]) -> Result<()> {
    if rows.len() > MAX_BATCH_SIZE {
        return Err(PipelineError::Config(format!(
            "{} rows in one batch; split the input into batches of at most {MAX_BATCH_SIZE}",
            rows.len()
        )));
    }
    Ok(())
}

fn required<'r>(row: &'r SourceRow, column: &str) -> Result<&'r str> {
    row.get(column).ok_or_else(|| PipelineError::InvalidValue {
        row: row.line,
        column: column.to_string(),
        value: String::new(),
        reason: "value is required".to_string(),
    })
}

fn required_date(row: &SourceRow, column: &str) -> Result<String> {
    let raw = required(row, column)?;
    parse_date(raw)
        .map(encode_date)
        .ok_or_else(|| PipelineError::InvalidValue {
            row: row.line,
            column: column.to_string(),
            value: raw.to_string(),
            reason: "not a recognised date".to_string(),
        })
}

impl<'a> RequestBuilder<'a> {
    /// `batch_time` is captured once per run and drives both the identifier timestamp and
    /// the reporting date.
    pub fn new(
        mapping: &'a SchemaMapping,
        defaults: &'a CaseDefaults,
        user: &str,
        batch_time: DateTime<Utc>,
    ) -> Self {
        Self {
            mapping,
            defaults,
            reporting_date: encode_date(batch_time.date_naive()),
            identifiers: IdentifierGenerator::new(user, batch_time.naive_utc()),
        }
    }

    fn candidate(&mut self, row: &SourceRow) -> Result<CreationCandidate> {
        let mapping = self.mapping;
        let first_name = required(row, &mapping.first_name)?.to_string();
        let last_name = required(row, &mapping.last_name)?.to_string();

        let (dob, age) = match &mapping.birth {
            BirthColumn::DateOfBirth(column) => (Some(required_date(row, column)?), None),
            BirthColumn::AgeYears(column) => {
                let raw = required(row, column)?;
                let years = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0 && *v < 150.0)
                    .ok_or_else(|| PipelineError::InvalidValue {
                        row: row.line,
                        column: column.clone(),
                        value: raw.to_string(),
                        reason: "not an age in years".to_string(),
                    })?;
                (None, Some(AgeYears { years: years.trunc() as u32 }))
            }
        };
        let date_of_onset = required_date(row, &mapping.reference_date)?;

        let gender = mapping
            .gender
            .as_deref()
            .and_then(|c| row.get(c))
            .map(str::to_string);
        let documents = mapping
            .sample_id
            .as_deref()
            .and_then(|c| row.get(c))
            .map(|number| CaseDocument {
                kind: self.defaults.document_type.clone(),
                number: number.to_string(),
            })
            .into_iter()
            .collect();

        Ok(CreationCandidate {
            visual_id: self.identifiers.next_for(&last_name),
            first_name,
            last_name,
            dob,
            age,
            gender,
            date_of_onset,
            date_of_reporting: self.reporting_date.clone(),
            classification: self.defaults.classification.clone(),
            created_on: self.defaults.creation_source.clone(),
            notes: self.defaults.comment.clone(),
            documents,
            source_line: row.line,
        })
    }

    /// Check every row converts cleanly without assigning identifiers for real.
    pub fn validate_rows(
        mapping: &SchemaMapping,
        defaults: &CaseDefaults,
        rows: &[SourceRow],
    ) -> Result<()> {
        check_batch_size(rows)?;
        let mut scratch = RequestBuilder::new(mapping, defaults, "", DateTime::<Utc>::UNIX_EPOCH);
        rows.iter().try_for_each(|row| scratch.candidate(row).map(drop))
    }

    /// Build the batch for rows screened as new. Identifiers follow row order.
    pub fn build(mut self, rows: &[SourceRow]) -> Result<Option<CreationBatch>> {
        check_batch_size(rows)?;
        let candidates = rows
            .iter()
            .map(|row| self.candidate(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(CreationBatch::new(candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FieldCombination, source::SourceBatch};
    use chrono::TimeZone;
    use serde_json::Value;

    fn batch_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 15, 30, 5).unwrap()
    }

    fn dob_mapping() -> SchemaMapping {
        SchemaMapping::new(
            FieldCombination::NamesDob,
            "prenom",
            "nom",
            Some("naissance".to_string()),
            None,
            "prelevement",
        )
        .unwrap()
        .with_sample_id(Some("echantillon".to_string()))
    }

    fn lab_batch(records: Vec<Vec<&str>>) -> SourceBatch {
        SourceBatch::from_records(
            ["prenom", "nom", "naissance", "prelevement", "echantillon", "labo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            records
                .into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect::<Vec<_>>()),
        )
    }

    #[test]
    fn encodes_dates_as_utc_midnight() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(encode_date(date), "2024-01-05T00:00:00.000Z");
    }

    #[test]
    fn renames_columns_and_attaches_context() {
        let mapping = dob_mapping();
        let defaults = CaseDefaults::default();
        let batch = lab_batch(vec![vec![
            "Ana",
            "Silva",
            "02/01/1990",
            "2024-03-01",
            "S-17",
            "Central",
        ]]);

        let request = RequestBuilder::new(&mapping, &defaults, "jdoe", batch_time())
            .build(&batch.rows)
            .unwrap()
            .unwrap();
        let body: Value = serde_json::from_str(&request.to_request_body().unwrap()).unwrap();
        let case = &body[0];

        assert_eq!(case["visualId"], "JD202403071530_SI0001");
        assert_eq!(case["firstName"], "Ana");
        assert_eq!(case["dob"], "1990-01-02T00:00:00.000Z");
        assert_eq!(case["dateOfOnset"], "2024-03-01T00:00:00.000Z");
        assert_eq!(case["dateOfReporting"], "2024-03-07T00:00:00.000Z");
        assert_eq!(case["classification"], defaults.classification.as_str());
        assert_eq!(case["notes"], defaults.comment.as_str());
        assert_eq!(case["documents"][0]["number"], "S-17");
        assert!(case.get("age").is_none());
        assert!(case.get("labo").is_none());
        assert!(case.get("sourceLine").is_none());
    }

    #[test]
    fn body_is_compact_without_scalar_wrapping() {
        let mapping = dob_mapping();
        let defaults = CaseDefaults::default();
        let batch = lab_batch(vec![vec!["Ana", "Silva", "1990-01-02", "2024-03-01", "", ""]]);

        let body = RequestBuilder::new(&mapping, &defaults, "jdoe", batch_time())
            .build(&batch.rows)
            .unwrap()
            .unwrap()
            .to_request_body()
            .unwrap();
        assert!(!body.contains('\n'));
        assert!(body.contains(r#""firstName":"Ana""#));
        assert!(!body.contains("documents"));
    }

    #[test]
    fn age_combination_sends_years_object() {
        let mapping = SchemaMapping::new(
            FieldCombination::NamesAge,
            "first",
            "last",
            None,
            Some("age".to_string()),
            "sampled",
        )
        .unwrap();
        let defaults = CaseDefaults::default();
        let batch = SourceBatch::from_records(
            vec!["first".to_string(), "last".to_string(), "age".to_string(), "sampled".to_string()],
            vec![vec![
                "Luis".to_string(),
                "Moreno".to_string(),
                "38".to_string(),
                "2024-03-02".to_string(),
            ]],
        );
        let request = RequestBuilder::new(&mapping, &defaults, "ana", batch_time())
            .build(&batch.rows)
            .unwrap()
            .unwrap();
        let candidate = &request.candidates()[0];
        assert_eq!(candidate.age, Some(AgeYears { years: 38 }));
        assert_eq!(candidate.dob, None);
    }

    #[test]
    fn invalid_date_fails_before_submission() {
        let mapping = dob_mapping();
        let defaults = CaseDefaults::default();
        let batch = lab_batch(vec![vec!["Ana", "Silva", "soon", "2024-03-01", "", ""]]);
        let err = RequestBuilder::new(&mapping, &defaults, "jdoe", batch_time())
            .build(&batch.rows)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("naissance"));
    }

    #[test]
    fn validation_flags_missing_required_value() {
        let mapping = dob_mapping();
        let defaults = CaseDefaults::default();
        let batch = lab_batch(vec![
            vec!["Ana", "Silva", "1990-01-02", "2024-03-01", "", ""],
            vec!["Luis", "Moreno", "1985-06-30", "", "", ""],
        ]);
        match RequestBuilder::validate_rows(&mapping, &defaults, &batch.rows) {
            Err(PipelineError::InvalidValue { row, column, .. }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "prelevement");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn oversized_batch_is_rejected_before_identifiers_overflow() {
        let mapping = dob_mapping();
        let defaults = CaseDefaults::default();
        let row = vec!["Ana", "Silva", "1990-01-02", "2024-03-01", "", ""];
        let at_limit = lab_batch(vec![row.clone(); MAX_BATCH_SIZE]);
        assert!(RequestBuilder::validate_rows(&mapping, &defaults, &at_limit.rows).is_ok());

        let over = lab_batch(vec![row; MAX_BATCH_SIZE + 1]);
        let err = RequestBuilder::validate_rows(&mapping, &defaults, &over.rows).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        let err = RequestBuilder::new(&mapping, &defaults, "jdoe", batch_time())
            .build(&over.rows)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn no_rows_builds_no_batch() {
        let mapping = dob_mapping();
        let defaults = CaseDefaults::default();
        let built = RequestBuilder::new(&mapping, &defaults, "jdoe", batch_time())
            .build(&[])
            .unwrap();
        assert!(built.is_none());
    }
}
