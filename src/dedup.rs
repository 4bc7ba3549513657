//! Duplicate screening ahead of case creation.
//!
//! The matching itself is delegated to a [`DedupMatcher`]; the guard only restricts the
//! lookup to the date window, asks for labels and filters on them.

use async_trait::async_trait;

use crate::{
    config::{BirthColumn, DateWindow, FieldCombination, MatchMethod, SchemaMapping},
    error::{PipelineError, Result},
    source::{LookupRecord, LookupTable, SourceRow, parse_date},
};

/// Label a matcher assigns to one input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { existing_id: String },
    NoMatch,
}

/// What the caller asked the matcher to compare.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub mapping: &'a SchemaMapping,
    pub combination: FieldCombination,
    pub method: MatchMethod,
    pub window: DateWindow,
}

/// Classifies input rows against existing records.
///
/// Implementations must return exactly one outcome per row, in row order.
#[async_trait]
pub trait DedupMatcher: Send + Sync {
    async fn classify(
        &self,
        rows: &[SourceRow],
        lookup: &LookupTable,
        request: &MatchRequest<'_>,
    ) -> Result<Vec<MatchOutcome>>;
}

/// Case-insensitive comparison of names plus date of birth or age.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

fn normalize_name(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn same_name(row_value: Option<&str>, existing: Option<&str>) -> bool {
    match (row_value, existing) {
        (Some(a), Some(b)) => {
            let a = normalize_name(a);
            !a.is_empty() && a == normalize_name(b)
        }
        _ => false,
    }
}

impl ExactMatcher {
    fn matches(row: &SourceRow, record: &LookupRecord, request: &MatchRequest<'_>) -> bool {
        let mapping = request.mapping;
        if !same_name(row.get(&mapping.first_name), record.first_name.as_deref())
            || !same_name(row.get(&mapping.last_name), record.last_name.as_deref())
        {
            return false;
        }
        match (&mapping.birth, request.combination) {
            (BirthColumn::DateOfBirth(column), FieldCombination::NamesDob) => {
                let dob = row.get(column).and_then(parse_date);
                dob.is_some() && dob == record.dob
            }
            (BirthColumn::AgeYears(column), FieldCombination::NamesAge) => {
                let age = row.get(column).and_then(|v| v.parse::<u32>().ok());
                age.is_some() && age == record.age_years
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DedupMatcher for ExactMatcher {
    async fn classify(
        &self,
        rows: &[SourceRow],
        lookup: &LookupTable,
        request: &MatchRequest<'_>,
    ) -> Result<Vec<MatchOutcome>> {
        if request.method != MatchMethod::Exact {
            return Err(PipelineError::Matcher(
                "the built-in matcher only supports exact matching".to_string(),
            ));
        }
        Ok(rows
            .iter()
            .map(|row| {
                lookup
                    .records
                    .iter()
                    .find(|record| Self::matches(row, record, request))
                    .map_or(MatchOutcome::NoMatch, |record| MatchOutcome::Matched {
                        existing_id: record.visual_id.clone().unwrap_or_else(|| record.id.clone()),
                    })
            })
            .collect())
    }
}

/// A row the guard held back because it already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedRow {
    pub row: SourceRow,
    pub existing_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Screening {
    /// Rows labelled "no match", in input order.
    pub new_rows: Vec<SourceRow>,
    pub blocked: Vec<BlockedRow>,
}

/// Run `matcher` over `rows` and keep only those it reports as new.
///
/// An absent or (after windowing) empty lookup lets every row through without calling the
/// matcher. Matcher failures propagate unchanged.
pub async fn screen_batch(
    matcher: &dyn DedupMatcher,
    rows: Vec<SourceRow>,
    lookup: Option<&LookupTable>,
    request: &MatchRequest<'_>,
) -> Result<Screening> {
    let lookup = match lookup {
        Some(table) => table.restricted_to(&request.window),
        None => LookupTable::default(),
    };
    if lookup.is_empty() {
        tracing::info!(
            rows = rows.len(),
            "Lookup table empty for {}..{}; all rows treated as new",
            request.window.start,
            request.window.end
        );
        return Ok(Screening {
            new_rows: rows,
            blocked: Vec::new(),
        });
    }

    let outcomes = matcher.classify(&rows, &lookup, request).await?;
    if outcomes.len() != rows.len() {
        return Err(PipelineError::Matcher(format!(
            "matcher returned {} labels for {} rows",
            outcomes.len(),
            rows.len()
        )));
    }

    let mut screening = Screening::default();
    for (row, outcome) in rows.into_iter().zip(outcomes) {
        match outcome {
            MatchOutcome::Matched { existing_id } => {
                tracing::debug!(line = row.line, %existing_id, "Row already exists");
                screening.blocked.push(BlockedRow { row, existing_id });
            }
            MatchOutcome::NoMatch => screening.new_rows.push(row),
        }
    }
    tracing::info!(
        new = screening.new_rows.len(),
        blocked = screening.blocked.len(),
        lookup = lookup.len(),
        "Dedup screening done"
    );
    Ok(screening)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceBatch;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mapping() -> SchemaMapping {
        SchemaMapping::new(
            FieldCombination::NamesDob,
            "first",
            "last",
            Some("dob".to_string()),
            None,
            "sampled",
        )
        .unwrap()
    }

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn rows() -> Vec<SourceRow> {
        SourceBatch::from_records(
            vec![
                "first".to_string(),
                "last".to_string(),
                "dob".to_string(),
                "sampled".to_string(),
            ],
            vec![
                vec!["Ana", "Silva", "1990-01-02", "2024-01-20"],
                vec!["Luis", "Moreno", "1985-06-30", "2024-01-21"],
            ]
            .into_iter()
            .map(|r| r.into_iter().map(str::to_string).collect::<Vec<_>>()),
        )
        .rows
    }

    fn existing_ana() -> LookupRecord {
        LookupRecord {
            id: "uuid-1".to_string(),
            visual_id: Some("CASE-0001".to_string()),
            first_name: Some("ANA".to_string()),
            last_name: Some("silva".to_string()),
            dob: NaiveDate::from_ymd_opt(1990, 1, 2),
            age_years: None,
            reference_date: NaiveDate::from_ymd_opt(2024, 1, 15),
        }
    }

    struct CountingMatcher(AtomicUsize);

    #[async_trait]
    impl DedupMatcher for CountingMatcher {
        async fn classify(
            &self,
            rows: &[SourceRow],
            _lookup: &LookupTable,
            _request: &MatchRequest<'_>,
        ) -> Result<Vec<MatchOutcome>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![MatchOutcome::NoMatch; rows.len()])
        }
    }

    struct FailingMatcher;

    #[async_trait]
    impl DedupMatcher for FailingMatcher {
        async fn classify(
            &self,
            _rows: &[SourceRow],
            _lookup: &LookupTable,
            _request: &MatchRequest<'_>,
        ) -> Result<Vec<MatchOutcome>> {
            Err(PipelineError::Matcher("service unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn exact_matcher_blocks_existing_subject() {
        let mapping = mapping();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesDob,
            method: MatchMethod::Exact,
            window: window(),
        };
        let lookup = LookupTable::new(vec![existing_ana()]);

        let screening = screen_batch(&ExactMatcher, rows(), Some(&lookup), &request)
            .await
            .unwrap();
        assert_eq!(screening.new_rows.len(), 1);
        assert_eq!(screening.new_rows[0].get("first"), Some("Luis"));
        assert_eq!(screening.blocked[0].existing_id, "CASE-0001");
    }

    #[tokio::test]
    async fn lookup_outside_window_lets_everything_through() {
        let mapping = mapping();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesDob,
            method: MatchMethod::Exact,
            window: window(),
        };
        let mut old = existing_ana();
        old.reference_date = NaiveDate::from_ymd_opt(2023, 6, 1);
        let lookup = LookupTable::new(vec![old]);
        let matcher = CountingMatcher(AtomicUsize::new(0));

        let screening = screen_batch(&matcher, rows(), Some(&lookup), &request)
            .await
            .unwrap();
        assert_eq!(screening.new_rows.len(), 2);
        assert_eq!(matcher.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn absent_lookup_skips_matcher() {
        let mapping = mapping();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesDob,
            method: MatchMethod::Fuzzy,
            window: window(),
        };
        let screening = screen_batch(&FailingMatcher, rows(), None, &request)
            .await
            .unwrap();
        assert_eq!(screening.new_rows.len(), 2);
        assert!(screening.blocked.is_empty());
    }

    struct ShortMatcher;

    #[async_trait]
    impl DedupMatcher for ShortMatcher {
        async fn classify(
            &self,
            _rows: &[SourceRow],
            _lookup: &LookupTable,
            _request: &MatchRequest<'_>,
        ) -> Result<Vec<MatchOutcome>> {
            Ok(vec![MatchOutcome::NoMatch])
        }
    }

    #[tokio::test]
    async fn label_count_mismatch_is_matcher_error() {
        let mapping = mapping();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesDob,
            method: MatchMethod::Exact,
            window: window(),
        };
        let lookup = LookupTable::new(vec![existing_ana()]);
        let err = screen_batch(&ShortMatcher, rows(), Some(&lookup), &request)
            .await
            .unwrap_err();
        match err {
            PipelineError::Matcher(message) => assert!(message.contains("1 labels for 2 rows")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn matcher_failure_propagates() {
        let mapping = mapping();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesDob,
            method: MatchMethod::Fuzzy,
            window: window(),
        };
        let lookup = LookupTable::new(vec![existing_ana()]);
        let err = screen_batch(&FailingMatcher, rows(), Some(&lookup), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Matcher(_)));
    }

    #[tokio::test]
    async fn exact_matcher_refuses_fuzzy_requests() {
        let mapping = mapping();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesDob,
            method: MatchMethod::Fuzzy,
            window: window(),
        };
        let lookup = LookupTable::new(vec![existing_ana()]);
        let err = ExactMatcher
            .classify(&rows(), &lookup, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Matcher(_)));
    }

    #[tokio::test]
    async fn age_combination_compares_years() {
        let mapping = SchemaMapping::new(
            FieldCombination::NamesAge,
            "first",
            "last",
            None,
            Some("age".to_string()),
            "sampled",
        )
        .unwrap();
        let request = MatchRequest {
            mapping: &mapping,
            combination: FieldCombination::NamesAge,
            method: MatchMethod::Exact,
            window: window(),
        };
        let batch = SourceBatch::from_records(
            vec!["first".to_string(), "last".to_string(), "age".to_string()],
            vec![
                vec!["Ana".to_string(), "Silva".to_string(), "34".to_string()],
                vec!["Ana".to_string(), "Silva".to_string(), "35".to_string()],
            ],
        );
        let mut existing = existing_ana();
        existing.dob = None;
        existing.age_years = Some(34);
        let lookup = LookupTable::new(vec![existing]);

        let outcomes = ExactMatcher
            .classify(&batch.rows, &lookup, &request)
            .await
            .unwrap();
        assert!(matches!(outcomes[0], MatchOutcome::Matched { .. }));
        assert_eq!(outcomes[1], MatchOutcome::NoMatch);
    }
}
