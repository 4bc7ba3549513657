use std::{fmt, path::PathBuf, time::Duration};

use chrono::{Days, Local, NaiveDate};
use clap::ValueEnum;

use crate::{
    args::Args,
    constants::DEFAULT_WINDOW_DAYS,
    error::{PipelineError, Result},
    output::{OutputFormat, default_output_path},
    source::{SourceBatch, missing_bound_columns},
};

/// Columns used to decide whether a row already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FieldCombination {
    /// First name, last name and date of birth.
    #[value(name = "names-dob")]
    NamesDob,
    /// First name, last name and age in years.
    #[value(name = "names-age")]
    NamesAge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatchMethod {
    Exact,
    Fuzzy,
}

/// Where the subject's age information comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BirthColumn {
    DateOfBirth(String),
    AgeYears(String),
}

impl BirthColumn {
    pub fn column(&self) -> &str {
        match self {
            Self::DateOfBirth(c) | Self::AgeYears(c) => c,
        }
    }

    pub fn combination(&self) -> FieldCombination {
        match self {
            Self::DateOfBirth(_) => FieldCombination::NamesDob,
            Self::AgeYears(_) => FieldCombination::NamesAge,
        }
    }
}

/// Field role → input column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMapping {
    pub first_name: String,
    pub last_name: String,
    pub birth: BirthColumn,
    pub reference_date: String,
    pub gender: Option<String>,
    pub sample_id: Option<String>,
}

impl SchemaMapping {
    /// Build the mapping for `combination`. Exactly one of `dob_column` / `age_column`
    /// must be given, and it must be the one the combination needs.
    pub fn new(
        combination: FieldCombination,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        dob_column: Option<String>,
        age_column: Option<String>,
        reference_date: impl Into<String>,
    ) -> Result<Self> {
        let birth = match (combination, dob_column, age_column) {
            (_, Some(_), Some(_)) => {
                return Err(PipelineError::Config(
                    "supply either a date-of-birth column or an age column, not both".to_string(),
                ));
            }
            (FieldCombination::NamesDob, Some(dob), None) => BirthColumn::DateOfBirth(dob),
            (FieldCombination::NamesAge, None, Some(age)) => BirthColumn::AgeYears(age),
            (FieldCombination::NamesDob, _, _) => {
                return Err(PipelineError::Config(
                    "field combination names-dob requires --dob-column".to_string(),
                ));
            }
            (FieldCombination::NamesAge, _, _) => {
                return Err(PipelineError::Config(
                    "field combination names-age requires --age-column".to_string(),
                ));
            }
        };
        Ok(Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            birth,
            reference_date: reference_date.into(),
            gender: None,
            sample_id: None,
        })
    }

    pub fn with_gender(mut self, column: Option<String>) -> Self {
        self.gender = column;
        self
    }

    pub fn with_sample_id(mut self, column: Option<String>) -> Self {
        self.sample_id = column;
        self
    }

    pub fn combination(&self) -> FieldCombination {
        self.birth.combination()
    }

    pub fn bound_columns(&self) -> Vec<(&'static str, &str)> {
        let birth_role = match self.birth {
            BirthColumn::DateOfBirth(_) => "date of birth",
            BirthColumn::AgeYears(_) => "age",
        };
        let mut bound = vec![
            ("first name", self.first_name.as_str()),
            ("last name", self.last_name.as_str()),
            (birth_role, self.birth.column()),
            ("reference date", self.reference_date.as_str()),
        ];
        if let Some(gender) = &self.gender {
            bound.push(("gender", gender.as_str()));
        }
        if let Some(sample_id) = &self.sample_id {
            bound.push(("sample id", sample_id.as_str()));
        }
        bound
    }

    /// Fail fast when the batch cannot satisfy this mapping.
    pub fn validate_against(&self, batch: &SourceBatch) -> Result<()> {
        if batch.is_empty() {
            return Err(PipelineError::NoRows);
        }
        if let Some((role, column)) = missing_bound_columns(batch, self).into_iter().next() {
            return Err(PipelineError::MissingColumn { role, column });
        }
        Ok(())
    }
}

/// Inclusive range of reporting dates the lookup table is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(PipelineError::Config(format!(
                "date window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending on `end`, inclusive.
    pub fn trailing(end: NaiveDate, days: i64) -> Self {
        let back = u64::try_from(days.max(1) - 1).unwrap_or_default();
        let start = end.checked_sub_days(Days::new(back)).unwrap_or(end);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
}

#[derive(Clone)]
pub struct PlatformSettings {
    pub base_url: String,
    pub outbreak_id: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for PlatformSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformSettings")
            .field("base_url", &self.base_url)
            .field("outbreak_id", &self.outbreak_id)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fixed fields attached to every created case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDefaults {
    pub classification: String,
    pub creation_source: String,
    pub comment: String,
    pub document_type: String,
}

impl Default for CaseDefaults {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_CLASSIFICATION, DEFAULT_COMMENT, DEFAULT_CREATION_SOURCE,
            DEFAULT_DOCUMENT_TYPE,
        };
        Self {
            classification: DEFAULT_CLASSIFICATION.to_string(),
            creation_source: DEFAULT_CREATION_SOURCE.to_string(),
            comment: DEFAULT_COMMENT.to_string(),
            document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub platform: PlatformSettings,
    pub mapping: SchemaMapping,
    pub match_method: MatchMethod,
    pub window: DateWindow,
    pub poll: PollSettings,
    pub defaults: CaseDefaults,
    pub dry_run: bool,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
}

impl PipelineConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let mapping = SchemaMapping::new(
            args.field_combination,
            args.first_name_column.clone(),
            args.last_name_column.clone(),
            args.dob_column.clone(),
            args.age_column.clone(),
            args.reference_date_column.clone(),
        )?
        .with_gender(args.gender_column.clone())
        .with_sample_id(args.sample_id_column.clone());

        let today = Local::now().date_naive();
        let window = match (args.window_start, args.window_end) {
            (Some(start), Some(end)) => DateWindow::new(start, end)?,
            (Some(start), None) => DateWindow::new(start, today)?,
            (None, Some(end)) => DateWindow::trailing(end, DEFAULT_WINDOW_DAYS),
            (None, None) => DateWindow::trailing(today, DEFAULT_WINDOW_DAYS),
        };

        if args.poll_interval_seconds == 0 {
            return Err(PipelineError::Config(
                "--poll-interval-seconds must be at least 1".to_string(),
            ));
        }
        if args.poll_deadline_seconds < args.poll_interval_seconds {
            return Err(PipelineError::Config(format!(
                "--poll-deadline-seconds must be at least the poll interval ({}s)",
                args.poll_interval_seconds
            )));
        }
        let poll = PollSettings {
            interval: Duration::from_secs(args.poll_interval_seconds),
            deadline: Duration::from_secs(args.poll_deadline_seconds),
        };

        if args.outbreak_id.trim().is_empty() {
            return Err(PipelineError::Config("--outbreak-id is empty".to_string()));
        }

        let output_path = args
            .output_path
            .clone()
            .unwrap_or_else(|| default_output_path(&args.input_path));
        let output_format = OutputFormat::from_path(&output_path)?;

        Ok(Self {
            platform: PlatformSettings {
                base_url: args.base_url.trim_end_matches('/').to_string(),
                outbreak_id: args.outbreak_id.trim().to_string(),
                user: args.user.clone(),
                password: args.password.clone(),
            },
            mapping,
            match_method: args.match_method,
            window,
            poll,
            defaults: CaseDefaults {
                classification: args.classification.clone(),
                creation_source: args.creation_source.clone(),
                comment: args.comment.clone(),
                document_type: args.document_type.clone(),
            },
            dry_run: args.dry_run,
            output_path,
            output_format,
        })
    }
}
