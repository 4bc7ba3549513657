use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

use crate::{
    config::{FieldCombination, MatchMethod},
    constants::{
        DEFAULT_CLASSIFICATION, DEFAULT_COMMENT, DEFAULT_CREATION_SOURCE, DEFAULT_DOCUMENT_TYPE,
        DEFAULT_PLATFORM_BASE_URL, DEFAULT_POLL_DEADLINE_SECONDS, DEFAULT_POLL_INTERVAL_SECONDS,
    },
};

#[derive(Debug, Parser)]
#[command(name = "case_intake")]
#[command(about = "Create Go.Data cases from laboratory rows, skipping subjects that already exist")]
pub struct Args {
    /// Laboratory extract (.csv) with one subject per row.
    #[arg(long)]
    pub input_path: PathBuf,

    /// Where to write the created cases (.csv or .parquet). Defaults to <input>-created.csv.
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    /// Existing-cases table (.csv) used instead of fetching the lookup from the platform.
    ///
    /// Expected columns: id, visual_id, first_name, last_name, dob, age, date_of_reporting.
    #[arg(long)]
    pub lookup_csv: Option<PathBuf>,

    /// Platform base URL.
    #[arg(long, default_value = DEFAULT_PLATFORM_BASE_URL)]
    pub base_url: String,

    /// Outbreak the cases are created in.
    #[arg(long)]
    pub outbreak_id: String,

    /// Platform login (also the source of the identifier prefix).
    #[arg(long, env = "CASE_INTAKE_USER")]
    pub user: String,

    #[arg(long, env = "CASE_INTAKE_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Columns compared against existing cases.
    #[arg(long, value_enum, default_value_t = FieldCombination::NamesDob)]
    pub field_combination: FieldCombination,

    /// Matching method requested from the dedup matcher.
    #[arg(long, value_enum, default_value_t = MatchMethod::Exact)]
    pub match_method: MatchMethod,

    #[arg(long, default_value = "first_name")]
    pub first_name_column: String,

    #[arg(long, default_value = "last_name")]
    pub last_name_column: String,

    /// Date-of-birth column (required for names-dob).
    #[arg(long)]
    pub dob_column: Option<String>,

    /// Age-in-years column (required for names-age).
    #[arg(long)]
    pub age_column: Option<String>,

    /// Sample or onset date column.
    #[arg(long, default_value = "sample_date")]
    pub reference_date_column: String,

    #[arg(long)]
    pub gender_column: Option<String>,

    /// Laboratory sample id column, sent as a case document.
    #[arg(long)]
    pub sample_id_column: Option<String>,

    /// First reporting date of the lookup window (YYYY-MM-DD).
    #[arg(long)]
    pub window_start: Option<NaiveDate>,

    /// Last reporting date of the lookup window (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub window_end: Option<NaiveDate>,

    /// Seconds between export-job status checks.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECONDS)]
    pub poll_interval_seconds: u64,

    /// Give up waiting for the export job after this many seconds.
    #[arg(long, default_value_t = DEFAULT_POLL_DEADLINE_SECONDS)]
    pub poll_deadline_seconds: u64,

    /// Case classification code attached to every created case.
    #[arg(long, default_value = DEFAULT_CLASSIFICATION)]
    pub classification: String,

    /// Creation-source tag attached to every created case.
    #[arg(long, default_value = DEFAULT_CREATION_SOURCE)]
    pub creation_source: String,

    /// Note attached to every created case.
    #[arg(long, default_value = DEFAULT_COMMENT)]
    pub comment: String,

    /// Document type code used for the sample id.
    #[arg(long, default_value = DEFAULT_DOCUMENT_TYPE)]
    pub document_type: String,

    /// Build and log the request without creating anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
