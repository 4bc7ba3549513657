pub const DEFAULT_PLATFORM_BASE_URL: &str = "http://localhost:8000";

pub const TOKEN_PATH: &str = "/api/oauth/token";
pub const EXPORT_LOGS_PATH: &str = "/api/export-logs";

pub const STATUS_STEP_PREFIX: &str = "LNG_STATUS_STEP_";
pub const STATUS_STEP_FINISHED: &str = "LNG_STATUS_STEP_EXPORT_FINISHED";
pub const SYNC_STATUS_FAILED: &str = "LNG_SYNC_STATUS_FAILED";

pub const PERSON_TYPE_PREFIX: &str = "LNG_REFERENCE_DATA_CATEGORY_PERSON_TYPE_";
pub const DEFAULT_CLASSIFICATION: &str = "LNG_REFERENCE_DATA_CATEGORY_CASE_CLASSIFICATION_PROBABLE";
pub const DEFAULT_CREATION_SOURCE: &str = "lab-import";
pub const DEFAULT_COMMENT: &str =
    "Created from laboratory data; provisional until the case investigation is completed.";
pub const DEFAULT_DOCUMENT_TYPE: &str = "LNG_REFERENCE_DATA_CATEGORY_DOCUMENT_TYPE_LAB_SAMPLE_ID";

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;
pub const DEFAULT_POLL_DEADLINE_SECONDS: u64 = 30 * 60;
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

pub const USER_AGENT: &str = "case-intake/0.1";
