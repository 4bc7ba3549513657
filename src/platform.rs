//! Go.Data REST client: authentication, case creation, export-job status and download,
//! and the existing-cases lookup.

use async_trait::async_trait;
use reqwest::{Client, Response, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::{
    common::truncate_for_log,
    config::{DateWindow, PlatformSettings},
    constants::{EXPORT_LOGS_PATH, TOKEN_PATH},
    error::{PipelineError, Result},
    request::{CreationBatch, encode_date},
    source::{LookupRecord, LookupTable, parse_date},
};

/// Opaque reference to a server-side creation+export job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw export-log document as returned by the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLog {
    #[serde(default)]
    pub status_step: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_no: Option<u64>,
    #[serde(default)]
    pub processed_no: Option<u64>,
}

/// Operations the pipeline needs from the platform.
#[async_trait]
pub trait CasePlatform: Send + Sync {
    /// Create the batch. Not idempotent: a call that fails after reaching the server may
    /// still have created cases, so callers must not resend blindly.
    async fn submit_cases(&self, batch: &CreationBatch) -> Result<JobHandle>;

    async fn export_log(&self, job: &JobHandle) -> Result<ExportLog>;

    /// Full result set of a finished job; `Value::Null` when the body is empty.
    async fn download_export(&self, job: &JobHandle) -> Result<Value>;

    /// Existing cases reported inside `window`.
    async fn fetch_lookup(&self, window: &DateWindow) -> Result<LookupTable>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformAge {
    #[serde(default)]
    years: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformCase {
    id: String,
    #[serde(default)]
    visual_id: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    dob: Option<String>,
    #[serde(default)]
    age: Option<PlatformAge>,
    #[serde(default)]
    date_of_reporting: Option<String>,
}

impl From<PlatformCase> for LookupRecord {
    fn from(case: PlatformCase) -> Self {
        LookupRecord {
            id: case.id,
            visual_id: case.visual_id.filter(|v| !v.trim().is_empty()),
            first_name: case.first_name,
            last_name: case.last_name,
            dob: case.dob.as_deref().and_then(parse_date),
            age_years: case
                .age
                .and_then(|a| a.years)
                .filter(|y| y.is_finite() && *y >= 0.0)
                .map(|y| y.trunc() as u32),
            reference_date: case.date_of_reporting.as_deref().and_then(parse_date),
        }
    }
}

/// Client bound to one outbreak. The access token is requested on the first call that
/// needs it and reused afterwards.
pub struct GoDataClient {
    client: Client,
    base_url: String,
    outbreak_id: String,
    user: String,
    password: String,
    access_token: OnceCell<String>,
}

impl std::fmt::Debug for GoDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoDataClient")
            .field("base_url", &self.base_url)
            .field("outbreak_id", &self.outbreak_id)
            .finish_non_exhaustive()
    }
}

async fn read_body(endpoint: &str, response: Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(PipelineError::Http {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: truncate_for_log(&body),
        });
    }
    Ok(body)
}

async fn read_json(endpoint: &str, response: Response) -> Result<Value> {
    let body = read_body(endpoint, response).await?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|err| PipelineError::decode(endpoint, err))
}

fn job_id_from_response(endpoint: &str, value: &Value) -> Result<JobHandle> {
    value
        .get("exportLogId")
        .and_then(|id| match id {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .map(JobHandle::new)
        .ok_or_else(|| {
            PipelineError::decode(
                endpoint,
                format!(
                    "no export job id in response: {}",
                    truncate_for_log(&value.to_string())
                ),
            )
        })
}

impl GoDataClient {
    /// No network traffic happens until the first platform call.
    pub fn new(client: Client, settings: &PlatformSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            outbreak_id: settings.outbreak_id.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            access_token: OnceCell::new(),
        }
    }

    async fn access_token(&self) -> Result<&str> {
        self.access_token
            .get_or_try_init(|| self.request_token())
            .await
            .map(String::as_str)
    }

    async fn request_token(&self) -> Result<String> {
        let url = self.url(TOKEN_PATH);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "username": self.user,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|err| PipelineError::Auth(format!("token request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PipelineError::Auth(format!("token response unreadable: {err}")))?;
        if !status.is_success() {
            return Err(PipelineError::Auth(format!(
                "{status}: {}",
                truncate_for_log(&body)
            )));
        }
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| PipelineError::Auth(format!("token response malformed: {err}")))?;
        tracing::info!(user = %self.user, "Authenticated against {}", self.base_url);
        Ok(token.access_token)
    }

    fn cases_path(&self) -> String {
        format!("/api/outbreaks/{}/cases", self.outbreak_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl CasePlatform for GoDataClient {
    async fn submit_cases(&self, batch: &CreationBatch) -> Result<JobHandle> {
        let path = self.cases_path();
        let body = batch.to_request_body()?;
        let token = self.access_token().await?;
        tracing::info!(cases = batch.candidates().len(), endpoint = %path, "Submitting case batch");
        let response = self
            .client
            .post(self.url(&path))
            .query(&[("access_token", token)])
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let value = read_json(&path, response).await?;
        let job = job_id_from_response(&path, &value)?;
        tracing::info!(job_id = %job, "Platform accepted batch");
        Ok(job)
    }

    async fn export_log(&self, job: &JobHandle) -> Result<ExportLog> {
        let path = format!("{EXPORT_LOGS_PATH}/{job}");
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.url(&path))
            .query(&[("access_token", token)])
            .send()
            .await?;
        let value = read_json(&path, response).await?;
        serde_json::from_value(value).map_err(|err| PipelineError::decode(&path, err))
    }

    async fn download_export(&self, job: &JobHandle) -> Result<Value> {
        let path = format!("{EXPORT_LOGS_PATH}/{job}/download");
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.url(&path))
            .query(&[("access_token", token)])
            .send()
            .await?;
        read_json(&path, response).await
    }

    async fn fetch_lookup(&self, window: &DateWindow) -> Result<LookupTable> {
        let path = self.cases_path();
        let end_of_window = format!("{}T23:59:59.999Z", window.end.format("%Y-%m-%d"));
        let filter = json!({
            "where": {
                "dateOfReporting": {
                    "between": [encode_date(window.start), end_of_window]
                }
            },
            "fields": ["id", "visualId", "firstName", "lastName", "dob", "age", "dateOfReporting"]
        })
        .to_string();
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.url(&path))
            .query(&[
                ("filter", filter.as_str()),
                ("access_token", token),
            ])
            .send()
            .await?;
        let value = read_json(&path, response).await?;
        if value.is_null() {
            return Ok(LookupTable::default());
        }
        let cases: Vec<PlatformCase> =
            serde_json::from_value(value).map_err(|err| PipelineError::decode(&path, err))?;
        tracing::info!(
            cases = cases.len(),
            "Fetched existing cases reported {}..{}",
            window.start,
            window.end
        );
        Ok(LookupTable::new(
            cases.into_iter().map(LookupRecord::from).collect(),
        ))
    }
}
