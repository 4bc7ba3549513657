//! Export-job polling.
//!
//! `Queued -> Processing -> Finished`; any status step we do not recognise maps to
//! `Unknown`. Only `Finished` ends the loop successfully. The loop is bounded by a deadline
//! and observes a cancellation flag while sleeping.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::{Instant, sleep};

use crate::{
    config::PollSettings,
    constants::{STATUS_STEP_FINISHED, STATUS_STEP_PREFIX, SYNC_STATUS_FAILED},
    error::{PipelineError, Result},
    platform::{CasePlatform, ExportLog, JobHandle},
};

const PROCESSING_STEPS: &[&str] = &[
    "RETRIEVING_LANGUAGE_TOKENS",
    "PREPARING_PREFILTERS",
    "PREPARING_RECORDS",
    "PREPARING_LOCATIONS",
    "CONFIGURE_HEADERS",
    "EXPORTING_RECORDS",
    "ENCRYPT",
    "ARCHIVE",
];

const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStep {
    Queued,
    Processing,
    Finished,
    Unknown,
}

impl JobStep {
    pub fn from_status_step(raw: Option<&str>) -> Self {
        let Some(step) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Queued;
        };
        if step == STATUS_STEP_FINISHED {
            return Self::Finished;
        }
        match step.strip_prefix(STATUS_STEP_PREFIX) {
            Some(rest) if PROCESSING_STEPS.contains(&rest) => Self::Processing,
            _ => Self::Unknown,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Unknown => "unknown",
        }
    }
}

/// Snapshot of a job as last reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub step: JobStep,
    pub raw_step: Option<String>,
    pub total_count: u64,
    pub processed_count: u64,
    /// The platform flagged the job as failed.
    pub failed: bool,
}

impl From<ExportLog> for JobStatus {
    fn from(log: ExportLog) -> Self {
        Self {
            step: JobStep::from_status_step(log.status_step.as_deref()),
            failed: log.status.as_deref() == Some(SYNC_STATUS_FAILED),
            raw_step: log.status_step,
            total_count: log.total_no.unwrap_or_default(),
            processed_count: log.processed_no.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    /// Number of status fetches issued.
    pub ticks: u32,
    pub final_status: JobStatus,
    pub elapsed: Duration,
}

pub fn apply_job_progress_style(progress: &ProgressBar) {
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
}

/// Sleep for `duration`, waking early when `cancel` is set.
async fn sleep_unless_cancelled(duration: Duration, cancel: &AtomicBool) -> Result<()> {
    let until = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }
        let now = Instant::now();
        if now >= until {
            return Ok(());
        }
        sleep((until - now).min(CANCEL_CHECK_SLICE)).await;
    }
}

/// Poll `job` until the platform reports it finished.
///
/// Fetch errors propagate immediately; nothing is retried.
pub async fn poll_until_finished(
    platform: &dyn CasePlatform,
    job: &JobHandle,
    settings: PollSettings,
    cancel: &AtomicBool,
    progress: &ProgressBar,
) -> Result<PollSummary> {
    let started = Instant::now();
    let mut ticks = 0u32;
    progress.set_prefix("JOB");
    apply_job_progress_style(progress);

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }

        let status = JobStatus::from(platform.export_log(job).await?);
        ticks += 1;

        progress.set_length(status.total_count);
        progress.set_position(status.processed_count.min(status.total_count));
        progress.set_message(format!("{} tick={ticks}", status.step.label()));
        tracing::info!(
            job_id = %job,
            step = status.step.label(),
            processed = status.processed_count,
            total = status.total_count,
            "Export job progress"
        );

        if status.failed {
            progress.abandon_with_message("failed");
            return Err(PipelineError::JobFailed {
                job_id: job.to_string(),
                status: status.raw_step.unwrap_or_else(|| SYNC_STATUS_FAILED.to_string()),
            });
        }

        match status.step {
            JobStep::Finished => {
                let elapsed = started.elapsed();
                progress.finish_with_message(format!("finished after {ticks} checks"));
                return Ok(PollSummary {
                    ticks,
                    final_status: status,
                    elapsed,
                });
            }
            JobStep::Unknown => tracing::warn!(
                job_id = %job,
                raw_step = status.raw_step.as_deref().unwrap_or(""),
                "Unrecognised export status step; still waiting"
            ),
            JobStep::Queued | JobStep::Processing => {}
        }

        let waited = started.elapsed();
        if waited + settings.interval > settings.deadline {
            progress.abandon_with_message("deadline reached");
            return Err(PipelineError::PollTimeout {
                job_id: job.to_string(),
                waited,
            });
        }
        sleep_unless_cancelled(settings.interval, cancel).await?;
    }
}
