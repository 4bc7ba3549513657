//! Create-and-reconcile run: Dedup → Build → Submit → Poll → Normalize.
//!
//! Each stage starts only after the previous one returned. The submission is sent at most
//! once per run; a failed run is never resumed automatically.

use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;

use crate::{
    config::PipelineConfig,
    dedup::{BlockedRow, DedupMatcher, MatchRequest, screen_batch},
    error::{PipelineError, Result},
    normalize::{NormalizeOutcome, normalize_payload},
    platform::{CasePlatform, JobHandle},
    poller::{PollSummary, poll_until_finished},
    request::RequestBuilder,
    source::{LookupTable, SourceBatch},
};

/// Where the existing-records table comes from.
#[derive(Debug, Clone)]
pub enum LookupSource {
    /// Fetch cases reported inside the configured window from the platform.
    Platform,
    /// Caller-supplied table; it is still restricted to the window.
    Table(LookupTable),
    /// No reference data: every row is new.
    Absent,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Every row already existed; no request was sent.
    NothingToSubmit,
    /// Dry run: the request body that would have been sent.
    DryRun { request_body: String },
    Completed {
        job: JobHandle,
        poll: PollSummary,
        result: NormalizeOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub input_rows: usize,
    pub blocked: Vec<BlockedRow>,
    /// Identifiers of the cases sent for creation, in batch order.
    pub identifiers: Vec<String>,
    pub outcome: PipelineOutcome,
}

/// Collaborators for one run. Nothing here is shared between runs.
pub struct Pipeline<'a> {
    pub config: &'a PipelineConfig,
    pub platform: &'a dyn CasePlatform,
    pub matcher: &'a dyn DedupMatcher,
    pub cancel: &'a AtomicBool,
    pub progress: ProgressBar,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        platform: &'a dyn CasePlatform,
        matcher: &'a dyn DedupMatcher,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            config,
            platform,
            matcher,
            cancel,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Run the whole chain for `batch`. `batch_time` fixes the identifier timestamp and
    /// the reporting date for every case of the run.
    pub async fn run(
        &self,
        batch: SourceBatch,
        lookup: LookupSource,
        batch_time: DateTime<Utc>,
    ) -> Result<PipelineReport> {
        let config = self.config;
        let mapping = &config.mapping;

        mapping.validate_against(&batch)?;
        RequestBuilder::validate_rows(mapping, &config.defaults, &batch.rows)?;
        let input_rows = batch.len();

        let lookup = match lookup {
            LookupSource::Platform => Some(self.platform.fetch_lookup(&config.window).await?),
            LookupSource::Table(table) => Some(table),
            LookupSource::Absent => None,
        };

        let request = MatchRequest {
            mapping,
            combination: mapping.combination(),
            method: config.match_method,
            window: config.window,
        };
        let screening = screen_batch(self.matcher, batch.rows, lookup.as_ref(), &request).await?;

        let builder = RequestBuilder::new(
            mapping,
            &config.defaults,
            &config.platform.user,
            batch_time,
        );
        let Some(creation) = builder.build(&screening.new_rows)? else {
            tracing::info!(
                blocked = screening.blocked.len(),
                "Every row already exists; nothing submitted"
            );
            return Ok(PipelineReport {
                input_rows,
                blocked: screening.blocked,
                identifiers: Vec::new(),
                outcome: PipelineOutcome::NothingToSubmit,
            });
        };
        let identifiers: Vec<String> = creation
            .identifiers()
            .into_iter()
            .map(str::to_string)
            .collect();

        if config.dry_run {
            let request_body = creation.to_request_body()?;
            tracing::info!(cases = creation.candidates().len(), "Dry run; request not sent");
            return Ok(PipelineReport {
                input_rows,
                blocked: screening.blocked,
                identifiers,
                outcome: PipelineOutcome::DryRun { request_body },
            });
        }

        let job = match self.platform.submit_cases(&creation).await {
            Ok(job) => job,
            Err(err) => {
                if matches!(err, PipelineError::Transport(_)) {
                    tracing::warn!(
                        first = identifiers.first().map(String::as_str).unwrap_or(""),
                        last = identifiers.last().map(String::as_str).unwrap_or(""),
                        "Submission outcome unknown; check the platform for these identifiers before re-running"
                    );
                }
                return Err(err);
            }
        };

        let poll = poll_until_finished(
            self.platform,
            &job,
            config.poll,
            self.cancel,
            &self.progress,
        )
        .await?;
        let payload = self.platform.download_export(&job).await?;
        let result = normalize_payload(&payload)?;

        Ok(PipelineReport {
            input_rows,
            blocked: screening.blocked,
            identifiers,
            outcome: PipelineOutcome::Completed { job, poll, result },
        })
    }
}
