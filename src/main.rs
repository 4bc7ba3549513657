use anyhow::{Context, Result};
use case_intake::{
    LookupSource, Pipeline, PipelineConfig, PipelineOutcome,
    args::Args,
    common::install_ctrlc_handler,
    constants::USER_AGENT,
    dedup::ExactMatcher,
    normalize::NormalizeOutcome,
    output::write_table,
    platform::GoDataClient,
    source::{read_lookup_csv, read_source_csv},
};
use chrono::Utc;
use clap::Parser;
use indicatif::ProgressBar;
use reqwest::Client;
use std::{
    io::IsTerminal,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = PipelineConfig::from_args(&args).context("Invalid configuration")?;

    let batch = read_source_csv(&args.input_path)
        .with_context(|| format!("Failed reading {}", args.input_path.display()))?;

    let lookup = match &args.lookup_csv {
        Some(path) => LookupSource::Table(
            read_lookup_csv(path).with_context(|| format!("Failed reading {}", path.display()))?,
        ),
        None => LookupSource::Platform,
    };

    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(120))
        .build()
        .context("Failed creating HTTP client")?;
    let platform = GoDataClient::new(client, &config.platform);

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&shutdown_requested));

    let progress = if std::io::stderr().is_terminal() {
        let bar = ProgressBar::new(0);
        bar.enable_steady_tick(Duration::from_millis(250));
        bar
    } else {
        ProgressBar::hidden()
    };

    let matcher = ExactMatcher;
    let report = Pipeline::new(&config, &platform, &matcher, &shutdown_requested)
        .with_progress(progress)
        .run(batch, lookup, Utc::now())
        .await
        .context("Case creation failed")?;

    tracing::info!(
        input = report.input_rows,
        already_present = report.blocked.len(),
        sent = report.identifiers.len(),
        "Run summary"
    );
    for blocked in &report.blocked {
        tracing::info!(
            line = blocked.row.line,
            existing_id = %blocked.existing_id,
            "Skipped existing case"
        );
    }

    match report.outcome {
        PipelineOutcome::NothingToSubmit => {
            tracing::info!("All rows matched existing cases; nothing created.");
        }
        PipelineOutcome::DryRun { request_body } => {
            println!("{request_body}");
        }
        PipelineOutcome::Completed { job, poll, result } => {
            tracing::info!(
                job_id = %job,
                checks = poll.ticks,
                elapsed_secs = poll.elapsed.as_secs(),
                "Export job finished"
            );
            match result {
                NormalizeOutcome::NoRecords => {
                    tracing::warn!(job_id = %job, "Export job finished without records; no output written");
                }
                NormalizeOutcome::Records(table) => {
                    write_table(&table, &config.output_path, config.output_format)
                        .with_context(|| {
                            format!("Failed writing {}", config.output_path.display())
                        })?;
                }
            }
        }
    }
    Ok(())
}
