//! Create cases on a Go.Data platform from laboratory rows.
//!
//! Rows are screened against existing cases, turned into one creation request, and the
//! export job the platform answers with is polled and flattened into a fixed table.

pub mod args;
pub mod common;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod error;
pub mod identifier;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod platform;
pub mod poller;
pub mod request;
pub mod source;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{LookupSource, Pipeline, PipelineOutcome, PipelineReport};
