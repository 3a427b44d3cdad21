//! Ingestion control flow: fetch, process, checkpoint.

pub mod fetcher;
pub mod pipeline;
pub mod scheduler;

pub use fetcher::{FetchError, LogFetcher};
pub use pipeline::{BatchReport, Pipeline, PipelineError};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerState, StepOutcome};
