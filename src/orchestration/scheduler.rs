//! Tailing control loop.
//!
//! Two states: `CatchingUp` processes `[cursor, min(cursor + batch - 1, head)]`
//! batches until the cursor passes the head, then `Idle` polls the head
//! until it moves. The cursor checkpoint is written after every fully
//! persisted batch and is the only recovery state.

use super::fetcher::{FetchError, LogFetcher};
use super::pipeline::{BatchReport, Pipeline, PipelineError};
use crate::db::{Repository, StoreError};
use crate::domain::LogEntry;
use backoff::backoff::Constant;
use backoff::future::retry_notify;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Key of the stored cursor checkpoint.
    pub indexer_id: String,
    pub start_block: u64,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    CatchingUp,
    Idle,
}

/// What a single `step` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A batch was persisted and the cursor moved past `to`.
    Advanced {
        from: u64,
        to: u64,
        report: BatchReport,
    },
    /// A batch failed to persist; the same range will be retried.
    Retrying { from: u64, to: u64 },
    /// Cursor is past the head.
    Idle { head: u64 },
    /// The head moved past the cursor while idle.
    Resumed { head: u64 },
}

/// Unrecoverable scheduler failure.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to load checkpoint: {0}")]
    Checkpoint(#[source] StoreError),
    #[error("batch [{from}, {to}] hit a fatal error: {source}")]
    Fatal {
        from: u64,
        to: u64,
        #[source]
        source: PipelineError,
    },
}

pub struct Scheduler {
    fetcher: LogFetcher,
    pipeline: Pipeline,
    repo: Arc<Repository>,
    config: SchedulerConfig,
    state: SchedulerState,
    cursor: u64,
    head: Option<u64>,
}

impl Scheduler {
    /// Build a scheduler positioned after the stored checkpoint, or at the
    /// configured start block, whichever is later.
    pub async fn start(
        fetcher: LogFetcher,
        pipeline: Pipeline,
        repo: Arc<Repository>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let checkpoint = repo
            .load_cursor(&config.indexer_id)
            .await
            .map_err(SchedulerError::Checkpoint)?;
        let cursor = match checkpoint {
            Some(block) => config.start_block.max(block + 1),
            None => config.start_block,
        };

        info!(
            indexer = %config.indexer_id,
            checkpoint = ?checkpoint,
            cursor,
            batch_size = config.batch_size,
            "Scheduler starting"
        );

        Ok(Self {
            fetcher,
            pipeline,
            repo,
            config,
            state: SchedulerState::CatchingUp,
            cursor,
            head: None,
        })
    }

    /// Next block to process.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run forever. Returns only on a fatal error.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        loop {
            self.step().await?;
        }
    }

    /// Execute one state transition.
    pub async fn step(&mut self) -> Result<StepOutcome, SchedulerError> {
        match self.state {
            SchedulerState::CatchingUp => self.catch_up().await,
            SchedulerState::Idle => self.poll().await,
        }
    }

    async fn catch_up(&mut self) -> Result<StepOutcome, SchedulerError> {
        let head = match self.head {
            Some(head) if head >= self.cursor => head,
            _ => {
                let head = self.head_with_retry().await;
                self.head = Some(head);
                head
            }
        };
        if self.cursor > head {
            debug!(cursor = self.cursor, head, "Caught up");
            self.state = SchedulerState::Idle;
            return Ok(StepOutcome::Idle { head });
        }

        let from = self.cursor;
        let to = from
            .saturating_add(self.config.batch_size.max(1) - 1)
            .min(head);

        let logs = match self.fetch_with_retry(from, to).await {
            Ok(logs) => logs,
            Err(e) => {
                error!(from, to, error = %e, "Unretryable fetch error");
                tokio::time::sleep(self.config.retry_interval).await;
                return Ok(StepOutcome::Retrying { from, to });
            }
        };
        let report = match self.pipeline.process_batch(&logs).await {
            Ok(report) => report,
            Err(e) if e.is_fatal() => {
                error!(from, to, error = %e, "Fatal batch error; halting");
                return Err(SchedulerError::Fatal { from, to, source: e });
            }
            Err(e) => {
                error!(from, to, error = %e, "Batch failed; retrying range");
                tokio::time::sleep(self.config.retry_interval).await;
                return Ok(StepOutcome::Retrying { from, to });
            }
        };

        if let Err(e) = self.repo.save_cursor(&self.config.indexer_id, to).await {
            error!(from, to, error = %e, "Checkpoint write failed; retrying range");
            tokio::time::sleep(self.config.retry_interval).await;
            return Ok(StepOutcome::Retrying { from, to });
        }
        self.cursor = to + 1;

        info!(
            from,
            to,
            logs = report.logs,
            folded = report.folded,
            skipped = report.skipped,
            dropped = report.dropped,
            replayed = report.replayed,
            "Batch processed"
        );
        Ok(StepOutcome::Advanced { from, to, report })
    }

    async fn poll(&mut self) -> Result<StepOutcome, SchedulerError> {
        tokio::time::sleep(self.config.poll_interval).await;

        let head = self.head_with_retry().await;
        self.head = Some(head);
        if head >= self.cursor {
            info!(cursor = self.cursor, head, "New blocks; resuming");
            self.state = SchedulerState::CatchingUp;
            Ok(StepOutcome::Resumed { head })
        } else {
            Ok(StepOutcome::Idle { head })
        }
    }

    /// Fetch a range, retrying transient failures at a fixed interval
    /// without limit.
    async fn fetch_with_retry(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<LogEntry>, FetchError> {
        let fetcher = &self.fetcher;
        retry_notify(
            Constant::new(self.config.retry_interval),
            || async move {
                fetcher.fetch(from, to).await.map_err(|e| match e {
                    FetchError::Transient(_) => backoff::Error::transient(e),
                    FetchError::InvalidRange { .. } => backoff::Error::permanent(e),
                })
            },
            |e: FetchError, wait: Duration| {
                warn!(from, to, error = %e, retry_in_ms = wait.as_millis() as u64, "Fetch failed");
            },
        )
        .await
    }

    async fn head_with_retry(&self) -> u64 {
        let fetcher = &self.fetcher;
        let result = retry_notify(
            Constant::new(self.config.retry_interval),
            || async move { fetcher.head().await.map_err(backoff::Error::transient) },
            |e: FetchError, wait: Duration| {
                warn!(error = %e, retry_in_ms = wait.as_millis() as u64, "Head query failed");
            },
        )
        .await;

        // Every error is transient and `Constant` never gives up.
        result.unwrap_or(self.head.unwrap_or(0))
    }
}
