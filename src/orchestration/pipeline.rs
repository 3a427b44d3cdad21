//! Decode, fold, and persist one batch of logs.

use crate::db::{RawEventRecord, Repository, StatusFilter, StoreError};
use crate::decode::EventDecoder;
use crate::domain::{LifecycleOperation, LogEntry, PositionStatus, TxHash};
use crate::engine::{FoldOutcome, PositionFolder};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Logs handed to the pipeline.
    pub logs: usize,
    /// Logs resolved and decoded into events.
    pub decoded: usize,
    /// Unresolved or malformed logs.
    pub skipped: usize,
    /// Lifecycle events applied to a position.
    pub folded: usize,
    /// Lifecycle events already settled by an earlier run.
    pub replayed: usize,
    /// Lifecycle events rejected by the fold.
    pub dropped: usize,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Whether the error indicates a broken invariant rather than a failed
    /// write that can be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Store(StoreError::DuplicateIdentity(_)))
    }
}

pub struct Pipeline {
    decoder: EventDecoder,
    folder: PositionFolder,
    repo: Arc<Repository>,
}

impl Pipeline {
    pub fn new(decoder: EventDecoder, folder: PositionFolder, repo: Arc<Repository>) -> Self {
        Self {
            decoder,
            folder,
            repo,
        }
    }

    /// Process logs in the order given. Per-event problems are counted and
    /// logged; only persistence failures abort the batch.
    ///
    /// Every lifecycle event is marked processed when it is applied or
    /// dropped, so replaying a batch is a no-op.
    pub async fn process_batch(&self, logs: &[LogEntry]) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport {
            logs: logs.len(),
            ..Default::default()
        };

        for log in logs {
            let event = match self.decoder.decode(log) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!(
                        contract = %log.address,
                        tx = %log.tx_hash,
                        log_index = log.log_index,
                        "Skipping unresolved log"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        tx = %log.tx_hash,
                        log_index = log.log_index,
                        error = %e,
                        "Skipping undecodable log"
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            report.decoded += 1;

            self.repo
                .record_raw_event(&RawEventRecord::from_event(&event))
                .await?;

            let obs = match self.folder.observe(&event) {
                Ok(Some(obs)) => obs,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tx = %event.tx_hash, log_index = event.log_index, error = %e, "Dropping event");
                    self.drop_event(&mut report, &event.tx_hash, event.log_index, event.block_number, &e.to_string())
                        .await?;
                    continue;
                }
            };

            if self.repo.is_event_processed(&obs.tx_hash, obs.log_index).await? {
                debug!(tx = %obs.tx_hash, log_index = obs.log_index, "Event already processed");
                report.replayed += 1;
                continue;
            }

            let latest = self.repo.latest_position_state(&obs.wallet, &obs.asset).await?;
            let next_id = if obs.operation == LifecycleOperation::Opened {
                self.repo.next_identity().await?
            } else {
                0
            };

            let outcome = match self.folder.fold(&obs, latest.as_ref(), next_id, Utc::now()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        wallet = %obs.wallet,
                        asset = %obs.asset,
                        tx = %obs.tx_hash,
                        error = %e,
                        "Dropping lifecycle event"
                    );
                    self.drop_event(&mut report, &obs.tx_hash, obs.log_index, obs.block_number, &e.to_string())
                        .await?;
                    continue;
                }
            };

            match outcome {
                FoldOutcome::Insert(position) => {
                    self.repo.insert_position(&position).await?;
                    info!(
                        position_id = position.position_id,
                        wallet = %position.wallet,
                        asset = %position.asset,
                        "Position opened"
                    );
                }
                FoldOutcome::Update {
                    position_id,
                    state,
                    entry,
                } => {
                    match self
                        .repo
                        .update_latest(
                            &obs.wallet,
                            &obs.asset,
                            StatusFilter::Only(PositionStatus::Active),
                            &state,
                            &entry,
                        )
                        .await
                    {
                        Ok(_) => {}
                        Err(e @ StoreError::NotFound { .. }) => {
                            warn!(position_id, error = %e, "Active position vanished; dropping event");
                            self.drop_event(&mut report, &obs.tx_hash, obs.log_index, obs.block_number, &e.to_string())
                                .await?;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                    if state.status.is_terminal() {
                        info!(position_id, status = %state.status, "Position finished");
                    }
                }
            }
            report.folded += 1;
        }

        Ok(report)
    }

    async fn drop_event(
        &self,
        report: &mut BatchReport,
        tx_hash: &TxHash,
        log_index: u64,
        block_number: u64,
        reason: &str,
    ) -> Result<(), PipelineError> {
        if self
            .repo
            .record_dropped_event(tx_hash, log_index, block_number, reason)
            .await?
        {
            report.dropped += 1;
        } else {
            report.replayed += 1;
        }
        Ok(())
    }
}
