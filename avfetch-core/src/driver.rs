use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::ledger::{ErrorLedger, LedgerError, ProgressLedger};
use crate::processor::{DownloadOutcome, ItemProcessor};
use crate::proxy::{ProxyError, ProxyManager};
use crate::worklist::{WorkList, WorkListError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    WorkList(#[from] WorkListError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("checkpoint gate failed: {0}")]
    Checkpoint(std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Operator gate hit every `checkpoint_interval` items. A deliberate pause,
/// not an error state; it has no timeout.
#[async_trait]
pub trait CheckpointGate: Send + Sync {
    async fn wait(&self, processed: usize, elapsed: Duration) -> std::io::Result<()>;
}

/// Prints the running tally and blocks until the operator acknowledges with
/// a line on stdin.
pub struct StdinCheckpoint;

#[async_trait]
impl CheckpointGate for StdinCheckpoint {
    async fn wait(&self, processed: usize, elapsed: Duration) -> std::io::Result<()> {
        println!(
            "Processed {processed} items in {:.2} seconds. Press enter to continue...",
            elapsed.as_secs_f64()
        );
        let mut ack = String::new();
        BufReader::new(stdin()).read_line(&mut ack).await?;
        Ok(())
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub already_complete: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Drives the sequential loop: remaining-set computation, lease refresh
/// before every item, one error boundary per item, ledger appends.
pub struct BatchDriver {
    worklist_path: PathBuf,
    progress: ProgressLedger,
    errors: ErrorLedger,
    proxy: ProxyManager,
    processor: ItemProcessor,
    checkpoint_interval: usize,
    checkpoint: Arc<dyn CheckpointGate>,
}

impl BatchDriver {
    pub fn new(
        worklist_path: PathBuf,
        progress: ProgressLedger,
        errors: ErrorLedger,
        proxy: ProxyManager,
        processor: ItemProcessor,
        checkpoint_interval: usize,
    ) -> Self {
        Self {
            worklist_path,
            progress,
            errors,
            proxy,
            processor,
            checkpoint_interval: checkpoint_interval.max(1),
            checkpoint: Arc::new(StdinCheckpoint),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn CheckpointGate>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub async fn run(&self) -> DriverResult<BatchReport> {
        let worklist = WorkList::from_csv(&self.worklist_path)?;
        let completed = self.progress.load()?;
        let remaining = worklist.remaining(&completed);
        info!(
            total = worklist.len(),
            done = completed.len(),
            remaining = remaining.len(),
            "work list loaded"
        );

        let mut report = BatchReport {
            total: worklist.len(),
            already_complete: worklist.len() - remaining.len(),
            completed: 0,
            failed: 0,
        };

        // No work can proceed without a proxy; exhaustion here ends the batch.
        let mut lease = self.proxy.acquire().await?;
        let started = Instant::now();

        for (index, avid) in remaining.iter().copied().enumerate() {
            lease = self.proxy.ensure_valid(Some(lease)).await?;
            let position = index + 1;
            info!(avid, position, total = remaining.len(), "processing item");

            match self.processor.process_one(avid, lease.endpoint()).await {
                Ok(DownloadOutcome::Completed) => {
                    self.progress.append(avid)?;
                    report.completed += 1;
                }
                Ok(DownloadOutcome::Failed(reason)) => {
                    // Already in the error ledger; the loop moves on.
                    warn!(avid, %reason, "item failed, continuing");
                    report.failed += 1;
                }
                Err(err) => {
                    error!(avid, error = %err, "unexpected error while processing item");
                    self.errors.append(avid)?;
                    report.failed += 1;
                }
            }

            if position % self.checkpoint_interval == 0 {
                self.checkpoint
                    .wait(position, started.elapsed())
                    .await
                    .map_err(DriverError::Checkpoint)?;
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            "batch finished"
        );
        Ok(report)
    }
}
