use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    models::{SyncOperation, SyncOutcome},
    services::{providers::WatchlistProvider, RetryPolicy},
};

enum Pending {
    Running(SyncOperation, JoinHandle<SyncOutcome>),
    Done(SyncOutcome),
}

/// Applies planned operations to the target watchlist
///
/// A failed operation never stops the ones after it. Outcomes are returned in
/// plan order regardless of how many mutations ran at once.
pub struct SyncExecutor {
    target: Arc<dyn WatchlistProvider>,
    retry: RetryPolicy,
    concurrency_limit: usize,
    dry_run: bool,
    cancel: CancellationToken,
}

impl SyncExecutor {
    pub fn new(
        target: Arc<dyn WatchlistProvider>,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            retry: config.retry.clone(),
            concurrency_limit: config.concurrency_limit.max(1),
            dry_run: config.dry_run,
            cancel,
        }
    }

    pub async fn execute(&self, operations: &[SyncOperation]) -> Vec<SyncOutcome> {
        if self.dry_run {
            return operations
                .iter()
                .map(|op| {
                    tracing::info!("[dry run] {}", op);
                    SyncOutcome::skipped(op.clone(), "dry run")
                })
                .collect();
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut pending = Vec::with_capacity(operations.len());

        for op in operations {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let permit = match permit {
                Some(permit) if !self.cancel.is_cancelled() => permit,
                _ => {
                    pending.push(Pending::Done(SyncOutcome::skipped(op.clone(), "cancelled")));
                    continue;
                }
            };

            let target = Arc::clone(&self.target);
            let retry = self.retry.clone();
            let cancel = self.cancel.clone();
            let operation = op.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                apply_with_retry(target.as_ref(), operation, &retry, &cancel).await
            });
            pending.push(Pending::Running(op.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            let outcome = match entry {
                Pending::Done(outcome) => outcome,
                Pending::Running(op, handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "Mutation task join error");
                        SyncOutcome::failed(op, format!("mutation task failed: {}", e), 0)
                    }
                },
            };
            outcomes.push(outcome);
        }

        let skipped = outcomes
            .iter()
            .filter(|o| o.status == crate::models::OperationStatus::Skipped)
            .count();
        if skipped > 0 {
            tracing::warn!(skipped, "Cancelled before all operations were attempted");
        }

        outcomes
    }
}

/// Runs one operation, retrying retryable errors with backoff
async fn apply_with_retry(
    target: &dyn WatchlistProvider,
    op: SyncOperation,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> SyncOutcome {
    let mut retries = 0;

    loop {
        let attempts = retries + 1;
        let result = match &op {
            SyncOperation::Add(key) => target.add_to_watchlist(key).await,
            SyncOperation::Remove(key) => target.remove_from_watchlist(key).await,
        };

        match result {
            Ok(()) => {
                tracing::info!("{}", op);
                return SyncOutcome::applied(op, attempts);
            }
            Err(e) if e.is_retryable() && retry.allows_retry(retries) => {
                retries += 1;
                let delay = retry.calculate_backoff(retries);
                tracing::warn!(
                    rating_key = %op.target(),
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Mutation failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        return SyncOutcome::failed(op, format!("{} (retry abandoned: cancelled)", e), attempts);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                tracing::error!(
                    rating_key = %op.target(),
                    attempts,
                    error = %e,
                    "Mutation failed"
                );
                return SyncOutcome::failed(op, e.to_string(), attempts);
            }
        }
    }
}
