//! One pass of the retry driver: replay due ledger entries, one at a time.

use anyhow::{anyhow, Context, Result};
use diesel::pg::PgConnection;
use serde::Serialize;
use tokio::task;
use uuid::Uuid;

use crate::ledger::{
    get_webhook_metrics, get_webhooks_for_retry, handle_retry_failure, mark_retry_in_progress,
    mark_retry_successful, reclaim_stale_retries, LedgerResult, RetryFailureOutcome,
    WebhookMetrics,
};
use crate::processors::{process_event, InboundEvent};
use crate::state::AppState;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRunSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub moved_to_dead_letter: usize,
    pub metrics: WebhookMetrics,
}

pub async fn run_retry_pass(state: &AppState) -> Result<RetryRunSummary> {
    let mut summary = RetryRunSummary::default();

    let policy = state.retry_policy.clone();
    match ledger_call(state, move |conn| reclaim_stale_retries(conn, &policy)).await {
        Ok(reclaimed) => {
            for (id, outcome) in reclaimed {
                tracing::warn!(
                    failure_id = %id,
                    attempts = outcome.attempts,
                    dead_letter = outcome.moved_to_dead_letter,
                    "retry lease expired, entry released"
                );
                summary.failed += 1;
                if outcome.moved_to_dead_letter {
                    summary.moved_to_dead_letter += 1;
                }
            }
        }
        Err(err) => tracing::error!(error = %err, "failed to release stale retry claims"),
    }

    let limit = state.retry_policy.batch_size;
    let due = ledger_call(state, move |conn| get_webhooks_for_retry(conn, limit)).await?;

    for entry in due {
        let id = entry.id;
        match ledger_call(state, move |conn| mark_retry_in_progress(conn, id)).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(failure_id = %id, "retry entry claimed elsewhere, skipping");
                continue;
            }
            Err(err) => {
                tracing::error!(failure_id = %id, error = %err, "failed to claim retry entry");
                continue;
            }
        }
        summary.processed += 1;

        let replay = match InboundEvent::from_failure(&entry) {
            Ok(inbound) => process_event(state, &inbound)
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match replay {
            Ok(outcome) => {
                if let Err(err) =
                    ledger_call(state, move |conn| mark_retry_successful(conn, id)).await
                {
                    // Left in_progress; a later pass reclaims it once the lease expires.
                    tracing::error!(
                        failure_id = %id,
                        error = %err,
                        "replay succeeded but the ledger entry could not be closed"
                    );
                    summary.failed += 1;
                    continue;
                }
                summary.successful += 1;
                tracing::info!(
                    failure_id = %id,
                    platform = %entry.platform,
                    action = ?outcome.action,
                    "webhook retry succeeded"
                );
            }
            Err(message) => {
                summary.failed += 1;
                let outcome = match record_failed_replay(state, id, message.clone()).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::error!(
                            failure_id = %id,
                            error = %err,
                            replay_error = %message,
                            "failed to record webhook retry failure"
                        );
                        continue;
                    }
                };
                if outcome.moved_to_dead_letter {
                    summary.moved_to_dead_letter += 1;
                    tracing::error!(
                        failure_id = %id,
                        platform = %entry.platform,
                        attempts = outcome.attempts,
                        error = %message,
                        "webhook moved to dead letter"
                    );
                } else {
                    tracing::warn!(
                        failure_id = %id,
                        platform = %entry.platform,
                        attempts = outcome.attempts,
                        next_retry_at = ?outcome.next_retry_at,
                        error = %message,
                        "webhook retry failed"
                    );
                }
            }
        }
    }

    summary.metrics = ledger_call(state, get_webhook_metrics).await?;
    tracing::info!(
        processed = summary.processed,
        successful = summary.successful,
        failed = summary.failed,
        moved_to_dead_letter = summary.moved_to_dead_letter,
        "webhook retry pass finished"
    );
    Ok(summary)
}

async fn record_failed_replay(
    state: &AppState,
    id: Uuid,
    message: String,
) -> Result<RetryFailureOutcome> {
    let policy = state.retry_policy.clone();
    ledger_call(state, move |conn| {
        handle_retry_failure(conn, &policy, id, &message)
    })
    .await
}

async fn ledger_call<F, T>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&mut PgConnection) -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    task::spawn_blocking(move || -> Result<T> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("database pool error: {err}"))?;
        Ok(f(&mut conn)?)
    })
    .await
    .context("retry ledger task panicked")?
}
