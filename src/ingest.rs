//! The path every webhook delivery takes: store, dedupe, process, and on
//! failure hand over to the retry ledger.

use serde_json::{json, Value};
use tokio::task;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::idempotency::{acquire_event_lock, event_lock_key};
use crate::ledger::{record_webhook_failure, FailedDelivery};
use crate::models::RawEvent;
use crate::platform::Platform;
use crate::processors::{process_event, InboundEvent, ProcessOutcome};
use crate::raw_events::{mark_raw_event_failed, store_raw_event};
use crate::state::AppState;

/// One verified delivery, already reduced to the payload that will be stored
/// and replayed.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub platform: Platform,
    pub event_type: String,
    pub external_event_id: String,
    pub payload: Value,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Duplicate {
        raw_event_id: Uuid,
    },
    Processed {
        raw_event_id: Uuid,
        outcome: ProcessOutcome,
    },
    /// Processing failed and the delivery now lives in the retry ledger.
    QueuedForRetry {
        raw_event_id: Uuid,
        failure_id: Option<Uuid>,
    },
}

impl IngestOutcome {
    pub fn raw_event_id(&self) -> Uuid {
        match self {
            IngestOutcome::Duplicate { raw_event_id }
            | IngestOutcome::Processed { raw_event_id, .. }
            | IngestOutcome::QueuedForRetry { raw_event_id, .. } => *raw_event_id,
        }
    }

    /// Acknowledgement body returned to the platform.
    pub fn to_json(&self) -> Value {
        match self {
            IngestOutcome::Duplicate { .. } => json!({ "received": true, "duplicate": true }),
            IngestOutcome::Processed { outcome, .. } => json!({
                "received": true,
                "action": outcome.action,
                "meetingId": outcome.meeting_id,
            }),
            IngestOutcome::QueuedForRetry { .. } => {
                json!({ "received": true, "queuedForRetry": true })
            }
        }
    }
}

/// Stores the delivery without processing it, for payloads we cannot parse
/// but still want on record.
pub async fn store_only(state: &AppState, delivery: Delivery) -> AppResult<RawEvent> {
    let state_clone = state.clone();
    task::spawn_blocking(move || -> AppResult<RawEvent> {
        let mut conn = state_clone.db()?;
        Ok(store_raw_event(
            &mut conn,
            delivery.platform,
            &delivery.event_type,
            &delivery.external_event_id,
            delivery.payload,
            delivery.metadata,
        )?)
    })
    .await
    .map_err(AppError::internal)?
}

pub async fn ingest(state: &AppState, delivery: Delivery) -> AppResult<IngestOutcome> {
    let platform = delivery.platform;
    let lock_key = event_lock_key(platform, &delivery.external_event_id);

    let state_clone = state.clone();
    let stored = delivery.clone();
    let (raw_event, acquired) = task::spawn_blocking(move || -> AppResult<(RawEvent, bool)> {
        let mut conn = state_clone.db()?;
        let raw_event = store_raw_event(
            &mut conn,
            stored.platform,
            &stored.event_type,
            &stored.external_event_id,
            stored.payload,
            stored.metadata,
        )?;
        let acquired = acquire_event_lock(&mut conn, &lock_key)?;
        Ok((raw_event, acquired))
    })
    .await
    .map_err(AppError::internal)??;

    if !acquired {
        tracing::info!(
            %platform,
            event_type = %delivery.event_type,
            external_event_id = %delivery.external_event_id,
            raw_event_id = %raw_event.id,
            "duplicate delivery acknowledged"
        );
        return Ok(IngestOutcome::Duplicate {
            raw_event_id: raw_event.id,
        });
    }

    let inbound = InboundEvent {
        platform,
        raw_event_id: Some(raw_event.id),
        event_type: delivery.event_type,
        payload: delivery.payload,
    };

    match process_event(state, &inbound).await {
        Ok(outcome) => Ok(IngestOutcome::Processed {
            raw_event_id: raw_event.id,
            outcome,
        }),
        Err(err) => {
            let message = err.to_string();
            tracing::warn!(
                %platform,
                event_type = %inbound.event_type,
                raw_event_id = %raw_event.id,
                error = %message,
                "event processing failed, queueing for retry"
            );
            let failure_id = queue_for_retry(state, inbound, message).await;
            Ok(IngestOutcome::QueuedForRetry {
                raw_event_id: raw_event.id,
                failure_id,
            })
        }
    }
}

/// Ledger bookkeeping never fails the webhook response; the raw event is
/// already stored.
async fn queue_for_retry(state: &AppState, inbound: InboundEvent, message: String) -> Option<Uuid> {
    let state_clone = state.clone();
    let result = task::spawn_blocking(move || -> anyhow::Result<Uuid> {
        let mut conn = state_clone
            .pool
            .get()
            .map_err(|err| anyhow::anyhow!("database pool error: {err}"))?;
        let failure = record_webhook_failure(
            &mut conn,
            &state_clone.retry_policy,
            &FailedDelivery {
                platform: inbound.platform,
                event_type: &inbound.event_type,
                payload: &inbound.payload,
                raw_event_id: inbound.raw_event_id,
            },
            &message,
        )?;
        if let Some(raw_event_id) = inbound.raw_event_id {
            mark_raw_event_failed(&mut conn, raw_event_id)?;
        }
        Ok(failure.id)
    })
    .await;

    match result {
        Ok(Ok(failure_id)) => {
            tracing::info!(failure_id = %failure_id, "recorded webhook failure");
            Some(failure_id)
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, "failed to record webhook failure");
            None
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "webhook failure task panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::ProcessAction;

    #[test]
    fn duplicate_acknowledgement_matches_platform_contract() {
        let outcome = IngestOutcome::Duplicate {
            raw_event_id: Uuid::nil(),
        };
        assert_eq!(
            outcome.to_json(),
            json!({ "received": true, "duplicate": true })
        );
    }

    #[test]
    fn processed_acknowledgement_reports_action() {
        let meeting_id = Uuid::new_v4();
        let outcome = IngestOutcome::Processed {
            raw_event_id: Uuid::nil(),
            outcome: ProcessOutcome {
                action: ProcessAction::Created,
                meeting_id: Some(meeting_id),
            },
        };
        let body = outcome.to_json();
        assert_eq!(body["received"], json!(true));
        assert_eq!(body["action"], json!("created"));
        assert_eq!(body["meetingId"], json!(meeting_id));
    }
}
