//! Webhook retry ledger: failed deliveries waiting for an automated replay.
//!
//! Every transition is a conditional single-row `UPDATE` guarded by the
//! current status, so terminal rows (`succeeded`, `dead_letter`) can never be
//! touched again and two cron passes cannot claim the same entry.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewWebhookFailure, WebhookFailure};
use crate::platform::Platform;
use crate::retry::{FailureStatus, RetryPolicy};
use crate::schema::webhook_failures;
use crate::utils::json::payload_fingerprint;

const OPEN_STATUSES: [&str; 2] = ["pending", "in_progress"];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),
    #[error("webhook failure {0} not found")]
    NotFound(Uuid),
    #[error("webhook failure {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: String,
        to: FailureStatus,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// A delivery that a processor failed on.
#[derive(Debug, Clone)]
pub struct FailedDelivery<'a> {
    pub platform: Platform,
    pub event_type: &'a str,
    pub payload: &'a Value,
    pub raw_event_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryFailureOutcome {
    pub moved_to_dead_letter: bool,
    pub attempts: i32,
    pub next_retry_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMetrics {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_platform: BTreeMap<String, BTreeMap<String, i64>>,
    pub due_now: i64,
    pub oldest_due_at: Option<NaiveDateTime>,
}

/// Creates a ledger entry for a failed delivery, or bumps the open entry
/// carrying the same payload fingerprint.
pub fn record_webhook_failure(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    delivery: &FailedDelivery<'_>,
    error_message: &str,
) -> LedgerResult<WebhookFailure> {
    let fingerprint = payload_fingerprint(
        delivery.platform.as_str(),
        delivery.event_type,
        delivery.payload,
    );

    // A concurrent insert for the same fingerprint trips the partial unique
    // index; the second round then finds that row and updates it.
    let mut retried = false;
    loop {
        match upsert_failure(conn, policy, delivery, &fingerprint, error_message) {
            Ok(entry) => return Ok(entry),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) if !retried => {
                retried = true;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn upsert_failure(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    delivery: &FailedDelivery<'_>,
    fingerprint: &str,
    error_message: &str,
) -> Result<WebhookFailure, DieselError> {
    let now = Utc::now();

    conn.transaction(|conn| {
        let open = webhook_failures::table
            .filter(webhook_failures::fingerprint.eq(fingerprint))
            .filter(webhook_failures::status.eq_any(OPEN_STATUSES))
            .for_update()
            .first::<WebhookFailure>(conn)
            .optional()?;

        let id = match open {
            Some(existing) if existing.status == FailureStatus::Pending.as_str() => {
                let attempts = existing.attempts + 1;
                diesel::update(webhook_failures::table.find(existing.id))
                    .set((
                        webhook_failures::attempts.eq(attempts),
                        webhook_failures::next_retry_at
                            .eq(policy.next_retry_at(attempts, now).naive_utc()),
                        webhook_failures::last_error.eq(Some(error_message)),
                        webhook_failures::updated_at.eq(now.naive_utc()),
                    ))
                    .execute(conn)?;
                existing.id
            }
            // A replay is in flight; it owns the next transition. `updated_at`
            // stays at the claim time so the lease keeps running.
            Some(existing) => {
                diesel::update(webhook_failures::table.find(existing.id))
                    .set(webhook_failures::last_error.eq(Some(error_message)))
                    .execute(conn)?;
                existing.id
            }
            None => {
                let entry = NewWebhookFailure {
                    id: Uuid::new_v4(),
                    platform: delivery.platform.as_str().to_string(),
                    event_type: delivery.event_type.to_string(),
                    payload: delivery.payload.clone(),
                    fingerprint: fingerprint.to_string(),
                    raw_event_id: delivery.raw_event_id,
                    attempts: 0,
                    next_retry_at: policy.next_retry_at(0, now).naive_utc(),
                    status: FailureStatus::Pending.as_str().to_string(),
                    last_error: Some(error_message.to_string()),
                };
                diesel::insert_into(webhook_failures::table)
                    .values(&entry)
                    .execute(conn)?;
                entry.id
            }
        };

        webhook_failures::table.find(id).first(conn)
    })
}

/// Up to `limit` pending entries due now, oldest due first.
pub fn get_webhooks_for_retry(
    conn: &mut PgConnection,
    limit: i64,
) -> LedgerResult<Vec<WebhookFailure>> {
    get_webhooks_due_at(conn, limit, Utc::now().naive_utc())
}

pub fn get_webhooks_due_at(
    conn: &mut PgConnection,
    limit: i64,
    now: NaiveDateTime,
) -> LedgerResult<Vec<WebhookFailure>> {
    let rows = webhook_failures::table
        .filter(webhook_failures::status.eq(FailureStatus::Pending.as_str()))
        .filter(webhook_failures::next_retry_at.le(now))
        .order((
            webhook_failures::next_retry_at.asc(),
            webhook_failures::created_at.asc(),
        ))
        .limit(limit.max(0))
        .load(conn)?;
    Ok(rows)
}

pub fn find_webhook_failure(conn: &mut PgConnection, id: Uuid) -> LedgerResult<WebhookFailure> {
    webhook_failures::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or(LedgerError::NotFound(id))
}

/// Claims a pending entry for replay. Returns `false` when the entry is no
/// longer pending (claimed elsewhere or already terminal).
pub fn mark_retry_in_progress(conn: &mut PgConnection, id: Uuid) -> LedgerResult<bool> {
    let updated = diesel::update(
        webhook_failures::table
            .find(id)
            .filter(webhook_failures::status.eq(FailureStatus::Pending.as_str())),
    )
    .set((
        webhook_failures::status.eq(FailureStatus::InProgress.as_str()),
        webhook_failures::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;

    if updated == 0 {
        // Surface unknown ids; anything else is a lost race.
        find_webhook_failure(conn, id)?;
    }
    Ok(updated == 1)
}

pub fn mark_retry_successful(conn: &mut PgConnection, id: Uuid) -> LedgerResult<()> {
    let updated = diesel::update(
        webhook_failures::table
            .find(id)
            .filter(webhook_failures::status.eq(FailureStatus::InProgress.as_str())),
    )
    .set((
        webhook_failures::status.eq(FailureStatus::Succeeded.as_str()),
        webhook_failures::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;

    if updated == 0 {
        let current = find_webhook_failure(conn, id)?;
        return Err(LedgerError::InvalidTransition {
            id,
            from: current.status,
            to: FailureStatus::Succeeded,
        });
    }
    Ok(())
}

/// Books a failed replay: one more attempt, then either a new backoff slot or
/// the dead letter state once the ceiling is reached.
pub fn handle_retry_failure(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    id: Uuid,
    error_message: &str,
) -> LedgerResult<RetryFailureOutcome> {
    conn.transaction(|conn| {
        let entry: WebhookFailure = webhook_failures::table
            .find(id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(LedgerError::NotFound(id))?;

        book_failed_attempt(conn, policy, &entry, error_message)
    })
}

/// Books a failed attempt for every `in_progress` entry whose claim is older
/// than the policy lease. A pass that died between claim and outcome would
/// otherwise leave its entries stuck forever.
pub fn reclaim_stale_retries(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
) -> LedgerResult<Vec<(Uuid, RetryFailureOutcome)>> {
    let cutoff = policy.lease_cutoff(Utc::now()).naive_utc();

    conn.transaction(|conn| {
        let stale: Vec<WebhookFailure> = webhook_failures::table
            .filter(webhook_failures::status.eq(FailureStatus::InProgress.as_str()))
            .filter(webhook_failures::updated_at.lt(cutoff))
            .order(webhook_failures::updated_at.asc())
            .limit(policy.batch_size.max(1))
            .for_update()
            .skip_locked()
            .load(conn)?;

        let mut reclaimed = Vec::with_capacity(stale.len());
        for entry in stale {
            let outcome = book_failed_attempt(conn, policy, &entry, LEASE_EXPIRED_ERROR)?;
            reclaimed.push((entry.id, outcome));
        }
        Ok(reclaimed)
    })
}

pub const LEASE_EXPIRED_ERROR: &str = "retry lease expired before the replay finished";

/// The caller holds the row lock on `entry`.
fn book_failed_attempt(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    entry: &WebhookFailure,
    error_message: &str,
) -> LedgerResult<RetryFailureOutcome> {
    let now = Utc::now();
    let attempts = entry.attempts + 1;
    let target = if policy.is_exhausted(attempts) {
        FailureStatus::DeadLetter
    } else {
        FailureStatus::Pending
    };
    ensure_transition(entry, target)?;

    if target == FailureStatus::DeadLetter {
        diesel::update(webhook_failures::table.find(entry.id))
            .set((
                webhook_failures::attempts.eq(attempts),
                webhook_failures::status.eq(target.as_str()),
                webhook_failures::last_error.eq(Some(error_message)),
                webhook_failures::updated_at.eq(now.naive_utc()),
            ))
            .execute(conn)?;
        return Ok(RetryFailureOutcome {
            moved_to_dead_letter: true,
            attempts,
            next_retry_at: None,
        });
    }

    let next_retry_at = policy.next_retry_at(attempts, now).naive_utc();
    diesel::update(webhook_failures::table.find(entry.id))
        .set((
            webhook_failures::attempts.eq(attempts),
            webhook_failures::status.eq(target.as_str()),
            webhook_failures::next_retry_at.eq(next_retry_at),
            webhook_failures::last_error.eq(Some(error_message)),
            webhook_failures::updated_at.eq(now.naive_utc()),
        ))
        .execute(conn)?;

    Ok(RetryFailureOutcome {
        moved_to_dead_letter: false,
        attempts,
        next_retry_at: Some(next_retry_at),
    })
}

/// Rejects moves the status machine does not allow, including rows carrying
/// a status string this build does not know.
fn ensure_transition(entry: &WebhookFailure, to: FailureStatus) -> LedgerResult<()> {
    let allowed = entry
        .status
        .parse::<FailureStatus>()
        .map(|from| from.can_transition_to(to))
        .unwrap_or(false);
    if allowed {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            id: entry.id,
            from: entry.status.clone(),
            to,
        })
    }
}

pub fn get_webhook_metrics(conn: &mut PgConnection) -> LedgerResult<WebhookMetrics> {
    let rows: Vec<(String, String, i64)> = webhook_failures::table
        .group_by((webhook_failures::platform, webhook_failures::status))
        .select((
            webhook_failures::platform,
            webhook_failures::status,
            count_star(),
        ))
        .load(conn)?;

    let now = Utc::now().naive_utc();
    let due_now: i64 = webhook_failures::table
        .filter(webhook_failures::status.eq(FailureStatus::Pending.as_str()))
        .filter(webhook_failures::next_retry_at.le(now))
        .select(count_star())
        .first(conn)?;

    let oldest_due_at: Option<NaiveDateTime> = webhook_failures::table
        .filter(webhook_failures::status.eq(FailureStatus::Pending.as_str()))
        .select(webhook_failures::next_retry_at)
        .order(webhook_failures::next_retry_at.asc())
        .first(conn)
        .optional()?;

    Ok(summarize(rows, due_now, oldest_due_at))
}

fn summarize(
    rows: Vec<(String, String, i64)>,
    due_now: i64,
    oldest_due_at: Option<NaiveDateTime>,
) -> WebhookMetrics {
    let mut metrics = WebhookMetrics {
        due_now,
        oldest_due_at,
        ..WebhookMetrics::default()
    };
    for status in FailureStatus::ALL {
        metrics.by_status.insert(status.as_str().to_string(), 0);
    }

    for (platform, status, count) in rows {
        metrics.total += count;
        *metrics.by_status.entry(status.clone()).or_insert(0) += count;
        *metrics
            .by_platform
            .entry(platform)
            .or_default()
            .entry(status)
            .or_insert(0) += count;
    }
    metrics
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::{ensure_transition, summarize, LedgerError};
    use crate::models::WebhookFailure;
    use crate::retry::FailureStatus;

    fn entry_with_status(status: &str) -> WebhookFailure {
        let now = Utc::now().naive_utc();
        WebhookFailure {
            id: Uuid::new_v4(),
            platform: "zoom".to_string(),
            event_type: "recording.completed".to_string(),
            payload: json!({}),
            fingerprint: "fp".to_string(),
            raw_event_id: None,
            attempts: 1,
            next_retry_at: now,
            status: status.to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn failed_attempts_only_leave_in_progress() {
        let claimed = entry_with_status("in_progress");
        assert!(ensure_transition(&claimed, FailureStatus::Pending).is_ok());
        assert!(ensure_transition(&claimed, FailureStatus::DeadLetter).is_ok());

        for status in ["pending", "succeeded", "dead_letter", "archived"] {
            let entry = entry_with_status(status);
            let err = ensure_transition(&entry, FailureStatus::Pending).unwrap_err();
            assert!(
                matches!(err, LedgerError::InvalidTransition { ref from, .. } if from == status),
                "{status} should not move to pending"
            );
        }
    }

    #[test]
    fn summarize_groups_by_status_and_platform() {
        let rows = vec![
            ("zoom".to_string(), "pending".to_string(), 2),
            ("zoom".to_string(), "dead_letter".to_string(), 1),
            ("google_meet".to_string(), "pending".to_string(), 3),
        ];
        let metrics = summarize(rows, 4, None);

        assert_eq!(metrics.total, 6);
        assert_eq!(metrics.due_now, 4);
        assert_eq!(metrics.by_status["pending"], 5);
        assert_eq!(metrics.by_status["dead_letter"], 1);
        assert_eq!(metrics.by_status["succeeded"], 0);
        assert_eq!(metrics.by_status["in_progress"], 0);
        assert_eq!(metrics.by_platform["zoom"]["pending"], 2);
        assert_eq!(metrics.by_platform["google_meet"]["pending"], 3);
        assert!(!metrics.by_platform.contains_key("microsoft_teams"));
    }

    #[test]
    fn metrics_serialize_in_camel_case() {
        let json = serde_json::to_value(summarize(Vec::new(), 0, None)).unwrap();
        assert!(json.get("byStatus").is_some());
        assert!(json.get("dueNow").is_some());
        assert!(json.get("oldestDueAt").is_some());
    }
}
