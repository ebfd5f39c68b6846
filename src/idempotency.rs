use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::models::NewIdempotencyLock;
use crate::platform::Platform;
use crate::schema::idempotency_locks;

pub fn event_lock_key(platform: Platform, external_event_id: &str) -> String {
    format!("{}:{}", platform.as_str(), external_event_id)
}

/// Returns `true` for the first caller presenting `key`, `false` for every
/// later one. The primary key makes this atomic across server instances.
pub fn acquire_event_lock(conn: &mut PgConnection, key: &str) -> QueryResult<bool> {
    let inserted = diesel::insert_into(idempotency_locks::table)
        .values(&NewIdempotencyLock { key })
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(inserted == 1)
}

/// Drops locks older than `max_age_days`. Platforms only redeliver within a
/// short window, so old keys are dead weight.
pub fn purge_event_locks(conn: &mut PgConnection, max_age_days: i64) -> QueryResult<usize> {
    let cutoff = Utc::now() - ChronoDuration::days(max_age_days.max(1));
    diesel::delete(idempotency_locks::table.filter(idempotency_locks::created_at.lt(cutoff.naive_utc())))
        .execute(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_scoped_by_platform() {
        assert_eq!(
            event_lock_key(Platform::Zoom, "abc==-1714564800000"),
            "zoom:abc==-1714564800000"
        );
        assert_ne!(
            event_lock_key(Platform::Zoom, "42"),
            event_lock_key(Platform::GoogleMeet, "42")
        );
    }
}
