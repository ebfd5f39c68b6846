use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{NewRawEvent, RawEvent};
use crate::platform::Platform;
use crate::schema::raw_events;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSED: &str = "processed";
pub const STATUS_FAILED: &str = "failed";

/// Written before any processing so that every delivery leaves an audit row.
pub fn store_raw_event(
    conn: &mut PgConnection,
    platform: Platform,
    event_type: &str,
    external_event_id: &str,
    payload: Value,
    metadata: Option<Value>,
) -> QueryResult<RawEvent> {
    let new_event = NewRawEvent {
        id: Uuid::new_v4(),
        platform: platform.as_str().to_string(),
        event_type: event_type.to_string(),
        external_event_id: external_event_id.to_string(),
        payload,
        metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
        status: STATUS_PENDING.to_string(),
    };

    diesel::insert_into(raw_events::table)
        .values(&new_event)
        .get_result(conn)
}

pub fn find_raw_event(conn: &mut PgConnection, id: Uuid) -> QueryResult<RawEvent> {
    raw_events::table.find(id).first(conn)
}

pub fn mark_raw_event_processed(
    conn: &mut PgConnection,
    id: Uuid,
    meeting_id: Option<Uuid>,
) -> QueryResult<()> {
    let now = Utc::now().naive_utc();
    match meeting_id {
        Some(meeting_id) => diesel::update(raw_events::table.find(id))
            .set((
                raw_events::status.eq(STATUS_PROCESSED),
                raw_events::meeting_id.eq(Some(meeting_id)),
                raw_events::processed_at.eq(Some(now)),
            ))
            .execute(conn)?,
        None => diesel::update(raw_events::table.find(id))
            .set((
                raw_events::status.eq(STATUS_PROCESSED),
                raw_events::processed_at.eq(Some(now)),
            ))
            .execute(conn)?,
    };
    Ok(())
}

/// Only pending rows flip to failed; a row already processed by a replay
/// keeps its status.
pub fn mark_raw_event_failed(conn: &mut PgConnection, id: Uuid) -> QueryResult<()> {
    diesel::update(
        raw_events::table
            .find(id)
            .filter(raw_events::status.eq(STATUS_PENDING)),
    )
    .set(raw_events::status.eq(STATUS_FAILED))
    .execute(conn)?;
    Ok(())
}
