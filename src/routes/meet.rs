use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    events::PushEnvelope,
    ingest::{ingest, store_only, Delivery},
    platform::Platform,
    state::AppState,
};

pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

#[derive(Debug, Deserialize)]
pub struct MeetQuery {
    challenge: Option<String>,
}

pub async fn meet_challenge(Query(query): Query<MeetQuery>) -> AppResult<Response> {
    let challenge = query
        .challenge
        .ok_or_else(|| AppError::bad_request("missing challenge"))?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], challenge).into_response())
}

/// Pub/Sub push endpoint for Google Workspace Meet events. Authentic
/// deliveries are always answered with `200` so Pub/Sub does not redeliver.
pub async fn meet_webhook(
    State(state): State<AppState>,
    Query(query): Query<MeetQuery>,
    authorization: Option<TypedHeader<Authorization<Bearer>>>,
    body: Bytes,
) -> AppResult<Response> {
    if let Some(challenge) = query.challenge {
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], challenge).into_response());
    }

    let TypedHeader(Authorization(bearer)) = authorization.ok_or_else(AppError::unauthorized)?;
    let claims = state
        .clients
        .push_verifier
        .verify(bearer.token())
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "rejected pub/sub push token");
            AppError::from(err)
        })?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request(format!("invalid push body: {err}")))?;
    let envelope = PushEnvelope::deserialize(&payload)
        .map_err(|err| AppError::bad_request(format!("invalid push envelope: {err}")))?;

    let metadata = json!({
        "subscription": envelope.subscription,
        "publishTime": envelope.message.publish_time,
        "pushIdentity": claims.email,
    });
    let message_id = envelope.message.message_id.clone();

    let body = match envelope.into_notification() {
        Ok(notification) => {
            let delivery = Delivery {
                platform: Platform::GoogleMeet,
                event_type: notification.event_type,
                external_event_id: message_id,
                payload,
                metadata: Some(metadata),
            };
            ingest(&state, delivery).await?.to_json()
        }
        Err(err) => {
            tracing::warn!(message_id = %message_id, error = %err, "undecodable meet event stored");
            let delivery = Delivery {
                platform: Platform::GoogleMeet,
                event_type: UNKNOWN_EVENT_TYPE.to_string(),
                external_event_id: message_id,
                payload,
                metadata: Some(metadata),
            };
            let raw_event = store_only(&state, delivery).await?;
            json!({ "received": true, "rawEventId": raw_event.id })
        }
    };

    Ok((StatusCode::OK, Json(body)).into_response())
}
