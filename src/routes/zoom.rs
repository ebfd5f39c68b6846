use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::signature::{verify_zoom_signature, zoom_encrypted_token, SignatureError},
    error::{AppError, AppResult},
    events::ZoomEvent,
    ingest::{ingest, Delivery},
    platform::Platform,
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "x-zm-signature";
pub const TIMESTAMP_HEADER: &str = "x-zm-request-timestamp";

/// Zoom webhook receiver. Always answers `200` once the request is
/// authentic; processing failures go to the retry ledger instead.
pub async fn zoom_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let secret = state
        .config
        .zoom_webhook_secret
        .as_deref()
        .ok_or(SignatureError::NotConfigured)?;

    // Parse errors are only reported to callers that pass the signature check.
    let parsed = parse_event(&body);

    // The validation challenge is the one unsigned request Zoom sends.
    if let Ok((_, event)) = &parsed {
        if event.is_url_validation() {
            let plain_token = event
                .payload
                .plain_token
                .as_deref()
                .ok_or_else(|| AppError::bad_request("url validation without plainToken"))?;
            tracing::info!("answering zoom url validation challenge");
            return Ok(Json(json!({
                "plainToken": plain_token,
                "encryptedToken": zoom_encrypted_token(secret, plain_token),
            })));
        }
    }

    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let (Some(signature), Some(timestamp)) = (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER))
    else {
        return Err(SignatureError::MissingHeaders.into());
    };
    verify_zoom_signature(secret, timestamp, &body, signature, Utc::now().timestamp())
        .map_err(|err| {
            tracing::warn!(error = %err, "rejected zoom webhook signature");
            err
        })?;

    let (payload, event) = parsed
        .map_err(|err| AppError::bad_request(format!("invalid zoom payload: {err}")))?;

    let delivery = Delivery {
        platform: Platform::Zoom,
        event_type: event.event.clone(),
        external_event_id: event.external_event_id(),
        metadata: Some(json!({ "requestTimestamp": timestamp })),
        payload,
    };
    let outcome = ingest(&state, delivery).await?;
    Ok(Json(outcome.to_json()))
}

fn parse_event(body: &[u8]) -> Result<(Value, ZoomEvent), serde_json::Error> {
    let payload: Value = serde_json::from_slice(body)?;
    let event = ZoomEvent::deserialize(&payload)?;
    Ok((payload, event))
}
