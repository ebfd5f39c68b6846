use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::signature::constant_time_eq,
    error::{AppError, AppResult},
    events::teams::{GraphNotification, GraphNotificationBatch},
    ingest::{ingest, Delivery},
    platform::Platform,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct TeamsQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

/// Microsoft Graph change notifications. Subscription validation echoes
/// `validationToken`; notification batches are answered with `202`.
pub async fn teams_webhook(
    State(state): State<AppState>,
    Query(query): Query<TeamsQuery>,
    body: Bytes,
) -> AppResult<Response> {
    if let Some(token) = query.validation_token {
        tracing::info!("answering graph subscription validation");
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], token).into_response());
    }

    let batch: GraphNotificationBatch = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request(format!("invalid graph notification: {err}")))?;

    let notifications = batch
        .value
        .into_iter()
        .map(|item| {
            let notification = GraphNotification::deserialize(&item).map_err(|err| {
                AppError::bad_request(format!("invalid graph notification: {err}"))
            })?;
            Ok((notification, item))
        })
        .collect::<AppResult<Vec<(GraphNotification, Value)>>>()?;

    let expected_state = state
        .config
        .teams_client_state
        .as_deref()
        .ok_or_else(|| AppError::internal("TEAMS_CLIENT_STATE is not configured"))?;
    // One forged item rejects the whole batch.
    for (notification, _) in &notifications {
        let matches = notification
            .client_state
            .as_deref()
            .is_some_and(|client_state| constant_time_eq(client_state, expected_state));
        if !matches {
            tracing::warn!(
                subscription_id = %notification.subscription_id,
                "graph notification clientState mismatch"
            );
            return Err(AppError::forbidden("clientState mismatch"));
        }
    }

    let mut results = Vec::with_capacity(notifications.len());
    for (notification, item) in notifications {
        let delivery = Delivery {
            platform: Platform::MicrosoftTeams,
            event_type: notification.event_type(),
            external_event_id: notification.external_event_id(),
            metadata: Some(json!({
                "subscriptionId": notification.subscription_id,
                "tenantId": notification.tenant_id,
            })),
            payload: item,
        };
        results.push(ingest(&state, delivery).await?.to_json());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "received": true, "results": results })),
    )
        .into_response())
}
