use axum::{extract::State, response::Json};
use tokio::task;

use crate::{
    auth::CronAuth,
    cron::{run_retry_pass, RetryRunSummary},
    error::{AppError, AppResult},
    ledger::{get_webhook_metrics, WebhookMetrics},
    state::AppState,
};

pub async fn process_webhook_retries(
    _auth: CronAuth,
    State(state): State<AppState>,
) -> AppResult<Json<RetryRunSummary>> {
    let summary = run_retry_pass(&state).await?;
    Ok(Json(summary))
}

pub async fn webhook_metrics(
    _auth: CronAuth,
    State(state): State<AppState>,
) -> AppResult<Json<WebhookMetrics>> {
    let state_clone = state.clone();
    let metrics = task::spawn_blocking(move || -> AppResult<WebhookMetrics> {
        let mut conn = state_clone.db()?;
        Ok(get_webhook_metrics(&mut conn)?)
    })
    .await
    .map_err(AppError::internal)??;
    Ok(Json(metrics))
}
