use axum::{extract::State, http::StatusCode, response::Json};
use diesel::connection::SimpleConnection;
use serde_json::{json, Value};
use tokio::task;

use crate::state::AppState;

/// Liveness plus a round trip to the database.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let pool = state.pool.clone();
    let database_ok = task::spawn_blocking(move || {
        pool.get()
            .map(|mut conn| conn.batch_execute("SELECT 1").is_ok())
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    if database_ok {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unreachable" })),
        )
    }
}
