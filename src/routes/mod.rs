use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod cron;
pub mod health;
pub mod meet;
pub mod teams;
pub mod zoom;

const MAX_WEBHOOK_BODY_BYTES: usize = 5 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        tracing::warn!(origin = trimmed, "ignoring invalid CORS allowed origin");
                        None
                    }
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
    };

    let webhook_routes = Router::new()
        .route("/zoom", post(zoom::zoom_webhook))
        .route(
            "/teams",
            get(teams::teams_webhook).post(teams::teams_webhook),
        )
        .route(
            "/google-meet",
            get(meet::meet_challenge).post(meet::meet_webhook),
        )
        .route("/metrics", get(cron::webhook_metrics));

    let cron_routes = Router::new().route(
        "/process-webhook-retries",
        get(cron::process_webhook_retries),
    );

    Router::new()
        .nest("/api/webhooks", webhook_routes)
        .nest("/api/cron", cron_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
}
