use std::net::SocketAddr;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use replysequence::{clients::PlatformClients, config::AppConfig, db, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let policy = config.retry_policy();
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        zoom_configured = config.zoom_webhook_secret.is_some(),
        teams_configured = config.teams_client_state.is_some(),
        meet_configured = config.google_push_audience.is_some(),
        retry_base_delay_secs = policy.base_delay.as_secs(),
        retry_max_attempts = policy.max_attempts,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let migration_pool = pool.clone();
    tokio::task::spawn_blocking(move || db::run_migrations(&migration_pool))
        .await
        .context("migration task panicked")??;

    let clients = PlatformClients::from_config(pool.clone(), &config)?;
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST/SERVER_PORT do not form a socket address")?;

    let state = AppState::new(pool, config, clients);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("server received shutdown signal");
        })
        .await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
