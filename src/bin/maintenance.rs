use std::env;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use uuid::Uuid;

use replysequence::{
    clients::PlatformClients,
    config::AppConfig,
    cron::run_retry_pass,
    db,
    idempotency::purge_event_locks,
    ledger::get_webhook_metrics,
    processors::{process_event, InboundEvent},
    raw_events::find_raw_event,
    state::AppState,
};

const USAGE: &str =
    "Usage: maintenance <process-retries | metrics | purge-locks <days> | replay-raw-event <id>>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("process-retries") => process_retries().await?,
        Some("metrics") => print_metrics()?,
        Some("purge-locks") => {
            let days = args
                .next()
                .ok_or_else(|| anyhow!("purge-locks needs a day count\n{USAGE}"))?
                .parse()
                .context("day count must be an integer")?;
            purge_locks(days)?;
        }
        Some("replay-raw-event") => {
            let id = args
                .next()
                .ok_or_else(|| anyhow!("replay-raw-event needs a raw event id\n{USAGE}"))?
                .parse()
                .context("raw event id must be a UUID")?;
            replay_raw_event(id).await?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    Ok(config)
}

async fn process_retries() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let clients = PlatformClients::from_config(pool.clone(), &config)?;
    let state = AppState::new(pool, config, clients);

    let summary = run_retry_pass(&state).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_metrics() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let metrics = get_webhook_metrics(&mut conn)?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

fn purge_locks(days: i64) -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let removed = purge_event_locks(&mut conn, days).context("failed to purge event locks")?;
    println!("Removed {removed} idempotency locks older than {days} days.");
    Ok(())
}

/// Runs a stored delivery through its processor again, outside the ledger.
async fn replay_raw_event(id: Uuid) -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let clients = PlatformClients::from_config(pool.clone(), &config)?;
    let state = AppState::new(pool, config, clients);

    let raw_event = {
        let mut conn = state.db().map_err(|err| anyhow!("{err:?}"))?;
        find_raw_event(&mut conn, id).with_context(|| format!("raw event {id} not found"))?
    };
    let inbound = InboundEvent::from_raw_event(&raw_event)?;
    let outcome = process_event(&state, &inbound).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
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
