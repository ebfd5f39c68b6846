use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    clients::PlatformClients,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    retry::RetryPolicy,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub clients: PlatformClients,
    pub retry_policy: RetryPolicy,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, clients: PlatformClients) -> Self {
        let retry_policy = config.retry_policy();
        Self {
            pool,
            config: Arc::new(config),
            clients,
            retry_policy,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
