use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod draft;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    /// Requeued with the shared backoff policy until attempts run out.
    Retry { error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;

    /// Called once a job is given up on.
    async fn on_failed(&self, _state: Arc<AppState>, _job: &Job, _error: &str) {}
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("worker started");
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Reserves and runs at most one job. Returns whether a job was found.
    pub async fn run_once(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };

        let job_opt = reserve_job(&mut conn, &job_types)?;
        drop(conn);

        let Some(job) = job_opt else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()).cloned() else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            if let Ok(mut conn) = self.state.db() {
                mark_job_failed(&mut conn, job.id, "no handler registered")?;
            } else {
                error!("failed to mark job failed for missing handler due to pool error");
            }
            return Ok(true);
        };

        match handler.handle(self.state.clone(), job.clone()).await {
            JobExecution::Success => {
                if let Ok(mut conn) = self.state.db() {
                    mark_job_succeeded(&mut conn, job.id)?;
                    info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
                } else {
                    error!("failed to mark job succeeded due to pool error");
                }
            }
            JobExecution::Retry { error } if !self.state.retry_policy.is_exhausted(job.attempts) => {
                // `attempts` already counts this run.
                let delay = self.state.retry_policy.delay_for(job.attempts - 1);
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    delay_secs = delay.as_secs(),
                    %error,
                    "job will retry"
                );
                if let Ok(mut conn) = self.state.db() {
                    retry_job_after(&mut conn, job.id, delay, &error)?;
                } else {
                    error!("failed to requeue job for retry due to pool error");
                }
            }
            JobExecution::Retry { error } | JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, %error, "job failed");
                if let Ok(mut conn) = self.state.db() {
                    mark_job_failed(&mut conn, job.id, &error)?;
                } else {
                    error!("failed to mark job failed due to pool error");
                }
                handler.on_failed(self.state.clone(), &job, &error).await;
            }
        }

        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(draft::GenerateDraftJob::new())]
}
