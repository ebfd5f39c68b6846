pub mod auth;
pub mod clients;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod ingest;
pub mod jobs;
pub mod ledger;
pub mod meetings;
pub mod models;
pub mod platform;
pub mod processors;
pub mod raw_events;
pub mod retry;
pub mod routes;
pub mod schema;
pub mod state;
pub mod transcript;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker};
