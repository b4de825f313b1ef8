//! Review Assign - reviewer assignment service for team pull requests.
//!
//! The library holds the assignment engine, its storage backends and the
//! HTTP surface. The binary in `main.rs` only parses configuration, installs
//! logging and waits for shutdown signals.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use config::Config;
use services::http_server::{self, AppState, ServerError};
use services::{AssignmentEngine, Selector};
use store::SqliteStore;

/// Failures that stop the service.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("database initialization failed: {0}")]
    Database(#[from] db::DbError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Open the database, build the engine and serve HTTP until `shutdown` is
/// cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), RunError> {
    // A statement never waits on the write lock longer than the operation
    // it belongs to may run.
    let busy_timeout = config.operation_timeout.min(db::pool::DEFAULT_BUSY_TIMEOUT);
    let pool = db::initialize_with(&config.database_url, config.db_max_connections, busy_timeout)
        .await?;
    log::info!("[db] Database ready at {}", config.database_url);

    let engine = AssignmentEngine::new(Arc::new(SqliteStore::new(pool.clone())), Selector::default())
        .with_deadline(config.operation_timeout);

    let result = http_server::run_server(
        config.server_port,
        AppState::new(engine),
        shutdown,
        config.shutdown_timeout,
    )
    .await;

    pool.close().await;
    result.map_err(RunError::from)
}
