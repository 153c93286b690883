//! Process-level error types.
//!
//! Transfer outcomes have their own taxonomy in
//! [`crate::orchestrator::TransferError`]; this enum covers the plumbing
//! around it (configuration and the account database).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
