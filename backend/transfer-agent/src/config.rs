//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{AgentError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Local account store (e.g. sqlite:./transfer_accounts.db)
    pub database_url: String,
    /// Port for the control API the scanner UI talks to
    pub api_port: u16,
    /// Timeout applied to every transfer-status request
    pub request_timeout_secs: u64,
    /// Retries for rate-limited or 5xx transfer-status responses
    pub sync_max_retries: u32,
    /// Buffer size of the outbound update channel
    pub update_channel_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./transfer_accounts.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3002".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid API_PORT".to_string()))?,
            request_timeout_secs: env_var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid REQUEST_TIMEOUT_SECS".to_string()))?,
            sync_max_retries: env_var("SYNC_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid SYNC_MAX_RETRIES".to_string()))?,
            update_channel_capacity: env_var("UPDATE_CHANNEL_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| {
                    AgentError::Config("Invalid UPDATE_CHANNEL_CAPACITY".to_string())
                })?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AgentError::Config(format!("Missing env var: {key}")))
}
