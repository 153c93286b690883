//! Transfer-status client — keeps the server informed of scanning progress.
//!
//! Every operation is one `PUT` against
//! `{domain}/mobile/transfers/{transfer_id}/{authentication_token}.json`
//! carrying the current page and the transfer status. Asking for the user
//! profile adds `contain[user.profile]=1` and the server answers with the
//! profile of the account being transferred.
//!
//! ## Resilience
//!
//! * Rate-limit (`429`) and `5xx` responses are retried with exponential
//!   back-off, up to `max_retries` times, capped at [`MAX_BACKOFF`].
//! * Connection failures and timeouts are not retried: the orchestrator
//!   treats them as fatal for the transfer.

use std::time::Duration;

use account_transfer::{TransferAccountProfile, TransferConfiguration, TransferState};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(8);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_ERROR_BODY: usize = 256;

/// Status values understood by the transfer-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStatus {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "error")]
    Error,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not authorized to update the transfer (HTTP {0})")]
    Unauthorized(u16),

    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transfer configuration is not known yet")]
    NotConfigured,

    #[error("transfer domain is not a server URL: {0}")]
    InvalidDomain(String),
}

/// Server side of the transfer, as seen by the orchestrator.
#[async_trait]
pub trait PageSynchronizer: Send + Sync {
    /// Report forward progress. Returns the profile when `request_profile`
    /// is set.
    async fn advance(
        &self,
        state: &TransferState,
        request_profile: bool,
    ) -> Result<Option<TransferAccountProfile>, SyncError>;

    async fn cancel(&self, state: &TransferState) -> Result<(), SyncError>;

    async fn report_failure(&self, state: &TransferState, cause: &str) -> Result<(), SyncError>;
}

// ─────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StatusUpdate {
    current_page: u16,
    status: TransferStatus,
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    body: Option<TransferBody>,
}

#[derive(Debug, Default, Deserialize)]
struct TransferBody {
    #[serde(default)]
    user: Option<UserBody>,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    username: String,
    #[serde(default)]
    profile: Option<ProfileBody>,
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    avatar: Option<AvatarBody>,
}

#[derive(Debug, Deserialize)]
struct AvatarBody {
    #[serde(default)]
    url: Option<AvatarUrls>,
}

#[derive(Debug, Deserialize)]
struct AvatarUrls {
    #[serde(default)]
    medium: Option<String>,
    #[serde(default)]
    small: Option<String>,
}

impl Envelope {
    fn into_profile(self) -> Option<TransferAccountProfile> {
        let user = self.body?.user?;
        let profile = user.profile?;
        let avatar_image_url = profile
            .avatar
            .and_then(|a| a.url)
            .and_then(|u| u.medium.or(u.small));
        Some(TransferAccountProfile {
            username: user.username,
            first_name: profile.first_name,
            last_name: profile.last_name,
            avatar_image_url,
        })
    }
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpPageSynchronizer {
    client: Client,
    max_retries: u32,
    initial_backoff: Duration,
}

impl HttpPageSynchronizer {
    /// The client's timeout is the transfer's request timeout.
    pub fn new(client: Client, max_retries: u32) -> Self {
        Self {
            client,
            max_retries,
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn put_status(
        &self,
        config: &TransferConfiguration,
        current_page: u16,
        status: TransferStatus,
        request_profile: bool,
    ) -> Result<Envelope, SyncError> {
        let url = transfer_url(config)?;
        let update = StatusUpdate {
            current_page,
            status,
        };
        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            let mut request = self.client.put(url.clone()).json(&update);
            if request_profile {
                request = request.query(&[("contain[user.profile]", "1")]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| SyncError::Transport(e.without_url().to_string()))?;

            let code = response.status();
            if (code == StatusCode::TOO_MANY_REQUESTS || code.is_server_error())
                && attempt < self.max_retries
            {
                attempt += 1;
                warn!(
                    transfer_id = %config.transfer_id,
                    status = code.as_u16(),
                    attempt,
                    "Transfer-status request failed (will retry in {backoff:?})"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }

            if code == StatusCode::UNAUTHORIZED || code == StatusCode::FORBIDDEN {
                return Err(SyncError::Unauthorized(code.as_u16()));
            }

            if !code.is_success() {
                let mut message = response.text().await.unwrap_or_default();
                if message.len() > MAX_ERROR_BODY {
                    let mut end = MAX_ERROR_BODY;
                    while !message.is_char_boundary(end) {
                        end -= 1;
                    }
                    message.truncate(end);
                }
                return Err(SyncError::Status {
                    status: code.as_u16(),
                    message,
                });
            }

            let body = response
                .text()
                .await
                .map_err(|e| SyncError::Transport(e.without_url().to_string()))?;

            debug!(
                transfer_id = %config.transfer_id,
                current_page,
                status = status.as_str(),
                "Transfer status updated"
            );

            if body.trim().is_empty() {
                return Ok(Envelope::default());
            }
            return serde_json::from_str(&body)
                .map_err(|e| SyncError::InvalidResponse(e.to_string()));
        }
    }
}

/// The authentication token is part of the path, so this URL must never be
/// logged. Identifiers are pushed as single path segments and get
/// percent-encoded.
fn transfer_url(config: &TransferConfiguration) -> Result<Url, SyncError> {
    let mut url = Url::parse(&config.domain)
        .map_err(|e| SyncError::InvalidDomain(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| SyncError::InvalidDomain(config.domain.clone()))?
        .pop_if_empty()
        .extend(["mobile", "transfers", config.transfer_id.as_str()])
        .push(&format!("{}.json", config.authentication_token));
    Ok(url)
}

#[async_trait]
impl PageSynchronizer for HttpPageSynchronizer {
    async fn advance(
        &self,
        state: &TransferState,
        request_profile: bool,
    ) -> Result<Option<TransferAccountProfile>, SyncError> {
        let config = state.configuration().ok_or(SyncError::NotConfigured)?;
        let status = if state.is_scanning_finished() {
            TransferStatus::Complete
        } else {
            TransferStatus::InProgress
        };

        let envelope = self
            .put_status(config, state.current_page(), status, request_profile)
            .await?;

        if !request_profile {
            return Ok(None);
        }
        envelope
            .into_profile()
            .map(Some)
            .ok_or_else(|| SyncError::InvalidResponse("response carries no user profile".to_string()))
    }

    async fn cancel(&self, state: &TransferState) -> Result<(), SyncError> {
        let config = state.configuration().ok_or(SyncError::NotConfigured)?;
        self.put_status(
            config,
            state.highest_seen_page(),
            TransferStatus::Cancel,
            false,
        )
        .await?;
        Ok(())
    }

    async fn report_failure(&self, state: &TransferState, cause: &str) -> Result<(), SyncError> {
        let config = state.configuration().ok_or(SyncError::NotConfigured)?;
        debug!(transfer_id = %config.transfer_id, cause, "Reporting transfer failure");
        self.put_status(
            config,
            state.highest_seen_page(),
            TransferStatus::Error,
            false,
        )
        .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
