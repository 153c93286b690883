//! # Types
//!
//! Shared data structures of the transfer protocol.
//!
//! ## Configuration / Account split
//!
//! A transfer is described by two payloads carried in the QR sequence:
//!
//! - [`TransferConfiguration`] — page 0, learned once and never mutated.
//! - [`TransferAccount`] — pages `1..pages_count`, concatenated and checked
//!   against the configuration's verification hash.
//!
//! The profile ([`TransferAccountProfile`]) is not part of the QR content; the
//! server returns it on the first round-trip after page 0.
//!
//! ## Wire shapes
//!
//! The `*Payload` structs mirror the JSON written by the sending device and
//! are converted into the validated model types above. They never leave this
//! crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::fragment::MAX_PAGES;
use crate::Error;

/// One decoded QR scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanningFragment {
    pub page: u16,
    pub content: Vec<u8>,
}

/// Transfer metadata carried by page 0.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransferConfiguration {
    pub transfer_id: String,
    /// Total number of pages including page 0.
    pub pages_count: u16,
    pub user_id: String,
    pub authentication_token: String,
    /// Server base URL, e.g. `https://passwords.example.com`.
    pub domain: String,
    /// Hex SHA-512 of the concatenated account pages. Empty when the sender
    /// did not provide one.
    pub verification_hash: String,
}

/// The account rebuilt from pages `1..pages_count`.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransferAccount {
    pub user_id: String,
    pub fingerprint: String,
    pub armored_private_key: String,
}

// Key material must not end up in logs.
impl fmt::Debug for TransferAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferAccount")
            .field("user_id", &self.user_id)
            .field("fingerprint", &self.fingerprint)
            .field("armored_private_key", &"<redacted>")
            .finish()
    }
}

/// User profile fetched from the server during the transfer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransferAccountProfile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_image_url: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigurationPayload {
    pub transfer_id: String,
    pub user_id: String,
    pub domain: String,
    pub total_pages: u16,
    #[serde(default)]
    pub hash: Option<String>,
    pub authentication_token: AuthenticationTokenPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthenticationTokenPayload {
    pub token: String,
}

#[derive(Deserialize)]
pub(crate) struct AccountPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    pub fingerprint: String,
    pub armored_key: String,
}

impl TransferConfiguration {
    /// Parse and validate the page-0 content.
    pub fn from_page_content(content: &[u8]) -> Result<Self, Error> {
        let payload: ConfigurationPayload = serde_json::from_slice(content)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;

        if payload.transfer_id.trim().is_empty() {
            return Err(Error::InvalidConfiguration("empty transfer_id".to_string()));
        }
        if payload.user_id.trim().is_empty() {
            return Err(Error::InvalidConfiguration("empty user_id".to_string()));
        }
        if payload.domain.trim().is_empty() {
            return Err(Error::InvalidConfiguration("empty domain".to_string()));
        }
        let domain = Url::parse(&payload.domain)
            .map_err(|e| Error::InvalidConfiguration(format!("invalid domain: {e}")))?;
        if !matches!(domain.scheme(), "http" | "https") || domain.host_str().is_none() {
            return Err(Error::InvalidConfiguration(format!(
                "domain must be an http(s) URL, got {:?}",
                payload.domain
            )));
        }
        if payload.authentication_token.token.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "empty authentication token".to_string(),
            ));
        }
        // Page 0 alone carries no key material.
        if payload.total_pages < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "total_pages must be at least 2, got {}",
                payload.total_pages
            )));
        }
        if payload.total_pages > MAX_PAGES {
            return Err(Error::InvalidConfiguration(format!(
                "total_pages must be at most {MAX_PAGES}, got {}",
                payload.total_pages
            )));
        }

        Ok(TransferConfiguration {
            transfer_id: payload.transfer_id,
            pages_count: payload.total_pages,
            user_id: payload.user_id,
            authentication_token: payload.authentication_token.token,
            domain: payload.domain.trim_end_matches('/').to_string(),
            verification_hash: payload.hash.unwrap_or_default(),
        })
    }
}

impl TransferAccount {
    /// Parse the concatenated account pages. The hash has already been
    /// verified by the caller.
    ///
    /// A JSON object is read as an account payload. Anything else is taken
    /// verbatim as the armored key, leaving the fingerprint empty for the host
    /// to derive from the key.
    pub(crate) fn from_reconstructed(
        content: &[u8],
        configuration: &TransferConfiguration,
    ) -> Result<Self, Error> {
        let is_object = matches!(
            serde_json::from_slice::<serde_json::Value>(content),
            Ok(serde_json::Value::Object(_))
        );

        if !is_object {
            let armored = std::str::from_utf8(content)
                .map_err(|e| Error::InvalidAccountData(e.to_string()))?;
            if armored.trim().is_empty() {
                return Err(Error::InvalidAccountData("empty account data".to_string()));
            }
            return Ok(TransferAccount {
                user_id: configuration.user_id.clone(),
                fingerprint: String::new(),
                armored_private_key: armored.to_string(),
            });
        }

        let payload: AccountPayload = serde_json::from_slice(content)
            .map_err(|e| Error::InvalidAccountData(e.to_string()))?;

        if let Some(user_id) = payload.user_id.as_deref() {
            if user_id != configuration.user_id {
                return Err(Error::InvalidAccountData(format!(
                    "account belongs to user {user_id}, transfer is for {}",
                    configuration.user_id
                )));
            }
        }
        if payload.armored_key.trim().is_empty() {
            return Err(Error::InvalidAccountData("empty armored key".to_string()));
        }

        Ok(TransferAccount {
            user_id: configuration.user_id.clone(),
            fingerprint: payload.fingerprint,
            armored_private_key: payload.armored_key,
        })
    }
}
