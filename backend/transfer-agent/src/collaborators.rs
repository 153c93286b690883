//! Host-side services the transfer depends on.
//!
//! Each seam is a trait so the orchestrator can be driven against the
//! SQLite store and real services in production, and against in-memory fakes
//! in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// An account already stored on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub local_id: String,
    pub user_id: String,
    pub domain: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_image_url: Option<String>,
    pub fingerprint: String,
    pub added_at: DateTime<Utc>,
}

/// Everything needed to persist a transferred account.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub user_id: String,
    pub domain: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_image_url: Option<String>,
    pub fingerprint: String,
    pub armored_private_key: String,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("user_id", &self.user_id)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Result of signing in with the freshly transferred account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Authorization {
    Authorized,
    /// Sign-in needs a second factor; the host continues with one of these
    /// providers.
    MfaRequired { providers: Vec<String> },
}

#[async_trait]
pub trait Accounts: Send + Sync {
    async fn stored_accounts(&self) -> anyhow::Result<Vec<Account>>;

    /// Persist a new account. Fails if `(user_id, domain)` is already stored.
    async fn add_account(&self, account: NewAccount) -> anyhow::Result<Account>;
}

#[async_trait]
pub trait PassphraseVerifier: Send + Sync {
    async fn verify_passphrase(
        &self,
        armored_private_key: &str,
        passphrase: &str,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait Session: Send + Sync {
    async fn authorize(&self, account: &Account, passphrase: &str)
        -> anyhow::Result<Authorization>;
}

/// Compare server domains the way users type them: case-insensitive and
/// ignoring a trailing slash.
pub fn same_domain(a: &str, b: &str) -> bool {
    a.trim_end_matches('/')
        .eq_ignore_ascii_case(b.trim_end_matches('/'))
}
