//! # Transfer State
//!
//! The record of everything learned from the scans so far, and the
//! reconstruction algorithm that grows it.
//!
//! ## Lifecycle
//!
//! ```text
//! empty ──page 0──► configured ──pages 1..n-1──► reconstructed
//! ```
//!
//! [`TransferState::accept`] never mutates `self`: it returns a new state on
//! success and leaves the caller's copy untouched on rejection, so a rejected
//! scan can never leave a half-applied fragment behind.
//!
//! Fragments are kept in scan order. Because only the next expected page is
//! accepted, the collected pages always form a contiguous run starting at 0.

use std::collections::BTreeSet;

use serde::Serialize;
use sha2::{Digest, Sha512};

use crate::types::{
    ScanningFragment, TransferAccount, TransferAccountProfile, TransferConfiguration,
};
use crate::{Error, Result};

/// Coarse progress signal for the scanning UI.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferProgress {
    /// Page 0 has not been scanned yet.
    Configuration,
    /// Share of pages collected, in `0.0..=1.0`.
    ScanningProgress { fraction: f64 },
    /// The account has been reconstructed.
    ScanningFinished,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferState {
    configuration: Option<TransferConfiguration>,
    account: Option<TransferAccount>,
    profile: Option<TransferAccountProfile>,
    fragments: Vec<ScanningFragment>,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(&self) -> Option<&TransferConfiguration> {
        self.configuration.as_ref()
    }

    pub fn account(&self) -> Option<&TransferAccount> {
        self.account.as_ref()
    }

    pub fn profile(&self) -> Option<&TransferAccountProfile> {
        self.profile.as_ref()
    }

    pub fn fragments(&self) -> &[ScanningFragment] {
        &self.fragments
    }

    /// Scanning is over once the account exists.
    pub fn is_scanning_finished(&self) -> bool {
        self.account.is_some()
    }

    /// Lowest page index not collected yet, or `None` once the account has
    /// been reconstructed.
    pub fn next_expected_page(&self) -> Option<u16> {
        if self.account.is_some() {
            return None;
        }
        let seen: BTreeSet<u16> = self.fragments.iter().map(|f| f.page).collect();
        (0..=u16::MAX).find(|page| !seen.contains(page))
    }

    /// Highest page index seen so far, 0 when nothing was scanned.
    pub fn highest_seen_page(&self) -> u16 {
        self.fragments.iter().map(|f| f.page).max().unwrap_or(0)
    }

    /// Page reported to the server while the transfer is moving forward.
    pub fn current_page(&self) -> u16 {
        self.next_expected_page()
            .unwrap_or_else(|| self.highest_seen_page())
    }

    pub fn progress(&self) -> TransferProgress {
        if self.account.is_some() {
            return TransferProgress::ScanningFinished;
        }
        match &self.configuration {
            None => TransferProgress::Configuration,
            Some(config) => {
                let fraction = self.fragments.len() as f64 / f64::from(config.pages_count);
                TransferProgress::ScanningProgress {
                    fraction: fraction.clamp(0.0, 1.0),
                }
            }
        }
    }

    /// Attach the profile returned by the server.
    pub fn with_profile(&self, profile: TransferAccountProfile) -> Self {
        let mut next = self.clone();
        next.profile = Some(profile);
        next
    }

    /// Fold one fragment into the state.
    ///
    /// Returns the new state, or the reason the fragment was rejected. On
    /// rejection `self` is exactly as it was.
    pub fn accept(&self, fragment: ScanningFragment) -> Result<Self> {
        if self.account.is_some() {
            return Err(Error::UnexpectedFragment {
                page: fragment.page,
            });
        }

        let expected = self.next_expected_page().unwrap_or(0);
        if fragment.page != expected {
            if expected > 0 && fragment.page == expected - 1 {
                return Err(Error::DuplicateFragment {
                    page: fragment.page,
                });
            }
            return Err(Error::FragmentOutOfOrder {
                expected,
                received: fragment.page,
            });
        }

        let mut next = self.clone();
        let page = fragment.page;
        let content = fragment.content.clone();
        next.fragments.push(fragment);

        if page == 0 {
            next.configuration = Some(TransferConfiguration::from_page_content(&content)?);
            return Ok(next);
        }

        let config = next
            .configuration
            .as_ref()
            .ok_or_else(|| Error::InvalidConfiguration("page 0 was never accepted".to_string()))?;

        if next.has_all_account_pages(config) {
            let account = reconstruct_account(&next.fragments, config)?;
            next.account = Some(account);
        }

        Ok(next)
    }

    fn has_all_account_pages(&self, config: &TransferConfiguration) -> bool {
        let seen: BTreeSet<u16> = self.fragments.iter().map(|f| f.page).collect();
        (1..config.pages_count).all(|page| seen.contains(&page))
    }
}

/// Hex SHA-512 of the given bytes, the digest the sending device puts in
/// the configuration's `hash` field.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha512::digest(content))
}

fn reconstruct_account(
    fragments: &[ScanningFragment],
    config: &TransferConfiguration,
) -> Result<TransferAccount> {
    let mut content = Vec::new();
    for page in 1..config.pages_count {
        let fragment = fragments
            .iter()
            .find(|f| f.page == page)
            .ok_or(Error::FragmentOutOfOrder {
                expected: page,
                received: config.pages_count,
            })?;
        content.extend_from_slice(&fragment.content);
    }

    if config.verification_hash.trim().is_empty() {
        return Err(Error::IntegrityCheckFailed(
            "missing verification hash".to_string(),
        ));
    }

    let digest = content_digest(&content);
    if !digest.eq_ignore_ascii_case(config.verification_hash.trim()) {
        return Err(Error::IntegrityCheckFailed(format!(
            "digest mismatch for transfer {}",
            config.transfer_id
        )));
    }

    TransferAccount::from_reconstructed(&content, config)
}
