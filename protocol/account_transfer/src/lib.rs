//! # Account Transfer Protocol
//!
//! Pure logic for importing an account from a sequence of QR codes shown by
//! another device. Nothing in this crate performs I/O; the network side of the
//! protocol lives in the `transfer-agent` backend crate.
//!
//! | Step           | Entry Point(s)                                   |
//! |----------------|--------------------------------------------------|
//! | Decode a scan  | [`decode_fragment`]                              |
//! | Accumulate     | [`TransferState::accept`]                        |
//! | Position       | `next_expected_page`, `highest_seen_page`        |
//! | Progress       | [`TransferState::progress`]                      |
//!
//! ## Architecture
//!
//! Wire shapes and the data model live in [`types`]. Payload parsing lives in
//! [`fragment`]. The reconstruction algorithm lives in [`state`]. This file
//! only holds the error taxonomy shared by all of them.

use thiserror::Error;

pub mod fragment;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_reconstruction;

pub use fragment::{decode_fragment, encode_fragment, MAX_PAGES, PROTOCOL_VERSION};
pub use state::{content_digest, TransferProgress, TransferState};
pub use types::{
    ScanningFragment, TransferAccount, TransferAccountProfile, TransferConfiguration,
};

/// Everything that can go wrong while turning scans into an account.
///
/// None of these touch the server: the caller decides whether a rejection is
/// worth reporting. See [`Error::is_silent`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    #[error("page {page} was already scanned")]
    DuplicateFragment { page: u16 },

    #[error("expected page {expected}, scanned page {received}")]
    FragmentOutOfOrder { expected: u16, received: u16 },

    #[error("invalid transfer configuration: {0}")]
    InvalidConfiguration(String),

    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    #[error("invalid account data: {0}")]
    InvalidAccountData(String),

    #[error("page {page} scanned after the account was already reconstructed")]
    UnexpectedFragment { page: u16 },
}

impl Error {
    /// Duplicates are expected while a QR code stays in front of the camera
    /// and should not be surfaced to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::DuplicateFragment { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
