//! Transfer Orchestrator
//!
//! Drives one account transfer from the first scan to a terminal phase.
//!
//! ```text
//! AwaitingConfiguration ──page 0──► AwaitingProfile ──profile──► CollectingFragments
//!                                          │                            │
//!                                   duplicate account            last page
//!                                          ▼                            ▼
//!                                      Cancelled                  Finalizable ──► Completed
//! ```
//!
//! Any synchronizer failure moves to `Failed`; `cancel_transfer` moves any
//! non-terminal phase to `Cancelled`.
//!
//! All methods take `&mut self`: one scan is processed at a time and the
//! next cannot start before the server answered the previous one. Every
//! synchronizer call is raced against the cancellation token.

use std::future::Future;
use std::sync::Arc;

use account_transfer::{
    decode_fragment, Error as FragmentError, TransferAccount, TransferProgress, TransferState,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{same_domain, Account, Accounts};
use crate::completion::{new_account, CompletionOutcome, CompletionStep};
use crate::sync::{PageSynchronizer, SyncError};

/// Orchestrator phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Nothing scanned yet
    AwaitingConfiguration,
    /// Page 0 accepted, duplicate guard and profile fetch pending
    AwaitingProfile,
    /// Profile known, account pages being scanned
    CollectingFragments,
    /// Account reconstructed, waiting for completion or cancellation
    Finalizable,
    Completed,
    Cancelled,
    Failed,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::AwaitingConfiguration => "awaiting_configuration",
            TransferPhase::AwaitingProfile => "awaiting_profile",
            TransferPhase::CollectingFragments => "collecting_fragments",
            TransferPhase::Finalizable => "finalizable",
            TransferPhase::Completed => "completed",
            TransferPhase::Cancelled => "cancelled",
            TransferPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferPhase::Completed | TransferPhase::Cancelled | TransferPhase::Failed
        )
    }
}

/// How the caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Nothing to show, keep scanning.
    Silent,
    /// The attempt failed, the transfer goes on.
    Retryable,
    /// The transfer is over.
    Fatal,
    /// The call was not valid in the current phase.
    Misuse,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error("account {user_id} on {domain} is already on this device")]
    DuplicateAccount { user_id: String, domain: String },

    #[error("transfer-status update failed: {0}")]
    Sync(#[from] SyncError),

    #[error("could not read stored accounts: {0}")]
    AccountLookup(String),

    #[error("invalid passphrase")]
    InvalidPassphrase,

    #[error("passphrase verification failed: {0}")]
    Crypto(String),

    #[error("could not store the account: {0}")]
    AccountStorage(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("transfer is not ready to be completed")]
    IncompleteTransfer,

    #[error("no completion services are configured")]
    CompletionUnavailable,

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::Fragment(e) if e.is_silent() => ErrorClass::Silent,
            TransferError::Fragment(_)
            | TransferError::InvalidPassphrase
            | TransferError::Crypto(_)
            | TransferError::AccountStorage(_)
            | TransferError::Authorization(_) => ErrorClass::Retryable,
            TransferError::DuplicateAccount { .. }
            | TransferError::Sync(_)
            | TransferError::AccountLookup(_)
            | TransferError::Cancelled => ErrorClass::Fatal,
            TransferError::IncompleteTransfer | TransferError::CompletionUnavailable => {
                ErrorClass::Misuse
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Accepted {
        page: u16,
        progress: TransferProgress,
    },
    /// The transfer is already over.
    Ignored,
}

/// Published on the update channel as the transfer moves.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferUpdate {
    Progress(TransferProgress),
    DuplicatePage(u16),
    Rejected(TransferError),
    Finalizable {
        transfer_id: String,
        user_id: String,
        username: String,
        fingerprint: String,
    },
    Completed(CompletionOutcome),
    Cancelled(TransferError),
    Failed(TransferError),
}

/// Latest view of the transfer for pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSnapshot {
    pub phase: TransferPhase,
    pub progress: TransferProgress,
    pub transfer_id: Option<String>,
    pub highest_seen_page: u16,
    pub next_expected_page: Option<u16>,
}

impl TransferSnapshot {
    fn of(phase: TransferPhase, state: &TransferState) -> Self {
        Self {
            phase,
            progress: state.progress(),
            transfer_id: state.configuration().map(|c| c.transfer_id.clone()),
            highest_seen_page: state.highest_seen_page(),
            next_expected_page: state.next_expected_page(),
        }
    }
}

pub struct TransferOrchestrator {
    state: TransferState,
    phase: TransferPhase,
    synchronizer: Arc<dyn PageSynchronizer>,
    accounts: Arc<dyn Accounts>,
    cancel: CancellationToken,
    updates: Option<mpsc::Sender<TransferUpdate>>,
    snapshots: watch::Sender<TransferSnapshot>,
    /// Set once `add_account` succeeded so a retried completion skips it.
    stored_account: Option<Account>,
}

impl TransferOrchestrator {
    pub fn new(
        synchronizer: Arc<dyn PageSynchronizer>,
        accounts: Arc<dyn Accounts>,
        cancel: CancellationToken,
    ) -> Self {
        let state = TransferState::new();
        let phase = TransferPhase::AwaitingConfiguration;
        let (snapshots, _) = watch::channel(TransferSnapshot::of(phase, &state));
        Self {
            state,
            phase,
            synchronizer,
            accounts,
            cancel,
            updates: None,
            snapshots,
            stored_account: None,
        }
    }

    pub fn with_updates(mut self, updates: mpsc::Sender<TransferUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The reconstructed account, while it has not been stored on this
    /// device.
    pub fn unsaved_account(&self) -> Option<&TransferAccount> {
        match self.phase {
            TransferPhase::Completed => None,
            _ => self.state.account(),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Scanning
    // ─────────────────────────────────────────────────────────

    /// Process one raw scanner payload.
    pub async fn process_scan(&mut self, payload: &str) -> Result<ScanOutcome, TransferError> {
        if self.phase.is_terminal() {
            debug!(phase = self.phase.as_str(), "Scan ignored, transfer is over");
            return Ok(ScanOutcome::Ignored);
        }

        let fragment = match decode_fragment(payload) {
            Ok(fragment) => fragment,
            Err(e) => return Err(self.reject(e.into()).await),
        };
        let page = fragment.page;
        let candidate = match self.state.accept(fragment) {
            Ok(candidate) => candidate,
            Err(e) => return Err(self.reject(e.into()).await),
        };

        if self.state.configuration().is_none() {
            self.accept_configuration(candidate).await?;
        } else {
            self.accept_account_page(candidate).await?;
        }

        info!(
            transfer_id = self.transfer_id(),
            page,
            phase = self.phase.as_str(),
            "Fragment accepted"
        );
        Ok(ScanOutcome::Accepted {
            page,
            progress: self.state.progress(),
        })
    }

    async fn accept_configuration(&mut self, candidate: TransferState) -> Result<(), TransferError> {
        self.set_phase(TransferPhase::AwaitingProfile, &candidate);

        if let Some(config) = candidate.configuration() {
            let stored = match self.accounts.stored_accounts().await {
                Ok(stored) => stored,
                Err(e) => {
                    return Err(self
                        .fail(candidate, TransferError::AccountLookup(e.to_string()))
                        .await)
                }
            };
            let duplicate = stored
                .iter()
                .any(|a| a.user_id == config.user_id && same_domain(&a.domain, &config.domain));
            if duplicate {
                let error = TransferError::DuplicateAccount {
                    user_id: config.user_id.clone(),
                    domain: config.domain.clone(),
                };
                warn!(transfer_id = %config.transfer_id, "Account already stored, cancelling transfer");
                if let Err(e) = self.synchronizer.cancel(&candidate).await {
                    warn!(transfer_id = %config.transfer_id, error = %e, "Cancel request failed");
                }
                self.state = candidate;
                self.finish(TransferPhase::Cancelled, TransferUpdate::Cancelled(error.clone()))
                    .await;
                return Err(error);
            }
        }

        let synchronizer = Arc::clone(&self.synchronizer);
        let profile = match self.race(synchronizer.advance(&candidate, true)).await {
            None => return Err(self.abort().await),
            Some(Err(e)) => return Err(self.fail(candidate, e.into()).await),
            Some(Ok(profile)) => profile,
        };

        self.state = match profile {
            Some(profile) => candidate.with_profile(profile),
            None => candidate,
        };
        self.phase = TransferPhase::CollectingFragments;
        self.publish();
        self.emit(TransferUpdate::Progress(self.state.progress())).await;
        Ok(())
    }

    async fn accept_account_page(&mut self, candidate: TransferState) -> Result<(), TransferError> {
        let synchronizer = Arc::clone(&self.synchronizer);
        match self.race(synchronizer.advance(&candidate, false)).await {
            None => return Err(self.abort().await),
            Some(Err(e)) => return Err(self.fail(candidate, e.into()).await),
            Some(Ok(_)) => {}
        }
        self.state = candidate;

        let finalizable = match (
            self.state.configuration(),
            self.state.account(),
            self.state.profile(),
        ) {
            (Some(config), Some(account), profile) => Some(TransferUpdate::Finalizable {
                transfer_id: config.transfer_id.clone(),
                user_id: account.user_id.clone(),
                username: profile.map(|p| p.username.clone()).unwrap_or_default(),
                fingerprint: account.fingerprint.clone(),
            }),
            _ => None,
        };

        match finalizable {
            Some(update) => {
                self.phase = TransferPhase::Finalizable;
                self.publish();
                info!(transfer_id = self.transfer_id(), "Account reconstructed");
                self.emit(update).await;
            }
            None => {
                self.publish();
                self.emit(TransferUpdate::Progress(self.state.progress())).await;
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Completion / cancellation
    // ─────────────────────────────────────────────────────────

    /// Store the account and sign in with it.
    ///
    /// Failures keep the transfer `Finalizable` so the caller can retry.
    pub async fn complete_transfer(
        &mut self,
        step: &CompletionStep,
        passphrase: &str,
    ) -> Result<CompletionOutcome, TransferError> {
        if self.phase != TransferPhase::Finalizable {
            return Err(TransferError::IncompleteTransfer);
        }
        let (config, account, profile) = match (
            self.state.configuration(),
            self.state.account(),
            self.state.profile(),
        ) {
            (Some(c), Some(a), Some(p)) => (c.clone(), a.clone(), p.clone()),
            _ => return Err(TransferError::IncompleteTransfer),
        };

        if let Err(e) = step.verify(&account, passphrase).await {
            return Err(self.reject(e).await);
        }

        let stored = match &self.stored_account {
            Some(stored) => stored.clone(),
            None => {
                let added = self
                    .accounts
                    .add_account(new_account(&config, &account, &profile))
                    .await;
                match added {
                    Ok(stored) => {
                        self.stored_account = Some(stored.clone());
                        stored
                    }
                    Err(e) => {
                        return Err(self
                            .reject(TransferError::AccountStorage(e.to_string()))
                            .await)
                    }
                }
            }
        };

        let outcome = match step.authorize(&stored, passphrase).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.reject(e).await),
        };

        info!(
            transfer_id = %config.transfer_id,
            mfa_required = outcome.mfa_required.is_some(),
            "Transfer completed"
        );
        self.finish(
            TransferPhase::Completed,
            TransferUpdate::Completed(outcome.clone()),
        )
        .await;
        Ok(outcome)
    }

    /// Cancel the transfer. Does nothing once it is over.
    pub async fn cancel_transfer(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        if self.state.configuration().is_some() && self.phase != TransferPhase::Finalizable {
            if let Err(e) = self.synchronizer.cancel(&self.state).await {
                warn!(transfer_id = self.transfer_id(), error = %e, "Cancel request failed");
            }
        }
        info!(transfer_id = self.transfer_id(), "Transfer cancelled");
        self.finish(
            TransferPhase::Cancelled,
            TransferUpdate::Cancelled(TransferError::Cancelled),
        )
        .await;
    }

    // ─────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────

    async fn race<T>(
        &self,
        call: impl Future<Output = Result<T, SyncError>>,
    ) -> Option<Result<T, SyncError>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = call => Some(result),
        }
    }

    /// Local rejection: no state change, no network.
    async fn reject(&self, error: TransferError) -> TransferError {
        match &error {
            TransferError::Fragment(FragmentError::DuplicateFragment { page }) => {
                debug!(page, "Duplicate scan ignored");
                self.emit(TransferUpdate::DuplicatePage(*page)).await;
            }
            _ => {
                debug!(error = %error, "Attempt rejected");
                self.emit(TransferUpdate::Rejected(error.clone())).await;
            }
        }
        error
    }

    /// Fatal failure: report it to the server when possible, then stop.
    async fn fail(&mut self, candidate: TransferState, error: TransferError) -> TransferError {
        self.state = candidate;
        if self.state.configuration().is_some() {
            if let Err(e) = self
                .synchronizer
                .report_failure(&self.state, &error.to_string())
                .await
            {
                warn!(transfer_id = self.transfer_id(), error = %e, "Failure report not delivered");
            }
        }
        warn!(transfer_id = self.transfer_id(), error = %error, "Transfer failed");
        self.finish(TransferPhase::Failed, TransferUpdate::Failed(error.clone()))
            .await;
        error
    }

    /// The session was torn down while a request was in flight.
    async fn abort(&mut self) -> TransferError {
        info!(transfer_id = self.transfer_id(), "Transfer aborted");
        self.finish(
            TransferPhase::Cancelled,
            TransferUpdate::Cancelled(TransferError::Cancelled),
        )
        .await;
        TransferError::Cancelled
    }

    async fn finish(&mut self, phase: TransferPhase, update: TransferUpdate) {
        self.phase = phase;
        self.publish();
        self.emit(update).await;
    }

    /// Enter `phase` while `state` is still a candidate.
    fn set_phase(&mut self, phase: TransferPhase, state: &TransferState) {
        self.phase = phase;
        self.snapshots.send_replace(TransferSnapshot::of(phase, state));
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(TransferSnapshot::of(self.phase, &self.state));
    }

    async fn emit(&self, update: TransferUpdate) {
        if let Some(updates) = &self.updates {
            // A dropped receiver only means nobody is listening anymore.
            let _ = updates.send(update).await;
        }
    }

    fn transfer_id(&self) -> &str {
        self.state
            .configuration()
            .map(|c| c.transfer_id.as_str())
            .unwrap_or("-")
    }
}
