//! Completion collaborators bundled for the final step of a transfer.

use std::sync::Arc;

use account_transfer::{TransferAccount, TransferAccountProfile, TransferConfiguration};
use serde::Serialize;

use crate::collaborators::{Account, Authorization, NewAccount, PassphraseVerifier, Session};
use crate::orchestrator::TransferError;

/// The crypto and session services needed to finish a transfer.
#[derive(Clone)]
pub struct CompletionStep {
    crypto: Arc<dyn PassphraseVerifier>,
    session: Arc<dyn Session>,
}

/// What a completed transfer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    pub account: Account,
    pub mfa_required: Option<Vec<String>>,
}

impl CompletionStep {
    pub fn new(crypto: Arc<dyn PassphraseVerifier>, session: Arc<dyn Session>) -> Self {
        Self { crypto, session }
    }

    pub(crate) async fn verify(
        &self,
        account: &TransferAccount,
        passphrase: &str,
    ) -> Result<(), TransferError> {
        match self
            .crypto
            .verify_passphrase(&account.armored_private_key, passphrase)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransferError::InvalidPassphrase),
            Err(e) => Err(TransferError::Crypto(e.to_string())),
        }
    }

    pub(crate) async fn authorize(
        &self,
        account: &Account,
        passphrase: &str,
    ) -> Result<CompletionOutcome, TransferError> {
        let authorization = self
            .session
            .authorize(account, passphrase)
            .await
            .map_err(|e| TransferError::Authorization(e.to_string()))?;

        let mfa_required = match authorization {
            Authorization::Authorized => None,
            Authorization::MfaRequired { providers } => Some(providers),
        };
        Ok(CompletionOutcome {
            account: account.clone(),
            mfa_required,
        })
    }
}

pub(crate) fn new_account(
    config: &TransferConfiguration,
    account: &TransferAccount,
    profile: &TransferAccountProfile,
) -> NewAccount {
    NewAccount {
        user_id: account.user_id.clone(),
        domain: config.domain.clone(),
        username: profile.username.clone(),
        first_name: profile.first_name.clone(),
        last_name: profile.last_name.clone(),
        avatar_image_url: profile.avatar_image_url.clone(),
        fingerprint: account.fingerprint.clone(),
        armored_private_key: account.armored_private_key.clone(),
    }
}
