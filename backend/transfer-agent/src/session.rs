//! Session task — owns the orchestrator and serialises every command.
//!
//! The host talks to a running transfer through a cloneable
//! [`SessionHandle`]: scans, completion and cancellation go in on one
//! channel and are processed strictly in arrival order; updates come out on
//! the orchestrator's update channel and the latest snapshot on a `watch`.
//! Cancelling the token tears the session down.

use account_transfer::TransferProgress;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::completion::{CompletionOutcome, CompletionStep};
use crate::orchestrator::{
    ScanOutcome, TransferError, TransferOrchestrator, TransferPhase, TransferSnapshot,
};

#[derive(Debug)]
pub enum SessionCommand {
    Scan {
        payload: String,
        reply: oneshot::Sender<Result<ScanOutcome, TransferError>>,
    },
    Complete {
        passphrase: String,
        reply: oneshot::Sender<Result<CompletionOutcome, TransferError>>,
    },
    Cancel {
        reply: oneshot::Sender<TransferSnapshot>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<TransferSnapshot>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Deliver one raw scanner payload. Once the session is over every scan
    /// is ignored.
    pub async fn scan(&self, payload: impl Into<String>) -> Result<ScanOutcome, TransferError> {
        let (reply, response) = oneshot::channel();
        let command = SessionCommand::Scan {
            payload: payload.into(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return Ok(ScanOutcome::Ignored);
        }
        response.await.unwrap_or(Ok(ScanOutcome::Ignored))
    }

    pub async fn complete(
        &self,
        passphrase: impl Into<String>,
    ) -> Result<CompletionOutcome, TransferError> {
        let (reply, response) = oneshot::channel();
        let command = SessionCommand::Complete {
            passphrase: passphrase.into(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return Err(TransferError::IncompleteTransfer);
        }
        response
            .await
            .unwrap_or(Err(TransferError::IncompleteTransfer))
    }

    pub async fn cancel(&self) -> TransferSnapshot {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Cancel { reply })
            .await
            .is_err()
        {
            return self.snapshot();
        }
        response.await.unwrap_or_else(|_| self.snapshot())
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Resolves once the transfer is finalizable or over.
    pub async fn settled(&self) -> TransferSnapshot {
        let mut snapshots = self.snapshots.clone();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            if is_settled(snapshot.phase) {
                return snapshot;
            }
            if snapshots.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    /// Tear the session down, aborting any request in flight.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct TransferSession;

impl TransferSession {
    /// Move the orchestrator into its own task. The task hands it back once
    /// the transfer is over.
    pub fn spawn(
        orchestrator: TransferOrchestrator,
        completion: Option<CompletionStep>,
        capacity: usize,
    ) -> (SessionHandle, JoinHandle<TransferOrchestrator>) {
        let (commands, inbox) = mpsc::channel(capacity.max(1));
        let handle = SessionHandle {
            commands,
            snapshots: orchestrator.subscribe(),
            cancel: orchestrator.cancel_token(),
        };
        let task = tokio::spawn(run(orchestrator, completion, inbox));
        (handle, task)
    }
}

async fn run(
    mut orchestrator: TransferOrchestrator,
    completion: Option<CompletionStep>,
    mut inbox: mpsc::Receiver<SessionCommand>,
) -> TransferOrchestrator {
    let cancel = orchestrator.cancel_token();

    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                orchestrator.cancel_transfer().await;
                break;
            }
            command = inbox.recv() => match command {
                Some(command) => command,
                None => {
                    debug!("All session handles dropped");
                    orchestrator.cancel_transfer().await;
                    break;
                }
            },
        };

        match command {
            SessionCommand::Scan { payload, reply } => {
                let result = orchestrator.process_scan(&payload).await;
                let _ = reply.send(result);
            }
            SessionCommand::Complete { passphrase, reply } => {
                let result = match &completion {
                    Some(step) => orchestrator.complete_transfer(step, &passphrase).await,
                    None => Err(TransferError::CompletionUnavailable),
                };
                let _ = reply.send(result);
            }
            SessionCommand::Cancel { reply } => {
                orchestrator.cancel_transfer().await;
                let _ = reply.send(orchestrator.snapshot());
            }
        }

        if orchestrator.phase().is_terminal() {
            break;
        }
    }

    let snapshot = orchestrator.snapshot();
    info!(
        phase = snapshot.phase.as_str(),
        transfer_id = snapshot.transfer_id.as_deref().unwrap_or("-"),
        finished = matches!(snapshot.progress, TransferProgress::ScanningFinished),
        "Transfer session ended"
    );
    orchestrator
}

/// Whether the binary has nothing left to do for this transfer.
pub fn is_settled(phase: TransferPhase) -> bool {
    phase.is_terminal() || phase == TransferPhase::Finalizable
}
