//! Account transfer agent.
//!
//! Wraps the pure `account_transfer` protocol in everything a running
//! transfer needs: the transfer-status client, the local account store, the
//! orchestrator state machine and the session task that owns it.
//!
//! | Concern            | Module              |
//! |--------------------|---------------------|
//! | Server updates     | [`sync`]            |
//! | State machine      | [`orchestrator`]    |
//! | Task + channels    | [`session`]         |
//! | Completion         | [`completion`]      |
//! | Host services      | [`collaborators`]   |
//! | Account store      | [`db`]              |
//! | Control API        | [`api`]             |

pub mod api;
pub mod collaborators;
pub mod completion;
pub mod config;
pub mod db;
pub mod errors;
pub mod orchestrator;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;
