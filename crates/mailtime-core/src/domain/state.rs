//! Task state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a mail task, derived from its persisted flags.
///
/// State transitions:
/// - Pending -> Sent (dispatch succeeded)
/// - Pending -> Pending (dispatch failed, attempts < max: rescheduled)
/// - Pending -> Failed (dispatch failed, attempts >= max)
/// - Pending -> Cancelled
///
/// `Sent` also covers the in-flight claim: a tick marks the task sent before
/// handing it to a transport, and a failed send puts it back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}
