use crate::ActionStatus;
use crate::syntax::SyntaxError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of [`ActionError`], stored on history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    PolicyViolation,
    Execution,
    Snapshot,
    UndoUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::Execution => "execution",
            ErrorKind::Snapshot => "snapshot",
            ErrorKind::UndoUnavailable => "undo_unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("{0}")]
    PolicyViolation(String),
    #[error("Execution failed: {0}")]
    Execution(String),
    #[error("Snapshot failed: {0}")]
    Snapshot(String),
    #[error("Undo unavailable: {0}")]
    UndoUnavailable(String),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Syntax(_) => ErrorKind::Syntax,
            ActionError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            ActionError::Execution(_) => ErrorKind::Execution,
            ActionError::Snapshot(_) => ErrorKind::Snapshot,
            ActionError::UndoUnavailable(_) => ErrorKind::UndoUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: ActionStatus,
        to: ActionStatus,
    },
}
