//! Error taxonomy for the reconciliation engine.

use std::fmt;

use thiserror::Error;

use crate::models::EntityKind;

/// Which remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    List,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            RemoteOp::Create => "create",
            RemoteOp::Update => "update",
            RemoteOp::Delete => "delete",
            RemoteOp::List => "list",
        };
        f.write_str(op)
    }
}

/// A failed call against the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} {kind} failed: {message}")]
pub struct RemoteError {
    pub operation: RemoteOp,
    pub kind: EntityKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(operation: RemoteOp, kind: EntityKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }
}

/// Errors surfaced to the view layer. None of them are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// A required field was empty or malformed; nothing was applied.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
