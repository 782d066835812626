//! Error types, one enum per layer.
//!
//! Tangle failures surface through the log as [`StoreError`], and the engine wraps log failures
//! in [`DictError::Publish`] with the step that was running.

use thiserror::Error;

use crate::msg::{AccountId, MsgId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TangleError {
    /// A message references a predecessor this tangle does not have yet.
    ///
    /// Delivery is expected to be causal, so this indicates an upstream ordering bug rather than
    /// something to queue and retry.
    #[error("missing predecessor {0}")]
    MissingParent(MsgId),
    /// A message claims to belong to a different tangle.
    #[error("message belongs to tangle {found}, not {expected}")]
    RootMismatch { expected: MsgId, found: MsgId },
    /// The root itself was given predecessors.
    #[error("tangle root cannot have predecessors")]
    RootWithParents,
}

/// Failures reported by the message log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot append message: {0}")]
    Tangle(#[from] TangleError),
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("message log is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DictError {
    #[error("no account loaded; call load() first")]
    NotLoaded,
    #[error("already loaded for account {0}")]
    AlreadyLoaded(AccountId),
    #[error("cannot modify another account's record (given account {0})")]
    ForeignAccount(AccountId),
    #[error("ghost span must be at least 1, got {0}")]
    InvalidGhostSpan(u64),
    #[error("tangle {0} not found")]
    TangleNotFound(MsgId),
    #[error("message {0} not found")]
    MsgNotFound(MsgId),
    #[error("tangle {id} is invalid: {reason}")]
    InvalidTangle { id: MsgId, reason: &'static str },
    #[error("{context}")]
    Publish {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// The message exists but is rooted outside the local dict being waited on.
    #[error("message {id} is not part of dict {subdomain}")]
    NotInDict { id: MsgId, subdomain: String },
    /// The message sits in the dict's tangle but is not a valid moot or update of its owner.
    #[error("message {0} carries no valid dict update")]
    Filtered(MsgId),
    #[error("message {id} could not be attached to its tangle")]
    Detached {
        id: MsgId,
        #[source]
        source: TangleError,
    },
    #[error("dict engine is closed")]
    Closed,
}

impl DictError {
    pub(crate) fn publish(
        context: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Publish {
            context,
            source: Box::new(source),
        }
    }
}
