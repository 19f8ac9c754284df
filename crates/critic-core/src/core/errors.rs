//! Typed error types for the critic-core service layer.

use thiserror::Error;

use crate::model::{ChainId, CommitId, RebaseId, ReviewId};
use crate::propagate::Verdict;

/// Result type alias for core service operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the critic-core service layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Wrong review, unknown id or malformed input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The chain's current state does not permit the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Duplicate work in one batch, or another session got there first.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Anchor propagation hit a merge or a modification of the lines.
    #[error("Cannot place comment: lines hit a {verdict} at {commit}")]
    PropagationBlocked {
        verdict: &'static str,
        commit: CommitId,
    },

    #[error("Review not found: {0}")]
    ReviewNotFound(ReviewId),

    #[error("Comment chain not found: {0}")]
    ChainNotFound(ChainId),

    #[error("Rebase not found: {0}")]
    RebaseNotFound(RebaseId),

    /// A database error raised while applying a batch.
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    /// An internal storage or SCM error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub(crate) fn blocked(verdict: Verdict) -> Option<Self> {
        match verdict {
            Verdict::Clean => None,
            Verdict::Modified(commit) | Verdict::Merge(commit) => Some(Self::PropagationBlocked {
                verdict: verdict.as_str(),
                commit,
            }),
        }
    }

    /// Classify a store error, surfacing the database error unchanged when
    /// there is one underneath the context.
    pub(crate) fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<rusqlite::Error>() {
            Ok(sqlite) => Self::Storage(sqlite),
            Err(other) => Self::Internal(other),
        }
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::PropagationBlocked { .. } => "propagation_blocked",
            Self::ReviewNotFound(_) => "review_not_found",
            Self::ChainNotFound(_) => "chain_not_found",
            Self::RebaseNotFound(_) => "rebase_not_found",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }
}
