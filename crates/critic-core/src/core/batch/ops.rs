//! Queued batch operations.
//!
//! Each accepted batch call appends one of these, already validated and with
//! every id resolved. Nothing is written until the batch finishes.

use serde::Serialize;

use crate::model::{
    Anchor, ChainId, ChainKind, ChainState, CommitId, FileId, FilterKind, ReviewFileId,
    ReviewFilter, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CommentOperation {
    /// Create a chain with its opening comment.
    CreateChain {
        kind: ChainKind,
        state: ChainState,
        addressed_by: Option<CommitId>,
        file: Option<FileId>,
        anchors: Vec<Anchor>,
        text: String,
    },
    Reply {
        chain: ChainId,
        text: String,
    },
    Resolve {
        chain: ChainId,
    },
    /// Reopen an addressed or closed issue, appending any new anchors.
    Reopen {
        chain: ChainId,
        from: ChainState,
        anchors: Vec<Anchor>,
    },
    MarkAddressed {
        chain: ChainId,
        commit: CommitId,
    },
    Morph {
        chain: ChainId,
        from: ChainKind,
        to: ChainKind,
    },
    MarkReviewed {
        files: Vec<ReviewFileId>,
    },
}

impl CommentOperation {
    /// The existing chain this operation touches, if any.
    #[must_use]
    pub const fn chain(&self) -> Option<ChainId> {
        match self {
            Self::Reply { chain, .. }
            | Self::Resolve { chain }
            | Self::Reopen { chain, .. }
            | Self::MarkAddressed { chain, .. }
            | Self::Morph { chain, .. } => Some(*chain),
            Self::CreateChain { .. } | Self::MarkReviewed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOperation {
    Add {
        user: UserId,
        path: String,
        kind: FilterKind,
    },
    Remove {
        filter: ReviewFilter,
    },
    /// Follow-up of an add or remove: collect the review files the edited
    /// pattern covers for `user`.
    Reconcile {
        user: UserId,
        path: String,
    },
}
