//! Serialized batches.
//!
//! A [`BatchRequest`] is the JSON form of a whole batch, so callers outside
//! the process (the CLI, scripts) can stage and finish one in a single step:
//!
//! ```json
//! {
//!   "review": 1,
//!   "user": 2,
//!   "comment": "first pass",
//!   "operations": [
//!     {"op": "raise_issue", "text": "Off by one", "location": {
//!       "type": "file", "version": {"commit": 4, "file": 1, "path": "src/lib.rs"},
//!       "line_index": 5, "line_count": 2}},
//!     {"op": "resolve_issue", "chain": 3}
//!   ]
//! }
//! ```

use serde::Deserialize;

use crate::model::{
    ChainId, ChainKind, CommitId, FilterId, FilterKind, Location, ReviewFileId, ReviewId, UserId,
};

use super::{FinishOptions, FinishOutcome};
use crate::core::{CoreError, CoreResult, CriticServices};

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub review: ReviewId,
    /// Acting user. Front ends may fill this in from their own notion of
    /// the current user.
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub comment: Option<String>,
    pub operations: Vec<OperationRequest>,
}

/// One batch call, named after the [`super::Batch`] method it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationRequest {
    RaiseIssue {
        text: String,
        #[serde(default)]
        location: Option<Location>,
        #[serde(default)]
        allow_initially_addressed: bool,
    },
    WriteNote {
        text: String,
        #[serde(default)]
        location: Option<Location>,
    },
    AddReply {
        chain: ChainId,
        text: String,
    },
    ResolveIssue {
        chain: ChainId,
    },
    ReopenIssue {
        chain: ChainId,
        #[serde(default)]
        location: Option<Location>,
    },
    MarkIssueAddressedBy {
        chain: ChainId,
        commit: CommitId,
    },
    MorphChain {
        chain: ChainId,
        to: ChainKind,
    },
    AssignChanges {
        user: UserId,
        files: Vec<ReviewFileId>,
    },
    UnassignChanges {
        user: UserId,
        files: Vec<ReviewFileId>,
    },
    MarkReviewed {
        files: Vec<ReviewFileId>,
    },
    AddReviewFilter {
        user: UserId,
        path: String,
        kind: FilterKind,
    },
    RemoveReviewFilter {
        filter: FilterId,
    },
}

impl BatchRequest {
    /// Stage every operation in order and finish the batch.
    ///
    /// The first rejected operation aborts the request; nothing is written.
    pub fn apply(&self, services: &CriticServices) -> CoreResult<FinishOutcome> {
        let user = self
            .user
            .ok_or_else(|| CoreError::invalid("Batch request does not name an acting user"))?;
        let mut batch = services.batch(self.review, user)?;
        for (index, op) in self.operations.iter().enumerate() {
            tracing::trace!(index, ?op, "staging operation");
            match op {
                OperationRequest::RaiseIssue {
                    text,
                    location,
                    allow_initially_addressed,
                } => batch.raise_issue(text, location.as_ref(), *allow_initially_addressed),
                OperationRequest::WriteNote { text, location } => {
                    batch.write_note(text, location.as_ref())
                }
                OperationRequest::AddReply { chain, text } => batch.add_reply(*chain, text),
                OperationRequest::ResolveIssue { chain } => batch.resolve_issue(*chain),
                OperationRequest::ReopenIssue { chain, location } => {
                    batch.reopen_issue(*chain, location.as_ref())
                }
                OperationRequest::MarkIssueAddressedBy { chain, commit } => {
                    batch.mark_issue_addressed_by(*chain, *commit)
                }
                OperationRequest::MorphChain { chain, to } => batch.morph_chain(*chain, *to),
                OperationRequest::AssignChanges { user, files } => {
                    batch.assign_changes(*user, files)
                }
                OperationRequest::UnassignChanges { user, files } => {
                    batch.unassign_changes(*user, files)
                }
                OperationRequest::MarkReviewed { files } => batch.mark_reviewed(files),
                OperationRequest::AddReviewFilter { user, path, kind } => {
                    batch.add_review_filter(*user, path, *kind)
                }
                OperationRequest::RemoveReviewFilter { filter } => {
                    batch.remove_review_filter(*filter)
                }
            }?;
        }

        batch.finish(&FinishOptions {
            comment: self.comment.clone(),
        })
    }
}
