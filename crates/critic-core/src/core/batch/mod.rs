//! Batches: stage review actions, then apply them atomically.
//!
//! Every mutator validates its arguments against the store and, for new
//! anchors, against history before queuing anything. A call that fails leaves
//! the batch exactly as it was. [`Batch::finish`] applies the queue in one
//! transaction.

mod assignments;
mod finish;
mod ops;
pub mod request;

pub use assignments::{AssignmentDelta, AssignmentTable};
pub use finish::{FinishOptions, FinishOutcome};
pub use ops::{CommentOperation, FilterOperation};
pub use request::{BatchRequest, OperationRequest};

use std::collections::BTreeSet;

use crate::filters::{self, FilterPattern};
use crate::history::CommitSet;
use crate::model::{
    Anchor, ChainId, ChainKind, ChainState, CommentChain, CommitId, FileId, FilterId, FilterKind,
    FileState, Location, Review, ReviewFile, ReviewFileId, ReviewId, UserId,
};
use crate::propagate::{Propagator, Verdict};
use crate::scm::CommitGraph;

use super::{CoreError, CoreResult, CriticServices};

/// Staged changes to one review by one user.
pub struct Batch<'a> {
    services: &'a CriticServices,
    review: Review,
    user: UserId,
    commits: CommitSet,
    comment_ops: Vec<CommentOperation>,
    filter_ops: Vec<FilterOperation>,
    assignments: AssignmentTable,
    replied_to_chains: BTreeSet<ChainId>,
    modified_issues: BTreeSet<ChainId>,
    morphed_chains: BTreeSet<ChainId>,
    added_filters: BTreeSet<(UserId, String)>,
    removed_filters: BTreeSet<FilterId>,
    reviewed_files: BTreeSet<ReviewFileId>,
}

/// Where a new or reopened chain ends up.
struct Placement {
    file: Option<FileId>,
    anchors: Vec<Anchor>,
    /// How the forward walk ended; `Clean` without a file location.
    forward: Verdict,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(
        services: &'a CriticServices,
        review: ReviewId,
        user: UserId,
    ) -> CoreResult<Self> {
        let reviews = services.reviews();
        let review = reviews.get(review)?;
        if services.db().get_user(user).map_err(CoreError::Internal)?.is_none() {
            return Err(CoreError::invalid(format!("Unknown user {user}")));
        }
        let commits = services
            .db()
            .commit_set(review.id)
            .map_err(CoreError::Internal)?;

        Ok(Self {
            services,
            review,
            user,
            commits,
            comment_ops: Vec::new(),
            filter_ops: Vec::new(),
            assignments: AssignmentTable::new(),
            replied_to_chains: BTreeSet::new(),
            modified_issues: BTreeSet::new(),
            morphed_chains: BTreeSet::new(),
            added_filters: BTreeSet::new(),
            removed_filters: BTreeSet::new(),
            reviewed_files: BTreeSet::new(),
        })
    }

    #[must_use]
    pub const fn review(&self) -> ReviewId {
        self.review.id
    }

    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    #[must_use]
    pub fn comment_operations(&self) -> &[CommentOperation] {
        &self.comment_ops
    }

    #[must_use]
    pub fn filter_operations(&self) -> &[FilterOperation] {
        &self.filter_ops
    }

    #[must_use]
    pub const fn assignments(&self) -> &AssignmentTable {
        &self.assignments
    }

    /// Whether nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comment_ops.is_empty() && self.filter_ops.is_empty() && self.assignments.is_empty()
    }

    // ------------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------------

    /// Raise an issue, optionally anchored at `location`.
    ///
    /// When a later commit already changed the lines, the call fails unless
    /// `allow_initially_addressed` is set, in which case the issue is created
    /// addressed by that commit.
    pub fn raise_issue(
        &mut self,
        text: &str,
        location: Option<&Location>,
        allow_initially_addressed: bool,
    ) -> CoreResult<()> {
        let text = non_empty(text)?;
        let placement = self.place(location, None)?;

        let (state, addressed_by) = match placement.forward {
            Verdict::Modified(commit) if allow_initially_addressed => {
                (ChainState::Addressed, Some(commit))
            }
            verdict => match CoreError::blocked(verdict) {
                Some(err) => return Err(err),
                None => (ChainState::Open, None),
            },
        };

        self.comment_ops.push(CommentOperation::CreateChain {
            kind: ChainKind::Issue,
            state,
            addressed_by,
            file: placement.file,
            anchors: placement.anchors,
            text,
        });
        Ok(())
    }

    /// Write a note, optionally anchored at `location`.
    ///
    /// Notes have no addressed state, so later modifications only cut the
    /// propagated anchors short.
    pub fn write_note(&mut self, text: &str, location: Option<&Location>) -> CoreResult<()> {
        let text = non_empty(text)?;
        let placement = self.place(location, None)?;

        self.comment_ops.push(CommentOperation::CreateChain {
            kind: ChainKind::Note,
            state: ChainState::Open,
            addressed_by: None,
            file: placement.file,
            anchors: placement.anchors,
            text,
        });
        Ok(())
    }

    /// Reply to an existing chain. At most one reply per chain per batch.
    pub fn add_reply(&mut self, chain: ChainId, text: &str) -> CoreResult<()> {
        let text = non_empty(text)?;
        self.load_chain(chain)?;
        if self.replied_to_chains.contains(&chain) {
            return Err(CoreError::conflict(format!(
                "{chain} already has a reply in this batch"
            )));
        }

        self.replied_to_chains.insert(chain);
        self.comment_ops.push(CommentOperation::Reply { chain, text });
        Ok(())
    }

    /// Close an open issue.
    pub fn resolve_issue(&mut self, chain: ChainId) -> CoreResult<()> {
        let current = self.load_issue_for_change(chain)?;
        if current.state != ChainState::Open {
            return Err(CoreError::state(format!(
                "{chain} is {}, only open issues can be resolved",
                current.state
            )));
        }

        self.modified_issues.insert(chain);
        self.comment_ops.push(CommentOperation::Resolve { chain });
        Ok(())
    }

    /// Reopen an addressed or closed issue.
    ///
    /// An addressed issue's lines are gone, so reopening it requires a new
    /// location; the new anchors are propagated and appended to the chain.
    pub fn reopen_issue(&mut self, chain: ChainId, location: Option<&Location>) -> CoreResult<()> {
        let current = self.load_issue_for_change(chain)?;
        match current.state {
            ChainState::Open => {
                return Err(CoreError::state(format!("{chain} is already open")));
            }
            ChainState::Addressed if location.is_none() => {
                return Err(CoreError::state(format!(
                    "{chain} was addressed; reopening it needs a new location"
                )));
            }
            ChainState::Addressed | ChainState::Closed => {}
        }

        let anchors = match location {
            Some(location) => {
                check_same_scope(&current, location)?;
                let placement = self.place(Some(location), Some(&current))?;
                if let Some(err) = CoreError::blocked(placement.forward) {
                    return Err(err);
                }
                placement.anchors
            }
            None => Vec::new(),
        };

        self.modified_issues.insert(chain);
        self.comment_ops.push(CommentOperation::Reopen {
            chain,
            from: current.state,
            anchors,
        });
        Ok(())
    }

    /// Mark an open issue as addressed by `commit`.
    pub fn mark_issue_addressed_by(&mut self, chain: ChainId, commit: CommitId) -> CoreResult<()> {
        let current = self.load_issue_for_change(chain)?;
        if current.state != ChainState::Open {
            return Err(CoreError::state(format!(
                "{chain} is {}, only open issues can be addressed",
                current.state
            )));
        }
        if !self.commits.contains(commit) {
            return Err(CoreError::invalid(format!(
                "Commit {commit} is not part of {}",
                self.review.id
            )));
        }

        self.modified_issues.insert(chain);
        self.comment_ops
            .push(CommentOperation::MarkAddressed { chain, commit });
        Ok(())
    }

    /// Turn an issue into a note or a note into an issue.
    pub fn morph_chain(&mut self, chain: ChainId, to: ChainKind) -> CoreResult<()> {
        let current = self.load_chain(chain)?;
        if current.kind == to {
            return Err(CoreError::state(format!("{chain} is already a {to}")));
        }
        if to == ChainKind::Note && current.state != ChainState::Open {
            return Err(CoreError::state(format!(
                "{chain} is {}; notes cannot be {}",
                current.state, current.state
            )));
        }
        if self.morphed_chains.contains(&chain) {
            return Err(CoreError::conflict(format!(
                "{chain} is already being morphed in this batch"
            )));
        }
        if self.modified_issues.contains(&chain) {
            return Err(CoreError::conflict(format!(
                "{chain} already has a state change in this batch"
            )));
        }

        self.morphed_chains.insert(chain);
        self.comment_ops.push(CommentOperation::Morph {
            chain,
            from: current.kind,
            to,
        });
        Ok(())
    }

    /// Mark pending review files as reviewed.
    pub fn mark_reviewed(&mut self, files: &[ReviewFileId]) -> CoreResult<()> {
        let loaded = self.load_review_files(files)?;
        let mut seen = BTreeSet::new();
        for file in &loaded {
            if file.state != FileState::Pending {
                return Err(CoreError::state(format!("{} is already reviewed", file.id)));
            }
            if self.reviewed_files.contains(&file.id) || !seen.insert(file.id) {
                return Err(CoreError::conflict(format!(
                    "{} is already marked in this batch",
                    file.id
                )));
            }
        }

        self.reviewed_files.extend(loaded.iter().map(|file| file.id));
        self.comment_ops.push(CommentOperation::MarkReviewed {
            files: loaded.iter().map(|file| file.id).collect(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Assignments and filters
    // ------------------------------------------------------------------------

    pub fn assign_changes(&mut self, user: UserId, files: &[ReviewFileId]) -> CoreResult<()> {
        self.check_user(user)?;
        let loaded = self.load_review_files(files)?;
        for file in &loaded {
            self.assignments.assign(user, file);
        }
        Ok(())
    }

    pub fn unassign_changes(&mut self, user: UserId, files: &[ReviewFileId]) -> CoreResult<()> {
        self.check_user(user)?;
        let loaded = self.load_review_files(files)?;
        for file in &loaded {
            self.assignments.unassign(user, file);
        }
        Ok(())
    }

    /// Add a filter for `user`. The pattern uses gitignore syntax; empty or
    /// `/` covers every path.
    pub fn add_review_filter(&mut self, user: UserId, path: &str, kind: FilterKind) -> CoreResult<()> {
        self.check_user(user)?;
        FilterPattern::compile(path).map_err(|e| CoreError::invalid(format!("{e:#}")))?;
        let path = filters::normalize_pattern(path);

        let key = (user, path.clone());
        if self.added_filters.contains(&key) {
            return Err(CoreError::conflict(format!(
                "A filter for {user} on '{path}' is already staged in this batch"
            )));
        }
        let existing = self
            .services
            .db()
            .filters(self.review.id)
            .map_err(CoreError::Internal)?
            .into_iter()
            .find(|filter| filter.user == user && filter.path == path);
        if let Some(existing) = existing {
            if !self.removed_filters.contains(&existing.id) {
                return Err(CoreError::conflict(format!(
                    "{user} already has a {} filter on '{path}'",
                    existing.kind
                )));
            }
        }

        self.added_filters.insert(key);
        self.filter_ops.push(FilterOperation::Add { user, path, kind });
        Ok(())
    }

    pub fn remove_review_filter(&mut self, filter: FilterId) -> CoreResult<()> {
        let existing = self
            .services
            .db()
            .get_filter(filter)
            .map_err(CoreError::Internal)?
            .filter(|existing| existing.review == self.review.id)
            .ok_or_else(|| {
                CoreError::invalid(format!("Filter {filter} does not belong to {}", self.review.id))
            })?;
        if self.removed_filters.contains(&filter) {
            return Err(CoreError::conflict(format!(
                "Filter {filter} is already being removed in this batch"
            )));
        }
        if self
            .added_filters
            .contains(&(existing.user, existing.path.clone()))
        {
            return Err(CoreError::conflict(format!(
                "A replacement for filter {filter} is already staged in this batch"
            )));
        }

        self.removed_filters.insert(filter);
        self.filter_ops
            .push(FilterOperation::Remove { filter: existing });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Validation helpers
    // ------------------------------------------------------------------------

    fn check_user(&self, user: UserId) -> CoreResult<()> {
        if self
            .services
            .db()
            .get_user(user)
            .map_err(CoreError::Internal)?
            .is_none()
        {
            return Err(CoreError::invalid(format!("Unknown user {user}")));
        }
        Ok(())
    }

    fn load_chain(&self, chain: ChainId) -> CoreResult<CommentChain> {
        let loaded = self
            .services
            .db()
            .get_chain(chain)
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::invalid(format!("Unknown comment chain {chain}")))?;
        if loaded.review != self.review.id {
            return Err(CoreError::invalid(format!(
                "{chain} does not belong to {}",
                self.review.id
            )));
        }
        Ok(loaded)
    }

    /// Load an issue about to change state, enforcing one change per batch.
    fn load_issue_for_change(&self, chain: ChainId) -> CoreResult<CommentChain> {
        let loaded = self.load_chain(chain)?;
        if !loaded.is_issue() {
            return Err(CoreError::state(format!("{chain} is a note, not an issue")));
        }
        if self.modified_issues.contains(&chain) {
            return Err(CoreError::conflict(format!(
                "{chain} already has a state change in this batch"
            )));
        }
        if self.morphed_chains.contains(&chain) {
            return Err(CoreError::conflict(format!(
                "{chain} is being morphed in this batch"
            )));
        }
        Ok(loaded)
    }

    fn load_review_files(&self, ids: &[ReviewFileId]) -> CoreResult<Vec<ReviewFile>> {
        if ids.is_empty() {
            return Err(CoreError::invalid("No review files given"));
        }
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            let file = self
                .services
                .db()
                .review_file(*id)
                .map_err(CoreError::Internal)?
                .filter(|file| file.review == self.review.id)
                .ok_or_else(|| {
                    CoreError::invalid(format!("{id} does not belong to {}", self.review.id))
                })?;
            files.push(file);
        }
        Ok(files)
    }

    /// Resolve a location into anchors, propagating file anchors through
    /// history. `existing` is the chain being re-anchored, if any.
    fn place(
        &self,
        location: Option<&Location>,
        existing: Option<&CommentChain>,
    ) -> CoreResult<Placement> {
        let Some(location) = location else {
            return Ok(Placement {
                file: None,
                anchors: Vec::new(),
                forward: Verdict::Clean,
            });
        };

        if location.line_count() == 0 {
            return Err(CoreError::invalid("Line count must be at least 1"));
        }
        let (Some(first_line), Some(_)) = (location.first_line(), location.end_line()) else {
            return Err(CoreError::invalid("Line range is out of bounds"));
        };
        let commit = location.commit();
        let Some(sha) = self.commits.commit(commit).map(|c| c.sha.clone()) else {
            return Err(CoreError::invalid(format!(
                "Commit {commit} is not part of {}",
                self.review.id
            )));
        };

        match location {
            Location::CommitMessage { .. } => Ok(Placement {
                file: None,
                anchors: vec![Anchor::commit_message(
                    commit,
                    first_line,
                    location.line_count(),
                )],
                forward: Verdict::Clean,
            }),
            Location::File { version, .. } => {
                let path = self
                    .services
                    .db()
                    .file_path(version.file)
                    .map_err(CoreError::Internal)?;
                if path.as_deref() != Some(version.path.as_str()) {
                    return Err(CoreError::invalid(format!(
                        "File {} is not '{}'",
                        version.file, version.path
                    )));
                }
                let hash = self
                    .services
                    .diffs()
                    .content_hash(&sha, &version.path)
                    .map_err(CoreError::Internal)?
                    .ok_or_else(|| {
                        CoreError::invalid(format!(
                            "'{}' does not exist at {commit}",
                            version.path
                        ))
                    })?;

                let start = Anchor::file(commit, hash, first_line, location.line_count());
                let propagator = Propagator::new(&self.commits, self.services.diffs());
                let both = propagator
                    .propagate_both(&version.path, &start, existing)
                    .map_err(CoreError::Internal)?;

                if let Some(merge) = both.merge() {
                    return Err(CoreError::PropagationBlocked {
                        verdict: "merge",
                        commit: merge,
                    });
                }
                Ok(Placement {
                    file: Some(version.file),
                    anchors: both.all_anchors(&start),
                    forward: both.forward.verdict,
                })
            }
        }
    }
}

fn non_empty(text: &str) -> CoreResult<String> {
    if text.trim().is_empty() {
        return Err(CoreError::invalid("Comment text cannot be empty"));
    }
    Ok(text.to_string())
}

/// A chain keeps its scope: file chains stay on their file, commit-message
/// chains stay in commit messages.
fn check_same_scope(chain: &CommentChain, location: &Location) -> CoreResult<()> {
    let matches = match (location, &chain.file) {
        (Location::File { version, .. }, Some(file)) => version.file == file.id,
        (Location::CommitMessage { .. }, None) => chain
            .anchors
            .iter()
            .all(|anchor| anchor.content_hash.is_none()),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(CoreError::invalid(format!(
            "{} cannot be re-anchored at a different kind of location",
            chain.id
        )))
    }
}
