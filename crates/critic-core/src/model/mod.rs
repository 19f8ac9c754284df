//! Domain value objects shared by the store, the propagator and the batch engine.
//!
//! Entities refer to each other by id only; anything that needs the referenced
//! object looks it up through the store.

pub mod ids;

pub use ids::{
    BatchId, ChainId, ChangesetId, CommentId, CommitId, FileId, FilterId, RebaseId, ReviewFileId,
    ReviewId, TransactionId, UserId,
};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Kind of a comment chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Something that must be fixed before the review is accepted.
    Issue,
    /// A remark that never blocks acceptance.
    Note,
}

impl ChainKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Note => "note",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "issue" => Some(Self::Issue),
            "note" => Some(Self::Note),
            _ => None,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a comment chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    Open,
    /// The commented lines were changed by a later commit.
    Addressed,
    /// Explicitly resolved by a user.
    Closed,
}

impl ChainState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Addressed => "addressed",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "addressed" => Some(Self::Addressed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a review filter makes its user responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Assigned to review matching files.
    Reviewer,
    /// Notified about matching files, never assigned.
    Watcher,
    /// Neither; overrides a less specific reviewer or watcher filter.
    Ignored,
}

impl FilterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reviewer => "reviewer",
            Self::Watcher => "watcher",
            Self::Ignored => "ignored",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reviewer" => Some(Self::Reviewer),
            "watcher" => Some(Self::Watcher),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review state of a single review file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Pending,
    Reviewed,
}

impl FileState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "reviewed" => Some(Self::Reviewed),
            _ => None,
        }
    }
}

// ============================================================================
// Commits and reviews
// ============================================================================

/// A commit tracked by a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub id: CommitId,
    pub sha: String,
    /// Parent commits in parent order. May reference commits outside the review.
    pub parents: Vec<CommitId>,
    pub author: Option<UserId>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: ReviewId,
    pub summary: String,
    pub branch: String,
    pub owner: UserId,
    pub head: Option<CommitId>,
    /// Bumped on every finished batch so pollers can detect changes.
    pub serial: i64,
    pub created_at: String,
}

/// A (parent, child) commit pair and its per-file line counts.
#[derive(Debug, Clone, Serialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub review: ReviewId,
    pub parent: Option<CommitId>,
    pub child: CommitId,
}

/// One file changed by one changeset of a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewFile {
    pub id: ReviewFileId,
    pub review: ReviewId,
    pub changeset: ChangesetId,
    pub file: FileId,
    pub path: String,
    pub deleted: u32,
    pub inserted: u32,
    pub state: FileState,
    /// Author of the changeset's child commit.
    pub author: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewFilter {
    pub id: FilterId,
    pub review: ReviewId,
    pub user: UserId,
    pub path: String,
    pub kind: FilterKind,
    pub creator: UserId,
}

/// A rebase of the reviewed branch. `new_head` is `None` while in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rebase {
    pub id: RebaseId,
    pub review: ReviewId,
    pub user: UserId,
    pub old_head: CommitId,
    pub new_head: Option<CommitId>,
    pub new_upstream: Option<CommitId>,
    pub branch: Option<String>,
}

impl Rebase {
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.new_head.is_none()
    }
}

// ============================================================================
// Comment chains
// ============================================================================

/// A location a chain is pinned to at one commit.
///
/// `content_hash` identifies the file version for file-scoped anchors and is
/// `None` for anchors in a commit message. `first_line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor {
    pub commit: CommitId,
    pub content_hash: Option<String>,
    pub first_line: u32,
    pub line_count: u32,
}

impl Anchor {
    #[must_use]
    pub fn file(commit: CommitId, content_hash: impl Into<String>, first_line: u32, line_count: u32) -> Self {
        Self {
            commit,
            content_hash: Some(content_hash.into()),
            first_line,
            line_count,
        }
    }

    #[must_use]
    pub const fn commit_message(commit: CommitId, first_line: u32, line_count: u32) -> Self {
        Self {
            commit,
            content_hash: None,
            first_line,
            line_count,
        }
    }

    /// One past the last anchored line.
    #[must_use]
    pub fn end_line(&self) -> u64 {
        u64::from(self.first_line) + u64::from(self.line_count)
    }
}

/// The file a chain is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFile {
    pub id: FileId,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub chain: ChainId,
    pub batch: Option<BatchId>,
    pub author: UserId,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentChain {
    pub id: ChainId,
    pub review: ReviewId,
    pub creator: UserId,
    pub created_at: DateTime<Utc>,
    pub kind: ChainKind,
    pub state: ChainState,
    pub addressed_by: Option<CommitId>,
    pub closed_by: Option<UserId>,
    pub file: Option<ChainFile>,
    /// First comment is the opening comment.
    pub comments: Vec<Comment>,
    /// Every anchor ever recorded, oldest first. Empty for general chains.
    pub anchors: Vec<Anchor>,
}

impl CommentChain {
    #[must_use]
    pub const fn is_issue(&self) -> bool {
        matches!(self.kind, ChainKind::Issue)
    }

    /// Whether any recorded anchor points at a file version with this hash.
    #[must_use]
    pub fn covers_version(&self, content_hash: &str) -> bool {
        self.anchors
            .iter()
            .any(|anchor| anchor.content_hash.as_deref() == Some(content_hash))
    }
}

/// A file as it exists at one commit of a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub commit: CommitId,
    pub file: FileId,
    pub path: String,
}

/// Where a new comment is placed. `line_index` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    File {
        version: FileVersion,
        line_index: u32,
        line_count: u32,
    },
    CommitMessage {
        commit: CommitId,
        line_index: u32,
        line_count: u32,
    },
}

impl Location {
    #[must_use]
    pub const fn commit(&self) -> CommitId {
        match self {
            Self::File { version, .. } => version.commit,
            Self::CommitMessage { commit, .. } => *commit,
        }
    }

    #[must_use]
    pub const fn line_count(&self) -> u32 {
        match self {
            Self::File { line_count, .. } | Self::CommitMessage { line_count, .. } => *line_count,
        }
    }

    /// The 1-based first line, or `None` when `line_index` is out of range.
    #[must_use]
    pub const fn first_line(&self) -> Option<u32> {
        match self {
            Self::File { line_index, .. } | Self::CommitMessage { line_index, .. } => {
                line_index.checked_add(1)
            }
        }
    }

    /// One past the last line, or `None` when the range does not fit in `u32`.
    #[must_use]
    pub const fn end_line(&self) -> Option<u32> {
        match self.first_line() {
            Some(first) => first.checked_add(self.line_count()),
            None => None,
        }
    }
}
