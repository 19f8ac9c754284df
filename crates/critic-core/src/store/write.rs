//! Write helpers over a connection or an open transaction.
//!
//! Conditional updates return the number of affected rows so callers can tell
//! a lost race (zero rows) from success.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::model::{
    Anchor, BatchId, ChainId, ChainKind, ChainState, ChangesetId, CommentId, CommitId, FileId,
    FilterId, FilterKind, RebaseId, ReviewFileId, ReviewId, TransactionId, UserId,
};

fn now() -> String {
    Utc::now().to_rfc3339()
}

// ============================================================================
// Users, files, commits
// ============================================================================

/// Get or create a user by name.
pub fn ensure_user(conn: &Connection, name: &str, email: Option<&str>) -> Result<UserId> {
    conn.execute(
        "INSERT INTO users (name, email) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET email = COALESCE(excluded.email, users.email)",
        params![name, email],
    )
    .with_context(|| format!("Failed to upsert user {name}"))?;
    conn.query_row("SELECT id FROM users WHERE name = ?", [name], |row| row.get(0))
        .with_context(|| format!("Failed to look up user {name}"))
}

/// Get or create a file by repository-relative path.
pub fn ensure_file(conn: &Connection, path: &str) -> Result<FileId> {
    conn.execute("INSERT OR IGNORE INTO files (path) VALUES (?)", [path])
        .with_context(|| format!("Failed to insert file {path}"))?;
    conn.query_row("SELECT id FROM files WHERE path = ?", [path], |row| row.get(0))
        .with_context(|| format!("Failed to look up file {path}"))
}

/// Get or create a commit by sha. Known author and summary are kept when the
/// new values are empty.
pub fn ensure_commit(
    conn: &Connection,
    sha: &str,
    author: Option<UserId>,
    summary: &str,
) -> Result<CommitId> {
    conn.execute(
        "INSERT INTO commits (sha, author, summary) VALUES (?, ?, ?)
         ON CONFLICT(sha) DO UPDATE SET
             author = COALESCE(excluded.author, commits.author),
             summary = CASE WHEN excluded.summary = '' THEN commits.summary
                            ELSE excluded.summary END",
        params![sha, author, summary],
    )
    .with_context(|| format!("Failed to upsert commit {sha}"))?;
    conn.query_row("SELECT id FROM commits WHERE sha = ?", [sha], |row| row.get(0))
        .with_context(|| format!("Failed to look up commit {sha}"))
}

/// Replace a commit's parent list.
pub fn set_commit_parents(conn: &Connection, child: CommitId, parents: &[CommitId]) -> Result<()> {
    conn.execute("DELETE FROM commit_parents WHERE child = ?", [child])
        .context("Failed to clear commit parents")?;
    let mut stmt = conn
        .prepare("INSERT INTO commit_parents (child, idx, parent) VALUES (?, ?, ?)")
        .context("Failed to prepare commit parent insert")?;
    for (idx, parent) in parents.iter().enumerate() {
        stmt.execute(params![child, idx as i64, parent])
            .with_context(|| format!("Failed to record parent {parent} of {child}"))?;
    }
    Ok(())
}

// ============================================================================
// Reviews
// ============================================================================

pub fn insert_review(
    conn: &Connection,
    summary: &str,
    branch: &str,
    owner: UserId,
) -> Result<ReviewId> {
    conn.execute(
        "INSERT INTO reviews (summary, branch, owner, created_at) VALUES (?, ?, ?, ?)",
        params![summary, branch, owner, now()],
    )
    .context("Failed to insert review")?;
    let review = ReviewId(conn.last_insert_rowid());
    conn.execute(
        "INSERT INTO review_users (review, user, owner) VALUES (?, ?, 1)",
        params![review, owner],
    )
    .context("Failed to record review owner")?;
    Ok(review)
}

pub fn add_review_commit(conn: &Connection, review: ReviewId, commit: CommitId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO review_commits (review, commit_id) VALUES (?, ?)",
        params![review, commit],
    )
    .context("Failed to add commit to review")?;
    Ok(())
}

pub fn set_review_head(conn: &Connection, review: ReviewId, head: CommitId) -> Result<()> {
    conn.execute(
        "UPDATE reviews SET head = ? WHERE id = ?",
        params![head, review],
    )
    .context("Failed to update review head")?;
    Ok(())
}

pub fn set_review_branch(conn: &Connection, review: ReviewId, branch: &str) -> Result<()> {
    conn.execute(
        "UPDATE reviews SET branch = ? WHERE id = ?",
        params![branch, review],
    )
    .context("Failed to rename review branch")?;
    Ok(())
}

/// Record `user` as a participant; no-op when already present.
pub fn add_review_user(conn: &Connection, review: ReviewId, user: UserId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO review_users (review, user, owner) VALUES (?, ?, 0)",
        params![review, user],
    )
    .context("Failed to record review participant")?;
    Ok(())
}

/// Bump the change serial pollers use to detect updates.
pub fn bump_serial(conn: &Connection, review: ReviewId) -> Result<()> {
    conn.execute(
        "UPDATE reviews SET serial = serial + 1 WHERE id = ?",
        [review],
    )
    .context("Failed to bump review serial")?;
    Ok(())
}

pub fn insert_changeset(
    conn: &Connection,
    review: ReviewId,
    parent: Option<CommitId>,
    child: CommitId,
) -> Result<ChangesetId> {
    conn.execute(
        "INSERT INTO changesets (review, parent, child) VALUES (?, ?, ?)",
        params![review, parent, child],
    )
    .context("Failed to insert changeset")?;
    Ok(ChangesetId(conn.last_insert_rowid()))
}

pub fn insert_review_file(
    conn: &Connection,
    review: ReviewId,
    changeset: ChangesetId,
    file: FileId,
    deleted: u32,
    inserted: u32,
) -> Result<ReviewFileId> {
    conn.execute(
        "INSERT INTO review_files (review, changeset, file, deleted, inserted)
         VALUES (?, ?, ?, ?, ?)",
        params![review, changeset, file, deleted, inserted],
    )
    .context("Failed to insert review file")?;
    Ok(ReviewFileId(conn.last_insert_rowid()))
}

/// Mark a pending review file as reviewed. Returns affected rows.
pub fn mark_file_reviewed(conn: &Connection, file: ReviewFileId, user: UserId) -> Result<usize> {
    conn.execute(
        "UPDATE review_files SET state = 'reviewed', reviewed_by = ?
         WHERE id = ? AND state = 'pending'",
        params![user, file],
    )
    .context("Failed to mark review file as reviewed")
}

// ============================================================================
// Rebases
// ============================================================================

pub fn insert_rebase(
    conn: &Connection,
    review: ReviewId,
    user: UserId,
    old_head: CommitId,
    branch: Option<&str>,
) -> Result<RebaseId> {
    conn.execute(
        "INSERT INTO review_rebases (review, user, old_head, branch, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![review, user, old_head, branch, now()],
    )
    .context("Failed to insert rebase")?;
    Ok(RebaseId(conn.last_insert_rowid()))
}

/// Complete an in-progress rebase. Returns affected rows.
pub fn complete_rebase(
    conn: &Connection,
    rebase: RebaseId,
    new_head: CommitId,
    new_upstream: Option<CommitId>,
) -> Result<usize> {
    conn.execute(
        "UPDATE review_rebases SET new_head = ?, new_upstream = ?
         WHERE id = ? AND new_head IS NULL",
        params![new_head, new_upstream, rebase],
    )
    .context("Failed to complete rebase")
}

/// Drop an in-progress rebase. Returns affected rows.
pub fn delete_rebase(conn: &Connection, rebase: RebaseId) -> Result<usize> {
    conn.execute(
        "DELETE FROM review_rebases WHERE id = ? AND new_head IS NULL",
        [rebase],
    )
    .context("Failed to cancel rebase")
}

// ============================================================================
// Filters and assignments
// ============================================================================

pub fn insert_assignment_transaction(
    conn: &Connection,
    review: ReviewId,
    assigner: UserId,
) -> Result<TransactionId> {
    conn.execute(
        "INSERT INTO review_assignment_transactions (review, assigner, created_at)
         VALUES (?, ?, ?)",
        params![review, assigner, now()],
    )
    .context("Failed to insert assignment transaction")?;
    Ok(TransactionId(conn.last_insert_rowid()))
}

pub fn insert_filter(
    conn: &Connection,
    review: ReviewId,
    user: UserId,
    path: &str,
    kind: FilterKind,
    creator: UserId,
) -> Result<FilterId> {
    conn.execute(
        "INSERT INTO review_filters (review, user, path, kind, creator) VALUES (?, ?, ?, ?, ?)",
        params![review, user, path, kind.as_str(), creator],
    )
    .context("Failed to insert review filter")?;
    Ok(FilterId(conn.last_insert_rowid()))
}

/// Delete a filter. Returns affected rows.
pub fn delete_filter(conn: &Connection, filter: FilterId) -> Result<usize> {
    conn.execute("DELETE FROM review_filters WHERE id = ?", [filter])
        .context("Failed to delete review filter")
}

pub fn record_filter_change(
    conn: &Connection,
    transaction: TransactionId,
    filter: FilterId,
    user: UserId,
    path: &str,
    kind: FilterKind,
    added: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO review_filter_changes (transaction_id, filter_id, user, path, kind, added)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![transaction, filter, user, path, kind.as_str(), added],
    )
    .context("Failed to record filter change")?;
    Ok(())
}

/// Assign review files to `user`, recording one audit row per file.
pub fn insert_assignments(
    conn: &Connection,
    transaction: TransactionId,
    user: UserId,
    files: &[ReviewFileId],
) -> Result<()> {
    let mut assign = conn
        .prepare("INSERT INTO review_user_files (review_file, user) VALUES (?, ?)")
        .context("Failed to prepare assignment insert")?;
    let mut audit = conn
        .prepare(
            "INSERT INTO review_assignment_changes (transaction_id, review_file, user, assigned)
             VALUES (?, ?, ?, 1)",
        )
        .context("Failed to prepare assignment audit insert")?;
    for file in files {
        assign
            .execute(params![file, user])
            .with_context(|| format!("Failed to assign {file} to {user}"))?;
        audit
            .execute(params![transaction, file, user])
            .with_context(|| format!("Failed to audit assignment of {file} to {user}"))?;
    }
    Ok(())
}

/// Unassign review files from `user`, recording one audit row per file.
pub fn delete_assignments(
    conn: &Connection,
    transaction: TransactionId,
    user: UserId,
    files: &[ReviewFileId],
) -> Result<()> {
    let mut unassign = conn
        .prepare("DELETE FROM review_user_files WHERE review_file = ? AND user = ?")
        .context("Failed to prepare assignment delete")?;
    let mut audit = conn
        .prepare(
            "INSERT INTO review_assignment_changes (transaction_id, review_file, user, assigned)
             VALUES (?, ?, ?, 0)",
        )
        .context("Failed to prepare unassignment audit insert")?;
    for file in files {
        unassign
            .execute(params![file, user])
            .with_context(|| format!("Failed to unassign {file} from {user}"))?;
        audit
            .execute(params![transaction, file, user])
            .with_context(|| format!("Failed to audit unassignment of {file} from {user}"))?;
    }
    Ok(())
}

// ============================================================================
// Batches and comment chains
// ============================================================================

pub fn insert_batch(
    conn: &Connection,
    review: ReviewId,
    author: UserId,
    comment: Option<&str>,
) -> Result<BatchId> {
    conn.execute(
        "INSERT INTO batches (review, author, comment, created_at) VALUES (?, ?, ?, ?)",
        params![review, author, comment, now()],
    )
    .context("Failed to insert batch")?;
    Ok(BatchId(conn.last_insert_rowid()))
}

/// Column values for a new comment chain.
#[derive(Debug, Clone)]
pub struct NewChain {
    pub review: ReviewId,
    pub batch: BatchId,
    pub creator: UserId,
    pub kind: ChainKind,
    pub state: ChainState,
    pub addressed_by: Option<CommitId>,
    pub file: Option<FileId>,
}

pub fn insert_chain(conn: &Connection, chain: &NewChain) -> Result<ChainId> {
    conn.execute(
        "INSERT INTO comment_chains
             (review, batch, creator, created_at, kind, state, addressed_by, file)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            chain.review,
            chain.batch,
            chain.creator,
            now(),
            chain.kind.as_str(),
            chain.state.as_str(),
            chain.addressed_by,
            chain.file,
        ],
    )
    .context("Failed to insert comment chain")?;
    Ok(ChainId(conn.last_insert_rowid()))
}

/// Append anchors to a chain, in order.
pub fn insert_anchors(conn: &Connection, chain: ChainId, anchors: &[Anchor]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO comment_chain_lines (chain, commit_id, content_hash, first_line, line_count)
             VALUES (?, ?, ?, ?, ?)",
        )
        .context("Failed to prepare anchor insert")?;
    for anchor in anchors {
        stmt.execute(params![
            chain,
            anchor.commit,
            anchor.content_hash,
            anchor.first_line,
            anchor.line_count,
        ])
        .with_context(|| format!("Failed to anchor {chain} at {}", anchor.commit))?;
    }
    Ok(())
}

pub fn insert_comment(
    conn: &Connection,
    chain: ChainId,
    batch: BatchId,
    author: UserId,
    text: &str,
) -> Result<CommentId> {
    conn.execute(
        "INSERT INTO comments (chain, batch, author, text, created_at) VALUES (?, ?, ?, ?, ?)",
        params![chain, batch, author, text, now()],
    )
    .context("Failed to insert comment")?;
    Ok(CommentId(conn.last_insert_rowid()))
}

/// Move an issue from `from` to `to` only if it is still in `from`.
///
/// `addressed_by` and `closed_by` are overwritten with the given values.
/// Returns affected rows.
pub fn transition_chain(
    conn: &Connection,
    chain: ChainId,
    from: ChainState,
    to: ChainState,
    addressed_by: Option<CommitId>,
    closed_by: Option<UserId>,
) -> Result<usize> {
    conn.execute(
        "UPDATE comment_chains SET state = ?, addressed_by = ?, closed_by = ?
         WHERE id = ? AND kind = 'issue' AND state = ?",
        params![to.as_str(), addressed_by, closed_by, chain, from.as_str()],
    )
    .context("Failed to update comment chain state")
}

/// Switch a chain's kind, only if it is still `from` and open. Returns
/// affected rows.
pub fn morph_chain(conn: &Connection, chain: ChainId, from: ChainKind, to: ChainKind) -> Result<usize> {
    conn.execute(
        "UPDATE comment_chains SET kind = ?
         WHERE id = ? AND kind = ? AND state = 'open'",
        params![to.as_str(), chain, from.as_str()],
    )
    .context("Failed to morph comment chain")
}

/// One audit row in `comment_chain_changes`.
#[derive(Debug, Clone, Default)]
pub struct ChainChangeRow {
    pub from_state: Option<ChainState>,
    pub to_state: Option<ChainState>,
    pub from_kind: Option<ChainKind>,
    pub to_kind: Option<ChainKind>,
    pub address_commit: Option<CommitId>,
}

pub fn record_chain_change(
    conn: &Connection,
    batch: BatchId,
    chain: ChainId,
    change: &ChainChangeRow,
) -> Result<()> {
    conn.execute(
        "INSERT INTO comment_chain_changes
             (batch, chain, from_state, to_state, from_kind, to_kind, address_commit)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            batch,
            chain,
            change.from_state.map(ChainState::as_str),
            change.to_state.map(ChainState::as_str),
            change.from_kind.map(ChainKind::as_str),
            change.to_kind.map(ChainKind::as_str),
            change.address_commit,
        ],
    )
    .context("Failed to record comment chain change")?;
    Ok(())
}
