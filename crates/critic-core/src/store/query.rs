//! Read queries over the review database.
//!
//! All reads go through the connection, so calls made while a transaction is
//! open see that transaction's writes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::ReviewDb;
use crate::history::CommitSet;
use crate::model::{
    Anchor, BatchId, ChainFile, ChainId, ChainKind, ChainState, Changeset, ChangesetId, Comment,
    CommentChain, Commit, CommitId, FileId, FileState, FilterId, FilterKind, Rebase, RebaseId,
    Review, ReviewFile, ReviewFileId, ReviewFilter, ReviewId, TransactionId, User, UserId,
};

// ============================================================================
// Query Result Types
// ============================================================================

/// Line totals and acceptance for a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewProgress {
    pub total_lines: i64,
    pub reviewed_lines: i64,
    pub pending_files: i64,
    pub open_issues: i64,
    pub accepted: bool,
}

/// A review file assigned to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Assignment {
    pub review_file: ReviewFileId,
    pub user: UserId,
}

/// One audit row of an assignment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssignmentChange {
    pub review_file: ReviewFileId,
    pub user: UserId,
    pub assigned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub review: ReviewId,
    pub author: UserId,
    pub comment: Option<String>,
    pub created_at: String,
}

/// One audit row of a comment chain state or kind change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainChange {
    pub batch: BatchId,
    pub chain: ChainId,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
    pub from_kind: Option<String>,
    pub to_kind: Option<String>,
    pub address_commit: Option<CommitId>,
}

// ============================================================================
// Row mapping
// ============================================================================

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value: {value}").into(),
    )
}

fn chain_kind(row: &Row<'_>, idx: usize) -> rusqlite::Result<ChainKind> {
    let value: String = row.get(idx)?;
    ChainKind::parse(&value).ok_or_else(|| invalid_text(idx, &value))
}

fn chain_state(row: &Row<'_>, idx: usize) -> rusqlite::Result<ChainState> {
    let value: String = row.get(idx)?;
    ChainState::parse(&value).ok_or_else(|| invalid_text(idx, &value))
}

fn filter_kind(row: &Row<'_>, idx: usize) -> rusqlite::Result<FilterKind> {
    let value: String = row.get(idx)?;
    FilterKind::parse(&value).ok_or_else(|| invalid_text(idx, &value))
}

fn file_state(row: &Row<'_>, idx: usize) -> rusqlite::Result<FileState> {
    let value: String = row.get(idx)?;
    FileState::parse(&value).ok_or_else(|| invalid_text(idx, &value))
}

const REVIEW_FILE_COLUMNS: &str = "rf.id, rf.review, rf.changeset, rf.file, f.path,
     rf.deleted, rf.inserted, rf.state, c.author";

const REVIEW_FILE_JOINS: &str = "FROM review_files rf
     JOIN files f ON f.id = rf.file
     JOIN changesets cs ON cs.id = rf.changeset
     JOIN commits c ON c.id = cs.child";

fn review_file_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewFile> {
    Ok(ReviewFile {
        id: row.get(0)?,
        review: row.get(1)?,
        changeset: row.get(2)?,
        file: row.get(3)?,
        path: row.get(4)?,
        deleted: row.get(5)?,
        inserted: row.get(6)?,
        state: file_state(row, 7)?,
        author: row.get(8)?,
    })
}

fn filter_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewFilter> {
    Ok(ReviewFilter {
        id: row.get(0)?,
        review: row.get(1)?,
        user: row.get(2)?,
        path: row.get(3)?,
        kind: filter_kind(row, 4)?,
        creator: row.get(5)?,
    })
}

fn rebase_from_row(row: &Row<'_>) -> rusqlite::Result<Rebase> {
    Ok(Rebase {
        id: row.get(0)?,
        review: row.get(1)?,
        user: row.get(2)?,
        old_head: row.get(3)?,
        new_head: row.get(4)?,
        new_upstream: row.get(5)?,
        branch: row.get(6)?,
    })
}

const REBASE_COLUMNS: &str = "id, review, user, old_head, new_head, new_upstream, branch";

// ============================================================================
// Queries
// ============================================================================

impl ReviewDb {
    // ------------------------------------------------------------------------
    // Users, files, commits
    // ------------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email FROM users WHERE id = ?",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email FROM users WHERE name = ?",
                [name],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user by name")
    }

    /// Find a user by email, falling back to name.
    pub fn user_by_email(&self, email: &str) -> Result<Option<UserId>> {
        self.conn
            .query_row(
                "SELECT id FROM users WHERE email = ? ORDER BY id LIMIT 1",
                [email],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query user by email")
    }

    pub fn file_by_path(&self, path: &str) -> Result<Option<FileId>> {
        self.conn
            .query_row("SELECT id FROM files WHERE path = ?", [path], |row| row.get(0))
            .optional()
            .context("Failed to query file")
    }

    pub fn file_path(&self, id: FileId) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT path FROM files WHERE id = ?", [id], |row| row.get(0))
            .optional()
            .context("Failed to query file path")
    }

    pub fn commit_by_sha(&self, sha: &str) -> Result<Option<CommitId>> {
        self.conn
            .query_row("SELECT id FROM commits WHERE sha = ?", [sha], |row| row.get(0))
            .optional()
            .context("Failed to query commit")
    }

    // ------------------------------------------------------------------------
    // Reviews
    // ------------------------------------------------------------------------

    pub fn get_review(&self, id: ReviewId) -> Result<Option<Review>> {
        self.conn
            .query_row(
                "SELECT id, summary, branch, owner, head, serial, created_at
                 FROM reviews WHERE id = ?",
                [id],
                |row| {
                    Ok(Review {
                        id: row.get(0)?,
                        summary: row.get(1)?,
                        branch: row.get(2)?,
                        owner: row.get(3)?,
                        head: row.get(4)?,
                        serial: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to query review")
    }

    pub fn list_reviews(&self) -> Result<Vec<Review>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, summary, branch, owner, head, serial, created_at
                 FROM reviews ORDER BY id",
            )
            .context("Failed to prepare list_reviews query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Review {
                    id: row.get(0)?,
                    summary: row.get(1)?,
                    branch: row.get(2)?,
                    owner: row.get(3)?,
                    head: row.get(4)?,
                    serial: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to execute list_reviews query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect review results")
    }

    /// Users taking part in a review, owner first.
    pub fn review_users(&self, review: ReviewId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user FROM review_users WHERE review = ? ORDER BY owner DESC, user",
            )
            .context("Failed to prepare review_users query")?;
        let rows = stmt
            .query_map([review], |row| row.get(0))
            .context("Failed to execute review_users query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect review users")
    }

    /// All commits of a review, with parent links and authors.
    pub fn review_commits(&self, review: ReviewId) -> Result<Vec<Commit>> {
        let mut parents: BTreeMap<CommitId, Vec<CommitId>> = BTreeMap::new();
        {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT cp.child, cp.parent FROM commit_parents cp
                     JOIN review_commits rc ON rc.commit_id = cp.child
                     WHERE rc.review = ?
                     ORDER BY cp.child, cp.idx",
                )
                .context("Failed to prepare commit parents query")?;
            let rows = stmt
                .query_map([review], |row| {
                    Ok((row.get::<_, CommitId>(0)?, row.get::<_, CommitId>(1)?))
                })
                .context("Failed to execute commit parents query")?;
            for row in rows {
                let (child, parent) = row.context("Failed to read commit parent row")?;
                parents.entry(child).or_default().push(parent);
            }
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.sha, c.author, c.summary FROM commits c
                 JOIN review_commits rc ON rc.commit_id = c.id
                 WHERE rc.review = ?
                 ORDER BY c.id",
            )
            .context("Failed to prepare review commits query")?;
        let rows = stmt
            .query_map([review], |row| {
                Ok(Commit {
                    id: row.get(0)?,
                    sha: row.get(1)?,
                    parents: Vec::new(),
                    author: row.get(2)?,
                    summary: row.get(3)?,
                })
            })
            .context("Failed to execute review commits query")?;

        let mut commits = rows
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect review commits")?;
        for commit in &mut commits {
            commit.parents = parents.remove(&commit.id).unwrap_or_default();
        }
        Ok(commits)
    }

    pub fn commit_set(&self, review: ReviewId) -> Result<CommitSet> {
        Ok(CommitSet::new(self.review_commits(review)?))
    }

    pub fn changesets(&self, review: ReviewId) -> Result<Vec<Changeset>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, review, parent, child FROM changesets WHERE review = ? ORDER BY id")
            .context("Failed to prepare changesets query")?;
        let rows = stmt
            .query_map([review], |row| {
                Ok(Changeset {
                    id: row.get(0)?,
                    review: row.get(1)?,
                    parent: row.get(2)?,
                    child: row.get(3)?,
                })
            })
            .context("Failed to execute changesets query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect changesets")
    }

    pub fn changeset_for(
        &self,
        review: ReviewId,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<Option<ChangesetId>> {
        self.conn
            .query_row(
                "SELECT id FROM changesets WHERE review = ? AND parent IS ? AND child = ?",
                params![review, parent, child],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query changeset")
    }

    // ------------------------------------------------------------------------
    // Review files and assignments
    // ------------------------------------------------------------------------

    pub fn review_files(&self, review: ReviewId) -> Result<Vec<ReviewFile>> {
        let sql = format!(
            "SELECT {REVIEW_FILE_COLUMNS} {REVIEW_FILE_JOINS} WHERE rf.review = ? ORDER BY rf.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare review_files query")?;
        let rows = stmt
            .query_map([review], review_file_from_row)
            .context("Failed to execute review_files query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect review files")
    }

    pub fn review_file(&self, id: ReviewFileId) -> Result<Option<ReviewFile>> {
        let sql = format!("SELECT {REVIEW_FILE_COLUMNS} {REVIEW_FILE_JOINS} WHERE rf.id = ?");
        self.conn
            .query_row(&sql, [id], review_file_from_row)
            .optional()
            .context("Failed to query review file")
    }

    pub fn assignments(&self, review: ReviewId) -> Result<Vec<Assignment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ruf.review_file, ruf.user FROM review_user_files ruf
                 JOIN review_files rf ON rf.id = ruf.review_file
                 WHERE rf.review = ?
                 ORDER BY ruf.user, ruf.review_file",
            )
            .context("Failed to prepare assignments query")?;
        let rows = stmt
            .query_map([review], |row| {
                Ok(Assignment {
                    review_file: row.get(0)?,
                    user: row.get(1)?,
                })
            })
            .context("Failed to execute assignments query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect assignments")
    }

    pub fn is_assigned(&self, review_file: ReviewFileId, user: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM review_user_files WHERE review_file = ? AND user = ?",
                params![review_file, user],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query assignment")?;
        Ok(found.is_some())
    }

    pub fn assignment_changes(&self, transaction: TransactionId) -> Result<Vec<AssignmentChange>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT review_file, user, assigned FROM review_assignment_changes
                 WHERE transaction_id = ?
                 ORDER BY user, review_file",
            )
            .context("Failed to prepare assignment_changes query")?;
        let rows = stmt
            .query_map([transaction], |row| {
                Ok(AssignmentChange {
                    review_file: row.get(0)?,
                    user: row.get(1)?,
                    assigned: row.get(2)?,
                })
            })
            .context("Failed to execute assignment_changes query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect assignment changes")
    }

    // ------------------------------------------------------------------------
    // Filters and rebases
    // ------------------------------------------------------------------------

    pub fn filters(&self, review: ReviewId) -> Result<Vec<ReviewFilter>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, review, user, path, kind, creator FROM review_filters
                 WHERE review = ? ORDER BY id",
            )
            .context("Failed to prepare filters query")?;
        let rows = stmt
            .query_map([review], filter_from_row)
            .context("Failed to execute filters query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect filters")
    }

    pub fn get_filter(&self, id: FilterId) -> Result<Option<ReviewFilter>> {
        self.conn
            .query_row(
                "SELECT id, review, user, path, kind, creator FROM review_filters WHERE id = ?",
                [id],
                filter_from_row,
            )
            .optional()
            .context("Failed to query filter")
    }

    /// Rebases of a review, oldest first.
    pub fn rebases(&self, review: ReviewId) -> Result<Vec<Rebase>> {
        let sql = format!("SELECT {REBASE_COLUMNS} FROM review_rebases WHERE review = ? ORDER BY id");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare rebases query")?;
        let rows = stmt
            .query_map([review], rebase_from_row)
            .context("Failed to execute rebases query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect rebases")
    }

    pub fn get_rebase(&self, id: RebaseId) -> Result<Option<Rebase>> {
        let sql = format!("SELECT {REBASE_COLUMNS} FROM review_rebases WHERE id = ?");
        self.conn
            .query_row(&sql, [id], rebase_from_row)
            .optional()
            .context("Failed to query rebase")
    }

    pub fn rebase_in_progress(&self, review: ReviewId) -> Result<Option<Rebase>> {
        let sql = format!(
            "SELECT {REBASE_COLUMNS} FROM review_rebases WHERE review = ? AND new_head IS NULL"
        );
        self.conn
            .query_row(&sql, [review], rebase_from_row)
            .optional()
            .context("Failed to query in-progress rebase")
    }

    // ------------------------------------------------------------------------
    // Comment chains
    // ------------------------------------------------------------------------

    /// Load a chain with its comments and anchors.
    pub fn get_chain(&self, id: ChainId) -> Result<Option<CommentChain>> {
        let chain = self
            .conn
            .query_row(
                "SELECT cc.id, cc.review, cc.creator, cc.created_at, cc.kind, cc.state,
                        cc.addressed_by, cc.closed_by, cc.file, f.path
                 FROM comment_chains cc
                 LEFT JOIN files f ON f.id = cc.file
                 WHERE cc.id = ?",
                [id],
                |row| {
                    let created_at: String = row.get(3)?;
                    let created_at = DateTime::parse_from_rfc3339(&created_at)
                        .map(|ts| ts.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                3,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?;
                    let file_id: Option<FileId> = row.get(8)?;
                    let path: Option<String> = row.get(9)?;
                    Ok(CommentChain {
                        id: row.get(0)?,
                        review: row.get(1)?,
                        creator: row.get(2)?,
                        created_at,
                        kind: chain_kind(row, 4)?,
                        state: chain_state(row, 5)?,
                        addressed_by: row.get(6)?,
                        closed_by: row.get(7)?,
                        file: file_id.zip(path).map(|(id, path)| ChainFile { id, path }),
                        comments: Vec::new(),
                        anchors: Vec::new(),
                    })
                },
            )
            .optional()
            .context("Failed to query comment chain")?;

        let Some(mut chain) = chain else {
            return Ok(None);
        };
        chain.comments = self.chain_comments(id)?;
        chain.anchors = self.chain_anchors(id)?;
        Ok(Some(chain))
    }

    /// All chains of a review, oldest first.
    pub fn chains(&self, review: ReviewId) -> Result<Vec<CommentChain>> {
        let ids = self.chain_ids(review)?;
        let mut chains = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chain) = self.get_chain(id)? {
                chains.push(chain);
            }
        }
        Ok(chains)
    }

    fn chain_ids(&self, review: ReviewId) -> Result<Vec<ChainId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM comment_chains WHERE review = ? ORDER BY id")
            .context("Failed to prepare chain ids query")?;
        let rows = stmt
            .query_map([review], |row| row.get(0))
            .context("Failed to execute chain ids query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect chain ids")
    }

    fn chain_comments(&self, chain: ChainId) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, chain, batch, author, text, created_at FROM comments
                 WHERE chain = ? ORDER BY id",
            )
            .context("Failed to prepare comments query")?;
        let rows = stmt
            .query_map([chain], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    chain: row.get(1)?,
                    batch: row.get(2)?,
                    author: row.get(3)?,
                    text: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .context("Failed to execute comments query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect comments")
    }

    fn chain_anchors(&self, chain: ChainId) -> Result<Vec<Anchor>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT commit_id, content_hash, first_line, line_count FROM comment_chain_lines
                 WHERE chain = ? ORDER BY id",
            )
            .context("Failed to prepare anchors query")?;
        let rows = stmt
            .query_map([chain], |row| {
                Ok(Anchor {
                    commit: row.get(0)?,
                    content_hash: row.get(1)?,
                    first_line: row.get(2)?,
                    line_count: row.get(3)?,
                })
            })
            .context("Failed to execute anchors query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect anchors")
    }

    pub fn chain_changes(&self, chain: ChainId) -> Result<Vec<ChainChange>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT batch, chain, from_state, to_state, from_kind, to_kind, address_commit
                 FROM comment_chain_changes WHERE chain = ? ORDER BY id",
            )
            .context("Failed to prepare chain_changes query")?;
        let rows = stmt
            .query_map([chain], |row| {
                Ok(ChainChange {
                    batch: row.get(0)?,
                    chain: row.get(1)?,
                    from_state: row.get(2)?,
                    to_state: row.get(3)?,
                    from_kind: row.get(4)?,
                    to_kind: row.get(5)?,
                    address_commit: row.get(6)?,
                })
            })
            .context("Failed to execute chain_changes query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect chain changes")
    }

    pub fn get_batch(&self, id: BatchId) -> Result<Option<BatchRecord>> {
        self.conn
            .query_row(
                "SELECT id, review, author, comment, created_at FROM batches WHERE id = ?",
                [id],
                |row| {
                    Ok(BatchRecord {
                        id: row.get(0)?,
                        review: row.get(1)?,
                        author: row.get(2)?,
                        comment: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query batch")
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    pub fn progress(&self, review: ReviewId) -> Result<ReviewProgress> {
        let (total_lines, reviewed_lines, pending_files): (i64, i64, i64) = self
            .conn
            .query_row(
                "SELECT
                     COALESCE(SUM(deleted + inserted), 0),
                     COALESCE(SUM(CASE WHEN state = 'reviewed' THEN deleted + inserted END), 0),
                     COUNT(CASE WHEN state = 'pending' THEN 1 END)
                 FROM review_files WHERE review = ?",
                [review],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to query review line totals")?;

        let open_issues: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM comment_chains
                 WHERE review = ? AND kind = 'issue' AND state = 'open'",
                [review],
                |row| row.get(0),
            )
            .context("Failed to count open issues")?;

        Ok(ReviewProgress {
            total_lines,
            reviewed_lines,
            pending_files,
            open_issues,
            accepted: pending_files == 0 && open_issues == 0,
        })
    }

    pub fn is_accepted(&self, review: ReviewId) -> Result<bool> {
        Ok(self.progress(review)?.accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::super::write;
    use super::*;

    fn seeded() -> (ReviewDb, ReviewId, UserId) {
        let db = ReviewDb::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let conn = db.conn();
        let alice = write::ensure_user(conn, "alice", Some("alice@example.com")).unwrap();
        let review = write::insert_review(conn, "Add parser", "feature/parser", alice).unwrap();
        (db, review, alice)
    }

    #[test]
    fn test_review_roundtrip() {
        let (db, review, alice) = seeded();
        let loaded = db.get_review(review).unwrap().unwrap();
        assert_eq!(loaded.summary, "Add parser");
        assert_eq!(loaded.owner, alice);
        assert_eq!(loaded.serial, 0);
        assert!(loaded.head.is_none());
        assert_eq!(db.review_users(review).unwrap(), vec![alice]);
        assert!(db.get_review(ReviewId(99)).unwrap().is_none());
    }

    #[test]
    fn test_commit_parents_and_set() {
        let (db, review, alice) = seeded();
        let conn = db.conn();
        let base = write::ensure_commit(conn, "base", None, "").unwrap();
        let c1 = write::ensure_commit(conn, "aaa", Some(alice), "first").unwrap();
        let c2 = write::ensure_commit(conn, "bbb", Some(alice), "second").unwrap();
        write::set_commit_parents(conn, c1, &[base]).unwrap();
        write::set_commit_parents(conn, c2, &[c1]).unwrap();
        write::add_review_commit(conn, review, c1).unwrap();
        write::add_review_commit(conn, review, c2).unwrap();

        let commits = db.review_commits(review).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].parents, vec![base]);
        assert_eq!(commits[1].parents, vec![c1]);

        let set = db.commit_set(review).unwrap();
        assert_eq!(set.heads(), vec![c2]);

        // Re-upserting with an empty summary keeps the old one.
        assert_eq!(write::ensure_commit(conn, "aaa", None, "").unwrap(), c1);
        assert_eq!(db.review_commits(review).unwrap()[0].summary, "first");
    }

    #[test]
    fn test_user_lookup_by_email_and_name() {
        let (db, _, alice) = seeded();
        assert_eq!(db.user_by_email("alice@example.com").unwrap(), Some(alice));
        assert_eq!(db.user_by_email("alice").unwrap(), None);
        assert_eq!(db.user_by_email("bob@example.com").unwrap(), None);
        assert_eq!(db.user_by_name("alice").unwrap().map(|u| u.id), Some(alice));
    }

    #[test]
    fn test_progress_counts_lines_and_issues() {
        let (db, review, alice) = seeded();
        let conn = db.conn();
        let commit = write::ensure_commit(conn, "aaa", Some(alice), "first").unwrap();
        let changeset = write::insert_changeset(conn, review, None, commit).unwrap();
        let file = write::ensure_file(conn, "src/lib.rs").unwrap();
        let rf = write::insert_review_file(conn, review, changeset, file, 3, 7).unwrap();

        let progress = db.progress(review).unwrap();
        assert_eq!(progress.total_lines, 10);
        assert_eq!(progress.reviewed_lines, 0);
        assert!(!progress.accepted);

        assert_eq!(write::mark_file_reviewed(conn, rf, alice).unwrap(), 1);
        assert_eq!(write::mark_file_reviewed(conn, rf, alice).unwrap(), 0);
        let progress = db.progress(review).unwrap();
        assert_eq!(progress.reviewed_lines, 10);
        assert!(progress.accepted);

        let loaded = db.review_file(rf).unwrap().unwrap();
        assert_eq!(loaded.path, "src/lib.rs");
        assert_eq!(loaded.author, Some(alice));
        assert_eq!(loaded.state, FileState::Reviewed);
    }

    #[test]
    fn test_chain_with_anchors_and_comments() {
        let (db, review, alice) = seeded();
        let conn = db.conn();
        let commit = write::ensure_commit(conn, "aaa", None, "").unwrap();
        let file = write::ensure_file(conn, "src/lib.rs").unwrap();
        let batch = write::insert_batch(conn, review, alice, None).unwrap();
        let chain = write::insert_chain(
            conn,
            &write::NewChain {
                review,
                batch,
                creator: alice,
                kind: ChainKind::Issue,
                state: ChainState::Open,
                addressed_by: None,
                file: Some(file),
            },
        )
        .unwrap();
        write::insert_anchors(conn, chain, &[Anchor::file(commit, "h1", 6, 2)]).unwrap();
        write::insert_comment(conn, chain, batch, alice, "Fix this").unwrap();

        let loaded = db.get_chain(chain).unwrap().unwrap();
        assert_eq!(loaded.state, ChainState::Open);
        assert_eq!(loaded.file.as_ref().map(|f| f.path.as_str()), Some("src/lib.rs"));
        assert_eq!(loaded.anchors, vec![Anchor::file(commit, "h1", 6, 2)]);
        assert_eq!(loaded.comments.len(), 1);
        assert_eq!(loaded.comments[0].batch, Some(batch));
        assert_eq!(db.chains(review).unwrap().len(), 1);
        assert_eq!(db.progress(review).unwrap().open_issues, 1);

        // Conditional transition only fires from the expected state.
        assert_eq!(
            write::transition_chain(conn, chain, ChainState::Addressed, ChainState::Open, None, None)
                .unwrap(),
            0
        );
        assert_eq!(
            write::transition_chain(conn, chain, ChainState::Open, ChainState::Closed, None, Some(alice))
                .unwrap(),
            1
        );
        assert_eq!(db.get_chain(chain).unwrap().unwrap().closed_by, Some(alice));
    }

    #[test]
    fn test_single_rebase_in_progress() {
        let (db, review, alice) = seeded();
        let conn = db.conn();
        let head = write::ensure_commit(conn, "aaa", None, "").unwrap();
        let rebase = write::insert_rebase(conn, review, alice, head, None).unwrap();
        assert!(write::insert_rebase(conn, review, alice, head, None).is_err());
        assert_eq!(db.rebase_in_progress(review).unwrap().map(|r| r.id), Some(rebase));

        assert_eq!(write::complete_rebase(conn, rebase, head, None).unwrap(), 1);
        assert!(db.rebase_in_progress(review).unwrap().is_none());
        assert_eq!(write::delete_rebase(conn, rebase).unwrap(), 0);
        assert_eq!(db.rebases(review).unwrap().len(), 1);
    }

    #[test]
    fn test_filter_roundtrip() {
        let (db, review, alice) = seeded();
        let conn = db.conn();
        let id = write::insert_filter(conn, review, alice, "src/", FilterKind::Reviewer, alice)
            .unwrap();
        assert!(
            write::insert_filter(conn, review, alice, "src/", FilterKind::Watcher, alice).is_err()
        );
        let filter = db.get_filter(id).unwrap().unwrap();
        assert_eq!(filter.kind, FilterKind::Reviewer);
        assert_eq!(db.filters(review).unwrap().len(), 1);
        assert_eq!(write::delete_filter(conn, id).unwrap(), 1);
        assert!(db.filters(review).unwrap().is_empty());
    }
}
