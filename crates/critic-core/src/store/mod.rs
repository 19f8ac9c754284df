//! SQLite storage for reviews, comment chains, filters and assignments.
//!
//! Reads live in [`query`] as methods on [`ReviewDb`]. Writes live in
//! [`write`] as free functions over a `&Connection`, so the batch engine can
//! run them inside one transaction.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]

mod query;
pub mod write;

pub use query::{Assignment, AssignmentChange, BatchRecord, ChainChange, ReviewProgress};

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Current schema version, recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Handle to the review database.
pub struct ReviewDb {
    conn: Connection,
}

impl ReviewDb {
    /// Open or create a review database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directories: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        Ok(Self { conn })
    }

    /// Create an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        Ok(Self { conn })
    }

    /// Create all tables and indexes if they don't exist.
    pub fn init_schema(&self) -> Result<()> {
        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {version} is newer than supported version {SCHEMA_VERSION}"
            );
        }

        self.conn
            .execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .context("Failed to record schema version")?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("Failed to read schema version")
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ============================================================================
// Schema SQL
// ============================================================================

const SCHEMA_SQL: &str = r"
-- USERS AND FILES
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    email TEXT
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE
);

-- COMMITS
CREATE TABLE IF NOT EXISTS commits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sha TEXT NOT NULL UNIQUE,
    author INTEGER REFERENCES users(id),
    summary TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS commit_parents (
    child INTEGER NOT NULL REFERENCES commits(id),
    idx INTEGER NOT NULL,
    parent INTEGER NOT NULL REFERENCES commits(id),
    PRIMARY KEY (child, idx)
);

CREATE INDEX IF NOT EXISTS idx_commit_parents_parent ON commit_parents(parent);

-- REVIEWS
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    summary TEXT NOT NULL,
    branch TEXT NOT NULL,
    owner INTEGER NOT NULL REFERENCES users(id),
    head INTEGER REFERENCES commits(id),
    serial INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS review_commits (
    review INTEGER NOT NULL REFERENCES reviews(id),
    commit_id INTEGER NOT NULL REFERENCES commits(id),
    PRIMARY KEY (review, commit_id)
);

CREATE TABLE IF NOT EXISTS review_users (
    review INTEGER NOT NULL REFERENCES reviews(id),
    user INTEGER NOT NULL REFERENCES users(id),
    owner INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (review, user)
);

-- CHANGESETS AND REVIEW FILES
CREATE TABLE IF NOT EXISTS changesets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    parent INTEGER REFERENCES commits(id),
    child INTEGER NOT NULL REFERENCES commits(id)
);

CREATE INDEX IF NOT EXISTS idx_changesets_review ON changesets(review);

CREATE TABLE IF NOT EXISTS review_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    changeset INTEGER NOT NULL REFERENCES changesets(id),
    file INTEGER NOT NULL REFERENCES files(id),
    deleted INTEGER NOT NULL DEFAULT 0,
    inserted INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'pending'
        CHECK (state IN ('pending', 'reviewed')),
    reviewed_by INTEGER REFERENCES users(id),
    UNIQUE (changeset, file)
);

CREATE INDEX IF NOT EXISTS idx_review_files_review ON review_files(review);

-- ASSIGNMENTS
CREATE TABLE IF NOT EXISTS review_user_files (
    review_file INTEGER NOT NULL REFERENCES review_files(id),
    user INTEGER NOT NULL REFERENCES users(id),
    PRIMARY KEY (review_file, user)
);

CREATE TABLE IF NOT EXISTS review_assignment_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    assigner INTEGER NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS review_assignment_changes (
    transaction_id INTEGER NOT NULL REFERENCES review_assignment_transactions(id),
    review_file INTEGER NOT NULL REFERENCES review_files(id),
    user INTEGER NOT NULL REFERENCES users(id),
    assigned INTEGER NOT NULL,
    PRIMARY KEY (transaction_id, review_file, user)
);

-- FILTERS
CREATE TABLE IF NOT EXISTS review_filters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    user INTEGER NOT NULL REFERENCES users(id),
    path TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('reviewer', 'watcher', 'ignored')),
    creator INTEGER NOT NULL REFERENCES users(id),
    UNIQUE (review, user, path)
);

CREATE TABLE IF NOT EXISTS review_filter_changes (
    transaction_id INTEGER NOT NULL REFERENCES review_assignment_transactions(id),
    filter_id INTEGER NOT NULL,
    user INTEGER NOT NULL REFERENCES users(id),
    path TEXT NOT NULL,
    kind TEXT NOT NULL,
    added INTEGER NOT NULL
);

-- REBASES
CREATE TABLE IF NOT EXISTS review_rebases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    user INTEGER NOT NULL REFERENCES users(id),
    old_head INTEGER NOT NULL REFERENCES commits(id),
    new_head INTEGER REFERENCES commits(id),
    new_upstream INTEGER REFERENCES commits(id),
    branch TEXT,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_rebases_in_progress
    ON review_rebases(review) WHERE new_head IS NULL;

-- BATCHES AND COMMENT CHAINS
CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    author INTEGER NOT NULL REFERENCES users(id),
    comment TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comment_chains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review INTEGER NOT NULL REFERENCES reviews(id),
    batch INTEGER REFERENCES batches(id),
    creator INTEGER NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('issue', 'note')),
    state TEXT NOT NULL DEFAULT 'open'
        CHECK (state IN ('open', 'addressed', 'closed')),
    addressed_by INTEGER REFERENCES commits(id),
    closed_by INTEGER REFERENCES users(id),
    file INTEGER REFERENCES files(id),
    CHECK (kind = 'issue' OR (state = 'open' AND addressed_by IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_chains_review ON comment_chains(review);
CREATE INDEX IF NOT EXISTS idx_chains_review_state ON comment_chains(review, kind, state);

CREATE TABLE IF NOT EXISTS comment_chain_lines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain INTEGER NOT NULL REFERENCES comment_chains(id),
    commit_id INTEGER NOT NULL REFERENCES commits(id),
    content_hash TEXT,
    first_line INTEGER NOT NULL CHECK (first_line >= 1),
    line_count INTEGER NOT NULL CHECK (line_count >= 1)
);

CREATE INDEX IF NOT EXISTS idx_chain_lines_chain ON comment_chain_lines(chain);

CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain INTEGER NOT NULL REFERENCES comment_chains(id),
    batch INTEGER REFERENCES batches(id),
    author INTEGER NOT NULL REFERENCES users(id),
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_chain ON comments(chain);

CREATE TABLE IF NOT EXISTS comment_chain_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch INTEGER NOT NULL REFERENCES batches(id),
    chain INTEGER NOT NULL REFERENCES comment_chains(id),
    from_state TEXT,
    to_state TEXT,
    from_kind TEXT,
    to_kind TEXT,
    address_commit INTEGER REFERENCES commits(id)
);
";

// ============================================================================
// Tests
// ============================================================================
