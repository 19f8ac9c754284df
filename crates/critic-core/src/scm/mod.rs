//! Interfaces to the version-control side of a review.
//!
//! The core never computes diffs itself. It consumes line chunks through
//! [`DiffSource`] and walks history through [`CommitGraph`].

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::model::{Commit, CommitId};

pub mod git;
pub mod memory;

/// One contiguous change between two versions of a file.
///
/// Offsets are 1-based line numbers in the old (`delete_*`) and new
/// (`insert_*`) version. When a count is zero the offset names the line
/// before which the change sits, so `[offset, offset + count)` is always the
/// affected span on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffChunk {
    pub delete_offset: u32,
    pub delete_count: u32,
    pub insert_offset: u32,
    pub insert_count: u32,
}

impl DiffChunk {
    #[must_use]
    pub const fn new(
        delete_offset: u32,
        delete_count: u32,
        insert_offset: u32,
        insert_count: u32,
    ) -> Self {
        Self {
            delete_offset,
            delete_count,
            insert_offset,
            insert_count,
        }
    }

    /// Net change in line count when going from old to new.
    #[must_use]
    pub fn delta(&self) -> i64 {
        i64::from(self.insert_count) - i64::from(self.delete_count)
    }
}

/// Source of per-file diffs and file identity between commits.
pub trait DiffSource {
    /// Chunks describing how `path` changed from `from` to `to`, in file order.
    ///
    /// Returns an empty list when the file is unchanged.
    fn chunks(&self, from: &str, to: &str, path: &str) -> Result<Vec<DiffChunk>>;

    /// Whether `path` exists at `commit`.
    fn file_exists(&self, commit: &str, path: &str) -> Result<bool>;

    /// Content hash of `path` at `commit`, or `None` when it does not exist.
    fn content_hash(&self, commit: &str, path: &str) -> Result<Option<String>>;
}

/// Read access to a review's commit set.
///
/// Parents and children are always restricted to commits tracked by the
/// review; a parent outside the review is invisible here.
pub trait CommitGraph {
    fn commit(&self, id: CommitId) -> Option<&Commit>;
    fn parents(&self, id: CommitId) -> Vec<CommitId>;
    fn children(&self, id: CommitId) -> Vec<CommitId>;
    fn contains(&self, id: CommitId) -> bool;
}

pub fn validate_rev(rev: &str) -> Result<()> {
    if rev.trim().is_empty() {
        bail!("Revision cannot be empty");
    }

    if rev.starts_with('-') {
        bail!("Revision cannot start with '-': {rev}");
    }

    if rev.contains('\0') || rev.contains('\n') || rev.contains('\r') {
        bail!("Revision contains invalid control characters");
    }

    Ok(())
}

pub fn validate_repo_relative_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        bail!("Path cannot be empty");
    }

    let path_ref = Path::new(path);
    if path_ref.is_absolute() {
        bail!("Path must be repository-relative: {path}");
    }

    for component in path_ref.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => bail!("Path must be normalized (no '.'): {path}"),
            Component::ParentDir => bail!("Path traversal is not allowed: {path}"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("Path must be repository-relative: {path}")
            }
        }
    }

    Ok(())
}
