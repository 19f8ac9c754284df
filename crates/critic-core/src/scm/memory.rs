//! In-memory [`DiffSource`] for embedding and tests.
//!
//! Files and chunks are registered up front; anything not registered is
//! treated as absent (files) or unchanged (chunks).

use std::collections::HashMap;

use anyhow::Result;

use super::{DiffChunk, DiffSource};

#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    /// (commit, path) -> content hash
    files: HashMap<(String, String), String>,
    /// (from, to, path) -> chunks
    chunks: HashMap<(String, String, String), Vec<DiffChunk>>,
}

impl MemoryRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` exists at `commit` with the given content hash.
    pub fn set_file(&mut self, commit: &str, path: &str, content_hash: &str) -> &mut Self {
        self.files.insert(
            (commit.to_string(), path.to_string()),
            content_hash.to_string(),
        );
        self
    }

    /// Record the chunks describing how `path` changed from `from` to `to`.
    pub fn set_chunks(
        &mut self,
        from: &str,
        to: &str,
        path: &str,
        chunks: Vec<DiffChunk>,
    ) -> &mut Self {
        self.chunks
            .insert((from.to_string(), to.to_string(), path.to_string()), chunks);
        self
    }
}

impl DiffSource for MemoryRepo {
    fn chunks(&self, from: &str, to: &str, path: &str) -> Result<Vec<DiffChunk>> {
        let key = (from.to_string(), to.to_string(), path.to_string());
        Ok(self.chunks.get(&key).cloned().unwrap_or_default())
    }

    fn file_exists(&self, commit: &str, path: &str) -> Result<bool> {
        Ok(self
            .files
            .contains_key(&(commit.to_string(), path.to_string())))
    }

    fn content_hash(&self, commit: &str, path: &str) -> Result<Option<String>> {
        Ok(self
            .files
            .get(&(commit.to_string(), path.to_string()))
            .cloned())
    }
}
