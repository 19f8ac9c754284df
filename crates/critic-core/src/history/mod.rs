//! A review's commit set and the history operations built on it.

pub mod partition;

pub use partition::{partition_of, partitions, Partition};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::{Commit, CommitId};
use crate::scm::CommitGraph;

/// All commits a review tracks, with child links derived from parent links.
#[derive(Debug, Clone, Default)]
pub struct CommitSet {
    commits: BTreeMap<CommitId, Commit>,
    children: HashMap<CommitId, Vec<CommitId>>,
}

impl CommitSet {
    #[must_use]
    pub fn new(commits: impl IntoIterator<Item = Commit>) -> Self {
        let commits: BTreeMap<CommitId, Commit> =
            commits.into_iter().map(|commit| (commit.id, commit)).collect();

        let mut children: HashMap<CommitId, Vec<CommitId>> = HashMap::new();
        for commit in commits.values() {
            for parent in &commit.parents {
                if commits.contains_key(parent) {
                    children.entry(*parent).or_default().push(commit.id);
                }
            }
        }

        Self { commits, children }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = CommitId> + '_ {
        self.commits.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.commits.values()
    }

    #[must_use]
    pub fn by_sha(&self, sha: &str) -> Option<&Commit> {
        self.commits.values().find(|commit| commit.sha == sha)
    }

    /// Commits with no tracked children.
    #[must_use]
    pub fn heads(&self) -> Vec<CommitId> {
        self.commits
            .keys()
            .filter(|id| self.children.get(id).map_or(true, Vec::is_empty))
            .copied()
            .collect()
    }

    /// `id` and every tracked ancestor of it that is also in `within`.
    #[must_use]
    pub fn ancestors_within(&self, id: CommitId, within: &BTreeSet<CommitId>) -> BTreeSet<CommitId> {
        let mut seen = BTreeSet::new();
        if !within.contains(&id) {
            return seen;
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            for parent in self.parents(current) {
                if within.contains(&parent) && !seen.contains(&parent) {
                    stack.push(parent);
                }
            }
        }
        seen
    }
}

impl CommitGraph for CommitSet {
    fn commit(&self, id: CommitId) -> Option<&Commit> {
        self.commits.get(&id)
    }

    fn parents(&self, id: CommitId) -> Vec<CommitId> {
        self.commits.get(&id).map_or_else(Vec::new, |commit| {
            commit
                .parents
                .iter()
                .filter(|parent| self.commits.contains_key(parent))
                .copied()
                .collect()
        })
    }

    fn children(&self, id: CommitId) -> Vec<CommitId> {
        self.children.get(&id).cloned().unwrap_or_default()
    }

    fn contains(&self, id: CommitId) -> bool {
        self.commits.contains_key(&id)
    }
}
