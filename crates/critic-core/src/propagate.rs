//! Anchor propagation across a review's commit history.
//!
//! When a chain is anchored to lines of one file version, the same logical
//! lines may still exist, unmodified, in earlier and later commits. This
//! module walks the linear commit chain in one direction and translates the
//! line range through each intervening diff until history ends, the lines are
//! touched, or a merge makes the diff ambiguous.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::model::{Anchor, CommentChain, CommitId};
use crate::scm::{CommitGraph, DiffChunk, DiffSource};

/// Direction of travel through history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards descendants (later commits).
    Forward,
    /// Towards ancestors (earlier commits).
    Backward,
}

/// Why propagation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "commit", rename_all = "lowercase")]
pub enum Verdict {
    /// History ended with the lines intact.
    Clean,
    /// The given commit changed the lines (or removed the file).
    Modified(CommitId),
    /// The given commit has several tracked neighbors in the direction of travel.
    Merge(CommitId),
}

impl Verdict {
    #[must_use]
    pub const fn commit(&self) -> Option<CommitId> {
        match self {
            Self::Clean => None,
            Self::Modified(commit) | Self::Merge(commit) => Some(*commit),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Modified(_) => "modified",
            Self::Merge(_) => "merge",
        }
    }
}

/// Anchors found along one walk, plus the verdict that ended it.
///
/// The starting anchor itself is never part of `anchors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationResult {
    pub anchors: Vec<Anchor>,
    pub verdict: Verdict,
}

/// Results of walking both directions from one anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BothWays {
    pub backward: PropagationResult,
    pub forward: PropagationResult,
}

impl BothWays {
    /// Backward anchors (oldest first), the start anchor, then forward anchors.
    #[must_use]
    pub fn all_anchors(&self, start: &Anchor) -> Vec<Anchor> {
        let mut anchors: Vec<Anchor> = self.backward.anchors.iter().rev().cloned().collect();
        anchors.push(start.clone());
        anchors.extend(self.forward.anchors.iter().cloned());
        anchors
    }

    /// The first merge verdict, backward checked first.
    #[must_use]
    pub const fn merge(&self) -> Option<CommitId> {
        match (self.backward.verdict, self.forward.verdict) {
            (Verdict::Merge(commit), _) | (_, Verdict::Merge(commit)) => Some(commit),
            _ => None,
        }
    }
}

/// Walks a commit graph, translating line anchors through a diff source.
pub struct Propagator<'a, G: CommitGraph + ?Sized, D: DiffSource + ?Sized> {
    graph: &'a G,
    diffs: &'a D,
}

impl<'a, G: CommitGraph + ?Sized, D: DiffSource + ?Sized> Propagator<'a, G, D> {
    pub const fn new(graph: &'a G, diffs: &'a D) -> Self {
        Self { graph, diffs }
    }

    /// Walk backward then forward from `start`.
    pub fn propagate_both(
        &self,
        path: &str,
        start: &Anchor,
        exclude: Option<&CommentChain>,
    ) -> Result<BothWays> {
        Ok(BothWays {
            backward: self.propagate(path, start, Direction::Backward, exclude)?,
            forward: self.propagate(path, start, Direction::Forward, exclude)?,
        })
    }

    /// Walk from `start` in one direction.
    ///
    /// `exclude` names a chain whose recorded anchors already cover some
    /// versions; walking backward stops cleanly on reaching one of them.
    pub fn propagate(
        &self,
        path: &str,
        start: &Anchor,
        direction: Direction,
        exclude: Option<&CommentChain>,
    ) -> Result<PropagationResult> {
        if start.content_hash.is_none() {
            bail!("Only file anchors can be propagated");
        }
        if !self.graph.contains(start.commit) {
            bail!("Commit {} is not part of the review", start.commit);
        }

        let mut anchors = Vec::new();
        let done = |anchors: Vec<Anchor>, verdict: Verdict| -> Result<PropagationResult> {
            tracing::debug!(
                ?direction,
                start = %start.commit,
                steps = anchors.len(),
                verdict = verdict.as_str(),
                "propagation finished"
            );
            Ok(PropagationResult { anchors, verdict })
        };

        if direction == Direction::Backward && self.graph.parents(start.commit).is_empty() {
            return done(anchors, Verdict::Clean);
        }

        let mut current = start.commit;
        let mut first_line = start.first_line;
        let line_count = start.line_count;

        loop {
            let neighbors = match direction {
                Direction::Forward => self.graph.children(current),
                Direction::Backward => self.graph.parents(current),
            };
            if neighbors.len() > 1 {
                return done(anchors, Verdict::Merge(current));
            }
            let Some(&neighbor) = neighbors.first() else {
                return done(anchors, Verdict::Clean);
            };

            let current_sha = self.sha(current)?;
            let neighbor_sha = self.sha(neighbor)?;

            let Some(neighbor_hash) = self
                .diffs
                .content_hash(neighbor_sha, path)
                .with_context(|| format!("Failed to look up {path} at {neighbor}"))?
            else {
                return match direction {
                    Direction::Forward => done(anchors, Verdict::Modified(neighbor)),
                    Direction::Backward => done(anchors, Verdict::Clean),
                };
            };

            if direction == Direction::Backward
                && exclude.is_some_and(|chain| chain.covers_version(&neighbor_hash))
            {
                return done(anchors, Verdict::Clean);
            }

            let chunks = match direction {
                Direction::Forward => self.diffs.chunks(current_sha, neighbor_sha, path),
                Direction::Backward => self.diffs.chunks(neighbor_sha, current_sha, path),
            }
            .with_context(|| format!("Failed to diff {path} between {current} and {neighbor}"))?;

            let Some(shifted) = translate(&chunks, direction, first_line, line_count) else {
                return done(anchors, Verdict::Modified(neighbor));
            };

            first_line = shifted;
            anchors.push(Anchor::file(neighbor, neighbor_hash, first_line, line_count));
            current = neighbor;
        }
    }

    fn sha(&self, id: CommitId) -> Result<&'a str> {
        self.graph
            .commit(id)
            .map(|commit| commit.sha.as_str())
            .with_context(|| format!("Commit {id} is not part of the review"))
    }
}

/// Translate `[first_line, first_line + line_count)` through `chunks`.
///
/// Returns the shifted first line, or `None` when a chunk touches the range.
/// Chunks are in file order; the side the range lives on is the old side when
/// walking forward and the new side when walking backward.
#[must_use]
pub fn translate(
    chunks: &[DiffChunk],
    direction: Direction,
    first_line: u32,
    line_count: u32,
) -> Option<u32> {
    let first = i64::from(first_line);
    let end_line = first + i64::from(line_count);
    let mut delta: i64 = 0;

    for chunk in chunks {
        let (offset, count, change) = match direction {
            Direction::Forward => (chunk.delete_offset, chunk.delete_count, chunk.delta()),
            Direction::Backward => (chunk.insert_offset, chunk.insert_count, -chunk.delta()),
        };
        let (offset, count) = (i64::from(offset), i64::from(count));

        if offset + count <= first {
            delta += change;
        } else if offset < end_line {
            return None;
        } else {
            break;
        }
    }

    u32::try_from(first + delta).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::commit;
    use crate::history::CommitSet;
    use crate::model::{ChainFile, ChainKind, ChainState, FileId, ReviewId, UserId};
    use crate::scm::memory::MemoryRepo;

    const PATH: &str = "src/lib.rs";

    /// Linear history 1 <- 2 <- 3 <- 4 with `PATH` present everywhere.
    fn linear() -> (CommitSet, MemoryRepo) {
        let set = CommitSet::new([
            commit(1, &[]),
            commit(2, &[1]),
            commit(3, &[2]),
            commit(4, &[3]),
        ]);
        let mut repo = MemoryRepo::new();
        for id in 1..=4 {
            repo.set_file(&format!("c{id}"), PATH, &format!("h{id}"));
        }
        (set, repo)
    }

    fn chain_with_hashes(hashes: &[&str]) -> CommentChain {
        CommentChain {
            id: crate::model::ChainId(1),
            review: ReviewId(1),
            creator: UserId(1),
            created_at: chrono::Utc::now(),
            kind: ChainKind::Issue,
            state: ChainState::Addressed,
            addressed_by: None,
            closed_by: None,
            file: Some(ChainFile {
                id: FileId(1),
                path: PATH.to_string(),
            }),
            comments: Vec::new(),
            anchors: hashes
                .iter()
                .map(|hash| Anchor::file(CommitId(1), *hash, 1, 1))
                .collect(),
        }
    }

    #[test]
    fn test_translate_offset_correctness() {
        let chunks = [DiffChunk::new(10, 2, 10, 0)];
        assert_eq!(translate(&chunks, Direction::Forward, 20, 1), Some(18));
        assert_eq!(translate(&chunks, Direction::Backward, 18, 1), Some(20));
    }

    #[test]
    fn test_translate_overlap_is_never_a_shift() {
        let chunk = DiffChunk::new(10, 3, 10, 3);
        for first in 8..=12 {
            assert_eq!(
                translate(&[chunk], Direction::Forward, first, 3),
                None,
                "range starting at {first} overlaps [10, 13)"
            );
        }
        assert_eq!(translate(&[chunk], Direction::Forward, 13, 3), Some(13));
        assert_eq!(translate(&[chunk], Direction::Forward, 5, 5), Some(5));
    }

    #[test]
    fn test_translate_pure_insertion_edges() {
        // Three lines inserted before old line 5.
        let chunk = DiffChunk::new(5, 0, 5, 3);
        assert_eq!(translate(&[chunk], Direction::Forward, 5, 2), Some(8));
        assert_eq!(translate(&[chunk], Direction::Forward, 3, 2), Some(3));
        assert_eq!(translate(&[chunk], Direction::Forward, 4, 2), None);
    }

    #[test]
    fn test_translate_handles_extreme_ranges() {
        let chunks = [DiffChunk::new(1, 1, 1, 1)];
        assert_eq!(translate(&chunks, Direction::Forward, 2, u32::MAX), Some(2));
        assert_eq!(translate(&chunks, Direction::Forward, 1, u32::MAX), None);

        let far = [DiffChunk::new(u32::MAX, u32::MAX, u32::MAX, 0)];
        assert_eq!(translate(&far, Direction::Forward, 10, 5), Some(10));
        assert_eq!(translate(&far, Direction::Backward, u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_translate_accumulates_and_stops_after_range() {
        let chunks = [
            DiffChunk::new(1, 0, 1, 2),
            DiffChunk::new(5, 1, 7, 0),
            DiffChunk::new(40, 1, 41, 1),
        ];
        assert_eq!(translate(&chunks, Direction::Forward, 20, 2), Some(21));
    }

    #[test]
    fn test_forward_walk_shifts_through_history() {
        let (set, mut repo) = linear();
        repo.set_chunks("c1", "c2", PATH, vec![DiffChunk::new(10, 2, 10, 0)]);
        repo.set_chunks("c3", "c4", PATH, vec![DiffChunk::new(1, 0, 1, 5)]);

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(1), "h1", 20, 2);
        let result = propagator
            .propagate(PATH, &start, Direction::Forward, None)
            .unwrap();

        assert_eq!(result.verdict, Verdict::Clean);
        assert_eq!(
            result.anchors,
            vec![
                Anchor::file(CommitId(2), "h2", 18, 2),
                Anchor::file(CommitId(3), "h3", 18, 2),
                Anchor::file(CommitId(4), "h4", 23, 2),
            ]
        );
    }

    #[test]
    fn test_forward_walk_stops_at_modification() {
        let (set, mut repo) = linear();
        repo.set_chunks("c2", "c3", PATH, vec![DiffChunk::new(6, 1, 6, 1)]);

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(1), "h1", 5, 2);
        let result = propagator
            .propagate(PATH, &start, Direction::Forward, None)
            .unwrap();

        assert_eq!(result.verdict, Verdict::Modified(CommitId(3)));
        assert_eq!(result.anchors, vec![Anchor::file(CommitId(2), "h2", 5, 2)]);
    }

    #[test]
    fn test_forward_file_removal_is_modified() {
        let set = CommitSet::new([commit(1, &[]), commit(2, &[1])]);
        let mut repo = MemoryRepo::new();
        repo.set_file("c1", PATH, "h1");

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(1), "h1", 1, 1);
        let result = propagator
            .propagate(PATH, &start, Direction::Forward, None)
            .unwrap();
        assert_eq!(result.verdict, Verdict::Modified(CommitId(2)));
        assert!(result.anchors.is_empty());
    }

    #[test]
    fn test_backward_file_addition_is_clean() {
        let set = CommitSet::new([commit(1, &[]), commit(2, &[1])]);
        let mut repo = MemoryRepo::new();
        repo.set_file("c2", PATH, "h2");

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(2), "h2", 1, 1);
        let result = propagator
            .propagate(PATH, &start, Direction::Backward, None)
            .unwrap();
        assert_eq!(result.verdict, Verdict::Clean);
        assert!(result.anchors.is_empty());
    }

    #[test]
    fn test_backward_without_tracked_parent_is_clean() {
        let set = CommitSet::new([commit(5, &[4])]);
        let mut repo = MemoryRepo::new();
        repo.set_file("c5", PATH, "h5");

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(5), "h5", 3, 1);
        let result = propagator
            .propagate(PATH, &start, Direction::Backward, None)
            .unwrap();
        assert_eq!(
            result,
            PropagationResult {
                anchors: Vec::new(),
                verdict: Verdict::Clean
            }
        );
    }

    #[test]
    fn test_merge_short_circuit_keeps_prefix() {
        // 1 <- 2, and 2 has two children 3 and 4.
        let set = CommitSet::new([
            commit(1, &[]),
            commit(2, &[1]),
            commit(3, &[2]),
            commit(4, &[2]),
        ]);
        let mut repo = MemoryRepo::new();
        for id in 1..=4 {
            repo.set_file(&format!("c{id}"), PATH, &format!("h{id}"));
        }

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(1), "h1", 3, 1);
        let result = propagator
            .propagate(PATH, &start, Direction::Forward, None)
            .unwrap();

        assert_eq!(result.verdict, Verdict::Merge(CommitId(2)));
        assert_eq!(result.anchors, vec![Anchor::file(CommitId(2), "h2", 3, 1)]);
    }

    #[test]
    fn test_backward_merge_commit() {
        let set = CommitSet::new([commit(1, &[]), commit(2, &[]), commit(3, &[1, 2])]);
        let mut repo = MemoryRepo::new();
        repo.set_file("c3", PATH, "h3");

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(3), "h3", 1, 1);
        let result = propagator
            .propagate(PATH, &start, Direction::Backward, None)
            .unwrap();
        assert_eq!(result.verdict, Verdict::Merge(CommitId(3)));
        assert!(result.anchors.is_empty());
    }

    #[test]
    fn test_backward_stops_at_version_the_chain_covers() {
        let (set, repo) = linear();
        let chain = chain_with_hashes(&["h2"]);

        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(4), "h4", 7, 1);
        let result = propagator
            .propagate(PATH, &start, Direction::Backward, Some(&chain))
            .unwrap();

        assert_eq!(result.verdict, Verdict::Clean);
        assert_eq!(result.anchors, vec![Anchor::file(CommitId(3), "h3", 7, 1)]);
    }

    #[test]
    fn test_propagation_is_deterministic() {
        let (set, mut repo) = linear();
        repo.set_chunks("c2", "c3", PATH, vec![DiffChunk::new(2, 1, 2, 4)]);
        let propagator = Propagator::new(&set, &repo);
        let start = Anchor::file(CommitId(2), "h2", 9, 3);

        let first = propagator.propagate_both(PATH, &start, None).unwrap();
        let second = propagator.propagate_both(PATH, &start, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.merge(), None);
        assert_eq!(
            first.all_anchors(&start),
            vec![
                Anchor::file(CommitId(1), "h1", 9, 3),
                start.clone(),
                Anchor::file(CommitId(3), "h3", 12, 3),
                Anchor::file(CommitId(4), "h4", 12, 3),
            ]
        );
    }

    #[test]
    fn test_rejects_commit_message_anchor_and_unknown_commit() {
        let (set, repo) = linear();
        let propagator = Propagator::new(&set, &repo);
        assert!(propagator
            .propagate(PATH, &Anchor::commit_message(CommitId(1), 1, 1), Direction::Forward, None)
            .is_err());
        assert!(propagator
            .propagate(PATH, &Anchor::file(CommitId(99), "x", 1, 1), Direction::Forward, None)
            .is_err());
    }
}
