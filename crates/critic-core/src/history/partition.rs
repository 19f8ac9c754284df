//! Split a review's history into rebase-bounded partitions.
//!
//! Each finished rebase replaces the branch's commits. The newest partition is
//! whatever the current head reaches; each rebase's old head then bounds the
//! partition before it.

use std::collections::BTreeSet;

use serde::Serialize;

use super::CommitSet;
use crate::model::{CommitId, Rebase, RebaseId, ReviewId};

/// A contiguous segment of a review's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub review: ReviewId,
    pub commits: BTreeSet<CommitId>,
    /// The rebase that introduced these commits; `None` for the oldest one.
    pub rebase: Option<RebaseId>,
}

/// Partition `commits` by the finished rebases in `rebases`, newest first.
///
/// Rebases may be given in any order; they are replayed newest to oldest by
/// id. Rebases still in progress have not replaced anything yet and are
/// skipped. Commits no head reaches end up in the oldest partition, so the
/// result always tiles the full set.
#[must_use]
pub fn partitions(
    review: ReviewId,
    commits: &CommitSet,
    head: Option<CommitId>,
    rebases: &[Rebase],
) -> Vec<Partition> {
    let mut finished: Vec<&Rebase> = rebases
        .iter()
        .filter(|rebase| rebase.review == review && !rebase.is_in_progress())
        .collect();
    finished.sort_by(|a, b| b.id.cmp(&a.id));

    let mut remaining: BTreeSet<CommitId> = commits.ids().collect();
    let mut result = Vec::with_capacity(finished.len() + 1);
    let mut bound = head;

    for rebase in finished {
        let segment = match bound {
            Some(tip) => commits.ancestors_within(tip, &remaining),
            None => {
                let older = commits.ancestors_within(rebase.old_head, &remaining);
                remaining.difference(&older).copied().collect()
            }
        };
        remaining = remaining.difference(&segment).copied().collect();
        tracing::debug!(
            rebase = %rebase.id,
            commits = segment.len(),
            remaining = remaining.len(),
            "partitioned history at rebase"
        );
        result.push(Partition {
            review,
            commits: segment,
            rebase: Some(rebase.id),
        });
        bound = Some(rebase.old_head);
    }

    result.push(Partition {
        review,
        commits: remaining,
        rebase: None,
    });
    result
}

/// The partition holding `commit`, if any.
#[must_use]
pub fn partition_of(partitions: &[Partition], commit: CommitId) -> Option<&Partition> {
    partitions
        .iter()
        .find(|partition| partition.commits.contains(&commit))
}
