//! Review service: reads, history partitions, rebases and import.

use crate::history::{self, CommitSet, Partition};
use crate::model::{
    ChainId, ChangesetId, CommentChain, CommitId, RebaseId, Review, ReviewFile, ReviewFilter,
    ReviewId, UserId,
};
use crate::scm::git::{GitCommit, GitRepo};
use crate::store::{write, Assignment, ReviewDb, ReviewProgress};

use super::{CoreError, CoreResult};

/// A file changed by an imported changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub deleted: u32,
    pub inserted: u32,
}

/// Service for review-level operations.
pub struct ReviewService<'a> {
    db: &'a ReviewDb,
}

impl<'a> ReviewService<'a> {
    pub(crate) const fn new(db: &'a ReviewDb) -> Self {
        Self { db }
    }

    /// Get a review.
    ///
    /// Returns `Err(CoreError::ReviewNotFound)` if it does not exist.
    pub fn get(&self, review: ReviewId) -> CoreResult<Review> {
        self.db
            .get_review(review)
            .map_err(CoreError::Internal)?
            .ok_or(CoreError::ReviewNotFound(review))
    }

    pub fn list(&self) -> CoreResult<Vec<Review>> {
        self.db.list_reviews().map_err(CoreError::Internal)
    }

    pub fn commit_set(&self, review: ReviewId) -> CoreResult<CommitSet> {
        self.get(review)?;
        self.db.commit_set(review).map_err(CoreError::Internal)
    }

    /// History partitions, newest first.
    pub fn partitions(&self, review: ReviewId) -> CoreResult<Vec<Partition>> {
        let head = self.get(review)?.head;
        let commits = self.db.commit_set(review).map_err(CoreError::Internal)?;
        let rebases = self.db.rebases(review).map_err(CoreError::Internal)?;
        Ok(history::partitions(review, &commits, head, &rebases))
    }

    /// The partition holding `commit`.
    pub fn partition_of(&self, review: ReviewId, commit: CommitId) -> CoreResult<Partition> {
        let partitions = self.partitions(review)?;
        history::partition_of(&partitions, commit)
            .cloned()
            .ok_or_else(|| CoreError::invalid(format!("Commit {commit} is not part of {review}")))
    }

    pub fn filters(&self, review: ReviewId) -> CoreResult<Vec<ReviewFilter>> {
        self.get(review)?;
        self.db.filters(review).map_err(CoreError::Internal)
    }

    pub fn files(&self, review: ReviewId) -> CoreResult<Vec<ReviewFile>> {
        self.get(review)?;
        self.db.review_files(review).map_err(CoreError::Internal)
    }

    pub fn progress(&self, review: ReviewId) -> CoreResult<ReviewProgress> {
        self.get(review)?;
        self.db.progress(review).map_err(CoreError::Internal)
    }

    pub fn assignments(&self, review: ReviewId) -> CoreResult<Vec<Assignment>> {
        self.get(review)?;
        self.db.assignments(review).map_err(CoreError::Internal)
    }

    /// Get a comment chain with its comments and anchors.
    ///
    /// Returns `Err(CoreError::ChainNotFound)` if it does not exist.
    pub fn chain(&self, chain: ChainId) -> CoreResult<CommentChain> {
        self.db
            .get_chain(chain)
            .map_err(CoreError::Internal)?
            .ok_or(CoreError::ChainNotFound(chain))
    }

    pub fn chains(&self, review: ReviewId) -> CoreResult<Vec<CommentChain>> {
        self.get(review)?;
        self.db.chains(review).map_err(CoreError::Internal)
    }

    // ------------------------------------------------------------------------
    // Rebases
    // ------------------------------------------------------------------------

    /// Start rebasing the review's branch, optionally renaming it.
    pub fn begin_rebase(
        &self,
        review: ReviewId,
        user: UserId,
        branch: Option<&str>,
    ) -> CoreResult<RebaseId> {
        let current = self.get(review)?;
        let Some(old_head) = current.head else {
            return Err(CoreError::state(format!("{review} has no commits to rebase")));
        };
        if let Some(existing) = self.db.rebase_in_progress(review).map_err(CoreError::Internal)? {
            return Err(CoreError::conflict(format!(
                "{review} already has rebase {} in progress",
                existing.id
            )));
        }

        let rebase = write::insert_rebase(self.db.conn(), review, user, old_head, branch)
            .map_err(CoreError::from_store)?;
        tracing::info!(%review, %rebase, %old_head, "rebase started");
        Ok(rebase)
    }

    /// Finish an in-progress rebase: the review's head moves to `new_head`.
    pub fn finish_rebase(
        &self,
        rebase: RebaseId,
        new_head: CommitId,
        new_upstream: Option<CommitId>,
    ) -> CoreResult<()> {
        let record = self
            .db
            .get_rebase(rebase)
            .map_err(CoreError::Internal)?
            .ok_or(CoreError::RebaseNotFound(rebase))?;
        if !record.is_in_progress() {
            return Err(CoreError::state(format!("{rebase} is already finished")));
        }
        let commits = self.db.commit_set(record.review).map_err(CoreError::Internal)?;
        if !commits.iter().any(|commit| commit.id == new_head) {
            return Err(CoreError::invalid(format!(
                "New head {new_head} is not part of {}",
                record.review
            )));
        }

        let tx = self.db.conn().unchecked_transaction()?;
        if write::complete_rebase(&tx, rebase, new_head, new_upstream)
            .map_err(CoreError::from_store)?
            == 0
        {
            return Err(CoreError::conflict(format!("{rebase} was finished concurrently")));
        }
        write::set_review_head(&tx, record.review, new_head).map_err(CoreError::from_store)?;
        if let Some(branch) = record.branch.as_deref() {
            write::set_review_branch(&tx, record.review, branch).map_err(CoreError::from_store)?;
        }
        write::bump_serial(&tx, record.review).map_err(CoreError::from_store)?;
        tx.commit()?;

        tracing::info!(review = %record.review, %rebase, %new_head, "rebase finished");
        Ok(())
    }

    /// Abandon an in-progress rebase.
    pub fn cancel_rebase(&self, rebase: RebaseId) -> CoreResult<()> {
        let record = self
            .db
            .get_rebase(rebase)
            .map_err(CoreError::Internal)?
            .ok_or(CoreError::RebaseNotFound(rebase))?;
        if !record.is_in_progress() {
            return Err(CoreError::state(format!("{rebase} is already finished")));
        }
        if write::delete_rebase(self.db.conn(), rebase).map_err(CoreError::from_store)? == 0 {
            return Err(CoreError::conflict(format!("{rebase} was finished concurrently")));
        }
        tracing::info!(review = %record.review, %rebase, "rebase cancelled");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------------

    /// Create an empty review owned by `owner`.
    pub fn create(&self, summary: &str, branch: &str, owner: UserId) -> CoreResult<ReviewId> {
        if summary.trim().is_empty() {
            return Err(CoreError::invalid("Review summary cannot be empty"));
        }
        let review = write::insert_review(self.db.conn(), summary, branch, owner)
            .map_err(CoreError::from_store)?;
        tracing::info!(%review, branch, "review created");
        Ok(review)
    }

    /// Track a commit in the review. Parents are recorded by sha and need not
    /// belong to the review. The review's head moves to the new commit.
    pub fn add_commit(
        &self,
        review: ReviewId,
        sha: &str,
        parents: &[&str],
        author: Option<UserId>,
        summary: &str,
    ) -> CoreResult<CommitId> {
        self.get(review)?;
        let tx = self.db.conn().unchecked_transaction()?;
        let commit = insert_commit(&tx, review, sha, parents, author, summary)?;
        write::set_review_head(&tx, review, commit).map_err(CoreError::from_store)?;
        tx.commit()?;
        Ok(commit)
    }

    /// Record a changeset and the files it touches as pending review files.
    pub fn add_changeset(
        &self,
        review: ReviewId,
        parent: Option<CommitId>,
        child: CommitId,
        files: &[FileChange],
    ) -> CoreResult<ChangesetId> {
        self.get(review)?;
        let tx = self.db.conn().unchecked_transaction()?;
        let changeset = insert_changeset(&tx, review, parent, child, files)?;
        tx.commit()?;
        Ok(changeset)
    }

    /// Import `base..head` from git: one commit and one changeset per commit,
    /// authors matched to users by email or name. Returns the new head.
    pub fn import_from_git(
        &self,
        review: ReviewId,
        repo: &GitRepo,
        base: &str,
        head: &str,
    ) -> CoreResult<Option<CommitId>> {
        self.get(review)?;
        let commits = repo
            .commits_between(base, head)
            .map_err(CoreError::Internal)?;

        let mut changes = Vec::with_capacity(commits.len());
        for commit in &commits {
            let parent = commit.parents.first().map(String::as_str);
            let files = repo
                .changed_files(parent, &commit.sha)
                .map_err(CoreError::Internal)?;
            changes.push(files);
        }

        let tx = self.db.conn().unchecked_transaction()?;
        let mut last = None;
        for (commit, files) in commits.iter().zip(changes) {
            let author = self.commit_author(commit)?;
            let parents: Vec<&str> = commit.parents.iter().map(String::as_str).collect();
            let id = insert_commit(&tx, review, &commit.sha, &parents, author, &commit.summary)?;

            let parent = commit
                .parents
                .first()
                .map(|sha| write::ensure_commit(&tx, sha, None, ""))
                .transpose()
                .map_err(CoreError::from_store)?;
            let files: Vec<FileChange> = files
                .into_iter()
                .map(|file| FileChange {
                    path: file.path,
                    deleted: file.deleted,
                    inserted: file.inserted,
                })
                .collect();
            insert_changeset(&tx, review, parent, id, &files)?;

            last = Some(id);
        }
        if let Some(head) = last {
            write::set_review_head(&tx, review, head).map_err(CoreError::from_store)?;
        }
        tx.commit()?;

        tracing::info!(%review, commits = commits.len(), "imported commits from git");
        Ok(last)
    }
}

impl ReviewService<'_> {
    /// The user who wrote `commit`, matched by email first, then by name.
    fn commit_author(&self, commit: &GitCommit) -> CoreResult<Option<UserId>> {
        if !commit.author_email.is_empty() {
            if let Some(user) = self
                .db
                .user_by_email(&commit.author_email)
                .map_err(CoreError::Internal)?
            {
                return Ok(Some(user));
            }
        }
        if commit.author_name.is_empty() {
            return Ok(None);
        }
        Ok(self
            .db
            .user_by_name(&commit.author_name)
            .map_err(CoreError::Internal)?
            .map(|user| user.id))
    }
}

fn insert_commit(
    conn: &rusqlite::Connection,
    review: ReviewId,
    sha: &str,
    parents: &[&str],
    author: Option<UserId>,
    summary: &str,
) -> CoreResult<CommitId> {
    if sha.trim().is_empty() {
        return Err(CoreError::invalid("Commit sha cannot be empty"));
    }
    let commit = write::ensure_commit(conn, sha, author, summary).map_err(CoreError::from_store)?;
    let parent_ids = parents
        .iter()
        .map(|parent| write::ensure_commit(conn, parent, None, ""))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(CoreError::from_store)?;
    write::set_commit_parents(conn, commit, &parent_ids).map_err(CoreError::from_store)?;
    write::add_review_commit(conn, review, commit).map_err(CoreError::from_store)?;
    Ok(commit)
}

fn insert_changeset(
    conn: &rusqlite::Connection,
    review: ReviewId,
    parent: Option<CommitId>,
    child: CommitId,
    files: &[FileChange],
) -> CoreResult<ChangesetId> {
    let changeset =
        write::insert_changeset(conn, review, parent, child).map_err(CoreError::from_store)?;
    for change in files {
        crate::scm::validate_repo_relative_path(&change.path).map_err(CoreError::Internal)?;
        let file = write::ensure_file(conn, &change.path).map_err(CoreError::from_store)?;
        write::insert_review_file(conn, review, changeset, file, change.deleted, change.inserted)
            .map_err(CoreError::from_store)?;
    }
    Ok(changeset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileState;

    fn setup() -> (ReviewDb, UserId) {
        let db = ReviewDb::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let alice = write::ensure_user(db.conn(), "alice", None).unwrap();
        (db, alice)
    }

    #[test]
    fn test_create_and_add_history() {
        let (db, alice) = setup();
        let service = ReviewService::new(&db);
        let review = service.create("Add parser", "feature/parser", alice).unwrap();

        let c1 = service.add_commit(review, "aaa", &["base"], Some(alice), "one").unwrap();
        let c2 = service.add_commit(review, "bbb", &["aaa"], Some(alice), "two").unwrap();
        service
            .add_changeset(
                review,
                Some(c1),
                c2,
                &[FileChange {
                    path: "src/lib.rs".to_string(),
                    deleted: 1,
                    inserted: 4,
                }],
            )
            .unwrap();

        let loaded = service.get(review).unwrap();
        assert_eq!(loaded.head, Some(c2));
        assert_eq!(service.commit_set(review).unwrap().len(), 2);

        let files = service.files(review).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].state, FileState::Pending);
        assert_eq!(files[0].author, Some(alice));
        assert_eq!(service.progress(review).unwrap().total_lines, 5);
    }

    #[test]
    fn test_missing_review() {
        let (db, _) = setup();
        let service = ReviewService::new(&db);
        assert!(matches!(
            service.get(ReviewId(42)),
            Err(CoreError::ReviewNotFound(ReviewId(42)))
        ));
        assert!(matches!(
            service.chain(ChainId(1)),
            Err(CoreError::ChainNotFound(ChainId(1)))
        ));
        assert!(service.create("  ", "main", UserId(1)).is_err());
    }

    #[test]
    fn test_rebase_lifecycle_and_partitions() {
        let (db, alice) = setup();
        let service = ReviewService::new(&db);
        let review = service.create("Rebased", "topic", alice).unwrap();
        assert!(matches!(
            service.begin_rebase(review, alice, None),
            Err(CoreError::InvalidState(_))
        ));

        let c1 = service.add_commit(review, "a1", &["up1"], None, "").unwrap();
        let c2 = service.add_commit(review, "a2", &["a1"], None, "").unwrap();

        let rebase = service.begin_rebase(review, alice, Some("topic-v2")).unwrap();
        assert!(matches!(
            service.begin_rebase(review, alice, None),
            Err(CoreError::Conflict(_))
        ));

        let r1 = service.add_commit(review, "b1", &["up2"], None, "").unwrap();
        assert!(matches!(
            service.finish_rebase(rebase, CommitId(999), None),
            Err(CoreError::InvalidArgument(_))
        ));
        service.finish_rebase(rebase, r1, None).unwrap();
        assert!(matches!(
            service.finish_rebase(rebase, r1, None),
            Err(CoreError::InvalidState(_))
        ));

        let loaded = service.get(review).unwrap();
        assert_eq!(loaded.head, Some(r1));
        assert_eq!(loaded.branch, "topic-v2");

        let partitions = service.partitions(review).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].rebase, Some(rebase));
        assert!(partitions[0].commits.contains(&r1));
        assert!(partitions[1].commits.contains(&c1));
        assert!(partitions[1].commits.contains(&c2));
        assert_eq!(service.partition_of(review, c1).unwrap().rebase, None);
    }

    #[test]
    fn test_cancel_rebase() {
        let (db, alice) = setup();
        let service = ReviewService::new(&db);
        let review = service.create("Cancelled", "topic", alice).unwrap();
        service.add_commit(review, "a1", &[], None, "").unwrap();

        let rebase = service.begin_rebase(review, alice, None).unwrap();
        service.cancel_rebase(rebase).unwrap();
        assert!(matches!(
            service.cancel_rebase(rebase),
            Err(CoreError::RebaseNotFound(_))
        ));
        // A new one can start once the old one is gone.
        service.begin_rebase(review, alice, None).unwrap();
    }
}
