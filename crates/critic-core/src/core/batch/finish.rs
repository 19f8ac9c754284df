//! Applying a batch in one transaction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rusqlite::Connection;
use serde::Serialize;

use crate::filters::{FilterPattern, FilterSet};
use crate::model::{
    BatchId, ChainId, ChainState, CommitId, ReviewFile, ReviewFileId, ReviewFilter, TransactionId,
    UserId,
};
use crate::notify::Notification;
use crate::store::write::{self, ChainChangeRow, NewChain};

use super::{AssignmentTable, Batch, CommentOperation, FilterOperation};
use crate::core::{CoreError, CoreResult};

/// Options for [`Batch::finish`].
#[derive(Debug, Clone, Default)]
pub struct FinishOptions {
    /// Free-form comment stored on the batch record.
    pub comment: Option<String>,
}

/// Ids allocated by a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinishOutcome {
    /// Present when the batch carried comment operations or a comment.
    pub batch_id: Option<BatchId>,
    /// Present when the batch changed filters or assignments.
    pub assignment_transaction_id: Option<TransactionId>,
    pub was_accepted: bool,
    pub is_accepted: bool,
}

impl Batch<'_> {
    /// Apply every staged operation atomically.
    ///
    /// Either all of it lands or none of it does. A concurrent change that
    /// invalidates a staged operation fails the whole batch with
    /// [`CoreError::Conflict`].
    pub fn finish(self, options: &FinishOptions) -> CoreResult<FinishOutcome> {
        let comment = options
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|comment| !comment.is_empty());
        if self.is_empty() && comment.is_none() {
            tracing::debug!(review = %self.review.id, "empty batch, nothing to do");
            return Ok(FinishOutcome::default());
        }

        let db = self.services.db();
        let conn = db.conn();
        if !conn.is_autocommit() {
            tracing::warn!(review = %self.review.id, "rolling back stray transaction");
            conn.execute_batch("ROLLBACK")?;
        }

        let review = self.review.id;
        let was_accepted = db.is_accepted(review).map_err(CoreError::Internal)?;
        let before = FilterSet::new(db.filters(review).map_err(CoreError::Internal)?)
            .map_err(CoreError::Internal)?;

        let tx = conn.unchecked_transaction()?;

        let batch_id = if self.comment_ops.is_empty() && comment.is_none() {
            None
        } else {
            Some(write::insert_batch(&tx, review, self.user, comment).map_err(CoreError::from_store)?)
        };
        let transaction_id = if self.filter_ops.is_empty() && self.assignments.is_empty() {
            None
        } else {
            Some(
                write::insert_assignment_transaction(&tx, review, self.user)
                    .map_err(CoreError::from_store)?,
            )
        };

        if let Some(transaction) = transaction_id {
            let files: BTreeMap<ReviewFileId, ReviewFile> = db
                .review_files(review)
                .map_err(CoreError::Internal)?
                .into_iter()
                .map(|file| (file.id, file))
                .collect();
            let (touched, after) = self.apply_filter_ops(&tx, transaction, &files, &before)?;
            let mut table = self.assignments.clone();
            Self::reconcile(&touched, &files, &before, &after, &mut table);
            self.flush_assignments(&tx, transaction, &table)?;
        }
        if let Some(batch) = batch_id {
            self.apply_comment_ops(&tx, batch)?;
        }

        write::bump_serial(&tx, review).map_err(CoreError::from_store)?;
        let is_accepted = db.is_accepted(review).map_err(CoreError::Internal)?;
        tx.commit()?;

        let notification = Notification {
            batch_id,
            was_accepted: batch_id.map(|_| was_accepted),
            is_accepted: batch_id.map(|_| is_accepted),
            transaction_id,
        };
        if !notification.is_empty() {
            if let Err(err) = self.services.notifier().notify(&notification) {
                tracing::warn!(%review, error = %err, "failed to send batch notification");
            }
        }

        tracing::info!(
            %review,
            user = %self.user,
            comment_ops = self.comment_ops.len(),
            filter_ops = self.filter_ops.len(),
            was_accepted,
            is_accepted,
            "batch finished"
        );

        Ok(FinishOutcome {
            batch_id,
            assignment_transaction_id: transaction_id,
            was_accepted,
            is_accepted,
        })
    }

    /// Run filter edits, returning the (user, review file) pairs whose
    /// responsibility may have changed and the filter set after the edits.
    fn apply_filter_ops(
        &self,
        conn: &Connection,
        transaction: TransactionId,
        files: &BTreeMap<ReviewFileId, ReviewFile>,
        before: &FilterSet,
    ) -> CoreResult<(BTreeSet<(UserId, ReviewFileId)>, FilterSet)> {
        let review = self.review.id;

        let mut after = before.clone();
        let mut touched = BTreeSet::new();
        let mut queue: VecDeque<FilterOperation> = self.filter_ops.iter().cloned().collect();

        while let Some(op) = queue.pop_front() {
            match op {
                FilterOperation::Add { user, path, kind } => {
                    let id = write::insert_filter(conn, review, user, &path, kind, self.user)
                        .map_err(|err| self.filter_conflict(err, user, &path))?;
                    write::record_filter_change(conn, transaction, id, user, &path, kind, true)
                        .map_err(CoreError::from_store)?;
                    after
                        .push(ReviewFilter {
                            id,
                            review,
                            user,
                            path: path.clone(),
                            kind,
                            creator: self.user,
                        })
                        .map_err(CoreError::Internal)?;
                    queue.push_back(FilterOperation::Reconcile { user, path });
                }
                FilterOperation::Remove { filter } => {
                    if write::delete_filter(conn, filter.id).map_err(CoreError::from_store)? == 0 {
                        return Err(CoreError::conflict(format!(
                            "Filter {} was removed concurrently",
                            filter.id
                        )));
                    }
                    write::record_filter_change(
                        conn,
                        transaction,
                        filter.id,
                        filter.user,
                        &filter.path,
                        filter.kind,
                        false,
                    )
                    .map_err(CoreError::from_store)?;
                    after.remove(&filter);
                    queue.push_back(FilterOperation::Reconcile {
                        user: filter.user,
                        path: filter.path,
                    });
                }
                FilterOperation::Reconcile { user, path } => {
                    let pattern = FilterPattern::compile(&path).map_err(CoreError::Internal)?;
                    touched.extend(
                        files
                            .values()
                            .filter(|file| pattern.matches(&file.path))
                            .map(|file| (user, file.id)),
                    );
                }
            }
        }

        Ok((touched, after))
    }

    /// A unique-constraint failure on insert means another session added the
    /// same filter after validation.
    fn filter_conflict(&self, err: anyhow::Error, user: UserId, path: &str) -> CoreError {
        match CoreError::from_store(err) {
            CoreError::Storage(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::conflict(format!(
                    "{user} already has a filter on '{path}' in {}",
                    self.review.id
                ))
            }
            other => other,
        }
    }

    /// Turn reviewer changes into assignment changes.
    ///
    /// Gaining reviewer status assigns the file unless the user authored it;
    /// losing it unassigns.
    fn reconcile(
        touched: &BTreeSet<(UserId, ReviewFileId)>,
        files: &BTreeMap<ReviewFileId, ReviewFile>,
        before: &FilterSet,
        after: &FilterSet,
        table: &mut AssignmentTable,
    ) {
        for (user, id) in touched {
            let Some(file) = files.get(id) else {
                continue;
            };
            let was = before.is_reviewer(*user, &file.path);
            let is = after.is_reviewer(*user, &file.path);
            match (was, is) {
                (false, true) if file.author != Some(*user) => table.assign(*user, file),
                (true, false) => table.unassign(*user, file),
                _ => {}
            }
        }
    }

    /// Write the net assignment changes, skipping ones already in effect.
    fn flush_assignments(
        &self,
        conn: &Connection,
        transaction: TransactionId,
        table: &AssignmentTable,
    ) -> CoreResult<()> {
        let db = self.services.db();
        let mut assigned_users = BTreeSet::new();

        for (user, file, delta) in table.iter() {
            let mut assign = Vec::new();
            for id in &delta.assigned_ids {
                if !db.is_assigned(*id, user).map_err(CoreError::Internal)? {
                    assign.push(*id);
                }
            }
            let mut unassign = Vec::new();
            for id in &delta.unassigned_ids {
                if db.is_assigned(*id, user).map_err(CoreError::Internal)? {
                    unassign.push(*id);
                }
            }

            if !assign.is_empty() {
                write::insert_assignments(conn, transaction, user, &assign)
                    .map_err(CoreError::from_store)?;
                assigned_users.insert(user);
            }
            if !unassign.is_empty() {
                write::delete_assignments(conn, transaction, user, &unassign)
                    .map_err(CoreError::from_store)?;
            }
            tracing::debug!(
                %user,
                %file,
                assigned = assign.len(),
                unassigned = unassign.len(),
                "assignments flushed"
            );
        }

        for user in assigned_users {
            write::add_review_user(conn, self.review.id, user).map_err(CoreError::from_store)?;
        }
        Ok(())
    }

    fn apply_comment_ops(&self, conn: &Connection, batch: BatchId) -> CoreResult<()> {
        let review = self.review.id;
        let user = self.user;
        let mut participated = false;

        for op in &self.comment_ops {
            match op {
                CommentOperation::CreateChain {
                    kind,
                    state,
                    addressed_by,
                    file,
                    anchors,
                    text,
                } => {
                    let chain = write::insert_chain(
                        conn,
                        &NewChain {
                            review,
                            batch,
                            creator: user,
                            kind: *kind,
                            state: *state,
                            addressed_by: *addressed_by,
                            file: *file,
                        },
                    )
                    .map_err(CoreError::from_store)?;
                    write::insert_anchors(conn, chain, anchors).map_err(CoreError::from_store)?;
                    write::insert_comment(conn, chain, batch, user, text)
                        .map_err(CoreError::from_store)?;
                    participated = true;
                    tracing::debug!(%review, %chain, %kind, %state, "chain created");
                }
                CommentOperation::Reply { chain, text } => {
                    write::insert_comment(conn, *chain, batch, user, text)
                        .map_err(CoreError::from_store)?;
                    participated = true;
                }
                CommentOperation::Resolve { chain } => {
                    transition(
                        conn,
                        batch,
                        *chain,
                        ChainState::Open,
                        ChainState::Closed,
                        None,
                        Some(user),
                    )?;
                }
                CommentOperation::Reopen {
                    chain,
                    from,
                    anchors,
                } => {
                    transition(conn, batch, *chain, *from, ChainState::Open, None, None)?;
                    write::insert_anchors(conn, *chain, anchors).map_err(CoreError::from_store)?;
                }
                CommentOperation::MarkAddressed { chain, commit } => {
                    transition(
                        conn,
                        batch,
                        *chain,
                        ChainState::Open,
                        ChainState::Addressed,
                        Some(*commit),
                        None,
                    )?;
                }
                CommentOperation::Morph { chain, from, to } => {
                    if write::morph_chain(conn, *chain, *from, *to).map_err(CoreError::from_store)?
                        == 0
                    {
                        return Err(CoreError::conflict(format!(
                            "{chain} changed since it was staged for morphing"
                        )));
                    }
                    write::record_chain_change(
                        conn,
                        batch,
                        *chain,
                        &ChainChangeRow {
                            from_kind: Some(*from),
                            to_kind: Some(*to),
                            ..ChainChangeRow::default()
                        },
                    )
                    .map_err(CoreError::from_store)?;
                }
                CommentOperation::MarkReviewed { files } => {
                    for file in files {
                        if write::mark_file_reviewed(conn, *file, user)
                            .map_err(CoreError::from_store)?
                            == 0
                        {
                            return Err(CoreError::conflict(format!(
                                "{file} was reviewed concurrently"
                            )));
                        }
                    }
                    participated = true;
                }
            }
        }

        if participated {
            write::add_review_user(conn, review, user).map_err(CoreError::from_store)?;
        }
        Ok(())
    }
}

/// Conditionally move an issue between states and audit the move.
fn transition(
    conn: &Connection,
    batch: BatchId,
    chain: ChainId,
    from: ChainState,
    to: ChainState,
    addressed_by: Option<CommitId>,
    closed_by: Option<UserId>,
) -> CoreResult<()> {
    let changed = write::transition_chain(conn, chain, from, to, addressed_by, closed_by)
        .map_err(CoreError::from_store)?;
    if changed == 0 {
        return Err(CoreError::conflict(format!(
            "{chain} is no longer {from}; another session changed it"
        )));
    }
    write::record_chain_change(
        conn,
        batch,
        chain,
        &ChainChangeRow {
            from_state: Some(from),
            to_state: Some(to),
            address_commit: addressed_by,
            ..ChainChangeRow::default()
        },
    )
    .map_err(CoreError::from_store)?;
    tracing::debug!(%chain, %from, %to, "chain state changed");
    Ok(())
}
