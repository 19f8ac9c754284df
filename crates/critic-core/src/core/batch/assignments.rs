//! Per-batch assignment accounting.
//!
//! Assignments are collected per user and file before anything is written,
//! so that assigning and unassigning the same review file in one batch
//! cancel out instead of producing two audit rows.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{FileId, ReviewFile, ReviewFileId, UserId};

/// Pending assignment changes for one (user, file).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentDelta {
    pub assigned_ids: Vec<ReviewFileId>,
    pub assigned_deleted: u32,
    pub assigned_inserted: u32,
    pub unassigned_ids: Vec<ReviewFileId>,
    pub unassigned_deleted: u32,
    pub unassigned_inserted: u32,
}

impl AssignmentDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assigned_ids.is_empty() && self.unassigned_ids.is_empty()
    }

    fn assign(&mut self, file: &ReviewFile) {
        if remove_id(&mut self.unassigned_ids, file.id) {
            self.unassigned_deleted -= file.deleted;
            self.unassigned_inserted -= file.inserted;
        } else if !self.assigned_ids.contains(&file.id) {
            self.assigned_ids.push(file.id);
            self.assigned_deleted += file.deleted;
            self.assigned_inserted += file.inserted;
        }
    }

    fn unassign(&mut self, file: &ReviewFile) {
        if remove_id(&mut self.assigned_ids, file.id) {
            self.assigned_deleted -= file.deleted;
            self.assigned_inserted -= file.inserted;
        } else if !self.unassigned_ids.contains(&file.id) {
            self.unassigned_ids.push(file.id);
            self.unassigned_deleted += file.deleted;
            self.unassigned_inserted += file.inserted;
        }
    }
}

fn remove_id(ids: &mut Vec<ReviewFileId>, id: ReviewFileId) -> bool {
    let before = ids.len();
    ids.retain(|existing| *existing != id);
    ids.len() != before
}

/// `user -> file -> delta`, ordered so flushing is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentTable {
    entries: BTreeMap<UserId, BTreeMap<FileId, AssignmentDelta>>,
}

impl AssignmentTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, user: UserId, file: &ReviewFile) {
        self.delta_mut(user, file.file).assign(file);
        self.prune(user, file.file);
    }

    pub fn unassign(&mut self, user: UserId, file: &ReviewFile) {
        self.delta_mut(user, file.file).unassign(file);
        self.prune(user, file.file);
    }

    #[must_use]
    pub fn get(&self, user: UserId, file: FileId) -> Option<&AssignmentDelta> {
        self.entries.get(&user).and_then(|files| files.get(&file))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every non-empty delta in user, then file order.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, FileId, &AssignmentDelta)> {
        self.entries.iter().flat_map(|(user, files)| {
            files
                .iter()
                .map(move |(file, delta)| (*user, *file, delta))
        })
    }

    fn delta_mut(&mut self, user: UserId, file: FileId) -> &mut AssignmentDelta {
        self.entries
            .entry(user)
            .or_default()
            .entry(file)
            .or_default()
    }

    fn prune(&mut self, user: UserId, file: FileId) {
        if let Some(files) = self.entries.get_mut(&user) {
            if files.get(&file).is_some_and(AssignmentDelta::is_empty) {
                files.remove(&file);
            }
            if files.is_empty() {
                self.entries.remove(&user);
            }
        }
    }
}
