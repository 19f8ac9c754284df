//! Hand-off of finished batches to the out-of-band notification pipeline.
//!
//! The core never sends mail itself. After a batch commits it hands a small
//! JSON payload to a [`Notifier`]; delivery is someone else's job.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::model::{BatchId, TransactionId};

/// Payload describing what a finished batch changed.
///
/// Either half may be absent: a batch with only filter edits has no
/// `batch_id`, and one with only comments has no `transaction_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub batch_id: Option<BatchId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub was_accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction_id: Option<TransactionId>,
}

impl Notification {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.batch_id.is_none() && self.transaction_id.is_none()
    }
}

/// Receiver of finished-batch payloads.
pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Drops every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Keeps payloads in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads received so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*notification);
        Ok(())
    }
}

/// Appends payloads as JSON lines to an outbox file.
///
/// Uses advisory file locking (via `fs2`) so concurrent processes never
/// interleave partial lines.
#[derive(Debug, Clone)]
pub struct SpoolNotifier {
    path: PathBuf,
}

impl SpoolNotifier {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every payload in the outbox.
    pub fn read_all(&self) -> Result<Vec<Notification>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open outbox: {}", self.path.display()))?;
        file.lock_shared()
            .context("Failed to acquire shared lock on outbox")?;

        let mut payloads = Vec::new();
        for (index, line) in BufReader::new(&file).lines().enumerate() {
            let line = line.context("Failed to read outbox line")?;
            if line.trim().is_empty() {
                continue;
            }
            let payload = serde_json::from_str(&line)
                .with_context(|| format!("Malformed outbox entry at line {}", index + 1))?;
            payloads.push(payload);
        }
        Ok(payloads)
    }
}

impl Notifier for SpoolNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create outbox directory: {}", parent.display())
                })?;
            }
        }

        let json_line =
            serde_json::to_string(notification).context("Failed to serialize notification")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open outbox: {}", self.path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire exclusive lock on outbox")?;
        file.seek(SeekFrom::End(0))
            .context("Failed to seek to end of outbox")?;
        writeln!(file, "{json_line}").context("Failed to write notification")?;
        file.flush().context("Failed to flush outbox")?;

        // Lock is released when the file is dropped.
        Ok(())
    }
}
