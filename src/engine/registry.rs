//! Document/process registry.
//!
//! Process-wide table keyed by document identity, enforcing the
//! one-active-run-per-document invariant. Entries are created on run start
//! and removed on terminal state; completed runs land in a bounded
//! per-document history for later inspection.
//!
//! Lock discipline: the `DashMap` shard guards are held only for the
//! duration of a lookup/insert/remove, never across process I/O;
//! `CancelHandle::request` is a single atomic store.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::process::CancelHandle;
use super::{RunError, RunStatus};
use crate::diag::DiagnosticEntry;

/// Completed runs kept per document, oldest evicted first.
const HISTORY_LIMIT: usize = 8;

/// Record of one completed run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub doc: PathBuf,
    pub tool: String,
    pub status: RunStatus,
    /// Steps that actually started (a chain aborted at step 2 of 4 ran 2)
    pub steps_run: usize,
    /// Everything collected before the terminal state, failure included
    pub diagnostics: Vec<DiagnosticEntry>,
    pub duration: Duration,
}

struct ActiveRun {
    tool: String,
    cancel: CancelHandle,
}

/// The registry itself. Injected wherever runs are started - passed by
/// reference, never reached as a singleton.
#[derive(Default)]
pub struct DocumentRegistry {
    active: DashMap<PathBuf, ActiveRun>,
    history: DashMap<PathBuf, VecDeque<RunRecord>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert; two simultaneous calls for the same document
    /// settle to exactly one winner.
    pub fn try_begin(&self, doc: &Path, tool: &str, cancel: CancelHandle) -> Result<(), RunError> {
        match self.active.entry(doc.to_path_buf()) {
            Entry::Occupied(entry) => Err(RunError::ConcurrentRunRejected {
                doc: doc.to_path_buf(),
                tool: entry.get().tool.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(ActiveRun {
                    tool: tool.to_string(),
                    cancel,
                });
                Ok(())
            }
        }
    }

    /// Forward a cancellation request to the active run, if any.
    ///
    /// Returns whether a run was active. No-op (and `false`) otherwise.
    pub fn cancel(&self, doc: &Path) -> bool {
        match self.active.get(doc) {
            Some(run) => {
                run.cancel.request();
                true
            }
            None => false,
        }
    }

    /// Cancel every active run (shutdown path).
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel.request();
        }
    }

    /// Remove the active entry and store the completed-run record.
    pub fn finish(&self, record: RunRecord) {
        self.active.remove(&record.doc);
        let mut history = self.history.entry(record.doc.clone()).or_default();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(record);
    }

    pub fn is_active(&self, doc: &Path) -> bool {
        self.active.contains_key(doc)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Completed-run records for a document, oldest first.
    pub fn history(&self, doc: &Path) -> Vec<RunRecord> {
        self.history
            .get(doc)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}
