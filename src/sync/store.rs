//! Per-document sync record storage with atomic replacement.
//!
//! Uses `arc-swap` so queries are lock-free reads and a reload swaps in a
//! fully built replacement: concurrent readers see either the old or the new
//! record in full, never a mix. A failed run never touches the slot, so the
//! stale record stays queryable and the old preview remains navigable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use super::artifact;
use super::record::SyncRecord;
use crate::core::DocumentSpec;

/// One atomically-replaceable record slot per document.
#[derive(Default)]
pub struct SyncStore {
    slots: DashMap<PathBuf, Arc<ArcSwap<SyncRecord>>>,
}

impl SyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, doc_path: &Path) -> Arc<ArcSwap<SyncRecord>> {
        self.slots
            .entry(doc_path.to_path_buf())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(SyncRecord::empty())))
            .clone()
    }

    /// Rebuild the record from the document's artifact and swap it in.
    ///
    /// Called by the orchestrator after a successful run only - the record
    /// is always derived from exactly one completed run. Returns the new
    /// record for logging.
    pub fn reload(&self, doc: &DocumentSpec) -> Arc<SyncRecord> {
        let record = Arc::new(artifact::load(&doc.sync_artifact_path(), doc.directory()));
        self.slot(doc.path()).store(Arc::clone(&record));
        record
    }

    /// Current record for a document; empty if never loaded.
    pub fn record(&self, doc: &DocumentSpec) -> Arc<SyncRecord> {
        self.slot(doc.path()).load_full()
    }
}
