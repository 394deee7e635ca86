//! `watch` command: debounced re-typeset on source change.
//!
//! Watcher-First pattern: the watcher starts before the initial run, so a
//! save landing during that run is buffered, not lost. Raw notify events are
//! bridged onto the async side by a dedicated thread, debounced on a fixed
//! tick, and filtered down to source files - the toolchain's own output
//! (.pdf/.aux/.log/.synctex) must not re-trigger the loop.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::typeset::{EVENT_BUFFER, LogPreview, render_event};
use crate::config::{ToolDefinition, ToolsConfig};
use crate::core::{self, DocumentSpec};
use crate::diag::Severity;
use crate::engine::{DocumentRegistry, Engine, RunEvent, RunStatus};
use crate::logger::{status_error, status_success};
use crate::sync::SyncStore;

/// Debounce tick; changes within one tick coalesce into one run.
const DEBOUNCE_MS: u64 = 300;

/// Extensions that should trigger a re-typeset.
const SOURCE_EXTENSIONS: &[&str] = &["tex", "ltx", "latex", "sty", "cls", "bib", "def", "bst"];

/// Check if path is a temp/backup file (editor artifacts)
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

fn is_source_change(event: &notify::Event) -> bool {
    event.paths.iter().any(|path| {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        SOURCE_EXTENSIONS.contains(&ext) && !is_temp_file(path)
    })
}

pub fn run(file: &Path, tool_name: Option<&str>, tools: &ToolsConfig) -> Result<()> {
    let doc = DocumentSpec::resolve(file)?;
    if !doc.path().exists() {
        bail!("document `{}` does not exist", doc.path().display());
    }
    let tool = Arc::clone(tools.find(tool_name)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let registry = Arc::new(DocumentRegistry::new());
        core::register_registry(Arc::clone(&registry));
        let engine = Engine::new(registry, Arc::new(SyncStore::new()), Arc::new(LogPreview));

        // Create the watcher before the initial run (sync channel: notify
        // has no async interface)
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;
        watcher.watch(doc.directory(), RecursiveMode::Recursive)?;

        // Bridge thread: sync notify events -> async channel
        let (fs_tx, mut fs_rx) = mpsc::channel::<notify::Event>(64);
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if fs_tx.blocking_send(event).is_err() {
                            break; // receiver dropped
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        typeset_once(&engine, &tool, &doc).await;
        crate::log!("watch"; "watching {} (Ctrl+C to stop)", doc.directory().display());

        let mut dirty = false;
        loop {
            tokio::select! {
                biased;

                maybe_event = fs_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    if is_source_change(&event) {
                        dirty = true;
                    }
                }

                _ = tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)) => {
                    if core::is_shutdown() {
                        break;
                    }
                    if dirty {
                        dirty = false;
                        typeset_once(&engine, &tool, &doc).await;
                    }
                }
            }
        }

        crate::log!("watch"; "stopped");
        Ok(())
    })
}

/// One typeset pass with status-line reporting.
async fn typeset_once(engine: &Engine, tool: &Arc<ToolDefinition>, doc: &DocumentSpec) {
    let started = Instant::now();
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    let task = match engine.try_typeset(Arc::clone(tool), doc.clone(), tx) {
        Ok(task) => task,
        Err(err) => {
            status_error("typeset failed", &err.to_string());
            return;
        }
    };

    // Collect errors for the status block; verbose mode streams everything
    let collector = tokio::spawn(async move {
        let mut first_error: Option<String> = None;
        let mut errors = 0usize;
        while let Some(event) = rx.recv().await {
            if let RunEvent::Diagnostic(entry) = &event {
                if entry.severity == Severity::Error {
                    errors += 1;
                    if first_error.is_none() {
                        first_error = Some(entry.to_string());
                    }
                }
            }
            if crate::logger::is_verbose() {
                render_event(&event);
            }
        }
        (errors, first_error)
    });

    let record = match task.wait().await {
        Ok(record) => record,
        Err(err) => {
            status_error("typeset failed", &err.to_string());
            return;
        }
    };
    let (errors, first_error) = collector.await.unwrap_or((0, None));

    let secs = started.elapsed().as_secs_f64();
    match &record.status {
        RunStatus::Success => {
            status_success(&format!("typeset: {} ({:.1}s)", doc.file_name(), secs));
        }
        RunStatus::Cancelled => {
            status_success(&format!("cancelled: {}", doc.file_name()));
        }
        status => {
            let summary = if errors > 0 {
                format!("typeset failed: {} ({} errors)", doc.file_name(), errors)
            } else {
                format!("typeset failed: {} ({})", doc.file_name(), status)
            };
            status_error(&summary, first_error.as_deref().unwrap_or(""));
        }
    }
}
