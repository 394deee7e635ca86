//! `typeset` command: one run, diagnostics streamed to the terminal.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use crate::config::ToolsConfig;
use crate::core::{self, DocumentSpec};
use crate::diag::Severity;
use crate::engine::{
    DocumentRegistry, Engine, PreviewRefresh, RunEvent, RunRecord, RunStatus, StepOutcome,
    StreamKind,
};
use crate::sync::SyncStore;

/// Event channel depth between the run and the renderer.
pub(crate) const EVENT_BUFFER: usize = 256;

/// Preview capability for the CLI: announce the refresh, render nothing.
pub struct LogPreview;

impl PreviewRefresh for LogPreview {
    fn refresh(&self, doc: &DocumentSpec) {
        crate::log!("preview"; "refresh {}", doc.output_path().display());
    }
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

        crate::log!("typeset"; "{} with {}", doc.file_name(), tool.name);

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let task = engine.try_typeset(tool, doc, tx)?;

        let renderer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                render_event(&event);
            }
        });

        let record = task.wait().await?;
        renderer
            .await
            .map_err(|e| anyhow::anyhow!("renderer failed: {e}"))?;

        summarize(&record)
    })
}

/// Render one run event to the terminal.
pub(crate) fn render_event(event: &RunEvent) {
    match event {
        RunEvent::StepStarted {
            index,
            total,
            program,
        } => {
            crate::log!("typeset"; "step {}/{}: {}", index + 1, total, program);
        }
        RunEvent::LogLine { stream, line } => {
            // Raw toolchain output is noise unless asked for
            if crate::logger::is_verbose() {
                match stream {
                    StreamKind::Stdout => println!("{}", line.dimmed()),
                    StreamKind::Stderr => eprintln!("{}", line.dimmed()),
                }
            }
        }
        RunEvent::Diagnostic(entry) => {
            let label = match entry.severity {
                Severity::Error => "error".bright_red().bold().to_string(),
                Severity::Warning => "warning".bright_yellow().bold().to_string(),
                Severity::Info => "info".bright_blue().bold().to_string(),
            };
            eprintln!("{label}: {entry}");
        }
        RunEvent::StepFinished { index, outcome } => {
            if let StepOutcome::ToleratedFailure(code) = outcome {
                crate::log!(
                    "typeset";
                    "step {} exited {} (tolerated), continuing",
                    index + 1,
                    code
                );
            }
        }
        RunEvent::Finished { .. } => {}
    }
}

/// Count diagnostics at a given severity.
fn count(record: &RunRecord, severity: Severity) -> usize {
    record
        .diagnostics
        .iter()
        .filter(|d| d.severity == severity)
        .count()
}

fn summarize(record: &RunRecord) -> Result<()> {
    let errors = count(record, Severity::Error);
    let warnings = count(record, Severity::Warning);
    let secs = record.duration.as_secs_f64();

    match &record.status {
        RunStatus::Success => {
            if warnings > 0 {
                crate::log!("typeset"; "done in {:.1}s ({} warnings)", secs, warnings);
            } else {
                crate::log!("typeset"; "done in {:.1}s", secs);
            }
            Ok(())
        }
        RunStatus::Cancelled => {
            // Terminal but not an error for display purposes
            crate::log!("typeset"; "cancelled after {:.1}s", secs);
            Ok(())
        }
        status => {
            if errors > 0 {
                bail!("typeset failed: {status} ({errors} errors)");
            }
            bail!("typeset failed: {status}");
        }
    }
}
