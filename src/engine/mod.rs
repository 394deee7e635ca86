//! Typesetting engine.
//!
//! Message-passing pipeline for one run:
//!
//! ```text
//! Engine --> ChainRun --> ProcessRunner
//!    |          |  \
//! Registry      |   LogScanner (per stream)
//!               v
//!           RunEvent channel --> renderer (CLI, editor, ...)
//! ```
//!
//! # Module Structure
//!
//! - `process` - async child-process supervision with cancellation
//! - `chain` - drives a tool's steps, parsing output into diagnostics
//! - `registry` - per-document run exclusivity and bounded history

pub mod chain;
pub mod process;
pub mod registry;

pub use process::{CancelHandle, SpawnError, StreamKind};
pub use registry::{DocumentRegistry, RunRecord};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ToolDefinition;
use crate::core::DocumentSpec;
use crate::diag::DiagnosticEntry;
use crate::sync::SyncStore;

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// A required step exited nonzero; later steps never started
    StepFailure { step: usize, code: i32 },
    /// A step's program could not be started mid-chain
    SpawnFailure { step: usize, message: String },
    /// Cancelled by user or shutdown; distinguishable from success but not
    /// an error for display purposes
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::StepFailure { step, code } => {
                write!(f, "step {} failed (exit {})", step + 1, code)
            }
            Self::SpawnFailure { step, message } => {
                write!(f, "step {} could not start: {}", step + 1, message)
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a single step, as reported on the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    /// Nonzero exit on a step whose failure the tool tolerates
    ToleratedFailure(i32),
    Failed(i32),
    Cancelled,
}

/// Events flowing from a run to its renderer, in emission order.
#[derive(Debug)]
pub enum RunEvent {
    StepStarted {
        index: usize,
        total: usize,
        program: String,
    },
    /// An uncategorized output line, tagged with its stream
    LogLine { stream: StreamKind, line: String },
    Diagnostic(DiagnosticEntry),
    StepFinished { index: usize, outcome: StepOutcome },
    Finished { status: RunStatus },
}

/// Errors starting a run; both are surfaced synchronously to the caller.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("a `{tool}` run is already active for {}", .doc.display())]
    ConcurrentRunRejected { doc: PathBuf, tool: String },

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Preview capability: the engine only asks for refreshes, it never renders.
pub trait PreviewRefresh: Send + Sync {
    /// Called after a successful run whose tool requests a preview refresh.
    fn refresh(&self, doc: &DocumentSpec);
}

/// The engine wires a registry, a sync store and a preview capability into
/// runnable chains. All three are injected; nothing here is ambient global
/// state.
pub struct Engine {
    registry: Arc<DocumentRegistry>,
    syncs: Arc<SyncStore>,
    preview: Arc<dyn PreviewRefresh>,
}

impl Engine {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        syncs: Arc<SyncStore>,
        preview: Arc<dyn PreviewRefresh>,
    ) -> Self {
        Self {
            registry,
            syncs,
            preview,
        }
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn syncs(&self) -> &Arc<SyncStore> {
        &self.syncs
    }

    /// Start a run for a document, or fail synchronously.
    ///
    /// Fails with [`RunError::ConcurrentRunRejected`] when the registry shows
    /// an active run for the document, and with [`RunError::Spawn`] when any
    /// step's program cannot be resolved - a chain that would die at step 3
    /// for a missing executable is refused before step 0 starts.
    pub fn try_typeset(
        &self,
        tool: Arc<ToolDefinition>,
        doc: DocumentSpec,
        events: mpsc::Sender<RunEvent>,
    ) -> Result<RunTask, RunError> {
        for step in &tool.steps {
            let program = shellexpand::tilde(&step.program);
            which::which(program.as_ref())
                .map_err(|_| SpawnError::NotFound(step.program.clone()))?;
        }

        let cancel = CancelHandle::new();
        self.registry.try_begin(doc.path(), &tool.name, cancel.clone())?;

        let run = chain::ChainRun::new(
            tool,
            doc,
            cancel,
            Arc::clone(&self.registry),
            Arc::clone(&self.syncs),
            Arc::clone(&self.preview),
            events,
        );
        Ok(RunTask {
            task: tokio::spawn(run.run()),
        })
    }

    /// Request cancellation of the active run for a document, if any.
    pub fn cancel(&self, doc: &DocumentSpec) -> bool {
        self.registry.cancel(doc.path())
    }
}

/// Handle to an in-flight run.
pub struct RunTask {
    task: JoinHandle<RunRecord>,
}

impl RunTask {
    /// Wait for the run's terminal record.
    pub async fn wait(self) -> anyhow::Result<RunRecord> {
        self.task
            .await
            .map_err(|e| anyhow::anyhow!("run task failed: {e}"))
    }
}
