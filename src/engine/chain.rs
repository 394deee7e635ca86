//! Tool chain orchestration.
//!
//! One `ChainRun` drives one document through one tool's steps: spawn the
//! step, feed its output chunks through per-stream scanners, decide
//! continue/abort on completion, and finalize the registry entry with the
//! terminal record. Everything is continuation-driven - no thread is parked
//! per run.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::process::{self, CancelHandle, ExitOutcome, ProcessEvent, StreamKind};
use super::registry::{DocumentRegistry, RunRecord};
use super::{PreviewRefresh, RunEvent, RunStatus, StepOutcome};
use crate::config::{ToolDefinition, ToolStep};
use crate::core::DocumentSpec;
use crate::diag::{DiagnosticEntry, LogScanner, ScanItem};
use crate::sync::SyncStore;
use crate::utils::path::resolve_path;

/// How one step ended, from the chain's point of view.
enum StepResult {
    Success,
    Failed(i32),
    Cancelled,
    SpawnFailed(process::SpawnError),
}

/// One in-flight run. Owns the RunHandle state exclusively until terminal,
/// then hands the record to the registry.
pub(crate) struct ChainRun {
    tool: Arc<ToolDefinition>,
    doc: DocumentSpec,
    cancel: CancelHandle,
    registry: Arc<DocumentRegistry>,
    syncs: Arc<SyncStore>,
    preview: Arc<dyn PreviewRefresh>,
    events: mpsc::Sender<RunEvent>,
    diagnostics: Vec<DiagnosticEntry>,
}

impl ChainRun {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tool: Arc<ToolDefinition>,
        doc: DocumentSpec,
        cancel: CancelHandle,
        registry: Arc<DocumentRegistry>,
        syncs: Arc<SyncStore>,
        preview: Arc<dyn PreviewRefresh>,
        events: mpsc::Sender<RunEvent>,
    ) -> Self {
        Self {
            tool,
            doc,
            cancel,
            registry,
            syncs,
            preview,
            events,
            diagnostics: Vec::new(),
        }
    }

    /// Drive the chain to its terminal state.
    pub(crate) async fn run(mut self) -> RunRecord {
        let started = Instant::now();
        let tool = Arc::clone(&self.tool);
        let total = tool.steps.len();

        let mut steps_run = 0usize;
        let mut status = RunStatus::Success;

        for (index, step) in tool.steps.iter().enumerate() {
            // A cancellation observed between steps wins, even if the
            // previous step happened to complete successfully
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }

            self.emit(RunEvent::StepStarted {
                index,
                total,
                program: step.program.clone(),
            })
            .await;

            match self.run_step(step).await {
                StepResult::Success => {
                    steps_run += 1;
                    self.emit(RunEvent::StepFinished {
                        index,
                        outcome: StepOutcome::Success,
                    })
                    .await;
                }
                StepResult::Failed(code) if step.required => {
                    steps_run += 1;
                    self.emit(RunEvent::StepFinished {
                        index,
                        outcome: StepOutcome::Failed(code),
                    })
                    .await;
                    status = RunStatus::StepFailure { step: index, code };
                    break;
                }
                StepResult::Failed(code) => {
                    // Tolerated failure: e.g. BibTeX with no bibliography
                    steps_run += 1;
                    self.emit(RunEvent::StepFinished {
                        index,
                        outcome: StepOutcome::ToleratedFailure(code),
                    })
                    .await;
                }
                StepResult::Cancelled => {
                    steps_run += 1;
                    self.emit(RunEvent::StepFinished {
                        index,
                        outcome: StepOutcome::Cancelled,
                    })
                    .await;
                    status = RunStatus::Cancelled;
                    break;
                }
                StepResult::SpawnFailed(err) => {
                    status = RunStatus::SpawnFailure {
                        step: index,
                        message: err.to_string(),
                    };
                    break;
                }
            }
        }

        // The race between the last step's natural completion and a late
        // cancellation request resolves in favor of cancellation
        if status.is_success() && self.cancel.is_cancelled() {
            status = RunStatus::Cancelled;
        }

        if status.is_success() {
            let record = self.syncs.reload(&self.doc);
            crate::debug!(
                "sync";
                "reloaded {} regions over {} pages",
                record.region_count(),
                record.page_count()
            );
            if self.tool.preview_refresh {
                self.preview.refresh(&self.doc);
            }
        }

        self.emit(RunEvent::Finished {
            status: status.clone(),
        })
        .await;

        let record = RunRecord {
            doc: self.doc.path().to_path_buf(),
            tool: self.tool.name.clone(),
            status,
            steps_run,
            diagnostics: std::mem::take(&mut self.diagnostics),
            duration: started.elapsed(),
        };
        self.registry.finish(record.clone());
        record
    }

    /// Run one step to completion, scanning both output streams.
    async fn run_step(&mut self, step: &ToolStep) -> StepResult {
        let cmd = step.command(&self.doc);
        crate::debug!("typeset"; "{} {:?} (in {})", cmd.program, cmd.args, cmd.cwd.display());

        let mut running = match process::spawn(&cmd, self.cancel.clone()) {
            Ok(running) => running,
            Err(err) => return StepResult::SpawnFailed(err),
        };

        let mut stdout_scan = LogScanner::new(step.patterns);
        let mut stderr_scan = LogScanner::new(step.patterns);
        let workdir = cmd.cwd;

        loop {
            let Some(event) = running.next_event().await else {
                // Supervisor vanished without a completion signal; treat as
                // a signal death so the chain still reaches a terminal state
                return StepResult::Failed(-1);
            };
            match event {
                ProcessEvent::Chunk { stream, data } => {
                    let items = match stream {
                        StreamKind::Stdout => stdout_scan.push(&data),
                        StreamKind::Stderr => stderr_scan.push(&data),
                    };
                    self.emit_items(stream, items, &workdir).await;
                }
                ProcessEvent::Exited(outcome) => {
                    let tail_out = stdout_scan.finish();
                    self.emit_items(StreamKind::Stdout, tail_out, &workdir).await;
                    let tail_err = stderr_scan.finish();
                    self.emit_items(StreamKind::Stderr, tail_err, &workdir).await;

                    return match outcome {
                        ExitOutcome::Exited(0) => StepResult::Success,
                        ExitOutcome::Exited(code) => StepResult::Failed(code),
                        ExitOutcome::Signaled => StepResult::Failed(-1),
                        ExitOutcome::Cancelled => StepResult::Cancelled,
                    };
                }
            }
        }
    }

    /// Forward scanned items, accumulating diagnostics on the run.
    ///
    /// Relative diagnostic paths are resolved against the step's working
    /// directory before leaving the run.
    async fn emit_items(&mut self, stream: StreamKind, items: Vec<ScanItem>, workdir: &Path) {
        for item in items {
            match item {
                ScanItem::Diagnostic(mut entry) => {
                    if let Some(file) = &entry.file
                        && file.is_relative()
                    {
                        entry.file = Some(resolve_path(file, workdir));
                    }
                    self.diagnostics.push(entry.clone());
                    self.emit(RunEvent::Diagnostic(entry)).await;
                }
                ScanItem::Line(line) => {
                    self.emit(RunEvent::LogLine { stream, line }).await;
                }
            }
        }
    }

    async fn emit(&self, event: RunEvent) {
        // A renderer that hung up is not a run failure
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolStep;
    use crate::diag::PatternFamily;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPreview(AtomicUsize);
    impl PreviewRefresh for CountingPreview {
        fn refresh(&self, _doc: &DocumentSpec) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn shell_step(script: &str, required: bool) -> ToolStep {
        ToolStep {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            workdir: None,
            required,
            patterns: PatternFamily::Tex,
            env: Default::default(),
        }
    }

    struct Harness {
        registry: Arc<DocumentRegistry>,
        syncs: Arc<SyncStore>,
        preview: Arc<CountingPreview>,
        doc: DocumentSpec,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let doc = DocumentSpec::resolve(&dir.path().join("main.tex")).unwrap();
            Self {
                registry: Arc::new(DocumentRegistry::new()),
                syncs: Arc::new(SyncStore::new()),
                preview: Arc::new(CountingPreview(AtomicUsize::new(0))),
                doc,
                _dir: dir,
            }
        }

        async fn run(
            &self,
            steps: Vec<ToolStep>,
            cancel: CancelHandle,
        ) -> (RunRecord, Vec<RunEvent>) {
            let tool = Arc::new(ToolDefinition {
                name: "Test".into(),
                preview_refresh: true,
                steps,
            });
            self.registry
                .try_begin(self.doc.path(), &tool.name, cancel.clone())
                .unwrap();

            let (tx, mut rx) = mpsc::channel(64);
            let run = ChainRun::new(
                tool,
                self.doc.clone(),
                cancel,
                Arc::clone(&self.registry),
                Arc::clone(&self.syncs),
                Arc::clone(&self.preview) as Arc<dyn PreviewRefresh>,
                tx,
            );
            let task = tokio::spawn(run.run());

            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            (task.await.unwrap(), events)
        }
    }

    fn marker(harness: &Harness, name: &str) -> PathBuf {
        harness.doc.directory().join(name)
    }

    #[tokio::test]
    async fn test_required_failure_skips_remaining_steps() {
        let harness = Harness::new();
        let never = marker(&harness, "never");
        let steps = vec![
            shell_step("exit 1", true),
            shell_step(&format!("touch {}", never.display()), true),
        ];
        let (record, _) = harness.run(steps, CancelHandle::new()).await;

        assert_eq!(record.status, RunStatus::StepFailure { step: 0, code: 1 });
        assert_eq!(record.steps_run, 1);
        assert!(!never.exists());
        assert!(!harness.registry.is_active(harness.doc.path()));
    }

    #[tokio::test]
    async fn test_tolerated_failure_continues_to_success() {
        let harness = Harness::new();
        let done = marker(&harness, "done");
        // compile(required), bib(tolerated, fails), compile, compile
        let steps = vec![
            shell_step("true", true),
            shell_step("exit 2", false),
            shell_step("true", true),
            shell_step(&format!("touch {}", done.display()), true),
        ];
        let (record, events) = harness.run(steps, CancelHandle::new()).await;

        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.steps_run, 4);
        assert!(done.exists());
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::StepFinished {
                index: 1,
                outcome: StepOutcome::ToleratedFailure(2)
            }
        )));
    }

    #[tokio::test]
    async fn test_cancellation_mid_chain_skips_rest() {
        let harness = Harness::new();
        let never = marker(&harness, "never");
        let cancel = CancelHandle::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                cancel.request();
            })
        };

        let steps = vec![
            shell_step("sleep 30", true),
            shell_step(&format!("touch {}", never.display()), true),
        ];
        let (record, _) = harness.run(steps, cancel).await;
        canceller.await.unwrap();

        assert_eq!(record.status, RunStatus::Cancelled);
        assert!(!never.exists());
        assert!(!harness.registry.is_active(harness.doc.path()));
    }

    #[tokio::test]
    async fn test_late_cancellation_beats_natural_success() {
        let harness = Harness::new();
        let cancel = CancelHandle::new();
        // The request lands before the chain observes it; even though the
        // step would succeed, the single terminal state is Cancelled.
        cancel.request();
        let (record, _) = harness.run(vec![shell_step("true", true)], cancel).await;
        assert_eq!(record.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_spawn_failure_mid_chain_is_terminal() {
        let harness = Harness::new();
        let steps = vec![
            shell_step("true", true),
            ToolStep {
                program: "texflow-test-no-such-program".into(),
                args: vec![],
                workdir: None,
                required: true,
                patterns: PatternFamily::Tex,
                env: Default::default(),
            },
        ];
        let (record, _) = harness.run(steps, CancelHandle::new()).await;
        match record.status {
            RunStatus::SpawnFailure { step: 1, .. } => {}
            other => panic!("expected spawn failure at step 1, got {other:?}"),
        }
        assert!(!harness.registry.is_active(harness.doc.path()));
    }

    #[tokio::test]
    async fn test_diagnostics_collected_and_resolved() {
        let harness = Harness::new();
        let steps = vec![shell_step(
            "echo './main.tex:12: Undefined control sequence.'; exit 1",
            true,
        )];
        let (record, events) = harness.run(steps, CancelHandle::new()).await;

        // Failed run still reports everything collected before the failure
        assert_eq!(record.diagnostics.len(), 1);
        let entry = &record.diagnostics[0];
        assert_eq!(entry.line, Some(12));
        // Relative path resolved against the step's working directory
        assert_eq!(
            entry.file.as_deref(),
            Some(harness.doc.path())
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Diagnostic(_))));
    }

    #[tokio::test]
    async fn test_success_reloads_sync_and_refreshes_preview() {
        let harness = Harness::new();
        let artifact = harness.doc.sync_artifact_path();
        let script = format!(
            "printf 'SyncTeX\\nversion:1\\ni:1:./main.tex\\ns:1\\nh:1:3(100,500,200,50)0\\ne\\n' > {}",
            artifact.display()
        );
        let (record, _) = harness
            .run(vec![shell_step(&script, true)], CancelHandle::new())
            .await;

        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(harness.syncs.record(&harness.doc).region_count(), 1);
        assert_eq!(harness.preview.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_sync_record() {
        let harness = Harness::new();
        std::fs::write(
            harness.doc.sync_artifact_path(),
            "SyncTeX\nversion:1\ni:1:./main.tex\ns:1\nh:1:3(100,500,200,50)0\ne\n",
        )
        .unwrap();

        let (record, _) = harness
            .run(vec![shell_step("true", true)], CancelHandle::new())
            .await;
        assert!(record.status.is_success());
        assert_eq!(harness.syncs.record(&harness.doc).region_count(), 1);

        // A failed run must not invalidate the loaded record
        let (record, _) = harness
            .run(vec![shell_step("exit 1", true)], CancelHandle::new())
            .await;
        assert!(!record.status.is_success());
        assert_eq!(harness.syncs.record(&harness.doc).region_count(), 1);
        // And no second preview refresh happened
        assert_eq!(harness.preview.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_records_run() {
        let harness = Harness::new();
        let (_, _) = harness
            .run(vec![shell_step("true", true)], CancelHandle::new())
            .await;
        let history = harness.registry.history(harness.doc.path());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tool, "Test");
        assert!(history[0].status.is_success());
    }
}
