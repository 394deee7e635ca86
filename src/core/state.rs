//! Process-wide shutdown state.
//!
//! Two pieces of plumbing:
//! - `SHUTDOWN`: has Ctrl+C been received?
//! - a registered registry reference so the handler can cancel active runs
//!   instead of killing the process under a half-finished toolchain step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::engine::DocumentRegistry;

/// Shutdown has been requested (Ctrl+C received)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Registry reference for cancel-on-shutdown
static REGISTRY: OnceLock<Arc<DocumentRegistry>> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start
///
/// The handler behavior depends on whether a registry has been registered:
/// - Before `register_registry()`: sets SHUTDOWN, process exits naturally
/// - After `register_registry()`: cancels all active runs, then the main
///   loop observes SHUTDOWN and finishes cleanly
pub fn setup_shutdown_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        let first = !SHUTDOWN.swap(true, Ordering::SeqCst);

        if let Some(registry) = REGISTRY.get() {
            if first {
                crate::log!("typeset"; "interrupt received, cancelling active runs...");
            }
            registry.cancel_all();
        } else {
            // Nothing in flight yet, nothing to wind down
            std::process::exit(130);
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the document registry for cancel-on-shutdown
///
/// Call after constructing the registry, before starting any run.
pub fn register_registry(registry: Arc<DocumentRegistry>) {
    let _ = REGISTRY.set(registry);
}

/// Check if shutdown has been requested
///
/// Relaxed ordering is fine here: worst case is one extra run starting
/// before the loop stops, and that run is immediately cancelled.
pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}
