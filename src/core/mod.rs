//! Core domain types and process-wide state.

mod document;
mod state;

pub use document::DocumentSpec;
pub use state::{is_shutdown, register_registry, setup_shutdown_handler};
