//! Resolved document identity.
//!
//! A `DocumentSpec` is the editor-side answer to "which document is being
//! typeset": the canonical source path plus the derived names the toolchain
//! and the synchronization artifact are addressed by.

use std::path::{Path, PathBuf};

use crate::utils::path::normalize_path;

/// Extension of the synchronization side-file, next to the document.
const SYNC_ARTIFACT_EXT: &str = "synctex";

/// Resolved identity of one document.
///
/// Immutable once resolved; cloned freely (runs, registry keys and sync-store
/// slots all key off `path()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSpec {
    /// Absolute source path (registry key)
    path: PathBuf,
    /// Directory containing the source
    directory: PathBuf,
    /// File stem, e.g. `main` for `main.tex`
    base_name: String,
    /// Extension without the dot, e.g. `tex`
    suffix: String,
}

impl DocumentSpec {
    /// Resolve a user-supplied path into a document identity.
    ///
    /// The path is made absolute against the current directory; existence is
    /// the caller's concern (sync queries may outlive the source file).
    pub fn resolve(path: &Path) -> Result<Self, ResolveError> {
        let path = normalize_path(path);
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ResolveError::NoParent(path.clone()))?;
        let base_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ResolveError::NoBaseName(path.clone()))?
            .to_string();
        let suffix = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            path,
            directory,
            base_name,
            suffix,
        })
    }

    /// Absolute source path (document identity).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the source file.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File stem without extension.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Extension without the leading dot (may be empty).
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// File name with extension, as passed to toolchain argument templates.
    pub fn file_name(&self) -> String {
        if self.suffix.is_empty() {
            self.base_name.clone()
        } else {
            format!("{}.{}", self.base_name, self.suffix)
        }
    }

    /// Path of the synchronization side-file the toolchain emits.
    pub fn sync_artifact_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.base_name, SYNC_ARTIFACT_EXT))
    }

    /// Path of the rendered output the preview displays.
    pub fn output_path(&self) -> PathBuf {
        self.directory.join(format!("{}.pdf", self.base_name))
    }
}

/// Errors resolving a document path.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("`{0}` has no parent directory")]
    NoParent(PathBuf),

    #[error("`{0}` has no usable file name")]
    NoBaseName(PathBuf),
}
