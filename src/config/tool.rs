//! Tool definitions and argument templates.
//!
//! A tool is an ordered chain of steps, each invoking one external program.
//! Argument templates are expanded per run against the resolved document:
//!
//! | placeholder      | expands to                          |
//! |------------------|-------------------------------------|
//! | `$synctexoption` | the engine flag enabling sync data  |
//! | `$fullname`      | `main.tex`                          |
//! | `$basename`      | `main`                              |
//! | `$suffix`        | `tex`                               |
//! | `$directory`     | the document's directory            |

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::DocumentSpec;
use crate::diag::PatternFamily;
use crate::engine::process::StepCommand;

/// Engine flag that makes TeX engines emit the synchronization artifact.
pub const SYNCTEX_OPTION: &str = "-synctex=1";

/// One configured tool chain.
///
/// Immutable once loaded; the orchestrator holds an `Arc` reference per run,
/// never a copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    /// Refresh the preview from the final step's output on success
    #[serde(default = "default_true")]
    pub preview_refresh: bool,
    pub steps: Vec<ToolStep>,
}

/// One step of a tool chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Fixed working directory; absent means the document's directory
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// A nonzero exit from a required step aborts the chain; a tolerated
    /// step (e.g. BibTeX with no bibliography) lets it continue
    #[serde(default = "default_true")]
    pub required: bool,
    /// Diagnostic pattern family for this step's output
    #[serde(default)]
    pub patterns: PatternFamily,
    /// Environment overlay for the child process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl ToolStep {
    /// Working directory for this step under the given document.
    pub fn working_dir(&self, doc: &DocumentSpec) -> PathBuf {
        match &self.workdir {
            Some(dir) => PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned()),
            None => doc.directory().to_path_buf(),
        }
    }

    /// Build the concrete command for this step and document.
    ///
    /// Arguments that expand to nothing are dropped, so a template like
    /// `["$synctexoption", "$fullname"]` degrades cleanly when a placeholder
    /// is emptied by configuration.
    pub fn command(&self, doc: &DocumentSpec) -> StepCommand {
        StepCommand {
            program: shellexpand::tilde(&self.program).into_owned(),
            args: self
                .args
                .iter()
                .map(|arg| expand_template(arg, doc))
                .filter(|arg| !arg.is_empty())
                .collect(),
            cwd: self.working_dir(doc),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Expand the placeholder vocabulary against a resolved document.
pub fn expand_template(arg: &str, doc: &DocumentSpec) -> String {
    arg.replace("$synctexoption", SYNCTEX_OPTION)
        .replace("$fullname", &doc.file_name())
        .replace("$basename", doc.base_name())
        .replace("$suffix", doc.suffix())
        .replace("$directory", &doc.directory().to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn doc() -> DocumentSpec {
        DocumentSpec::resolve(Path::new("/project/thesis/main.tex")).unwrap()
    }

    #[test]
    fn test_expand_template_placeholders() {
        let doc = doc();
        assert_eq!(expand_template("$fullname", &doc), "main.tex");
        assert_eq!(expand_template("$basename", &doc), "main");
        assert_eq!(expand_template("$suffix", &doc), "tex");
        assert_eq!(expand_template("$synctexoption", &doc), "-synctex=1");
        assert_eq!(
            expand_template("$directory/$basename.aux", &doc),
            "/project/thesis/main.aux"
        );
    }

    #[test]
    fn test_command_drops_empty_args() {
        let step = ToolStep {
            program: "pdflatex".into(),
            args: vec!["".into(), "$fullname".into()],
            workdir: None,
            required: true,
            patterns: PatternFamily::Tex,
            env: BTreeMap::new(),
        };
        let cmd = step.command(&doc());
        assert_eq!(cmd.args, vec!["main.tex"]);
        assert_eq!(cmd.cwd, PathBuf::from("/project/thesis"));
    }

    #[test]
    fn test_fixed_workdir_overrides_document_dir() {
        let step = ToolStep {
            program: "makeindex".into(),
            args: vec!["$basename".into()],
            workdir: Some(PathBuf::from("/build")),
            required: false,
            patterns: PatternFamily::Makeindex,
            env: BTreeMap::new(),
        };
        assert_eq!(step.working_dir(&doc()), PathBuf::from("/build"));
    }

    #[test]
    fn test_step_defaults_from_toml() {
        let step: ToolStep = toml::from_str(
            r#"
            program = "pdflatex"
            args = ["$synctexoption", "$fullname"]
            "#,
        )
        .unwrap();
        assert!(step.required);
        assert_eq!(step.patterns, PatternFamily::Tex);
        assert!(step.workdir.is_none());
        assert!(step.env.is_empty());
    }
}
