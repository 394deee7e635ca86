//! Tool configuration loading.
//!
//! Tools live in a `texflow-tools.toml` file next to the project (or an
//! explicit `--tools` path). When no file exists, the built-in default tool
//! set is used - the standard TeX engines plus bibliography/index processors
//! and a combined four-step chain.
//!
//! ```toml
//! [[tool]]
//! name = "pdfLaTeX"
//! preview_refresh = true
//!
//! [[tool.steps]]
//! program = "pdflatex"
//! args = ["$synctexoption", "-interaction=nonstopmode", "$fullname"]
//! ```

mod tool;

pub use tool::{ToolDefinition, ToolStep, expand_template, SYNCTEX_OPTION};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::diag::PatternFamily;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "texflow-tools.toml";

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("config file parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("no tool named `{0}` is configured (see `texflow tools`)")]
    UnknownTool(String),
}

/// On-disk shape: a list of `[[tool]]` tables.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default, rename = "tool")]
    tools: Vec<ToolDefinition>,
}

/// The loaded, validated tool set.
pub struct ToolsConfig {
    tools: Vec<Arc<ToolDefinition>>,
}

impl ToolsConfig {
    /// Load from an explicit path, the default file, or built-in defaults.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(explicit) => Self::from_path(explicit),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_path(default)
                } else {
                    Ok(Self::defaults())
                }
            }
        }
    }

    /// Load and validate a config file, warning about unknown fields.
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (raw, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            crate::log!("warning"; "unknown fields in {}, ignoring:", path.display());
            for field in &ignored {
                eprintln!("- {field}");
            }
        }

        Self::validate(raw.tools)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(RawConfig, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let raw = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((raw, ignored))
    }

    fn validate(tools: Vec<ToolDefinition>) -> Result<Self, ConfigError> {
        if tools.is_empty() {
            return Err(ConfigError::Validation(
                "config defines no tools".to_string(),
            ));
        }
        let mut seen: Vec<&str> = Vec::new();
        for tool in &tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::Validation("tool with empty name".to_string()));
            }
            if seen
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&tool.name))
            {
                return Err(ConfigError::Validation(format!(
                    "duplicate tool name `{}`",
                    tool.name
                )));
            }
            seen.push(&tool.name);

            if tool.steps.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tool `{}` has no steps",
                    tool.name
                )));
            }
            for step in &tool.steps {
                if step.program.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "tool `{}` has a step with no program",
                        tool.name
                    )));
                }
            }
        }
        Ok(Self {
            tools: tools.into_iter().map(Arc::new).collect(),
        })
    }

    /// Built-in tool set, used when no config file exists.
    pub fn defaults() -> Self {
        let engine = |name: &str, program: &str| ToolDefinition {
            name: name.to_string(),
            preview_refresh: true,
            steps: vec![tex_step(program)],
        };

        let tools = vec![
            engine("pdfLaTeX", "pdflatex"),
            engine("XeLaTeX", "xelatex"),
            engine("LuaLaTeX", "lualatex"),
            engine("pdfTeX", "pdftex"),
            ToolDefinition {
                name: "BibTeX".to_string(),
                preview_refresh: false,
                steps: vec![aux_step("bibtex", PatternFamily::Bibtex, true)],
            },
            ToolDefinition {
                name: "MakeIndex".to_string(),
                preview_refresh: false,
                steps: vec![aux_step("makeindex", PatternFamily::Makeindex, true)],
            },
            // Full chain: bibliography pass is tolerated so documents
            // without a bibliography still typeset end to end
            ToolDefinition {
                name: "pdfLaTeX+BibTeX".to_string(),
                preview_refresh: true,
                steps: vec![
                    tex_step("pdflatex"),
                    aux_step("bibtex", PatternFamily::Bibtex, false),
                    tex_step("pdflatex"),
                    tex_step("pdflatex"),
                ],
            },
        ];

        Self {
            tools: tools.into_iter().map(Arc::new).collect(),
        }
    }

    /// Look up a tool by name (case-insensitive); `None` selects the first.
    pub fn find(&self, name: Option<&str>) -> Result<&Arc<ToolDefinition>, ConfigError> {
        match name {
            None => Ok(&self.tools[0]),
            Some(wanted) => self
                .tools
                .iter()
                .find(|tool| tool.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| ConfigError::UnknownTool(wanted.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDefinition>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn tex_step(program: &str) -> ToolStep {
    ToolStep {
        program: program.to_string(),
        args: vec![
            "$synctexoption".to_string(),
            "-interaction=nonstopmode".to_string(),
            "-file-line-error".to_string(),
            "$fullname".to_string(),
        ],
        workdir: None,
        required: true,
        patterns: PatternFamily::Tex,
        env: Default::default(),
    }
}

fn aux_step(program: &str, patterns: PatternFamily, required: bool) -> ToolStep {
    ToolStep {
        program: program.to_string(),
        args: vec!["$basename".to_string()],
        workdir: None,
        required,
        patterns,
        env: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_include_standard_engines() {
        let config = ToolsConfig::defaults();
        assert!(config.find(Some("pdflatex")).is_ok());
        assert!(config.find(Some("XeLaTeX")).is_ok());
        assert!(config.find(Some("nope")).is_err());
        // default selection is the first tool
        assert_eq!(config.find(None).unwrap().name, "pdfLaTeX");
    }

    #[test]
    fn test_default_chain_has_tolerated_bibliography_step() {
        let config = ToolsConfig::defaults();
        let chain = config.find(Some("pdfLaTeX+BibTeX")).unwrap();
        assert_eq!(chain.steps.len(), 4);
        assert!(chain.steps[0].required);
        assert!(!chain.steps[1].required);
        assert_eq!(chain.steps[1].patterns, PatternFamily::Bibtex);
    }

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
[[tool]]
name = "Tectonic"
preview_refresh = true

[[tool.steps]]
program = "tectonic"
args = ["--synctex", "$fullname"]
"#
        )
        .unwrap();

        let config = ToolsConfig::load(Some(&path)).unwrap();
        assert_eq!(config.len(), 1);
        let tool = config.find(Some("tectonic")).unwrap();
        assert_eq!(tool.steps[0].program, "tectonic");
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        assert!(matches!(
            ToolsConfig::load(Some(Path::new("/nonexistent/tools.toml"))),
            Err(ConfigError::Io(..))
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_names() {
        let (raw, _) = ToolsConfig::parse_with_ignored(
            r#"
[[tool]]
name = "A"
[[tool.steps]]
program = "a"

[[tool]]
name = "a"
[[tool.steps]]
program = "b"
"#,
        )
        .unwrap();
        assert!(matches!(
            ToolsConfig::validate(raw.tools),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_stepless_tool() {
        let (raw, _) = ToolsConfig::parse_with_ignored(
            r#"
[[tool]]
name = "Empty"
steps = []
"#,
        )
        .unwrap();
        assert!(matches!(
            ToolsConfig::validate(raw.tools),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_fields_are_collected() {
        let (_, ignored) = ToolsConfig::parse_with_ignored(
            r#"
[[tool]]
name = "A"
mystery = 1
[[tool.steps]]
program = "a"
"#,
        )
        .unwrap();
        assert_eq!(ignored, vec!["tool.0.mystery".to_string()]);
    }
}
