//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Texflow typesetting pipeline CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Tools config file (default: texflow-tools.toml when present,
    /// built-in tool set otherwise)
    #[arg(short = 'T', long, value_hint = clap::ValueHint::FilePath)]
    pub tools_file: Option<PathBuf>,

    /// Enable verbose output (raw toolchain log lines, debug traces)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Typeset a document once
    #[command(visible_alias = "t")]
    Typeset {
        /// Root document to typeset
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Tool to run (default: the first configured tool)
        #[arg(short, long)]
        tool: Option<String>,
    },

    /// Re-typeset on every source change
    #[command(visible_alias = "w")]
    Watch {
        /// Root document to typeset
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Tool to run (default: the first configured tool)
        #[arg(short, long)]
        tool: Option<String>,
    },

    /// Query source<->output synchronization data
    #[command(visible_alias = "s")]
    Sync {
        #[command(subcommand)]
        query: SyncQuery,
    },

    /// List configured tools
    Tools,
}

/// Sync query directions.
#[derive(Subcommand, Debug, Clone)]
pub enum SyncQuery {
    /// Source -> output: page regions for a source line
    Forward {
        /// Root document (owner of the synchronization artifact)
        #[arg(value_hint = clap::ValueHint::FilePath)]
        doc: PathBuf,

        /// 1-based source line
        line: u32,

        /// Source file to look up when it differs from the root document
        /// (multi-file documents)
        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        file: Option<PathBuf>,

        /// Output JSON
        #[arg(short, long)]
        json: bool,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Output -> source: source location under a page point
    Inverse {
        /// Root document (owner of the synchronization artifact)
        #[arg(value_hint = clap::ValueHint::FilePath)]
        doc: PathBuf,

        /// 1-based page number
        page: u32,

        /// Point in page space
        x: f64,
        y: f64,

        /// Output JSON
        #[arg(short, long)]
        json: bool,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_typeset() {
        let cli = Cli::try_parse_from(["texflow", "typeset", "main.tex", "--tool", "pdfLaTeX"])
            .unwrap();
        match cli.command {
            Commands::Typeset { file, tool } => {
                assert_eq!(file, PathBuf::from("main.tex"));
                assert_eq!(tool.as_deref(), Some("pdfLaTeX"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_sync_forward() {
        let cli =
            Cli::try_parse_from(["texflow", "sync", "forward", "main.tex", "42", "--json"])
                .unwrap();
        match cli.command {
            Commands::Sync {
                query: SyncQuery::Forward { doc, line, json, .. },
            } => {
                assert_eq!(doc, PathBuf::from("main.tex"));
                assert_eq!(line, 42);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_sync_inverse() {
        let cli = Cli::try_parse_from(["texflow", "sync", "inverse", "main.tex", "2", "100.5", "200"])
            .unwrap();
        match cli.command {
            Commands::Sync {
                query: SyncQuery::Inverse { page, x, y, .. },
            } => {
                assert_eq!(page, 2);
                assert_eq!(x, 100.5);
                assert_eq!(y, 200.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
