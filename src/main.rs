//! Texflow - typesetting pipeline and source<->PDF synchronization core
//! for TeX editing environments.

#![allow(dead_code)]

mod cli;
mod config;
mod core;
mod diag;
mod engine;
mod logger;
mod sync;
mod utils;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::ToolsConfig;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any run can start)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    logger::set_verbose(cli.verbose);

    let tools = ToolsConfig::load(cli.tools_file.as_deref())?;

    match &cli.command {
        Commands::Typeset { file, tool } => cli::typeset::run(file, tool.as_deref(), &tools),
        Commands::Watch { file, tool } => cli::watch::run(file, tool.as_deref(), &tools),
        Commands::Sync { query } => cli::sync::run(query),
        Commands::Tools => cli::tools::run(&tools),
    }
}
