//! `tools` command: list the configured tool definitions.

use owo_colors::OwoColorize;

use crate::config::ToolsConfig;

pub fn run(tools: &ToolsConfig) -> anyhow::Result<()> {
    for tool in tools.iter() {
        let chain = tool
            .steps
            .iter()
            .map(|step| {
                if step.required {
                    step.program.clone()
                } else {
                    format!("{}?", step.program)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let marker = if tool.preview_refresh {
            " (preview)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("{}  {}{}", tool.name.bold(), chain.dimmed(), marker);
    }
    println!();
    println!(
        "{}",
        "steps marked `?` tolerate failure; the chain continues past them".dimmed()
    );
    Ok(())
}
