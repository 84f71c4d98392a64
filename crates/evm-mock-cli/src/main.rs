mod cli;
mod commands;

use crate::cli::{
    Cli,
    Commands,
};
use clap::Parser;
use color_eyre::Result;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Slot(args) => commands::slot(args).map(|report| {
            if cli.json {
                report.to_json().to_string()
            } else {
                report.to_text()
            }
        }),
        Commands::Selectors(args) => commands::selectors(args).map(|entries| {
            if cli.json {
                commands::selectors_json(&entries).to_string()
            } else {
                entries
                    .iter()
                    .map(|entry| format!("{}  {}", entry.selector, entry.signature))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }),
    };

    match result {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) if cli.json => {
            eprintln!(
                "{}",
                json!({
                    "status": "error",
                    "error": {
                        "message": err.to_string(),
                    }
                })
            );
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}
