mod tree;

use anyhow::{Context, Result};
use chorus_core::config::Config;
use chorus_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use chorus_core::{metrics, Meta};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults plus CHORUS_* variables when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the build version
    Version,
    /// Print the configured channel tree
    Tree,
    /// Validate the configuration and exit
    Check,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Config::from_env().context("loading configuration from environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut log_config = LogConfig::from_config(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>()?;
    }
    if args.json_logs {
        log_config.json_format = true;
    }
    init_logging_with_config(log_config)?;
    metrics::init_metrics();

    debug!(config = ?args.config, "Chorus CLI started");

    match args.command.unwrap_or(Command::Check) {
        Command::Version => {
            let v = chorus_core::version::version();
            println!("chorus {}", v);
        }
        Command::Tree => {
            let meta = Meta::new();
            let server = meta.start_server(&config.server).await?;

            let channels = server.channels().await;
            let mut links = BTreeMap::new();
            for c in &channels {
                links.insert(c.id, server.links(c.id).await?);
            }
            print!("{}", tree::render_tree(&channels, &links));

            meta.stop_all().await;
        }
        Command::Check => {
            info!(
                server = %config.server.id,
                channels = config.server.channels.len(),
                links = config.server.links.len(),
                "Configuration valid"
            );
            println!(
                "Configuration OK: server '{}', {} channels, {} links",
                config.server.name,
                config.server.channels.len() + 1,
                config.server.links.len()
            );
        }
    }

    Ok(())
}
