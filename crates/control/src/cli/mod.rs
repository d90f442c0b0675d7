pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// The task-automation control surface.
#[derive(Debug, Parser)]
#[command(name = "engine", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP control surface (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the configuration from the path named by `ENGINE_CONFIG` (or
/// `config.toml` by default). Returns the parsed config and the path
/// that was used. Shared by `serve`, `doctor`, and `config`.
pub fn load_config() -> anyhow::Result<(engine_domain::config::Config, String)> {
    let config_path = std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        engine_domain::config::Config::default()
    };

    Ok((config, config_path))
}
