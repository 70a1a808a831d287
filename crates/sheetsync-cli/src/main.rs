//! Sheetsync CLI - coordinated access to a shared remote table.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheetsync_core::config::LogFormat;
use sheetsync_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// 0 is success, 1-127 are application errors. Shutdown by signal is a
/// normal exit and reports success once the queue has drained.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// The remote table could not be located or read
    StoreError = 2,
    /// Writes could not be delivered before exit
    UndeliveredWrites = 3,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        use sheetsync_core::Error as CoreError;

        if let Some(core) = error.downcast_ref::<CoreError>() {
            return match core {
                CoreError::InvalidConfig(_) | CoreError::Io(_) => ExitCode::ConfigError,
                CoreError::StoreUnavailable(_)
                | CoreError::Store(_)
                | CoreError::Snapshot(_)
                | CoreError::RetryExhausted { .. } => ExitCode::StoreError,
                CoreError::UndeliveredWrites { .. } => ExitCode::UndeliveredWrites,
                _ => ExitCode::RuntimeError,
            };
        }

        let error_str = format!("{:#}", error).to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("undelivered") {
            ExitCode::UndeliveredWrites
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod dispatch;
mod server;

#[derive(Parser)]
#[command(name = "sheetsync")]
#[command(about = "Coordinated read/write access to a shared remote table", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SHEETSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve table operations as JSON lines on stdin/stdout
    Serve {
        /// Override the table (sheet) name
        #[arg(long)]
        table_name: Option<String>,

        /// Override the key column (header name or column letter)
        #[arg(long)]
        key_spec: Option<String>,

        /// Override the 1-based header row
        #[arg(long)]
        header_row: Option<u32>,
    },

    /// Show status and health of a running server
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses; JSON otherwise
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or(LogFormat::Json);
    let log_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_directive())
        .unwrap_or("info");

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(log_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout carries protocol responses, so logs go to stderr
    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::error!(error = %message, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            table_name,
            key_spec,
            header_row,
        } => {
            let config = load_config(&cli.config)?;
            commands::serve::run(
                config,
                commands::serve::Overrides {
                    table_name,
                    key_spec,
                    header_row,
                },
            )
            .await?;
        }

        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!(
                "Configuration is valid (table '{}' in '{}')",
                config.store.table_name, config.store.table_id
            );
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    Config::from_file(&path).with_context(|| format!("Failed to load config {}", path.display()))
}
