//! mird-collector - HTTP endpoint receiving landing-page analytics
//!
//! This tool provides commands for:
//! - Serving the tracking endpoint until Ctrl-C/SIGTERM
//! - Checking collector configuration and storage status
//!
//! Uses XDG Base Directory specification for file locations:
//! - Data: $XDG_DATA_HOME/mird/analytics_data.json (~/.local/share/mird/)
//! - Config: $XDG_CONFIG_HOME/mird/config.toml (~/.config/mird/config.toml)
//! - Logs: $XDG_STATE_HOME/mird/ (~/.local/state/mird/)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mird_core::collector::{serve, shutdown_signal, CollectorState, EventLog};
use mird_core::Config;

#[derive(Parser)]
#[command(name = "mird-collector")]
#[command(about = "Receive and store MIRD landing-page analytics")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tracking endpoint
    Serve {
        /// Address to bind (default: from config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show collector configuration and storage status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;

    match args.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.collector.bind = bind;
            }
            config.logging.stderr |= args.verbose;

            let _log_guard = mird_core::logging::init(&config.logging, "collector")
                .context("failed to initialize logging")?;

            cmd_serve(config).await
        }
        Command::Status => {
            let _log_guard = if args.verbose {
                Some(
                    mird_core::logging::init(&config.logging, "collector")
                        .context("failed to initialize logging")?,
                )
            } else {
                None
            };

            cmd_status(&config)
        }
    }
}

async fn cmd_serve(config: Config) -> Result<()> {
    let state =
        CollectorState::new(config.collector).context("invalid collector configuration")?;

    if state.config().notification_address().is_none() {
        tracing::info!("No notification address configured, session summaries are disabled");
    }

    serve(state, shutdown_signal())
        .await
        .context("collector failed")?;

    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("MIRD Collector Configuration");
    println!("============================");
    println!();

    let collector = &config.collector;

    println!("Bind:            {}", collector.bind);
    println!("Path:            {}", collector.path);
    println!("Data File:       {}", collector.data_file.display());
    println!("Error Log:       {}", collector.error_log.display());
    println!("Session Dir:     {}", collector.session_dir.display());
    println!("Max File Size:   {} bytes", collector.max_file_size);
    println!(
        "Token:           {}",
        if collector.require_token {
            "required"
        } else {
            "not required"
        }
    );
    println!(
        "Notifications:   {}",
        collector
            .notification_address()
            .unwrap_or_else(|| "<not set>".to_string())
    );
    println!(
        "Server Name:     {}",
        collector.server_name.as_deref().unwrap_or("<from Host header>")
    );
    println!("Allowed Origins:");
    for origin in &collector.allowed_origins {
        println!("  {origin}");
    }

    println!();
    if let Err(e) = collector.validate() {
        println!("Status: Not ready ({e})");
        return Ok(());
    }
    println!("Status: Ready to serve");

    let log = EventLog::new(collector);
    let size = log
        .data_file_size()
        .context("failed to read data file size")?;
    println!();
    println!("Data File Size:  {size} bytes");

    let backups = log.backups().context("failed to list backups")?;
    println!("Backups:         {}", backups.len());
    for backup in backups {
        println!("  {}", backup.display());
    }

    Ok(())
}
