//! Guardian Daemon - Continuous assertion governance service
//!
//! The Guardian daemon provides:
//! - Change-driven evaluation of one manifest's assertions
//! - REST API for status, overrides and the audit ledger
//! - Server-Sent Events stream of governance events

use clap::Parser;
use guardian_daemon::{DaemonConfig, Server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Guardian Daemon CLI
#[derive(Parser)]
#[command(name = "guardiand")]
#[command(about = "Guardian Daemon - Continuous assertion governance service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GUARDIAN_CONFIG")]
    config: Option<String>,

    /// Manifest to govern
    #[arg(short, long, env = "GUARDIAN_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "GUARDIAN_LISTEN_ADDR")]
    listen: Option<String>,

    /// Ledger file (default: audit_log.jsonl beside the manifest)
    #[arg(long, env = "GUARDIAN_LEDGER")]
    ledger: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "GUARDIAN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "GUARDIAN_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration, then let CLI flags win
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(manifest) = cli.manifest {
        config.manifest_path = manifest;
    }
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", listen, e))?;
    }
    if let Some(ledger) = cli.ledger {
        config.engine.ledger_path = Some(ledger);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    println!(
        r#"
   ____                     _ _
  / ___|_   _  __ _ _ __ __| (_) __ _ _ __
 | |  _| | | |/ _` | '__/ _` | |/ _` | '_ \
 | |_| | |_| | (_| | | | (_| | | (_| | | | |
  \____|\__,_|\__,_|_|  \__,_|_|\__,_|_| |_|

  Continuous assertion governance
  Version: {}
  Manifest: {}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.manifest_path.display(),
        config.server.listen_addr
    );

    let server = Server::new(config).await?;
    server.run().await?;
    Ok(())
}
