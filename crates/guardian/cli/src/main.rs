//! Guardian CLI - Command-line interface for assertion governance
//!
//! Offline commands work directly on manifest and ledger files:
//! - Validate a manifest and preflight its data source
//! - Verify the audit ledger's hash chain and override signatures
//! - Query the audit ledger
//! - Compute override content hashes
//!
//! Online commands talk to a running `guardiand`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod commands;
mod error;
mod output;

use commands::{daemon, ledger, manifest, overrides};
use error::CliResult;

/// Guardian CLI application
#[derive(Parser)]
#[command(name = "guardian")]
#[command(about = "Guardian - Assertion governance for planning models", long_about = None)]
#[command(version)]
struct Cli {
    /// Guardian daemon endpoint
    #[arg(short, long, env = "GUARDIAN_ENDPOINT", default_value = "http://localhost:8700")]
    endpoint: String,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Validate a manifest
    Validate {
        /// Manifest file
        manifest: PathBuf,

        /// Skip reading the target data source
        #[arg(long)]
        offline: bool,
    },

    /// Verify the audit ledger
    Verify {
        /// Ledger file
        #[arg(short, long, default_value = "audit_log.jsonl")]
        ledger: PathBuf,
    },

    /// Query the audit ledger
    Audit {
        /// Ledger file
        #[arg(short, long, default_value = "audit_log.jsonl")]
        ledger: PathBuf,

        /// Event kind (EVALUATE, OVERRIDE, RESOLVE, ...)
        #[arg(long)]
        kind: Option<String>,

        /// Minimum severity (INFO, WARNING, CRITICAL)
        #[arg(long)]
        severity: Option<String>,

        /// Only events touching this assertion
        #[arg(long)]
        assertion: Option<String>,

        /// Only events at or after this timestamp
        #[arg(long)]
        since: Option<String>,

        /// Maximum number of events
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Compute an override content hash
    Hash {
        #[arg(short, long)]
        justification: String,

        #[arg(short, long)]
        signer: String,

        /// Timestamp to sign (defaults to now)
        #[arg(short, long)]
        timestamp: Option<String>,
    },

    /// Show current governance status
    Status,

    /// Sign and submit an override for halted assertions
    Override {
        /// Assertion to override (repeatable)
        #[arg(short, long = "assertion", required = true)]
        assertions: Vec<String>,

        #[arg(short, long)]
        justification: String,

        #[arg(short, long, env = "GUARDIAN_SIGNER")]
        signer: String,
    },

    /// Record a review of an assertion
    Review {
        /// Assertion id
        assertion: String,

        #[arg(short, long, env = "GUARDIAN_REVIEWER")]
        reviewer: String,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    tracing::debug!(endpoint = %cli.endpoint, "guardian cli");

    let ok = match cli.command {
        Commands::Validate { manifest, offline } => manifest::validate(&manifest, offline).await?,
        Commands::Verify { ledger } => ledger::verify(&ledger, cli.output).await?,
        Commands::Audit {
            ledger,
            kind,
            severity,
            assertion,
            since,
            limit,
        } => {
            let filter = ledger::AuditFilter {
                kind,
                severity,
                assertion,
                since,
                limit,
            };
            ledger::audit(&ledger, filter, cli.output).await?;
            true
        }
        Commands::Hash {
            justification,
            signer,
            timestamp,
        } => {
            overrides::hash(&justification, &signer, timestamp);
            true
        }
        Commands::Status => {
            let client = client::GuardianClient::new(&cli.endpoint)?;
            daemon::status(&client, cli.output).await?
        }
        Commands::Override {
            assertions,
            justification,
            signer,
        } => {
            let client = client::GuardianClient::new(&cli.endpoint)?;
            overrides::submit(&client, assertions, justification, signer, cli.output).await?
        }
        Commands::Review { assertion, reviewer } => {
            let client = client::GuardianClient::new(&cli.endpoint)?;
            overrides::review(&client, &assertion, &reviewer).await?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
