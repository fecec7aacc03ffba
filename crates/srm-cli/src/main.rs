// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! `srm` — admin CLI for the SRM relay.
//!
//! The admin surface is a non-production gate: every command refuses
//! to run when the production flag is set.

mod commands;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use srm_config::RelayConfig;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code for runtime errors and per-item failures.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "srm", version, about = "SRM relay admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enroll a device: generate a keypair, submit the CSR, store the
    /// issued certificate.
    Enroll {
        /// Tenant identifier.
        #[arg(long)]
        tenant: String,

        /// Branch identifier.
        #[arg(long)]
        branch: Option<String>,

        /// Device identifier.
        #[arg(long)]
        device: Option<String>,

        /// Annul the existing certificate instead of issuing one.
        #[arg(long)]
        revoke: bool,
    },

    /// Queue an order (or closing) for submission.
    Enqueue {
        /// Order or closing identifier.
        entity_id: String,

        /// Tenant identifier.
        #[arg(long)]
        tenant: String,

        /// Treat the entity as an end-of-day closing.
        #[arg(long)]
        closing: bool,
    },

    /// Consume one batch of eligible queue items.
    ConsumeOnce {
        /// Batch size (1–100).
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=100))]
        limit: u32,
    },

    /// Queue inspection and recovery.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Show audit log entries.
    AuditLogs {
        /// Filter by order (entity) identifier.
        #[arg(long)]
        order: Option<String>,

        /// Maximum entries (≤ 200).
        #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..=200))]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCommands {
    /// Aggregate counts per queue state.
    Status,

    /// Return a crashed `processing` item to `pending`.
    Reset {
        /// Queue item id.
        queue_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = RelayConfig::from_env().context("loading configuration")?;
    if !config.admin_allowed() {
        bail!("the admin surface is disabled when SRM_PRODUCTION is set");
    }

    let ctx = commands::AdminContext::build(config).context("assembling relay")?;
    match cli.command {
        Commands::Enroll {
            tenant,
            branch,
            device,
            revoke,
        } => {
            commands::enroll(&ctx, &tenant, branch.as_deref(), device.as_deref(), revoke).await
        }
        Commands::Enqueue {
            entity_id,
            tenant,
            closing,
        } => commands::enqueue(&ctx, &entity_id, &tenant, closing).await,
        Commands::ConsumeOnce { limit } => commands::consume_once(&ctx, limit).await,
        Commands::Queue { command } => match command {
            QueueCommands::Status => commands::queue_status(&ctx).await,
            QueueCommands::Reset { queue_id } => commands::queue_reset(&ctx, queue_id).await,
        },
        Commands::AuditLogs { order, limit } => {
            commands::audit_logs(&ctx, order.as_deref(), limit).await
        }
    }
}
