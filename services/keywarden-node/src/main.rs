//! Keywarden operator binary.
//!
//! # Usage
//!
//! ```bash
//! # Run rotation and cleanup until Ctrl-C
//! keywarden-node --config keywarden.toml run
//!
//! # Rotate a group's symmetric key
//! keywarden-node rotate --type symmetric --group team-7
//!
//! # Print key counts as JSON
//! keywarden-node status
//! ```

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use keywarden_core::{logging, Config};
use keywarden_keyring::KeyringContext;
use keywarden_keystore::{KeyScope, KeyStats, KeyType};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

/// Key lifecycle daemon and maintenance commands
#[derive(Parser, Debug)]
#[command(name = "keywarden-node")]
#[command(about = "Keywarden key lifecycle service")]
#[command(version)]
struct Args {
    /// Path to a TOML config file (defaults to $KEYWARDEN_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print version handshake as JSON and exit
    #[arg(long)]
    version_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run secret rotation and key cleanup until interrupted
    Run,
    /// Create a new key and retire the current ones
    Rotate {
        #[arg(long = "type", value_enum)]
        key_type: KeyTypeArg,
        /// Group scope; global when omitted
        #[arg(long)]
        group: Option<String>,
    },
    /// Permanently deny a key
    Revoke { id: String },
    /// Delete keys past the retention window
    Cleanup,
    /// Print key and secret status as JSON
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyTypeArg {
    Symmetric,
    AsymmetricPrivate,
    AsymmetricPublic,
}

impl From<KeyTypeArg> for KeyType {
    fn from(arg: KeyTypeArg) -> Self {
        match arg {
            KeyTypeArg::Symmetric => KeyType::Symmetric,
            KeyTypeArg::AsymmetricPrivate => KeyType::AsymmetricPrivate,
            KeyTypeArg::AsymmetricPublic => KeyType::AsymmetricPublic,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    keys: KeyStats,
    signing_fallbacks: usize,
    signing_key_created_at: DateTime<Utc>,
    next_secret_rotation_at: DateTime<Utc>,
    secret_write_pending: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    config.validate().context("validating config")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version_json {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = load_config(args.config.as_ref())?;
    let mut logging_config = config.logging.clone();
    logging_config.json |= args.json_logs;
    logging::init_from_config(&logging_config);

    let mut ctx = KeyringContext::open(config).context("opening keyring")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            ctx.start()?;
            info!("Keywarden node running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            info!("Shutdown signal received");
            ctx.shutdown().await;
        }
        Command::Rotate { key_type, group } => {
            let scope = group.map_or(KeyScope::Global, KeyScope::Group);
            let id = ctx.keys().rotate_key(key_type.into(), &scope)?;
            println!("{}", id);
        }
        Command::Revoke { id } => {
            ctx.keys().revoke_key(&id)?;
            println!("revoked {}", id);
        }
        Command::Cleanup => {
            let deleted = ctx.keys().cleanup_old_keys()?;
            println!("deleted {}", deleted);
        }
        Command::Status => {
            let tokens = ctx.tokens();
            let report = StatusReport {
                keys: ctx.keys().key_stats()?,
                signing_fallbacks: tokens.fallback_count(),
                signing_key_created_at: tokens.key_created_at(),
                next_secret_rotation_at: tokens.next_rotation_at(),
                secret_write_pending: tokens.persist_pending(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
