//! Sharekey Admin - key layout migration and admin recovery

use anyhow::Context;
use clap::Parser;
use sharekey_cli::{AdminContext, Command, execute};
use sharekey_core::EncryptionConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sharekey-admin")]
#[command(about = "Administration tool for sharekey key storage")]
#[command(version)]
struct Args {
    /// Data directory holding user homes and key folders
    #[arg(short = 'D', long, env = "SHAREKEY_DATA_DIR")]
    data_dir: PathBuf,

    /// Encryption config file (TOML); SHAREKEY_* variables override it
    #[arg(short, long, env = "SHAREKEY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "SHAREKEY_DEBUG")]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sharekey={}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = EncryptionConfig::load(args.config.as_deref()).context("loading encryption config")?;
    tracing::debug!(module_id = %config.module_id, master_key = config.master_key_enabled, "loaded config");

    let ctx = AdminContext::open(&args.data_dir, config)?;
    let output = execute(&ctx, args.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
