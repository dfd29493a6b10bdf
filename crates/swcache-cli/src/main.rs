//! swcache - host adapter for the Xenohuru offline cache layer.
//!
//! Plays the part of the browser runtime: it opens the on-disk cache
//! namespace, builds a worker from the configuration, and delivers one
//! lifecycle or fetch event per invocation.

mod cli;
mod commands;
mod config;
mod format;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command};
use commands::{build_worker, controlling_worker};
use config::Config;

/// Log file name prefix inside `--log-dir`
const LOG_FILE_PREFIX: &str = "swcache.log";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=swcache_core=debug).
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_overrides(cli.origin, cli.api_host, cli.cache_name);

    if let Command::Config { write } = cli.command {
        config.worker.validate().context("Invalid worker configuration")?;
        println!("{}", serde_json::to_string_pretty(&config)?);
        if write {
            let path = config.save(cli.config.as_deref())?;
            eprintln!("Wrote {}", path.display());
        }
        return Ok(());
    }

    let cache_dir = match cli.cache_dir {
        Some(dir) => dir,
        None => config.cache_dir()?,
    };
    debug!(cache_dir = %cache_dir.display(), "Opening cache namespace");

    let worker = match cli.command {
        Command::Fetch { .. } => controlling_worker(&config, &cache_dir)?,
        _ => build_worker(&config, &cache_dir)?,
    };
    info!(version = worker.cache_name(), "swcache starting");

    match cli.command {
        Command::Install => commands::install(&worker).await,
        Command::Activate => commands::activate(&worker).await,
        Command::Update => commands::update(&worker).await,
        Command::Fetch {
            url,
            method,
            headers,
            include,
        } => commands::fetch(&worker, &url, method, &headers, include).await,
        Command::Status { entries } => commands::status(&worker, entries),
        Command::Classify { url } => commands::classify(&worker, &url),
        Command::Config { .. } => Ok(()),
    }
}
