//! # bookdesk
//!
//! Command-line client for the bookdesk API. Wires the session pipeline and
//! the workspace cache together, forwarding session events to the cache.

#![deny(unsafe_code)]

mod shell;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::shell::Shell;

/// bookdesk API client.
#[derive(Parser, Debug)]
#[command(name = "bookdesk", about = "bookdesk API client")]
struct Cli {
    /// Settings file (defaults to `~/.bookdesk/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings; `RUST_LOG` wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Sign in with email and password.
    Login {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long)]
        password: String,
    },
    /// Sign out.
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// List workspaces, refetching when the cached list is stale.
    Workspaces {
        /// Refetch even if the cached list is fresh.
        #[arg(long)]
        force: bool,
    },
    /// Select the current workspace.
    Select {
        /// Workspace ID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(bookdesk_settings::settings_path);
    let settings = bookdesk_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(settings.logging.level.as_str());
    let format = settings
        .logging
        .format
        .parse::<bookdesk_core::LogFormat>()
        .unwrap_or_default();
    bookdesk_core::init_subscriber(level, format);

    let data_dir = settings
        .storage
        .resolve_data_dir(&bookdesk_settings::home_dir());
    tracing::debug!(data_dir = %data_dir.display(), "opening client state");
    let mut shell = Shell::open(&settings, &data_dir)?;

    // Ctrl-C abandons an in-flight workspace fetch without touching the cache
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut out = std::io::stdout().lock();
    let result = shell.run(args.command, &cancel, &mut out).await;
    ctrl_c.abort();
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
