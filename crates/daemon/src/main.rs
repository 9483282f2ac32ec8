// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Taskmill Daemon (milld)
//!
//! Background process that owns the job scheduler, the workspace manager,
//! and the output broker. A transport adapter in front of
//! [`mill_daemon::Service`] is expected to run in the same process; this
//! binary wires the daemon itself and waits for shutdown signals.

use mill_daemon::{env, lifecycle, Config, LifecycleError};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("milld {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("milld {}", env!("CARGO_PKG_VERSION"));
                println!("Taskmill daemon - batch prompt execution over CoW repo workspaces");
                println!();
                println!("USAGE:");
                println!("    milld");
                println!();
                println!("Configuration is read from $MILL_STATE_DIR/config.toml");
                println!("(default ~/.local/state/taskmill/config.toml).");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: milld [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let state_dir = env::state_dir()?;
    let config = Config::load(&env::config_path(&state_dir), state_dir)?;

    let _log_guard = setup_logging(&config)?;
    info!("starting taskmill daemon");

    let daemon = match lifecycle::startup(config).await {
        Ok(daemon) => daemon,
        Err(LifecycleError::LockFailed(_)) => {
            eprintln!("milld is already running for this state directory");
            std::process::exit(1);
        }
        Err(e) => {
            error!("failed to start daemon: {e}");
            return Err(e.into());
        }
    };

    println!("READY");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    daemon.shutdown().await;
    info!("daemon stopped");
    Ok(())
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_appender = tracing_appender::rolling::never(
        log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        log_path.file_name().ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
