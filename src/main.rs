//! Hostwright - deployment, backup and restore orchestration for CMS hosts
//!
//! This is the main entry point for the Hostwright CLI.

mod cli;

use std::future::Future;

use anyhow::Result;
use cli::commands::{self, CommandContext};
use cli::Cli;
use hostwright::config::Settings;
use hostwright::tasks::Hostwright;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code for an interrupted run (128 + SIGINT)
const INTERRUPTED: i32 = 130;

/// Exit code for a terminated run (128 + SIGTERM)
const TERMINATED: i32 = 143;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbosity());

    let settings = match Settings::discover(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    };
    let hostwright = Hostwright::new(settings);
    let ctx = CommandContext::new(&cli, &hostwright);

    let exit_code = tokio::select! {
        result = commands::execute(&cli, &ctx) => match result {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "Command failed");
                eprintln!("Error: {}", e);
                e.exit_code()
            }
        },
        code = shutdown_signal() => code,
    };

    // process::exit skips destructors, so tunnels are closed explicitly.
    hostwright.shutdown().await;
    std::process::exit(exit_code);
}

/// Wait for Ctrl+C or SIGTERM and return the matching exit code.
///
/// The SIGTERM handler is installed on call, before the future is polled.
fn shutdown_signal() -> impl Future<Output = i32> {
    #[cfg(unix)]
    let sigterm = {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                None
            }
        }
    };

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match sigterm {
                Some(mut sigterm) => {
                    sigterm.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                warn!("Interrupted, closing tunnels");
                INTERRUPTED
            }
            _ = terminate => {
                warn!("Terminated, closing tunnels");
                TERMINATED
            }
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
