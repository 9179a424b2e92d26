//! docker-trace CLI entry point.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use docker_trace_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    // Initialize tracing. Data goes to stdout, so all logs go to stderr;
    // LOGGING=n drops everything below the error level.
    let filter = if docker_trace_core::config::logging_disabled() {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // One token for the whole process; the signal listener is installed
    // exactly once and every blocking phase races against it.
    let cancel = CancellationToken::new();
    if let Err(e) = install_signal_handler(cancel.clone()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = dispatch(cli, cancel).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Cancel the token on the first SIGINT or SIGTERM.
fn install_signal_handler(cancel: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::info!("signal received, shutting down");
        cancel.cancel();
    });
    Ok(())
}
