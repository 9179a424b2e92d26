//! CLI command definitions and dispatch.

mod dockerfile;
mod files;
mod minify;
mod scan;
mod unpack;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use docker_trace_core::{Result, TraceError};

/// docker-trace: observe container filesystem activity, minify images.
#[derive(Parser)]
#[command(name = "docker-trace", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Trace filesystem access of running containers to stdout
    Files(files::FilesArgs),
    /// Scan an image and dump per-path metadata
    Scan(scan::ScanArgs),
    /// Reconstruct the metadata directives of an image's build
    Dockerfile(dockerfile::DockerfileArgs),
    /// Minify an image, keeping the files passed on stdin
    Minify(minify::MinifyArgs),
    /// Unpack an image into directories and files
    Unpack(unpack::UnpackArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<()> {
    match cli.command {
        Command::Files(args) => files::execute(args, cancel).await,
        Command::Scan(args) => scan::execute(args, cancel).await,
        Command::Dockerfile(args) => dockerfile::execute(args, cancel).await,
        Command::Minify(args) => minify::execute(args, cancel).await,
        Command::Unpack(args) => unpack::execute(args, cancel).await,
    }
}

/// Run CPU/tar work off the async runtime, surfacing panics as I/O errors.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TraceError::Io(std::io::Error::other(e)))?
}

/// Temp artefacts tied to one invocation; removal is best-effort and runs
/// on success, error, and signal-triggered unwind alike.
pub(crate) struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub(crate) fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), "failed to remove temp file: {err}");
                }
            }
        }
    }
}
