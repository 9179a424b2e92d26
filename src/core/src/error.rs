use thiserror::Error;

/// docker-trace error taxonomy.
///
/// Every fatal condition in the scanner, the trace pipeline, and the
/// minifier maps onto one of these variants; commands propagate them with
/// `?` and the binary renders them as a single `error: <context>` line.
#[derive(Error, Debug)]
pub enum TraceError {
    /// I/O failure on a file, pipe, or stream.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid tar data, or a tar entry kind that the
    /// rewriter cannot represent.
    #[error("tar format: {0}")]
    TarFormat(String),

    /// Invalid JSON in `manifest.json`, a config blob, or the build
    /// progress stream.
    #[error("json format: {0}")]
    JsonFormat(#[from] serde_json::Error),

    /// The requested name did not select exactly one manifest.
    #[error("ambiguous image name: {0}")]
    ManifestAmbiguous(String),

    /// A scanned entry referenced a layer absent from the manifest.
    #[error("no such layer: {0}")]
    LayerNotFound(String),

    /// The container runtime could not be reached or refused a request.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The image build finished without the success sentinel.
    #[error("build rejected: {0}")]
    BuildRejected(String),

    /// The tracer subprocess did not announce itself as expected.
    #[error("unexpected tracer startup line: {0:?}")]
    TracerStartupMismatch(String),

    /// A symlink chain failed to reach a fixed point within the bound.
    #[error("symlink chain did not resolve: {0}")]
    SymlinkCycle(String),

    /// Interrupted by SIGINT/SIGTERM.
    #[error("cancelled")]
    Cancelled,
}

/// Result type alias for docker-trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;
