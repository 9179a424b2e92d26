//! Environment-driven configuration: the persistent data directory and the
//! handful of environment variables the tool honors.

use std::path::PathBuf;

use crate::error::{Result, TraceError};

/// Default tracer subprocess launched by `docker-trace files`.
pub const DEFAULT_TRACER_PROGRAM: &str = "docker-trace-bpf";

/// Return the data directory (`~/.docker-trace`), creating it with mode
/// `0700` on first use. Temporary artefacts (saved exports, rewritten
/// payloads, synthesized Dockerfiles) live here with uuid suffixes so that
/// concurrent invocations never collide.
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TraceError::Io(std::io::Error::other("cannot resolve home directory")))?;
    let dir = home.join(".docker-trace");
    if !dir.is_dir() {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&dir)?;
    }
    Ok(dir)
}

/// `LOGGING=n` (or anything starting with `n`/`N`) silences informational
/// output, leaving only errors.
pub fn logging_disabled() -> bool {
    std::env::var("LOGGING")
        .map(|v| v.trim().to_ascii_lowercase().starts_with('n'))
        .unwrap_or(false)
}

/// Tracer program name, overridable through `DOCKER_TRACE_BPF`.
pub fn tracer_program() -> String {
    std::env::var("DOCKER_TRACE_BPF").unwrap_or_else(|_| DEFAULT_TRACER_PROGRAM.to_string())
}
