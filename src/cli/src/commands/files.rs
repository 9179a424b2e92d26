//! `docker-trace files`: run the trace pipeline.
//!
//! Launches the kernel tracer subprocess, waits for its attach sentinel,
//! prints `ready` on stderr, and then streams one
//! `<container-id> <abs-path>` line to stdout per successful filesystem
//! access inside a tracked container. Runs until the tracer exits or the
//! process is signalled.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use docker_trace_core::{config, Result, TraceError};
use docker_trace_runtime::trace::attributor::Attributor;
use docker_trace_runtime::trace::event;

/// Window for draining buffered tracer output after kill or EOF.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Args)]
pub struct FilesArgs {
    /// Ring-buffer pages handed to the tracer
    #[arg(long)]
    pub rb_pages: Option<u32>,
}

pub async fn execute(args: FilesArgs, cancel: CancellationToken) -> Result<()> {
    let program = config::tracer_program();
    let mut command = tokio::process::Command::new(&program);
    if let Some(pages) = args.rb_pages {
        command.arg("--rb-pages").arg(pages.to_string());
    }
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    let mut child = command
        .spawn()
        .map_err(|e| TraceError::RuntimeUnavailable(format!("{program}: {e}")))?;
    let stdout = child.stdout.take().ok_or_else(|| {
        TraceError::TracerStartupMismatch("tracer started without stdout".to_string())
    })?;
    let mut lines = BufReader::new(stdout).lines();

    // The tracer announces itself before the first event; anything else
    // means we attached to the wrong program.
    let first = tokio::select! {
        _ = cancel.cancelled() => return Err(TraceError::Cancelled),
        line = lines.next_line() => line?.ok_or_else(|| {
            TraceError::TracerStartupMismatch("eof before startup line".to_string())
        })?,
    };
    if !(first.starts_with("Attaching ") && first.ends_with(" probes...")) {
        return Err(TraceError::TracerStartupMismatch(first));
    }
    eprintln!("ready");

    let mut attributor = Attributor::new();
    let mut out = std::io::stdout();
    let cancelled = loop {
        tokio::select! {
            _ = cancel.cancelled() => break true,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(event) = event::parse_line(&line) {
                        attributor.handle(&event, &mut out)?;
                    }
                }
                None => break false,
            }
        }
    };

    if cancelled {
        let _ = child.start_kill();
    }

    // Flush what the tracer still had buffered, bounded by a grace window.
    let drain = async {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(event) = event::parse_line(&line) {
                let _ = attributor.handle(&event, &mut out);
            }
        }
    };
    let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;
    out.flush()?;
    let _ = child.wait().await;

    tracing::info!(
        containers = attributor.tracked_containers(),
        "trace pipeline finished"
    );
    if cancelled {
        Err(TraceError::Cancelled)
    } else {
        Ok(())
    }
}
