//! Container runtime client.
//!
//! Commands talk to the daemon through the [`ContainerRuntime`] trait so
//! that orchestration logic stays testable without a live Docker socket.
//! The production implementation wraps bollard over the local socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use bytes::Bytes;
use futures_util::TryStreamExt;
use hyper::Body;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use docker_trace_core::{retry, Result, TraceError};

/// Chunk size for streaming the build context into the daemon.
const CONTEXT_CHUNK: usize = 64 * 1024;

/// Daemon operations the tool depends on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stream an image export (`docker save`) into `dest`.
    async fn image_save(&self, name: &str, dest: &Path) -> Result<()>;

    /// Build the context tar at `context` as image `tag` using
    /// `dockerfile` (a path inside the context). Succeeds only when the
    /// progress stream ends with the tagged-success sentinel.
    async fn image_build(&self, context: &Path, tag: &str, dockerfile: &str) -> Result<()>;

    /// Inspect an image, returned as loosely-typed JSON.
    async fn image_inspect(&self, name: &str) -> Result<serde_json::Value>;
}

/// Bollard-backed client for the local daemon.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect to the local daemon, retrying the liveness ping briefly so
    /// a daemon that is still starting up does not fail the command.
    pub async fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| unavailable("connect", e))?;
        retry::retry("docker ping", || {
            let docker = docker.clone();
            async move {
                docker.ping().await.map_err(|e| unavailable("ping", e))?;
                Ok(())
            }
        })
        .await?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn image_save(&self, name: &str, dest: &Path) -> Result<()> {
        let mut stream = self.docker.export_image(name);
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| unavailable("export_image", e))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn image_build(&self, context: &Path, tag: &str, dockerfile: &str) -> Result<()> {
        let options = BuildImageOptions::<String> {
            dockerfile: dockerfile.to_string(),
            t: tag.to_string(),
            nocache: true,
            rm: true,
            ..Default::default()
        };
        let body = stream_file_body(context.to_path_buf()).await?;
        let mut stream = self.docker.build_image(options, None, Some(body));

        let sentinel = format!("Successfully tagged {tag}\n");
        let mut last_stream = String::new();
        while let Some(info) = stream
            .try_next()
            .await
            .map_err(|e| TraceError::BuildRejected(e.to_string()))?
        {
            if let Some(error) = info.error {
                return Err(TraceError::BuildRejected(error));
            }
            if let Some(progress) = info.stream {
                for line in progress.split('\n').filter(|l| !l.is_empty()) {
                    tracing::info!("{line}");
                }
                last_stream = progress;
            }
        }
        if last_stream == sentinel {
            Ok(())
        } else {
            Err(TraceError::BuildRejected(format!(
                "stream ended without success sentinel for {tag}"
            )))
        }
    }

    async fn image_inspect(&self, name: &str) -> Result<serde_json::Value> {
        let inspect = self
            .docker
            .inspect_image(name)
            .await
            .map_err(|e| unavailable("inspect_image", e))?;
        Ok(serde_json::to_value(inspect)?)
    }
}

/// Feed a file into an HTTP body through a bounded channel. The producer
/// task owns the read side; dropping or aborting the sender unblocks the
/// daemon connection on error paths.
async fn stream_file_body(path: PathBuf) -> Result<Body> {
    let mut file = tokio::fs::File::open(&path).await?;
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        let mut buf = vec![0u8; CONTEXT_CHUNK];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if sender
                        .send_data(Bytes::copy_from_slice(&buf[..n]))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), "context read failed: {err}");
                    sender.abort();
                    break;
                }
            }
        }
    });
    Ok(body)
}

fn unavailable(op: &str, err: bollard::errors::Error) -> TraceError {
    TraceError::RuntimeUnavailable(format!("{op}: {err}"))
}

/// Write the build-context tar handed to the daemon: the listed files,
/// stored under their context-relative names.
pub fn write_context(entries: &[(&Path, &str)], dest: &Path) -> Result<()> {
    use std::io::Write;

    let file = std::fs::File::create(dest)?;
    let mut builder = tar::Builder::new(std::io::BufWriter::new(file));
    for (path, name) in entries {
        builder.append_path_with_name(path, name)?;
    }
    builder.into_inner()?.flush()?;
    Ok(())
}
