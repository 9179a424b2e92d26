//! `docker-trace dockerfile`: print the reconstructed build directives of
//! an image, one per line.

use std::io::Write;

use clap::Args;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docker_trace_core::{cancel as cancellation, config, Result};
use docker_trace_runtime::{ContainerRuntime, DockerClient, ExportMetadata};

use super::{run_blocking, TempArtifacts};

#[derive(Args)]
pub struct DockerfileArgs {
    /// Image name: `name:tag` or an image-id prefix
    pub name: String,
}

pub async fn execute(args: DockerfileArgs, cancel: CancellationToken) -> Result<()> {
    let client = DockerClient::connect().await?;
    let dir = config::data_dir()?;
    let uid = Uuid::new_v4();
    let tar_path = dir.join(format!("in.tar.{uid}"));
    let _artifacts = TempArtifacts::new(vec![tar_path.clone()]);

    cancellation::with_cancel(&cancel, client.image_save(&args.name, &tar_path)).await?;

    let name = args.name.clone();
    let export_path = tar_path.clone();
    let lines = cancellation::with_cancel(
        &cancel,
        run_blocking(move || {
            let file = std::fs::File::open(&export_path)?;
            let metadata = ExportMetadata::from_export(std::io::BufReader::new(file))?;
            metadata.directives_for(&name)
        }),
    )
    .await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{line}")?;
    }
    Ok(())
}
