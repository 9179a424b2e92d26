//! `docker-trace scan`: dump the final per-path view of an image.
//!
//! Saves the image export into the data directory, scans it, and prints
//! one TSV row per surviving path. The header goes to stderr so stdout
//! stays machine-readable.

use std::io::Write;

use clap::Args;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docker_trace_core::{cancel as cancellation, config, Result};
use docker_trace_runtime::scan::{scan_export, ScanFile};
use docker_trace_runtime::{ContainerRuntime, DockerClient};

use super::{run_blocking, TempArtifacts};

#[derive(Args)]
pub struct ScanArgs {
    /// Image name: `name:tag` or an image-id prefix
    pub name: String,

    /// Hash file contents (sha256) and classify utf8 vs binary
    #[arg(short = 'c', long)]
    pub check_data: bool,
}

pub async fn execute(args: ScanArgs, cancel: CancellationToken) -> Result<()> {
    let client = DockerClient::connect().await?;
    let dir = config::data_dir()?;
    let uid = Uuid::new_v4();
    let tar_path = dir.join(format!("in.tar.{uid}"));
    let _artifacts = TempArtifacts::new(vec![tar_path.clone()]);

    cancellation::with_cancel(&cancel, client.image_save(&args.name, &tar_path)).await?;
    tracing::info!(name = %args.name, "saved image export");

    let name = args.name.clone();
    let check_data = args.check_data;
    let scan_path = tar_path.clone();
    let result = cancellation::with_cancel(
        &cancel,
        run_blocking(move || {
            let file = std::fs::File::open(&scan_path)?;
            scan_export(std::io::BufReader::new(file), &name, check_data)
        }),
    )
    .await?;

    if check_data {
        eprintln!("path\tlayer\tsize\tmode\tlink-target\tsha256\tcontent-type");
    } else {
        eprintln!("path\tlayer\tsize\tmode\tlink-target");
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for file in &result.files {
        writeln!(out, "{}", render_row(file, check_data))?;
    }
    Ok(())
}

/// Render one TSV row; zero and missing fields print as `-`.
fn render_row(file: &ScanFile, check_data: bool) -> String {
    let size = if file.size == 0 {
        "-".to_string()
    } else {
        file.size.to_string()
    };
    let mode = if file.mode == 0 {
        "-".to_string()
    } else {
        format!("{:o}", file.mode)
    };
    let mut row = format!(
        "{}\t{}\t{}\t{}\t{}",
        file.path,
        file.layer_index,
        size,
        mode,
        file.link_target.as_deref().unwrap_or("-"),
    );
    if check_data {
        row.push('\t');
        row.push_str(file.content_hash.as_deref().unwrap_or("-"));
        row.push('\t');
        row.push_str(file.content_kind.map(|c| c.as_str()).unwrap_or("-"));
    }
    row
}
