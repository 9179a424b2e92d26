//! `docker-trace minify`: rebuild an image keeping only the files passed
//! on stdin.
//!
//! Phases: save the source export, scan it, read seed paths from stdin,
//! resolve the symlink closure, rewrite the layers into a single payload
//! tar, reconstruct the metadata directives, synthesize a `FROM scratch`
//! Dockerfile, and hand the context to the daemon. Temp artefacts carry a
//! uuid suffix and are removed however the command ends.

use std::collections::BTreeSet;

use clap::Args;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docker_trace_core::{cancel as cancellation, config, pathutil, Result};
use docker_trace_runtime::docker::write_context;
use docker_trace_runtime::minify::{closure, writer};
use docker_trace_runtime::scan::scan_export;
use docker_trace_runtime::{ContainerRuntime, DockerClient, ExportMetadata};

use super::{run_blocking, TempArtifacts};

#[derive(Args)]
pub struct MinifyArgs {
    /// Source image
    pub container_in: String,

    /// Tag for the minified image
    pub container_out: String,

    /// Skip the hard-coded shell, dynamic-linker, and root-symlink
    /// includes that compensate for trace gaps
    #[arg(long)]
    pub no_extra_includes: bool,
}

pub async fn execute(args: MinifyArgs, cancel: CancellationToken) -> Result<()> {
    tracing::info!(
        "start minification {} => {}",
        args.container_in,
        args.container_out
    );
    let client = DockerClient::connect().await?;
    let dir = config::data_dir()?;
    let uid = Uuid::new_v4();
    let in_tar = dir.join(format!("in.tar.{uid}"));
    let out_tar = dir.join(format!("out.tar.{uid}"));
    let dockerfile_path = dir.join(format!("Dockerfile.{uid}"));
    let context_path = dir.join(format!("context.tar.{uid}"));
    let _artifacts = TempArtifacts::new(vec![
        in_tar.clone(),
        out_tar.clone(),
        dockerfile_path.clone(),
        context_path.clone(),
    ]);

    cancellation::with_cancel(&cancel, client.image_save(&args.container_in, &in_tar)).await?;
    tracing::info!("saved source image export");

    let name = args.container_in.clone();
    let scan_path = in_tar.clone();
    let scan = cancellation::with_cancel(
        &cancel,
        run_blocking(move || {
            let file = std::fs::File::open(&scan_path)?;
            scan_export(std::io::BufReader::new(file), &name, false)
        }),
    )
    .await?;
    tracing::info!(files = scan.files.len(), "scanned image");

    let mut input = String::new();
    cancellation::with_cancel(&cancel, async {
        tokio::io::stdin().read_to_string(&mut input).await?;
        Ok(())
    })
    .await?;
    let mut seeds = BTreeSet::new();
    for line in input.lines() {
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        seeds.insert(closure::include_key(&pathutil::clean(path)));
    }
    tracing::info!(paths = seeds.len(), "read include paths from stdin");

    let symlinks = closure::symlink_map(&scan.files);
    let mut include = closure::resolve_links(&seeds, &symlinks)?;
    tracing::info!(paths = include.len(), "resolved symlink closure");
    if !args.no_extra_includes {
        include.extend(closure::safety_net_paths(&scan.files));
    }
    let selected = closure::select_files(&scan.files, &include);
    tracing::info!(files = selected.len(), "selected layer entries");

    let rewrite_in = in_tar.clone();
    let rewrite_out = out_tar.clone();
    let layer_indexes = scan.layer_indexes.clone();
    cancellation::with_cancel(
        &cancel,
        run_blocking(move || {
            use std::io::Write;
            let reader = std::io::BufReader::new(std::fs::File::open(&rewrite_in)?);
            let file = std::fs::File::create(&rewrite_out)?;
            let mut payload = writer::rewrite_export(
                reader,
                std::io::BufWriter::new(file),
                &layer_indexes,
                &selected,
            )?;
            payload.flush()?;
            Ok(())
        }),
    )
    .await?;
    tracing::info!("rewrote layers into payload tar");

    let name = args.container_in.clone();
    let metadata_path = in_tar.clone();
    let directives = cancellation::with_cancel(
        &cancel,
        run_blocking(move || {
            let file = std::fs::File::open(&metadata_path)?;
            let metadata = ExportMetadata::from_export(std::io::BufReader::new(file))?;
            metadata.directives_for(&name)
        }),
    )
    .await?;
    tracing::info!(directives = directives.len(), "reconstructed build directives");

    let payload_name = format!("out.tar.{uid}");
    let dockerfile_name = format!("Dockerfile.{uid}");
    let mut dockerfile = format!("FROM scratch\nADD {payload_name} /\n");
    for line in &directives {
        dockerfile.push_str(line);
        dockerfile.push('\n');
    }
    tokio::fs::write(&dockerfile_path, &dockerfile).await?;
    tracing::info!("synthesized dockerfile");

    let entries_out = out_tar.clone();
    let entries_dockerfile = dockerfile_path.clone();
    let context_dest = context_path.clone();
    let context_payload_name = payload_name.clone();
    let context_dockerfile_name = dockerfile_name.clone();
    run_blocking(move || {
        write_context(
            &[
                (entries_out.as_path(), context_payload_name.as_str()),
                (entries_dockerfile.as_path(), context_dockerfile_name.as_str()),
            ],
            &context_dest,
        )
    })
    .await?;
    cancellation::with_cancel(
        &cancel,
        client.image_build(&context_path, &args.container_out, &dockerfile_name),
    )
    .await?;
    tracing::info!("built minified image");

    let inspect = client.image_inspect(&args.container_out).await?;
    if let Some(size) = inspect.get("Size").and_then(|v| v.as_i64()) {
        tracing::info!(size, "minified image size");
    }
    tracing::info!("minification complete");
    Ok(())
}
