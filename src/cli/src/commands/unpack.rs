//! `docker-trace unpack`: explode an image export into the current
//! directory.
//!
//! Layer directories are renamed `layer00`, `layer01`, … in manifest
//! order (rewriting the deduplicated `layer.tar` symlinks BuildKit
//! exports carry), each layer tar is extracted in place, and the packing
//! residue (`json`, `VERSION`, `layer.tar`) is removed.

use std::collections::HashMap;
use std::path::Path;

use clap::Args;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docker_trace_core::{cancel as cancellation, config, pathutil, Result, TraceError};
use docker_trace_runtime::manifest::{self, Manifest};
use docker_trace_runtime::{ContainerRuntime, DockerClient};

use super::{run_blocking, TempArtifacts};

#[derive(Args)]
pub struct UnpackArgs {
    /// Image name: `name:tag` or an image-id prefix
    pub name: String,

    /// Keep the original layer directory names
    #[arg(short = 'r', long)]
    pub no_rename: bool,

    /// Leave the layer tars packed
    #[arg(short = 'u', long)]
    pub no_untar: bool,
}

pub async fn execute(args: UnpackArgs, cancel: CancellationToken) -> Result<()> {
    let client = DockerClient::connect().await?;
    let dir = config::data_dir()?;
    let uid = Uuid::new_v4();
    let tar_path = dir.join(format!("in.tar.{uid}"));
    let _artifacts = TempArtifacts::new(vec![tar_path.clone()]);

    cancellation::with_cancel(&cancel, client.image_save(&args.name, &tar_path)).await?;
    tracing::info!(name = %args.name, "saved image export");

    let name = args.name.clone();
    let no_rename = args.no_rename;
    let no_untar = args.no_untar;
    cancellation::with_cancel(
        &cancel,
        run_blocking(move || {
            unpack_export(&tar_path, Path::new("."), &name, no_rename, no_untar)
        }),
    )
    .await
}

fn unpack_export(
    tar_path: &Path,
    dest: &Path,
    name: &str,
    no_rename: bool,
    no_untar: bool,
) -> Result<()> {
    let file = std::fs::File::open(tar_path)?;
    let mut archive = tar::Archive::new(std::io::BufReader::new(file));
    archive.unpack(dest)?;
    tracing::info!("extracted export");

    let data = std::fs::read(dest.join("manifest.json"))?;
    let manifests: Vec<Manifest> = serde_json::from_slice(&data)?;
    let manifest = manifest::find_manifest(&manifests, name)?;

    let mut layer_names = HashMap::new();
    for (index, layer) in manifest.layers.iter().enumerate() {
        layer_names.insert(pathutil::dir(layer), format!("layer{index:02}"));
    }

    if !no_rename {
        for layer in &manifest.layers {
            repoint_layer_symlink(dest, layer, &layer_names)?;
            let layer_dir = pathutil::dir(layer);
            let renamed = resolved_dir(&layer_dir, &layer_names)?;
            std::fs::rename(dest.join(&layer_dir), dest.join(renamed))?;
        }
    }

    if !no_untar {
        for layer in &manifest.layers {
            let dir_name = layer_dir_name(layer, no_rename, &layer_names)?;
            let inner = std::fs::File::open(dest.join(&dir_name).join("layer.tar"))?;
            tar::Archive::new(std::io::BufReader::new(inner)).unpack(dest.join(&dir_name))?;
            tracing::info!(layer = %dir_name, "extracted layer");
        }
        for layer in &manifest.layers {
            let dir_name = layer_dir_name(layer, no_rename, &layer_names)?;
            for residue in ["json", "VERSION", "layer.tar"] {
                match std::fs::remove_file(dest.join(&dir_name).join(residue)) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }
    Ok(())
}

fn layer_dir_name(
    layer: &str,
    no_rename: bool,
    layer_names: &HashMap<String, String>,
) -> Result<String> {
    let layer_dir = pathutil::dir(layer);
    if no_rename {
        Ok(layer_dir)
    } else {
        Ok(resolved_dir(&layer_dir, layer_names)?.to_string())
    }
}

/// Re-point a deduplicated `layer.tar` symlink at the renamed directory of
/// its target layer. Regular layer tars pass through untouched.
fn repoint_layer_symlink(
    dest: &Path,
    layer: &str,
    layer_names: &HashMap<String, String>,
) -> Result<()> {
    let link_path = dest.join(layer);
    let target = match std::fs::read_link(&link_path) {
        Ok(target) => target,
        Err(_) => return Ok(()),
    };
    let target = target.to_string_lossy();
    let target_dir = pathutil::base(&pathutil::dir(&target)).to_string();
    let renamed = resolved_dir(&target_dir, layer_names)?;
    std::fs::remove_file(&link_path)?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(format!("../{renamed}/layer.tar"), &link_path)?;
    Ok(())
}

fn resolved_dir<'a>(layer_dir: &str, layer_names: &'a HashMap<String, String>) -> Result<&'a str> {
    layer_names
        .get(layer_dir)
        .map(|s| s.as_str())
        .ok_or_else(|| TraceError::TarFormat(format!("unknown layer directory: {layer_dir}")))
}
