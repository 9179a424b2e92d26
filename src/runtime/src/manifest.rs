//! Manifest selection and build-directive reconstruction.
//!
//! An image export carries `manifest.json` (one record per image) and one
//! `<hex>.json` config blob per image. The config's history is a list of
//! `created_by` strings; metadata-only steps carry the ` #(nop) ` marker.
//! Replaying the surviving directives after `FROM scratch` + `ADD` of the
//! minified payload reproduces the image's runtime-relevant metadata.

use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;

use docker_trace_core::{Result, TraceError};

use crate::tar_stream::{self, EntryKind};

/// One record of `manifest.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
    #[serde(rename = "RepoTags")]
    pub repo_tags: Option<Vec<String>>,
}

/// One build step from the image config history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub created_by: String,
}

/// Image config blob, reduced to the history the tool needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Select the manifest for a requested image name.
///
/// A single manifest is returned as-is. With several, the name matches
/// either as an image-id prefix of the config blob, or (when it contains a
/// `:`) as an exact repo tag; anything else is ambiguous.
pub fn find_manifest<'a>(manifests: &'a [Manifest], name: &str) -> Result<&'a Manifest> {
    if manifests.len() == 1 {
        return Ok(&manifests[0]);
    }
    for manifest in manifests {
        if manifest.config.starts_with(name) {
            return Ok(manifest);
        }
    }
    if name.contains(':') {
        for manifest in manifests {
            if let Some(tags) = &manifest.repo_tags {
                if tags.iter().any(|tag| tag == name) {
                    return Ok(manifest);
                }
            }
        }
    }
    Err(TraceError::ManifestAmbiguous(format!(
        "{name} does not select one of {} manifests",
        manifests.len()
    )))
}

/// Manifests and config blobs collected from one pass over an export tar.
#[derive(Debug, Clone, Default)]
pub struct ExportMetadata {
    pub manifests: Vec<Manifest>,
    pub configs: HashMap<String, ImageConfig>,
}

impl ExportMetadata {
    /// Walk an export stream, collecting `manifest.json` and every
    /// top-level `*.json` config blob.
    pub fn from_export<R: Read>(reader: R) -> Result<Self> {
        let mut metadata = ExportMetadata::default();
        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if !matches!(
                tar_stream::classify(entry.header().entry_type()),
                EntryKind::Regular
            ) {
                continue;
            }
            let name = tar_stream::entry_name(&entry);
            if name == "manifest.json" {
                let data = tar_stream::read_body(&mut entry)?;
                metadata.manifests = serde_json::from_slice(&data)?;
            } else if name.ends_with(".json") {
                let data = tar_stream::read_body(&mut entry)?;
                let config: ImageConfig = serde_json::from_slice(&data)?;
                metadata.configs.insert(name, config);
            }
        }
        Ok(metadata)
    }

    /// Reconstruct the build directives for the image selected by `name`.
    pub fn directives_for(&self, name: &str) -> Result<Vec<String>> {
        let manifest = find_manifest(&self.manifests, name)?;
        let config = self.configs.get(&manifest.config).ok_or_else(|| {
            TraceError::TarFormat(format!("no such config in export: {}", manifest.config))
        })?;
        Ok(reconstruct_directives(config))
    }
}

/// Reduce a config history to replayable Dockerfile directives.
///
/// Each `created_by` line is stripped of the ` #(nop) ` marker and the
/// buildkit suffix, has commas restored inside quoted list forms, and is
/// kept only if it still looks like a metadata directive. `EXPOSE` map
/// forms and unquoted `ENV` values are normalized along the way.
pub fn reconstruct_directives(config: &ImageConfig) -> Vec<String> {
    let mut result = Vec::new();
    for entry in &config.history {
        let line = entry
            .created_by
            .split(" #(nop) ")
            .last()
            .unwrap_or_default();
        let line = line.trim_end_matches(" # buildkit").trim();
        let line = line.replace("\" ", "\", ");
        if !keeps_directive(&line) {
            continue;
        }
        result.push(normalize_directive(&line));
    }
    result
}

/// A surviving directive starts with an uppercase letter and is not one of
/// the layer-producing or discarded forms.
fn keeps_directive(line: &str) -> bool {
    let starts_upper = line
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false);
    starts_upper
        && !line.starts_with("ADD ")
        && !line.starts_with("COPY ")
        && !line.starts_with("RUN ")
        && !line.starts_with("LABEL ")
}

fn normalize_directive(line: &str) -> String {
    if let Some(ports) = line.strip_prefix("EXPOSE map[") {
        let mut numbers = Vec::new();
        let mut current = String::new();
        for c in ports.chars() {
            if c.is_ascii_digit() {
                current.push(c);
            } else if !current.is_empty() {
                numbers.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            numbers.push(current);
        }
        return format!("EXPOSE {}", numbers.join(" "));
    }
    if let Some(rest) = line.strip_prefix("ENV ") {
        if let Some((key, value)) = rest.split_once('=') {
            return format!("ENV {key}=\"{value}\"");
        }
    }
    line.to_string()
}
