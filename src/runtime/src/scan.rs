//! Image export scanner.
//!
//! Reconstructs the final per-path view of an image from its export tar
//! (a tar of layer tars): every layer entry is recorded with its layer of
//! origin, then collapsed so that for each path only the entry from the
//! highest-numbered layer survives.

use std::collections::HashMap;
use std::io::Read;

use sha2::{Digest, Sha256};

use docker_trace_core::{Result, TraceError};

use crate::manifest::{self, Manifest};
use crate::tar_stream::{self, EntryKind};

/// Content classification for regular files when data checking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Utf8,
    Binary,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Utf8 => "utf8",
            ContentKind::Binary => "binary",
        }
    }
}

/// Kind of a surviving filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Symlink,
    Hardlink,
    Directory,
}

/// One record per path in the final view of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFile {
    /// 0-based ordinal in manifest layer order.
    pub layer_index: usize,
    /// Absolute path; directory entries keep their trailing slash.
    pub path: String,
    pub kind: FileKind,
    /// Symlink targets may be relative; hardlink targets are absolute.
    pub link_target: Option<String>,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    /// SHA-256 of the file content, when data checking is enabled.
    pub content_hash: Option<String>,
    pub content_kind: Option<ContentKind>,
}

/// Output of a scan: the collapsed file list (sorted by path) and the
/// layer-name to layer-index mapping from the manifest.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub files: Vec<ScanFile>,
    pub layer_indexes: HashMap<String, usize>,
}

/// Scan an image export stream.
///
/// Walks the outer tar collecting `manifest.json` and every `layer.tar`,
/// resolves layer names to indexes through the manifest selected by
/// `name`, and collapses duplicates so the highest layer wins per path.
/// With `check_data`, regular file bodies are hashed (SHA-256) and
/// classified as utf8 or binary.
///
/// # Errors
///
/// Fatal on malformed tar data, a missing or unparsable `manifest.json`,
/// a layer name absent from the manifest, or I/O failure.
pub fn scan_export<R: Read>(reader: R, name: &str, check_data: bool) -> Result<ScanResult> {
    let mut manifests: Option<Vec<Manifest>> = None;
    let mut scanned: Vec<(String, ScanFile)> = Vec::new();

    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !matches!(
            tar_stream::classify(entry.header().entry_type()),
            EntryKind::Regular
        ) {
            continue;
        }
        let entry_name = tar_stream::entry_name(&entry);
        if entry_name == "manifest.json" {
            let data = tar_stream::read_body(&mut entry)?;
            manifests = Some(serde_json::from_slice(&data)?);
        } else if tar_stream::is_layer_tar(&entry_name) {
            scanned.extend(scan_layer(&entry_name, &mut entry, check_data)?);
        }
    }

    let manifests =
        manifests.ok_or_else(|| TraceError::TarFormat("missing manifest.json".to_string()))?;
    let manifest = manifest::find_manifest(&manifests, name)?;

    let mut layer_indexes = HashMap::new();
    for (index, layer) in manifest.layers.iter().enumerate() {
        layer_indexes.insert(layer.clone(), index);
    }

    let mut files = Vec::with_capacity(scanned.len());
    for (layer, mut file) in scanned {
        let index = *layer_indexes
            .get(&layer)
            .ok_or_else(|| TraceError::LayerNotFound(layer.clone()))?;
        file.layer_index = index;
        files.push(file);
    }

    // Order by layer, then stably by path: for each path the last entry in
    // a run is the one from the highest layer.
    files.sort_by_key(|f| f.layer_index);
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut collapsed: Vec<ScanFile> = Vec::with_capacity(files.len());
    for file in files {
        match collapsed.last_mut() {
            Some(last) if last.path == file.path => *last = file,
            _ => collapsed.push(file),
        }
    }

    Ok(ScanResult {
        files: collapsed,
        layer_indexes,
    })
}

/// Scan one layer tar, emitting `(layer-name, file)` pairs. Entry kinds
/// outside regular/symlink/hardlink/directory are skipped.
fn scan_layer<R: Read>(
    layer: &str,
    reader: &mut R,
    check_data: bool,
) -> Result<Vec<(String, ScanFile)>> {
    let mut result = Vec::new();
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = entry.header();
        let kind = match tar_stream::classify(header.entry_type()) {
            EntryKind::Regular => FileKind::Regular,
            EntryKind::Symlink => FileKind::Symlink,
            EntryKind::Hardlink => FileKind::Hardlink,
            EntryKind::Directory => FileKind::Directory,
            EntryKind::Other => {
                tracing::debug!(
                    entry = %tar_stream::entry_name(&entry),
                    "skipping unsupported tar entry kind"
                );
                continue;
            }
        };
        let path = format!("/{}", tar_stream::entry_name(&entry));
        let mode = header.mode()?;
        let size = header.size()?;
        let mtime = header.mtime()?;
        let uid = header.uid()?;
        let gid = header.gid()?;
        let link_target = match kind {
            // Hardlink targets name another archive member; anchor them.
            FileKind::Hardlink => tar_stream::link_target(&entry).map(|t| format!("/{t}")),
            FileKind::Symlink => tar_stream::link_target(&entry),
            _ => None,
        };

        let (content_hash, content_kind) = if check_data && kind == FileKind::Regular {
            let data = tar_stream::read_body(&mut entry)?;
            let hash = hex::encode(Sha256::digest(&data));
            let content = if std::str::from_utf8(&data).is_ok() {
                ContentKind::Utf8
            } else {
                ContentKind::Binary
            };
            (Some(hash), Some(content))
        } else {
            (None, None)
        };

        result.push((
            layer.to_string(),
            ScanFile {
                layer_index: 0,
                path,
                kind,
                link_target,
                mode,
                size,
                mtime,
                uid,
                gid,
                content_hash,
                content_kind,
            },
        ));
    }
    Ok(result)
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Helpers that synthesize image exports in memory for tests.

    use std::io::Cursor;

    /// An entry for a synthetic layer tar.
    pub enum Item<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        Hardlink(&'a str, &'a str),
    }

    /// Build a layer tar from items.
    pub fn layer_tar(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for item in items {
            match item {
                Item::File(name, content) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_uid(0);
                    header.set_gid(0);
                    header.set_cksum();
                    builder.append_data(&mut header, name, *content).unwrap();
                }
                Item::Dir(name) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_uid(0);
                    header.set_gid(0);
                    header.set_cksum();
                    builder
                        .append_data(&mut header, *name, std::io::empty())
                        .unwrap();
                }
                Item::Symlink(name, target) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_uid(0);
                    header.set_gid(0);
                    builder.append_link(&mut header, name, target).unwrap();
                }
                Item::Hardlink(name, target) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Link);
                    header.set_size(0);
                    header.set_mode(0o644);
                    header.set_uid(0);
                    header.set_gid(0);
                    builder.append_link(&mut header, name, target).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    /// Build an export tar: `manifest.json` plus `<layer-name>` entries.
    pub fn export_tar(manifest_json: &str, layers: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest_json.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder
            .append_data(&mut header, "manifest.json", manifest_json.as_bytes())
            .unwrap();
        for (name, data) in layers {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder
                .append_data(&mut header, *name, Cursor::new(data.clone()))
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// Two-layer export where layer 1 overwrites `/a` and adds a symlink
    /// chain; mirrors the shape of a real `docker save` stream.
    pub fn two_layer_export() -> Vec<u8> {
        let layer0 = layer_tar(&[
            Item::Dir("etc/"),
            Item::File("a", b"0123456789"),
            Item::File("etc/hosts", b"127.0.0.1 localhost\n"),
        ]);
        let layer1 = layer_tar(&[
            Item::File("a", b"01234567890123456789"),
            Item::Dir("usr/"),
            Item::Dir("usr/bin/"),
            Item::Symlink("usr/bin/python3", "python3.11"),
            Item::File("usr/bin/python3.11", b"\x7fELF"),
        ]);
        let manifest = r#"[{"Config":"cfg.json","RepoTags":["app:latest"],"Layers":["l0/layer.tar","l1/layer.tar"]}]"#;
        export_tar(manifest, &[("l0/layer.tar", layer0), ("l1/layer.tar", layer1)])
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{export_tar, layer_tar, two_layer_export, Item};
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scan_highest_layer_wins() {
        let export = two_layer_export();
        let result = scan_export(Cursor::new(export), "app:latest", false).unwrap();

        let a: Vec<&ScanFile> = result.files.iter().filter(|f| f.path == "/a").collect();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].size, 20);
        assert_eq!(a[0].layer_index, 1);
    }

    #[test]
    fn test_scan_paths_are_unique_and_sorted() {
        let export = two_layer_export();
        let result = scan_export(Cursor::new(export), "app:latest", false).unwrap();

        let mut paths: Vec<&str> = result.files.iter().map(|f| f.path.as_str()).collect();
        let original = paths.clone();
        paths.sort();
        paths.dedup();
        assert_eq!(paths, original);
    }

    #[test]
    fn test_scan_is_deterministic() {
        let export = two_layer_export();
        let first = scan_export(Cursor::new(export.clone()), "app:latest", false).unwrap();
        let second = scan_export(Cursor::new(export), "app:latest", false).unwrap();
        assert_eq!(first.files, second.files);
    }

    #[test]
    fn test_scan_records_symlinks_and_layer_map() {
        let export = two_layer_export();
        let result = scan_export(Cursor::new(export), "app:latest", false).unwrap();

        let link = result
            .files
            .iter()
            .find(|f| f.path == "/usr/bin/python3")
            .unwrap();
        assert_eq!(link.kind, FileKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("python3.11"));

        assert_eq!(result.layer_indexes["l0/layer.tar"], 0);
        assert_eq!(result.layer_indexes["l1/layer.tar"], 1);
    }

    #[test]
    fn test_scan_check_data_hashes_and_classifies() {
        let layer0 = layer_tar(&[
            Item::File("hello.txt", b"hello"),
            Item::File("blob.bin", &[0xff, 0xfe, 0x00, 0x01]),
        ]);
        let manifest = r#"[{"Config":"cfg.json","RepoTags":["app:latest"],"Layers":["l0/layer.tar"]}]"#;
        let export = export_tar(manifest, &[("l0/layer.tar", layer0)]);
        let result = scan_export(Cursor::new(export), "app:latest", true).unwrap();

        let hello = result.files.iter().find(|f| f.path == "/hello.txt").unwrap();
        assert_eq!(
            hello.content_hash.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(hello.content_kind, Some(ContentKind::Utf8));

        let blob = result.files.iter().find(|f| f.path == "/blob.bin").unwrap();
        assert_eq!(blob.content_kind, Some(ContentKind::Binary));
    }

    #[test]
    fn test_scan_unresolved_layer_is_fatal() {
        let layer0 = layer_tar(&[Item::File("a", b"x")]);
        let manifest = r#"[{"Config":"cfg.json","RepoTags":["app:latest"],"Layers":["other/layer.tar"]}]"#;
        let export = export_tar(manifest, &[("l0/layer.tar", layer0)]);
        let result = scan_export(Cursor::new(export), "app:latest", false);
        assert!(matches!(result, Err(TraceError::LayerNotFound(_))));
    }

    #[test]
    fn test_scan_missing_manifest_is_fatal() {
        let layer0 = layer_tar(&[Item::File("a", b"x")]);
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(layer0.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder
            .append_data(&mut header, "l0/layer.tar", Cursor::new(layer0))
            .unwrap();
        let export = builder.into_inner().unwrap();

        let result = scan_export(Cursor::new(export), "app:latest", false);
        assert!(matches!(result, Err(TraceError::TarFormat(_))));
    }

    #[test]
    fn test_whiteout_entries_are_kept_verbatim() {
        // Deletion markers are not applied in this cut: the marker file
        // itself survives the scan and the shadowed path stays visible.
        let layer0 = layer_tar(&[Item::File("opt/tool", b"v1")]);
        let layer1 = layer_tar(&[Item::File("opt/.wh.tool", b"")]);
        let manifest = r#"[{"Config":"cfg.json","RepoTags":["app:latest"],"Layers":["l0/layer.tar","l1/layer.tar"]}]"#;
        let export = export_tar(manifest, &[("l0/layer.tar", layer0), ("l1/layer.tar", layer1)]);
        let result = scan_export(Cursor::new(export), "app:latest", false).unwrap();

        assert!(result.files.iter().any(|f| f.path == "/opt/tool"));
        assert!(result.files.iter().any(|f| f.path == "/opt/.wh.tool"));
    }
}
