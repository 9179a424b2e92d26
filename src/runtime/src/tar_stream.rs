//! Streaming tar helpers shared by the scanner and the minifier.
//!
//! Image exports are consumed as a forward-only stream: a body is only
//! valid until the iterator advances, so callers read or skip each entry
//! eagerly. Layer tars are nested inside the export and are read directly
//! off the outer entry without buffering the whole layer.

use std::io::Read;

use docker_trace_core::pathutil;
use docker_trace_core::Result;

/// Tar entry classification independent of the on-disk type flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Symlink,
    Hardlink,
    Directory,
    /// FIFOs, devices, and other flags the pipeline ignores.
    Other,
}

/// Classify a tar entry type.
pub fn classify(entry_type: tar::EntryType) -> EntryKind {
    if entry_type.is_file() {
        EntryKind::Regular
    } else if entry_type.is_symlink() {
        EntryKind::Symlink
    } else if entry_type.is_hard_link() {
        EntryKind::Hardlink
    } else if entry_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::Other
    }
}

/// Entry name as stored in the archive (long-name extensions resolved).
pub fn entry_name<R: Read>(entry: &tar::Entry<R>) -> String {
    String::from_utf8_lossy(&entry.path_bytes()).into_owned()
}

/// Entry name as an absolute container path with `/./` collapsed, the form
/// used as the key for include-set lookups.
pub fn absolute_name<R: Read>(entry: &tar::Entry<R>) -> String {
    format!("/{}", entry_name(entry)).replace("/./", "/")
}

/// Link target for symlink and hardlink entries.
pub fn link_target<R: Read>(entry: &tar::Entry<R>) -> Option<String> {
    entry
        .link_name_bytes()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Whether an outer export entry is a layer tar. Both legacy and BuildKit
/// exports store layers as `<dir>/layer.tar`, so only the basename counts.
pub fn is_layer_tar(name: &str) -> bool {
    pathutil::base(name) == "layer.tar"
}

/// Drain an entry body into memory.
pub fn read_body<R: Read>(entry: &mut tar::Entry<R>) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}
