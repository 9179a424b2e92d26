//! Selective rewrite of an image export into the minified payload tar.
//!
//! The export is walked a second time; within each layer only entries
//! whose normalized path is in the include map AND whose layer of origin
//! matches the winning layer are copied through. The layer check keeps an
//! earlier layer's copy of a path from resurfacing under a later winner.

use std::collections::HashMap;
use std::io::{Read, Write};

use docker_trace_core::{Result, TraceError};

use crate::scan::ScanFile;
use crate::tar_stream::{self, EntryKind};

/// Rewrite `reader` (an image export stream) into a single flat tar on
/// `writer` containing only the included entries. Returns the writer after
/// the archive trailer is flushed.
pub fn rewrite_export<R: Read, W: Write>(
    reader: R,
    writer: W,
    layer_indexes: &HashMap<String, usize>,
    include_files: &HashMap<String, ScanFile>,
) -> Result<W> {
    let mut archive = tar::Archive::new(reader);
    let mut builder = tar::Builder::new(writer);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !matches!(
            tar_stream::classify(entry.header().entry_type()),
            EntryKind::Regular
        ) {
            continue;
        }
        let name = tar_stream::entry_name(&entry);
        if !tar_stream::is_layer_tar(&name) {
            continue;
        }
        let layer_index = *layer_indexes
            .get(&name)
            .ok_or_else(|| TraceError::LayerNotFound(name.clone()))?;
        rewrite_layer(layer_index, &mut entry, &mut builder, include_files)?;
        tracing::info!(layer = %name, "minified layer");
    }
    Ok(builder.into_inner()?)
}

fn rewrite_layer<R: Read, W: Write>(
    layer_index: usize,
    reader: &mut R,
    builder: &mut tar::Builder<W>,
    include_files: &HashMap<String, ScanFile>,
) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let abs = tar_stream::absolute_name(&entry);
        let Some(file) = include_files.get(&abs) else {
            continue;
        };
        if file.layer_index != layer_index {
            continue;
        }

        let mut header = entry.header().clone();
        let name = tar_stream::entry_name(&entry);
        match tar_stream::classify(header.entry_type()) {
            EntryKind::Regular | EntryKind::Directory => {
                let data = tar_stream::read_body(&mut entry)?;
                builder.append_data(&mut header, &name, data.as_slice())?;
            }
            EntryKind::Symlink | EntryKind::Hardlink => {
                let target = tar_stream::link_target(&entry).ok_or_else(|| {
                    TraceError::TarFormat(format!("link entry without target: {abs}"))
                })?;
                builder.append_link(&mut header, &name, &target)?;
            }
            EntryKind::Other => {
                return Err(TraceError::TarFormat(format!(
                    "unsupported entry kind in minified layer: {abs}"
                )));
            }
        }
    }
    Ok(())
}
