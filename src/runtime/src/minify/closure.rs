//! Symlink closure over the include set.
//!
//! A path copied into the minified image is only usable if every symlink
//! on its root-to-leaf chain and every link target is copied too. The
//! resolver expands each seed until no prefix of the (rewritten) path is a
//! symlink anymore, then a safety-net pass force-includes the entries a
//! trace is known to under-report.

use std::collections::{BTreeSet, HashMap, VecDeque};

use docker_trace_core::{pathutil, Result, TraceError};

use crate::scan::{FileKind, ScanFile};

/// Sweeps allowed per seed before a chain is declared unresolvable.
const MAX_SWEEPS: usize = 256;

/// Normalize a path into its include-set key form: `/./` collapsed and the
/// trailing slash of directory entries removed.
pub fn include_key(path: &str) -> String {
    let normalized = path.replace("/./", "/");
    let trimmed = normalized.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extract the symlink map (path -> target) from a scan.
pub fn symlink_map(files: &[ScanFile]) -> HashMap<String, String> {
    files
        .iter()
        .filter(|f| f.kind == FileKind::Symlink)
        .filter_map(|f| {
            f.link_target
                .as_ref()
                .map(|target| (include_key(&f.path), target.clone()))
        })
        .collect()
}

/// Expand `seeds` to the symlink closure: for every member, every symlink
/// on every prefix and its target are added, iterating until each path
/// reaches a fixed point.
///
/// # Errors
///
/// `SymlinkCycle` when a seed fails to stabilize within the sweep bound.
pub fn resolve_links(
    seeds: &BTreeSet<String>,
    symlinks: &HashMap<String, String>,
) -> Result<BTreeSet<String>> {
    let mut resolved: BTreeSet<String> = seeds.clone();
    let mut work: VecDeque<String> = seeds.iter().cloned().collect();

    while let Some(seed) = work.pop_front() {
        let mut path = seed.clone();
        let mut previous = String::new();
        let mut sweeps = 0;
        while previous != path {
            sweeps += 1;
            if sweeps > MAX_SWEEPS {
                return Err(TraceError::SymlinkCycle(seed));
            }
            previous = path.clone();

            let mut parts: Vec<String> = path
                .trim_start_matches('/')
                .split('/')
                .map(|c| c.to_string())
                .collect();
            for i in 0..=parts.len() {
                let prefix = pathutil::clean(&format!("/{}", parts[..i].join("/")));
                let Some(target) = symlinks.get(&prefix) else {
                    continue;
                };
                let target = if target.starts_with('/') {
                    pathutil::clean(target)
                } else {
                    pathutil::join(&pathutil::dir(&prefix), target)
                };
                resolved.insert(prefix);
                resolved.insert(target.clone());
                for part in parts[..i].iter_mut() {
                    part.clear();
                }
                parts[0] = target;
            }

            path = pathutil::clean(&format!("/{}", parts.join("/")));
            resolved.insert(path.clone());
        }
    }
    Ok(resolved)
}

/// Entries always worth keeping regardless of the trace: root-level
/// symlinks, the dynamic linker, and the common shells and launchers.
/// Tracers have been observed to miss the interpreter load, so these
/// compensate; `minify --no-extra-includes` turns them off.
pub fn safety_net_paths(files: &[ScanFile]) -> BTreeSet<String> {
    let mut extra = BTreeSet::new();
    for file in files {
        let name = pathutil::base(&file.path);
        let at_root =
            file.path.split('/').count() == 2 && file.kind == FileKind::Symlink;
        let dynamic_linker =
            file.path.contains("/lib") && name.starts_with("ld-") && file.path.contains(".so");
        let shell = matches!(name, "bash" | "sh" | "env") && file.path.contains("/bin/");
        if at_root || dynamic_linker || shell {
            extra.insert(include_key(&file.path));
        }
    }
    extra
}

/// Select the scan entries whose include-key is in the resolved set,
/// keyed by their normalized full path (directory slashes kept) for the
/// layer rewrite.
pub fn select_files(
    files: &[ScanFile],
    include_paths: &BTreeSet<String>,
) -> HashMap<String, ScanFile> {
    let mut selected = HashMap::new();
    for file in files {
        let path = file.path.replace("/./", "/");
        if include_paths.contains(&include_key(&path)) {
            let mut file = file.clone();
            file.path = path.clone();
            selected.insert(path, file);
        }
    }
    selected
}
