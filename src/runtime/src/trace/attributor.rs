//! Attribution of traced filesystem accesses to containers.
//!
//! The attributor owns two tables: per-pid working directories and the
//! cgroup-id to container-id mapping. It is strictly sequential: events
//! must be handled in receipt order so that a `chdir` is observed before
//! any later relative access by the same pid.

use std::collections::HashMap;
use std::io::Write;

use docker_trace_core::pathutil;

use super::event::TraceEvent;

/// Container ids are the 64-hex suffix of `docker-<id>.scope` cgroup
/// directories.
const CONTAINER_ID_LEN: usize = 64;

/// Sequential trace-event consumer emitting `<container-id> <abs-path>`
/// lines.
#[derive(Debug, Default)]
pub struct Attributor {
    /// pid -> current working directory.
    cwds: HashMap<String, String>,
    /// cgroup id -> container id.
    cgroups: HashMap<String, String>,
}

impl Attributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one event, writing an attribution line for successful
    /// accesses inside tracked containers.
    ///
    /// `cgroup_mkdir` events register the container and emit nothing.
    /// Events from untracked cgroups, failed syscalls, and empty paths are
    /// ignored. Relative paths are resolved against the pid's working
    /// directory, inherited from the parent on first sighting.
    pub fn handle<W: Write>(&mut self, event: &TraceEvent, out: &mut W) -> std::io::Result<()> {
        if event.syscall == "cgroup_mkdir" {
            if let Some(container_id) = container_id_from_scope(&event.file) {
                self.cgroups
                    .insert(event.cgroup_id.clone(), container_id.to_string());
            }
            return Ok(());
        }

        let Some(container_id) = self.cgroups.get(&event.cgroup_id) else {
            return Ok(());
        };
        if event.errno != "0" || event.file.is_empty() {
            return Ok(());
        }

        if !self.cwds.contains_key(&event.pid) {
            let inherited = self
                .cwds
                .get(&event.ppid)
                .cloned()
                .unwrap_or_else(|| "/".to_string());
            self.cwds.insert(event.pid.clone(), inherited);
        }

        let mut file = event.file.clone();
        if event.syscall == "chdir" {
            if !file.starts_with('/') {
                file = pathutil::join(&self.cwds[&event.pid], &file);
            }
            self.cwds.insert(event.pid.clone(), file.clone());
        } else if !file.starts_with('/') {
            file = pathutil::join(&self.cwds[&event.pid], &file);
        }

        writeln!(out, "{container_id} {file}")
    }

    /// Number of tracked containers, for progress logging.
    pub fn tracked_containers(&self) -> usize {
        self.cgroups.len()
    }
}

/// Extract the container id from a cgroup directory path whose final
/// segment is `docker-<64 hex>.scope`.
fn container_id_from_scope(path: &str) -> Option<&str> {
    let segment = pathutil::base(path);
    let id = segment.strip_prefix("docker-")?.strip_suffix(".scope")?;
    if id.len() == CONTAINER_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(id)
    } else {
        None
    }
}
