//! Tracer event line parsing.
//!
//! The tracer prints one tab-delimited record per syscall exit:
//! `syscall\tcgroup-id\tpid\tppid\tcomm\terrno\tfile`. `cgroup_mkdir`
//! records reuse the layout with the cgroup directory path in the file
//! column.

/// One parsed tracer record. Fields stay textual: pids and cgroup ids are
/// only ever used as map keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub syscall: String,
    pub cgroup_id: String,
    pub pid: String,
    pub ppid: String,
    pub comm: String,
    pub errno: String,
    pub file: String,
}

/// A graph-driver path rewrite: everything up to and including `marker`
/// plus the next `skip` components is replaced by `/`.
#[derive(Debug, Clone, Copy)]
pub struct StripRule {
    pub marker: &'static str,
    pub skip: usize,
}

/// Built-in rules for the storage drivers seen in the wild. Both are
/// driver-specific by nature; callers with other drivers substitute their
/// own table.
pub const GRAPH_DRIVER_RULES: &[StripRule] = &[
    // /var/lib/docker/overlay2/<id>/merged/<path>
    StripRule {
        marker: "/overlay2/",
        skip: 2,
    },
    // /var/lib/docker/zfs/graph/<id>/<path>
    StripRule {
        marker: "/zfs/graph/",
        skip: 1,
    },
];

/// Parse one tracer line (without trailing newline) using the built-in
/// strip rules. Short lines are dropped with a warning; the pipeline never
/// terminates on malformed input.
pub fn parse_line(line: &str) -> Option<TraceEvent> {
    parse_line_with_rules(line, GRAPH_DRIVER_RULES)
}

/// Parse one tracer line with a caller-provided strip table.
pub fn parse_line_with_rules(line: &str, rules: &[StripRule]) -> Option<TraceEvent> {
    let mut fields = line.splitn(7, '\t');
    let event = TraceEvent {
        syscall: fields.next()?.to_string(),
        cgroup_id: fields.next()?.to_string(),
        pid: fields.next()?.to_string(),
        ppid: fields.next()?.to_string(),
        comm: fields.next()?.to_string(),
        errno: fields.next()?.to_string(),
        file: match fields.next() {
            Some(file) => strip_graph_driver(file, rules),
            None => {
                tracing::warn!(line, "dropping short tracer line");
                return None;
            }
        },
    };
    Some(event)
}

/// Rewrite a host-side graph-driver path back to the container-internal
/// path. Paths without a known marker pass through unchanged.
pub fn strip_graph_driver(file: &str, rules: &[StripRule]) -> String {
    for rule in rules {
        if let Some(idx) = file.find(rule.marker) {
            let tail = &file[idx + rule.marker.len()..];
            let rest = tail.splitn(rule.skip + 1, '/').nth(rule.skip).unwrap_or("");
            return format!("/{rest}");
        }
    }
    file.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let event = parse_line("openat\t1234\t10\t1\tcat\t0\t/etc/hosts").unwrap();
        assert_eq!(event.syscall, "openat");
        assert_eq!(event.cgroup_id, "1234");
        assert_eq!(event.pid, "10");
        assert_eq!(event.ppid, "1");
        assert_eq!(event.comm, "cat");
        assert_eq!(event.errno, "0");
        assert_eq!(event.file, "/etc/hosts");
    }

    #[test]
    fn test_parse_line_short_line_dropped() {
        assert!(parse_line("openat\t1234\t10").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_parse_cgroup_mkdir_layout() {
        let event = parse_line("cgroup_mkdir\t5678\t\t\t\t\t/sys/fs/cgroup/system.slice/docker-aa.scope").unwrap();
        assert_eq!(event.syscall, "cgroup_mkdir");
        assert_eq!(event.cgroup_id, "5678");
        assert_eq!(event.pid, "");
        assert_eq!(event.file, "/sys/fs/cgroup/system.slice/docker-aa.scope");
    }

    #[test]
    fn test_strip_overlay2() {
        let stripped = strip_graph_driver(
            "/var/lib/docker/overlay2/3f2a/merged/etc/hosts",
            GRAPH_DRIVER_RULES,
        );
        assert_eq!(stripped, "/etc/hosts");
    }

    #[test]
    fn test_strip_zfs_graph() {
        let stripped = strip_graph_driver(
            "/var/lib/docker/zfs/graph/3f2a/usr/bin/env",
            GRAPH_DRIVER_RULES,
        );
        assert_eq!(stripped, "/usr/bin/env");
    }

    #[test]
    fn test_strip_passthrough() {
        assert_eq!(
            strip_graph_driver("/etc/hosts", GRAPH_DRIVER_RULES),
            "/etc/hosts"
        );
        assert_eq!(strip_graph_driver("hosts", GRAPH_DRIVER_RULES), "hosts");
    }
}
