//! End-to-end pipeline over a synthesized image export: scan the stream,
//! resolve the symlink closure for a seed set, and rewrite the export into
//! the minified payload tar.

use std::collections::BTreeSet;
use std::io::Cursor;

use docker_trace_runtime::minify::{closure, writer};
use docker_trace_runtime::scan::scan_export;
use docker_trace_runtime::tar_stream;

fn file_entry(builder: &mut tar::Builder<Vec<u8>>, name: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    builder.append_data(&mut header, name, content).unwrap();
}

fn dir_entry(builder: &mut tar::Builder<Vec<u8>>, name: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    builder
        .append_data(&mut header, name, std::io::empty())
        .unwrap();
}

fn symlink_entry(builder: &mut tar::Builder<Vec<u8>>, name: &str, target: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_link(&mut header, name, target).unwrap();
}

/// A small two-layer image: a base layer with shells and the dynamic
/// linker, and an app layer with a python interpreter behind a symlink.
fn sample_export() -> Vec<u8> {
    let mut base = tar::Builder::new(Vec::new());
    dir_entry(&mut base, "bin/");
    dir_entry(&mut base, "usr/");
    dir_entry(&mut base, "usr/bin/");
    dir_entry(&mut base, "lib/");
    file_entry(&mut base, "bin/bash", b"bash-binary");
    file_entry(&mut base, "bin/sh", b"sh-binary");
    file_entry(&mut base, "usr/bin/env", b"env-binary");
    file_entry(&mut base, "lib/ld-musl-x86_64.so.1", b"linker");
    file_entry(&mut base, "etc/hosts", b"127.0.0.1 localhost\n");
    let base = base.into_inner().unwrap();

    let mut app = tar::Builder::new(Vec::new());
    symlink_entry(&mut app, "usr/bin/python3", "python3.11");
    file_entry(&mut app, "usr/bin/python3.11", b"\x7fELF python");
    file_entry(&mut app, "etc/hosts", b"127.0.0.1 localhost app\n");
    file_entry(&mut app, "opt/unused", b"dead weight");
    let app = app.into_inner().unwrap();

    let manifest = r#"[{"Config":"abc.json","RepoTags":["web:latest"],"Layers":["base/layer.tar","app/layer.tar"]}]"#;
    let mut export = tar::Builder::new(Vec::new());
    file_entry(&mut export, "manifest.json", manifest.as_bytes());
    let mut header = tar::Header::new_gnu();
    header.set_size(base.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    export
        .append_data(&mut header, "base/layer.tar", Cursor::new(base))
        .unwrap();
    let mut header = tar::Header::new_gnu();
    header.set_size(app.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    export
        .append_data(&mut header, "app/layer.tar", Cursor::new(app))
        .unwrap();
    export.into_inner().unwrap()
}

fn minify(seeds: &[&str], extra_includes: bool) -> Vec<String> {
    let export = sample_export();
    let scan = scan_export(Cursor::new(export.clone()), "web:latest", false).unwrap();

    let seeds: BTreeSet<String> = seeds.iter().map(|s| s.to_string()).collect();
    let symlinks = closure::symlink_map(&scan.files);
    let mut include = closure::resolve_links(&seeds, &symlinks).unwrap();
    if extra_includes {
        include.extend(closure::safety_net_paths(&scan.files));
    }
    let selected = closure::select_files(&scan.files, &include);

    let payload = writer::rewrite_export(
        Cursor::new(export),
        Vec::new(),
        &scan.layer_indexes,
        &selected,
    )
    .unwrap();

    let mut names = Vec::new();
    let mut archive = tar::Archive::new(Cursor::new(payload));
    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        names.push(tar_stream::entry_name(&entry));
    }
    names
}

#[test]
fn seed_behind_symlink_pulls_link_and_target() {
    let names = minify(&["/usr/bin/python3"], false);
    assert!(names.contains(&"usr/bin/python3".to_string()));
    assert!(names.contains(&"usr/bin/python3.11".to_string()));
    assert!(!names.contains(&"opt/unused".to_string()));
}

#[test]
fn highest_layer_copy_is_the_one_kept() {
    let export = sample_export();
    let scan = scan_export(Cursor::new(export.clone()), "web:latest", false).unwrap();
    let hosts = scan.files.iter().find(|f| f.path == "/etc/hosts").unwrap();
    assert_eq!(hosts.layer_index, 1);
    assert_eq!(hosts.size, b"127.0.0.1 localhost app\n".len() as u64);

    // The payload must carry exactly one copy: the app layer's.
    let include: BTreeSet<String> = ["/etc/hosts".to_string()].into_iter().collect();
    let selected = closure::select_files(&scan.files, &include);
    let payload = writer::rewrite_export(
        Cursor::new(export),
        Vec::new(),
        &scan.layer_indexes,
        &selected,
    )
    .unwrap();
    let mut archive = tar::Archive::new(Cursor::new(payload));
    let mut bodies = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut data).unwrap();
        bodies.push(data);
    }
    assert_eq!(bodies, vec![b"127.0.0.1 localhost app\n".to_vec()]);
}

#[test]
fn empty_seed_set_still_keeps_shells_and_linker() {
    let names = minify(&[], true);
    assert!(names.contains(&"bin/bash".to_string()));
    assert!(names.contains(&"bin/sh".to_string()));
    assert!(names.contains(&"usr/bin/env".to_string()));
    assert!(names.contains(&"lib/ld-musl-x86_64.so.1".to_string()));
    assert!(!names.contains(&"etc/hosts".to_string()));
}

#[test]
fn no_extra_includes_disables_safety_nets() {
    let names = minify(&[], false);
    assert!(names.is_empty());
}

#[test]
fn payload_is_deterministic() {
    let first = minify(&["/usr/bin/python3", "/etc/hosts"], true);
    let second = minify(&["/usr/bin/python3", "/etc/hosts"], true);
    assert_eq!(first, second);
}
