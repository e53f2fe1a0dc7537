//! `setup.ini` text emission, the compressed JSON repository summary, and
//! move-if-changed index writes.
//!
//! Grounded on `original_source/calm/package.py::write_setup_ini/
//! write_repo_json/sort_key` and `calm.py::do_output` (the external
//! compress/sign boundary and move-if-changed semantics).

use crate::model::{Kind, Package, PackageSet};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::Write as _;

/// Packages beginning with `!` sort first, `_` sort last, everything else
/// case-insensitively.
pub fn sort_key(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.chars().next() {
        Some('!') => format!("\u{0}{lower}"),
        Some('_') => format!("\u{10ffff}{lower}"),
        _ => lower,
    }
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Render one arch's `setup.ini` body as a string (header timestamp is the
/// caller's responsibility, via `timestamp`, so the writer stays pure).
pub fn write_setup_ini(set: &PackageSet, arch: &str, release: &str, timestamp: u64) -> String {
    let mut out = String::new();

    writeln!(out, "# This file was automatically generated.").unwrap();
    writeln!(out, "#").unwrap();
    writeln!(out, "# If you edit it, your edits will be discarded next time the file is").unwrap();
    writeln!(out, "# generated.").unwrap();
    writeln!(out, "#").unwrap();
    writeln!(out, "# See https://sourceware.org/cygwin-apps/setup.ini.html for a description").unwrap();
    writeln!(out, "# of the format.").unwrap();
    if !release.is_empty() {
        writeln!(out, "release: {release}").unwrap();
    }
    writeln!(out, "arch: {arch}").unwrap();
    writeln!(out, "setup-timestamp: {timestamp}").unwrap();

    let mut names: Vec<&String> = set.packages.keys().collect();
    names.sort_by_key(|n| sort_key(n));

    for name in names {
        let pkg = &set.packages[name];
        if pkg.kind == Kind::Source || pkg.not_for_output {
            continue;
        }
        write_package_section(&mut out, set, pkg);
    }

    out
}

fn write_package_section(out: &mut String, set: &PackageSet, pkg: &Package) {
    let Some(bv) = &pkg.best_version else { return };
    let Some(hints) = pkg.hints.get(bv) else { return };

    writeln!(out, "\n@ {}", pkg.name).unwrap();
    writeln!(out, "sdesc: {}", hints.sdesc).unwrap();
    if !hints.ldesc.is_empty() {
        writeln!(out, "ldesc: {}", hints.ldesc).unwrap();
    }

    let mut category = hints.category.clone();
    if pkg.orphaned {
        category.push("unmaintained".to_string());
    }
    let category: Vec<String> = category.iter().map(|c| upper_first(c)).collect();
    writeln!(out, "category: {}", category.join(" ")).unwrap();

    if let Some(message) = &hints.message {
        writeln!(out, "message: {message}").unwrap();
    }
    if !pkg.override_hints.replace_versions.is_empty() {
        writeln!(out, "replace-versions: {}", pkg.override_hints.replace_versions.join(", ")).unwrap();
    }

    for (version, tag) in version_sections(pkg) {
        if tag != "curr" {
            writeln!(out, "[{tag}]").unwrap();
        }
        writeln!(out, "version: {version}").unwrap();

        let mut is_empty = false;
        if let Some(tar) = pkg.tars.get(&version) {
            writeln!(out, "install: {} {} {}", tar.path.display(), tar.size, tar.sha512).unwrap();
            is_empty = tar.is_empty;
        }

        let version_hints = pkg.hints.get(&version);
        let src_name = version_hints.and_then(|h| h.external_source.clone());

        if let Some(src) = src_name.as_deref().and_then(|s| set.packages.get(s)) {
            if let Some(src_tar) = src.tars.get(&version) {
                writeln!(out, "source: {} {} {}", src_tar.path.display(), src_tar.size, src_tar.sha512).unwrap();
            } else if !is_empty {
                tracing::warn!(package = %pkg.name, version = %version, source = %src.name, "no matching source");
            }

            if let Some(src_hints) = src.hints.get(&version) {
                let bd: Vec<String> = src_hints
                    .build_depends
                    .iter()
                    .filter(|atom| !atom.contains('('))
                    .cloned()
                    .collect();
                if !bd.is_empty() {
                    writeln!(out, "build-depends: {}", bd.join(", ")).unwrap();
                }
            }
        }

        if let Some(h) = version_hints {
            if pkg.tars.contains_key(&version) {
                if !h.depends.is_empty() {
                    writeln!(out, "depends2: {}", h.depends.join(", ")).unwrap();
                }
                if !h.obsoletes.is_empty() {
                    writeln!(out, "obsoletes: {}", h.obsoletes.join(", ")).unwrap();
                }
                if !h.provides.is_empty() {
                    writeln!(out, "provides: {}", h.provides.join(", ")).unwrap();
                }
                if !h.conflicts.is_empty() {
                    writeln!(out, "conflicts: {}", h.conflicts.join(", ")).unwrap();
                }
            }
        }
    }
}

/// Order: curr (header omitted) first, then other non-curr/prev/test
/// versions descending, then prev, then test last — setup processes
/// sections in order and a later one supersedes an earlier one, so test
/// must always be emitted last.
fn version_sections(pkg: &Package) -> Vec<(String, &'static str)> {
    let mut all_versions: BTreeSet<String> = pkg.tars.keys().cloned().collect();
    all_versions.extend(pkg.hints.keys().cloned());
    let mut versions: Vec<String> = all_versions.into_iter().collect();
    versions.sort_by(|a, b| crate::version::compare(b, a));

    let nontest: Vec<&String> = versions.iter().filter(|v| !pkg.is_test_version(v)).collect();
    let test: Vec<&String> = versions.iter().filter(|v| pkg.is_test_version(v)).collect();

    let curr = nontest.first().cloned();
    let prev = nontest.get(1).cloned();
    let test_version = test.first().cloned();

    let mut sections = Vec::new();
    if let Some(curr) = curr {
        sections.push((curr.clone(), "curr"));
    }
    for v in &versions {
        if Some(v) == curr || Some(v) == prev || Some(v) == test_version {
            continue;
        }
        let tag = if pkg.is_test_version(v) { "test" } else { "prev" };
        sections.push((v.clone(), tag));
    }
    if let Some(prev) = prev {
        sections.push((prev.clone(), "prev"));
    }
    if let Some(test_version) = test_version {
        sections.push((test_version.clone(), "test"));
    }

    sections
}

#[derive(Debug, Serialize)]
struct JsonPackage {
    name: String,
    summary: String,
    categories: Vec<String>,
    versions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct JsonSummary {
    packages: Vec<JsonPackage>,
}

/// Render the repository summary and gzip-compress it (the original uses
/// `lzma`; this pack carries `flate2`/`zstd`, not an xz crate, so gzip
/// substitutes, noted in DESIGN.md).
pub fn write_repo_json_gz(set: &PackageSet) -> std::io::Result<Vec<u8>> {
    let mut names: Vec<&String> = set.packages.keys().collect();
    names.sort_by_key(|n| sort_key(n));

    let packages = names
        .into_iter()
        .filter_map(|name| {
            let pkg = &set.packages[name];
            if pkg.kind == Kind::Source || pkg.not_for_output {
                return None;
            }
            let bv = pkg.best_version.as_ref()?;
            let hints = pkg.hints.get(bv)?;
            Some(JsonPackage {
                name: pkg.name.clone(),
                summary: hints.sdesc.clone(),
                categories: hints.category.clone(),
                versions: pkg.versions_newest_first(),
            })
        })
        .collect();

    let summary = JsonSummary { packages };
    let json = serde_json::to_vec(&summary)?;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&json)?;
    encoder.finish()
}

/// Write `contents` to `path` only if it differs from what's already there,
/// so unrelated tooling (mirrors, etags) doesn't see a spurious mtime bump.
pub fn write_if_changed(path: &std::path::Path, contents: &[u8]) -> std::io::Result<bool> {
    if let Ok(existing) = std::fs::read(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tar, VersionHints};
    use std::path::PathBuf;

    fn binary_pkg(name: &str, version: &str) -> Package {
        let mut pkg = Package::new(name, Kind::Binary, PathBuf::from(name));
        pkg.tars.insert(
            version.to_string(),
            Tar {
                path: PathBuf::from(format!("{name}-{version}.tar.xz")),
                size: 123,
                mtime: std::time::SystemTime::now(),
                sha512: "abc".to_string(),
                is_empty: false,
                is_used: false,
                sourceless: false,
            },
        );
        let mut hints = VersionHints::default();
        hints.sdesc = "\"A package\"".to_string();
        hints.category = vec!["Libs".to_string()];
        pkg.hints.insert(version.to_string(), hints);
        pkg.best_version = Some(version.to_string());
        pkg
    }

    #[test]
    fn sort_key_orders_bang_first_and_underscore_last() {
        let mut names = vec!["zlib", "_obsolete", "!base", "apt"];
        names.sort_by_key(|n| sort_key(n));
        assert_eq!(names, vec!["!base", "apt", "zlib", "_obsolete"]);
    }

    #[test]
    fn setup_ini_includes_package_section() {
        let mut set = PackageSet::new();
        set.insert(binary_pkg("foo", "1.0-1"));

        let ini = write_setup_ini(&set, "x86_64", "calm", 1_700_000_000);
        assert!(ini.contains("@ foo"));
        assert!(ini.contains("version: 1.0-1"));
        assert!(ini.contains("sdesc:"));
    }

    #[test]
    fn not_for_output_package_is_omitted() {
        let mut set = PackageSet::new();
        let mut pkg = binary_pkg("foo", "1.0-1");
        pkg.not_for_output = true;
        set.insert(pkg);

        let ini = write_setup_ini(&set, "x86_64", "calm", 0);
        assert!(!ini.contains("@ foo"));
    }

    #[test]
    fn write_if_changed_skips_identical_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("setup.ini");
        assert!(write_if_changed(&path, b"hello").unwrap());
        assert!(!write_if_changed(&path, b"hello").unwrap());
        assert!(write_if_changed(&path, b"world").unwrap());
    }
}
