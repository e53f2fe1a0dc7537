//! Per-maintainer upload staging scan: `!ready` mtime gating, remove-file
//! handling, legacy-hint fixups, and authorization checks.
//!
//! Grounded on `original_source/calm/uploads.py::scan/remove/auth_check`.

use crate::maintainers::Maintainer;
use crate::model::PackageSet;
use crate::movelist::MoveList;
use crate::repo_scanner;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// reminders are issued at most once a week
const REMINDER_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 7);
/// a file isn't nagged about until it's been sitting for an hour
const REMINDER_GRACE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
pub struct ScanResult {
    pub error: bool,
    pub packages: PackageSet,
    pub to_relarea: MoveList,
    pub to_vault: MoveList,
    pub remove_always: Vec<PathBuf>,
    pub remove_success: Vec<PathBuf>,
}

/// Walk one maintainer's `<scandir>/<name>/<arch>/` staging tree.
pub fn scan(
    scandir: &Path,
    maintainer: &mut Maintainer,
    all_packages: &HashSet<String>,
    trusted_maintainers: &[String],
    arch: &str,
    rel_area: &Path,
    dry_run: bool,
) -> ScanResult {
    let homedir = scandir.join(&maintainer.name);
    let basedir = homedir.join(arch);

    let mut result = ScanResult {
        to_relarea: MoveList::new(),
        ..Default::default()
    };

    // mtime stack: shortest-to-longest matching relative-path prefixes, the
    // way a top-down directory walk discovers nested `!ready` files.
    let mut mtimes: Vec<(String, SystemTime)> = vec![(String::new(), SystemTime::UNIX_EPOCH)];
    let mut ignored = 0usize;

    for ready in [basedir.join("!ready"), basedir.join("release").join("!ready")] {
        if let Ok(meta) = std::fs::metadata(&ready) {
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            mtimes.push((String::new(), mtime));
            result.remove_always.push(ready);
        }
    }

    let release_root = basedir.join("release");
    let mut dirs = vec![release_root.clone()];
    while let Some(dir) = dirs.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(path);
            } else {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.ends_with(".bak") {
                    files.push(path);
                }
            }
        }

        let relpath = dir.strip_prefix(&homedir).unwrap_or(&dir).to_string_lossy().to_string();
        if files.is_empty() || dir == release_root {
            continue;
        }

        let mtime = if let Some(ready_idx) = files.iter().position(|f| f.file_name().unwrap() == "!ready") {
            let ready = files.remove(ready_idx);
            let mtime = std::fs::metadata(&ready)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            mtimes.push((format!("{relpath}/"), mtime));
            result.remove_always.push(ready);
            mtime
        } else {
            loop {
                let (prefix, mtime) = mtimes.last().cloned().unwrap();
                if relpath.starts_with(&prefix) {
                    break mtime;
                }
                mtimes.pop();
            }
        };

        files.retain(|f| {
            let file_mtime = std::fs::metadata(f).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
            if file_mtime <= mtime {
                return true;
            }
            if mtime == SystemTime::UNIX_EPOCH {
                maintainer.reminders_timestamp_checked = true;
                if file_mtime < SystemTime::now() - REMINDER_GRACE {
                    ignored += 1;
                }
            } else {
                tracing::warn!(file = %f.display(), "ignoring file newer than !ready");
            }
            false
        });
        if files.is_empty() {
            continue;
        }

        // relpath is `<arch>/release/<pkgpath>`; pkgpath is everything past
        // the first two components.
        let Some(pkgpath) = relpath.splitn(3, '/').nth(2) else { continue };
        let superpackage = pkgpath.split('/').next().unwrap_or(pkgpath);
        if !all_packages.contains(superpackage) {
            tracing::error!(package = superpackage, "not in the package list");
            continue;
        }
        if !maintainer.pkgs.iter().any(|p| p == superpackage) && !trusted_maintainers.contains(&maintainer.name) {
            tracing::warn!(package = superpackage, maintainer = %maintainer.name, "not authorized for this package path");
            continue;
        }

        fixup_setup_hint(&dir, &mut files, &mut result.error);
        fixup_missing_src_hint(&dir, &mut files);

        let mut keep: Vec<PathBuf> = Vec::new();
        for f in files {
            let filename = f.file_name().unwrap().to_string_lossy().to_string();

            if filename == "!mail" || filename == "!email" {
                continue;
            }
            if filename.contains(".SftpXFR.") {
                continue;
            }

            if let Some(target) = filename.strip_prefix('-') {
                if target.contains('*') || target.contains('?') {
                    tracing::error!(file = %f.display(), "remove-file name contains metacharacters");
                    result.error = true;
                } else if std::fs::metadata(&f).map(|m| m.len()).unwrap_or(0) != 0 {
                    tracing::error!(file = %f.display(), "remove-file is not empty");
                    result.error = true;
                } else {
                    result.to_vault.add(relpath.as_str(), target);
                    result.remove_success.push(f.clone());
                }
                continue;
            }

            if repo_scanner::is_archive_filename(&filename) && !archive_is_valid(&f, &filename) {
                tracing::error!(file = %f.display(), "invalid archive, discarding");
                continue;
            }

            let dest = rel_area.join(&relpath).join(&filename);
            if dest.is_file() {
                if filename.ends_with(".hint") {
                    // hints are always re-considered for move, identical or not
                    keep.push(f);
                } else if files_identical(&dest, &f) {
                    result.remove_success.push(f);
                } else {
                    tracing::error!(file = %f.display(), "different file already in release area");
                    result.remove_always.push(f);
                    result.error = true;
                }
                continue;
            }

            keep.push(f);
        }
        for f in &keep {
            let filename = f.file_name().unwrap().to_string_lossy().to_string();
            result.to_relarea.add(relpath.as_str(), filename.as_str());
        }

        if !keep.is_empty() {
            let mut scan_errors = repo_scanner::ScanErrors::default();
            let (binary, source) = repo_scanner::read_package_dir(&dir, pkgpath, &mut scan_errors);
            if !scan_errors.is_ok() {
                result.error = true;
                for m in &scan_errors.messages {
                    tracing::error!(%m, "upload validation error");
                }
            }
            if let Some(p) = binary {
                result.packages.insert(p);
            }
            if let Some(p) = source {
                result.packages.insert(p);
            }
        }
    }

    if dry_run {
        maintainer.reminders_timestamp_checked = true;
    }
    if ignored > 0 {
        let due = maintainer
            .reminder_time
            .map(|t| SystemTime::now() > t + REMINDER_INTERVAL)
            .unwrap_or(true);
        if due {
            tracing::warn!(count = ignored, arch, "ignored files with no !ready present");
            if !dry_run {
                maintainer.reminders_issued = true;
            }
        }
    }

    result
}

/// Legacy `setup.hint` is renamed to `<pvr>.hint` if exactly one package's
/// version-release can be inferred from the sibling archive names.
fn fixup_setup_hint(dir: &Path, files: &mut Vec<PathBuf>, error: &mut bool) {
    let Some(idx) = files.iter().position(|f| f.file_name().unwrap() == "setup.hint") else { return };

    let mut pvr: Option<String> = None;
    let mut ambiguous = false;
    for f in files.iter() {
        let name = f.file_name().unwrap().to_string_lossy().to_string();
        if let Some(candidate) = repo_scanner::pvr_from_archive_name(&name) {
            if pvr.as_ref().is_some_and(|p| p != &candidate) {
                ambiguous = true;
            }
            pvr = Some(candidate);
        }
    }

    tracing::warn!(dir = %dir.display(), "'setup.hint' seen, please update to a current cygport");
    if ambiguous || pvr.is_none() {
        tracing::error!(dir = %dir.display(), "couldn't determine what version 'setup.hint' applies to");
        *error = true;
        return;
    }

    let old = files.remove(idx);
    let new = dir.join(format!("{}.hint", pvr.unwrap()));
    if std::fs::rename(&old, &new).is_ok() {
        files.push(new);
    }
}

/// If a `-src` archive exists without a matching `-src.hint`, synthesize one
/// by copying the binary hint (if the binary archive itself was dropped).
fn fixup_missing_src_hint(dir: &Path, files: &mut Vec<PathBuf>) {
    let names: Vec<String> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
        .collect();

    for name in &names {
        let Some(pvr) = repo_scanner::pvr_from_src_archive_name(name) else { continue };
        let old = format!("{pvr}.hint");
        let new = format!("{pvr}-src.hint");
        if names.contains(&old) && !names.contains(&new) {
            tracing::warn!(%old, %new, "copying hint for missing -src.hint");
            if std::fs::copy(dir.join(&old), dir.join(&new)).is_ok() {
                files.push(dir.join(&new));
                let binary_archive = name.replace("-src", "");
                if !names.contains(&binary_archive) {
                    tracing::info!(%old, "discarding, binary archive absent");
                    let _ = std::fs::remove_file(dir.join(&old));
                    files.retain(|f| f.file_name().unwrap().to_string_lossy() != old);
                }
            }
        }
    }
}

fn archive_is_valid(path: &Path, filename: &str) -> bool {
    repo_scanner::archive_member_count(path, filename).is_some()
}

fn files_identical(a: &Path, b: &Path) -> bool {
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Remove every file queued for unconditional deletion, logging (not
/// failing) a missing file.
pub fn remove(files: &[PathBuf], dry_run: bool) {
    for f in files {
        tracing::debug!(file = %f.display(), "rm");
        if dry_run {
            continue;
        }
        if let Err(e) = std::fs::remove_file(f) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(file = %f.display(), error = %e, "couldn't remove file");
            } else {
                tracing::error!(file = %f.display(), "can't be deleted, it doesn't exist");
            }
        }
    }
}

/// A package upload at a new path is only allowed if the maintainer is also
/// authorized for every existing path that package is currently filed under.
pub fn auth_check(
    maintainer: &Maintainer,
    trusted_maintainers: &[String],
    result: &mut ScanResult,
    existing_paths: &HashMap<String, Vec<String>>,
) {
    if trusted_maintainers.contains(&maintainer.name) {
        return;
    }

    for name in result.packages.packages.keys() {
        let Some(auth_paths) = existing_paths.get(name) else { continue };
        for ap in auth_paths {
            if !maintainer.pkgs.iter().any(|p| p == ap) {
                tracing::error!(
                    package = name,
                    path = ap,
                    maintainer = %maintainer.name,
                    "needs authorization not in the package list"
                );
                result.error = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn maint(name: &str, pkgs: &[&str]) -> Maintainer {
        Maintainer {
            name: name.to_string(),
            pkgs: pkgs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn files_without_ready_are_ignored_but_counted() {
        let dir = TempDir::new().unwrap();
        let pkgdir = dir.path().join("alice/x86_64/release/foo");
        std::fs::create_dir_all(&pkgdir).unwrap();
        std::fs::write(pkgdir.join("foo-1.0-1.tar.xz"), vec![0u8; 100]).unwrap();

        let mut m = maint("alice", &["foo"]);
        let all: HashSet<String> = ["foo".to_string()].into_iter().collect();
        let rel_area = dir.path().join("rel");
        std::fs::create_dir_all(&rel_area).unwrap();

        let result = scan(dir.path(), &mut m, &all, &[], "x86_64", &rel_area, true);
        assert!(result.to_relarea.is_empty());
    }

    #[test]
    fn ready_marked_files_are_queued_for_move() {
        let dir = TempDir::new().unwrap();
        let pkgdir = dir.path().join("alice/x86_64/release/foo");
        std::fs::create_dir_all(&pkgdir).unwrap();
        std::fs::write(pkgdir.join("foo-1.0-1.tar.xz"), vec![0u8; 2000]).unwrap();
        std::fs::write(pkgdir.join("foo-1.0-1.hint"), "sdesc: \"x\"\ncategory: Libs\n").unwrap();
        std::fs::write(dir.path().join("alice/x86_64/!ready"), "").unwrap();

        let mut m = maint("alice", &["foo"]);
        let all: HashSet<String> = ["foo".to_string()].into_iter().collect();
        let rel_area = dir.path().join("rel");
        std::fs::create_dir_all(&rel_area).unwrap();

        let result = scan(dir.path(), &mut m, &all, &[], "x86_64", &rel_area, true);
        assert!(!result.to_relarea.is_empty(), "{:?}", result.to_relarea);
    }

    #[test]
    fn remove_file_queues_vault_entry() {
        let dir = TempDir::new().unwrap();
        let pkgdir = dir.path().join("alice/x86_64/release/foo");
        std::fs::create_dir_all(&pkgdir).unwrap();
        std::fs::write(pkgdir.join("-foo-1.0-1.tar.xz"), b"").unwrap();
        std::fs::write(dir.path().join("alice/x86_64/!ready"), "").unwrap();

        let mut m = maint("alice", &["foo"]);
        let all: HashSet<String> = ["foo".to_string()].into_iter().collect();
        let rel_area = dir.path().join("rel");
        std::fs::create_dir_all(&rel_area).unwrap();

        let result = scan(dir.path(), &mut m, &all, &[], "x86_64", &rel_area, true);
        assert!(!result.to_vault.is_empty());
    }
}
