//! A set of (relative-directory, filename) pairs, with operations for
//! building up file-move/copy plans and executing them against the
//! filesystem.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct MoveList {
    entries: HashMap<PathBuf, HashSet<String>>,
}

impl MoveList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|files| files.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|f| f.len()).sum()
    }

    pub fn add(&mut self, dir: impl Into<PathBuf>, file: impl Into<String>) {
        self.entries
            .entry(dir.into())
            .or_default()
            .insert(file.into());
    }

    pub fn remove(&mut self, dir: &Path) {
        self.entries.remove(dir);
    }

    pub fn remove_file(&mut self, dir: &Path, file: &str) {
        if let Some(files) = self.entries.get_mut(dir) {
            files.remove(file);
            if files.is_empty() {
                self.entries.remove(dir);
            }
        }
    }

    pub fn contains(&self, dir: &Path, file: &str) -> bool {
        self.entries
            .get(dir)
            .map(|files| files.contains(file))
            .unwrap_or(false)
    }

    /// Iterate (dir, file) pairs in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        let mut dirs: Vec<&PathBuf> = self.entries.keys().collect();
        dirs.sort();
        dirs.into_iter().flat_map(|dir| {
            let mut files: Vec<&String> = self.entries[dir].iter().collect();
            files.sort();
            files
                .into_iter()
                .map(move |f| (dir.as_path(), f.as_str()))
        })
    }

    pub fn map(&self, mut f: impl FnMut(&Path, &str)) {
        for (dir, file) in self.iter() {
            f(dir, file);
        }
    }

    /// Pairwise intersection on (dir, file).
    pub fn intersect(a: &MoveList, b: &MoveList) -> MoveList {
        let mut out = MoveList::new();
        for (dir, files) in &a.entries {
            if let Some(other_files) = b.entries.get(dir) {
                for f in files.intersection(other_files) {
                    out.add(dir.clone(), f.clone());
                }
            }
        }
        out
    }

    fn relocate(
        &self,
        from_base: &Path,
        to_base: &Path,
        copy: bool,
        dry_run: bool,
    ) -> std::io::Result<()> {
        for (dir, file) in self.iter() {
            // `dir` may already be an absolute path rooted at `from_base`
            // (as built by a filesystem walk); rebase it relative to
            // `from_base` before re-rooting it under `to_base`, so a move
            // across roots doesn't collapse onto the source directory.
            let rel = dir.strip_prefix(from_base).unwrap_or(dir);
            let src = from_base.join(rel).join(file);
            let dst_dir = to_base.join(rel);
            let dst = dst_dir.join(file);

            if !src.exists() {
                tracing::error!(path = %src.display(), "move source does not exist");
                continue;
            }

            if dry_run {
                tracing::info!(src = %src.display(), dst = %dst.display(), copy, "dry-run: would relocate");
                continue;
            }

            std::fs::create_dir_all(&dst_dir)?;
            if copy {
                std::fs::copy(&src, &dst)?;
                tracing::info!(src = %src.display(), dst = %dst.display(), "copied");
            } else {
                std::fs::rename(&src, &dst)?;
                tracing::info!(src = %src.display(), dst = %dst.display(), "moved");
            }
        }
        Ok(())
    }

    pub fn apply_move(
        &self,
        from_base: &Path,
        to_base: &Path,
        dry_run: bool,
    ) -> std::io::Result<()> {
        self.relocate(from_base, to_base, false, dry_run)
    }

    pub fn apply_copy(
        &self,
        from_base: &Path,
        to_base: &Path,
        dry_run: bool,
    ) -> std::io::Result<()> {
        self.relocate(from_base, to_base, true, dry_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_remove_and_empty() {
        let mut ml = MoveList::new();
        assert!(ml.is_empty());
        ml.add("foo", "foo-1.0-1.tar.xz");
        assert!(!ml.is_empty());
        assert_eq!(ml.len(), 1);
        ml.remove_file(Path::new("foo"), "foo-1.0-1.tar.xz");
        assert!(ml.is_empty());
    }

    #[test]
    fn intersect_finds_shared_entries() {
        let mut a = MoveList::new();
        a.add("foo", "a.tar.xz");
        a.add("foo", "b.tar.xz");

        let mut b = MoveList::new();
        b.add("foo", "b.tar.xz");
        b.add("bar", "c.tar.xz");

        let n = MoveList::intersect(&a, &b);
        assert_eq!(n.len(), 1);
        assert!(n.contains(Path::new("foo"), "b.tar.xz"));
    }

    #[test]
    fn apply_move_relocates_files_and_logs_missing_source() {
        let src_root = TempDir::new().unwrap();
        let dst_root = TempDir::new().unwrap();

        std::fs::create_dir_all(src_root.path().join("foo")).unwrap();
        std::fs::write(src_root.path().join("foo/foo-1.0-1.tar.xz"), b"data").unwrap();

        let mut ml = MoveList::new();
        ml.add("foo", "foo-1.0-1.tar.xz");
        ml.add("foo", "missing.tar.xz");

        ml.apply_move(src_root.path(), dst_root.path(), false)
            .unwrap();

        assert!(dst_root.path().join("foo/foo-1.0-1.tar.xz").exists());
        assert!(!src_root.path().join("foo/foo-1.0-1.tar.xz").exists());
    }

    #[test]
    fn apply_move_rebases_absolute_dirs_under_from_base() {
        let src_root = TempDir::new().unwrap();
        let dst_root = TempDir::new().unwrap();

        let pkg_dir = src_root.path().join("foo");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("foo-1.0-1.tar.xz"), b"data").unwrap();

        // entries keyed by the full absolute directory, as a filesystem
        // walk rooted at src_root would produce
        let mut ml = MoveList::new();
        ml.add(pkg_dir.clone(), "foo-1.0-1.tar.xz");

        ml.apply_move(src_root.path(), dst_root.path(), false).unwrap();

        assert!(dst_root.path().join("foo/foo-1.0-1.tar.xz").exists());
        assert!(!pkg_dir.join("foo-1.0-1.tar.xz").exists());
    }

    #[test]
    fn dry_run_does_not_touch_filesystem() {
        let src_root = TempDir::new().unwrap();
        let dst_root = TempDir::new().unwrap();
        std::fs::create_dir_all(src_root.path().join("foo")).unwrap();
        std::fs::write(src_root.path().join("foo/x.tar.xz"), b"data").unwrap();

        let mut ml = MoveList::new();
        ml.add("foo", "x.tar.xz");
        ml.apply_move(src_root.path(), dst_root.path(), true).unwrap();

        assert!(src_root.path().join("foo/x.tar.xz").exists());
        assert!(!dst_root.path().join("foo/x.tar.xz").exists());
    }
}
