//! In-memory package-set data model: Package, Tar, VersionHints,
//! OverrideHints, PackageSet, and merge.

use crate::error::Error;
use crate::hint::Hint;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Binary,
    Source,
}

/// A single on-disk archive for one (package, version, arch). Read-only
/// after scan.
#[derive(Debug, Clone)]
pub struct Tar {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: std::time::SystemTime,
    pub sha512: String,
    pub is_empty: bool,
    pub is_used: bool,
    pub sourceless: bool,
}

/// Parsed per-version hint, normalized.
#[derive(Debug, Clone, Default)]
pub struct VersionHints {
    pub sdesc: String,
    pub ldesc: String,
    pub category: Vec<String>,
    pub depends: Vec<String>,
    pub obsoletes: Vec<String>,
    pub provides: Vec<String>,
    pub conflicts: Vec<String>,
    pub build_depends: Vec<String>,
    pub external_source: Option<String>,
    pub message: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub skip: bool,
    pub test: bool,
    pub original_version: Option<String>,
}

fn split_list(s: Option<&str>) -> Vec<String> {
    s.map(|s| {
        s.split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

impl VersionHints {
    pub fn from_hint(hint: &Hint) -> Self {
        Self {
            sdesc: hint.get("sdesc").unwrap_or_default().to_string(),
            ldesc: hint.get("ldesc").unwrap_or_default().to_string(),
            category: split_list(hint.get("category")),
            depends: split_list(hint.get("depends")),
            obsoletes: split_list(hint.get("obsoletes")),
            provides: split_list(hint.get("provides")),
            conflicts: split_list(hint.get("conflicts")),
            build_depends: split_list(hint.get("build-depends")),
            external_source: hint.get("external-source").map(str::to_string),
            message: hint.get("message").map(str::to_string),
            license: hint.get("license").map(str::to_string),
            homepage: hint.get("homepage").map(str::to_string),
            skip: hint.values.contains_key("skip"),
            test: hint.values.contains_key("test"),
            original_version: hint.get("original-version").map(str::to_string),
        }
    }

    /// depends atoms stripped of trailing `(version constraint)`.
    pub fn depend_names(&self) -> Vec<String> {
        self.depends.iter().map(|a| strip_constraint(a)).collect()
    }
    pub fn obsoletes_names(&self) -> Vec<String> {
        self.obsoletes.iter().map(|a| strip_constraint(a)).collect()
    }
    pub fn build_depends_names(&self) -> Vec<String> {
        self.build_depends.iter().map(|a| strip_constraint(a)).collect()
    }
}

pub fn strip_constraint(atom: &str) -> String {
    match atom.find('(') {
        Some(idx) => atom[..idx].trim().to_string(),
        None => atom.trim().to_string(),
    }
}

/// Per-package retention and policy knobs, shared across all versions.
#[derive(Debug, Clone, Default)]
pub struct OverrideHints {
    pub keep: Vec<String>,
    pub keep_count: Option<usize>,
    pub keep_count_test: Option<usize>,
    pub keep_days: Option<u64>,
    pub keep_superseded_versions: bool,
    pub replace_versions: Vec<String>,
    pub disable_check: Vec<String>,
    pub noretain: Vec<String>,
}

impl OverrideHints {
    pub fn from_hint(hint: &Hint) -> Self {
        Self {
            keep: split_list(hint.get("keep")),
            keep_count: hint.get("keep-count").and_then(|v| v.parse().ok()),
            keep_count_test: hint.get("keep-count-test").and_then(|v| v.parse().ok()),
            keep_days: hint.get("keep-days").and_then(|v| v.parse().ok()),
            keep_superseded_versions: hint.values.contains_key("keep-superseded-versions"),
            replace_versions: split_list(hint.get("replace-versions")),
            disable_check: split_list(hint.get("disable-check")),
            noretain: split_list(hint.get("noretain")),
        }
    }

    pub fn check_disabled(&self, check: &str) -> bool {
        self.disable_check.iter().any(|c| c == check)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Conditional,
    Stale,
}

impl Freshness {
    /// fresh < conditional < stale, most-dominant-first; combining two
    /// freshness verdicts keeps the more conservative (stale-leaning) one.
    pub fn min(self, other: Freshness) -> Freshness {
        use Freshness::*;
        match (self, other) {
            (Stale, _) | (_, Stale) => Stale,
            (Conditional, _) | (_, Conditional) => Conditional,
            _ => Fresh,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub kind: Kind,
    pub path: PathBuf,
    pub tars: BTreeMap<String, Tar>,
    pub hints: BTreeMap<String, VersionHints>,
    pub override_hints: OverrideHints,

    pub not_for_output: bool,
    pub obsolete: bool,
    pub orphaned: bool,

    pub rdepends: BTreeSet<String>,
    pub build_rdepends: BTreeSet<String>,
    pub obsoleted_by: BTreeSet<String>,
    pub is_used_by: BTreeSet<String>,

    pub best_version: Option<String>,
    pub importance: Importance,
    pub freshness: BTreeMap<String, Freshness>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Importance {
    #[default]
    Other,
    BaseDep,
    Base,
}

impl Package {
    pub fn new(name: &str, kind: Kind, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path,
            tars: BTreeMap::new(),
            hints: BTreeMap::new(),
            override_hints: OverrideHints::default(),
            not_for_output: false,
            obsolete: false,
            orphaned: false,
            rdepends: BTreeSet::new(),
            build_rdepends: BTreeSet::new(),
            obsoleted_by: BTreeSet::new(),
            is_used_by: BTreeSet::new(),
            best_version: None,
            importance: Importance::default(),
            freshness: BTreeMap::new(),
        }
    }

    /// versions ordered newest-first by the legacy version order
    pub fn versions_newest_first(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.tars.keys().cloned().collect();
        versions.sort_by(|a, b| crate::version::compare(b, a));
        versions
    }

    pub fn is_test_version(&self, vr: &str) -> bool {
        self.hints.get(vr).map(|h| h.test).unwrap_or(false)
    }
}

/// All packages for one arch-view (arch-A, arch-B, noarch, or src).
#[derive(Debug, Clone, Default)]
pub struct PackageSet {
    pub packages: HashMap<String, Package>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.get_mut(name)
    }

    pub fn insert(&mut self, pkg: Package) {
        self.packages.insert(pkg.name.clone(), pkg);
    }

    /// Remove a single (path, filename)'s version from the owning package;
    /// if the package ends up with no tars and no hints, drop it entirely.
    pub fn delete(&mut self, path: &std::path::Path, filename: &str) {
        let Some((pkg_name, vr)) = self.find_owner(path, filename) else {
            return;
        };
        if let Some(pkg) = self.packages.get_mut(&pkg_name) {
            pkg.tars.remove(&vr);
            pkg.hints.remove(&vr);
            if pkg.tars.is_empty() && pkg.hints.is_empty() {
                self.packages.remove(&pkg_name);
            }
        }
    }

    fn find_owner(&self, path: &std::path::Path, filename: &str) -> Option<(String, String)> {
        for pkg in self.packages.values() {
            if pkg.path != path {
                continue;
            }
            for (vr, tar) in &pkg.tars {
                if tar.path.file_name().map(|f| f == filename).unwrap_or(false) {
                    return Some((pkg.name.clone(), vr.clone()));
                }
            }
        }
        None
    }

    /// merge(self, others...): packages present in only one operand are
    /// copied as-is; packages present in multiple must agree on path (else
    /// fatal); tar maps must be disjoint on version-release (else fatal);
    /// hint maps are unioned with right-hand values winning (warn on
    /// divergence); override hints update right-wins.
    pub fn merge(base: &PackageSet, others: &[&PackageSet]) -> Result<PackageSet, Error> {
        let mut out = base.clone();

        for other in others {
            for (name, incoming) in &other.packages {
                match out.packages.get_mut(name) {
                    None => {
                        out.packages.insert(name.clone(), incoming.clone());
                    }
                    Some(existing) => {
                        if existing.path != incoming.path {
                            return Err(Error::Merge {
                                msg: format!(
                                    "package '{name}' has conflicting paths: {:?} vs {:?}",
                                    existing.path, incoming.path
                                ),
                            });
                        }
                        for (vr, tar) in &incoming.tars {
                            if existing.tars.contains_key(vr) {
                                return Err(Error::Merge {
                                    msg: format!(
                                        "package '{name}' version '{vr}' present in both operands"
                                    ),
                                });
                            }
                            existing.tars.insert(vr.clone(), tar.clone());
                        }
                        for (vr, hint) in &incoming.hints {
                            if let Some(existing_hint) = existing.hints.get(vr) {
                                if existing_hint.sdesc != hint.sdesc {
                                    tracing::warn!(
                                        package = %name, version = %vr,
                                        "hint divergence on merge, right-hand wins"
                                    );
                                }
                            }
                            existing.hints.insert(vr.clone(), hint.clone());
                        }
                        if !incoming.override_hints.keep.is_empty()
                            || incoming.override_hints.keep_count.is_some()
                        {
                            existing.override_hints = incoming.override_hints.clone();
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_tar(path: &str) -> Tar {
        Tar {
            path: PathBuf::from(path),
            size: 0,
            mtime: std::time::SystemTime::now(),
            sha512: String::new(),
            is_empty: true,
            is_used: false,
            sourceless: false,
        }
    }

    #[test]
    fn merge_disjoint_sets_copies_both() {
        let mut a = PackageSet::new();
        a.insert(Package::new("foo", Kind::Binary, PathBuf::from("foo")));

        let mut b = PackageSet::new();
        b.insert(Package::new("bar", Kind::Binary, PathBuf::from("bar")));

        let merged = PackageSet::merge(&a, &[&b]).unwrap();
        assert!(merged.get("foo").is_some());
        assert!(merged.get("bar").is_some());
    }

    #[test]
    fn merge_conflicting_paths_is_fatal() {
        let mut a = PackageSet::new();
        a.insert(Package::new("foo", Kind::Binary, PathBuf::from("foo")));
        let mut b = PackageSet::new();
        b.insert(Package::new("foo", Kind::Binary, PathBuf::from("foo2")));

        assert!(PackageSet::merge(&a, &[&b]).is_err());
    }

    #[test]
    fn merge_overlapping_version_is_fatal() {
        let mut a = PackageSet::new();
        let mut pa = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pa.tars.insert("1.0-1".to_string(), empty_tar("foo-1.0-1.tar.xz"));
        a.insert(pa);

        let mut b = PackageSet::new();
        let mut pb = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pb.tars.insert("1.0-1".to_string(), empty_tar("foo-1.0-1.tar.xz"));
        b.insert(pb);

        assert!(PackageSet::merge(&a, &[&b]).is_err());
    }

    #[test]
    fn delete_removes_package_when_empty() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), empty_tar("foo-1.0-1.tar.xz"));
        set.insert(pkg);

        set.delete(&PathBuf::from("foo"), "foo-1.0-1.tar.xz");
        assert!(set.get("foo").is_none());
    }
}
