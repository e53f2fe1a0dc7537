//! Freshness marking and the stale-version move list.
//!
//! Grounded on `original_source/calm/package.py::mark_package_fresh/
//! mark_fn/stale_packages`.

use crate::config::Config;
use crate::model::{Freshness, Kind, PackageSet};
use crate::movelist::MoveList;
use crate::past_mistakes;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

/// How long a soversion package can outlive the source version that used to
/// produce it before it's eligible for the stale-soversion downgrade.
const SOVERSION_AGE_THRESHOLD: Duration = Duration::from_secs(5 * 365 * 24 * 60 * 60);

/// Mark every version of every binary package fresh/conditional/stale, then
/// propagate to source packages.
pub fn mark_freshness(set: &mut PackageSet, config: &Config, vault_requests: &HashMap<String, HashSet<String>>) {
    let names: Vec<String> = set.packages.keys().cloned().collect();

    for name in &names {
        mark_binary_freshness(set, name, config, vault_requests);
    }

    for name in &names {
        propagate_to_source(set, name);
    }
}

fn mark_binary_freshness(
    set: &mut PackageSet,
    name: &str,
    config: &Config,
    vault_requests: &HashMap<String, HashSet<String>>,
) {
    let Some(pkg) = set.packages.get(name) else { return };
    if pkg.kind != Kind::Binary {
        return;
    }

    let versions_newest_first = pkg.versions_newest_first();
    let mut fresh: HashMap<String, Freshness> = HashMap::new();

    // explicit keep: override, unconditional
    for v in &pkg.override_hints.keep {
        if pkg.tars.contains_key(v) {
            fresh.insert(v.clone(), Freshness::Fresh);
        } else {
            tracing::error!(package = name, version = v, "keep: references non-existent version");
        }
    }

    // highest N non-test versions
    let mut keep_count = pkg.override_hints.keep_count.unwrap_or(config.keep_count);
    for v in &versions_newest_first {
        if pkg.is_test_version(v) {
            continue;
        }
        if keep_count == 0 {
            break;
        }
        fresh.insert(v.clone(), Freshness::Fresh);
        keep_count -= 1;
    }

    // highest N test versions, stopping at the first non-test version
    // unless keep-superseded-versions was set
    let mut keep_count_test = pkg.override_hints.keep_count_test.unwrap_or(config.keep_count_test);
    for v in &versions_newest_first {
        if pkg.is_test_version(v) {
            if keep_count_test == 0 {
                break;
            }
            fresh.insert(v.clone(), Freshness::Fresh);
            keep_count_test -= 1;
        } else if !pkg.override_hints.keep_superseded_versions {
            break;
        }
    }

    // keep-days: mark fresh every version from the first one newer than the
    // cutoff onward (oldest-to-newest, so "onward" means newer still)
    let keep_days = pkg.override_hints.keep_days.unwrap_or(config.keep_days);
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(keep_days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut newer = false;
    let mut versions_oldest_first = versions_newest_first.clone();
    versions_oldest_first.reverse();
    for v in &versions_oldest_first {
        if !newer {
            if let Some(tar) = pkg.tars.get(v) {
                if tar.mtime > cutoff {
                    newer = true;
                }
            }
        }
        if newer {
            fresh.insert(v.clone(), Freshness::Fresh);
        }
    }

    // downgrade to conditional where the package meets a weak-retention rule
    for v in &versions_oldest_first {
        if fresh.get(v) != Some(&Freshness::Fresh) {
            continue;
        }
        if let Some(downgrade) = conditional_reason(set, pkg, v, vault_requests) {
            fresh.insert(v.clone(), downgrade);
        }
    }

    if let Some(pkg) = set.packages.get_mut(name) {
        for (v, mark) in fresh {
            pkg.freshness.insert(v, mark);
        }
        for v in pkg.tars.keys().cloned().collect::<Vec<_>>() {
            pkg.freshness.entry(v).or_insert(Freshness::Stale);
        }
    }
}

/// Weak-retention rules that downgrade an otherwise-fresh version to
/// conditional: `-debuginfo` subpackages, a stale soversion package whose
/// source has moved on, depending on a known-expired provide, explicit
/// `noretain:`, and an outstanding vault request for the version's source
/// package.
fn conditional_reason(
    set: &PackageSet,
    pkg: &crate::model::Package,
    v: &str,
    vault_requests: &HashMap<String, HashSet<String>>,
) -> Option<Freshness> {
    if pkg.name.ends_with("-debuginfo") {
        return Some(Freshness::Conditional);
    }

    if is_stale_soversion(set, pkg, v) {
        return Some(Freshness::Conditional);
    }

    if let Some(hints) = pkg.hints.get(v) {
        if hints
            .depend_names()
            .iter()
            .any(|d| past_mistakes::EXPIRED_PROVIDES.contains(&d.as_str()))
        {
            return Some(Freshness::Conditional);
        }
    }

    let noretain = &pkg.override_hints.noretain;
    if noretain.iter().any(|n| n == v || n == "all") {
        return Some(Freshness::Conditional);
    }

    if let Some(hints) = pkg.hints.get(v) {
        if let Some(src) = &hints.external_source {
            if vault_requests.get(src).is_some_and(|vs| vs.contains(v)) {
                return Some(Freshness::Conditional);
            }
        }
    }

    None
}

/// A shared-library package named like a soversion (`foo1`, `libbar2.0`)
/// whose current best version's source no longer produces that version, has
/// no rdepend pulling it in from a different source package, and is old
/// enough that it's unlikely anyone still needs it.
fn is_stale_soversion(set: &PackageSet, pkg: &crate::model::Package, v: &str) -> bool {
    if !crate::validator::is_soversion_named(&pkg.name) {
        return false;
    }
    let Some(bv) = &pkg.best_version else { return false };
    let Some(es) = pkg.hints.get(bv).and_then(|h| h.external_source.clone()) else { return false };

    let out_of_source_rdepend = pkg.rdepends.iter().any(|r| {
        let Some(rp) = set.packages.get(r) else { return false };
        let Some(rbv) = &rp.best_version else { return false };
        let r_es = rp.hints.get(rbv).and_then(|h| h.external_source.clone());
        r_es.as_deref() != Some(es.as_str())
    });
    if out_of_source_rdepend {
        return false;
    }

    let Some(src_pkg) = set.packages.get(&es) else { return false };
    if src_pkg.best_version.as_deref() == Some(bv.as_str()) {
        return false;
    }

    let Some(tar) = pkg.tars.get(v) else { return false };
    let cutoff = SystemTime::now()
        .checked_sub(SOVERSION_AGE_THRESHOLD)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    tar.mtime < cutoff
}

/// A source package is fresh in a version iff some install package using it
/// is fresh in that version; conditional-only support downgrades to stale.
fn propagate_to_source(set: &mut PackageSet, name: &str) {
    let (versions, is_used_by) = {
        let Some(pkg) = set.packages.get(name) else { return };
        if pkg.kind != Kind::Source {
            return;
        }
        (
            pkg.tars.keys().cloned().collect::<Vec<_>>(),
            pkg.is_used_by.clone(),
        )
    };

    let mut marks: HashMap<String, Freshness> = HashMap::new();
    for v in &versions {
        let mut mark = Freshness::Stale;
        for consumer in &is_used_by {
            if let Some(consumer_pkg) = set.packages.get(consumer) {
                if let Some(consumer_mark) = consumer_pkg.freshness.get(v) {
                    mark = mark.min(*consumer_mark);
                }
            }
        }
        if mark == Freshness::Conditional {
            mark = Freshness::Stale;
        }
        marks.insert(v.clone(), mark);
    }

    if let Some(pkg) = set.packages.get_mut(name) {
        for (v, mark) in &marks {
            pkg.freshness.insert(v.clone(), *mark);
        }
    }

    // downstream install packages inherit the resolved source mark when
    // they were only conditionally fresh themselves
    for consumer in &is_used_by {
        if let Some(consumer_pkg) = set.packages.get_mut(consumer) {
            for (v, mark) in &marks {
                if consumer_pkg.freshness.get(v) == Some(&Freshness::Conditional) {
                    consumer_pkg.freshness.insert(v.clone(), *mark);
                }
            }
        }
    }
}

/// Build the move-to-vault list of every non-fresh version, plus any
/// `.hint` file whose corresponding install/source version is also stale.
pub fn stale_packages(set: &PackageSet) -> MoveList {
    let mut stale = MoveList::new();

    for pkg in set.packages.values() {
        for (v, tar) in &pkg.tars {
            let fresh = pkg.freshness.get(v).copied().unwrap_or(Freshness::Stale);
            if fresh != Freshness::Fresh {
                if let Some(filename) = tar.path.file_name() {
                    stale.add(pkg.path.clone(), filename.to_string_lossy().to_string());
                }
            }
        }
        for (v, hints) in &pkg.hints {
            let own_fresh = pkg.freshness.get(v).copied().unwrap_or(Freshness::Stale);
            let original_version = hints.original_version.as_deref().unwrap_or(v);
            let original_fresh = pkg.freshness.get(original_version).copied().unwrap_or(Freshness::Stale);
            if own_fresh != Freshness::Fresh && original_fresh != Freshness::Fresh {
                stale.add(pkg.path.clone(), format!("{v}.hint"));
            }
        }
    }

    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Package, Tar, VersionHints};
    use std::path::PathBuf;

    fn tar_at(age_days: u64) -> Tar {
        Tar {
            path: PathBuf::from("x"),
            size: 2000,
            mtime: SystemTime::now() - Duration::from_secs(age_days * 24 * 60 * 60),
            sha512: String::new(),
            is_empty: false,
            is_used: false,
            sourceless: false,
        }
    }

    #[test]
    fn keep_count_marks_newest_versions_fresh() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        for (v, age) in [("1.0-1", 1000), ("2.0-1", 500), ("3.0-1", 10)] {
            pkg.tars.insert(v.to_string(), tar_at(age));
            pkg.hints.insert(v.to_string(), VersionHints::default());
        }
        set.insert(pkg);

        let config = Config { keep_count: 1, keep_count_test: 0, keep_days: 0, ..Default::default() };
        mark_freshness(&mut set, &config, &HashMap::new());

        let pkg = set.get("foo").unwrap();
        assert_eq!(pkg.freshness["3.0-1"], Freshness::Fresh);
        assert_eq!(pkg.freshness["1.0-1"], Freshness::Stale);
    }

    #[test]
    fn debuginfo_package_is_downgraded_to_conditional() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo-debuginfo", Kind::Binary, PathBuf::from("foo-debuginfo"));
        pkg.tars.insert("1.0-1".to_string(), tar_at(1000));
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        set.insert(pkg);

        let config = Config { keep_count: 5, keep_count_test: 0, keep_days: 0, ..Default::default() };
        mark_freshness(&mut set, &config, &HashMap::new());

        assert_eq!(set.get("foo-debuginfo").unwrap().freshness["1.0-1"], Freshness::Conditional);
    }

    #[test]
    fn stale_packages_queues_non_fresh_tars() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), tar_at(1000));
        pkg.freshness.insert("1.0-1".to_string(), Freshness::Stale);
        set.insert(pkg);

        let stale = stale_packages(&set);
        assert!(!stale.is_empty());
    }

    #[test]
    fn stale_packages_queues_the_hint_alongside_its_stale_tar() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), tar_at(1000));
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        pkg.freshness.insert("1.0-1".to_string(), Freshness::Stale);
        set.insert(pkg);

        let stale = stale_packages(&set);
        assert!(stale.contains(&PathBuf::from("foo"), "1.0-1.hint"));
    }

    #[test]
    fn stale_packages_skips_a_hint_whose_version_is_still_fresh() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), tar_at(10));
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        pkg.freshness.insert("1.0-1".to_string(), Freshness::Fresh);
        set.insert(pkg);

        let stale = stale_packages(&set);
        assert!(stale.is_empty());
    }

    #[test]
    fn stale_soversion_with_no_current_source_version_is_downgraded() {
        let mut set = PackageSet::new();

        let mut src = Package::new("libfoo-src", Kind::Source, PathBuf::from("libfoo-src"));
        src.tars.insert("2.0-1".to_string(), tar_at(10));
        src.hints.insert("2.0-1".to_string(), VersionHints::default());
        src.best_version = Some("2.0-1".to_string());
        set.insert(src);

        let mut pkg = Package::new("libfoo1", Kind::Binary, PathBuf::from("libfoo1"));
        let six_years_days = 6 * 365;
        pkg.tars.insert("1.9-1".to_string(), tar_at(six_years_days));
        let mut hints = VersionHints::default();
        hints.external_source = Some("libfoo-src".to_string());
        pkg.hints.insert("1.9-1".to_string(), hints);
        pkg.best_version = Some("1.9-1".to_string());
        set.insert(pkg);

        let config = Config { keep_count: 3, keep_count_test: 0, keep_days: 0, ..Default::default() };
        mark_freshness(&mut set, &config, &HashMap::new());

        assert_eq!(set.get("libfoo1").unwrap().freshness["1.9-1"], Freshness::Conditional);
    }
}
