//! Cross-package validation: the 14-step algorithm,
//! grounded on `original_source/calm/package.py::validate_packages`.

use crate::model::{Importance, Kind, PackageSet};
use crate::past_mistakes;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Default)]
pub struct ValidationErrors {
    pub messages: Vec<String>,
}

impl ValidationErrors {
    pub fn push(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }
    pub fn is_ok(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Run the full validation pipeline against a merged per-arch PackageSet.
/// `historic_names` widens the valid-require-target set (step 1) with
/// package names that existed in a previous cycle but have since been
/// fully removed. `global_disable_check` is the configuration-wide
/// equivalent of a package's own `disable-check` override hint.
pub fn validate(
    set: &mut PackageSet,
    historic_names: &HashSet<String>,
    global_disable_check: &[String],
) -> ValidationErrors {
    let mut errors = ValidationErrors::default();

    // step 1: valid require-targets = package names ∪ provides atoms ∪ historic names
    let mut valid_targets: HashSet<String> = set.packages.keys().cloned().collect();
    for pkg in set.packages.values() {
        for hints in pkg.hints.values() {
            valid_targets.extend(hints.provides.iter().cloned());
        }
    }
    valid_targets.extend(historic_names.iter().cloned());

    // step 2: depends/obsoletes/build-depends must resolve
    let names: Vec<String> = set.packages.keys().cloned().collect();
    for name in &names {
        let pkg = &set.packages[name];
        for (vr, hints) in pkg.hints.clone() {
            for atom in hints.depend_names() {
                check_atom_resolves(&atom, name, &vr, "depends", &valid_targets, pkg.override_hints.check_disabled("missing-depended-package"), &mut errors);
                if atom == *name && !past_mistakes::SELF_REQUIRES.contains(&name.as_str()) {
                    errors.push(format!("{name} {vr}: depends on itself"));
                }
                check_not_source(set, &atom, name, &vr, "depends", &mut errors);
            }
            for atom in hints.obsoletes_names() {
                check_atom_resolves(&atom, name, &vr, "obsoletes", &valid_targets, pkg.override_hints.check_disabled("missing-obsoleted-package"), &mut errors);
                check_not_source(set, &atom, name, &vr, "obsoletes", &mut errors);
            }
            for atom in hints.build_depends_names() {
                check_atom_resolves(&atom, name, &vr, "build-depends", &valid_targets, pkg.override_hints.check_disabled("missing-build-depended-package"), &mut errors);
                check_not_source(set, &atom, name, &vr, "build-depends", &mut errors);
            }
        }
    }

    // step 3: external-source target must exist
    for name in &names {
        let pkg = &set.packages[name];
        for (vr, hints) in &pkg.hints {
            if let Some(src) = &hints.external_source {
                if !set.packages.contains_key(src) {
                    errors.push(format!("{name} {vr}: external-source '{src}' does not exist"));
                }
            }
        }
    }

    // step 4: inject missing obsoletes: from historical gaps, recursively
    inject_missing_obsoletes(set);

    // step 5: if A obsoletes B, A must not depend on B
    for name in &names {
        let obsoletes: BTreeSet<String> = set.packages[name]
            .hints
            .values()
            .flat_map(|h| h.obsoletes_names())
            .collect();
        if let Some(pkg) = set.packages.get_mut(name) {
            for hints in pkg.hints.values_mut() {
                hints.depends.retain(|d| !obsoletes.contains(&crate::model::strip_constraint(d)));
            }
        }
    }

    // step 6: mark all-empty, no-depends binary packages not_for_output
    for name in &names {
        if let Some(pkg) = set.packages.get_mut(name) {
            if pkg.kind == Kind::Binary
                && !pkg.tars.is_empty()
                && pkg.tars.values().all(|t| t.is_empty)
                && pkg.hints.values().all(|h| h.depends.is_empty())
            {
                pkg.not_for_output = true;
            }
        }
    }

    // step 7: compute best_version
    for name in &names {
        if let Some(pkg) = set.packages.get_mut(name) {
            let versions = pkg.versions_newest_first();
            let best = versions
                .iter()
                .find(|v| !pkg.is_test_version(v))
                .or_else(|| versions.first())
                .cloned();
            if best.is_none() && !versions.is_empty() {
                errors.push(format!("{name}: no best_version could be determined"));
            }
            pkg.best_version = best;
        }
    }

    // step 8: curr-mtime invariant — the most recent non-test version (the
    // "curr" version) should also be the one with the most recent install
    // tar mtime; a discrepancy usually means a build was uploaded out of
    // order and probably needs a replace-versions/keep override.
    for name in &names {
        let pkg = &set.packages[name];
        let nontest: Vec<String> = pkg
            .versions_newest_first()
            .into_iter()
            .filter(|v| !pkg.is_test_version(v))
            .collect();
        let Some(cv) = nontest.first() else { continue };

        let mut by_mtime = nontest.clone();
        by_mtime.sort_by(|a, b| {
            let ma = pkg.tars.get(a).map(|t| t.mtime);
            let mb = pkg.tars.get(b).map(|t| t.mtime);
            mb.cmp(&ma)
        });

        for v in &by_mtime {
            if v == cv {
                break;
            }
            let mtime_v = pkg.tars.get(v).map(|t| t.mtime);
            let mtime_cv = pkg.tars.get(cv).map(|t| t.mtime);
            if mtime_v == mtime_cv {
                continue;
            }

            let exempt = pkg.override_hints.check_disabled("curr-most-recent")
                || global_disable_check.iter().any(|c| c == "curr-most-recent");
            if !exempt {
                errors.push(format!(
                    "{name}: ordering discrepancy in non-test versions: '{v}' has the most recent timestamp, but version '{cv}' is greatest"
                ));
            }
            break;
        }
    }

    // step 9: replace-versions validation
    for name in &names {
        let pkg = &set.packages[name];
        let Some(best) = &pkg.best_version else { continue };
        for rv in &pkg.override_hints.replace_versions {
            if crate::version::compare(rv, best) != std::cmp::Ordering::Less {
                errors.push(format!(
                    "{name}: replace-versions entry '{rv}' is not less than best_version '{best}'"
                ));
            }
            if pkg.tars.contains_key(rv) {
                errors.push(format!(
                    "{name}: replace-versions entry '{rv}' clashes with an installable version"
                ));
            }
        }
    }

    // step 10: binary version must have a same-version source in external-source
    for name in &names {
        let pkg = &set.packages[name];
        if pkg.kind != Kind::Binary {
            continue;
        }
        if past_mistakes::SELF_SOURCE.contains(&name.as_str()) {
            continue;
        }
        for (vr, tar) in &pkg.tars {
            if tar.is_empty {
                continue;
            }
            let hints = pkg.hints.get(vr);
            let src_name = hints.and_then(|h| h.external_source.clone());
            match src_name {
                Some(src) => {
                    if let Some(src_pkg) = set.packages.get(&src) {
                        if !src_pkg.tars.contains_key(vr) {
                            errors.push(format!(
                                "{name} {vr}: no matching source version in '{src}'"
                            ));
                        }
                    }
                }
                None => errors.push(format!("{name} {vr}: missing external-source")),
            }
        }
    }

    // step 11: every non-empty, non-obsolete source version referenced by a binary
    let mut used_source_versions: HashSet<(String, String)> = HashSet::new();
    for pkg in set.packages.values() {
        if pkg.kind != Kind::Binary {
            continue;
        }
        for (vr, hints) in &pkg.hints {
            if let Some(src) = &hints.external_source {
                used_source_versions.insert((src.clone(), vr.clone()));
            }
        }
    }
    for name in &names {
        let pkg = &set.packages[name];
        if pkg.kind != Kind::Source || pkg.obsolete {
            continue;
        }
        for (vr, tar) in &pkg.tars {
            if tar.is_empty {
                continue;
            }
            if !used_source_versions.contains(&(name.clone(), vr.clone())) {
                errors.push(format!("{name} {vr}: non-empty source not used by any binary"));
            }
        }
    }

    // step 12: binaries from one source share best_version (with exemptions)
    check_shared_best_version(set, &mut errors);

    // step 13: build inverse edges
    build_inverse_edges(set);

    // step 14: importance assignment
    assign_importance(set);

    errors
}

fn check_atom_resolves(
    atom: &str,
    name: &str,
    vr: &str,
    relation: &str,
    valid_targets: &HashSet<String>,
    check_disabled: bool,
    errors: &mut ValidationErrors,
) {
    if valid_targets.contains(atom) {
        return;
    }
    if past_mistakes::is_nonexistent_provide(atom) {
        return;
    }
    if past_mistakes::SUBSTITUTE_DEPENDENCY.contains_key(atom) {
        return;
    }
    if check_disabled {
        return;
    }
    errors.push(format!("{name} {vr}: {relation} '{atom}' does not exist"));
}

fn check_not_source(
    set: &PackageSet,
    atom: &str,
    name: &str,
    vr: &str,
    relation: &str,
    errors: &mut ValidationErrors,
) {
    if let Some(target) = set.packages.get(atom) {
        if target.kind == Kind::Source {
            errors.push(format!("{name} {vr}: {relation} names source package '{atom}'"));
        }
    }
}

/// Scan for empty `_obsolete`-category packages whose single dependency
/// names a plausible replacement and synthesize the missing `obsoletes:`
/// edge, recursing through transitive gaps.
fn inject_missing_obsoletes(set: &mut PackageSet) {
    let mut changed = true;
    while changed {
        changed = false;
        let names: Vec<String> = set.packages.keys().cloned().collect();
        for name in &names {
            let replacement = past_mistakes::MISSING_OBSOLETE
                .get(name.as_str())
                .and_then(|v| v.first().copied())
                .map(str::to_string)
                .or_else(|| past_mistakes::old_style_obsolete_by(name).map(str::to_string));

            let Some(replacement) = replacement else { continue };
            if !set.packages.contains_key(&replacement) {
                continue;
            }

            if let Some(target) = set.packages.get_mut(&replacement) {
                for hints in target.hints.values_mut() {
                    if !hints.obsoletes.contains(name) {
                        hints.obsoletes.push(name.clone());
                        changed = true;
                    }
                }
            }
        }
    }
}

fn check_shared_best_version(set: &PackageSet, errors: &mut ValidationErrors) {
    use std::collections::HashMap;
    let mut by_source: HashMap<String, Vec<String>> = HashMap::new();

    for pkg in set.packages.values() {
        if pkg.kind != Kind::Binary {
            continue;
        }
        if pkg.override_hints.check_disabled("unique-version") {
            continue;
        }
        if past_mistakes::NONUNIQUE_VERSIONS.contains(&pkg.name.as_str()) {
            continue;
        }
        if is_soversion_named(&pkg.name) || is_versioned_runtime_subpackage(&pkg.name) {
            continue;
        }
        for hints in pkg.hints.values() {
            if let Some(src) = &hints.external_source {
                by_source
                    .entry(src.clone())
                    .or_default()
                    .push(pkg.name.clone());
            }
        }
    }

    for (src, binaries) in by_source {
        let versions: HashSet<Option<String>> = binaries
            .iter()
            .filter_map(|b| set.packages.get(b))
            .map(|p| p.best_version.clone())
            .collect();
        if versions.len() > 1 {
            errors.push(format!(
                "source '{src}': binaries disagree on best_version: {binaries:?}"
            ));
        }
    }
}

/// True for names like `libfoo1` or `libssl1.1`: a trailing run of digits
/// and dots, with a non-digit name left over once it's stripped.
pub(crate) fn is_soversion_named(name: &str) -> bool {
    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    trimmed.len() < name.len() && !trimmed.is_empty() && !trimmed.ends_with('.')
}

fn is_versioned_runtime_subpackage(name: &str) -> bool {
    ["python2", "python3", "perl5", "ruby"]
        .iter()
        .any(|prefix| name.starts_with(prefix) && name[prefix.len()..].starts_with(|c: char| c.is_ascii_digit()))
}

fn build_inverse_edges(set: &mut PackageSet) {
    let names: Vec<String> = set.packages.keys().cloned().collect();

    let mut rdepends: std::collections::HashMap<String, BTreeSet<String>> = Default::default();
    let mut build_rdepends: std::collections::HashMap<String, BTreeSet<String>> = Default::default();
    let mut obsoleted_by: std::collections::HashMap<String, BTreeSet<String>> = Default::default();
    let mut is_used_by: std::collections::HashMap<String, BTreeSet<String>> = Default::default();

    for name in &names {
        let pkg = &set.packages[name];
        for hints in pkg.hints.values() {
            for d in hints.depend_names() {
                rdepends.entry(d).or_default().insert(name.clone());
            }
            for d in hints.build_depends_names() {
                build_rdepends.entry(d).or_default().insert(name.clone());
            }
            for o in hints.obsoletes_names() {
                obsoleted_by.entry(o).or_default().insert(name.clone());
            }
            if let Some(src) = &hints.external_source {
                is_used_by.entry(src.clone()).or_default().insert(name.clone());
            }
        }
    }

    for name in &names {
        if let Some(pkg) = set.packages.get_mut(name) {
            pkg.rdepends = rdepends.remove(name).unwrap_or_default();
            pkg.build_rdepends = build_rdepends.remove(name).unwrap_or_default();
            pkg.obsoleted_by = obsoleted_by.remove(name).unwrap_or_default();
            pkg.is_used_by = is_used_by.remove(name).unwrap_or_default();
        }
    }
}

fn assign_importance(set: &mut PackageSet) {
    let names: Vec<String> = set.packages.keys().cloned().collect();

    let mut base: HashSet<String> = HashSet::new();
    for name in &names {
        let pkg = &set.packages[name];
        if pkg
            .hints
            .values()
            .any(|h| h.category.iter().any(|c| c.eq_ignore_ascii_case("base")))
        {
            base.insert(name.clone());
        }
    }

    let mut basedep: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = base.iter().cloned().collect();
    while let Some(name) = frontier.pop() {
        let Some(pkg) = set.packages.get(&name) else { continue };
        for hints in pkg.hints.values() {
            for dep in hints.depend_names() {
                if !base.contains(&dep) && basedep.insert(dep.clone()) {
                    frontier.push(dep);
                }
            }
        }
    }

    for name in &names {
        if let Some(pkg) = set.packages.get_mut(name) {
            pkg.importance = if base.contains(name) {
                Importance::Base
            } else if basedep.contains(name) {
                Importance::BaseDep
            } else {
                Importance::Other
            };
        }
    }

    // source packages inherit the minimum importance of their binaries
    let mut min_for_source: std::collections::HashMap<String, Importance> = Default::default();
    for pkg in set.packages.values() {
        if pkg.kind != Kind::Binary {
            continue;
        }
        for hints in pkg.hints.values() {
            if let Some(src) = &hints.external_source {
                let entry = min_for_source.entry(src.clone()).or_insert(Importance::Base);
                if pkg.importance < *entry {
                    *entry = pkg.importance;
                }
            }
        }
    }
    for (src, importance) in min_for_source {
        if let Some(pkg) = set.packages.get_mut(&src) {
            pkg.importance = importance;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Kind, Package, Tar, VersionHints};
    use std::path::PathBuf;

    fn tar(empty: bool) -> Tar {
        Tar {
            path: PathBuf::from("x"),
            size: if empty { 0 } else { 2000 },
            mtime: std::time::SystemTime::now(),
            sha512: String::new(),
            is_empty: empty,
            is_used: false,
            sourceless: false,
        }
    }

    #[test]
    fn depends_on_nonexistent_package_is_an_error() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), tar(false));
        let mut hints = VersionHints::default();
        hints.depends = vec!["doesnotexist".to_string()];
        hints.external_source = Some("foo-src".to_string());
        pkg.hints.insert("1.0-1".to_string(), hints);
        set.insert(pkg);

        let errors = validate(&mut set, &Default::default(), &[]);
        assert!(errors.messages.iter().any(|m| m.contains("doesnotexist")));
    }

    #[test]
    fn self_depends_is_exempted_for_cygwin_debuginfo() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("cygwin-debuginfo", Kind::Binary, PathBuf::from("x"));
        pkg.tars.insert("1.0-1".to_string(), tar(false));
        let mut hints = VersionHints::default();
        hints.depends = vec!["cygwin-debuginfo".to_string()];
        hints.external_source = Some("cygwin-debuginfo".to_string());
        pkg.hints.insert("1.0-1".to_string(), hints);
        set.insert(pkg);

        let errors = validate(&mut set, &Default::default(), &[]);
        assert!(!errors.messages.iter().any(|m| m.contains("depends on itself")));
    }

    #[test]
    fn all_empty_no_depends_package_is_not_for_output() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("old", Kind::Binary, PathBuf::from("old"));
        pkg.tars.insert("1.0-1".to_string(), tar(true));
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        set.insert(pkg);

        validate(&mut set, &Default::default(), &[]);
        assert!(set.get("old").unwrap().not_for_output);
    }

    #[test]
    fn best_version_is_the_newest() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Source, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), tar(true));
        pkg.tars.insert("2.0-1".to_string(), tar(true));
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        pkg.hints.insert("2.0-1".to_string(), VersionHints::default());
        set.insert(pkg);

        validate(&mut set, &Default::default(), &[]);
        assert_eq!(set.get("foo").unwrap().best_version.as_deref(), Some("2.0-1"));
    }

    #[test]
    fn obsoletes_and_build_depends_on_source_package_are_errors() {
        let mut set = PackageSet::new();
        let mut src = Package::new("foo-src", Kind::Source, PathBuf::from("foo-src"));
        src.tars.insert("1.0-1".to_string(), tar(true));
        src.hints.insert("1.0-1".to_string(), VersionHints::default());
        set.insert(src);

        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));
        pkg.tars.insert("1.0-1".to_string(), tar(false));
        let mut hints = VersionHints::default();
        hints.obsoletes = vec!["foo-src".to_string()];
        hints.build_depends = vec!["foo-src".to_string()];
        hints.external_source = Some("foo-src".to_string());
        pkg.hints.insert("1.0-1".to_string(), hints);
        set.insert(pkg);

        let errors = validate(&mut set, &Default::default(), &[]);
        assert!(errors.messages.iter().any(|m| m.contains("obsoletes names source package 'foo-src'")));
        assert!(errors.messages.iter().any(|m| m.contains("build-depends names source package 'foo-src'")));
    }

    #[test]
    fn curr_mtime_discrepancy_is_an_error() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));

        let now = std::time::SystemTime::now();
        let mut older = tar(false);
        older.mtime = now - std::time::Duration::from_secs(3600);
        let mut newer = tar(false);
        newer.mtime = now;

        // 2.0-1 is the greatest version, but 1.0-1 has the more recent mtime.
        pkg.tars.insert("1.0-1".to_string(), newer);
        pkg.tars.insert("2.0-1".to_string(), older);
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        pkg.hints.insert("2.0-1".to_string(), VersionHints::default());
        set.insert(pkg);

        let errors = validate(&mut set, &Default::default(), &[]);
        assert!(errors.messages.iter().any(|m| m.contains("ordering discrepancy")));
    }

    #[test]
    fn curr_mtime_discrepancy_is_exempt_via_global_disable_check() {
        let mut set = PackageSet::new();
        let mut pkg = Package::new("foo", Kind::Binary, PathBuf::from("foo"));

        let now = std::time::SystemTime::now();
        let mut older = tar(false);
        older.mtime = now - std::time::Duration::from_secs(3600);
        let mut newer = tar(false);
        newer.mtime = now;

        pkg.tars.insert("1.0-1".to_string(), newer);
        pkg.tars.insert("2.0-1".to_string(), older);
        pkg.hints.insert("1.0-1".to_string(), VersionHints::default());
        pkg.hints.insert("2.0-1".to_string(), VersionHints::default());
        set.insert(pkg);

        let errors = validate(&mut set, &Default::default(), &["curr-most-recent".to_string()]);
        assert!(!errors.messages.iter().any(|m| m.contains("ordering discrepancy")));
    }
}
