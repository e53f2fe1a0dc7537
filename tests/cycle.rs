//! End-to-end scan -> validate -> retain -> write cycle, exercised without
//! the daemon/db/mail machinery: builds a small release area on disk,
//! walks it with `repo_scanner`, validates it, retires a stale version
//! with `retention`, and checks the resulting `setup.ini`.

use calm::config::Config;
use calm::model::PackageSet;
use calm::{index_writer, repo_scanner, retention, validator};
use std::collections::{HashMap, HashSet};
use tempfile::TempDir;

fn write_archive(path: &std::path::Path) {
    // large enough that the emptiness heuristic treats it as non-empty
    // without needing a real tar stream (see repo_scanner::tar_is_empty).
    std::fs::write(path, vec![0u8; 2000]).unwrap();
}

#[test]
fn full_cycle_retires_a_stale_version_and_writes_setup_ini() {
    let rel_area = TempDir::new().unwrap();
    let vault = TempDir::new().unwrap();

    let pkgdir = rel_area.path().join("x86_64/release/foo");
    std::fs::create_dir_all(&pkgdir).unwrap();

    std::fs::write(
        pkgdir.join("override.hint"),
        "keep-count: 1\n",
    )
    .unwrap();

    for (v, r) in [("1.0", "1"), ("2.0", "1")] {
        std::fs::write(
            pkgdir.join(format!("foo-{v}-{r}.hint")),
            "sdesc: \"a test package\"\ncategory: Libs\n",
        )
        .unwrap();
        write_archive(&pkgdir.join(format!("foo-{v}-{r}.tar.xz")));
    }

    let (mut set, errors) = repo_scanner::read_packages(rel_area.path(), "x86_64");
    assert!(errors.is_ok(), "scan errors: {:?}", errors.messages);
    assert_eq!(set.get("foo").unwrap().tars.len(), 2);

    let validation = validator::validate(&mut set, &HashSet::new());
    assert!(validation.is_ok(), "validation errors: {:?}", validation.messages);

    let mut config = Config::default();
    config.keep_count = 3;

    retention::mark_freshness(&mut set, &config, &HashMap::new());
    let pkg = set.get("foo").unwrap();
    assert_eq!(pkg.freshness.get("2.0-1"), Some(&calm::model::Freshness::Fresh));
    assert_eq!(pkg.freshness.get("1.0-1"), Some(&calm::model::Freshness::Stale));

    let to_vault = retention::stale_packages(&set);
    assert_eq!(to_vault.len(), 2); // the stale tar and its hint

    let release_dir = rel_area.path().join("x86_64/release");
    let vault_dir = vault.path().join("x86_64/release");
    to_vault.apply_move(&release_dir, &vault_dir, false).unwrap();
    to_vault.map(|p, f| set.delete(&p.to_path_buf(), f));

    assert!(!pkgdir.join("foo-1.0-1.tar.xz").exists());
    assert!(!pkgdir.join("foo-1.0-1.hint").exists());
    assert!(vault_dir.join("foo/foo-1.0-1.tar.xz").exists());
    assert!(vault_dir.join("foo/foo-1.0-1.hint").exists());

    let pkg = set.get("foo").unwrap();
    assert_eq!(pkg.tars.len(), 1);
    assert!(pkg.tars.contains_key("2.0-1"));

    let ini = index_writer::write_setup_ini(&set, "x86_64", "calm-test", 1_700_000_000);
    assert!(ini.contains("@ foo"));
    assert!(ini.contains("version: 2.0-1"));
    assert!(!ini.contains("1.0-1"));

    let mut written = PackageSet::default();
    written.packages.insert("foo".to_string(), pkg.clone());
    let gz = index_writer::write_repo_json_gz(&written).unwrap();
    assert!(!gz.is_empty());
}
