//! Top-level per-cycle pipeline: read the release area, scan maintainer
//! uploads, validate, retire stale versions, write the index.
//!
//! Grounded on `original_source/calm/calm.py::process/process_relarea/
//! process_uploads/process_maintainer_uploads/remove_stale_packages/
//! report_movelist_conflicts`. The per-record mail buffer here is scoped
//! to what the orchestrator itself logs through explicit `LogBuffer::push`
//! calls, not a crate-wide `tracing` capture layer — reproducing the
//! original's log-record interception would mean a custom `tracing::Layer`
//! disproportionate to what the rest of this pipeline needs.

use crate::config::Config;
use crate::db::Db;
use crate::error::Error;
use crate::index_writer;
use crate::mail::{dispatch, LogBuffer, LogRecord, Level, Mailer};
use crate::maintainers::{self, MaintainerList};
use crate::model::PackageSet;
use crate::movelist::MoveList;
use crate::repo_scanner;
use crate::retention;
use crate::upload_scanner;
use crate::validator;
use std::collections::{HashMap, HashSet};

/// The synthetic "arches" alongside the real ones: noarch packages and
/// source packages are each tracked as their own view.
fn views(config: &Config) -> Vec<String> {
    let mut v = config.arches.clone();
    v.push("noarch".to_string());
    v.push("src".to_string());
    v
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub vaulted: usize,
    pub added: usize,
    pub errors: usize,
}

pub struct Orchestrator {
    pub config: Config,
    pub db: Db,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self, Error> {
        let db = Db::open(&config.statedir)?;
        Ok(Self { config, db })
    }

    pub fn run_once(&mut self, mailer: &dyn Mailer) -> Result<CycleReport, Error> {
        let mut log = LogBuffer::new();
        let mut report = CycleReport::default();

        let result = self.process(&mut log, &mut report);
        if let Err(e) = &result {
            log.push(LogRecord::new(Level::Error, format!("cycle aborted: {e}")));
        }

        let mlist = maintainers::read(&self.config, self.config.orphan_maint.as_deref()).unwrap_or_default();
        dispatch(&log, mailer, "calm run", &self.config.leads, &mlist, &self.config.orphan_emails)?;

        result.map(|_| report)
    }

    fn process(&mut self, log: &mut LogBuffer, report: &mut CycleReport) -> Result<(), Error> {
        let mut packages = self.process_relarea(log, report)?;
        self.process_uploads(&mut packages, log, report)?;
        self.write_index(&packages)?;
        Ok(())
    }

    fn process_relarea(
        &mut self,
        log: &mut LogBuffer,
        report: &mut CycleReport,
    ) -> Result<HashMap<String, PackageSet>, Error> {
        let mut raw = HashMap::new();
        for arch in views(&self.config) {
            let (set, errors) = repo_scanner::read_packages(&self.config.rel_area, &arch);
            if !errors.is_ok() {
                for msg in &errors.messages {
                    log.push(LogRecord::new(Level::Error, msg.clone()));
                }
            }
            raw.insert(arch, set);
        }

        // the merged arch view overlays arch + noarch + src into one lookup
        // table; Validator and RetentionEngine both operate on this, not on
        // the raw per-arch set, so e.g. a binary's external-source package
        // (which only ever lives in the `src` view) resolves.
        let noarch = raw.get("noarch").cloned().unwrap_or_default();
        let src = raw.get("src").cloned().unwrap_or_default();

        let mut packages = HashMap::new();
        for arch in &self.config.arches {
            let Some(base) = raw.get(arch) else { continue };
            match PackageSet::merge(base, &[&noarch, &src]) {
                Ok(merged) => {
                    packages.insert(arch.clone(), merged);
                }
                Err(e) => {
                    report.errors += 1;
                    log.push(LogRecord::new(Level::Error, format!("{arch}: merge error: {e}")));
                }
            }
        }
        if report.errors > 0 {
            return Err(Error::Validation { count: report.errors });
        }

        let current_names: HashSet<String> = packages.values().flat_map(|s: &PackageSet| s.packages.keys().cloned()).collect();
        let historic = self.db.update_package_names(&current_names)?;

        for (arch, set) in packages.iter_mut() {
            let errors = validator::validate(set, &historic, &self.config.disable_check);
            if !errors.is_ok() {
                report.errors += errors.messages.len();
                for msg in &errors.messages {
                    log.push(LogRecord::new(Level::Error, format!("{arch}: {msg}")));
                }
            }
        }
        if report.errors > 0 {
            return Err(Error::Validation { count: report.errors });
        }

        if self.config.stale {
            self.vault_stale(&mut packages, log, report)?;
        }

        Ok(packages)
    }

    fn vault_stale(
        &mut self,
        packages: &mut HashMap<String, PackageSet>,
        log: &mut LogBuffer,
        report: &mut CycleReport,
    ) -> Result<(), Error> {
        let vault_requests = self.db.vault_requests().clone();

        for (arch, set) in packages.iter_mut() {
            retention::mark_freshness(set, &self.config, &vault_requests);
            let to_vault = retention::stale_packages(set);
            if to_vault.is_empty() {
                continue;
            }

            // entries merged in from the noarch/src views carry paths rooted
            // under their own arch segment, not this one, so the base must
            // be the bare rel_area/vault root for MoveList's rebase to find
            // the right relative directory for every entry.
            to_vault
                .apply_move(&self.config.rel_area, &self.config.vault, self.config.dry_run)
                .map_err(Error::from)?;
            report.vaulted += to_vault.len();
            log.push(LogRecord::new(Level::Info, format!("vaulted {} stale package(s) for {arch}", to_vault.len())));

            to_vault.map(|p, f| set.delete(&p.to_path_buf(), f));
        }

        Ok(())
    }

    fn process_uploads(
        &mut self,
        packages: &mut HashMap<String, PackageSet>,
        log: &mut LogBuffer,
        report: &mut CycleReport,
    ) -> Result<(), Error> {
        let mut mlist: MaintainerList =
            maintainers::read(&self.config, self.config.orphan_maint.as_deref()).map_err(Error::from)?;
        let all_packages: HashSet<String> = maintainers::all_packages(&mlist).into_iter().collect();
        let trusted: Vec<String> = Vec::new();

        let mut names: Vec<String> = mlist.keys().cloned().collect();
        names.sort();

        for name in names {
            for basedir in [self.config.homedir.clone(), self.config.stagingdir.clone()] {
                let maintainer = mlist.get_mut(&name).expect("present");
                self.process_maintainer_uploads(packages, maintainer, &all_packages, &trusted, &basedir, log, report)?;
            }
        }

        maintainers::update_reminder_times(&mlist, &self.config.homedir);
        Ok(())
    }

    fn process_maintainer_uploads(
        &mut self,
        packages: &mut HashMap<String, PackageSet>,
        maintainer: &mut crate::maintainers::Maintainer,
        all_packages: &HashSet<String>,
        trusted: &[String],
        basedir: &std::path::Path,
        log: &mut LogBuffer,
        report: &mut CycleReport,
    ) -> Result<(), Error> {
        let mut scan_results = HashMap::new();
        let mut skip = false;

        for arch in views(&self.config) {
            let result = upload_scanner::scan(
                basedir,
                maintainer,
                all_packages,
                trusted,
                &arch,
                &self.config.rel_area,
                self.config.dry_run,
            );
            upload_scanner::remove(&result.remove_always, self.config.dry_run);
            if result.error {
                log.push(
                    LogRecord::new(Level::Error, format!("error reading uploads for {}", maintainer.name))
                        .for_maintainer(maintainer.name.clone()),
                );
                skip = true;
            }
            scan_results.insert(arch, result);
        }

        if skip {
            return Ok(());
        }

        let nothing_to_do = scan_results
            .values()
            .all(|r: &upload_scanner::ScanResult| r.to_relarea.is_empty() && r.to_vault.is_empty());
        if nothing_to_do {
            return Ok(());
        }

        let noarch = scan_results.get("noarch").map(|r| &r.packages).cloned().unwrap_or_default();
        let src = scan_results.get("src").map(|r| &r.packages).cloned().unwrap_or_default();

        let mut merged: HashMap<String, PackageSet> = HashMap::new();
        let mut valid = true;
        for arch in &self.config.arches {
            let base = packages.get(arch).cloned().unwrap_or_default();
            let Some(uploaded) = scan_results.get(arch).map(|r| &r.packages) else { continue };
            match PackageSet::merge(&base, &[uploaded, &noarch, &src]) {
                Ok(mut m) => {
                    if let Some(result) = scan_results.get(arch) {
                        result.to_vault.map(|p, f| m.delete(&p.to_path_buf(), f));
                    }
                    merged.insert(arch.clone(), m);
                }
                Err(e) => {
                    log.push(LogRecord::new(
                        Level::Error,
                        format!("error merging uploaded {arch} packages for {}: {e}", maintainer.name),
                    ));
                    valid = false;
                }
            }
        }

        if !valid {
            return Ok(());
        }

        let current_names: HashSet<String> =
            merged.values().flat_map(|s| s.packages.keys().cloned()).collect();
        let historic = self.db.update_package_names(&current_names)?;

        for (arch, set) in merged.iter_mut() {
            let errors = validator::validate(set, &historic, &self.config.disable_check);
            if !errors.is_ok() {
                log.push(LogRecord::new(
                    Level::Error,
                    format!("error validating merged {arch} packages for {}", maintainer.name),
                ));
                valid = false;
            }
        }
        if !valid {
            return Ok(());
        }

        let mut conflicts = false;
        for arch in views(&self.config) {
            if let Some(result) = scan_results.get(&arch) {
                let n = MoveList::intersect(&result.to_relarea, &result.to_vault);
                if !n.is_empty() {
                    n.map(|p, f| {
                        log.push(LogRecord::new(
                            Level::Error,
                            format!("{}/{f} is both uploaded and manually vaulted", p.display()),
                        ));
                    });
                    conflicts = true;
                }
            }
        }
        if conflicts {
            return Ok(());
        }

        let maintainer_home = basedir.join(&maintainer.name);
        for arch in views(&self.config) {
            let Some(result) = scan_results.get(&arch) else { continue };

            if !result.to_vault.is_empty() {
                result
                    .to_vault
                    .apply_move(&self.config.rel_area, &self.config.vault, self.config.dry_run)
                    .map_err(Error::from)?;
                report.vaulted += result.to_vault.len();
            }
            upload_scanner::remove(&result.remove_success, self.config.dry_run);

            if !result.to_relarea.is_empty() {
                result
                    .to_relarea
                    .apply_move(&maintainer_home, &self.config.rel_area, self.config.dry_run)
                    .map_err(Error::from)?;
                report.added += result.to_relarea.len();
            }
        }

        for (arch, set) in merged {
            packages.insert(arch, set);
        }

        log.push(LogRecord::new(
            Level::Info,
            format!("processed uploads from maintainer {}", maintainer.name),
        ));

        Ok(())
    }

    fn write_index(&self, packages: &HashMap<String, PackageSet>) -> Result<(), Error> {
        for arch in &self.config.arches {
            let Some(set) = packages.get(arch) else { continue };
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let ini = index_writer::write_setup_ini(set, arch, &self.config.release, timestamp);
            let ini_path = self.config.htdocs.join(arch).join("setup.ini");
            index_writer::write_if_changed(&ini_path, ini.as_bytes())?;

            let json = index_writer::write_repo_json_gz(set)?;
            let json_path = self.config.htdocs.join(arch).join("repo.json.gz");
            index_writer::write_if_changed(&json_path, &json)?;
        }
        Ok(())
    }
}
