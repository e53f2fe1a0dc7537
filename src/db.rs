//! Historic package names and vault-request bookkeeping.
//!
//! Grounded on `original_source/calm/db.py::update_package_names` and
//! `vault.py`'s `db.vault_request_add`. The original keeps both in a
//! sqlite3 database; no crate in this workspace provides a SQL layer, and
//! this state is a handful of small mtime-keyed records rather than
//! anything relational, so this is a `serde_json`-backed file store
//! instead (noted in DESIGN.md as a deliberate stack deviation).

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DbFile {
    historic_package_names: HashSet<String>,
    /// external-source name -> set of version-releases requested for vaulting
    vault_requests: HashMap<String, HashSet<String>>,
}

/// The on-disk `calm.db` equivalent: one JSON file under `htdocs`.
#[derive(Debug)]
pub struct Db {
    path: PathBuf,
    data: DbFile,
}

impl Db {
    pub fn open(statedir: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(statedir)?;
        let path = statedir.join("calm.db.json");
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| Error::Config { msg: e.to_string() })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DbFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, data })
    }

    fn save(&self) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(&self.data).map_err(|e| Error::Config { msg: e.to_string() })?;
        crate::index_writer::write_if_changed(&self.path, text.as_bytes())?;
        Ok(())
    }

    /// Add any names in `current_names` not already recorded, then return
    /// the set of historic names no longer present (candidates for the
    /// "used to exist" validator exemption).
    pub fn update_package_names(&mut self, current_names: &HashSet<String>) -> Result<HashSet<String>, Error> {
        let mut added = false;
        for name in current_names {
            if self.data.historic_package_names.insert(name.clone()) {
                added = true;
                tracing::debug!(package = %name, "package name added to history");
            }
        }
        if added {
            self.save()?;
        }

        Ok(self
            .data
            .historic_package_names
            .difference(current_names)
            .cloned()
            .collect())
    }

    pub fn historic_names(&self) -> &HashSet<String> {
        &self.data.historic_package_names
    }

    pub fn vault_request_add(&mut self, source_package: &str, version: &str) -> Result<(), Error> {
        self.data
            .vault_requests
            .entry(source_package.to_string())
            .or_default()
            .insert(version.to_string());
        self.save()
    }

    pub fn vault_requests(&self) -> &HashMap<String, HashSet<String>> {
        &self.data.vault_requests
    }

    /// Drop requests for versions that have since actually been vaulted.
    pub fn vault_request_clear(&mut self, source_package: &str, version: &str) -> Result<(), Error> {
        if let Some(versions) = self.data.vault_requests.get_mut(source_package) {
            if versions.remove(version) && versions.is_empty() {
                self.data.vault_requests.remove(source_package);
            }
            self.save()?;
        }
        Ok(())
    }
}
