use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Runtime configuration, built by layering defaults, an optional TOML
/// file, and `CALM_*` environment variables. Threaded explicitly through
/// every component rather than read from global state.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root of the release area: `<rel_area>/<arch>/release/<pkgpath>/...`
    #[serde(default = "default_rel_area")]
    pub rel_area: PathBuf,

    /// Root of the vault, where retired versions are relocated.
    #[serde(default = "default_vault")]
    pub vault: PathBuf,

    /// Root of maintainer home directories (upload staging area).
    #[serde(default = "default_homedir")]
    pub homedir: PathBuf,

    /// Root of the automated-build staging directory.
    #[serde(default = "default_stagingdir")]
    pub stagingdir: PathBuf,

    /// Path to the package-maintainer list file.
    #[serde(default = "default_pkglist")]
    pub pkglist: PathBuf,

    /// Directory the setup.ini, compressed companions, and JSON summary
    /// are written into (and served from).
    #[serde(default = "default_htdocs")]
    pub htdocs: PathBuf,

    /// Directory for the historic-names and vault-request stores.
    #[serde(default = "default_statedir")]
    pub statedir: PathBuf,

    /// Name of the default orphan-package maintainer.
    #[serde(default)]
    pub orphan_maint: Option<String>,

    /// Architectures served, excluding the synthetic `noarch`/`src` ones.
    #[serde(default = "default_arches")]
    pub arches: Vec<String>,

    #[serde(default = "default_keep_count")]
    pub keep_count: usize,

    #[serde(default = "default_keep_count_test")]
    pub keep_count_test: usize,

    #[serde(default = "default_keep_days")]
    pub keep_days: u64,

    /// value of the `setup-release` key written into setup.ini
    #[serde(default = "default_release")]
    pub release: String,

    /// GPG key ids used (by the external signer) to sign the index.
    #[serde(default)]
    pub keys: Vec<String>,

    /// When true, no filesystem mutation is performed; movelists and the
    /// index are computed but not applied.
    #[serde(default)]
    pub dry_run: bool,

    /// Run retention (stale-package vaulting) each cycle.
    #[serde(default = "default_true")]
    pub stale: bool,

    /// Addresses that receive the error-level digest for every cycle.
    #[serde(default)]
    pub leads: Vec<String>,

    /// Addresses used for mail attributed to the orphan maintainer, when
    /// no dedicated orphan-maintainer email file exists.
    #[serde(default)]
    pub orphan_emails: Vec<String>,

    /// Validator checks to skip crate-wide (the configuration-wide
    /// equivalent of a package's own `disable-check` override hint), e.g.
    /// `curr-most-recent`.
    #[serde(default)]
    pub disable_check: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_rel_area() -> PathBuf {
    PathBuf::from("rel_area")
}
fn default_vault() -> PathBuf {
    PathBuf::from("vault")
}
fn default_homedir() -> PathBuf {
    PathBuf::from("home")
}
fn default_stagingdir() -> PathBuf {
    PathBuf::from("staging")
}
fn default_pkglist() -> PathBuf {
    PathBuf::from("pkg-maint")
}
fn default_htdocs() -> PathBuf {
    PathBuf::from("htdocs")
}
fn default_statedir() -> PathBuf {
    PathBuf::from("state")
}
fn default_arches() -> Vec<String> {
    vec!["x86_64".to_string(), "x86".to_string()]
}
fn default_keep_count() -> usize {
    3
}
fn default_keep_count_test() -> usize {
    2
}
fn default_keep_days() -> u64 {
    0
}
fn default_release() -> String {
    "calm".to_string()
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        } else {
            builder = builder.add_source(config::File::with_name("calm").required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("CALM").separator("_"));

        let built = builder.build().map_err(|e| Error::Config {
            msg: format!("failed to load configuration: {e}"),
        })?;

        let mut config: Self = built.try_deserialize().map_err(|e| Error::Config {
            msg: format!("failed to deserialize configuration: {e}"),
        })?;

        for path in [
            &mut config.rel_area,
            &mut config.vault,
            &mut config.homedir,
            &mut config.stagingdir,
            &mut config.htdocs,
            &mut config.statedir,
        ] {
            canonicalize_in_place(path)?;
        }

        Ok(config)
    }
}

fn canonicalize_in_place(path: &mut PathBuf) -> Result<()> {
    if !path.is_absolute() {
        let cwd = std::env::current_dir().map_err(|e| Error::Config {
            msg: format!("failed to get current directory: {e}"),
        })?;
        *path = cwd.join(&path);
    }
    if let Ok(canonical) = path.canonicalize() {
        *path = canonical;
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            rel_area: default_rel_area(),
            vault: default_vault(),
            homedir: default_homedir(),
            stagingdir: default_stagingdir(),
            pkglist: default_pkglist(),
            htdocs: default_htdocs(),
            statedir: default_statedir(),
            orphan_maint: None,
            arches: default_arches(),
            keep_count: default_keep_count(),
            keep_count_test: default_keep_count_test(),
            keep_days: default_keep_days(),
            release: default_release(),
            keys: Vec::new(),
            dry_run: false,
            stale: true,
            leads: Vec::new(),
            orphan_emails: Vec::new(),
            disable_check: Vec::new(),
        };
        for path in [
            &mut config.rel_area,
            &mut config.vault,
            &mut config.homedir,
            &mut config.stagingdir,
            &mut config.htdocs,
            &mut config.statedir,
        ] {
            let _ = canonicalize_in_place(path);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn relative_paths_become_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("calm.toml");

        fs::write(
            &config_path,
            r#"
rel_area = "./rel"
vault = "./vault"
"#,
        )
        .unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();
        let config = Config::load(Some(config_path.to_str().unwrap())).unwrap();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(config.rel_area.is_absolute());
        assert!(config.vault.is_absolute());
    }

    #[test]
    fn defaults_have_expected_retention_values() {
        let config = Config::default();
        assert_eq!(config.keep_count, 3);
        assert_eq!(config.keep_count_test, 2);
        assert_eq!(config.keep_days, 0);
        assert_eq!(config.arches, vec!["x86_64", "x86"]);
    }
}
