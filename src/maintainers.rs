//! Maintainer model: per-maintainer home directory, package list, contact
//! addresses, and readiness-reminder throttling.

use crate::config::Config;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Debug, Clone, Default)]
pub struct Maintainer {
    pub name: String,
    pub email: Vec<String>,
    pub pkgs: Vec<String>,
    pub reminder_time: Option<SystemTime>,
    pub reminders_issued: bool,
    pub reminders_timestamp_checked: bool,
    pub quiet: bool,
}

impl Maintainer {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn homedir(&self, homedir_root: &std::path::Path) -> PathBuf {
        homedir_root.join(&self.name)
    }

    /// Persist or clear the `!reminder-timestamp` marker according to
    /// whether a readiness reminder was actually issued this cycle.
    pub fn update_reminder_time(&self, homedir_root: &std::path::Path) {
        let marker = self.homedir(homedir_root).join("!reminder-timestamp");
        if self.reminders_issued {
            if let Ok(file) = fs::OpenOptions::new().create(true).write(true).truncate(false).open(&marker) {
                let _ = file.set_modified(SystemTime::now());
            }
        } else if !self.reminders_timestamp_checked && self.reminder_time.is_some() {
            let _ = fs::remove_file(&marker);
        }
    }
}

pub type MaintainerList = HashMap<String, Maintainer>;

/// Read `!email`/`!mail` contact files for every directory under `homedir`.
fn add_directories(mlist: &mut MaintainerList, homedir: &std::path::Path) -> std::io::Result<()> {
    let entries = match fs::read_dir(homedir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let m = mlist.entry(name.clone()).or_insert_with(|| Maintainer::new(&name));

        for filename in ["!email", "!mail"] {
            let path = entry.path().join(filename);
            if let Ok(contents) = fs::read_to_string(&path) {
                for line in contents.lines() {
                    if line.starts_with('#') {
                        continue;
                    }
                    let line = line.trim();
                    if !line.is_empty() {
                        m.email.push(line.to_string());
                    }
                }
            }
        }

        let reminder = entry.path().join("!reminder-timestamp");
        m.reminder_time = fs::metadata(&reminder).and_then(|meta| meta.modified()).ok();

        if m.email.is_empty() {
            tracing::error!(maintainer = %m.name, "no email address known for maintainer");
        }
    }
    Ok(())
}

/// If `rest` starts with a run of uppercase letters immediately followed
/// by a word boundary (end of string, or a non-alphanumeric/underscore
/// character), return that leading run as a candidate status word.
/// "ORPHANED (...)" matches; "Alice Example" does not, since the run "A"
/// is immediately followed by the word character 'l'.
fn leading_status_word(rest: &str) -> Option<&str> {
    let end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_uppercase())
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    match rest[end..].chars().next() {
        None => Some(&rest[..end]),
        Some(c) if !(c.is_alphanumeric() || c == '_') => Some(&rest[..end]),
        _ => None,
    }
}

/// Parse the package-maintainer list file: `<package> <maintainer(s)|status>`.
fn add_packages(
    mlist: &mut MaintainerList,
    pkglist: &std::path::Path,
    orphan_maint: Option<&str>,
) -> std::io::Result<()> {
    let contents = fs::read_to_string(pkglist)?;

    for (i, line) in contents.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let pkg = match parts.next() {
            Some(p) if !p.is_empty() => p,
            _ => {
                tracing::error!(line = i, text = line, "unrecognized line in pkglist");
                continue;
            }
        };
        let rest = match parts.next() {
            Some(r) => r.trim_start(),
            None => {
                tracing::error!(line = i, text = line, "unrecognized line in pkglist");
                continue;
            }
        };

        let assigned: String = if let Some(status) = leading_status_word(rest) {
            match status {
                "OBSOLETE" => continue,
                "ORPHANED" => {
                    let mut assigned = orphan_maint.unwrap_or("ORPHANED").to_string();
                    if let Some(prev_start) = rest.find('(') {
                        if let Some(prev_end) = rest.rfind(')') {
                            if prev_end > prev_start {
                                assigned =
                                    format!("{assigned}/{}", &rest[prev_start + 1..prev_end]);
                            }
                        }
                    }
                    assigned
                }
                _ => {
                    tracing::error!(status, line = i, "unknown package status in pkglist");
                    continue;
                }
            }
        } else {
            rest.to_string()
        };

        for name in assigned.split('/') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if !name.is_ascii() {
                tracing::error!(name, line = i, "non-ascii maintainer name, skipped");
                continue;
            }
            let m = mlist
                .entry(name.to_string())
                .or_insert_with(|| Maintainer::new(name));
            m.pkgs.push(pkg.to_string());
        }
    }

    Ok(())
}

pub fn read(config: &Config, orphan_maint: Option<&str>) -> std::io::Result<MaintainerList> {
    let mut mlist = MaintainerList::new();
    add_directories(&mut mlist, &config.homedir)?;
    add_packages(&mut mlist, &config.pkglist, orphan_maint)?;
    Ok(mlist)
}

/// Invert to a per-package list of maintainer names.
pub fn invert(mlist: &MaintainerList) -> HashMap<String, Vec<String>> {
    let mut pkgs: HashMap<String, Vec<String>> = HashMap::new();
    for m in mlist.values() {
        for p in &m.pkgs {
            pkgs.entry(p.clone()).or_default().push(m.name.clone());
        }
    }
    pkgs
}

pub fn all_packages(mlist: &MaintainerList) -> Vec<String> {
    mlist.values().flat_map(|m| m.pkgs.iter().cloned()).collect()
}

pub fn update_reminder_times(mlist: &MaintainerList, homedir_root: &std::path::Path) {
    for m in mlist.values() {
        m.update_reminder_time(homedir_root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn leading_status_word_requires_a_trailing_word_boundary() {
        assert_eq!(leading_status_word("ORPHANED (Carol Example)"), Some("ORPHANED"));
        assert_eq!(leading_status_word("OBSOLETE"), Some("OBSOLETE"));
        // "A" is uppercase but immediately followed by the word char 'l',
        // so this is a maintainer name, not a status.
        assert_eq!(leading_status_word("Alice Example"), None);
        assert_eq!(leading_status_word("ABC123"), None);
    }

    #[test]
    fn parses_joint_and_orphaned_maintainers() {
        let dir = TempDir::new().unwrap();
        let pkglist = dir.path().join("pkglist");
        std::fs::write(
            &pkglist,
            "foo Alice Example/Bob Example\nbar ORPHANED (Carol Example)\nbaz OBSOLETE\n",
        )
        .unwrap();

        let mut mlist = MaintainerList::new();
        add_packages(&mut mlist, &pkglist, Some("Default Maint")).unwrap();

        assert!(mlist.contains_key("Alice Example"));
        assert!(mlist.contains_key("Bob Example"));
        assert!(mlist.contains_key("Default Maint"));
        assert!(!mlist.values().any(|m| m.pkgs.contains(&"baz".to_string())));
    }

    #[test]
    fn email_files_are_read_with_comments_ignored() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("Alice");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("!email"), "# comment\nalice@example.com\n\n").unwrap();

        let mut mlist = MaintainerList::new();
        add_directories(&mut mlist, dir.path()).unwrap();

        assert_eq!(mlist["Alice"].email, vec!["alice@example.com"]);
    }
}
