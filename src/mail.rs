//! Per-cycle log buffering and leads/maintainer mail dispatch.
//!
//! Grounded on `original_source/calm/calm.py::mail_logs/mail_cb` (the
//! `AbeyanceHandler`-buffered, per-maintainer-attributed dispatch shape).
//! SMTP transport itself stays out of scope; `Mailer` is the
//! seam a real transport would plug into.

use crate::error::Error;
use crate::maintainers::MaintainerList;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn rank(self) -> u8 {
        match self {
            Level::Info => 0,
            Level::Warn => 1,
            Level::Error => 2,
        }
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}
impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// One buffered log event, attributed to a maintainer and/or package when
/// the emitting code knows which one caused it (mirrors the `extra={...}`
/// fields the original attaches to `logging` calls).
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub maintainer: Option<String>,
    pub package: Option<String>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self { level, message: message.into(), maintainer: None, package: None }
    }

    pub fn for_maintainer(mut self, name: impl Into<String>) -> Self {
        self.maintainer = Some(name.into());
        self
    }

    pub fn for_package(mut self, name: impl Into<String>) -> Self {
        self.package = Some(name.into());
        self
    }
}

/// Buffers a cycle's log records for later dispatch, the way
/// `AbeyanceHandler` holds onto records until the `with` block exits.
#[derive(Debug, Default)]
pub struct LogBuffer {
    records: Vec<LogRecord>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A mail transport. `LoggingMailer` is the in-tree stand-in; a real SMTP
/// sender would implement this trait against the same call shape.
pub trait Mailer {
    fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), Error>;
}

/// Logs the message that would have been sent, rather than sending it.
#[derive(Debug, Default)]
pub struct LoggingMailer;

impl Mailer for LoggingMailer {
    fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), Error> {
        tracing::info!(to = ?to, subject, body, "mail suppressed (no transport configured)");
        Ok(())
    }
}

const ORPHANED: &str = "ORPHANED";

/// Dispatch a cycle's buffered records: leads get everything ERROR or
/// above; each maintainer gets records attributed to them by name or
/// package, filtered by their quiet threshold (Warn if quiet, Info
/// otherwise); `ORPHANED`'s mail goes to `orphan_emails` instead of a
/// per-maintainer address list.
pub fn dispatch(
    buffer: &LogBuffer,
    mailer: &dyn Mailer,
    subject: &str,
    leads: &[String],
    maintainers: &MaintainerList,
    orphan_emails: &[String],
) -> Result<(), Error> {
    if leads.is_empty() && maintainers.is_empty() {
        return Ok(());
    }

    if !leads.is_empty() && buffer.records.iter().any(|r| r.level >= Level::Error) {
        let body = render(buffer.records.iter().filter(|r| r.level >= Level::Error));
        mailer.send(leads, subject, &body)?;
    }

    for maint in maintainers.values() {
        let email: &[String] = if maint.name == ORPHANED { orphan_emails } else { &maint.email };
        if email.is_empty() {
            continue;
        }

        let threshold = if maint.quiet { Level::Warn } else { Level::Info };
        let relevant: Vec<&LogRecord> = buffer
            .records
            .iter()
            .filter(|r| r.level >= threshold)
            .filter(|r| r.maintainer.as_deref() == Some(maint.name.as_str()) || r.package.as_deref().is_some_and(|p| maint.pkgs.iter().any(|mp| mp == p)))
            .collect();

        if relevant.is_empty() {
            continue;
        }

        let body = render(relevant.into_iter());
        mailer.send(email, &format!("{subject} for {}", maint.name), &body)?;
    }

    Ok(())
}

fn render<'a>(records: impl Iterator<Item = &'a LogRecord>) -> String {
    records.map(|r| r.message.as_str()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingMailer {
        sent: RefCell<Vec<(Vec<String>, String, String)>>,
    }
    impl Mailer for RecordingMailer {
        fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), Error> {
            self.sent.borrow_mut().push((to.to_vec(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[test]
    fn leads_receive_only_error_level_records() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogRecord::new(Level::Info, "info msg"));
        buffer.push(LogRecord::new(Level::Error, "error msg"));

        let mailer = RecordingMailer::default();
        dispatch(&buffer, &mailer, "calm run", &["leads@example.com".to_string()], &HashMap::new(), &[]).unwrap();

        let sent = mailer.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].2.contains("error msg"));
        assert!(!sent[0].2.contains("info msg"));
    }

    #[test]
    fn maintainer_receives_records_attributed_to_their_package() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogRecord::new(Level::Info, "built foo").for_package("foo"));
        buffer.push(LogRecord::new(Level::Info, "built bar").for_package("bar"));

        let mut maintainers = HashMap::new();
        let mut m = crate::maintainers::Maintainer::default();
        m.name = "alice".to_string();
        m.email = vec!["alice@example.com".to_string()];
        m.pkgs = vec!["foo".to_string()];
        maintainers.insert("alice".to_string(), m);

        let mailer = RecordingMailer::default();
        dispatch(&buffer, &mailer, "calm run", &[], &maintainers, &[]).unwrap();

        let sent = mailer.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].2.contains("built foo"));
        assert!(!sent[0].2.contains("built bar"));
    }

    #[test]
    fn quiet_maintainer_only_gets_warn_and_above() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogRecord::new(Level::Info, "info msg").for_package("foo"));

        let mut maintainers = HashMap::new();
        let mut m = crate::maintainers::Maintainer::default();
        m.name = "alice".to_string();
        m.email = vec!["alice@example.com".to_string()];
        m.pkgs = vec!["foo".to_string()];
        m.quiet = true;
        maintainers.insert("alice".to_string(), m);

        let mailer = RecordingMailer::default();
        dispatch(&buffer, &mailer, "calm run", &[], &maintainers, &[]).unwrap();

        assert!(mailer.sent.borrow().is_empty());
    }
}
