pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod hint;
pub mod index_writer;
pub mod logging;
pub mod mail;
pub mod maintainers;
pub mod model;
pub mod movelist;
pub mod orchestrator;
pub mod past_mistakes;
pub mod repo_scanner;
pub mod retention;
pub mod upload_scanner;
pub mod validator;
pub mod version;

pub use error::{Error, Result};
pub use orchestrator::Orchestrator;

/// Run a single scan/validate/retain/write cycle and return when it's done,
/// for `calm --once`-style one-shot invocation.
pub fn run_once(config: config::Config) -> Result<orchestrator::CycleReport> {
    let mut orchestrator = Orchestrator::new(config)?;
    let mailer = mail::LoggingMailer;
    orchestrator.run_once(&mailer)
}

/// Run the signal-driven long-lived loop, for `calm --daemon`.
pub async fn run_daemon(config: config::Config) -> Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    let mailer = mail::LoggingMailer;
    daemon::run(orchestrator, &mailer).await
}
