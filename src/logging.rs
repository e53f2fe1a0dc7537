//! Tracing subscriber setup: journald when running as a service (no
//! terminal attached), formatted output when running interactively.
//!
//! Mirrors the original's `TimedRotatingFileHandler`/`StreamHandler` dual
//! setup in `calm.py::logging_setup`, as dual `tracing` layers instead.

use std::io::IsTerminal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "calm=info".into());

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        let registry = tracing_subscriber::registry().with(env_filter);
        match tracing_journald::layer() {
            Ok(journald) => registry.with(journald).init(),
            Err(e) => {
                registry.init();
                tracing::warn!(error = %e, "journald unavailable, falling back to default subscriber");
            }
        }
    }
}
