//! Signal-driven long-running loop: re-scan the release area and/or
//! uploads on request, otherwise wake on a 4-hour-minus-10-minute cadence
//! to catch out-of-band release-area changes.
//!
//! Grounded on `original_source/calm/calm.py::do_daemon` (signal map,
//! scheduling offset, unhandled-exception mail), standing in for the
//! original's `signal.pause()`/`signal.alarm()` with `tokio::signal::unix`.

use crate::error::Error;
use crate::mail::Mailer;
use crate::orchestrator::Orchestrator;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

const RESCAN_INTERVAL: Duration = Duration::from_secs(240 * 60);
const RESCAN_OFFSET: Duration = Duration::from_secs(10 * 60);

/// Sleep until the next `:10 past every fourth hour` boundary, or until
/// interrupted early by one of the wake signals.
fn next_wake_delay() -> Duration {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let elapsed = now.saturating_sub(RESCAN_OFFSET).as_secs() % RESCAN_INTERVAL.as_secs();
    Duration::from_secs(RESCAN_INTERVAL.as_secs() - elapsed)
}

pub async fn run(mut orchestrator: Orchestrator, mailer: &dyn Mailer) -> Result<(), Error> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Subprocess {
        cmd: "signal(SIGTERM)".to_string(),
        msg: e.to_string(),
    })?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(|e| Error::Subprocess {
        cmd: "signal(SIGUSR1)".to_string(),
        msg: e.to_string(),
    })?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(|e| Error::Subprocess {
        cmd: "signal(SIGUSR2)".to_string(),
        msg: e.to_string(),
    })?;

    tracing::info!("calm daemon started, pid {}", std::process::id());

    loop {
        let result = orchestrator.run_once(mailer);
        match result {
            Ok(report) => {
                tracing::info!(added = report.added, vaulted = report.vaulted, "cycle complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "cycle failed");
            }
        }

        let delay = next_wake_delay();
        tracing::info!(seconds = delay.as_secs(), "sleeping until next scheduled rescan");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                tracing::debug!("woke on schedule");
            }
            _ = sigusr1.recv() => {
                tracing::debug!("SIGUSR1: re-processing uploads");
            }
            _ = sigusr2.recv() => {
                tracing::debug!("SIGUSR2: re-reading release area");
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM: calm daemon stopping");
                break;
            }
        }
    }

    Ok(())
}
