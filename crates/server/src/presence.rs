//! User-presence confirmation.
//!
//! Runs a configured command with `sh -c`; exit status 0 means the user
//! confirmed. Failures to spawn, non-zero exits and timeouts all count as
//! not confirmed.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PresenceCheck {
    command: String,
    timeout: Duration,
}

impl PresenceCheck {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Ask the user to confirm. `reason` is exported to the command as
    /// `HOSTBRIDGE_PRESENCE_REASON`.
    pub async fn confirm(&self, reason: &str) -> bool {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, run_command(&self.command, reason)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(0)) => {
                info!(
                    component = "presence",
                    event = "presence.confirmed",
                    reason = reason,
                    duration_ms = duration_ms,
                    "User presence confirmed"
                );
                true
            }
            Ok(Ok(exit_code)) => {
                info!(
                    component = "presence",
                    event = "presence.denied",
                    reason = reason,
                    exit_code = exit_code,
                    duration_ms = duration_ms,
                    "User presence not confirmed"
                );
                false
            }
            Ok(Err(err)) => {
                warn!(
                    component = "presence",
                    event = "presence.spawn_failed",
                    reason = reason,
                    error = %err,
                    "Failed to run presence command"
                );
                false
            }
            Err(_) => {
                warn!(
                    component = "presence",
                    event = "presence.timed_out",
                    reason = reason,
                    timeout_secs = self.timeout.as_secs(),
                    "Presence command timed out"
                );
                false
            }
        }
    }
}

async fn run_command(command: &str, reason: &str) -> Result<i32, std::io::Error> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("HOSTBRIDGE_PRESENCE_REASON", reason)
        .kill_on_drop(true)
        .status()
        .await?;
    Ok(status.code().unwrap_or(-1))
}
