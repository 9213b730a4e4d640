//! Host restart invocation
//!
//! Fire-and-forget: the command gets a bounded window to exit, stdio is
//! discarded, and failures are logged rather than surfaced. The config
//! written before the restart takes effect on the host's next start either
//! way.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

const RESTART_TIMEOUT_SECS: u64 = 15;

/// Run the host restart command with a 15 second timeout.
pub async fn restart_host(command_line: &str) {
    if command_line.trim().is_empty() {
        tracing::debug!("restart command is empty, skipping");
        return;
    }
    tracing::info!("requesting host restart: {command_line}");

    let mut command = shell_command(command_line);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("failed to spawn restart command: {e}");
            return;
        }
    };

    match tokio::time::timeout(Duration::from_secs(RESTART_TIMEOUT_SECS), child.wait()).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => tracing::warn!("restart command exited with {status}"),
        Ok(Err(e)) => tracing::warn!("failed waiting on restart command: {e}"),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            tracing::warn!(
                "restart command timed out after {RESTART_TIMEOUT_SECS}s; \
the written config applies on the host's next start"
            );
        }
    }
}

#[cfg(not(windows))]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}
