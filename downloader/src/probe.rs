/// Capability probe for the turbo transfer tool.
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// How a transfer is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// Multi-connection download with the turbo tool.
    Turbo,
    /// Single-stream fetch.
    Fallback,
}

impl TransferStrategy {
    pub fn from_turbo_available(available: bool) -> Self {
        if available {
            TransferStrategy::Turbo
        } else {
            TransferStrategy::Fallback
        }
    }
}

/// Run `<program> --version` and report whether it exited successfully
/// within `timeout`. Never fails: any problem means "not available".
pub async fn probe(program: &str, timeout: Duration) -> bool {
    let spawned = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            info!("Turbo tool {} unavailable ({}), using fallback", program, e);
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            info!("Turbo tool {} available", program);
            true
        }
        Ok(Ok(status)) => {
            info!("Turbo tool {} exited with {}, using fallback", program, status);
            false
        }
        Ok(Err(e)) => {
            warn!("Error waiting for {}: {}", program, e);
            false
        }
        Err(_) => {
            warn!("Turbo tool {} did not answer within {:?}", program, timeout);
            debug!("Probe child for {} dropped, killing", program);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        assert!(!probe("storegame-no-such-tool", Duration::from_secs(2)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_decides() {
        // `true`/`false` ignore their arguments
        assert!(probe("true", Duration::from_secs(5)).await);
        assert!(!probe("false", Duration::from_secs(5)).await);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(TransferStrategy::from_turbo_available(true), TransferStrategy::Turbo);
        assert_eq!(TransferStrategy::from_turbo_available(false), TransferStrategy::Fallback);
    }
}
