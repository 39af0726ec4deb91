//! OS signal handling for graceful shutdown.

use tracing::info;

use crate::error::{BridgeError, Result};

/// Wait until the process receives a termination signal.
///
/// Listens for SIGINT and SIGTERM on Unix, Ctrl+C elsewhere. Returns the
/// name of the signal that arrived.
pub async fn wait_for_shutdown() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| BridgeError::Signal(format!("SIGTERM: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| BridgeError::Signal(format!("SIGINT: {}", e)))?;

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!(signal = name, "Received shutdown signal");
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| BridgeError::Signal(format!("Ctrl+C: {}", e)))?;
        info!(signal = "ctrl_c", "Received shutdown signal");
        Ok("ctrl_c")
    }
}
