//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use tagbridge_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::shutdown::wait_for_shutdown;

/// How long a worker gets to wind down after a shutdown signal.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Bridge runner that manages the lifecycle of a bridge.
///
/// Handles:
/// - Logging initialization (config level, optionally overridden from the CLI)
/// - A shutdown watch channel handed to the worker
/// - Graceful shutdown on SIGINT/SIGTERM
///
/// The worker runs on the caller's task; nothing is spawned, so workers do
/// not need to be `Send`.
pub struct BridgeRunner {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// Set to `true` once shutdown starts.
    shutdown_tx: watch::Sender<bool>,
    /// Time allowed for the worker to finish after shutdown.
    grace_period: Duration,
}

impl BridgeRunner {
    /// Create a new bridge runner.
    ///
    /// Initializes logging from the configuration, with `--log-level`
    /// taking precedence when given.
    pub fn new<C: BridgeConfig>(
        name: impl Into<String>,
        config: &C,
        args: &BridgeArgs,
    ) -> Result<Self> {
        let log_config = match &args.log_level {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        let runner = Self::named(name);
        tracing::info!(bridge = %runner.name, version = %runner.version, "Starting bridge");
        Ok(runner)
    }

    fn named(name: impl Into<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown_tx,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Override the shutdown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Receiver that flips to `true` when shutdown begins.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run the worker until it finishes or a termination signal arrives.
    pub async fn run<F, E>(self, worker: F) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        self.run_until(worker, async {
            if let Err(e) = wait_for_shutdown().await {
                tracing::error!(error = %e, "Signal handling unavailable");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the worker until it finishes or `shutdown` resolves.
    ///
    /// After `shutdown` resolves the worker is notified through the watch
    /// channel and given the grace period to return.
    pub async fn run_until<F, E, S>(self, worker: F, shutdown: S) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
        S: Future<Output = ()>,
    {
        tokio::pin!(worker);

        tracing::info!(bridge = %self.name, "Bridge running. Send SIGINT or SIGTERM to stop.");

        tokio::select! {
            result = &mut worker => {
                return result.map_err(|e| {
                    tracing::error!(bridge = %self.name, error = %e, "Worker failed");
                    BridgeError::worker(e.to_string())
                });
            }
            _ = shutdown => {}
        }

        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(self.grace_period, worker).await {
            Ok(Ok(())) => {
                tracing::info!(bridge = %self.name, "Goodbye!");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(bridge = %self.name, error = %e, "Worker failed during shutdown");
                Err(BridgeError::worker(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    bridge = %self.name,
                    grace_secs = self.grace_period.as_secs(),
                    "Worker did not stop in time"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_error_is_reported() {
        let runner = BridgeRunner::named("test");
        let result = runner
            .run_until(
                async { Err::<(), _>("device gone") },
                std::future::pending::<()>(),
            )
            .await;

        assert!(matches!(result, Err(BridgeError::Worker(msg)) if msg == "device gone"));
    }

    #[tokio::test]
    async fn test_shutdown_notifies_worker() {
        let runner = BridgeRunner::named("test");
        let mut rx = runner.shutdown_receiver();

        let worker = async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            Ok::<(), String>(())
        };

        let result = runner.run_until(worker, async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stuck_worker_times_out() {
        let runner = BridgeRunner::named("test").with_grace_period(Duration::from_millis(20));
        let result = runner
            .run_until(
                std::future::pending::<std::result::Result<(), String>>(),
                async {},
            )
            .await;
        assert!(result.is_ok());
    }
}
