//! The poll loop: acquire readings, transmit them, refresh tag config.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tagbridge_common::ReadingSet;

use crate::client::{ClientError, Connector, ProtocolClient, TcpConnector};
use crate::config::TagBridgeConfig;
use crate::config_source::{ConfigFetchError, ConfigSource};
use crate::simulator::Simulator;
use crate::tags::{TagRegistry, TagSnapshot};
use crate::transmitter::{TransmitError, TransmitSummary, Transmitter};

/// Why a single cycle failed.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Device read failed: {0}")]
    Acquire(#[from] ClientError),
    #[error("Transmission failed: {0}")]
    Transmit(#[from] TransmitError),
}

/// Error type for the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("{failures} consecutive poll cycles failed, last error: {last}")]
    FailureThreshold { failures: u32, last: String },
    #[error("Poll loop setup failed: {0}")]
    Setup(String),
}

impl From<ConfigFetchError> for PollError {
    fn from(err: ConfigFetchError) -> Self {
        Self::Setup(err.to_string())
    }
}

impl From<TransmitError> for PollError {
    fn from(err: TransmitError) -> Self {
        Self::Setup(err.to_string())
    }
}

/// Where readings come from.
pub enum Acquisition<C: Connector> {
    Device(ProtocolClient<C>),
    Simulated(Simulator),
}

/// Timing and failure policy of a [`PollLoop`].
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub config_refresh: Duration,
    pub max_consecutive_failures: u32,
}

impl PollSettings {
    pub fn from_config(config: &TagBridgeConfig) -> Self {
        Self {
            poll_interval: config.bridge.poll_interval(),
            config_refresh: config.bridge.config_refresh(),
            max_consecutive_failures: config.bridge.max_consecutive_failures,
        }
    }
}

/// Drives poll cycles and config refreshes on one task.
pub struct PollLoop<C: Connector> {
    registry: TagRegistry,
    tags_rx: watch::Receiver<TagSnapshot>,
    acquisition: Acquisition<C>,
    transmitter: Transmitter,
    config_source: ConfigSource,
    settings: PollSettings,
    consecutive_failures: u32,
    stop: Option<watch::Receiver<bool>>,
}

impl PollLoop<TcpConnector> {
    /// Poll loop reading a Modbus TCP device, or simulating one in demo mode.
    pub fn from_config(config: &TagBridgeConfig) -> Result<Self, PollError> {
        let connector = TcpConnector::new(config.device.unit_id, config.device.timeout());
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> PollLoop<C> {
    /// Poll loop using `connector` to reach the device.
    pub fn with_connector(config: &TagBridgeConfig, connector: C) -> Result<Self, PollError> {
        let sink = config
            .upstream
            .sink_base()
            .map_err(|e| PollError::Setup(e.to_string()))?;
        let config_base = config
            .upstream
            .config_base()
            .map_err(|e| PollError::Setup(e.to_string()))?;
        let timeout = config.upstream.request_timeout();

        let registry = TagRegistry::new(config.initial_tags());
        let acquisition = if config.bridge.demo {
            Acquisition::Simulated(Simulator::new(registry.snapshot()))
        } else {
            Acquisition::Device(ProtocolClient::new(
                connector,
                config.device.host.clone(),
                config.device.port,
                config.device.timeout(),
            ))
        };

        Ok(Self {
            tags_rx: registry.subscribe(),
            registry,
            acquisition,
            transmitter: Transmitter::new(&sink, timeout)?,
            config_source: ConfigSource::new(&config_base, timeout)?,
            settings: PollSettings::from_config(config),
            consecutive_failures: 0,
            stop: None,
        })
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.acquisition, Acquisition::Simulated(_))
    }

    pub fn client(&self) -> Option<&ProtocolClient<C>> {
        match &self.acquisition {
            Acquisition::Device(client) => Some(client),
            Acquisition::Simulated(_) => None,
        }
    }

    pub fn simulator(&self) -> Option<&Simulator> {
        match &self.acquisition {
            Acquisition::Simulated(sim) => Some(sim),
            Acquisition::Device(_) => None,
        }
    }

    /// Initial connection attempt followed by one tag config fetch.
    ///
    /// Neither step is fatal.
    pub async fn start(&mut self) {
        self.log_startup();

        match &mut self.acquisition {
            Acquisition::Device(client) => {
                // failure is logged by the client and retried after a failed cycle
                let _ = client.connect().await;
            }
            Acquisition::Simulated(_) => {
                info!("Demo mode, skipping device connection");
            }
        }

        self.refresh_config().await;
    }

    /// Run one acquire-and-transmit cycle.
    ///
    /// Fails only once the consecutive-failure threshold is reached. A
    /// cycle cut short by shutdown does not count as a failure.
    pub async fn cycle(&mut self) -> Result<(), PollError> {
        match self.try_cycle().await {
            Err(CycleError::Transmit(TransmitError::Interrupted { sent, total })) => {
                debug!(sent, total, "Poll cycle interrupted by shutdown");
                Ok(())
            }
            Ok(summary) => {
                if self.consecutive_failures > 0 {
                    info!(
                        previous_failures = self.consecutive_failures,
                        "Poll cycle recovered"
                    );
                }
                debug!(sent = summary.success_count, total = summary.total, "Poll cycle complete");
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let max = self.settings.max_consecutive_failures;
                error!(
                    error = %e,
                    failures = self.consecutive_failures,
                    max,
                    "Poll cycle failed"
                );

                if self.consecutive_failures >= max {
                    error!(failures = self.consecutive_failures, "Too many consecutive failures, giving up");
                    return Err(PollError::FailureThreshold {
                        failures: self.consecutive_failures,
                        last: e.to_string(),
                    });
                }

                if let Acquisition::Device(client) = &mut self.acquisition {
                    if !client.is_connected() {
                        info!(endpoint = %client.endpoint(), "Attempting to reconnect");
                        let _ = client.connect().await;
                    }
                }
                Ok(())
            }
        }
    }

    /// Fetch the remote tag list and swap it in if it changed.
    ///
    /// A failed fetch keeps the current tags. Returns `true` on a swap.
    pub async fn refresh_config(&mut self) -> bool {
        match self.config_source.fetch().await {
            Ok(raw) => self.registry.refresh(&raw),
            Err(e) => {
                warn!(
                    url = %self.config_source.tags_url(),
                    error = %e,
                    "Failed to fetch remote tags, keeping current config"
                );
                false
            }
        }
    }

    /// Run until shutdown is signalled or the failure threshold is hit.
    ///
    /// The first cycle runs immediately. A shutdown during a cycle stops
    /// the remaining uploads. The device session is closed on the way out
    /// either way.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PollError> {
        self.stop = Some(shutdown.clone());
        self.start().await;

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let every = self.settings.config_refresh;
        let mut refresh = tokio::time::interval_at(Instant::now() + every, every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Bridge started");

        let result = loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutting down poll loop");
                        break Ok(());
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.cycle().await {
                        break Err(e);
                    }
                }
                _ = refresh.tick() => {
                    self.refresh_config().await;
                }
            }
        };

        self.close().await;
        result
    }

    /// Close the device session, if any.
    pub async fn close(&mut self) {
        if let Acquisition::Device(client) = &mut self.acquisition {
            client.close().await;
        }
    }

    async fn try_cycle(&mut self) -> Result<TransmitSummary, CycleError> {
        let readings = self.acquire().await?;
        Ok(self.transmitter.send_until(&readings, self.stop.as_ref()).await?)
    }

    async fn acquire(&mut self) -> Result<ReadingSet, ClientError> {
        let changed = self.tags_rx.has_changed().unwrap_or(false);
        let tags = self.tags_rx.borrow_and_update().clone();

        match &mut self.acquisition {
            Acquisition::Device(client) => client.read_all(&tags).await,
            Acquisition::Simulated(sim) => {
                if changed {
                    sim.reconcile(tags);
                }
                Ok(sim.step())
            }
        }
    }

    fn log_startup(&self) {
        let tags = self.registry.snapshot();
        match &self.acquisition {
            Acquisition::Device(client) => info!(mode = "device", endpoint = %client.endpoint(), "Acquisition"),
            Acquisition::Simulated(_) => info!(mode = "demo", "Acquisition"),
        }
        info!(
            sink = %self.transmitter.update_url(),
            config = %self.config_source.tags_url(),
            interval_secs = self.settings.poll_interval.as_secs(),
            refresh_secs = self.settings.config_refresh.as_secs(),
            tags = tags.len(),
            "Poll loop configured"
        );
        for tag in tags.iter() {
            info!(
                tag = %tag.name,
                address = tag.address,
                data_type = %tag.data_type,
                function = %tag.function,
                "Configured tag"
            );
        }
    }
}
