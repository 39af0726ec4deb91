//! Modbus TCP to HTTP telemetry bridge.
//!
//! Reads the configured tags from a Modbus device (or simulates them in
//! demo mode) and upserts each value to the telemetry sink.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tagbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use tagbridge_modbus::{Overrides, PollLoop, TagBridgeConfig};

/// Modbus tag bridge.
#[derive(Parser, Debug)]
#[command(name = "tagbridge-modbus")]
#[command(about = "Polls Modbus tags and upserts them to an HTTP telemetry sink")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: BridgeArgs,

    /// Device host.
    #[arg(long, env = "PLC_IP")]
    plc_host: Option<String>,

    /// Device TCP port.
    #[arg(long, env = "PLC_PORT")]
    plc_port: Option<u16>,

    /// Simulate the device instead of reading it. Only the exact value
    /// `false` disables simulation.
    #[arg(long, env = "DEMO", action = ArgAction::Set, value_parser = parse_demo)]
    demo: Option<bool>,

    /// Seconds between poll cycles.
    #[arg(long, env = "BRIDGE_POLL_SEC")]
    poll_secs: Option<u64>,

    /// Telemetry sink URL; only its origin is used.
    #[arg(long, env = "CLOUD_API_URL")]
    sink_url: Option<String>,

    /// Tag config source URL (default: the sink's origin).
    #[arg(long, env = "CONFIG_API_URL")]
    config_url: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.plc_host.clone(),
            port: self.plc_port,
            demo: self.demo,
            poll_interval_secs: self.poll_secs,
            sink_url: self.sink_url.clone(),
            config_url: self.config_url.clone(),
        }
    }
}

/// Demo stays on unless explicitly switched off.
fn parse_demo(value: &str) -> std::result::Result<bool, String> {
    Ok(value.trim() != "false")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TagBridgeConfig::read_or_default(args.common.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.common.config))?;
    config.apply_overrides(args.overrides());
    config.validate().context("Invalid configuration")?;

    let runner = BridgeRunner::new("tagbridge-modbus", &config, &args.common)?
        .with_grace_period(config.shutdown_grace_period());
    let mut poll_loop = PollLoop::from_config(&config).context("Failed to set up poll loop")?;
    let shutdown = runner.shutdown_receiver();

    runner.run(poll_loop.run(shutdown)).await?;
    Ok(())
}
