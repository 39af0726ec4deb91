//! TagBridge Bridge Framework
//!
//! Common abstractions for building bridges that poll a field device and
//! forward readings upstream.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (logging, signal handling, shutdown)
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`wait_for_shutdown`] for SIGINT/SIGTERM handling
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use tagbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse();
//!     let config = MyBridgeConfig::read_or_default(args.config.as_deref())?;
//!     config.validate()?;
//!
//!     let runner = BridgeRunner::new("mybridge", &config, &args)?;
//!     let shutdown = runner.shutdown_receiver();
//!
//!     runner.run(my_worker(config, shutdown)).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;
mod shutdown;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use runner::BridgeRunner;
pub use shutdown::wait_for_shutdown;

// Re-export commonly used types from tagbridge-common
pub use tagbridge_common::{LogFormat, LoggingConfig, Reading, ReadingSet, TagValue};
