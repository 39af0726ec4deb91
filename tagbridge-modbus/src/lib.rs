//! Modbus TCP to HTTP telemetry bridge.
//!
//! Polls a configurable set of named tags from one Modbus device (or a
//! simulated one) and upserts each value to a telemetry sink over HTTP.
//!
//! # Endpoints
//!
//! ```text
//! POST {sink}/api/plc/update   {"tag": "<name>", "value": <bool|number>}
//! GET  {config}/api/plc/tags   [{"tag", "address", "type", "function", "label"?, "unit"?}]
//! ```
//!
//! Tags sharing a register function are read with a single bulk request.
//! The tag list is refreshed from the config endpoint on a slower timer
//! than the poll interval.

pub mod client;
pub mod codec;
pub mod config;
pub mod config_source;
pub mod poller;
pub mod simulator;
pub mod tags;
pub mod transmitter;

pub use client::{ClientError, ClientState, Connector, ProtocolClient, RegisterReader, TcpConnector};
pub use config::{Overrides, TagBridgeConfig};
pub use config_source::{ConfigFetchError, ConfigSource};
pub use poller::{Acquisition, CycleError, PollError, PollLoop, PollSettings};
pub use simulator::Simulator;
pub use tags::{DataType, RegisterFunction, TagDefinition, TagRegistry, TagSnapshot};
pub use transmitter::{TransmitError, TransmitSummary, Transmitter};
