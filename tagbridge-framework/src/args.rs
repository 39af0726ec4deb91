//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
///
/// Bridges embed this with `#[command(flatten)]` and add their own flags.
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "TagBridge field-device bridge")]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5). Built-in defaults apply when omitted.
    #[arg(short, long, env = "BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}
