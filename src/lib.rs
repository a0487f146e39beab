//! vpnqa - End-to-end QA harness for a command-line VPN client
//!
//! The harness drives the client binary through its command line, checks
//! its messages, and verifies the effects on the host: connectivity, the
//! routing table and the firewall rules the client installs.
//!
//! ## What The Harness Provides
//! - Background connectivity monitoring (ICMP reachability and DNS resolution)
//! - A pre-test connectivity gate that fails a case instead of the session
//! - A typed wrapper around the client CLI and its output
//! - Expected firewall rule sets for kill switch, connection and allowlist states
//! - A parametrized connection matrix run with timeouts and reruns
//!
//! ## Configuration
//! Everything host-specific lives in a TOML file, see [`config::QaConfig`].

pub mod allowlist;
pub mod client;
pub mod command;
pub mod config;
pub mod daemon;
pub mod error;
pub mod firewall;
pub mod gate;
pub mod logging;
pub mod matrix;
pub mod monitor;
pub mod network;
pub mod probe;
pub mod runner;

// Re-export core types
pub use client::{ConnectionStatus, VpnClient};
pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use config::QaConfig;
pub use error::{QaError, Result};
pub use matrix::{Scenario, Technology};
pub use monitor::{start_session_monitoring, SessionMonitor};
pub use runner::{Harness, RunPolicy, Runner, SessionReport};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
