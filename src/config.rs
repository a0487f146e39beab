//! Configuration module for the VPN QA harness
//!
//! This module provides TOML-based configuration parsing and validation.
//! Every section is optional; missing fields fall back to the values the
//! suite has always run with.

use crate::error::{QaError, Result};
use crate::matrix::Technology;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Client-under-test settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name or path of the VPN command-line binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Environment variable holding the login token
    #[serde(default = "default_token_env")]
    pub login_token_env: String,
    /// Prefix privileged commands (`ip`, `iptables`, `systemctl`) with sudo
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            login_token_env: default_token_env(),
            use_sudo: true,
        }
    }
}

/// Background connectivity monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Address probed with a single ICMP echo request
    #[serde(default = "default_ping_target")]
    pub ping_target: String,
    /// Hostname resolved by the DNS watcher
    #[serde(default = "default_dns_target")]
    pub dns_target: String,
    /// Seconds between probes
    #[serde(default = "default_check_interval")]
    pub interval_secs: u64,
    /// Seconds `ping` waits for a reply
    #[serde(default = "default_ping_wait")]
    pub ping_wait_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ping_target: default_ping_target(),
            dns_target: default_dns_target(),
            interval_secs: default_check_interval(),
            ping_wait_secs: default_ping_wait(),
        }
    }
}

/// Test runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Per-attempt timeout in seconds
    #[serde(default = "default_case_timeout")]
    pub case_timeout_secs: u64,
    /// Extra attempts after a failure
    #[serde(default = "default_reruns")]
    pub reruns: u32,
    /// Delay between attempts in seconds
    #[serde(default = "default_reruns_delay")]
    pub reruns_delay_secs: u64,
    /// Daemon start/stop iterations of the loop scenario
    #[serde(default = "default_loop_iterations")]
    pub loop_iterations: u32,
    /// How long a timed out case may take to finish its running command
    #[serde(default = "default_abort_grace")]
    pub abort_grace_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            case_timeout_secs: default_case_timeout(),
            reruns: default_reruns(),
            reruns_delay_secs: default_reruns_delay(),
            loop_iterations: default_loop_iterations(),
            abort_grace_secs: default_abort_grace(),
        }
    }
}

/// Daemon service control commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_start")]
    pub start: Vec<String>,
    #[serde(default = "default_daemon_stop")]
    pub stop: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            start: default_daemon_start(),
            stop: default_daemon_stop(),
        }
    }
}

/// Parameters of the connection scenario matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConfig {
    #[serde(default = "default_technologies")]
    pub technologies: Vec<Technology>,
    #[serde(default = "default_standard_groups")]
    pub standard_groups: Vec<String>,
    #[serde(default = "default_additional_groups")]
    pub additional_groups: Vec<String>,
    #[serde(default = "default_countries")]
    pub countries: Vec<String>,
    #[serde(default = "default_cities")]
    pub cities: Vec<String>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            technologies: default_technologies(),
            standard_groups: default_standard_groups(),
            additional_groups: default_additional_groups(),
            countries: default_countries(),
            cities: default_cities(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl QaConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| QaError::Config(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| QaError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.client.binary.is_empty() {
            return Err(QaError::Config("Client binary cannot be empty".to_string()));
        }

        if self
            .monitor
            .ping_target
            .parse::<std::net::IpAddr>()
            .is_err()
        {
            return Err(QaError::Config(format!(
                "Ping target must be an IP address, got '{}'",
                self.monitor.ping_target
            )));
        }

        if self.monitor.dns_target.is_empty() {
            return Err(QaError::Config("DNS target cannot be empty".to_string()));
        }

        if self.monitor.interval_secs == 0 {
            return Err(QaError::Config(
                "Monitor interval must be at least one second".to_string(),
            ));
        }

        if self.runner.case_timeout_secs == 0 {
            return Err(QaError::Config("Case timeout cannot be zero".to_string()));
        }

        if self.daemon.start.is_empty() || self.daemon.stop.is_empty() {
            return Err(QaError::Config(
                "Daemon start and stop commands are required".to_string(),
            ));
        }

        // Countries and cities are zipped pairwise
        if self.matrix.countries.len() != self.matrix.cities.len() {
            return Err(QaError::Config(format!(
                "Got {} countries but {} cities",
                self.matrix.countries.len(),
                self.matrix.cities.len()
            )));
        }

        Ok(())
    }
}

impl FromStr for QaConfig {
    type Err = QaError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| QaError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_binary() -> String {
    "nordvpn".to_string()
}

fn default_token_env() -> String {
    "NA_TESTS_TOKEN".to_string()
}

fn default_ping_target() -> String {
    "1.1.1.1".to_string()
}

fn default_dns_target() -> String {
    "nordvpn.com".to_string()
}

fn default_check_interval() -> u64 {
    5
}

fn default_ping_wait() -> u64 {
    1
}

fn default_case_timeout() -> u64 {
    40
}

fn default_reruns() -> u32 {
    2
}

fn default_reruns_delay() -> u64 {
    90
}

fn default_loop_iterations() -> u32 {
    50
}

fn default_abort_grace() -> u64 {
    30
}

fn default_daemon_start() -> Vec<String> {
    vec!["systemctl".into(), "start".into(), "nordvpnd".into()]
}

fn default_daemon_stop() -> Vec<String> {
    vec!["systemctl".into(), "stop".into(), "nordvpnd".into()]
}

fn default_technologies() -> Vec<Technology> {
    vec![
        Technology::new("nordlynx", "", ""),
        Technology::new("openvpn", "udp", "off"),
        Technology::new("openvpn", "tcp", "off"),
        Technology::new("openvpn", "udp", "on"),
        Technology::new("openvpn", "tcp", "on"),
    ]
}

fn default_standard_groups() -> Vec<String> {
    [
        "Africa_The_Middle_East_And_India",
        "Asia_Pacific",
        "Europe",
        "The_Americas",
        "P2P",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_additional_groups() -> Vec<String> {
    vec!["Double_VPN".to_string(), "Onion_Over_VPN".to_string()]
}

fn default_countries() -> Vec<String> {
    ["Germany", "Japan", "United_States", "Canada"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cities() -> Vec<String> {
    ["Frankfurt", "Tokyo", "New_York", "Toronto"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[client]
binary = "/usr/bin/nordvpn"
use_sudo = false

[monitor]
ping_target = "8.8.8.8"
interval_secs = 10

[runner]
reruns = 0

[logging]
level = "debug"
"#;

        let config = toml_content
            .parse::<QaConfig>()
            .expect("Failed to parse config");
        assert_eq!(config.client.binary, "/usr/bin/nordvpn");
        assert!(!config.client.use_sudo);
        assert_eq!(config.monitor.ping_target, "8.8.8.8");
        assert_eq!(config.monitor.dns_target, "nordvpn.com");
        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.runner.reruns, 0);
        assert_eq!(config.runner.case_timeout_secs, 40);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: QaConfig = "".parse().expect("empty config parses");
        assert_eq!(config, QaConfig::default());
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.runner.reruns_delay_secs, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_technology_table() {
        let toml_content = r#"
[matrix]
technologies = [
    { technology = "nordlynx" },
    { technology = "openvpn", protocol = "tcp", obfuscated = "on" },
]
"#;
        let config: QaConfig = toml_content.parse().unwrap();
        assert_eq!(config.matrix.technologies.len(), 2);
        assert_eq!(config.matrix.technologies[0].protocol, "");
        assert!(config.matrix.technologies[1].is_obfuscated());
    }

    #[test]
    fn test_config_validation() {
        let mut config = QaConfig::default();
        assert!(config.validate().is_ok());

        config.monitor.ping_target = "one.one.one.one".to_string();
        assert!(config.validate().is_err());

        let mut config = QaConfig::default();
        config.matrix.cities.pop();
        assert!(config.validate().is_err());

        let mut config = QaConfig::default();
        config.client.binary = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let config = QaConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = QaConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = QaConfig::from_file("/nonexistent/vpnqa.toml").unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }
}
