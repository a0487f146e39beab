//! Host network state queries
//!
//! Wraps `ip route` and the connectivity probes so scenarios can ask
//! plain questions: is the internet reachable, is the tunnel up, which
//! interface carries the default route, what is in a routing table.

use crate::client::{ConnectionStatus, VpnClient};
use crate::command::CommandRunner;
use crate::error::{QaError, Result};
use crate::probe::Probe;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    static ref DEFAULT_DEV: Regex =
        Regex::new(r"^default\s.*?\bdev\s+(\S+)").expect("default route pattern is valid");
}

/// Answers questions about the host network
#[derive(Clone)]
pub struct Network {
    runner: Arc<dyn CommandRunner>,
    reachability: Arc<dyn Probe>,
    client: VpnClient,
}

impl Network {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        reachability: Arc<dyn Probe>,
        client: VpnClient,
    ) -> Self {
        Self {
            runner,
            reachability,
            client,
        }
    }

    /// Whether the host currently has internet connectivity
    pub fn is_available(&self) -> bool {
        match self.reachability.check() {
            Ok(()) => true,
            Err(e) => {
                debug!("Connectivity check against {} failed: {e}", self.reachability.target());
                false
            }
        }
    }

    /// The client reports a connection and traffic flows through it
    pub fn is_connected(&self) -> Result<bool> {
        Ok(self.client.connection_status()? == ConnectionStatus::Connected && self.is_available())
    }

    pub fn is_disconnected(&self) -> Result<bool> {
        Ok(self.client.connection_status()? == ConnectionStatus::Disconnected)
    }

    /// Name of the interface carrying the default route
    pub fn default_interface(&self) -> Result<String> {
        let routes = self.runner.run("ip", &["route", "show", "default"])?;
        parse_default_interface(&routes).ok_or_else(|| {
            QaError::Assertion(format!("No default route in `ip route show default`:\n{routes}"))
        })
    }

    /// Output of `ip route show table <table>`
    pub fn route_table(&self, table: u32) -> Result<String> {
        self.runner
            .run("ip", &["route", "show", "table", &table.to_string()])
    }

    /// Output of `ip route`
    pub fn routes(&self) -> Result<String> {
        self.runner.run("ip", &["route"])
    }
}

/// Pick the device of the first default route
pub fn parse_default_interface(routes: &str) -> Option<String> {
    routes
        .lines()
        .find_map(|line| DEFAULT_DEV.captures(line.trim()))
        .map(|c| c[1].to_string())
}
