//! Allowlist helper
//!
//! Adds and removes allowlisted ports, port ranges and subnets through the
//! client, then checks the result in three places: the message the client
//! printed, the `settings` listing, and routing table 205 where the client
//! installs routes that bypass the tunnel.

use crate::client::{AllowlistAction, ConnectionStatus, VpnClient};
use crate::error::{ensure, QaError, Result};
use crate::firewall::IP_ROUTE_TABLE;
use crate::network::Network;
use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use log::info;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

lazy_static! {
    static ref PRIVATE_NETWORKS: [Ipv4Net; 3] = [
        Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8).expect("valid prefix"),
        Ipv4Net::new(Ipv4Addr::new(172, 16, 0, 0), 12).expect("valid prefix"),
        Ipv4Net::new(Ipv4Addr::new(192, 168, 0, 0), 16).expect("valid prefix"),
    ];
}

/// Transport protocol of an allowlisted port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    All,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::All => write!(f, "UDP|TCP"),
        }
    }
}

/// A single port or an inclusive range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

impl PortSpec {
    /// Natural ordering key: by start, a range sorts after the single port
    pub fn sort_key(&self) -> (u16, Option<u16>) {
        match *self {
            PortSpec::Single(p) => (p, None),
            PortSpec::Range(start, end) => (start, Some(end)),
        }
    }

    /// Form used by `iptables -S` (`22` or `3000:4000`)
    pub fn iptables(&self) -> String {
        match *self {
            PortSpec::Single(p) => p.to_string(),
            PortSpec::Range(start, end) => format!("{start}:{end}"),
        }
    }
}

/// Form used by the client (`22` or `3000 - 4000`)
impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PortSpec::Single(p) => write!(f, "{p}"),
            PortSpec::Range(start, end) => write!(f, "{start} - {end}"),
        }
    }
}

impl FromStr for PortSpec {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u16>()
                .map_err(|e| QaError::Config(format!("Invalid port '{v}': {e}")))
        };
        match s.split_once(':') {
            Some((start, end)) => Ok(PortSpec::Range(parse(start)?, parse(end)?)),
            None => Ok(PortSpec::Single(parse(s)?)),
        }
    }
}

/// An allowlisted port or port range with its protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    pub spec: PortSpec,
    pub protocol: Protocol,
}

impl Port {
    pub fn new(spec: PortSpec, protocol: Protocol) -> Self {
        Self { spec, protocol }
    }

    /// Arguments after `allowlist add|remove`
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = match self.spec {
            PortSpec::Single(p) => vec!["port".to_string(), p.to_string()],
            PortSpec::Range(start, end) => {
                vec!["ports".to_string(), start.to_string(), end.to_string()]
            }
        };
        if self.protocol != Protocol::All {
            args.push("protocol".to_string());
            args.push(self.protocol.to_string());
        }
        args
    }

    /// How the port shows up in `settings`
    pub fn settings_entry(&self) -> String {
        format!(" {} ({})", self.spec, self.protocol)
    }

    pub fn expected_message(&self, action: AllowlistAction) -> String {
        match (self.spec, action) {
            (PortSpec::Single(_), AllowlistAction::Add) => {
                format!("Port {} ({}) is allowlisted successfully.", self.spec, self.protocol)
            }
            (PortSpec::Single(_), AllowlistAction::Remove) => format!(
                "Port {} ({}) is removed from the allowlist successfully.",
                self.spec, self.protocol
            ),
            (PortSpec::Range(..), AllowlistAction::Add) => {
                format!("Ports {} ({}) are allowlisted successfully.", self.spec, self.protocol)
            }
            (PortSpec::Range(..), AllowlistAction::Remove) => format!(
                "Ports {} ({}) are removed from the allowlist successfully.",
                self.spec, self.protocol
            ),
        }
    }
}

pub fn expected_subnet_message(subnet: &str, action: AllowlistAction) -> String {
    match action {
        AllowlistAction::Add => format!("Subnet {subnet} is allowlisted successfully."),
        AllowlistAction::Remove => {
            format!("Subnet {subnet} is removed from the allowlist successfully.")
        }
    }
}

/// Whether `subnet` overlaps any RFC 1918 range; unparsable input is not private
pub fn is_private_subnet(subnet: &str) -> bool {
    let net = subnet.parse::<Ipv4Net>().ok().or_else(|| {
        subnet
            .parse::<Ipv4Addr>()
            .ok()
            .and_then(|addr| Ipv4Net::new(addr, 32).ok())
    });
    let Some(net) = net else {
        return false;
    };
    PRIVATE_NETWORKS
        .iter()
        .any(|private| private.contains(&net.network()) || net.contains(&private.network()))
}

/// The client lists a `/32` subnet in table 205 as a bare address
fn route_form(subnet: &str) -> &str {
    subnet.strip_suffix("/32").unwrap_or(subnet)
}

/// Drives the allowlist of one client
pub struct Allowlist<'a> {
    client: &'a VpnClient,
    network: &'a Network,
    alias: String,
}

impl<'a> Allowlist<'a> {
    pub fn new(client: &'a VpnClient, network: &'a Network) -> Self {
        Self {
            client,
            network,
            alias: "allowlist".to_string(),
        }
    }

    /// Use another command alias, e.g. `whitelist`
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn add_ports(&self, ports: &[Port]) -> Result<()> {
        self.change_ports(ports, AllowlistAction::Add)
    }

    pub fn remove_ports(&self, ports: &[Port]) -> Result<()> {
        self.change_ports(ports, AllowlistAction::Remove)
    }

    pub fn add_subnets<S: AsRef<str>>(&self, subnets: &[S]) -> Result<()> {
        for subnet in subnets {
            let subnet = subnet.as_ref();
            let output =
                self.client
                    .allowlist(&self.alias, AllowlistAction::Add, &["subnet", subnet])?;
            check_message(&output, &expected_subnet_message(subnet, AllowlistAction::Add))?;

            let settings = self.client.settings()?;
            ensure(settings.matches(subnet).count() == 1, || {
                format!("Subnet {subnet} not found or found more than once in `settings`")
            })?;

            let route = route_form(subnet);
            let table = self.network.route_table(IP_ROUTE_TABLE)?;
            let connected = self.client.connection_status()? == ConnectionStatus::Connected;
            if connected && !is_private_subnet(route) {
                ensure(table.contains(route), || {
                    format!("Subnet {route} not found in `ip route show table {IP_ROUTE_TABLE}`\n{table}")
                })?;
            } else {
                ensure(!table.contains(route), || {
                    format!("Subnet {route} found in `ip route show table {IP_ROUTE_TABLE}`")
                })?;
            }
        }
        Ok(())
    }

    pub fn remove_subnets<S: AsRef<str>>(&self, subnets: &[S]) -> Result<()> {
        for subnet in subnets {
            let subnet = subnet.as_ref();
            let output =
                self.client
                    .allowlist(&self.alias, AllowlistAction::Remove, &["subnet", subnet])?;
            check_message(&output, &expected_subnet_message(subnet, AllowlistAction::Remove))?;

            let settings = self.client.settings()?;
            ensure(!settings.contains(subnet), || {
                format!("Subnet {subnet} found in `settings`")
            })?;

            let route = route_form(subnet);
            if !is_private_subnet(route) {
                let table = self.network.route_table(IP_ROUTE_TABLE)?;
                ensure(!table.contains(route), || {
                    format!("Subnet {route} found in `ip route show table {IP_ROUTE_TABLE}`")
                })?;
            }
        }
        Ok(())
    }

    fn change_ports(&self, ports: &[Port], action: AllowlistAction) -> Result<()> {
        for port in ports {
            let args = port.cli_args();
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let output = self.client.allowlist(&self.alias, action, &args)?;
            info!("{}", output.trim_end());

            let settings = self.client.settings()?;
            let found = settings.matches(&port.settings_entry()).count();
            match action {
                AllowlistAction::Add => ensure(found == 1, || {
                    format!("Port(range){} not found or found more than once in `settings`", port.settings_entry())
                })?,
                AllowlistAction::Remove => ensure(found == 0, || {
                    format!("Port(range){} found in `settings`", port.settings_entry())
                })?,
            }

            check_message(&output, &port.expected_message(action))?;
        }
        Ok(())
    }
}

fn check_message(output: &str, expected: &str) -> Result<()> {
    ensure(output.contains(expected), || {
        format!("Wrong allowlist message.\nExpected: {expected}\nGot: {output}")
    })
}
