//! Firewall verifier
//!
//! Computes the ordered `iptables -S` rule list the client is expected to
//! install for the current state (kill switch, connection, allowlisted
//! ports and subnets) and compares it with what the kernel reports.
//!
//! IPv6 rules are not covered.

use crate::allowlist::{Port, Protocol};
use crate::client::{ConnectionStatus, VpnClient};
use crate::command::CommandRunner;
use crate::error::Result;
use crate::network::Network;
use log::info;
use std::sync::Arc;

/// Routing table holding the allowlist bypass routes
pub const IP_ROUTE_TABLE: u32 = 205;

/// Connection mark the client sets on tunnel traffic
pub const CONNMARK: &str = "0xe1f1";

const COMMENT: &str = "-m comment --comment nordvpn";

fn input_tail(iface: &str) -> Vec<String> {
    vec![
        format!("-A INPUT -i {iface} -m connmark --mark {CONNMARK} {COMMENT} -j ACCEPT"),
        format!("-A INPUT -i {iface} {COMMENT} -j DROP"),
    ]
}

fn output_tail(iface: &str) -> Vec<String> {
    vec![
        format!(
            "-A OUTPUT -o {iface} -m mark --mark {CONNMARK} {COMMENT} -j CONNMARK --save-mark --nfmask 0xffffffff --ctmask 0xffffffff"
        ),
        format!("-A OUTPUT -o {iface} -m connmark --mark {CONNMARK} {COMMENT} -j ACCEPT"),
        format!("-A OUTPUT -o {iface} {COMMENT} -j DROP"),
    ]
}

fn port_rules(chain: &str, iface: &str, udp: &[Port], tcp: &[Port]) -> Vec<String> {
    let flag = if chain == "INPUT" { "-i" } else { "-o" };
    let mut rules = Vec::new();
    for (proto, ports) in [("udp", udp), ("tcp", tcp)] {
        for port in ports {
            let value = port.spec.iptables();
            for direction in ["--dport", "--sport"] {
                rules.push(format!(
                    "-A {chain} {flag} {iface} -p {proto} -m {proto} {direction} {value} {COMMENT} -j ACCEPT"
                ));
            }
        }
    }
    rules
}

fn subnet_rules(chain: &str, iface: &str, subnets: &[String]) -> Vec<String> {
    let (addr_flag, if_flag) = if chain == "INPUT" { ("-s", "-i") } else { ("-d", "-o") };
    subnets
        .iter()
        .map(|subnet| format!("-A {chain} {addr_flag} {subnet} {if_flag} {iface} {COMMENT} -j ACCEPT"))
        .collect()
}

/// Rules while disconnected with the kill switch on
pub fn rules_killswitch_on(iface: &str) -> Vec<String> {
    let mut rules = input_tail(iface);
    rules.extend(output_tail(iface));
    rules
}

/// Rules while connected with an empty allowlist
pub fn rules_connected(iface: &str) -> Vec<String> {
    rules_killswitch_on(iface)
}

/// Rules while connected with allowlisted subnets
pub fn rules_allowlist_subnets(iface: &str, subnets: &[String]) -> Vec<String> {
    rules_allowlist(iface, subnets, &[])
}

/// Rules while connected with allowlisted ports
pub fn rules_allowlist_ports(iface: &str, ports: &[Port]) -> Vec<String> {
    rules_allowlist(iface, &[], ports)
}

/// Rules while connected with allowlisted ports and subnets
///
/// Within each chain: port rules (UDP first, then TCP), subnet rules,
/// then the fixed tail.
pub fn rules_allowlist(iface: &str, subnets: &[String], ports: &[Port]) -> Vec<String> {
    let (udp, tcp) = sort_ports_by_protocol(ports);

    let mut rules = port_rules("INPUT", iface, &udp, &tcp);
    rules.extend(subnet_rules("INPUT", iface, subnets));
    rules.extend(input_tail(iface));
    rules.extend(port_rules("OUTPUT", iface, &udp, &tcp));
    rules.extend(subnet_rules("OUTPUT", iface, subnets));
    rules.extend(output_tail(iface));
    rules
}

/// Split ports into UDP and TCP lists, both in descending natural order
///
/// Ports allowlisted for all protocols appear in both lists.
pub fn sort_ports_by_protocol(ports: &[Port]) -> (Vec<Port>, Vec<Port>) {
    let mut udp = Vec::new();
    let mut tcp = Vec::new();
    for port in ports {
        match port.protocol {
            Protocol::Udp => udp.push(*port),
            Protocol::Tcp => tcp.push(*port),
            Protocol::All => {
                udp.push(*port);
                tcp.push(*port);
            }
        }
    }
    udp.sort_by(|a, b| b.spec.sort_key().cmp(&a.spec.sort_key()));
    tcp.sort_by(|a, b| b.spec.sort_key().cmp(&a.spec.sort_key()));
    (udp, tcp)
}

/// Reads and predicts the host firewall
pub struct Firewall {
    root: Arc<dyn CommandRunner>,
    network: Network,
    client: VpnClient,
}

impl Firewall {
    /// `root` must be able to run `iptables`
    pub fn new(root: Arc<dyn CommandRunner>, network: Network, client: VpnClient) -> Self {
        Self {
            root,
            network,
            client,
        }
    }

    /// Rules the client should have installed right now
    pub fn expected_rules(&self, ports: &[Port], subnets: &[String]) -> Result<Vec<String>> {
        let mut subnets = subnets.to_vec();
        subnets.sort_by(|a, b| b.cmp(a));

        let iface = self.network.default_interface()?;
        info!("Default gateway: {iface}");

        let connected = self.client.connection_status()? == ConnectionStatus::Connected;
        if !connected && self.client.is_killswitch_on()? {
            return Ok(rules_killswitch_on(&iface));
        }

        Ok(match (ports.is_empty(), subnets.is_empty()) {
            (true, true) => rules_connected(&iface),
            (true, false) => rules_allowlist_subnets(&iface, &subnets),
            (false, true) => rules_allowlist_ports(&iface, ports),
            (false, false) => rules_allowlist(&iface, &subnets, ports),
        })
    }

    /// Current rules without the three chain policy lines
    pub fn current_rules(&self) -> Result<Vec<String>> {
        let output = self.root.run("iptables", &["-S"])?;
        Ok(output.lines().skip(3).map(str::to_string).collect())
    }

    /// Whether every expected rule is present, in order, and nothing else
    pub fn is_active(&self, ports: &[Port], subnets: &[String]) -> Result<bool> {
        info!("{}", self.network.routes()?.trim_end());

        let expected = self.expected_rules(ports, subnets)?;
        info!("Expected rules:\n{}", expected.join("\n"));

        let current = self.current_rules()?;
        info!("Current rules:\n{}", current.join("\n"));

        info!("{}", self.client.settings()?.trim_end());
        Ok(current == expected)
    }

    /// Whether the firewall holds no DROP rule
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root.run("iptables", &["-S"])?.contains("DROP"))
    }
}
