//! Connection scenario matrix
//!
//! Expands the configured technologies, server groups and locations into
//! named test cases. Case names follow `scenario[param-param-...]` so a run
//! can be filtered and reports read the same way every time.

use crate::config::MatrixConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A technology / protocol / obfuscation combination
///
/// Empty `protocol` or `obfuscated` means the setting is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Technology {
    pub technology: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub obfuscated: String,
}

impl Technology {
    pub fn new(technology: &str, protocol: &str, obfuscated: &str) -> Self {
        Self {
            technology: technology.to_string(),
            protocol: protocol.to_string(),
            obfuscated: obfuscated.to_string(),
        }
    }

    pub fn is_obfuscated(&self) -> bool {
        self.obfuscated == "on"
    }

    pub fn is_openvpn(&self) -> bool {
        self.technology == "openvpn"
    }

    /// Protocol name expected in `status` once connected with this technology
    pub fn expected_status_protocol(&self) -> String {
        if self.is_openvpn() {
            self.protocol.to_uppercase()
        } else {
            "UDP".to_string()
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.technology, self.protocol, self.obfuscated)
    }
}

/// One parametrized connection scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Connect to a server group, then disconnect
    ConnectToGroup {
        technology: Technology,
        group: String,
        additional: bool,
    },
    /// Connect with one technology, reconnect with another, disconnect
    Reconnect {
        source: Technology,
        target: Technology,
        obfuscated_target: bool,
    },
    /// Connect to a country, then a city, then both, then disconnect
    CountryAndCity { country: String, city: String },
    /// Changing technology while connected leaves `status` unchanged
    StatusAfterTechnologyChange { source: Technology, target: Technology },
    /// Reconnecting after a technology change updates `status`
    StatusAfterTechnologyChangeReconnect { source: Technology, target: Technology },
    /// Start and stop the daemon repeatedly
    DaemonLoop { iterations: u32 },
}

impl Scenario {
    pub fn base_name(&self) -> &'static str {
        match self {
            Scenario::ConnectToGroup {
                additional: false, ..
            } => "test_connect_to_standard_group",
            Scenario::ConnectToGroup {
                additional: true, ..
            } => "test_connect_to_additional_group",
            Scenario::Reconnect {
                obfuscated_target: false,
                ..
            } => "test_reconnect_matrix_standard",
            Scenario::Reconnect {
                obfuscated_target: true,
                ..
            } => "test_reconnect_matrix_obfuscated",
            Scenario::CountryAndCity { .. } => "test_connect_country_and_city",
            Scenario::StatusAfterTechnologyChange { .. } => {
                "test_status_change_technology_and_protocol"
            }
            Scenario::StatusAfterTechnologyChangeReconnect { .. } => {
                "test_status_change_technology_and_protocol_reconnect"
            }
            Scenario::DaemonLoop { .. } => "test_loop",
        }
    }

    /// Full case name including parameters
    pub fn name(&self) -> String {
        let params = match self {
            Scenario::ConnectToGroup {
                technology, group, ..
            } => format!("{technology}-{group}"),
            Scenario::Reconnect { source, target, .. }
            | Scenario::StatusAfterTechnologyChange { source, target }
            | Scenario::StatusAfterTechnologyChangeReconnect { source, target } => {
                format!("{source}-{target}")
            }
            Scenario::CountryAndCity { country, city } => format!("{country}-{city}"),
            Scenario::DaemonLoop { iterations } => iterations.to_string(),
        };
        format!("{}[{}]", self.base_name(), params)
    }

    /// Whether the case needs the session-wide daemon and login
    pub fn needs_session(&self) -> bool {
        !matches!(self, Scenario::DaemonLoop { .. })
    }
}

/// Technology lists derived from the configured combinations
pub struct TechnologySets {
    pub all: Vec<Technology>,
    pub standard: Vec<Technology>,
    pub obfuscated: Vec<Technology>,
}

impl TechnologySets {
    pub fn from_config(config: &MatrixConfig) -> Self {
        let all = config.technologies.clone();
        let (obfuscated, standard): (Vec<_>, Vec<_>) = all.iter().cloned().partition(|t| t.is_obfuscated());
        Self {
            all,
            standard,
            obfuscated,
        }
    }
}

fn product<'a>(
    sources: &'a [Technology],
    targets: &'a [Technology],
) -> impl Iterator<Item = (Technology, Technology)> + 'a {
    sources
        .iter()
        .flat_map(move |s| targets.iter().map(move |t| (s.clone(), t.clone())))
}

/// Expand the whole connection matrix
pub fn connection_scenarios(config: &MatrixConfig) -> Vec<Scenario> {
    let sets = TechnologySets::from_config(config);
    let mut scenarios = Vec::new();

    for technology in &sets.all {
        for group in &config.standard_groups {
            scenarios.push(Scenario::ConnectToGroup {
                technology: technology.clone(),
                group: group.clone(),
                additional: false,
            });
        }
    }

    for technology in &sets.standard {
        for group in &config.additional_groups {
            scenarios.push(Scenario::ConnectToGroup {
                technology: technology.clone(),
                group: group.clone(),
                additional: true,
            });
        }
    }

    for (source, target) in product(&sets.all, &sets.standard) {
        scenarios.push(Scenario::Reconnect {
            source,
            target,
            obfuscated_target: false,
        });
    }

    for (source, target) in product(&sets.all, &sets.obfuscated) {
        scenarios.push(Scenario::Reconnect {
            source,
            target,
            obfuscated_target: true,
        });
    }

    for (country, city) in config.countries.iter().zip(&config.cities) {
        scenarios.push(Scenario::CountryAndCity {
            country: country.clone(),
            city: city.clone(),
        });
    }

    for (source, target) in product(&sets.standard, &sets.standard) {
        scenarios.push(Scenario::StatusAfterTechnologyChange { source, target });
    }

    for (source, target) in product(&sets.standard, &sets.standard) {
        scenarios.push(Scenario::StatusAfterTechnologyChangeReconnect { source, target });
    }

    scenarios
}

/// Keep only scenarios whose name contains `filter`
pub fn filter_scenarios(scenarios: Vec<Scenario>, filter: Option<&str>) -> Vec<Scenario> {
    match filter {
        Some(f) if !f.is_empty() => scenarios.into_iter().filter(|s| s.name().contains(f)).collect(),
        _ => scenarios,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MatrixConfig {
        MatrixConfig {
            technologies: vec![
                Technology::new("nordlynx", "", ""),
                Technology::new("openvpn", "udp", "off"),
                Technology::new("openvpn", "tcp", "on"),
            ],
            standard_groups: vec!["P2P".into(), "Europe".into()],
            additional_groups: vec!["Double_VPN".into()],
            countries: vec!["Germany".into(), "Japan".into()],
            cities: vec!["Frankfurt".into(), "Tokyo".into()],
        }
    }

    #[test]
    fn test_technology_sets_partition() {
        let sets = TechnologySets::from_config(&small_config());
        assert_eq!(sets.all.len(), 3);
        assert_eq!(sets.standard.len(), 2);
        assert_eq!(sets.obfuscated, vec![Technology::new("openvpn", "tcp", "on")]);
    }

    #[test]
    fn test_scenario_counts() {
        let scenarios = connection_scenarios(&small_config());
        let count = |base: &str| scenarios.iter().filter(|s| s.base_name() == base).count();

        assert_eq!(count("test_connect_to_standard_group"), 3 * 2);
        assert_eq!(count("test_connect_to_additional_group"), 2);
        assert_eq!(count("test_reconnect_matrix_standard"), 3 * 2);
        assert_eq!(count("test_reconnect_matrix_obfuscated"), 3);
        assert_eq!(count("test_connect_country_and_city"), 2);
        assert_eq!(count("test_status_change_technology_and_protocol"), 4);
        assert_eq!(count("test_status_change_technology_and_protocol_reconnect"), 4);
    }

    #[test]
    fn test_case_names() {
        let scenario = Scenario::ConnectToGroup {
            technology: Technology::new("nordlynx", "", ""),
            group: "P2P".into(),
            additional: false,
        };
        assert_eq!(scenario.name(), "test_connect_to_standard_group[nordlynx---P2P]");

        let scenario = Scenario::CountryAndCity {
            country: "Japan".into(),
            city: "Tokyo".into(),
        };
        assert_eq!(scenario.name(), "test_connect_country_and_city[Japan-Tokyo]");
        assert_eq!(Scenario::DaemonLoop { iterations: 50 }.name(), "test_loop[50]");
    }

    #[test]
    fn test_expected_status_protocol() {
        assert_eq!(Technology::new("openvpn", "tcp", "off").expected_status_protocol(), "TCP");
        assert_eq!(Technology::new("nordlynx", "", "").expected_status_protocol(), "UDP");
    }

    #[test]
    fn test_filter() {
        let scenarios = connection_scenarios(&small_config());
        let total = scenarios.len();
        let city = filter_scenarios(scenarios.clone(), Some("country_and_city[Japan"));
        assert_eq!(city.len(), 1);
        assert_eq!(filter_scenarios(scenarios, None).len(), total);
    }

    #[test]
    fn test_daemon_loop_skips_session() {
        assert!(!Scenario::DaemonLoop { iterations: 1 }.needs_session());
        assert!(Scenario::CountryAndCity {
            country: "a".into(),
            city: "b".into()
        }
        .needs_session());
    }
}
