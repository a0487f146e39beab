//! VPN Client - typed wrapper around the command-line client under test
//!
//! The client binary is an opaque collaborator: every method here builds a
//! command line, runs it and returns the text the binary printed. The
//! classifiers at the bottom of the module interpret that text.

use crate::command::CommandRunner;
use crate::error::{QaError, Result};
use crate::matrix::Technology;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::sync::Arc;

/// Printed by `connect` on success
pub const MSG_CONNECT_SUCCESS: &str = "You are connected to";
/// Printed by `disconnect` on success
pub const MSG_DISCONNECT_SUCCESS: &str = "You are disconnected from NordVPN.";

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"(?i)\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])")
        .expect("ANSI escape pattern is valid");
    static ref STATUS_LINE: Regex =
        Regex::new(r"(?m)^\s*Status:\s*(\w+)").expect("status pattern is valid");
}

/// Connection status as reported by `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Unknown,
}

/// Allowlist mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowlistAction {
    Add,
    Remove,
}

impl AllowlistAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowlistAction::Add => "add",
            AllowlistAction::Remove => "remove",
        }
    }
}

/// The VPN command-line client
#[derive(Clone)]
pub struct VpnClient {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl VpnClient {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run an arbitrary subcommand and return stdout with colors stripped
    pub fn exec(&self, args: &[&str]) -> Result<String> {
        let output = self.runner.run(&self.binary, args)?;
        Ok(strip_colors(&output))
    }

    /// `connect [args...]`; empty args connect to the recommended server
    pub fn connect(&self, args: &[&str]) -> Result<String> {
        let mut cmd = vec!["connect"];
        cmd.extend_from_slice(args);
        let output = self.exec(&cmd)?;
        info!("{}", output.trim_end());
        Ok(output)
    }

    pub fn disconnect(&self) -> Result<String> {
        let output = self.exec(&["disconnect"])?;
        info!("{}", output.trim_end());
        Ok(output)
    }

    pub fn status(&self) -> Result<String> {
        self.exec(&["status"])
    }

    pub fn settings(&self) -> Result<String> {
        self.exec(&["settings"])
    }

    /// Parsed connection status
    pub fn connection_status(&self) -> Result<ConnectionStatus> {
        Ok(parse_status(&self.status()?))
    }

    /// `set <setting> <value>`
    pub fn set(&self, setting: &str, value: &str) -> Result<String> {
        let output = self.exec(&["set", setting, value])?;
        debug!("{}", output.trim_end());
        Ok(output)
    }

    /// Switch technology, then protocol and obfuscation when given
    ///
    /// An empty protocol or obfuscation value leaves that setting alone.
    pub fn set_technology_and_protocol(&self, technology: &Technology) -> Result<()> {
        self.set("technology", &technology.technology)?;
        if !technology.protocol.is_empty() {
            self.set("protocol", &technology.protocol)?;
        }
        if !technology.obfuscated.is_empty() {
            self.set("obfuscate", &technology.obfuscated)?;
        }
        Ok(())
    }

    /// `<alias> add|remove <args...>`
    pub fn allowlist(&self, alias: &str, action: AllowlistAction, args: &[&str]) -> Result<String> {
        let mut cmd = vec![alias, action.as_str()];
        cmd.extend_from_slice(args);
        self.exec(&cmd)
    }

    pub fn login_with_token(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(QaError::Config("Login token is empty".to_string()));
        }
        self.exec(&["login", "--token", token])
    }

    pub fn logout_persist_token(&self) -> Result<String> {
        self.exec(&["logout", "--persist-token"])
    }

    pub fn is_killswitch_on(&self) -> Result<bool> {
        Ok(setting_enabled(&self.settings()?, "Kill Switch"))
    }
}

/// Remove ANSI escape sequences the client prints around its messages
pub fn strip_colors(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

pub fn is_connect_successful(output: &str) -> bool {
    output.contains(MSG_CONNECT_SUCCESS)
}

pub fn is_disconnect_successful(output: &str) -> bool {
    output.contains(MSG_DISCONNECT_SUCCESS)
}

/// Read the `Status:` line of `status` output
pub fn parse_status(output: &str) -> ConnectionStatus {
    match STATUS_LINE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        Some("Connected") => ConnectionStatus::Connected,
        Some("Connecting") => ConnectionStatus::Connecting,
        Some("Disconnected") => ConnectionStatus::Disconnected,
        _ => ConnectionStatus::Unknown,
    }
}

/// Whether `settings` output shows `<name>: enabled`
pub fn setting_enabled(settings: &str, name: &str) -> bool {
    settings.lines().any(|line| {
        let mut parts = line.splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(key), Some(value)) => {
                key.trim().eq_ignore_ascii_case(name) && value.trim().eq_ignore_ascii_case("enabled")
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use crate::command::CommandOutput;

    const STATUS_CONNECTED: &str = "Status: Connected\nHostname: de1042.nordvpn.com\n\
        Country: Germany\nCity: Frankfurt\nCurrent technology: NORDLYNX\nCurrent protocol: UDP\n";

    fn client(runner: ScriptedRunner) -> (VpnClient, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (VpnClient::new("nordvpn", runner.clone()), runner)
    }

    #[test]
    fn test_strip_colors() {
        let colored = "\x1b[32mYou are connected to Germany #1042 (de1042.nordvpn.com)!\x1b[0m";
        assert_eq!(
            strip_colors(colored),
            "You are connected to Germany #1042 (de1042.nordvpn.com)!"
        );
        assert_eq!(strip_colors("\r-\r  \r"), "\r-\r  \r");
    }

    #[test]
    fn test_output_classifiers() {
        assert!(is_connect_successful("Connecting to Japan #512\nYou are connected to Japan #512"));
        assert!(!is_connect_successful("Whoops! Connection failed."));
        assert!(is_disconnect_successful("You are disconnected from NordVPN.\nHow would you rate"));
        assert!(!is_disconnect_successful("You are not connected to NordVPN."));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(STATUS_CONNECTED), ConnectionStatus::Connected);
        assert_eq!(parse_status("Status: Disconnected\n"), ConnectionStatus::Disconnected);
        assert_eq!(parse_status("  Status: Connecting"), ConnectionStatus::Connecting);
        assert_eq!(parse_status("garbage"), ConnectionStatus::Unknown);
    }

    #[test]
    fn test_connect_builds_arguments() {
        let (client, runner) = client(ScriptedRunner::new().always(
            "nordvpn connect",
            CommandOutput::success("You are connected to Germany #1042"),
        ));

        assert!(is_connect_successful(&client.connect(&["Germany", "Frankfurt"]).unwrap()));
        assert!(is_connect_successful(&client.connect(&[]).unwrap()));
        assert_eq!(
            runner.calls(),
            vec!["nordvpn connect Germany Frankfurt", "nordvpn connect"]
        );
    }

    #[test]
    fn test_set_technology_skips_empty_fields() {
        let (client, runner) =
            client(ScriptedRunner::new().always("nordvpn set", CommandOutput::success("ok")));

        client
            .set_technology_and_protocol(&Technology::new("nordlynx", "", ""))
            .unwrap();
        client
            .set_technology_and_protocol(&Technology::new("openvpn", "tcp", "on"))
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "nordvpn set technology nordlynx",
                "nordvpn set technology openvpn",
                "nordvpn set protocol tcp",
                "nordvpn set obfuscate on",
            ]
        );
    }

    #[test]
    fn test_allowlist_command() {
        let (client, runner) = client(
            ScriptedRunner::new().always("nordvpn allowlist", CommandOutput::success("done")),
        );
        client
            .allowlist("allowlist", AllowlistAction::Remove, &["port", "22", "protocol", "TCP"])
            .unwrap();
        assert_eq!(runner.calls(), vec!["nordvpn allowlist remove port 22 protocol TCP"]);
    }

    #[test]
    fn test_failed_command_propagates() {
        let (client, _) = client(ScriptedRunner::new().always(
            "nordvpn connect",
            CommandOutput::failure(1, "The specified server does not exist."),
        ));
        assert!(matches!(
            client.connect(&["Atlantis"]),
            Err(QaError::CommandFailed { .. })
        ));
    }

    #[test]
    fn test_login_rejects_empty_token() {
        let (client, runner) = client(ScriptedRunner::new());
        assert!(matches!(client.login_with_token(""), Err(QaError::Config(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_setting_enabled() {
        let settings = "Technology: NORDLYNX\nFirewall: enabled\nKill Switch: disabled\n";
        assert!(setting_enabled(settings, "Firewall"));
        assert!(!setting_enabled(settings, "Kill Switch"));
        assert!(!setting_enabled(settings, "Meshnet"));
    }
}
