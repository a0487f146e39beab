//! Test session runner
//!
//! A session starts the connectivity monitor, brings the daemon up and logs
//! in, then runs every case through the pre-test gate, a wall-clock timeout
//! and a bounded number of reruns. Diagnostics are logged after every
//! attempt.
//!
//! Each attempt runs its body with its own abort flag. When the timeout
//! fires the flag goes up, the body's next command fails, and the runner
//! waits for the body to unwind and disconnects before anything else runs. Cases that manage the daemon themselves run after the session
//! has been torn down.

use crate::client::{is_connect_successful, is_disconnect_successful, VpnClient};
use crate::command::{AbortableRunner, CommandRunner, SystemRunner};
use crate::config::{QaConfig, RunnerConfig};
use crate::daemon::Daemon;
use crate::error::{ensure, IntoQaError, QaError, Result};
use crate::gate::check_internet_connection;
use crate::matrix::{Scenario, Technology};
use crate::monitor::start_session_monitoring;
use crate::network::Network;
use crate::probe::ReachabilityProbe;
use log::{error, info, warn};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runs a closure when dropped
///
/// Used to disconnect whatever happens inside a scenario body.
pub struct Defer<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> Defer<F> {
    pub fn new(action: F) -> Self {
        Self {
            action: Some(action),
        }
    }
}

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

/// Timeout and rerun policy of every case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    pub timeout: Duration,
    pub reruns: u32,
    pub reruns_delay: Duration,
    /// Wait for a timed out body to return from its running command
    pub abort_grace: Duration,
}

impl From<&RunnerConfig> for RunPolicy {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.case_timeout_secs),
            reruns: config.reruns,
            reruns_delay: Duration::from_secs(config.reruns_delay_secs),
            abort_grace: Duration::from_secs(config.abort_grace_secs),
        }
    }
}

/// Result of one case after all attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    NoConnectivity(String),
    TimedOut(Duration),
}

impl CaseOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, CaseOutcome::Passed)
    }
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseOutcome::Passed => write!(f, "PASSED"),
            CaseOutcome::Failed(reason) => write!(f, "FAILED: {reason}"),
            CaseOutcome::NoConnectivity(reason) => write!(f, "NO CONNECTIVITY: {reason}"),
            CaseOutcome::TimedOut(after) => write!(f, "TIMED OUT after {}s", after.as_secs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub cases: Vec<CaseReport>,
}

impl SessionReport {
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.outcome.is_passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Everything a scenario body needs
pub struct Harness {
    pub client: VpnClient,
    pub network: Network,
    pub daemon: Daemon,
    login_token_env: String,
    config: QaConfig,
    user: Arc<dyn CommandRunner>,
    root: Arc<dyn CommandRunner>,
}

impl Harness {
    /// Harness running commands on this host
    pub fn from_config(config: &QaConfig) -> Result<Self> {
        let user: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let root: Arc<dyn CommandRunner> = if config.client.use_sudo {
            Arc::new(SystemRunner::privileged())
        } else {
            user.clone()
        };
        Self::with_runners(config, user, root)
    }

    /// `user` runs the client and network tools, `root` controls the daemon
    pub fn with_runners(
        config: &QaConfig,
        user: Arc<dyn CommandRunner>,
        root: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let address: IpAddr = config.monitor.ping_target.parse().map_err(|e| {
            QaError::Config(format!(
                "Invalid ping target '{}': {e}",
                config.monitor.ping_target
            ))
        })?;
        let client = VpnClient::new(config.client.binary.clone(), user.clone());
        let probe = ReachabilityProbe::new(
            address,
            Duration::from_secs(config.monitor.ping_wait_secs),
            user.clone(),
        );
        let network = Network::new(user.clone(), Arc::new(probe), client.clone());

        Ok(Self {
            client,
            network,
            daemon: Daemon::new(root.clone(), &config.daemon),
            login_token_env: config.client.login_token_env.clone(),
            config: config.clone(),
            user,
            root,
        })
    }

    /// The same harness with every command gated on `abort`
    pub fn abortable(&self, abort: Arc<AtomicBool>) -> Result<Self> {
        let user: Arc<dyn CommandRunner> =
            Arc::new(AbortableRunner::new(self.user.clone(), abort.clone()));
        let root: Arc<dyn CommandRunner> = Arc::new(AbortableRunner::new(self.root.clone(), abort));
        Self::with_runners(&self.config, user, root)
    }

    /// Start the daemon and log in with the token from the environment
    pub fn setup_session(&self) -> Result<()> {
        self.daemon.start()?;
        let token = std::env::var(&self.login_token_env).map_err(|_| {
            QaError::Config(format!("Login token variable {} is not set", self.login_token_env))
        })?;
        self.client.login_with_token(&token)?;
        Ok(())
    }

    pub fn teardown_session(&self) -> Result<()> {
        self.client.logout_persist_token()?;
        self.daemon.stop()
    }

    /// Client and host state logged after every attempt
    pub fn collect_info(&self) -> String {
        let mut info = String::new();
        for (title, result) in [
            ("status", self.client.status()),
            ("settings", self.client.settings()),
            ("routes", self.network.routes()),
        ] {
            match result {
                Ok(text) => info.push_str(&format!("--- {title} ---\n{}\n", text.trim_end())),
                Err(e) => info.push_str(&format!("--- {title} ---\nunavailable: {e}\n")),
            }
        }
        info
    }

    /// Run one scenario body, failing fast on lost connectivity
    pub fn execute(&self, scenario: &Scenario) -> Result<()> {
        check_internet_connection(&self.network)?;

        match scenario {
            Scenario::ConnectToGroup {
                technology, group, ..
            } => {
                self.client.set_technology_and_protocol(technology)?;
                self.connect_and_check(&[group])?;
                self.disconnect_and_check()
            }
            Scenario::Reconnect { source, target, .. } => {
                self.client.set_technology_and_protocol(source)?;
                self.connect_and_check(&[])?;
                self.client.set_technology_and_protocol(target)?;
                self.connect_and_check(&[])?;
                self.disconnect_and_check()
            }
            Scenario::CountryAndCity { country, city } => {
                self.client
                    .set_technology_and_protocol(&Technology::new("nordlynx", "", ""))?;
                self.connect_and_check(&[country])?;
                self.connect_and_check(&[city])?;
                self.connect_and_check(&[country, city])?;
                self.disconnect_and_check()
            }
            Scenario::StatusAfterTechnologyChange { source, target } => {
                self.client.set_technology_and_protocol(source)?;
                {
                    let _disconnect = self.deferred_disconnect();
                    self.client.connect(&[])?;
                    self.check_status_shows(source)?;

                    // The running connection keeps its technology until reconnect
                    self.client.set_technology_and_protocol(target)?;
                    self.check_status_shows(source)?;
                }
                ensure(self.network.is_disconnected()?, || {
                    "Still connected after disconnect".to_string()
                })
            }
            Scenario::StatusAfterTechnologyChangeReconnect { source, target } => {
                self.client.set_technology_and_protocol(source)?;
                {
                    let _disconnect = self.deferred_disconnect();
                    self.client.connect(&[])?;
                }

                self.client.set_technology_and_protocol(target)?;
                {
                    let _disconnect = self.deferred_disconnect();
                    self.client.connect(&[])?;
                    self.check_status_shows(target)?;
                }
                ensure(self.network.is_disconnected()?, || {
                    "Still connected after disconnect".to_string()
                })
            }
            Scenario::DaemonLoop { iterations } => {
                for _ in 0..*iterations {
                    self.daemon.start()?;
                    self.daemon.stop()?;
                }
                Ok(())
            }
        }
    }

    fn deferred_disconnect(&self) -> Defer<impl FnOnce() + '_> {
        Defer::new(move || {
            if let Err(e) = self.client.disconnect() {
                warn!("Deferred disconnect failed: {e}");
            }
        })
    }

    fn connect_and_check(&self, args: &[&String]) -> Result<()> {
        let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
        let output = self.client.connect(&args)?;
        ensure(is_connect_successful(&output), || {
            format!("Unexpected connect output:\n{output}")
        })?;
        ensure(self.network.is_connected()?, || {
            "Client reports no working connection".to_string()
        })
    }

    fn disconnect_and_check(&self) -> Result<()> {
        let output = self.client.disconnect()?;
        ensure(is_disconnect_successful(&output), || {
            format!("Unexpected disconnect output:\n{output}")
        })?;
        ensure(self.network.is_disconnected()?, || {
            "Still connected after disconnect".to_string()
        })
    }

    fn check_status_shows(&self, technology: &Technology) -> Result<()> {
        let status = self.client.status()?;
        let tech = technology.technology.to_uppercase();
        let protocol = technology.expected_status_protocol();
        ensure(status.contains(&tech), || {
            format!("Expected {tech} in status:\n{status}")
        })?;
        ensure(status.contains(&protocol), || {
            format!("Expected {protocol} in status:\n{status}")
        })
    }
}

/// Runs cases against a shared harness
pub struct Runner {
    harness: Arc<Harness>,
    policy: RunPolicy,
}

impl Runner {
    pub fn new(harness: Arc<Harness>, policy: RunPolicy) -> Self {
        Self { harness, policy }
    }

    /// Run a whole session: monitor, setup, cases, teardown
    pub async fn run_session(
        &self,
        config: &QaConfig,
        scenarios: Vec<Scenario>,
        monitor: bool,
    ) -> Result<SessionReport> {
        if monitor {
            start_session_monitoring(&config.monitor)?;
        }

        let (session, standalone): (Vec<_>, Vec<_>) =
            scenarios.into_iter().partition(Scenario::needs_session);
        let mut report = SessionReport::default();

        if !session.is_empty() {
            let harness = self.harness.clone();
            blocking(move || harness.setup_session()).await?;

            for scenario in &session {
                report.cases.push(self.run_case(scenario).await);
            }

            let harness = self.harness.clone();
            if let Err(e) = blocking(move || harness.teardown_session()).await {
                error!("Session teardown failed: {e}");
            }
        }

        for scenario in &standalone {
            report.cases.push(self.run_case(scenario).await);
        }

        info!("{} passed, {} failed", report.passed(), report.failed());
        Ok(report)
    }

    /// Run one case with timeout and reruns
    pub async fn run_case(&self, scenario: &Scenario) -> CaseReport {
        let name = scenario.name();
        let max_attempts = self.policy.reruns + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            info!("=== {name} (attempt {attempts}/{max_attempts}) ===");

            let outcome = self.attempt(scenario).await;

            let harness = self.harness.clone();
            match blocking(move || Ok(harness.collect_info())).await {
                Ok(info) => info!("{}", info.trim_end()),
                Err(e) => warn!("Could not collect diagnostics: {e}"),
            }

            if outcome.is_passed() || attempts >= max_attempts {
                info!("{name}: {outcome}");
                return CaseReport {
                    name,
                    outcome,
                    attempts,
                };
            }

            warn!("{name}: {outcome}; rerunning in {}s", self.policy.reruns_delay.as_secs());
            tokio::time::sleep(self.policy.reruns_delay).await;
        }
    }

    async fn attempt(&self, scenario: &Scenario) -> CaseOutcome {
        let abort = Arc::new(AtomicBool::new(false));
        let harness = match self.harness.abortable(abort.clone()) {
            Ok(harness) => Arc::new(harness),
            Err(e) => return CaseOutcome::Failed(e.to_string()),
        };
        let body = scenario.clone();
        let mut task = tokio::task::spawn_blocking(move || harness.execute(&body));

        let waited = tokio::time::timeout(self.policy.timeout, &mut task).await;
        let joined = match waited {
            Ok(joined) => joined,
            Err(_) => {
                abort.store(true, Ordering::SeqCst);
                warn!(
                    "{} timed out after {}s, aborting",
                    scenario.name(),
                    self.policy.timeout.as_secs()
                );
                self.wind_down(task, scenario).await;
                return CaseOutcome::TimedOut(self.policy.timeout);
            }
        };

        match joined {
            Err(join) => CaseOutcome::Failed(format!("scenario panicked: {join}")),
            Ok(Ok(())) => CaseOutcome::Passed,
            Ok(Err(QaError::NoConnectivity(reason))) => CaseOutcome::NoConnectivity(reason),
            Ok(Err(e)) => CaseOutcome::Failed(e.to_string()),
        }
    }

    /// Wait for an aborted body to return, then leave the client disconnected
    async fn wind_down(&self, task: tokio::task::JoinHandle<Result<()>>, scenario: &Scenario) {
        // An abandoned body keeps its raised flag, so it never starts another command
        if tokio::time::timeout(self.policy.abort_grace, task).await.is_err() {
            warn!(
                "Aborted body is still inside a command after {}s, abandoning it",
                self.policy.abort_grace.as_secs()
            );
        }

        if scenario.needs_session() {
            let harness = self.harness.clone();
            if let Err(e) = blocking(move || harness.client.disconnect()).await {
                warn!("Disconnect after timeout failed: {e}");
            }
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .into_qa_error("Blocking task failed")?
}
