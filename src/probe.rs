//! Connectivity probes
//!
//! A probe performs one bounded check against a fixed target. Probes never
//! retry; the monitor loop decides when to probe again.

use crate::command::CommandRunner;
use crate::error::{QaError, Result};
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Marker `ping` prints for every echo reply
pub const ECHO_REPLY_MARKER: &str = "icmp_seq=";

/// What a probe checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Reachability,
    Resolution,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Reachability => write!(f, "reachability"),
            ProbeKind::Resolution => write!(f, "resolution"),
        }
    }
}

/// A single connectivity check against one fixed target
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// The address or hostname being probed
    fn target(&self) -> String;

    /// Run the check once
    fn check(&self) -> Result<()>;

    /// Log message describing a failed check
    fn failure_message(&self, err: &QaError) -> String;
}

/// Sends one ICMP echo request with `ping`
pub struct ReachabilityProbe {
    address: IpAddr,
    wait: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl ReachabilityProbe {
    pub fn new(address: IpAddr, wait: Duration, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            address,
            wait,
            runner,
        }
    }
}

impl Probe for ReachabilityProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Reachability
    }

    fn target(&self) -> String {
        self.address.to_string()
    }

    fn check(&self) -> Result<()> {
        let wait = self.wait.as_secs().max(1).to_string();
        let address = self.address.to_string();
        let stdout = self
            .runner
            .run("ping", &["-c", "1", "-w", &wait, &address])?;

        // Zero exit without a reply line means ping printed nothing useful
        if stdout.contains(ECHO_REPLY_MARKER) {
            Ok(())
        } else {
            Err(QaError::Assertion(format!(
                "no echo reply in ping output: {}",
                stdout.trim()
            )))
        }
    }

    fn failure_message(&self, err: &QaError) -> String {
        format!("Failed to connect to {}: {}.", self.address, err)
    }
}

/// Name resolution backend
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Resolves names through the operating system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = (host, 0)
            .to_socket_addrs()
            .map_err(|e| QaError::Resolution(format!("{host}: {e}")))?
            .map(|sa| sa.ip())
            .collect::<Vec<_>>();

        if addrs.is_empty() {
            return Err(QaError::Resolution(format!("{host}: no addresses")));
        }
        Ok(addrs)
    }
}

/// Resolves one fixed hostname
pub struct ResolutionProbe {
    host: String,
    resolver: Arc<dyn Resolver>,
}

impl ResolutionProbe {
    pub fn new(host: impl Into<String>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            host: host.into(),
            resolver,
        }
    }
}

impl Probe for ResolutionProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Resolution
    }

    fn target(&self) -> String {
        self.host.clone()
    }

    fn check(&self) -> Result<()> {
        self.resolver.resolve(&self.host).map(|_| ())
    }

    fn failure_message(&self, _err: &QaError) -> String {
        format!("DNS resolution for {} failed.", self.host)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver that fails a fixed number of times before succeeding
    pub struct FlakyResolver {
        failures_left: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl FlakyResolver {
        pub fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Resolver for FlakyResolver {
        fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                Err(QaError::Resolution(format!("{host}: Name or service not known")))
            } else {
                Ok(vec![IpAddr::from([104, 17, 49, 74])])
            }
        }
    }
}
