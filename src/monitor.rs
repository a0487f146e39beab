//! Session-wide connectivity monitor
//!
//! Two watchers run next to the test session: one pings a well-known
//! address, one resolves a well-known hostname. Each watcher is a detached
//! thread running a single sequential loop, so a watcher never has more
//! than one probe in flight. Failures are reported and swallowed; the loop
//! only ends when the process exits or the stop flag is raised.
//!
//! Watchers are abandoned at process exit. [`SessionMonitor::stop`] exists
//! for embedders that need a clean shutdown, and dropping a monitor raises
//! the flag too; the flag is checked once per iteration.
//!
//! A panicking probe is reported through the sink like any other failure.
//! The process panic hook stays quiet for watcher threads so a broken probe
//! does not print a backtrace banner every interval.

use crate::command::SystemRunner;
use crate::config::MonitorConfig;
use crate::error::{IntoQaError, QaError, Result};
use crate::probe::{Probe, ReachabilityProbe, ResolutionProbe, SystemResolver};
use log::{info, warn};
use std::net::IpAddr;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Destination for probe failure reports
pub trait FailureSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Reports failures through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl FailureSink for LogSink {
    fn report(&self, message: &str) {
        warn!("{message}");
    }
}

/// Handle to the watcher threads of one session
#[derive(Debug)]
pub struct SessionMonitor {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    targets: Vec<(String, String)>,
}

impl SessionMonitor {
    /// Spawn one watcher per probe and return without waiting
    pub fn start(
        probes: Vec<Box<dyn Probe>>,
        interval: Duration,
        sink: Arc<dyn FailureSink>,
    ) -> Result<Self> {
        silence_watcher_panics();

        // Built up front so an early return drops it and stops what started
        let mut monitor = Self {
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::with_capacity(probes.len()),
            targets: Vec::with_capacity(probes.len()),
        };

        for probe in probes {
            let name = format!("{THREAD_PREFIX}{}-{}", probe.kind(), probe.target());
            monitor
                .targets
                .push((probe.kind().to_string(), probe.target()));

            let stop = monitor.stop.clone();
            let sink = sink.clone();
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || watch(probe, interval, sink, stop))
                .into_qa_error("Failed to spawn monitor thread")?;
            monitor.handles.push(handle);
        }

        Ok(monitor)
    }

    /// `(kind, target)` pairs being watched
    pub fn targets(&self) -> &[(String, String)] {
        &self.targets
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Ask every watcher to exit and wait for them
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

const THREAD_PREFIX: &str = "monitor-";

static QUIET_WATCHERS: Once = Once::new();

/// Keep the default panic output for every thread except watchers
fn silence_watcher_panics() {
    QUIET_WATCHERS.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let watcher = thread::current()
                .name()
                .is_some_and(|name| name.starts_with(THREAD_PREFIX));
            if !watcher {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// The loop body of a single watcher
fn watch(
    probe: Box<dyn Probe>,
    interval: Duration,
    sink: Arc<dyn FailureSink>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match panic::catch_unwind(AssertUnwindSafe(|| probe.check())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => sink.report(&probe.failure_message(&err)),
            Err(payload) => sink.report(&format!(
                "{} probe for {} panicked: {}.",
                probe.kind(),
                probe.target(),
                panic_message(&*payload)
            )),
        }
        thread::sleep(interval);
    }
}

/// Build the reachability and resolution probes for `config`
pub fn session_probes(config: &MonitorConfig) -> Result<Vec<Box<dyn Probe>>> {
    let address: IpAddr = config.ping_target.parse().map_err(|e| {
        QaError::Config(format!("Invalid ping target '{}': {e}", config.ping_target))
    })?;

    Ok(vec![
        Box::new(ReachabilityProbe::new(
            address,
            Duration::from_secs(config.ping_wait_secs),
            Arc::new(SystemRunner::new()),
        )),
        Box::new(ResolutionProbe::new(
            config.dns_target.clone(),
            Arc::new(SystemResolver),
        )),
    ])
}

static SESSION: OnceLock<SessionMonitor> = OnceLock::new();
static STARTING: Mutex<()> = Mutex::new(());

/// Start the session watchers, once per process
///
/// Later calls return the monitor started by the first successful one. A
/// failed start is not remembered, so the next call tries again.
pub fn start_session_monitoring(config: &MonitorConfig) -> Result<&'static SessionMonitor> {
    // Probes are built up front so a bad config is always reported
    let probes = session_probes(config)?;
    let interval = Duration::from_secs(config.interval_secs);

    get_or_start(&SESSION, &STARTING, || {
        info!("Start system monitoring");
        SessionMonitor::start(probes, interval, Arc::new(LogSink))
    })
}

fn get_or_start<'a, F>(
    cell: &'a OnceLock<SessionMonitor>,
    starting: &Mutex<()>,
    start: F,
) -> Result<&'a SessionMonitor>
where
    F: FnOnce() -> Result<SessionMonitor>,
{
    if let Some(monitor) = cell.get() {
        return Ok(monitor);
    }

    let _guard = starting.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(monitor) = cell.get() {
        return Ok(monitor);
    }

    let monitor = start()?;
    Ok(cell.get_or_init(|| monitor))
}
