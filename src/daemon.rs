//! Daemon service control

use crate::command::CommandRunner;
use crate::config::DaemonConfig;
use crate::error::{QaError, Result};
use log::info;
use std::sync::Arc;

/// Starts and stops the client daemon through the configured commands
#[derive(Clone)]
pub struct Daemon {
    root: Arc<dyn CommandRunner>,
    start: Vec<String>,
    stop: Vec<String>,
}

impl Daemon {
    pub fn new(root: Arc<dyn CommandRunner>, config: &DaemonConfig) -> Self {
        Self {
            root,
            start: config.start.clone(),
            stop: config.stop.clone(),
        }
    }

    pub fn start(&self) -> Result<()> {
        info!("Starting daemon: {}", self.start.join(" "));
        self.invoke(&self.start)
    }

    pub fn stop(&self) -> Result<()> {
        info!("Stopping daemon: {}", self.stop.join(" "));
        self.invoke(&self.stop)
    }

    fn invoke(&self, command: &[String]) -> Result<()> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| QaError::Config("Empty daemon command".to_string()))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.root.run(program, &args).map(|_| ())
    }
}
