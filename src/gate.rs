//! Pre-test connectivity gate
//!
//! Runs before every case. A case that starts without connectivity fails
//! here with [`QaError::NoConnectivity`] so an outage on the host is not
//! blamed on the client under test. Only the current case fails; the
//! session goes on.

use crate::error::{QaError, Result};
use crate::network::Network;
use log::info;

/// Something that can tell whether the network is usable right now
pub trait ConnectivityCheck {
    fn is_available(&self) -> bool;

    /// Description of what was checked, used in the failure message
    fn describe(&self) -> String {
        "internet connectivity".to_string()
    }
}

impl ConnectivityCheck for Network {
    fn is_available(&self) -> bool {
        Network::is_available(self)
    }
}

/// Fail fast when there is no connectivity
pub fn check_internet_connection<C: ConnectivityCheck + ?Sized>(check: &C) -> Result<()> {
    info!("Check internet connection before starting tests");
    if check.is_available() {
        Ok(())
    } else {
        Err(QaError::NoConnectivity(format!(
            "{} is unavailable before the test started",
            check.describe()
        )))
    }
}
