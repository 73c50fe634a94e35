//! Configurable [`ConnectivityProbe`] adapter for tests and local use.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{ConnectivityProbe, ProbeReport};

pub struct StaticConnectivityProbe {
    report: Mutex<ProbeReport>,
    failing: Mutex<bool>,
}

impl StaticConnectivityProbe {
    pub fn new(report: ProbeReport) -> Self {
        Self {
            report: Mutex::new(report),
            failing: Mutex::new(false),
        }
    }

    pub fn set_report(&self, report: ProbeReport) {
        *self.report.lock().unwrap() = report;
    }

    /// Make subsequent probes error, exercising the monitor's degraded
    /// classification.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl Default for StaticConnectivityProbe {
    fn default() -> Self {
        Self::new(ProbeReport {
            saw_host: true,
            saw_relay: true,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for StaticConnectivityProbe {
    async fn probe(&self, _expiry: Duration) -> anyhow::Result<ProbeReport> {
        if *self.failing.lock().unwrap() {
            anyhow::bail!("Probe connection failed");
        }
        Ok(*self.report.lock().unwrap())
    }
}
