//! One-shot connectivity check (`--check`).

use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::EipUaBridgeConfig;
use crate::server::ServerClient;

/// Timeout for each probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub target: String,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Probe {
    fn ok(target: String) -> Self {
        Self {
            target,
            status: ProbeStatus::Reachable,
            error: None,
        }
    }

    fn failed(target: String, error: impl ToString) -> Self {
        Self {
            target,
            status: ProbeStatus::Unreachable,
            error: Some(error.to_string()),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.status == ProbeStatus::Reachable
    }
}

/// Result of `--check`, printed as one JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub device: Probe,
    pub server: Probe,
}

impl HealthReport {
    pub fn new(device: Probe, server: Probe) -> Self {
        Self {
            healthy: device.is_reachable() && server.is_reachable(),
            device,
            server,
        }
    }

    /// Process exit code: 0 when both peers are reachable.
    pub fn exit_code(&self) -> i32 {
        if self.healthy { 0 } else { 1 }
    }
}

/// TCP connect to the device's EtherNet/IP port.
pub async fn probe_device(address: &str, timeout: Duration) -> Probe {
    let target = address.to_string();
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => Probe::ok(target),
        Ok(Err(e)) => Probe::failed(target, e),
        Err(_) => Probe::failed(target, format!("timed out after {:?}", timeout)),
    }
}

/// Open and close a session with the server.
pub async fn probe_server<S: ServerClient>(client: &S, endpoint: &str, timeout: Duration) -> Probe {
    let target = endpoint.to_string();
    let session = match tokio::time::timeout(timeout, client.open(endpoint)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => return Probe::failed(target, e),
        Err(_) => return Probe::failed(target, format!("timed out after {:?}", timeout)),
    };

    if let Err(e) = client.close(session).await {
        warn!(endpoint, error = %e, "Error closing health check session");
    }
    Probe::ok(target)
}

/// Probe both peers named in `config`.
pub async fn check<S: ServerClient>(config: &EipUaBridgeConfig, client: &S) -> HealthReport {
    let device = probe_device(&config.device.socket_address(), PROBE_TIMEOUT).await;
    let server = probe_server(client, &config.server.endpoint, PROBE_TIMEOUT).await;

    let report = HealthReport::new(device, server);
    if report.healthy {
        info!("Health check passed: OPC UA and EtherNet/IP are reachable");
    } else {
        warn!(
            device = ?report.device.status,
            server = ?report.server.status,
            "Health check failed"
        );
    }
    report
}
