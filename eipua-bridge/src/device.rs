//! Device-side connection lifecycle and raw frame acquisition.
//!
//! The EtherNet/IP engine itself sits behind [`DeviceClient`]. Every data
//! exchange is an unconnected request/response; the link only tracks whether
//! a session is registered and gates reconnects through the backoff policy.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use eipua_bridge_framework::{BackoffGate, BackoffState, ConnectionState};

use crate::config::DeviceConfig;

/// CIP class/instance/attribute triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePath {
    pub class_id: u16,
    pub instance_id: u16,
    pub attribute_id: u16,
}

impl AttributePath {
    /// Identity object, product name (SHORT_STRING).
    pub const IDENTITY_PRODUCT_NAME: AttributePath = AttributePath {
        class_id: 0x01,
        instance_id: 1,
        attribute_id: 7,
    };

    /// Assembly object, instance 100 data attribute.
    pub const INPUT_ASSEMBLY: AttributePath = AttributePath {
        class_id: 0x04,
        instance_id: 100,
        attribute_id: 3,
    };
}

impl Default for AttributePath {
    fn default() -> Self {
        Self::INPUT_ASSEMBLY
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "class 0x{:02X} / instance {} / attribute {}",
            self.class_id, self.instance_id, self.attribute_id
        )
    }
}

/// Errors reported by a device client.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Read failed: {0}")]
    Read(String),
    /// The session is gone; the next read must reconnect.
    #[error("Session lost: {0}")]
    SessionLost(String),
}

/// Blocking request/response access to an EtherNet/IP device.
///
/// Calls may block for up to the timeout given to [`open`](Self::open); the
/// bridge runs them on a blocking worker thread.
pub trait DeviceClient: Send + 'static {
    type Session: Send + 'static;

    /// Register a session with the device at `address` (`host:port`).
    fn open(&mut self, address: &str, timeout: Duration) -> Result<Self::Session, DeviceError>;

    /// Unregister a session.
    fn close(&mut self, session: Self::Session) -> Result<(), DeviceError>;

    /// Get_Attribute_Single for `path`, returning the raw payload.
    fn read_attribute(
        &mut self,
        session: &Self::Session,
        path: AttributePath,
    ) -> Result<Vec<u8>, DeviceError>;

    /// Diagnostic liveness check of a session.
    fn is_session_alive(&mut self, _session: &Self::Session) -> bool {
        true
    }
}

/// Owner of the device session and its reconnect backoff.
pub struct DeviceLink<D: DeviceClient> {
    client: D,
    address: String,
    timeout: Duration,
    input_assembly: AttributePath,
    identity_probe: bool,
    gate: BackoffGate,
    backoff: BackoffState,
    /// `Some` exactly while connected.
    session: Option<D::Session>,
}

impl<D: DeviceClient> DeviceLink<D> {
    /// Create a disconnected link.
    pub fn new(client: D, config: &DeviceConfig) -> Self {
        Self {
            client,
            address: config.socket_address(),
            timeout: config.timeout(),
            input_assembly: config.input_assembly,
            identity_probe: config.identity_probe,
            gate: BackoffGate::default(),
            backoff: BackoffState::default(),
            session: None,
        }
    }

    /// Replace the backoff policy.
    pub fn with_backoff(mut self, gate: BackoffGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    /// The underlying client.
    pub fn client(&self) -> &D {
        &self.client
    }

    /// Connect if not already connected, subject to backoff.
    ///
    /// Returns whether the link is connected afterwards.
    pub fn connect(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }

        let now = Instant::now();
        if !self.gate.try_begin(&mut self.backoff, now) {
            debug!(
                address = %self.address,
                retry_in = ?self.gate.remaining(&self.backoff, now),
                "Device reconnect deferred by backoff"
            );
            return false;
        }

        match self.client.open(&self.address, self.timeout) {
            Ok(session) => {
                if self.identity_probe {
                    self.probe_identity(&session);
                }
                info!(
                    address = %self.address,
                    attempts = self.backoff.attempts(),
                    "Connected to EtherNet/IP device"
                );
                self.session = Some(session);
                self.backoff.reset();
                true
            }
            Err(e) => {
                error!(
                    address = %self.address,
                    attempt = self.backoff.attempts(),
                    retry_in = ?self.gate.delay(self.backoff.attempts()),
                    error = %e,
                    "Failed to connect to EtherNet/IP device"
                );
                false
            }
        }
    }

    /// Read the input assembly, connecting first if needed.
    ///
    /// Returns `None` when disconnected or when the read fails.
    pub fn read_raw_frame(&mut self) -> Option<Vec<u8>> {
        if !self.connect() {
            return None;
        }
        let session = self.session.as_ref()?;

        let result = self.client.read_attribute(session, self.input_assembly);
        let session_dead = match &result {
            Err(DeviceError::SessionLost(_)) => true,
            Err(_) => !self.client.is_session_alive(session),
            Ok(_) => false,
        };

        match result {
            Ok(bytes) if bytes.is_empty() => {
                warn!(assembly = %self.input_assembly, "Device returned an empty payload");
                None
            }
            Ok(bytes) => {
                debug!(len = bytes.len(), "Read raw input assembly");
                Some(bytes)
            }
            Err(e) => {
                warn!(
                    assembly = %self.input_assembly,
                    error = %e,
                    "Failed to read input assembly"
                );
                if session_dead {
                    self.drop_session();
                }
                None
            }
        }
    }

    /// Best-effort session teardown.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            match self.client.close(session) {
                Ok(()) => info!(address = %self.address, "Disconnected from EtherNet/IP device"),
                Err(e) => warn!(address = %self.address, error = %e, "Error closing device session"),
            }
        }
    }

    fn drop_session(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(address = %self.address, "Device session lost, reconnecting next cycle");
            if let Err(e) = self.client.close(session) {
                debug!(address = %self.address, error = %e, "Error closing lost device session");
            }
        }
    }

    fn probe_identity(&mut self, session: &D::Session) {
        match self
            .client
            .read_attribute(session, AttributePath::IDENTITY_PRODUCT_NAME)
        {
            Ok(bytes) => info!(product = %short_string(&bytes), "Device identity"),
            Err(e) => debug!(error = %e, "Identity probe failed"),
        }
    }
}

/// Decode a CIP SHORT_STRING (length byte followed by characters).
pub fn short_string(bytes: &[u8]) -> String {
    match bytes.split_first() {
        Some((&len, rest)) => {
            let len = (len as usize).min(rest.len());
            String::from_utf8_lossy(&rest[..len]).into_owned()
        }
        None => String::new(),
    }
}
