//! Configuration for the EtherNet/IP to OPC UA bridge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use eipua_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result};

use crate::channels::ChannelMap;
use crate::device::AttributePath;
use crate::eds::EdsFile;
use crate::offsets::SLOT_SIZE;
use crate::server::WATCHDOG;

/// Assembly size used when neither the config nor the EDS file gives one.
pub const DEFAULT_ASSEMBLY_SIZE: usize = 128;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EipUaBridgeConfig {
    /// Field device settings
    pub device: DeviceConfig,

    /// OPC UA server settings
    pub server: ServerConfig,

    /// Float channels (logical name to slot); defaults to the M800 layout
    #[serde(default)]
    pub channels: Option<BTreeMap<String, String>>,

    /// Status words (logical name to slot); defaults to the M800 layout
    #[serde(default)]
    pub statuses: Option<BTreeMap<String, String>>,

    /// Delay between polling cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// EtherNet/IP device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host name or IP address
    pub address: String,

    /// EtherNet/IP TCP port (default: 44818)
    #[serde(default = "default_enip_port")]
    pub port: u16,

    /// EDS file describing the device
    #[serde(default)]
    pub eds_file: Option<PathBuf>,

    /// Input assembly size in bytes, overrides the EDS file
    #[serde(default)]
    pub assembly_size: Option<usize>,

    /// Attribute holding the input assembly data
    #[serde(default)]
    pub input_assembly: AttributePath,

    /// Read the identity object after connecting (diagnostic only)
    #[serde(default = "default_true")]
    pub identity_probe: bool,

    /// Operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_enip_port() -> u16 {
    44818
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    3000
}

/// OPC UA server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Endpoint URL, e.g. `opc.tcp://192.168.178.230:4840`
    pub endpoint: String,

    /// Operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Logical name to node id
    pub nodes: BTreeMap<String, String>,
}

impl DeviceConfig {
    /// Minimal settings for a device at `address`.
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: default_enip_port(),
            eds_file: None,
            assembly_size: None,
            input_assembly: AttributePath::default(),
            identity_probe: true,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// `host:port` for the device.
    pub fn socket_address(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServerConfig {
    pub fn new(endpoint: impl Into<String>, nodes: BTreeMap<String, String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_ms: default_timeout_ms(),
            nodes,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EipUaBridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Channel layout, falling back to the M800 defaults per table.
    pub fn channel_map(&self) -> ChannelMap {
        let defaults = ChannelMap::m800();
        ChannelMap::new(
            self.channels
                .clone()
                .unwrap_or_else(|| defaults.readings().clone()),
            self.statuses
                .clone()
                .unwrap_or_else(|| defaults.statuses().clone()),
        )
    }

    /// Load the EDS file, if one is configured.
    pub fn load_eds(&self) -> Result<Option<EdsFile>> {
        match &self.device.eds_file {
            Some(path) => EdsFile::load(path).map(Some).map_err(|e| {
                BridgeError::config(format!("EDS file '{}': {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }

    /// Input assembly size: explicit setting, then EDS, then the default.
    ///
    /// Fails when the resolved size cannot hold a single slot.
    pub fn resolve_assembly_size(&self, eds: Option<&EdsFile>) -> Result<usize> {
        let instance = self.device.input_assembly.instance_id;
        let (size, source) = match (self.device.assembly_size, eds) {
            (Some(size), _) => (size, "device.assembly_size"),
            (None, Some(eds)) => match eds.assembly_size(instance) {
                Some(size) => (size, "EDS file"),
                None => (DEFAULT_ASSEMBLY_SIZE, "default"),
            },
            (None, None) => (DEFAULT_ASSEMBLY_SIZE, "default"),
        };

        if size < SLOT_SIZE {
            return Err(BridgeError::validation(format!(
                "input assembly {} size {} from {} holds no {}-byte slot",
                instance, size, source, SLOT_SIZE
            )));
        }
        Ok(size)
    }
}

impl BridgeConfig for EipUaBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.device.address.trim().is_empty() {
            return Err(BridgeError::validation("device.address cannot be empty"));
        }
        if self.server.endpoint.trim().is_empty() {
            return Err(BridgeError::validation("server.endpoint cannot be empty"));
        }
        if self.server.nodes.is_empty() {
            return Err(BridgeError::validation(
                "server.nodes must map at least one name",
            ));
        }
        if matches!(self.device.assembly_size, Some(size) if size < SLOT_SIZE) {
            return Err(BridgeError::validation(format!(
                "device.assembly_size must be at least {} bytes",
                SLOT_SIZE
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::validation("poll_interval_ms must be positive"));
        }
        if self.device.timeout_ms == 0 || self.server.timeout_ms == 0 {
            return Err(BridgeError::validation("timeout_ms must be positive"));
        }

        let channels = self.channel_map();
        if let Some(slot) = channels.malformed_slots().first() {
            return Err(BridgeError::validation(format!(
                "invalid slot '{}' (expected AI<n>)",
                slot
            )));
        }
        for name in channels.names() {
            if !self.server.nodes.contains_key(name) {
                return Err(BridgeError::validation(format!(
                    "channel '{}' has no entry in server.nodes",
                    name
                )));
            }
        }
        if !self.server.nodes.contains_key(WATCHDOG) {
            return Err(BridgeError::validation(format!(
                "server.nodes must map '{}'",
                WATCHDOG
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        device: { address: "192.168.178.237" },
        server: {
            endpoint: "opc.tcp://192.168.178.230:4840",
            nodes: { c1: "ns=2;s=Conductivity_Ch1", watchdog: "ns=2;s=WATCHDOG" },
        },
        channels: { c1: "AI1" },
        statuses: {},
    }"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = EipUaBridgeConfig::from_json5(MINIMAL).unwrap();

        assert_eq!(config.device.port, 44818);
        assert_eq!(config.device.input_assembly, AttributePath::INPUT_ASSEMBLY);
        assert!(config.device.identity_probe);
        assert_eq!(config.device.timeout(), Duration::from_secs(3));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.device.socket_address(), "192.168.178.237:44818");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.resolve_assembly_size(None).unwrap(), DEFAULT_ASSEMBLY_SIZE);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            device: {
                address: "10.0.0.5",
                port: 2222,
                assembly_size: 64,
                input_assembly: { class_id: 4, instance_id: 101, attribute_id: 3 },
                identity_probe: false,
                timeout_ms: 1500,
            },
            server: {
                endpoint: "opc.tcp://10.0.0.9:4840",
                timeout_ms: 2000,
                nodes: { c1: "ns=2;s=C1", s1: "ns=2;s=S1", watchdog: "ns=2;s=WATCHDOG" },
            },
            channels: { c1: "AI1" },
            statuses: { s1: "AI15" },
            poll_interval_ms: 500,
            logging: { level: "debug", format: "json" },
        }"#;

        let config = EipUaBridgeConfig::from_json5(json).unwrap();
        assert_eq!(config.device.input_assembly.instance_id, 101);
        assert_eq!(config.resolve_assembly_size(None).unwrap(), 64);
        assert_eq!(config.server.timeout(), Duration::from_secs(2));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));

        let map = config.channel_map();
        assert_eq!(map.readings()["c1"], "AI1");
        assert_eq!(map.statuses()["s1"], "AI15");
    }

    #[test]
    fn test_default_channel_map_requires_m800_nodes() {
        let json = r#"{
            device: { address: "192.168.178.237" },
            server: { endpoint: "opc.tcp://plc:4840", nodes: { c1: "ns=2;s=C1" } },
        }"#;

        let err = EipUaBridgeConfig::from_json5(json).unwrap_err();
        assert!(err.to_string().contains("conductivity_ch1"));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            (r#"device: { address: "" }"#, "device.address"),
            (r#"device: { address: "d", assembly_size: 0 }"#, "assembly_size"),
            (r#"device: { address: "d", assembly_size: 3 }"#, "assembly_size"),
            (r#"device: { address: "d", timeout_ms: 0 }"#, "timeout_ms"),
        ];

        for (device, needle) in cases {
            let json = format!(
                r#"{{ {device}, server: {{ endpoint: "opc.tcp://x", nodes: {{ c1: "n", watchdog: "w" }} }},
                     channels: {{ c1: "AI1" }}, statuses: {{}} }}"#
            );
            let err = EipUaBridgeConfig::from_json5(&json).unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected '{}' in '{}'",
                needle,
                err
            );
        }
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let json = r#"{
            device: { address: "d" },
            server: { endpoint: "opc.tcp://x", nodes: { c1: "n", watchdog: "w" } },
            channels: { c1: "Slot1" },
            statuses: {},
        }"#;
        let err = EipUaBridgeConfig::from_json5(json).unwrap_err();
        assert!(err.to_string().contains("Slot1"));
    }

    #[test]
    fn test_missing_watchdog_rejected() {
        let json = r#"{
            device: { address: "d" },
            server: { endpoint: "opc.tcp://x", nodes: { c1: "n" } },
            channels: { c1: "AI1" },
            statuses: {},
        }"#;
        let err = EipUaBridgeConfig::from_json5(json).unwrap_err();
        assert!(err.to_string().contains("watchdog"), "{}", err);
    }

    #[test]
    fn test_zero_size_assembly_from_eds_rejected() {
        let config = EipUaBridgeConfig::from_json5(MINIMAL).unwrap();

        let eds = EdsFile::parse("[Assembly 100]\nSize = 0;\n").unwrap();
        let err = config.resolve_assembly_size(Some(&eds)).unwrap_err();
        assert!(err.to_string().contains("EDS file"), "{}", err);

        let eds = EdsFile::parse("[Assembly 100]\nSize = 2;\n").unwrap();
        assert!(config.resolve_assembly_size(Some(&eds)).is_err());

        let eds = EdsFile::parse("[Assembly 100]\nSize = 8;\n").unwrap();
        assert_eq!(config.resolve_assembly_size(Some(&eds)).unwrap(), 8);
    }

    #[test]
    fn test_empty_nodes_rejected() {
        let json = r#"{
            device: { address: "d" },
            server: { endpoint: "opc.tcp://x", nodes: {} },
            channels: {},
            statuses: {},
        }"#;
        assert!(EipUaBridgeConfig::from_json5(json).is_err());
    }

    #[test]
    fn test_socket_address_ipv6() {
        let device = DeviceConfig::for_address("fe80::1");
        assert_eq!(device.socket_address(), "[fe80::1]:44818");
    }
}
