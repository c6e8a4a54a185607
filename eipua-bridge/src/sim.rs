//! Simulated collaborators.
//!
//! [`SimulatedDevice`] produces a synthetic input assembly and
//! [`MemoryServer`] is an in-memory address space that records writes. Both
//! are cheap to clone; clones share state so a test can keep a handle while
//! the bridge owns the client.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use eipua_common::{TypedValue, ValueKind};

use crate::channels::ChannelMap;
use crate::device::{AttributePath, DeviceClient, DeviceError};
use crate::offsets::OffsetTable;
use crate::server::{ServerClient, ServerError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shape of a synthetic measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// Constant float.
    Fixed(f32),
    /// `base + amplitude * sin(2π t / period)`.
    Wave {
        base: f32,
        amplitude: f32,
        period: Duration,
    },
    /// Constant status word.
    Word(u32),
}

impl Signal {
    fn sample(&self, elapsed: Duration) -> [u8; 4] {
        match *self {
            Signal::Fixed(v) => v.to_le_bytes(),
            Signal::Wave {
                base,
                amplitude,
                period,
            } => {
                let phase = elapsed.as_secs_f64() / period.as_secs_f64().max(f64::EPSILON);
                let v = base as f64 + amplitude as f64 * (phase * std::f64::consts::TAU).sin();
                (v as f32).to_le_bytes()
            }
            Signal::Word(w) => w.to_le_bytes(),
        }
    }
}

/// Counters of calls made against the simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub opens: u32,
    pub reads: u32,
    pub closes: u32,
}

#[derive(Debug)]
struct DeviceSim {
    assembly_size: usize,
    product_name: String,
    started: Instant,
    /// Byte offset of each 4-byte signal.
    signals: BTreeMap<usize, Signal>,
    fail_opens: u32,
    fail_reads: u32,
    read_delay: Duration,
    next_session: u64,
    live_session: Option<u64>,
    stats: DeviceStats,
}

/// In-process stand-in for an EtherNet/IP device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<DeviceSim>>,
}

impl SimulatedDevice {
    /// A device whose input assembly is `assembly_size` zero bytes.
    pub fn new(assembly_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceSim {
                assembly_size,
                product_name: "M800 Simulated".to_string(),
                started: Instant::now(),
                signals: BTreeMap::new(),
                fail_opens: 0,
                fail_reads: 0,
                read_delay: Duration::ZERO,
                next_session: 1,
                live_session: None,
                stats: DeviceStats::default(),
            })),
        }
    }

    /// A device producing plausible transmitter data for `channels`.
    ///
    /// Conductivity channels wander around 1413 µS/cm, temperatures around
    /// 25 °C, and status words report "okay".
    pub fn m800(offsets: &OffsetTable, channels: &ChannelMap) -> Self {
        let device = Self::new(offsets.assembly_size());
        {
            let mut sim = lock(&device.inner);
            for (i, (name, slot)) in channels.readings().iter().enumerate() {
                let Some(range) = offsets.get(slot) else {
                    continue;
                };
                let (base, amplitude) = if name.starts_with("temperature") {
                    (25.0, 1.5)
                } else {
                    (1413.0, 40.0)
                };
                let signal = Signal::Wave {
                    base,
                    amplitude,
                    period: Duration::from_secs(60 + 15 * i as u64),
                };
                sim.signals.insert(range.start, signal);
            }
            for slot in channels.statuses().values() {
                if let Some(range) = offsets.get(slot) {
                    sim.signals.insert(range.start, Signal::Word(0));
                }
            }
        }
        device
    }

    /// Set the signal at byte `offset`.
    pub fn set_signal(&self, offset: usize, signal: Signal) {
        lock(&self.inner).signals.insert(offset, signal);
    }

    pub fn set_f32(&self, offset: usize, value: f32) {
        self.set_signal(offset, Signal::Fixed(value));
    }

    pub fn set_word(&self, offset: usize, word: u32) {
        self.set_signal(offset, Signal::Word(word));
    }

    /// Change the size of the returned assembly.
    pub fn set_assembly_size(&self, size: usize) {
        lock(&self.inner).assembly_size = size;
    }

    /// Make the next `n` session opens fail.
    pub fn fail_next_opens(&self, n: u32) {
        lock(&self.inner).fail_opens = n;
    }

    /// Make the next `n` assembly reads fail without losing the session.
    pub fn fail_next_reads(&self, n: u32) {
        lock(&self.inner).fail_reads = n;
    }

    /// Block each assembly read for `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        lock(&self.inner).read_delay = delay;
    }

    /// Invalidate the current session, as a device reboot would.
    pub fn drop_sessions(&self) {
        lock(&self.inner).live_session = None;
    }

    pub fn stats(&self) -> DeviceStats {
        lock(&self.inner).stats
    }

    fn render(sim: &DeviceSim) -> Vec<u8> {
        let mut frame = vec![0u8; sim.assembly_size];
        let elapsed = sim.started.elapsed();
        for (&offset, signal) in &sim.signals {
            if let Some(dst) = frame.get_mut(offset..offset + 4) {
                dst.copy_from_slice(&signal.sample(elapsed));
            }
        }
        frame
    }
}

impl DeviceClient for SimulatedDevice {
    type Session = u64;

    fn open(&mut self, address: &str, _timeout: Duration) -> Result<u64, DeviceError> {
        let mut sim = lock(&self.inner);
        sim.stats.opens += 1;
        if sim.fail_opens > 0 {
            sim.fail_opens -= 1;
            return Err(DeviceError::Connection(format!("{} unreachable", address)));
        }
        let id = sim.next_session;
        sim.next_session += 1;
        sim.live_session = Some(id);
        Ok(id)
    }

    fn close(&mut self, session: u64) -> Result<(), DeviceError> {
        let mut sim = lock(&self.inner);
        sim.stats.closes += 1;
        if sim.live_session == Some(session) {
            sim.live_session = None;
        }
        Ok(())
    }

    fn read_attribute(&mut self, session: &u64, path: AttributePath) -> Result<Vec<u8>, DeviceError> {
        let delay = {
            let mut sim = lock(&self.inner);
            sim.stats.reads += 1;
            if sim.live_session != Some(*session) {
                return Err(DeviceError::SessionLost(format!("session {} unknown", session)));
            }
            if path == AttributePath::IDENTITY_PRODUCT_NAME {
                let mut bytes = vec![sim.product_name.len().min(255) as u8];
                bytes.extend(sim.product_name.bytes().take(255));
                return Ok(bytes);
            }
            if sim.fail_reads > 0 {
                sim.fail_reads -= 1;
                return Err(DeviceError::Read("request timed out".to_string()));
            }
            sim.read_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(Self::render(&lock(&self.inner)))
    }

    fn is_session_alive(&mut self, session: &u64) -> bool {
        lock(&self.inner).live_session == Some(*session)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryNode {
    declared: Option<ValueKind>,
    value: Option<TypedValue>,
}

#[derive(Debug, Default)]
struct ServerSim {
    nodes: HashMap<String, MemoryNode>,
    available: bool,
    failing_nodes: HashSet<String>,
    next_session: u64,
    live_session: Option<u64>,
    opens: u32,
    closes: u32,
    writes: Vec<(String, TypedValue)>,
}

/// In-memory OPC UA address space.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    inner: Arc<Mutex<ServerSim>>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// An empty, reachable server.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServerSim {
                available: true,
                next_session: 1,
                ..Default::default()
            })),
        }
    }

    /// The M800 test address space: conductivity, temperature and status
    /// per channel, plus the watchdog flag.
    pub fn m800() -> Self {
        let server = Self::new();
        for ch in 1..=4 {
            server.add_node(format!("ns=2;s=Conductivity_Ch{ch}"), Some(ValueKind::Float));
            server.add_node(format!("ns=2;s=Temperature_Ch{ch}"), Some(ValueKind::Float));
            server.add_node(format!("ns=2;s=Status_Ch{ch}"), Some(ValueKind::String));
        }
        server.add_node("ns=2;s=WATCHDOG", Some(ValueKind::Boolean));
        server
    }

    /// Add a node; `None` means its declared type cannot be discovered.
    pub fn add_node(&self, node_id: impl Into<String>, declared: Option<ValueKind>) {
        lock(&self.inner).nodes.insert(
            node_id.into(),
            MemoryNode {
                declared,
                value: None,
            },
        );
    }

    /// Add every node id not yet present, with an unknown declared type.
    pub fn with_nodes<'a>(self, node_ids: impl IntoIterator<Item = &'a String>) -> Self {
        {
            let mut sim = lock(&self.inner);
            for id in node_ids {
                sim.nodes.entry(id.clone()).or_default();
            }
        }
        self
    }

    /// Refuse (or accept again) new sessions.
    pub fn set_available(&self, available: bool) {
        lock(&self.inner).available = available;
    }

    /// Make every write to `node_id` fail.
    pub fn fail_node(&self, node_id: &str) {
        lock(&self.inner).failing_nodes.insert(node_id.to_string());
    }

    pub fn heal_node(&self, node_id: &str) {
        lock(&self.inner).failing_nodes.remove(node_id);
    }

    /// Invalidate the current session, as a server restart would.
    pub fn drop_sessions(&self) {
        lock(&self.inner).live_session = None;
    }

    /// Current value of a node.
    pub fn value(&self, node_id: &str) -> Option<TypedValue> {
        lock(&self.inner).nodes.get(node_id)?.value.clone()
    }

    /// All successful writes in order.
    pub fn writes(&self) -> Vec<(String, TypedValue)> {
        lock(&self.inner).writes.clone()
    }

    /// Number of sessions opened so far.
    pub fn opens(&self) -> u32 {
        lock(&self.inner).opens
    }

    /// Number of session closes received, stale sessions included.
    pub fn closes(&self) -> u32 {
        lock(&self.inner).closes
    }
}

#[async_trait]
impl ServerClient for MemoryServer {
    type Session = u64;
    type Node = String;

    async fn open(&self, endpoint: &str) -> Result<u64, ServerError> {
        let mut sim = lock(&self.inner);
        sim.opens += 1;
        if !sim.available {
            return Err(ServerError::Connection(format!(
                "{} refused connection",
                endpoint
            )));
        }
        let id = sim.next_session;
        sim.next_session += 1;
        sim.live_session = Some(id);
        Ok(id)
    }

    async fn close(&self, session: u64) -> Result<(), ServerError> {
        let mut sim = lock(&self.inner);
        sim.closes += 1;
        if sim.live_session == Some(session) {
            sim.live_session = None;
        }
        Ok(())
    }

    async fn resolve_node(&self, _session: &u64, node_id: &str) -> Result<String, ServerError> {
        if lock(&self.inner).nodes.contains_key(node_id) {
            Ok(node_id.to_string())
        } else {
            Err(ServerError::UnknownNode(node_id.to_string()))
        }
    }

    async fn discover_declared_type(&self, _session: &u64, node: &String) -> Option<ValueKind> {
        lock(&self.inner).nodes.get(node)?.declared.clone()
    }

    async fn write_value(
        &self,
        session: &u64,
        node: &String,
        value: TypedValue,
    ) -> Result<(), ServerError> {
        let mut sim = lock(&self.inner);
        if sim.live_session != Some(*session) {
            return Err(ServerError::SessionClosed);
        }
        if sim.failing_nodes.contains(node) {
            return Err(ServerError::Write(format!("BadNotWritable on {}", node)));
        }
        let Some(entry) = sim.nodes.get_mut(node) else {
            return Err(ServerError::UnknownNode(node.clone()));
        };
        entry.value = Some(value.clone());
        sim.writes.push((node.clone(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_m800_device_frame_layout() {
        let offsets = OffsetTable::from_assembly_size(128);
        let channels = ChannelMap::m800();
        let mut device = SimulatedDevice::m800(&offsets, &channels);

        let session = device.open("127.0.0.1:44818", Duration::from_secs(1)).unwrap();
        let frame = device
            .read_attribute(&session, AttributePath::INPUT_ASSEMBLY)
            .unwrap();
        assert_eq!(frame.len(), 128);

        let conductivity = f32::from_le_bytes(frame[0..4].try_into().unwrap());
        assert!((1373.0..=1453.0).contains(&conductivity));
        let temperature = f32::from_le_bytes(frame[4..8].try_into().unwrap());
        assert!((23.5..=26.5).contains(&temperature));
    }

    #[test]
    fn test_device_identity() {
        let mut device = SimulatedDevice::new(4);
        let session = device.open("dev", Duration::from_secs(1)).unwrap();
        let bytes = device
            .read_attribute(&session, AttributePath::IDENTITY_PRODUCT_NAME)
            .unwrap();
        assert_eq!(crate::device::short_string(&bytes), "M800 Simulated");
    }

    #[test]
    fn test_device_stale_session() {
        let mut device = SimulatedDevice::new(4);
        let first = device.open("dev", Duration::from_secs(1)).unwrap();
        let second = device.open("dev", Duration::from_secs(1)).unwrap();

        assert!(!device.is_session_alive(&first));
        assert!(device.is_session_alive(&second));
        assert!(matches!(
            device.read_attribute(&first, AttributePath::INPUT_ASSEMBLY),
            Err(DeviceError::SessionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_server_round_trip() {
        let server = MemoryServer::m800();
        let session = server.open("opc.tcp://sim:4840").await.unwrap();
        let node = server
            .resolve_node(&session, "ns=2;s=WATCHDOG")
            .await
            .unwrap();

        assert_eq!(
            server.discover_declared_type(&session, &node).await,
            Some(ValueKind::Boolean)
        );
        server
            .write_value(&session, &node, TypedValue::Boolean(true))
            .await
            .unwrap();
        assert_eq!(
            server.value("ns=2;s=WATCHDOG"),
            Some(TypedValue::Boolean(true))
        );
    }

    #[tokio::test]
    async fn test_memory_server_failures() {
        let server = MemoryServer::m800().with_nodes(&["ns=2;s=Extra".to_string()]);
        let session = server.open("opc.tcp://sim:4840").await.unwrap();

        assert!(matches!(
            server.resolve_node(&session, "ns=9;s=Missing").await,
            Err(ServerError::UnknownNode(_))
        ));

        let extra = server.resolve_node(&session, "ns=2;s=Extra").await.unwrap();
        assert_eq!(server.discover_declared_type(&session, &extra).await, None);

        server.fail_node("ns=2;s=Extra");
        assert!(
            server
                .write_value(&session, &extra, TypedValue::Double(1.0))
                .await
                .is_err()
        );

        server.drop_sessions();
        let watchdog = "ns=2;s=WATCHDOG".to_string();
        assert!(matches!(
            server
                .write_value(&session, &watchdog, TypedValue::Boolean(true))
                .await,
            Err(ServerError::SessionClosed)
        ));

        server.set_available(false);
        assert!(server.open("opc.tcp://sim:4840").await.is_err());
        assert_eq!(server.opens(), 2);
    }
}
