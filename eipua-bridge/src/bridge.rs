//! The polling loop tying device acquisition to server publication.
//!
//! One cycle is acquire → decode → publish → toggle watchdog, followed by a
//! fixed wait. The watchdog toggles every cycle, even without a frame. Cycles never overlap. Per-cycle failures are logged and
//! counted; only the shutdown signal ends the loop.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use eipua_bridge_framework::{ShutdownSignal, Value};

use crate::channels::ChannelMap;
use crate::decoder::{self, DecodedReadings, DecodedStatuses};
use crate::device::{DeviceClient, DeviceLink};
use crate::offsets::OffsetTable;
use crate::server::{ServerClient, ServerLink};

/// Lifecycle of a [`BridgeLoop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Draining,
    /// Terminal; no further cycles are accepted.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Draining => "draining",
            LoopState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Result of a single cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// Whether the device delivered a frame.
    pub frame_received: bool,
    pub readings: DecodedReadings,
    pub statuses: DecodedStatuses,
    pub writes_ok: usize,
    pub writes_failed: usize,
    /// Watchdog write result.
    pub watchdog: bool,
}

/// Totals over the lifetime of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub cycles: u64,
    pub frames_missed: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub watchdog_failed: u64,
}

impl LoopReport {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        if !outcome.frame_received {
            self.frames_missed += 1;
        }
        self.writes_ok += outcome.writes_ok as u64;
        self.writes_failed += outcome.writes_failed as u64;
        if !outcome.watchdog {
            self.watchdog_failed += 1;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates the device and server links.
pub struct BridgeLoop<D: DeviceClient, S: ServerClient> {
    /// Shared with the blocking worker that performs reads.
    device: Arc<Mutex<DeviceLink<D>>>,
    server: ServerLink<S>,
    offsets: OffsetTable,
    channels: ChannelMap,
    interval: Duration,
    state: LoopState,
    report: LoopReport,
}

impl<D: DeviceClient, S: ServerClient> BridgeLoop<D, S> {
    pub fn new(
        device: DeviceLink<D>,
        server: ServerLink<S>,
        offsets: OffsetTable,
        channels: ChannelMap,
        interval: Duration,
    ) -> Self {
        for (name, slot) in channels.unmapped(&offsets) {
            warn!(
                channel = name,
                slot,
                assembly_size = offsets.assembly_size(),
                "Channel slot lies outside the input assembly, it will never be published"
            );
        }

        Self {
            device: Arc::new(Mutex::new(device)),
            server,
            offsets,
            channels,
            interval,
            state: LoopState::Idle,
            report: LoopReport::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn report(&self) -> LoopReport {
        self.report
    }

    pub fn server(&self) -> &ServerLink<S> {
        &self.server
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// Run one cycle outside of [`run`](Self::run).
    ///
    /// Returns `None` once the loop is draining or stopped.
    pub async fn run_cycle(&mut self) -> Option<CycleOutcome> {
        match self.state {
            LoopState::Draining | LoopState::Stopped => {
                warn!(state = %self.state, "Cycle rejected");
                return None;
            }
            LoopState::Idle => self.state = LoopState::Running,
            LoopState::Running => {}
        }

        let outcome = self.cycle().await;
        self.report.record(&outcome);
        Some(outcome)
    }

    /// Poll until `shutdown` fires, then tear both links down.
    ///
    /// An in-flight cycle is abandoned when the signal arrives.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> LoopReport {
        if self.state != LoopState::Idle && self.state != LoopState::Running {
            warn!(state = %self.state, "Bridge loop cannot be restarted");
            return self.report;
        }

        self.state = LoopState::Running;
        info!(
            interval = ?self.interval,
            channels = self.channels.readings().len(),
            statuses = self.channels.statuses().len(),
            "Bridge loop running"
        );

        while !shutdown.is_triggered() {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => None,
                outcome = self.cycle() => Some(outcome),
            };
            let Some(outcome) = outcome else {
                debug!("Cycle abandoned on shutdown");
                break;
            };
            self.report.record(&outcome);

            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.shutdown().await;
        self.report
    }

    /// Close the server link, then the device link. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Draining;
        info!("Bridge loop draining");

        self.server.close().await;

        let device = Arc::clone(&self.device);
        if let Err(e) = tokio::task::spawn_blocking(move || lock(&device).close()).await {
            warn!(error = %e, "Device close task failed");
        }

        self.state = LoopState::Stopped;
        let report = self.report;
        info!(
            cycles = report.cycles,
            frames_missed = report.frames_missed,
            writes_ok = report.writes_ok,
            writes_failed = report.writes_failed,
            "Bridge loop stopped"
        );
    }

    async fn cycle(&self) -> CycleOutcome {
        let Some(frame) = self.acquire().await else {
            warn!("No frame from device this cycle");
            let (readings, statuses) = decoder::absent(&self.channels);
            let watchdog = self.server.toggle_watchdog().await;
            return CycleOutcome {
                frame_received: false,
                readings,
                statuses,
                writes_ok: 0,
                writes_failed: 0,
                watchdog,
            };
        };

        let readings = decoder::read_all_channels(&frame, &self.offsets, &self.channels);
        let statuses = decoder::read_all_statuses(&frame, &self.offsets, &self.channels);

        let values: Vec<(&str, Value)> = readings
            .iter()
            .filter_map(|(name, v)| v.map(|v| (name.as_str(), Value::from(v))))
            .chain(
                statuses
                    .iter()
                    .filter_map(|(name, s)| s.clone().map(|s| (name.as_str(), Value::Text(s)))),
            )
            .collect();

        let results = join_all(
            values
                .iter()
                .map(|(name, value)| self.server.write(name, value)),
        )
        .await;

        let writes_ok = results.iter().filter(|ok| **ok).count();
        let writes_failed = results.len() - writes_ok;
        if writes_failed > 0 {
            warn!(failed = writes_failed, total = results.len(), "Some writes failed");
        }

        let watchdog = self.server.toggle_watchdog().await;
        debug!(
            written = writes_ok,
            failed = writes_failed,
            watchdog,
            "Cycle complete"
        );

        CycleOutcome {
            frame_received: true,
            readings,
            statuses,
            writes_ok,
            writes_failed,
            watchdog,
        }
    }

    /// Read a frame on a blocking worker.
    async fn acquire(&self) -> Option<Vec<u8>> {
        let device = Arc::clone(&self.device);
        match tokio::task::spawn_blocking(move || lock(&device).read_raw_frame()).await {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Device read task failed");
                None
            }
        }
    }
}
