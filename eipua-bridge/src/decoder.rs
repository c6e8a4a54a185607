//! Decoding of raw assembly frames.
//!
//! All functions here are pure. A value that cannot be decoded is reported
//! as `None` for that channel only.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::channels::{ChannelMap, status_bit};
use crate::offsets::{OffsetTable, SLOT_SIZE};

/// Decoded float channels for one cycle.
pub type DecodedReadings = BTreeMap<String, Option<f32>>;

/// Rendered status words for one cycle.
pub type DecodedStatuses = BTreeMap<String, Option<String>>;

/// Status text of a word with no bits set.
pub const STATUS_OK: &str = "okay";

/// Borrow exactly 4 bytes at `start..=end`.
fn word_bytes(frame: &[u8], start: usize, end: usize) -> Option<[u8; SLOT_SIZE]> {
    if end.checked_sub(start) != Some(SLOT_SIZE - 1) {
        return None;
    }
    frame.get(start..=end)?.try_into().ok()
}

/// Little-endian IEEE-754 single at `start..=end`.
pub fn decode_f32(frame: &[u8], start: usize, end: usize) -> Option<f32> {
    word_bytes(frame, start, end).map(f32::from_le_bytes)
}

/// Little-endian unsigned 32-bit integer at `start..=end`.
pub fn decode_u32(frame: &[u8], start: usize, end: usize) -> Option<u32> {
    word_bytes(frame, start, end).map(u32::from_le_bytes)
}

/// Render a status word as a comma separated list of set-bit descriptions.
pub fn decode_status(word: u32) -> String {
    let descriptions: Vec<&str> = (0..32u32)
        .filter(|bit| word & (1u32 << *bit) != 0)
        .filter_map(status_bit)
        .collect();

    if descriptions.is_empty() {
        STATUS_OK.to_string()
    } else {
        descriptions.join(", ")
    }
}

/// Decode every float channel of `channels` from `frame`.
pub fn read_all_channels(
    frame: &[u8],
    offsets: &OffsetTable,
    channels: &ChannelMap,
) -> DecodedReadings {
    channels
        .readings()
        .iter()
        .map(|(name, slot)| {
            let value = locate(frame, offsets, name, slot)
                .and_then(|(start, end)| decode_f32(frame, start, end));
            if let Some(v) = value {
                debug!(channel = %name, slot = %slot, value = v, "Decoded reading");
            }
            (name.clone(), value)
        })
        .collect()
}

/// Decode and render every status word of `channels` from `frame`.
pub fn read_all_statuses(
    frame: &[u8],
    offsets: &OffsetTable,
    channels: &ChannelMap,
) -> DecodedStatuses {
    channels
        .statuses()
        .iter()
        .map(|(name, slot)| {
            let value = locate(frame, offsets, name, slot)
                .and_then(|(start, end)| decode_u32(frame, start, end))
                .map(decode_status);
            (name.clone(), value)
        })
        .collect()
}

/// Readings and statuses with every entry absent (no frame this cycle).
pub fn absent(channels: &ChannelMap) -> (DecodedReadings, DecodedStatuses) {
    (
        channels.readings().keys().map(|k| (k.clone(), None)).collect(),
        channels.statuses().keys().map(|k| (k.clone(), None)).collect(),
    )
}

fn locate(
    frame: &[u8],
    offsets: &OffsetTable,
    name: &str,
    slot: &str,
) -> Option<(usize, usize)> {
    let Some(range) = offsets.get(slot) else {
        warn!(channel = %name, slot = %slot, "Unknown slot");
        return None;
    };
    if range.end >= frame.len() {
        warn!(
            channel = %name,
            slot = %slot,
            range = %range,
            frame_len = frame.len(),
            "Slot beyond end of frame"
        );
        return None;
    }
    Some((range.start, range.end))
}
