//! Logical channel names and status bit descriptions.
//!
//! The default layout follows the M800 transmitter's EtherNet/IP
//! documentation: conductivity and temperature floats per measurement
//! channel, and one 32-bit status word per channel.

use std::collections::BTreeMap;

use crate::offsets::{OffsetTable, slot_number};

/// Logical measurement/status names mapped to assembly slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    readings: BTreeMap<String, String>,
    statuses: BTreeMap<String, String>,
}

impl ChannelMap {
    /// Build a map from explicit reading and status tables.
    pub fn new(readings: BTreeMap<String, String>, statuses: BTreeMap<String, String>) -> Self {
        Self { readings, statuses }
    }

    /// Default four-channel M800 layout.
    pub fn m800() -> Self {
        let readings = [
            ("conductivity_ch1", "AI1"),
            ("temperature_ch1", "AI2"),
            ("conductivity_ch2", "AI5"),
            ("temperature_ch2", "AI6"),
            ("conductivity_ch3", "AI21"),
            ("temperature_ch3", "AI22"),
            ("conductivity_ch4", "AI25"),
            ("temperature_ch4", "AI26"),
        ];
        let statuses = [
            ("status_ch1", "AI15"),
            ("status_ch2", "AI16"),
            ("status_ch3", "AI31"),
            ("status_ch4", "AI32"),
        ];

        Self::new(to_map(&readings), to_map(&statuses))
    }

    /// Float channels: logical name to slot name.
    pub fn readings(&self) -> &BTreeMap<String, String> {
        &self.readings
    }

    /// Status words: logical name to slot name.
    pub fn statuses(&self) -> &BTreeMap<String, String> {
        &self.statuses
    }

    /// All logical names, readings first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.readings
            .keys()
            .chain(self.statuses.keys())
            .map(String::as_str)
    }

    /// Logical names whose slot does not exist in `offsets`.
    pub fn unmapped<'a>(&'a self, offsets: &'a OffsetTable) -> Vec<(&'a str, &'a str)> {
        self.readings
            .iter()
            .chain(self.statuses.iter())
            .filter(|(_, slot)| offsets.get(slot).is_none())
            .map(|(name, slot)| (name.as_str(), slot.as_str()))
            .collect()
    }

    /// Slot names that are not of the form `AI<n>`.
    pub fn malformed_slots(&self) -> Vec<&str> {
        self.readings
            .values()
            .chain(self.statuses.values())
            .filter(|slot| slot_number(slot).is_none())
            .map(String::as_str)
            .collect()
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::m800()
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Description of each status word bit; `None` for reserved bits.
pub const STATUS_BITS: [Option<&str>; 32] = [
    Some("Calibration Data Warning"),
    Some("Calibration Data Error"),
    Some("Sensor Disconnected"),
    Some("Sensor Failure"),
    Some("Measurement Out of Range"),
    Some("Temperature Out of Range"),
    Some("Maint Required"),
    Some("Cleaning Required"),
    Some("Sensor Wear Warning"),
    Some("Sensor Life Expired"),
    Some("Hold Active"),
    Some("Simulation Active"),
    Some("Configuration Changed"),
    Some("Conductivity Low Limit"),
    Some("Conductivity High Limit"),
    Some("Temperature Low Limit"),
    Some("Temperature High Limit"),
    Some("Polarization Warning"),
    Some("Cable Resistance Warning"),
    Some("Sensor Type Mismatch"),
    Some("Channel Not Configured"),
    Some("Channel Disabled"),
    Some("Firmware Update Required"),
    Some("Memory Error"),
    Some("Power Supply Warning"),
    Some("Internal Communication Error"),
    Some("Analog Output Fault"),
    None,
    None,
    None,
    None,
    Some("Device Failure"),
];

/// Description of a status bit, if the bit is assigned.
pub fn status_bit(bit: u32) -> Option<&'static str> {
    STATUS_BITS.get(bit as usize).copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_m800_layout_fits_128_byte_assembly() {
        let map = ChannelMap::m800();
        let offsets = OffsetTable::from_assembly_size(128);

        assert!(map.unmapped(&offsets).is_empty());
        assert!(map.malformed_slots().is_empty());
        assert_eq!(map.readings()["conductivity_ch1"], "AI1");
        assert_eq!(map.statuses()["status_ch1"], "AI15");
        assert_eq!(map.names().count(), 12);
    }

    #[test]
    fn test_unmapped_slots_reported() {
        let map = ChannelMap::m800();
        let offsets = OffsetTable::from_assembly_size(64);

        let unmapped = map.unmapped(&offsets);
        assert!(unmapped.contains(&("conductivity_ch3", "AI21")));
        assert!(unmapped.contains(&("status_ch4", "AI32")));
        assert!(!unmapped.iter().any(|(name, _)| *name == "conductivity_ch1"));
    }

    #[test]
    fn test_malformed_slots() {
        let map = ChannelMap::new(
            to_map(&[("c1", "AI1"), ("c2", "DI3")]),
            BTreeMap::new(),
        );
        assert_eq!(map.malformed_slots(), vec!["DI3"]);
    }

    #[test]
    fn test_status_bit_lookup() {
        assert_eq!(status_bit(0), Some("Calibration Data Warning"));
        assert_eq!(status_bit(6), Some("Maint Required"));
        assert_eq!(status_bit(28), None);
        assert_eq!(status_bit(31), Some("Device Failure"));
        assert_eq!(status_bit(32), None);
    }
}
