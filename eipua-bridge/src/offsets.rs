//! Slot layout of the device's input assembly.
//!
//! The assembly is carved into contiguous 4-byte slots named `AI1`, `AI2`, ...

use std::fmt;

/// Bytes per analog slot.
pub const SLOT_SIZE: usize = 4;

/// Prefix of slot names.
pub const SLOT_PREFIX: &str = "AI";

/// Inclusive byte range inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> usize {
        match self.end.checked_sub(self.start) {
            Some(span) => span.saturating_add(1),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Slot name to byte range mapping for one assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    assembly_size: usize,
    /// `slots[i]` is slot `AI{i + 1}`.
    slots: Vec<ByteRange>,
}

impl OffsetTable {
    /// Lay out `assembly_size / 4` slots starting at byte 0.
    ///
    /// Trailing bytes that do not fill a whole slot are ignored.
    pub fn from_assembly_size(assembly_size: usize) -> Self {
        let slots = (0..assembly_size / SLOT_SIZE)
            .map(|i| {
                let start = i * SLOT_SIZE;
                ByteRange::new(start, start + SLOT_SIZE - 1)
            })
            .collect();

        Self {
            assembly_size,
            slots,
        }
    }

    /// Declared assembly size in bytes.
    pub fn assembly_size(&self) -> usize {
        self.assembly_size
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Byte range of a slot by name (e.g. `"AI5"`).
    pub fn get(&self, slot: &str) -> Option<ByteRange> {
        let index = slot_number(slot)?;
        self.slots.get(index - 1).copied()
    }

    /// Iterate over `(slot name, range)` in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (String, ByteRange)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, range)| (slot_name(i + 1), *range))
    }
}

/// Name of the 1-based slot `number`.
pub fn slot_name(number: usize) -> String {
    format!("{}{}", SLOT_PREFIX, number)
}

/// Parse a slot name into its 1-based number.
pub fn slot_number(slot: &str) -> Option<usize> {
    let digits = slot.strip_prefix(SLOT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n >= 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_128_byte_assembly() {
        let table = OffsetTable::from_assembly_size(128);

        assert_eq!(table.len(), 32);
        assert_eq!(table.get("AI1"), Some(ByteRange::new(0, 3)));
        assert_eq!(table.get("AI2"), Some(ByteRange::new(4, 7)));
        assert_eq!(table.get("AI32"), Some(ByteRange::new(124, 127)));
        assert_eq!(table.get("AI33"), None);
    }

    #[test]
    fn test_byte_range_len_at_limits() {
        assert_eq!(ByteRange::new(0, 3).len(), 4);
        assert_eq!(ByteRange::new(5, 2).len(), 0);
        assert!(ByteRange::new(5, 2).is_empty());
        assert_eq!(ByteRange::new(0, usize::MAX).len(), usize::MAX);
        assert_eq!(ByteRange::new(usize::MAX, usize::MAX).len(), 1);
    }

    #[test]
    fn test_slots_cover_assembly_without_gaps() {
        for size in (4..=512).step_by(4) {
            let table = OffsetTable::from_assembly_size(size);
            assert_eq!(table.len(), size / 4);

            let mut next = 0;
            for (_, range) in table.iter() {
                assert_eq!(range.start, next);
                assert_eq!(range.len(), SLOT_SIZE);
                next = range.end + 1;
            }
            assert_eq!(next, size);
        }
    }

    #[test]
    fn test_partial_slot_is_truncated() {
        let table = OffsetTable::from_assembly_size(10);
        assert_eq!(table.len(), 2);
        assert_eq!(table.assembly_size(), 10);
        assert_eq!(table.get("AI3"), None);

        assert!(OffsetTable::from_assembly_size(3).is_empty());
    }

    #[test]
    fn test_iter_names_in_order() {
        let names: Vec<String> = OffsetTable::from_assembly_size(12)
            .iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["AI1", "AI2", "AI3"]);
    }

    #[test]
    fn test_slot_number_parsing() {
        assert_eq!(slot_number("AI1"), Some(1));
        assert_eq!(slot_number("AI21"), Some(21));
        assert_eq!(slot_number("AI0"), None);
        assert_eq!(slot_number("AI"), None);
        assert_eq!(slot_number("AO1"), None);
        assert_eq!(slot_number("AI+1"), None);
    }
}
