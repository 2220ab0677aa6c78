//! Per-ID statistics over decoded messages, for protocol exploration.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
};

use crate::protocol::Message;

/// Number of recent values kept per ID
pub const RECENT_VALUES: usize = 5;

/// Statistics for one message ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdStats {
    /// Messages seen
    pub count: u64,
    /// Smallest value
    pub min: i32,
    /// Largest value
    pub max: i32,
    /// Most recent values, oldest first
    pub recent: VecDeque<i32>,
}

impl IdStats {
    fn new(value: i32) -> Self {
        Self {
            count: 1,
            min: value,
            max: value,
            recent: VecDeque::from([value]),
        }
    }

    fn record(&mut self, value: i32) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if self.recent.len() == RECENT_VALUES {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
    }

    /// Spread between smallest and largest value
    #[must_use]
    pub fn range(&self) -> i64 {
        i64::from(self.max) - i64::from(self.min)
    }

    /// Latest value
    #[must_use]
    pub fn last(&self) -> Option<i32> {
        self.recent.back().copied()
    }
}

/// Collects statistics across a capture or a live session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    by_id: BTreeMap<u16, IdStats>,
    data_types: BTreeMap<u8, u64>,
}

impl MessageStats {
    /// Create empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message
    pub fn record(&mut self, message: &Message) {
        self.by_id
            .entry(message.id)
            .and_modify(|stats| stats.record(message.value))
            .or_insert_with(|| IdStats::new(message.value));
        *self.data_types.entry(message.data_type).or_default() += 1;
    }

    /// Record a batch of messages
    pub fn record_all(&mut self, messages: &[Message]) {
        for message in messages {
            self.record(message);
        }
    }

    /// Statistics for one ID
    #[must_use]
    pub fn get(&self, id: u16) -> Option<&IdStats> {
        self.by_id.get(&id)
    }

    /// All IDs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &IdStats)> {
        self.by_id.iter().map(|(id, stats)| (*id, stats))
    }

    /// Message counts per data type byte
    #[must_use]
    pub const fn data_type_counts(&self) -> &BTreeMap<u8, u64> {
        &self.data_types
    }

    /// Total messages recorded
    #[must_use]
    pub fn total(&self) -> u64 {
        self.by_id.values().map(|s| s.count).sum()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.data_types.clear();
    }
}

/// Analysis summary: totals, data type frequency and a per-ID table
impl fmt::Display for MessageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total messages parsed: {}", self.total())?;
        writeln!(f, "Unique data IDs found: {}", self.by_id.len())?;
        writeln!(f)?;

        // Most frequent first; frames without payload are left out
        let mut data_types: Vec<(u8, u64)> = self
            .data_types
            .iter()
            .filter(|(data_type, _)| **data_type != 0)
            .map(|(data_type, count)| (*data_type, *count))
            .collect();
        data_types.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        writeln!(f, "Data types frequency:")?;
        for (data_type, count) in data_types {
            writeln!(f, "  0x{data_type:02X}: {count} times")?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "{:<10} {:<8} {:<12} {:<12} {:<12} Last {RECENT_VALUES} Values",
            "Data ID", "Count", "Min", "Max", "Range"
        )?;
        writeln!(f, "{}", "-".repeat(80))?;
        for (id, stats) in self.iter() {
            writeln!(
                f,
                "{:<10} {:<8} {:<12} {:<12} {:<12} {:?}",
                format!("0x{id:04X}"),
                stats.count,
                stats.min,
                stats.max,
                stats.range(),
                stats.recent
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    #[test]
    fn test_stats_per_id() {
        let mut stats = MessageStats::new();
        stats.record_all(&decode(&[
            0x30, 0x04, 0x98, 0x5A, 0x08, 0x0A, // cadence raw 10
            0x30, 0x04, 0x98, 0x5A, 0x08, 0x50, // cadence raw 80
            0x30, 0x02, 0x98, 0x09, // assist, no payload
        ]));

        let cadence = stats.get(0x985A).unwrap();
        assert_eq!(cadence.count, 2);
        assert_eq!(cadence.min, 10);
        assert_eq!(cadence.max, 80);
        assert_eq!(cadence.range(), 70);
        assert_eq!(cadence.last(), Some(80));

        assert_eq!(stats.total(), 3);
        assert_eq!(stats.data_type_counts().get(&0x08), Some(&2));
        assert_eq!(stats.data_type_counts().get(&0x00), Some(&1));

        let ids: Vec<u16> = stats.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0x9809, 0x985A]);
    }

    #[test]
    fn test_recent_values_are_bounded() {
        let mut stats = MessageStats::new();
        for value in 0..8u8 {
            stats.record_all(&decode(&[0x30, 0x04, 0x98, 0x2D, 0x08, value]));
        }

        let speed = stats.get(0x982D).unwrap();
        assert_eq!(speed.recent, VecDeque::from([3, 4, 5, 6, 7]));
        assert_eq!(speed.count, 8);

        stats.clear();
        assert_eq!(stats.total(), 0);
        assert!(stats.get(0x982D).is_none());
    }

    #[test]
    fn test_summary_table() {
        let mut stats = MessageStats::new();
        stats.record_all(&decode(&[
            0x30, 0x04, 0x98, 0x5A, 0x08, 0x0A, // cadence raw 10
            0x30, 0x04, 0x98, 0x5A, 0x08, 0x50, // cadence raw 80
            0x30, 0x02, 0x98, 0x09, // assist, no payload
            0x30, 0x04, 0x80, 0x88, 0x0A, 0x4B, // battery, raw byte
        ]));

        let summary = stats.to_string();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Total messages parsed: 4");
        assert_eq!(lines[1], "Unique data IDs found: 3");
        assert_eq!(lines[3], "Data types frequency:");
        assert_eq!(lines[4], "  0x08: 2 times");
        assert_eq!(lines[5], "  0x0A: 1 times");
        assert_eq!(lines[6], "");
        assert!(lines[7].starts_with("Data ID"));
        assert!(lines[7].ends_with("Last 5 Values"));
        assert_eq!(lines[8], "-".repeat(80));

        // rows in ascending ID order
        assert!(lines[9].starts_with("0x8088"));
        assert!(lines[9].ends_with("[75]"));
        assert!(lines[10].starts_with("0x9809"));
        let cadence: Vec<&str> = lines[11].split_whitespace().collect();
        assert_eq!(cadence, vec!["0x985A", "2", "10", "80", "70", "[10,", "80]"]);
        assert_eq!(lines.len(), 12);
    }

    #[test]
    fn test_summary_of_empty_stats() {
        let summary = MessageStats::new().to_string();
        assert!(summary.starts_with("Total messages parsed: 0\nUnique data IDs found: 0\n"));
        assert!(summary.trim_end().ends_with(&"-".repeat(80)));
    }
}
