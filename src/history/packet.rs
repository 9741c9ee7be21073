//! Decoded packets and the start-time ordered list that holds them.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};

/// A discrete, time-bounded protocol event produced by a decoder node.
///
/// Times are femtoseconds relative to the trigger of the epoch the packet
/// was decoded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub start_fs: i64,
    pub end_fs: i64,
    /// Ordered (name, formatted value) pairs
    pub fields: Vec<(String, String)>,
    /// Decoder node that produced the packet
    pub source: NodeId,
}

impl Packet {
    pub fn new(source: NodeId, start_fs: i64, end_fs: i64) -> Self {
        Self {
            start_fs,
            end_fs: end_fs.max(start_fs),
            fields: Vec::new(),
            source,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn duration_fs(&self) -> i64 {
        self.end_fs - self.start_fs
    }

    /// Whether the packet overlaps the half-open range `[t0, t1)`.
    pub fn overlaps(&self, t0: i64, t1: i64) -> bool {
        self.start_fs < t1 && (self.end_fs > t0 || (self.end_fs == self.start_fs && self.start_fs >= t0))
    }

    /// Approximate heap footprint.
    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .fields
                .iter()
                .map(|(n, v)| n.len() + v.len() + std::mem::size_of::<(String, String)>())
                .sum::<usize>()
    }
}

/// Packets sorted by start time. Equal start times keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketList {
    packets: Vec<Packet>,
    /// Longest packet seen; bounds the backwards search in range queries
    max_duration: i64,
}

impl PacketList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn as_slice(&self) -> &[Packet] {
        &self.packets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.packets.iter()
    }

    pub fn size_bytes(&self) -> usize {
        self.packets.iter().map(Packet::size_bytes).sum()
    }

    /// Add a batch in emission order.
    ///
    /// The batch is stable-sorted on its own, then merged into the tail of
    /// the list that it overlaps. A batch starting at or after the current
    /// last packet is a plain append.
    pub fn extend_sorted(&mut self, mut batch: Vec<Packet>) {
        if batch.is_empty() {
            return;
        }
        if !batch.windows(2).all(|w| w[0].start_fs <= w[1].start_fs) {
            batch.sort_by_key(|p| p.start_fs);
        }
        self.max_duration = batch
            .iter()
            .map(Packet::duration_fs)
            .fold(self.max_duration, i64::max);

        let first = batch[0].start_fs;
        let split = self.packets.partition_point(|p| p.start_fs <= first);
        if split == self.packets.len() {
            self.packets.extend(batch);
            return;
        }

        // Existing packets win ties so earlier emissions stay first
        let tail = self.packets.split_off(split);
        self.packets.reserve(tail.len() + batch.len());
        let mut old = tail.into_iter().peekable();
        let mut new = batch.into_iter().peekable();
        loop {
            let take_old = match (old.peek(), new.peek()) {
                (Some(o), Some(n)) => o.start_fs <= n.start_fs,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_old { old.next() } else { new.next() };
            if let Some(p) = next {
                self.packets.push(p);
            }
        }
    }

    /// Packets overlapping `[t0, t1)`, in start order.
    pub fn overlapping(&self, t0: i64, t1: i64) -> Vec<&Packet> {
        if t1 <= t0 {
            return Vec::new();
        }
        let hi = self.packets.partition_point(|p| p.start_fs < t1);
        let lo = self
            .packets
            .partition_point(|p| p.start_fs < t0.saturating_sub(self.max_duration));
        self.packets[lo..hi]
            .iter()
            .filter(|p| p.overlaps(t0, t1))
            .collect()
    }

    /// Packets from one decoder node.
    pub fn from_source(&self, source: NodeId) -> impl Iterator<Item = &Packet> {
        self.packets.iter().filter(move |p| p.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(start: i64, end: i64, tag: &str) -> Packet {
        Packet::new(NodeId(1), start, end).with_field("tag", tag)
    }

    fn tags(list: &PacketList) -> Vec<&str> {
        list.iter().filter_map(|p| p.field("tag")).collect()
    }

    #[test]
    fn test_append_fast_path() {
        let mut list = PacketList::new();
        list.extend_sorted(vec![pkt(0, 1, "a"), pkt(5, 6, "b")]);
        list.extend_sorted(vec![pkt(5, 7, "c"), pkt(9, 10, "d")]);
        assert_eq!(tags(&list), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_out_of_order_batch_is_merged_stably() {
        let mut list = PacketList::new();
        list.extend_sorted(vec![pkt(0, 1, "a"), pkt(10, 11, "b"), pkt(20, 21, "c")]);
        list.extend_sorted(vec![pkt(15, 16, "y"), pkt(10, 12, "x"), pkt(10, 13, "x2")]);
        assert_eq!(tags(&list), vec!["a", "b", "x", "x2", "y", "c"]);
    }

    #[test]
    fn test_overlapping_range() {
        let mut list = PacketList::new();
        list.extend_sorted(vec![pkt(0, 100, "long"), pkt(40, 45, "short"), pkt(60, 70, "late")]);
        let hit: Vec<_> = list.overlapping(50, 65).iter().filter_map(|p| p.field("tag")).collect();
        assert_eq!(hit, vec!["long", "late"]);
        assert!(list.overlapping(100, 200).is_empty());
        assert!(list.overlapping(10, 10).is_empty());
    }

    #[test]
    fn test_instant_packet_overlap() {
        let p = pkt(5, 5, "i");
        assert!(p.overlaps(5, 6));
        assert!(!p.overlaps(0, 5));
    }
}
