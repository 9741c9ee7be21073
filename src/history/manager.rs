//! History of recent epochs: decoded packets plus the published waveforms.

use super::packet::{Packet, PacketList};
use crate::graph::{EpochReport, EpochSeq, NodeId, SharedBuffer, StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by history lookups and edits.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    #[error("Epoch {0} is not in history")]
    UnknownEpoch(EpochSeq),

    #[error("Epoch {epoch} is not newer than the latest recorded epoch {latest}")]
    NonMonotonic { epoch: EpochSeq, latest: EpochSeq },
}

/// How much history to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Maximum number of epochs; at least 1
    pub max_epochs: usize,
    /// Optional bound on retained packet and waveform bytes
    pub max_bytes: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            max_bytes: None,
        }
    }
}

/// A named point in time within one history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Femtoseconds from the epoch's trigger
    pub offset_fs: i64,
    pub name: String,
}

/// Everything recorded for one epoch. Immutable once recorded.
#[derive(Debug)]
pub struct HistoryEntry {
    pub epoch: EpochSeq,
    /// Wall-clock time the entry was recorded
    pub timestamp: DateTime<Utc>,
    packets: PacketList,
    waveforms: BTreeMap<StreamId, SharedBuffer>,
    size_bytes: usize,
}

impl HistoryEntry {
    fn new(epoch: EpochSeq, packets: PacketList, waveforms: BTreeMap<StreamId, SharedBuffer>) -> Self {
        let size_bytes = packets.size_bytes() + waveforms.values().map(|b| b.size_bytes()).sum::<usize>();
        Self {
            epoch,
            timestamp: Utc::now(),
            packets,
            waveforms,
            size_bytes,
        }
    }

    /// All packets of the epoch, sorted by start time.
    pub fn packets(&self) -> &[Packet] {
        self.packets.as_slice()
    }

    pub fn packet_list(&self) -> &PacketList {
        &self.packets
    }

    /// Packets emitted by one decoder node.
    pub fn packets_from(&self, decoder: NodeId) -> Vec<&Packet> {
        self.packets.from_source(decoder).collect()
    }

    /// Packets overlapping `[t0, t1)`.
    pub fn packets_in_range(&self, t0: i64, t1: i64) -> Vec<&Packet> {
        self.packets.overlapping(t0, t1)
    }

    pub fn waveform(&self, stream: StreamId) -> Option<&SharedBuffer> {
        self.waveforms.get(&stream)
    }

    pub fn waveforms(&self) -> impl Iterator<Item = (StreamId, &SharedBuffer)> {
        self.waveforms.iter().map(|(id, b)| (*id, b))
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Shared handle to a history entry. While a handle is alive the entry is
/// not evicted.
pub type HistoryHandle = Arc<HistoryEntry>;

#[derive(Debug)]
struct Slot {
    entry: HistoryHandle,
    pinned: bool,
    nickname: String,
    markers: Vec<Marker>,
}

impl Slot {
    fn evictable(&self) -> bool {
        !self.pinned && self.markers.is_empty() && Arc::strong_count(&self.entry) == 1
    }
}

/// Bounded, epoch-ordered record of past acquisitions.
#[derive(Debug, Default)]
pub struct HistoryManager {
    /// Oldest first; epochs strictly increasing
    slots: VecDeque<Slot>,
    policy: RetentionPolicy,
    total_bytes: usize,
}

impl HistoryManager {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            slots: VecDeque::new(),
            policy: Self::sanitize(policy),
            total_bytes: 0,
        }
    }

    fn sanitize(mut policy: RetentionPolicy) -> RetentionPolicy {
        policy.max_epochs = policy.max_epochs.max(1);
        policy
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Change the policy and evict down to it.
    pub fn set_policy(&mut self, policy: RetentionPolicy) -> usize {
        self.policy = Self::sanitize(policy);
        self.enforce_retention()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Recorded epochs, oldest first.
    pub fn epochs(&self) -> impl Iterator<Item = EpochSeq> + '_ {
        self.slots.iter().map(|s| s.entry.epoch)
    }

    /// Record one epoch.
    ///
    /// `batches` are the packet outputs of each decoder in emission order.
    /// They are merged by start time; equal start times keep emission order.
    pub fn record_epoch(
        &mut self,
        epoch: EpochSeq,
        batches: impl IntoIterator<Item = Vec<Packet>>,
        waveforms: BTreeMap<StreamId, SharedBuffer>,
    ) -> Result<HistoryHandle, HistoryError> {
        if let Some(latest) = self.slots.back().map(|s| s.entry.epoch) {
            if epoch <= latest {
                return Err(HistoryError::NonMonotonic { epoch, latest });
            }
        }

        let mut packets = PacketList::new();
        for batch in batches {
            packets.extend_sorted(batch);
        }
        let entry = Arc::new(HistoryEntry::new(epoch, packets, waveforms));
        self.total_bytes += entry.size_bytes;
        self.slots.push_back(Slot {
            entry: entry.clone(),
            pinned: false,
            nickname: String::new(),
            markers: Vec::new(),
        });
        tracing::debug!(
            epoch = epoch.0,
            packets = entry.packets.len(),
            bytes = entry.size_bytes,
            "Recorded history entry"
        );

        self.enforce_retention();
        Ok(entry)
    }

    /// Record the packets and outputs of an evaluated epoch.
    ///
    /// Returns `None` when the epoch produced nothing at all.
    pub fn record_report(&mut self, report: &EpochReport) -> Result<Option<HistoryHandle>, HistoryError> {
        if report.outputs.is_empty() && report.packets.is_empty() {
            return Ok(None);
        }
        let batches = report
            .packets
            .iter()
            .map(|(_, buf)| buf.as_packets().map(<[Packet]>::to_vec).unwrap_or_default());
        let waveforms = report
            .outputs
            .iter()
            .map(|(id, buf)| (*id, buf.clone()))
            .collect();
        self.record_epoch(report.epoch, batches, waveforms).map(Some)
    }

    fn slot(&self, epoch: EpochSeq) -> Option<&Slot> {
        self.index_of(epoch).map(|i| &self.slots[i])
    }

    fn slot_mut(&mut self, epoch: EpochSeq) -> Result<&mut Slot, HistoryError> {
        let index = self.index_of(epoch).ok_or(HistoryError::UnknownEpoch(epoch))?;
        Ok(&mut self.slots[index])
    }

    fn index_of(&self, epoch: EpochSeq) -> Option<usize> {
        let (front, back) = self.slots.as_slices();
        match front.binary_search_by_key(&epoch, |s| s.entry.epoch) {
            Ok(i) => Some(i),
            Err(_) => back
                .binary_search_by_key(&epoch, |s| s.entry.epoch)
                .ok()
                .map(|i| i + front.len()),
        }
    }

    pub fn get(&self, epoch: EpochSeq) -> Option<HistoryHandle> {
        self.slot(epoch).map(|s| s.entry.clone())
    }

    pub fn latest(&self) -> Option<HistoryHandle> {
        self.nth_most_recent(0)
    }

    /// `n = 0` is the newest entry.
    pub fn nth_most_recent(&self, n: usize) -> Option<HistoryHandle> {
        let index = self.slots.len().checked_sub(n + 1)?;
        self.slots.get(index).map(|s| s.entry.clone())
    }

    /// Copies of the packets of `epoch` overlapping `[t0, t1)`.
    pub fn packets_in_range(&self, epoch: EpochSeq, t0: i64, t1: i64) -> Result<Vec<Packet>, HistoryError> {
        let slot = self.slot(epoch).ok_or(HistoryError::UnknownEpoch(epoch))?;
        Ok(slot
            .entry
            .packets_in_range(t0, t1)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Pinned entries are never evicted.
    pub fn pin(&mut self, epoch: EpochSeq, pinned: bool) -> Result<(), HistoryError> {
        self.slot_mut(epoch)?.pinned = pinned;
        if !pinned {
            self.enforce_retention();
        }
        Ok(())
    }

    pub fn is_pinned(&self, epoch: EpochSeq) -> bool {
        self.slot(epoch).is_some_and(|s| s.pinned)
    }

    pub fn set_nickname(&mut self, epoch: EpochSeq, nickname: impl Into<String>) -> Result<(), HistoryError> {
        self.slot_mut(epoch)?.nickname = nickname.into();
        Ok(())
    }

    pub fn nickname(&self, epoch: EpochSeq) -> Option<&str> {
        self.slot(epoch)
            .map(|s| s.nickname.as_str())
            .filter(|n| !n.is_empty())
    }

    /// Entries with markers are kept like pinned ones.
    pub fn add_marker(&mut self, epoch: EpochSeq, marker: Marker) -> Result<(), HistoryError> {
        let slot = self.slot_mut(epoch)?;
        let at = slot.markers.partition_point(|m| m.offset_fs <= marker.offset_fs);
        slot.markers.insert(at, marker);
        Ok(())
    }

    pub fn markers(&self, epoch: EpochSeq) -> &[Marker] {
        self.slot(epoch)
            .map(|s| s.markers.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear_markers(&mut self, epoch: EpochSeq) -> Result<(), HistoryError> {
        self.slot_mut(epoch)?.markers.clear();
        self.enforce_retention();
        Ok(())
    }

    /// Outstanding handles to the entry, not counting the history itself.
    pub fn ref_count(&self, epoch: EpochSeq) -> Option<usize> {
        self.slot(epoch).map(|s| Arc::strong_count(&s.entry) - 1)
    }

    fn over_budget(&self) -> bool {
        self.slots.len() > self.policy.max_epochs
            || self
                .policy
                .max_bytes
                .is_some_and(|max| self.total_bytes as u64 > max)
    }

    /// Evict the oldest unpinned, unmarked, unreferenced entries until the
    /// policy holds or nothing more can go. The newest entry is always kept.
    pub fn enforce_retention(&mut self) -> usize {
        let mut evicted = 0;
        while self.over_budget() {
            let newest = self.slots.len().saturating_sub(1);
            let Some(index) = self.slots.iter().take(newest).position(Slot::evictable) else {
                tracing::debug!(
                    entries = self.slots.len(),
                    bytes = self.total_bytes,
                    "History over budget but every entry is held"
                );
                break;
            };
            if let Some(slot) = self.slots.remove(index) {
                self.total_bytes -= slot.entry.size_bytes;
                tracing::trace!(epoch = slot.entry.epoch.0, "Evicted history entry");
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop every entry. Outstanding handles stay valid.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.total_bytes = 0;
    }
}
