//! Fan-in of per-instrument captures into epochs.
//!
//! Instruments in the trigger group are held back until every member has
//! delivered; the group then forms one epoch. Acquiring instruments outside
//! the group form an epoch on their own.

use super::types::InstrumentCapture;
use crate::graph::InstrumentId;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct EpochAssembler {
    /// Participant -> member of the trigger group
    participants: BTreeMap<InstrumentId, bool>,
    pending: BTreeMap<InstrumentId, InstrumentCapture>,
}

impl EpochAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_participant(&mut self, instrument: InstrumentId, grouped: bool) {
        self.participants.insert(instrument, grouped);
    }

    /// Forget an instrument. Dropping a group member may complete the group.
    pub fn remove_participant(&mut self, instrument: InstrumentId) -> Option<Vec<InstrumentCapture>> {
        self.participants.remove(&instrument)?;
        self.pending.remove(&instrument);
        self.take_if_complete()
    }

    pub fn is_participant(&self, instrument: InstrumentId) -> bool {
        self.participants.contains_key(&instrument)
    }

    pub fn is_grouped(&self, instrument: InstrumentId) -> bool {
        self.participants.get(&instrument).copied().unwrap_or(false)
    }

    pub fn group_size(&self) -> usize {
        self.participants.values().filter(|g| **g).count()
    }

    /// Group members that have delivered for the epoch being assembled.
    pub fn pending(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        self.pending.keys().copied()
    }

    /// Offer a capture. Returns the captures of a completed epoch.
    pub fn offer(&mut self, capture: InstrumentCapture) -> Option<Vec<InstrumentCapture>> {
        let Some(&grouped) = self.participants.get(&capture.instrument) else {
            tracing::debug!("Dropping capture from detached {}", capture.instrument);
            return None;
        };
        if !grouped {
            return Some(vec![capture]);
        }
        if let Some(previous) = self.pending.insert(capture.instrument, capture) {
            tracing::warn!(
                "{} delivered twice before its trigger group completed; keeping the newer capture",
                previous.instrument
            );
        }
        self.take_if_complete()
    }

    fn take_if_complete(&mut self) -> Option<Vec<InstrumentCapture>> {
        if self.pending.is_empty() {
            return None;
        }
        let complete = self
            .participants
            .iter()
            .filter(|(_, grouped)| **grouped)
            .all(|(id, _)| self.pending.contains_key(id));
        if !complete {
            return None;
        }
        Some(std::mem::take(&mut self.pending).into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(id: u32) -> InstrumentCapture {
        InstrumentCapture::new(InstrumentId(id), Vec::new())
    }

    fn ids(batch: &[InstrumentCapture]) -> Vec<u32> {
        batch.iter().map(|c| c.instrument.0).collect()
    }

    #[test]
    fn test_group_waits_for_all_members() {
        let mut asm = EpochAssembler::new();
        asm.add_participant(InstrumentId(1), true);
        asm.add_participant(InstrumentId(2), true);

        assert!(asm.offer(capture(2)).is_none());
        assert_eq!(asm.pending().collect::<Vec<_>>(), vec![InstrumentId(2)]);
        let batch = asm.offer(capture(1)).unwrap();
        assert_eq!(ids(&batch), vec![1, 2]);
        assert_eq!(asm.pending().count(), 0);
    }

    #[test]
    fn test_ungrouped_instrument_forms_own_epoch() {
        let mut asm = EpochAssembler::new();
        asm.add_participant(InstrumentId(1), true);
        asm.add_participant(InstrumentId(2), true);
        asm.add_participant(InstrumentId(3), false);

        assert!(asm.offer(capture(1)).is_none());
        assert_eq!(ids(&asm.offer(capture(3)).unwrap()), vec![3]);
        // The group is still waiting on instrument 2
        assert_eq!(asm.pending().count(), 1);
    }

    #[test]
    fn test_removing_laggard_completes_group() {
        let mut asm = EpochAssembler::new();
        asm.add_participant(InstrumentId(1), true);
        asm.add_participant(InstrumentId(2), true);
        assert!(asm.offer(capture(1)).is_none());

        let batch = asm.remove_participant(InstrumentId(2)).unwrap();
        assert_eq!(ids(&batch), vec![1]);
        assert_eq!(asm.group_size(), 1);
        assert!(asm.remove_participant(InstrumentId(2)).is_none());
    }

    #[test]
    fn test_detached_captures_are_dropped() {
        let mut asm = EpochAssembler::new();
        assert!(asm.offer(capture(9)).is_none());
        assert!(!asm.is_participant(InstrumentId(9)));
    }
}
