//! History retention under count and byte budgets

use scopegraph::graph::StreamData;
use scopegraph::history::Marker;
use scopegraph::{EpochSeq, HistoryManager, NodeId, Packet, RetentionPolicy, StreamId};
use std::collections::BTreeMap;
use std::sync::Arc;

fn packets(source: u32, starts: &[i64]) -> Vec<Packet> {
    starts
        .iter()
        .map(|t| Packet::new(NodeId(source), *t, t + 10).with_field("v", "x"))
        .collect()
}

fn record(history: &mut HistoryManager, epoch: u64) {
    history
        .record_epoch(EpochSeq(epoch), vec![packets(1, &[0, 20])], BTreeMap::new())
        .unwrap();
}

fn epochs(history: &HistoryManager) -> Vec<u64> {
    history.epochs().map(|e| e.0).collect()
}

#[test]
fn test_count_budget_evicts_oldest() {
    let mut history = HistoryManager::new(RetentionPolicy {
        max_epochs: 3,
        max_bytes: None,
    });
    for epoch in 1..=5 {
        record(&mut history, epoch);
    }
    assert_eq!(epochs(&history), vec![3, 4, 5]);
}

#[test]
fn test_byte_budget_keeps_newest() {
    let mut history = HistoryManager::new(RetentionPolicy {
        max_epochs: 100,
        max_bytes: Some(1),
    });
    for epoch in 1..=4 {
        record(&mut history, epoch);
    }
    // Every entry exceeds the budget on its own; only the newest survives
    assert_eq!(epochs(&history), vec![4]);
}

#[test]
fn test_referenced_entry_survives_eviction() {
    let mut history = HistoryManager::new(RetentionPolicy {
        max_epochs: 2,
        max_bytes: None,
    });
    record(&mut history, 1);
    let held = history.get(EpochSeq(1)).unwrap();
    assert_eq!(history.ref_count(EpochSeq(1)), Some(1));

    for epoch in 2..=4 {
        record(&mut history, epoch);
    }
    assert_eq!(epochs(&history), vec![1, 4]);
    assert_eq!(held.packets().len(), 2);

    drop(held);
    record(&mut history, 5);
    assert_eq!(epochs(&history), vec![4, 5]);
}

#[test]
fn test_pinned_and_marked_entries_are_kept() {
    let mut history = HistoryManager::new(RetentionPolicy {
        max_epochs: 2,
        max_bytes: None,
    });
    record(&mut history, 1);
    record(&mut history, 2);
    history.pin(EpochSeq(1), true).unwrap();
    history
        .add_marker(
            EpochSeq(2),
            Marker {
                offset_fs: 5,
                name: "glitch".to_string(),
            },
        )
        .unwrap();

    record(&mut history, 3);
    record(&mut history, 4);
    assert_eq!(epochs(&history), vec![1, 2, 4]);

    history.pin(EpochSeq(1), false).unwrap();
    assert_eq!(epochs(&history), vec![2, 4]);
    history.clear_markers(EpochSeq(2)).unwrap();
    record(&mut history, 5);
    assert_eq!(epochs(&history), vec![4, 5]);
}

#[test]
fn test_packets_are_merged_by_start_time() {
    let mut history = HistoryManager::default();
    let entry = history
        .record_epoch(
            EpochSeq(1),
            vec![packets(1, &[0, 40, 80]), packets(2, &[20, 40, 60])],
            BTreeMap::new(),
        )
        .unwrap();

    let order: Vec<(i64, u32)> = entry.packets().iter().map(|p| (p.start_fs, p.source.0)).collect();
    assert_eq!(order, vec![(0, 1), (20, 2), (40, 1), (40, 2), (60, 2), (80, 1)]);
    assert_eq!(entry.packets_in_range(35, 45).len(), 2);
}

#[test]
fn test_non_monotonic_epoch_is_rejected() {
    let mut history = HistoryManager::default();
    record(&mut history, 5);
    assert!(history
        .record_epoch(EpochSeq(5), Vec::new(), BTreeMap::new())
        .is_err());
    assert_eq!(epochs(&history), vec![5]);
}

#[test]
fn test_waveforms_are_shared_not_copied() {
    let mut history = HistoryManager::default();
    let buf = Arc::new(StreamData::analog(1_000, vec![1.0; 64]).into_buffer(EpochSeq(1)));
    let stream = StreamId::new(NodeId(3), 0);
    let entry = history
        .record_epoch(EpochSeq(1), Vec::new(), BTreeMap::from([(stream, buf.clone())]))
        .unwrap();
    assert!(Arc::ptr_eq(entry.waveform(stream).unwrap(), &buf));
    assert!(history.total_bytes() >= 64 * std::mem::size_of::<f64>());
}
