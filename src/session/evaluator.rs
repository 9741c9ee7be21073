//! Epoch evaluation: the fan-in engine thread and the runner it drives.
//!
//! Acquisition workers send captures to one engine thread. The engine feeds
//! them through an [`EpochAssembler`], and every completed epoch is evaluated
//! on the filter graph and recorded in history by an [`EpochRunner`]. The
//! engine then re-arms the instruments that took part, so an instrument
//! never starts a new acquisition before its last one was evaluated.

use super::assembler::EpochAssembler;
use super::types::{EpochSummary, InstrumentCapture, SessionEvent};
use crate::error::{Result, ScopeError};
use crate::graph::{EpochReport, EpochSeq, FilterGraph, InstrumentId, NodeId, StreamData};
use crate::history::HistoryManager;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Messages to the engine thread.
pub(crate) enum EngineMessage {
    /// Start assembling epochs for an instrument. `arm` re-arms its worker.
    Attach {
        instrument: InstrumentId,
        grouped: bool,
        arm: Sender<()>,
    },
    Detach(InstrumentId),
    Captured(InstrumentCapture),
    Shutdown,
}

/// Publish without blocking. A full event queue drops the event.
pub(crate) fn publish(events: &Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(event)) => {
            tracing::trace!("Event queue full, dropping {:?}", event);
        }
    }
}

/// Evaluates epochs against the shared graph and records them.
#[derive(Clone)]
pub(crate) struct EpochRunner {
    pub graph: Arc<Mutex<FilterGraph>>,
    pub history: Arc<Mutex<HistoryManager>>,
    pub events: Sender<SessionEvent>,
    next_epoch: Arc<AtomicU64>,
}

impl EpochRunner {
    pub fn new(
        graph: Arc<Mutex<FilterGraph>>,
        history: Arc<Mutex<HistoryManager>>,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            graph,
            history,
            events,
            next_epoch: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The sequence number the next epoch will get.
    pub fn peek_epoch(&self) -> EpochSeq {
        EpochSeq(self.next_epoch.load(Ordering::SeqCst))
    }

    /// Assign the next epoch number to `captures`, evaluate, record.
    pub fn run(&self, captures: Vec<InstrumentCapture>) -> Result<EpochReport> {
        let epoch = EpochSeq(self.next_epoch.fetch_add(1, Ordering::SeqCst));
        let instruments: Vec<InstrumentId> = captures.iter().map(|c| c.instrument).collect();

        let report = {
            let mut graph = self
                .graph
                .lock()
                .map_err(|_| ScopeError::poisoned("filter graph"))?;
            let sources = route_captures(&graph, captures);
            graph.evaluate(epoch, sources)
        };

        for (node, error) in &report.failed {
            tracing::warn!(node = %node, epoch = epoch.0, "Node failed: {}", error);
        }

        let recorded = {
            let mut history = self
                .history
                .lock()
                .map_err(|_| ScopeError::poisoned("history"))?;
            match history.record_report(&report) {
                Ok(handle) => handle.is_some(),
                Err(e) => {
                    tracing::warn!(epoch = epoch.0, "History rejected epoch: {}", e);
                    publish(
                        &self.events,
                        SessionEvent::HistoryRejected {
                            epoch,
                            reason: e.to_string(),
                        },
                    );
                    false
                }
            }
        };

        tracing::debug!(
            epoch = epoch.0,
            evaluated = report.evaluated.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            packets = report.packet_count(),
            "Epoch complete in {:?}",
            report.elapsed
        );
        publish(
            &self.events,
            SessionEvent::EpochEvaluated(EpochSummary::from_report(&report, instruments, recorded)),
        );
        Ok(report)
    }
}

/// Map each captured channel onto its source node.
fn route_captures(graph: &FilterGraph, captures: Vec<InstrumentCapture>) -> Vec<(NodeId, Vec<StreamData>)> {
    let mut sources = Vec::new();
    for capture in captures {
        for (channel, streams) in capture.channels.into_iter().enumerate() {
            if streams.is_empty() {
                continue;
            }
            match graph.source_node(capture.instrument, channel) {
                Some(node) => sources.push((node, streams)),
                None => tracing::trace!(
                    "{} channel {} has no source node",
                    capture.instrument,
                    channel
                ),
            }
        }
    }
    sources
}

pub(crate) fn spawn_engine(runner: EpochRunner, rx: Receiver<EngineMessage>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("scopegraph-eval".to_string())
        .spawn(move || engine_loop(runner, rx))
}

fn engine_loop(runner: EpochRunner, rx: Receiver<EngineMessage>) {
    tracing::debug!("Evaluation engine started");
    let mut assembler = EpochAssembler::new();
    let mut arms: BTreeMap<InstrumentId, Sender<()>> = BTreeMap::new();

    while let Ok(message) = rx.recv() {
        let batch = match message {
            EngineMessage::Attach {
                instrument,
                grouped,
                arm,
            } => {
                assembler.add_participant(instrument, grouped);
                arms.insert(instrument, arm);
                None
            }
            EngineMessage::Detach(instrument) => {
                arms.remove(&instrument);
                assembler.remove_participant(instrument)
            }
            EngineMessage::Captured(capture) => assembler.offer(capture),
            EngineMessage::Shutdown => break,
        };

        let Some(batch) = batch else { continue };
        let participants: Vec<InstrumentId> = batch.iter().map(|c| c.instrument).collect();
        if let Err(e) = runner.run(batch) {
            tracing::error!("Epoch evaluation failed: {}", e);
        }
        for id in participants {
            if let Some(arm) = arms.get(&id) {
                let _ = arm.try_send(());
            }
        }
    }
    tracing::debug!("Evaluation engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{OutputDescriptor, StreamId, Unit};
    use crate::history::RetentionPolicy;

    fn runner() -> (EpochRunner, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(16);
        let graph = Arc::new(Mutex::new(FilterGraph::new()));
        let history = Arc::new(Mutex::new(HistoryManager::new(RetentionPolicy::default())));
        (EpochRunner::new(graph, history, tx), rx)
    }

    #[test]
    fn test_run_routes_channels_and_numbers_epochs() {
        let (runner, events) = runner();
        let source = runner.graph.lock().unwrap().add_source(
            InstrumentId(1),
            1,
            "scope/CH2",
            vec![OutputDescriptor::analog("CH2", Unit::Volts)],
        );

        let capture = InstrumentCapture::new(
            InstrumentId(1),
            vec![vec![], vec![StreamData::analog(1000, vec![1.0, 2.0])]],
        );
        let report = runner.run(vec![capture]).unwrap();
        assert_eq!(report.epoch, EpochSeq(1));
        assert_eq!(report.evaluated, vec![source]);
        assert_eq!(runner.peek_epoch(), EpochSeq(2));

        let buf = runner
            .graph
            .lock()
            .unwrap()
            .output(StreamId::new(source, 0))
            .unwrap();
        assert_eq!(buf.epoch, EpochSeq(1));
        assert_eq!(runner.history.lock().unwrap().len(), 1);

        match events.try_recv().unwrap() {
            SessionEvent::EpochEvaluated(summary) => {
                assert_eq!(summary.instruments, vec![InstrumentId(1)]);
                assert!(summary.recorded);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let event = || SessionEvent::HistoryRejected {
            epoch: EpochSeq(1),
            reason: String::new(),
        };
        publish(&tx, event());
        publish(&tx, event());
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_engine_rearms_after_evaluation() {
        let (runner, _events) = runner();
        let (tx, rx) = crossbeam_channel::unbounded();
        let engine = spawn_engine(runner.clone(), rx).unwrap();
        let (arm_tx, arm_rx) = crossbeam_channel::bounded(1);

        tx.send(EngineMessage::Attach {
            instrument: InstrumentId(1),
            grouped: false,
            arm: arm_tx,
        })
        .unwrap();
        tx.send(EngineMessage::Captured(InstrumentCapture::new(InstrumentId(1), Vec::new())))
            .unwrap();
        assert!(arm_rx.recv_timeout(std::time::Duration::from_secs(5)).is_ok());

        tx.send(EngineMessage::Shutdown).unwrap();
        engine.join().unwrap();
        assert_eq!(runner.peek_epoch(), EpochSeq(2));
    }
}
