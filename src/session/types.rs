//! Session data types

use crate::graph::{EpochReport, EpochSeq, InstrumentId, NodeEvaluationError, NodeId, StreamData};
use crate::instrument::{Acquisition, AcquisitionError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One instrument's data for an epoch, as handed from a driver to the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentCapture {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    /// Indexed like the instrument's channels; one entry per stream
    pub channels: Vec<Vec<StreamData>>,
}

impl InstrumentCapture {
    pub fn new(instrument: InstrumentId, channels: Vec<Vec<StreamData>>) -> Self {
        Self {
            instrument,
            timestamp: Utc::now(),
            channels,
        }
    }

    pub fn from_acquisition(instrument: InstrumentId, acquisition: Acquisition) -> Self {
        Self {
            instrument,
            timestamp: acquisition.timestamp,
            channels: acquisition.channels,
        }
    }
}

/// Counts from one evaluated epoch. Holds no buffers, so unread events never
/// keep waveforms or history entries alive.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: EpochSeq,
    pub instruments: Vec<InstrumentId>,
    pub evaluated: usize,
    pub failed: Vec<(NodeId, NodeEvaluationError)>,
    pub blocked: usize,
    pub skipped: usize,
    pub packets: usize,
    pub elapsed: Duration,
    /// Whether a history entry was recorded
    pub recorded: bool,
}

impl EpochSummary {
    pub fn from_report(report: &EpochReport, instruments: Vec<InstrumentId>, recorded: bool) -> Self {
        Self {
            epoch: report.epoch,
            instruments,
            evaluated: report.evaluated.len(),
            failed: report.failed.clone(),
            blocked: report.blocked.len(),
            skipped: report.skipped,
            packets: report.packet_count(),
            elapsed: report.elapsed,
            recorded,
        }
    }
}

/// Notifications published by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    InstrumentConnected {
        instrument: InstrumentId,
        nickname: String,
    },
    InstrumentDisconnected {
        instrument: InstrumentId,
        nickname: String,
    },
    /// The instrument stays connected unless the error is `Disconnected`
    AcquisitionFailed {
        instrument: InstrumentId,
        error: AcquisitionError,
    },
    EpochEvaluated(EpochSummary),
    /// Evaluation ran but the epoch could not be recorded
    HistoryRejected { epoch: EpochSeq, reason: String },
}

/// Whether the session's acquisition workers are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Running,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Stopped => "Stopped",
            SessionState::Running => "Running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EpochReport;

    #[test]
    fn test_summary_counts() {
        let report = EpochReport {
            epoch: EpochSeq(4),
            evaluated: vec![NodeId(1), NodeId(2)],
            blocked: vec![(NodeId(3), NodeId(2))],
            skipped: 5,
            ..Default::default()
        };
        let summary = EpochSummary::from_report(&report, vec![InstrumentId(1)], true);
        assert_eq!(summary.epoch, EpochSeq(4));
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.skipped, 5);
        assert_eq!(summary.packets, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::default().display_name(), "Stopped");
        assert!(SessionState::Running.is_running());
    }
}
