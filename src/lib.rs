//! # scopegraph: instrument control and live filter graphs
//!
//! Test-and-measurement instruments feed a directed acyclic graph of filters
//! and protocol decoders that is re-evaluated every time a new acquisition
//! lands. Decoded packets and waveform snapshots are retained in a bounded
//! history for scrollback and comparison.
//!
//! ## Architecture
//!
//! - **Transport**: byte channels to instruments (TCP, in-process simulator)
//! - **Instrument**: capability-tagged drivers created through an explicit [`DriverRegistry`]
//! - **Graph**: source, filter and decoder nodes with a cached topological plan
//!   and per-node failure isolation
//! - **History**: time-ordered packets and epoch snapshots with reference-counted retention
//! - **Session**: owns all of the above plus one acquisition worker per
//!   instrument and an evaluation engine fed by a trigger-group barrier
//!
//! ## Configuration
//!
//! Session configuration is TOML, stored in the platform data directory under
//! `dev.scopegraph`:
//!
//! - **Linux**: `~/.local/share/dev.scopegraph/`
//! - **macOS**: `~/Library/Application Support/dev.scopegraph/`
//! - **Windows**: `%APPDATA%\dev.scopegraph\`
//!
//! ## Example
//!
//! ```ignore
//! use scopegraph::graph::decoders::PulseDecoder;
//! use scopegraph::{Session, SessionConfig, StreamId};
//!
//! let mut session = Session::new(SessionConfig::default());
//! let scope = session.connect("scope:sim_scope:sim:SIMSCOPE-2")?;
//! let ch1 = session.source_node(scope, 0)?.unwrap();
//!
//! session.edit_graph(|g| -> scopegraph::Result<_> {
//!     let decoder = g.add_filter("pulses", PulseDecoder::new(0.5));
//!     g.bind(decoder, 0, StreamId::new(ch1, 0))?;
//!     Ok(decoder)
//! })??;
//!
//! let report = session.acquire_once()?;
//! let history = session.history()?;
//! println!("{} packets", history.latest().map_or(0, |e| e.packets().len()));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod history;
pub mod instrument;
pub mod scripting;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{Preferences, SessionConfig};
pub use error::{Result, ResultExt, ScopeError};
pub use graph::{
    ConfigValue, EpochReport, EpochSeq, FilterGraph, FilterType, GraphEditError, GraphSnapshot, InstrumentId,
    NodeEvaluationError, NodeId, NodeStatus, StreamId,
};
pub use history::{HistoryEntry, HistoryManager, Packet, RetentionPolicy};
pub use instrument::{Capability, CapabilitySet, DriverRegistry, InstrumentDriver};
pub use scripting::ScriptEngine;
pub use session::{InstrumentCapture, Session, SessionEvent};
pub use transport::{Transport, TransportTarget};
