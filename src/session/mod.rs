//! The session aggregate
//!
//! A [`Session`] owns everything for one working session: the connected
//! instruments, the filter graph, the history and the worker threads.
//!
//! # Threads
//!
//! While running, every acquiring instrument has an acquisition worker and a
//! single engine thread assembles epochs and evaluates them. Graph edits made
//! through [`Session::edit_graph`] take the same lock as evaluation, so an
//! edit waits for the in-flight epoch and is never seen half-applied.
//!
//! When stopped, epochs can be driven by hand with [`Session::acquire_once`]
//! or [`Session::ingest`].
//!
//! # Example
//!
//! ```ignore
//! use scopegraph::session::Session;
//! use scopegraph::config::SessionConfig;
//!
//! let mut session = Session::new(SessionConfig::default());
//! let scope = session.connect("scope:sim_scope:sim:SIMSCOPE-2")?;
//! session.start()?;
//! for event in session.events().iter().take(10) {
//!     println!("{:?}", event);
//! }
//! session.disconnect(scope)?;
//! ```

pub mod assembler;
pub mod evaluator;
pub mod types;
pub mod worker;

pub use assembler::EpochAssembler;
pub use types::{EpochSummary, InstrumentCapture, SessionEvent, SessionState};

use crate::config::{Preferences, SessionConfig};
use crate::error::{Result, ScopeError};
use crate::graph::{
    ConfigValue, EpochReport, EpochSeq, FilterGraph, GraphSnapshot, InstrumentId, NodeId, SharedBuffer, StreamId,
};
use crate::history::{HistoryError, HistoryManager, RetentionPolicy};
use crate::instrument::{AbortSignal, AcquireOptions, DriverRegistry, InstrumentDriver, InstrumentInfo};
use crate::transport::TransportTarget;
use crossbeam_channel::{Receiver, Sender};
use evaluator::{publish, spawn_engine, EngineMessage, EpochRunner};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use worker::{spawn_worker, SharedDriver, WorkerContext, WorkerHandle};

/// Capacity of the event queue; events beyond it are dropped.
const EVENT_QUEUE: usize = 1024;

struct InstrumentSlot {
    info: InstrumentInfo,
    driver: SharedDriver,
    acquires: bool,
    worker: Option<WorkerHandle>,
}

struct EngineHandle {
    tx: Sender<EngineMessage>,
    thread: JoinHandle<()>,
}

/// One working session.
pub struct Session {
    config: SessionConfig,
    registry: DriverRegistry,
    preferences: Preferences,
    instruments: BTreeMap<InstrumentId, InstrumentSlot>,
    next_instrument: u32,
    runner: EpochRunner,
    events: Receiver<SessionEvent>,
    engine: Option<EngineHandle>,
}

impl Session {
    /// A session with the built-in drivers and no preferences.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_registry(config, DriverRegistry::with_builtin_drivers(), Preferences::new())
    }

    /// Drivers must be registered on `registry` before it is handed over.
    pub fn with_registry(config: SessionConfig, registry: DriverRegistry, preferences: Preferences) -> Self {
        let graph = Arc::new(Mutex::new(FilterGraph::with_threads(config.evaluation_threads)));
        let history = Arc::new(Mutex::new(HistoryManager::new(config.history)));
        let (events_tx, events) = crossbeam_channel::bounded(EVENT_QUEUE);
        Self {
            config,
            registry,
            preferences,
            instruments: BTreeMap::new(),
            next_instrument: 1,
            runner: EpochRunner::new(graph, history, events_tx),
            events,
            engine: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Applies to instruments connected from now on.
    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
    }

    pub fn state(&self) -> SessionState {
        if self.engine.is_some() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Receiver for session events. Clones share one queue.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.clone()
    }

    /// Sequence number the next epoch will get.
    pub fn next_epoch(&self) -> EpochSeq {
        self.runner.peek_epoch()
    }

    // ==================== Instruments ====================

    /// Connect from a `nick:driver:transport:path` string.
    pub fn connect(&mut self, target: &str) -> Result<InstrumentId> {
        let target = TransportTarget::parse(target)?;
        self.connect_target(&target)
    }

    pub fn connect_target(&mut self, target: &TransportTarget) -> Result<InstrumentId> {
        let driver = self.registry.connect(target)?;
        self.add_instrument(&target.nickname, driver)
    }

    /// Take ownership of an already connected driver.
    ///
    /// Preference defaults are applied, then one source node is added for
    /// every channel that produces streams.
    pub fn add_instrument(&mut self, nickname: &str, mut driver: Box<dyn InstrumentDriver>) -> Result<InstrumentId> {
        let defaults = self
            .preferences
            .instrument_defaults(driver.driver_name(), driver.capabilities());
        for (key, value) in &defaults {
            if let Err(e) = driver.configure(key, value) {
                tracing::warn!("{}: preference {} not applied: {}", nickname, key, e);
            }
        }

        let id = InstrumentId(self.next_instrument);
        self.next_instrument += 1;
        let info = InstrumentInfo {
            id,
            nickname: nickname.to_string(),
            driver: driver.driver_name().to_string(),
            identity: driver.identity().clone(),
            capabilities: driver.capabilities(),
            channels: driver.channels().to_vec(),
        };

        {
            let mut graph = self.graph()?;
            for (index, channel) in info.channels.iter().enumerate() {
                if channel.streams.is_empty() {
                    continue;
                }
                graph.add_source(
                    id,
                    index,
                    format!("{}/{}", nickname, channel.name),
                    channel.streams.clone(),
                );
            }
        }

        tracing::info!(
            "Connected {} as {} ({}, {} preference(s) applied)",
            info.identity,
            nickname,
            id,
            defaults.len()
        );
        let acquires = driver.acquires();
        self.instruments.insert(
            id,
            InstrumentSlot {
                info,
                driver: Arc::new(Mutex::new(driver)),
                acquires,
                worker: None,
            },
        );
        if self.is_running() && acquires {
            self.start_worker(id)?;
        }
        publish(
            &self.runner.events,
            SessionEvent::InstrumentConnected {
                instrument: id,
                nickname: nickname.to_string(),
            },
        );
        Ok(id)
    }

    /// Disconnect an instrument.
    ///
    /// Its worker is aborted and joined first, then its source nodes are
    /// removed once the in-flight epoch has finished. Bindings to those nodes
    /// are left dangling, so only their dependents stop producing output.
    pub fn disconnect(&mut self, id: InstrumentId) -> Result<()> {
        let slot = self
            .instruments
            .remove(&id)
            .ok_or(ScopeError::UnknownInstrument(id.0))?;
        if let Some(worker) = slot.worker {
            worker.stop();
        }
        match slot.driver.lock() {
            Ok(mut driver) => driver.disconnect(),
            Err(_) => tracing::error!("Driver lock for {} poisoned; dropping it", id),
        }

        let removed = self.graph()?.remove_instrument(id);
        tracing::info!(
            "Disconnected {} ({} source node(s) removed)",
            slot.info.nickname,
            removed.len()
        );
        publish(
            &self.runner.events,
            SessionEvent::InstrumentDisconnected {
                instrument: id,
                nickname: slot.info.nickname,
            },
        );
        Ok(())
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&InstrumentInfo> {
        self.instruments.get(&id).map(|s| &s.info)
    }

    /// Connected instruments in id order.
    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentInfo> {
        self.instruments.values().map(|s| &s.info)
    }

    pub fn find_instrument(&self, nickname: &str) -> Option<InstrumentId> {
        self.instruments()
            .find(|i| i.nickname == nickname)
            .map(|i| i.id)
    }

    fn driver(&self, id: InstrumentId) -> Result<&SharedDriver> {
        self.instruments
            .get(&id)
            .map(|s| &s.driver)
            .ok_or(ScopeError::UnknownInstrument(id.0))
    }

    /// Change a setting. Waits for an in-flight acquisition on that instrument.
    pub fn configure_instrument(&self, id: InstrumentId, key: &str, value: ConfigValue) -> Result<()> {
        let driver = self.driver(id)?;
        let mut driver = driver.lock().map_err(|_| ScopeError::poisoned("instrument driver"))?;
        driver.configure(key, &value)?;
        Ok(())
    }

    pub fn instrument_settings(&self, id: InstrumentId) -> Result<BTreeMap<String, ConfigValue>> {
        let driver = self.driver(id)?;
        let driver = driver.lock().map_err(|_| ScopeError::poisoned("instrument driver"))?;
        Ok(driver.settings())
    }

    /// Source node of one instrument channel.
    pub fn source_node(&self, id: InstrumentId, channel: usize) -> Result<Option<NodeId>> {
        Ok(self.graph()?.source_node(id, channel))
    }

    // ==================== Graph & history ====================

    /// Lock the filter graph. Holding the guard pauses evaluation.
    pub fn graph(&self) -> Result<MutexGuard<'_, FilterGraph>> {
        self.runner
            .graph
            .lock()
            .map_err(|_| ScopeError::poisoned("filter graph"))
    }

    /// Apply an edit between epochs.
    pub fn edit_graph<R>(&self, edit: impl FnOnce(&mut FilterGraph) -> R) -> Result<R> {
        let mut graph = self.graph()?;
        Ok(edit(&mut graph))
    }

    pub fn snapshot(&self) -> Result<GraphSnapshot> {
        Ok(self.graph()?.snapshot())
    }

    /// Latest buffer on a stream with the epoch it belongs to.
    pub fn output(&self, stream: StreamId) -> Result<Option<(SharedBuffer, EpochSeq)>> {
        Ok(self.graph()?.output(stream).map(|b| {
            let epoch = b.epoch;
            (b, epoch)
        }))
    }

    pub fn history(&self) -> Result<MutexGuard<'_, HistoryManager>> {
        self.runner
            .history
            .lock()
            .map_err(|_| ScopeError::poisoned("history"))
    }

    /// Change retention. Returns the number of entries evicted.
    pub fn set_retention(&self, policy: RetentionPolicy) -> Result<usize> {
        Ok(self.history()?.set_policy(policy))
    }

    // ==================== Manual epochs ====================

    fn ensure_stopped(&self, what: &str) -> Result<()> {
        if self.is_running() {
            return Err(ScopeError::InvalidState(format!("{} requires a stopped session", what)));
        }
        Ok(())
    }

    /// Evaluate one epoch from captures supplied by the caller.
    pub fn ingest(&self, captures: Vec<InstrumentCapture>) -> Result<EpochReport> {
        self.ensure_stopped("ingest")?;
        self.runner.run(captures)
    }

    /// Re-evaluate the filters of the latest epoch against the buffers its
    /// sources already hold, e.g. after a parameter change. Not recorded in
    /// history. `None` before the first epoch.
    pub fn refresh_filters(&self) -> Result<Option<EpochReport>> {
        Ok(self.graph()?.refresh())
    }

    /// Stop acquisition and put a recorded epoch back through the graph.
    /// Sources missing from the entry are cleared.
    pub fn load_history(&mut self, epoch: EpochSeq) -> Result<EpochReport> {
        self.stop();
        let entry = self.history()?.get(epoch).ok_or(HistoryError::UnknownEpoch(epoch))?;
        let buffers: BTreeMap<StreamId, SharedBuffer> = entry
            .waveforms()
            .map(|(id, buf)| (id, buf.clone()))
            .collect();
        let report = self.graph()?.restore(epoch, &buffers);
        tracing::info!(
            "Loaded epoch {} from history: {} evaluated, {} failed",
            epoch,
            report.evaluated.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Acquire once from every acquiring instrument and evaluate the result
    /// as one epoch. Failing instruments are reported and left out; the call
    /// fails only when every instrument failed.
    pub fn acquire_once(&self) -> Result<EpochReport> {
        self.ensure_stopped("acquire_once")?;
        let options = self.acquire_options();
        let mut captures = Vec::new();
        let mut first_error = None;

        for (id, slot) in self.instruments.iter().filter(|(_, s)| s.acquires) {
            let result = slot
                .driver
                .lock()
                .map_err(|_| ScopeError::poisoned("instrument driver"))?
                .acquire_waveforms(&options, &AbortSignal::never());
            match result {
                Ok(acquisition) => captures.push(InstrumentCapture::from_acquisition(*id, acquisition)),
                Err(error) => {
                    tracing::warn!("{} acquisition failed: {}", slot.info.nickname, error);
                    publish(
                        &self.runner.events,
                        SessionEvent::AcquisitionFailed {
                            instrument: *id,
                            error: error.clone(),
                        },
                    );
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) if captures.is_empty() => Err(error.into()),
            _ => self.runner.run(captures),
        }
    }

    fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            timeout: self.config.acquisition_timeout(),
            poll_interval: self.config.abort_poll_interval(),
        }
    }

    // ==================== Continuous acquisition ====================

    /// Start the engine thread and one worker per acquiring instrument.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ScopeError::InvalidState("session already running".to_string()));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = spawn_engine(self.runner.clone(), rx)?;
        self.engine = Some(EngineHandle { tx, thread });

        let ids: Vec<InstrumentId> = self
            .instruments
            .iter()
            .filter(|(_, s)| s.acquires)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Err(e) = self.start_worker(id) {
                self.stop();
                return Err(e);
            }
        }
        tracing::info!("Session started with {} acquiring instrument(s)", self.worker_count());
        Ok(())
    }

    fn start_worker(&mut self, id: InstrumentId) -> Result<()> {
        let engine = self
            .engine
            .as_ref()
            .map(|e| e.tx.clone())
            .ok_or_else(|| ScopeError::InvalidState("session not running".to_string()))?;
        let options = self.acquire_options();
        let retry_backoff = self.config.retry_backoff();
        let events = self.runner.events.clone();
        let config = &self.config;
        let slot = self
            .instruments
            .get_mut(&id)
            .ok_or(ScopeError::UnknownInstrument(id.0))?;

        let grouped = slot.info.capabilities.iter().any(|c| config.in_trigger_group(c));
        let (arm_tx, arm_rx) = crossbeam_channel::bounded(1);
        let _ = arm_tx.try_send(());
        engine
            .send(EngineMessage::Attach {
                instrument: id,
                grouped,
                arm: arm_tx,
            })
            .map_err(|_| ScopeError::Channel("evaluation engine stopped".to_string()))?;

        let worker = spawn_worker(WorkerContext {
            instrument: id,
            driver: slot.driver.clone(),
            options,
            retry_backoff,
            arm: arm_rx,
            engine: engine.clone(),
            events,
        });
        match worker {
            Ok(worker) => {
                slot.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                let _ = engine.send(EngineMessage::Detach(id));
                Err(e.into())
            }
        }
    }

    fn worker_count(&self) -> usize {
        self.instruments.values().filter(|s| s.worker.is_some()).count()
    }

    /// Stop all workers, then the engine. Captures already delivered are
    /// still evaluated.
    pub fn stop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        for slot in self.instruments.values_mut() {
            if let Some(worker) = slot.worker.take() {
                tracing::trace!("Stopping worker for {}", worker.instrument());
                worker.stop();
            }
        }
        let _ = engine.tx.send(EngineMessage::Shutdown);
        if engine.thread.join().is_err() {
            tracing::error!("Evaluation engine panicked");
        }
        tracing::info!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        for slot in self.instruments.values() {
            if let Ok(mut driver) = slot.driver.lock() {
                driver.disconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::filters::GainFilter;
    use crate::graph::{FilterType, NodeEvaluationError, NodeStatus};
    use crate::instrument::Capability;
    use std::time::Duration;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            acquisition_timeout_ms: 2000,
            abort_poll_ms: 2,
            retry_backoff_ms: 5,
            evaluation_threads: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_adds_source_nodes() {
        let mut session = Session::new(fast_config());
        let scope = session.connect("scope:sim_scope:sim:SIMSCOPE-2:trigger_ms=1").unwrap();
        let awg = session.connect("awg:sim_awg:sim:SIMAWG").unwrap();

        // CH1, CH2 and DMM; the generator has no streams
        assert_eq!(session.graph().unwrap().len(), 3);
        assert!(session.source_node(scope, 2).unwrap().is_some());
        assert!(session.source_node(awg, 0).unwrap().is_none());
        assert_eq!(session.find_instrument("awg"), Some(awg));
        assert!(session.instrument(scope).unwrap().capabilities.contains(Capability::Multimeter));
    }

    #[test]
    fn test_connect_errors_surface() {
        let mut session = Session::new(fast_config());
        assert!(matches!(session.connect("bad"), Err(ScopeError::Transport(_))));
        assert!(matches!(
            session.connect("x:nodriver:sim:SIMDMM"),
            Err(ScopeError::Driver(_))
        ));
        assert_eq!(session.instruments().count(), 0);
    }

    #[test]
    fn test_preferences_applied_to_every_family() {
        let prefs = Preferences::from_toml(
            r#"
            [instrument.defaults]
            label = "bench"
            [instrument.power_supply]
            "ch1:volt" = 5.0
            "#,
        )
        .unwrap();
        let mut session = Session::with_registry(fast_config(), DriverRegistry::with_builtin_drivers(), prefs);
        let psu = session.connect("psu:sim_psu:sim:SIMPSU").unwrap();
        let rf = session.connect("rf:sim_rfgen:sim:SIMRF").unwrap();

        let psu_settings = session.instrument_settings(psu).unwrap();
        assert_eq!(psu_settings.get("CH1:VOLT"), Some(&ConfigValue::Float(5.0)));
        assert_eq!(psu_settings.get("LABEL"), Some(&ConfigValue::from("bench")));
        assert_eq!(
            session.instrument_settings(rf).unwrap().get("LABEL"),
            Some(&ConfigValue::from("bench"))
        );
    }

    #[test]
    fn test_acquire_once_evaluates_graph() {
        let mut session = Session::new(fast_config());
        let scope = session.connect("scope:sim_scope:sim:SIMSCOPE-1:pattern=dc:points=16:trigger_ms=1").unwrap();
        let source = session.source_node(scope, 0).unwrap().unwrap();
        let gain = session
            .edit_graph(|g| {
                let gain = g.add_filter("x2", GainFilter::new(2.0));
                g.bind(gain, 0, StreamId::new(source, 0)).map(|_| gain)
            })
            .unwrap()
            .unwrap();

        let report = session.acquire_once().unwrap();
        assert_eq!(report.epoch, EpochSeq(1));
        assert!(report.evaluated.contains(&gain));
        let (buf, epoch) = session.output(StreamId::new(gain, 0)).unwrap().unwrap();
        assert_eq!(epoch, EpochSeq(1));
        assert_eq!(buf.as_analog().unwrap().len(), 16);
        assert_eq!(session.history().unwrap().len(), 1);
        assert_eq!(FilterType::Gain.type_name(), session.graph().unwrap().node(gain).unwrap().type_name());
    }

    #[test]
    fn test_manual_epochs_rejected_while_running() {
        let mut session = Session::new(fast_config());
        session.start().unwrap();
        assert!(matches!(session.acquire_once(), Err(ScopeError::InvalidState(_))));
        assert!(matches!(session.start(), Err(ScopeError::InvalidState(_))));
        session.stop();
        assert!(session.ingest(Vec::new()).is_ok());
    }

    #[test]
    fn test_running_session_produces_epochs() {
        let mut session = Session::new(fast_config());
        session.connect("scope:sim_scope:sim:SIMSCOPE-1:trigger_ms=2:points=8").unwrap();
        let events = session.events();
        session.start().unwrap();

        let mut epochs = Vec::new();
        while epochs.len() < 3 {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                SessionEvent::EpochEvaluated(summary) => epochs.push(summary.epoch),
                _ => {}
            }
        }
        session.stop();
        assert!(epochs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disconnect_leaves_dependents_dangling() {
        let mut session = Session::new(fast_config());
        let a = session.connect("a:sim_dmm:sim:SIMDMM:trigger_ms=1").unwrap();
        let b = session.connect("b:sim_dmm:sim:SIMDMM:trigger_ms=1").unwrap();
        let src_a = session.source_node(a, 0).unwrap().unwrap();
        let src_b = session.source_node(b, 0).unwrap().unwrap();
        let (ga, gb) = session
            .edit_graph(|g| {
                let ga = g.add_filter("ga", FilterType::Gain.create(&[]).unwrap());
                let gb = g.add_filter("gb", FilterType::Gain.create(&[]).unwrap());
                g.bind(ga, 0, StreamId::new(src_a, 0)).unwrap();
                g.bind(gb, 0, StreamId::new(src_b, 0)).unwrap();
                (ga, gb)
            })
            .unwrap();

        session.disconnect(a).unwrap();
        assert!(matches!(session.disconnect(a), Err(ScopeError::UnknownInstrument(_))));

        let report = session.acquire_once().unwrap();
        assert!(report.evaluated.contains(&gb));
        assert!(!report.evaluated.contains(&ga));
        assert!(report
            .failed
            .iter()
            .any(|(id, e)| *id == ga && matches!(e, NodeEvaluationError::MissingInput { input: 0, .. })));
        assert!(matches!(
            session.graph().unwrap().status(gb),
            Some(NodeStatus::Evaluated(_))
        ));
    }
}
