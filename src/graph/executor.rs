//! Filter graph storage, edits and per-epoch evaluation.
//!
//! Each epoch:
//! 1. Publish the captured source buffers, tagged with the epoch.
//! 2. Mark everything downstream of a published source dirty.
//! 3. Evaluate dirty nodes in topological order, sequentially or across a
//!    scoped worker pool when independent branches exist.
//! 4. Collect the outcome into an [`EpochReport`].
//!
//! Nodes that are not downstream of a published source keep their previous
//! outputs and status. A failing node only takes down its own dependents.

use crate::graph::compiler::GraphCompiler;
use crate::graph::error::{GraphEditError, NodeEvaluationError};
use crate::graph::id::{EpochSeq, InstrumentId, NodeId, StreamId};
use crate::graph::node::{
    AnyFilter, EpochTolerance, EvalContext, FilterPlugin, InputBinding, Node, NodeBody, NodeKind,
    SourceChannel,
};
use crate::graph::param::ConfigValue;
use crate::graph::plan::EvaluationPlan;
use crate::graph::stream::{OutputDescriptor, SharedBuffer, StreamData, StreamDescriptor, WaveformData};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Outcome of a node's most recent evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    /// Never evaluated
    Idle,
    Evaluated(EpochSeq),
    Failed {
        epoch: EpochSeq,
        error: NodeEvaluationError,
    },
    /// Errored by propagation: `upstream` is the node that actually failed.
    Blocked { epoch: EpochSeq, upstream: NodeId },
    Disabled { epoch: EpochSeq },
}

impl NodeStatus {
    pub fn epoch(&self) -> Option<EpochSeq> {
        match self {
            NodeStatus::Idle => None,
            NodeStatus::Evaluated(e)
            | NodeStatus::Failed { epoch: e, .. }
            | NodeStatus::Blocked { epoch: e, .. }
            | NodeStatus::Disabled { epoch: e } => Some(*e),
        }
    }

    pub fn error(&self) -> Option<&NodeEvaluationError> {
        match self {
            NodeStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, NodeStatus::Evaluated(_))
    }
}

/// A slot holding a node, its latest outputs and status.
pub struct NodeSlot {
    pub node: Node,
    /// One entry per declared output; `None` until produced
    pub outputs: Vec<Option<SharedBuffer>>,
    pub status: NodeStatus,
}

impl NodeSlot {
    fn new(node: Node) -> Self {
        let outputs = vec![None; node.outputs().len()];
        Self {
            node,
            outputs,
            status: NodeStatus::Idle,
        }
    }
}

/// What happened during one call to [`FilterGraph::evaluate`].
#[derive(Debug, Clone, Default)]
pub struct EpochReport {
    pub epoch: EpochSeq,
    /// Nodes that produced outputs this epoch, in evaluation order
    pub evaluated: Vec<NodeId>,
    pub failed: Vec<(NodeId, NodeEvaluationError)>,
    /// (node, failed upstream node)
    pub blocked: Vec<(NodeId, NodeId)>,
    pub disabled: Vec<NodeId>,
    /// Live nodes not downstream of any published source
    pub skipped: usize,
    /// Packet buffers, in evaluation order
    pub packets: Vec<(NodeId, SharedBuffer)>,
    /// Every buffer published this epoch
    pub outputs: Vec<(StreamId, SharedBuffer)>,
    pub elapsed: Duration,
}

impl EpochReport {
    /// No node failed or was blocked.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.packets
            .iter()
            .map(|(_, b)| b.as_packets().map_or(0, <[_]>::len))
            .sum()
    }
}

/// What an input binding resolves to at evaluation time.
enum Upstream {
    Ready(SharedBuffer),
    Empty,
    /// The producer (or something above it) failed; carries the root node
    Failed(NodeId),
}

/// Result of resolving all inputs of a node.
enum Gathered {
    Ready(Vec<Option<SharedBuffer>>),
    Disabled,
    Blocked(NodeId),
    Failed(NodeEvaluationError),
}

/// Directed acyclic graph of instrument sources, filters and decoders.
pub struct FilterGraph {
    nodes: BTreeMap<NodeId, NodeSlot>,
    next_id: u32,
    plan: EvaluationPlan,
    /// Bumped by every topology change; the plan is rebuilt when it lags
    generation: u64,
    evaluation_threads: usize,
    last_epoch: Option<EpochSeq>,
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterGraph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_id: 1,
            plan: EvaluationPlan::default(),
            generation: 1,
            evaluation_threads: 1,
            last_epoch: None,
        }
    }

    /// Evaluate independent branches on up to `threads` workers.
    pub fn with_threads(threads: usize) -> Self {
        let mut graph = Self::new();
        graph.set_evaluation_threads(threads);
        graph
    }

    pub fn set_evaluation_threads(&mut self, threads: usize) {
        self.evaluation_threads = threads.max(1);
    }

    pub fn evaluation_threads(&self) -> usize {
        self.evaluation_threads
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn invalidate_plan(&mut self) {
        self.generation += 1;
    }

    fn ensure_plan(&mut self) {
        if self.plan.generation != self.generation {
            self.plan = GraphCompiler::compile(self.nodes.values().map(|s| &s.node), self.generation);
        }
    }

    // --- edits -----------------------------------------------------------

    /// Add a node for one instrument channel.
    pub fn add_source(
        &mut self,
        instrument: InstrumentId,
        channel: usize,
        name: impl Into<String>,
        streams: Vec<OutputDescriptor>,
    ) -> NodeId {
        let id = self.allocate_id();
        let body = NodeBody::Source(SourceChannel {
            instrument,
            channel,
            streams,
        });
        self.nodes
            .insert(id, NodeSlot::new(Node::new(id, name.into(), body)));
        self.invalidate_plan();
        tracing::debug!("Added source {} for {} channel {}", id, instrument, channel);
        id
    }

    /// Add a filter or decoder node with all inputs unbound.
    pub fn add_filter(&mut self, name: impl Into<String>, filter: impl Into<AnyFilter>) -> NodeId {
        let id = self.allocate_id();
        let node = Node::new(id, name.into(), NodeBody::Filter(filter.into()));
        tracing::debug!("Added {} node {} '{}'", node.type_name(), id, node.name);
        self.nodes.insert(id, NodeSlot::new(node));
        self.invalidate_plan();
        id
    }

    /// Remove a node. Consumers keep their binding marked `Dangling`.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphEditError> {
        let slot = self
            .nodes
            .remove(&id)
            .ok_or(GraphEditError::UnknownNode(id))?;

        let mut dangling = 0;
        for other in self.nodes.values_mut() {
            for binding in other.node.inputs.iter_mut() {
                if let InputBinding::Bound(s) = *binding {
                    if s.node == id {
                        *binding = InputBinding::Dangling(s);
                        dangling += 1;
                    }
                }
            }
        }

        self.invalidate_plan();
        tracing::debug!("Removed node {} ({} binding(s) left dangling)", id, dangling);
        Ok(slot.node)
    }

    /// Remove every source node belonging to `instrument`.
    pub fn remove_instrument(&mut self, instrument: InstrumentId) -> Vec<NodeId> {
        let ids = self.source_nodes(instrument);
        for id in &ids {
            let _ = self.remove_node(*id);
        }
        ids
    }

    /// Bind input `input` of `consumer` to `producer`, replacing any previous
    /// binding. Rejected edits leave the graph untouched.
    pub fn bind(&mut self, consumer: NodeId, input: usize, producer: StreamId) -> Result<(), GraphEditError> {
        let consumer_node = &self
            .nodes
            .get(&consumer)
            .ok_or(GraphEditError::UnknownNode(consumer))?
            .node;
        let producer_node = &self
            .nodes
            .get(&producer.node)
            .ok_or(GraphEditError::UnknownNode(producer.node))?
            .node;

        let descriptor = consumer_node
            .input_descriptors()
            .get(input)
            .copied()
            .ok_or_else(|| {
                GraphEditError::InvalidBinding(format!("{} has no input {}", consumer, input))
            })?;
        let outputs = producer_node.outputs();
        let output = outputs.get(producer.index).ok_or_else(|| {
            GraphEditError::InvalidBinding(format!(
                "{} has no output {}",
                producer.node, producer.index
            ))
        })?;
        if !descriptor.accepts(output.stream_type) {
            return Err(GraphEditError::InvalidBinding(format!(
                "input '{}' of {} does not accept {} streams",
                descriptor.name, consumer, output.stream_type
            )));
        }

        let consumers = GraphCompiler::consumer_map(self.nodes.values().map(|s| &s.node));
        if GraphCompiler::reaches(&consumers, consumer, producer.node) {
            return Err(GraphEditError::CycleDetected {
                consumer,
                input,
                producer,
            });
        }

        if let Some(slot) = self.nodes.get_mut(&consumer) {
            slot.node.inputs[input] = InputBinding::Bound(producer);
        }
        self.invalidate_plan();
        tracing::debug!("Bound {} input {} <- {}", consumer, input, producer);
        Ok(())
    }

    /// Clear input `input` of `consumer`. Returns the previous binding.
    pub fn unbind(&mut self, consumer: NodeId, input: usize) -> Result<InputBinding, GraphEditError> {
        let slot = self
            .nodes
            .get_mut(&consumer)
            .ok_or(GraphEditError::UnknownNode(consumer))?;
        let binding = slot.node.inputs.get_mut(input).ok_or_else(|| {
            GraphEditError::InvalidBinding(format!("{} has no input {}", consumer, input))
        })?;
        let previous = std::mem::replace(binding, InputBinding::Unbound);
        self.invalidate_plan();
        Ok(previous)
    }

    /// Enable or disable a node. Dependents of a disabled node are blocked.
    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<(), GraphEditError> {
        let slot = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphEditError::UnknownNode(id))?;
        if slot.node.enabled != enabled {
            slot.node.enabled = enabled;
            if !enabled {
                slot.outputs.iter_mut().for_each(|o| *o = None);
            }
            tracing::debug!("{} {}", if enabled { "Enabled" } else { "Disabled" }, id);
        }
        Ok(())
    }

    /// Change a filter parameter.
    pub fn set_param(&mut self, id: NodeId, key: &str, value: ConfigValue) -> Result<(), GraphEditError> {
        let slot = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphEditError::UnknownNode(id))?;
        let filter = slot
            .node
            .filter_mut()
            .ok_or_else(|| GraphEditError::InvalidParameter {
                node: id,
                key: key.to_string(),
                reason: "source nodes have no parameters".to_string(),
            })?;
        filter
            .set_param(key, &value)
            .map_err(|e| GraphEditError::InvalidParameter {
                node: id,
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        // Parameters may change the declared outputs
        let output_count = filter.outputs().len();
        if output_count != slot.outputs.len() {
            slot.outputs = vec![None; output_count];
            for other in self.nodes.values_mut() {
                for binding in other.node.inputs.iter_mut() {
                    if let InputBinding::Bound(s) = *binding {
                        if s.node == id && s.index >= output_count {
                            *binding = InputBinding::Dangling(s);
                        }
                    }
                }
            }
            self.invalidate_plan();
        }
        tracing::debug!("Set {}.{} = {}", id, key, value);
        Ok(())
    }

    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), GraphEditError> {
        let slot = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphEditError::UnknownNode(id))?;
        slot.node.name = name.into();
        Ok(())
    }

    /// Drop state a filter carries across epochs.
    pub fn reset_node(&mut self, id: NodeId) -> Result<(), GraphEditError> {
        let slot = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphEditError::UnknownNode(id))?;
        if let Some(filter) = slot.node.filter_mut() {
            filter.reset();
        }
        Ok(())
    }

    // --- queries ---------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id).map(|s| &s.node)
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().map(|s| &s.node)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn status(&self, id: NodeId) -> Option<&NodeStatus> {
        self.nodes.get(&id).map(|s| &s.status)
    }

    /// Error from the node's most recent evaluation, if it failed.
    pub fn last_error(&self, id: NodeId) -> Option<&NodeEvaluationError> {
        self.nodes.get(&id).and_then(|s| s.status.error())
    }

    /// Latest buffer on a stream.
    pub fn output(&self, stream: StreamId) -> Option<SharedBuffer> {
        self.nodes
            .get(&stream.node)?
            .outputs
            .get(stream.index)?
            .clone()
    }

    pub fn stream(&self, stream: StreamId) -> Option<StreamDescriptor> {
        let slot = self.nodes.get(&stream.node)?;
        let out = slot.node.outputs().into_iter().nth(stream.index)?;
        Some(describe(slot, stream.index, out))
    }

    /// Descriptors of every output of every live node.
    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.nodes
            .values()
            .flat_map(|slot| {
                slot.node
                    .outputs()
                    .into_iter()
                    .enumerate()
                    .map(move |(index, out)| describe(slot, index, out))
            })
            .collect()
    }

    /// Source nodes of an instrument, in channel order.
    pub fn source_nodes(&self, instrument: InstrumentId) -> Vec<NodeId> {
        let mut sources: Vec<(usize, NodeId)> = self
            .nodes()
            .filter_map(|n| {
                n.source()
                    .filter(|s| s.instrument == instrument)
                    .map(|s| (s.channel, n.id))
            })
            .collect();
        sources.sort_unstable();
        sources.into_iter().map(|(_, id)| id).collect()
    }

    pub fn source_node(&self, instrument: InstrumentId, channel: usize) -> Option<NodeId> {
        self.nodes().find_map(|n| {
            n.source()
                .filter(|s| s.instrument == instrument && s.channel == channel)
                .map(|_| n.id)
        })
    }

    /// Current evaluation plan, recompiled if the topology changed.
    pub fn plan(&mut self) -> &EvaluationPlan {
        self.ensure_plan();
        &self.plan
    }

    // --- evaluation ------------------------------------------------------

    /// Publish captured source buffers for `epoch` and evaluate everything
    /// downstream of them.
    pub fn evaluate(&mut self, epoch: EpochSeq, captures: Vec<(NodeId, Vec<StreamData>)>) -> EpochReport {
        let started = Instant::now();
        if let Some(last) = self.last_epoch {
            if epoch < last {
                tracing::warn!("Evaluating epoch {} after epoch {}", epoch, last);
            }
        }
        self.last_epoch = Some(epoch);
        self.ensure_plan();

        let mut seeds = Vec::with_capacity(captures.len());
        for (id, streams) in captures {
            let (Some(slot), Some(pos)) = (self.nodes.get_mut(&id), self.plan.position(id)) else {
                tracing::debug!("Dropping capture for removed source {}", id);
                continue;
            };
            publish_source(slot, epoch, streams);
            seeds.push(pos);
        }
        self.run_seeded(epoch, seeds, started)
    }

    /// Re-run every filter downstream of the sources still holding buffers
    /// of the latest epoch, without a new capture. Used after a parameter
    /// change. `None` before the first epoch.
    pub fn refresh(&mut self) -> Option<EpochReport> {
        let started = Instant::now();
        let epoch = self.last_epoch?;
        self.ensure_plan();
        let seeds: Vec<usize> = self
            .nodes
            .values()
            .filter(|slot| slot.node.kind() == NodeKind::Source)
            .filter(|slot| slot.outputs.iter().flatten().any(|buf| buf.epoch == epoch))
            .filter_map(|slot| self.plan.position(slot.node.id))
            .collect();
        tracing::debug!("Refreshing epoch {} from {} source(s)", epoch, seeds.len());
        Some(self.run_seeded(epoch, seeds, started))
    }

    /// Republish stored source buffers as `epoch` and evaluate everything
    /// downstream. Sources with no buffer in `buffers` are cleared so their
    /// dependents report a missing input instead of mixing epochs.
    /// Cross-epoch filters are reset first.
    pub fn restore(&mut self, epoch: EpochSeq, buffers: &BTreeMap<StreamId, SharedBuffer>) -> EpochReport {
        let started = Instant::now();
        self.last_epoch = Some(epoch);
        self.ensure_plan();

        let mut seeds = Vec::new();
        for slot in self.nodes.values_mut() {
            if slot.node.kind() != NodeKind::Source {
                // Carried state belongs to the timeline being left
                if slot.node.epoch_tolerance() == EpochTolerance::CrossEpoch {
                    if let Some(filter) = slot.node.filter_mut() {
                        filter.reset();
                    }
                }
                continue;
            }
            let id = slot.node.id;
            let outputs: Vec<Option<SharedBuffer>> = (0..slot.node.outputs().len())
                .map(|index| buffers.get(&StreamId::new(id, index)).cloned())
                .collect();
            if !slot.node.enabled {
                slot.status = NodeStatus::Disabled { epoch };
            } else if outputs.iter().all(Option::is_none) {
                tracing::debug!("No stored capture for source {} in epoch {}", id, epoch);
                slot.status = NodeStatus::Idle;
            } else {
                slot.status = NodeStatus::Evaluated(epoch);
            }
            slot.outputs = outputs;
            if let Some(pos) = self.plan.position(id) {
                seeds.push(pos);
            }
        }
        self.run_seeded(epoch, seeds, started)
    }

    fn run_seeded(&mut self, epoch: EpochSeq, mut seeds: Vec<usize>, started: Instant) -> EpochReport {
        if !seeds.is_empty() {
            // Unbound and dangling inputs are reported every epoch
            let open = self
                .plan
                .order
                .iter()
                .enumerate()
                .filter(|(_, id)| self.nodes.get(*id).is_some_and(|s| has_open_input(&s.node)))
                .map(|(pos, _)| pos);
            seeds.extend(open);
        }

        let dirty = self.plan.downstream_of(seeds);
        let dirty_filters = dirty
            .iter()
            .zip(&self.plan.order)
            .filter(|(d, id)| {
                **d && self
                    .nodes
                    .get(*id)
                    .is_some_and(|s| s.node.kind() != NodeKind::Source)
            })
            .count();

        if self.evaluation_threads > 1 && dirty_filters > 1 {
            self.evaluate_parallel(epoch, &dirty);
        } else {
            self.evaluate_sequential(epoch, &dirty);
        }

        let mut report = self.collect_report(epoch, &dirty);
        report.elapsed = started.elapsed();
        tracing::trace!(
            "Epoch {}: {} evaluated, {} failed, {} blocked, {} skipped in {:?}",
            epoch,
            report.evaluated.len(),
            report.failed.len(),
            report.blocked.len(),
            report.skipped,
            report.elapsed
        );
        report
    }

    fn evaluate_sequential(&mut self, epoch: EpochSeq, dirty: &[bool]) {
        for (pos, id) in self.plan.order.iter().enumerate() {
            if !dirty[pos] {
                continue;
            }
            let gathered = {
                let Some(slot) = self.nodes.get(id) else { continue };
                if slot.node.kind() == NodeKind::Source {
                    continue;
                }
                let nodes = &self.nodes;
                gather_inputs(&slot.node, epoch, |s| {
                    nodes
                        .get(&s.node)
                        .map_or(Upstream::Empty, |p| upstream_of(p, s.index, epoch))
                })
            };
            if let Some(slot) = self.nodes.get_mut(id) {
                run_node(slot, epoch, gathered);
            }
        }
    }

    fn evaluate_parallel(&mut self, epoch: EpochSeq, dirty: &[bool]) {
        let plan = &self.plan;
        let threads = self.evaluation_threads;

        // Slots in plan order, one lock each
        let mut by_id: HashMap<NodeId, &mut NodeSlot> =
            self.nodes.iter_mut().map(|(id, s)| (*id, s)).collect();
        let cells: Vec<Mutex<&mut NodeSlot>> = plan
            .order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .map(Mutex::new)
            .collect();
        drop(by_id);
        if cells.len() != plan.len() {
            tracing::error!("Evaluation plan out of sync with graph; skipping epoch {}", epoch);
            return;
        }

        let pending: Vec<AtomicUsize> = (0..plan.len())
            .map(|pos| {
                let n = if dirty[pos] {
                    plan.predecessors[pos].iter().filter(|&&p| dirty[p]).count()
                } else {
                    0
                };
                AtomicUsize::new(n)
            })
            .collect();
        let total = dirty.iter().filter(|d| **d).count();
        if total == 0 {
            return;
        }
        let remaining = AtomicUsize::new(total);

        let (tx, rx) = crossbeam_channel::unbounded::<Option<usize>>();
        for pos in 0..plan.len() {
            if dirty[pos] && pending[pos].load(Ordering::Relaxed) == 0 {
                let _ = tx.send(Some(pos));
            }
        }

        let cells = &cells;
        let pending = &pending;
        let remaining = &remaining;
        std::thread::scope(|scope| {
            for _ in 0..threads {
                let rx = rx.clone();
                let tx = tx.clone();
                scope.spawn(move || {
                    while let Ok(Some(pos)) = rx.recv() {
                        {
                            let mut me = lock(&cells[pos]);
                            if me.node.kind() != NodeKind::Source {
                                let gathered = gather_inputs(&me.node, epoch, |s| {
                                    plan.position(s.node).map_or(Upstream::Empty, |p| {
                                        upstream_of(&lock(&cells[p]), s.index, epoch)
                                    })
                                });
                                run_node(&mut me, epoch, gathered);
                            }
                        }

                        for &succ in &plan.successors[pos] {
                            if dirty[succ] && pending[succ].fetch_sub(1, Ordering::AcqRel) == 1 {
                                let _ = tx.send(Some(succ));
                            }
                        }
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            for _ in 0..threads {
                                let _ = tx.send(None);
                            }
                        }
                    }
                });
            }
        });
    }

    fn collect_report(&self, epoch: EpochSeq, dirty: &[bool]) -> EpochReport {
        let mut report = EpochReport {
            epoch,
            ..Default::default()
        };
        for (pos, id) in self.plan.order.iter().enumerate() {
            if !dirty[pos] {
                report.skipped += 1;
                continue;
            }
            let Some(slot) = self.nodes.get(id) else { continue };
            match &slot.status {
                NodeStatus::Evaluated(e) if *e == epoch => {
                    report.evaluated.push(*id);
                    for (index, buf) in slot.outputs.iter().enumerate() {
                        let Some(buf) = buf else { continue };
                        if matches!(buf.data, WaveformData::Packets(_)) {
                            report.packets.push((*id, buf.clone()));
                        }
                        report.outputs.push((StreamId::new(*id, index), buf.clone()));
                    }
                }
                NodeStatus::Failed { error, .. } => report.failed.push((*id, error.clone())),
                NodeStatus::Blocked { upstream, .. } => report.blocked.push((*id, *upstream)),
                NodeStatus::Disabled { .. } => report.disabled.push(*id),
                _ => {}
            }
        }
        report
    }
}

fn lock<'a, T>(m: &'a Mutex<T>) -> MutexGuard<'a, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn describe(slot: &NodeSlot, index: usize, out: OutputDescriptor) -> StreamDescriptor {
    let latest = slot.outputs.get(index).and_then(Option::as_ref);
    StreamDescriptor {
        id: StreamId::new(slot.node.id, index),
        name: format!("{}/{}", slot.node.name, out.name),
        stream_type: out.stream_type,
        unit: out.unit,
        sample_rate: latest.and_then(|buf| buf.timebase.sample_rate()),
        length_hint: latest.map(|buf| buf.data.len()),
    }
}

fn publish_source(slot: &mut NodeSlot, epoch: EpochSeq, streams: Vec<StreamData>) {
    let declared = slot.node.outputs();
    if !slot.node.enabled {
        slot.outputs = vec![None; declared.len()];
        slot.status = NodeStatus::Disabled { epoch };
        return;
    }
    match check_outputs(&streams, &declared) {
        Ok(()) => {
            slot.outputs = streams
                .into_iter()
                .map(|s| Some(Arc::new(s.into_buffer(epoch))))
                .collect();
            slot.status = NodeStatus::Evaluated(epoch);
        }
        Err(error) => {
            tracing::warn!("Source {} published bad capture: {}", slot.node.id, error);
            slot.outputs = vec![None; declared.len()];
            slot.status = NodeStatus::Failed { epoch, error };
        }
    }
}

fn check_outputs(streams: &[StreamData], declared: &[OutputDescriptor]) -> Result<(), NodeEvaluationError> {
    if streams.len() != declared.len() {
        return Err(NodeEvaluationError::InternalFault(format!(
            "produced {} stream(s), declared {}",
            streams.len(),
            declared.len()
        )));
    }
    for (i, (s, d)) in streams.iter().zip(declared).enumerate() {
        if s.data.stream_type() != d.stream_type {
            return Err(NodeEvaluationError::InternalFault(format!(
                "output {} produced {} data, declared {}",
                i,
                s.data.stream_type(),
                d.stream_type
            )));
        }
    }
    Ok(())
}

fn upstream_of(slot: &NodeSlot, index: usize, epoch: EpochSeq) -> Upstream {
    if !slot.node.enabled {
        return Upstream::Failed(slot.node.id);
    }
    match &slot.status {
        NodeStatus::Failed { epoch: e, .. } if *e == epoch => return Upstream::Failed(slot.node.id),
        NodeStatus::Blocked { epoch: e, upstream } if *e == epoch => return Upstream::Failed(*upstream),
        _ => {}
    }
    match slot.outputs.get(index) {
        Some(Some(buf)) => Upstream::Ready(buf.clone()),
        _ => Upstream::Empty,
    }
}

/// A required input that is not bound to a live producer.
fn has_open_input(node: &Node) -> bool {
    node.enabled
        && node
            .inputs
            .iter()
            .zip(node.input_descriptors())
            .any(|(binding, desc)| !desc.optional && !matches!(binding, InputBinding::Bound(_)))
}

fn gather_inputs(node: &Node, epoch: EpochSeq, lookup: impl Fn(StreamId) -> Upstream) -> Gathered {
    if !node.enabled {
        return Gathered::Disabled;
    }
    let tolerance = node.epoch_tolerance();
    let descriptors = node.input_descriptors();

    let mut inputs = Vec::with_capacity(descriptors.len());
    let mut first_error = None;
    for (i, (binding, desc)) in node.inputs.iter().zip(descriptors).enumerate() {
        let upstream = match binding {
            InputBinding::Bound(s) => lookup(*s),
            InputBinding::Unbound | InputBinding::Dangling(_) => Upstream::Empty,
        };
        let resolved = match upstream {
            Upstream::Failed(root) => return Gathered::Blocked(root),
            Upstream::Empty if desc.optional => Ok(None),
            Upstream::Empty => Err(NodeEvaluationError::MissingInput {
                input: i,
                name: desc.name.to_string(),
            }),
            Upstream::Ready(buf) if !desc.accepts(buf.stream_type()) => {
                Err(NodeEvaluationError::TypeMismatch {
                    input: i,
                    expected: desc.accepts.to_vec(),
                    found: buf.stream_type(),
                })
            }
            Upstream::Ready(buf) if buf.epoch != epoch && tolerance == EpochTolerance::CurrentOnly => {
                Err(NodeEvaluationError::StaleInput {
                    input: i,
                    found: buf.epoch,
                    expected: epoch,
                })
            }
            Upstream::Ready(buf) => Ok(Some(buf)),
        };
        match resolved {
            Ok(buf) => inputs.push(buf),
            Err(e) => {
                first_error.get_or_insert(e);
                inputs.push(None);
            }
        }
    }

    match first_error {
        Some(e) => Gathered::Failed(e),
        None => Gathered::Ready(inputs),
    }
}

fn run_node(slot: &mut NodeSlot, epoch: EpochSeq, gathered: Gathered) {
    let id = slot.node.id;
    let output_count = slot.outputs.len();
    let inputs = match gathered {
        Gathered::Ready(inputs) => inputs,
        Gathered::Disabled => {
            slot.outputs = vec![None; output_count];
            slot.status = NodeStatus::Disabled { epoch };
            return;
        }
        Gathered::Blocked(upstream) => {
            slot.outputs = vec![None; output_count];
            slot.status = NodeStatus::Blocked { epoch, upstream };
            return;
        }
        Gathered::Failed(error) => {
            tracing::debug!("{} not evaluated: {}", id, error);
            slot.outputs = vec![None; output_count];
            slot.status = NodeStatus::Failed { epoch, error };
            return;
        }
    };

    let Some(filter) = slot.node.filter_mut() else {
        return;
    };
    let declared = filter.outputs();
    let ctx = EvalContext {
        node: id,
        epoch,
        inputs: &inputs,
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| filter.evaluate(&ctx)))
        .unwrap_or_else(|payload| {
            Err(NodeEvaluationError::InternalFault(format!(
                "filter panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
        .and_then(|streams| check_outputs(&streams, &declared).map(|_| streams));

    match result {
        Ok(streams) => {
            slot.outputs = streams
                .into_iter()
                .map(|s| Some(Arc::new(s.into_buffer(epoch))))
                .collect();
            slot.status = NodeStatus::Evaluated(epoch);
        }
        Err(error) => {
            tracing::debug!("{} failed in epoch {}: {}", id, epoch, error);
            slot.outputs = vec![None; declared.len()];
            slot.status = NodeStatus::Failed { epoch, error };
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
