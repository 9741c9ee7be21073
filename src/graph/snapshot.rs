//! Serializable snapshot of the graph topology.
//!
//! Snapshots are plain data: they describe nodes, bindings and parameters
//! but carry no buffers, so they are cheap to diff and to hand across threads.

use crate::graph::executor::FilterGraph;
use crate::graph::id::{InstrumentId, NodeId, StreamId};
use crate::graph::node::{FilterPlugin, InputBinding, NodeKind};
use crate::graph::param::ConfigValue;
use crate::graph::stream::OutputDescriptor;
use serde::{Deserialize, Serialize};

/// Snapshot of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub type_name: String,
    pub kind: NodeKind,
    pub enabled: bool,
    /// Set for source nodes
    pub instrument: Option<(InstrumentId, usize)>,
    pub inputs: Vec<InputBinding>,
    pub outputs: Vec<OutputDescriptor>,
    pub params: Vec<(String, ConfigValue)>,
}

/// One producer -> consumer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub producer: StreamId,
    pub consumer: NodeId,
    pub input: usize,
}

/// Snapshot of the full graph topology.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub generation: u64,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Same nodes, bindings and parameters, ignoring the generation counter.
    pub fn same_topology(&self, other: &GraphSnapshot) -> bool {
        self.nodes == other.nodes && self.edges == other.edges
    }
}

impl FilterGraph {
    /// Capture the current topology.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes = Vec::with_capacity(self.len());
        let mut edges = Vec::new();

        for node in self.nodes() {
            for (input, binding) in node.inputs.iter().enumerate() {
                if let InputBinding::Bound(producer) = binding {
                    edges.push(EdgeSnapshot {
                        producer: *producer,
                        consumer: node.id,
                        input,
                    });
                }
            }

            nodes.push(NodeSnapshot {
                id: node.id,
                name: node.name.clone(),
                type_name: node.type_name().to_string(),
                kind: node.kind(),
                enabled: node.enabled,
                instrument: node.source().map(|s| (s.instrument, s.channel)),
                inputs: node.inputs.clone(),
                outputs: node.outputs(),
                params: node.filter().map(|f| f.params()).unwrap_or_default(),
            });
        }

        GraphSnapshot {
            generation: self.generation(),
            nodes,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::filters::GainFilter;
    use crate::graph::stream::Unit;

    #[test]
    fn test_snapshot_json_round_trip() {
        let mut g = FilterGraph::new();
        let a = g.add_source(
            InstrumentId(7),
            0,
            "CH1",
            vec![OutputDescriptor::analog("v", Unit::Volts)],
        );
        let b = g.add_filter("x2", GainFilter::new(2.0));
        g.bind(b, 0, StreamId::new(a, 0)).unwrap();

        let snap = g.snapshot();
        assert_eq!(snap.edges.len(), 1);
        assert_eq!(snap.node(a).unwrap().instrument, Some((InstrumentId(7), 0)));
        assert_eq!(snap.node(b).unwrap().type_name, "gain");

        let json = snap.to_json().unwrap();
        let back = GraphSnapshot::from_json(&json).unwrap();
        assert_eq!(back, snap);
    }
}
