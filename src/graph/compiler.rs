use super::id::NodeId;
use super::node::{Node, NodeKind};
use super::plan::{EvaluationPlan, PlanStats};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Compiles the graph topology into an [`EvaluationPlan`]
pub struct GraphCompiler;

impl GraphCompiler {
    /// Compile live nodes into a topologically ordered plan.
    ///
    /// Edges come from `Bound` input bindings only; dangling and unbound
    /// inputs do not order anything. Ready nodes are released in id order so
    /// the same topology always compiles to the same order.
    ///
    /// # Arguments
    /// * `nodes` - All live nodes, in ascending id order
    /// * `generation` - Generation counter for cache invalidation
    pub fn compile<'a>(nodes: impl IntoIterator<Item = &'a Node>, generation: u64) -> EvaluationPlan {
        let start_time = std::time::Instant::now();
        let nodes: Vec<&Node> = nodes.into_iter().collect();
        let n = nodes.len();

        let slot_of: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, node)| (node.id, i)).collect();

        // Adjacency over slot indices (distinct producer/consumer pairs)
        let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (i, node) in nodes.iter().enumerate() {
            for producer in node.producers() {
                if let Some(&p) = slot_of.get(&producer.node) {
                    preds[i].insert(p);
                    succs[p].insert(i);
                }
            }
        }

        // Kahn's algorithm
        let mut in_degree: Vec<usize> = preds.iter().map(BTreeSet::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(n);
        let mut depth = vec![1usize; n];
        while let Some(i) = queue.pop_front() {
            sorted.push(i);
            for &s in &succs[i] {
                depth[s] = depth[s].max(depth[i] + 1);
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    queue.push_back(s);
                }
            }
        }

        if sorted.len() != n {
            // Edits reject cycles before committing, so this is a broken invariant
            tracing::error!(
                "Graph topology contains a cycle; {} node(s) left out of the evaluation plan",
                n - sorted.len()
            );
        }

        let position: HashMap<usize, usize> =
            sorted.iter().enumerate().map(|(pos, &slot)| (slot, pos)).collect();
        let remap = |set: &BTreeSet<usize>| -> Vec<usize> {
            let mut v: Vec<usize> = set.iter().filter_map(|s| position.get(s).copied()).collect();
            v.sort_unstable();
            v
        };

        let order: Vec<NodeId> = sorted.iter().map(|&slot| nodes[slot].id).collect();
        let index = order.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        let predecessors = sorted.iter().map(|&slot| remap(&preds[slot])).collect();
        let successors = sorted.iter().map(|&slot| remap(&succs[slot])).collect();

        let stats = PlanStats {
            total_nodes: n,
            source_nodes: nodes.iter().filter(|n| n.kind() == NodeKind::Source).count(),
            decoder_nodes: nodes.iter().filter(|n| n.kind() == NodeKind::Decoder).count(),
            edges: preds.iter().map(BTreeSet::len).sum(),
            depth: sorted.iter().map(|&slot| depth[slot]).max().unwrap_or(0),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        tracing::trace!(
            "Compiled evaluation plan gen {}: {} nodes, {} edges, depth {}",
            generation,
            stats.total_nodes,
            stats.edges,
            stats.depth
        );

        EvaluationPlan {
            order,
            index,
            predecessors,
            successors,
            generation,
            stats,
        }
    }

    /// Consumer lists keyed by producer node, from the current bindings.
    pub fn consumer_map<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> HashMap<NodeId, Vec<NodeId>> {
        let mut map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in nodes {
            for producer in node.producers() {
                map.entry(producer.node).or_default().push(node.id);
            }
        }
        map
    }

    /// Whether `to` is reachable from `from` following producer -> consumer edges.
    pub fn reaches(consumers: &HashMap<NodeId, Vec<NodeId>>, from: NodeId, to: NodeId) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(next) = consumers.get(&id) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }
}
