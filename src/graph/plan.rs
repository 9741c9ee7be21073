use crate::graph::id::NodeId;
use std::collections::HashMap;

/// Cached evaluation order for a filter graph.
///
/// Positions (`usize`) index into `order`; adjacency lists use positions so
/// the executor never hashes on the hot path.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPlan {
    /// Live nodes in topological order
    pub order: Vec<NodeId>,

    /// NodeId -> position in `order`
    pub index: HashMap<NodeId, usize>,

    /// Distinct producer positions of each node
    pub predecessors: Vec<Vec<usize>>,

    /// Distinct consumer positions of each node
    pub successors: Vec<Vec<usize>>,

    /// Topology generation this plan was compiled from
    pub generation: u64,

    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanStats {
    /// Number of live nodes
    pub total_nodes: usize,

    /// Number of instrument source nodes
    pub source_nodes: usize,

    /// Number of packet-producing nodes
    pub decoder_nodes: usize,

    /// Number of distinct producer -> consumer node pairs
    pub edges: usize,

    /// Length of the longest dependency chain
    pub depth: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl EvaluationPlan {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Mark every position reachable from `seeds` (seeds included).
    pub fn downstream_of(&self, seeds: impl IntoIterator<Item = usize>) -> Vec<bool> {
        let mut mark = vec![false; self.order.len()];
        let mut stack: Vec<usize> = seeds.into_iter().collect();
        while let Some(pos) = stack.pop() {
            if pos >= mark.len() || mark[pos] {
                continue;
            }
            mark[pos] = true;
            stack.extend(self.successors[pos].iter().copied().filter(|&s| !mark[s]));
        }
        mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_plan() -> EvaluationPlan {
        // 0 -> 1 -> 2, 3 isolated
        EvaluationPlan {
            order: vec![NodeId(10), NodeId(11), NodeId(12), NodeId(13)],
            index: [(NodeId(10), 0), (NodeId(11), 1), (NodeId(12), 2), (NodeId(13), 3)]
                .into_iter()
                .collect(),
            predecessors: vec![vec![], vec![0], vec![1], vec![]],
            successors: vec![vec![1], vec![2], vec![], vec![]],
            generation: 1,
            stats: PlanStats::default(),
        }
    }

    #[test]
    fn test_downstream_of() {
        let plan = chain_plan();
        assert_eq!(plan.downstream_of([1]), vec![false, true, true, false]);
        assert_eq!(plan.downstream_of([3]), vec![false, false, false, true]);
        assert_eq!(plan.downstream_of([]), vec![false; 4]);
    }

    #[test]
    fn test_position() {
        let plan = chain_plan();
        assert_eq!(plan.position(NodeId(12)), Some(2));
        assert_eq!(plan.position(NodeId(99)), None);
    }
}
