//! Causal message tangle.
//!
//! A tangle is the DAG of every message sharing one moot. Each message names the tips it built
//! on, so the graph only ever grows: ingesting a message adds one node and its edges to
//! predecessors, never rewrites anything.
//!
//! Concurrency is explicit. Two messages written on the same tips without knowledge of each other
//! both become tips, and neither `precedes` the other until a later message joins them.
//!
//! Every peer must agree on one total order for folding, so [`Tangle::topo_sort`] orders by depth
//! and breaks ties by message ID. Depth strictly increases along every edge, which makes that order
//! a valid linearisation of the partial order.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;

use crate::error::TangleError;
use crate::msg::{Msg, MsgId};

#[derive(Debug, Clone)]
pub struct Tangle {
    root: MsgId,
    /// Nodes are message IDs, edges point from a message to its predecessors.
    graph: StableDiGraph<MsgId, ()>,
    index_map: HashMap<MsgId, NodeIndex>,
    depths: HashMap<MsgId, u64>,
    /// Messages with no known successor.
    tips: BTreeSet<MsgId>,
    max_depth: u64,
}

impl Tangle {
    /// Creates an empty tangle that will accept `root` as its moot.
    pub fn new(root: MsgId) -> Self {
        Self {
            root,
            graph: StableDiGraph::new(),
            index_map: HashMap::new(),
            depths: HashMap::new(),
            tips: BTreeSet::new(),
            max_depth: 0,
        }
    }

    pub fn root(&self) -> MsgId {
        self.root
    }

    pub fn contains(&self, id: &MsgId) -> bool {
        self.index_map.contains_key(id)
    }

    /// Number of messages, moot included.
    pub fn size(&self) -> usize {
        self.index_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_map.is_empty()
    }

    pub fn tips(&self) -> &BTreeSet<MsgId> {
        &self.tips
    }

    pub fn depth(&self, id: &MsgId) -> Option<u64> {
        self.depths.get(id).copied()
    }

    pub fn max_depth(&self) -> u64 {
        self.max_depth
    }

    /// Adds a message given its direct predecessors.
    ///
    /// Returns `Ok(false)` when the message is already present, so replaying a message is harmless.
    pub fn add(&mut self, id: MsgId, prev: &BTreeSet<MsgId>) -> Result<bool, TangleError> {
        if self.contains(&id) {
            return Ok(false);
        }

        let depth = if id == self.root {
            if !prev.is_empty() {
                return Err(TangleError::RootWithParents);
            }
            0
        } else {
            if prev.is_empty() {
                return Err(TangleError::MissingParent(self.root));
            }
            let mut max_prev = 0;
            for parent in prev {
                let parent_depth = self
                    .depths
                    .get(parent)
                    .ok_or(TangleError::MissingParent(*parent))?;
                max_prev = max_prev.max(*parent_depth);
            }
            max_prev + 1
        };

        let node = self.graph.add_node(id);
        self.index_map.insert(id, node);
        self.depths.insert(id, depth);
        for parent in prev {
            if let Some(parent_idx) = self.index_map.get(parent) {
                self.graph.add_edge(node, *parent_idx, ());
            }
        }

        self.tips.retain(|tip| !prev.contains(tip));
        self.tips.insert(id);
        self.max_depth = self.max_depth.max(depth);

        Ok(true)
    }

    /// Adds a message, checking that it actually belongs to this tangle.
    pub fn add_msg(&mut self, id: MsgId, msg: &Msg) -> Result<bool, TangleError> {
        match &msg.tangle {
            None => {
                if id != self.root {
                    return Err(TangleError::RootMismatch {
                        expected: self.root,
                        found: id,
                    });
                }
                self.add(id, &BTreeSet::new())
            }
            Some(link) => {
                if link.root != self.root {
                    return Err(TangleError::RootMismatch {
                        expected: self.root,
                        found: link.root,
                    });
                }
                self.add(id, &link.prev)
            }
        }
    }

    /// Deterministic topological order: ascending depth, ties broken by message ID.
    pub fn topo_sort(&self) -> Vec<MsgId> {
        let mut ids: Vec<MsgId> = self.index_map.keys().copied().collect();
        ids.sort_by_key(|id| (self.depths[id], *id));
        ids
    }

    /// True iff `a` is a strict ancestor of `b`.
    pub fn precedes(&self, a: &MsgId, b: &MsgId) -> bool {
        if a == b {
            return false;
        }
        match (self.index_map.get(a), self.index_map.get(b)) {
            // Edges point backwards in time, so walk from `b` towards `a`.
            (Some(a_idx), Some(b_idx)) => has_path_connecting(&self.graph, *b_idx, *a_idx, None),
            _ => false,
        }
    }
}
