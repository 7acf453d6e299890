//! Reachability verifier - echo over admissible links
//!
//! An echo succeeds iff the address is configured on some attached node and
//! a path of mutually admissible links joins the two nodes (request and
//! reply both have to get through).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Small integer id the simulator uses for nodes
pub type SimNodeId = u32;

/// Outcome of one echo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoResult {
    /// Reply received over the given hop sequence
    Reply { target: SimNodeId, path: Vec<SimNodeId> },
    /// No attached node has the address configured
    NoSuchAddress,
    /// Address exists but no admissible path reaches it
    Unreachable { target: SimNodeId },
}

impl EchoResult {
    pub fn is_reply(&self) -> bool {
        matches!(self, EchoResult::Reply { .. })
    }

    pub fn hops(&self) -> Option<usize> {
        match self {
            EchoResult::Reply { path, .. } => Some(path.len().saturating_sub(1)),
            _ => None,
        }
    }
}

/// Breadth-first search over an undirected view of the mesh
#[derive(Debug, Clone, Default)]
pub struct ReachabilityGraph {
    edges: BTreeMap<SimNodeId, BTreeSet<SimNodeId>>,
}

impl ReachabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a usable edge (both directions admissible, both ends attached)
    pub fn connect(&mut self, a: SimNodeId, b: SimNodeId) {
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Shortest path from `from` to `to`, both ends included
    pub fn path(&self, from: SimNodeId, to: SimNodeId) -> Option<Vec<SimNodeId>> {
        if from == to {
            return Some(vec![from]);
        }

        let mut parent: BTreeMap<SimNodeId, SimNodeId> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = BTreeSet::from([from]);

        while let Some(node) = queue.pop_front() {
            for &next in self.edges.get(&node).into_iter().flatten() {
                if !seen.insert(next) {
                    continue;
                }
                parent.insert(next, node);
                if next == to {
                    let mut path = vec![to];
                    let mut cur = to;
                    while let Some(&p) = parent.get(&cur) {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    pub fn echo(&self, from: SimNodeId, target: Option<SimNodeId>) -> EchoResult {
        let Some(target) = target else {
            return EchoResult::NoSuchAddress;
        };
        match self.path(from, target) {
            Some(path) => EchoResult::Reply { target, path },
            None => EchoResult::Unreachable { target },
        }
    }
}
