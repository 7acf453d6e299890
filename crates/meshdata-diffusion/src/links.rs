//! Link supervisor - which direct neighbors may carry traffic
//!
//! Each node keeps an explicit adjacency list with per-edge admissibility
//! (the allow-list of the radio layer). Only admissible neighbors are sent
//! to or accepted from.

use std::collections::BTreeMap;

use meshdata_core::NodeId;
use tracing::{debug, info};

/// Edge to a direct neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborLink {
    pub neighbor: NodeId,
    pub admissible: bool,
}

impl NeighborLink {
    pub fn new(neighbor: NodeId) -> Self {
        Self {
            neighbor,
            admissible: false,
        }
    }
}

/// Result of an admissibility change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// inadmissible -> admissible, the caller owes the neighbor a re-sync
    Restored,
    /// admissible -> inadmissible
    Suppressed,
    Unchanged,
}

/// Per-node link supervisor
#[derive(Debug, Clone, Default)]
pub struct LinkSupervisor {
    owner: NodeId,
    links: BTreeMap<NodeId, NeighborLink>,
}

impl LinkSupervisor {
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            links: BTreeMap::new(),
        }
    }

    /// Register a neighbor; new links start inadmissible
    pub fn add_neighbor(&mut self, neighbor: NodeId) {
        if neighbor == self.owner {
            return;
        }
        self.links
            .entry(neighbor)
            .or_insert_with(|| NeighborLink::new(neighbor));
    }

    /// Forget a neighbor and its edge
    pub fn remove_neighbor(&mut self, neighbor: NodeId) -> bool {
        self.links.remove(&neighbor).is_some()
    }

    pub fn set_admissible(&mut self, neighbor: NodeId, admissible: bool) -> LinkTransition {
        let Some(link) = self.links.get_mut(&neighbor) else {
            debug!(node = %self.owner, %neighbor, "admissibility change for unknown neighbor");
            return LinkTransition::Unchanged;
        };

        let transition = match (link.admissible, admissible) {
            (false, true) => LinkTransition::Restored,
            (true, false) => LinkTransition::Suppressed,
            _ => LinkTransition::Unchanged,
        };
        link.admissible = admissible;

        if transition != LinkTransition::Unchanged {
            info!(node = %self.owner, %neighbor, admissible, "link admissibility changed");
        }
        transition
    }

    /// Unknown neighbors are never admissible
    pub fn is_admissible(&self, neighbor: NodeId) -> bool {
        self.links
            .get(&neighbor)
            .map(|l| l.admissible)
            .unwrap_or(false)
    }

    pub fn has_neighbor(&self, neighbor: NodeId) -> bool {
        self.links.contains_key(&neighbor)
    }

    /// Admissible neighbors, optionally skipping one (the sender of a frame)
    pub fn admissible_except(&self, except: Option<NodeId>) -> Vec<NodeId> {
        self.links
            .values()
            .filter(|l| l.admissible && Some(l.neighbor) != except)
            .map(|l| l.neighbor)
            .collect()
    }

    pub fn admissible_neighbors(&self) -> Vec<NodeId> {
        self.admissible_except(None)
    }

    pub fn links(&self) -> impl Iterator<Item = &NeighborLink> {
        self.links.values()
    }

    pub fn neighbor_count(&self) -> usize {
        self.links.len()
    }
}
