//! Mesh simulator for network data testing
//!
//! Drives a set of [`Node`]s in lockstep. Each tick: due frames are handed
//! to their receivers, every node runs its loop, and whatever the nodes
//! queued is put on the wire (as encoded bytes) with the link's latency.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;

use bytes::Bytes;
use meshdata_core::{
    DataVersion, Ipv6Prefix, MeshAddress, MeshError, MeshResult, NodeId, PrefixFlags,
};
use meshdata_diffusion::{AttachState, LinkTransition, Role};
use meshdata_runtime::{Node, NodeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::reachability::{EchoResult, ReachabilityGraph, SimNodeId};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Seed for hardware ids
    pub seed: u64,
    /// Delivery delay of new links, in ticks (at least one)
    pub default_latency_ticks: u64,
    /// Configuration every node is built with
    pub node: NodeConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            default_latency_ticks: 1,
            node: NodeConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_latency(mut self, ticks: u64) -> Self {
        self.default_latency_ticks = ticks;
        self
    }

    pub fn with_node_config(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }
}

/// Frame on the wire
#[derive(Debug, Clone)]
struct InFlight {
    due: u64,
    from: SimNodeId,
    to: SimNodeId,
    data: Bytes,
}

#[derive(Debug)]
struct SimNode {
    hw: NodeId,
    node: Node,
}

/// Simulator statistics
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub bytes_sent: u64,
    /// Sent to a hardware id the simulator does not know
    pub frames_unroutable: u64,
}

/// Deterministic multi-node mesh
#[derive(Debug)]
pub struct MeshSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    nodes: BTreeMap<SimNodeId, SimNode>,
    by_hw: BTreeMap<NodeId, SimNodeId>,
    /// Undirected links and their latency
    latency: BTreeMap<(SimNodeId, SimNodeId), u64>,
    in_flight: Vec<InFlight>,
    now: u64,
    stats: SimStats,
}

fn edge(a: SimNodeId, b: SimNodeId) -> (SimNodeId, SimNodeId) {
    (a.min(b), a.max(b))
}

fn not_found(id: SimNodeId) -> MeshError {
    MeshError::NodeNotFound(NodeId::new(id as u64))
}

impl MeshSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            nodes: BTreeMap::new(),
            by_hw: BTreeMap::new(),
            latency: BTreeMap::new(),
            in_flight: Vec::new(),
            now: 0,
            stats: SimStats::default(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(SimulatorConfig::default().with_seed(seed))
    }

    /// Add a node with a fresh random hardware id; returns the hardware id.
    /// Fails if the node configuration is invalid.
    pub fn add_node(&mut self, id: SimNodeId, role: Role) -> MeshResult<NodeId> {
        if let Some(existing) = self.nodes.get(&id) {
            return Ok(existing.hw);
        }
        self.config.node.validate()?;

        let hw = loop {
            let candidate = NodeId::new(self.rng.gen());
            if candidate != NodeId::ZERO && !self.by_hw.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!(sim_id = id, hw = %hw, ?role, "node added");

        let node = Node::with_config(hw, role, self.config.node.clone())?;
        self.nodes.insert(id, SimNode { hw, node });
        self.by_hw.insert(hw, id);
        Ok(hw)
    }

    fn sim_node(&self, id: SimNodeId) -> MeshResult<&SimNode> {
        self.nodes.get(&id).ok_or_else(|| not_found(id))
    }

    fn sim_node_mut(&mut self, id: SimNodeId) -> MeshResult<&mut SimNode> {
        self.nodes.get_mut(&id).ok_or_else(|| not_found(id))
    }

    pub fn node(&self, id: SimNodeId) -> MeshResult<&Node> {
        self.sim_node(id).map(|n| &n.node)
    }

    pub fn node_mut(&mut self, id: SimNodeId) -> MeshResult<&mut Node> {
        self.sim_node_mut(id).map(|n| &mut n.node)
    }

    pub fn hardware_id(&self, id: SimNodeId) -> MeshResult<NodeId> {
        self.sim_node(id).map(|n| n.hw)
    }

    pub fn node_ids(&self) -> Vec<SimNodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn start(&mut self, id: SimNodeId) -> MeshResult<()> {
        self.node_mut(id)?.start();
        Ok(())
    }

    pub fn start_all(&mut self) {
        for n in self.nodes.values_mut() {
            n.node.start();
        }
    }

    /// Forget all network data on a node; `start` attaches it again
    pub fn detach(&mut self, id: SimNodeId) -> MeshResult<()> {
        self.node_mut(id)?.detach();
        Ok(())
    }

    /// Join two nodes with the default latency and admit both directions
    pub fn link(&mut self, a: SimNodeId, b: SimNodeId) -> MeshResult<()> {
        self.link_with_latency(a, b, self.config.default_latency_ticks)
    }

    pub fn link_with_latency(&mut self, a: SimNodeId, b: SimNodeId, ticks: u64) -> MeshResult<()> {
        let hw_a = self.hardware_id(a)?;
        let hw_b = self.hardware_id(b)?;
        self.latency.insert(edge(a, b), ticks.max(1));

        self.node_mut(a)?.add_neighbor(hw_b);
        self.node_mut(b)?.add_neighbor(hw_a);
        self.set_admissible(a, b, true)?;
        self.set_admissible(b, a, true)?;
        Ok(())
    }

    /// Change how `a` treats `b` (one direction, like a per-node allow-list)
    pub fn set_admissible(
        &mut self,
        a: SimNodeId,
        b: SimNodeId,
        admissible: bool,
    ) -> MeshResult<LinkTransition> {
        let hw_b = self.hardware_id(b)?;
        Ok(self.node_mut(a)?.set_admissible(hw_b, admissible))
    }

    /// Change both directions of a link, `a` first
    pub fn set_link_admissible(
        &mut self,
        a: SimNodeId,
        b: SimNodeId,
        admissible: bool,
    ) -> MeshResult<()> {
        self.set_admissible(a, b, admissible)?;
        self.set_admissible(b, a, admissible)?;
        Ok(())
    }

    pub fn add_prefix(
        &mut self,
        id: SimNodeId,
        prefix: Ipv6Prefix,
        flags: PrefixFlags,
    ) -> MeshResult<DataVersion> {
        self.node_mut(id)?.add_prefix_and_publish(prefix, flags)
    }

    pub fn remove_prefix(&mut self, id: SimNodeId, prefix: Ipv6Prefix) -> MeshResult<DataVersion> {
        self.node_mut(id)?.remove_prefix_and_publish(prefix)
    }

    pub fn get_state(&self, id: SimNodeId) -> MeshResult<AttachState> {
        self.node(id).map(Node::get_state)
    }

    pub fn get_configured_addresses(&self, id: SimNodeId) -> MeshResult<Vec<MeshAddress>> {
        self.node(id).map(Node::configured_addresses)
    }

    pub fn version(&self, id: SimNodeId) -> MeshResult<DataVersion> {
        self.node(id).map(Node::version)
    }

    /// Advance simulated time
    pub fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Advance until nothing is in flight; returns ticks used, or `None`
    /// if traffic was still moving after `max_ticks`
    pub fn settle(&mut self, max_ticks: u64) -> Option<u64> {
        for used in 1..=max_ticks {
            self.step();
            if self.in_flight.is_empty() {
                return Some(used);
            }
        }
        None
    }

    fn step(&mut self) {
        self.now += 1;
        let now = self.now;

        // Deliver due frames in send order
        let (due, pending): (Vec<InFlight>, Vec<InFlight>) =
            std::mem::take(&mut self.in_flight)
                .into_iter()
                .partition(|f| f.due <= now);
        self.in_flight = pending;
        for frame in due {
            if let Some(dest) = self.nodes.get_mut(&frame.to) {
                if dest.node.queue_incoming(&frame.data) {
                    self.stats.frames_delivered += 1;
                }
            }
        }

        for n in self.nodes.values_mut() {
            n.node.tick(now);
        }

        // Put queued frames on the wire
        let mut sent = Vec::new();
        for (&id, n) in self.nodes.iter_mut() {
            while let Some(out) = n.node.pop_outgoing() {
                match out.frame.serialize() {
                    Ok(data) => sent.push((id, out.to, data)),
                    Err(e) => warn!(sim_id = id, error = %e, "frame not encodable"),
                }
            }
        }
        for (from, to_hw, data) in sent {
            let Some(&to) = self.by_hw.get(&to_hw) else {
                self.stats.frames_unroutable += 1;
                continue;
            };
            let latency = self
                .latency
                .get(&edge(from, to))
                .copied()
                .unwrap_or(self.config.default_latency_ticks)
                .max(1);
            self.stats.frames_sent += 1;
            self.stats.bytes_sent += data.len() as u64;
            self.in_flight.push(InFlight {
                due: now + latency,
                from,
                to,
                data,
            });
        }
    }

    /// Links usable right now: both ends attached, both directions admissible
    pub fn reachability(&self) -> ReachabilityGraph {
        let mut graph = ReachabilityGraph::new();
        for &(a, b) in self.latency.keys() {
            let (Some(na), Some(nb)) = (self.nodes.get(&a), self.nodes.get(&b)) else {
                continue;
            };
            if na.node.is_started()
                && nb.node.is_started()
                && na.node.is_admissible(nb.hw)
                && nb.node.is_admissible(na.hw)
            {
                graph.connect(a, b);
            }
        }
        graph
    }

    /// Which attached node holds `addr`
    pub fn owner_of(&self, addr: Ipv6Addr) -> Option<SimNodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.node.is_started() && n.node.has_address(addr))
            .map(|(id, _)| *id)
    }

    pub fn echo_detail(&self, from: SimNodeId, addr: Ipv6Addr) -> EchoResult {
        self.reachability().echo(from, self.owner_of(addr))
    }

    /// Ping `addr` from node `from`
    pub fn echo(&self, from: SimNodeId, addr: Ipv6Addr) -> bool {
        match self.nodes.get(&from) {
            Some(n) if n.node.is_started() => self.echo_detail(from, addr).is_reply(),
            _ => false,
        }
    }

    /// Versions of every attached node
    pub fn versions(&self) -> BTreeMap<SimNodeId, DataVersion> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.node.is_started())
            .map(|(id, n)| (*id, n.node.version()))
            .collect()
    }

    /// All attached nodes hold `version`
    pub fn converged_at(&self, version: DataVersion) -> bool {
        self.versions().values().all(|v| *v == version)
    }

    /// Distinct frames still in flight, by (from, to)
    pub fn in_flight_links(&self) -> BTreeSet<(SimNodeId, SimNodeId)> {
        self.in_flight.iter().map(|f| (f.from, f.to)).collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }
}
