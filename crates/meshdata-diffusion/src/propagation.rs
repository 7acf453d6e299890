//! Propagation - how network data flows hop by hop
//!
//! Rules for an inbound delta, checked against the local version:
//! - `to <= local`: duplicate or stale, discarded. If the sender is strictly
//!   behind, it gets our latest delta back once.
//! - `from == local`: contiguous, applied and re-forwarded to every
//!   admissible neighbor except the sender. Leaves apply without
//!   re-forwarding.
//! - otherwise: a version was missed, so a snapshot is requested from the
//!   sender and adopted wholesale when it arrives.
//!
//! A link that becomes admissible again gets one push of the current
//! version. Nothing else triggers retransmission.

use meshdata_core::{DataVersion, MeshError, NodeId};
use meshdata_state::{DatasetStore, Delta, NetworkData};
use meshdata_wire::{Frame, Message};
use tracing::{debug, warn};

use crate::{LinkSupervisor, Role};

/// Message queued for a direct neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: NodeId,
    pub message: Message,
}

impl Outbound {
    pub fn new(to: NodeId, message: Message) -> Self {
        Self { to, message }
    }
}

/// Propagation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationStats {
    pub deltas_sent: u64,
    pub deltas_applied: u64,
    pub deltas_discarded: u64,
    pub gaps_detected: u64,
    pub snapshots_requested: u64,
    pub snapshots_served: u64,
    pub snapshots_adopted: u64,
    /// Latest delta returned to a lagging sender
    pub repairs_sent: u64,
    /// Frames refused because the link was not admissible
    pub frames_dropped: u64,
}

impl PropagationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outbound(&mut self, out: &[Outbound]) {
        for o in out {
            match o.message {
                Message::Delta(_) => self.deltas_sent += 1,
                Message::SnapshotRequest { .. } => self.snapshots_requested += 1,
                Message::Snapshot(_) => self.snapshots_served += 1,
            }
        }
    }

    pub fn record_drop(&mut self) {
        self.frames_dropped += 1;
    }
}

/// Per-node propagation engine
#[derive(Debug, Clone)]
pub struct PropagationEngine {
    owner: NodeId,
    role: Role,
    stats: PropagationStats,
}

impl PropagationEngine {
    pub fn new(owner: NodeId, role: Role) -> Self {
        Self {
            owner,
            role,
            stats: PropagationStats::new(),
        }
    }

    pub fn stats(&self) -> &PropagationStats {
        &self.stats
    }

    /// Fan a delta out to admissible neighbors, skipping `except`
    fn fan_out(
        &self,
        delta: &Delta,
        links: &LinkSupervisor,
        except: Option<NodeId>,
    ) -> Vec<Outbound> {
        links
            .admissible_except(except)
            .into_iter()
            .map(|to| Outbound::new(to, Message::Delta(delta.clone())))
            .collect()
    }

    fn finish(&mut self, out: Vec<Outbound>) -> Vec<Outbound> {
        self.stats.record_outbound(&out);
        out
    }

    /// Re-forward data received from `sender`; leaves keep it to themselves
    fn relay(&self, delta: &Delta, links: &LinkSupervisor, sender: NodeId) -> Vec<Outbound> {
        if !self.role.forwards() {
            return Vec::new();
        }
        self.fan_out(delta, links, Some(sender))
    }

    /// The authority committed a change: push it to every admissible neighbor
    pub fn on_local_change(
        &mut self,
        store: &DatasetStore,
        links: &LinkSupervisor,
    ) -> Vec<Outbound> {
        let Some(delta) = store.last_delta() else {
            return Vec::new();
        };
        if delta.to_version != store.version() {
            return Vec::new();
        }
        let out = self.fan_out(delta, links, None);
        debug!(
            node = %self.owner,
            version = %store.version(),
            targets = out.len(),
            "pushing local change"
        );
        self.finish(out)
    }

    /// A neighbor just became admissible: push the current version once
    pub fn on_link_restored(
        &mut self,
        neighbor: NodeId,
        store: &DatasetStore,
        links: &LinkSupervisor,
    ) -> Vec<Outbound> {
        if !links.is_admissible(neighbor) {
            return Vec::new();
        }
        let message = match store.last_delta() {
            Some(delta) => Message::Delta(delta.clone()),
            None => Message::SnapshotRequest {
                have: store.version(),
            },
        };
        debug!(
            node = %self.owner,
            %neighbor,
            version = %store.version(),
            "re-sync after link restore"
        );
        self.finish(vec![Outbound::new(neighbor, message)])
    }

    /// Handle one inbound frame
    pub fn on_frame(
        &mut self,
        frame: &Frame,
        store: &mut DatasetStore,
        links: &LinkSupervisor,
    ) -> Vec<Outbound> {
        let sender = frame.sender();
        if !links.is_admissible(sender) {
            debug!(node = %self.owner, %sender, "dropping frame from inadmissible neighbor");
            self.stats.record_drop();
            return Vec::new();
        }

        let out = match &frame.message {
            Message::Delta(delta) => self.on_delta(sender, delta, store, links),
            Message::SnapshotRequest { have } => {
                self.on_snapshot_request(sender, *have, store)
            }
            Message::Snapshot(data) => self.on_snapshot(sender, data, store, links),
        };
        self.finish(out)
    }

    fn on_delta(
        &mut self,
        sender: NodeId,
        delta: &Delta,
        store: &mut DatasetStore,
        links: &LinkSupervisor,
    ) -> Vec<Outbound> {
        if store.is_authority() && delta.to_version > store.version() {
            warn!(
                node = %self.owner,
                %sender,
                incoming = %delta.to_version,
                local = %store.version(),
                "authority ignoring newer network data from another lineage"
            );
            self.stats.deltas_discarded += 1;
            return Vec::new();
        }

        match store.apply_delta(delta) {
            Ok(version) => {
                self.stats.deltas_applied += 1;
                debug!(node = %self.owner, %sender, %version, "delta applied");
                self.relay(delta, links, sender)
            }
            Err(MeshError::StaleDelta { to, local }) => {
                self.stats.deltas_discarded += 1;
                debug!(
                    node = %self.owner,
                    %sender,
                    to = %to,
                    local = %local,
                    "stale delta discarded"
                );
                self.repair_lagging(sender, to, store)
            }
            Err(MeshError::GapDetected { from, local }) => {
                self.stats.gaps_detected += 1;
                debug!(
                    node = %self.owner,
                    %sender,
                    from = %from,
                    local = %local,
                    "gap detected, requesting snapshot"
                );
                vec![Outbound::new(sender, Message::SnapshotRequest { have: local })]
            }
            Err(e) => {
                warn!(node = %self.owner, %sender, error = %e, "delta rejected");
                Vec::new()
            }
        }
    }

    /// A delta older than ours means the sender is behind
    fn repair_lagging(
        &mut self,
        sender: NodeId,
        their: DataVersion,
        store: &DatasetStore,
    ) -> Vec<Outbound> {
        if their >= store.version() {
            return Vec::new();
        }
        let Some(delta) = store.last_delta() else {
            return Vec::new();
        };
        self.stats.repairs_sent += 1;
        debug!(
            node = %self.owner,
            %sender,
            their = %their,
            ours = %store.version(),
            "repairing lagging neighbor"
        );
        vec![Outbound::new(sender, Message::Delta(delta.clone()))]
    }

    fn on_snapshot_request(
        &mut self,
        sender: NodeId,
        have: DataVersion,
        store: &DatasetStore,
    ) -> Vec<Outbound> {
        if store.version() <= have {
            debug!(node = %self.owner, %sender, have = %have, "snapshot request needs nothing");
            return Vec::new();
        }
        debug!(node = %self.owner, %sender, version = %store.version(), "serving snapshot");
        vec![Outbound::new(sender, Message::Snapshot(store.snapshot()))]
    }

    fn on_snapshot(
        &mut self,
        sender: NodeId,
        data: &NetworkData,
        store: &mut DatasetStore,
        links: &LinkSupervisor,
    ) -> Vec<Outbound> {
        if store.is_authority() {
            debug!(node = %self.owner, %sender, "authority ignoring snapshot");
            return Vec::new();
        }
        if !store.merge_remote(data.clone()) {
            return Vec::new();
        }
        self.stats.snapshots_adopted += 1;

        match store.last_delta() {
            Some(jump) => self.relay(jump, links, sender),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdata_core::{ContextId, Ipv6Prefix};
    use meshdata_state::LocalChange;

    fn prefix(s: &str) -> Ipv6Prefix {
        s.parse().unwrap()
    }

    fn publish(store: &mut DatasetStore, p: &str, ctx: u8) {
        store
            .apply_local_change(LocalChange::AddPrefix {
                prefix: prefix(p),
                flags: "paros".parse().unwrap(),
                context: ContextId::new(ctx),
            })
            .unwrap();
    }

    fn linked(owner: u64, peers: &[u64]) -> LinkSupervisor {
        let mut links = LinkSupervisor::new(NodeId::new(owner));
        for &p in peers {
            links.add_neighbor(NodeId::new(p));
            links.set_admissible(NodeId::new(p), true);
        }
        links
    }

    fn frame(from: u64, message: Message) -> Frame {
        Frame::new(NodeId::new(from), message)
    }

    #[test]
    fn test_local_change_fans_out() {
        let mut store = DatasetStore::new(NodeId::new(1), true);
        let links = linked(1, &[2, 3]);
        let mut engine = PropagationEngine::new(NodeId::new(1), Role::Authority);

        publish(&mut store, "2001:2:0:1::/64", 1);
        let out = engine.on_local_change(&store, &links);
        assert_eq!(out.len(), 2);
        assert_eq!(engine.stats().deltas_sent, 2);
    }

    #[test]
    fn test_relay_forwards_except_sender() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        publish(&mut leader, "2001:2:0:1::/64", 1);
        let delta = leader.last_delta().cloned().unwrap();

        let mut relay = DatasetStore::new(NodeId::new(2), false);
        let links = linked(2, &[1, 3, 4]);
        let mut engine = PropagationEngine::new(NodeId::new(2), Role::Relay);

        let inbound = frame(1, Message::Delta(delta.clone()));
        let out = engine.on_frame(&inbound, &mut relay, &links);
        let targets: Vec<_> = out.iter().map(|o| o.to).collect();
        assert_eq!(targets, vec![NodeId::new(3), NodeId::new(4)]);

        // Duplicate from another path is absorbed silently
        let out = engine.on_frame(&frame(3, Message::Delta(delta)), &mut relay, &links);
        assert!(out.is_empty());
        assert_eq!(engine.stats().deltas_discarded, 1);
    }

    #[test]
    fn test_gap_requests_snapshot_and_jump_is_forwarded() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        publish(&mut leader, "2001:2:0:1::/64", 1);
        publish(&mut leader, "2001:2:0:2::/64", 2);
        let d2 = leader.last_delta().cloned().unwrap();

        let mut child = DatasetStore::new(NodeId::new(2), false);
        let links = linked(2, &[1, 3]);
        let mut engine = PropagationEngine::new(NodeId::new(2), Role::Relay);

        let out = engine.on_frame(&frame(1, Message::Delta(d2)), &mut child, &links);
        assert_eq!(
            out,
            vec![Outbound::new(
                NodeId::new(1),
                Message::SnapshotRequest { have: DataVersion::INITIAL }
            )]
        );

        let snapshot = frame(1, Message::Snapshot(leader.snapshot()));
        let out = engine.on_frame(&snapshot, &mut child, &links);
        assert_eq!(child.data(), leader.data());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, NodeId::new(3));
        match &out[0].message {
            Message::Delta(jump) => {
                assert_eq!(jump.from_version, DataVersion::INITIAL);
                assert_eq!(jump.to_version, DataVersion::new(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_leaf_applies_without_forwarding() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        publish(&mut leader, "2001:2:0:1::/64", 1);
        let d1 = leader.last_delta().cloned().unwrap();
        publish(&mut leader, "2001:2:0:2::/64", 2);

        let mut leaf = DatasetStore::new(NodeId::new(2), false);
        let links = linked(2, &[1, 3]);
        let mut engine = PropagationEngine::new(NodeId::new(2), Role::Leaf);

        assert!(engine.on_frame(&frame(1, Message::Delta(d1)), &mut leaf, &links).is_empty());
        assert_eq!(leaf.version(), DataVersion::new(1));

        let snapshot = frame(1, Message::Snapshot(leader.snapshot()));
        assert!(engine.on_frame(&snapshot, &mut leaf, &links).is_empty());
        assert_eq!(leaf.version(), DataVersion::new(2));
        assert_eq!(engine.stats().deltas_sent, 0);
    }

    #[test]
    fn test_snapshot_request_served_only_when_newer() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        publish(&mut leader, "2001:2:0:1::/64", 1);
        let links = linked(1, &[2]);
        let mut engine = PropagationEngine::new(NodeId::new(1), Role::Authority);

        let req = |have| {
            let have = DataVersion::new(have);
            frame(2, Message::SnapshotRequest { have })
        };
        assert_eq!(engine.on_frame(&req(0), &mut leader, &links).len(), 1);
        assert!(engine.on_frame(&req(1), &mut leader, &links).is_empty());
        assert_eq!(engine.stats().snapshots_served, 1);
    }

    #[test]
    fn test_lagging_sender_gets_repair() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        publish(&mut leader, "2001:2:0:1::/64", 1);
        let d1 = leader.last_delta().cloned().unwrap();
        publish(&mut leader, "2001:2:0:2::/64", 2);
        let d2 = leader.last_delta().cloned().unwrap();

        let links = linked(1, &[2]);
        let mut engine = PropagationEngine::new(NodeId::new(1), Role::Authority);

        let out = engine.on_frame(&frame(2, Message::Delta(d1)), &mut leader, &links);
        let repair = Outbound::new(NodeId::new(2), Message::Delta(d2.clone()));
        assert_eq!(out, vec![repair]);

        // Same version is a duplicate, not a lagging sender
        let out = engine.on_frame(&frame(2, Message::Delta(d2)), &mut leader, &links);
        assert!(out.is_empty());
        assert_eq!(engine.stats().repairs_sent, 1);
    }

    #[test]
    fn test_inadmissible_sender_dropped() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        publish(&mut leader, "2001:2:0:1::/64", 1);
        let d1 = leader.last_delta().cloned().unwrap();

        let mut child = DatasetStore::new(NodeId::new(2), false);
        let mut links = linked(2, &[1]);
        links.set_admissible(NodeId::new(1), false);
        let mut engine = PropagationEngine::new(NodeId::new(2), Role::Relay);

        let inbound = frame(1, Message::Delta(d1));
        assert!(engine.on_frame(&inbound, &mut child, &links).is_empty());
        assert_eq!(child.version(), DataVersion::INITIAL);
        assert_eq!(engine.stats().frames_dropped, 1);
    }

    #[test]
    fn test_link_restore_pushes_once() {
        let mut leader = DatasetStore::new(NodeId::new(1), true);
        let links = linked(1, &[2]);
        let mut engine = PropagationEngine::new(NodeId::new(1), Role::Authority);

        // Nothing published yet: pull instead of push
        let out = engine.on_link_restored(NodeId::new(2), &leader, &links);
        assert!(matches!(out[0].message, Message::SnapshotRequest { .. }));

        publish(&mut leader, "2001:2:0:1::/64", 1);
        let out = engine.on_link_restored(NodeId::new(2), &leader, &links);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].message, Message::Delta(_)));
    }

    #[test]
    fn test_authority_ignores_foreign_data() {
        let mut other = DatasetStore::new(NodeId::new(9), true);
        publish(&mut other, "2001:9::/64", 1);
        let foreign = other.last_delta().cloned().unwrap();

        let mut leader = DatasetStore::new(NodeId::new(1), true);
        let links = linked(1, &[9]);
        let mut engine = PropagationEngine::new(NodeId::new(1), Role::Authority);

        let delta = frame(9, Message::Delta(foreign));
        assert!(engine.on_frame(&delta, &mut leader, &links).is_empty());
        let snapshot = frame(9, Message::Snapshot(other.snapshot()));
        assert!(engine.on_frame(&snapshot, &mut leader, &links).is_empty());
        assert_eq!(leader.version(), DataVersion::INITIAL);
    }
}
