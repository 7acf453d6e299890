//! Network data - versioned prefix and context sets
//!
//! The store is owned by exactly one node. It changes only through the
//! authority's local API or by merging a delta or snapshot received from a
//! neighbor.

use std::collections::{BTreeMap, VecDeque};

use meshdata_core::{
    ContextEntry, ContextId, DataVersion, Ipv6Prefix, MeshError, MeshResult, NodeId, PrefixEntry,
    PrefixFlags,
};
use tracing::{debug, info};

/// Full network data set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkData {
    pub version: DataVersion,
    prefixes: BTreeMap<Ipv6Prefix, PrefixEntry>,
    contexts: BTreeMap<ContextId, ContextEntry>,
}

impl NetworkData {
    pub fn new() -> Self {
        NetworkData::default()
    }

    pub fn from_parts(
        version: DataVersion,
        prefixes: impl IntoIterator<Item = PrefixEntry>,
        contexts: impl IntoIterator<Item = ContextEntry>,
    ) -> Self {
        NetworkData {
            version,
            prefixes: prefixes.into_iter().map(|p| (p.prefix, p)).collect(),
            contexts: contexts.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn prefix(&self, prefix: &Ipv6Prefix) -> Option<&PrefixEntry> {
        self.prefixes.get(prefix)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &PrefixEntry> {
        self.prefixes.values()
    }

    pub fn context(&self, id: ContextId) -> Option<&ContextEntry> {
        self.contexts.get(&id)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ContextEntry> {
        self.contexts.values()
    }

    /// Context currently bound to a prefix
    pub fn context_for(&self, prefix: &Ipv6Prefix) -> Option<&ContextEntry> {
        self.contexts.values().find(|c| &c.prefix == prefix)
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.contexts.is_empty()
    }

    /// Apply the entry changes of a delta (version is handled by the caller)
    fn apply_entries(&mut self, delta: &Delta) {
        for id in &delta.contexts_removed {
            self.contexts.remove(id);
        }
        for prefix in &delta.prefixes_removed {
            self.prefixes.remove(prefix);
        }
        for entry in &delta.prefixes_added {
            self.prefixes.insert(entry.prefix, *entry);
        }
        for context in &delta.contexts_added {
            self.contexts.insert(context.id, *context);
        }
    }
}

/// Incremental change between two versions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub from_version: DataVersion,
    pub to_version: DataVersion,
    /// New or updated prefix entries
    pub prefixes_added: Vec<PrefixEntry>,
    pub prefixes_removed: Vec<Ipv6Prefix>,
    /// New or updated contexts
    pub contexts_added: Vec<ContextEntry>,
    pub contexts_removed: Vec<ContextId>,
}

impl Delta {
    /// Delta that turns `old` into `new`
    pub fn between(old: &NetworkData, new: &NetworkData) -> Self {
        let prefixes_added = new
            .prefixes
            .values()
            .filter(|p| old.prefixes.get(&p.prefix) != Some(*p))
            .copied()
            .collect();
        let prefixes_removed = old
            .prefixes
            .keys()
            .filter(|p| !new.prefixes.contains_key(*p))
            .copied()
            .collect();
        let contexts_added = new
            .contexts
            .values()
            .filter(|c| old.contexts.get(&c.id) != Some(*c))
            .copied()
            .collect();
        let contexts_removed = old
            .contexts
            .keys()
            .filter(|id| !new.contexts.contains_key(*id))
            .copied()
            .collect();

        Delta {
            from_version: old.version,
            to_version: new.version,
            prefixes_added,
            prefixes_removed,
            contexts_added,
            contexts_removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes_added.is_empty()
            && self.prefixes_removed.is_empty()
            && self.contexts_added.is_empty()
            && self.contexts_removed.is_empty()
    }
}

/// Mutation issued by the authority
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalChange {
    /// Publish (or widen the flags of) a prefix under an allocated context
    AddPrefix {
        prefix: Ipv6Prefix,
        flags: PrefixFlags,
        context: ContextId,
    },
    RemovePrefix(Ipv6Prefix),
}

/// Change notification emitted after every version change
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetChanged {
    pub from: DataVersion,
    pub to: DataVersion,
    pub contexts_added: Vec<ContextEntry>,
    pub contexts_removed: Vec<ContextId>,
}

impl DatasetChanged {
    fn from_delta(delta: &Delta) -> Self {
        DatasetChanged {
            from: delta.from_version,
            to: delta.to_version,
            contexts_added: delta.contexts_added.clone(),
            contexts_removed: delta.contexts_removed.clone(),
        }
    }
}

/// Per-node network data store
#[derive(Debug)]
pub struct DatasetStore {
    owner: NodeId,
    authority: bool,
    data: NetworkData,
    /// Most recent delta applied or authored (re-sync push content)
    last_delta: Option<Delta>,
    notifications: VecDeque<DatasetChanged>,
}

impl DatasetStore {
    pub fn new(owner: NodeId, authority: bool) -> Self {
        DatasetStore {
            owner,
            authority,
            data: NetworkData::new(),
            last_delta: None,
            notifications: VecDeque::new(),
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn is_authority(&self) -> bool {
        self.authority
    }

    pub fn set_authority(&mut self, authority: bool) {
        self.authority = authority;
    }

    pub fn version(&self) -> DataVersion {
        self.data.version
    }

    pub fn data(&self) -> &NetworkData {
        &self.data
    }

    /// Full copy for snapshot transfer
    pub fn snapshot(&self) -> NetworkData {
        self.data.clone()
    }

    pub fn last_delta(&self) -> Option<&Delta> {
        self.last_delta.as_ref()
    }

    /// Drain pending change notifications
    pub fn take_notifications(&mut self) -> Vec<DatasetChanged> {
        self.notifications.drain(..).collect()
    }

    /// Authority-only mutation; bumps the version by exactly one.
    ///
    /// Re-adding a prefix with flags it already carries is not a mutation
    /// and returns the current version.
    pub fn apply_local_change(&mut self, change: LocalChange) -> MeshResult<DataVersion> {
        if !self.authority {
            return Err(MeshError::NotAuthority(self.owner));
        }

        let mut next = self.data.clone();
        match change {
            LocalChange::AddPrefix {
                prefix,
                flags,
                context,
            } => {
                let merged = match self.data.prefix(&prefix) {
                    Some(existing) => existing.flags.merge(flags),
                    None => flags,
                };
                let entry = PrefixEntry::new(prefix, merged, self.owner);
                let ctx = ContextEntry::new(context, prefix);
                let unchanged = self.data.prefix(&prefix) == Some(&entry)
                    && self.data.context(context) == Some(&ctx);
                if unchanged {
                    return Ok(self.data.version);
                }
                next.prefixes.insert(prefix, entry);
                next.contexts.retain(|id, c| c.prefix != prefix || *id == context);
                next.contexts.insert(context, ctx);
            }
            LocalChange::RemovePrefix(prefix) => {
                if next.prefixes.remove(&prefix).is_none() {
                    return Err(MeshError::UnknownPrefix(prefix.to_string()));
                }
                next.contexts.retain(|_, c| c.prefix != prefix);
            }
        }
        next.version = self.data.version.next();

        let delta = Delta::between(&self.data, &next);
        info!(node = %self.owner, version = %next.version, "network data published");
        self.commit(next, delta);
        Ok(self.data.version)
    }

    /// Adopt a full snapshot iff it is newer than the local copy
    pub fn merge_remote(&mut self, incoming: NetworkData) -> bool {
        if incoming.version <= self.data.version {
            debug!(
                node = %self.owner,
                local = %self.data.version,
                incoming = %incoming.version,
                "ignoring stale snapshot"
            );
            return false;
        }

        let delta = Delta::between(&self.data, &incoming);
        info!(
            node = %self.owner,
            from = %self.data.version,
            to = %incoming.version,
            "adopted network data snapshot"
        );
        self.commit(incoming, delta);
        true
    }

    /// Apply a contiguous delta.
    ///
    /// Returns `StaleDelta` for duplicates and old deltas, `GapDetected` when
    /// the delta does not start at the local version.
    pub fn apply_delta(&mut self, delta: &Delta) -> MeshResult<DataVersion> {
        let local = self.data.version;
        if delta.to_version <= local {
            return Err(MeshError::StaleDelta {
                to: delta.to_version,
                local,
            });
        }
        if delta.from_version != local {
            return Err(MeshError::GapDetected {
                from: delta.from_version,
                local,
            });
        }

        let mut next = self.data.clone();
        next.apply_entries(delta);
        next.version = delta.to_version;
        debug!(node = %self.owner, from = %local, to = %next.version, "applied delta");
        self.commit(next, delta.clone());
        Ok(self.data.version)
    }

    /// Forget everything (restart or detach)
    pub fn reset(&mut self) {
        let empty = NetworkData::new();
        let delta = Delta::between(&self.data, &empty);
        self.data = empty;
        self.last_delta = None;
        if !delta.is_empty() {
            self.notifications.push_back(DatasetChanged::from_delta(&delta));
        }
    }

    fn commit(&mut self, next: NetworkData, delta: Delta) {
        self.notifications.push_back(DatasetChanged::from_delta(&delta));
        self.data = next;
        self.last_delta = Some(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> Ipv6Prefix {
        s.parse().unwrap()
    }

    fn add(p: &str, flags: &str, ctx: u8) -> LocalChange {
        LocalChange::AddPrefix {
            prefix: prefix(p),
            flags: flags.parse().unwrap(),
            context: ContextId::new(ctx),
        }
    }

    fn leader() -> DatasetStore {
        DatasetStore::new(NodeId::new(1), true)
    }

    #[test]
    fn test_local_change_bumps_version_by_one() {
        let mut store = leader();
        let v1 = store.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap();
        let v2 = store.apply_local_change(add("2001:2:0:2::/64", "paros", 2)).unwrap();
        assert_eq!(v1, DataVersion::new(1));
        assert_eq!(v2, DataVersion::new(2));
        assert_eq!(store.data().prefix_count(), 2);
        assert_eq!(store.data().context_count(), 2);
    }

    #[test]
    fn test_local_change_requires_authority() {
        let mut store = DatasetStore::new(NodeId::new(2), false);
        let err = store.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap_err();
        assert_eq!(err, MeshError::NotAuthority(NodeId::new(2)));
        assert_eq!(store.version(), DataVersion::INITIAL);
    }

    #[test]
    fn test_identical_add_is_not_a_mutation() {
        let mut store = leader();
        store.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap();
        store.take_notifications();

        let v = store.apply_local_change(add("2001:2:0:1::/64", "pa", 1)).unwrap();
        assert_eq!(v, DataVersion::new(1));
        assert!(store.take_notifications().is_empty());
    }

    #[test]
    fn test_flag_variant_merges_into_one_entry() {
        let mut store = leader();
        store.apply_local_change(add("2001:2:0:1::/64", "po", 1)).unwrap();
        let v = store.apply_local_change(add("2001:2:0:1::/64", "as", 1)).unwrap();

        assert_eq!(v, DataVersion::new(2));
        assert_eq!(store.data().prefix_count(), 1);
        let entry = store.data().prefix(&prefix("2001:2:0:1::/64")).unwrap();
        assert_eq!(entry.flags.to_string(), "paos");
    }

    #[test]
    fn test_remove_prefix_drops_context() {
        let mut store = leader();
        store.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap();
        store.take_notifications();

        store.apply_local_change(LocalChange::RemovePrefix(prefix("2001:2:0:1::/64"))).unwrap();
        assert!(store.data().is_empty());

        let notes = store.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].contexts_removed, vec![ContextId::new(1)]);
    }

    #[test]
    fn test_remove_unknown_prefix_fails() {
        let mut store = leader();
        let err = store
            .apply_local_change(LocalChange::RemovePrefix(prefix("2001:2:0:9::/64")))
            .unwrap_err();
        assert!(matches!(err, MeshError::UnknownPrefix(_)));
        assert_eq!(store.version(), DataVersion::INITIAL);
    }

    #[test]
    fn test_apply_delta_contiguous_stale_and_gap() {
        let mut leader = leader();
        leader.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap();
        let d1 = leader.last_delta().cloned().unwrap();
        leader.apply_local_change(add("2001:2:0:2::/64", "paros", 2)).unwrap();
        let d2 = leader.last_delta().cloned().unwrap();

        let mut child = DatasetStore::new(NodeId::new(2), false);
        assert!(matches!(child.apply_delta(&d2), Err(MeshError::GapDetected { .. })));
        assert_eq!(child.apply_delta(&d1).unwrap(), DataVersion::new(1));
        assert!(matches!(child.apply_delta(&d1), Err(MeshError::StaleDelta { .. })));
        assert_eq!(child.apply_delta(&d2).unwrap(), DataVersion::new(2));
        assert_eq!(child.data(), leader.data());
    }

    #[test]
    fn test_merge_remote_only_newer() {
        let mut leader = leader();
        leader.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap();
        leader.apply_local_change(add("2001:2:0:2::/64", "paros", 2)).unwrap();

        let mut child = DatasetStore::new(NodeId::new(2), false);
        assert!(child.merge_remote(leader.snapshot()));
        assert!(!child.merge_remote(leader.snapshot()));
        assert_eq!(child.version(), DataVersion::new(2));

        let jump = child.last_delta().unwrap();
        assert_eq!(jump.from_version, DataVersion::INITIAL);
        assert_eq!(jump.to_version, DataVersion::new(2));
        assert_eq!(jump.contexts_added.len(), 2);
    }

    #[test]
    fn test_delta_between_round_trips() {
        let old = NetworkData::from_parts(
            DataVersion::new(1),
            [PrefixEntry::new(prefix("2001:2:0:1::/64"), "paros".parse().unwrap(), NodeId::new(1))],
            [ContextEntry::new(ContextId::new(1), prefix("2001:2:0:1::/64"))],
        );
        let new = NetworkData::from_parts(
            DataVersion::new(3),
            [PrefixEntry::new(prefix("2001:2:0:2::/64"), "paros".parse().unwrap(), NodeId::new(1))],
            [ContextEntry::new(ContextId::new(2), prefix("2001:2:0:2::/64"))],
        );

        let delta = Delta::between(&old, &new);
        let mut patched = old.clone();
        patched.apply_entries(&delta);
        patched.version = delta.to_version;
        assert_eq!(patched, new);
    }

    #[test]
    fn test_reset_notifies_removal() {
        let mut store = leader();
        store.apply_local_change(add("2001:2:0:1::/64", "paros", 1)).unwrap();
        store.take_notifications();

        store.reset();
        assert_eq!(store.version(), DataVersion::INITIAL);
        assert!(store.last_delta().is_none());
        let notes = store.take_notifications();
        assert_eq!(notes[0].contexts_removed, vec![ContextId::new(1)]);
    }
}
