//! MESHDATA State Engine - network data store and context allocation
//!
//! This crate implements the versioned side of the protocol:
//! - Network data (prefixes + contexts) with a monotonically increasing version
//! - Authority-only local changes
//! - Delta and snapshot merge with stale/gap detection
//! - Change notifications for downstream consumers
//! - Context id allocation with a reuse delay

pub mod allocator;
pub mod dataset;

pub use allocator::*;
pub use dataset::*;

#[cfg(test)]
mod tests {
    use super::*;
    use meshdata_core::{ContextId, DataVersion, Ipv6Prefix, NodeId};
    use proptest::prelude::*;

    fn prefix(n: u8) -> Ipv6Prefix {
        Ipv6Prefix::new((0x2001_0002_0000_0000u128 | n as u128) << 64, 64).unwrap()
    }

    proptest! {
        /// Merging any delta or snapshot a second time changes nothing
        #[test]
        fn prop_merge_is_idempotent(
            ops in proptest::collection::vec((any::<bool>(), 0u8..6), 1..30),
        ) {
            let mut leader = DatasetStore::new(NodeId::new(1), true);
            let mut alloc = ContextAllocator::new(AllocatorConfig::default().with_reuse_delay(0));
            let mut deltas = Vec::new();

            for (add, n) in ops {
                let before = leader.version();
                let result = if add {
                    let context = alloc.allocate(prefix(n)).unwrap();
                    leader.apply_local_change(LocalChange::AddPrefix {
                        prefix: prefix(n),
                        flags: "paos".parse().unwrap(),
                        context,
                    })
                } else {
                    leader.apply_local_change(LocalChange::RemovePrefix(prefix(n)))
                };
                for change in leader.take_notifications() {
                    alloc.observe(&change);
                }
                alloc.expire(0);
                if result.is_ok() && leader.version() > before {
                    deltas.push(leader.last_delta().cloned().unwrap());
                }
            }

            let mut by_delta = DatasetStore::new(NodeId::new(2), false);
            for delta in &deltas {
                by_delta.apply_delta(delta).unwrap();
                let once = by_delta.data().clone();
                prop_assert!(by_delta.apply_delta(delta).is_err());
                prop_assert_eq!(by_delta.data(), &once);
            }
            prop_assert_eq!(by_delta.data(), leader.data());

            let mut by_snapshot = DatasetStore::new(NodeId::new(3), false);
            let applied = by_snapshot.merge_remote(leader.snapshot());
            prop_assert_eq!(applied, leader.version() > DataVersion::INITIAL);
            prop_assert!(!by_snapshot.merge_remote(leader.snapshot()));
            prop_assert_eq!(by_snapshot.data(), leader.data());

            let mut ids = std::collections::HashSet::new();
            for ctx in leader.data().contexts() {
                prop_assert!(ids.insert(ctx.prefix));
                prop_assert!(ctx.id != ContextId::new(0));
            }
        }
    }
}
