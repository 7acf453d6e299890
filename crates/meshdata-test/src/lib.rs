//! MESHDATA Test Harness - mesh simulation and protocol validation
//!
//! This crate provides:
//! - A deterministic multi-node mesh simulator
//! - Echo-based reachability checks
//! - The leader / end device certification scenario
//! - Log setup for tests and benches

pub mod logging;
pub mod reachability;
pub mod scenario;
pub mod simulator;

pub use logging::*;
pub use reachability::*;
pub use scenario::*;
pub use simulator::*;

#[cfg(test)]
mod tests {
    use super::*;
    use meshdata_core::{Ipv6Prefix, PrefixFlags};
    use meshdata_diffusion::{AddressConfigurator, Role};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn prefix(n: u8) -> Ipv6Prefix {
        Ipv6Prefix::new((0x2001_0002_0000_0000u128 | n as u128) << 64, 64).unwrap()
    }

    fn flags(n: u8) -> PrefixFlags {
        ["paros", "pros", "aos", "paros"][n as usize % 4].parse().unwrap()
    }

    proptest! {
        /// After any sequence of publishes every node holds exactly the
        /// addresses derivable from the leader's data, and all of them answer
        #[test]
        fn prop_addresses_match_leader_data(
            ops in proptest::collection::vec((any::<bool>(), 0u8..6, 0u8..4, 0u64..3), 1..20),
            seed in 0u64..1000,
        ) {
            let mut sim = MeshSimulator::with_seed(seed);
            sim.add_node(1, Role::Authority).unwrap();
            sim.add_node(2, Role::Relay).unwrap();
            sim.add_node(3, Role::Leaf).unwrap();
            sim.link(1, 2).unwrap();
            sim.link(2, 3).unwrap();
            sim.start_all();

            for (add, n, f, gap) in ops {
                // Errors (unknown prefix, exhausted ids) leave the data unchanged
                let _ = if add {
                    sim.add_prefix(1, prefix(n), flags(f))
                } else {
                    sim.remove_prefix(1, prefix(n))
                };
                sim.advance(gap);
            }
            prop_assert!(sim.settle(100).is_some());

            let leader = sim.node(1).unwrap().data().clone();
            prop_assert!(sim.converged_at(leader.version));

            for id in 1..=3 {
                let hw = sim.hardware_id(id).unwrap();
                let wanted: HashSet<_> = AddressConfigurator::new(hw)
                    .derive(&leader)
                    .into_values()
                    .collect();
                let have: HashSet<_> =
                    sim.get_configured_addresses(id).unwrap().into_iter().collect();
                prop_assert_eq!(&have, &wanted);

                for addr in have {
                    prop_assert!(sim.echo(1, addr.addr));
                }
            }
        }
    }
}
