//! Network data certification scenario
//!
//! A leader publishes two on-mesh prefixes to an end device across a
//! whitelist outage:
//! - publish P1, the end device follows and is pingable on it
//! - both sides drop the link, the leader publishes P2
//! - the leader re-admits first, then the end device
//! - the end device converges and is pingable on P1 and P2

use meshdata_core::{DataVersion, Ipv6Prefix, MeshResult, PrefixFlags};
use meshdata_diffusion::{AttachState, Role};

use crate::reachability::SimNodeId;
use crate::simulator::{MeshSimulator, SimulatorConfig};

pub const LEADER: SimNodeId = 1;
pub const ED: SimNodeId = 2;

pub const PREFIX_1: &str = "2001:2:0:1::/64";
pub const PREFIX_2: &str = "2001:2:0:2::/64";
pub const PREFIX_FLAGS: &str = "paros";

/// Configuration for the scenario
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub simulator: SimulatorConfig,
    /// Upper bound on ticks for each convergence wait
    pub settle_ticks: u64,
    /// Routers inserted between leader and end device
    pub relays: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig::default(),
            settle_ticks: 100,
            relays: 0,
        }
    }
}

impl ScenarioConfig {
    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn with_relays(mut self, relays: u32) -> Self {
        self.relays = relays;
        self
    }
}

/// Result of a scenario run
#[derive(Debug, Clone, Default)]
pub struct ScenarioResult {
    /// End device version at the end
    pub final_version: DataVersion,
    /// Addresses the end device ended up with
    pub addresses: usize,
    /// Ticks spent waiting for convergence
    pub ticks: u64,
    /// Failed checks, in order
    pub violations: Vec<String>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Runs the certification scenario
pub struct NetworkDataScenario {
    config: ScenarioConfig,
    sim: MeshSimulator,
    result: ScenarioResult,
}

impl NetworkDataScenario {
    pub fn new(config: ScenarioConfig) -> Self {
        let sim = MeshSimulator::new(config.simulator.clone());
        Self {
            config,
            sim,
            result: ScenarioResult::default(),
        }
    }

    pub fn simulator(&self) -> &MeshSimulator {
        &self.sim
    }

    /// Neighbor of the end device on the path to the leader
    fn ed_uplink(&self) -> SimNodeId {
        if self.config.relays == 0 {
            LEADER
        } else {
            ED + self.config.relays
        }
    }

    fn check(&mut self, ok: bool, what: impl Into<String>) {
        if !ok {
            self.result.violations.push(what.into());
        }
    }

    fn settle(&mut self, step: &str) {
        match self.sim.settle(self.config.settle_ticks) {
            Some(ticks) => self.result.ticks += ticks,
            None => {
                self.result.ticks += self.config.settle_ticks;
                self.result
                    .violations
                    .push(format!("{}: traffic did not settle", step));
            }
        }
    }

    fn check_pingable(&mut self, prefix: Ipv6Prefix, step: &str) -> MeshResult<()> {
        let addr = self
            .sim
            .get_configured_addresses(ED)?
            .into_iter()
            .find(|a| a.prefix == prefix);
        match addr {
            Some(a) => {
                let ok = self.sim.echo(LEADER, a.addr);
                self.check(ok, format!("{}: {} not pingable", step, a.addr));
            }
            None => self.check(false, format!("{}: no address in {}", step, prefix)),
        }
        Ok(())
    }

    fn build(&mut self) -> MeshResult<()> {
        self.sim.add_node(LEADER, Role::Authority)?;
        self.sim.add_node(ED, Role::Leaf)?;

        let mut prev = LEADER;
        for r in 1..=self.config.relays {
            let id = ED + r;
            self.sim.add_node(id, Role::Relay)?;
            self.sim.link(prev, id)?;
            prev = id;
        }
        self.sim.link(prev, ED)?;

        self.sim.start_all();
        self.settle("attach");

        let leader = self.sim.get_state(LEADER)?;
        self.check(leader == AttachState::Leader, format!("leader state is {}", leader));
        let ed = self.sim.get_state(ED)?;
        self.check(ed == AttachState::Child, format!("end device state is {}", ed));
        Ok(())
    }

    /// Run every step; configuration errors abort, protocol failures are
    /// collected as violations
    pub fn run(mut self) -> MeshResult<ScenarioResult> {
        let p1: Ipv6Prefix = PREFIX_1.parse()?;
        let p2: Ipv6Prefix = PREFIX_2.parse()?;
        let flags: PrefixFlags = PREFIX_FLAGS.parse()?;

        self.build()?;

        // Step 1: P1
        let v1 = self.sim.add_prefix(LEADER, p1, flags)?;
        self.settle("publish P1");
        let ed_version = self.sim.version(ED)?;
        self.check(ed_version == v1, format!("after P1 end device at {:?}", ed_version));
        self.check_pingable(p1, "after P1")?;

        // Step 2: outage, P2 published meanwhile
        let uplink = self.ed_uplink();
        self.sim.set_admissible(uplink, ED, false)?;
        self.sim.set_admissible(ED, uplink, false)?;
        let v2 = self.sim.add_prefix(LEADER, p2, flags)?;
        self.settle("publish P2");
        let ed_version = self.sim.version(ED)?;
        self.check(ed_version == v1, format!("during outage end device at {:?}", ed_version));

        // Step 3: restore, leader side first
        self.sim.set_admissible(uplink, ED, true)?;
        self.settle("restore uplink side");
        self.sim.set_admissible(ED, uplink, true)?;
        self.settle("restore end device side");

        let ed_version = self.sim.version(ED)?;
        self.check(ed_version == v2, format!("after restore end device at {:?}", ed_version));
        self.check_pingable(p1, "after restore")?;
        self.check_pingable(p2, "after restore")?;

        self.result.final_version = ed_version;
        self.result.addresses = self.sim.get_configured_addresses(ED)?.len();
        Ok(self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_test_tracing;

    #[test]
    fn test_certification_scenario() {
        init_test_tracing();
        let result = NetworkDataScenario::new(ScenarioConfig::default()).run().unwrap();
        assert!(result.passed(), "{:?}", result.violations);
        assert_eq!(result.final_version, DataVersion::new(2));
        assert_eq!(result.addresses, 2);
    }

    #[test]
    fn test_scenario_across_seeds_and_latency() {
        for seed in 0..8 {
            let sim = SimulatorConfig::default()
                .with_seed(seed)
                .with_latency(1 + seed % 4);
            let result = NetworkDataScenario::new(ScenarioConfig::default().with_simulator(sim))
                .run()
                .unwrap();
            assert!(result.passed(), "seed {}: {:?}", seed, result.violations);
        }
    }

    #[test]
    fn test_scenario_through_relays() {
        let result = NetworkDataScenario::new(ScenarioConfig::default().with_relays(3))
            .run()
            .unwrap();
        assert!(result.passed(), "{:?}", result.violations);
        assert_eq!(result.addresses, 2);
    }
}
