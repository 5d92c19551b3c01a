//! Shared test infrastructure.
//!
//! Builders for the standard systems under test (N private caches and one
//! memory controller on a broadcast bus, or a cache wired to memory over a
//! point-to-point link) plus helpers for issuing accesses and inspecting
//! controllers.

use cohsim_core::HierarchyConfig;
use cohsim_core::MemoryHierarchy;
use cohsim_core::coherence::FourStateLogic;
use cohsim_core::common::{CtrlId, LinkId};
use cohsim_core::controller::{CacheController, Completion, MemoryController};
use cohsim_core::interconnect::InterconnectDispatch;
use cohsim_core::interconnect::{BroadcastBus, BusInterconnect, PointToPointLink};
use cohsim_core::pool::{OpKind, RequestRef};

/// Upper bound for `run_until_idle` in tests; generous for any single
/// transaction chain.
pub const MAX_CYCLES: u64 = 10_000;

/// A complete bus-based system under test.
pub struct BusSystem {
    /// The hierarchy driver.
    pub hier: MemoryHierarchy,
    /// Private cache controllers, one per simulated core.
    pub caches: Vec<CtrlId>,
    /// The memory endpoint.
    pub memory: CtrlId,
    /// The coherence interconnect.
    pub bus: LinkId,
}

/// A configuration sized for fast, deterministic tests.
pub fn small_config() -> HierarchyConfig {
    let mut config = HierarchyConfig::default();
    config.memory.latency = 4;
    config
}

/// Builds `n` private caches and one memory controller on a
/// broadcast-acknowledging bus.
pub fn broadcast_system(n: usize, config: HierarchyConfig) -> BusSystem {
    let mut hier = MemoryHierarchy::new(config);
    let bus = hier.add_interconnect(InterconnectDispatch::Broadcast(BroadcastBus::new(
        hier.next_link_id(),
        "coherence_bus",
        &config.bus,
    )));

    let mut caches = Vec::new();
    for i in 0..n {
        let id = hier.add_controller(Box::new(CacheController::new(
            hier.next_ctrl_id(),
            format!("l2_{i}"),
            bus,
            true,
            Box::new(FourStateLogic::new()),
            &config,
        )));
        let _ = hier.connect(bus, id);
        caches.push(id);
    }
    let memory = hier.add_controller(Box::new(MemoryController::new(
        hier.next_ctrl_id(),
        "dram",
        &config.memory,
    )));
    let _ = hier.connect(bus, memory);

    BusSystem {
        hier,
        caches,
        memory,
        bus,
    }
}

/// Same topology on a plain (non-acknowledging) bus.
pub fn plain_bus_system(n: usize, config: HierarchyConfig) -> BusSystem {
    let mut hier = MemoryHierarchy::new(config);
    let bus = hier.add_interconnect(InterconnectDispatch::Bus(BusInterconnect::new(
        hier.next_link_id(),
        "plain_bus",
        &config.bus,
    )));

    let mut caches = Vec::new();
    for i in 0..n {
        let id = hier.add_controller(Box::new(CacheController::new(
            hier.next_ctrl_id(),
            format!("l2_{i}"),
            bus,
            true,
            Box::new(FourStateLogic::new()),
            &config,
        )));
        let _ = hier.connect(bus, id);
        caches.push(id);
    }
    let memory = hier.add_controller(Box::new(MemoryController::new(
        hier.next_ctrl_id(),
        "dram",
        &config.memory,
    )));
    let _ = hier.connect(bus, memory);

    BusSystem {
        hier,
        caches,
        memory,
        bus,
    }
}

/// One cache wired to memory over a zero-delay point-to-point link.
pub fn p2p_system(config: HierarchyConfig) -> (MemoryHierarchy, CtrlId, CtrlId, LinkId) {
    let mut hier = MemoryHierarchy::new(config);
    let link = hier.add_interconnect(InterconnectDispatch::PointToPoint(PointToPointLink::new(
        hier.next_link_id(),
        "cache_mem_link",
    )));
    let cache = hier.add_controller(Box::new(CacheController::new(
        hier.next_ctrl_id(),
        "l2_0",
        link,
        true,
        Box::new(FourStateLogic::new()),
        &config,
    )));
    let memory = hier.add_controller(Box::new(MemoryController::new(
        hier.next_ctrl_id(),
        "dram",
        &config.memory,
    )));
    let _ = hier.connect(link, cache);
    let _ = hier.connect(link, memory);
    (hier, cache, memory, link)
}

/// Allocates and issues an access, panicking on admission failure.
pub fn issue(hier: &mut MemoryHierarchy, ctrl: CtrlId, core: u8, addr: u64, kind: OpKind) -> RequestRef {
    let request = hier.allocate(core, 0, addr, i32::from(core) * 100, false, 0x40_0000, kind);
    match hier.issue(ctrl, request) {
        Ok(()) => request,
        Err(e) => panic!("admission failed: {e}"),
    }
}

/// Runs until idle and returns all completions, releasing each one's issuer
/// hold.
pub fn drain(hier: &mut MemoryHierarchy) -> Vec<Completion> {
    let _ = hier.run_until_idle(MAX_CYCLES);
    let completions = hier.take_completions();
    for c in &completions {
        hier.release(c.request);
    }
    completions
}

/// Standalone state for driving one interconnect by hand: a pool, an event
/// queue, and a set of registered controllers that are never invoked; tests
/// play the controllers' part themselves.
pub struct LinkBench {
    /// Request pool.
    pub pool: cohsim_core::pool::RequestPool,
    /// Event queue.
    pub events: cohsim_core::sim::events::EventQueue,
    /// Controllers backing the endpoint set (for privacy/backpressure
    /// queries only).
    pub controllers: Vec<Box<dyn cohsim_core::controller::Controller>>,
    /// Current cycle of the bench clock.
    pub cycle: u64,
}

impl LinkBench {
    /// Two private caches and one memory controller, ids 0..=2.
    pub fn new(config: &HierarchyConfig) -> Self {
        let controllers: Vec<Box<dyn cohsim_core::controller::Controller>> = vec![
            Box::new(CacheController::new(
                CtrlId(0),
                "l2_0",
                LinkId(0),
                true,
                Box::new(FourStateLogic::new()),
                config,
            )),
            Box::new(CacheController::new(
                CtrlId(1),
                "l2_1",
                LinkId(0),
                true,
                Box::new(FourStateLogic::new()),
                config,
            )),
            Box::new(MemoryController::new(CtrlId(2), "dram", &config.memory)),
        ];
        Self {
            pool: cohsim_core::pool::RequestPool::new(&config.pool),
            events: cohsim_core::sim::events::EventQueue::new(),
            controllers,
            cycle: 0,
        }
    }

    /// Context borrowing the bench state at its current cycle.
    pub fn ctx(&mut self) -> cohsim_core::interconnect::LinkCtx<'_> {
        cohsim_core::interconnect::LinkCtx {
            cycle: self.cycle,
            pool: &mut self.pool,
            events: &mut self.events,
            controllers: self.controllers.as_slice(),
        }
    }

    /// Allocates a retained request of the given kind.
    pub fn request(&mut self, core: u8, addr: u64, kind: OpKind) -> RequestRef {
        let r = self.pool.acquire(self.cycle);
        self.pool
            .get_mut(r)
            .init(core, 0, addr, 1, self.cycle, false, 0x40_0000, kind);
        self.pool.retain(r);
        r
    }

    /// Advances the clock to `to_cycle`, feeding link events back into the
    /// interconnect and collecting controller deliveries instead of
    /// dispatching them.
    pub fn pump(
        &mut self,
        link: &mut dyn cohsim_core::interconnect::Interconnect,
        to_cycle: u64,
    ) -> Vec<(CtrlId, cohsim_core::message::Message)> {
        use cohsim_core::sim::events::Event;

        let mut delivered = Vec::new();
        while self.cycle < to_cycle {
            self.cycle += 1;
            while let Some(ev) = self.events.pop_due(self.cycle) {
                match ev {
                    Event::Link { ev, .. } => {
                        let mut ctx = cohsim_core::interconnect::LinkCtx {
                            cycle: self.cycle,
                            pool: &mut self.pool,
                            events: &mut self.events,
                            controllers: self.controllers.as_slice(),
                        };
                        link.handle_event(ev, &mut ctx);
                    }
                    Event::Deliver { ctrl, msg } | Event::Request { ctrl, msg } => {
                        delivered.push((ctrl, msg));
                    }
                    Event::Submit { .. } | Event::Complete { .. } => {}
                }
            }
        }
        delivered
    }
}

/// The cache controller behind `id`.
pub fn cache(hier: &MemoryHierarchy, id: CtrlId) -> &CacheController {
    match hier.controller(id).as_cache() {
        Some(c) => c,
        None => panic!("{id} is not a cache controller"),
    }
}

/// The memory controller behind `id`.
pub fn memory(hier: &MemoryHierarchy, id: CtrlId) -> &MemoryController {
    match hier.controller(id).as_memory() {
        Some(m) => m,
        None => panic!("{id} is not a memory controller"),
    }
}
