//! Top-level memory hierarchy driver.
//!
//! Owns the request pool, the event queue, every controller and interconnect,
//! and the global cycle counter. The embedding simulator:
//! 1. Registers interconnects and controllers and wires them together.
//! 2. Allocates requests and issues them to a controller each cycle.
//! 3. Calls [`MemoryHierarchy::step`] once per simulated cycle and drains the
//!    completion outbox, releasing each completed request.
//!
//! The driver dispatches deferred events, routes controller submissions to
//! interconnects (retrying backpressured ones), propagates annulments, and
//! tracks which interconnects are currently full.

use tracing::debug;

use crate::common::error::{AdmitError, FastPathResponse};
use crate::common::{CtrlId, LinkId};
use crate::config::HierarchyConfig;
use crate::controller::{Completion, Controller, CtrlCtx};
use crate::interconnect::{Interconnect, InterconnectDispatch, LinkCtx};
use crate::message::{Message, Sender};
use crate::pool::{MemoryAccessRequest, OpKind, RequestPool, RequestRef};
use crate::sim::events::{Event, EventQueue};

/// The memory subsystem: pool, controllers, interconnects, and clock.
pub struct MemoryHierarchy {
    config: HierarchyConfig,
    cycle: u64,
    pool: RequestPool,
    events: EventQueue,
    controllers: Vec<Box<dyn Controller>>,
    interconnects: Vec<InterconnectDispatch>,
    completions: Vec<Completion>,
    submissions: Vec<(LinkId, Message)>,
    full_links: Vec<bool>,
}

impl std::fmt::Debug for MemoryHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHierarchy")
            .field("cycle", &self.cycle)
            .field("controllers", &self.controllers.len())
            .field("interconnects", &self.interconnects.len())
            .finish_non_exhaustive()
    }
}

impl MemoryHierarchy {
    /// Creates an empty hierarchy from the given configuration.
    pub fn new(config: HierarchyConfig) -> Self {
        Self {
            config,
            cycle: 0,
            pool: RequestPool::new(&config.pool),
            events: EventQueue::new(),
            controllers: Vec::new(),
            interconnects: Vec::new(),
            completions: Vec::new(),
            submissions: Vec::new(),
            full_links: Vec::new(),
        }
    }

    /// Configuration this hierarchy was built from.
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Current simulation cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The request pool (inspection).
    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    /// Id the next registered controller will get.
    pub fn next_ctrl_id(&self) -> CtrlId {
        CtrlId(self.controllers.len())
    }

    /// Id the next registered interconnect will get.
    pub fn next_link_id(&self) -> LinkId {
        LinkId(self.interconnects.len())
    }

    /// Registers a controller; its id must have been taken from
    /// [`Self::next_ctrl_id`].
    pub fn add_controller(&mut self, controller: Box<dyn Controller>) -> CtrlId {
        let id = CtrlId(self.controllers.len());
        self.controllers.push(controller);
        id
    }

    /// Registers an interconnect; its id must have been taken from
    /// [`Self::next_link_id`].
    pub fn add_interconnect(&mut self, link: InterconnectDispatch) -> LinkId {
        let id = LinkId(self.interconnects.len());
        self.interconnects.push(link);
        self.full_links.push(false);
        id
    }

    /// Binds a controller endpoint on an interconnect; returns the endpoint
    /// index.
    pub fn connect(&mut self, link: LinkId, ctrl: CtrlId) -> usize {
        self.interconnects[link.0].register(ctrl)
    }

    /// A registered controller (stats and state inspection).
    pub fn controller(&self, id: CtrlId) -> &dyn Controller {
        &*self.controllers[id.0]
    }

    /// A registered interconnect (state inspection).
    pub fn interconnect(&self, id: LinkId) -> &InterconnectDispatch {
        &self.interconnects[id.0]
    }

    /// Whether the interconnect last signaled queue-full backpressure.
    pub fn link_full(&self, id: LinkId) -> bool {
        self.full_links[id.0]
    }

    /// Allocates and initializes a request.
    ///
    /// # Arguments
    ///
    /// * `core` / `thread` - Originating core and hardware thread.
    /// * `addr` - Physical address of the access.
    /// * `rob_id` - Reorder-buffer id of the owning instruction.
    /// * `is_instruction` - Whether the access comes from instruction fetch.
    /// * `owner_ip` - Instruction address of the owner (privilege judgment).
    /// * `kind` - Operation kind.
    ///
    /// # Returns
    ///
    /// A handle carrying one reference for the issuer, to be released after
    /// the completion notice is consumed.
    ///
    /// # Panics
    ///
    /// Aborts if the pool is exhausted after a sweep (configuration error).
    #[allow(clippy::too_many_arguments)]
    pub fn allocate(
        &mut self,
        core: u8,
        thread: u8,
        addr: u64,
        rob_id: i32,
        is_instruction: bool,
        owner_ip: u64,
        kind: OpKind,
    ) -> RequestRef {
        let r = self.pool.acquire(self.cycle);
        self.pool.get_mut(r).init(
            core,
            thread,
            addr,
            rob_id,
            self.cycle,
            is_instruction,
            owner_ip,
            kind,
        );
        self.pool.retain(r);
        r
    }

    /// A live request's descriptor.
    pub fn request(&self, r: RequestRef) -> &MemoryAccessRequest {
        self.pool.get(r)
    }

    /// Releases the issuer's hold on a request (completion consumed or
    /// issuance abandoned).
    pub fn release(&mut self, r: RequestRef) {
        self.pool.release(r);
    }

    /// Issues a request to a controller's request entry point.
    ///
    /// # Errors
    ///
    /// Propagates the controller's admission failure; the caller retries on a
    /// later cycle.
    pub fn issue(&mut self, ctrl: CtrlId, request: RequestRef) -> Result<(), AdmitError> {
        let msg = Message::new(Sender::Controller(ctrl), request);
        let result = self.dispatch_request(ctrl, msg);
        self.drain_submissions();
        result
    }

    /// Attempts a queue-free transfer from `from` across `link`.
    pub fn access_fast_path(
        &mut self,
        link: LinkId,
        from: CtrlId,
        request: RequestRef,
    ) -> FastPathResponse {
        match self.interconnects[link.0].fast_path_target(from) {
            None => FastPathResponse::Rejected,
            Some(target) => {
                let Self {
                    cycle,
                    pool,
                    events,
                    controllers,
                    submissions,
                    completions,
                    ..
                } = self;
                let mut ctx = CtrlCtx {
                    cycle: *cycle,
                    pool,
                    events,
                    submissions,
                    completions,
                };
                controllers[target.0].access_fast_path(link, request, &mut ctx)
            }
        }
    }

    /// Annuls a request everywhere: every interconnect queue entry referencing
    /// it is flagged (drained on schedule without effect) and every controller
    /// drops its pending entries. Idempotent.
    pub fn annul(&mut self, request: RequestRef) {
        debug!(request = request.index(), "annulling request");
        let Self {
            cycle,
            pool,
            events,
            controllers,
            interconnects,
            ..
        } = self;
        for link in interconnects.iter_mut() {
            let mut ctx = LinkCtx {
                cycle: *cycle,
                pool: &mut *pool,
                events: &mut *events,
                controllers: controllers.as_slice(),
            };
            link.annul(request, &mut ctx);
        }
        for ctrl in controllers.iter_mut() {
            ctrl.annul(request, pool);
        }
    }

    /// Advances the clock one cycle and dispatches every due event.
    pub fn step(&mut self) {
        self.cycle += 1;
        while let Some(ev) = self.events.pop_due(self.cycle) {
            self.dispatch(ev);
        }
    }

    /// Runs for the given number of cycles.
    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Steps until no events remain or `max_cycles` elapse; returns the
    /// number of cycles consumed.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> u64 {
        let mut consumed = 0;
        while !self.events.is_empty() && consumed < max_cycles {
            self.step();
            consumed += 1;
        }
        consumed
    }

    /// Drains the completion outbox.
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    fn dispatch(&mut self, ev: Event) {
        match ev {
            Event::Link { link, ev } => {
                let Self {
                    cycle,
                    pool,
                    events,
                    controllers,
                    interconnects,
                    ..
                } = self;
                let mut ctx = LinkCtx {
                    cycle: *cycle,
                    pool,
                    events,
                    controllers: controllers.as_slice(),
                };
                interconnects[link.0].handle_event(ev, &mut ctx);
            }
            Event::Deliver { ctrl, msg } => {
                if !self.pool.is_live(msg.request) {
                    debug!("stale delivery dropped");
                    return;
                }
                let Self {
                    cycle,
                    pool,
                    events,
                    controllers,
                    submissions,
                    completions,
                    ..
                } = self;
                let mut ctx = CtrlCtx {
                    cycle: *cycle,
                    pool,
                    events,
                    submissions,
                    completions,
                };
                controllers[ctrl.0].handle_interconnect(msg, &mut ctx);
                self.drain_submissions();
            }
            Event::Request { ctrl, msg } => {
                if !self.pool.is_live(msg.request) {
                    debug!("stale request delivery dropped");
                    return;
                }
                match self.dispatch_request(ctrl, msg) {
                    Ok(()) => {}
                    Err(AdmitError::QueueFull { retry_in }) => {
                        self.events
                            .schedule(self.cycle + retry_in, Event::Request { ctrl, msg });
                    }
                    Err(AdmitError::Duplicate) => {
                        debug!(%ctrl, "duplicate forwarded request dropped");
                    }
                }
                self.drain_submissions();
            }
            Event::Submit { link, msg, held } => self.do_submit(link, msg, held),
            Event::Complete { msg } => {
                if !self.pool.is_live(msg.request) {
                    debug!("stale completion dropped");
                    return;
                }
                let req = self.pool.get(msg.request);
                let notice = Completion {
                    request: msg.request,
                    core: req.core(),
                    thread: req.thread(),
                    rob_id: req.rob_id(),
                    addr: req.addr(),
                    kind: req.kind(),
                    has_data: msg.has_data,
                    is_shared: msg.is_shared,
                    issue_cycle: req.issue_cycle(),
                    finish_cycle: self.cycle,
                };
                let issued = req.issue_cycle();
                self.completions.push(notice);
                if let Sender::Controller(c) = msg.sender {
                    let stats = self.controllers[c.0].stats_mut();
                    stats.completed += 1;
                    stats.total_latency += self.cycle.saturating_sub(issued);
                }
            }
        }
    }

    fn dispatch_request(&mut self, ctrl: CtrlId, msg: Message) -> Result<(), AdmitError> {
        let Self {
            cycle,
            pool,
            events,
            controllers,
            submissions,
            completions,
            ..
        } = self;
        let mut ctx = CtrlCtx {
            cycle: *cycle,
            pool,
            events,
            submissions,
            completions,
        };
        controllers[ctrl.0].handle_request(msg, &mut ctx)
    }

    /// Routes controller-produced submissions to their interconnects, in the
    /// order they were produced.
    fn drain_submissions(&mut self) {
        while !self.submissions.is_empty() {
            let batch: Vec<_> = self.submissions.drain(..).collect();
            for (link, msg) in batch {
                self.do_submit(link, msg, false);
            }
        }
    }

    fn do_submit(&mut self, link: LinkId, msg: Message, held: bool) {
        use crate::common::error::SubmitStatus;

        let status = {
            let Self {
                cycle,
                pool,
                events,
                controllers,
                interconnects,
                ..
            } = self;
            let mut ctx = LinkCtx {
                cycle: *cycle,
                pool,
                events,
                controllers: controllers.as_slice(),
            };
            interconnects[link.0].submit(msg, &mut ctx)
        };
        match status {
            SubmitStatus::Queued => {
                self.full_links[link.0] = false;
                if held {
                    self.pool.release(msg.request);
                }
            }
            SubmitStatus::Retry => {
                self.full_links[link.0] = true;
                // Keep the request alive across the retry window.
                if !held {
                    self.pool.retain(msg.request);
                }
                if let Sender::Controller(c) = msg.sender {
                    self.controllers[c.0].stats_mut().stalls += 1;
                }
                self.events.schedule(
                    self.cycle + self.config.bus.retry_delay,
                    Event::Submit {
                        link,
                        msg,
                        held: true,
                    },
                );
            }
        }
    }
}
