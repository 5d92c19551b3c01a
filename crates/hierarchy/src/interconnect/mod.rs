//! Interconnect contract and shared transport machinery.
//!
//! An interconnect transports requests and messages between registered
//! controllers. This module provides:
//! 1. **Contract:** The [`Interconnect`] trait (register, fast path, submit,
//!    annul, delay) and the closed [`InterconnectDispatch`] variant set.
//! 2. **Queues:** Fixed-capacity per-endpoint command/data queues shared by
//!    both bus variants, and the round-robin arbitration over them.
//! 3. **Context:** [`LinkCtx`], the slice of simulator state an interconnect
//!    may touch while handling an event (pool, event queue, peer controllers).
//!
//! Failure mode throughout: a full queue yields [`SubmitStatus::Retry`],
//! backpressure for the caller, never an error.

/// Round-robin arbitrated broadcast bus.
pub mod bus;
/// Bus variant collecting per-controller snoop acknowledgments.
pub mod broadcast;
/// Zero-delay two-endpoint link.
pub mod p2p;

pub use broadcast::BroadcastBus;
pub use bus::BusInterconnect;
pub use p2p::PointToPointLink;

use std::collections::VecDeque;

use crate::common::CtrlId;
use crate::common::error::SubmitStatus;
use crate::controller::Controller;
use crate::message::Message;
use crate::pool::{RequestPool, RequestRef};
use crate::sim::events::{EventQueue, LinkEvent};

/// The two independent bus resources.
///
/// Command and data transfers may be in flight concurrently; their busy flags
/// are orthogonal and must never be conflated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusPhase {
    /// Address/command transfers (requests, snoops, evictions).
    Command,
    /// Data transfers (writebacks, completion distribution).
    Data,
}

impl BusPhase {
    /// Dense index for per-phase state arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Command => 0,
            Self::Data => 1,
        }
    }
}

/// Fixed-capacity FIFO; entries are served strictly in enqueue order.
#[derive(Clone, Debug)]
pub struct FixedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FixedQueue<T> {
    /// Creates a queue bounded at `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether no further entry can be admitted.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Whether the queue holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Appends an entry; the caller must have checked `is_full`.
    pub fn push(&mut self, item: T) {
        debug_assert!(!self.is_full());
        self.items.push_back(item);
    }

    /// The entry next in service order.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Removes and returns the front entry.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Mutable iteration over queued entries (annul marking).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

/// One queued bus transfer.
#[derive(Clone, Copy, Debug)]
pub struct QueueEntry {
    /// Request being transported.
    pub request: RequestRef,
    /// Whether a data payload accompanies the transfer.
    pub has_data: bool,
    /// Annulled entries keep their slot and timing but deliver nothing.
    pub annulled: bool,
}

/// Per-endpoint command and data queues.
#[derive(Clone, Debug)]
pub struct EndpointQueues {
    /// Controller bound to this endpoint.
    pub ctrl: CtrlId,
    command: FixedQueue<QueueEntry>,
    data: FixedQueue<QueueEntry>,
}

impl EndpointQueues {
    fn new(ctrl: CtrlId, depth: usize) -> Self {
        Self {
            ctrl,
            command: FixedQueue::new(depth),
            data: FixedQueue::new(depth),
        }
    }

    /// Queue for the given phase.
    pub fn queue(&self, phase: BusPhase) -> &FixedQueue<QueueEntry> {
        match phase {
            BusPhase::Command => &self.command,
            BusPhase::Data => &self.data,
        }
    }

    /// Mutable queue for the given phase.
    pub fn queue_mut(&mut self, phase: BusPhase) -> &mut FixedQueue<QueueEntry> {
        match phase {
            BusPhase::Command => &mut self.command,
            BusPhase::Data => &mut self.data,
        }
    }
}

/// Simulator state an interconnect may touch while handling an event.
pub struct LinkCtx<'a> {
    /// Current simulation cycle.
    pub cycle: u64,
    /// Request pool (retain/release on queue entry lifecycle).
    pub pool: &'a mut RequestPool,
    /// Event queue for deferred phases and deliveries.
    pub events: &'a mut EventQueue,
    /// Registered controllers, for backpressure and privacy queries.
    pub controllers: &'a [Box<dyn Controller>],
}

impl std::fmt::Debug for LinkCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCtx")
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

/// Transport between registered controllers.
///
/// Implementations model timing by scheduling [`LinkEvent`]s against the
/// global cycle counter; the driver routes those events back into
/// `handle_event`.
pub trait Interconnect {
    /// Interconnect name for diagnostics.
    fn name(&self) -> &str;

    /// Binds a controller endpoint; returns its stable endpoint index.
    fn register(&mut self, ctrl: CtrlId) -> usize;

    /// Number of registered endpoints.
    fn endpoints(&self) -> usize;

    /// Attempts a timed transfer; `Retry` signals queue-full backpressure.
    fn submit(&mut self, msg: Message, ctx: &mut LinkCtx<'_>) -> SubmitStatus;

    /// Handles a previously scheduled timing event.
    fn handle_event(&mut self, ev: LinkEvent, ctx: &mut LinkCtx<'_>);

    /// Flags every queued entry referencing `request` so it drains without
    /// effect. Timing is preserved: slots stay occupied until their scheduled
    /// cycle.
    fn annul(&mut self, request: RequestRef, ctx: &mut LinkCtx<'_>);

    /// Endpoint an uncontended fast-path access from `from` would reach, or
    /// `None` if this interconnect never serves fast-path traffic.
    fn fast_path_target(&self, from: CtrlId) -> Option<CtrlId>;

    /// Fixed transport latency in cycles.
    fn delay(&self) -> u64;

    /// Whether the given phase resource is currently occupied.
    fn is_busy(&self, phase: BusPhase) -> bool;
}

/// Closed variant set of the interconnects this kernel models.
#[derive(Debug)]
pub enum InterconnectDispatch {
    /// Zero-delay two-endpoint link.
    PointToPoint(PointToPointLink),
    /// Round-robin arbitrated bus.
    Bus(BusInterconnect),
    /// Broadcast bus with per-controller acknowledgment.
    Broadcast(BroadcastBus),
}

impl Interconnect for InterconnectDispatch {
    fn name(&self) -> &str {
        match self {
            Self::PointToPoint(l) => l.name(),
            Self::Bus(b) => b.name(),
            Self::Broadcast(b) => b.name(),
        }
    }

    fn register(&mut self, ctrl: CtrlId) -> usize {
        match self {
            Self::PointToPoint(l) => l.register(ctrl),
            Self::Bus(b) => b.register(ctrl),
            Self::Broadcast(b) => b.register(ctrl),
        }
    }

    fn endpoints(&self) -> usize {
        match self {
            Self::PointToPoint(l) => l.endpoints(),
            Self::Bus(b) => b.endpoints(),
            Self::Broadcast(b) => b.endpoints(),
        }
    }

    fn submit(&mut self, msg: Message, ctx: &mut LinkCtx<'_>) -> SubmitStatus {
        match self {
            Self::PointToPoint(l) => l.submit(msg, ctx),
            Self::Bus(b) => b.submit(msg, ctx),
            Self::Broadcast(b) => b.submit(msg, ctx),
        }
    }

    fn handle_event(&mut self, ev: LinkEvent, ctx: &mut LinkCtx<'_>) {
        match self {
            Self::PointToPoint(l) => l.handle_event(ev, ctx),
            Self::Bus(b) => b.handle_event(ev, ctx),
            Self::Broadcast(b) => b.handle_event(ev, ctx),
        }
    }

    fn annul(&mut self, request: RequestRef, ctx: &mut LinkCtx<'_>) {
        match self {
            Self::PointToPoint(l) => l.annul(request, ctx),
            Self::Bus(b) => b.annul(request, ctx),
            Self::Broadcast(b) => b.annul(request, ctx),
        }
    }

    fn fast_path_target(&self, from: CtrlId) -> Option<CtrlId> {
        match self {
            Self::PointToPoint(l) => l.fast_path_target(from),
            Self::Bus(b) => b.fast_path_target(from),
            Self::Broadcast(b) => b.fast_path_target(from),
        }
    }

    fn delay(&self) -> u64 {
        match self {
            Self::PointToPoint(l) => l.delay(),
            Self::Bus(b) => b.delay(),
            Self::Broadcast(b) => b.delay(),
        }
    }

    fn is_busy(&self, phase: BusPhase) -> bool {
        match self {
            Self::PointToPoint(l) => l.is_busy(phase),
            Self::Bus(b) => b.is_busy(phase),
            Self::Broadcast(b) => b.is_busy(phase),
        }
    }
}

/// Round-robin scan starting just past the last-served endpoint.
///
/// Returns the next endpoint with a non-empty queue for `phase` and updates
/// `last`; a queue's own entries are always served in enqueue order.
pub(crate) fn arbitrate_round_robin(
    endpoints: &[EndpointQueues],
    phase: BusPhase,
    last: &mut usize,
) -> Option<usize> {
    let n = endpoints.len();
    if n == 0 {
        return None;
    }
    for step in 1..=n {
        let idx = (*last + step) % n;
        if !endpoints[idx].queue(phase).is_empty() {
            *last = idx;
            return Some(idx);
        }
    }
    None
}

/// Flags every entry referencing `request` in both phases of every endpoint.
///
/// Returns the number of entries flagged (idempotent: already-annulled
/// entries are not counted twice).
pub(crate) fn annul_queues(endpoints: &mut [EndpointQueues], request: RequestRef) -> usize {
    let mut flagged = 0;
    for ep in endpoints.iter_mut() {
        for phase in [BusPhase::Command, BusPhase::Data] {
            for entry in ep.queue_mut(phase).iter_mut() {
                if entry.request == request && !entry.annulled {
                    entry.annulled = true;
                    flagged += 1;
                }
            }
        }
    }
    flagged
}
