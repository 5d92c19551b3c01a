//! Controller contract.
//!
//! A controller owns a cache (or memory) and drives its coherence traffic. It
//! registers with one or more interconnects and exposes two event entry
//! points: `handle_request` for new local accesses and `handle_interconnect`
//! for snoops, responses, and completed broadcasts arriving from an
//! interconnect. This module provides:
//! 1. **Contract:** The [`Controller`] trait with admission control
//!    (`is_full`), fast-path access, and annul propagation.
//! 2. **Context:** [`CtrlCtx`], the simulator state a controller may touch
//!    while handling an event.
//! 3. **Completions:** The outbound notice handed back to the issuing core.

/// Coherent set-associative cache controller.
pub mod cache;
/// Terminal main-memory controller.
pub mod memory;

pub use cache::CacheController;
pub use memory::MemoryController;

use crate::common::LinkId;
use crate::common::error::{AdmitError, FastPathResponse};
use crate::message::Message;
use crate::pool::{OpKind, RequestPool, RequestRef};
use crate::sim::events::EventQueue;
use crate::stats::{ControllerStats, ProtocolStats};

/// Outbound completion notice for the issuing core.
///
/// Carries the original request's identity plus the transaction outcome. The
/// issuer still holds its pool reference and must release it after consuming
/// the notice.
#[derive(Clone, Copy, Debug)]
pub struct Completion {
    /// Handle of the completed request (release obligation).
    pub request: RequestRef,
    /// Originating core id.
    pub core: u8,
    /// Originating hardware thread id.
    pub thread: u8,
    /// Reorder-buffer id of the originating instruction.
    pub rob_id: i32,
    /// Physical address of the access.
    pub addr: u64,
    /// Operation kind.
    pub kind: OpKind,
    /// Whether a data payload accompanied the completion.
    pub has_data: bool,
    /// Whether some peer still holds a shared copy.
    pub is_shared: bool,
    /// Cycle at which the request was issued.
    pub issue_cycle: u64,
    /// Cycle at which the completion fired.
    pub finish_cycle: u64,
}

/// Simulator state a controller may touch while handling an event.
pub struct CtrlCtx<'a> {
    /// Current simulation cycle.
    pub cycle: u64,
    /// Request pool.
    pub pool: &'a mut RequestPool,
    /// Event queue for deferred work.
    pub events: &'a mut EventQueue,
    /// Interconnect submissions produced by this call; the driver submits
    /// them as soon as the controller returns, retrying on backpressure.
    pub submissions: &'a mut Vec<(LinkId, Message)>,
    /// Completion outbox drained by the issuing core.
    pub completions: &'a mut Vec<Completion>,
}

impl std::fmt::Debug for CtrlCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrlCtx")
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

impl CtrlCtx<'_> {
    /// Builds a completion notice from the request's identity and pushes it
    /// to the outbox.
    pub fn complete(&mut self, request: RequestRef, has_data: bool, is_shared: bool) {
        let req = self.pool.get(request);
        let notice = Completion {
            request,
            core: req.core(),
            thread: req.thread(),
            rob_id: req.rob_id(),
            addr: req.addr(),
            kind: req.kind(),
            has_data,
            is_shared,
            issue_cycle: req.issue_cycle(),
            finish_cycle: self.cycle,
        };
        self.completions.push(notice);
    }
}

/// A cache or memory controller attached to the hierarchy.
pub trait Controller {
    /// Controller name for diagnostics.
    fn name(&self) -> &str;

    /// Whether this controller is exclusive to one core. Only private
    /// controllers contribute to a broadcast's shared outcome.
    fn is_private(&self) -> bool;

    /// Backpressure signal for admission control; `from_interconnect` uses
    /// the laxer limit that keeps slots reserved for snoop traffic.
    fn is_full(&self, from_interconnect: bool) -> bool;

    /// Admits a new local access (from the core or an upper link).
    ///
    /// # Errors
    ///
    /// Returns [`AdmitError::QueueFull`] when the pending queue is at its
    /// local-admission limit and [`AdmitError::Duplicate`] when an in-flight
    /// request with the same identity is already admitted.
    fn handle_request(&mut self, msg: Message, ctx: &mut CtrlCtx<'_>) -> Result<(), AdmitError>;

    /// Handles a snoop, response, or completed broadcast delivered by an
    /// interconnect.
    fn handle_interconnect(&mut self, msg: Message, ctx: &mut CtrlCtx<'_>);

    /// Attempts to serve the access without entering a timed queue.
    fn access_fast_path(
        &mut self,
        link: LinkId,
        request: RequestRef,
        ctx: &mut CtrlCtx<'_>,
    ) -> FastPathResponse;

    /// Drops every pending entry referencing `request` and releases its
    /// holds; queued interconnect effects are suppressed separately.
    fn annul(&mut self, request: RequestRef, pool: &mut RequestPool);

    /// Event counters collected so far.
    fn stats(&self) -> &ControllerStats;

    /// Mutable access to the event counters (driver-side stall accounting).
    fn stats_mut(&mut self) -> &mut ControllerStats;

    /// Coherence-protocol statistics, for controllers that run a protocol.
    fn protocol_stats(&self) -> Option<&ProtocolStats> {
        None
    }

    /// Returns this controller as a `CacheController` if it is one.
    fn as_cache(&self) -> Option<&CacheController> {
        None
    }

    /// Returns this controller as a `MemoryController` if it is one.
    fn as_memory(&self) -> Option<&MemoryController> {
        None
    }
}
