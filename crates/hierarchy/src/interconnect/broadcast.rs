//! Broadcast bus with per-controller acknowledgment.
//!
//! Extends the arbitrated bus with a fixed-capacity table of pending
//! broadcasts. A Read or Write command opens a pending entry sized to the
//! number of registered controllers, with the originator's bit pre-set; each
//! peer's response sets its bit, and `is_shared` accumulates as the OR of all
//! *private* responders' shared flags. The broadcast is complete exactly when
//! every bit is set: the entry retires and the merged outcome is distributed
//! to every endpoint on the data bus.
//!
//! Coherence decisions (does any peer hold a copy?) require knowing that
//! every peer responded, not just the first; that is the whole reason this
//! table exists.
//!
//! Writeback (Update) and invalidation (Evict) broadcasts are fire-and-forget
//! and open no pending entry.

use tracing::{debug, trace};

use crate::common::error::SubmitStatus;
use crate::common::{CtrlId, LinkId};
use crate::config::BusConfig;
use crate::interconnect::{
    BusPhase, EndpointQueues, Interconnect, LinkCtx, QueueEntry, annul_queues,
    arbitrate_round_robin,
};
use crate::message::{Message, Sender};
use crate::pool::{OpKind, RequestPool, RequestRef};
use crate::sim::events::{Event, LinkEvent};

/// An address broadcast awaiting acknowledgment from every controller.
#[derive(Clone, Debug)]
pub struct PendingBroadcast {
    /// Request being resolved.
    pub request: RequestRef,
    /// Endpoint that originated the broadcast.
    pub origin: usize,
    /// OR of private responders' shared flags.
    pub shared: bool,
    /// Per-endpoint acknowledgment bits.
    pub acked: Vec<bool>,
    /// Flagged entries drain at their next data-phase event without effect.
    pub annulled: bool,
}

impl PendingBroadcast {
    fn is_complete(&self) -> bool {
        self.acked.iter().all(|&a| a)
    }
}

/// Arbitrated bus variant that tracks snoop acknowledgment per endpoint.
#[derive(Debug)]
pub struct BroadcastBus {
    id: LinkId,
    name: String,
    endpoints: Vec<EndpointQueues>,
    pending: Vec<Option<PendingBroadcast>>,
    last_served: [usize; 2],
    busy: [bool; 2],
    queue_depth: usize,
    arbitrate_delay: u64,
    broadcast_delay: u64,
}

impl BroadcastBus {
    /// Creates an empty broadcast bus; bind endpoints with `register`.
    pub fn new(id: LinkId, name: impl Into<String>, config: &BusConfig) -> Self {
        Self {
            id,
            name: name.into(),
            endpoints: Vec::new(),
            pending: (0..config.pending_depth).map(|_| None).collect(),
            last_served: [0; 2],
            busy: [false; 2],
            queue_depth: config.queue_depth,
            arbitrate_delay: config.arbitrate_delay,
            broadcast_delay: config.broadcast_delay,
        }
    }

    /// This bus's interconnect id.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// The pending-broadcast entry for `request`, if one is open.
    pub fn pending_for(&self, request: RequestRef) -> Option<&PendingBroadcast> {
        self.pending
            .iter()
            .flatten()
            .find(|p| p.request == request)
    }

    fn pending_slot_of(&self, request: RequestRef) -> Option<usize> {
        self.pending
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.request == request))
    }

    fn endpoint_of(&self, ctrl: CtrlId) -> usize {
        self.endpoints
            .iter()
            .position(|e| e.ctrl == ctrl)
            .unwrap_or_else(|| panic!("{}: {ctrl} is not registered", self.name))
    }

    /// Whether a new broadcast may open a pending entry.
    fn can_broadcast(&self) -> bool {
        self.pending.iter().any(Option::is_none)
    }

    fn peer_full(&self, from: usize, ctx: &LinkCtx<'_>) -> bool {
        self.endpoints
            .iter()
            .enumerate()
            .any(|(i, e)| i != from && ctx.controllers[e.ctrl.0].is_full(true))
    }

    fn schedule(&self, ctx: &mut LinkCtx<'_>, delay: u64, ev: LinkEvent) {
        ctx.events
            .schedule(ctx.cycle + delay, Event::Link { link: self.id, ev });
    }

    /// Records a snoop acknowledgment against the open pending entry.
    fn record_ack(&mut self, slot: usize, msg: &Message, ctx: &mut LinkCtx<'_>) {
        let Sender::Controller(from) = msg.sender else {
            panic!("{}: acknowledgment must originate at a controller", self.name)
        };
        let ep = self.endpoint_of(from);
        let private = ctx.controllers[from.0].is_private();
        let entry = self.pending[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("{}: acknowledgment for a free slot", self.name));

        if entry.annulled {
            trace!(bus = %self.name, slot, "ack for annulled broadcast ignored");
            return;
        }
        // Only private caches contribute to the shared outcome; a shared
        // level below does not make the line shared between cores.
        if private {
            entry.shared |= msg.is_shared;
        }
        entry.acked[ep] = true;
        trace!(bus = %self.name, slot, endpoint = ep, shared = entry.shared, "ack recorded");

        if entry.is_complete() && !self.busy[BusPhase::Data.index()] {
            self.busy[BusPhase::Data.index()] = true;
            self.schedule(ctx, self.arbitrate_delay, LinkEvent::PendingDeliver { slot });
        }
    }

    fn enqueue(&mut self, msg: &Message, ctx: &mut LinkCtx<'_>) -> SubmitStatus {
        let Sender::Controller(from) = msg.sender else {
            panic!("{}: submission must originate at a controller", self.name)
        };
        let ep = self.endpoint_of(from);
        let phase = if msg.has_data {
            BusPhase::Data
        } else {
            BusPhase::Command
        };

        let queue = self.endpoints[ep].queue_mut(phase);
        if queue.is_full() {
            debug!(bus = %self.name, %from, ?phase, "queue full");
            return SubmitStatus::Retry;
        }
        queue.push(QueueEntry {
            request: msg.request,
            has_data: msg.has_data,
            annulled: false,
        });
        ctx.pool.retain(msg.request);

        if !self.busy[phase.index()] {
            self.busy[phase.index()] = true;
            self.schedule(
                ctx,
                self.arbitrate_delay,
                LinkEvent::Broadcast {
                    phase,
                    granted: None,
                },
            );
        }
        SubmitStatus::Queued
    }

    fn broadcast(&mut self, phase: BusPhase, granted: Option<usize>, ctx: &mut LinkCtx<'_>) {
        let winner = granted.or_else(|| {
            arbitrate_round_robin(
                &self.endpoints,
                phase,
                &mut self.last_served[phase.index()],
            )
        });
        let Some(ep) = winner else {
            self.busy[phase.index()] = false;
            return;
        };
        let Some(front) = self.endpoints[ep].queue(phase).front() else {
            self.busy[phase.index()] = false;
            return;
        };
        let front = *front;

        if !front.annulled {
            // A transfer that will open a pending entry is gated on table
            // capacity before it is gated on destination space.
            let needs_pending = phase == BusPhase::Command
                && matches!(ctx.pool.get(front.request).kind(), OpKind::Read | OpKind::Write);
            if needs_pending && !self.can_broadcast() {
                debug!(bus = %self.name, "pending table full, transfer deferred");
                self.schedule(
                    ctx,
                    self.broadcast_delay,
                    LinkEvent::Broadcast {
                        phase,
                        granted: Some(ep),
                    },
                );
                return;
            }
            if self.peer_full(ep, ctx) {
                trace!(bus = %self.name, ?phase, "destination full, transfer deferred");
                self.schedule(
                    ctx,
                    self.broadcast_delay,
                    LinkEvent::Broadcast {
                        phase,
                        granted: Some(ep),
                    },
                );
                return;
            }
        }

        self.schedule(
            ctx,
            self.broadcast_delay,
            LinkEvent::Deliver {
                phase,
                endpoint: ep,
            },
        );
    }

    fn deliver(&mut self, phase: BusPhase, ep: usize, ctx: &mut LinkCtx<'_>) {
        let Some(entry) = self.endpoints[ep].queue_mut(phase).pop() else {
            self.busy[phase.index()] = false;
            return;
        };
        ctx.pool.release(entry.request);

        if entry.annulled {
            debug!(bus = %self.name, ?phase, "annulled entry drained");
        } else {
            if phase == BusPhase::Command
                && matches!(ctx.pool.get(entry.request).kind(), OpKind::Read | OpKind::Write)
            {
                self.open_pending(entry.request, ep, ctx.pool);
            }
            let msg = Message {
                sender: Sender::Interconnect(self.id),
                request: entry.request,
                has_data: entry.has_data,
                is_shared: false,
            };
            for (i, e) in self.endpoints.iter().enumerate() {
                if i != ep {
                    ctx.events
                        .schedule(ctx.cycle, Event::Deliver { ctrl: e.ctrl, msg });
                }
            }
            trace!(bus = %self.name, ?phase, endpoint = ep, "broadcast delivered");
        }

        match phase {
            BusPhase::Command => self.next_command(ctx),
            BusPhase::Data => self.next_data(ctx),
        }
    }

    /// Opens a pending entry for an address broadcast; the originator's own
    /// acknowledgment bit is pre-set.
    fn open_pending(&mut self, request: RequestRef, origin: usize, pool: &mut RequestPool) {
        let slot = self
            .pending
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| panic!("{}: pending table overflow", self.name));
        let mut acked = vec![false; self.endpoints.len()];
        acked[origin] = true;
        pool.retain(request);
        self.pending[slot] = Some(PendingBroadcast {
            request,
            origin,
            shared: false,
            acked,
            annulled: false,
        });
        trace!(bus = %self.name, slot, origin, "pending broadcast opened");
    }

    /// Distributes one completed (or drains one annulled) pending broadcast.
    fn pending_deliver(&mut self, slot: usize, ctx: &mut LinkCtx<'_>) {
        let Some(entry) = self.pending[slot].as_ref() else {
            self.next_data(ctx);
            return;
        };

        if entry.annulled {
            let request = entry.request;
            self.pending[slot] = None;
            ctx.pool.release(request);
            debug!(bus = %self.name, slot, "annulled pending broadcast drained");
            self.next_data(ctx);
            return;
        }

        if self.peer_full(entry.origin, ctx) {
            trace!(bus = %self.name, slot, "destination full, completion deferred");
            self.schedule(
                ctx,
                self.broadcast_delay,
                LinkEvent::PendingDeliver { slot },
            );
            return;
        }

        let msg = Message {
            sender: Sender::Interconnect(self.id),
            request: entry.request,
            has_data: true,
            is_shared: entry.shared,
        };
        // Every endpoint sees the merged outcome; the originator finalizes
        // its line state from it.
        for e in &self.endpoints {
            ctx.events.schedule(
                ctx.cycle + self.broadcast_delay,
                Event::Deliver { ctrl: e.ctrl, msg },
            );
        }
        let request = msg.request;
        self.pending[slot] = None;
        ctx.pool.release(request);
        trace!(bus = %self.name, slot, shared = msg.is_shared, "pending broadcast completed");

        self.schedule(ctx, self.broadcast_delay, LinkEvent::PendingComplete);
    }

    /// Picks the next data-phase work item: completed or annulled pending
    /// broadcasts take priority over queued data transfers.
    fn next_data(&mut self, ctx: &mut LinkCtx<'_>) {
        let ready = self.pending.iter().position(|p| {
            p.as_ref()
                .is_some_and(|p| p.annulled || p.is_complete())
        });
        if let Some(slot) = ready {
            self.schedule(ctx, self.arbitrate_delay, LinkEvent::PendingDeliver { slot });
            return;
        }
        if self
            .endpoints
            .iter()
            .any(|e| !e.queue(BusPhase::Data).is_empty())
        {
            self.schedule(
                ctx,
                self.arbitrate_delay,
                LinkEvent::Broadcast {
                    phase: BusPhase::Data,
                    granted: None,
                },
            );
            return;
        }
        self.busy[BusPhase::Data.index()] = false;
    }

    fn next_command(&mut self, ctx: &mut LinkCtx<'_>) {
        if self
            .endpoints
            .iter()
            .any(|e| !e.queue(BusPhase::Command).is_empty())
        {
            self.schedule(
                ctx,
                self.arbitrate_delay,
                LinkEvent::Broadcast {
                    phase: BusPhase::Command,
                    granted: None,
                },
            );
        } else {
            self.busy[BusPhase::Command.index()] = false;
        }
    }
}

impl Interconnect for BroadcastBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, ctrl: CtrlId) -> usize {
        let idx = self.endpoints.len();
        self.endpoints
            .push(EndpointQueues::new(ctrl, self.queue_depth));
        idx
    }

    fn endpoints(&self) -> usize {
        self.endpoints.len()
    }

    fn submit(&mut self, msg: Message, ctx: &mut LinkCtx<'_>) -> SubmitStatus {
        if !ctx.pool.is_live(msg.request) {
            debug!(bus = %self.name, "message for reclaimed request dropped");
            return SubmitStatus::Queued;
        }

        // A message for a request with an open pending entry is a snoop
        // acknowledgment, not a new transfer; it consumes no queue slot.
        if let Some(slot) = self.pending_slot_of(msg.request) {
            self.record_ack(slot, &msg, ctx);
            return SubmitStatus::Queued;
        }

        // A data-carrying message that is neither a writeback nor matched to
        // a pending entry is a response to a transaction that was annulled
        // and already retired; drop it without effect.
        if msg.has_data && ctx.pool.get(msg.request).kind() != OpKind::Update {
            debug!(bus = %self.name, "stale response dropped");
            return SubmitStatus::Queued;
        }

        self.enqueue(&msg, ctx)
    }

    fn handle_event(&mut self, ev: LinkEvent, ctx: &mut LinkCtx<'_>) {
        match ev {
            LinkEvent::Broadcast { phase, granted } => self.broadcast(phase, granted, ctx),
            LinkEvent::Deliver { phase, endpoint } => self.deliver(phase, endpoint, ctx),
            LinkEvent::PendingDeliver { slot } => self.pending_deliver(slot, ctx),
            LinkEvent::PendingComplete => self.next_data(ctx),
        }
    }

    fn annul(&mut self, request: RequestRef, ctx: &mut LinkCtx<'_>) {
        let flagged = annul_queues(&mut self.endpoints, request);

        let mut pending_flagged = false;
        for p in self.pending.iter_mut().flatten() {
            if p.request == request && !p.annulled {
                p.annulled = true;
                pending_flagged = true;
            }
        }
        // An annulled pending entry will never complete through acks, so make
        // sure a data-phase event exists to drain it.
        if pending_flagged && !self.busy[BusPhase::Data.index()] {
            self.busy[BusPhase::Data.index()] = true;
            self.schedule(ctx, self.arbitrate_delay, LinkEvent::PendingComplete);
        }
        if flagged > 0 || pending_flagged {
            debug!(bus = %self.name, flagged, pending_flagged, "request annulled");
        }
    }

    fn fast_path_target(&self, _from: CtrlId) -> Option<CtrlId> {
        None
    }

    fn delay(&self) -> u64 {
        self.broadcast_delay
    }

    fn is_busy(&self, phase: BusPhase) -> bool {
        self.busy[phase.index()]
    }
}
