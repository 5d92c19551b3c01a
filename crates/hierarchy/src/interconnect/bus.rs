//! Round-robin arbitrated broadcast bus.
//!
//! N endpoints, each with an independent fixed-capacity command queue and data
//! queue. The two phases are separate resources: a command transfer and a data
//! transfer may be in flight concurrently, guarded by orthogonal busy flags.
//!
//! A transfer's life: submission enqueues at the sender's endpoint; if the
//! phase is idle, arbitration is scheduled after the arbitrate delay; the
//! winning entry is delivered to every other endpoint after the broadcast
//! delay; delivery immediately triggers the next arbitration round while any
//! queue holds work. While a phase is busy no further arbitration occurs;
//! mutual exclusion is the busy flag, not a lock.
//!
//! Annulled entries keep their slot and are drained on their scheduled cycle,
//! producing no delivery; the slot's bus time was genuinely consumed.

use tracing::{debug, trace};

use crate::common::error::SubmitStatus;
use crate::common::{CtrlId, LinkId};
use crate::config::BusConfig;
use crate::interconnect::{
    BusPhase, EndpointQueues, Interconnect, LinkCtx, QueueEntry, annul_queues,
    arbitrate_round_robin,
};
use crate::message::{Message, Sender};
use crate::pool::RequestRef;
use crate::sim::events::{Event, LinkEvent};

/// Round-robin arbitrated bus with independent command and data phases.
#[derive(Debug)]
pub struct BusInterconnect {
    id: LinkId,
    name: String,
    endpoints: Vec<EndpointQueues>,
    last_served: [usize; 2],
    busy: [bool; 2],
    queue_depth: usize,
    arbitrate_delay: u64,
    broadcast_delay: u64,
}

impl BusInterconnect {
    /// Creates an empty bus; bind endpoints with `register`.
    pub fn new(id: LinkId, name: impl Into<String>, config: &BusConfig) -> Self {
        Self {
            id,
            name: name.into(),
            endpoints: Vec::new(),
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

    fn endpoint_of(&self, ctrl: CtrlId) -> usize {
        self.endpoints
            .iter()
            .position(|e| e.ctrl == ctrl)
            .unwrap_or_else(|| panic!("{}: {ctrl} is not registered", self.name))
    }

    /// Whether any destination of a transfer from `from` cannot accept it.
    fn peer_full(&self, from: usize, ctx: &LinkCtx<'_>) -> bool {
        self.endpoints
            .iter()
            .enumerate()
            .any(|(i, e)| i != from && ctx.controllers[e.ctrl.0].is_full(true))
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
            ctx.events.schedule(
                ctx.cycle + self.arbitrate_delay,
                Event::Link {
                    link: self.id,
                    ev: LinkEvent::Broadcast {
                        phase,
                        granted: None,
                    },
                },
            );
        } else {
            trace!(bus = %self.name, ?phase, "busy, transfer queued");
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

        // Annulled entries skip the destination check: they will drain
        // without delivering, so nothing downstream has to accept them.
        if !front.annulled && self.peer_full(ep, ctx) {
            trace!(bus = %self.name, ?phase, "destination full, transfer deferred");
            ctx.events.schedule(
                ctx.cycle + self.broadcast_delay,
                Event::Link {
                    link: self.id,
                    ev: LinkEvent::Broadcast {
                        phase,
                        granted: Some(ep),
                    },
                },
            );
            return;
        }

        ctx.events.schedule(
            ctx.cycle + self.broadcast_delay,
            Event::Link {
                link: self.id,
                ev: LinkEvent::Deliver {
                    phase,
                    endpoint: ep,
                },
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

        self.next_transfer(phase, ctx);
    }

    /// Starts the next arbitration round or idles the phase.
    fn next_transfer(&mut self, phase: BusPhase, ctx: &mut LinkCtx<'_>) {
        if self.endpoints.iter().any(|e| !e.queue(phase).is_empty()) {
            ctx.events.schedule(
                ctx.cycle + self.arbitrate_delay,
                Event::Link {
                    link: self.id,
                    ev: LinkEvent::Broadcast {
                        phase,
                        granted: None,
                    },
                },
            );
        } else {
            self.busy[phase.index()] = false;
        }
    }
}

impl Interconnect for BusInterconnect {
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
        self.enqueue(&msg, ctx)
    }

    fn handle_event(&mut self, ev: LinkEvent, ctx: &mut LinkCtx<'_>) {
        match ev {
            LinkEvent::Broadcast { phase, granted } => self.broadcast(phase, granted, ctx),
            LinkEvent::Deliver { phase, endpoint } => self.deliver(phase, endpoint, ctx),
            LinkEvent::PendingDeliver { .. } | LinkEvent::PendingComplete => {
                unreachable!("{}: no pending-broadcast table on a plain bus", self.name)
            }
        }
    }

    fn annul(&mut self, request: RequestRef, _ctx: &mut LinkCtx<'_>) {
        let flagged = annul_queues(&mut self.endpoints, request);
        if flagged > 0 {
            debug!(bus = %self.name, flagged, "request annulled");
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
