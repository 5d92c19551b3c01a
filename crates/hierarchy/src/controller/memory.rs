//! Terminal main-memory controller.
//!
//! Sits on the coherence interconnect as the endpoint of last resort: it
//! absorbs writebacks, answers Read/Write snoops with data after a fixed
//! latency, and never reports a line shared: it is not a private cache, so
//! its acknowledgments never affect a broadcast's shared outcome.

use tracing::{debug, trace};

use crate::common::error::{AdmitError, FastPathResponse};
use crate::common::{CtrlId, LinkId};
use crate::config::MemoryConfig;
use crate::controller::{Controller, CtrlCtx};
use crate::message::{Message, Sender};
use crate::pool::{OpKind, RequestPool, RequestRef};
use crate::sim::events::Event;
use crate::stats::ControllerStats;

/// Fixed-latency memory endpoint.
#[derive(Debug)]
pub struct MemoryController {
    id: CtrlId,
    name: String,
    latency: u64,
    /// Snoops answered but whose transaction has not yet completed.
    outstanding: Vec<RequestRef>,
    stats: ControllerStats,
}

impl MemoryController {
    /// Creates a memory controller with the configured access latency.
    pub fn new(id: CtrlId, name: impl Into<String>, config: &MemoryConfig) -> Self {
        Self {
            id,
            name: name.into(),
            latency: config.latency,
            outstanding: Vec::new(),
            stats: ControllerStats::default(),
        }
    }

    /// Number of snoops currently awaiting their transaction's completion.
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }
}

impl Controller for MemoryController {
    fn name(&self) -> &str {
        &self.name
    }

    /// Main memory is shared by every core.
    fn is_private(&self) -> bool {
        false
    }

    fn is_full(&self, _from_interconnect: bool) -> bool {
        false
    }

    fn handle_request(&mut self, msg: Message, ctx: &mut CtrlCtx<'_>) -> Result<(), AdmitError> {
        // Direct access (over a point-to-point link or from a core): the
        // response fires after the access latency.
        let kind = ctx.pool.get(msg.request).kind();
        match kind {
            OpKind::Read | OpKind::Write => {
                self.stats.hits += 1;
                let reply =
                    Message::new(Sender::Controller(self.id), msg.request).with_data(true);
                let event = match msg.sender {
                    Sender::Interconnect(link) => Event::Submit {
                        link,
                        msg: reply,
                        held: false,
                    },
                    Sender::Controller(_) => Event::Complete { msg: reply },
                };
                ctx.events.schedule(ctx.cycle + self.latency, event);
            }
            // Writebacks and evictions are one-way: absorb, and only notify
            // a core that issued directly.
            OpKind::Update | OpKind::Evict => {
                if kind == OpKind::Update {
                    self.stats.writebacks += 1;
                }
                if let Sender::Controller(_) = msg.sender {
                    let reply = Message::new(Sender::Controller(self.id), msg.request);
                    ctx.events
                        .schedule(ctx.cycle + self.latency, Event::Complete { msg: reply });
                }
            }
        }
        trace!(memory = %self.name, kind = %kind, "access");
        Ok(())
    }

    fn handle_interconnect(&mut self, msg: Message, ctx: &mut CtrlCtx<'_>) {
        if msg.has_data {
            // Completion distribution for a snoop we already answered.
            if let Some(pos) = self.outstanding.iter().position(|&r| r == msg.request) {
                let _ = self.outstanding.remove(pos);
                return;
            }
            if ctx.pool.get(msg.request).kind() == OpKind::Update {
                self.stats.writebacks += 1;
                trace!(memory = %self.name, "writeback absorbed");
                return;
            }
            debug!(memory = %self.name, "unmatched data message ignored");
            return;
        }

        let kind = ctx.pool.get(msg.request).kind();
        match kind {
            OpKind::Read | OpKind::Write => {
                let Sender::Interconnect(from) = msg.sender else {
                    debug!(memory = %self.name, "snoop without interconnect sender dropped");
                    return;
                };
                self.stats.hits += 1;
                self.outstanding.push(msg.request);
                let reply =
                    Message::new(Sender::Controller(self.id), msg.request).with_data(true);
                ctx.events.schedule(
                    ctx.cycle + self.latency,
                    Event::Submit {
                        link: from,
                        msg: reply,
                        held: false,
                    },
                );
                trace!(memory = %self.name, kind = %kind, "snoop answered");
            }
            // Peer invalidations do not concern memory.
            OpKind::Evict | OpKind::Update => {}
        }
    }

    fn access_fast_path(
        &mut self,
        _link: LinkId,
        _request: RequestRef,
        _ctx: &mut CtrlCtx<'_>,
    ) -> FastPathResponse {
        FastPathResponse::Delivered {
            latency: self.latency,
        }
    }

    fn annul(&mut self, request: RequestRef, _pool: &mut RequestPool) {
        self.outstanding.retain(|&r| r != request);
    }

    fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ControllerStats {
        &mut self.stats
    }

    fn as_memory(&self) -> Option<&MemoryController> {
        Some(self)
    }
}
