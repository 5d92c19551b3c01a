//! Point-to-point un-buffered link.
//!
//! The simplest interconnect model: a set of wires directly connecting two
//! controllers. There are no buffers and no arbitration: a submission is
//! forwarded to the opposite endpoint's request entry point within the same
//! cycle, and the far controller routes it internally (a message matching one
//! of its pending accesses completes that access, anything else is admitted
//! as a new request).

use tracing::trace;

use crate::common::error::SubmitStatus;
use crate::common::{CtrlId, LinkId};
use crate::interconnect::{BusPhase, Interconnect, LinkCtx};
use crate::message::{Message, Sender};
use crate::pool::RequestRef;
use crate::sim::events::{Event, LinkEvent};

/// Zero-delay link between exactly two controllers.
#[derive(Debug)]
pub struct PointToPointLink {
    id: LinkId,
    name: String,
    ends: [Option<CtrlId>; 2],
}

impl PointToPointLink {
    /// Creates an unconnected link; bind both endpoints with `register`.
    pub fn new(id: LinkId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ends: [None, None],
        }
    }

    /// The controller wired to the other end.
    ///
    /// # Panics
    ///
    /// Panics if `ctrl` is not one of the two endpoints; routing a foreign
    /// controller's traffic is a wiring defect.
    fn opposite(&self, ctrl: CtrlId) -> CtrlId {
        if self.ends[0] == Some(ctrl) {
            self.ends[1]
        } else if self.ends[1] == Some(ctrl) {
            self.ends[0]
        } else {
            panic!("{}: controller {ctrl} is not an endpoint", self.name)
        }
        .unwrap_or_else(|| panic!("{}: far endpoint not registered", self.name))
    }
}

impl Interconnect for PointToPointLink {
    fn name(&self) -> &str {
        &self.name
    }

    /// # Panics
    ///
    /// Panics when a third controller registers; a point-to-point link has
    /// exactly two endpoints.
    fn register(&mut self, ctrl: CtrlId) -> usize {
        for (idx, end) in self.ends.iter_mut().enumerate() {
            if end.is_none() {
                *end = Some(ctrl);
                return idx;
            }
        }
        panic!("{}: both endpoints already registered", self.name)
    }

    fn endpoints(&self) -> usize {
        self.ends.iter().filter(|e| e.is_some()).count()
    }

    fn submit(&mut self, msg: Message, ctx: &mut LinkCtx<'_>) -> SubmitStatus {
        let Sender::Controller(from) = msg.sender else {
            panic!("{}: submission must originate at a controller", self.name)
        };
        let to = self.opposite(from);
        let forwarded = Message {
            sender: Sender::Interconnect(self.id),
            ..msg
        };
        trace!(link = %self.name, %from, %to, "forwarding");
        // The far controller routes internally: messages matching one of its
        // pending accesses complete it, anything else is a new request.
        ctx.events.schedule(
            ctx.cycle,
            Event::Request {
                ctrl: to,
                msg: forwarded,
            },
        );
        SubmitStatus::Queued
    }

    fn handle_event(&mut self, _ev: LinkEvent, _ctx: &mut LinkCtx<'_>) {
        unreachable!("{}: point-to-point links schedule no events", self.name)
    }

    /// Nothing is queued here, so there is nothing to annul.
    fn annul(&mut self, _request: RequestRef, _ctx: &mut LinkCtx<'_>) {}

    fn fast_path_target(&self, from: CtrlId) -> Option<CtrlId> {
        Some(self.opposite(from))
    }

    fn delay(&self) -> u64 {
        0
    }

    fn is_busy(&self, _phase: BusPhase) -> bool {
        false
    }
}
