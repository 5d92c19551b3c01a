//! Transient messages delivered between controllers and interconnects.
//!
//! A [`Message`] describes one event in an interconnect transaction: a new
//! request entering a bus, a snoop arriving at a peer controller, a snoop
//! acknowledgment, or a completed broadcast's merged outcome. Messages are
//! plain values, constructed and consumed within a single
//! transaction window; they never outlive the queue entry or event that
//! carries them.

use crate::common::{CtrlId, LinkId};
use crate::pool::RequestRef;

/// Originator of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sender {
    /// Sent by a controller (new request, snoop reply, writeback).
    Controller(CtrlId),
    /// Sent by an interconnect (snoop delivery, completion distribution).
    Interconnect(LinkId),
}

/// One event delivered between a controller and an interconnect.
#[derive(Clone, Copy, Debug)]
pub struct Message {
    /// Who produced this message.
    pub sender: Sender,
    /// The in-flight request this message concerns.
    pub request: RequestRef,
    /// Whether a data payload accompanies the message.
    pub has_data: bool,
    /// Whether the responder still holds a shared copy of the line.
    pub is_shared: bool,
}

impl Message {
    /// Creates a message with no payload and no shared flag.
    pub fn new(sender: Sender, request: RequestRef) -> Self {
        Self {
            sender,
            request,
            has_data: false,
            is_shared: false,
        }
    }

    /// Sets the data-payload flag.
    pub fn with_data(mut self, has_data: bool) -> Self {
        self.has_data = has_data;
        self
    }

    /// Sets the shared-copy flag.
    pub fn with_shared(mut self, is_shared: bool) -> Self {
        self.is_shared = is_shared;
        self
    }
}
