//! Coherence protocol contract.
//!
//! A coherence logic is the pluggable brain attached to a cache controller: it
//! reacts to hit/miss/insert/evict/completion events and decides cache-line
//! state changes. This module provides:
//! 1. **Line state:** The four-state ownership alphabet and the cache line it
//!    annotates. The state type is a closed enum, so a line can never be
//!    observed outside the protocol alphabet; illegal (state, operation)
//!    combinations remain fatal at the decision point.
//! 2. **Outcomes:** The side-effect vocabulary a handler returns to its
//!    controller (respond, forward, write back, invalidate peers, retire).
//! 3. **Contract:** The [`CoherenceLogic`] trait covering the eight event kinds
//!    and the two line queries.

/// Four-state ownership protocol implementation.
pub mod mesi;

pub use mesi::FourStateLogic;

use crate::message::Message;
use crate::pool::MemoryAccessRequest;
use crate::stats::ProtocolStats;

/// Coherence state of one cache line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LineState {
    /// No valid copy resident.
    #[default]
    Invalid,
    /// Sole copy, dirty with respect to memory.
    Modified,
    /// Sole copy, clean.
    Exclusive,
    /// One of possibly many clean copies.
    Shared,
}

impl LineState {
    /// Dense index for statistics tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Invalid => 0,
            Self::Modified => 1,
            Self::Exclusive => 2,
            Self::Shared => 3,
        }
    }

    /// Whether the state represents a resident copy.
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::Invalid
    }
}

impl std::fmt::Display for LineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Invalid => "Invalid",
            Self::Modified => "Modified",
            Self::Exclusive => "Exclusive",
            Self::Shared => "Shared",
        };
        f.write_str(name)
    }
}

/// One cache line: address tag plus coherence state.
///
/// The coherence logic is the only writer of `state`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheLine {
    /// Address tag identifying the resident block.
    pub tag: u64,
    /// Current coherence state.
    pub state: LineState,
}

/// Reply a snoop or local access sends back to its originator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnoopReply {
    /// The responder supplies the data payload.
    pub has_data: bool,
    /// The responder keeps a shared copy of the line.
    pub is_shared: bool,
}

/// Side effects a coherence event handler asks its controller to perform.
///
/// Defaults to no effect; handlers combine the flags they need.
#[derive(Clone, Copy, Debug, Default)]
pub struct Outcome {
    /// Write the dirty line back toward memory before anything else.
    pub writeback: bool,
    /// Broadcast an eviction so every peer copy is invalidated.
    pub invalidate_peers: bool,
    /// Respond to the event's originator.
    pub respond: Option<SnoopReply>,
    /// Escalate to the lower interconnect (miss path).
    pub forward: bool,
    /// Retire the pending entry with no further traffic.
    pub retire: bool,
}

impl Outcome {
    /// An outcome with no side effects.
    pub fn none() -> Self {
        Self::default()
    }

    /// Respond to the originator with the given payload/shared flags.
    pub fn respond(has_data: bool, is_shared: bool) -> Self {
        Self {
            respond: Some(SnoopReply {
                has_data,
                is_shared,
            }),
            ..Self::default()
        }
    }

    /// Escalate the access to the lower interconnect.
    pub fn forward() -> Self {
        Self {
            forward: true,
            ..Self::default()
        }
    }

    /// Retire the pending entry silently.
    pub fn retire() -> Self {
        Self {
            retire: true,
            ..Self::default()
        }
    }
}

/// Protocol engine attached to a cache controller.
///
/// Handlers receive the request and the affected line and return the side
/// effects the controller must carry out; they update protocol statistics as
/// they go. `complete_request` is the only place a final post-transaction
/// state is chosen.
pub trait CoherenceLogic {
    /// Short protocol name for diagnostics.
    fn name(&self) -> &str;

    /// A local access found a valid resident line.
    fn handle_local_hit(&mut self, req: &MemoryAccessRequest, line: &mut CacheLine) -> Outcome;

    /// A local access missed; the controller will escalate it.
    fn handle_local_miss(&mut self, req: &MemoryAccessRequest) -> Outcome;

    /// A snoop from an interconnect found a valid resident line.
    fn handle_interconn_hit(&mut self, req: &MemoryAccessRequest, line: &mut CacheLine)
    -> Outcome;

    /// A snoop from an interconnect missed.
    fn handle_interconn_miss(&mut self, req: &MemoryAccessRequest) -> Outcome;

    /// A new line is about to occupy `victim`'s slot; decide the victim's
    /// writeback and invalidate it.
    fn handle_cache_insert(&mut self, victim: &mut CacheLine) -> Outcome;

    /// The given line is being evicted by a local operation.
    fn handle_cache_evict(&mut self, req: &MemoryAccessRequest, line: &mut CacheLine) -> Outcome;

    /// A response message arrived for a pending entry (before completion).
    fn handle_response(&mut self, req: &MemoryAccessRequest, msg: &Message) -> Outcome;

    /// A transaction completed; choose and install the line's final state from
    /// the operation kind and the aggregated peer-shared flag.
    fn complete_request(
        &mut self,
        req: &MemoryAccessRequest,
        line: &mut CacheLine,
        is_shared: bool,
    );

    /// Whether the line holds a resident copy under this protocol.
    fn is_line_valid(&self, line: &CacheLine) -> bool;

    /// Forces the line out of the protocol (snoop-invalidate, annul cleanup).
    fn invalidate_line(&self, line: &mut CacheLine);

    /// Protocol statistics collected so far.
    fn stats(&self) -> &ProtocolStats;
}
