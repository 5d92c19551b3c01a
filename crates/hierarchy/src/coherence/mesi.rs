//! Four-state (Modified/Exclusive/Shared/Invalid) ownership protocol.
//!
//! Transition rules:
//! - A read miss with no peer copy installs **Exclusive**; with a peer copy,
//!   **Shared**; the peer downgrades to Shared too, writing dirty data back
//!   first if it held Modified.
//! - A write leaves the local line **Modified** and every peer copy
//!   **Invalid**; a Modified peer supplies the data and writes back before
//!   invalidating.
//! - Evicting a Modified line writes it back before the slot is reused.
//!
//! [`FourStateLogic::new_state`] is the single decision point mapping
//! (operation kind, aggregated peer-shared flag) to the post-transaction
//! state; every completion funnels through it.

use tracing::trace;

use crate::coherence::{CacheLine, CoherenceLogic, LineState, Outcome};
use crate::message::Message;
use crate::pool::{MemoryAccessRequest, OpKind};
use crate::stats::ProtocolStats;

/// Four-state ownership protocol engine.
#[derive(Debug, Default)]
pub struct FourStateLogic {
    stats: ProtocolStats,
}

impl FourStateLogic {
    /// Creates a protocol engine with zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chooses the post-transaction state for a completed local access.
    ///
    /// This is the only place new states are selected, so the legal subset of
    /// the sixteen ordered transitions is enforced here.
    ///
    /// # Panics
    ///
    /// Aborts on combinations the protocol forbids: completing a writeback,
    /// or a write whose broadcast reported a surviving shared copy.
    pub fn new_state(&self, kind: OpKind, old: LineState, is_shared: bool) -> LineState {
        match kind {
            OpKind::Evict => LineState::Invalid,
            OpKind::Update => {
                panic!("writeback request completed as a cache transaction (state {old})")
            }
            OpKind::Read if is_shared => LineState::Shared,
            OpKind::Read => match old {
                LineState::Invalid | LineState::Exclusive => LineState::Exclusive,
                LineState::Shared => LineState::Shared,
                LineState::Modified => LineState::Modified,
            },
            OpKind::Write => {
                assert!(
                    !is_shared,
                    "write completion reported a surviving shared copy (state {old})"
                );
                LineState::Modified
            }
        }
    }

    fn record(&mut self, req: &MemoryAccessRequest, from: LineState, to: LineState) {
        self.stats.record_transition(req.is_kernel(), from, to);
    }
}

impl CoherenceLogic for FourStateLogic {
    fn name(&self) -> &str {
        "mesi"
    }

    fn handle_local_hit(&mut self, req: &MemoryAccessRequest, line: &mut CacheLine) -> Outcome {
        let old = line.state;
        self.stats.hit_state_cpu[old.index()] += 1;
        trace!(%req, state = %old, "local hit");

        match req.kind() {
            OpKind::Evict => {
                self.record(req, old, LineState::Invalid);
                line.state = LineState::Invalid;
                Outcome::retire()
            }
            // A writeback reaching a valid line continues toward memory.
            OpKind::Update => Outcome::forward(),
            OpKind::Read => match old {
                LineState::Invalid => {
                    self.stats.miss_state_cpu[old.index()] += 1;
                    Outcome::forward()
                }
                _ => Outcome::respond(true, false),
            },
            OpKind::Write => match old {
                LineState::Invalid => {
                    self.stats.miss_state_cpu[old.index()] += 1;
                    Outcome::forward()
                }
                LineState::Modified => Outcome::respond(true, false),
                LineState::Exclusive => {
                    // Sole clean copy: upgrade silently, no bus traffic.
                    self.record(req, old, LineState::Modified);
                    line.state = LineState::Modified;
                    Outcome::respond(true, false)
                }
                LineState::Shared => {
                    // Peers hold copies; they must be invalidated.
                    self.record(req, old, LineState::Modified);
                    line.state = LineState::Modified;
                    Outcome {
                        invalidate_peers: true,
                        ..Outcome::respond(true, false)
                    }
                }
            },
        }
    }

    fn handle_local_miss(&mut self, req: &MemoryAccessRequest) -> Outcome {
        self.stats.miss_state_cpu[LineState::Invalid.index()] += 1;
        trace!(%req, "local miss");
        Outcome::forward()
    }

    fn handle_interconn_hit(
        &mut self,
        req: &MemoryAccessRequest,
        line: &mut CacheLine,
    ) -> Outcome {
        let old = line.state;
        self.stats.hit_state_snoop[old.index()] += 1;
        trace!(%req, state = %old, "snoop hit");

        match req.kind() {
            OpKind::Evict => {
                self.record(req, old, LineState::Invalid);
                line.state = LineState::Invalid;
                Outcome::retire()
            }
            // A passing writeback concerns memory, not peer caches.
            OpKind::Update => Outcome::retire(),
            OpKind::Read => match old {
                LineState::Modified => {
                    self.record(req, old, LineState::Shared);
                    line.state = LineState::Shared;
                    Outcome {
                        writeback: true,
                        ..Outcome::respond(true, true)
                    }
                }
                LineState::Exclusive => {
                    self.record(req, old, LineState::Shared);
                    line.state = LineState::Shared;
                    Outcome::respond(true, true)
                }
                LineState::Shared => {
                    self.record(req, old, LineState::Shared);
                    Outcome::respond(true, true)
                }
                LineState::Invalid => Outcome::respond(false, false),
            },
            OpKind::Write => match old {
                LineState::Modified => {
                    self.record(req, old, LineState::Invalid);
                    line.state = LineState::Invalid;
                    Outcome {
                        writeback: true,
                        ..Outcome::respond(true, false)
                    }
                }
                LineState::Exclusive | LineState::Shared => {
                    self.record(req, old, LineState::Invalid);
                    line.state = LineState::Invalid;
                    Outcome::respond(true, false)
                }
                LineState::Invalid => Outcome::respond(false, false),
            },
        }
    }

    fn handle_interconn_miss(&mut self, req: &MemoryAccessRequest) -> Outcome {
        self.stats.miss_state_cpu[LineState::Invalid.index()] += 1;
        trace!(%req, "snoop miss");
        match req.kind() {
            // The broadcast still needs this endpoint's acknowledgment.
            OpKind::Read | OpKind::Write => Outcome::respond(false, false),
            OpKind::Evict | OpKind::Update => Outcome::retire(),
        }
    }

    fn handle_cache_insert(&mut self, victim: &mut CacheLine) -> Outcome {
        let writeback = victim.state == LineState::Modified;
        victim.state = LineState::Invalid;
        Outcome {
            writeback,
            ..Outcome::none()
        }
    }

    fn handle_cache_evict(&mut self, _req: &MemoryAccessRequest, line: &mut CacheLine) -> Outcome {
        Outcome {
            writeback: line.state == LineState::Modified,
            ..Outcome::none()
        }
    }

    fn handle_response(&mut self, _req: &MemoryAccessRequest, _msg: &Message) -> Outcome {
        Outcome::none()
    }

    fn complete_request(
        &mut self,
        req: &MemoryAccessRequest,
        line: &mut CacheLine,
        is_shared: bool,
    ) {
        let old = line.state;
        let new = self.new_state(req.kind(), old, is_shared);
        self.record(req, old, new);
        line.state = new;
        trace!(%req, from = %old, to = %new, "transaction complete");
    }

    fn is_line_valid(&self, line: &CacheLine) -> bool {
        line.state.is_valid()
    }

    fn invalidate_line(&self, line: &mut CacheLine) {
        line.state = LineState::Invalid;
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }
}
