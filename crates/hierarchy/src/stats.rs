//! Statistics collection for the memory hierarchy.
//!
//! This module tracks per-component counters consumed by the embedding
//! simulator's reporting layer. It provides:
//! 1. **Controller counters:** Hits, misses, snoop traffic, writebacks, stalls,
//!    and accumulated completion latency.
//! 2. **Protocol counters:** Per-state hit/miss distributions and the ordered-pair
//!    state-transition frequency table, split by user/kernel origin.
//!
//! This crate only increments counters; formatting beyond a human-readable
//! `print` and any persistence belong to the embedding simulator.

use crate::coherence::LineState;

/// Per-controller event counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerStats {
    /// Local accesses served from a valid resident line.
    pub hits: u64,
    /// Local accesses that left the controller (forwarded below).
    pub misses: u64,
    /// Snoops that found a resident line.
    pub snoop_hits: u64,
    /// Snoops that missed.
    pub snoop_misses: u64,
    /// Dirty-line writebacks emitted.
    pub writebacks: u64,
    /// Submissions deferred by interconnect backpressure.
    pub stalls: u64,
    /// Requests completed back to their issuer.
    pub completed: u64,
    /// Sum of issue-to-completion latency over completed requests.
    pub total_latency: u64,
}

impl ControllerStats {
    /// Mean issue-to-completion latency in cycles, zero when nothing completed.
    pub fn mean_latency(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.completed as f64
        }
    }
}

/// Frequency table over ordered (from, to) coherence-state pairs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionTable {
    cells: [u64; 16],
}

impl TransitionTable {
    /// Records one `from → to` transition.
    #[inline]
    pub fn record(&mut self, from: LineState, to: LineState) {
        self.cells[(from.index() << 2) | to.index()] += 1;
    }

    /// Count of `from → to` transitions observed so far.
    #[inline]
    pub fn count(&self, from: LineState, to: LineState) -> u64 {
        self.cells[(from.index() << 2) | to.index()]
    }

    /// Total transitions recorded.
    pub fn total(&self) -> u64 {
        self.cells.iter().sum()
    }
}

/// Coherence-protocol statistics: hit/miss state distributions and
/// transition frequencies, split by the originating instruction's privilege.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtocolStats {
    /// Local hits, indexed by the line state found.
    pub hit_state_cpu: [u64; 4],
    /// Snoop hits, indexed by the line state found.
    pub hit_state_snoop: [u64; 4],
    /// Local misses, indexed by the line state found (Invalid or absent).
    pub miss_state_cpu: [u64; 4],
    /// Transitions driven by user-space instructions.
    pub transitions_user: TransitionTable,
    /// Transitions driven by kernel-space instructions.
    pub transitions_kernel: TransitionTable,
}

impl ProtocolStats {
    /// Records a transition under the requester's privilege bucket.
    #[inline]
    pub fn record_transition(&mut self, kernel: bool, from: LineState, to: LineState) {
        if kernel {
            self.transitions_kernel.record(from, to);
        } else {
            self.transitions_user.record(from, to);
        }
    }

    /// Combined user + kernel count for one ordered transition.
    pub fn transition_count(&self, from: LineState, to: LineState) -> u64 {
        self.transitions_user.count(from, to) + self.transitions_kernel.count(from, to)
    }

    /// Prints the transition table and state distributions to stdout.
    pub fn print(&self, name: &str) {
        const STATES: [LineState; 4] = [
            LineState::Invalid,
            LineState::Modified,
            LineState::Exclusive,
            LineState::Shared,
        ];
        println!("----------------------------------------------------------");
        println!("COHERENCE PROTOCOL: {name}");
        for from in STATES {
            for to in STATES {
                let n = self.transition_count(from, to);
                if n > 0 {
                    println!("  trans.{from}->{to}    {n}");
                }
            }
        }
        for (i, state) in STATES.iter().enumerate() {
            println!(
                "  hit.cpu.{state:<10} {:<10} hit.snoop.{state:<10} {:<10} miss.cpu.{state:<10} {}",
                self.hit_state_cpu[i], self.hit_state_snoop[i], self.miss_state_cpu[i]
            );
        }
        println!("----------------------------------------------------------");
    }
}
