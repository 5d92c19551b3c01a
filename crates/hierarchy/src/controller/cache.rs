//! Coherent set-associative cache controller.
//!
//! Owns a tag array annotated with coherence state, a fixed-capacity pending
//! access queue, and an attached coherence logic. Local accesses are admitted
//! through `handle_request` (with duplicate suppression and queue-full
//! backpressure); snoops, responses, and completed broadcasts arrive through
//! `handle_interconnect`. The controller translates the coherence logic's
//! outcomes into interconnect traffic: snoop replies, dirty writebacks, and
//! peer invalidations.

use tracing::{debug, trace};

use crate::coherence::{CacheLine, CoherenceLogic, LineState, Outcome};
use crate::common::error::{AdmitError, FastPathResponse};
use crate::common::{CtrlId, LinkId};
use crate::config::HierarchyConfig;
use crate::controller::{Controller, CtrlCtx};
use crate::message::{Message, Sender};
use crate::pool::{MemoryAccessRequest, OpKind, RequestPool, RequestRef};
use crate::stats::{ControllerStats, ProtocolStats};

/// Set-associative tag array with per-line coherence state.
#[derive(Debug)]
pub struct CacheArray {
    sets: usize,
    ways: usize,
    line_bytes: usize,
    lines: Vec<CacheLine>,
    next_victim: Vec<usize>,
}

impl CacheArray {
    fn new(sets: usize, ways: usize, line_bytes: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        Self {
            sets,
            ways,
            line_bytes: line_bytes.max(1),
            lines: vec![CacheLine::default(); sets * ways],
            next_victim: vec![0; sets],
        }
    }

    #[inline]
    fn set_index(&self, addr: u64) -> usize {
        (addr as usize / self.line_bytes) % self.sets
    }

    #[inline]
    fn tag_of(&self, addr: u64) -> u64 {
        addr / (self.line_bytes * self.sets) as u64
    }

    /// Base address of the block resident in the given line.
    fn addr_of(&self, idx: usize) -> u64 {
        let set = idx / self.ways;
        (self.lines[idx].tag * self.sets as u64 + set as u64) * self.line_bytes as u64
    }

    /// Index of the line whose tag matches `addr`, regardless of state.
    fn probe(&self, addr: u64) -> Option<usize> {
        let base = self.set_index(addr) * self.ways;
        let tag = self.tag_of(addr);
        (base..base + self.ways)
            .find(|&i| self.lines[i].state.is_valid() && self.lines[i].tag == tag)
    }

    /// Picks a victim line for `addr`: the first invalid way, or the set's
    /// rotation otherwise.
    fn victim_index(&mut self, addr: u64) -> usize {
        let set = self.set_index(addr);
        let base = set * self.ways;
        if let Some(idx) = (base..base + self.ways).find(|&i| !self.lines[i].state.is_valid()) {
            return idx;
        }
        let way = self.next_victim[set];
        self.next_victim[set] = (way + 1) % self.ways;
        base + way
    }

    fn line(&self, idx: usize) -> &CacheLine {
        &self.lines[idx]
    }

    fn line_mut(&mut self, idx: usize) -> &mut CacheLine {
        &mut self.lines[idx]
    }
}

/// Where a pending access came from, and so where its completion goes.
#[derive(Clone, Copy, Debug)]
enum Origin {
    /// Issued directly by the core; completes into the outbox.
    Core,
    /// Arrived over an upper link; completes as a response message.
    Link(LinkId),
}

#[derive(Clone, Copy, Debug)]
struct PendingAccess {
    request: RequestRef,
    origin: Origin,
}

/// Cache controller driving a coherence protocol over a lower interconnect.
pub struct CacheController {
    id: CtrlId,
    name: String,
    private: bool,
    lower: LinkId,
    array: CacheArray,
    logic: Box<dyn CoherenceLogic>,
    pending: Vec<PendingAccess>,
    pending_depth: usize,
    snoop_reserve: usize,
    latency: u64,
    retry_delay: u64,
    stats: ControllerStats,
}

impl std::fmt::Debug for CacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheController")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("private", &self.private)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl CacheController {
    /// Creates a cache controller.
    ///
    /// # Arguments
    ///
    /// * `id` - This controller's hierarchy id.
    /// * `name` - Diagnostic name (e.g. `"l2_0"`).
    /// * `lower` - The coherence interconnect this controller snoops on.
    /// * `private` - Whether the cache is exclusive to one core; only
    ///   private caches contribute to a broadcast's shared outcome.
    /// * `logic` - Protocol engine deciding line-state changes.
    /// * `config` - Cache geometry and admission limits.
    pub fn new(
        id: CtrlId,
        name: impl Into<String>,
        lower: LinkId,
        private: bool,
        logic: Box<dyn CoherenceLogic>,
        config: &HierarchyConfig,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            private,
            lower,
            array: CacheArray::new(
                config.cache.sets,
                config.cache.ways,
                config.cache.line_bytes,
            ),
            logic,
            pending: Vec::new(),
            pending_depth: config.cache.pending_depth,
            snoop_reserve: config.cache.snoop_reserve,
            latency: config.cache.latency,
            retry_delay: config.bus.retry_delay,
            stats: ControllerStats::default(),
        }
    }

    /// Coherence state of the line holding `addr`, `Invalid` if absent.
    pub fn line_state(&self, addr: u64) -> LineState {
        self.array
            .probe(addr)
            .map_or(LineState::Invalid, |i| self.array.line(i).state)
    }

    /// Number of in-flight pending accesses.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn find_pending(&self, request: RequestRef) -> Option<usize> {
        self.pending.iter().position(|p| p.request == request)
    }

    /// Creates a writeback request for `addr` and hands it to the lower
    /// interconnect.
    fn emit_writeback(&mut self, addr: u64, req: &MemoryAccessRequest, ctx: &mut CtrlCtx<'_>) {
        let wb = ctx.pool.acquire(ctx.cycle);
        ctx.pool.get_mut(wb).init(
            req.core(),
            req.thread(),
            addr,
            -1,
            ctx.cycle,
            false,
            req.owner_ip(),
            OpKind::Update,
        );
        self.stats.writebacks += 1;
        trace!(cache = %self.name, addr = format_args!("{addr:#x}"), "writeback");
        ctx.submissions.push((
            self.lower,
            Message::new(Sender::Controller(self.id), wb).with_data(true),
        ));
    }

    /// Creates an eviction broadcast so peer copies of `addr` are invalidated.
    fn emit_evict(&mut self, addr: u64, req: &MemoryAccessRequest, ctx: &mut CtrlCtx<'_>) {
        let ev = ctx.pool.acquire(ctx.cycle);
        ctx.pool.get_mut(ev).init(
            req.core(),
            req.thread(),
            addr,
            -1,
            ctx.cycle,
            false,
            req.owner_ip(),
            OpKind::Evict,
        );
        trace!(cache = %self.name, addr = format_args!("{addr:#x}"), "peer invalidation");
        ctx.submissions.push((
            self.lower,
            Message::new(Sender::Controller(self.id), ev),
        ));
    }

    /// Retires a pending access: core-issued entries complete into the
    /// outbox, link-issued entries answer over their link.
    fn complete_entry(
        &mut self,
        pos: usize,
        has_data: bool,
        is_shared: bool,
        ctx: &mut CtrlCtx<'_>,
    ) {
        let entry = self.pending.remove(pos);
        match entry.origin {
            Origin::Core => {
                let issued = ctx.pool.get(entry.request).issue_cycle();
                self.stats.completed += 1;
                self.stats.total_latency += ctx.cycle.saturating_sub(issued);
                ctx.complete(entry.request, has_data, is_shared);
            }
            Origin::Link(link) => {
                // Writebacks and evictions are one-way; only data
                // transactions answer upstream.
                let kind = ctx.pool.get(entry.request).kind();
                if matches!(kind, OpKind::Read | OpKind::Write) {
                    ctx.submissions.push((
                        link,
                        Message::new(Sender::Controller(self.id), entry.request)
                            .with_data(has_data)
                            .with_shared(is_shared),
                    ));
                }
            }
        }
        ctx.pool.release(entry.request);
    }

    /// Finds or installs a line slot for `req`, writing back a dirty victim.
    fn ensure_line(&mut self, req: &MemoryAccessRequest, ctx: &mut CtrlCtx<'_>) -> usize {
        if let Some(idx) = self.array.probe(req.addr()) {
            return idx;
        }
        let idx = self.array.victim_index(req.addr());
        let victim_addr = self.array.addr_of(idx);
        let outcome = self.logic.handle_cache_insert(self.array.line_mut(idx));
        if outcome.writeback {
            self.emit_writeback(victim_addr, req, ctx);
        }
        let tag = self.array.tag_of(req.addr());
        self.array.line_mut(idx).tag = tag;
        idx
    }

    /// A message matched one of our pending accesses: run the response hook,
    /// install the final line state, and retire the entry.
    fn finish_transaction(&mut self, pos: usize, msg: &Message, ctx: &mut CtrlCtx<'_>) {
        let req = *ctx.pool.get(msg.request);
        let _ = self.logic.handle_response(&req, msg);
        if msg.has_data && matches!(req.kind(), OpKind::Read | OpKind::Write) {
            let idx = self.ensure_line(&req, ctx);
            self.logic
                .complete_request(&req, self.array.line_mut(idx), msg.is_shared);
        }
        self.complete_entry(pos, msg.has_data, msg.is_shared, ctx);
    }

    /// Carries out a coherence outcome for the local access at `pos`.
    fn apply_local(
        &mut self,
        pos: usize,
        req: &MemoryAccessRequest,
        outcome: Outcome,
        ctx: &mut CtrlCtx<'_>,
    ) {
        if outcome.writeback {
            self.emit_writeback(req.addr(), req, ctx);
        }
        if outcome.invalidate_peers {
            self.emit_evict(req.addr(), req, ctx);
        }
        if outcome.forward {
            let request = self.pending[pos].request;
            match req.kind() {
                OpKind::Read | OpKind::Write => {
                    // Entry stays pending until the merged outcome arrives.
                    ctx.submissions.push((
                        self.lower,
                        Message::new(Sender::Controller(self.id), request),
                    ));
                }
                OpKind::Update => {
                    // Writebacks are fire-and-forget toward memory.
                    ctx.submissions.push((
                        self.lower,
                        Message::new(Sender::Controller(self.id), request).with_data(true),
                    ));
                    self.complete_entry(pos, false, false, ctx);
                }
                OpKind::Evict => {
                    ctx.submissions.push((
                        self.lower,
                        Message::new(Sender::Controller(self.id), request),
                    ));
                    self.complete_entry(pos, false, false, ctx);
                }
            }
            return;
        }
        if let Some(reply) = outcome.respond {
            self.complete_entry(pos, reply.has_data, reply.is_shared, ctx);
            return;
        }
        if outcome.retire {
            self.complete_entry(pos, false, false, ctx);
        }
    }
}

impl Controller for CacheController {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_private(&self) -> bool {
        self.private
    }

    fn is_full(&self, from_interconnect: bool) -> bool {
        if from_interconnect {
            self.pending.len() >= self.pending_depth
        } else {
            self.pending.len() + self.snoop_reserve >= self.pending_depth
        }
    }

    fn handle_request(&mut self, msg: Message, ctx: &mut CtrlCtx<'_>) -> Result<(), AdmitError> {
        // A message matching a pending access is the response to an earlier
        // forward (point-to-point links hand responses back through here).
        if let Some(pos) = self.find_pending(msg.request) {
            self.finish_transaction(pos, &msg, ctx);
            return Ok(());
        }

        if self.is_full(false) {
            self.stats.stalls += 1;
            debug!(cache = %self.name, "pending queue full");
            return Err(AdmitError::QueueFull {
                retry_in: self.retry_delay,
            });
        }
        let req = *ctx.pool.get(msg.request);
        if self
            .pending
            .iter()
            .any(|p| ctx.pool.get(p.request).matches(&req))
        {
            debug!(cache = %self.name, %req, "duplicate admission rejected");
            return Err(AdmitError::Duplicate);
        }

        ctx.pool.retain(msg.request);
        let origin = match msg.sender {
            Sender::Interconnect(link) => Origin::Link(link),
            Sender::Controller(_) => Origin::Core,
        };
        self.pending.push(PendingAccess {
            request: msg.request,
            origin,
        });
        let pos = self.pending.len() - 1;

        match self.array.probe(req.addr()) {
            Some(idx) if self.logic.is_line_valid(self.array.line(idx)) => {
                self.stats.hits += 1;
                let outcome = self.logic.handle_local_hit(&req, self.array.line_mut(idx));
                self.apply_local(pos, &req, outcome, ctx);
            }
            _ => {
                self.stats.misses += 1;
                let outcome = if req.kind() == OpKind::Evict {
                    // Nothing resident; the eviction is already done.
                    Outcome::retire()
                } else {
                    self.logic.handle_local_miss(&req)
                };
                self.apply_local(pos, &req, outcome, ctx);
            }
        }
        Ok(())
    }

    fn handle_interconnect(&mut self, msg: Message, ctx: &mut CtrlCtx<'_>) {
        if let Some(pos) = self.find_pending(msg.request) {
            if msg.has_data {
                self.finish_transaction(pos, &msg, ctx);
            } else {
                let req = *ctx.pool.get(msg.request);
                let _ = self.logic.handle_response(&req, &msg);
            }
            return;
        }

        // Data-carrying traffic that matches nothing here is another
        // transaction's completion or a passing writeback; not our concern.
        if msg.has_data {
            trace!(cache = %self.name, "unmatched data message ignored");
            return;
        }

        let Sender::Interconnect(from) = msg.sender else {
            debug!(cache = %self.name, "snoop without interconnect sender dropped");
            return;
        };
        let req = *ctx.pool.get(msg.request);
        let outcome = match self.array.probe(req.addr()) {
            Some(idx) if self.logic.is_line_valid(self.array.line(idx)) => {
                self.stats.snoop_hits += 1;
                self.logic
                    .handle_interconn_hit(&req, self.array.line_mut(idx))
            }
            _ => {
                self.stats.snoop_misses += 1;
                self.logic.handle_interconn_miss(&req)
            }
        };

        if outcome.writeback {
            self.emit_writeback(req.addr(), &req, ctx);
        }
        if let Some(reply) = outcome.respond {
            ctx.submissions.push((
                from,
                Message::new(Sender::Controller(self.id), msg.request)
                    .with_data(reply.has_data)
                    .with_shared(reply.is_shared),
            ));
        }
    }

    fn access_fast_path(
        &mut self,
        _link: LinkId,
        request: RequestRef,
        ctx: &mut CtrlCtx<'_>,
    ) -> FastPathResponse {
        let req = ctx.pool.get(request);
        match self.array.probe(req.addr()) {
            Some(idx) if self.logic.is_line_valid(self.array.line(idx)) => {
                let state = self.array.line(idx).state;
                match req.kind() {
                    OpKind::Read => FastPathResponse::Delivered {
                        latency: self.latency,
                    },
                    // A write is only uncontended when no peer can hold a copy.
                    OpKind::Write
                        if matches!(state, LineState::Modified | LineState::Exclusive) =>
                    {
                        FastPathResponse::Delivered {
                            latency: self.latency,
                        }
                    }
                    _ => FastPathResponse::MustQueue,
                }
            }
            _ => FastPathResponse::MustQueue,
        }
    }

    fn annul(&mut self, request: RequestRef, pool: &mut RequestPool) {
        let mut i = 0;
        let mut dropped = 0;
        while i < self.pending.len() {
            if self.pending[i].request == request {
                let entry = self.pending.remove(i);
                pool.release(entry.request);
                dropped += 1;
            } else {
                i += 1;
            }
        }
        if dropped > 0 {
            debug!(cache = %self.name, dropped, "pending accesses annulled");
        }
    }

    fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ControllerStats {
        &mut self.stats
    }

    fn protocol_stats(&self) -> Option<&ProtocolStats> {
        Some(self.logic.stats())
    }

    fn as_cache(&self) -> Option<&CacheController> {
        Some(self)
    }
}
