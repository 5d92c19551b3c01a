//! Reference-counted pool of in-flight memory access requests.
//!
//! Every memory operation travelling through the hierarchy is described by one
//! [`MemoryAccessRequest`] owned by the [`RequestPool`]. This module provides:
//! 1. **Descriptors:** Request identity (core, thread, reorder-buffer id, address,
//!    operation kind) stable for the slot's lifetime.
//! 2. **Handles:** Index-based [`RequestRef`] handles held by controllers and
//!    interconnect queues; holders retain/release through the pool.
//! 3. **Reclamation:** Lazy sweep of zero-reference entries, triggered when the
//!    free share drops below the configured low-water ratio.
//!
//! The pool is the only globally shared mutable structure in the kernel; it is
//! driven from the single simulation thread, so the reference-count invariant is
//! the sole reclamation mechanism: no entry returns to the free set while any
//! holder still references it.

use tracing::debug;

use crate::config::PoolConfig;

/// Kind of memory operation a request models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Cache miss on a load.
    #[default]
    Read,
    /// Cache miss on a store.
    Write,
    /// Dirty-line writeback toward memory.
    Update,
    /// Cache line eviction / peer invalidation.
    Evict,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Update => "update",
            Self::Evict => "evict",
        };
        f.write_str(name)
    }
}

/// Handle to a pooled request slot.
///
/// Plain index, `Copy`, comparable; two handles are equal exactly when they
/// name the same slot. Holders must balance every clone they keep with a
/// `release` on the owning pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RequestRef(u32);

impl RequestRef {
    /// Raw slot index, for diagnostics.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One pending memory operation.
///
/// Identity, `(core, thread, rob_id, addr, is_instruction, kind)`, is set at
/// initialization and used for duplicate detection; it must not change while
/// the request is in flight.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryAccessRequest {
    core: u8,
    thread: u8,
    addr: u64,
    rob_id: i32,
    issue_cycle: u64,
    owner_ip: u64,
    is_instruction: bool,
    kind: OpKind,
    refcount: u32,
}

impl MemoryAccessRequest {
    /// Initializes the descriptor for a new operation; the reference count
    /// starts at zero and is managed by holders through the pool.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        core: u8,
        thread: u8,
        addr: u64,
        rob_id: i32,
        issue_cycle: u64,
        is_instruction: bool,
        owner_ip: u64,
        kind: OpKind,
    ) {
        *self = Self {
            core,
            thread,
            addr,
            rob_id,
            issue_cycle,
            owner_ip,
            is_instruction,
            kind,
            refcount: 0,
        };
    }

    /// Originating core id.
    #[inline]
    pub fn core(&self) -> u8 {
        self.core
    }

    /// Originating hardware thread id.
    #[inline]
    pub fn thread(&self) -> u8 {
        self.thread
    }

    /// Physical address of the access.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Reorder-buffer id of the originating instruction.
    #[inline]
    pub fn rob_id(&self) -> i32 {
        self.rob_id
    }

    /// Cycle at which the access was issued.
    #[inline]
    pub fn issue_cycle(&self) -> u64 {
        self.issue_cycle
    }

    /// Operation kind.
    #[inline]
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Changes the operation kind (used when a writeback is re-purposed).
    #[inline]
    pub fn set_kind(&mut self, kind: OpKind) {
        self.kind = kind;
    }

    /// Whether the access originates from instruction fetch.
    #[inline]
    pub fn is_instruction(&self) -> bool {
        self.is_instruction
    }

    /// Instruction address of the owning instruction.
    #[inline]
    pub fn owner_ip(&self) -> u64 {
        self.owner_ip
    }

    /// Whether the owning instruction executed in kernel space, judged from
    /// the high bits of its instruction address.
    #[inline]
    pub fn is_kernel(&self) -> bool {
        (self.owner_ip >> 48) != 0
    }

    /// Current reference count.
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Whether this request has the same identity as the given fields.
    pub fn matches_parts(
        &self,
        core: u8,
        thread: u8,
        rob_id: i32,
        addr: u64,
        is_instruction: bool,
        is_write: bool,
    ) -> bool {
        let kind = if is_write { OpKind::Write } else { OpKind::Read };
        self.core == core
            && self.thread == thread
            && self.rob_id == rob_id
            && self.addr == addr
            && self.is_instruction == is_instruction
            && self.kind == kind
    }

    /// Whether two requests carry the same identity.
    pub fn matches(&self, other: &Self) -> bool {
        self.core == other.core
            && self.thread == other.thread
            && self.rob_id == other.rob_id
            && self.addr == other.addr
            && self.is_instruction == other.is_instruction
            && self.kind == other.kind
    }
}

impl std::fmt::Display for MemoryAccessRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "core[{}] thread[{}] addr[{:#x}] rob[{}] cycle[{}] refs[{}] op[{}]",
            self.core,
            self.thread,
            self.addr,
            self.rob_id,
            self.issue_cycle,
            self.refcount,
            self.kind
        )
    }
}

/// Fixed-capacity arena of request slots, partitioned into free and used sets.
///
/// Allocation takes from the free set; reclamation is lazy: `sweep` moves
/// every used entry whose reference count reached zero back to the free set,
/// and runs automatically whenever the free share drops under the low-water
/// ratio.
#[derive(Debug)]
pub struct RequestPool {
    slots: Vec<MemoryAccessRequest>,
    in_use: Vec<bool>,
    free: Vec<u32>,
    low_water: usize,
}

impl RequestPool {
    /// Creates a pool with the configured capacity and low-water ratio.
    pub fn new(config: &PoolConfig) -> Self {
        let capacity = config.size.max(1);
        Self {
            slots: vec![MemoryAccessRequest::default(); capacity],
            in_use: vec![false; capacity],
            free: (0..capacity as u32).rev().collect(),
            low_water: (capacity as f64 * config.low_water) as usize,
        }
    }

    /// Pool capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently in the free set.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of slots currently in the used set.
    #[inline]
    pub fn used_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Allocates a zero-initialized request slot.
    ///
    /// Runs a reclaim sweep first when the free share is below the low-water
    /// threshold.
    ///
    /// # Panics
    ///
    /// Aborts the simulation if no free slot remains after the sweep; this is
    /// a configuration error; increase the pool capacity.
    pub fn acquire(&mut self, cycle: u64) -> RequestRef {
        if self.free.len() < self.low_water {
            self.sweep();
        }
        let Some(idx) = self.free.pop() else {
            panic!(
                "request pool exhausted after sweep (capacity {}, cycle {cycle}): \
                 increase pool.size",
                self.slots.len()
            );
        };
        self.slots[idx as usize] = MemoryAccessRequest::default();
        self.in_use[idx as usize] = true;
        RequestRef(idx)
    }

    /// Whether the handle still names a used slot.
    ///
    /// A reclaimed slot means the transaction was annulled and every holder
    /// released; late traffic referencing it must be dropped, not followed.
    #[inline]
    pub fn is_live(&self, r: RequestRef) -> bool {
        self.in_use[r.index()]
    }

    /// Immutable access to a live request.
    ///
    /// # Panics
    ///
    /// Panics if the handle names a slot in the free set (a stale handle is a
    /// logic defect).
    #[inline]
    pub fn get(&self, r: RequestRef) -> &MemoryAccessRequest {
        assert!(self.in_use[r.index()], "stale request handle {}", r.index());
        &self.slots[r.index()]
    }

    /// Mutable access to a live request.
    ///
    /// # Panics
    ///
    /// Panics if the handle names a slot in the free set.
    #[inline]
    pub fn get_mut(&mut self, r: RequestRef) -> &mut MemoryAccessRequest {
        assert!(self.in_use[r.index()], "stale request handle {}", r.index());
        &mut self.slots[r.index()]
    }

    /// Registers one additional holder of the request.
    #[inline]
    pub fn retain(&mut self, r: RequestRef) {
        self.get_mut(r).refcount += 1;
    }

    /// Drops one holder of the request.
    ///
    /// The slot is not reclaimed here; it becomes eligible for the next sweep
    /// once its count reaches zero.
    ///
    /// # Panics
    ///
    /// Aborts the simulation if the count is already zero: an unbalanced
    /// release is a protocol violation, never silently ignored.
    pub fn release(&mut self, r: RequestRef) {
        let req = self.get_mut(r);
        assert!(
            req.refcount > 0,
            "release of unreferenced request {req}: unbalanced retain/release"
        );
        req.refcount -= 1;
    }

    /// Moves every zero-reference used entry back to the free set.
    ///
    /// Idempotent: a second sweep with no intervening releases reclaims
    /// nothing further.
    pub fn sweep(&mut self) {
        let mut reclaimed = 0usize;
        for idx in 0..self.slots.len() {
            if self.in_use[idx] && self.slots[idx].refcount == 0 {
                self.in_use[idx] = false;
                self.free.push(idx as u32);
                reclaimed += 1;
            }
        }
        debug!(reclaimed, free = self.free.len(), "request pool sweep");
    }
}
