//! Configuration system for the memory hierarchy simulator.
//!
//! This module defines all configuration structures used to parameterize the
//! model. It provides:
//! 1. **Defaults:** Baseline hardware constants (pool sizing, queue depths, delays).
//! 2. **Structures:** Hierarchical config for the request pool, buses, caches, and memory.
//!
//! Configuration is supplied as JSON by the embedding simulator or built with
//! `HierarchyConfig::default()`; this crate consumes it read-only.

use serde::Deserialize;

/// Default configuration constants for the memory hierarchy.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden by the embedding simulator.
mod defaults {
    /// Request pool capacity (in-flight memory accesses).
    ///
    /// Allocation aborts the simulation if the pool is still empty after a
    /// reclaim sweep; raise this value rather than handling that condition.
    pub const POOL_SIZE: usize = 512;

    /// Free-share threshold below which the pool sweeps zero-reference entries.
    pub const POOL_LOW_WATER: f64 = 0.10;

    /// Per-endpoint bus queue depth (command queue and data queue each).
    pub const BUS_QUEUE_DEPTH: usize = 16;

    /// Pending-broadcast table capacity on the acknowledging bus.
    pub const BUS_PENDING_DEPTH: usize = 8;

    /// Cycles consumed by one round of bus arbitration.
    pub const BUS_ARBITRATE_DELAY: u64 = 1;

    /// Cycles between winning arbitration and delivery of a broadcast.
    pub const BUS_BROADCAST_DELAY: u64 = 5;

    /// Suggested wait before retrying a backpressured submission.
    pub const RETRY_DELAY: u64 = 5;

    /// Cache controller pending-access (MSHR) queue depth.
    pub const CACHE_PENDING_DEPTH: usize = 128;

    /// Pending-queue slots held back for snoop traffic arriving from an
    /// interconnect, so local admission can never starve snoops.
    pub const CACHE_SNOOP_RESERVE: usize = 2;

    /// Default number of cache sets.
    pub const CACHE_SETS: usize = 64;

    /// Default cache associativity.
    pub const CACHE_WAYS: usize = 8;

    /// Default cache line size in bytes.
    pub const CACHE_LINE_BYTES: usize = 64;

    /// Cache access latency in cycles, reported on fast-path hits.
    pub const CACHE_LATENCY: u64 = 1;

    /// Main memory access latency in cycles (snoop delivery to response).
    pub const MEMORY_LATENCY: u64 = 50;
}

/// Request pool sizing and sweep policy.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Fixed pool capacity; allocation beyond this is a configuration error.
    pub size: usize,
    /// Free-share ratio under which a reclaim sweep runs before allocation.
    pub low_water: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: defaults::POOL_SIZE,
            low_water: defaults::POOL_LOW_WATER,
        }
    }
}

/// Bus queue depths and timing.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Depth of each endpoint's command queue and data queue.
    pub queue_depth: usize,
    /// Pending-broadcast table capacity (acknowledging bus only).
    pub pending_depth: usize,
    /// Cycles for one arbitration round.
    pub arbitrate_delay: u64,
    /// Cycles from arbitration win to broadcast delivery.
    pub broadcast_delay: u64,
    /// Backpressure retry hint in cycles.
    pub retry_delay: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_depth: defaults::BUS_QUEUE_DEPTH,
            pending_depth: defaults::BUS_PENDING_DEPTH,
            arbitrate_delay: defaults::BUS_ARBITRATE_DELAY,
            broadcast_delay: defaults::BUS_BROADCAST_DELAY,
            retry_delay: defaults::RETRY_DELAY,
        }
    }
}

/// Cache controller geometry and admission limits.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of sets in the tag array.
    pub sets: usize,
    /// Associativity (ways per set).
    pub ways: usize,
    /// Cache line size in bytes.
    pub line_bytes: usize,
    /// Pending-access queue (MSHR) depth.
    pub pending_depth: usize,
    /// Pending-queue slots reserved for interconnect-originated traffic.
    pub snoop_reserve: usize,
    /// Access latency in cycles for fast-path hits.
    pub latency: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sets: defaults::CACHE_SETS,
            ways: defaults::CACHE_WAYS,
            line_bytes: defaults::CACHE_LINE_BYTES,
            pending_depth: defaults::CACHE_PENDING_DEPTH,
            snoop_reserve: defaults::CACHE_SNOOP_RESERVE,
            latency: defaults::CACHE_LATENCY,
        }
    }
}

/// Main memory controller timing.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Cycles from snoop delivery to the data response entering the bus.
    pub latency: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            latency: defaults::MEMORY_LATENCY,
        }
    }
}

/// Root configuration for the memory hierarchy.
///
/// Every section has sane defaults; deserialize from JSON to override
/// individual fields.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Request pool sizing and sweep policy.
    pub pool: PoolConfig,
    /// Bus queue depths and timing.
    pub bus: BusConfig,
    /// Cache controller geometry and admission limits.
    pub cache: CacheConfig,
    /// Main memory controller timing.
    pub memory: MemoryConfig,
}
