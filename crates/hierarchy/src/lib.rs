//! Multi-core memory hierarchy simulation kernel.
//!
//! This crate implements a cycle-accurate model of a multi-core machine's memory
//! subsystem with the following:
//! 1. **Requests:** A fixed-capacity, reference-counted pool of in-flight memory accesses.
//! 2. **Interconnects:** Point-to-point links and round-robin arbitrated buses, including
//!    a broadcast bus that collects per-controller snoop acknowledgments.
//! 3. **Controllers:** Cache and main-memory controllers with admission control and
//!    backpressure.
//! 4. **Coherence:** A pluggable protocol engine with a four-state
//!    (Modified/Exclusive/Shared/Invalid) ownership implementation.
//! 5. **Simulation:** A single-threaded, cycle-stepped event queue, configuration, and
//!    statistics collection.
//!
//! The surrounding processor model (pipeline, instruction streams) is an external
//! collaborator: it allocates requests, issues them to a controller, and drains
//! completion notices.

/// Shared types and error taxonomy (ids, status values, fatal diagnostics).
pub mod common;
/// Simulator configuration (defaults and hierarchical config structures).
pub mod config;
/// Coherence protocol contract and the four-state ownership implementation.
pub mod coherence;
/// Cache and memory controllers driving the coherence traffic.
pub mod controller;
/// Interconnect contract plus point-to-point, bus, and broadcast-bus models.
pub mod interconnect;
/// Transient messages exchanged between controllers and interconnects.
pub mod message;
/// Reference-counted request pool and the in-flight access descriptor.
pub mod pool;
/// Cycle-stepped event queue and the top-level hierarchy driver.
pub mod sim;
/// Per-controller and per-protocol statistics counters.
pub mod stats;

/// Root configuration type; use `HierarchyConfig::default()` or deserialize from JSON.
pub use crate::config::HierarchyConfig;
/// Top-level driver owning the pool, event queue, controllers, and interconnects.
pub use crate::sim::MemoryHierarchy;
