//! Interconnect unit tests.

/// Plain arbitrated bus: arbitration, annul, backpressure.
pub mod bus;
/// Point-to-point link: forwarding, registration, fast path.
pub mod p2p;
