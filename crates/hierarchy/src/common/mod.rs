//! Shared identifiers and status types used across the hierarchy.
//!
//! This module defines the small vocabulary every component speaks:
//! 1. **Ids:** Stable indices for controllers and interconnects registered with the driver.
//! 2. **Errors:** The recoverable error and status taxonomy (see [`error`]).

/// Recoverable error and status types (backpressure, admission, fast path).
pub mod error;

/// Stable index of a controller registered with the memory hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CtrlId(pub usize);

/// Stable index of an interconnect registered with the memory hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);

impl std::fmt::Display for CtrlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctrl[{}]", self.0)
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link[{}]", self.0)
    }
}
