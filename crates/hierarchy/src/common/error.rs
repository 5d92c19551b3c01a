//! Recoverable error and status taxonomy.
//!
//! Three kinds of outcome cross component boundaries:
//! 1. **Submit status:** Whether an interconnect accepted a message or signaled
//!    backpressure (queue full; the caller retries on a later cycle).
//! 2. **Fast path:** Whether an access was served without entering a timed queue.
//! 3. **Admission:** Whether a controller accepted a new local access.
//!
//! Fatal conditions (pool exhaustion after a sweep, releasing an unreferenced
//! request, a cache line outside the protocol alphabet) are logic or
//! configuration defects and abort the simulation with diagnostic context
//! rather than appearing here.

use thiserror::Error;

/// Outcome of submitting a message to an interconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The message was accepted (queued, matched to a pending broadcast, or
    /// forwarded directly).
    Queued,
    /// The target queue is full; backpressure, not an error. The caller must
    /// re-attempt on a later cycle.
    Retry,
}

/// Outcome of a fast-path access attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastPathResponse {
    /// Served immediately without queuing; the access completes after the
    /// given latency in cycles.
    Delivered {
        /// Cycles until the access completes.
        latency: u64,
    },
    /// The target is contended or the line is not resident; the access must be
    /// issued through the queued path.
    MustQueue,
    /// This interconnect never serves fast-path accesses.
    Rejected,
}

/// Failure to admit a new local access at a controller.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    /// The controller's pending-access queue is full; retry after the hinted
    /// number of cycles.
    #[error("pending queue full; retry in {retry_in} cycles")]
    QueueFull {
        /// Suggested wait before re-attempting admission.
        retry_in: u64,
    },
    /// An in-flight request with the same identity is already admitted.
    #[error("duplicate in-flight request")]
    Duplicate,
}
