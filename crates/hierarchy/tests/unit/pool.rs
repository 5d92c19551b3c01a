//! Request pool tests.
//!
//! Verifies the free/used partition, the retain/release balance, automatic
//! low-water sweeps, and the fatal paths for exhaustion and unbalanced
//! release.

use cohsim_core::config::PoolConfig;
use cohsim_core::pool::{OpKind, RequestPool};
use proptest::prelude::*;

fn pool(size: usize, low_water: f64) -> RequestPool {
    RequestPool::new(&PoolConfig { size, low_water })
}

// ══════════════════════════════════════════════════════════
// 1. Partition accounting
// ══════════════════════════════════════════════════════════

#[test]
fn new_pool_is_entirely_free() {
    let p = pool(16, 0.1);
    assert_eq!(p.capacity(), 16);
    assert_eq!(p.free_count(), 16);
    assert_eq!(p.used_count(), 0);
}

#[test]
fn acquire_moves_slot_to_used() {
    let mut p = pool(16, 0.1);
    let r = p.acquire(0);
    assert!(p.is_live(r));
    assert_eq!(p.free_count(), 15);
    assert_eq!(p.used_count(), 1);
}

#[test]
fn acquired_slot_is_zero_initialized() {
    let mut p = pool(4, 0.1);
    let r = p.acquire(0);
    p.get_mut(r)
        .init(1, 2, 0x1000, 7, 5, false, 0xdead, OpKind::Write);
    p.retain(r);
    p.release(r);
    p.sweep();

    let r2 = p.acquire(10);
    let req = p.get(r2);
    assert_eq!(req.refcount(), 0);
    assert_eq!(req.addr(), 0);
    assert_eq!(req.kind(), OpKind::Read);
}

// ══════════════════════════════════════════════════════════
// 2. Reference counting
// ══════════════════════════════════════════════════════════

#[test]
fn retain_release_balances() {
    let mut p = pool(8, 0.1);
    let r = p.acquire(0);
    p.retain(r);
    p.retain(r);
    assert_eq!(p.get(r).refcount(), 2);
    p.release(r);
    p.release(r);
    assert_eq!(p.get(r).refcount(), 0);
}

#[test]
#[should_panic(expected = "release of unreferenced request")]
fn unbalanced_release_is_fatal() {
    let mut p = pool(8, 0.1);
    let r = p.acquire(0);
    p.release(r);
}

#[test]
fn referenced_entry_survives_sweep() {
    let mut p = pool(8, 0.1);
    let r = p.acquire(0);
    p.retain(r);
    p.sweep();
    assert!(p.is_live(r));
    assert_eq!(p.used_count(), 1);
}

#[test]
fn unreferenced_entry_is_reclaimed_by_sweep() {
    let mut p = pool(8, 0.1);
    let r = p.acquire(0);
    p.sweep();
    assert!(!p.is_live(r));
    assert_eq!(p.free_count(), 8);
}

#[test]
fn sweep_is_idempotent() {
    let mut p = pool(8, 0.1);
    let _held = {
        let r = p.acquire(0);
        p.retain(r);
        r
    };
    let _free = p.acquire(0);
    p.sweep();
    let after_first = (p.free_count(), p.used_count());
    p.sweep();
    assert_eq!((p.free_count(), p.used_count()), after_first);
}

// ══════════════════════════════════════════════════════════
// 3. Low-water sweeps and exhaustion
// ══════════════════════════════════════════════════════════

/// Capacity 4, low-water 0.5: acquiring 3 then releasing 2 (to zero
/// references) must let the 4th acquire trigger a sweep that restores the
/// free count to 3 before succeeding.
#[test]
fn low_water_sweep_reclaims_before_allocation() {
    let mut p = pool(4, 0.5);
    let a = p.acquire(0);
    let b = p.acquire(0);
    let c = p.acquire(0);
    p.retain(a);
    p.retain(b);
    p.retain(c);
    assert_eq!(p.free_count(), 1);

    p.release(a);
    p.release(b);
    // a and b now have zero references but still occupy used slots.
    assert_eq!(p.used_count(), 3);

    let d = p.acquire(1);
    // The sweep freed a and b (free 1 -> 3), then d took one slot.
    assert_eq!(p.free_count(), 2);
    assert!(p.is_live(d));
    assert!(p.is_live(c));
}

#[test]
#[should_panic(expected = "request pool exhausted")]
fn exhaustion_after_sweep_is_fatal() {
    let mut p = pool(2, 0.5);
    let a = p.acquire(0);
    let b = p.acquire(0);
    p.retain(a);
    p.retain(b);
    let _ = p.acquire(1);
}

// ══════════════════════════════════════════════════════════
// 4. Identity
// ══════════════════════════════════════════════════════════

#[test]
fn identity_matching_covers_all_fields() {
    let mut p = pool(8, 0.1);
    let r = p.acquire(0);
    p.get_mut(r)
        .init(1, 2, 0x8000, 42, 0, false, 0x40_0000, OpKind::Write);

    let req = p.get(r);
    assert!(req.matches_parts(1, 2, 42, 0x8000, false, true));
    assert!(!req.matches_parts(1, 2, 42, 0x8000, false, false)); // kind differs
    assert!(!req.matches_parts(2, 2, 42, 0x8000, false, true)); // core differs
    assert!(!req.matches_parts(1, 2, 41, 0x8000, false, true)); // rob differs
}

#[test]
fn kernel_origin_is_judged_from_owner_ip() {
    let mut p = pool(8, 0.1);
    let r = p.acquire(0);
    p.get_mut(r)
        .init(0, 0, 0x1000, 1, 0, false, 0xffff_8000_0000_1000, OpKind::Read);
    assert!(p.get(r).is_kernel());

    p.get_mut(r)
        .init(0, 0, 0x1000, 1, 0, false, 0x40_0000, OpKind::Read);
    assert!(!p.get(r).is_kernel());
}

// ══════════════════════════════════════════════════════════
// 5. Properties
// ══════════════════════════════════════════════════════════

proptest! {
    /// Under any interleaving of acquire/retain/release, the used count never
    /// exceeds capacity and the free/used partition stays exact. Held entries
    /// (`live`) carry at least one reference and are never reclaimed;
    /// abandoned entries (zero references) are exactly the sweepable surplus.
    #[test]
    fn partition_invariants_hold(ops in proptest::collection::vec(0u8..3, 1..200)) {
        let mut p = pool(16, 0.25);
        // Entries we still hold references on: (handle, refcount >= 1).
        let mut live: Vec<(cohsim_core::pool::RequestRef, u32)> = Vec::new();

        for op in ops {
            let abandoned = p.used_count() - live.len();
            match op {
                // acquire with an issuer hold, when a slot is guaranteed
                0 => {
                    if p.free_count() > 0 || abandoned > 0 {
                        let r = p.acquire(0);
                        p.retain(r);
                        live.push((r, 1));
                    }
                }
                // pile another reference on the newest held entry
                1 => {
                    if let Some((r, n)) = live.last_mut() {
                        p.retain(*r);
                        *n += 1;
                    }
                }
                // drop one reference; fully released entries are abandoned
                _ => {
                    if let Some((r, n)) = live.last_mut() {
                        p.release(*r);
                        *n -= 1;
                        if *n == 0 {
                            let _ = live.pop();
                        }
                    }
                }
            }
            prop_assert!(p.used_count() <= p.capacity());
            prop_assert_eq!(p.used_count() + p.free_count(), p.capacity());
            for (r, _) in &live {
                prop_assert!(p.is_live(*r));
            }
        }

        // Releasing everything makes the whole pool reclaimable.
        for (r, n) in &live {
            for _ in 0..*n {
                p.release(*r);
            }
        }
        p.sweep();
        prop_assert_eq!(p.free_count(), p.capacity());
    }
}
