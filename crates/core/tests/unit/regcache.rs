//! Register-cache discipline tests.

use mipsrec_core::rec::builder::{CodeBuilder, HostOp, StateField, T1, V0};
use mipsrec_core::rec::regcache::RegCache;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn count_gpr_stores(ops: &[HostOp], guest: u8) -> usize {
    ops.iter()
        .filter(|op| {
            matches!(
                op,
                HostOp::StoreState {
                    field: StateField::Gpr(reg),
                    ..
                } if *reg == guest
            )
        })
        .count()
}

fn count_gpr_loads(ops: &[HostOp], guest: u8) -> usize {
    ops.iter()
        .filter(|op| {
            matches!(
                op,
                HostOp::LoadState {
                    field: StateField::Gpr(reg),
                    ..
                } if *reg == guest
            )
        })
        .count()
}

#[test]
fn storeback_is_idempotent() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    let hw = cache.reserve_out(&mut b, 5);
    cache.free(hw);
    cache.storeback_all(&mut b);
    cache.storeback_all(&mut b);

    let code = b.finish();
    assert_eq!(count_gpr_stores(&code.ops, 5), 1);
}

#[test]
fn reads_are_cached_across_reservations() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    let first = cache.reserve_in(&mut b, 7);
    cache.free(first);
    let second = cache.reserve_in(&mut b, 7);
    cache.free(second);

    assert_eq!(first, second);
    let code = b.finish();
    assert_eq!(count_gpr_loads(&code.ops, 7), 1);
}

#[test]
fn zero_register_reads_synthesize_zero() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    let hw = cache.reserve_in(&mut b, 0);
    cache.free(hw);
    let code = b.finish();

    assert_eq!(count_gpr_loads(&code.ops, 0), 0);
    assert!(matches!(code.ops[0], HostOp::MovImm { imm: 0, .. }));
}

#[test]
fn zero_register_writes_are_dropped() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    let hw = cache.reserve_out(&mut b, 0);
    cache.free(hw);
    cache.storeback_all(&mut b);

    let code = b.finish();
    assert_eq!(count_gpr_stores(&code.ops, 0), 0);
}

#[test]
fn snapshot_restores_the_mapping() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    let hw = cache.reserve_in(&mut b, 3);
    cache.free(hw);
    let snapshot = cache.snapshot();

    let out = cache.reserve_out(&mut b, 9);
    cache.free(out);
    cache.restore(&snapshot);

    // The r3 mapping is back and needs no reload; the r9 mapping is gone.
    let again = cache.reserve_in(&mut b, 3);
    assert_eq!(again, hw);
    cache.free(again);

    let code = b.finish();
    assert_eq!(count_gpr_loads(&code.ops, 3), 1);
    assert_eq!(count_gpr_stores(&code.ops, 9), 0);
}

#[test]
fn request_specific_moves_a_cached_value() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    // First allocation lands on V0; requesting T1 afterwards must move it.
    let hw = cache.reserve_in(&mut b, 4);
    assert_eq!(hw, V0);
    cache.free(hw);

    let moved = cache.request_specific_in(&mut b, 4, T1);
    assert_eq!(moved, T1);
    cache.free(moved);

    let code = b.finish();
    assert_eq!(count_gpr_loads(&code.ops, 4), 1);
    assert!(code
        .ops
        .iter()
        .any(|op| matches!(op, HostOp::Mov { dst: T1, src: V0 })));
}

#[test]
fn unload_spills_dirty_values() {
    let mut b = CodeBuilder::new("test");
    let mut cache = RegCache::new();

    let hw = cache.reserve_out(&mut b, 11);
    cache.free(hw);
    cache.unload_guest(&mut b, 11);
    cache.storeback_all(&mut b);

    let code = b.finish();
    assert_eq!(count_gpr_stores(&code.ops, 11), 1);
}

proptest! {
    /// A second storeback after any reservation sequence emits nothing.
    #[test]
    fn second_storeback_emits_nothing(
        steps in proptest::collection::vec((1u8..34, any::<bool>()), 0..24)
    ) {
        let mut b = CodeBuilder::new("prop");
        let mut cache = RegCache::new();

        for (guest, is_write) in steps {
            let hw = if is_write {
                cache.reserve_out(&mut b, guest)
            } else {
                cache.reserve_in(&mut b, guest)
            };
            cache.free(hw);
        }

        cache.storeback_all(&mut b);
        let mark = b.here();
        cache.storeback_all(&mut b);
        prop_assert_eq!(b.here(), mark);
    }
}
