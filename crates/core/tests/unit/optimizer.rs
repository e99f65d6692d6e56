//! Optimizer pass tests.

use mipsrec_core::isa::instruction::{FLAG_NO_DELAY_SLOT, FLAG_SKIP_PC_UPDATE};
use mipsrec_core::isa::opcodes::{OP_BEQ, OP_META_BEQZ, OP_META_BNEZ, OP_META_REG_UNLOAD};
use mipsrec_core::isa::{InstructionBits, Opcode};
use mipsrec_core::opt::optimize;
use pretty_assertions::assert_eq;

use crate::common::encode as enc;

fn opcodes(words: &[u32]) -> Vec<Opcode> {
    words.iter().copied().map(Opcode::new).collect()
}

#[test]
fn beq_against_zero_becomes_meta_beqz() {
    let mut list = opcodes(&[enc::beq(5, 0, 4), enc::nop()]);
    optimize(&mut list);
    assert_eq!(list[0].raw.primary(), OP_META_BEQZ);
    assert_eq!(list[0].raw.rs(), 5);
    assert_eq!(list[0].raw.imm16(), 4);
}

#[test]
fn zero_operand_order_is_normalized() {
    let mut list = opcodes(&[enc::bne(0, 7, 2), enc::nop()]);
    optimize(&mut list);
    assert_eq!(list[0].raw.primary(), OP_META_BNEZ);
    assert_eq!(list[0].raw.rs(), 7);
}

#[test]
fn beq_zero_zero_is_left_alone() {
    let mut list = opcodes(&[enc::beq(0, 0, 2), enc::nop()]);
    optimize(&mut list);
    assert_eq!(list[0].raw.primary(), OP_BEQ);
}

#[test]
fn branch_in_delay_slot_is_not_inlined() {
    let mut list = opcodes(&[enc::beq(1, 2, 2), enc::j(0x100)]);
    optimize(&mut list);
    assert!(list[0].has_flag(FLAG_NO_DELAY_SLOT));
}

#[test]
fn delay_slot_writing_branch_source_is_not_inlined() {
    let mut list = opcodes(&[enc::jr(31), enc::addiu(31, 1, 0)]);
    optimize(&mut list);
    assert!(list[0].has_flag(FLAG_NO_DELAY_SLOT));
}

#[test]
fn independent_delay_slot_stays_inlined() {
    let mut list = opcodes(&[enc::beq(1, 2, 2), enc::addiu(3, 4, 1)]);
    optimize(&mut list);
    assert!(!list[0].has_flag(FLAG_NO_DELAY_SLOT));
}

#[test]
fn dead_registers_are_unloaded_after_last_use() {
    let mut list = opcodes(&[
        enc::addiu(1, 0, 5),
        enc::addiu(2, 1, 1),
        enc::jr(31),
        enc::nop(),
    ]);
    optimize(&mut list);

    // r1 and r2 die at index 1; both unloads land before the branch.
    assert_eq!(list.len(), 6);
    let unloaded: Vec<u8> = list[2..4]
        .iter()
        .map(|op| {
            assert_eq!(op.raw.primary(), OP_META_REG_UNLOAD);
            assert!(op.has_flag(FLAG_SKIP_PC_UPDATE));
            op.raw.rs()
        })
        .collect();
    let mut unloaded = unloaded;
    unloaded.sort_unstable();
    assert_eq!(unloaded, vec![1, 2]);

    // The branch and its delay slot stay adjacent at the end.
    assert_eq!(list[4].raw, enc::jr(31));
    assert_eq!(list[5].raw, enc::nop());
}

#[test]
fn no_unload_is_inserted_at_the_block_end() {
    let mut list = opcodes(&[enc::addiu(1, 0, 5), enc::jr(31), enc::nop()]);
    optimize(&mut list);

    // r1 dies at index 0 (unload at 1); r31 dies at the branch itself,
    // whose insertion point would be past the end and is skipped.
    assert_eq!(list.len(), 4);
    assert_eq!(list[1].raw.primary(), OP_META_REG_UNLOAD);
    assert_eq!(list[1].raw.rs(), 1);
    assert_eq!(list[2].raw, enc::jr(31));
}
