//! Field extraction, classification, and disassembly tests.

use mipsrec_core::isa::disasm::{disassemble, is_terminated, mnemonic};
use mipsrec_core::isa::instruction::{
    has_delay_slot, is_syscall_break, reads_register, writes_register,
};
use mipsrec_core::isa::{InstructionBits, REG_HI, REG_LO};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::encode as enc;

#[test]
fn i_form_fields() {
    let word = enc::addiu(2, 1, -1);
    assert_eq!(word.primary(), 0x09);
    assert_eq!(word.rs(), 1);
    assert_eq!(word.rt(), 2);
    assert_eq!(word.imm16(), 0xffff);
    assert_eq!(word.simm16(), -1);
}

#[test]
fn r_form_fields() {
    let word = enc::sra(3, 4, 31);
    assert_eq!(word.primary(), 0);
    assert_eq!(word.rt(), 4);
    assert_eq!(word.rd(), 3);
    assert_eq!(word.shamt(), 31);
    assert_eq!(word.funct(), 0x03);
}

#[test]
fn j_form_fields() {
    let word = enc::j(0x0040_0000);
    assert_eq!(word.primary(), 0x02);
    assert_eq!(word.imm26(), 0x0010_0000);
}

#[rstest]
#[case(enc::j(0x1000), true)]
#[case(enc::jal(0x1000), true)]
#[case(enc::jr(31), true)]
#[case(enc::jalr(1, 31), true)]
#[case(enc::beq(1, 2, 4), true)]
#[case(enc::bltz(1, 4), true)]
#[case(enc::addiu(1, 2, 3), false)]
#[case(enc::syscall(), false)]
fn delay_slot_classification(#[case] word: u32, #[case] expected: bool) {
    assert_eq!(has_delay_slot(word), expected);
}

#[test]
fn syscall_break_classification() {
    assert!(is_syscall_break(enc::syscall()));
    assert!(is_syscall_break(enc::brk()));
    assert!(!is_syscall_break(enc::addiu(1, 1, 1)));
}

#[test]
fn register_classification() {
    let word = enc::addu(3, 1, 2);
    assert!(reads_register(word, 1));
    assert!(reads_register(word, 2));
    assert!(!reads_register(word, 3));
    assert!(writes_register(word, 3));

    let word = enc::mult(4, 5);
    assert!(writes_register(word, REG_LO));
    assert!(writes_register(word, REG_HI));
    assert!(!writes_register(word, 4));

    assert!(reads_register(enc::mfhi(6), REG_HI));
    assert!(writes_register(enc::mfhi(6), 6));

    assert!(writes_register(enc::jal(0), 31));
    assert!(reads_register(enc::sw(2, 1, 0), 1));
    assert!(reads_register(enc::sw(2, 1, 0), 2));
    assert!(writes_register(enc::lw(2, 1, 0), 2));

    // LWL merges into rt, so it reads it too.
    assert!(reads_register(enc::i_type(0x22, 1, 2, 0), 2));
}

#[test]
fn disassembly_stops_after_delay_slot() {
    let code = [
        enc::addiu(1, 0, 1),
        enc::jr(31),
        enc::nop(),
        enc::addiu(2, 0, 2),
    ];
    let (list, length) = disassemble(&code, 64);
    assert_eq!(list.len(), 3);
    assert_eq!(length, 12);
    assert!(is_terminated(&list));
}

#[test]
fn disassembly_stops_at_syscall_without_delay_slot() {
    let code = [enc::syscall(), enc::nop()];
    let (list, length) = disassemble(&code, 64);
    assert_eq!(list.len(), 1);
    assert_eq!(length, 4);
    assert!(is_terminated(&list));
}

#[test]
fn disassembly_respects_scan_bound() {
    let code = [enc::nop(); 16];
    let (list, length) = disassemble(&code, 4);
    assert_eq!(list.len(), 4);
    assert_eq!(length, 16);
    assert!(!is_terminated(&list));
}

#[rstest]
#[case(enc::nop(), "nop")]
#[case(enc::jr(31), "jr")]
#[case(enc::lui(1, 2), "lui")]
#[case(enc::rfe(), "rfe")]
#[case(0xfc00_0000, "unknown")]
fn mnemonics(#[case] word: u32, #[case] expected: &str) {
    assert_eq!(mnemonic(word), expected);
}
