//! Optimization passes over a freshly disassembled opcode list.
//!
//! Three in-place passes, in order:
//! 1. **Branch-on-zero synthesis** rewrites `BEQ`/`BNE` against `$zero`
//!    into single-operand meta-branches, sparing a host register.
//! 2. **Delay-slot folding** flags branches whose delay slot cannot be
//!    inlined (it is itself a control transfer, or it writes a register
//!    the branch reads).
//! 3. **Dead-register unload** inserts a meta-opcode after the last use of
//!    each guest register, releasing its host register early.
//!
//! Direct-I/O annotation is deliberately absent: flags start clear, and the
//! runtime memory helper promotes opcodes on their first access.

use crate::isa::instruction::{
    has_delay_slot, is_syscall_break, reads_register, writes_register, FLAG_NO_DELAY_SLOT,
    FLAG_SKIP_PC_UPDATE,
};
use crate::isa::opcodes::{OP_BEQ, OP_BNE, OP_META_BEQZ, OP_META_BNEZ, OP_META_REG_UNLOAD};
use crate::isa::{InstructionBits, Opcode};

fn meta_branch(meta: u32, reg: u8, imm16: u32) -> u32 {
    (meta << 26) | (u32::from(reg) << 21) | imm16
}

/// Rewrites `BEQ rs, $zero` / `BNE rs, $zero` (either operand order) into
/// the single-operand meta forms. `BEQ $zero, $zero` stays put: the
/// emitter already treats `rs == rt` as unconditional.
fn pass_branch_on_zero(list: &mut [Opcode]) {
    for op in list {
        let raw = op.raw;
        let meta = match raw.primary() {
            OP_BEQ => OP_META_BEQZ,
            OP_BNE => OP_META_BNEZ,
            _ => continue,
        };

        if raw.rt() == 0 && raw.rs() != 0 {
            op.raw = meta_branch(meta, raw.rs(), raw.imm16());
        } else if raw.rs() == 0 && raw.rt() != 0 {
            op.raw = meta_branch(meta, raw.rt(), raw.imm16());
        }
    }
}

/// Flags branches whose delay slot must not be inlined into the epilogue.
fn pass_delay_slot_folding(list: &[Opcode]) {
    for i in 0..list.len().saturating_sub(1) {
        let branch = &list[i];
        if !has_delay_slot(branch.raw) {
            continue;
        }
        let ds = list[i + 1].raw;

        let hazard = has_delay_slot(ds)
            || is_syscall_break(ds)
            || (1..32).any(|reg| {
                reads_register(branch.raw, reg) && writes_register(ds, reg)
            });
        if hazard {
            branch.set_flags(FLAG_NO_DELAY_SLOT);
        }
    }
}

/// Inserts `META_REG_UNLOAD` after the last read or write of each guest
/// register. The meta lands after a branch's delay slot, never between a
/// branch and its slot, and nothing is inserted at the very end of the
/// list, where the block epilogue spills everything anyway.
fn pass_dead_register_unload(list: &mut Vec<Opcode>) {
    let mut insertions: Vec<(usize, u8)> = Vec::new();

    for reg in 1..32u8 {
        let last_use = (0..list.len()).rev().find(|&i| {
            reads_register(list[i].raw, reg) || writes_register(list[i].raw, reg)
        });
        let Some(mut point) = last_use else {
            continue;
        };

        if has_delay_slot(list[point].raw) {
            point += 1;
        }
        if point + 1 < list.len() {
            insertions.push((point + 1, reg));
        }
    }

    insertions.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, reg) in insertions {
        list.insert(
            at,
            Opcode::with_flags(
                meta_branch(OP_META_REG_UNLOAD, reg, 0),
                FLAG_SKIP_PC_UPDATE,
            ),
        );
    }
}

/// Runs all passes on a disassembled list.
pub fn optimize(list: &mut Vec<Opcode>) {
    pass_branch_on_zero(list);
    pass_delay_slot_folding(list);
    pass_dead_register_unload(list);
}
