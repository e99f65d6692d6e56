//! Reference interpreter.
//!
//! Executes one block's opcode list with MIPS-I semantics: delay-slot
//! discipline, HI/LO, loads and stores through the same runtime helper the
//! compiled callback path uses (so a first interpreted pass promotes
//! opcodes to the direct path), and coprocessor traffic through the
//! registered callbacks. Returns the next guest PC.
//!
//! Besides serving `run_interpreter`, this is the profiling first pass of
//! the dispatcher and the equivalence oracle for the recompiler tests.

use tracing::warn;

use crate::isa::instruction::{cycles_of_opcode, FLAG_SKIP_PC_UPDATE};
use crate::isa::opcodes::{self, cop, regimm, special, CP0_CAUSE, CP0_STATUS};
use crate::isa::{InstructionBits, Opcode, REG_HI, REG_LO, REG_RA};
use crate::mem::access;
use crate::rec::block::Block;
use crate::rec::dispatcher;
use crate::State;

/// Outcome of one interpreted instruction.
enum Step {
    /// Fall through to the next instruction.
    Next,
    /// Control transfer: execute the delay slot, then continue at the
    /// target.
    Branch {
        /// Branch target if taken, or the fall-through address.
        target: u32,
    },
    /// Block ends here with the given next PC and no delay slot.
    End {
        /// PC to resume at.
        next_pc: u32,
    },
}

/// Interprets `block` once; returns the PC execution continues at.
pub fn run_block(state: &mut State, block: &Block) -> u32 {
    let ops = &block.ops;
    let mut pc = block.pc;
    let mut i = 0;

    while i < ops.len() {
        let op = &ops[i];
        state.current_cycle = state.current_cycle.wrapping_add(cycles_of_opcode(op));
        state.stats.interpreted_ops += 1;

        match exec_one(state, op, pc) {
            Step::Next => {
                if !op.has_flag(FLAG_SKIP_PC_UPDATE) {
                    pc = pc.wrapping_add(4);
                }
                i += 1;
            }
            Step::Branch { target } => {
                if let Some(ds) = ops.get(i + 1) {
                    state.current_cycle =
                        state.current_cycle.wrapping_add(cycles_of_opcode(ds));
                    state.stats.interpreted_ops += 1;
                    // Delay slots never branch themselves; the disassembler
                    // ends the block before a second transfer can appear.
                    let _ = exec_one(state, ds, pc.wrapping_add(4));
                }
                return target;
            }
            Step::End { next_pc } => return next_pc,
        }
    }

    pc
}

fn branch_target(pc: u32, raw: u32) -> u32 {
    pc.wrapping_add(4).wrapping_add((raw.simm16() << 2) as u32)
}

/// Executes one instruction at `pc`; reports how control continues.
fn exec_one(state: &mut State, op: &Opcode, pc: u32) -> Step {
    let raw = op.raw;
    if op.is_nop() {
        return Step::Next;
    }

    match raw.primary() {
        opcodes::OP_SPECIAL => exec_special(state, op, pc),
        opcodes::OP_REGIMM => {
            let rs = state.gpr(raw.rs()) as i32;
            let (taken, link) = match u32::from(raw.rt()) {
                regimm::BLTZ => (rs < 0, false),
                regimm::BGEZ => (rs >= 0, false),
                regimm::BLTZAL => (rs < 0, true),
                regimm::BGEZAL => (rs >= 0, true),
                _ => {
                    warn!("unknown opcode: {raw:#010x} at PC {pc:#010x}");
                    return Step::Next;
                }
            };
            if link {
                state.set_gpr(REG_RA, pc.wrapping_add(8));
            }
            Step::Branch {
                target: if taken {
                    branch_target(pc, raw)
                } else {
                    pc.wrapping_add(8)
                },
            }
        }
        opcodes::OP_J | opcodes::OP_JAL => {
            if raw.primary() == opcodes::OP_JAL {
                state.set_gpr(REG_RA, pc.wrapping_add(8));
            }
            Step::Branch {
                target: (pc & 0xf000_0000) | (raw.imm26() << 2),
            }
        }
        opcodes::OP_BEQ | opcodes::OP_BNE => {
            let eq = state.gpr(raw.rs()) == state.gpr(raw.rt());
            let taken = (raw.primary() == opcodes::OP_BEQ) == eq;
            Step::Branch {
                target: if taken {
                    branch_target(pc, raw)
                } else {
                    pc.wrapping_add(8)
                },
            }
        }
        opcodes::OP_META_BEQZ | opcodes::OP_META_BNEZ => {
            let zero = state.gpr(raw.rs()) == 0;
            let taken = (raw.primary() == opcodes::OP_META_BEQZ) == zero;
            Step::Branch {
                target: if taken {
                    branch_target(pc, raw)
                } else {
                    pc.wrapping_add(8)
                },
            }
        }
        opcodes::OP_BLEZ => Step::Branch {
            target: if (state.gpr(raw.rs()) as i32) <= 0 {
                branch_target(pc, raw)
            } else {
                pc.wrapping_add(8)
            },
        },
        opcodes::OP_BGTZ => Step::Branch {
            target: if (state.gpr(raw.rs()) as i32) > 0 {
                branch_target(pc, raw)
            } else {
                pc.wrapping_add(8)
            },
        },
        opcodes::OP_ADDI | opcodes::OP_ADDIU => {
            let value = state.gpr(raw.rs()).wrapping_add(raw.simm16() as u32);
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_SLTI => {
            let value = u32::from((state.gpr(raw.rs()) as i32) < raw.simm16());
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_SLTIU => {
            let value = u32::from(state.gpr(raw.rs()) < raw.simm16() as u32);
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_ANDI => {
            let value = state.gpr(raw.rs()) & raw.imm16();
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_ORI => {
            let value = state.gpr(raw.rs()) | raw.imm16();
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_XORI => {
            let value = state.gpr(raw.rs()) ^ raw.imm16();
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_LUI => {
            state.set_gpr(raw.rt(), raw.imm16() << 16);
            Step::Next
        }
        opcodes::OP_CP0 => exec_cop(state, op, pc, true),
        opcodes::OP_CP2 => exec_cop(state, op, pc, false),
        opcodes::OP_LB
        | opcodes::OP_LH
        | opcodes::OP_LWL
        | opcodes::OP_LW
        | opcodes::OP_LBU
        | opcodes::OP_LHU
        | opcodes::OP_LWR => {
            let base = state.gpr(raw.rs());
            let merge = state.gpr(raw.rt());
            let value = access::rw(state, op, base, merge);
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        opcodes::OP_SB
        | opcodes::OP_SH
        | opcodes::OP_SWL
        | opcodes::OP_SW
        | opcodes::OP_SWR => {
            let base = state.gpr(raw.rs());
            let data = state.gpr(raw.rt());
            let _ = access::rw(state, op, base, data);
            Step::Next
        }
        // The coprocessor word transfers bypass the guest register file;
        // the helper talks to the COP2 callbacks directly.
        opcodes::OP_LWC2 | opcodes::OP_SWC2 => {
            let base = state.gpr(raw.rs());
            let _ = access::rw(state, op, base, 0);
            Step::Next
        }
        opcodes::OP_META_REG_UNLOAD => Step::Next,
        _ => {
            warn!("unknown opcode: {raw:#010x} at PC {pc:#010x}");
            Step::Next
        }
    }
}

fn exec_special(state: &mut State, op: &Opcode, pc: u32) -> Step {
    let raw = op.raw;
    let rs = state.gpr(raw.rs());
    let rt = state.gpr(raw.rt());

    let value = match raw.funct() {
        special::SLL => rt << raw.shamt(),
        special::SRL => rt >> raw.shamt(),
        special::SRA => ((rt as i32) >> raw.shamt()) as u32,
        special::SLLV => rt << (rs & 0x1f),
        special::SRLV => rt >> (rs & 0x1f),
        special::SRAV => ((rt as i32) >> (rs & 0x1f)) as u32,
        special::JR => return Step::Branch { target: rs },
        special::JALR => {
            state.set_gpr(raw.rd(), pc.wrapping_add(8));
            return Step::Branch { target: rs };
        }
        special::SYSCALL => {
            state.set_exit_flags(crate::common::exit::SYSCALL);
            return Step::End { next_pc: pc };
        }
        special::BREAK => {
            state.set_exit_flags(crate::common::exit::BREAK);
            return Step::End { next_pc: pc };
        }
        special::MFHI => state.gpr(REG_HI),
        special::MFLO => state.gpr(REG_LO),
        special::MTHI => {
            state.set_gpr(REG_HI, rs);
            return Step::Next;
        }
        special::MTLO => {
            state.set_gpr(REG_LO, rs);
            return Step::Next;
        }
        special::MULT => {
            let product = i64::from(rs as i32) * i64::from(rt as i32);
            state.set_gpr(REG_LO, product as u32);
            state.set_gpr(REG_HI, (product >> 32) as u32);
            return Step::Next;
        }
        special::MULTU => {
            let product = u64::from(rs) * u64::from(rt);
            state.set_gpr(REG_LO, product as u32);
            state.set_gpr(REG_HI, (product >> 32) as u32);
            return Step::Next;
        }
        special::DIV => {
            if rt == 0 {
                state.set_gpr(REG_LO, if (rs as i32) < 0 { 1 } else { 0xffff_ffff });
                state.set_gpr(REG_HI, rs);
            } else {
                let x = i64::from(rs as i32);
                let y = i64::from(rt as i32);
                state.set_gpr(REG_LO, (x / y) as u32);
                state.set_gpr(REG_HI, (x % y) as u32);
            }
            return Step::Next;
        }
        special::DIVU => {
            if rt == 0 {
                state.set_gpr(REG_LO, 0xffff_ffff);
                state.set_gpr(REG_HI, rs);
            } else {
                state.set_gpr(REG_LO, rs / rt);
                state.set_gpr(REG_HI, rs % rt);
            }
            return Step::Next;
        }
        special::ADD | special::ADDU => rs.wrapping_add(rt),
        special::SUB | special::SUBU => rs.wrapping_sub(rt),
        special::AND => rs & rt,
        special::OR => rs | rt,
        special::XOR => rs ^ rt,
        special::NOR => !(rs | rt),
        special::SLT => u32::from((rs as i32) < (rt as i32)),
        special::SLTU => u32::from(rs < rt),
        _ => {
            warn!("unknown opcode: {raw:#010x} at PC {pc:#010x}");
            return Step::Next;
        }
    };

    state.set_gpr(raw.rd(), value);
    Step::Next
}

fn exec_cop(state: &mut State, op: &Opcode, pc: u32, is_cp0: bool) -> Step {
    let raw = op.raw;
    match u32::from(raw.rs()) {
        cop::MFC | cop::CFC => {
            let value = dispatcher::mfc(state, raw);
            state.set_gpr(raw.rt(), value);
            Step::Next
        }
        cop::MTC | cop::CTC => {
            let data = state.gpr(raw.rt());
            dispatcher::mtc(state, raw, data);
            // Status/cause writes end the block so the dispatch loop can
            // re-check interrupts, matching the compiled lowering.
            if is_cp0 && matches!(u32::from(raw.rd()), CP0_STATUS | CP0_CAUSE) {
                return Step::End {
                    next_pc: pc.wrapping_add(4),
                };
            }
            Step::Next
        }
        cop::RFE if is_cp0 => {
            dispatcher::rfe(state);
            Step::Next
        }
        _ => {
            dispatcher::cp_op(state, raw);
            Step::Next
        }
    }
}
