//! Block disassembly.
//!
//! Translation units are discovered by scanning forward from a starting word
//! until a control transfer has been seen together with its delay slot, or a
//! `SYSCALL`/`BREAK` terminates the block outright. Unrecognized words are
//! kept in the list; the emitter warns about them at translation time and
//! the interpreter skips them.

use tracing::debug;

use crate::isa::instruction::{has_delay_slot, is_syscall_break};
use crate::isa::opcodes::{self, cop, regimm, special};
use crate::isa::{InstructionBits, Opcode};

/// Disassembles one block starting at `code[0]`.
///
/// Returns the opcode list and the number of guest-memory bytes it covers.
/// The scan is bounded by `max_words`; a block cut short by the bound has no
/// terminator and is handled by the dispatcher (interpreted, never compiled).
pub fn disassemble(code: &[u32], max_words: usize) -> (Vec<Opcode>, u32) {
    let mut list = Vec::new();

    let bound = code.len().min(max_words);
    let mut i = 0;
    while i < bound {
        let raw = code[i];
        list.push(Opcode::new(raw));
        i += 1;

        if is_syscall_break(raw) {
            break;
        }
        if has_delay_slot(raw) {
            if i < code.len() {
                list.push(Opcode::new(code[i]));
                i += 1;
            }
            break;
        }
    }

    let length = (i as u32) * 4;
    (list, length)
}

/// Returns true if the list ends in a proper terminator (with its delay
/// slot, where one is architecturally required).
pub fn is_terminated(list: &[Opcode]) -> bool {
    match list.len() {
        0 => false,
        1 => is_syscall_break(list[0].raw),
        n => {
            is_syscall_break(list[n - 1].raw)
                || has_delay_slot(list[n - 2].raw)
        }
    }
}

/// Logs a disassembly of `list` at `debug` level, one opcode per line.
pub fn print_disassembly(list: &[Opcode], mut pc: u32) {
    use crate::isa::instruction::FLAG_SKIP_PC_UPDATE;

    for op in list {
        debug!("  {pc:#010x}  {op}");
        if !op.has_flag(FLAG_SKIP_PC_UPDATE) {
            pc = pc.wrapping_add(4);
        }
    }
}

/// Short mnemonic for an instruction word, for logs and diagnostics.
pub fn mnemonic(raw: u32) -> &'static str {
    match raw.primary() {
        opcodes::OP_SPECIAL => match raw.funct() {
            special::SLL if raw == 0 => "nop",
            special::SLL => "sll",
            special::SRL => "srl",
            special::SRA => "sra",
            special::SLLV => "sllv",
            special::SRLV => "srlv",
            special::SRAV => "srav",
            special::JR => "jr",
            special::JALR => "jalr",
            special::SYSCALL => "syscall",
            special::BREAK => "break",
            special::MFHI => "mfhi",
            special::MTHI => "mthi",
            special::MFLO => "mflo",
            special::MTLO => "mtlo",
            special::MULT => "mult",
            special::MULTU => "multu",
            special::DIV => "div",
            special::DIVU => "divu",
            special::ADD => "add",
            special::ADDU => "addu",
            special::SUB => "sub",
            special::SUBU => "subu",
            special::AND => "and",
            special::OR => "or",
            special::XOR => "xor",
            special::NOR => "nor",
            special::SLT => "slt",
            special::SLTU => "sltu",
            _ => "special?",
        },
        opcodes::OP_REGIMM => match u32::from(raw.rt()) {
            regimm::BLTZ => "bltz",
            regimm::BGEZ => "bgez",
            regimm::BLTZAL => "bltzal",
            regimm::BGEZAL => "bgezal",
            _ => "regimm?",
        },
        opcodes::OP_J => "j",
        opcodes::OP_JAL => "jal",
        opcodes::OP_BEQ => "beq",
        opcodes::OP_BNE => "bne",
        opcodes::OP_BLEZ => "blez",
        opcodes::OP_BGTZ => "bgtz",
        opcodes::OP_ADDI => "addi",
        opcodes::OP_ADDIU => "addiu",
        opcodes::OP_SLTI => "slti",
        opcodes::OP_SLTIU => "sltiu",
        opcodes::OP_ANDI => "andi",
        opcodes::OP_ORI => "ori",
        opcodes::OP_XORI => "xori",
        opcodes::OP_LUI => "lui",
        opcodes::OP_CP0 => match u32::from(raw.rs()) {
            cop::MFC => "mfc0",
            cop::CFC => "cfc0",
            cop::MTC => "mtc0",
            cop::CTC => "ctc0",
            cop::RFE => "rfe",
            _ => "cop0",
        },
        opcodes::OP_CP2 => match u32::from(raw.rs()) {
            cop::MFC => "mfc2",
            cop::CFC => "cfc2",
            cop::MTC => "mtc2",
            cop::CTC => "ctc2",
            _ => "cop2",
        },
        opcodes::OP_LB => "lb",
        opcodes::OP_LH => "lh",
        opcodes::OP_LWL => "lwl",
        opcodes::OP_LW => "lw",
        opcodes::OP_LBU => "lbu",
        opcodes::OP_LHU => "lhu",
        opcodes::OP_LWR => "lwr",
        opcodes::OP_SB => "sb",
        opcodes::OP_SH => "sh",
        opcodes::OP_SWL => "swl",
        opcodes::OP_SW => "sw",
        opcodes::OP_SWR => "swr",
        opcodes::OP_LWC2 => "lwc2",
        opcodes::OP_SWC2 => "swc2",
        opcodes::OP_META_REG_UNLOAD => "meta.unload",
        opcodes::OP_META_BEQZ => "meta.beqz",
        opcodes::OP_META_BNEZ => "meta.bnez",
        _ => "unknown",
    }
}
