//! Opcode record and field extraction.
//!
//! Every guest instruction is kept as a raw 32-bit word plus a set of
//! translation flags. Field access goes through the [`InstructionBits`]
//! trait on `u32`, so the emitter, optimizer, and interpreter all share one
//! decoding vocabulary instead of open-coding shifts.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::isa::opcodes::{self, cop, regimm, special};
use crate::isa::{REG_HI, REG_LO, REG_RA};

/// The effective address was proven to land in a plain mapped region; the
/// emitter may use the direct load/store path on the next compile.
pub const FLAG_DIRECT_IO: u32 = 1 << 0;
/// Direct store whose target region holds no code; skip the code-LUT clear.
pub const FLAG_NO_INVALIDATE: u32 = 1 << 1;
/// Do not inline the delay slot into this branch's end-of-block sequence.
pub const FLAG_NO_DELAY_SLOT: u32 = 1 << 2;
/// Meta-opcode that does not advance the guest PC or cost cycles.
pub const FLAG_SKIP_PC_UPDATE: u32 = 1 << 3;

/// Field extraction for 32-bit MIPS-I instruction words.
pub trait InstructionBits {
    /// Primary opcode (bits 26-31).
    fn primary(&self) -> u32;
    /// First source register (bits 21-25).
    fn rs(&self) -> u8;
    /// Second source / destination register (bits 16-20).
    fn rt(&self) -> u8;
    /// Destination register of R-form instructions (bits 11-15).
    fn rd(&self) -> u8;
    /// Shift amount (bits 6-10).
    fn shamt(&self) -> u32;
    /// Function code of SPECIAL instructions (bits 0-5).
    fn funct(&self) -> u32;
    /// Immediate of I-form instructions, zero-extended (bits 0-15).
    fn imm16(&self) -> u32;
    /// Immediate of I-form instructions, sign-extended.
    fn simm16(&self) -> i32;
    /// Jump target field of J-form instructions (bits 0-25).
    fn imm26(&self) -> u32;
}

impl InstructionBits for u32 {
    #[inline(always)]
    fn primary(&self) -> u32 {
        self >> 26
    }

    #[inline(always)]
    fn rs(&self) -> u8 {
        ((self >> 21) & 0x1f) as u8
    }

    #[inline(always)]
    fn rt(&self) -> u8 {
        ((self >> 16) & 0x1f) as u8
    }

    #[inline(always)]
    fn rd(&self) -> u8 {
        ((self >> 11) & 0x1f) as u8
    }

    #[inline(always)]
    fn shamt(&self) -> u32 {
        (self >> 6) & 0x1f
    }

    #[inline(always)]
    fn funct(&self) -> u32 {
        self & 0x3f
    }

    #[inline(always)]
    fn imm16(&self) -> u32 {
        self & 0xffff
    }

    #[inline(always)]
    fn simm16(&self) -> i32 {
        (*self as u16 as i16).into()
    }

    #[inline(always)]
    fn imm26(&self) -> u32 {
        self & 0x03ff_ffff
    }
}

/// One decoded guest instruction.
///
/// The flags are atomic because the runtime memory helper promotes
/// `FLAG_DIRECT_IO` on an opcode that interpreted or compiled code may be
/// observing at the same time; a lost update only costs one extra trip
/// through the callback path.
#[derive(Debug)]
pub struct Opcode {
    /// Raw 32-bit instruction word.
    pub raw: u32,
    flags: AtomicU32,
}

impl Clone for Opcode {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw,
            flags: AtomicU32::new(self.flags()),
        }
    }
}

impl Opcode {
    /// Wraps a raw instruction word with no flags set.
    pub fn new(raw: u32) -> Self {
        Self {
            raw,
            flags: AtomicU32::new(0),
        }
    }

    /// Wraps a raw instruction word with the given initial flags.
    pub fn with_flags(raw: u32, flags: u32) -> Self {
        Self {
            raw,
            flags: AtomicU32::new(flags),
        }
    }

    /// Current translation flags.
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Relaxed)
    }

    /// ORs `mask` into the translation flags.
    pub fn set_flags(&self, mask: u32) {
        let _ = self.flags.fetch_or(mask, Ordering::Relaxed);
    }

    /// Returns true if every bit of `mask` is set.
    pub fn has_flag(&self, mask: u32) -> bool {
        self.flags() & mask == mask
    }

    /// Opcode 0 encodes `SLL $zero, $zero, 0`, the canonical no-op.
    pub fn is_nop(&self) -> bool {
        self.raw == 0
    }
}

/// Guest cycle cost of one instruction.
///
/// A flat cycle per architectural instruction; meta-opcodes are free. The
/// frontend scales the cycle target if it wants a different CPI model.
pub fn cycles_of_opcode(op: &Opcode) -> u32 {
    u32::from(!op.has_flag(FLAG_SKIP_PC_UPDATE))
}

/// Returns true for control transfers that execute one delay slot.
pub fn has_delay_slot(raw: u32) -> bool {
    match raw.primary() {
        opcodes::OP_SPECIAL => matches!(raw.funct(), special::JR | special::JALR),
        opcodes::OP_REGIMM
        | opcodes::OP_J
        | opcodes::OP_JAL
        | opcodes::OP_BEQ
        | opcodes::OP_BNE
        | opcodes::OP_BLEZ
        | opcodes::OP_BGTZ
        | opcodes::OP_META_BEQZ
        | opcodes::OP_META_BNEZ => true,
        _ => false,
    }
}

/// Returns true for opcodes that terminate a block without a delay slot.
pub fn is_syscall_break(raw: u32) -> bool {
    raw.primary() == opcodes::OP_SPECIAL
        && matches!(raw.funct(), special::SYSCALL | special::BREAK)
}

/// Returns true if the instruction reads guest register `reg`.
///
/// `LO` and `HI` are addressed as registers 32 and 33 so the dead-register
/// pass can track them like any other slot.
pub fn reads_register(raw: u32, reg: u8) -> bool {
    match raw.primary() {
        opcodes::OP_SPECIAL => match raw.funct() {
            special::SLL | special::SRL | special::SRA => raw.rt() == reg,
            special::SLLV | special::SRLV | special::SRAV => {
                raw.rs() == reg || raw.rt() == reg
            }
            special::JR | special::JALR | special::MTHI | special::MTLO => raw.rs() == reg,
            special::SYSCALL | special::BREAK => false,
            special::MFHI => reg == REG_HI,
            special::MFLO => reg == REG_LO,
            special::MULT | special::MULTU | special::DIV | special::DIVU => {
                raw.rs() == reg || raw.rt() == reg
            }
            _ => raw.rs() == reg || raw.rt() == reg,
        },
        opcodes::OP_REGIMM | opcodes::OP_BLEZ | opcodes::OP_BGTZ => raw.rs() == reg,
        opcodes::OP_META_BEQZ | opcodes::OP_META_BNEZ => raw.rs() == reg,
        opcodes::OP_BEQ | opcodes::OP_BNE => raw.rs() == reg || raw.rt() == reg,
        opcodes::OP_J | opcodes::OP_JAL | opcodes::OP_LUI => false,
        opcodes::OP_CP0 | opcodes::OP_CP2 => {
            matches!(u32::from(raw.rs()), cop::MTC | cop::CTC) && raw.rt() == reg
        }
        opcodes::OP_LWL | opcodes::OP_LWR => raw.rs() == reg || raw.rt() == reg,
        opcodes::OP_LB
        | opcodes::OP_LH
        | opcodes::OP_LW
        | opcodes::OP_LBU
        | opcodes::OP_LHU
        | opcodes::OP_LWC2
        | opcodes::OP_SWC2 => raw.rs() == reg,
        opcodes::OP_SB | opcodes::OP_SH | opcodes::OP_SWL | opcodes::OP_SW
        | opcodes::OP_SWR => raw.rs() == reg || raw.rt() == reg,
        opcodes::OP_META_REG_UNLOAD => false,
        _ => raw.rs() == reg,
    }
}

/// Returns true if the instruction writes guest register `reg`.
pub fn writes_register(raw: u32, reg: u8) -> bool {
    match raw.primary() {
        opcodes::OP_SPECIAL => match raw.funct() {
            special::JR | special::SYSCALL | special::BREAK => false,
            special::JALR => raw.rd() == reg,
            special::MTHI => reg == REG_HI,
            special::MTLO => reg == REG_LO,
            special::MFHI | special::MFLO => raw.rd() == reg,
            special::MULT | special::MULTU | special::DIV | special::DIVU => {
                reg == REG_LO || reg == REG_HI
            }
            _ => raw.rd() == reg,
        },
        opcodes::OP_REGIMM => match (raw >> 16) & 0x1f {
            regimm::BLTZAL | regimm::BGEZAL => reg == REG_RA,
            _ => false,
        },
        opcodes::OP_JAL => reg == REG_RA,
        opcodes::OP_ADDI
        | opcodes::OP_ADDIU
        | opcodes::OP_SLTI
        | opcodes::OP_SLTIU
        | opcodes::OP_ANDI
        | opcodes::OP_ORI
        | opcodes::OP_XORI
        | opcodes::OP_LUI => raw.rt() == reg,
        opcodes::OP_CP0 | opcodes::OP_CP2 => {
            matches!(u32::from(raw.rs()), cop::MFC | cop::CFC) && raw.rt() == reg
        }
        opcodes::OP_LB
        | opcodes::OP_LH
        | opcodes::OP_LWL
        | opcodes::OP_LW
        | opcodes::OP_LBU
        | opcodes::OP_LHU
        | opcodes::OP_LWR => raw.rt() == reg,
        _ => false,
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} {}", self.raw, super::disasm::mnemonic(self.raw))
    }
}
