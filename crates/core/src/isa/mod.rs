//! MIPS-I instruction set support.
//!
//! This module covers everything the recompiler needs to know about guest
//! instructions:
//! 1. **Encodings:** Primary opcode, SPECIAL / REGIMM / coprocessor function
//!    codes, and the meta-opcodes synthesized by the optimizer.
//! 2. **Opcode model:** A typed view of a 32-bit instruction word plus the
//!    translation flags that drive code generation.
//! 3. **Disassembler:** Block discovery from a starting point in guest memory
//!    up to a control-flow terminator, including its delay slot.

/// Register naming conventions.
pub mod abi;

/// Primary opcodes, function codes, and meta-opcodes.
pub mod opcodes;

/// Opcode record, field extraction, and read/write classification.
pub mod instruction;

/// Block disassembly and debug formatting.
pub mod disasm;

pub use instruction::{InstructionBits, Opcode};

/// Guest register index of the `LO` multiply/divide result register.
pub const REG_LO: u8 = 32;
/// Guest register index of the `HI` multiply/divide result register.
pub const REG_HI: u8 = 33;
/// Guest register index of the return-address register `$ra`.
pub const REG_RA: u8 = 31;
/// Number of guest register slots (GPR0..GPR31, LO, HI).
pub const NUM_GUEST_REGS: usize = 34;
