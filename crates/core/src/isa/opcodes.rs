//! MIPS-I opcode encodings.
//!
//! Primary opcodes live in bits 26-31 of the instruction word. `SPECIAL`
//! instructions are further keyed by the function field (bits 0-5), `REGIMM`
//! branches by the rt field, and coprocessor instructions by the rs field.
//! Three unused primary slots are claimed for meta-opcodes that only the
//! optimizer emits; they never appear in guest memory.

/// SPECIAL group; the function field selects the operation.
pub const OP_SPECIAL: u32 = 0x00;
/// REGIMM branch group; the rt field selects the operation.
pub const OP_REGIMM: u32 = 0x01;
/// Jump to a 26-bit absolute target within the current 256MB segment.
pub const OP_J: u32 = 0x02;
/// Jump and link.
pub const OP_JAL: u32 = 0x03;
/// Branch if rs == rt.
pub const OP_BEQ: u32 = 0x04;
/// Branch if rs != rt.
pub const OP_BNE: u32 = 0x05;
/// Branch if rs <= 0 (signed).
pub const OP_BLEZ: u32 = 0x06;
/// Branch if rs > 0 (signed).
pub const OP_BGTZ: u32 = 0x07;
/// Add immediate (overflow-trapping form; traps are not generated).
pub const OP_ADDI: u32 = 0x08;
/// Add immediate unsigned.
pub const OP_ADDIU: u32 = 0x09;
/// Set on less than immediate (signed).
pub const OP_SLTI: u32 = 0x0a;
/// Set on less than immediate (unsigned).
pub const OP_SLTIU: u32 = 0x0b;
/// AND immediate (zero-extended).
pub const OP_ANDI: u32 = 0x0c;
/// OR immediate (zero-extended).
pub const OP_ORI: u32 = 0x0d;
/// XOR immediate (zero-extended).
pub const OP_XORI: u32 = 0x0e;
/// Load upper immediate.
pub const OP_LUI: u32 = 0x0f;
/// Coprocessor 0 group; the rs field selects the operation.
pub const OP_CP0: u32 = 0x10;
/// Coprocessor 2 (GTE) group; the rs field selects the operation.
pub const OP_CP2: u32 = 0x12;
/// Load byte (sign-extended).
pub const OP_LB: u32 = 0x20;
/// Load halfword (sign-extended).
pub const OP_LH: u32 = 0x21;
/// Load word left (unaligned merge).
pub const OP_LWL: u32 = 0x22;
/// Load word.
pub const OP_LW: u32 = 0x23;
/// Load byte unsigned.
pub const OP_LBU: u32 = 0x24;
/// Load halfword unsigned.
pub const OP_LHU: u32 = 0x25;
/// Load word right (unaligned merge).
pub const OP_LWR: u32 = 0x26;
/// Store byte.
pub const OP_SB: u32 = 0x28;
/// Store halfword.
pub const OP_SH: u32 = 0x29;
/// Store word left (unaligned merge).
pub const OP_SWL: u32 = 0x2a;
/// Store word.
pub const OP_SW: u32 = 0x2b;
/// Store word right (unaligned merge).
pub const OP_SWR: u32 = 0x2e;
/// Load word to coprocessor 2.
pub const OP_LWC2: u32 = 0x32;
/// Store word from coprocessor 2.
pub const OP_SWC2: u32 = 0x3a;

/// Meta: unload the guest register in the rs field from the register cache.
pub const OP_META_REG_UNLOAD: u32 = 0x11;
/// Meta: branch if rs == 0, synthesized from `BEQ rs, $zero`.
pub const OP_META_BEQZ: u32 = 0x14;
/// Meta: branch if rs != 0, synthesized from `BNE rs, $zero`.
pub const OP_META_BNEZ: u32 = 0x15;

/// SPECIAL function codes (bits 0-5).
pub mod special {
    /// Shift left logical by immediate.
    pub const SLL: u32 = 0x00;
    /// Shift right logical by immediate.
    pub const SRL: u32 = 0x02;
    /// Shift right arithmetic by immediate.
    pub const SRA: u32 = 0x03;
    /// Shift left logical by register.
    pub const SLLV: u32 = 0x04;
    /// Shift right logical by register.
    pub const SRLV: u32 = 0x06;
    /// Shift right arithmetic by register.
    pub const SRAV: u32 = 0x07;
    /// Jump to the address in rs.
    pub const JR: u32 = 0x08;
    /// Jump to the address in rs, linking into rd.
    pub const JALR: u32 = 0x09;
    /// System call.
    pub const SYSCALL: u32 = 0x0c;
    /// Breakpoint.
    pub const BREAK: u32 = 0x0d;
    /// Move from HI.
    pub const MFHI: u32 = 0x10;
    /// Move to HI.
    pub const MTHI: u32 = 0x11;
    /// Move from LO.
    pub const MFLO: u32 = 0x12;
    /// Move to LO.
    pub const MTLO: u32 = 0x13;
    /// Signed 32x32 -> 64 multiply into HI:LO.
    pub const MULT: u32 = 0x18;
    /// Unsigned 32x32 -> 64 multiply into HI:LO.
    pub const MULTU: u32 = 0x19;
    /// Signed divide; quotient in LO, remainder in HI.
    pub const DIV: u32 = 0x1a;
    /// Unsigned divide; quotient in LO, remainder in HI.
    pub const DIVU: u32 = 0x1b;
    /// Add (overflow-trapping form; traps are not generated).
    pub const ADD: u32 = 0x20;
    /// Add unsigned.
    pub const ADDU: u32 = 0x21;
    /// Subtract (overflow-trapping form; traps are not generated).
    pub const SUB: u32 = 0x22;
    /// Subtract unsigned.
    pub const SUBU: u32 = 0x23;
    /// Bitwise AND.
    pub const AND: u32 = 0x24;
    /// Bitwise OR.
    pub const OR: u32 = 0x25;
    /// Bitwise XOR.
    pub const XOR: u32 = 0x26;
    /// Bitwise NOR.
    pub const NOR: u32 = 0x27;
    /// Set on less than (signed).
    pub const SLT: u32 = 0x2a;
    /// Set on less than (unsigned).
    pub const SLTU: u32 = 0x2b;
}

/// REGIMM operation codes (rt field).
pub mod regimm {
    /// Branch if rs < 0 (signed).
    pub const BLTZ: u32 = 0x00;
    /// Branch if rs >= 0 (signed).
    pub const BGEZ: u32 = 0x01;
    /// Branch if rs < 0, linking into $ra.
    pub const BLTZAL: u32 = 0x10;
    /// Branch if rs >= 0, linking into $ra.
    pub const BGEZAL: u32 = 0x11;
}

/// Coprocessor operation codes (rs field, CO bit clear).
pub mod cop {
    /// Move from coprocessor data register.
    pub const MFC: u32 = 0x00;
    /// Move from coprocessor control register.
    pub const CFC: u32 = 0x02;
    /// Move to coprocessor data register.
    pub const MTC: u32 = 0x04;
    /// Move to coprocessor control register.
    pub const CTC: u32 = 0x06;
    /// Restore from exception (CP0 only; rs field with the CO bit set).
    pub const RFE: u32 = 0x10;
}

/// CP0 register index of the status register.
pub const CP0_STATUS: u32 = 12;
/// CP0 register index of the cause register.
pub const CP0_CAUSE: u32 = 13;
