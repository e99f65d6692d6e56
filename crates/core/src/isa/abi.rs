//! MIPS O32 register names, for logs and diagnostics.

use crate::isa::{REG_HI, REG_LO};

/// Conventional names of the 32 GPRs.
const GPR_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3", "$t0", "$t1", "$t2", "$t3",
    "$t4", "$t5", "$t6", "$t7", "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7",
    "$t8", "$t9", "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

/// Conventional name of a guest register slot (GPRs, LO, HI).
pub fn reg_name(reg: u8) -> &'static str {
    match reg {
        REG_LO => "$lo",
        REG_HI => "$hi",
        _ => GPR_NAMES.get(reg as usize).copied().unwrap_or("$?"),
    }
}
