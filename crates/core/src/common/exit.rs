//! Exit-flag bits.
//!
//! Helpers communicate abnormal conditions to the dispatch loop by OR-ing
//! these bits into the state's exit flags. The outer stub checks the flags on
//! every block return and exits to the caller when they are non-zero.

/// Normal execution, no exit requested.
pub const NORMAL: u32 = 0;

/// A `SYSCALL` instruction was executed.
pub const SYSCALL: u32 = 1 << 0;

/// A `BREAK` instruction was executed.
pub const BREAK: u32 = 1 << 1;

/// CP0 status or cause was written; the caller must re-check interrupts.
pub const CHECK_INTERRUPT: u32 = 1 << 2;

/// A load or store touched an address outside every memory map.
pub const SEGFAULT: u32 = 1 << 3;
