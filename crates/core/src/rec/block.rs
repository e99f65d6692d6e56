//! Translated block record.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::isa::Opcode;

/// The block's guest bytes could not be disassembled into a terminated
/// region; it runs through the interpreter only.
pub const BLOCK_NEVER_COMPILE: u32 = 1 << 0;

/// One translation unit: a straight-line run of guest code from its entry
/// PC through a control-flow terminator and its delay slot.
pub struct Block {
    /// Entry PC as the guest jumped to it (segmented).
    pub pc: u32,
    /// Entry PC unsegmented and folded onto the root map.
    pub kunseg_pc: u32,
    /// Index of the root memory map holding the source bytes.
    pub map: usize,
    /// Host pointer to the source words.
    ///
    /// # Safety Invariants
    ///
    /// Points into the root map's storage at the block's offset; the
    /// `MemoryMap` invariant keeps it readable while the state lives.
    pub code: *const u32,
    /// Length of the source region in bytes.
    pub length: u32,
    /// Hash of the source words at precompile time.
    pub hash: u64,
    /// The disassembled and optimized opcode list.
    pub ops: Vec<Opcode>,
    /// Handle of the compiled code, or 0 until emitted.
    pub function: Cell<u64>,
    /// Guest cycles accounted to one pass over the block.
    pub cycles: Cell<u32>,
    /// Block flags (`BLOCK_NEVER_COMPILE`).
    pub flags: Cell<u32>,
}

impl Block {
    /// Hashes a run of source words; used for outdated detection.
    pub fn hash_words(words: &[u32]) -> u64 {
        let mut hasher = DefaultHasher::new();
        words.hash(&mut hasher);
        hasher.finish()
    }

    /// Compares the current guest bytes against the precompile snapshot.
    pub fn is_outdated(&self) -> bool {
        // SAFETY: `code` points at `length` readable bytes per the field
        // invariant.
        let words =
            unsafe { std::slice::from_raw_parts(self.code, (self.length / 4) as usize) };
        Self::hash_words(words) != self.hash
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("kunseg_pc", &format_args!("{:#010x}", self.kunseg_pc))
            .field("length", &self.length)
            .field("ops", &self.ops.len())
            .field("function", &self.function.get())
            .finish_non_exhaustive()
    }
}
