//! Translation and execution statistics.
//!
//! Counters updated by the dispatcher, the interpreter, and the runtime
//! memory helper. Cheap enough to keep always-on; serialize them for
//! frontend diagnostics.

use serde::Serialize;

/// Counters describing recompiler activity since construction.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Stats {
    /// Blocks discovered and disassembled.
    pub blocks_precompiled: u64,
    /// Blocks emitted to host code.
    pub blocks_compiled: u64,
    /// Blocks discarded because their guest bytes changed.
    pub blocks_outdated: u64,
    /// Guest instructions executed by the interpreter.
    pub interpreted_ops: u64,
    /// Loads/stores served through map callbacks.
    pub callback_accesses: u64,
    /// Opcodes promoted to the direct load/store path.
    pub direct_promotions: u64,
    /// Code-LUT slots cleared by stores and explicit invalidation.
    pub lut_invalidations: u64,
}
