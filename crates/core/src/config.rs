//! Recompiler configuration.
//!
//! A small flat structure compared to a full system simulator: the
//! recompiler has no devices of its own, so the knobs only cover the
//! translation pipeline. Deserializes from JSON for embedding frontends, or
//! use `Config::default()`.

use serde::Deserialize;

/// Default configuration constants.
mod defaults {
    /// Run new blocks once through the interpreter before compiling them.
    ///
    /// The first pass profiles load/store opcodes so the compiler can emit
    /// direct memory paths instead of callback trampolines.
    pub const FIRST_PASS: bool = true;

    /// Upper bound on the number of instruction words scanned per block.
    ///
    /// Guest code normally terminates a block with a branch long before
    /// this; the bound only matters when execution is pointed at data.
    pub const MAX_BLOCK_WORDS: usize = 4096;

    /// Log a disassembly of every block at precompile time.
    pub const TRACE_BLOCKS: bool = false;
}

/// Translation pipeline configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpret each block once before compiling it (profiling pass).
    pub first_pass: bool,
    /// Maximum instruction words scanned when discovering a block.
    pub max_block_words: usize,
    /// Log block disassembly at `debug` level during precompile.
    pub trace_blocks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first_pass: defaults::FIRST_PASS,
            max_block_words: defaults::MAX_BLOCK_WORDS,
            trace_blocks: defaults::TRACE_BLOCKS,
        }
    }
}
