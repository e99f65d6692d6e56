//! Library error type.
//!
//! Errors surface only from construction and compilation entry points; once
//! execution is running, failures are reported through the exit flags instead
//! (recompiled code never raises).

use thiserror::Error;

/// Errors returned by the recompiler library.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Fewer memory maps were supplied than the fixed set of map kinds.
    #[error("expected {expected} memory maps, got {got}")]
    NotEnoughMaps {
        /// Number of maps the fixed map-kind set requires.
        expected: usize,
        /// Number of maps actually supplied.
        got: usize,
    },

    /// The RAM map has a zero or non-power-of-two length.
    #[error("RAM map length {0:#x} is not a non-zero power of two")]
    BadRamLength(u32),

    /// A guest PC resolved to no memory map during block discovery.
    #[error("no memory map covers guest PC {0:#010x}")]
    UnmappedPc(u32),

    /// A code handle did not resolve to a live code object.
    #[error("stale code handle {0:#x}")]
    StaleHandle(u64),

    /// The virtual host ran past the end of a code object.
    #[error("execution ran off the end of code object {0:?}")]
    RanOffCode(&'static str),
}
