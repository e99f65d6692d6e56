//! MIPS-I dynamic recompiler core.
//!
//! This crate recompiles 32-bit little-endian MIPS-I guest code (the
//! PlayStation CPU) into host code and runs it, maintaining guest-visible
//! architectural state across block transitions. The pipeline:
//! 1. **Disassembly:** Guest words from a starting PC up to a control-flow
//!    terminator and its delay slot become a block's opcode list.
//! 2. **Optimization:** Flag passes drive the code generator (meta
//!    branches, delay-slot folding, dead-register unloads).
//! 3. **Emission:** Per-opcode lowering through a host-agnostic code
//!    builder, with a register cache mapping guest registers onto host
//!    registers.
//! 4. **Dispatch:** A resident outer stub loops between compiled blocks
//!    through a direct-mapped code LUT keyed by unsegmented PC, falling
//!    back to a slow path that compiles missing blocks.
//!
//! Device emulation stays outside: hardware registers and coprocessors are
//! reached through the callback traits registered at construction.

/// Common types (exit flags, errors).
pub mod common;
/// Translation pipeline configuration.
pub mod config;
/// Reference interpreter (first-pass profiling and the public API).
pub mod interp;
/// MIPS-I instruction set support.
pub mod isa;
/// Guest memory maps and the runtime access layer.
pub mod mem;
/// Opcode-list optimization passes.
pub mod opt;
/// Translation pipeline and its runtime.
pub mod rec;
/// Activity counters.
pub mod stats;

mod state;

pub use crate::common::{exit, Error};
pub use crate::config::Config;
pub use crate::mem::{MapKind, MemoryMap, MemoryOps, NUM_MAP_KINDS};
pub use crate::state::{CoprocessorOps, State};
pub use crate::stats::Stats;
