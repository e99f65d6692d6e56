//! Unit tests per component.

/// Configuration and statistics serialization.
pub mod config;
/// End-to-end execution scenarios.
pub mod exec;
/// Field extraction and disassembly.
pub mod isa;
/// Optimizer passes.
pub mod optimizer;
/// Register cache discipline.
pub mod regcache;
