//! Memory map records.
//!
//! Each map ties a guest physical range to host memory, to a set of access
//! callbacks, or to another map it mirrors. The map set is fixed: the
//! constructor expects one map per [`MapKind`], in kind order.

use std::rc::Rc;

use crate::isa::Opcode;
use crate::State;

/// The fixed set of map kinds, in the order maps are supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum MapKind {
    /// Main RAM, visible from kuseg and both kernel segments.
    KernelUserRam = 0,
    /// BIOS ROM.
    Bios,
    /// The 1KB scratch-pad (data cache used as fast RAM).
    ScratchPad,
    /// Parallel port / expansion region.
    ParallelPort,
    /// Memory-mapped hardware registers.
    HwRegisters,
    /// Cache control register region.
    CacheControl,
    /// First RAM mirror (+0x200000).
    Mirror1,
    /// Second RAM mirror (+0x400000).
    Mirror2,
    /// Third RAM mirror (+0x600000).
    Mirror3,
}

/// Number of map kinds; `State::new` requires exactly this many maps.
pub const NUM_MAP_KINDS: usize = 9;

/// Access callbacks for a map backed by device emulation.
///
/// When a map carries these, every guest access to it is routed through the
/// callbacks instead of touching host memory. Loads return the raw value;
/// widening and sign extension are applied by the caller.
pub trait MemoryOps {
    /// Store byte.
    fn sb(&self, state: &mut State, op: &Opcode, addr: u32, data: u8);
    /// Store halfword.
    fn sh(&self, state: &mut State, op: &Opcode, addr: u32, data: u16);
    /// Store word.
    fn sw(&self, state: &mut State, op: &Opcode, addr: u32, data: u32);
    /// Load byte.
    fn lb(&self, state: &mut State, op: &Opcode, addr: u32) -> u8;
    /// Load halfword.
    fn lh(&self, state: &mut State, op: &Opcode, addr: u32) -> u16;
    /// Load word.
    fn lw(&self, state: &mut State, op: &Opcode, addr: u32) -> u32;
}

/// One guest memory region.
pub struct MemoryMap {
    /// Guest physical base address of the region.
    pub pc: u32,
    /// Region length in bytes.
    pub length: u32,
    /// Host base address of the backing storage.
    ///
    /// # Safety Invariants
    ///
    /// When `ops` and `mirror_of` are both absent, this pointer must satisfy,
    /// for the whole lifetime of the `State` built over it:
    /// - it points to an allocation of at least `length` bytes, valid for
    ///   reads and writes;
    /// - nothing frees or reallocates the storage while the state exists.
    ///
    /// Maps with `ops` or `mirror_of` set never dereference it.
    pub address: *mut u8,
    /// Access callbacks; present means all accesses go through them.
    pub ops: Option<Rc<dyn MemoryOps>>,
    /// Index of the map this one mirrors; accesses resolve through it.
    pub mirror_of: Option<usize>,
}

impl MemoryMap {
    /// Builds a plain map over host storage.
    pub fn direct(pc: u32, length: u32, address: *mut u8) -> Self {
        Self {
            pc,
            length,
            address,
            ops: None,
            mirror_of: None,
        }
    }

    /// Builds a map whose accesses are served by callbacks.
    pub fn with_ops(pc: u32, length: u32, ops: Rc<dyn MemoryOps>) -> Self {
        Self {
            pc,
            length,
            address: std::ptr::null_mut(),
            ops: Some(ops),
            mirror_of: None,
        }
    }

    /// Builds a mirror of the map at index `of`.
    pub fn mirror(pc: u32, length: u32, of: usize) -> Self {
        Self {
            pc,
            length,
            address: std::ptr::null_mut(),
            ops: None,
            mirror_of: Some(of),
        }
    }
}
