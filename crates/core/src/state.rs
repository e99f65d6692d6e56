//! Emulator state and the public library API.

use std::rc::Rc;

use tracing::error;

use crate::common::{exit, Error};
use crate::config::Config;
use crate::mem::map::{MapKind, MemoryMap, NUM_MAP_KINDS};
use crate::mem::access;
use crate::rec::blockcache::BlockCache;
use crate::rec::dispatcher;
use crate::rec::machine::{self, CodeRegistry};
use crate::stats::Stats;
use crate::interp;

/// Callbacks emulating one coprocessor (COP0 or COP2).
///
/// All five operations are required; the recompiler routes `MFC`/`CFC`/
/// `MTC`/`CTC` and the generic coprocessor opcodes through them. Callbacks
/// receive the full state and may raise exit flags.
pub trait CoprocessorOps {
    /// Read data register `reg`.
    fn mfc(&self, state: &mut State, reg: u8) -> u32;
    /// Read control register `reg`.
    fn cfc(&self, state: &mut State, reg: u8) -> u32;
    /// Write data register `reg`.
    fn mtc(&self, state: &mut State, reg: u8, value: u32);
    /// Write control register `reg`.
    fn ctc(&self, state: &mut State, reg: u8, value: u32);
    /// Execute a generic coprocessor operation (raw opcode word).
    fn op(&self, state: &mut State, opcode: u32);
}

/// Marshaling area between emitted code and the helper routines.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct OpData {
    /// Effective address (base register value; displacement added by the
    /// helper).
    pub addr: u32,
    /// Data word in, load result out.
    pub data: u32,
    /// Raw opcode word.
    pub op: u32,
    /// Entry PC of the issuing block.
    pub block: u32,
    /// Opcode index within the issuing block.
    pub index: u32,
}

/// One emulated machine: guest architectural state, memory maps, and the
/// whole translation pipeline.
pub struct State {
    /// Guest register file: GPR0..GPR31, LO (32), HI (33).
    pub(crate) regs: [u32; crate::isa::NUM_GUEST_REGS],
    /// PC execution resumes at after `execute` returns.
    pub(crate) next_pc: u32,
    /// Cycles executed so far.
    pub(crate) current_cycle: u32,
    /// Cycle budget for the current `execute` call.
    pub(crate) target_cycle: u32,
    /// Exit flags; see [`crate::common::exit`].
    pub(crate) exit_flags: u32,

    /// Guest memory maps, one per [`MapKind`] in kind order.
    pub(crate) maps: Vec<MemoryMap>,
    /// COP0 callbacks.
    pub(crate) cop0: Rc<dyn CoprocessorOps>,
    /// COP2 callbacks.
    pub(crate) cop2: Rc<dyn CoprocessorOps>,

    /// Direct-mapped table from RAM word offset to compiled-code handle.
    pub(crate) code_lut: Box<[u64]>,
    /// Helper marshaling area.
    pub(crate) op_data: OpData,
    /// PC-keyed block cache.
    pub(crate) block_cache: BlockCache,
    /// Owner of every finalized code object.
    pub(crate) registry: CodeRegistry,

    /// Host-offset delta of the RAM map.
    pub(crate) offset_ram: u64,
    /// Host-offset delta of the BIOS map.
    pub(crate) offset_bios: u64,
    /// Host-offset delta of the scratch-pad map.
    pub(crate) offset_scratch: u64,
    /// RAM length in bytes (power of two).
    pub(crate) ram_len: u32,
    /// The three RAM mirrors sit contiguously after RAM in host memory.
    pub(crate) mirrors_mapped: bool,

    /// Dispatch stub entry handle.
    pub(crate) wrapper: u64,
    /// Dispatch stub end-of-block re-entry handle.
    pub(crate) eob_handle: u64,
    /// Load/store thunk handle.
    pub(crate) rw_handle: u64,
    /// Coprocessor-read thunk handle.
    pub(crate) mfc_handle: u64,
    /// Coprocessor-write thunk handle.
    pub(crate) mtc_handle: u64,
    /// RFE thunk handle.
    pub(crate) rfe_handle: u64,
    /// Generic coprocessor-op thunk handle.
    pub(crate) cp_handle: u64,
    /// SYSCALL thunk handle.
    pub(crate) syscall_handle: u64,
    /// BREAK thunk handle.
    pub(crate) break_handle: u64,

    /// Translation pipeline configuration.
    pub(crate) config: Config,
    /// Activity counters.
    pub(crate) stats: Stats,
}

impl State {
    /// Builds a machine over the given memory maps and coprocessor
    /// callbacks.
    ///
    /// `maps` must contain one entry per [`MapKind`], in kind order; the
    /// RAM map's length must be a non-zero power of two (it sizes the code
    /// LUT and masks mirror addresses).
    pub fn new(
        maps: Vec<MemoryMap>,
        cop0: Rc<dyn CoprocessorOps>,
        cop2: Rc<dyn CoprocessorOps>,
        config: Config,
    ) -> Result<Self, Error> {
        if maps.len() < NUM_MAP_KINDS {
            return Err(Error::NotEnoughMaps {
                expected: NUM_MAP_KINDS,
                got: maps.len(),
            });
        }

        let ram = &maps[MapKind::KernelUserRam as usize];
        let ram_len = ram.length;
        if ram_len == 0 || !ram_len.is_power_of_two() {
            return Err(Error::BadRamLength(ram_len));
        }

        let delta = |kind: MapKind| {
            let map = &maps[kind as usize];
            (map.address as u64).wrapping_sub(u64::from(map.pc))
        };
        let offset_ram = delta(MapKind::KernelUserRam);
        let offset_bios = delta(MapKind::Bios);
        let offset_scratch = delta(MapKind::ScratchPad);

        let ram_base = ram.address;
        let mirrors_mapped = [
            (MapKind::Mirror1, 0x20_0000usize),
            (MapKind::Mirror2, 0x40_0000),
            (MapKind::Mirror3, 0x60_0000),
        ]
        .iter()
        .all(|&(kind, offset)| {
            maps[kind as usize].address == ram_base.wrapping_add(offset)
        });

        let mut state = Self {
            regs: [0; crate::isa::NUM_GUEST_REGS],
            next_pc: 0,
            current_cycle: 0,
            target_cycle: 0,
            exit_flags: exit::NORMAL,
            maps,
            cop0,
            cop2,
            code_lut: vec![0u64; (ram_len >> 2) as usize].into_boxed_slice(),
            op_data: OpData::default(),
            block_cache: BlockCache::default(),
            registry: CodeRegistry::default(),
            offset_ram,
            offset_bios,
            offset_scratch,
            ram_len,
            mirrors_mapped,
            wrapper: 0,
            eob_handle: 0,
            rw_handle: 0,
            mfc_handle: 0,
            mtc_handle: 0,
            rfe_handle: 0,
            cp_handle: 0,
            syscall_handle: 0,
            break_handle: 0,
            config,
            stats: Stats::default(),
        };

        dispatcher::generate_wrappers(&mut state);
        Ok(state)
    }

    /// Runs recompiled code from `pc` until an exit flag is raised or the
    /// cycle counter reaches `target_cycle`. Returns the next guest PC.
    pub fn execute(&mut self, pc: u32, target_cycle: u32) -> u32 {
        self.exit_flags = exit::NORMAL;

        // A target behind the current counter means the caller's counter
        // wrapped; run until something else stops us.
        let target = if target_cycle < self.current_cycle {
            u32::MAX
        } else {
            target_cycle
        };
        self.target_cycle = target;

        let first = dispatcher::get_next_block_func(self, pc);
        if first != 0 {
            let wrapper = self.wrapper;
            if let Err(err) = machine::run(self, wrapper, first) {
                error!("virtual host fault: {err}");
                self.set_exit_flags(exit::SEGFAULT);
            }
        }

        self.next_pc
    }

    /// Runs at most one block from `pc`. Returns the next guest PC.
    pub fn execute_one(&mut self, pc: u32) -> u32 {
        self.execute(pc, self.current_cycle)
    }

    /// Interprets one block from `pc`. Returns the next guest PC, or 0 if
    /// no block could be built there.
    pub fn run_interpreter(&mut self, pc: u32) -> u32 {
        self.exit_flags = exit::NORMAL;
        match dispatcher::get_block(self, pc) {
            Some(block) => interp::run_block(self, &block),
            None => 0,
        }
    }

    /// Invalidates compiled code covering `[addr, addr + len)`.
    ///
    /// Call after writing guest RAM behind the recompiler's back (DMA,
    /// savestate load). Stores executed by guest code invalidate on their
    /// own.
    pub fn invalidate(&mut self, addr: u32, len: u32) {
        access::invalidate(self, addr, len);
    }

    /// Drops every compiled-code publication at once.
    pub fn invalidate_all(&mut self) {
        access::invalidate_all(self);
    }

    /// ORs `flags` into the exit flags.
    pub fn set_exit_flags(&mut self, flags: u32) {
        self.exit_flags |= flags;
    }

    /// Current exit flags.
    pub fn exit_flags(&self) -> u32 {
        self.exit_flags
    }

    /// Copies the guest register file (GPRs, LO, HI) into `regs`.
    pub fn dump_registers(&self, regs: &mut [u32; crate::isa::NUM_GUEST_REGS]) {
        *regs = self.regs;
    }

    /// Overwrites the guest register file from `regs`.
    pub fn restore_registers(&mut self, regs: &[u32; crate::isa::NUM_GUEST_REGS]) {
        self.regs = *regs;
    }

    /// Cycles executed so far.
    pub fn current_cycle_count(&self) -> u32 {
        self.current_cycle
    }

    /// Rebases the cycle counter.
    pub fn reset_cycle_count(&mut self, cycles: u32) {
        self.current_cycle = cycles;
    }

    /// Moves the cycle budget of the running `execute` call.
    pub fn set_target_cycle_count(&mut self, cycles: u32) {
        self.target_cycle = cycles;
    }

    /// Activity counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Code-LUT slot for an unsegmented RAM address; 0 means no compiled
    /// block is published there. Diagnostic.
    pub fn code_lut_entry(&self, kaddr: u32) -> u64 {
        let index = ((kaddr & (self.ram_len - 1)) >> 2) as usize;
        self.code_lut.get(index).copied().unwrap_or(0)
    }

    /// Reads guest register `reg`; register 0 is always zero.
    #[inline]
    pub(crate) fn gpr(&self, reg: u8) -> u32 {
        if reg == 0 {
            0
        } else {
            self.regs[reg as usize]
        }
    }

    /// Writes guest register `reg`; writes to register 0 are dropped.
    #[inline]
    pub(crate) fn set_gpr(&mut self, reg: u8, value: u32) {
        if reg != 0 {
            self.regs[reg as usize] = value;
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("next_pc", &format_args!("{:#010x}", self.next_pc))
            .field("current_cycle", &self.current_cycle)
            .field("exit_flags", &self.exit_flags)
            .field("blocks", &self.block_cache.len())
            .finish_non_exhaustive()
    }
}
