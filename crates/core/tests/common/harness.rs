//! Test state construction.
//!
//! Builds a `State` over leaked memory arenas shaped like the PSX address
//! space (2MB RAM at 0 with three mirrors, BIOS, scratch-pad, parallel
//! port, hardware registers behind recording callbacks, cache control),
//! with recording coprocessor stubs on COP0 and COP2.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mipsrec_core::isa::Opcode;
use mipsrec_core::{Config, CoprocessorOps, MemoryMap, MemoryOps, State};

/// RAM length; a power of two, as the code LUT requires.
pub const RAM_LEN: u32 = 0x20_0000;
/// BIOS base (physical).
pub const BIOS_BASE: u32 = 0x1fc0_0000;
/// BIOS length.
pub const BIOS_LEN: u32 = 0x8_0000;
/// Scratch-pad base (physical).
pub const SCRATCH_BASE: u32 = 0x1f80_0000;
/// Scratch-pad length.
pub const SCRATCH_LEN: u32 = 0x400;
/// Hardware-register region base (physical).
pub const HW_BASE: u32 = 0x1f80_1000;

/// Recording coprocessor stub; data and control registers share one file,
/// as they do on the real CP0.
#[derive(Default)]
pub struct StubCop {
    /// Register file, written by mtc/ctc.
    pub regs: RefCell<[u32; 32]>,
    /// Raw words of every generic coprocessor op received.
    pub ops_log: RefCell<Vec<u32>>,
}

impl CoprocessorOps for StubCop {
    fn mfc(&self, _state: &mut State, reg: u8) -> u32 {
        self.regs.borrow()[reg as usize]
    }

    fn cfc(&self, _state: &mut State, reg: u8) -> u32 {
        self.regs.borrow()[reg as usize]
    }

    fn mtc(&self, _state: &mut State, reg: u8, value: u32) {
        self.regs.borrow_mut()[reg as usize] = value;
    }

    fn ctc(&self, _state: &mut State, reg: u8, value: u32) {
        self.regs.borrow_mut()[reg as usize] = value;
    }

    fn op(&self, _state: &mut State, opcode: u32) {
        self.ops_log.borrow_mut().push(opcode);
    }
}

/// Recording I/O callbacks for the hardware-register map.
#[derive(Default)]
pub struct IoLog {
    /// `(addr, value)` of every store received.
    pub writes: RefCell<Vec<(u32, u32)>>,
    /// Addresses of every load received.
    pub reads: RefCell<Vec<u32>>,
    /// Value returned by loads.
    pub value: Cell<u32>,
}

impl MemoryOps for IoLog {
    fn sb(&self, _state: &mut State, _op: &Opcode, addr: u32, data: u8) {
        self.writes.borrow_mut().push((addr, data.into()));
    }

    fn sh(&self, _state: &mut State, _op: &Opcode, addr: u32, data: u16) {
        self.writes.borrow_mut().push((addr, data.into()));
    }

    fn sw(&self, _state: &mut State, _op: &Opcode, addr: u32, data: u32) {
        self.writes.borrow_mut().push((addr, data));
    }

    fn lb(&self, _state: &mut State, _op: &Opcode, addr: u32) -> u8 {
        self.reads.borrow_mut().push(addr);
        self.value.get() as u8
    }

    fn lh(&self, _state: &mut State, _op: &Opcode, addr: u32) -> u16 {
        self.reads.borrow_mut().push(addr);
        self.value.get() as u16
    }

    fn lw(&self, _state: &mut State, _op: &Opcode, addr: u32) -> u32 {
        self.reads.borrow_mut().push(addr);
        self.value.get()
    }
}

/// A `State` plus handles to its stubs and RAM.
pub struct TestContext {
    /// The machine under test.
    pub state: State,
    /// COP0 stub.
    pub cop0: Rc<StubCop>,
    /// COP2 stub.
    pub cop2: Rc<StubCop>,
    /// Hardware-register callbacks.
    pub io: Rc<IoLog>,
    ram: *mut u8,
    bios: *mut u8,
}

fn leak_arena(len: usize) -> *mut u8 {
    Box::leak(vec![0u8; len].into_boxed_slice()).as_mut_ptr()
}

impl TestContext {
    /// Context with the default configuration (first pass enabled).
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Context with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let ram = leak_arena(RAM_LEN as usize);
        let bios = leak_arena(BIOS_LEN as usize);
        let scratch = leak_arena(SCRATCH_LEN as usize);
        let parallel = leak_arena(0x1_0000);
        let cache_ctl = leak_arena(0x100);

        let io = Rc::new(IoLog::default());
        let maps = vec![
            MemoryMap::direct(0, RAM_LEN, ram),
            MemoryMap::direct(BIOS_BASE, BIOS_LEN, bios),
            MemoryMap::direct(SCRATCH_BASE, SCRATCH_LEN, scratch),
            MemoryMap::direct(0x1f00_0000, 0x1_0000, parallel),
            MemoryMap::with_ops(HW_BASE, 0x2000, io.clone()),
            MemoryMap::direct(0x5ffe_0000, 0x100, cache_ctl),
            MemoryMap::mirror(0x20_0000, RAM_LEN, 0),
            MemoryMap::mirror(0x40_0000, RAM_LEN, 0),
            MemoryMap::mirror(0x60_0000, RAM_LEN, 0),
        ];

        let cop0 = Rc::new(StubCop::default());
        let cop2 = Rc::new(StubCop::default());
        let state = State::new(maps, cop0.clone(), cop2.clone(), config)
            .expect("state construction");

        Self {
            state,
            cop0,
            cop2,
            io,
            ram,
            bios,
        }
    }

    /// Writes instruction words (or data) into RAM at a physical address.
    pub fn write_ram(&mut self, kaddr: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            // SAFETY: the arena covers RAM_LEN bytes and tests stay inside.
            unsafe {
                let at = self.ram.add(kaddr as usize + i * 4) as *mut u32;
                at.write_unaligned(word.to_le());
            }
        }
    }

    /// Writes words into the BIOS arena at an offset from its base.
    pub fn write_bios(&mut self, offset: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            // SAFETY: the arena covers BIOS_LEN bytes and tests stay inside.
            unsafe {
                let at = self.bios.add(offset as usize + i * 4) as *mut u32;
                at.write_unaligned(word.to_le());
            }
        }
    }

    /// Reads a RAM word at a physical address.
    pub fn read_ram(&self, kaddr: u32) -> u32 {
        // SAFETY: as for `write_ram`.
        unsafe { u32::from_le((self.ram.add(kaddr as usize) as *const u32).read_unaligned()) }
    }

    /// Full guest register dump (GPRs, LO = 32, HI = 33).
    pub fn regs(&self) -> [u32; 34] {
        let mut regs = [0u32; 34];
        self.state.dump_registers(&mut regs);
        regs
    }

    /// One guest register.
    pub fn reg(&self, index: usize) -> u32 {
        self.regs()[index]
    }

    /// Sets one guest register.
    pub fn set_reg(&mut self, index: usize, value: u32) {
        let mut regs = self.regs();
        regs[index] = value;
        self.state.restore_registers(&regs);
    }

    /// Runs from `pc` with a budget of `cycles` more guest cycles.
    pub fn run(&mut self, pc: u32, cycles: u32) -> u32 {
        let target = self.state.current_cycle_count() + cycles;
        self.state.execute(pc, target)
    }
}
