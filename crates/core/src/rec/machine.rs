//! Virtual host runner.
//!
//! Executes finalized [`CodeBlock`]s against the emulator state. Code
//! objects live in a registry and are addressed by 64-bit handles packing a
//! registry slot and an entry offset; handle value 0 is the null handle,
//! which is also what an empty code-LUT slot holds. Cross-object transfers
//! (`JumpHandle` / `CallHandle` / `Ret`) resolve handles through the
//! registry at the moment of the jump, so a block invalidated mid-flight
//! keeps running from the runner's own reference while new dispatches see
//! the updated tables.

use std::rc::Rc;

use crate::common::Error;
use crate::rec::builder::{CodeBlock, HostOp, Cond, Rhs, StateField, Width, NUM_HOST_REGS, T0};
use crate::rec::dispatcher;
use crate::State;

/// Bits of a handle reserved for the entry offset.
const ENTRY_BITS: u32 = 20;

/// Packs a registry slot and entry offset into a non-null code handle.
pub fn make_handle(slot: usize, entry: u32) -> u64 {
    debug_assert!(entry < (1 << ENTRY_BITS));
    ((slot as u64 + 1) << ENTRY_BITS) | u64::from(entry)
}

/// Splits a non-null handle into registry slot and entry offset.
pub fn handle_parts(handle: u64) -> (usize, usize) {
    (
        (handle >> ENTRY_BITS) as usize - 1,
        (handle & ((1 << ENTRY_BITS) - 1)) as usize,
    )
}

/// Owner of all finalized code objects.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    slots: Vec<Option<Rc<CodeBlock>>>,
    free: Vec<usize>,
}

impl CodeRegistry {
    /// Registers a code object and returns its slot index.
    pub fn insert(&mut self, code: Rc<CodeBlock>) -> usize {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(code);
            slot
        } else {
            self.slots.push(Some(code));
            self.slots.len() - 1
        }
    }

    /// Drops the object in `slot`; running references keep it alive.
    pub fn remove(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
            self.free.push(slot);
        }
    }

    /// Resolves a slot to its code object.
    pub fn get(&self, slot: usize) -> Option<Rc<CodeBlock>> {
        self.slots.get(slot).and_then(Clone::clone)
    }
}

fn resolve(state: &State, handle: u64) -> Result<(Rc<CodeBlock>, usize), Error> {
    if handle == 0 {
        return Err(Error::StaleHandle(0));
    }
    let (slot, entry) = handle_parts(handle);
    state
        .registry
        .get(slot)
        .map(|code| (code, entry))
        .ok_or(Error::StaleHandle(handle))
}

/// Runs the code object behind `entry` until the outermost `Ret`.
///
/// `arg` is placed in `T0`, the argument/return register of the dispatch
/// protocol: the stub expects the first block handle there.
pub fn run(state: &mut State, entry: u64, arg: u64) -> Result<(), Error> {
    let (mut code, mut ip) = resolve(state, entry)?;
    let mut regs = [0u64; NUM_HOST_REGS];
    regs[T0 as usize] = arg;

    let mut ret_stack: Vec<(Rc<CodeBlock>, usize)> = Vec::new();
    let mut save_stack: Vec<u64> = Vec::new();

    loop {
        let Some(op) = code.ops.get(ip).copied() else {
            return Err(Error::RanOffCode(code.name));
        };
        ip += 1;

        match op {
            HostOp::MovImm { dst, imm } => regs[dst as usize] = imm,
            HostOp::Mov { dst, src } => regs[dst as usize] = regs[src as usize],
            HostOp::Add { dst, a, b } => {
                regs[dst as usize] =
                    (regs[a as usize] as u32).wrapping_add(regs[b as usize] as u32).into();
            }
            HostOp::Sub { dst, a, b } => {
                regs[dst as usize] =
                    (regs[a as usize] as u32).wrapping_sub(regs[b as usize] as u32).into();
            }
            HostOp::And { dst, a, b } => {
                regs[dst as usize] = u64::from(regs[a as usize] as u32 & regs[b as usize] as u32);
            }
            HostOp::Or { dst, a, b } => {
                regs[dst as usize] = u64::from(regs[a as usize] as u32 | regs[b as usize] as u32);
            }
            HostOp::Xor { dst, a, b } => {
                regs[dst as usize] = u64::from(regs[a as usize] as u32 ^ regs[b as usize] as u32);
            }
            HostOp::Not { dst, src } => {
                regs[dst as usize] = u64::from(!(regs[src as usize] as u32));
            }
            HostOp::Slt { dst, a, b } => {
                regs[dst as usize] =
                    u64::from((regs[a as usize] as u32 as i32) < (regs[b as usize] as u32 as i32));
            }
            HostOp::Sltu { dst, a, b } => {
                regs[dst as usize] =
                    u64::from((regs[a as usize] as u32) < (regs[b as usize] as u32));
            }
            HostOp::Sll { dst, a, b } => {
                let sh = (regs[b as usize] as u32) & 0x1f;
                regs[dst as usize] = u64::from((regs[a as usize] as u32) << sh);
            }
            HostOp::Srl { dst, a, b } => {
                let sh = (regs[b as usize] as u32) & 0x1f;
                regs[dst as usize] = u64::from((regs[a as usize] as u32) >> sh);
            }
            HostOp::Sra { dst, a, b } => {
                let sh = (regs[b as usize] as u32) & 0x1f;
                regs[dst as usize] = u64::from(((regs[a as usize] as u32 as i32) >> sh) as u32);
            }
            HostOp::AddImm { dst, src, imm } => {
                regs[dst as usize] =
                    u64::from((regs[src as usize] as u32).wrapping_add(imm as u32));
            }
            HostOp::SubImm { dst, src, imm } => {
                regs[dst as usize] = u64::from((regs[src as usize] as u32).wrapping_sub(imm));
            }
            HostOp::AndImm { dst, src, imm } => {
                regs[dst as usize] = u64::from(regs[src as usize] as u32 & imm);
            }
            HostOp::OrImm { dst, src, imm } => {
                regs[dst as usize] = u64::from(regs[src as usize] as u32 | imm);
            }
            HostOp::XorImm { dst, src, imm } => {
                regs[dst as usize] = u64::from(regs[src as usize] as u32 ^ imm);
            }
            HostOp::SltImm { dst, src, imm } => {
                regs[dst as usize] = u64::from((regs[src as usize] as u32 as i32) < imm);
            }
            HostOp::SltuImm { dst, src, imm } => {
                regs[dst as usize] = u64::from((regs[src as usize] as u32) < imm);
            }
            HostOp::SllImm { dst, src, sh } => {
                regs[dst as usize] = u64::from((regs[src as usize] as u32) << sh);
            }
            HostOp::SrlImm { dst, src, sh } => {
                regs[dst as usize] = u64::from((regs[src as usize] as u32) >> sh);
            }
            HostOp::SraImm { dst, src, sh } => {
                regs[dst as usize] = u64::from(((regs[src as usize] as u32 as i32) >> sh) as u32);
            }
            HostOp::Ext8u { dst, src } => {
                regs[dst as usize] = regs[src as usize] & 0xff;
            }
            HostOp::Ext16u { dst, src } => {
                regs[dst as usize] = regs[src as usize] & 0xffff;
            }
            HostOp::ExtS32 { dst, src } => {
                regs[dst as usize] = regs[src as usize] as u32 as i32 as i64 as u64;
            }
            HostOp::ExtU32 { dst, src } => {
                regs[dst as usize] = u64::from(regs[src as usize] as u32);
            }
            HostOp::Add64 { dst, a, b } => {
                regs[dst as usize] = regs[a as usize].wrapping_add(regs[b as usize]);
            }
            HostOp::Mul64 { lo, hi, a, b, signed } => {
                let product = if signed {
                    (i64::from(regs[a as usize] as u32 as i32)
                        * i64::from(regs[b as usize] as u32 as i32)) as u64
                } else {
                    u64::from(regs[a as usize] as u32) * u64::from(regs[b as usize] as u32)
                };
                regs[lo as usize] = u64::from(product as u32);
                regs[hi as usize] = product >> 32;
            }
            HostOp::Div64 { lo, hi, a, b, signed } => {
                // The emitted guard branches around this op when the divisor
                // is zero. Going through 64-bit intermediates keeps
                // i32::MIN / -1 defined (truncates to 0x80000000).
                let (q, r) = if signed {
                    let x = i64::from(regs[a as usize] as u32 as i32);
                    let y = i64::from(regs[b as usize] as u32 as i32);
                    ((x / y) as u32, (x % y) as u32)
                } else {
                    let x = regs[a as usize] as u32;
                    let y = regs[b as usize] as u32;
                    (x / y, x % y)
                };
                regs[lo as usize] = u64::from(q);
                regs[hi as usize] = u64::from(r);
            }
            HostOp::LoadMem { dst, addr, width, signed } => {
                let host = regs[addr as usize] as usize as *const u8;
                // SAFETY: direct-path loads are only emitted (or promoted
                // at runtime) for opcodes whose addresses resolve inside a
                // plain memory map, and the emitted address computation adds
                // the map's host offset to an in-range unsegmented address.
                // The MemoryMap invariant keeps that storage alive and
                // readable for the state's lifetime.
                let value = unsafe {
                    match width {
                        Width::Byte => {
                            let v = host.read();
                            if signed {
                                v as i8 as i32 as u32
                            } else {
                                v.into()
                            }
                        }
                        Width::Half => {
                            let v = u16::from_le((host as *const u16).read_unaligned());
                            if signed {
                                v as i16 as i32 as u32
                            } else {
                                v.into()
                            }
                        }
                        Width::Word => u32::from_le((host as *const u32).read_unaligned()),
                    }
                };
                regs[dst as usize] = value.into();
            }
            HostOp::StoreMem { src, addr, width } => {
                let host = regs[addr as usize] as usize as *mut u8;
                let value = regs[src as usize] as u32;
                // SAFETY: as for LoadMem; direct-path stores target plain
                // maps whose storage is valid for writes.
                unsafe {
                    match width {
                        Width::Byte => host.write(value as u8),
                        Width::Half => (host as *mut u16).write_unaligned((value as u16).to_le()),
                        Width::Word => (host as *mut u32).write_unaligned(value.to_le()),
                    }
                }
            }
            HostOp::LoadState { dst, field } => {
                regs[dst as usize] = load_state(state, field);
            }
            HostOp::StoreState { field, src } => {
                store_state(state, field, regs[src as usize]);
            }
            HostOp::LutLookup { dst, addr } => {
                let index = ((regs[addr as usize] as u32) >> 2) as usize;
                regs[dst as usize] = state.code_lut.get(index).copied().unwrap_or(0);
            }
            HostOp::LutClear { addr } => {
                let masked = regs[addr as usize] as u32 & (state.ram_len - 1);
                if let Some(slot) = state.code_lut.get_mut((masked >> 2) as usize) {
                    *slot = 0;
                }
                state.stats.lut_invalidations += 1;
            }
            HostOp::Branch { cond, a, rhs, target } => {
                let x = regs[a as usize];
                let y = match rhs {
                    Rhs::Reg(r) => regs[r as usize],
                    Rhs::Imm(i) => i as u64,
                };
                let taken = match cond {
                    Cond::Eq => x == y,
                    Cond::Ne => x != y,
                    Cond::LtS => (x as i64) < (y as i64),
                    Cond::GeS => (x as i64) >= (y as i64),
                    Cond::GtS => (x as i64) > (y as i64),
                    Cond::LeS => (x as i64) <= (y as i64),
                    Cond::LtU => x < y,
                    Cond::GeU => x >= y,
                    Cond::MaskSet => x & y != 0,
                    Cond::MaskClear => x & y == 0,
                };
                if taken {
                    ip = target as usize;
                }
            }
            HostOp::Jmp { target } => ip = target as usize,
            HostOp::JumpHandle { src } => {
                (code, ip) = resolve(state, regs[src as usize])?;
            }
            HostOp::CallHandle { src } => {
                let target = resolve(state, regs[src as usize])?;
                ret_stack.push((code, ip));
                (code, ip) = target;
            }
            HostOp::CallHelper(helper) => {
                dispatcher::call_helper(state, helper, &mut regs);
            }
            HostOp::Ret => match ret_stack.pop() {
                Some(frame) => (code, ip) = frame,
                None => return Ok(()),
            },
            HostOp::Push { src } => save_stack.push(regs[src as usize]),
            HostOp::Pop { dst } => {
                regs[dst as usize] = save_stack.pop().unwrap_or(0);
            }
        }
    }
}

fn load_state(state: &State, field: StateField) -> u64 {
    match field {
        StateField::Gpr(index) => state.regs[index as usize].into(),
        StateField::OpDataAddr => state.op_data.addr.into(),
        StateField::OpDataData => state.op_data.data.into(),
        StateField::OpDataOp => state.op_data.op.into(),
        StateField::OpDataBlock => state.op_data.block.into(),
        StateField::OpDataIndex => state.op_data.index.into(),
        StateField::CurrentCycle => state.current_cycle.into(),
        StateField::TargetCycle => state.target_cycle.into(),
        StateField::ExitFlags => state.exit_flags.into(),
        StateField::NextPc => state.next_pc.into(),
        StateField::RwHandle => state.rw_handle,
        StateField::MfcHandle => state.mfc_handle,
        StateField::MtcHandle => state.mtc_handle,
        StateField::RfeHandle => state.rfe_handle,
        StateField::CpHandle => state.cp_handle,
        StateField::SyscallHandle => state.syscall_handle,
        StateField::BreakHandle => state.break_handle,
        StateField::EobHandle => state.eob_handle,
    }
}

fn store_state(state: &mut State, field: StateField, value: u64) {
    match field {
        StateField::Gpr(index) => {
            if index != 0 {
                state.regs[index as usize] = value as u32;
            }
        }
        StateField::OpDataAddr => state.op_data.addr = value as u32,
        StateField::OpDataData => state.op_data.data = value as u32,
        StateField::OpDataOp => state.op_data.op = value as u32,
        StateField::OpDataBlock => state.op_data.block = value as u32,
        StateField::OpDataIndex => state.op_data.index = value as u32,
        StateField::CurrentCycle => state.current_cycle = value as u32,
        StateField::TargetCycle => state.target_cycle = value as u32,
        StateField::ExitFlags => state.exit_flags = value as u32,
        StateField::NextPc => state.next_pc = value as u32,
        StateField::RwHandle
        | StateField::MfcHandle
        | StateField::MtcHandle
        | StateField::RfeHandle
        | StateField::CpHandle
        | StateField::SyscallHandle
        | StateField::BreakHandle
        | StateField::EobHandle => {}
    }
}
