//! Runtime load/store helper and code-LUT invalidation.
//!
//! Every load or store that has not been promoted to a direct path funnels
//! through [`rw`]: it applies the opcode's displacement, unsegments the
//! address, finds a map, and either dispatches to the map's callbacks or
//! performs the access on host memory. A plain-region hit promotes the
//! opcode to `FLAG_DIRECT_IO` so the next compilation of its block emits the
//! inline path instead.

use tracing::error;

use crate::common::exit;
use crate::isa::instruction::{FLAG_DIRECT_IO, FLAG_NO_INVALIDATE};
use crate::isa::opcodes;
use crate::isa::{InstructionBits, Opcode};
use crate::mem::map::MapKind;
use crate::mem::{find_map, kunseg};
use crate::State;

fn segfault(state: &mut State, addr: u32) {
    state.set_exit_flags(exit::SEGFAULT);
    error!("segmentation fault in recompiled code: invalid load/store at address {addr:#010x}");
}

/// Dispatches an access to a map's callbacks.
fn rw_ops(
    state: &mut State,
    map_index: usize,
    op: &Opcode,
    addr: u32,
    data: u32,
) -> u32 {
    let Some(ops) = state.maps[map_index].ops.clone() else {
        return 0;
    };

    match op.raw.primary() {
        opcodes::OP_SB => {
            ops.sb(state, op, addr, data as u8);
            0
        }
        opcodes::OP_SH => {
            ops.sh(state, op, addr, data as u16);
            0
        }
        opcodes::OP_SWL | opcodes::OP_SWR | opcodes::OP_SW => {
            ops.sw(state, op, addr, data);
            0
        }
        opcodes::OP_SWC2 => {
            let cop2 = state.cop2.clone();
            let word = cop2.mfc(state, op.raw.rt());
            ops.sw(state, op, addr, word);
            0
        }
        opcodes::OP_LB => ops.lb(state, op, addr) as i8 as i32 as u32,
        opcodes::OP_LBU => ops.lb(state, op, addr).into(),
        opcodes::OP_LH => ops.lh(state, op, addr) as i16 as i32 as u32,
        opcodes::OP_LHU => ops.lh(state, op, addr).into(),
        opcodes::OP_LWC2 => {
            let word = ops.lw(state, op, addr);
            let cop2 = state.cop2.clone();
            cop2.mtc(state, op.raw.rt(), word);
            0
        }
        _ => ops.lw(state, op, addr),
    }
}

/// Clears the code-LUT slot for an offset inside the RAM map.
fn invalidate_map(state: &mut State, root_index: usize, offset: u32) {
    if root_index == MapKind::KernelUserRam as usize {
        if let Some(slot) = state.code_lut.get_mut((offset >> 2) as usize) {
            *slot = 0;
        }
        state.stats.lut_invalidations += 1;
    }
}

/// Performs a guest load or store on behalf of `op`.
///
/// `addr` is the base-register value; the opcode's 16-bit displacement is
/// added here, matching the callback path's marshaling. For stores the
/// return value is zero; for loads it is the (sign- or zero-extended) value
/// destined for the rt register. Unmapped accesses flag `SEGFAULT` and
/// return zero.
pub fn rw(state: &mut State, op: &Opcode, addr: u32, data: u32) -> u32 {
    let addr = addr.wrapping_add(op.raw.simm16() as u32);
    let kaddr = kunseg(addr);

    let Some(map_index) = find_map(&state.maps, kaddr) else {
        segfault(state, addr);
        return 0;
    };

    if state.maps[map_index].ops.is_some() {
        state.stats.callback_accesses += 1;
        return rw_ops(state, map_index, op, addr, data);
    }

    let map_pc = state.maps[map_index].pc;
    let mut root = map_index;
    while let Some(target) = state.maps[root].mirror_of {
        root = target;
    }

    if !op.has_flag(FLAG_DIRECT_IO) {
        op.set_flags(FLAG_DIRECT_IO);
        if root != MapKind::KernelUserRam as usize {
            op.set_flags(FLAG_NO_INVALIDATE);
        }
        state.stats.direct_promotions += 1;
    }

    let offset = kaddr - map_pc;
    let host = state.maps[root].address.wrapping_add(offset as usize);

    // SAFETY: `root` is a plain map (no ops, no mirror target), so its
    // `address` covers `length` bytes per the MemoryMap invariant, and
    // `offset < length` because the map lookup bounded `kaddr`. The word
    // forms mask the offset down, staying inside the same region.
    unsafe {
        match op.raw.primary() {
            opcodes::OP_SB => {
                host.write(data as u8);
                invalidate_map(state, root, offset);
                0
            }
            opcodes::OP_SH => {
                (host as *mut u16).write_unaligned((data as u16).to_le());
                invalidate_map(state, root, offset);
                0
            }
            opcodes::OP_SWL => {
                let shift = offset & 3;
                let aligned = state.maps[root].address.wrapping_add((offset & !3) as usize) as *mut u32;
                let mem = u32::from_le(aligned.read());
                let mask = (!0u32).checked_shl((shift + 1) * 8).unwrap_or(0);
                aligned.write(((data >> ((3 - shift) * 8)) | (mem & mask)).to_le());
                invalidate_map(state, root, offset & !3);
                0
            }
            opcodes::OP_SWR => {
                let shift = offset & 3;
                let aligned = state.maps[root].address.wrapping_add((offset & !3) as usize) as *mut u32;
                let mem = u32::from_le(aligned.read());
                let mask = (1u32 << (shift * 8)) - 1;
                aligned.write(((data << (shift * 8)) | (mem & mask)).to_le());
                invalidate_map(state, root, offset & !3);
                0
            }
            opcodes::OP_SW => {
                (host as *mut u32).write_unaligned(data.to_le());
                invalidate_map(state, root, offset);
                0
            }
            opcodes::OP_SWC2 => {
                let cop2 = state.cop2.clone();
                let word = cop2.mfc(state, op.raw.rt());
                (host as *mut u32).write_unaligned(word.to_le());
                invalidate_map(state, root, offset);
                0
            }
            opcodes::OP_LB => host.read() as i8 as i32 as u32,
            opcodes::OP_LBU => host.read().into(),
            opcodes::OP_LH => {
                u16::from_le((host as *const u16).read_unaligned()) as i16 as i32 as u32
            }
            opcodes::OP_LHU => u16::from_le((host as *const u16).read_unaligned()).into(),
            opcodes::OP_LWL => {
                let shift = offset & 3;
                let aligned = state.maps[root].address.wrapping_add((offset & !3) as usize) as *const u32;
                let mem = u32::from_le(aligned.read());
                let mask = (1u32 << (24 - shift * 8)) - 1;
                (data & mask) | (mem << (24 - shift * 8))
            }
            opcodes::OP_LWR => {
                let shift = offset & 3;
                let aligned = state.maps[root].address.wrapping_add((offset & !3) as usize) as *const u32;
                let mem = u32::from_le(aligned.read());
                let mask = (!0u32).checked_shl(32 - shift * 8).unwrap_or(0);
                (data & mask) | (mem >> (shift * 8))
            }
            opcodes::OP_LWC2 => {
                let word = u32::from_le((host as *const u32).read_unaligned());
                let cop2 = state.cop2.clone();
                cop2.mtc(state, op.raw.rt(), word);
                0
            }
            _ => u32::from_le((host as *const u32).read_unaligned()),
        }
    }
}

/// Clears every code-LUT slot covering `[addr, addr + len)`.
///
/// Non-RAM addresses are a no-op; RAM mirrors fold onto the base region.
pub fn invalidate(state: &mut State, addr: u32, len: u32) {
    if len == 0 {
        return;
    }

    let mut kaddr = kunseg(addr & !0x3);
    let Some(map_index) = find_map(&state.maps, kaddr) else {
        return;
    };

    let mut root = map_index;
    while let Some(target) = state.maps[root].mirror_of {
        root = target;
    }
    if root != MapKind::KernelUserRam as usize {
        return;
    }

    // Fold mirrors onto the base region.
    kaddr &= state.maps[MapKind::KernelUserRam as usize].length - 1;

    let mut remaining = len;
    while remaining > 4 {
        invalidate_map(state, root, kaddr);
        remaining -= 4;
        kaddr = kaddr.wrapping_add(4);
    }
    invalidate_map(state, root, kaddr);
}

/// Clears the whole code LUT.
pub fn invalidate_all(state: &mut State) {
    state.code_lut.fill(0);
}
