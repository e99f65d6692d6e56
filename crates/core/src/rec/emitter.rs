//! Per-opcode lowering.
//!
//! One `rec_*` routine per guest instruction, dispatched on the primary
//! opcode with nested dispatch for the SPECIAL / REGIMM / CP0 / CP2 groups.
//! Each routine reserves its operands in the register cache and emits a
//! handful of virtual host instructions through the code builder.
//!
//! Control transfers end with [`emit_end_of_block`]: link write, delay-slot
//! recompilation, storeback, next-PC into `V0`, cycle subtraction, and a
//! jump to the dispatch stub's re-entry — taken directly for the last
//! epilogue in a block, or through a recorded jump node patched when the
//! last epilogue lands.

use tracing::{debug, warn};

use crate::isa::instruction::{
    cycles_of_opcode, has_delay_slot, FLAG_DIRECT_IO, FLAG_NO_DELAY_SLOT, FLAG_NO_INVALIDATE,
};
use crate::isa::opcodes::{self, cop, regimm, special, CP0_CAUSE, CP0_STATUS};
use crate::isa::{InstructionBits, Opcode, REG_HI, REG_LO, REG_RA};
use crate::rec::builder::{
    CodeBuilder, Cond, Fixup, HostReg, Rhs, StateField, Width, REG_CYCLE, V0,
};
use crate::rec::regcache::RegCache;

/// Bit 28 distinguishes RAM (clear) from the scratch-pad/IO region (set)
/// in an unsegmented, mirror-folded address.
const BIT_IO: i64 = 0x1000_0000;
/// Bit 22 distinguishes the BIOS (set) from the scratch-pad (clear) once
/// bit 28 is known to be set.
const BIT_BIOS: i64 = 0x0040_0000;

/// Unsegmenting mask that also folds the three RAM mirrors.
const KUNSEG_MIRROR_MASK: u32 = 0x1f9f_ffff;

/// Host-offset deltas and layout facts copied out of the state at
/// compile start; everything the direct memory paths specialize on.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    /// `host_address - guest_base` for the RAM map.
    pub offset_ram: u64,
    /// `host_address - guest_base` for the BIOS map.
    pub offset_bios: u64,
    /// `host_address - guest_base` for the scratch-pad map.
    pub offset_scratch: u64,
    /// All three RAM mirrors are mapped contiguously after RAM.
    pub mirrors_mapped: bool,
}

/// Emission context for one block.
pub struct Compiler<'a> {
    /// Code being assembled.
    pub b: CodeBuilder,
    /// Register cache, reset at block start.
    pub regs: RegCache,
    /// Memory layout facts.
    pub layout: Layout,
    /// The block's opcode list.
    pub ops: &'a [Opcode],
    /// Entry PC, marshaled to helpers for opcode identity.
    pub block_pc: u32,
    /// Guest cycles accrued so far in the compile loop.
    pub cycles: u32,
    /// Early end-of-block jumps awaiting the final epilogue.
    pub branches: Vec<Fixup>,
    /// The current emission path ended in an epilogue.
    pub ended: bool,
}

impl<'a> Compiler<'a> {
    /// Fresh context over a block's opcode list.
    pub fn new(ops: &'a [Opcode], block_pc: u32, layout: Layout) -> Self {
        Self {
            b: CodeBuilder::new("block"),
            regs: RegCache::new(),
            layout,
            ops,
            block_pc,
            cycles: 0,
            branches: Vec::new(),
            ended: false,
        }
    }
}

/// Index of the delay slot to inline for the branch at `i`, if any.
fn ds_index(cc: &Compiler<'_>, i: usize) -> Option<usize> {
    if cc.ops[i].has_flag(FLAG_NO_DELAY_SLOT) {
        None
    } else if i + 1 < cc.ops.len() {
        Some(i + 1)
    } else {
        None
    }
}

/// Emits the end-of-block sequence.
///
/// `reg_new_pc` carries the next PC when it lives in a host register (the
/// JR/JALR family); otherwise `imm` is the next PC. `link`, when non-zero,
/// is written to guest register `ra_reg` before anything else.
fn emit_end_of_block(
    cc: &mut Compiler<'_>,
    pc: u32,
    reg_new_pc: Option<HostReg>,
    imm: u32,
    ra_reg: u8,
    link: u32,
    ds: Option<usize>,
) {
    let is_last = match ds {
        Some(di) => di + 1 >= cc.ops.len(),
        None => true,
    };

    if link != 0 {
        let link_reg = cc.regs.reserve_out(&mut cc.b, ra_reg);
        cc.b.movi(link_reg, link.into());
        cc.regs.free(link_reg);
    }

    let new_pc = match reg_new_pc {
        Some(hw) => hw,
        None => {
            let hw = cc.regs.claim(&mut cc.b, V0);
            cc.b.movi(hw, imm.into());
            hw
        }
    };

    let mut cycles = cc.cycles;
    if let Some(di) = ds {
        cycles += cycles_of_opcode(&cc.ops[di]);
        if !cc.ops[di].is_nop() {
            let _ = rec_opcode(cc, di, pc.wrapping_add(4));
        }
    }

    cc.regs.storeback_all(&mut cc.b);

    cc.b.mov(V0, new_pc);
    cc.b.subi(REG_CYCLE, REG_CYCLE, cycles);

    if is_last {
        for fixup in std::mem::take(&mut cc.branches) {
            cc.b.patch(fixup);
        }
        // `new_pc` stays reserved here so the temp never lands on V0.
        let tmp = cc.regs.alloc_temp(&mut cc.b);
        cc.b.ld_state(tmp, StateField::EobHandle);
        cc.b.jump_handle(tmp);
        cc.regs.free(tmp);
    } else {
        let fixup = cc.b.jmp();
        cc.branches.push(fixup);
    }
    cc.regs.free(new_pc);
    cc.ended = true;
}

/// Epilogue for an emission path that falls off the end of the opcode
/// list, continuing execution at `pc` (the first address past the block).
pub fn emit_fallthrough(cc: &mut Compiler<'_>, pc: u32) {
    emit_end_of_block(cc, pc, None, pc, REG_RA, 0, None);
}

/// Shared lowering for the conditional-branch family.
///
/// `skip_cond` is the condition under which the branch is *not* taken: the
/// emitted comparison jumps over the taken side's epilogue. `bz` marks the
/// single-operand compare-against-zero forms.
fn rec_b(
    cc: &mut Compiler<'_>,
    i: usize,
    pc: u32,
    skip_cond: Cond,
    link: u32,
    unconditional: bool,
    bz: bool,
) {
    let op = &cc.ops[i];
    let raw = op.raw;
    let ds = ds_index(cc, i);
    let target = pc
        .wrapping_add(4)
        .wrapping_add((raw.simm16() << 2) as u32);

    let fork = if unconditional {
        None
    } else {
        let rs = cc.regs.reserve_in(&mut cc.b, raw.rs());
        cc.b.exts32(rs, rs);
        let rhs = if bz {
            Rhs::Imm(0)
        } else {
            let rt = cc.regs.reserve_in(&mut cc.b, raw.rt());
            cc.b.exts32(rt, rt);
            Rhs::Reg(rt)
        };
        let fixup = cc.b.branch(skip_cond, rs, rhs);
        cc.regs.free_all();
        Some((fixup, cc.regs.snapshot()))
    };

    emit_end_of_block(cc, pc, None, target, REG_RA, link, ds);

    if let Some((fixup, snapshot)) = fork {
        cc.b.patch(fixup);
        cc.regs.restore(&snapshot);
        cc.ended = false;

        if bz && link != 0 {
            // The and-link forms write $ra whether or not the branch is
            // taken; the taken side handled it inside the epilogue.
            let link_reg = cc.regs.reserve_out(&mut cc.b, REG_RA);
            cc.b.movi(link_reg, link.into());
            cc.regs.free(link_reg);
        }

        if let Some(di) = ds {
            if !cc.ops[di].is_nop() {
                let _ = rec_opcode(cc, di, pc.wrapping_add(4));
            }
        }
    }
}

fn rec_j(cc: &mut Compiler<'_>, i: usize, pc: u32, link: u32) {
    let raw = cc.ops[i].raw;
    let ds = ds_index(cc, i);
    let target = (pc & 0xf000_0000) | (raw.imm26() << 2);
    emit_end_of_block(cc, pc, None, target, REG_RA, link, ds);
}

fn rec_jr(cc: &mut Compiler<'_>, i: usize, pc: u32, ra_reg: u8, link: u32) {
    let raw = cc.ops[i].raw;
    let rs = cc.regs.request_specific_in(&mut cc.b, raw.rs(), V0);
    let ds = ds_index(cc, i);
    emit_end_of_block(cc, pc, Some(rs), 0, ra_reg, link, ds);
}

fn rec_alu_imm(cc: &mut Compiler<'_>, op: &Opcode, emit: impl FnOnce(&mut CodeBuilder, HostReg, HostReg)) {
    let rs = cc.regs.reserve_in(&mut cc.b, op.raw.rs());
    let rt = cc.regs.reserve_out(&mut cc.b, op.raw.rt());
    emit(&mut cc.b, rt, rs);
    cc.regs.free(rs);
    cc.regs.free(rt);
}

fn rec_alu_reg(cc: &mut Compiler<'_>, op: &Opcode, emit: impl FnOnce(&mut CodeBuilder, HostReg, HostReg, HostReg)) {
    let rs = cc.regs.reserve_in(&mut cc.b, op.raw.rs());
    let rt = cc.regs.reserve_in(&mut cc.b, op.raw.rt());
    let rd = cc.regs.reserve_out(&mut cc.b, op.raw.rd());
    emit(&mut cc.b, rd, rs, rt);
    cc.regs.free(rs);
    cc.regs.free(rt);
    cc.regs.free(rd);
}

/// Register-amount shifts mask the shift count to 5 bits.
fn rec_alu_shiftv(cc: &mut Compiler<'_>, op: &Opcode, emit: impl FnOnce(&mut CodeBuilder, HostReg, HostReg, HostReg)) {
    let rs = cc.regs.reserve_in(&mut cc.b, op.raw.rs());
    let rt = cc.regs.reserve_in(&mut cc.b, op.raw.rt());
    let rd = cc.regs.reserve_out(&mut cc.b, op.raw.rd());
    let tmp = cc.regs.alloc_temp(&mut cc.b);
    cc.b.andi(tmp, rs, 0x1f);
    emit(&mut cc.b, rd, rt, tmp);
    cc.regs.free(tmp);
    cc.regs.free(rs);
    cc.regs.free(rt);
    cc.regs.free(rd);
}

fn rec_alu_shift_imm(cc: &mut Compiler<'_>, op: &Opcode, emit: impl FnOnce(&mut CodeBuilder, HostReg, HostReg, u8)) {
    let rt = cc.regs.reserve_in(&mut cc.b, op.raw.rt());
    let rd = cc.regs.reserve_out(&mut cc.b, op.raw.rd());
    emit(&mut cc.b, rd, rt, op.raw.shamt() as u8);
    cc.regs.free(rt);
    cc.regs.free(rd);
}

fn rec_alu_mult(cc: &mut Compiler<'_>, op: &Opcode, signed: bool) {
    let rs = cc.regs.reserve_in(&mut cc.b, op.raw.rs());
    let rt = cc.regs.reserve_in(&mut cc.b, op.raw.rt());
    let lo = cc.regs.reserve_out(&mut cc.b, REG_LO);
    let hi = cc.regs.reserve_out(&mut cc.b, REG_HI);
    cc.b.mul64(lo, hi, rs, rt, signed);
    cc.regs.free(rs);
    cc.regs.free(rt);
    cc.regs.free(lo);
    cc.regs.free(hi);
}

fn rec_alu_div(cc: &mut Compiler<'_>, op: &Opcode, signed: bool) {
    let rs = cc.regs.reserve_in(&mut cc.b, op.raw.rs());
    let rt = cc.regs.reserve_in(&mut cc.b, op.raw.rt());
    let lo = cc.regs.reserve_out(&mut cc.b, REG_LO);
    let hi = cc.regs.reserve_out(&mut cc.b, REG_HI);

    // Divide-by-zero takes the architectural fallback instead of trapping.
    let zero = cc.b.branch(Cond::Eq, rt, Rhs::Imm(0));
    cc.b.div64(lo, hi, rs, rt, signed);
    let done = cc.b.jmp();

    cc.b.patch(zero);
    if signed {
        // LO = (rs < 0) ? 1 : -1, HI = rs.
        cc.b.slti(lo, rs, 0);
        cc.b.slli(lo, lo, 1);
        cc.b.subi(lo, lo, 1);
    } else {
        cc.b.movi(lo, 0xffff_ffff);
    }
    cc.b.mov(hi, rs);
    cc.b.patch(done);

    cc.regs.free(rs);
    cc.regs.free(rt);
    cc.regs.free(lo);
    cc.regs.free(hi);
}

fn rec_mv_lo_hi(cc: &mut Compiler<'_>, dst: u8, src: u8) {
    let src = cc.regs.reserve_in(&mut cc.b, src);
    let dst = cc.regs.reserve_out(&mut cc.b, dst);
    cc.b.mov(dst, src);
    cc.regs.free(src);
    cc.regs.free(dst);
}

/// Callback-path load/store: marshal operands into the op-data block and
/// call the load/store thunk.
fn rec_io(cc: &mut Compiler<'_>, i: usize, load_rt: bool, read_rt: bool) {
    let op = &cc.ops[i];
    let raw = op.raw;

    let rs = cc.regs.reserve_in(&mut cc.b, raw.rs());
    cc.b.st_state(StateField::OpDataAddr, rs);
    cc.regs.free(rs);

    if load_rt {
        let rt = cc.regs.reserve_in(&mut cc.b, raw.rt());
        cc.b.st_state(StateField::OpDataData, rt);
        cc.regs.free(rt);
    }

    let tmp = cc.regs.alloc_temp(&mut cc.b);
    let tmp2 = cc.regs.alloc_temp(&mut cc.b);
    cc.b.ld_state(tmp2, StateField::RwHandle);

    cc.b.movi(tmp, raw.into());
    cc.b.st_state(StateField::OpDataOp, tmp);
    cc.b.movi(tmp, cc.block_pc.into());
    cc.b.st_state(StateField::OpDataBlock, tmp);
    cc.b.movi(tmp, i as u64);
    cc.b.st_state(StateField::OpDataIndex, tmp);

    cc.regs.storeback_all(&mut cc.b);
    cc.b.call_handle(tmp2);
    cc.regs.free(tmp);
    cc.regs.free(tmp2);

    cc.regs.mark_live_after_call(&mut cc.b);

    if read_rt && raw.rt() != 0 {
        let rt = cc.regs.reserve_out(&mut cc.b, raw.rt());
        cc.b.ld_state(rt, StateField::OpDataData);
        cc.regs.free(rt);
    }
}

/// Computes the mirror-folded unsegmented address into a fresh temp.
fn emit_kunseg_addr(cc: &mut Compiler<'_>, raw: u32, rs: HostReg) -> HostReg {
    let tmp = cc.regs.alloc_temp(&mut cc.b);
    if raw.imm16() != 0 {
        cc.b.addi(tmp, rs, raw.simm16());
        cc.b.andi(tmp, tmp, KUNSEG_MIRROR_MASK);
    } else {
        cc.b.andi(tmp, rs, KUNSEG_MIRROR_MASK);
    }
    tmp
}

fn rec_store_direct_no_invalidate(cc: &mut Compiler<'_>, i: usize, width: Width) {
    let raw = cc.ops[i].raw;
    let layout = cc.layout;

    let rs = cc.regs.reserve_in(&mut cc.b, raw.rs());
    let addr = emit_kunseg_addr(cc, raw, rs);
    cc.regs.free(rs);

    let offset = cc.regs.alloc_temp(&mut cc.b);
    if layout.offset_ram == layout.offset_scratch {
        cc.b.movi(offset, layout.offset_ram);
    } else {
        let not_ram = cc.b.branch(Cond::MaskSet, addr, Rhs::Imm(BIT_IO));
        cc.b.movi(offset, layout.offset_ram);
        let done = cc.b.jmp();
        cc.b.patch(not_ram);
        cc.b.movi(offset, layout.offset_scratch);
        cc.b.patch(done);
    }
    cc.b.add64(addr, addr, offset);
    cc.regs.free(offset);

    let rt = cc.regs.reserve_in(&mut cc.b, raw.rt());
    cc.b.store_mem(rt, addr, width);
    cc.regs.free(rt);
    cc.regs.free(addr);
}

fn rec_store_direct(cc: &mut Compiler<'_>, i: usize, width: Width) {
    let raw = cc.ops[i].raw;
    let layout = cc.layout;

    let rs = cc.regs.reserve_in(&mut cc.b, raw.rs());
    let addr = emit_kunseg_addr(cc, raw, rs);
    cc.regs.free(rs);

    let offset = cc.regs.alloc_temp(&mut cc.b);
    let not_ram = cc.b.branch(Cond::MaskSet, addr, Rhs::Imm(BIT_IO));

    // The LUT slot covering the target word is cleared before the data
    // write, so a stale block can never be re-entered after the store.
    cc.b.lut_clear(addr);
    cc.b.movi(offset, layout.offset_ram);
    let done = cc.b.jmp();

    cc.b.patch(not_ram);
    cc.b.movi(offset, layout.offset_scratch);
    cc.b.patch(done);

    cc.b.add64(addr, addr, offset);
    cc.regs.free(offset);

    let rt = cc.regs.reserve_in(&mut cc.b, raw.rt());
    cc.b.store_mem(rt, addr, width);
    cc.regs.free(rt);
    cc.regs.free(addr);
}

fn rec_store(cc: &mut Compiler<'_>, i: usize, width: Width) {
    let op = &cc.ops[i];
    if op.has_flag(FLAG_DIRECT_IO | FLAG_NO_INVALIDATE) {
        rec_store_direct_no_invalidate(cc, i, width);
    } else if op.has_flag(FLAG_DIRECT_IO) {
        rec_store_direct(cc, i, width);
    } else {
        rec_io(cc, i, true, false);
    }
}

fn rec_load_direct(cc: &mut Compiler<'_>, i: usize, width: Width, signed: bool) {
    let raw = cc.ops[i].raw;
    let layout = cc.layout;

    if raw.rt() == 0 {
        return;
    }

    let rs = cc.regs.reserve_in(&mut cc.b, raw.rs());
    let rt = cc.regs.reserve_out(&mut cc.b, raw.rt());

    let (addr_reg, rs_live) = if raw.imm16() != 0 {
        cc.b.addi(rt, rs, raw.simm16());
        if raw.rs() != raw.rt() {
            cc.regs.free(rs);
        }
        (rt, raw.rs() == raw.rt())
    } else {
        (rs, true)
    };

    let tmp = cc.regs.alloc_temp(&mut cc.b);

    if layout.offset_ram == layout.offset_bios && layout.offset_ram == layout.offset_scratch {
        // Single shared base: collapse the region split to one mask.
        if layout.mirrors_mapped {
            cc.b.andi(rt, addr_reg, 0x1fff_ffff);
        } else {
            // Keep bit 22 when bit 28 is set so the BIOS escapes the
            // mirror folding, then apply the folded mask.
            cc.b.andi(tmp, addr_reg, BIT_IO as u32);
            cc.b.srli(tmp, tmp, 6);
            cc.b.ori(tmp, tmp, KUNSEG_MIRROR_MASK);
            cc.b.and(rt, addr_reg, tmp);
        }
        cc.b.movi(tmp, layout.offset_ram);
    } else {
        let not_ram = cc.b.branch(Cond::MaskSet, addr_reg, Rhs::Imm(BIT_IO));

        cc.b.andi(rt, addr_reg, 0x001f_ffff);
        cc.b.movi(tmp, layout.offset_ram);
        let done = cc.b.jmp();

        cc.b.patch(not_ram);
        let split_bios = layout.offset_bios != layout.offset_scratch;
        let not_bios = if split_bios {
            Some(cc.b.branch(Cond::MaskClear, addr_reg, Rhs::Imm(BIT_BIOS)))
        } else {
            None
        };

        cc.b.andi(rt, addr_reg, 0x1fc7_ffff);
        cc.b.movi(tmp, layout.offset_bios);

        if let Some(not_bios) = not_bios {
            let done2 = cc.b.jmp();
            cc.b.patch(not_bios);
            cc.b.andi(rt, addr_reg, 0x1f80_0fff);
            cc.b.movi(tmp, layout.offset_scratch);
            cc.b.patch(done2);
        }

        cc.b.patch(done);
    }

    cc.b.add64(rt, rt, tmp);
    cc.b.load_mem(rt, rt, width, signed);

    if rs_live && addr_reg != rt {
        cc.regs.free(rs);
    }
    cc.regs.free(rt);
    cc.regs.free(tmp);
}

fn rec_load(cc: &mut Compiler<'_>, i: usize, width: Width, signed: bool) {
    if cc.ops[i].has_flag(FLAG_DIRECT_IO) {
        rec_load_direct(cc, i, width, signed);
    } else {
        rec_io(cc, i, false, true);
    }
}

/// Calls a thunk that takes only the raw opcode word as input.
fn emit_thunk_call(cc: &mut Compiler<'_>, raw: u32, handle: StateField) {
    let tmp = cc.regs.alloc_temp(&mut cc.b);
    let tmp2 = cc.regs.alloc_temp(&mut cc.b);
    cc.b.ld_state(tmp2, handle);
    cc.b.movi(tmp, raw.into());
    cc.b.st_state(StateField::OpDataOp, tmp);
    cc.regs.storeback_all(&mut cc.b);
    cc.b.call_handle(tmp2);
    cc.regs.free(tmp);
    cc.regs.free(tmp2);
    cc.regs.mark_live_after_call(&mut cc.b);
}

fn rec_mfc(cc: &mut Compiler<'_>, i: usize) {
    let raw = cc.ops[i].raw;
    emit_thunk_call(cc, raw, StateField::MfcHandle);

    let rt = cc.regs.reserve_out(&mut cc.b, raw.rt());
    cc.b.ld_state(rt, StateField::OpDataData);
    cc.regs.free(rt);
}

fn rec_mtc(cc: &mut Compiler<'_>, i: usize, pc: u32) {
    let raw = cc.ops[i].raw;

    let tmp = cc.regs.alloc_temp(&mut cc.b);
    let tmp2 = cc.regs.alloc_temp(&mut cc.b);
    let rt = cc.regs.reserve_in(&mut cc.b, raw.rt());

    cc.b.ld_state(tmp2, StateField::MtcHandle);
    cc.b.movi(tmp, raw.into());
    cc.b.st_state(StateField::OpDataOp, tmp);
    cc.b.st_state(StateField::OpDataData, rt);
    cc.regs.free(rt);

    cc.regs.storeback_all(&mut cc.b);
    cc.b.call_handle(tmp2);
    cc.regs.free(tmp);
    cc.regs.free(tmp2);
    cc.regs.mark_live_after_call(&mut cc.b);

    // Writes to the CP0 status or cause register can unmask an interrupt;
    // end the block so the outer loop re-checks its exit conditions.
    if raw.primary() == opcodes::OP_CP0
        && matches!(u32::from(raw.rd()), CP0_STATUS | CP0_CAUSE)
    {
        emit_end_of_block(cc, pc, None, pc.wrapping_add(4), 0, 0, None);
    }
}

fn rec_rfe(cc: &mut Compiler<'_>, _i: usize) {
    let tmp = cc.regs.alloc_temp(&mut cc.b);
    cc.b.ld_state(tmp, StateField::RfeHandle);
    cc.regs.storeback_all(&mut cc.b);
    cc.b.call_handle(tmp);
    cc.regs.free(tmp);
    cc.regs.mark_live_after_call(&mut cc.b);
}

fn rec_cp(cc: &mut Compiler<'_>, i: usize) {
    let raw = cc.ops[i].raw;
    emit_thunk_call(cc, raw, StateField::CpHandle);
}

fn rec_break_syscall(cc: &mut Compiler<'_>, pc: u32, handle: StateField) {
    let tmp = cc.regs.alloc_temp(&mut cc.b);
    cc.b.ld_state(tmp, handle);
    cc.regs.storeback_all(&mut cc.b);
    cc.b.call_handle(tmp);
    cc.regs.free(tmp);
    cc.regs.mark_live_after_call(&mut cc.b);

    emit_end_of_block(cc, pc, None, pc, REG_RA, 0, None);
}

fn rec_meta_unload(cc: &mut Compiler<'_>, i: usize) {
    let guest = cc.ops[i].raw.rs();
    debug!("unloading reg {}", crate::isa::abi::reg_name(guest));
    cc.regs.unload_guest(&mut cc.b, guest);
}

fn unknown_opcode(raw: u32, pc: u32) {
    warn!("unknown opcode: {raw:#010x} at PC {pc:#010x}");
}

fn rec_special(cc: &mut Compiler<'_>, i: usize, pc: u32) {
    let op = &cc.ops[i];
    let raw = op.raw;
    match raw.funct() {
        special::SLL => rec_alu_shift_imm(cc, op, |b, rd, rt, sh| b.slli(rd, rt, sh)),
        special::SRL => rec_alu_shift_imm(cc, op, |b, rd, rt, sh| b.srli(rd, rt, sh)),
        special::SRA => rec_alu_shift_imm(cc, op, |b, rd, rt, sh| b.srai(rd, rt, sh)),
        special::SLLV => rec_alu_shiftv(cc, op, |b, rd, rt, sh| b.sll(rd, rt, sh)),
        special::SRLV => rec_alu_shiftv(cc, op, |b, rd, rt, sh| b.srl(rd, rt, sh)),
        special::SRAV => rec_alu_shiftv(cc, op, |b, rd, rt, sh| b.sra(rd, rt, sh)),
        special::JR => rec_jr(cc, i, pc, REG_RA, 0),
        special::JALR => rec_jr(cc, i, pc, raw.rd(), pc.wrapping_add(8)),
        special::SYSCALL => rec_break_syscall(cc, pc, StateField::SyscallHandle),
        special::BREAK => rec_break_syscall(cc, pc, StateField::BreakHandle),
        special::MFHI => rec_mv_lo_hi(cc, raw.rd(), REG_HI),
        special::MTHI => rec_mv_lo_hi(cc, REG_HI, raw.rs()),
        special::MFLO => rec_mv_lo_hi(cc, raw.rd(), REG_LO),
        special::MTLO => rec_mv_lo_hi(cc, REG_LO, raw.rs()),
        special::MULT => rec_alu_mult(cc, op, true),
        special::MULTU => rec_alu_mult(cc, op, false),
        special::DIV => rec_alu_div(cc, op, true),
        special::DIVU => rec_alu_div(cc, op, false),
        // The trapping ADD/SUB forms do not emit the overflow exception.
        special::ADD | special::ADDU => rec_alu_reg(cc, op, |b, rd, rs, rt| b.add(rd, rs, rt)),
        special::SUB | special::SUBU => rec_alu_reg(cc, op, |b, rd, rs, rt| b.sub(rd, rs, rt)),
        special::AND => rec_alu_reg(cc, op, |b, rd, rs, rt| b.and(rd, rs, rt)),
        special::OR => rec_alu_reg(cc, op, |b, rd, rs, rt| b.or(rd, rs, rt)),
        special::XOR => rec_alu_reg(cc, op, |b, rd, rs, rt| b.xor(rd, rs, rt)),
        special::NOR => rec_alu_reg(cc, op, |b, rd, rs, rt| {
            b.or(rd, rs, rt);
            b.not(rd, rd);
        }),
        special::SLT => rec_alu_reg(cc, op, |b, rd, rs, rt| b.slt(rd, rs, rt)),
        special::SLTU => rec_alu_reg(cc, op, |b, rd, rs, rt| b.sltu(rd, rs, rt)),
        _ => unknown_opcode(raw, pc),
    }
}

fn rec_regimm(cc: &mut Compiler<'_>, i: usize, pc: u32) {
    let raw = cc.ops[i].raw;
    match u32::from(raw.rt()) {
        regimm::BLTZ => rec_b(cc, i, pc, Cond::GeS, 0, false, true),
        regimm::BGEZ => rec_b(cc, i, pc, Cond::LtS, 0, raw.rs() == 0, true),
        regimm::BLTZAL => rec_b(cc, i, pc, Cond::GeS, pc.wrapping_add(8), false, true),
        regimm::BGEZAL => {
            rec_b(cc, i, pc, Cond::LtS, pc.wrapping_add(8), raw.rs() == 0, true);
        }
        _ => unknown_opcode(raw, pc),
    }
}

fn rec_cp0(cc: &mut Compiler<'_>, i: usize, pc: u32) {
    match u32::from(cc.ops[i].raw.rs()) {
        cop::MFC | cop::CFC => rec_mfc(cc, i),
        cop::MTC | cop::CTC => rec_mtc(cc, i, pc),
        cop::RFE => rec_rfe(cc, i),
        _ => rec_cp(cc, i),
    }
}

fn rec_cp2(cc: &mut Compiler<'_>, i: usize, pc: u32) {
    match u32::from(cc.ops[i].raw.rs()) {
        cop::MFC | cop::CFC => rec_mfc(cc, i),
        cop::MTC | cop::CTC => rec_mtc(cc, i, pc),
        _ => rec_cp(cc, i),
    }
}

/// Lowers the opcode at index `i`, whose guest address is `pc`.
///
/// Returns true when the opcode consumed its delay slot, telling the
/// compile loop to skip the next list entry.
pub fn rec_opcode(cc: &mut Compiler<'_>, i: usize, pc: u32) -> bool {
    let op = &cc.ops[i];
    let raw = op.raw;

    match raw.primary() {
        opcodes::OP_SPECIAL => rec_special(cc, i, pc),
        opcodes::OP_REGIMM => rec_regimm(cc, i, pc),
        opcodes::OP_J => rec_j(cc, i, pc, 0),
        opcodes::OP_JAL => rec_j(cc, i, pc, pc.wrapping_add(8)),
        opcodes::OP_BEQ => {
            rec_b(cc, i, pc, Cond::Ne, 0, raw.rs() == raw.rt(), false);
        }
        opcodes::OP_BNE => rec_b(cc, i, pc, Cond::Eq, 0, false, false),
        opcodes::OP_BLEZ => rec_b(cc, i, pc, Cond::GtS, 0, raw.rs() == 0, true),
        opcodes::OP_BGTZ => rec_b(cc, i, pc, Cond::LeS, 0, false, true),
        opcodes::OP_META_BEQZ => rec_b(cc, i, pc, Cond::Ne, 0, false, true),
        opcodes::OP_META_BNEZ => rec_b(cc, i, pc, Cond::Eq, 0, false, true),
        opcodes::OP_ADDI | opcodes::OP_ADDIU => {
            let imm = raw.simm16();
            rec_alu_imm(cc, op, |b, rt, rs| b.addi(rt, rs, imm));
        }
        opcodes::OP_SLTI => {
            let imm = raw.simm16();
            rec_alu_imm(cc, op, |b, rt, rs| b.slti(rt, rs, imm));
        }
        opcodes::OP_SLTIU => {
            let imm = raw.simm16() as u32;
            rec_alu_imm(cc, op, |b, rt, rs| b.sltiu(rt, rs, imm));
        }
        opcodes::OP_ANDI => {
            // Guest code uses ANDI 0xff / 0xffff as byte and halfword
            // casts; emit the extension forms directly.
            let imm = raw.imm16();
            rec_alu_imm(cc, op, |b, rt, rs| match imm {
                0xff => b.ext8u(rt, rs),
                0xffff => b.ext16u(rt, rs),
                _ => b.andi(rt, rs, imm),
            });
        }
        opcodes::OP_ORI => {
            let imm = raw.imm16();
            rec_alu_imm(cc, op, |b, rt, rs| b.ori(rt, rs, imm));
        }
        opcodes::OP_XORI => {
            let imm = raw.imm16();
            rec_alu_imm(cc, op, |b, rt, rs| b.xori(rt, rs, imm));
        }
        opcodes::OP_LUI => {
            let rt = cc.regs.reserve_out(&mut cc.b, raw.rt());
            cc.b.movi(rt, u64::from(raw.imm16() << 16));
            cc.regs.free(rt);
        }
        opcodes::OP_CP0 => rec_cp0(cc, i, pc),
        opcodes::OP_CP2 => rec_cp2(cc, i, pc),
        opcodes::OP_LB => rec_load(cc, i, Width::Byte, true),
        opcodes::OP_LBU => rec_load(cc, i, Width::Byte, false),
        opcodes::OP_LH => rec_load(cc, i, Width::Half, true),
        opcodes::OP_LHU => rec_load(cc, i, Width::Half, false),
        opcodes::OP_LW => rec_load(cc, i, Width::Word, false),
        opcodes::OP_LWL | opcodes::OP_LWR => rec_io(cc, i, true, true),
        opcodes::OP_SB => rec_store(cc, i, Width::Byte),
        opcodes::OP_SH => rec_store(cc, i, Width::Half),
        opcodes::OP_SW => rec_store(cc, i, Width::Word),
        opcodes::OP_SWL | opcodes::OP_SWR => rec_io(cc, i, true, false),
        opcodes::OP_LWC2 | opcodes::OP_SWC2 => rec_io(cc, i, false, false),
        opcodes::OP_META_REG_UNLOAD => rec_meta_unload(cc, i),
        _ => unknown_opcode(raw, pc),
    }

    has_delay_slot(raw) && !op.has_flag(FLAG_NO_DELAY_SLOT)
}
