//! Dispatch core.
//!
//! Owns the block lifecycle (precompile, register, compile, retire) and the
//! generated plumbing around it: the outer dispatch stub that loops between
//! compiled blocks through the code LUT, and the runtime thunks that bridge
//! emitted code into the helper routines.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, error};

use crate::common::exit;
use crate::isa::disasm::{self, disassemble, is_terminated};
use crate::isa::instruction::{cycles_of_opcode, FLAG_SKIP_PC_UPDATE};
use crate::isa::opcodes::{self, cop};
use crate::isa::{InstructionBits, Opcode};
use crate::interp;
use crate::mem::{access, find_map, kunseg, MapKind};
use crate::opt;
use crate::rec::block::{Block, BLOCK_NEVER_COMPILE};
use crate::rec::builder::{
    CodeBuilder, Cond, Helper, Rhs, StateField, NUM_HOST_REGS, REG_CYCLE, T0, T1, T2, V0,
};
use crate::rec::emitter::{self, Compiler, Layout};
use crate::rec::machine::{self, make_handle};
use crate::State;

/// Emits every generated code object at init: the five coprocessor/memory
/// thunks, the exception thunks, and the outer dispatch stub.
pub(crate) fn generate_wrappers(state: &mut State) {
    state.rw_handle = generate_wrapper(state, "rw wrapper", Helper::Rw);
    state.mfc_handle = generate_wrapper(state, "mfc wrapper", Helper::Mfc);
    state.mtc_handle = generate_wrapper(state, "mtc wrapper", Helper::Mtc);
    state.rfe_handle = generate_wrapper(state, "rfe wrapper", Helper::Rfe);
    state.cp_handle = generate_wrapper(state, "cp wrapper", Helper::Cp);
    state.syscall_handle = generate_wrapper(state, "syscall wrapper", Helper::Syscall);
    state.break_handle = generate_wrapper(state, "break wrapper", Helper::Break);

    let (wrapper, eob) = generate_wrapper_block(state);
    state.wrapper = wrapper;
    state.eob_handle = eob;
}

/// Emits a thunk: save the scratch registers, call the helper, restore.
fn generate_wrapper(state: &mut State, name: &'static str, helper: Helper) -> u64 {
    let mut b = CodeBuilder::new(name);
    for t in [T0, T1, T2] {
        b.push(t);
    }
    b.call_helper(helper);
    for t in [T2, T1, T0] {
        b.pop(t);
    }
    b.ret();

    let slot = state.registry.insert(Rc::new(b.finish()));
    make_handle(slot, 0)
}

/// Emits the outer dispatch stub.
///
/// Entry expects the first block handle in `T0`. Each loop iteration tops
/// the cycle-budget register up to `target - current` and tail-jumps into
/// the block; blocks come back at the end-of-block entry with their cycle
/// cost already subtracted. Returns `(entry, eob-entry)` handles.
fn generate_wrapper_block(state: &mut State) -> (u64, u64) {
    let ram_len = state.ram_len;
    let mut b = CodeBuilder::new("wrapper");

    let loop_top = b.label();
    b.ld_state(T1, StateField::TargetCycle);
    b.ld_state(T2, StateField::CurrentCycle);
    b.sub(REG_CYCLE, T1, T2);
    b.jump_handle(T0);

    // Blocks jump back here; bank the cycles they consumed.
    let eob = b.here();
    b.ld_state(T1, StateField::TargetCycle);
    b.sub(T2, T1, REG_CYCLE);
    b.st_state(StateField::CurrentCycle, T2);

    b.ld_state(T0, StateField::ExitFlags);
    let to_end_flags = b.branch(Cond::Ne, T0, Rhs::Imm(0));
    let to_end_cycles = b.branch(Cond::GeU, T2, Rhs::Reg(T1));

    // Fast path: unsegment the next PC against the RAM window and index
    // the code LUT. Anything outside RAM overflows the mask test.
    b.andi(T0, V0, 0x1000_0000 | (ram_len - 1));
    let to_c = b.branch(Cond::GeU, T0, Rhs::Imm(i64::from(ram_len)));
    b.lut_lookup(T0, T0);
    b.branch_to(Cond::Ne, T0, Rhs::Imm(0), loop_top);

    // Slow path: look up or compile the block for the PC in V0.
    b.patch(to_c);
    b.call_helper(Helper::NextBlock);
    b.branch_to(Cond::Ne, T0, Rhs::Imm(0), loop_top);
    let to_exit = b.jmp();

    // Exit: publish the next PC and leave the virtual host. The slow path
    // skips the store because it already banked the PC it stopped at.
    b.patch(to_end_flags);
    b.patch(to_end_cycles);
    b.st_state(StateField::NextPc, V0);
    b.patch(to_exit);
    b.ret();

    let slot = state.registry.insert(Rc::new(b.finish()));
    (make_handle(slot, 0), make_handle(slot, eob))
}

/// Runs a helper routine against the state; invoked by the virtual host.
pub(crate) fn call_helper(
    state: &mut State,
    helper: Helper,
    regs: &mut [u64; NUM_HOST_REGS],
) {
    match helper {
        Helper::Rw => rw_cb(state),
        Helper::Mfc => {
            let raw = state.op_data.op;
            state.op_data.data = mfc(state, raw);
        }
        Helper::Mtc => {
            let raw = state.op_data.op;
            let data = state.op_data.data;
            mtc(state, raw, data);
        }
        Helper::Rfe => rfe(state),
        Helper::Cp => {
            let raw = state.op_data.op;
            cp_op(state, raw);
        }
        Helper::Syscall => state.set_exit_flags(exit::SYSCALL),
        Helper::Break => state.set_exit_flags(exit::BREAK),
        Helper::NextBlock => {
            let pc = regs[V0 as usize] as u32;
            regs[T0 as usize] = get_next_block_func(state, pc);
        }
    }
}

/// Load/store slow path behind the rw thunk.
///
/// Emitted code marshals the opcode identity (issuing block and list
/// index) so the helper can promote the real opcode's flags. A block that
/// left the cache in the meantime is served with a transient opcode; only
/// the promotion is lost.
fn rw_cb(state: &mut State) {
    let od = state.op_data;

    let live = state.block_cache.lookup(od.block).filter(|block| {
        block
            .ops
            .get(od.index as usize)
            .is_some_and(|op| op.raw == od.op)
    });

    let value = match live {
        Some(block) => {
            let op = &block.ops[od.index as usize];
            access::rw(state, op, od.addr, od.data)
        }
        None => {
            let op = Opcode::new(od.op);
            access::rw(state, &op, od.addr, od.data)
        }
    };
    state.op_data.data = value;
}

/// MFC/CFC: route a coprocessor data or control read to the callbacks.
pub(crate) fn mfc(state: &mut State, raw: u32) -> u32 {
    let ops = if raw.primary() == opcodes::OP_CP0 {
        state.cop0.clone()
    } else {
        state.cop2.clone()
    };

    if u32::from(raw.rs()) == cop::CFC {
        ops.cfc(state, raw.rd())
    } else {
        ops.mfc(state, raw.rd())
    }
}

/// MTC/CTC: route a coprocessor data or control write to the callbacks.
pub(crate) fn mtc(state: &mut State, raw: u32, data: u32) {
    let ops = if raw.primary() == opcodes::OP_CP0 {
        state.cop0.clone()
    } else {
        state.cop2.clone()
    };

    if u32::from(raw.rs()) == cop::CTC {
        ops.ctc(state, raw.rd(), data);
    } else {
        ops.mtc(state, raw.rd(), data);
    }
}

/// RFE: pop the CP0 status mode-bit stack.
pub(crate) fn rfe(state: &mut State) {
    let cop0 = state.cop0.clone();
    let status = cop0.mfc(state, 12);
    let status = ((status & 0x3c) >> 2) | (status & !0xf);
    cop0.ctc(state, 12, status);
}

/// Generic coprocessor operation.
pub(crate) fn cp_op(state: &mut State, raw: u32) {
    let ops = if raw.primary() == opcodes::OP_CP2 {
        state.cop2.clone()
    } else {
        state.cop0.clone()
    };
    ops.op(state, raw);
}

/// Disassembles and optimizes the block entered at `pc`.
fn precompile_block(state: &mut State, pc: u32) -> Option<Block> {
    let kunseg_pc = kunseg(pc);
    let map_index = find_map(&state.maps, kunseg_pc)?;
    let offset = kunseg_pc - state.maps[map_index].pc;

    let mut root = map_index;
    while let Some(target) = state.maps[root].mirror_of {
        root = target;
    }

    let host = state.maps[root].address.wrapping_add(offset as usize) as *const u32;
    let avail_words = (state.maps[root].length.saturating_sub(offset) / 4) as usize;
    if avail_words == 0 {
        return None;
    }

    let scan_words = avail_words.min(state.config.max_block_words + 1);
    // SAFETY: `host` points `offset` bytes into the root map's storage,
    // which the MemoryMap invariant keeps readable; `scan_words` is capped
    // to the bytes remaining in the map.
    let code = unsafe { std::slice::from_raw_parts(host, scan_words) };

    let (mut list, length) = disassemble(code, state.config.max_block_words);
    if list.is_empty() {
        return None;
    }

    let hash = Block::hash_words(&code[..(length / 4) as usize]);
    let flags = if is_terminated(&list) {
        0
    } else {
        BLOCK_NEVER_COMPILE
    };

    opt::optimize(&mut list);

    if state.config.trace_blocks {
        debug!("disassembled block at PC {pc:#010x}");
        disasm::print_disassembly(&list, pc);
    }
    state.stats.blocks_precompiled += 1;

    Some(Block {
        pc,
        kunseg_pc: state.maps[root].pc + offset,
        map: root,
        code: host,
        length,
        hash,
        ops: list,
        function: Cell::new(0),
        cycles: Cell::new(0),
        flags: Cell::new(flags),
    })
}

/// Retires a block: unregister, clear its LUT slot, drop its code.
fn drop_block(state: &mut State, pc: u32) {
    let Some(block) = state.block_cache.unregister(pc) else {
        return;
    };
    let handle = block.function.get();
    if handle == 0 {
        return;
    }

    if block.map == MapKind::KernelUserRam as usize {
        let index = ((block.kunseg_pc & (state.ram_len - 1)) >> 2) as usize;
        if let Some(slot) = state.code_lut.get_mut(index) {
            if *slot == handle {
                *slot = 0;
            }
        }
    }

    let (slot, _) = machine::handle_parts(handle);
    state.registry.remove(slot);
}

/// Returns the current block for `pc`, precompiling (and retiring an
/// outdated predecessor) as needed. `None` flags a segfault.
pub(crate) fn get_block(state: &mut State, pc: u32) -> Option<Rc<Block>> {
    let mut block = state.block_cache.lookup(pc);

    if let Some(found) = &block {
        if found.is_outdated() {
            debug!("block at PC {:#010x} is outdated", found.pc);
            state.stats.blocks_outdated += 1;
            drop_block(state, pc);
            block = None;
        }
    }

    if block.is_none() {
        match precompile_block(state, pc) {
            Some(fresh) => {
                let fresh = Rc::new(fresh);
                state.block_cache.register(Rc::clone(&fresh));
                block = Some(fresh);
            }
            None => {
                error!("unable to recompile block at PC {pc:#010x}");
                state.set_exit_flags(exit::SEGFAULT);
                return None;
            }
        }
    }

    block
}

/// Emits host code for a precompiled block and publishes it in the LUT.
pub(crate) fn compile_block(state: &mut State, block: &Block) {
    let layout = Layout {
        offset_ram: state.offset_ram,
        offset_bios: state.offset_bios,
        offset_scratch: state.offset_scratch,
        mirrors_mapped: state.mirrors_mapped,
    };

    let mut cc = Compiler::new(&block.ops, block.pc, layout);
    let mut pc = block.pc;
    let mut cycles = 0u32;
    let mut skip_next = false;

    for i in 0..block.ops.len() {
        let op = &block.ops[i];
        cc.cycles += cycles_of_opcode(op);
        cycles += cycles_of_opcode(op);

        if skip_next {
            skip_next = false;
        } else if !op.is_nop() {
            skip_next = emitter::rec_opcode(&mut cc, i, pc);
        }

        if !op.has_flag(FLAG_SKIP_PC_UPDATE) {
            pc = pc.wrapping_add(4);
        }
    }

    // The not-taken side of a block-ending conditional branch falls
    // through to here; give it an epilogue continuing past the block.
    if !cc.ended || !cc.branches.is_empty() {
        emitter::emit_fallthrough(&mut cc, pc);
    }
    cc.b.ret();

    block.cycles.set(cycles);

    let slot = state.registry.insert(Rc::new(cc.b.finish()));
    let handle = make_handle(slot, 0);
    block.function.set(handle);

    if block.map == MapKind::KernelUserRam as usize {
        let index = ((block.kunseg_pc & (state.ram_len - 1)) >> 2) as usize;
        if let Some(lut_slot) = state.code_lut.get_mut(index) {
            *lut_slot = handle;
        }
    }
    state.stats.blocks_compiled += 1;
}

/// Slow-path block resolution driving the dispatch loop.
///
/// Returns the handle of the next compiled block, or 0 after writing
/// `next_pc` when execution must return to the caller (exit flag raised,
/// cycle budget exhausted, or unmapped PC).
pub(crate) fn get_next_block_func(state: &mut State, mut pc: u32) -> u64 {
    loop {
        let Some(block) = get_block(state, pc) else {
            state.next_pc = pc;
            return 0;
        };

        let function = block.function.get();
        if function != 0 {
            return function;
        }

        let never_compile = block.flags.get() & BLOCK_NEVER_COMPILE != 0;

        // Block not yet compiled: run it through the interpreter once,
        // profiling its loads and stores for the compile below.
        if state.config.first_pass || never_compile {
            pc = interp::run_block(state, &block);
        }

        if !never_compile {
            compile_block(state, &block);
        }

        if state.exit_flags != exit::NORMAL || state.current_cycle >= state.target_cycle {
            state.next_pc = pc;
            return 0;
        }
    }
}
