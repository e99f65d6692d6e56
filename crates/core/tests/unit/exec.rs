//! End-to-end execution scenarios.
//!
//! Every program runs twice: the first pass goes through the interpreter
//! (profiling and compiling as it goes), the second through the compiled
//! blocks and the code LUT. Comparing both register files doubles as the
//! equivalence oracle between interpreter and emitted code.

use mipsrec_core::{exit, Config};
use pretty_assertions::assert_eq;

use crate::common::encode as enc;
use crate::common::harness::TestContext;

/// Guest slot of the LO register in a register dump.
const LO: usize = 32;
/// Guest slot of the HI register in a register dump.
const HI: usize = 33;

/// Runs `words` at `pc` twice with the same initial registers; asserts the
/// interpreted and compiled runs agree and returns the final dump plus the
/// PC execution stopped at.
fn run_twice(
    ctx: &mut TestContext,
    pc: u32,
    cycles: u32,
    init: &[(usize, u32)],
) -> ([u32; 34], u32) {
    let seed = |ctx: &mut TestContext| {
        ctx.state.restore_registers(&[0u32; 34]);
        for &(reg, value) in init {
            ctx.set_reg(reg, value);
        }
    };

    seed(ctx);
    let next_interp = ctx.run(pc, cycles);
    let interp = ctx.regs();

    seed(ctx);
    let next_compiled = ctx.run(pc, cycles);
    let compiled = ctx.regs();

    assert_eq!(interp, compiled, "interpreter and compiled code disagree");
    assert_eq!(next_interp, next_compiled);
    (compiled, next_compiled)
}

#[test]
fn lui_ori_sequence() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x1_0000,
        &[
            enc::lui(1, 0x1234),
            enc::ori(1, 1, 0x5678),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let before = ctx.state.current_cycle_count();
    let (regs, next) = run_twice(&mut ctx, 0x8001_0000, 4, &[(31, 0x8001_0020)]);

    assert_eq!(regs[1], 0x1234_5678);
    assert_eq!(next, 0x8001_0020);
    assert_eq!(ctx.state.current_cycle_count() - before, 8);

    // The compiled block is published in the code LUT at its word offset.
    assert_ne!(ctx.state.code_lut_entry(0x1_0000), 0);
    assert!(ctx.state.stats().blocks_compiled >= 1);
}

#[test]
fn addiu_sign_extends_and_zero_stays_zero() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x1_0000,
        &[enc::addiu(2, 0, -1), enc::jr(31), enc::nop()],
    );

    let (regs, _) = run_twice(&mut ctx, 0x1_0000, 3, &[(31, 0x9000)]);
    assert_eq!(regs[2], 0xffff_ffff);
    assert_eq!(regs[0], 0);
}

#[test]
fn store_invalidates_and_forces_recompile() {
    let mut ctx = TestContext::new();
    // Block B at 0: sets r5. Block S at 0x1000: stores r2 over B's first
    // word.
    ctx.write_ram(0, &[enc::addiu(5, 0, 1), enc::jr(31), enc::nop()]);
    ctx.write_ram(0x1000, &[enc::sw(2, 1, 0), enc::jr(31), enc::nop()]);
    ctx.set_reg(31, 0x4000);

    let _ = ctx.run(0, 3);
    assert_eq!(ctx.reg(5), 1);
    assert_ne!(ctx.state.code_lut_entry(0), 0);

    ctx.set_reg(1, 0);
    ctx.set_reg(2, enc::addiu(5, 0, 42));
    ctx.set_reg(31, 0x4000);
    let _ = ctx.run(0x1000, 3);

    assert_eq!(ctx.state.code_lut_entry(0), 0, "store must clear the LUT slot");
    assert_eq!(ctx.read_ram(0), enc::addiu(5, 0, 42));

    let outdated_before = ctx.state.stats().blocks_outdated;
    ctx.set_reg(31, 0x4000);
    let _ = ctx.run(0, 3);
    assert_eq!(ctx.reg(5), 42, "stale block must be recompiled");
    assert!(ctx.state.stats().blocks_outdated > outdated_before);
}

#[test]
fn direct_store_path_invalidates_too() {
    let mut ctx = TestContext::new();
    ctx.write_ram(0, &[enc::addiu(5, 0, 1), enc::jr(31), enc::nop()]);
    ctx.write_ram(0x1000, &[enc::sw(2, 1, 0), enc::jr(31), enc::nop()]);

    // Promote and compile the store block against a harmless target.
    ctx.set_reg(1, 0x3000);
    ctx.set_reg(31, 0x4000);
    let _ = ctx.run(0x1000, 3);
    let _ = ctx.run(0x1000, 3);

    // Compile block B, then hit it with the (now direct) store path.
    let _ = ctx.run(0, 3);
    assert_ne!(ctx.state.code_lut_entry(0), 0);

    ctx.set_reg(1, 0);
    ctx.set_reg(2, enc::addiu(5, 0, 7));
    let _ = ctx.run(0x1000, 3);
    assert_eq!(ctx.state.code_lut_entry(0), 0);
    assert_eq!(ctx.read_ram(0), enc::addiu(5, 0, 7));
}

#[test]
fn beq_taken_executes_delay_slot() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x2000,
        &[
            enc::beq(1, 1, 2),
            enc::addiu(3, 0, 7),
            enc::nop(),
            enc::addiu(4, 0, 9),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, next) = run_twice(&mut ctx, 0x2000, 5, &[(31, 0x3000)]);
    assert_eq!(regs[3], 7, "delay slot must execute on the taken path");
    assert_eq!(regs[4], 9, "branch must land on its target");
    assert_eq!(next, 0x3000);
}

#[test]
fn bne_not_taken_falls_through() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x2100,
        &[
            enc::bne(1, 2, 4),
            enc::addiu(3, 0, 7),
            enc::addiu(4, 0, 9),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, _) = run_twice(
        &mut ctx,
        0x2100,
        5,
        &[(1, 5), (2, 5), (31, 0x3000)],
    );
    assert_eq!(regs[3], 7, "delay slot must execute on the not-taken path");
    assert_eq!(regs[4], 9, "fall-through must continue past the branch");
}

#[test]
fn branch_on_zero_meta_forms() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x2200,
        &[
            enc::beq(7, 0, 2),
            enc::nop(),
            enc::addiu(3, 0, 1),
            enc::addiu(4, 0, 2),
            enc::jr(31),
            enc::nop(),
        ],
    );

    // r7 == 0: branch taken, skips the r3 write.
    let (regs, _) = run_twice(&mut ctx, 0x2200, 5, &[(31, 0x3000)]);
    assert_eq!(regs[3], 0);
    assert_eq!(regs[4], 2);

    // r7 != 0: falls through and executes both.
    let (regs, _) = run_twice(&mut ctx, 0x2200, 6, &[(7, 1), (31, 0x3000)]);
    assert_eq!(regs[3], 1);
    assert_eq!(regs[4], 2);
}

#[test]
fn bltzal_links_on_both_paths() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x5000,
        &[
            enc::bltzal(1, 2),
            enc::nop(),
            enc::addiu(3, 0, 5),
            enc::addiu(4, 0, 9),
            enc::jr(31),
            enc::nop(),
        ],
    );

    // Taken: r1 negative jumps to 0x500c.
    let (regs, _) = run_twice(&mut ctx, 0x5000, 5, &[(1, 0x8000_0000)]);
    assert_eq!(regs[31], 0x5008, "and-link writes the return address");
    assert_eq!(regs[4], 9);
    assert_eq!(regs[3], 0);

    // Not taken: falls through 0x5008, and still links.
    let (regs, _) = run_twice(&mut ctx, 0x5000, 6, &[(1, 5)]);
    assert_eq!(regs[31], 0x5008);
    assert_eq!(regs[3], 5);
    assert_eq!(regs[4], 9);
}

#[test]
fn jal_and_jalr_link() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x6000,
        &[enc::jal(0x6100), enc::nop()],
    );
    ctx.write_ram(0x6100, &[enc::jalr(2, 31), enc::nop()]);

    let (regs, next) = run_twice(&mut ctx, 0x6000, 4, &[]);
    assert_eq!(regs[31], 0x6008);
    assert_eq!(regs[2], 0x6108);
    assert_eq!(next, 0x6008, "jalr jumps through the linked register");
}

#[test]
fn div_by_zero_produces_architectural_result() {
    let mut ctx = TestContext::new();
    ctx.write_ram(0x7000, &[enc::div(1, 2), enc::jr(31), enc::nop()]);

    let (regs, _) = run_twice(
        &mut ctx,
        0x7000,
        3,
        &[(1, (-5i32) as u32), (31, 0x9000)],
    );
    assert_eq!(regs[LO], 1, "negative dividend yields LO = 1");
    assert_eq!(regs[HI], (-5i32) as u32);

    // Unsigned divide by zero.
    ctx.write_ram(0x7100, &[enc::divu(1, 2), enc::jr(31), enc::nop()]);
    let (regs, _) = run_twice(&mut ctx, 0x7100, 3, &[(1, 77), (31, 0x9000)]);
    assert_eq!(regs[LO], 0xffff_ffff);
    assert_eq!(regs[HI], 77);
}

#[test]
fn div_and_mult_results() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x7200,
        &[
            enc::div(1, 2),
            enc::mflo(3),
            enc::mfhi(4),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, _) = run_twice(
        &mut ctx,
        0x7200,
        5,
        &[(1, 7), (2, (-2i32) as u32), (31, 0x9000)],
    );
    assert_eq!(regs[3], (-3i32) as u32);
    assert_eq!(regs[4], 1);

    ctx.write_ram(
        0x7300,
        &[enc::multu(1, 2), enc::jr(31), enc::nop()],
    );
    let (regs, _) = run_twice(
        &mut ctx,
        0x7300,
        3,
        &[(1, 0xffff_ffff), (2, 2), (31, 0x9000)],
    );
    assert_eq!(regs[LO], 0xffff_fffe);
    assert_eq!(regs[HI], 1);

    ctx.write_ram(
        0x7400,
        &[enc::mult(1, 2), enc::jr(31), enc::nop()],
    );
    let (regs, _) = run_twice(
        &mut ctx,
        0x7400,
        3,
        &[(1, (-3i32) as u32), (2, 1000), (31, 0x9000)],
    );
    assert_eq!(regs[LO], (-3000i32) as u32);
    assert_eq!(regs[HI], 0xffff_ffff);
}

#[test]
fn cycle_budget_exit() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x4000,
        &[
            enc::nop(),
            enc::nop(),
            enc::nop(),
            enc::j(0x4000),
            enc::nop(),
        ],
    );

    let before = ctx.state.current_cycle_count();
    let next = ctx.run(0x4000, 2);
    assert_eq!(next, 0x4000);
    assert!(ctx.state.current_cycle_count() - before >= 2);
    assert_eq!(ctx.state.exit_flags(), exit::NORMAL);

    // Compiled pass exits the same way.
    let before = ctx.state.current_cycle_count();
    let next = ctx.run(0x4000, 2);
    assert_eq!(next, 0x4000);
    assert!(ctx.state.current_cycle_count() - before >= 2);
}

#[test]
fn alu_mix_matches_interpreter() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0x8000,
        &[
            enc::lui(1, 0x8000),
            enc::ori(2, 0, 0x00ff),
            enc::addu(3, 1, 2),
            enc::subu(4, 3, 2),
            enc::and(5, 3, 2),
            enc::or(6, 1, 2),
            enc::xor(7, 3, 6),
            enc::nor(8, 1, 2),
            enc::slt(9, 1, 2),
            enc::sltu(10, 1, 2),
            enc::sll(11, 2, 8),
            enc::srl(12, 1, 4),
            enc::sra(13, 1, 4),
            enc::sllv(14, 2, 2),
            enc::srav(15, 1, 2),
            enc::slti(16, 1, 0),
            enc::sltiu(17, 1, -1),
            enc::andi(18, 1, 0xffff),
            enc::xori(19, 2, 0x0f0f),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, _) = run_twice(&mut ctx, 0x8000, 21, &[(31, 0x9000)]);
    assert_eq!(regs[1], 0x8000_0000);
    assert_eq!(regs[3], 0x8000_00ff);
    assert_eq!(regs[4], 0x8000_0000);
    assert_eq!(regs[5], 0x0000_00ff & 0x8000_00ff);
    assert_eq!(regs[8], !(0x8000_0000u32 | 0xff));
    assert_eq!(regs[9], 1, "signed: 0x80000000 < 0xff");
    assert_eq!(regs[10], 0, "unsigned: 0x80000000 >= 0xff");
    assert_eq!(regs[11], 0xff << 8);
    assert_eq!(regs[12], 0x0800_0000);
    assert_eq!(regs[13], 0xf800_0000);
    assert_eq!(regs[16], 1);
    assert_eq!(regs[17], 1, "sltiu compares against sign-extended imm");
    assert_eq!(regs[18], 0x8000_0000 & 0xffff);
}

#[test]
fn loads_and_stores_round_trip() {
    let mut ctx = TestContext::new();
    ctx.write_ram(0x9100, &[0xcafe_babe, 0x8001_0080]);
    ctx.write_ram(
        0x9000,
        &[
            enc::lw(2, 1, 0x100),
            enc::lb(3, 1, 0x104),
            enc::lbu(4, 1, 0x104),
            enc::lh(5, 1, 0x106),
            enc::lhu(6, 1, 0x106),
            enc::sw(2, 1, 0x110),
            enc::sb(3, 1, 0x114),
            enc::sh(5, 1, 0x118),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, _) = run_twice(&mut ctx, 0x9000, 10, &[(1, 0x9000), (31, 0xa000)]);
    assert_eq!(regs[2], 0xcafe_babe);
    assert_eq!(regs[3], 0xffff_ff80, "lb sign-extends");
    assert_eq!(regs[4], 0x0000_0080, "lbu zero-extends");
    assert_eq!(regs[5], 0xffff_8001, "lh sign-extends");
    assert_eq!(regs[6], 0x0000_8001, "lhu zero-extends");

    assert_eq!(ctx.read_ram(0x9110), 0xcafe_babe);
    assert_eq!(ctx.read_ram(0x9114) & 0xff, 0x80);
    assert_eq!(ctx.read_ram(0x9118) & 0xffff, 0x8001);
}

#[test]
fn kseg1_scratch_pad_access() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xb000,
        &[
            enc::sw(2, 1, 0x10),
            enc::lw(3, 1, 0x10),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, _) = run_twice(
        &mut ctx,
        0xb000,
        4,
        &[(1, 0xbf80_0000), (2, 0x1357_9bdf), (31, 0x9000)],
    );
    assert_eq!(regs[3], 0x1357_9bdf);
}

#[test]
fn bios_loads_resolve_through_their_map() {
    let mut ctx = TestContext::new();
    ctx.write_bios(0, &[0x0bad_cafe]);
    ctx.write_ram(0xb100, &[enc::lw(2, 1, 0), enc::jr(31), enc::nop()]);

    let (regs, _) = run_twice(
        &mut ctx,
        0xb100,
        3,
        &[(1, 0xbfc0_0000), (31, 0x9000)],
    );
    assert_eq!(regs[2], 0x0bad_cafe);
}

#[test]
fn coprocessor_moves_round_trip() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xc000,
        &[
            enc::mtc0(1, 9),
            enc::mfc0(2, 9),
            enc::mtc2(1, 20),
            enc::mfc2(3, 20),
            enc::jr(31),
            enc::nop(),
        ],
    );

    let (regs, _) = run_twice(
        &mut ctx,
        0xc000,
        6,
        &[(1, 0xabcd_0123), (31, 0x9000)],
    );
    assert_eq!(regs[2], 0xabcd_0123);
    assert_eq!(regs[3], 0xabcd_0123);
    assert_eq!(ctx.cop0.regs.borrow()[9], 0xabcd_0123);
    assert_eq!(ctx.cop2.regs.borrow()[20], 0xabcd_0123);
}

#[test]
fn mtc0_status_ends_the_block() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xc100,
        &[
            enc::mtc0(1, 12),
            enc::addiu(3, 0, 7),
            enc::jr(31),
            enc::nop(),
        ],
    );
    ctx.set_reg(1, 0x55);
    ctx.set_reg(31, 0x9000);

    let next = ctx.run(0xc100, 1);
    assert_eq!(next, 0xc104, "status write must end the block");
    assert_eq!(ctx.reg(3), 0, "following ops run in the next block");
    assert_eq!(ctx.cop0.regs.borrow()[12], 0x55);

    // Compiled pass stops at the same boundary.
    ctx.set_reg(3, 0);
    let next = ctx.run(0xc100, 1);
    assert_eq!(next, 0xc104);
    assert_eq!(ctx.reg(3), 0);

    let next = ctx.run(0xc104, 3);
    assert_eq!(ctx.reg(3), 7);
    assert_eq!(next, 0x9000);
}

#[test]
fn rfe_rotates_the_status_stack() {
    let mut ctx = TestContext::new();
    ctx.write_ram(0xc200, &[enc::rfe(), enc::jr(31), enc::nop()]);
    ctx.set_reg(31, 0x9000);

    ctx.cop0.regs.borrow_mut()[12] = 0x36;
    let _ = ctx.run(0xc200, 3);
    assert_eq!(ctx.cop0.regs.borrow()[12], 0x3d);

    // Compiled pass performs the same rotation.
    ctx.cop0.regs.borrow_mut()[12] = 0x36;
    let _ = ctx.run(0xc200, 3);
    assert_eq!(ctx.cop0.regs.borrow()[12], 0x3d);
}

#[test]
fn generic_cop2_command_reaches_the_callback() {
    let mut ctx = TestContext::new();
    let cmd = enc::cop2_cmd(0x0012_3456);
    ctx.write_ram(0xc300, &[cmd, enc::jr(31), enc::nop()]);
    ctx.set_reg(31, 0x9000);

    let _ = ctx.run(0xc300, 3);
    let _ = ctx.run(0xc300, 3);
    assert_eq!(*ctx.cop2.ops_log.borrow(), vec![cmd, cmd]);
}

#[test]
fn cop2_word_transfers_bypass_the_gpr_file() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xc400,
        &[
            enc::swc2(7, 1, 0),
            enc::lwc2(3, 1, 4),
            enc::jr(31),
            enc::nop(),
        ],
    );
    ctx.write_ram(0xd004, &[0x1122_3344]);
    ctx.cop2.regs.borrow_mut()[7] = 0x5566_7788;

    let (regs, _) = run_twice(&mut ctx, 0xc400, 4, &[(1, 0xd000), (31, 0x9000)]);
    assert_eq!(ctx.read_ram(0xd000), 0x5566_7788);
    assert_eq!(ctx.cop2.regs.borrow()[3], 0x1122_3344);
    assert_eq!(regs[7], 0, "guest r7 must not be touched");
    assert_eq!(regs[3], 0, "guest r3 must not be touched");
}

#[test]
fn syscall_and_break_raise_exit_flags() {
    let mut ctx = TestContext::new();
    ctx.write_ram(0xd100, &[enc::syscall()]);
    ctx.write_ram(0xd200, &[enc::brk()]);

    let next = ctx.run(0xd100, 1);
    assert_eq!(next, 0xd100);
    assert_ne!(ctx.state.exit_flags() & exit::SYSCALL, 0);

    let next = ctx.run(0xd200, 1);
    assert_eq!(next, 0xd200);
    assert_ne!(ctx.state.exit_flags() & exit::BREAK, 0);

    // Compiled passes raise the same flags.
    let _ = ctx.run(0xd100, 1);
    assert_ne!(ctx.state.exit_flags() & exit::SYSCALL, 0);
    let _ = ctx.run(0xd200, 1);
    assert_ne!(ctx.state.exit_flags() & exit::BREAK, 0);
}

#[test]
fn unknown_opcode_is_skipped() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xd300,
        &[0xfc00_0000, enc::addiu(3, 0, 4), enc::jr(31), enc::nop()],
    );

    let (regs, _) = run_twice(&mut ctx, 0xd300, 4, &[(31, 0x9000)]);
    assert_eq!(regs[3], 4);
}

#[test]
fn compiled_without_first_pass() {
    let mut ctx = TestContext::with_config(Config {
        first_pass: false,
        ..Config::default()
    });
    ctx.write_ram(
        0xd400,
        &[
            enc::lui(1, 0xbead),
            enc::ori(1, 1, 0xf00d),
            enc::sw(1, 2, 0),
            enc::lw(3, 2, 0),
            enc::jr(31),
            enc::nop(),
        ],
    );
    ctx.set_reg(2, 0xd800);
    ctx.set_reg(31, 0x9000);

    let next = ctx.run(0xd400, 6);
    assert_eq!(ctx.reg(1), 0xbead_f00d);
    assert_eq!(ctx.reg(3), 0xbead_f00d);
    assert_eq!(ctx.read_ram(0xd800), 0xbead_f00d);
    assert_eq!(next, 0x9000);
    assert_eq!(ctx.state.stats().interpreted_ops, 0);
}

#[test]
fn register_dump_restore_round_trips() {
    let mut ctx = TestContext::new();
    let mut seed = [0u32; 34];
    for (i, slot) in seed.iter_mut().enumerate() {
        *slot = (i as u32).wrapping_mul(0x9e37_79b9);
    }
    seed[0] = 0;

    ctx.state.restore_registers(&seed);
    let mut dumped = [0u32; 34];
    ctx.state.dump_registers(&mut dumped);
    assert_eq!(dumped, seed);
}

#[test]
fn execute_one_runs_a_single_block() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xd500,
        &[enc::addiu(4, 4, 1), enc::j(0xd500), enc::nop()],
    );

    let next = ctx.state.execute_one(0xd500);
    assert_eq!(next, 0xd500);
    assert_eq!(ctx.reg(4), 1);

    let next = ctx.state.execute_one(0xd500);
    assert_eq!(next, 0xd500);
    assert_eq!(ctx.reg(4), 2);
}

#[test]
fn run_interpreter_executes_one_block() {
    let mut ctx = TestContext::new();
    ctx.write_ram(
        0xd600,
        &[enc::addiu(4, 0, 3), enc::jr(31), enc::nop()],
    );
    ctx.set_reg(31, 0x9000);

    let next = ctx.state.run_interpreter(0xd600);
    assert_eq!(next, 0x9000);
    assert_eq!(ctx.reg(4), 3);
    assert!(ctx.state.stats().interpreted_ops >= 3);
}

#[test]
fn invalidate_all_clears_every_publication() {
    let mut ctx = TestContext::new();
    ctx.write_ram(0xd700, &[enc::jr(31), enc::nop()]);
    ctx.set_reg(31, 0x9000);
    let _ = ctx.run(0xd700, 2);
    assert_ne!(ctx.state.code_lut_entry(0xd700), 0);

    ctx.state.invalidate_all();
    assert_eq!(ctx.state.code_lut_entry(0xd700), 0);
}
