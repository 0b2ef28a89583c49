#![cfg(target_arch = "x86_64")]

use chip8_core::chip8::chip8::{Chip8, Chip8Variant};
use chip8_core::error::error::Chip8Error;
use chip8_core::vm::vm::{BackendKind, Chip8Vm};

fn new_vm(kind: BackendKind, rom: &[u16]) -> Chip8Vm {
    let mut vm = Chip8Vm::new(kind, Chip8Variant::Chip8, 500);
    let bytes: Vec<u8> = rom.iter().flat_map(|w| w.to_be_bytes()).collect();
    vm.load_rom_bytes(&bytes).unwrap();
    vm
}

fn assert_same_guest_state(a: &Chip8, b: &Chip8) {
    assert_eq!(a.V, b.V, "registers diverged");
    assert_eq!(a.I, b.I, "I diverged");
    assert_eq!(a.PC, b.PC, "PC diverged");
    assert_eq!(a.SP, b.SP, "SP diverged");
    assert_eq!(a.DT, b.DT, "DT diverged");
    assert_eq!(a.ST, b.ST, "ST diverged");
    assert_eq!(
        a.cycles_since_started, b.cycles_since_started,
        "cycle counts diverged"
    );
}

/// Run the same ROM on both back-ends until both have retired at least
/// `cycles` guest cycles, then compare the guest states. Equivalence is
/// only required at block boundaries, which is where the recompiler stops
/// anyway.
fn assert_backends_agree(rom: &[u16], cycles: u32) {
    let mut interpreted = new_vm(BackendKind::Interpreter, rom);
    let mut recompiled = new_vm(BackendKind::Recompiler, rom);

    while recompiled.state().cycles_since_started < cycles {
        recompiled.step().unwrap();
    }
    while interpreted.state().cycles_since_started < recompiled.state().cycles_since_started {
        interpreted.step().unwrap();
    }

    assert_same_guest_state(interpreted.state(), recompiled.state());
}

#[test]
fn block_with_taken_skip_lands_past_it() {
    // SE V2, 0x10 with V2 = 0x10: the ADD is skipped, the JMP runs.
    let mut vm = new_vm(BackendKind::Recompiler, &[0x3210, 0x7210, 0x1208]);
    vm.state_mut().V[2] = 0x10;

    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x208);
    assert_eq!(vm.state().V[2], 0x10); // the skipped ADD never ran
    assert_eq!(vm.state().cycles_since_started, 2);
}

#[test]
fn block_with_untaken_skip_falls_through() {
    let mut vm = new_vm(BackendKind::Recompiler, &[0x3210, 0x7210, 0x1208]);
    vm.state_mut().V[2] = 0x11;

    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x208);
    assert_eq!(vm.state().V[2], 0x21); // the ADD ran this time
    assert_eq!(vm.state().cycles_since_started, 3);
}

#[test]
fn skip_cycle_accounting_matches_the_interpreter() {
    let rom = [0x3210, 0x7210, 0x1208];

    for v2 in [0x10, 0x11] {
        let mut interpreted = new_vm(BackendKind::Interpreter, &rom);
        let mut recompiled = new_vm(BackendKind::Recompiler, &rom);
        interpreted.state_mut().V[2] = v2;
        recompiled.state_mut().V[2] = v2;

        recompiled.step().unwrap();
        while interpreted.state().cycles_since_started < recompiled.state().cycles_since_started {
            interpreted.step().unwrap();
        }

        assert_same_guest_state(interpreted.state(), recompiled.state());
    }
}

#[test]
fn arithmetic_block_matches_the_interpreter() {
    // LD/ADD immediates, the whole 8xy_ ALU family, then a jump.
    let rom = [
        0x6A10, // LD Va, 0x10
        0x6BFF, // LD Vb, 0xff
        0x8AB4, // ADD Va, Vb (carry)
        0x6C0F, // LD Vc, 0x0f
        0x8CA1, // OR Vc, Va
        0x8CB2, // AND Vc, Vb
        0x8CA3, // XOR Vc, Va
        0x8AB5, // SUB Va, Vb
        0x8AB7, // SUBN Va, Vb
        0x8A06, // SHR Va
        0x8B0E, // SHL Vb
        0x7A01, // ADD Va, 0x01
        0x1218, // JMP onto itself
    ];

    assert_backends_agree(&rom, 13);
}

#[test]
fn memory_transfer_block_matches_the_interpreter() {
    let rom = [
        0xA300, // LD I, 0x300
        0x6001, // LD V0, 1
        0x6102, // LD V1, 2
        0x6203, // LD V2, 3
        0xF255, // LD [I], V0..V2
        0xA300, // LD I, 0x300
        0xF465, // LD V0..V4, [I]
        0xF11E, // ADD I, V1
        0x1210, // JMP onto itself
    ];

    assert_backends_agree(&rom, 9);

    let mut vm = new_vm(BackendKind::Recompiler, &rom);
    vm.step().unwrap();
    assert_eq!(&vm.state().memory[0x300..0x303], [1, 2, 3]);
    assert_eq!(vm.state().I, 0x305 + 2); // advanced by x+1 twice, then by V1
}

#[test]
fn timer_block_matches_the_interpreter() {
    let rom = [
        0x6A3C, // LD Va, 60
        0xFA15, // LD DT, Va
        0xFA18, // LD ST, Va
        0xFB07, // LD Vb, DT
        0x1208, // JMP onto itself
    ];

    assert_backends_agree(&rom, 5);
}

#[test]
fn call_and_ret_through_the_recompiler() {
    let mut vm = new_vm(BackendKind::Recompiler, &[0x2250]);
    vm.state_mut().memory[0x250] = 0x00; // RET
    vm.state_mut().memory[0x251] = 0xEE;

    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x250);
    assert_eq!(vm.state().SP, 1);
    assert_eq!(vm.state().stack[0], 0x200);

    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x202);
    assert_eq!(vm.state().SP, 0);
    assert_eq!(vm.state().cycles_since_started, 2);
}

#[test]
fn jp_v0_adds_the_register_to_a_wide_target() {
    // nnn with a non-zero high byte, so sloppy flag-register reuse would
    // corrupt the destination
    let mut vm = new_vm(BackendKind::Recompiler, &[0x6004, 0xB250]);

    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x254);
    assert_eq!(vm.state().cycles_since_started, 2);
}

#[test]
fn unsupported_opcode_falls_back_to_the_interpreter() {
    // CLS is left to the interpreter by the translator
    let mut vm = new_vm(BackendKind::Recompiler, &[0x00E0, 0x1202]);
    vm.state_mut().display[10] = true;

    vm.step().unwrap();
    assert!(!vm.state().display[10]);
    assert_eq!(vm.state().PC, 0x202);
    assert_eq!(vm.state().cycles_since_started, 1);
}

#[test]
fn mid_block_fallback_retries_the_offending_instruction() {
    // The block retires LD I and LD V2, then parks PC on the BCD store
    // and reports it unsupported; the interpreter retires it.
    let mut vm = new_vm(BackendKind::Recompiler, &[0xA300, 0x627F, 0xF233, 0x1200]);

    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x206);
    assert_eq!(vm.state().cycles_since_started, 3);
    assert_eq!(&vm.state().memory[0x300..0x303], [1, 2, 7]);
}

#[test]
fn invalid_opcode_surfaces_with_pc_parked_on_it() {
    let mut vm = new_vm(BackendKind::Recompiler, &[0x6201, 0x0000]);

    assert_eq!(vm.step(), Err(Chip8Error::OpcodeInvalid));
    assert_eq!(vm.state().PC, 0x202);
    assert_eq!(vm.state().V[2], 0x01); // work before the fault is kept
    assert_eq!(vm.state().cycles_since_started, 1);
}

#[test]
fn blocks_are_translated_once_and_reused() {
    let mut vm = new_vm(BackendKind::Recompiler, &[0x7201, 0x1200]);

    for round in 1..=50u32 {
        vm.step().unwrap();
        assert_eq!(vm.state().V[2], round as u8);
        assert_eq!(vm.state().cycles_since_started, round * 2);
        assert_eq!(vm.state().PC, 0x200);
    }
}

#[test]
fn keyboard_skip_goes_through_the_fallback() {
    let rom = [0x6205, 0xE29E, 0x1208, 0x1200];

    // key 5 up: the block retires LD and parks PC on the SKP, the
    // interpreter falls through onto the jump at 0x204
    let mut vm = new_vm(BackendKind::Recompiler, &rom);
    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x204);
    assert_eq!(vm.state().cycles_since_started, 2);

    // key 5 down: the interpreted SKP skips that jump
    let mut vm = new_vm(BackendKind::Recompiler, &rom);
    vm.state_mut().keyboard[5] = true;
    vm.step().unwrap();
    assert_eq!(vm.state().PC, 0x206);
    assert_eq!(vm.state().cycles_since_started, 2);
}

#[test]
fn two_page_clear_hires_goes_through_the_fallback() {
    let mut vm = Chip8Vm::new(BackendKind::Recompiler, Chip8Variant::TwoPages, 500);
    assert_eq!(vm.state().PC, 0x2C0);

    let state = vm.state_mut();
    state.memory[0x2C0] = 0x02; // clear hi-res
    state.memory[0x2C1] = 0x30;
    state.memory[0x2C2] = 0x12; // JMP 0x2C2
    state.memory[0x2C3] = 0xC2;
    state.display[100] = true;

    vm.step().unwrap();
    assert!(vm.state().display.iter().all(|&p| !p));
    assert!(vm.state().display_dirty);
    assert_eq!(vm.state().PC, 0x2C2);
    assert_eq!(vm.state().cycles_since_started, 1);
}

#[test]
fn chained_skips_stay_inside_one_block() {
    // Two skips in a row, both taken: the block must span all of it.
    let rom = [
        0x3005, // SE V0, 5   (taken)
        0x3106, // SE V1, 6   (skipped instruction is itself a skip)
        0x6201, // LD V2, 1
        0x1208, // JMP 0x208
    ];

    let mut interpreted = new_vm(BackendKind::Interpreter, &rom);
    let mut recompiled = new_vm(BackendKind::Recompiler, &rom);
    for vm in [&mut interpreted, &mut recompiled] {
        vm.state_mut().V[0] = 5;
        vm.state_mut().V[1] = 7;
    }

    recompiled.step().unwrap();
    while interpreted.state().cycles_since_started < recompiled.state().cycles_since_started {
        interpreted.step().unwrap();
    }

    assert_same_guest_state(interpreted.state(), recompiled.state());
    assert_eq!(recompiled.state().PC, 0x208);
}
