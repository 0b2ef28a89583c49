mod display;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chip8_core::chip8::chip8::{Chip8Variant, PROGRAM_START};
use chip8_core::disasm::disasm;
use chip8_core::error::error::Chip8Error;
use chip8_core::vm::vm::{BackendKind, Chip8Vm};

use crate::display::display::DisplayWindow;

/// CHIP-8 virtual machine with a dynamic x86-64 recompiler.
#[derive(Parser, Debug)]
#[command(name = "chip8_recompiler")]
#[command(version, about)]
struct Args {
    /// ROM file to run
    rom: PathBuf,

    /// Execution back-end
    #[arg(short, long, default_value = "recompiler")]
    backend: BackendArg,

    /// CHIP-8 flavour to emulate
    #[arg(long, default_value = "chip8")]
    variant: VariantArg,

    /// Guest cycles per second
    #[arg(long, default_value_t = 500)]
    clock_speed: u32,

    /// Print the ROM's disassembly instead of running it
    #[arg(long)]
    disassemble: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Interpreter,
    Recompiler,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    Chip8,
    TwoPages,
    SuperChip,
    XoChip,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let kind = match args.backend {
        BackendArg::Interpreter => BackendKind::Interpreter,
        BackendArg::Recompiler => BackendKind::Recompiler,
    };
    let variant = match args.variant {
        VariantArg::Chip8 => Chip8Variant::Chip8,
        VariantArg::TwoPages => Chip8Variant::TwoPages,
        VariantArg::SuperChip => Chip8Variant::SuperChip,
        VariantArg::XoChip => Chip8Variant::XoChip,
    };

    let rom = fs::read(&args.rom)
        .with_context(|| format!("reading ROM {}", args.rom.display()))?;

    let mut vm = Chip8Vm::new(kind, variant, args.clock_speed);
    vm.load_rom_bytes(&rom)
        .with_context(|| format!("loading ROM {}", args.rom.display()))?;

    if args.disassemble {
        let end = PROGRAM_START.saturating_add(rom.len() as u16);
        disasm::disassemble_range(vm.state(), PROGRAM_START, end, &mut io::stdout())?;
        return Ok(());
    }

    info!(
        "running {} on the {:?} back-end at {} Hz",
        args.rom.display(),
        args.backend,
        args.clock_speed
    );

    let mut window = DisplayWindow::new(vm.state())?;
    let started = Instant::now();

    while window.is_open() {
        window.poll_keys(vm.state_mut());

        match vm.run(started.elapsed().as_millis() as u64) {
            Ok(()) => {}
            Err(Chip8Error::Exit) => break,
            Err(error) => return Err(error).context("guest execution failed"),
        }

        if vm.state().display_dirty {
            window.present(vm.state_mut())?;
        }

        thread::sleep(Duration::from_millis(1));
    }

    Ok(())
}
