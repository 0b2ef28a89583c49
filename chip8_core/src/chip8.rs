pub mod chip8 {
    use std::fs;
    use std::path::Path;

    use crate::error::error::Chip8Error;

    // CHIP-8 font sprites are 4x5 pixels, 5 bytes per glyph (0-F).
    // They live at the base of guest memory so Fx29 is just I = 5 * Vx.
    const CHIP8_SPRITES: [u8; 80] = [
        0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
        0x20, 0x60, 0x20, 0x20, 0x70, // 1
        0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
        0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
        0x90, 0x90, 0xF0, 0x10, 0x10, // 4
        0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
        0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
        0xF0, 0x10, 0x20, 0x40, 0x40, // 7
        0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
        0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
        0xF0, 0x90, 0xF0, 0x90, 0x90, // A
        0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
        0xF0, 0x80, 0x80, 0x80, 0xF0, // C
        0xE0, 0x90, 0x90, 0x90, 0xE0, // D
        0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
        0xF0, 0x80, 0xF0, 0x80, 0x80, // F
    ];

    /// Backing size of the guest memory array. Only the XO-CHIP variant can
    /// address all of it; the other variants address the first 4 KiB. The
    /// array is always full-sized so that field offsets inside [`Chip8`] do
    /// not depend on the variant.
    pub const MEMORY_MAX: usize = 65536;

    /// Guest address where ROM bytes are placed.
    pub const PROGRAM_START: u16 = 0x200;

    /// Flavour of CHIP-8 being emulated. Selects addressable memory size,
    /// display geometry, the initial program counter and which opcode
    /// patterns the decoder recognizes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Chip8Variant {
        Chip8,
        TwoPages,
        SuperChip,
        XoChip,
    }

    /// Complete guest state of one CHIP-8 machine.
    ///
    /// The layout is `repr(C)` because recompiled blocks address individual
    /// fields as fixed displacements from a base pointer. Scalar fields the
    /// generated code touches are kept at the front so their displacements
    /// fit in a signed byte; `memory` sits behind them and `display` last.
    #[repr(C)]
    #[allow(non_snake_case)]
    pub struct Chip8 {
        /// General purpose registers. `V[0xF]` doubles as the flag register
        /// and is clobbered by arithmetic, shift and draw instructions.
        pub V: [u8; 16],
        pub DT: u8,
        pub ST: u8,
        /// Index of the next free stack slot, in `0..=16`.
        pub SP: u8,
        pub I: u16,
        pub PC: u16,
        /// Total retired guest instructions, one per instruction.
        pub cycles_since_started: u32,
        pub stack: [u16; 16],
        pub keyboard: [bool; 16],
        /// Set by the core after any framebuffer mutation, cleared by the
        /// display collaborator once it has presented a frame.
        pub display_dirty: bool,
        pub variant: Chip8Variant,
        pub display_width: u32,
        pub display_height: u32,
        /// Guest cycles per real-time second.
        pub clock_speed: u32,
        pub memory: [u8; MEMORY_MAX],
        /// Row-major framebuffer, `display_width * display_height` pixels.
        pub display: Vec<bool>,
    }

    impl Chip8 {
        /// Build a fresh guest with fonts loaded and PC at the program
        /// start. The state is boxed so its address stays stable; recompiled
        /// blocks bake a pointer to it into generated code.
        pub fn new(variant: Chip8Variant, clock_speed: u32) -> Box<Chip8> {
            assert!(clock_speed > 0, "clock speed must be non-zero");

            let (display_width, display_height) = match variant {
                Chip8Variant::Chip8 => (64, 32),
                Chip8Variant::TwoPages => (64, 64),
                Chip8Variant::SuperChip | Chip8Variant::XoChip => (128, 64),
            };

            // Two-page ROMs carry a 0xC0 byte loader stub before the
            // program proper, so execution starts past it.
            let pc = match variant {
                Chip8Variant::TwoPages => 0x02C0,
                _ => PROGRAM_START,
            };

            let mut state = Box::new(Chip8 {
                V: [0; 16],
                DT: 0,
                ST: 0,
                SP: 0,
                I: 0,
                PC: pc,
                cycles_since_started: 0,
                stack: [0; 16],
                keyboard: [false; 16],
                display_dirty: false,
                variant,
                display_width,
                display_height,
                clock_speed,
                memory: [0; MEMORY_MAX],
                display: vec![false; (display_width * display_height) as usize],
            });

            state.memory[..CHIP8_SPRITES.len()].copy_from_slice(&CHIP8_SPRITES);
            state
        }

        /// Addressable guest memory for the configured variant.
        pub fn mem_size(&self) -> usize {
            match self.variant {
                Chip8Variant::XoChip => MEMORY_MAX,
                _ => 4096,
            }
        }

        /// Place raw ROM bytes at the program start address.
        pub fn load_rom_bytes(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
            let start = PROGRAM_START as usize;
            if start + rom.len() > self.mem_size() {
                return Err(Chip8Error::RomTooLong);
            }

            self.memory[start..start + rom.len()].copy_from_slice(rom);
            Ok(())
        }

        /// Read a ROM file from disk and load it.
        pub fn load_rom(&mut self, path: &Path) -> Result<(), Chip8Error> {
            let rom = fs::read(path).map_err(|_| Chip8Error::RomNotFound)?;
            self.load_rom_bytes(&rom)
        }
    }

}
