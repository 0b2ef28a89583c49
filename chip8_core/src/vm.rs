pub mod vm {
    use std::path::Path;

    use crate::cache::cache::BlockCache;
    use crate::chip8::chip8::{Chip8, Chip8Variant};
    use crate::error::error::Chip8Error;
    use crate::interpreter::interpreter;

    /// Which execution back-end a VM runs on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BackendKind {
        Interpreter,
        Recompiler,
    }

    enum Backend {
        Interpreter,
        Recompiler(BlockCache),
    }

    /// A CHIP-8 machine plus the machinery to run it.
    ///
    /// The guest state stays boxed for its whole life: recompiled blocks
    /// bake its address into generated code, so it must never move.
    pub struct Chip8Vm {
        state: Box<Chip8>,
        backend: Backend,
    }

    impl Chip8Vm {
        pub fn new(kind: BackendKind, variant: Chip8Variant, clock_speed: u32) -> Chip8Vm {
            let backend = match kind {
                BackendKind::Interpreter => Backend::Interpreter,
                BackendKind::Recompiler => Backend::Recompiler(BlockCache::new()),
            };

            Chip8Vm {
                state: Chip8::new(variant, clock_speed),
                backend,
            }
        }

        pub fn state(&self) -> &Chip8 {
            &self.state
        }

        /// The collaborator writes keyboard state and clears
        /// `display_dirty` through this.
        pub fn state_mut(&mut self) -> &mut Chip8 {
            &mut self.state
        }

        pub fn load_rom(&mut self, path: &Path) -> Result<(), Chip8Error> {
            self.state.load_rom(path)
        }

        pub fn load_rom_bytes(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
            self.state.load_rom_bytes(rom)
        }

        /// Advance the guest until it has caught up with `ticks`
        /// milliseconds of real time since the machine started.
        pub fn run(&mut self, ticks: u64) -> Result<(), Chip8Error> {
            let target = ticks * self.state.clock_speed as u64 / 1000;

            while (self.state.cycles_since_started as u64) < target {
                self.step()?;
            }

            Ok(())
        }

        /// One logical step: a single interpreted instruction, or one
        /// translated block. Timers tick at 60 Hz against retired guest
        /// cycles, whichever back-end retired them.
        pub fn step(&mut self) -> Result<(), Chip8Error> {
            let cycles_before = self.state.cycles_since_started;

            let result = match &mut self.backend {
                Backend::Interpreter => interpreter::step(&mut self.state),
                Backend::Recompiler(cache) => {
                    let block = cache.fetch(&mut self.state);
                    // The block mutates the guest through its baked-in
                    // pointer and returns before we look at state again.
                    let code = unsafe { block.run() };

                    match Chip8Error::from_code(code) {
                        // The block stopped on an opcode it cannot
                        // express, with PC parked on it. Let the
                        // interpreter retire that one instruction.
                        Err(Chip8Error::OpcodeNotSupported) => interpreter::step(&mut self.state),
                        other => other,
                    }
                }
            };

            self.tick_timers(cycles_before);
            result
        }

        /// Decrement DT/ST once for every 60 Hz boundary crossed since
        /// `cycles_before`, regardless of emulation clock speed.
        fn tick_timers(&mut self, cycles_before: u32) {
            let clock = self.state.clock_speed as u64;
            let missed = self.state.cycles_since_started as u64 * 60 / clock
                - cycles_before as u64 * 60 / clock;

            let missed = missed.min(u8::MAX as u64) as u8;
            self.state.DT = self.state.DT.saturating_sub(missed);
            self.state.ST = self.state.ST.saturating_sub(missed);
        }
    }
}
