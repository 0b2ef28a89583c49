pub mod translate {
    //! Lowers CHIP-8 basic blocks to native x86-64.
    //!
    //! Calling convention of a translated block: the first instructions
    //! reload RCX with the guest state address (baked in as an imm64), so a
    //! block can be invoked as a plain `fn() -> i32`. Guest fields are
    //! addressed as displacements from RCX. On exit EAX holds a
    //! [`Chip8Error`] code, 0 for success; on the success path the block has
    //! already stored the next PC and added its retired instruction count to
    //! the cycle counter.

    use std::mem::offset_of;

    use tracing::debug;

    use crate::chip8::chip8::Chip8;
    use crate::code_buffer::code_buffer::CodeBuffer;
    use crate::error::error::Chip8Error;
    use crate::opcode::opcode::{decode, Opcode, OpcodeId};
    use crate::x64::x64::{self, X64Reg::*};

    const BLOCK_CAPACITY: usize = 4096;

    /// Worst case bytes of one more translated instruction plus an error
    /// tail. When less than this remains, the block is cut short.
    const SPILL_MARGIN: usize = 160;

    const V: i32 = offset_of!(Chip8, V) as i32;
    const VF: i32 = V + 15;
    const DT: i32 = offset_of!(Chip8, DT) as i32;
    const ST: i32 = offset_of!(Chip8, ST) as i32;
    const SP: i32 = offset_of!(Chip8, SP) as i32;
    const I: i32 = offset_of!(Chip8, I) as i32;
    const PC: i32 = offset_of!(Chip8, PC) as i32;
    const CYCLES: i32 = offset_of!(Chip8, cycles_since_started) as i32;
    const STACK: i32 = offset_of!(Chip8, stack) as i32;
    const MEMORY: i32 = offset_of!(Chip8, memory) as i32;

    /// Length of `inc dword [rcx + CYCLES]` in its disp8 form. Skip
    /// translation hardcodes it when sizing the forward jump.
    const SKIP_RESTORE_LEN: i8 = 3;
    const _: () = assert!(CYCLES > 0 && CYCLES < 0x80);

    /// One translated basic block. `start` is the guest address of the
    /// first instruction, `end` one past the last encoded instruction.
    pub struct CodeBlock {
        pub code: CodeBuffer,
        pub start: u16,
        pub end: u16,
    }

    impl CodeBlock {
        /// Guest instructions encoded before the terminator.
        pub fn instruction_count(&self) -> u32 {
            (self.end.wrapping_sub(self.start) / 2) as u32
        }

        /// Execute the block against the guest state it was translated
        /// for.
        ///
        /// # Safety
        ///
        /// The `Chip8` whose address was baked into this block at
        /// translation time must still be alive at that address, and
        /// nothing else may touch it while the block runs.
        pub unsafe fn run(&self) -> i32 {
            unsafe { self.code.run() }
        }
    }

    /// Walk guest memory from PC, translating instructions until a block
    /// terminator, then seal the buffer. Translation itself never fails;
    /// invalid or unsupported opcodes are encoded as error returns that
    /// surface when the block runs.
    pub fn translate_block(state: &mut Chip8) -> CodeBlock {
        let code = CodeBuffer::new(BLOCK_CAPACITY).expect("executable page allocation failed");
        let mut block = CodeBlock {
            code,
            start: state.PC,
            end: state.PC,
        };

        x64::mov_regimm64(&mut block.code, Rcx, state as *mut Chip8 as u64);

        while !translate_instruction(&mut block, state) {
            block.end = block.end.wrapping_add(2);

            // Straight-line code can outgrow the page. Bail to the
            // interpreter at this address; the next block picks up here.
            // Never cut right after a skip, its forward jump is already
            // sized for the following instruction.
            if block.code.remaining() < SPILL_MARGIN
                && !decode(state, block.end.wrapping_sub(2)).id.is_skip()
            {
                emit_error(&mut block, Chip8Error::OpcodeNotSupported);
                break;
            }
        }

        block.code.lock().expect("code page protection flip failed");

        debug!(
            "translated block {:#06x}..{:#06x} ({} bytes)",
            block.start,
            block.end,
            block.code.as_bytes().len()
        );
        block
    }

    /// Translate the instruction at `block.end`. Returns true when the
    /// block is finished. `block.end` is not advanced here.
    fn translate_instruction(block: &mut CodeBlock, state: &Chip8) -> bool {
        let op = decode(state, block.end);
        let mut done = emit_opcode(block, state, &op);

        // The instruction right after a skip can never end the block: the
        // skip's forward jump has to land past it, inside this block.
        if done && block.end >= 2 && block.start < block.end {
            done = !decode(state, block.end - 2).id.is_skip();
        }

        done
    }

    /// Encoded length of the next instruction, measured by emitting it
    /// speculatively and rewinding. Sound because emitters are pure given
    /// (opcode, offsets); the only state touched is the buffer cursor and
    /// `end`, both restored here.
    fn next_length(block: &mut CodeBlock, state: &Chip8) -> i8 {
        block.end = block.end.wrapping_add(2);
        let mark = block.code.pos();

        translate_instruction(block, state);
        let length = (block.code.pos() - mark) as i8;

        block.code.rewind(mark);
        block.end = block.end.wrapping_sub(2);
        length
    }

    fn emit_opcode(block: &mut CodeBlock, state: &Chip8, op: &Opcode) -> bool {
        match op.id {
            OpcodeId::Ret => emit_ret(block),
            OpcodeId::JmpNnn => emit_jmp_nnn(block, op),
            OpcodeId::CallNnn => emit_call_nnn(block, op),
            OpcodeId::SeVxKk => emit_se_vx_kk(block, state, op),
            OpcodeId::SneVxKk => emit_sne_vx_kk(block, state, op),
            OpcodeId::SeVxVy => emit_se_vx_vy(block, state, op),
            OpcodeId::SneVxVy => emit_sne_vx_vy(block, state, op),
            OpcodeId::LdVxKk => emit_ld_vx_kk(block, op),
            OpcodeId::AddVxKk => emit_add_vx_kk(block, op),
            OpcodeId::LdVxVy => emit_ld_vx_vy(block, op),
            OpcodeId::OrVxVy => emit_or_vx_vy(block, op),
            OpcodeId::AndVxVy => emit_and_vx_vy(block, op),
            OpcodeId::XorVxVy => emit_xor_vx_vy(block, op),
            OpcodeId::AddVxVy => emit_add_vx_vy(block, op),
            OpcodeId::SubVxVy => emit_sub_vx_vy(block, op),
            OpcodeId::ShrVxVy => emit_shr_vx(block, op),
            OpcodeId::SubnVxVy => emit_subn_vx_vy(block, op),
            OpcodeId::ShlVxVy => emit_shl_vx(block, op),
            OpcodeId::LdINnn => emit_ld_i_nnn(block, op),
            OpcodeId::JpV0Nnn => emit_jp_v0_nnn(block, op),
            OpcodeId::LdVxDt => emit_ld_vx_dt(block, op),
            OpcodeId::LdDtVx => emit_ld_dt_vx(block, op),
            OpcodeId::LdStVx => emit_ld_st_vx(block, op),
            OpcodeId::AddIVx => emit_add_i_vx(block, op),
            OpcodeId::LdIVx => emit_ld_i_vx(block, op),
            OpcodeId::LdVxI => emit_ld_vx_i(block, op),
            OpcodeId::Invalid => {
                emit_error(block, Chip8Error::OpcodeInvalid);
                true
            }
            // CLS, DRW, RND, keyboard and BCD opcodes, plus every
            // extension: the interpreter handles these one at a time.
            _ => {
                emit_error(block, Chip8Error::OpcodeNotSupported);
                true
            }
        }
    }

    /// Store the next PC and the retired count for a normal block exit,
    /// then return OK. The terminator itself is not part of
    /// `instruction_count` yet, hence the +1.
    fn emit_block_exit(block: &mut CodeBlock) {
        let retired = 1 + block.instruction_count();
        x64::mov_regimm32(&mut block.code, Rax, retired);
        x64::add_memreg32(&mut block.code, Rcx, CYCLES, Rax);

        x64::mov_regimm32(&mut block.code, Rax, Chip8Error::OK as u32);
        x64::retn(&mut block.code);
    }

    /// Error tail: record how far the block got (PC at the offending
    /// instruction, cycles for everything before it) and return the code.
    /// A block that has not retired anything yet skips the bookkeeping.
    fn emit_error(block: &mut CodeBlock, error: Chip8Error) {
        if block.start < block.end {
            x64::mov_regimm32(&mut block.code, Rax, block.end as u32);
            x64::mov_memreg16(&mut block.code, Rcx, PC, Rax);

            let retired = block.instruction_count();
            x64::mov_regimm32(&mut block.code, Rax, retired);
            x64::add_memreg32(&mut block.code, Rcx, CYCLES, Rax);
        }

        x64::mov_regimm32(&mut block.code, Rax, error.code() as u32);
        x64::retn(&mut block.code);
    }

    fn emit_ret(block: &mut CodeBlock) -> bool {
        x64::dec_mem8(&mut block.code, Rcx, SP);

        // rdx = &state + 2 * SP
        x64::movzx_regmem8(&mut block.code, Rdx, Rcx, SP);
        x64::add_regreg64(&mut block.code, Rdx, Rdx);
        x64::add_regreg64(&mut block.code, Rdx, Rcx);

        // PC = stack[SP] + 2
        x64::mov_regmem16(&mut block.code, Rax, Rdx, STACK);
        x64::add_aximm8(&mut block.code, 2);
        x64::mov_memreg16(&mut block.code, Rcx, PC, Rax);

        emit_block_exit(block);
        true
    }

    fn emit_jmp_nnn(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regimm32(&mut block.code, Rax, op.nnn as u32);
        x64::mov_memreg16(&mut block.code, Rcx, PC, Rax);

        emit_block_exit(block);
        true
    }

    fn emit_call_nnn(block: &mut CodeBlock, op: &Opcode) -> bool {
        // rdx = &state + 2 * SP
        x64::movzx_regmem8(&mut block.code, Rdx, Rcx, SP);
        x64::add_regreg64(&mut block.code, Rdx, Rdx);
        x64::add_regreg64(&mut block.code, Rdx, Rcx);

        // stack[SP] = guest address of this CALL
        x64::mov_regimm32(&mut block.code, Rax, block.end as u32);
        x64::mov_memreg16(&mut block.code, Rdx, STACK, Rax);
        x64::inc_mem8(&mut block.code, Rcx, SP);

        x64::mov_regimm32(&mut block.code, Rax, op.nnn as u32);
        x64::mov_memreg16(&mut block.code, Rcx, PC, Rax);

        emit_block_exit(block);
        true
    }

    fn emit_jp_v0_nnn(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regimm32(&mut block.code, Rax, op.nnn as u32);
        x64::mov_memreg16(&mut block.code, Rcx, PC, Rax);

        // zero-extend V0 so the 16-bit add sees no leftover bits
        x64::movzx_regmem8(&mut block.code, Rax, Rcx, V);
        x64::add_memreg16(&mut block.code, Rcx, PC, Rax);

        emit_block_exit(block);
        true
    }

    // Skips pre-decrement the cycle counter: when the skip is taken, the
    // slot of the following instruction never retires. The fall-through
    // path undoes it with the `inc` the jump lands past.

    fn emit_se_vx_kk(block: &mut CodeBlock, state: &Chip8, op: &Opcode) -> bool {
        x64::dec_mem32(&mut block.code, Rcx, CYCLES);
        x64::mov_regimm32(&mut block.code, Rax, op.kk as u32);
        x64::cmp_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);

        let distance = SKIP_RESTORE_LEN + next_length(block, state);
        x64::jz8(&mut block.code, distance);
        x64::inc_mem32(&mut block.code, Rcx, CYCLES);
        false
    }

    fn emit_sne_vx_kk(block: &mut CodeBlock, state: &Chip8, op: &Opcode) -> bool {
        x64::dec_mem32(&mut block.code, Rcx, CYCLES);
        x64::mov_regimm32(&mut block.code, Rax, op.kk as u32);
        x64::cmp_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);

        let distance = SKIP_RESTORE_LEN + next_length(block, state);
        x64::jnz8(&mut block.code, distance);
        x64::inc_mem32(&mut block.code, Rcx, CYCLES);
        false
    }

    fn emit_se_vx_vy(block: &mut CodeBlock, state: &Chip8, op: &Opcode) -> bool {
        x64::dec_mem32(&mut block.code, Rcx, CYCLES);
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::cmp_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);

        let distance = SKIP_RESTORE_LEN + next_length(block, state);
        x64::jz8(&mut block.code, distance);
        x64::inc_mem32(&mut block.code, Rcx, CYCLES);
        false
    }

    fn emit_sne_vx_vy(block: &mut CodeBlock, state: &Chip8, op: &Opcode) -> bool {
        x64::dec_mem32(&mut block.code, Rcx, CYCLES);
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::cmp_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);

        let distance = SKIP_RESTORE_LEN + next_length(block, state);
        x64::jnz8(&mut block.code, distance);
        x64::inc_mem32(&mut block.code, Rcx, CYCLES);
        false
    }

    fn emit_ld_vx_kk(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regimm32(&mut block.code, Rax, op.kk as u32);
        x64::mov_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_add_vx_kk(block: &mut CodeBlock, op: &Opcode) -> bool {
        // 7xkk leaves VF alone
        x64::mov_regimm32(&mut block.code, Rax, op.kk as u32);
        x64::add_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_ld_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::mov_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_or_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::or_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_and_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::and_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_xor_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::xor_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_add_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::add_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        x64::setc_mem8(&mut block.code, Rcx, VF);
        false
    }

    fn emit_sub_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::sub_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        x64::setnc_mem8(&mut block.code, Rcx, VF); // VF = not borrow
        false
    }

    fn emit_subn_vx_vy(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.y as i32);
        x64::sub_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);
        x64::setnc_mem8(&mut block.code, Rcx, VF);
        x64::mov_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_shr_vx(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::shr_mem8(&mut block.code, Rcx, V + op.x as i32);
        x64::setc_mem8(&mut block.code, Rcx, VF); // VF = bit shifted out
        false
    }

    fn emit_shl_vx(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::shl_mem8(&mut block.code, Rcx, V + op.x as i32);
        x64::setc_mem8(&mut block.code, Rcx, VF);
        false
    }

    fn emit_ld_i_nnn(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regimm32(&mut block.code, Rax, op.nnn as u32);
        x64::mov_memreg16(&mut block.code, Rcx, I, Rax);
        false
    }

    fn emit_ld_vx_dt(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, DT);
        x64::mov_memreg8(&mut block.code, Rcx, V + op.x as i32, Rax);
        false
    }

    fn emit_ld_dt_vx(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);
        x64::mov_memreg8(&mut block.code, Rcx, DT, Rax);
        false
    }

    fn emit_ld_st_vx(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::mov_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);
        x64::mov_memreg8(&mut block.code, Rcx, ST, Rax);
        false
    }

    fn emit_add_i_vx(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::movzx_regmem8(&mut block.code, Rax, Rcx, V + op.x as i32);
        x64::add_memreg16(&mut block.code, Rcx, I, Rax);
        false
    }

    fn emit_ld_i_vx(block: &mut CodeBlock, op: &Opcode) -> bool {
        // rdx = &state + I, then an unrolled byte copy
        x64::movzx_regmem16(&mut block.code, Rdx, Rcx, I);
        x64::add_regreg64(&mut block.code, Rdx, Rcx);

        for reg in 0..=op.x as i32 {
            x64::mov_regmem8(&mut block.code, Rax, Rcx, V + reg);
            x64::mov_memreg8(&mut block.code, Rdx, MEMORY + reg, Rax);
        }

        x64::mov_regimm32(&mut block.code, Rax, op.x as u32 + 1);
        x64::add_memreg16(&mut block.code, Rcx, I, Rax);
        false
    }

    fn emit_ld_vx_i(block: &mut CodeBlock, op: &Opcode) -> bool {
        x64::movzx_regmem16(&mut block.code, Rdx, Rcx, I);
        x64::add_regreg64(&mut block.code, Rdx, Rcx);

        for reg in 0..=op.x as i32 {
            x64::mov_regmem8(&mut block.code, Rax, Rdx, MEMORY + reg);
            x64::mov_memreg8(&mut block.code, Rcx, V + reg, Rax);
        }

        x64::mov_regimm32(&mut block.code, Rax, op.x as u32 + 1);
        x64::add_memreg16(&mut block.code, Rcx, I, Rax);
        false
    }

}
