pub mod x64 {
    //! Minimal x86-64 instruction emitter.
    //!
    //! One function per instruction form, each appending its encoding to a
    //! [`CodeBuffer`]. Only the operand shapes the translator needs are
    //! implemented: base register plus signed 32-bit displacement for
    //! memory operands, no SIB, no extended registers as operands.

    use crate::code_buffer::code_buffer::CodeBuffer;

    /// Host registers the translator hands out. The numeric value is the
    /// 3-bit encoding used in ModR/M bytes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum X64Reg {
        Rax = 0,
        Rcx = 1,
        Rdx = 2,
        Rbx = 3,
        Rsp = 4,
        Rbp = 5,
        Rsi = 6,
        Rdi = 7,
    }

    /// Mod is 2 bits, reg and rm are 3 bits. mod selects register-direct
    /// (0b11) or register-indirect addressing with 0, 1 or 4 displacement
    /// bytes.
    fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
        (md << 6) | (reg << 3) | rm
    }

    fn push_rex(code: &mut CodeBuffer, w: bool, r: bool, x: bool, b: bool) {
        code.push_byte(0x40 | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | b as u8);
    }

    /// Opcode plus `[base + disp]` ModR/M operand. `reg` is either a
    /// register number or the /digit of a group opcode. Picks the shortest
    /// displacement encoding; mod=00 with rm=101 would mean RIP-relative,
    /// so an rbp base always carries an explicit displacement.
    fn push_op_modrm(code: &mut CodeBuffer, opcode: u8, reg: u8, base: X64Reg, disp: i32) {
        debug_assert!(base != X64Reg::Rsp, "rsp-based addressing needs a SIB byte");

        code.push_byte(opcode);

        let rm = base as u8;
        if disp == 0 && base != X64Reg::Rbp {
            code.push_byte(modrm(0b00, reg, rm));
        } else if (-128..=127).contains(&disp) {
            code.push_byte(modrm(0b01, reg, rm));
            code.push_byte(disp as u8);
        } else {
            code.push_byte(modrm(0b10, reg, rm));
            code.push_dword(disp as u32);
        }
    }

    pub fn retn(code: &mut CodeBuffer) {
        code.push_byte(0xC3);
    }

    //////////
    // Move
    //////////

    pub fn mov_regimm32(code: &mut CodeBuffer, reg: X64Reg, imm: u32) {
        code.push_byte(0xB8 | reg as u8);
        code.push_dword(imm);
    }

    pub fn mov_regimm64(code: &mut CodeBuffer, reg: X64Reg, imm: u64) {
        push_rex(code, true, false, false, false);
        code.push_byte(0xB8 | reg as u8);
        code.push_qword(imm);
    }

    pub fn mov_regmem8(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0x8A, reg as u8, base, disp);
    }

    pub fn mov_regmem16(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        code.push_byte(0x66); // operand-size prefix
        push_op_modrm(code, 0x8B, reg as u8, base, disp);
    }

    pub fn mov_regmem32(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0x8B, reg as u8, base, disp);
    }

    /// Zero-extending byte load into a 64-bit register.
    pub fn movzx_regmem8(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        push_rex(code, true, false, false, false);
        code.push_byte(0x0F);
        push_op_modrm(code, 0xB6, reg as u8, base, disp);
    }

    /// Zero-extending word load into a 64-bit register.
    pub fn movzx_regmem16(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        push_rex(code, true, false, false, false);
        code.push_byte(0x0F);
        push_op_modrm(code, 0xB7, reg as u8, base, disp);
    }

    pub fn mov_memreg8(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x88, reg as u8, base, disp);
    }

    pub fn mov_memreg16(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        code.push_byte(0x66);
        push_op_modrm(code, 0x89, reg as u8, base, disp);
    }

    pub fn mov_memreg32(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x89, reg as u8, base, disp);
    }

    //////////
    // Arithmetic
    //////////

    /// add ax, imm8 (sign-extended).
    pub fn add_aximm8(code: &mut CodeBuffer, imm: u8) {
        code.push_byte(0x66);
        code.push_byte(0x83);
        code.push_byte(0xC0);
        code.push_byte(imm);
    }

    pub fn add_memreg8(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x00, reg as u8, base, disp);
    }

    pub fn add_memreg16(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        code.push_byte(0x66);
        push_op_modrm(code, 0x01, reg as u8, base, disp);
    }

    pub fn add_memreg32(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x01, reg as u8, base, disp);
    }

    pub fn sub_memreg8(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x28, reg as u8, base, disp);
    }

    pub fn sub_memreg16(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        code.push_byte(0x66);
        push_op_modrm(code, 0x29, reg as u8, base, disp);
    }

    pub fn sub_memreg32(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x29, reg as u8, base, disp);
    }

    pub fn sub_regmem8(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0x2A, reg as u8, base, disp);
    }

    pub fn add_regreg64(code: &mut CodeBuffer, dst: X64Reg, src: X64Reg) {
        push_rex(code, true, false, false, false);
        code.push_byte(0x03);
        code.push_byte(modrm(0b11, dst as u8, src as u8));
    }

    //////////
    // Logic
    //////////

    pub fn or_memreg8(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x08, reg as u8, base, disp);
    }

    pub fn or_memreg16(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        code.push_byte(0x66);
        push_op_modrm(code, 0x09, reg as u8, base, disp);
    }

    pub fn or_memreg32(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x09, reg as u8, base, disp);
    }

    pub fn and_memreg8(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x20, reg as u8, base, disp);
    }

    pub fn and_memreg16(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        code.push_byte(0x66);
        push_op_modrm(code, 0x21, reg as u8, base, disp);
    }

    pub fn and_memreg32(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x21, reg as u8, base, disp);
    }

    pub fn xor_memreg8(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x30, reg as u8, base, disp);
    }

    pub fn xor_memreg16(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        code.push_byte(0x66);
        push_op_modrm(code, 0x31, reg as u8, base, disp);
    }

    pub fn xor_memreg32(code: &mut CodeBuffer, base: X64Reg, disp: i32, reg: X64Reg) {
        push_op_modrm(code, 0x31, reg as u8, base, disp);
    }

    /// shr byte [base + disp], 1
    pub fn shr_mem8(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0xD0, 5, base, disp);
    }

    /// shl byte [base + disp], 1
    pub fn shl_mem8(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0xD0, 4, base, disp);
    }

    //////////
    // Inc/Dec
    //////////

    pub fn inc_mem8(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0xFE, 0, base, disp);
    }

    pub fn dec_mem8(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0xFE, 1, base, disp);
    }

    pub fn inc_mem32(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0xFF, 0, base, disp);
    }

    pub fn dec_mem32(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0xFF, 1, base, disp);
    }

    //////////
    // Flags and jumps
    //////////

    pub fn cmp_regmem8(code: &mut CodeBuffer, reg: X64Reg, base: X64Reg, disp: i32) {
        push_op_modrm(code, 0x3A, reg as u8, base, disp);
    }

    /// setc byte [base + disp]
    pub fn setc_mem8(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        code.push_byte(0x0F);
        push_op_modrm(code, 0x92, 0, base, disp);
    }

    /// setnc byte [base + disp]
    pub fn setnc_mem8(code: &mut CodeBuffer, base: X64Reg, disp: i32) {
        code.push_byte(0x0F);
        push_op_modrm(code, 0x93, 0, base, disp);
    }

    pub fn jz8(code: &mut CodeBuffer, distance: i8) {
        code.push_byte(0x74);
        code.push_byte(distance as u8);
    }

    pub fn jnz8(code: &mut CodeBuffer, distance: i8) {
        code.push_byte(0x75);
        code.push_byte(distance as u8);
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pretty_assertions::assert_eq;

        fn emit(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
            let mut code = CodeBuffer::new(256).unwrap();
            f(&mut code);
            code.as_bytes().to_vec()
        }

        #[test]
        fn mov_immediates() {
            assert_eq!(
                emit(|c| mov_regimm32(c, X64Reg::Rax, 0x11223344)),
                [0xB8, 0x44, 0x33, 0x22, 0x11]
            );
            assert_eq!(
                emit(|c| mov_regimm32(c, X64Reg::Rdx, 7)),
                [0xBA, 0x07, 0x00, 0x00, 0x00]
            );
            assert_eq!(
                emit(|c| mov_regimm64(c, X64Reg::Rcx, 0x1122334455667788)),
                [0x48, 0xB9, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
            );
        }

        #[test]
        fn displacement_sizing() {
            // zero displacement drops the displacement byte entirely
            assert_eq!(emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rcx, 0)), [0x8A, 0x01]);
            // disp8 covers -128..=127
            assert_eq!(emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rcx, 0x10)), [0x8A, 0x41, 0x10]);
            assert_eq!(emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rcx, 127)), [0x8A, 0x41, 0x7F]);
            assert_eq!(emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rcx, -1)), [0x8A, 0x41, 0xFF]);
            // beyond that, disp32
            assert_eq!(
                emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rcx, 128)),
                [0x8A, 0x81, 0x80, 0x00, 0x00, 0x00]
            );
            assert_eq!(
                emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rcx, -129)),
                [0x8A, 0x81, 0x7F, 0xFF, 0xFF, 0xFF]
            );
            // rbp as base cannot use the no-displacement form
            assert_eq!(emit(|c| mov_regmem8(c, X64Reg::Rax, X64Reg::Rbp, 0)), [0x8A, 0x45, 0x00]);
        }

        #[test]
        fn loads() {
            assert_eq!(
                emit(|c| mov_regmem16(c, X64Reg::Rax, X64Reg::Rcx, 0x16)),
                [0x66, 0x8B, 0x41, 0x16]
            );
            assert_eq!(
                emit(|c| mov_regmem32(c, X64Reg::Rax, X64Reg::Rcx, 0x18)),
                [0x8B, 0x41, 0x18]
            );
            assert_eq!(
                emit(|c| movzx_regmem8(c, X64Reg::Rdx, X64Reg::Rcx, 0x12)),
                [0x48, 0x0F, 0xB6, 0x51, 0x12]
            );
            assert_eq!(
                emit(|c| movzx_regmem16(c, X64Reg::Rdx, X64Reg::Rcx, 0x14)),
                [0x48, 0x0F, 0xB7, 0x51, 0x14]
            );
        }

        #[test]
        fn stores() {
            assert_eq!(emit(|c| mov_memreg8(c, X64Reg::Rcx, 0x0F, X64Reg::Rax)), [0x88, 0x41, 0x0F]);
            assert_eq!(
                emit(|c| mov_memreg16(c, X64Reg::Rcx, 0x16, X64Reg::Rax)),
                [0x66, 0x89, 0x41, 0x16]
            );
            assert_eq!(
                emit(|c| mov_memreg32(c, X64Reg::Rcx, 0x200, X64Reg::Rax)),
                [0x89, 0x81, 0x00, 0x02, 0x00, 0x00]
            );
        }

        #[test]
        fn read_modify_write() {
            assert_eq!(emit(|c| add_memreg8(c, X64Reg::Rcx, 0x04, X64Reg::Rax)), [0x00, 0x41, 0x04]);
            assert_eq!(
                emit(|c| add_memreg16(c, X64Reg::Rcx, 0x14, X64Reg::Rax)),
                [0x66, 0x01, 0x41, 0x14]
            );
            assert_eq!(emit(|c| add_memreg32(c, X64Reg::Rcx, 0x18, X64Reg::Rax)), [0x01, 0x41, 0x18]);
            assert_eq!(emit(|c| sub_memreg8(c, X64Reg::Rcx, 0x04, X64Reg::Rax)), [0x28, 0x41, 0x04]);
            assert_eq!(emit(|c| or_memreg8(c, X64Reg::Rcx, 0x04, X64Reg::Rax)), [0x08, 0x41, 0x04]);
            assert_eq!(emit(|c| and_memreg8(c, X64Reg::Rcx, 0x04, X64Reg::Rax)), [0x20, 0x41, 0x04]);
            assert_eq!(emit(|c| xor_memreg8(c, X64Reg::Rcx, 0x04, X64Reg::Rax)), [0x30, 0x41, 0x04]);
            assert_eq!(emit(|c| sub_regmem8(c, X64Reg::Rax, X64Reg::Rcx, 0x04)), [0x2A, 0x41, 0x04]);
        }

        #[test]
        fn wider_read_modify_write() {
            assert_eq!(
                emit(|c| sub_memreg16(c, X64Reg::Rcx, 0x14, X64Reg::Rax)),
                [0x66, 0x29, 0x41, 0x14]
            );
            assert_eq!(emit(|c| sub_memreg32(c, X64Reg::Rcx, 0x18, X64Reg::Rax)), [0x29, 0x41, 0x18]);
            assert_eq!(
                emit(|c| or_memreg16(c, X64Reg::Rcx, 0x14, X64Reg::Rax)),
                [0x66, 0x09, 0x41, 0x14]
            );
            assert_eq!(emit(|c| or_memreg32(c, X64Reg::Rcx, 0x18, X64Reg::Rax)), [0x09, 0x41, 0x18]);
            assert_eq!(
                emit(|c| and_memreg16(c, X64Reg::Rcx, 0x14, X64Reg::Rax)),
                [0x66, 0x21, 0x41, 0x14]
            );
            assert_eq!(emit(|c| and_memreg32(c, X64Reg::Rcx, 0x18, X64Reg::Rax)), [0x21, 0x41, 0x18]);
            assert_eq!(
                emit(|c| xor_memreg16(c, X64Reg::Rcx, 0x14, X64Reg::Rax)),
                [0x66, 0x31, 0x41, 0x14]
            );
            assert_eq!(emit(|c| xor_memreg32(c, X64Reg::Rcx, 0x18, X64Reg::Rax)), [0x31, 0x41, 0x18]);
        }

        #[test]
        fn shifts_and_counters() {
            assert_eq!(emit(|c| shr_mem8(c, X64Reg::Rcx, 0x03)), [0xD0, 0x69, 0x03]);
            assert_eq!(emit(|c| shl_mem8(c, X64Reg::Rcx, 0x03)), [0xD0, 0x61, 0x03]);
            assert_eq!(emit(|c| inc_mem8(c, X64Reg::Rcx, 0x12)), [0xFE, 0x41, 0x12]);
            assert_eq!(emit(|c| dec_mem8(c, X64Reg::Rcx, 0x12)), [0xFE, 0x49, 0x12]);
            assert_eq!(emit(|c| inc_mem32(c, X64Reg::Rcx, 0x18)), [0xFF, 0x41, 0x18]);
            assert_eq!(emit(|c| dec_mem32(c, X64Reg::Rcx, 0x18)), [0xFF, 0x49, 0x18]);
        }

        #[test]
        fn flags_and_jumps() {
            assert_eq!(emit(|c| cmp_regmem8(c, X64Reg::Rax, X64Reg::Rcx, 0x05)), [0x3A, 0x41, 0x05]);
            assert_eq!(emit(|c| setc_mem8(c, X64Reg::Rcx, 0x0F)), [0x0F, 0x92, 0x41, 0x0F]);
            assert_eq!(emit(|c| setnc_mem8(c, X64Reg::Rcx, 0x0F)), [0x0F, 0x93, 0x41, 0x0F]);
            assert_eq!(emit(|c| jz8(c, 5)), [0x74, 0x05]);
            assert_eq!(emit(|c| jnz8(c, -2)), [0x75, 0xFE]);
        }

        #[test]
        fn reg_to_reg_and_misc() {
            assert_eq!(emit(|c| add_regreg64(c, X64Reg::Rdx, X64Reg::Rdx)), [0x48, 0x03, 0xD2]);
            assert_eq!(emit(|c| add_regreg64(c, X64Reg::Rdx, X64Reg::Rcx)), [0x48, 0x03, 0xD1]);
            assert_eq!(emit(|c| add_aximm8(c, 2)), [0x66, 0x83, 0xC0, 0x02]);
            assert_eq!(emit(|c| retn(c)), [0xC3]);
        }

        #[cfg(target_arch = "x86_64")]
        #[test]
        fn emitted_code_executes() {
            // mov eax, 40; add ax, 2; ret
            let mut code = CodeBuffer::new(64).unwrap();
            mov_regimm32(&mut code, X64Reg::Rax, 40);
            add_aximm8(&mut code, 2);
            retn(&mut code);
            code.lock().unwrap();

            assert_eq!(unsafe { code.run() }, 42);
        }
    }
}
