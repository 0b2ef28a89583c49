pub mod interpreter {
    use rand::Rng;
    use tracing::trace;

    use crate::chip8::chip8::Chip8;
    use crate::disasm::disasm;
    use crate::error::error::Chip8Error;
    use crate::opcode::opcode::{decode, Opcode, OpcodeId};

    /// Decode and execute the instruction at PC, then retire one cycle.
    ///
    /// Every error leaves PC pointing at the faulty instruction so the
    /// caller can inspect or retry it. Fx0A "blocks" the same way: PC is
    /// left unchanged until a key is down, so the instruction re-executes
    /// on the next step.
    pub fn step(state: &mut Chip8) -> Result<(), Chip8Error> {
        trace!("{}", disasm::disassemble(state, state.PC));

        let op = decode(state, state.PC);
        exec(state, &op)?;

        state.cycles_since_started += 1;
        Ok(())
    }

    fn exec(state: &mut Chip8, op: &Opcode) -> Result<(), Chip8Error> {
        let x = op.x as usize;
        let y = op.y as usize;

        match op.id {
            OpcodeId::Cls | OpcodeId::ClsHires => {
                state.display.fill(false);
                state.display_dirty = true;
                state.PC += 2;
            }
            OpcodeId::Ret => {
                if state.SP == 0 {
                    return Err(Chip8Error::CallStackEmpty);
                }
                state.SP -= 1;
                state.PC = state.stack[state.SP as usize] + 2;
            }
            OpcodeId::JmpNnn => {
                state.PC = op.nnn;
            }
            OpcodeId::CallNnn => {
                if state.SP == 16 {
                    return Err(Chip8Error::CallStackFull);
                }
                state.stack[state.SP as usize] = state.PC;
                state.SP += 1;
                state.PC = op.nnn;
            }
            OpcodeId::SeVxKk => {
                state.PC += if state.V[x] == op.kk { 4 } else { 2 };
            }
            OpcodeId::SneVxKk => {
                state.PC += if state.V[x] != op.kk { 4 } else { 2 };
            }
            OpcodeId::SeVxVy => {
                state.PC += if state.V[x] == state.V[y] { 4 } else { 2 };
            }
            OpcodeId::LdVxKk => {
                state.V[x] = op.kk;
                state.PC += 2;
            }
            OpcodeId::AddVxKk => {
                // 7xkk never touches VF.
                state.V[x] = state.V[x].wrapping_add(op.kk);
                state.PC += 2;
            }
            OpcodeId::LdVxVy => {
                state.V[x] = state.V[y];
                state.PC += 2;
            }
            OpcodeId::OrVxVy => {
                state.V[x] |= state.V[y];
                state.PC += 2;
            }
            OpcodeId::AndVxVy => {
                state.V[x] &= state.V[y];
                state.PC += 2;
            }
            OpcodeId::XorVxVy => {
                state.V[x] ^= state.V[y];
                state.PC += 2;
            }
            OpcodeId::AddVxVy => {
                state.V[0xF] = (state.V[x] as u16 + state.V[y] as u16 > 0xFF) as u8;
                state.V[x] = state.V[x].wrapping_add(state.V[y]);
                state.PC += 2;
            }
            OpcodeId::SubVxVy => {
                state.V[0xF] = (state.V[x] > state.V[y]) as u8;
                state.V[x] = state.V[x].wrapping_sub(state.V[y]);
                state.PC += 2;
            }
            OpcodeId::ShrVxVy => {
                state.V[0xF] = state.V[x] & 0x1;
                state.V[x] >>= 1;
                state.PC += 2;
            }
            OpcodeId::SubnVxVy => {
                state.V[0xF] = (state.V[y] > state.V[x]) as u8;
                state.V[x] = state.V[y].wrapping_sub(state.V[x]);
                state.PC += 2;
            }
            OpcodeId::ShlVxVy => {
                state.V[0xF] = state.V[x] >> 7;
                state.V[x] <<= 1;
                state.PC += 2;
            }
            OpcodeId::SneVxVy => {
                state.PC += if state.V[x] != state.V[y] { 4 } else { 2 };
            }
            OpcodeId::LdINnn => {
                state.I = op.nnn;
                state.PC += 2;
            }
            OpcodeId::JpV0Nnn => {
                state.PC = op.nnn + state.V[0] as u16;
            }
            OpcodeId::RndVxKk => {
                let mut rng = rand::rng();
                let random_value: u8 = rng.random();
                state.V[x] = random_value & op.kk;
                state.PC += 2;
            }
            OpcodeId::DrwVxVyN => {
                exec_draw(state, op);
                state.PC += 2;
            }
            OpcodeId::SkpVx => {
                let key = (state.V[x] & 0xF) as usize;
                state.PC += if state.keyboard[key] { 4 } else { 2 };
            }
            OpcodeId::SknpVx => {
                let key = (state.V[x] & 0xF) as usize;
                state.PC += if state.keyboard[key] { 2 } else { 4 };
            }
            OpcodeId::LdVxDt => {
                state.V[x] = state.DT;
                state.PC += 2;
            }
            OpcodeId::LdVxK => {
                if let Some(key) = (0..16).find(|&k| state.keyboard[k]) {
                    state.V[x] = key as u8;
                    state.PC += 2;
                }
            }
            OpcodeId::LdDtVx => {
                state.DT = state.V[x];
                state.PC += 2;
            }
            OpcodeId::LdStVx => {
                state.ST = state.V[x];
                state.PC += 2;
            }
            OpcodeId::AddIVx => {
                state.I = state.I.wrapping_add(state.V[x] as u16);
                state.PC += 2;
            }
            OpcodeId::LdFVx => {
                state.I = 5 * state.V[x] as u16;
                state.PC += 2;
            }
            OpcodeId::LdBVx => {
                let value = state.V[x];
                state.memory[state.I as usize] = value / 100;
                state.memory[state.I.wrapping_add(1) as usize] = value % 100 / 10;
                state.memory[state.I.wrapping_add(2) as usize] = value % 10;
                state.PC += 2;
            }
            OpcodeId::LdIVx => {
                for reg in 0..=x {
                    state.memory[state.I.wrapping_add(reg as u16) as usize] = state.V[reg];
                }
                state.I = state.I.wrapping_add(op.x as u16 + 1);
                state.PC += 2;
            }
            OpcodeId::LdVxI => {
                for reg in 0..=x {
                    state.V[reg] = state.memory[state.I.wrapping_add(reg as u16) as usize];
                }
                state.I = state.I.wrapping_add(op.x as u16 + 1);
                state.PC += 2;
            }
            OpcodeId::Exit => {
                return Err(Chip8Error::Exit);
            }
            OpcodeId::Invalid => {
                return Err(Chip8Error::OpcodeInvalid);
            }
            // Recognized extensions whose execution is not implemented.
            OpcodeId::ScrollDownN
            | OpcodeId::ScrollRight
            | OpcodeId::ScrollLeft
            | OpcodeId::HiresOn
            | OpcodeId::HiresOff
            | OpcodeId::DrwVxVy0
            | OpcodeId::LdIDigit
            | OpcodeId::LdRplVx
            | OpcodeId::LdVxRpl
            | OpcodeId::ScrollUpN
            | OpcodeId::LdIVxVy
            | OpcodeId::LdVxVyI
            | OpcodeId::LdINnnn
            | OpcodeId::DrwPlaneN
            | OpcodeId::LdAudioI => {
                return Err(Chip8Error::OpcodeNotSupported);
            }
        }

        Ok(())
    }

    /// XOR `n` sprite rows of 8 pixels from memory[I..] at (Vx, Vy).
    /// Coordinates wrap modulo the display dimensions. VF reports whether
    /// any lit pixel was cleared.
    fn exec_draw(state: &mut Chip8, op: &Opcode) {
        let x0 = state.V[op.x as usize] as u32;
        let y0 = state.V[op.y as usize] as u32;

        state.V[0xF] = 0;
        for row in 0..op.n as u32 {
            let bits = state.memory[state.I.wrapping_add(row as u16) as usize];

            for col in 0..8u32 {
                let position = ((y0 + row) % state.display_height * state.display_width
                    + (x0 + col) % state.display_width) as usize;
                let new_pixel = (bits >> (7 - col)) & 1 == 1;

                state.V[0xF] |= (new_pixel && state.display[position]) as u8;
                state.display[position] ^= new_pixel;
            }
        }

        state.display_dirty = true;
    }
}
