pub mod disasm {
    use std::fmt;
    use std::io::{self, Write};

    use crate::chip8::chip8::Chip8;
    use crate::opcode::opcode::{decode, Opcode, OpcodeId};

    impl fmt::Display for Opcode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.id {
                OpcodeId::Invalid => write!(f, "Invalid Opcode 0x{:04x}", self.raw),
                OpcodeId::Cls => write!(f, "CLS"),
                OpcodeId::Ret => write!(f, "RET"),
                OpcodeId::JmpNnn => write!(f, "JMP  0x{:04x}", self.nnn),
                OpcodeId::CallNnn => write!(f, "CALL 0x{:04x}", self.nnn),
                OpcodeId::SeVxKk => write!(f, "SE   V{:x}, 0x{:02x}", self.x, self.kk),
                OpcodeId::SneVxKk => write!(f, "SNE  V{:x}, 0x{:02x}", self.x, self.kk),
                OpcodeId::SeVxVy => write!(f, "SE   V{:x}, V{:x}", self.x, self.y),
                OpcodeId::LdVxKk => write!(f, "LD   V{:x}, 0x{:02x}", self.x, self.kk),
                OpcodeId::AddVxKk => write!(f, "ADD  V{:x}, 0x{:02x}", self.x, self.kk),
                OpcodeId::LdVxVy => write!(f, "LD   V{:x}, V{:x}", self.x, self.y),
                OpcodeId::OrVxVy => write!(f, "OR   V{:x}, V{:x}", self.x, self.y),
                OpcodeId::AndVxVy => write!(f, "AND  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::XorVxVy => write!(f, "XOR  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::AddVxVy => write!(f, "ADD  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::SubVxVy => write!(f, "SUB  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::ShrVxVy => write!(f, "SHR  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::SubnVxVy => write!(f, "SUBN V{:x}, V{:x}", self.x, self.y),
                OpcodeId::ShlVxVy => write!(f, "SHL  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::SneVxVy => write!(f, "SNE  V{:x}, V{:x}", self.x, self.y),
                OpcodeId::LdINnn => write!(f, "LD   I,  0x{:04x}", self.nnn),
                OpcodeId::JpV0Nnn => write!(f, "JP   V0, 0x{:04x}", self.nnn),
                OpcodeId::RndVxKk => write!(f, "RND  V{:x}, 0x{:02x}", self.x, self.kk),
                OpcodeId::DrwVxVyN => write!(f, "DRW  V{:x}, V{:x}, {}", self.x, self.y, self.n),
                OpcodeId::SkpVx => write!(f, "SKP  V{:x}", self.x),
                OpcodeId::SknpVx => write!(f, "SKNP V{:x}", self.x),
                OpcodeId::LdVxDt => write!(f, "LD   V{:x}, DT", self.x),
                OpcodeId::LdVxK => write!(f, "LD   V{:x}, K", self.x),
                OpcodeId::LdDtVx => write!(f, "LD   DT, V{:x}", self.x),
                OpcodeId::LdStVx => write!(f, "LD   ST, V{:x}", self.x),
                OpcodeId::AddIVx => write!(f, "ADD  I, V{:x}", self.x),
                OpcodeId::LdFVx => write!(f, "LD   F, V{:x}", self.x),
                OpcodeId::LdBVx => write!(f, "LD   B, V{:x}", self.x),
                OpcodeId::LdIVx => write!(f, "LD   [I], V{:x}", self.x),
                OpcodeId::LdVxI => write!(f, "LD   V{:x}, [I]", self.x),
                OpcodeId::ClsHires => write!(f, "CLS"),
                OpcodeId::ScrollDownN => write!(f, "SCD  {}", self.n),
                OpcodeId::ScrollRight => write!(f, "SCR"),
                OpcodeId::ScrollLeft => write!(f, "SCL"),
                OpcodeId::Exit => write!(f, "EXIT"),
                OpcodeId::HiresOn => write!(f, "HIGH"),
                OpcodeId::HiresOff => write!(f, "LOW"),
                OpcodeId::DrwVxVy0 => write!(f, "DRW  V{:x}, V{:x}, 0", self.x, self.y),
                OpcodeId::LdIDigit => write!(f, "LD   HF, V{:x}", self.x),
                OpcodeId::LdRplVx => write!(f, "LD   R, V{:x}", self.x),
                OpcodeId::LdVxRpl => write!(f, "LD   V{:x}, R", self.x),
                OpcodeId::ScrollUpN => write!(f, "SCU  {}", self.n),
                OpcodeId::LdIVxVy => write!(f, "LD   [I], V{:x}-V{:x}", self.x, self.y),
                OpcodeId::LdVxVyI => write!(f, "LD   V{:x}-V{:x}, [I]", self.x, self.y),
                OpcodeId::LdINnnn => write!(f, "LD   I,  long"),
                OpcodeId::DrwPlaneN => write!(f, "PLN  {}", self.x),
                OpcodeId::LdAudioI => write!(f, "LD   AUDIO, [I]"),
            }
        }
    }

    /// One trace line for the instruction at `address`: guest address, raw
    /// opcode, mnemonic.
    pub fn disassemble(state: &Chip8, address: u16) -> String {
        let op = decode(state, address);
        format!("{:04x}: 0x{:04x} {}", address, op.raw, op)
    }

    /// Dump the instructions in `[start, end)`, one line each.
    pub fn disassemble_range(
        state: &Chip8,
        start: u16,
        end: u16,
        out: &mut impl Write,
    ) -> io::Result<()> {
        // wider than u16 so a range touching the top of memory terminates
        let mut address = start as u32;
        while address < end as u32 {
            writeln!(out, "{}", disassemble(state, address as u16))?;
            address += 2;
        }
        Ok(())
    }

}
