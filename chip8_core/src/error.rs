pub mod error {
    use thiserror::Error;

    /// Closed error taxonomy shared by both back-ends.
    ///
    /// Each variant has a stable negative code because recompiled blocks
    /// return their status as a raw `i32` in EAX; 0 means success. The
    /// driver recovers locally from [`Chip8Error::OpcodeNotSupported`] by
    /// falling back to the interpreter, and treats [`Chip8Error::Exit`] as
    /// a clean guest-requested shutdown. Everything else is fatal to the
    /// run.
    #[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
    pub enum Chip8Error {
        #[error("ROM file could not be read")]
        RomNotFound,

        #[error("ROM does not fit in guest memory")]
        RomTooLong,

        #[error("opcode matches no known instruction for this variant")]
        OpcodeInvalid,

        #[error("opcode is recognized but not supported by this back-end")]
        OpcodeNotSupported,

        #[error("RET executed with an empty call stack")]
        CallStackEmpty,

        #[error("CALL executed with a full call stack")]
        CallStackFull,

        #[error("guest requested shutdown")]
        Exit,
    }

    impl Chip8Error {
        /// Code returned by generated code for a successful block exit.
        pub const OK: i32 = 0;

        /// The `i32` this error is encoded as at the generated-code
        /// boundary.
        pub fn code(self) -> i32 {
            match self {
                Chip8Error::RomNotFound => -1,
                Chip8Error::RomTooLong => -2,
                Chip8Error::OpcodeInvalid => -3,
                Chip8Error::OpcodeNotSupported => -4,
                Chip8Error::CallStackEmpty => -5,
                Chip8Error::CallStackFull => -6,
                Chip8Error::Exit => -7,
            }
        }

        /// Decode the return value of a recompiled block. Generated code
        /// only ever produces codes from this taxonomy; anything else is
        /// reported as an invalid opcode.
        pub fn from_code(code: i32) -> Result<(), Chip8Error> {
            match code {
                0 => Ok(()),
                -1 => Err(Chip8Error::RomNotFound),
                -2 => Err(Chip8Error::RomTooLong),
                -3 => Err(Chip8Error::OpcodeInvalid),
                -4 => Err(Chip8Error::OpcodeNotSupported),
                -5 => Err(Chip8Error::CallStackEmpty),
                -6 => Err(Chip8Error::CallStackFull),
                -7 => Err(Chip8Error::Exit),
                _ => Err(Chip8Error::OpcodeInvalid),
            }
        }
    }

}
