pub mod code_buffer {
    use std::io::Error;
    use std::ptr;
    use std::slice;

    /// A fixed-capacity region of anonymous memory that is filled with
    /// machine code while writable, then flipped to read+execute and
    /// invoked as a C-ABI function.
    ///
    /// The region starts out `PROT_READ | PROT_WRITE`. After [`lock`] it is
    /// `PROT_READ | PROT_EXEC` and no further writes are accepted. The
    /// mapping lives until the buffer is dropped.
    ///
    /// [`lock`]: CodeBuffer::lock
    pub struct CodeBuffer {
        buffer: *mut u8,
        size: usize,
        len: usize,
        executable: bool,
    }

    impl CodeBuffer {
        pub fn new(size: usize) -> Result<CodeBuffer, Error> {
            let buffer = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };

            if buffer == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            Ok(CodeBuffer {
                buffer: buffer as *mut u8,
                size,
                len: 0,
                executable: false,
            })
        }

        /// Append a byte and advance the write cursor.
        pub fn push_byte(&mut self, byte: u8) {
            assert!(!self.executable, "buffer is locked");
            assert!(self.len < self.size, "code buffer overflow");

            unsafe { *self.buffer.add(self.len) = byte };
            self.len += 1;
        }

        /// Append a little-endian dword.
        pub fn push_dword(&mut self, dword: u32) {
            for byte in dword.to_le_bytes() {
                self.push_byte(byte);
            }
        }

        /// Append a little-endian qword.
        pub fn push_qword(&mut self, qword: u64) {
            for byte in qword.to_le_bytes() {
                self.push_byte(byte);
            }
        }

        /// Current write cursor. Together with [`rewind`] this lets the
        /// translator emit an instruction speculatively to measure its
        /// length, then drop it.
        ///
        /// [`rewind`]: CodeBuffer::rewind
        pub fn pos(&self) -> usize {
            self.len
        }

        /// Move the write cursor back to an earlier position.
        pub fn rewind(&mut self, pos: usize) {
            assert!(!self.executable, "buffer is locked");
            assert!(pos <= self.len);
            self.len = pos;
        }

        /// Remaining writable bytes.
        pub fn remaining(&self) -> usize {
            self.size - self.len
        }

        /// Flip the region to read+execute. The buffer is immutable from
        /// here on.
        pub fn lock(&mut self) -> Result<(), Error> {
            let result = unsafe {
                libc::mprotect(
                    self.buffer as *mut libc::c_void,
                    self.size,
                    libc::PROT_READ | libc::PROT_EXEC,
                )
            };

            if result == -1 {
                return Err(Error::last_os_error());
            }

            self.executable = true;
            Ok(())
        }

        pub fn is_executable(&self) -> bool {
            self.executable
        }

        /// Invoke the buffer as a `extern "C" fn() -> i32` and return its
        /// result.
        ///
        /// # Safety
        ///
        /// The buffer must contain a complete, valid function for the host
        /// ABI: it has to preserve callee-saved registers and end in `ret`.
        /// The caller is responsible for whatever memory the generated code
        /// dereferences.
        pub unsafe fn run(&self) -> i32 {
            assert!(self.executable, "buffer is not locked");

            let f: unsafe extern "C" fn() -> i32 = unsafe { std::mem::transmute(self.buffer) };
            unsafe { f() }
        }

        /// The emitted bytes, for logging and tests.
        pub fn as_bytes(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.buffer, self.len) }
        }
    }

    impl Drop for CodeBuffer {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.buffer as *mut libc::c_void, self.size);
            }
        }
    }

}
