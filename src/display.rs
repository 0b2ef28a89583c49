pub mod display {
    use minifb::{Key, Window, WindowOptions};

    use chip8_core::chip8::chip8::Chip8;

    const FOREGROUND: u32 = 0xFEE715;
    const BACKGROUND: u32 = 0x101820;

    /// Window pixels per guest pixel.
    pub const SCALE: usize = 8;

    // 1234/QWER/ASDF/ZXCV rows mapped onto the 4x4 CHIP-8 pad.
    const KEY_MAP: [(Key, usize); 16] = [
        (Key::Key1, 0x1),
        (Key::Key2, 0x2),
        (Key::Key3, 0x3),
        (Key::Key4, 0xC),
        (Key::Q, 0x4),
        (Key::W, 0x5),
        (Key::E, 0x6),
        (Key::R, 0xD),
        (Key::A, 0x7),
        (Key::S, 0x8),
        (Key::D, 0x9),
        (Key::F, 0xE),
        (Key::Z, 0xA),
        (Key::X, 0x0),
        (Key::C, 0xB),
        (Key::V, 0xF),
    ];

    /// The windowed display and keyboard collaborator. It presents the
    /// guest framebuffer when the core marks it dirty and mirrors host
    /// key states into the guest keypad.
    pub struct DisplayWindow {
        window: Window,
        buf: Vec<u32>,
        width: usize,
        height: usize,
    }

    impl DisplayWindow {
        pub fn new(state: &Chip8) -> Result<DisplayWindow, minifb::Error> {
            let width = state.display_width as usize * SCALE;
            let height = state.display_height as usize * SCALE;

            let mut window = Window::new("Chip8", width, height, WindowOptions::default())?;

            let buf = vec![BACKGROUND; width * height];
            window.update_with_buffer(&buf, width, height)?;

            Ok(DisplayWindow {
                window,
                buf,
                width,
                height,
            })
        }

        pub fn is_open(&self) -> bool {
            self.window.is_open() && !self.window.is_key_down(Key::Escape)
        }

        /// Pump window events and mirror the pad keys into the guest.
        pub fn poll_keys(&mut self, state: &mut Chip8) {
            let _ = self.window.update();

            for (key, pad) in KEY_MAP {
                state.keyboard[pad] = self.window.is_key_down(key);
            }
        }

        /// Nearest-neighbour upscale of the guest framebuffer into the
        /// window, then clear the dirty flag.
        pub fn present(&mut self, state: &mut Chip8) -> Result<(), minifb::Error> {
            let guest_width = state.display_width as usize;

            for (i, pixel) in self.buf.iter_mut().enumerate() {
                let x = i % self.width / SCALE;
                let y = i / self.width / SCALE;
                *pixel = if state.display[y * guest_width + x] {
                    FOREGROUND
                } else {
                    BACKGROUND
                };
            }

            self.window.update_with_buffer(&self.buf, self.width, self.height)?;
            state.display_dirty = false;
            Ok(())
        }
    }
}
