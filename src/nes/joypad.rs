use serde::{Deserialize, Serialize};

/// Upper bits seen on controller reads (open bus on a stock console).
pub const OPEN_BUS_BITS: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    /// Bit position in the report shifted out at 0x4016/0x4017.
    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

/// Standard controller: an 8-bit parallel-in, serial-out shift register.
#[derive(Debug, Clone, Default)]
pub struct Joypad {
    buttons: u8,
    shift: u8,
    strobe: bool,
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
        if self.strobe {
            self.shift = buttons;
        }
    }

    pub fn press(&mut self, button: Button) {
        self.set_buttons(self.buttons | button.mask());
    }

    pub fn release(&mut self, button: Button) {
        self.set_buttons(self.buttons & !button.mask());
    }

    pub fn write_strobe(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        if self.strobe {
            self.shift = self.buttons;
        }
    }

    /// Bit 0 of the next read without shifting.
    pub fn peek(&self) -> u8 {
        let bit = if self.strobe {
            self.buttons & 0x01
        } else {
            self.shift & 0x01
        };
        OPEN_BUS_BITS | bit
    }

    pub fn read(&mut self) -> u8 {
        let value = self.peek();
        if !self.strobe {
            // Ones shift in behind the report, so reads past the eighth return 1.
            self.shift = (self.shift >> 1) | 0x80;
        }
        value
    }
}
