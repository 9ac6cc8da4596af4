use serde::{Deserialize, Serialize};

/// 2C02 master palette as RGB triples.
pub const NES_PALETTE: [[u8; 3]; 64] = [
    [0x66, 0x66, 0x66], [0x00, 0x2A, 0x88], [0x14, 0x12, 0xA7], [0x3B, 0x00, 0xA4],
    [0x5C, 0x00, 0x7E], [0x6E, 0x00, 0x40], [0x6C, 0x06, 0x00], [0x56, 0x1D, 0x00],
    [0x33, 0x35, 0x00], [0x0B, 0x48, 0x00], [0x00, 0x52, 0x00], [0x00, 0x4F, 0x08],
    [0x00, 0x40, 0x4D], [0x00, 0x00, 0x00], [0x00, 0x00, 0x00], [0x00, 0x00, 0x00],
    [0xAD, 0xAD, 0xAD], [0x15, 0x5F, 0xD9], [0x42, 0x40, 0xFF], [0x75, 0x27, 0xFE],
    [0xA0, 0x1A, 0xCC], [0xB7, 0x1E, 0x7B], [0xB5, 0x31, 0x20], [0x99, 0x4E, 0x00],
    [0x6B, 0x6D, 0x00], [0x38, 0x87, 0x00], [0x0C, 0x93, 0x00], [0x00, 0x8F, 0x32],
    [0x00, 0x7C, 0x8D], [0x00, 0x00, 0x00], [0x00, 0x00, 0x00], [0x00, 0x00, 0x00],
    [0xFF, 0xFE, 0xFF], [0x64, 0xB0, 0xFF], [0x92, 0x90, 0xFF], [0xC6, 0x76, 0xFF],
    [0xF3, 0x6A, 0xFF], [0xFE, 0x6E, 0xCC], [0xFE, 0x81, 0x70], [0xEA, 0x9E, 0x22],
    [0xBC, 0xBE, 0x00], [0x88, 0xD8, 0x00], [0x5C, 0xE4, 0x30], [0x45, 0xE0, 0x82],
    [0x48, 0xCD, 0xDE], [0x4F, 0x4F, 0x4F], [0x00, 0x00, 0x00], [0x00, 0x00, 0x00],
    [0xFF, 0xFE, 0xFF], [0xC0, 0xDF, 0xFF], [0xD3, 0xD2, 0xFF], [0xE8, 0xC8, 0xFF],
    [0xFB, 0xC2, 0xFF], [0xFE, 0xC4, 0xEA], [0xFE, 0xCC, 0xC5], [0xF7, 0xD8, 0xA5],
    [0xE4, 0xE5, 0x94], [0xCF, 0xEF, 0x96], [0xBD, 0xF4, 0xAB], [0xB3, 0xF3, 0xCC],
    [0xB5, 0xEB, 0xF2], [0xB8, 0xB8, 0xB8], [0x00, 0x00, 0x00], [0x00, 0x00, 0x00],
];

/// Byte order of the packed `u32` pixels handed to video sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Argb,
    Abgr,
}

impl PixelFormat {
    pub fn pack(self, [r, g, b]: [u8; 3]) -> u32 {
        let (r, g, b) = (r as u32, g as u32, b as u32);
        match self {
            PixelFormat::Rgba => (r << 24) | (g << 16) | (b << 8) | 0xFF,
            PixelFormat::Bgra => (b << 24) | (g << 16) | (r << 8) | 0xFF,
            PixelFormat::Argb => 0xFF00_0000 | (r << 16) | (g << 8) | b,
            PixelFormat::Abgr => 0xFF00_0000 | (b << 16) | (g << 8) | r,
        }
    }

    pub fn unpack(self, pixel: u32) -> [u8; 3] {
        let byte = |shift: u32| (pixel >> shift) as u8;
        match self {
            PixelFormat::Rgba => [byte(24), byte(16), byte(8)],
            PixelFormat::Bgra => [byte(8), byte(16), byte(24)],
            PixelFormat::Argb => [byte(16), byte(8), byte(0)],
            PixelFormat::Abgr => [byte(0), byte(8), byte(16)],
        }
    }
}

/// Applies PPUMASK emphasis bits (red, green, blue in bits 0-2 of
/// `emphasis`) by dimming the channels that are not emphasised.
pub fn emphasize([r, g, b]: [u8; 3], emphasis: u8) -> [u8; 3] {
    if emphasis == 0 {
        return [r, g, b];
    }
    let dim = |channel: u8, bit: u8| {
        if (emphasis & bit) != 0 {
            channel
        } else {
            ((channel as u16 * 3) / 4) as u8
        }
    };
    [dim(r, 0x01), dim(g, 0x02), dim(b, 0x04)]
}

/// Packed colours for every (emphasis, palette index) pair.
#[derive(Debug, Clone)]
pub struct ColorTable {
    colors: Box<[[u32; 64]; 8]>,
}

impl ColorTable {
    pub fn new(format: PixelFormat) -> Self {
        let mut colors = Box::new([[0u32; 64]; 8]);
        for (emphasis, row) in colors.iter_mut().enumerate() {
            for (index, color) in row.iter_mut().enumerate() {
                *color = format.pack(emphasize(NES_PALETTE[index], emphasis as u8));
            }
        }
        Self { colors }
    }

    pub fn color(&self, emphasis: u8, index: u8) -> u32 {
        self.colors[(emphasis & 0x07) as usize][(index & 0x3F) as usize]
    }
}
