//! Scanline renderer: fetches one line of background tiles and sprite
//! patterns through the PPU bus, then composes them into packed pixels.

use super::memory::Memory;
use super::palette::ColorTable;
use super::ppu::{FRAME_WIDTH, PALETTE_SIZE, PpuRegisters, STATUS_SPRITE_OVERFLOW, STATUS_SPRITE_ZERO_HIT};

const TILES_PER_LINE: usize = 33;
const MAX_SPRITES_PER_LINE: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct SpritePixel {
    /// Palette RAM index (0x10-0x1F), 0 when transparent.
    color: u8,
    behind_background: bool,
    sprite_zero: bool,
}

pub struct Renderer {
    /// Background palette indices for 33 tiles; entry 0 is transparent.
    background: [u8; TILES_PER_LINE * 8],
    sprites: [SpritePixel; FRAME_WIDTH],
    line: [u32; FRAME_WIDTH],
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            background: [0; TILES_PER_LINE * 8],
            sprites: [SpritePixel::default(); FRAME_WIDTH],
            line: [0; FRAME_WIDTH],
        }
    }

    pub fn line(&self) -> &[u32; FRAME_WIDTH] {
        &self.line
    }

    /// Walks 33 tiles starting at `v`, leaving coarse X advanced past them.
    pub fn fetch_background<M: Memory + ?Sized>(&mut self, mem: &mut M, regs: &mut PpuRegisters) {
        let table = regs.background_table();
        for tile in 0..TILES_PER_LINE {
            let v = regs.v;
            let name = mem.get(0x2000 | (v & 0x0FFF)) as u16;
            let attribute = mem.get(0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07));
            let shift = ((v >> 4) & 0x04) | (v & 0x02);
            let palette = (attribute >> shift) & 0x03;

            let fine_y = (v >> 12) & 0x07;
            let addr = table | (name << 4) | fine_y;
            let low = mem.get(addr);
            let high = mem.get(addr + 8);

            for bit in 0..8 {
                let pixel = ((low >> (7 - bit)) & 0x01) | (((high >> (7 - bit)) & 0x01) << 1);
                self.background[tile * 8 + bit] = if pixel == 0 {
                    0
                } else {
                    (palette << 2) | pixel
                };
            }
            regs.increment_coarse_x();
        }
    }

    /// Evaluates OAM for `line` and fetches the patterns of up to eight
    /// sprites. Unused slots still fetch tile 0xFF so mappers see the same
    /// address pattern. `None` is the pre-render line, which only fetches.
    pub fn fetch_sprites<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        regs: &mut PpuRegisters,
        oam: &[u8; 256],
        line: Option<u16>,
    ) {
        self.sprites = [SpritePixel::default(); FRAME_WIDTH];
        let height = regs.sprite_height();

        let mut found = [0usize; MAX_SPRITES_PER_LINE];
        let mut count = 0;
        if let Some(line) = line {
            for index in 0..64 {
                let y = oam[index * 4] as u16;
                if line < y + 1 || line >= y + 1 + height {
                    continue;
                }
                if count == MAX_SPRITES_PER_LINE {
                    regs.status |= STATUS_SPRITE_OVERFLOW;
                    break;
                }
                found[count] = index;
                count += 1;
            }
        }

        for slot in 0..MAX_SPRITES_PER_LINE {
            if slot >= count {
                let addr = if height == 16 {
                    0x1000 | (0xFE << 4)
                } else {
                    regs.sprite_table() | (0xFF << 4)
                };
                mem.get(addr);
                mem.get(addr + 8);
                continue;
            }

            let index = found[slot];
            let entry = &oam[index * 4..index * 4 + 4];
            let (y, tile, attributes, x) = (entry[0] as u16, entry[1] as u16, entry[2], entry[3]);
            let flip_h = (attributes & 0x40) != 0;
            let flip_v = (attributes & 0x80) != 0;

            // `line` is Some whenever count > 0.
            let mut row = line.unwrap_or(0) - (y + 1);
            if flip_v {
                row = height - 1 - row;
            }
            let addr = if height == 16 {
                let table = (tile & 0x01) * 0x1000;
                let mut tile = tile & 0xFE;
                if row >= 8 {
                    tile += 1;
                    row -= 8;
                }
                table | (tile << 4) | row
            } else {
                regs.sprite_table() | (tile << 4) | row
            };
            let low = mem.get(addr);
            let high = mem.get(addr + 8);

            for bit in 0..8u16 {
                let px = x as usize + bit as usize;
                if px >= FRAME_WIDTH {
                    break;
                }
                let shift = if flip_h { bit } else { 7 - bit };
                let pixel = ((low >> shift) & 0x01) | (((high >> shift) & 0x01) << 1);
                // Lower OAM index wins among overlapping sprites.
                if pixel == 0 || self.sprites[px].color != 0 {
                    continue;
                }
                self.sprites[px] = SpritePixel {
                    color: 0x10 | ((attributes & 0x03) << 2) | pixel,
                    behind_background: (attributes & 0x20) != 0,
                    sprite_zero: index == 0,
                };
            }
        }
    }

    /// Mixes the fetched layers into packed pixels, setting the sprite-zero
    /// hit flag along the way.
    pub fn compose(
        &mut self,
        regs: &mut PpuRegisters,
        palette: &[u8; PALETTE_SIZE],
        colors: &ColorTable,
    ) {
        let fine_x = regs.fine_x as usize;
        let emphasis = regs.emphasis();
        let grey_mask = if regs.greyscale() { 0x30 } else { 0x3F };

        for x in 0..FRAME_WIDTH {
            let background = if regs.show_background(x) {
                self.background[x + fine_x]
            } else {
                0
            };
            let sprite = if regs.show_sprites(x) {
                self.sprites[x]
            } else {
                SpritePixel::default()
            };

            if sprite.sprite_zero && sprite.color != 0 && background != 0 && x != 255 {
                regs.status |= STATUS_SPRITE_ZERO_HIT;
            }

            let index = if sprite.color != 0 && (background == 0 || !sprite.behind_background) {
                sprite.color
            } else {
                background
            };
            let entry = palette[index as usize] & grey_mask;
            self.line[x] = colors.color(emphasis, entry);
        }
    }

    /// Output while both layers are disabled: the backdrop colour.
    pub fn blank(&mut self, regs: &PpuRegisters, palette: &[u8; PALETTE_SIZE], colors: &ColorTable) {
        let grey_mask = if regs.greyscale() { 0x30 } else { 0x3F };
        let color = colors.color(regs.emphasis(), palette[0] & grey_mask);
        self.line.fill(color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::palette::PixelFormat;
    use crate::nes::ppu::{MASK_SHOW_BG, MASK_SHOW_BG_LEFT, MASK_SHOW_SPRITE_LEFT, MASK_SHOW_SPRITES};

    /// Flat 16 KiB PPU address space that records every fetch.
    struct FlatMemory {
        bytes: Vec<u8>,
        fetches: Vec<u16>,
    }

    impl FlatMemory {
        fn new() -> Self {
            Self {
                bytes: vec![0; 0x4000],
                fetches: Vec::new(),
            }
        }
    }

    impl Memory for FlatMemory {
        fn get(&mut self, addr: u16) -> u8 {
            self.fetches.push(addr);
            self.bytes[addr as usize & 0x3FFF]
        }

        fn set(&mut self, addr: u16, value: u8) {
            self.bytes[addr as usize & 0x3FFF] = value;
        }

        fn peek(&self, addr: u16) -> u8 {
            self.bytes[addr as usize & 0x3FFF]
        }
    }

    fn palette() -> [u8; PALETTE_SIZE] {
        let mut palette = [0u8; PALETTE_SIZE];
        for (i, entry) in palette.iter_mut().enumerate() {
            *entry = i as u8;
        }
        palette
    }

    fn all_on() -> PpuRegisters {
        PpuRegisters {
            mask: MASK_SHOW_BG | MASK_SHOW_SPRITES | MASK_SHOW_BG_LEFT | MASK_SHOW_SPRITE_LEFT,
            ..PpuRegisters::default()
        }
    }

    #[test]
    fn background_uses_attribute_quadrant_and_fine_x() {
        let mut mem = FlatMemory::new();
        // Tile 1 is solid colour 3 on its first row.
        mem.bytes[0x0010] = 0xFF;
        mem.bytes[0x0018] = 0xFF;
        // Nametable column 2 uses tile 1; its attribute quadrant selects palette 2.
        mem.bytes[0x2002] = 0x01;
        mem.bytes[0x23C0] = 0x02 << 2;

        let mut regs = all_on();
        regs.fine_x = 3;
        let mut renderer = Renderer::new();
        renderer.fetch_background(&mut mem, &mut regs);
        assert_eq!(regs.v & 0x1F, 1);
        assert_eq!(regs.v & 0x0400, 0x0400);

        let colors = ColorTable::new(PixelFormat::Argb);
        renderer.compose(&mut regs, &palette(), &colors);
        // Tile 2 covers pixels 16-23, shifted left by fine X.
        assert_eq!(renderer.line()[12], colors.color(0, 0));
        assert_eq!(renderer.line()[13], colors.color(0, 0x0B));
        assert_eq!(renderer.line()[20], colors.color(0, 0x0B));
        assert_eq!(renderer.line()[21], colors.color(0, 0));
    }

    #[test]
    fn sprites_respect_priority_and_flip() {
        let mut mem = FlatMemory::new();
        // Tile 2 row 0: only the leftmost pixel is set (colour 1).
        mem.bytes[0x0020] = 0x80;
        let mut oam = [0xFFu8; 256];
        // Sprite 1 at x=40 on line 10, flipped horizontally, palette 1.
        oam[4..8].copy_from_slice(&[9, 2, 0x41, 40]);

        let mut regs = all_on();
        let mut renderer = Renderer::new();
        renderer.fetch_background(&mut mem, &mut regs);
        renderer.fetch_sprites(&mut mem, &mut regs, &oam, Some(10));

        let colors = ColorTable::new(PixelFormat::Argb);
        renderer.compose(&mut regs, &palette(), &colors);
        assert_eq!(renderer.line()[47], colors.color(0, 0x15));
        assert_eq!(renderer.line()[40], colors.color(0, 0));
        assert_eq!(regs.status & STATUS_SPRITE_ZERO_HIT, 0);
    }

    #[test]
    fn sprite_zero_hit_needs_opaque_background() {
        let mut mem = FlatMemory::new();
        mem.bytes[0x0010] = 0xFF;
        mem.bytes[0x2000..0x2020].fill(0x01);
        let mut oam = [0xFFu8; 256];
        oam[0..4].copy_from_slice(&[0, 1, 0x20, 100]);

        let mut regs = all_on();
        let mut renderer = Renderer::new();
        renderer.fetch_background(&mut mem, &mut regs);
        renderer.fetch_sprites(&mut mem, &mut regs, &oam, Some(1));
        let colors = ColorTable::new(PixelFormat::Argb);
        renderer.compose(&mut regs, &palette(), &colors);

        assert_ne!(regs.status & STATUS_SPRITE_ZERO_HIT, 0);
        // Behind-background sprite loses to an opaque background pixel.
        assert_eq!(renderer.line()[100], colors.color(0, 0x01));
    }

    #[test]
    fn ninth_sprite_sets_overflow_and_empty_slots_fetch_tile_ff() {
        let mut mem = FlatMemory::new();
        let mut oam = [0xFFu8; 256];
        for sprite in 0..9 {
            oam[sprite * 4] = 20;
            oam[sprite * 4 + 3] = (sprite * 10) as u8;
        }
        let mut regs = all_on();
        let mut renderer = Renderer::new();
        renderer.fetch_sprites(&mut mem, &mut regs, &oam, Some(21));
        assert_ne!(regs.status & STATUS_SPRITE_OVERFLOW, 0);

        let mut regs = all_on();
        mem.fetches.clear();
        renderer.fetch_sprites(&mut mem, &mut regs, &[0xFF; 256], Some(21));
        assert_eq!(regs.status & STATUS_SPRITE_OVERFLOW, 0);
        assert_eq!(mem.fetches.len(), 16);
        assert!(mem.fetches.iter().all(|&addr| addr & 0x0FF0 == 0x0FF0));
    }

    #[test]
    fn tall_sprites_pick_table_from_tile_bit() {
        let mut mem = FlatMemory::new();
        // Bottom half of the 8x16 pair (tiles 4/5 in the 0x1000 table), row 2.
        mem.bytes[0x1052] = 0x01;
        let mut oam = [0xFFu8; 256];
        oam[0..4].copy_from_slice(&[0, 0x05, 0x00, 0]);

        let mut regs = all_on();
        regs.ctrl = 0x20;
        let mut renderer = Renderer::new();
        renderer.fetch_sprites(&mut mem, &mut regs, &oam, Some(11));
        let colors = ColorTable::new(PixelFormat::Argb);
        renderer.compose(&mut regs, &palette(), &colors);
        assert_eq!(renderer.line()[7], colors.color(0, 0x11));
    }

    #[test]
    fn left_column_clip_hides_background() {
        let mut mem = FlatMemory::new();
        mem.bytes[0x0010] = 0xFF;
        mem.bytes[0x2000..0x2020].fill(0x01);
        let mut regs = PpuRegisters {
            mask: MASK_SHOW_BG,
            ..PpuRegisters::default()
        };
        let mut renderer = Renderer::new();
        renderer.fetch_background(&mut mem, &mut regs);
        let colors = ColorTable::new(PixelFormat::Argb);
        renderer.compose(&mut regs, &palette(), &colors);
        assert_eq!(renderer.line()[7], colors.color(0, 0));
        assert_eq!(renderer.line()[8], colors.color(0, 0x01));
    }

    #[test]
    fn greyscale_and_blank_use_backdrop() {
        let mut regs = PpuRegisters {
            mask: 0x01 | 0x20,
            ..PpuRegisters::default()
        };
        let mut palette = palette();
        palette[0] = 0x16;
        let colors = ColorTable::new(PixelFormat::Argb);
        let mut renderer = Renderer::new();
        renderer.blank(&regs, &palette, &colors);
        assert!(renderer.line().iter().all(|&c| c == colors.color(1, 0x10)));

        regs.mask = 0;
        renderer.blank(&regs, &palette, &colors);
        assert_eq!(renderer.line()[0], colors.color(0, 0x16));
    }
}
