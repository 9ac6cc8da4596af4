use serde::{Deserialize, Serialize};

use super::config::Region;
use super::mapper::{Mapper, mirror_vram_addr};
use super::memory::Memory;
use super::palette::{ColorTable, PixelFormat};
use super::renderer::Renderer;

pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 240;
pub const DOTS_PER_SCANLINE: u16 = 341;
pub const VRAM_SIZE: usize = 0x1000;
pub const PALETTE_SIZE: usize = 0x20;
pub const OAM_SIZE: usize = 0x100;

pub const CTRL_NAMETABLE: u8 = 0x03;
pub const CTRL_VRAM_INC_32: u8 = 0x04;
pub const CTRL_SPRITE_TABLE: u8 = 0x08;
pub const CTRL_BG_TABLE: u8 = 0x10;
pub const CTRL_SPRITE_SIZE_16: u8 = 0x20;
pub const CTRL_NMI_ENABLE: u8 = 0x80;

pub const MASK_GREYSCALE: u8 = 0x01;
pub const MASK_SHOW_BG_LEFT: u8 = 0x02;
pub const MASK_SHOW_SPRITE_LEFT: u8 = 0x04;
pub const MASK_SHOW_BG: u8 = 0x08;
pub const MASK_SHOW_SPRITES: u8 = 0x10;

pub const STATUS_SPRITE_OVERFLOW: u8 = 0x20;
pub const STATUS_SPRITE_ZERO_HIT: u8 = 0x40;
pub const STATUS_VBLANK: u8 = 0x80;

const VBLANK_LINE: u16 = 241;

/// The CPU-visible registers plus the internal scroll latches
/// (`v`, `t`, fine X and the shared write toggle `w`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuRegisters {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub v: u16,
    pub t: u16,
    pub fine_x: u8,
    pub w: bool,
    pub read_buffer: u8,
    pub open_bus: u8,
}

impl PpuRegisters {
    pub fn rendering_enabled(&self) -> bool {
        (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES)) != 0
    }

    pub fn show_background(&self, x: usize) -> bool {
        (self.mask & MASK_SHOW_BG) != 0 && (x >= 8 || (self.mask & MASK_SHOW_BG_LEFT) != 0)
    }

    pub fn show_sprites(&self, x: usize) -> bool {
        (self.mask & MASK_SHOW_SPRITES) != 0
            && (x >= 8 || (self.mask & MASK_SHOW_SPRITE_LEFT) != 0)
    }

    pub fn background_table(&self) -> u16 {
        if (self.ctrl & CTRL_BG_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    pub fn sprite_table(&self) -> u16 {
        if (self.ctrl & CTRL_SPRITE_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    pub fn sprite_height(&self) -> u16 {
        if (self.ctrl & CTRL_SPRITE_SIZE_16) != 0 {
            16
        } else {
            8
        }
    }

    pub fn greyscale(&self) -> bool {
        (self.mask & MASK_GREYSCALE) != 0
    }

    /// Emphasis bits as (red, green, blue) in bits 0-2.
    pub fn emphasis(&self) -> u8 {
        self.mask >> 5
    }

    pub fn nmi_line(&self) -> bool {
        (self.status & STATUS_VBLANK) != 0 && (self.ctrl & CTRL_NMI_ENABLE) != 0
    }

    fn vram_increment(&self) -> u16 {
        if (self.ctrl & CTRL_VRAM_INC_32) != 0 {
            32
        } else {
            1
        }
    }

    pub fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v = self.v.wrapping_add(1);
        }
    }

    pub fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v = self.v.wrapping_add(0x1000);
            return;
        }

        self.v &= !0x7000;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            y = 0;
        } else {
            y += 1;
        }
        self.v = (self.v & !0x03E0) | (y << 5);
    }

    pub fn copy_horizontal_bits(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    pub fn copy_vertical_bits(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }
}

fn palette_index(addr: u16) -> usize {
    let mut index = (addr as usize) & 0x1F;
    if index >= 16 && (index & 0x03) == 0 {
        index -= 16;
    }
    index
}

/// The PPU address space (0x0000-0x3FFF): pattern tables from the cartridge,
/// nametables from VRAM through the mirroring mode, then palette RAM.
/// Every `get`/`set` is reported to the mapper so it can watch A12.
pub struct PpuBus<'a> {
    vram: &'a mut [u8],
    palette: &'a mut [u8; PALETTE_SIZE],
    mapper: &'a mut dyn Mapper,
}

impl<'a> PpuBus<'a> {
    pub fn new(
        vram: &'a mut [u8],
        palette: &'a mut [u8; PALETTE_SIZE],
        mapper: &'a mut dyn Mapper,
    ) -> Self {
        Self {
            vram,
            palette,
            mapper,
        }
    }
}

impl Memory for PpuBus<'_> {
    fn get(&mut self, addr: u16) -> u8 {
        let addr = addr & 0x3FFF;
        self.mapper.notify_ppu_addr(addr);
        match addr {
            0x0000..=0x1FFF => self.mapper.ppu_read(addr),
            0x2000..=0x3EFF => self.vram[mirror_vram_addr(self.mapper.mirroring(), addr)],
            _ => self.palette[palette_index(addr)],
        }
    }

    fn set(&mut self, addr: u16, value: u8) {
        let addr = addr & 0x3FFF;
        self.mapper.notify_ppu_addr(addr);
        match addr {
            0x0000..=0x1FFF => self.mapper.ppu_write(addr, value),
            0x2000..=0x3EFF => {
                let index = mirror_vram_addr(self.mapper.mirroring(), addr);
                self.vram[index] = value;
            }
            _ => self.palette[palette_index(addr)] = value,
        }
    }

    fn peek(&self, addr: u16) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => self.mapper.ppu_peek(addr),
            0x2000..=0x3EFF => self.vram[mirror_vram_addr(self.mapper.mirroring(), addr)],
            _ => self.palette[palette_index(addr)],
        }
    }
}

/// What happened during one `run_scanline` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanlineEvent {
    pub line: u16,
    pub row_ready: bool,
    pub vblank_started: bool,
    pub frame_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuState {
    pub registers: PpuRegisters,
    pub vram: Vec<u8>,
    pub palette: Vec<u8>,
    pub oam: Vec<u8>,
    pub scanline: u16,
    pub frame: u64,
    pub odd_frame: bool,
}

pub struct Ppu {
    regs: PpuRegisters,
    vram: Vec<u8>,
    palette: [u8; PALETTE_SIZE],
    oam: [u8; OAM_SIZE],
    scanline: u16,
    frame: u64,
    odd_frame: bool,
    region: Region,
    renderer: Renderer,
    colors: ColorTable,
    frame_buffer: Vec<u32>,
}

impl Ppu {
    pub fn new(region: Region, pixel_format: PixelFormat) -> Self {
        Self {
            regs: PpuRegisters::default(),
            vram: vec![0; VRAM_SIZE],
            palette: [0; PALETTE_SIZE],
            oam: [0; OAM_SIZE],
            scanline: 0,
            frame: 0,
            odd_frame: false,
            region,
            renderer: Renderer::new(),
            colors: ColorTable::new(pixel_format),
            frame_buffer: vec![0; FRAME_WIDTH * FRAME_HEIGHT],
        }
    }

    pub fn reset(&mut self) {
        self.regs.ctrl = 0;
        self.regs.mask = 0;
        self.regs.w = false;
        self.regs.read_buffer = 0;
        self.scanline = 0;
        self.odd_frame = false;
    }

    pub fn registers(&self) -> PpuRegisters {
        self.regs
    }

    pub fn set_registers(&mut self, regs: PpuRegisters) {
        self.regs = regs;
        self.regs.v &= 0x7FFF;
        self.regs.t &= 0x7FFF;
        self.regs.fine_x &= 0x07;
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn frame_buffer(&self) -> &[u32] {
        &self.frame_buffer
    }

    pub fn row(&self, line: usize) -> &[u32] {
        let start = (line % FRAME_HEIGHT) * FRAME_WIDTH;
        &self.frame_buffer[start..start + FRAME_WIDTH]
    }

    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    pub fn nmi_line(&self) -> bool {
        self.regs.nmi_line()
    }

    fn pre_render_line(&self) -> u16 {
        self.region.scanlines_per_frame() - 1
    }

    /// Dots in the line `run_scanline` will execute next.
    pub fn current_line_dots(&self) -> u16 {
        if self.region == Region::Ntsc
            && self.scanline == self.pre_render_line()
            && self.odd_frame
            && self.regs.rendering_enabled()
        {
            DOTS_PER_SCANLINE - 1
        } else {
            DOTS_PER_SCANLINE
        }
    }

    pub fn cpu_read_register(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let value = match 0x2000 | (addr & 0x0007) {
            0x2002 => {
                let value = (self.regs.status & 0xE0) | (self.regs.open_bus & 0x1F);
                self.regs.status &= !STATUS_VBLANK;
                self.regs.w = false;
                value
            }
            0x2004 => self.read_oam(),
            0x2007 => {
                let ppu_addr = self.regs.v & 0x3FFF;
                let mut bus = PpuBus::new(&mut self.vram, &mut self.palette, mapper);
                let value = bus.get(ppu_addr);
                let result = if ppu_addr >= 0x3F00 {
                    // Palette reads bypass the buffer; it refills from the
                    // nametable underneath.
                    self.regs.read_buffer = bus.get(ppu_addr - 0x1000);
                    value
                } else {
                    let buffered = self.regs.read_buffer;
                    self.regs.read_buffer = value;
                    buffered
                };
                self.regs.v = self.regs.v.wrapping_add(self.regs.vram_increment()) & 0x7FFF;
                result
            }
            _ => self.regs.open_bus,
        };
        self.regs.open_bus = value;
        value
    }

    /// Register value a read would return, without the read's side effects.
    pub fn peek_register(&self, addr: u16, mapper: &dyn Mapper) -> u8 {
        match 0x2000 | (addr & 0x0007) {
            0x2002 => (self.regs.status & 0xE0) | (self.regs.open_bus & 0x1F),
            0x2004 => self.read_oam(),
            0x2007 => {
                let ppu_addr = self.regs.v & 0x3FFF;
                if ppu_addr >= 0x3F00 {
                    self.peek_memory(ppu_addr, mapper)
                } else {
                    self.regs.read_buffer
                }
            }
            _ => self.regs.open_bus,
        }
    }

    pub fn cpu_write_register(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        self.regs.open_bus = value;
        let regs = &mut self.regs;
        match 0x2000 | (addr & 0x0007) {
            0x2000 => {
                regs.ctrl = value;
                regs.t = (regs.t & !0x0C00) | (((value & CTRL_NAMETABLE) as u16) << 10);
            }
            0x2001 => regs.mask = value,
            0x2003 => regs.oam_addr = value,
            0x2004 => self.write_oam(value),
            0x2005 => {
                if !regs.w {
                    regs.fine_x = value & 0x07;
                    regs.t = (regs.t & !0x001F) | ((value as u16) >> 3);
                } else {
                    regs.t = (regs.t & !0x03E0) | (((value as u16) >> 3) << 5);
                    regs.t = (regs.t & !0x7000) | (((value & 0x07) as u16) << 12);
                }
                regs.w = !regs.w;
            }
            0x2006 => {
                if !regs.w {
                    regs.t = (regs.t & 0x00FF) | (((value & 0x3F) as u16) << 8);
                } else {
                    regs.t = (regs.t & 0x7F00) | value as u16;
                    regs.v = regs.t;
                }
                regs.w = !regs.w;
            }
            0x2007 => {
                let ppu_addr = regs.v & 0x3FFF;
                regs.v = regs.v.wrapping_add(regs.vram_increment()) & 0x7FFF;
                PpuBus::new(&mut self.vram, &mut self.palette, mapper).set(ppu_addr, value);
            }
            _ => {}
        }
    }

    fn read_oam(&self) -> u8 {
        let value = self.oam[self.regs.oam_addr as usize];
        // Attribute bytes have no storage for bits 2-4.
        if (self.regs.oam_addr & 0x03) == 0x02 {
            value & 0xE3
        } else {
            value
        }
    }

    pub fn write_oam(&mut self, value: u8) {
        self.oam[self.regs.oam_addr as usize] = value;
        self.regs.oam_addr = self.regs.oam_addr.wrapping_add(1);
    }

    pub fn peek_memory(&self, addr: u16, mapper: &dyn Mapper) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => mapper.ppu_peek(addr),
            0x2000..=0x3EFF => self.vram[mirror_vram_addr(mapper.mirroring(), addr)],
            _ => self.palette[palette_index(addr)],
        }
    }

    /// Executes the current scanline in one go and advances to the next.
    pub fn run_scanline(&mut self, mapper: &mut dyn Mapper) -> ScanlineEvent {
        let line = self.scanline;
        let pre_render = self.pre_render_line();
        let mut event = ScanlineEvent {
            line,
            ..ScanlineEvent::default()
        };

        if (line as usize) < FRAME_HEIGHT {
            self.render_line(line, mapper);
            let start = line as usize * FRAME_WIDTH;
            self.frame_buffer[start..start + FRAME_WIDTH]
                .copy_from_slice(self.renderer.line());
            event.row_ready = true;
        } else if line == VBLANK_LINE {
            self.regs.status |= STATUS_VBLANK;
            event.vblank_started = true;
        } else if line == pre_render {
            self.regs.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW);
            if self.regs.rendering_enabled() {
                self.regs.copy_horizontal_bits();
                let mut bus = PpuBus::new(&mut self.vram, &mut self.palette, mapper);
                self.renderer.fetch_background(&mut bus, &mut self.regs);
                self.renderer
                    .fetch_sprites(&mut bus, &mut self.regs, &self.oam, None);
                self.regs.copy_vertical_bits();
            }
        }

        if line == pre_render {
            self.scanline = 0;
            self.frame += 1;
            self.odd_frame = !self.odd_frame;
            event.frame_complete = true;
        } else {
            self.scanline = line + 1;
        }
        event
    }

    fn render_line(&mut self, line: u16, mapper: &mut dyn Mapper) {
        if !self.regs.rendering_enabled() {
            self.renderer
                .blank(&self.regs, &self.palette, &self.colors);
            return;
        }

        self.regs.copy_horizontal_bits();
        {
            let mut bus = PpuBus::new(&mut self.vram, &mut self.palette, mapper);
            self.renderer.fetch_background(&mut bus, &mut self.regs);
            self.renderer
                .fetch_sprites(&mut bus, &mut self.regs, &self.oam, Some(line));
        }
        self.regs.increment_y();
        self.renderer
            .compose(&mut self.regs, &self.palette, &self.colors);
    }

    pub fn save_state(&self) -> PpuState {
        PpuState {
            registers: self.regs,
            vram: self.vram.clone(),
            palette: self.palette.to_vec(),
            oam: self.oam.to_vec(),
            scanline: self.scanline,
            frame: self.frame,
            odd_frame: self.odd_frame,
        }
    }

    pub fn restore_state(&mut self, state: &PpuState) -> anyhow::Result<()> {
        if state.vram.len() != VRAM_SIZE
            || state.palette.len() != PALETTE_SIZE
            || state.oam.len() != OAM_SIZE
        {
            anyhow::bail!("snapshot PPU memory sizes do not match");
        }
        if state.scanline >= self.region.scanlines_per_frame() {
            anyhow::bail!(
                "snapshot scanline {} is outside this region's frame",
                state.scanline
            );
        }
        self.set_registers(state.registers);
        self.vram.copy_from_slice(&state.vram);
        self.palette.copy_from_slice(&state.palette);
        self.oam.copy_from_slice(&state.oam);
        self.scanline = state.scanline;
        self.frame = state.frame;
        self.odd_frame = state.odd_frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::cartridge::Cartridge;
    use crate::nes::mapper::{Mirroring, create_mapper};

    fn nrom(mirroring: Mirroring) -> Box<dyn Mapper> {
        let mut chr = vec![0u8; 0x2000];
        for (i, b) in chr.iter_mut().enumerate() {
            *b = i as u8;
        }
        create_mapper(Cartridge {
            mapper_id: 0,
            submapper_id: 0,
            mirroring,
            has_battery: false,
            region: Region::Ntsc,
            nes2: false,
            prg_rom: vec![0; 0x8000],
            chr_data: chr,
            chr_is_ram: false,
            prg_ram_size: 0x2000,
        })
        .unwrap()
    }

    fn ppu() -> Ppu {
        Ppu::new(Region::Ntsc, PixelFormat::Argb)
    }

    fn set_addr(ppu: &mut Ppu, mapper: &mut dyn Mapper, addr: u16) {
        ppu.cpu_write_register(0x2006, (addr >> 8) as u8, mapper);
        ppu.cpu_write_register(0x2006, addr as u8, mapper);
    }

    #[test]
    fn ppudata_reads_are_buffered_outside_palette() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();

        set_addr(&mut ppu, mapper.as_mut(), 0x2000);
        ppu.cpu_write_register(0x2007, 0xAA, mapper.as_mut());
        ppu.cpu_write_register(0x2007, 0xBB, mapper.as_mut());

        set_addr(&mut ppu, mapper.as_mut(), 0x2000);
        assert_eq!(ppu.cpu_read_register(0x2007, mapper.as_mut()), 0x00);
        assert_eq!(ppu.cpu_read_register(0x2007, mapper.as_mut()), 0xAA);
        assert_eq!(ppu.cpu_read_register(0x2007, mapper.as_mut()), 0xBB);
    }

    #[test]
    fn palette_reads_are_immediate() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();

        set_addr(&mut ppu, mapper.as_mut(), 0x3F01);
        ppu.cpu_write_register(0x2007, 0x21, mapper.as_mut());
        set_addr(&mut ppu, mapper.as_mut(), 0x3F01);
        assert_eq!(ppu.cpu_read_register(0x2007, mapper.as_mut()), 0x21);
    }

    #[test]
    fn palette_backdrop_mirrors() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();

        set_addr(&mut ppu, mapper.as_mut(), 0x3F10);
        ppu.cpu_write_register(0x2007, 0x0F, mapper.as_mut());
        assert_eq!(ppu.peek_memory(0x3F00, mapper.as_ref()), 0x0F);
        assert_eq!(ppu.peek_memory(0x3F30, mapper.as_ref()), 0x0F);
    }

    #[test]
    fn nametable_aliasing_follows_mirroring() {
        for (mirroring, alias, independent) in [
            (Mirroring::Vertical, 0x2800, 0x2400),
            (Mirroring::Horizontal, 0x2400, 0x2800),
        ] {
            let mut mapper = nrom(mirroring);
            let mut ppu = ppu();
            set_addr(&mut ppu, mapper.as_mut(), 0x2005);
            ppu.cpu_write_register(0x2007, 0x5A, mapper.as_mut());
            assert_eq!(ppu.peek_memory(alias + 5, mapper.as_ref()), 0x5A);
            assert_eq!(ppu.peek_memory(independent + 5, mapper.as_ref()), 0x00);
        }
    }

    #[test]
    fn status_read_clears_vblank_and_toggle() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();
        ppu.regs.status = STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT;
        ppu.cpu_write_register(0x2005, 0x10, mapper.as_mut());
        assert!(ppu.regs.w);

        let value = ppu.cpu_read_register(0x2002, mapper.as_mut());
        assert_eq!(value & 0xE0, STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT);
        assert!(!ppu.regs.w);
        assert_eq!(ppu.regs.status & STATUS_VBLANK, 0);
        assert_eq!(ppu.peek_register(0x2002, mapper.as_ref()) & 0x80, 0);
    }

    #[test]
    fn scroll_writes_fill_t_and_fine_x() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();
        ppu.cpu_write_register(0x2000, 0x03, mapper.as_mut());
        ppu.cpu_write_register(0x2005, 0x7D, mapper.as_mut());
        ppu.cpu_write_register(0x2005, 0x5E, mapper.as_mut());
        assert_eq!(ppu.regs.fine_x, 0x05);
        assert_eq!(ppu.regs.t, 0x0C00 | 0x000F | (0x0B << 5) | (0x06 << 12));
    }

    #[test]
    fn ppuaddr_writes_copy_t_to_v() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();
        set_addr(&mut ppu, mapper.as_mut(), 0x7F21);
        assert_eq!(ppu.regs.v, 0x3F21);
        assert_eq!(ppu.regs.t, 0x3F21);
    }

    #[test]
    fn coarse_x_and_y_wrap_into_next_nametable() {
        let mut regs = PpuRegisters {
            v: 31,
            ..PpuRegisters::default()
        };
        regs.increment_coarse_x();
        assert_eq!(regs.v, 0x0400);

        regs.v = 0x7000 | (29 << 5);
        regs.increment_y();
        assert_eq!(regs.v, 0x0800);
    }

    #[test]
    fn vblank_and_nmi_line_per_frame() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE, mapper.as_mut());

        let mut vblank_line = None;
        let mut frame_line = None;
        for _ in 0..262 {
            let event = ppu.run_scanline(mapper.as_mut());
            if event.vblank_started {
                vblank_line = Some(event.line);
                assert!(ppu.nmi_line());
            }
            if event.frame_complete {
                frame_line = Some(event.line);
                assert!(!ppu.nmi_line());
            }
        }
        assert_eq!(vblank_line, Some(241));
        assert_eq!(frame_line, Some(261));
        assert_eq!(ppu.frame(), 1);
        assert_eq!(ppu.scanline(), 0);
    }

    #[test]
    fn odd_frames_skip_a_dot_when_rendering() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();
        ppu.cpu_write_register(0x2001, MASK_SHOW_BG, mapper.as_mut());
        for _ in 0..261 {
            ppu.run_scanline(mapper.as_mut());
        }
        assert_eq!(ppu.current_line_dots(), 341);
        ppu.run_scanline(mapper.as_mut());
        for _ in 0..261 {
            ppu.run_scanline(mapper.as_mut());
        }
        assert_eq!(ppu.current_line_dots(), 340);
    }

    #[test]
    fn oam_attribute_bits_read_back_masked() {
        let mut mapper = nrom(Mirroring::Vertical);
        let mut ppu = ppu();
        ppu.cpu_write_register(0x2003, 0x02, mapper.as_mut());
        ppu.cpu_write_register(0x2004, 0xFF, mapper.as_mut());
        ppu.cpu_write_register(0x2003, 0x02, mapper.as_mut());
        assert_eq!(ppu.cpu_read_register(0x2004, mapper.as_mut()), 0xE3);
    }
}
