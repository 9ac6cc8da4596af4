//! CPU address space: internal RAM, PPU and APU registers, controllers and
//! the cartridge, plus the DMA units that steal CPU cycles.

use super::apu::Apu;
use super::cpu::CpuBus;
use super::joypad::Joypad;
use super::mapper::Mapper;
use super::memory::{Memory, Ram};
use super::ppu::Ppu;
use super::sink::Observer;

pub const INTERNAL_RAM_SIZE: usize = 0x0800;
pub const OAM_DMA_CYCLES: u32 = 513;
pub const DMC_DMA_CYCLES: u32 = 4;

/// DMA activity noticed while servicing a step, for the façade's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    OamDma { page: u8, stall: u32 },
    DmcDma { addr: u16 },
}

pub struct Bus {
    pub ram: Ram,
    pub ppu: Ppu,
    pub apu: Apu,
    pub mapper: Box<dyn Mapper>,
    pub joypads: [Joypad; 2],
    pub observer: Option<Box<dyn Observer>>,
    open_bus: u8,
    stall_cycles: u32,
    cycles: u64,
    events: Vec<BusEvent>,
}

impl Bus {
    pub fn new(ppu: Ppu, apu: Apu, mapper: Box<dyn Mapper>) -> Self {
        Self {
            ram: Ram::new(INTERNAL_RAM_SIZE),
            ppu,
            apu,
            mapper,
            joypads: [Joypad::new(), Joypad::new()],
            observer: None,
            open_bus: 0,
            stall_cycles: 0,
            cycles: 0,
            events: Vec::new(),
        }
    }

    /// Total CPU cycles accounted so far, DMA stalls included.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn set_cycles(&mut self, cycles: u64) {
        self.cycles = cycles;
    }

    pub fn take_stall_cycles(&mut self) -> u32 {
        std::mem::take(&mut self.stall_cycles)
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, BusEvent> {
        self.events.drain(..)
    }

    /// Clocks the APU for `cycles` CPU cycles, servicing DMC sample fetches
    /// as they come due. Each fetch stalls the CPU, and those stall cycles
    /// clock the APU too. Returns the stall cycles added.
    pub fn run_apu(&mut self, cycles: u32) -> u32 {
        let mut remaining = cycles;
        let mut stalled = 0;
        while remaining > 0 {
            remaining -= 1;
            self.apu.tick();
            if let Some(addr) = self.apu.take_dmc_request() {
                let byte = self.get(addr);
                self.apu.complete_dmc_dma(byte);
                self.events.push(BusEvent::DmcDma { addr });
                remaining += DMC_DMA_CYCLES;
                stalled += DMC_DMA_CYCLES;
            }
        }
        self.cycles += u64::from(cycles + stalled);
        stalled
    }

    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for offset in 0..=0xFFu16 {
            let value = self.get(base | offset);
            self.ppu.write_oam(value);
        }
        let stall = OAM_DMA_CYCLES + (self.cycles & 0x01) as u32;
        self.stall_cycles += stall;
        self.events.push(BusEvent::OamDma { page, stall });
    }

    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram.read(addr as usize),
            0x2000..=0x3FFF => self.ppu.cpu_read_register(addr, self.mapper.as_mut()),
            // Bit 5 is not driven.
            0x4015 => self.apu.read_status() | (self.open_bus & 0x20),
            0x4016 => self.joypads[0].read(),
            0x4017 => self.joypads[1].read(),
            0x4000..=0x5FFF => self.open_bus,
            _ => self.mapper.cpu_read(addr),
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram.write(addr as usize, value),
            0x2000..=0x3FFF => self
                .ppu
                .cpu_write_register(addr, value, self.mapper.as_mut()),
            0x4014 => self.oam_dma(value),
            0x4016 => {
                for pad in &mut self.joypads {
                    pad.write_strobe(value);
                }
            }
            0x4000..=0x4017 => self.apu.write_register(addr, value),
            0x4018..=0x5FFF => {}
            _ => self.mapper.cpu_write(addr, value),
        }
    }
}

impl Memory for Bus {
    fn get(&mut self, addr: u16) -> u8 {
        let value = self.read(addr);
        self.open_bus = value;
        value
    }

    fn set(&mut self, addr: u16, value: u8) {
        self.open_bus = value;
        self.write(addr, value);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_store(addr, value);
        }
    }

    fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram.read(addr as usize),
            0x2000..=0x3FFF => self.ppu.peek_register(addr, self.mapper.as_ref()),
            0x4015 => self.apu.peek_status() | (self.open_bus & 0x20),
            0x4016 => self.joypads[0].peek(),
            0x4017 => self.joypads[1].peek(),
            0x4000..=0x5FFF => self.open_bus,
            _ => self.mapper.cpu_peek(addr),
        }
    }
}

impl CpuBus for Bus {
    fn nmi_line(&self) -> bool {
        self.ppu.nmi_line()
    }

    fn irq_line(&self) -> bool {
        self.mapper.irq_pending() || self.apu.irq_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::cartridge::Cartridge;
    use crate::nes::config::Region;
    use crate::nes::joypad::Button;
    use crate::nes::mapper::{Mirroring, create_mapper};
    use crate::nes::palette::PixelFormat;

    fn bus() -> Bus {
        let mut prg = vec![0u8; 0x8000];
        prg[0] = 0x42;
        let mapper = create_mapper(Cartridge {
            mapper_id: 0,
            submapper_id: 0,
            mirroring: Mirroring::Horizontal,
            has_battery: false,
            region: Region::Ntsc,
            nes2: false,
            prg_rom: prg,
            chr_data: vec![0; 0x2000],
            chr_is_ram: false,
            prg_ram_size: 0x2000,
        })
        .unwrap();
        Bus::new(
            Ppu::new(Region::Ntsc, PixelFormat::Argb),
            Apu::new(Region::Ntsc),
            mapper,
        )
    }

    #[test]
    fn internal_ram_mirrors_every_2k() {
        let mut bus = bus();
        bus.set(0x0001, 0x99);
        assert_eq!(bus.get(0x0801), 0x99);
        assert_eq!(bus.get(0x1801), 0x99);
        assert_eq!(bus.peek(0x1001), 0x99);
    }

    #[test]
    fn cartridge_space_reaches_mapper() {
        let mut bus = bus();
        assert_eq!(bus.get(0x8000), 0x42);
        bus.set(0x6000, 0x17);
        assert_eq!(bus.get(0x6000), 0x17);
    }

    #[test]
    fn unmapped_expansion_area_returns_open_bus() {
        let mut bus = bus();
        assert_eq!(bus.get(0x8000), 0x42);
        assert_eq!(bus.get(0x5000), 0x42);
    }

    #[test]
    fn oam_dma_copies_page_and_stalls() {
        let mut bus = bus();
        for i in 0..256u16 {
            bus.set(0x0200 + i, i as u8);
        }
        bus.set(0x4014, 0x02);
        assert_eq!(bus.ppu.oam()[0x10], 0x10);
        assert_eq!(bus.ppu.oam()[0xFF], 0xFF);
        assert_eq!(bus.take_stall_cycles(), 513);
        assert_eq!(bus.take_stall_cycles(), 0);

        bus.set_cycles(1);
        bus.set(0x4014, 0x02);
        assert_eq!(bus.take_stall_cycles(), 514);
        assert_eq!(bus.drain_events().count(), 2);
    }

    #[test]
    fn controller_reads_go_through_strobe() {
        let mut bus = bus();
        bus.joypads[0].press(Button::B);
        bus.set(0x4016, 1);
        bus.set(0x4016, 0);
        assert_eq!(bus.peek(0x4016), 0x40);
        assert_eq!(bus.get(0x4016), 0x40);
        assert_eq!(bus.get(0x4016), 0x41);
        assert_eq!(bus.get(0x4017), 0x40);
    }

    #[test]
    fn peek_leaves_ppu_status_alone() {
        let mut bus = bus();
        bus.ppu.run_scanline(bus.mapper.as_mut());
        for _ in 1..=241 {
            bus.ppu.run_scanline(bus.mapper.as_mut());
        }
        assert_ne!(bus.peek(0x2002) & 0x80, 0);
        assert_ne!(bus.peek(0x2002) & 0x80, 0);
        assert_ne!(bus.get(0x2002) & 0x80, 0);
        assert_eq!(bus.peek(0x2002) & 0x80, 0);
    }

    #[test]
    fn dmc_fetches_stall_the_cpu() {
        let mut bus = bus();
        bus.set(0x4013, 0x00);
        bus.set(0x4015, 0x10);
        let stalled = bus.run_apu(10);
        assert_eq!(stalled, DMC_DMA_CYCLES);
        assert_eq!(bus.cycles(), 14);
        assert!(matches!(
            bus.drain_events().next(),
            Some(BusEvent::DmcDma { addr: 0xC000 })
        ));
    }
}
