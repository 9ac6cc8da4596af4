use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cartridge::Cartridge;
use super::memory::{BankedMemory, Ram};

pub const PRG_WINDOW: usize = 0x8000;
pub const CHR_WINDOW: usize = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    OneScreenLower,
    OneScreenUpper,
    FourScreen,
}

/// Resolves a nametable address (0x2000-0x3EFF or any alias) to an offset in
/// the 4 KiB nametable RAM.
pub fn mirror_vram_addr(mirroring: Mirroring, addr: u16) -> usize {
    let addr = (addr & 0x0FFF) as usize;
    match mirroring {
        Mirroring::Vertical => addr & 0x07FF,
        Mirroring::Horizontal => (addr & 0x03FF) | ((addr & 0x0800) >> 1),
        Mirroring::OneScreenLower => addr & 0x03FF,
        Mirroring::OneScreenUpper => 0x0400 | (addr & 0x03FF),
        Mirroring::FourScreen => addr,
    }
}

/// Register bytes and writable memories of a mapper, as captured by
/// [`Mapper::save_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperState {
    pub mapper_id: u16,
    pub registers: Vec<u8>,
    pub prg_ram: Vec<u8>,
    pub chr_ram: Option<Vec<u8>>,
}

/// Memories every board carries: banked PRG ROM at 0x8000, banked CHR at PPU
/// 0x0000, and 8 KiB (or larger) PRG-RAM at 0x6000.
#[derive(Debug, Clone)]
pub struct Board {
    pub mapper_id: u16,
    pub prg: BankedMemory,
    pub chr: BankedMemory,
    pub prg_ram: Ram,
    pub battery: bool,
    pub mirroring: Mirroring,
}

impl Board {
    fn new(cart: Cartridge) -> Self {
        let chr = if cart.chr_is_ram {
            BankedMemory::ram(cart.chr_data, CHR_WINDOW)
        } else {
            BankedMemory::rom(cart.chr_data, CHR_WINDOW)
        };
        Self {
            mapper_id: cart.mapper_id,
            prg: BankedMemory::rom(cart.prg_rom, PRG_WINDOW),
            chr,
            prg_ram: Ram::new(cart.prg_ram_size),
            battery: cart.has_battery,
            mirroring: cart.mirroring,
        }
    }

    /// Boards that wire 8 KiB of CHR-RAM regardless of what the image says.
    fn with_chr_ram(cart: Cartridge) -> Self {
        let mut chr_data = cart.chr_data.clone();
        if chr_data.len() < CHR_WINDOW {
            chr_data.resize(CHR_WINDOW, 0);
        }
        let mut board = Self::new(cart);
        board.chr = BankedMemory::ram(chr_data, CHR_WINDOW);
        board
    }

    fn read_cpu(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram.read(addr as usize - 0x6000),
            0x8000..=0xFFFF => self.prg.read(addr as usize - 0x8000),
            _ => 0,
        }
    }

    fn write_prg_ram(&mut self, addr: u16, value: u8) {
        if (0x6000..=0x7FFF).contains(&addr) {
            self.prg_ram.write(addr as usize - 0x6000, value);
        }
    }

    fn last_bank(&self, bank_size: usize) -> usize {
        self.prg.bank_count(bank_size) - 1
    }
}

pub trait Mapper {
    fn board(&self) -> &Board;
    fn board_mut(&mut self) -> &mut Board;

    fn cpu_write(&mut self, addr: u16, value: u8);

    /// Bank and latch registers in a mapper-specific order.
    fn registers(&self) -> Vec<u8>;
    /// Inverse of [`Mapper::registers`]; must reprogram the bank maps.
    fn load_registers(&mut self, registers: &[u8]) -> Result<()>;

    fn mapper_id(&self) -> u16 {
        self.board().mapper_id
    }

    fn cpu_peek(&self, addr: u16) -> u8 {
        self.board().read_cpu(addr)
    }

    fn cpu_read(&mut self, addr: u16) -> u8 {
        self.cpu_peek(addr)
    }

    fn ppu_peek(&self, addr: u16) -> u8 {
        self.board().chr.read((addr & 0x1FFF) as usize)
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.ppu_peek(addr)
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        self.board_mut().chr.write((addr & 0x1FFF) as usize, value);
    }

    fn mirroring(&self) -> Mirroring {
        self.board().mirroring
    }

    /// Called with every address the PPU drives onto its bus.
    fn notify_ppu_addr(&mut self, _addr: u16) {}

    fn irq_pending(&self) -> bool {
        false
    }

    /// Battery-backed PRG-RAM, if the cartridge has any.
    fn persistent_ram(&self) -> Option<&[u8]> {
        let board = self.board();
        board.battery.then(|| board.prg_ram.as_slice())
    }

    fn load_persistent_ram(&mut self, data: &[u8]) -> Result<()> {
        let board = self.board_mut();
        if !board.battery {
            bail!("cartridge has no battery-backed PRG-RAM");
        }
        if data.len() != board.prg_ram.len() {
            bail!(
                "persistent RAM size mismatch: expected {} bytes, got {}",
                board.prg_ram.len(),
                data.len()
            );
        }
        board.prg_ram.load(data);
        Ok(())
    }

    fn save_state(&self) -> MapperState {
        let board = self.board();
        MapperState {
            mapper_id: board.mapper_id,
            registers: self.registers(),
            prg_ram: board.prg_ram.as_slice().to_vec(),
            chr_ram: board
                .chr
                .is_writable()
                .then(|| board.chr.bytes().to_vec()),
        }
    }

    fn restore_state(&mut self, state: &MapperState) -> Result<()> {
        {
            let board = self.board();
            if state.mapper_id != board.mapper_id {
                bail!(
                    "snapshot is for mapper {} but cartridge uses mapper {}",
                    state.mapper_id,
                    board.mapper_id
                );
            }
            if state.prg_ram.len() != board.prg_ram.len() {
                bail!(
                    "snapshot PRG-RAM is {} bytes, cartridge has {}",
                    state.prg_ram.len(),
                    board.prg_ram.len()
                );
            }
            if let Some(chr) = &state.chr_ram
                && (!board.chr.is_writable() || chr.len() != board.chr.bytes().len())
            {
                bail!("snapshot CHR-RAM does not match cartridge CHR memory");
            }
        }
        self.load_registers(&state.registers)?;
        let board = self.board_mut();
        board.prg_ram.load(&state.prg_ram);
        if let Some(chr) = &state.chr_ram {
            board.chr.load(chr);
        }
        Ok(())
    }

    fn debug_state(&self) -> String {
        String::new()
    }
}

pub fn mapper_name(mapper_id: u16) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        2 => "UxROM",
        3 => "CNROM",
        4 => "MMC3",
        71 => "Camerica",
        _ => "Unsupported",
    }
}

pub fn create_mapper(cart: Cartridge) -> Result<Box<dyn Mapper>> {
    let mapper: Box<dyn Mapper> = match cart.mapper_id {
        0 => Box::new(Nrom::new(cart)?),
        1 => {
            require_prg_bank(&cart, "MMC1", 0x4000)?;
            Box::new(Mmc1::new(cart))
        }
        2 => Box::new(Uxrom::new(cart)),
        3 => Box::new(Cnrom::new(cart)?),
        4 => {
            require_prg_bank(&cart, "MMC3", 0x2000)?;
            Box::new(Mmc3::new(cart))
        }
        71 => Box::new(Mapper71::new(cart)),
        id => bail!("unsupported mapper {id}"),
    };
    Ok(mapper)
}

fn expect_registers(registers: &[u8], len: usize, name: &str) -> Result<()> {
    if registers.len() != len {
        bail!(
            "{name} snapshot has {} register bytes, expected {len}",
            registers.len()
        );
    }
    Ok(())
}

fn require_prg_bank(cart: &Cartridge, name: &str, bank_size: usize) -> Result<()> {
    let size = cart.prg_rom.len();
    if size < bank_size {
        bail!("{name} needs at least one {} KiB PRG bank, image has {size} bytes", bank_size / 1024);
    }
    Ok(())
}

fn require_small_prg(cart: &Cartridge, name: &str) -> Result<()> {
    let size = cart.prg_rom.len();
    if size != 0x4000 && size != 0x8000 {
        bail!("{name} requires 16 KiB or 32 KiB of PRG ROM, image has {size} bytes");
    }
    Ok(())
}

struct Nrom {
    board: Board,
}

impl Nrom {
    fn new(cart: Cartridge) -> Result<Self> {
        require_small_prg(&cart, "NROM")?;
        Ok(Self {
            board: Board::new(cart),
        })
    }
}

impl Mapper for Nrom {
    fn board(&self) -> &Board {
        &self.board
    }

    fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        self.board.write_prg_ram(addr, value);
    }

    fn registers(&self) -> Vec<u8> {
        Vec::new()
    }

    fn load_registers(&mut self, registers: &[u8]) -> Result<()> {
        expect_registers(registers, 0, "NROM")
    }

    fn debug_state(&self) -> String {
        format!("prg_kib={}", self.board.prg.bytes().len() / 1024)
    }
}

struct Mmc1 {
    board: Board,
    shift_register: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    fn new(cart: Cartridge) -> Self {
        let mut mapper = Self {
            board: Board::new(cart),
            shift_register: 0x10,
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        };
        mapper.apply_banks();
        mapper
    }

    fn prg_ram_enabled(&self) -> bool {
        (self.prg_bank & 0x10) == 0
    }

    fn write_shift_register(&mut self, addr: u16, value: u8) {
        if (value & 0x80) != 0 {
            self.shift_register = 0x10;
            self.control |= 0x0C;
            self.apply_banks();
            return;
        }

        // The marker bit reaching bit 0 means this is the fifth write.
        let commit = (self.shift_register & 0x01) != 0;
        self.shift_register >>= 1;
        self.shift_register |= (value & 0x01) << 4;

        if commit {
            let data = self.shift_register;
            match (addr >> 13) & 0x03 {
                0 => self.control = data,
                1 => self.chr_bank0 = data,
                2 => self.chr_bank1 = data,
                _ => self.prg_bank = data,
            }
            self.shift_register = 0x10;
            self.apply_banks();
            debug!(mapper = "MMC1", state = %self.debug_state(), "bank registers updated");
        }
    }

    fn apply_banks(&mut self) {
        let bank = (self.prg_bank & 0x0F) as usize;
        match (self.control >> 2) & 0x03 {
            0 | 1 => self.board.prg.map_bank(0, 0x8000, bank >> 1),
            2 => {
                self.board.prg.map_bank(0, 0x4000, 0);
                self.board.prg.map_bank(0x4000, 0x4000, bank);
            }
            _ => {
                let last = self.board.last_bank(0x4000);
                self.board.prg.map_bank(0, 0x4000, bank);
                self.board.prg.map_bank(0x4000, 0x4000, last);
            }
        }

        if (self.control & 0x10) == 0 {
            self.board
                .chr
                .map_bank(0, 0x2000, (self.chr_bank0 >> 1) as usize);
        } else {
            self.board.chr.map_bank(0, 0x1000, self.chr_bank0 as usize);
            self.board
                .chr
                .map_bank(0x1000, 0x1000, self.chr_bank1 as usize);
        }

        self.board.mirroring = match self.control & 0x03 {
            0 => Mirroring::OneScreenLower,
            1 => Mirroring::OneScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        };
    }
}

impl Mapper for Mmc1 {
    fn board(&self) -> &Board {
        &self.board
    }

    fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    fn cpu_peek(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF if !self.prg_ram_enabled() => 0,
            _ => self.board.read_cpu(addr),
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                if self.prg_ram_enabled() {
                    self.board.write_prg_ram(addr, value);
                }
            }
            0x8000..=0xFFFF => self.write_shift_register(addr, value),
            _ => {}
        }
    }

    fn registers(&self) -> Vec<u8> {
        vec![
            self.shift_register,
            self.control,
            self.chr_bank0,
            self.chr_bank1,
            self.prg_bank,
        ]
    }

    fn load_registers(&mut self, registers: &[u8]) -> Result<()> {
        expect_registers(registers, 5, "MMC1")?;
        self.shift_register = registers[0];
        self.control = registers[1];
        self.chr_bank0 = registers[2];
        self.chr_bank1 = registers[3];
        self.prg_bank = registers[4];
        self.apply_banks();
        Ok(())
    }

    fn debug_state(&self) -> String {
        format!(
            "control=${:02X} chr0=${:02X} chr1=${:02X} prg=${:02X} shift=${:02X} mirroring={:?}",
            self.control,
            self.chr_bank0,
            self.chr_bank1,
            self.prg_bank,
            self.shift_register,
            self.board.mirroring
        )
    }
}

struct Uxrom {
    board: Board,
    bank_select: u8,
}

impl Uxrom {
    fn new(cart: Cartridge) -> Self {
        let mut mapper = Self {
            board: Board::with_chr_ram(cart),
            bank_select: 0,
        };
        mapper.apply_banks();
        mapper
    }

    fn apply_banks(&mut self) {
        let last = self.board.last_bank(0x4000);
        self.board
            .prg
            .map_bank(0, 0x4000, self.bank_select as usize);
        self.board.prg.map_bank(0x4000, 0x4000, last);
    }
}

impl Mapper for Uxrom {
    fn board(&self) -> &Board {
        &self.board
    }

    fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => self.board.write_prg_ram(addr, value),
            0x8000..=0xFFFF => {
                self.bank_select = value;
                self.apply_banks();
                debug!(mapper = "UxROM", bank = value, "prg bank selected");
            }
            _ => {}
        }
    }

    fn registers(&self) -> Vec<u8> {
        vec![self.bank_select]
    }

    fn load_registers(&mut self, registers: &[u8]) -> Result<()> {
        expect_registers(registers, 1, "UxROM")?;
        self.bank_select = registers[0];
        self.apply_banks();
        Ok(())
    }

    fn debug_state(&self) -> String {
        format!(
            "bank=${:02X} prg_16k_banks={}",
            self.bank_select,
            self.board.prg.bank_count(0x4000)
        )
    }
}

struct Cnrom {
    board: Board,
    chr_bank: u8,
}

impl Cnrom {
    fn new(cart: Cartridge) -> Result<Self> {
        require_small_prg(&cart, "CNROM")?;
        Ok(Self {
            board: Board::new(cart),
            chr_bank: 0,
        })
    }
}

impl Mapper for Cnrom {
    fn board(&self) -> &Board {
        &self.board
    }

    fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => self.board.write_prg_ram(addr, value),
            0x8000..=0xFFFF => {
                self.chr_bank = value;
                self.board.chr.map_bank(0, 0x2000, value as usize);
                debug!(mapper = "CNROM", bank = value, "chr bank selected");
            }
            _ => {}
        }
    }

    fn registers(&self) -> Vec<u8> {
        vec![self.chr_bank]
    }

    fn load_registers(&mut self, registers: &[u8]) -> Result<()> {
        expect_registers(registers, 1, "CNROM")?;
        self.chr_bank = registers[0];
        self.board
            .chr
            .map_bank(0, 0x2000, self.chr_bank as usize);
        Ok(())
    }

    fn debug_state(&self) -> String {
        format!(
            "chr_bank=${:02X} chr_8k_banks={}",
            self.chr_bank,
            self.board.chr.bank_count(0x2000)
        )
    }
}

struct Mmc3 {
    board: Board,
    bank_select: u8,
    bank_regs: [u8; 8],
    prg_ram_enabled: bool,
    prg_ram_protected: bool,

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
    last_a12: bool,
    a12_low_count: u8,
}

impl Mmc3 {
    fn new(cart: Cartridge) -> Self {
        let mut mapper = Self {
            board: Board::new(cart),
            bank_select: 0,
            bank_regs: [0, 2, 4, 5, 6, 7, 0, 1],
            prg_ram_enabled: true,
            prg_ram_protected: false,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
            last_a12: false,
            a12_low_count: 0,
        };
        mapper.apply_banks();
        mapper
    }

    fn apply_banks(&mut self) {
        let r = self.bank_regs;
        let last = self.board.last_bank(0x2000);
        let second_last = self.board.prg.bank_count(0x2000).saturating_sub(2);
        let (first, third) = if (self.bank_select & 0x40) == 0 {
            (r[6] as usize, second_last)
        } else {
            (second_last, r[6] as usize)
        };
        let prg = &mut self.board.prg;
        prg.map_bank(0x0000, 0x2000, first);
        prg.map_bank(0x2000, 0x2000, r[7] as usize);
        prg.map_bank(0x4000, 0x2000, third);
        prg.map_bank(0x6000, 0x2000, last);

        // Two 2 KiB banks on one half, four 1 KiB banks on the other.
        let (wide, narrow) = if (self.bank_select & 0x80) == 0 {
            (0x0000, 0x1000)
        } else {
            (0x1000, 0x0000)
        };
        let chr = &mut self.board.chr;
        chr.map_bank(wide, 0x0800, (r[0] >> 1) as usize);
        chr.map_bank(wide + 0x0800, 0x0800, (r[1] >> 1) as usize);
        for (slot, &bank) in r[2..6].iter().enumerate() {
            chr.map_bank(narrow + slot * 0x0400, 0x0400, bank as usize);
        }
    }

    fn clock_irq_counter(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }

    fn monitor_a12(&mut self, addr: u16) {
        // Rising edges only count after A12 has stayed low for a while, which
        // filters out the rapid toggling inside a single fetch group.
        let a12 = (addr & 0x1000) != 0;
        if !a12 {
            self.a12_low_count = self.a12_low_count.saturating_add(1);
        } else {
            if !self.last_a12 && self.a12_low_count >= 8 {
                self.clock_irq_counter();
            }
            self.a12_low_count = 0;
        }
        self.last_a12 = a12;
    }
}

impl Mapper for Mmc3 {
    fn board(&self) -> &Board {
        &self.board
    }

    fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    fn cpu_peek(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF if !self.prg_ram_enabled => 0,
            _ => self.board.read_cpu(addr),
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        let even = (addr & 1) == 0;
        match addr {
            0x6000..=0x7FFF => {
                if self.prg_ram_enabled && !self.prg_ram_protected {
                    self.board.write_prg_ram(addr, value);
                }
            }
            0x8000..=0x9FFF => {
                if even {
                    self.bank_select = value;
                } else {
                    self.bank_regs[(self.bank_select & 0x07) as usize] = value;
                    debug!(mapper = "MMC3", register = self.bank_select & 0x07, bank = value, "bank register written");
                }
                self.apply_banks();
            }
            0xA000..=0xBFFF => {
                if even {
                    if self.board.mirroring != Mirroring::FourScreen {
                        self.board.mirroring = if (value & 1) == 0 {
                            Mirroring::Vertical
                        } else {
                            Mirroring::Horizontal
                        };
                    }
                } else {
                    self.prg_ram_enabled = (value & 0x80) != 0;
                    self.prg_ram_protected = (value & 0x40) != 0;
                }
            }
            0xC000..=0xDFFF => {
                if even {
                    self.irq_latch = value;
                } else {
                    self.irq_counter = 0;
                    self.irq_reload = true;
                }
            }
            0xE000..=0xFFFF => {
                if even {
                    self.irq_enabled = false;
                    self.irq_pending = false;
                } else {
                    self.irq_enabled = true;
                }
            }
            _ => {}
        }
    }

    fn notify_ppu_addr(&mut self, addr: u16) {
        self.monitor_a12(addr);
    }

    fn irq_pending(&self) -> bool {
        self.irq_pending
    }

    fn registers(&self) -> Vec<u8> {
        let mut regs = vec![self.bank_select];
        regs.extend_from_slice(&self.bank_regs);
        regs.extend_from_slice(&[
            self.prg_ram_enabled as u8,
            self.prg_ram_protected as u8,
            self.irq_latch,
            self.irq_counter,
            self.irq_reload as u8,
            self.irq_enabled as u8,
            self.irq_pending as u8,
            self.last_a12 as u8,
            self.a12_low_count,
            (self.board.mirroring == Mirroring::Horizontal) as u8,
        ]);
        regs
    }

    fn load_registers(&mut self, registers: &[u8]) -> Result<()> {
        expect_registers(registers, 19, "MMC3")?;
        self.bank_select = registers[0];
        self.bank_regs.copy_from_slice(&registers[1..9]);
        self.prg_ram_enabled = registers[9] != 0;
        self.prg_ram_protected = registers[10] != 0;
        self.irq_latch = registers[11];
        self.irq_counter = registers[12];
        self.irq_reload = registers[13] != 0;
        self.irq_enabled = registers[14] != 0;
        self.irq_pending = registers[15] != 0;
        self.last_a12 = registers[16] != 0;
        self.a12_low_count = registers[17];
        if self.board.mirroring != Mirroring::FourScreen {
            self.board.mirroring = if registers[18] != 0 {
                Mirroring::Horizontal
            } else {
                Mirroring::Vertical
            };
        }
        self.apply_banks();
        Ok(())
    }

    fn debug_state(&self) -> String {
        format!(
            "select=${:02X} regs={:02X?} irq_latch={} irq_counter={} irq_enabled={} irq_pending={} mirroring={:?}",
            self.bank_select,
            self.bank_regs,
            self.irq_latch,
            self.irq_counter,
            self.irq_enabled,
            self.irq_pending,
            self.board.mirroring
        )
    }
}

struct Mapper71 {
    board: Board,
    bank_select: u8,
    bank_mask: u8,
    mirroring_control: bool,
}

impl Mapper71 {
    fn new(cart: Cartridge) -> Self {
        // Submapper 1 (Fire Hawk) has 3-bit banking and one-screen
        // mirroring control at 0x9000-0x9FFF.
        let fire_hawk = cart.submapper_id == 1;
        let mut mapper = Self {
            board: Board::with_chr_ram(cart),
            bank_select: 0,
            bank_mask: if fire_hawk { 0x07 } else { 0x0F },
            mirroring_control: fire_hawk,
        };
        mapper.apply_banks();
        mapper
    }

    fn apply_banks(&mut self) {
        let last = self.board.last_bank(0x4000);
        self.board
            .prg
            .map_bank(0, 0x4000, self.bank_select as usize);
        self.board.prg.map_bank(0x4000, 0x4000, last);
    }
}

impl Mapper for Mapper71 {
    fn board(&self) -> &Board {
        &self.board
    }

    fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => self.board.write_prg_ram(addr, value),
            0x9000..=0x9FFF if self.mirroring_control => {
                self.board.mirroring = if (value & 0x10) != 0 {
                    Mirroring::OneScreenUpper
                } else {
                    Mirroring::OneScreenLower
                };
            }
            0xC000..=0xFFFF => {
                self.bank_select = value & self.bank_mask;
                self.apply_banks();
                debug!(mapper = 71, bank = self.bank_select, "prg bank selected");
            }
            _ => {}
        }
    }

    fn registers(&self) -> Vec<u8> {
        let mirroring = match self.board.mirroring {
            Mirroring::OneScreenUpper => 1,
            _ => 0,
        };
        vec![self.bank_select, mirroring]
    }

    fn load_registers(&mut self, registers: &[u8]) -> Result<()> {
        expect_registers(registers, 2, "mapper 71")?;
        self.bank_select = registers[0] & self.bank_mask;
        if self.mirroring_control {
            self.board.mirroring = if registers[1] != 0 {
                Mirroring::OneScreenUpper
            } else {
                Mirroring::OneScreenLower
            };
        }
        self.apply_banks();
        Ok(())
    }

    fn debug_state(&self) -> String {
        format!(
            "bank=${:02X} mask=${:02X} prg_16k_banks={} mirroring={:?}",
            self.bank_select,
            self.bank_mask,
            self.board.prg.bank_count(0x4000),
            self.board.mirroring
        )
    }
}
