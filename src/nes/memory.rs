/// Byte-addressable read/write interface shared by every component on a bus.
///
/// `get` and `set` may have side effects (register latches, read buffers,
/// mapper IRQ counters). `peek` must not: debuggers and the instruction
/// decoder rely on it to inspect memory without disturbing the machine.
pub trait Memory {
    fn get(&mut self, addr: u16) -> u8;
    fn set(&mut self, addr: u16, value: u8);
    fn peek(&self, addr: u16) -> u8;
}

/// Smallest bank granularity used by any supported mapper (MMC3 CHR banks).
pub const PAGE_SIZE: usize = 0x0400;

/// Plain RAM. Every address resolves by wrapping modulo the RAM size.
#[derive(Debug, Clone)]
pub struct Ram {
    bytes: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size.max(1)],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::new(1);
        }
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrites the contents from `data`, truncating or zero-filling so the
    /// size never changes.
    pub fn load(&mut self, data: &[u8]) {
        let len = self.bytes.len().min(data.len());
        self.bytes[..len].copy_from_slice(&data[..len]);
        self.bytes[len..].fill(0);
    }

    pub fn read(&self, offset: usize) -> u8 {
        self.bytes[offset % self.bytes.len()]
    }

    pub fn write(&mut self, offset: usize, value: u8) {
        let len = self.bytes.len();
        self.bytes[offset % len] = value;
    }
}

impl Memory for Ram {
    fn get(&mut self, addr: u16) -> u8 {
        self.read(addr as usize)
    }

    fn set(&mut self, addr: u16, value: u8) {
        self.write(addr as usize, value);
    }

    fn peek(&self, addr: u16) -> u8 {
        self.read(addr as usize)
    }
}

/// Indirection table from logical pages of an address window to physical
/// pages of a ROM/RAM image.
///
/// `map(addr) = addr % PAGE_SIZE + pages[addr / PAGE_SIZE] * PAGE_SIZE`.
/// Physical indices are always reduced modulo the image's page count, so a
/// bank register can never point outside the image.
#[derive(Debug, Clone)]
pub struct BankMap {
    pages: Vec<usize>,
    physical_pages: usize,
}

impl BankMap {
    /// Builds an identity mapping of `window_size` bytes over an image of
    /// `image_size` bytes. Smaller images mirror across the window.
    pub fn new(window_size: usize, image_size: usize) -> Self {
        let logical = (window_size / PAGE_SIZE).max(1);
        let physical_pages = (image_size / PAGE_SIZE).max(1);
        Self {
            pages: (0..logical).map(|page| page % physical_pages).collect(),
            physical_pages,
        }
    }

    pub fn window_size(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    /// Number of whole `bank_size` banks in the underlying image (at least 1).
    pub fn bank_count(&self, bank_size: usize) -> usize {
        (self.physical_pages * PAGE_SIZE / bank_size).max(1)
    }

    /// Points the `bank_size` slot at byte offset `window_offset` to `bank`,
    /// wrapping `bank` modulo the number of banks in the image.
    pub fn map_bank(&mut self, window_offset: usize, bank_size: usize, bank: usize) {
        let pages_per_bank = (bank_size / PAGE_SIZE).max(1);
        let bank = bank % self.bank_count(bank_size);
        let first = window_offset / PAGE_SIZE;
        for i in 0..pages_per_bank {
            let slot = (first + i) % self.pages.len();
            self.pages[slot] = (bank * pages_per_bank + i) % self.physical_pages;
        }
    }

    pub fn map(&self, addr: usize) -> usize {
        let page = (addr / PAGE_SIZE) % self.pages.len();
        (addr % PAGE_SIZE) + self.pages[page] * PAGE_SIZE
    }

    pub fn physical_page(&self, logical: usize) -> usize {
        self.pages[logical % self.pages.len()]
    }
}

/// A ROM or RAM image seen through a [`BankMap`].
#[derive(Debug, Clone)]
pub struct BankedMemory {
    bytes: Vec<u8>,
    map: BankMap,
    writable: bool,
}

impl BankedMemory {
    pub fn rom(bytes: Vec<u8>, window_size: usize) -> Self {
        Self::build(bytes, window_size, false)
    }

    pub fn ram(bytes: Vec<u8>, window_size: usize) -> Self {
        Self::build(bytes, window_size, true)
    }

    fn build(mut bytes: Vec<u8>, window_size: usize, writable: bool) -> Self {
        if bytes.is_empty() {
            bytes.push(0);
        }
        let map = BankMap::new(window_size, bytes.len());
        Self {
            bytes,
            map,
            writable,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn load(&mut self, data: &[u8]) {
        let len = self.bytes.len().min(data.len());
        self.bytes[..len].copy_from_slice(&data[..len]);
    }

    pub fn bank_count(&self, bank_size: usize) -> usize {
        self.map.bank_count(bank_size)
    }

    pub fn map_bank(&mut self, window_offset: usize, bank_size: usize, bank: usize) {
        self.map.map_bank(window_offset, bank_size, bank);
    }

    pub fn bank_map(&self) -> &BankMap {
        &self.map
    }

    pub fn read(&self, offset: usize) -> u8 {
        let idx = self.map.map(offset);
        self.bytes[idx % self.bytes.len()]
    }

    /// Writes are dropped for ROM images.
    pub fn write(&mut self, offset: usize, value: u8) {
        if self.writable {
            let idx = self.map.map(offset) % self.bytes.len();
            self.bytes[idx] = value;
        }
    }
}
