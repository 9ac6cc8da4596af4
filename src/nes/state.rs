use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::bus::INTERNAL_RAM_SIZE;
use super::config::Region;
use super::cpu::Regs;
use super::mapper::MapperState;
use super::ppu::{OAM_SIZE, PALETTE_SIZE, PpuState, VRAM_SIZE};
use super::sequencer::SequencerState;

pub const STATE_VERSION: u32 = 1;

/// Everything needed to resume emulation, minus the APU. Encoding and
/// storage are up to the caller; the struct is plain serde data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NesState {
    pub version: u32,
    pub region: Region,
    pub cpu: Regs,
    pub nmi_previous: bool,
    pub ram: Vec<u8>,
    pub ppu: PpuState,
    pub mapper: MapperState,
    pub sequencer: SequencerState,
    pub bus_cycles: u64,
}

impl NesState {
    /// Shape checks that do not need the running machine. Mapper contents
    /// are checked by the mapper itself.
    pub fn validate(&self, region: Region) -> Result<()> {
        if self.version != STATE_VERSION {
            bail!(
                "unsupported snapshot version {}, expected {}",
                self.version,
                STATE_VERSION
            );
        }
        if self.region != region {
            bail!(
                "snapshot was taken on {:?} timing but this machine runs {:?}",
                self.region,
                region
            );
        }
        if self.ram.len() != INTERNAL_RAM_SIZE {
            bail!(
                "snapshot RAM is {} bytes, expected {}",
                self.ram.len(),
                INTERNAL_RAM_SIZE
            );
        }
        if self.ppu.vram.len() != VRAM_SIZE
            || self.ppu.palette.len() != PALETTE_SIZE
            || self.ppu.oam.len() != OAM_SIZE
        {
            bail!("snapshot PPU memory sizes do not match");
        }
        if self.ppu.scanline >= region.scanlines_per_frame() {
            bail!("snapshot scanline {} is out of range", self.ppu.scanline);
        }
        Ok(())
    }
}
