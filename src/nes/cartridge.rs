use anyhow::{Result, anyhow, bail};

use super::config::Region;
use super::mapper::Mirroring;

pub const HEADER_SIZE: usize = 16;
pub const TRAINER_SIZE: usize = 512;
pub const PRG_UNIT: usize = 16 * 1024;
pub const CHR_UNIT: usize = 8 * 1024;
pub const DEFAULT_PRG_RAM_SIZE: usize = 8 * 1024;

/// Parsed iNES / NES 2.0 image. Owns the PRG and CHR payloads until a mapper
/// takes them over.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_id: u16,
    pub submapper_id: u8,
    pub mirroring: Mirroring,
    pub has_battery: bool,
    pub region: Region,
    pub nes2: bool,
    pub prg_rom: Vec<u8>,
    pub chr_data: Vec<u8>,
    pub chr_is_ram: bool,
    pub prg_ram_size: usize,
}

impl Cartridge {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            bail!("image is too small to contain an iNES header");
        }
        if &bytes[0..4] != b"NES\x1A" {
            bail!("invalid iNES header magic, expected NES<EOF>");
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let nes2 = (flags7 & 0x0C) == 0x08;

        let mapper_low = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let mapper_id = if nes2 {
            mapper_low | (((bytes[8] as u16) & 0x0F) << 8)
        } else {
            mapper_low
        };
        let submapper_id = if nes2 { bytes[8] >> 4 } else { 0 };

        let mirroring = if (flags6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;
        let has_trainer = (flags6 & 0x04) != 0;
        let region = if (bytes[9] & 0x01) != 0 && !nes2 {
            Region::Pal
        } else if nes2 && (bytes[12] & 0x03) == 0x01 {
            Region::Pal
        } else {
            Region::Ntsc
        };

        let (prg_size, chr_size, prg_ram_size) = if nes2 {
            let prg_msb = (bytes[9] & 0x0F) as usize;
            let chr_msb = (bytes[9] >> 4) as usize;
            if prg_msb == 0x0F || chr_msb == 0x0F {
                bail!("NES 2.0 exponent-multiplier ROM size encoding is not supported");
            }
            let prg_units = (prg_msb << 8) | bytes[4] as usize;
            let chr_units = (chr_msb << 8) | bytes[5] as usize;
            let shift = bytes[10] & 0x0F;
            let prg_ram = if shift == 0 {
                DEFAULT_PRG_RAM_SIZE
            } else {
                64usize << shift
            };
            (prg_units * PRG_UNIT, chr_units * CHR_UNIT, prg_ram)
        } else {
            (
                bytes[4] as usize * PRG_UNIT,
                bytes[5] as usize * CHR_UNIT,
                DEFAULT_PRG_RAM_SIZE,
            )
        };

        if prg_size == 0 {
            return Err(anyhow!("invalid PRG ROM: header declares zero banks"));
        }

        let mut cursor = HEADER_SIZE;
        if has_trainer {
            cursor += TRAINER_SIZE;
        }

        if bytes.len() < cursor + prg_size {
            bail!(
                "image truncated: expected {} PRG bytes, found {}",
                prg_size,
                bytes.len().saturating_sub(cursor)
            );
        }
        let prg_rom = bytes[cursor..cursor + prg_size].to_vec();
        cursor += prg_size;

        let (chr_data, chr_is_ram) = if chr_size == 0 {
            (vec![0; CHR_UNIT], true)
        } else {
            if bytes.len() < cursor + chr_size {
                bail!(
                    "image truncated: expected {} CHR bytes, found {}",
                    chr_size,
                    bytes.len().saturating_sub(cursor)
                );
            }
            (bytes[cursor..cursor + chr_size].to_vec(), false)
        };

        Ok(Self {
            mapper_id,
            submapper_id,
            mirroring,
            has_battery,
            region,
            nes2,
            prg_rom,
            chr_data,
            chr_is_ram,
            prg_ram_size: prg_ram_size.max(DEFAULT_PRG_RAM_SIZE),
        })
    }
}

/// Builds an iNES 1.0 image in memory. Used by tests and tooling that
/// synthesize cartridges.
pub fn build_ines(mapper_id: u8, flags6_low: u8, prg: &[u8], chr: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + prg.len() + chr.len());
    out.extend_from_slice(b"NES\x1A");
    out.push((prg.len() / PRG_UNIT) as u8);
    out.push((chr.len() / CHR_UNIT) as u8);
    out.push((mapper_id << 4) | (flags6_low & 0x0F));
    out.push(mapper_id & 0xF0);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(prg);
    out.extend_from_slice(chr);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_ines(0, 0, &[0; PRG_UNIT], &[]);
        image[3] = 0x00;
        let err = Cartridge::from_bytes(&image).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn parses_mapper_mirroring_and_battery() {
        let image = build_ines(0x47, 0x03, &[0; 2 * PRG_UNIT], &[0; CHR_UNIT]);
        let cart = Cartridge::from_bytes(&image).unwrap();
        assert_eq!(cart.mapper_id, 0x47);
        assert_eq!(cart.mirroring, Mirroring::Vertical);
        assert!(cart.has_battery);
        assert!(!cart.chr_is_ram);
        assert_eq!(cart.prg_rom.len(), 2 * PRG_UNIT);
        assert_eq!(cart.region, Region::Ntsc);
    }

    #[test]
    fn missing_chr_becomes_ram() {
        let image = build_ines(2, 0, &[0; PRG_UNIT], &[]);
        let cart = Cartridge::from_bytes(&image).unwrap();
        assert!(cart.chr_is_ram);
        assert_eq!(cart.chr_data.len(), CHR_UNIT);
    }

    #[test]
    fn skips_trainer() {
        let mut prg = vec![0u8; PRG_UNIT];
        prg[0] = 0xA9;
        let mut image = build_ines(0, 0x04, &[], &[]);
        image[4] = 1;
        image.extend_from_slice(&[0xEE; TRAINER_SIZE]);
        image.extend_from_slice(&prg);
        let cart = Cartridge::from_bytes(&image).unwrap();
        assert_eq!(cart.prg_rom[0], 0xA9);
    }

    #[test]
    fn four_screen_and_pal_flags() {
        let mut image = build_ines(4, 0x08, &[0; PRG_UNIT], &[0; CHR_UNIT]);
        image[9] = 0x01;
        let cart = Cartridge::from_bytes(&image).unwrap();
        assert_eq!(cart.mirroring, Mirroring::FourScreen);
        assert_eq!(cart.region, Region::Pal);
    }

    #[test]
    fn truncated_prg_is_an_error() {
        let mut image = build_ines(0, 0, &[0; PRG_UNIT], &[]);
        image[4] = 2;
        assert!(Cartridge::from_bytes(&image).is_err());
    }

    #[test]
    fn nes2_reads_submapper_and_rejects_exponent_sizes() {
        let mut image = build_ines(71, 0, &[0; PRG_UNIT], &[]);
        image[7] |= 0x08;
        image[8] = 0x10;
        let cart = Cartridge::from_bytes(&image).unwrap();
        assert!(cart.nes2);
        assert_eq!(cart.mapper_id, 71);
        assert_eq!(cart.submapper_id, 1);

        image[9] = 0x0F;
        assert!(Cartridge::from_bytes(&image).is_err());
    }
}
