use serde::{Deserialize, Serialize};

use super::mapper::Mirroring;
use super::palette::PixelFormat;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    Ntsc,
    Pal,
}

impl Region {
    /// CPU clock as an exact fraction (numerator, denominator) in Hz.
    pub fn cpu_hz(self) -> (u64, u64) {
        match self {
            Region::Ntsc => (19_687_500, 11),
            Region::Pal => (53_203_425, 32),
        }
    }

    /// PPU dots per CPU cycle as (numerator, denominator).
    pub fn dots_per_cycle(self) -> (u64, u64) {
        match self {
            Region::Ntsc => (3, 1),
            Region::Pal => (16, 5),
        }
    }

    pub fn scanlines_per_frame(self) -> u16 {
        match self {
            Region::Ntsc => 262,
            Region::Pal => 312,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sample_rate: u32,
    pub pixel_format: PixelFormat,
    pub mirroring_override: Option<Mirroring>,
    pub region_override: Option<Region>,
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            pixel_format: PixelFormat::Argb,
            mirroring_override: None,
            region_override: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "sample_rate": 48000 }"#).unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.pixel_format, PixelFormat::Argb);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.region_override.is_none());
    }

    #[test]
    fn overrides_parse() {
        let config: Config = serde_json::from_str(
            r#"{ "mirroring_override": "Vertical", "region_override": "Pal", "pixel_format": "Bgra" }"#,
        )
        .unwrap();
        assert_eq!(config.mirroring_override, Some(Mirroring::Vertical));
        assert_eq!(config.region_override, Some(Region::Pal));
        assert_eq!(config.pixel_format, PixelFormat::Bgra);
    }
}
