pub mod nes;

pub use nes::config::{Config, Region};
pub use nes::{Nes, NesCounters, StepInfo};
