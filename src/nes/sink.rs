//! Collaborators the core calls synchronously from inside `Nes::step`.

use super::cpu::Regs;

pub trait VideoSink {
    /// One finished 256-pixel row, top to bottom.
    fn scanline(&mut self, _line: usize, _pixels: &[u32]) {}

    /// The whole 256x240 frame after the last visible row.
    fn frame_ready(&mut self, _frame: &[u32]) {}
}

pub trait AudioSink {
    /// Rate the core should pace samples to.
    fn sample_rate(&self) -> u32;

    fn push_sample(&mut self, sample: f32);
}

pub trait Observer {
    /// Every CPU-initiated write, after it reached its target.
    fn on_store(&mut self, _addr: u16, _value: u8) {}

    fn on_vblank(&mut self, _frame: u64) {}

    /// After each `step`, with the resulting registers and cycles consumed.
    fn on_step(&mut self, _regs: &Regs, _cycles: u32) {}
}
