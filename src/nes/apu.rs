use std::f32::consts::PI;

use tracing::debug;

use super::config::{DEFAULT_SAMPLE_RATE, Region};

const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [u8; 4] = [0b0100_0000, 0b0110_0000, 0b0111_1000, 0b1001_1111];

const TRIANGLE_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15,
];

const NOISE_PERIODS_NTSC: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];
const NOISE_PERIODS_PAL: [u16; 16] = [
    4, 8, 14, 30, 60, 88, 118, 148, 188, 236, 354, 472, 708, 944, 1890, 3778,
];

const DMC_RATES_NTSC: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];
const DMC_RATES_PAL: [u16; 16] = [
    398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
];

/// CPU cycles at which the frame sequencer fires, in either mode.
#[derive(Debug, Clone, Copy)]
struct FrameTiming {
    quarter1: u32,
    half1: u32,
    quarter3: u32,
    four_step_last: u32,
    four_step_wrap: u32,
    five_step_last: u32,
    five_step_wrap: u32,
}

const FRAME_TIMING_NTSC: FrameTiming = FrameTiming {
    quarter1: 7_457,
    half1: 14_913,
    quarter3: 22_371,
    four_step_last: 29_829,
    four_step_wrap: 29_830,
    five_step_last: 37_281,
    five_step_wrap: 37_282,
};

const FRAME_TIMING_PAL: FrameTiming = FrameTiming {
    quarter1: 8_313,
    half1: 16_627,
    quarter3: 24_939,
    four_step_last: 33_252,
    four_step_wrap: 33_253,
    five_step_last: 41_565,
    five_step_wrap: 41_566,
};

#[derive(Debug, Clone, Copy, Default)]
struct LengthCounter {
    value: u8,
    halt: bool,
    enabled: bool,
}

impl LengthCounter {
    fn load(&mut self, index: u8) {
        if self.enabled {
            self.value = LENGTH_TABLE[(index >> 3) as usize];
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.value = 0;
        }
    }

    fn clock(&mut self) {
        if !self.halt && self.value > 0 {
            self.value -= 1;
        }
    }

    fn active(&self) -> bool {
        self.value > 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Envelope {
    start: bool,
    looping: bool,
    constant: bool,
    period: u8,
    divider: u8,
    decay: u8,
}

impl Envelope {
    fn write(&mut self, value: u8) {
        self.looping = (value & 0x20) != 0;
        self.constant = (value & 0x10) != 0;
        self.period = value & 0x0F;
    }

    fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.period;
            return;
        }
        if self.divider > 0 {
            self.divider -= 1;
            return;
        }
        self.divider = self.period;
        if self.decay > 0 {
            self.decay -= 1;
        } else if self.looping {
            self.decay = 15;
        }
    }

    fn volume(&self) -> u8 {
        if self.constant { self.period } else { self.decay }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pulse {
    /// Pulse 1 negates with one's complement, pulse 2 with two's.
    ones_complement: bool,
    duty: u8,
    step: u8,
    period: u16,
    timer: u16,
    length: LengthCounter,
    envelope: Envelope,
    sweep_enabled: bool,
    sweep_period: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_reload: bool,
    sweep_divider: u8,
}

impl Pulse {
    fn new(ones_complement: bool) -> Self {
        Self {
            ones_complement,
            duty: 0,
            step: 0,
            period: 0,
            timer: 0,
            length: LengthCounter::default(),
            envelope: Envelope::default(),
            sweep_enabled: false,
            sweep_period: 1,
            sweep_negate: false,
            sweep_shift: 0,
            sweep_reload: false,
            sweep_divider: 0,
        }
    }

    fn write(&mut self, reg: u16, value: u8) {
        match reg & 0x03 {
            0 => {
                self.duty = value >> 6;
                self.length.halt = (value & 0x20) != 0;
                self.envelope.write(value);
            }
            1 => {
                self.sweep_enabled = (value & 0x80) != 0;
                self.sweep_period = ((value >> 4) & 0x07) + 1;
                self.sweep_negate = (value & 0x08) != 0;
                self.sweep_shift = value & 0x07;
                self.sweep_reload = true;
            }
            2 => self.period = (self.period & 0x0700) | value as u16,
            _ => {
                self.period = (self.period & 0x00FF) | (((value & 0x07) as u16) << 8);
                self.length.load(value);
                self.step = 0;
                self.envelope.start = true;
            }
        }
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.period;
            self.step = (self.step + 1) & 0x07;
        } else {
            self.timer -= 1;
        }
    }

    fn sweep_target(&self) -> u16 {
        let change = self.period >> self.sweep_shift;
        if self.sweep_negate {
            let extra = u16::from(self.ones_complement);
            self.period.saturating_sub(change + extra)
        } else {
            self.period + change
        }
    }

    fn muted(&self) -> bool {
        self.period < 8 || self.sweep_target() > 0x07FF
    }

    fn clock_half_frame(&mut self) {
        self.length.clock();

        if self.sweep_divider == 0 && self.sweep_enabled && self.sweep_shift > 0 && !self.muted() {
            self.period = self.sweep_target();
        }
        if self.sweep_divider == 0 || self.sweep_reload {
            self.sweep_divider = self.sweep_period;
            self.sweep_reload = false;
        } else {
            self.sweep_divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        let high = (DUTY_TABLE[self.duty as usize] >> (7 - self.step)) & 0x01;
        if high == 0 || !self.length.active() || self.muted() {
            0
        } else {
            self.envelope.volume()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Triangle {
    control: bool,
    linear_reload_value: u8,
    linear_counter: u8,
    linear_reload: bool,
    period: u16,
    timer: u16,
    length: LengthCounter,
    step: u8,
}

impl Triangle {
    fn write(&mut self, reg: u16, value: u8) {
        match reg & 0x03 {
            0 => {
                self.control = (value & 0x80) != 0;
                self.length.halt = self.control;
                self.linear_reload_value = value & 0x7F;
            }
            2 => self.period = (self.period & 0x0700) | value as u16,
            3 => {
                self.period = (self.period & 0x00FF) | (((value & 0x07) as u16) << 8);
                self.length.load(value);
                self.linear_reload = true;
            }
            _ => {}
        }
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.period;
        // Ultrasonic periods freeze the sequencer instead of aliasing.
        if self.length.active() && self.linear_counter > 0 && self.period > 1 {
            self.step = (self.step + 1) & 0x1F;
        }
    }

    fn clock_linear(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    fn output(&self) -> u8 {
        if !self.length.active() || self.linear_counter == 0 || self.period < 2 {
            0
        } else {
            TRIANGLE_TABLE[self.step as usize]
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Noise {
    periods: &'static [u16; 16],
    short_mode: bool,
    period: u16,
    timer: u16,
    lfsr: u16,
    length: LengthCounter,
    envelope: Envelope,
}

impl Noise {
    fn new(periods: &'static [u16; 16]) -> Self {
        Self {
            periods,
            short_mode: false,
            period: periods[0],
            timer: 0,
            lfsr: 1,
            length: LengthCounter::default(),
            envelope: Envelope::default(),
        }
    }

    fn write(&mut self, reg: u16, value: u8) {
        match reg & 0x03 {
            0 => {
                self.length.halt = (value & 0x20) != 0;
                self.envelope.write(value);
            }
            2 => {
                self.short_mode = (value & 0x80) != 0;
                self.period = self.periods[(value & 0x0F) as usize];
            }
            3 => {
                self.length.load(value);
                self.envelope.start = true;
            }
            _ => {}
        }
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.period;
        let tap = if self.short_mode { 6 } else { 1 };
        let feedback = (self.lfsr ^ (self.lfsr >> tap)) & 0x01;
        self.lfsr = (self.lfsr >> 1) | (feedback << 14);
    }

    fn output(&self) -> u8 {
        if !self.length.active() || (self.lfsr & 0x01) != 0 {
            0
        } else {
            self.envelope.volume()
        }
    }
}

/// Delta modulation channel. Sample bytes come from CPU space through
/// [`Apu::take_dmc_request`] / [`Apu::complete_dmc_dma`].
#[derive(Debug, Clone, Copy)]
struct Dmc {
    rates: &'static [u16; 16],
    enabled: bool,
    irq_enabled: bool,
    irq: bool,
    looping: bool,
    period: u16,
    timer: u16,
    level: u8,
    start_addr: u16,
    start_length: u16,
    addr: u16,
    remaining: u16,
    buffer: Option<u8>,
    shifter: u8,
    bits: u8,
    silent: bool,
    dma_pending: bool,
    dma_delay: u8,
}

impl Dmc {
    fn new(rates: &'static [u16; 16]) -> Self {
        Self {
            rates,
            enabled: false,
            irq_enabled: false,
            irq: false,
            looping: false,
            period: rates[0],
            timer: rates[0],
            level: 0,
            start_addr: 0xC000,
            start_length: 1,
            addr: 0xC000,
            remaining: 0,
            buffer: None,
            shifter: 0,
            bits: 8,
            silent: true,
            dma_pending: false,
            dma_delay: 0,
        }
    }

    fn write(&mut self, reg: u16, value: u8) {
        match reg & 0x03 {
            0 => {
                self.irq_enabled = (value & 0x80) != 0;
                if !self.irq_enabled {
                    self.irq = false;
                }
                self.looping = (value & 0x40) != 0;
                self.period = self.rates[(value & 0x0F) as usize];
                if self.timer == 0 || self.timer > self.period {
                    self.timer = self.period;
                }
            }
            1 => self.level = value & 0x7F,
            2 => self.start_addr = 0xC000 | ((value as u16) << 6),
            _ => self.start_length = ((value as u16) << 4) | 0x0001,
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.irq = false;
        self.enabled = enabled;
        if !enabled {
            self.remaining = 0;
            self.dma_pending = false;
        } else if self.remaining == 0 {
            self.restart();
            // The first fetch after enabling lands about two cycles later.
            self.schedule_dma(2);
        }
    }

    fn restart(&mut self) {
        self.addr = self.start_addr;
        self.remaining = self.start_length;
    }

    fn schedule_dma(&mut self, delay: u8) {
        if self.enabled && self.buffer.is_none() && self.remaining > 0 {
            self.dma_pending = true;
            self.dma_delay = delay;
        }
    }

    fn dma_ready(&self) -> bool {
        self.enabled && self.dma_pending && self.dma_delay == 0
    }

    fn fill_buffer(&mut self, byte: u8) {
        self.dma_pending = false;
        self.buffer = Some(byte);
        if self.remaining == 0 {
            return;
        }
        self.addr = if self.addr == 0xFFFF {
            0x8000
        } else {
            self.addr + 1
        };
        self.remaining -= 1;
        if self.remaining == 0 {
            if self.looping {
                self.restart();
            } else if self.irq_enabled {
                self.irq = true;
            }
        }
    }

    fn clock_output(&mut self) {
        if !self.silent {
            if (self.shifter & 0x01) != 0 {
                if self.level <= 125 {
                    self.level += 2;
                }
            } else if self.level >= 2 {
                self.level -= 2;
            }
        }
        self.shifter >>= 1;
        self.bits -= 1;
        if self.bits > 0 {
            return;
        }

        self.bits = 8;
        match self.buffer.take() {
            Some(byte) => {
                self.shifter = byte;
                self.silent = false;
                self.schedule_dma(1);
            }
            None => self.silent = true,
        }
    }

    fn clock_timer(&mut self) {
        if self.dma_pending && self.dma_delay > 0 {
            self.dma_delay -= 1;
        }
        if self.timer > 1 {
            self.timer -= 1;
        } else {
            self.timer = self.period;
            self.clock_output();
        }
    }

    fn active(&self) -> bool {
        self.remaining > 0
    }
}

/// First-order high-pass or low-pass stage.
#[derive(Debug, Clone, Copy)]
struct Filter {
    cutoff_hz: f32,
    high_pass: bool,
    alpha: f32,
    prev_in: f32,
    prev_out: f32,
}

impl Filter {
    fn new(cutoff_hz: f32, high_pass: bool, sample_rate: u32) -> Self {
        let mut filter = Self {
            cutoff_hz,
            high_pass,
            alpha: 0.0,
            prev_in: 0.0,
            prev_out: 0.0,
        };
        filter.set_sample_rate(sample_rate);
        filter
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        let dt = 1.0 / sample_rate as f32;
        let rc = 1.0 / (2.0 * PI * self.cutoff_hz);
        self.alpha = if self.high_pass {
            rc / (rc + dt)
        } else {
            dt / (rc + dt)
        };
    }

    fn apply(&mut self, input: f32) -> f32 {
        let output = if self.high_pass {
            self.alpha * (self.prev_out + input - self.prev_in)
        } else {
            self.prev_out + self.alpha * (input - self.prev_out)
        };
        self.prev_in = input;
        self.prev_out = output;
        output
    }
}

pub struct Apu {
    timing: FrameTiming,
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,

    frame_cycle: u32,
    five_step: bool,
    irq_inhibit: bool,
    frame_irq: bool,
    pending_frame_write: Option<(u8, u8)>,

    cycle: u64,
    filters: [Filter; 3],
    dmc_request: Option<u16>,
}

impl Apu {
    pub fn new(region: Region) -> Self {
        let (timing, noise, dmc) = match region {
            Region::Ntsc => (FRAME_TIMING_NTSC, &NOISE_PERIODS_NTSC, &DMC_RATES_NTSC),
            Region::Pal => (FRAME_TIMING_PAL, &NOISE_PERIODS_PAL, &DMC_RATES_PAL),
        };
        Self {
            timing,
            pulse1: Pulse::new(true),
            pulse2: Pulse::new(false),
            triangle: Triangle::default(),
            noise: Noise::new(noise),
            dmc: Dmc::new(dmc),
            frame_cycle: 0,
            five_step: false,
            irq_inhibit: false,
            frame_irq: false,
            pending_frame_write: None,
            cycle: 0,
            filters: [
                Filter::new(90.0, true, DEFAULT_SAMPLE_RATE),
                Filter::new(440.0, true, DEFAULT_SAMPLE_RATE),
                Filter::new(14_000.0, false, DEFAULT_SAMPLE_RATE),
            ],
            dmc_request: None,
        }
    }

    /// Silences every channel as the console's reset line does. The frame
    /// counter mode survives.
    pub fn reset(&mut self) {
        self.write_status(0x00);
        self.frame_irq = false;
        self.dmc_request = None;
        self.pending_frame_write = None;
        self.frame_cycle = 0;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        for filter in &mut self.filters {
            filter.set_sample_rate(sample_rate.max(1));
        }
    }

    pub fn write_register(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000..=0x4003 => self.pulse1.write(addr, value),
            0x4004..=0x4007 => self.pulse2.write(addr, value),
            0x4008..=0x400B => self.triangle.write(addr, value),
            0x400C..=0x400F => self.noise.write(addr, value),
            0x4010..=0x4013 => self.dmc.write(addr, value),
            0x4015 => self.write_status(value),
            0x4017 => self.write_frame_counter(value),
            _ => {}
        }
    }

    pub fn peek_status(&self) -> u8 {
        let mut status = 0;
        for (bit, on) in [
            self.pulse1.length.active(),
            self.pulse2.length.active(),
            self.triangle.length.active(),
            self.noise.length.active(),
            self.dmc.active(),
        ]
        .into_iter()
        .enumerate()
        {
            if on {
                status |= 1 << bit;
            }
        }
        if self.frame_irq {
            status |= 0x40;
        }
        if self.dmc.irq {
            status |= 0x80;
        }
        status
    }

    pub fn read_status(&mut self) -> u8 {
        let status = self.peek_status();
        self.frame_irq = false;
        status
    }

    pub fn irq_pending(&self) -> bool {
        self.frame_irq || self.dmc.irq
    }

    fn write_status(&mut self, value: u8) {
        self.pulse1.length.set_enabled((value & 0x01) != 0);
        self.pulse2.length.set_enabled((value & 0x02) != 0);
        self.triangle.length.set_enabled((value & 0x04) != 0);
        self.noise.length.set_enabled((value & 0x08) != 0);
        self.dmc.set_enabled((value & 0x10) != 0);
        self.poll_dmc();
    }

    fn write_frame_counter(&mut self, value: u8) {
        if (value & 0x40) != 0 {
            self.frame_irq = false;
        }
        let delay = if (self.cycle & 0x01) == 0 { 3 } else { 4 };
        self.pending_frame_write = Some((value, delay));
    }

    fn apply_frame_counter(&mut self, value: u8) {
        self.five_step = (value & 0x80) != 0;
        self.irq_inhibit = (value & 0x40) != 0;
        if self.irq_inhibit {
            self.frame_irq = false;
        }
        self.frame_cycle = 0;
        if self.five_step {
            self.clock_quarter_frame();
            self.clock_half_frame();
        }
        debug!(five_step = self.five_step, inhibit = self.irq_inhibit, "apu frame counter");
    }

    /// Advances every unit by one CPU cycle.
    pub fn tick(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);

        if let Some((value, delay)) = self.pending_frame_write {
            if delay <= 1 {
                self.pending_frame_write = None;
                self.apply_frame_counter(value);
            } else {
                self.pending_frame_write = Some((value, delay - 1));
            }
        }

        if (self.cycle & 0x01) == 0 {
            self.pulse1.clock_timer();
            self.pulse2.clock_timer();
            self.noise.clock_timer();
        }
        self.triangle.clock_timer();
        self.dmc.clock_timer();
        self.poll_dmc();
        self.clock_frame_sequencer();
    }

    fn poll_dmc(&mut self) {
        if self.dmc.dma_ready() && self.dmc_request.is_none() {
            self.dmc_request = Some(self.dmc.addr);
        }
    }

    /// Address the DMC wants read, if a sample fetch is due.
    pub fn take_dmc_request(&mut self) -> Option<u16> {
        self.dmc_request.take()
    }

    pub fn complete_dmc_dma(&mut self, byte: u8) {
        self.dmc.fill_buffer(byte);
        self.poll_dmc();
    }

    fn clock_frame_sequencer(&mut self) {
        self.frame_cycle += 1;
        let t = self.timing;
        let cycle = self.frame_cycle;

        if cycle == t.quarter1 || cycle == t.quarter3 {
            self.clock_quarter_frame();
        } else if cycle == t.half1 {
            self.clock_quarter_frame();
            self.clock_half_frame();
        } else if self.five_step {
            if cycle == t.five_step_last {
                self.clock_quarter_frame();
                self.clock_half_frame();
            } else if cycle == t.five_step_wrap {
                self.frame_cycle = 0;
            }
        } else if cycle == t.four_step_last {
            self.clock_quarter_frame();
            self.clock_half_frame();
            self.raise_frame_irq();
        } else if cycle == t.four_step_wrap {
            self.raise_frame_irq();
            self.frame_cycle = 0;
        }
    }

    fn raise_frame_irq(&mut self) {
        if !self.irq_inhibit {
            self.frame_irq = true;
        }
    }

    fn clock_quarter_frame(&mut self) {
        self.pulse1.envelope.clock();
        self.pulse2.envelope.clock();
        self.triangle.clock_linear();
        self.noise.envelope.clock();
    }

    fn clock_half_frame(&mut self) {
        self.pulse1.clock_half_frame();
        self.pulse2.clock_half_frame();
        self.triangle.length.clock();
        self.noise.length.clock();
    }

    /// Nonlinear mix of the five channels, before filtering (0.0-1.0).
    pub fn mix(&self) -> f32 {
        let pulse = (self.pulse1.output() + self.pulse2.output()) as f32;
        let pulse_out = if pulse > 0.0 {
            95.88 / ((8128.0 / pulse) + 100.0)
        } else {
            0.0
        };

        let tnd = (self.triangle.output() as f32 / 8227.0)
            + (self.noise.output() as f32 / 12241.0)
            + (self.dmc.level as f32 / 22638.0);
        let tnd_out = if tnd > 0.0 {
            159.79 / ((1.0 / tnd) + 100.0)
        } else {
            0.0
        };

        pulse_out + tnd_out
    }

    /// One filtered output sample at the current instant.
    pub fn sample(&mut self) -> f32 {
        let mut value = self.mix();
        for filter in &mut self.filters {
            value = filter.apply(value);
        }
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(apu: &mut Apu, cycles: u32) {
        for _ in 0..cycles {
            apu.tick();
        }
    }

    #[test]
    fn length_counters_follow_enable_bits() {
        let mut apu = Apu::new(Region::Ntsc);
        apu.write_register(0x4003, 0x08);
        assert_eq!(apu.peek_status() & 0x01, 0, "disabled channels ignore loads");

        apu.write_register(0x4015, 0x0F);
        apu.write_register(0x4003, 0x08);
        apu.write_register(0x400B, 0x08);
        assert_eq!(apu.peek_status() & 0x0F, 0x05);

        apu.write_register(0x4015, 0x00);
        assert_eq!(apu.peek_status() & 0x0F, 0x00);
    }

    #[test]
    fn half_frames_count_down_length() {
        let mut apu = Apu::new(Region::Ntsc);
        apu.write_register(0x4015, 0x01);
        // Index 3 loads a length of 2.
        apu.write_register(0x4003, 0x03 << 3);
        run(&mut apu, 14_913);
        assert_ne!(apu.peek_status() & 0x01, 0);
        run(&mut apu, 29_830 - 14_913);
        assert_eq!(apu.peek_status() & 0x01, 0);
    }

    #[test]
    fn four_step_mode_raises_frame_irq() {
        let mut apu = Apu::new(Region::Ntsc);
        run(&mut apu, 29_828);
        assert!(!apu.irq_pending());
        run(&mut apu, 1);
        assert!(apu.irq_pending());

        assert_ne!(apu.read_status() & 0x40, 0);
        assert_eq!(apu.peek_status() & 0x40, 0);
    }

    #[test]
    fn inhibit_and_five_step_suppress_frame_irq() {
        let mut apu = Apu::new(Region::Ntsc);
        apu.write_register(0x4017, 0x40);
        run(&mut apu, 40_000);
        assert!(!apu.irq_pending());

        let mut apu = Apu::new(Region::Ntsc);
        apu.write_register(0x4017, 0x80);
        run(&mut apu, 80_000);
        assert!(!apu.irq_pending());
    }

    #[test]
    fn pal_frame_irq_is_later() {
        let mut apu = Apu::new(Region::Pal);
        run(&mut apu, 29_830);
        assert!(!apu.irq_pending());
        run(&mut apu, 33_252 - 29_830);
        assert!(apu.irq_pending());
    }

    #[test]
    fn sweep_negate_differs_between_pulses() {
        let mut pulse1 = Pulse::new(true);
        let mut pulse2 = Pulse::new(false);
        for pulse in [&mut pulse1, &mut pulse2] {
            pulse.period = 0x100;
            pulse.write(1, 0x89);
        }
        assert_eq!(pulse1.sweep_target(), 0x100 - 0x80 - 1);
        assert_eq!(pulse2.sweep_target(), 0x100 - 0x80);
    }

    #[test]
    fn dmc_requests_samples_and_raises_irq() {
        let mut apu = Apu::new(Region::Ntsc);
        apu.write_register(0x4010, 0x80);
        apu.write_register(0x4012, 0x01);
        apu.write_register(0x4013, 0x00);
        apu.write_register(0x4015, 0x10);
        assert_ne!(apu.peek_status() & 0x10, 0);

        run(&mut apu, 2);
        assert_eq!(apu.take_dmc_request(), Some(0xC040));
        apu.complete_dmc_dma(0xFF);

        assert!(apu.irq_pending());
        assert_eq!(apu.peek_status() & 0x90, 0x80);

        apu.write_register(0x4015, 0x00);
        assert!(!apu.irq_pending());
    }

    #[test]
    fn silent_apu_mixes_to_zero() {
        let mut apu = Apu::new(Region::Ntsc);
        run(&mut apu, 1_000);
        assert_eq!(apu.mix(), 0.0);
        assert_eq!(apu.sample(), 0.0);
    }

    #[test]
    fn constant_volume_pulse_is_audible() {
        let mut apu = Apu::new(Region::Ntsc);
        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4000, 0xBF);
        apu.write_register(0x4002, 0xFD);
        apu.write_register(0x4003, 0x08);
        let peak = (0..2_000)
            .map(|_| {
                apu.tick();
                apu.mix()
            })
            .fold(0.0f32, f32::max);
        assert!(peak > 0.1, "peak {peak}");
    }
}
