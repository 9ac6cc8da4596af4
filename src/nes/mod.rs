pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod joypad;
pub mod mapper;
pub mod memory;
pub mod palette;
pub mod ppu;
pub mod renderer;
pub mod sequencer;
pub mod sink;
pub mod state;

use std::collections::VecDeque;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use apu::Apu;
use bus::{Bus, BusEvent};
use cartridge::Cartridge;
use config::{Config, Region};
use cpu::{Cpu, Regs, StepKind};
use decoder::{Decoded, decode};
use joypad::Button;
use mapper::{create_mapper, mapper_name};
use memory::Memory;
use ppu::{Ppu, PpuRegisters};
use sequencer::Sequencer;
use sink::{AudioSink, Observer, VideoSink};
use state::{NesState, STATE_VERSION};

/// Samples kept for `take_audio_samples` when no audio sink is attached.
const MAX_BUFFERED_SAMPLES: usize = 1 << 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NesCounters {
    pub frames: u64,
    pub cpu_steps: u64,
    pub cpu_cycles: u64,
    pub nmis: u64,
    pub irqs: u64,
    pub oam_dma: u64,
    pub dmc_dma: u64,
    pub scanlines: u64,
    pub samples: u64,
}

/// Outcome of one [`Nes::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    pub kind: StepKind,
    /// CPU cycles consumed, DMA stalls included.
    pub cycles: u32,
    pub scanlines: u32,
    pub frame_completed: bool,
}

pub struct Nes {
    cpu: Cpu,
    bus: Bus,
    sequencer: Sequencer,
    config: Config,
    region: Region,
    mapper_name: &'static str,
    video_sink: Option<Box<dyn VideoSink>>,
    audio_sink: Option<Box<dyn AudioSink>>,
    audio_samples: Vec<f32>,
    counters: NesCounters,
    events: VecDeque<String>,
    halted: Option<String>,
}

impl Nes {
    /// Builds a powered-on console around `cart`. The first `step` services
    /// RESET.
    pub fn new(mut cart: Cartridge, config: Config) -> Result<Self> {
        if let Some(mirroring) = config.mirroring_override {
            cart.mirroring = mirroring;
        }
        let region = config.region_override.unwrap_or(cart.region);
        cart.region = region;

        let mapper_id = cart.mapper_id;
        let name = mapper_name(mapper_id);
        info!(
            mapper = mapper_id,
            mapper_name = name,
            prg_kib = cart.prg_rom.len() / 1024,
            chr_kib = cart.chr_data.len() / 1024,
            chr_ram = cart.chr_is_ram,
            battery = cart.has_battery,
            ?region,
            "cartridge loaded"
        );
        let mapper = create_mapper(cart)
            .with_context(|| format!("creating mapper {mapper_id} ({name})"))?;

        let mut apu = Apu::new(region);
        apu.set_sample_rate(config.sample_rate);
        let ppu = Ppu::new(region, config.pixel_format);

        let mut nes = Self {
            cpu: Cpu::new(),
            bus: Bus::new(ppu, apu, mapper),
            sequencer: Sequencer::new(region, config.sample_rate),
            region,
            mapper_name: name,
            video_sink: None,
            audio_sink: None,
            audio_samples: Vec::new(),
            counters: NesCounters::default(),
            events: VecDeque::with_capacity(config.event_capacity),
            halted: None,
            config,
        };
        nes.push_event(format!("ROM loaded: mapper {mapper_id} ({name}), {region:?}"));
        Ok(nes)
    }

    pub fn from_ines(bytes: &[u8], config: Config) -> Result<Self> {
        let cart = Cartridge::from_bytes(bytes).context("parsing iNES image")?;
        Self::new(cart, config)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mapper_name(&self) -> &'static str {
        self.mapper_name
    }

    pub fn mapper_debug_state(&self) -> String {
        self.bus.mapper.debug_state()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Pulls the reset line; the next `step` services it. Clears a halt.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.ppu.reset();
        self.bus.apu.reset();
        self.sequencer.reset();
        self.halted = None;
        info!("console reset");
        self.push_event("reset requested");
    }

    /// Runs one instruction or interrupt entry and lets the PPU and APU catch
    /// up with the cycles it consumed.
    pub fn step(&mut self) -> Result<StepInfo> {
        if let Some(reason) = &self.halted {
            bail!("{reason}");
        }

        let step = match self.cpu.step(&mut self.bus) {
            Ok(step) => step,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(%reason, "cpu halted");
                self.push_event(format!("halted: {reason}"));
                self.halted = Some(reason);
                return Err(err);
            }
        };
        self.counters.cpu_steps += 1;
        self.note_step_kind(step.kind);

        let mut cycles = step.cycles + self.bus.take_stall_cycles();
        cycles += self.bus.run_apu(cycles);
        self.note_bus_events();
        self.counters.cpu_cycles += u64::from(cycles);

        let samples = self.sequencer.advance(cycles);
        let mut info = StepInfo {
            kind: step.kind,
            cycles,
            scanlines: 0,
            frame_completed: false,
        };
        while self.sequencer.scanline_due() {
            self.run_scanline(&mut info);
        }
        self.emit_samples(samples);

        if let Some(observer) = self.bus.observer.as_mut() {
            observer.on_step(&self.cpu.regs, cycles);
        }
        Ok(info)
    }

    /// Steps until the PPU finishes a frame. Returns the number of steps.
    pub fn run_frame(&mut self) -> Result<u64> {
        let mut steps = 0;
        loop {
            steps += 1;
            if self.step()?.frame_completed {
                return Ok(steps);
            }
        }
    }

    fn note_step_kind(&mut self, kind: StepKind) {
        let pc = self.cpu.regs.pc;
        match kind {
            StepKind::Reset => {
                info!(pc = format_args!("${pc:04X}"), "reset serviced");
                self.push_event(format!("RESET -> PC=${pc:04X}"));
            }
            StepKind::Nmi => {
                self.counters.nmis += 1;
                debug!(pc, "nmi serviced");
                self.push_event(format!("NMI -> PC=${pc:04X}"));
            }
            StepKind::Irq => {
                self.counters.irqs += 1;
                debug!(pc, "irq serviced");
                self.push_event(format!("IRQ -> PC=${pc:04X}"));
            }
            StepKind::Instruction(_) => {}
        }
    }

    fn note_bus_events(&mut self) {
        let events: Vec<BusEvent> = self.bus.drain_events().collect();
        for event in events {
            match event {
                BusEvent::OamDma { page, stall } => {
                    self.counters.oam_dma += 1;
                    debug!(page, stall, "oam dma");
                    self.push_event(format!("OAM DMA page=${page:02X} stall={stall}"));
                }
                BusEvent::DmcDma { addr } => {
                    self.counters.dmc_dma += 1;
                    self.push_event(format!("DMC DMA ${addr:04X}"));
                }
            }
        }
    }

    fn run_scanline(&mut self, info: &mut StepInfo) {
        let event = self.bus.ppu.run_scanline(self.bus.mapper.as_mut());
        self.counters.scanlines += 1;
        info.scanlines += 1;

        if event.row_ready
            && let Some(sink) = self.video_sink.as_mut()
        {
            let line = event.line as usize;
            sink.scanline(line, self.bus.ppu.row(line));
        }
        if event.vblank_started
            && let Some(observer) = self.bus.observer.as_mut()
        {
            observer.on_vblank(self.bus.ppu.frame());
        }
        if event.frame_complete {
            self.counters.frames += 1;
            info.frame_completed = true;
            if let Some(sink) = self.video_sink.as_mut() {
                sink.frame_ready(self.bus.ppu.frame_buffer());
            }
        }

        self.sequencer
            .finish_scanline(self.bus.ppu.current_line_dots());
    }

    fn emit_samples(&mut self, count: u32) {
        for _ in 0..count {
            let sample = self.bus.apu.sample();
            match self.audio_sink.as_mut() {
                Some(sink) => sink.push_sample(sample),
                None => {
                    if self.audio_samples.len() >= MAX_BUFFERED_SAMPLES {
                        self.audio_samples.drain(..MAX_BUFFERED_SAMPLES / 2);
                    }
                    self.audio_samples.push(sample);
                }
            }
        }
        self.counters.samples += u64::from(count);
    }

    fn push_event<S: Into<String>>(&mut self, event: S) {
        if self.config.event_capacity == 0 {
            return;
        }
        if self.events.len() >= self.config.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.into());
    }

    /// Up to `limit` most recent debug events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<String> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn counters(&self) -> NesCounters {
        self.counters
    }

    pub fn frame_buffer(&self) -> &[u32] {
        self.bus.ppu.frame_buffer()
    }

    pub fn frame_count(&self) -> u64 {
        self.bus.ppu.frame()
    }

    pub fn take_audio_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.audio_samples)
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        let sample_rate = sample_rate.max(1);
        self.config.sample_rate = sample_rate;
        self.sequencer.set_sample_rate(self.region, sample_rate);
        self.bus.apu.set_sample_rate(sample_rate);
    }

    pub fn set_video_sink(&mut self, sink: Box<dyn VideoSink>) {
        self.video_sink = Some(sink);
    }

    /// Attaches an audio sink; its declared rate replaces the configured one.
    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.set_sample_rate(sink.sample_rate());
        self.audio_sink = Some(sink);
    }

    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.bus.observer = Some(observer);
    }

    pub fn cpu_regs(&self) -> Regs {
        self.cpu.regs
    }

    pub fn set_cpu_regs(&mut self, regs: Regs) {
        self.cpu.regs = regs;
        self.cpu.regs.p &= cpu::STORED_FLAGS;
    }

    pub fn ppu_registers(&self) -> PpuRegisters {
        self.bus.ppu.registers()
    }

    pub fn set_ppu_registers(&mut self, regs: PpuRegisters) {
        self.bus.ppu.set_registers(regs);
    }

    pub fn ppu_position(&self) -> (u16, u64) {
        (self.bus.ppu.scanline(), self.bus.ppu.frame())
    }

    /// CPU-space read without side effects.
    pub fn peek_cpu(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    /// CPU-space write with the same effects a store instruction has.
    pub fn poke_cpu(&mut self, addr: u16, value: u8) {
        self.bus.set(addr, value);
    }

    pub fn peek_ppu(&self, addr: u16) -> u8 {
        self.bus.ppu.peek_memory(addr, self.bus.mapper.as_ref())
    }

    pub fn oam(&self) -> &[u8] {
        self.bus.ppu.oam()
    }

    /// Decodes the instruction at `addr` using the current index registers.
    pub fn decode_at(&self, addr: u16) -> Result<Decoded> {
        decode(&self.bus, addr, self.cpu.regs.x, self.cpu.regs.y)
    }

    pub fn down(&mut self, player: usize, button: Button) {
        if let Some(pad) = self.bus.joypads.get_mut(player) {
            pad.press(button);
        }
    }

    pub fn up(&mut self, player: usize, button: Button) {
        if let Some(pad) = self.bus.joypads.get_mut(player) {
            pad.release(button);
        }
    }

    /// Replaces the whole button mask (bit 0 = A ... bit 7 = Right).
    pub fn set_buttons(&mut self, player: usize, buttons: u8) {
        if let Some(pad) = self.bus.joypads.get_mut(player) {
            pad.set_buttons(buttons);
        }
    }

    pub fn buttons(&self, player: usize) -> u8 {
        self.bus.joypads.get(player).map_or(0, |pad| pad.buttons())
    }

    pub fn persistent_ram(&self) -> Option<&[u8]> {
        self.bus.mapper.persistent_ram()
    }

    pub fn load_persistent_ram(&mut self, data: &[u8]) -> Result<()> {
        self.bus.mapper.load_persistent_ram(data)
    }

    pub fn save_state(&self) -> NesState {
        NesState {
            version: STATE_VERSION,
            region: self.region,
            cpu: self.cpu.regs,
            nmi_previous: self.cpu.nmi_previous(),
            ram: self.bus.ram.as_slice().to_vec(),
            ppu: self.bus.ppu.save_state(),
            mapper: self.bus.mapper.save_state(),
            sequencer: self.sequencer.save_state(),
            bus_cycles: self.bus.cycles(),
        }
    }

    /// Loads a snapshot. Nothing is changed if any part is rejected.
    pub fn restore_state(&mut self, state: &NesState) -> Result<()> {
        let sequencer = match self.stage_restore(state) {
            Ok(sequencer) => sequencer,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "snapshot rejected");
                return Err(err);
            }
        };
        self.bus.ppu.restore_state(&state.ppu)?;
        self.bus.ram.load(&state.ram);
        self.cpu.restore(state.cpu, state.nmi_previous);
        self.sequencer = sequencer;
        self.bus.set_cycles(state.bus_cycles);
        self.halted = None;
        info!(pc = state.cpu.pc, "state restored");
        self.push_event(format!("state restored, PC=${:04X}", state.cpu.pc));
        Ok(())
    }

    /// Checks everything that can reject a snapshot. The mapper goes last
    /// since it validates before loading anything.
    fn stage_restore(&mut self, state: &NesState) -> Result<Sequencer> {
        state.validate(self.region)?;
        let mut sequencer = self.sequencer.clone();
        sequencer.restore_state(&state.sequencer)?;
        self.bus
            .mapper
            .restore_state(&state.mapper)
            .context("restoring mapper state")?;
        Ok(sequencer)
    }
}
