use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use famicore::nes::palette::PixelFormat;
use famicore::{Config, Nes, NesCounters, Region};
use quick_xml::Reader;
use quick_xml::events::Event;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct SuiteTest {
    filename: String,
    system: String,
    runframes: u32,
    tvsha1: String,
    recordedinput: String,
}

#[derive(Debug, Clone)]
struct RunReport {
    rgba: String,
    rgb: String,
    argb: String,
    bgra: String,
    pc: u16,
    halted: bool,
    counters: NesCounters,
    ppu_ctrl: u8,
    ppu_mask: u8,
    ppu_status: u8,
    scanline: u16,
    ram_f8: u8,
    events: Vec<String>,
}

#[derive(Debug, Clone)]
struct RunnerConfig {
    suite: PathBuf,
    rom_root: PathBuf,
    max_tests: usize,
    include_recorded_input: bool,
    include_pal: bool,
    contains: Vec<String>,
    frame_multiplier: u32,
    extra_frames: u32,
    core: Config,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            suite: PathBuf::from("external/nes-test-roms/test_roms.xml"),
            rom_root: PathBuf::from("external/nes-test-roms"),
            max_tests: 80,
            include_recorded_input: false,
            include_pal: false,
            contains: Vec::new(),
            frame_multiplier: 1,
            extra_frames: 0,
            core: Config::default(),
        }
    }
}

fn parse_args() -> Result<RunnerConfig> {
    let mut cfg = RunnerConfig::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--suite" => {
                let value = args.next().context("--suite requires a path")?;
                cfg.suite = PathBuf::from(value);
            }
            "--rom-root" => {
                let value = args.next().context("--rom-root requires a path")?;
                cfg.rom_root = PathBuf::from(value);
            }
            "--max-tests" => {
                let value = args.next().context("--max-tests requires an integer")?;
                cfg.max_tests = value
                    .parse::<usize>()
                    .with_context(|| format!("invalid --max-tests value: {value}"))?;
            }
            "--config" => {
                let value = args.next().context("--config requires a JSON file path")?;
                let text = fs::read_to_string(&value)
                    .with_context(|| format!("failed to read config {value}"))?;
                cfg.core = serde_json::from_str(&text)
                    .with_context(|| format!("invalid core config in {value}"))?;
            }
            "--include-recorded-input" => cfg.include_recorded_input = true,
            "--include-pal" => cfg.include_pal = true,
            "--contains" => {
                let value = args.next().context("--contains requires a substring")?;
                cfg.contains.push(value.to_lowercase());
            }
            "--frame-multiplier" => {
                let value = args
                    .next()
                    .context("--frame-multiplier requires an integer")?;
                cfg.frame_multiplier = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --frame-multiplier value: {value}"))?;
            }
            "--extra-frames" => {
                let value = args.next().context("--extra-frames requires an integer")?;
                cfg.extra_frames = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --extra-frames value: {value}"))?;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nUse --help to view supported options.");
            }
        }
    }

    Ok(cfg)
}

fn print_help() {
    println!(
        "Headless ROM suite runner for famicore\n\n\
Usage:\n\
  rom_test_runner [options]\n\n\
Options:\n\
  --suite <path>                 Path to test_roms.xml\n\
  --rom-root <path>              Root path containing ROM files\n\
  --config <path>                JSON core configuration (sample rate, overrides)\n\
  --max-tests <n>                Maximum number of tests to run (default 80)\n\
  --include-recorded-input       Include tests that require replay input\n\
  --include-pal                  Include PAL tests\n\
  --contains <substr>            Only run tests whose filename contains this text (repeatable)\n\
  --frame-multiplier <n>         Multiply XML runframes by n (default 1)\n\
  --extra-frames <n>             Add n frames after XML runframes (default 0)\n\
  -h, --help                     Show this help\n"
    );
}

fn parse_suite_xml(path: &Path) -> Result<Vec<SuiteTest>> {
    let xml = fs::read_to_string(path)
        .with_context(|| format!("failed to read suite XML: {}", path.display()))?;

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut tests = Vec::new();
    let mut current: Option<SuiteTest> = None;
    let mut reading_tvsha1 = false;
    let mut reading_recorded = false;

    loop {
        let text = match reader.read_event() {
            Ok(Event::Start(e)) => {
                match e.name().as_ref() {
                    b"test" => {
                        let mut test = SuiteTest {
                            filename: String::new(),
                            system: String::new(),
                            runframes: 0,
                            tvsha1: String::new(),
                            recordedinput: String::new(),
                        };
                        for attr in e.attributes().flatten() {
                            let value = attr
                                .decode_and_unescape_value(reader.decoder())
                                .map(|v| v.to_string())
                                .unwrap_or_default();
                            match attr.key.as_ref() {
                                b"filename" => test.filename = value,
                                b"system" => test.system = value,
                                b"runframes" => test.runframes = value.parse().unwrap_or(0),
                                _ => {}
                            }
                        }
                        current = Some(test);
                    }
                    b"tvsha1" => reading_tvsha1 = true,
                    b"recordedinput" => reading_recorded = true,
                    _ => {}
                }
                continue;
            }
            Ok(Event::Text(e)) => e.decode().map(|v| v.to_string()).unwrap_or_default(),
            Ok(Event::CData(e)) => e.decode().map(|v| v.to_string()).unwrap_or_default(),
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"tvsha1" => reading_tvsha1 = false,
                    b"recordedinput" => reading_recorded = false,
                    b"test" => {
                        if let Some(mut test) = current.take() {
                            test.tvsha1 = test.tvsha1.trim().to_string();
                            test.recordedinput = test.recordedinput.trim().to_string();
                            tests.push(test);
                        }
                    }
                    _ => {}
                }
                continue;
            }
            Ok(Event::Eof) => break,
            Err(err) => anyhow::bail!("failed to parse suite XML: {err}"),
            _ => continue,
        };

        if let Some(test) = current.as_mut() {
            if reading_tvsha1 {
                test.tvsha1.push_str(&text);
            } else if reading_recorded {
                test.recordedinput.push_str(&text);
            }
        }
    }

    Ok(tests)
}

fn should_run(test: &SuiteTest, cfg: &RunnerConfig) -> bool {
    if !cfg.include_pal && test.system.eq_ignore_ascii_case("pal") {
        return false;
    }
    if !cfg.include_recorded_input && !test.recordedinput.is_empty() {
        return false;
    }
    if !cfg.contains.is_empty() {
        let lower = test.filename.to_lowercase();
        if !cfg.contains.iter().any(|f| lower.contains(f)) {
            return false;
        }
    }
    true
}

/// Decodes a `recordedinput` payload: one byte per frame holding the
/// controller 1 button mask (bit 0 = A ... bit 7 = Right).
fn decode_recorded_input(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.split_whitespace().collect();
    BASE64_STANDARD
        .decode(compact)
        .context("recordedinput is not valid base64")
}

/// Hashes the frame after reordering each RGBA pixel with `order`; an index
/// of 4 or more drops that channel.
fn hash_frame(frame_rgba: &[u8], order: &[usize]) -> String {
    let mut bytes = Vec::with_capacity(frame_rgba.len());
    for px in frame_rgba.chunks_exact(4) {
        bytes.extend(order.iter().map(|&i| px[i]));
    }
    BASE64_STANDARD.encode(Sha1::digest(&bytes))
}

fn run_single(test: &SuiteTest, cfg: &RunnerConfig) -> Result<RunReport> {
    let rom_path = cfg.rom_root.join(&test.filename);
    let bytes = fs::read(&rom_path)
        .with_context(|| format!("failed to load ROM {}", rom_path.display()))?;

    let pal = test.system.eq_ignore_ascii_case("pal");
    let config = Config {
        pixel_format: PixelFormat::Rgba,
        region_override: if pal { Some(Region::Pal) } else { cfg.core.region_override },
        ..cfg.core.clone()
    };
    let mut nes = Nes::from_ines(&bytes, config)?;
    let input = decode_recorded_input(&test.recordedinput)?;

    let total_frames = test
        .runframes
        .saturating_mul(cfg.frame_multiplier)
        .saturating_add(cfg.extra_frames);
    for frame in 0..total_frames as usize {
        nes.set_buttons(0, input.get(frame).copied().unwrap_or(0));
        if let Err(err) = nes.run_frame() {
            warn!(rom = %test.filename, error = %err, "emulation stopped early");
            break;
        }
        nes.take_audio_samples();
    }
    debug!(rom = %test.filename, frames = nes.frame_count(), "run finished");

    let frame: Vec<u8> = nes
        .frame_buffer()
        .iter()
        .flat_map(|px| px.to_be_bytes())
        .collect();
    let ppu = nes.ppu_registers();
    let (scanline, _) = nes.ppu_position();

    Ok(RunReport {
        rgba: hash_frame(&frame, &[0, 1, 2, 3]),
        rgb: hash_frame(&frame, &[0, 1, 2]),
        argb: hash_frame(&frame, &[3, 0, 1, 2]),
        bgra: hash_frame(&frame, &[2, 1, 0, 3]),
        pc: nes.cpu_regs().pc,
        halted: nes.is_halted(),
        counters: nes.counters(),
        ppu_ctrl: ppu.ctrl,
        ppu_mask: ppu.mask,
        ppu_status: ppu.status,
        scanline,
        ram_f8: nes.peek_cpu(0x00F8),
        events: nes.recent_events(5),
    })
}

/// Blargg VBL/NMI timing ROMs report their status in RAM at $00F8.
fn suite_result_pass(test: &SuiteTest, report: &RunReport) -> bool {
    test.filename.starts_with("vbl_nmi_timing/") && report.ram_f8 == 0x01
}

fn matching_layout(test: &SuiteTest, report: &RunReport) -> Option<&'static str> {
    [
        (&report.rgba, "rgba"),
        (&report.rgb, "rgb"),
        (&report.argb, "argb"),
        (&report.bgra, "bgra"),
    ]
    .into_iter()
    .find(|(hash, _)| **hash == test.tvsha1)
    .map(|(_, layout)| layout)
    .or_else(|| suite_result_pass(test, report).then_some("suite-result"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cfg = parse_args()?;
    let start = Instant::now();
    let tests = parse_suite_xml(&cfg.suite)?;

    let selected: Vec<SuiteTest> = tests
        .into_iter()
        .filter(|t| should_run(t, &cfg))
        .take(cfg.max_tests)
        .collect();

    info!(count = selected.len(), suite = %cfg.suite.display(), "running suite");
    println!("Running {} test(s) from {}", selected.len(), cfg.suite.display());

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut skipped = 0usize;

    for (idx, test) in selected.iter().enumerate() {
        let label = format!("[{}/{}] {}", idx + 1, selected.len(), test.filename);
        match run_single(test, &cfg) {
            Ok(report) => match matching_layout(test, &report) {
                Some(layout) => {
                    passed += 1;
                    println!("PASS {label} [{layout}]");
                }
                None => {
                    failed += 1;
                    println!(
                        "FAIL {label}\n  expected: {}\n  got rgba: {}\n  got rgb : {}\n  got argb: {}\n  got bgra: {}\n  pc=${:04X} halted={} cycles={} nmis={} irqs={}\n  ppu ctrl=${:02X} mask=${:02X} status=${:02X} scanline={}\n  ram[$00F8]=${:02X}",
                        test.tvsha1,
                        report.rgba,
                        report.rgb,
                        report.argb,
                        report.bgra,
                        report.pc,
                        report.halted,
                        report.counters.cpu_cycles,
                        report.counters.nmis,
                        report.counters.irqs,
                        report.ppu_ctrl,
                        report.ppu_mask,
                        report.ppu_status,
                        report.scanline,
                        report.ram_f8,
                    );
                    for event in &report.events {
                        println!("  event: {event}");
                    }
                }
            },
            Err(err) => {
                skipped += 1;
                println!("SKIP {label} -> {err:#}");
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f32();
    println!();
    println!("Summary:");
    println!("- Passed: {passed}");
    println!("- Failed: {failed}");
    println!("- Skipped: {skipped}");
    println!("- Runtime: {elapsed:.2}s");

    Ok(())
}
