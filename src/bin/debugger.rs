use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::Write;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use famicore::nes::cpu::{FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW, FLAG_ZERO};
use famicore::nes::sink::Observer;
use famicore::nes::state::NesState;
use famicore::{Config, Nes};
use tracing_subscriber::EnvFilter;

/// Steps `cont` will take before giving up on reaching a breakpoint.
const CONTINUE_LIMIT: u64 = 10_000_000;

/// Shared with the core through `Observer`; collects stores to watched
/// addresses until the REPL reports them.
#[derive(Default)]
struct Watches {
    addrs: BTreeSet<u16>,
    hits: Vec<(u16, u8)>,
}

struct WatchObserver(Rc<RefCell<Watches>>);

impl Observer for WatchObserver {
    fn on_store(&mut self, addr: u16, value: u8) {
        let mut watches = self.0.borrow_mut();
        if watches.addrs.contains(&addr) {
            watches.hits.push((addr, value));
        }
    }
}

struct Session {
    nes: Nes,
    breakpoints: BTreeSet<u16>,
    watches: Rc<RefCell<Watches>>,
}

/// Prints and clears pending watch hits. Returns whether there were any.
fn report_watch_hits(watches: &RefCell<Watches>) -> bool {
    let hits = std::mem::take(&mut watches.borrow_mut().hits);
    for (addr, value) in &hits {
        println!("watch ${addr:04X} <- ${value:02X}");
    }
    !hits.is_empty()
}

fn parse_byte(text: &str) -> Result<u8> {
    let value = parse_addr(text)?;
    u8::try_from(value).with_context(|| format!("{text:?} does not fit in a byte"))
}

fn parse_addr(text: &str) -> Result<u16> {
    let digits = text
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).with_context(|| format!("invalid address {text:?}"))
}

fn print_regs(nes: &Nes) {
    let regs = nes.cpu_regs();
    let flag = |bit: u8, name: char| if (regs.p & bit) != 0 { name } else { '-' };
    println!(
        "PC=${:04X} A=${:02X} X=${:02X} Y=${:02X} S=${:02X} P={}{}--{}{}{}{}",
        regs.pc,
        regs.a,
        regs.x,
        regs.y,
        regs.s,
        flag(FLAG_NEGATIVE, 'N'),
        flag(FLAG_OVERFLOW, 'V'),
        flag(FLAG_DECIMAL, 'D'),
        flag(FLAG_INTERRUPT, 'I'),
        flag(FLAG_ZERO, 'Z'),
        flag(FLAG_CARRY, 'C'),
    );
}

fn disassemble(nes: &Nes, start: u16, count: usize) {
    let mut pc = start;
    for _ in 0..count {
        match nes.decode_at(pc) {
            Ok(decoded) => {
                let len = decoded.next_pc.wrapping_sub(pc).max(1);
                let bytes: Vec<String> = (0..len)
                    .map(|i| format!("{:02X}", nes.peek_cpu(pc.wrapping_add(i))))
                    .collect();
                println!("${pc:04X}  {:<9} {decoded}", bytes.join(" "));
                pc = pc.wrapping_add(len);
            }
            Err(err) => {
                println!("${pc:04X}  {:02X}        ??? ({err})", nes.peek_cpu(pc));
                pc = pc.wrapping_add(1);
            }
        }
    }
}

fn dump_memory(nes: &Nes, start: u16) {
    for row in 0..4u16 {
        let base = start.wrapping_add(row * 16);
        let bytes: Vec<String> = (0..16)
            .map(|i| format!("{:02X}", nes.peek_cpu(base.wrapping_add(i))))
            .collect();
        println!("${base:04X}: {}", bytes.join(" "));
    }
}

fn print_help() {
    println!("Commands:");
    println!("  step, s [n]      - Step n instructions (default 1)");
    println!("  frame, f         - Run until the next frame completes");
    println!("  cont, c          - Run until a breakpoint is reached");
    println!("  bp <addr>        - Toggle a breakpoint");
    println!("  watch <addr>     - Toggle a write watch");
    println!("  regs, r          - Show CPU registers");
    println!("  set <reg> <val>  - Write a CPU register");
    println!("  poke <addr> <v>  - Write a byte to CPU memory");
    println!("  mem <addr>       - Show 64 bytes of CPU memory");
    println!("  vram <addr>      - Show 64 bytes of PPU memory");
    println!("  dis <addr> [n]   - Disassemble n instructions");
    println!("  ppu              - Show PPU registers");
    println!("  mapper           - Show mapper state");
    println!("  events [n]       - Show recent emulator events");
    println!("  counters         - Show emulator counters");
    println!("  save <file>      - Write a JSON snapshot");
    println!("  load <file>      - Restore a JSON snapshot");
    println!("  reset            - Pull the reset line");
    println!("  quit, q          - Exit debugger");
}

fn run_command(session: &mut Session, parts: &[&str]) -> Result<bool> {
    let nes = &mut session.nes;
    match parts[0] {
        "help" | "h" => print_help(),
        "step" | "s" => {
            let count = parts.get(1).map_or(Ok(1), |n| n.parse::<u32>())?;
            for _ in 0..count {
                let info = nes.step()?;
                if count == 1 {
                    println!("{:?} ({} cycles)", info.kind, info.cycles);
                }
            }
            report_watch_hits(&session.watches);
            print_regs(nes);
            disassemble(nes, nes.cpu_regs().pc, 1);
        }
        "frame" | "f" => {
            let steps = nes.run_frame()?;
            println!("frame {} done after {steps} steps", nes.frame_count());
            report_watch_hits(&session.watches);
            print_regs(nes);
        }
        "cont" | "c" => {
            let mut steps = 0;
            loop {
                nes.step()?;
                steps += 1;
                if report_watch_hits(&session.watches) {
                    println!("stopped on watch after {steps} steps");
                    break;
                }
                if session.breakpoints.contains(&nes.cpu_regs().pc) {
                    println!("breakpoint ${:04X} after {steps} steps", nes.cpu_regs().pc);
                    break;
                }
                if steps >= CONTINUE_LIMIT {
                    println!("no breakpoint hit after {steps} steps");
                    break;
                }
            }
            print_regs(nes);
            disassemble(nes, nes.cpu_regs().pc, 1);
        }
        "bp" => {
            let addr = parse_addr(parts.get(1).ok_or_else(|| anyhow!("usage: bp <addr>"))?)?;
            if session.breakpoints.remove(&addr) {
                println!("breakpoint ${addr:04X} removed");
            } else {
                session.breakpoints.insert(addr);
                println!("breakpoint ${addr:04X} set");
            }
        }
        "watch" => {
            let addr = parse_addr(parts.get(1).ok_or_else(|| anyhow!("usage: watch <addr>"))?)?;
            let mut watches = session.watches.borrow_mut();
            if watches.addrs.remove(&addr) {
                println!("watch ${addr:04X} removed");
            } else {
                watches.addrs.insert(addr);
                println!("watch ${addr:04X} set");
            }
        }
        "regs" | "r" => print_regs(nes),
        "set" => {
            let (Some(reg), Some(value)) = (parts.get(1), parts.get(2)) else {
                anyhow::bail!("usage: set <pc|a|x|y|s|p> <value>");
            };
            let mut regs = nes.cpu_regs();
            match reg.to_ascii_lowercase().as_str() {
                "pc" => regs.pc = parse_addr(value)?,
                "a" => regs.a = parse_byte(value)?,
                "x" => regs.x = parse_byte(value)?,
                "y" => regs.y = parse_byte(value)?,
                "s" => regs.s = parse_byte(value)?,
                "p" => regs.p = parse_byte(value)?,
                other => anyhow::bail!("unknown register {other}"),
            }
            nes.set_cpu_regs(regs);
            print_regs(nes);
        }
        "poke" => {
            let (Some(addr), Some(value)) = (parts.get(1), parts.get(2)) else {
                anyhow::bail!("usage: poke <addr> <value>");
            };
            let (addr, value) = (parse_addr(addr)?, parse_byte(value)?);
            nes.poke_cpu(addr, value);
            report_watch_hits(&session.watches);
        }
        "mem" => {
            let addr = parse_addr(parts.get(1).ok_or_else(|| anyhow!("usage: mem <addr>"))?)?;
            dump_memory(nes, addr);
        }
        "vram" => {
            let addr = parse_addr(parts.get(1).ok_or_else(|| anyhow!("usage: vram <addr>"))?)?;
            for row in 0..4u16 {
                let base = addr.wrapping_add(row * 16);
                let bytes: Vec<String> = (0..16)
                    .map(|i| format!("{:02X}", nes.peek_ppu(base.wrapping_add(i))))
                    .collect();
                println!("${base:04X}: {}", bytes.join(" "));
            }
        }
        "dis" => {
            let addr = match parts.get(1) {
                Some(text) => parse_addr(text)?,
                None => nes.cpu_regs().pc,
            };
            let count = parts.get(2).map_or(Ok(10), |n| n.parse::<usize>())?;
            disassemble(nes, addr, count);
        }
        "ppu" => {
            let regs = nes.ppu_registers();
            let (scanline, frame) = nes.ppu_position();
            println!("scanline {scanline}, frame {frame}");
            println!(
                "ctrl={:08b} mask={:08b} status={:08b} oam_addr=${:02X}",
                regs.ctrl, regs.mask, regs.status, regs.oam_addr
            );
            println!(
                "v=${:04X} t=${:04X} fine_x={} w={}",
                regs.v, regs.t, regs.fine_x, regs.w
            );
        }
        "mapper" => println!("{}: {}", nes.mapper_name(), nes.mapper_debug_state()),
        "events" => {
            let limit = parts.get(1).map_or(Ok(20), |n| n.parse::<usize>())?;
            for event in nes.recent_events(limit) {
                println!("  {event}");
            }
        }
        "counters" => println!("{}", serde_json::to_string_pretty(&nes.counters())?),
        "save" => {
            let path = parts.get(1).ok_or_else(|| anyhow!("usage: save <file>"))?;
            let json = serde_json::to_string(&nes.save_state())?;
            std::fs::write(path, json).with_context(|| format!("writing {path}"))?;
            println!("saved {path}");
        }
        "load" => {
            let path = parts.get(1).ok_or_else(|| anyhow!("usage: load <file>"))?;
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let state: NesState = serde_json::from_str(&json)?;
            nes.restore_state(&state)?;
            print_regs(nes);
        }
        "reset" => {
            nes.reset();
            println!("reset pending");
        }
        "quit" | "q" => return Ok(false),
        other => println!("Unknown command: {other}. Type 'help' for available commands."),
    }
    Ok(true)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(rom_path) = args.get(1) else {
        println!("Usage: famicore_debug <rom.nes> [config.json]");
        print_help();
        return Ok(());
    };

    let bytes = std::fs::read(rom_path).with_context(|| format!("reading {rom_path}"))?;
    let config = match args.get(2) {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {path}"))?
        }
        None => Config::default(),
    };
    let mut nes = Nes::from_ines(&bytes, config)?;
    println!("Loaded {rom_path} ({}, {:?})", nes.mapper_name(), nes.region());
    println!("Type 'help' for commands.");

    let watches = Rc::new(RefCell::new(Watches::default()));
    nes.set_observer(Box::new(WatchObserver(Rc::clone(&watches))));
    let mut session = Session {
        nes,
        breakpoints: BTreeSet::new(),
        watches,
    };
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match run_command(&mut session, &parts) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }

    Ok(())
}
