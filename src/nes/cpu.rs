use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decoder::{AddressingMode, Decoded, Opcode, decode};
use super::memory::Memory;

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_INTERRUPT: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

/// Bits that live in the status register. B and bit 5 only exist on the stack.
pub const STORED_FLAGS: u8 = !(FLAG_BREAK | FLAG_UNUSED);

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

pub const INTERRUPT_CYCLES: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regs {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
}

impl Default for Regs {
    fn default() -> Self {
        Self {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            s: 0,
            p: FLAG_INTERRUPT,
        }
    }
}

impl Regs {
    pub fn flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p &= STORED_FLAGS;
    }

    fn set_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }
}

/// What the CPU bus exposes beyond plain memory: the two interrupt lines.
pub trait CpuBus: Memory {
    fn nmi_line(&self) -> bool;
    fn irq_line(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Reset,
    Nmi,
    Irq,
    Instruction(Decoded),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuStep {
    pub kind: StepKind,
    pub cycles: u32,
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub regs: Regs,
    reset_pending: bool,
    nmi_previous: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// A powered-on CPU. The first step services RESET.
    pub fn new() -> Self {
        Self {
            regs: Regs::default(),
            reset_pending: true,
            nmi_previous: false,
        }
    }

    pub fn reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn nmi_previous(&self) -> bool {
        self.nmi_previous
    }

    pub fn set_nmi_previous(&mut self, line: bool) {
        self.nmi_previous = line;
    }

    /// Loads a snapshot; any pending RESET is dropped.
    pub fn restore(&mut self, regs: Regs, nmi_previous: bool) {
        self.regs = regs;
        self.regs.p &= STORED_FLAGS;
        self.nmi_previous = nmi_previous;
        self.reset_pending = false;
    }

    /// Services RESET, an NMI edge, a pending IRQ or one instruction, in that
    /// priority order.
    pub fn step<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> Result<CpuStep> {
        if self.reset_pending {
            self.reset_pending = false;
            self.regs.s = self.regs.s.wrapping_sub(3);
            self.regs.set_flag(FLAG_INTERRUPT, true);
            self.regs.pc = read_vector(bus, RESET_VECTOR);
            debug!("cpu reset, pc=${:04X}", self.regs.pc);
            return Ok(CpuStep {
                kind: StepKind::Reset,
                cycles: INTERRUPT_CYCLES,
            });
        }

        // The NMI line is sampled only here, so an edge raised while RESET
        // was being serviced stays pending.
        let nmi = bus.nmi_line();
        let nmi_edge = nmi && !self.nmi_previous;
        self.nmi_previous = nmi;

        if nmi_edge {
            self.interrupt(bus, NMI_VECTOR, false);
            return Ok(CpuStep {
                kind: StepKind::Nmi,
                cycles: INTERRUPT_CYCLES,
            });
        }

        if bus.irq_line() && !self.regs.flag(FLAG_INTERRUPT) {
            self.interrupt(bus, IRQ_VECTOR, false);
            return Ok(CpuStep {
                kind: StepKind::Irq,
                cycles: INTERRUPT_CYCLES,
            });
        }

        let decoded = decode(&*bus, self.regs.pc, self.regs.x, self.regs.y)?;
        // Advance first so JSR and BRK push the right return address.
        self.regs.pc = decoded.next_pc;
        let extra = self.execute(bus, &decoded);
        Ok(CpuStep {
            kind: StepKind::Instruction(decoded),
            cycles: decoded.cycles + extra,
        })
    }

    fn interrupt<B: CpuBus + ?Sized>(&mut self, bus: &mut B, vector: u16, brk: bool) {
        let status = if brk {
            self.regs.p | FLAG_BREAK | FLAG_UNUSED
        } else {
            (self.regs.p | FLAG_UNUSED) & !FLAG_BREAK
        };
        self.push_word(bus, self.regs.pc);
        self.push(bus, status);
        self.regs.set_flag(FLAG_INTERRUPT, true);
        self.regs.pc = read_vector(bus, vector);
    }

    fn push<B: CpuBus + ?Sized>(&mut self, bus: &mut B, value: u8) {
        bus.set(0x0100 | self.regs.s as u16, value);
        self.regs.s = self.regs.s.wrapping_sub(1);
    }

    fn pop<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        self.regs.s = self.regs.s.wrapping_add(1);
        bus.get(0x0100 | self.regs.s as u16)
    }

    fn push_word<B: CpuBus + ?Sized>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pop_word<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u16 {
        let lo = self.pop(bus) as u16;
        let hi = self.pop(bus) as u16;
        (hi << 8) | lo
    }

    fn operand<B: CpuBus + ?Sized>(&mut self, bus: &mut B, d: &Decoded) -> u8 {
        match d.mode {
            AddressingMode::Immediate => d.addr as u8,
            AddressingMode::Accumulator => self.regs.a,
            _ => bus.get(d.addr),
        }
    }

    /// Applies `op` to A or to memory. Memory operands see the original value
    /// written back before the result, as the hardware does.
    fn read_modify_write<B: CpuBus + ?Sized>(
        &mut self,
        bus: &mut B,
        d: &Decoded,
        op: impl FnOnce(&mut Regs, u8) -> u8,
    ) {
        if d.mode == AddressingMode::Accumulator {
            let a = self.regs.a;
            self.regs.a = op(&mut self.regs, a);
            return;
        }
        let value = bus.get(d.addr);
        bus.set(d.addr, value);
        let result = op(&mut self.regs, value);
        bus.set(d.addr, result);
    }

    fn add(&mut self, operand: u8) {
        let a = self.regs.a;
        let raw = a as u16 + operand as u16 + self.regs.flag(FLAG_CARRY) as u16;
        let result = raw as u8;
        self.regs.set_flag(FLAG_CARRY, raw > 0xFF);
        self.regs.set_flag(
            FLAG_OVERFLOW,
            ((a ^ operand) & 0x80) == 0 && ((a ^ result) & 0x80) != 0,
        );
        self.regs.a = result;
        self.regs.set_zn(result);
    }

    fn compare(&mut self, lhs: u8, rhs: u8) {
        let raw = lhs as u16 + (!rhs) as u16 + 1;
        self.regs.set_flag(FLAG_CARRY, raw > 0xFF);
        self.regs.set_zn(raw as u8);
    }

    fn branch(&mut self, d: &Decoded, taken: bool) -> u32 {
        if !taken {
            return 0;
        }
        self.regs.pc = d.addr;
        if (d.next_pc & 0xFF00) != (d.addr & 0xFF00) {
            2
        } else {
            1
        }
    }

    /// Runs one decoded instruction and returns cycles beyond its base cost.
    fn execute<B: CpuBus + ?Sized>(&mut self, bus: &mut B, d: &Decoded) -> u32 {
        match d.opcode {
            Opcode::Adc => {
                let value = self.operand(bus, d);
                self.add(value);
            }
            Opcode::Sbc => {
                let value = self.operand(bus, d);
                self.add(!value);
            }
            Opcode::And => {
                let value = self.operand(bus, d);
                self.regs.a &= value;
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Ora => {
                let value = self.operand(bus, d);
                self.regs.a |= value;
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Eor => {
                let value = self.operand(bus, d);
                self.regs.a ^= value;
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Bit => {
                let value = self.operand(bus, d);
                self.regs.set_flag(FLAG_ZERO, (self.regs.a & value) == 0);
                self.regs.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
                self.regs.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
            }
            Opcode::Cmp => {
                let value = self.operand(bus, d);
                self.compare(self.regs.a, value);
            }
            Opcode::Cpx => {
                let value = self.operand(bus, d);
                self.compare(self.regs.x, value);
            }
            Opcode::Cpy => {
                let value = self.operand(bus, d);
                self.compare(self.regs.y, value);
            }

            Opcode::Asl => self.read_modify_write(bus, d, |regs, v| {
                regs.set_flag(FLAG_CARRY, (v & 0x80) != 0);
                let r = v << 1;
                regs.set_zn(r);
                r
            }),
            Opcode::Lsr => self.read_modify_write(bus, d, |regs, v| {
                regs.set_flag(FLAG_CARRY, (v & 0x01) != 0);
                let r = v >> 1;
                regs.set_zn(r);
                r
            }),
            Opcode::Rol => self.read_modify_write(bus, d, |regs, v| {
                let carry_in = regs.flag(FLAG_CARRY) as u8;
                regs.set_flag(FLAG_CARRY, (v & 0x80) != 0);
                let r = (v << 1) | carry_in;
                regs.set_zn(r);
                r
            }),
            Opcode::Ror => self.read_modify_write(bus, d, |regs, v| {
                let carry_in = (regs.flag(FLAG_CARRY) as u8) << 7;
                regs.set_flag(FLAG_CARRY, (v & 0x01) != 0);
                let r = (v >> 1) | carry_in;
                regs.set_zn(r);
                r
            }),
            Opcode::Inc => self.read_modify_write(bus, d, |regs, v| {
                let r = v.wrapping_add(1);
                regs.set_zn(r);
                r
            }),
            Opcode::Dec => self.read_modify_write(bus, d, |regs, v| {
                let r = v.wrapping_sub(1);
                regs.set_zn(r);
                r
            }),

            Opcode::Bcc => return self.branch(d, !self.regs.flag(FLAG_CARRY)),
            Opcode::Bcs => return self.branch(d, self.regs.flag(FLAG_CARRY)),
            Opcode::Bne => return self.branch(d, !self.regs.flag(FLAG_ZERO)),
            Opcode::Beq => return self.branch(d, self.regs.flag(FLAG_ZERO)),
            Opcode::Bpl => return self.branch(d, !self.regs.flag(FLAG_NEGATIVE)),
            Opcode::Bmi => return self.branch(d, self.regs.flag(FLAG_NEGATIVE)),
            Opcode::Bvc => return self.branch(d, !self.regs.flag(FLAG_OVERFLOW)),
            Opcode::Bvs => return self.branch(d, self.regs.flag(FLAG_OVERFLOW)),

            Opcode::Brk => self.interrupt(bus, IRQ_VECTOR, true),
            Opcode::Rti => {
                self.regs.p = self.pop(bus) & STORED_FLAGS;
                self.regs.pc = self.pop_word(bus);
            }
            Opcode::Jmp => self.regs.pc = d.addr,
            Opcode::Jsr => {
                self.push_word(bus, d.next_pc.wrapping_sub(1));
                self.regs.pc = d.addr;
            }
            Opcode::Rts => {
                self.regs.pc = self.pop_word(bus).wrapping_add(1);
            }

            Opcode::Pha => self.push(bus, self.regs.a),
            Opcode::Php => self.push(bus, self.regs.p | FLAG_BREAK | FLAG_UNUSED),
            Opcode::Pla => {
                self.regs.a = self.pop(bus);
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Plp => {
                self.regs.p = self.pop(bus) & STORED_FLAGS;
            }

            Opcode::Lda => {
                self.regs.a = self.operand(bus, d);
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Ldx => {
                self.regs.x = self.operand(bus, d);
                self.regs.set_zn(self.regs.x);
            }
            Opcode::Ldy => {
                self.regs.y = self.operand(bus, d);
                self.regs.set_zn(self.regs.y);
            }
            Opcode::Sta => bus.set(d.addr, self.regs.a),
            Opcode::Stx => bus.set(d.addr, self.regs.x),
            Opcode::Sty => bus.set(d.addr, self.regs.y),

            Opcode::Tax => {
                self.regs.x = self.regs.a;
                self.regs.set_zn(self.regs.x);
            }
            Opcode::Tay => {
                self.regs.y = self.regs.a;
                self.regs.set_zn(self.regs.y);
            }
            Opcode::Txa => {
                self.regs.a = self.regs.x;
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Tya => {
                self.regs.a = self.regs.y;
                self.regs.set_zn(self.regs.a);
            }
            Opcode::Tsx => {
                self.regs.x = self.regs.s;
                self.regs.set_zn(self.regs.x);
            }
            Opcode::Txs => self.regs.s = self.regs.x,

            Opcode::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.set_zn(self.regs.x);
            }
            Opcode::Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.set_zn(self.regs.y);
            }
            Opcode::Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.set_zn(self.regs.x);
            }
            Opcode::Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.set_zn(self.regs.y);
            }

            Opcode::Clc => self.regs.set_flag(FLAG_CARRY, false),
            Opcode::Sec => self.regs.set_flag(FLAG_CARRY, true),
            Opcode::Cli => self.regs.set_flag(FLAG_INTERRUPT, false),
            Opcode::Sei => self.regs.set_flag(FLAG_INTERRUPT, true),
            Opcode::Cld => self.regs.set_flag(FLAG_DECIMAL, false),
            Opcode::Sed => self.regs.set_flag(FLAG_DECIMAL, true),
            Opcode::Clv => self.regs.set_flag(FLAG_OVERFLOW, false),
            Opcode::Nop => {}
        }
        0
    }
}

fn read_vector<B: CpuBus + ?Sized>(bus: &mut B, vector: u16) -> u16 {
    let lo = bus.get(vector) as u16;
    let hi = bus.get(vector.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        mem: Vec<u8>,
        nmi: bool,
        irq: bool,
        writes: Vec<(u16, u8)>,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                mem: vec![0; 0x10000],
                nmi: false,
                irq: false,
                writes: Vec::new(),
            }
        }

        fn load(&mut self, origin: u16, bytes: &[u8]) {
            for (i, b) in bytes.iter().enumerate() {
                self.mem[origin as usize + i] = *b;
            }
        }

        fn set_vector(&mut self, vector: u16, target: u16) {
            self.mem[vector as usize] = target as u8;
            self.mem[vector as usize + 1] = (target >> 8) as u8;
        }
    }

    impl Memory for TestBus {
        fn get(&mut self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }

        fn set(&mut self, addr: u16, value: u8) {
            self.writes.push((addr, value));
            self.mem[addr as usize] = value;
        }

        fn peek(&self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }
    }

    impl CpuBus for TestBus {
        fn nmi_line(&self) -> bool {
            self.nmi
        }

        fn irq_line(&self) -> bool {
            self.irq
        }
    }

    /// CPU that has already taken RESET into a program at 0x0200.
    fn boot(program: &[u8]) -> (Cpu, TestBus) {
        let mut bus = TestBus::new();
        bus.load(0x0200, program);
        bus.set_vector(RESET_VECTOR, 0x0200);
        let mut cpu = Cpu::new();
        let step = cpu.step(&mut bus).unwrap();
        assert_eq!(step.kind, StepKind::Reset);
        (cpu, bus)
    }

    #[test]
    fn reset_loads_vector_and_adjusts_stack() {
        let (cpu, _) = boot(&[0xEA]);
        assert_eq!(cpu.regs.pc, 0x0200);
        assert_eq!(cpu.regs.s, 0xFD);
        assert!(cpu.regs.flag(FLAG_INTERRUPT));
    }

    fn adc(a: u8, operand: u8, carry: bool) -> Regs {
        let (mut cpu, mut bus) = boot(&[0x69, operand]);
        cpu.regs.a = a;
        cpu.regs.set_flag(FLAG_CARRY, carry);
        cpu.step(&mut bus).unwrap();
        cpu.regs
    }

    #[test]
    fn adc_flag_truth_table() {
        // (a, operand, carry in) -> (result, V, C, N, Z)
        let cases = [
            (0x50, 0x10, false, 0x60, false, false, false, false),
            (0x50, 0x90, false, 0xE0, false, false, true, false),
            (0x50, 0xD0, false, 0x20, false, true, false, false),
            (0xD0, 0xD0, false, 0xA0, false, true, true, false),
            (0x20, 0x70, false, 0x90, true, false, true, false),
            // Carry in is clear here; with it set the sum would be 0x71.
            (0xE0, 0x90, false, 0x70, true, true, false, false),
            (0x10, 0xF0, false, 0x00, false, true, false, true),
        ];
        for (a, op, c, result, v, carry, n, z) in cases {
            let regs = adc(a, op, c);
            assert_eq!(regs.a, result, "A for {a:02X}+{op:02X}");
            assert_eq!(regs.flag(FLAG_OVERFLOW), v, "V for {a:02X}+{op:02X}");
            assert_eq!(regs.flag(FLAG_CARRY), carry, "C for {a:02X}+{op:02X}");
            assert_eq!(regs.flag(FLAG_NEGATIVE), n, "N for {a:02X}+{op:02X}");
            assert_eq!(regs.flag(FLAG_ZERO), z, "Z for {a:02X}+{op:02X}");
        }
    }

    #[test]
    fn adc_is_mode_invariant() {
        let immediate = adc(0x7F, 0x10, true);

        let (mut cpu, mut bus) = boot(&[0x65, 0x10]);
        bus.mem[0x0010] = 0x10;
        cpu.regs.a = 0x7F;
        cpu.regs.set_flag(FLAG_CARRY, true);
        cpu.step(&mut bus).unwrap();

        assert_eq!(cpu.regs.a, immediate.a);
        assert_eq!(cpu.regs.p, immediate.p);
    }

    #[test]
    fn sbc_borrows_through_inverted_carry() {
        let (mut cpu, mut bus) = boot(&[0x38, 0xE9, 0x01, 0xE9, 0x01]);
        cpu.regs.a = 0x01;
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.flag(FLAG_CARRY));
        assert!(cpu.regs.flag(FLAG_ZERO));
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a, 0xFF);
        assert!(!cpu.regs.flag(FLAG_CARRY));
        assert!(cpu.regs.flag(FLAG_NEGATIVE));
    }

    #[test]
    fn compare_leaves_register_untouched() {
        let (mut cpu, mut bus) = boot(&[0xC9, 0x40, 0xC9, 0x41]);
        cpu.regs.a = 0x40;
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a, 0x40);
        assert!(cpu.regs.flag(FLAG_CARRY));
        assert!(cpu.regs.flag(FLAG_ZERO));
        cpu.step(&mut bus).unwrap();
        assert!(!cpu.regs.flag(FLAG_CARRY));
        assert!(cpu.regs.flag(FLAG_NEGATIVE));
    }

    #[test]
    fn branch_cycle_counts() {
        // Not taken.
        let (mut cpu, mut bus) = boot(&[0xF0, 0x02]);
        cpu.regs.set_flag(FLAG_ZERO, false);
        assert_eq!(cpu.step(&mut bus).unwrap().cycles, 2);
        assert_eq!(cpu.regs.pc, 0x0202);

        // Taken, same page.
        let (mut cpu, mut bus) = boot(&[0xF0, 0x02]);
        cpu.regs.set_flag(FLAG_ZERO, true);
        assert_eq!(cpu.step(&mut bus).unwrap().cycles, 3);
        assert_eq!(cpu.regs.pc, 0x0204);

        // Taken backwards across a page.
        let (mut cpu, mut bus) = boot(&[0xD0, 0xF0]);
        cpu.regs.set_flag(FLAG_ZERO, false);
        assert_eq!(cpu.step(&mut bus).unwrap().cycles, 4);
        assert_eq!(cpu.regs.pc, 0x01F2);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let (mut cpu, mut bus) = boot(&[0x20, 0x00, 0x03, 0xEA]);
        bus.load(0x0300, &[0x60]);
        let s = cpu.regs.s;

        assert_eq!(cpu.step(&mut bus).unwrap().cycles, 6);
        assert_eq!(cpu.regs.pc, 0x0300);
        assert_eq!(bus.mem[0x01FD], 0x02);
        assert_eq!(bus.mem[0x01FC], 0x02);

        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0x0203);
        assert_eq!(cpu.regs.s, s);
    }

    #[test]
    fn brk_rti_round_trip() {
        let (mut cpu, mut bus) = boot(&[0x00, 0xFF, 0xEA]);
        bus.set_vector(IRQ_VECTOR, 0x0400);
        bus.load(0x0400, &[0x40]);
        cpu.regs.p = FLAG_CARRY | FLAG_NEGATIVE;
        let s = cpu.regs.s;

        let step = cpu.step(&mut bus).unwrap();
        assert_eq!(step.cycles, 7);
        assert_eq!(cpu.regs.pc, 0x0400);
        assert!(cpu.regs.flag(FLAG_INTERRUPT));
        let pushed = bus.mem[0x0100 | cpu.regs.s.wrapping_add(1) as usize];
        assert_eq!(pushed, FLAG_CARRY | FLAG_NEGATIVE | FLAG_BREAK | FLAG_UNUSED);

        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0x0202);
        assert_eq!(cpu.regs.p, FLAG_CARRY | FLAG_NEGATIVE);
        assert_eq!(cpu.regs.s, s);
    }

    #[test]
    fn php_plp_do_not_resurrect_break_flag() {
        let (mut cpu, mut bus) = boot(&[0x08, 0x28]);
        cpu.regs.p = FLAG_ZERO;
        cpu.step(&mut bus).unwrap();
        assert_eq!(bus.mem[0x01FD], FLAG_ZERO | FLAG_BREAK | FLAG_UNUSED);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.p, FLAG_ZERO);
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let (mut cpu, mut bus) = boot(&[0xEA, 0xEA, 0xEA, 0xEA]);
        bus.set_vector(NMI_VECTOR, 0x0200);
        bus.nmi = true;
        assert_eq!(cpu.step(&mut bus).unwrap().kind, StepKind::Nmi);
        let pushed = bus.mem[0x0100 | cpu.regs.s.wrapping_add(1) as usize];
        assert_eq!(pushed & FLAG_BREAK, 0);
        assert_ne!(pushed & FLAG_UNUSED, 0);

        assert!(matches!(
            cpu.step(&mut bus).unwrap().kind,
            StepKind::Instruction(_)
        ));
        bus.nmi = false;
        cpu.step(&mut bus).unwrap();
        bus.nmi = true;
        assert_eq!(cpu.step(&mut bus).unwrap().kind, StepKind::Nmi);
    }

    #[test]
    fn nmi_raised_during_reset_is_serviced_next() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xEA]);
        bus.set_vector(RESET_VECTOR, 0x0200);
        bus.set_vector(NMI_VECTOR, 0x0300);
        bus.nmi = true;
        let mut cpu = Cpu::new();
        assert_eq!(cpu.step(&mut bus).unwrap().kind, StepKind::Reset);
        assert!(!cpu.nmi_previous());
        assert_eq!(cpu.step(&mut bus).unwrap().kind, StepKind::Nmi);
        assert_eq!(cpu.regs.pc, 0x0300);
    }

    #[test]
    fn irq_is_level_triggered_and_masked() {
        let (mut cpu, mut bus) = boot(&[0x58, 0xEA]);
        bus.set_vector(IRQ_VECTOR, 0x0300);
        bus.load(0x0300, &[0xEA]);
        bus.irq = true;

        // I is set after reset, so CLI runs first.
        assert!(matches!(
            cpu.step(&mut bus).unwrap().kind,
            StepKind::Instruction(_)
        ));
        assert_eq!(cpu.step(&mut bus).unwrap().kind, StepKind::Irq);
        assert_eq!(cpu.regs.pc, 0x0300);
        // Still asserted, but now masked.
        assert!(matches!(
            cpu.step(&mut bus).unwrap().kind,
            StepKind::Instruction(_)
        ));
    }

    #[test]
    fn rmw_writes_original_value_first() {
        let (mut cpu, mut bus) = boot(&[0xEE, 0x34, 0x12]);
        bus.mem[0x1234] = 0x41;
        bus.writes.clear();
        assert_eq!(cpu.step(&mut bus).unwrap().cycles, 6);
        assert_eq!(bus.writes, vec![(0x1234, 0x41), (0x1234, 0x42)]);
    }

    #[test]
    fn accumulator_shifts() {
        let (mut cpu, mut bus) = boot(&[0x0A, 0x6A]);
        cpu.regs.a = 0x81;
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a, 0x02);
        assert!(cpu.regs.flag(FLAG_CARRY));
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a, 0x81);
        assert!(!cpu.regs.flag(FLAG_CARRY));
    }

    #[test]
    fn unexpected_opcode_propagates() {
        let (mut cpu, mut bus) = boot(&[0x02]);
        assert!(cpu.step(&mut bus).is_err());
        assert_eq!(cpu.regs.pc, 0x0200);
    }

    #[test]
    fn stack_wraps_instead_of_overflowing() {
        let (mut cpu, mut bus) = boot(&[0x48]);
        cpu.regs.s = 0x00;
        cpu.regs.a = 0x99;
        cpu.step(&mut bus).unwrap();
        assert_eq!(bus.mem[0x0100], 0x99);
        assert_eq!(cpu.regs.s, 0xFF);
    }
}
