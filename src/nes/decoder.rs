use std::fmt;
use std::sync::LazyLock;

use anyhow::{Result, bail};

use super::memory::Memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{self:?}").to_ascii_uppercase();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Relative,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
}

impl AddressingMode {
    pub fn operand_bytes(self) -> u16 {
        use AddressingMode::*;
        match self {
            Implied | Accumulator => 0,
            Immediate | ZeroPage | ZeroPageX | ZeroPageY | Relative | IndexedIndirect
            | IndirectIndexed => 1,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 2,
        }
    }
}

/// Result of decoding one instruction. For `Immediate` the `addr` field holds
/// the literal operand, not a memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub pc: u16,
    pub byte: u8,
    pub opcode: Opcode,
    pub mode: AddressingMode,
    pub addr: u16,
    pub next_pc: u16,
    pub cycles: u32,
}

#[derive(Debug, Clone, Copy)]
struct Encoding {
    opcode: Opcode,
    mode: AddressingMode,
    cycles: u32,
    page_penalty: bool,
}

type ModeEntry = (AddressingMode, u8, u32, bool);

macro_rules! encodings {
    ($($opcode:ident => [$(($mode:ident, $byte:literal, $cycles:literal $(, $penalty:ident)?)),+ $(,)?]),+ $(,)?) => {
        &[$((Opcode::$opcode, &[$((AddressingMode::$mode, $byte, $cycles, encodings!(@penalty $($penalty)?))),+])),+]
    };
    (@penalty page) => { true };
    (@penalty) => { false };
}

/// Opcode -> addressing mode -> (encoding byte, base cycles, page-cross
/// penalty). Only documented instructions.
const ENCODINGS: &[(Opcode, &[ModeEntry])] = encodings! {
    Adc => [(Immediate, 0x69, 2), (ZeroPage, 0x65, 3), (ZeroPageX, 0x75, 4), (Absolute, 0x6D, 4),
            (AbsoluteX, 0x7D, 4, page), (AbsoluteY, 0x79, 4, page), (IndexedIndirect, 0x61, 6),
            (IndirectIndexed, 0x71, 5, page)],
    And => [(Immediate, 0x29, 2), (ZeroPage, 0x25, 3), (ZeroPageX, 0x35, 4), (Absolute, 0x2D, 4),
            (AbsoluteX, 0x3D, 4, page), (AbsoluteY, 0x39, 4, page), (IndexedIndirect, 0x21, 6),
            (IndirectIndexed, 0x31, 5, page)],
    Asl => [(Accumulator, 0x0A, 2), (ZeroPage, 0x06, 5), (ZeroPageX, 0x16, 6), (Absolute, 0x0E, 6),
            (AbsoluteX, 0x1E, 7)],
    Bcc => [(Relative, 0x90, 2)],
    Bcs => [(Relative, 0xB0, 2)],
    Beq => [(Relative, 0xF0, 2)],
    Bit => [(ZeroPage, 0x24, 3), (Absolute, 0x2C, 4)],
    Bmi => [(Relative, 0x30, 2)],
    Bne => [(Relative, 0xD0, 2)],
    Bpl => [(Relative, 0x10, 2)],
    Brk => [(Implied, 0x00, 7)],
    Bvc => [(Relative, 0x50, 2)],
    Bvs => [(Relative, 0x70, 2)],
    Clc => [(Implied, 0x18, 2)],
    Cld => [(Implied, 0xD8, 2)],
    Cli => [(Implied, 0x58, 2)],
    Clv => [(Implied, 0xB8, 2)],
    Cmp => [(Immediate, 0xC9, 2), (ZeroPage, 0xC5, 3), (ZeroPageX, 0xD5, 4), (Absolute, 0xCD, 4),
            (AbsoluteX, 0xDD, 4, page), (AbsoluteY, 0xD9, 4, page), (IndexedIndirect, 0xC1, 6),
            (IndirectIndexed, 0xD1, 5, page)],
    Cpx => [(Immediate, 0xE0, 2), (ZeroPage, 0xE4, 3), (Absolute, 0xEC, 4)],
    Cpy => [(Immediate, 0xC0, 2), (ZeroPage, 0xC4, 3), (Absolute, 0xCC, 4)],
    Dec => [(ZeroPage, 0xC6, 5), (ZeroPageX, 0xD6, 6), (Absolute, 0xCE, 6), (AbsoluteX, 0xDE, 7)],
    Dex => [(Implied, 0xCA, 2)],
    Dey => [(Implied, 0x88, 2)],
    Eor => [(Immediate, 0x49, 2), (ZeroPage, 0x45, 3), (ZeroPageX, 0x55, 4), (Absolute, 0x4D, 4),
            (AbsoluteX, 0x5D, 4, page), (AbsoluteY, 0x59, 4, page), (IndexedIndirect, 0x41, 6),
            (IndirectIndexed, 0x51, 5, page)],
    Inc => [(ZeroPage, 0xE6, 5), (ZeroPageX, 0xF6, 6), (Absolute, 0xEE, 6), (AbsoluteX, 0xFE, 7)],
    Inx => [(Implied, 0xE8, 2)],
    Iny => [(Implied, 0xC8, 2)],
    Jmp => [(Absolute, 0x4C, 3), (Indirect, 0x6C, 5)],
    Jsr => [(Absolute, 0x20, 6)],
    Lda => [(Immediate, 0xA9, 2), (ZeroPage, 0xA5, 3), (ZeroPageX, 0xB5, 4), (Absolute, 0xAD, 4),
            (AbsoluteX, 0xBD, 4, page), (AbsoluteY, 0xB9, 4, page), (IndexedIndirect, 0xA1, 6),
            (IndirectIndexed, 0xB1, 5, page)],
    Ldx => [(Immediate, 0xA2, 2), (ZeroPage, 0xA6, 3), (ZeroPageY, 0xB6, 4), (Absolute, 0xAE, 4),
            (AbsoluteY, 0xBE, 4, page)],
    Ldy => [(Immediate, 0xA0, 2), (ZeroPage, 0xA4, 3), (ZeroPageX, 0xB4, 4), (Absolute, 0xAC, 4),
            (AbsoluteX, 0xBC, 4, page)],
    Lsr => [(Accumulator, 0x4A, 2), (ZeroPage, 0x46, 5), (ZeroPageX, 0x56, 6), (Absolute, 0x4E, 6),
            (AbsoluteX, 0x5E, 7)],
    Nop => [(Implied, 0xEA, 2)],
    Ora => [(Immediate, 0x09, 2), (ZeroPage, 0x05, 3), (ZeroPageX, 0x15, 4), (Absolute, 0x0D, 4),
            (AbsoluteX, 0x1D, 4, page), (AbsoluteY, 0x19, 4, page), (IndexedIndirect, 0x01, 6),
            (IndirectIndexed, 0x11, 5, page)],
    Pha => [(Implied, 0x48, 3)],
    Php => [(Implied, 0x08, 3)],
    Pla => [(Implied, 0x68, 4)],
    Plp => [(Implied, 0x28, 4)],
    Rol => [(Accumulator, 0x2A, 2), (ZeroPage, 0x26, 5), (ZeroPageX, 0x36, 6), (Absolute, 0x2E, 6),
            (AbsoluteX, 0x3E, 7)],
    Ror => [(Accumulator, 0x6A, 2), (ZeroPage, 0x66, 5), (ZeroPageX, 0x76, 6), (Absolute, 0x6E, 6),
            (AbsoluteX, 0x7E, 7)],
    Rti => [(Implied, 0x40, 6)],
    Rts => [(Implied, 0x60, 6)],
    Sbc => [(Immediate, 0xE9, 2), (ZeroPage, 0xE5, 3), (ZeroPageX, 0xF5, 4), (Absolute, 0xED, 4),
            (AbsoluteX, 0xFD, 4, page), (AbsoluteY, 0xF9, 4, page), (IndexedIndirect, 0xE1, 6),
            (IndirectIndexed, 0xF1, 5, page)],
    Sec => [(Implied, 0x38, 2)],
    Sed => [(Implied, 0xF8, 2)],
    Sei => [(Implied, 0x78, 2)],
    Sta => [(ZeroPage, 0x85, 3), (ZeroPageX, 0x95, 4), (Absolute, 0x8D, 4), (AbsoluteX, 0x9D, 5),
            (AbsoluteY, 0x99, 5), (IndexedIndirect, 0x81, 6), (IndirectIndexed, 0x91, 6)],
    Stx => [(ZeroPage, 0x86, 3), (ZeroPageY, 0x96, 4), (Absolute, 0x8E, 4)],
    Sty => [(ZeroPage, 0x84, 3), (ZeroPageX, 0x94, 4), (Absolute, 0x8C, 4)],
    Tax => [(Implied, 0xAA, 2)],
    Tay => [(Implied, 0xA8, 2)],
    Tsx => [(Implied, 0xBA, 2)],
    Txa => [(Implied, 0x8A, 2)],
    Txs => [(Implied, 0x9A, 2)],
    Tya => [(Implied, 0x98, 2)],
};

static TABLE: LazyLock<[Option<Encoding>; 256]> = LazyLock::new(|| {
    let mut table = [None; 256];
    for &(opcode, modes) in ENCODINGS {
        for &(mode, byte, cycles, page_penalty) in modes {
            table[byte as usize] = Some(Encoding {
                opcode,
                mode,
                cycles,
                page_penalty,
            });
        }
    }
    table
});

/// Looks up the encoding byte for a documented opcode/mode pair.
pub fn encode(opcode: Opcode, mode: AddressingMode) -> Option<u8> {
    ENCODINGS
        .iter()
        .find(|(op, _)| *op == opcode)
        .and_then(|(_, modes)| modes.iter().find(|entry| entry.0 == mode))
        .map(|entry| entry.1)
}

fn page_crossed(a: u16, b: u16) -> bool {
    (a & 0xFF00) != (b & 0xFF00)
}

fn peek_word<M: Memory + ?Sized>(mem: &M, addr: u16) -> u16 {
    let lo = mem.peek(addr) as u16;
    let hi = mem.peek(addr.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

/// Reads a pointer whose high byte never carries into the next page.
fn peek_word_same_page<M: Memory + ?Sized>(mem: &M, addr: u16) -> u16 {
    let lo = mem.peek(addr) as u16;
    let hi_addr = (addr & 0xFF00) | (addr.wrapping_add(1) & 0x00FF);
    let hi = mem.peek(hi_addr) as u16;
    (hi << 8) | lo
}

/// Decodes the instruction at `pc` without side effects on `mem`.
pub fn decode<M: Memory + ?Sized>(mem: &M, pc: u16, x: u8, y: u8) -> Result<Decoded> {
    let byte = mem.peek(pc);
    let Some(encoding) = TABLE[byte as usize] else {
        bail!("unexpected opcode ${byte:02X} at ${pc:04X}");
    };

    let operand = mem.peek(pc.wrapping_add(1));
    let mut cycles = encoding.cycles;
    let mut penalty = |base: u16, addr: u16| {
        if encoding.page_penalty && page_crossed(base, addr) {
            cycles += 1;
        }
    };

    let addr = match encoding.mode {
        AddressingMode::Implied | AddressingMode::Accumulator => 0,
        AddressingMode::Immediate => operand as u16,
        AddressingMode::ZeroPage => operand as u16,
        AddressingMode::ZeroPageX => operand.wrapping_add(x) as u16,
        AddressingMode::ZeroPageY => operand.wrapping_add(y) as u16,
        AddressingMode::Absolute => peek_word(mem, pc.wrapping_add(1)),
        AddressingMode::AbsoluteX => {
            let base = peek_word(mem, pc.wrapping_add(1));
            let addr = base.wrapping_add(x as u16);
            penalty(base, addr);
            addr
        }
        AddressingMode::AbsoluteY => {
            let base = peek_word(mem, pc.wrapping_add(1));
            let addr = base.wrapping_add(y as u16);
            penalty(base, addr);
            addr
        }
        AddressingMode::Relative => pc
            .wrapping_add(2)
            .wrapping_add(operand as i8 as i16 as u16),
        AddressingMode::Indirect => {
            let ptr = peek_word(mem, pc.wrapping_add(1));
            peek_word_same_page(mem, ptr)
        }
        AddressingMode::IndexedIndirect => {
            let ptr = operand.wrapping_add(x) as u16;
            peek_word_same_page(mem, ptr)
        }
        AddressingMode::IndirectIndexed => {
            let base = peek_word_same_page(mem, operand as u16);
            let addr = base.wrapping_add(y as u16);
            penalty(base, addr);
            addr
        }
    };

    let mut next_pc = pc
        .wrapping_add(1)
        .wrapping_add(encoding.mode.operand_bytes());
    if encoding.opcode == Opcode::Brk {
        next_pc = next_pc.wrapping_add(1);
    }

    Ok(Decoded {
        pc,
        byte,
        opcode: encoding.opcode,
        mode: encoding.mode,
        addr,
        next_pc,
        cycles,
    })
}

impl fmt::Display for Decoded {
    /// Assembler-style rendering with resolved operands, e.g. `LDA $0200,X`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match self.mode {
            AddressingMode::Implied => Ok(()),
            AddressingMode::Accumulator => write!(f, " A"),
            AddressingMode::Immediate => write!(f, " #${:02X}", self.addr),
            AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY => write!(f, " ${:02X}", self.addr),
            AddressingMode::Relative => write!(f, " ${:04X}", self.addr),
            AddressingMode::Absolute | AddressingMode::Indirect => {
                write!(f, " ${:04X}", self.addr)
            }
            AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed => write!(f, " [${:04X}]", self.addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::memory::Ram;

    fn mem_with(origin: u16, bytes: &[u8]) -> Ram {
        let mut ram = Ram::new(0x10000);
        for (i, b) in bytes.iter().enumerate() {
            ram.set(origin.wrapping_add(i as u16), *b);
        }
        ram
    }

    #[test]
    fn table_has_every_documented_opcode() {
        let documented = TABLE.iter().filter(|entry| entry.is_some()).count();
        assert_eq!(documented, 151);
        assert_eq!(ENCODINGS.len(), 56);
    }

    #[test]
    fn undocumented_opcode_is_an_error() {
        let mem = mem_with(0x8000, &[0x02]);
        let err = decode(&mem, 0x8000, 0, 0).unwrap_err();
        assert!(err.to_string().contains("unexpected opcode $02"));
    }

    #[test]
    fn immediate_operand_is_literal() {
        let mem = mem_with(0x8000, &[0xA9, 0x42]);
        let d = decode(&mem, 0x8000, 0, 0).unwrap();
        assert_eq!(d.opcode, Opcode::Lda);
        assert_eq!(d.mode, AddressingMode::Immediate);
        assert_eq!(d.addr, 0x42);
        assert_eq!(d.next_pc, 0x8002);
        assert_eq!(d.cycles, 2);
    }

    #[test]
    fn zero_page_indexing_wraps_within_page() {
        let mem = mem_with(0x8000, &[0xB5, 0xF0]);
        let d = decode(&mem, 0x8000, 0x20, 0).unwrap();
        assert_eq!(d.addr, 0x0010);
        assert_eq!(d.cycles, 4);
    }

    #[test]
    fn absolute_indexed_page_penalty_only_for_reads() {
        let mem = mem_with(0x8000, &[0xBD, 0xF0, 0x12, 0x9D, 0xF0, 0x12]);
        let load = decode(&mem, 0x8000, 0x20, 0).unwrap();
        assert_eq!(load.addr, 0x1310);
        assert_eq!(load.cycles, 5);

        let same_page = decode(&mem, 0x8000, 0x01, 0).unwrap();
        assert_eq!(same_page.cycles, 4);

        let store = decode(&mem, 0x8003, 0x20, 0).unwrap();
        assert_eq!(store.addr, 0x1310);
        assert_eq!(store.cycles, 5);
    }

    #[test]
    fn relative_targets_are_sign_extended() {
        let mem = mem_with(0x8000, &[0xD0, 0xFC]);
        let d = decode(&mem, 0x8000, 0, 0).unwrap();
        assert_eq!(d.addr, 0x7FFE);
        assert_eq!(d.next_pc, 0x8002);
    }

    #[test]
    fn indirect_jump_reproduces_page_wrap() {
        let mut mem = mem_with(0x8000, &[0x6C, 0xFF, 0x02]);
        mem.set(0x02FF, 0x34);
        mem.set(0x0200, 0x12);
        mem.set(0x0300, 0x56);
        let d = decode(&mem, 0x8000, 0, 0).unwrap();
        assert_eq!(d.addr, 0x1234);
        assert_eq!(d.next_pc, 0x8003);
    }

    #[test]
    fn indexed_indirect_and_indirect_indexed() {
        let mut mem = mem_with(0x8000, &[0xA1, 0x10, 0xB1, 0x20]);
        mem.set(0x0015, 0x00);
        mem.set(0x0016, 0x03);
        mem.set(0x0020, 0xF0);
        mem.set(0x0021, 0x04);

        let pre = decode(&mem, 0x8000, 0x05, 0).unwrap();
        assert_eq!(pre.addr, 0x0300);
        assert_eq!(pre.cycles, 6);

        let post = decode(&mem, 0x8002, 0, 0x20).unwrap();
        assert_eq!(post.addr, 0x0510);
        assert_eq!(post.cycles, 6);
    }

    #[test]
    fn brk_skips_padding_byte() {
        let mem = mem_with(0x8000, &[0x00, 0xFF]);
        let d = decode(&mem, 0x8000, 0, 0).unwrap();
        assert_eq!(d.opcode, Opcode::Brk);
        assert_eq!(d.next_pc, 0x8002);
        assert_eq!(d.cycles, 7);
    }

    #[test]
    fn encode_finds_bytes() {
        assert_eq!(encode(Opcode::Sta, AddressingMode::AbsoluteY), Some(0x99));
        assert_eq!(encode(Opcode::Sta, AddressingMode::Immediate), None);
    }

    #[test]
    fn display_renders_mnemonic() {
        let mem = mem_with(0x8000, &[0x8D, 0x00, 0x20]);
        let d = decode(&mem, 0x8000, 0, 0).unwrap();
        assert_eq!(d.to_string(), "STA $2000");
    }
}
