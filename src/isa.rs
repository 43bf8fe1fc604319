// Instruction set tables. Everything that needs to know "which byte is
// LDA (dp),Y" asks this module: the assembler encodes from the per-mnemonic
// opcode vectors, and the decode table handed to the disassembler and the
// emulator is built by inverting those same vectors, so the two views can
// never drift apart.
//
// The base map is the WDC 65816 matrix with the M65832 deviations:
//   $02  extended-instruction prefix (COP removed; its vector remains)
//   $42  WID prefix (WDM removed)
//   $44  MVN / $54 MVP  (swapped relative to the 65816)
//   $AB  LDA long (PLB removed; B is written through SETB)
//   $8B, $AF, $FF  permanently unassigned ($FF doubles as the table sentinel)

use crate::fields::{AddrMode, NUM_MODES};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// "no encoding for this (mnemonic, mode)" marker in the opcode vectors.
pub const SENTINEL: u8 = 0xFF;

/// Extended-instruction prefix byte.
pub const EXT_PREFIX: u8 = 0x02;
/// 32-bit operand width prefix byte.
pub const WID_PREFIX: u8 = 0x42;

pub struct InstructionRow {
    pub mnemonic: &'static str,
    pub opcodes: [u8; NUM_MODES],
}

impl InstructionRow {
    pub fn opcode(&self, mode: AddrMode) -> Option<u8> {
        match self.opcodes[mode.index()] {
            SENTINEL => None,
            op => Some(op),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct DecodeEntry {
    pub mnemonic: &'static str,
    pub mode: AddrMode,
    pub cycles: u8,
}

/// `(mnemonic, mode) -> opcode behind the $02 prefix`.
pub struct ExtendedRow {
    pub mnemonic: &'static str,
    pub mode: AddrMode,
    pub opcode: u8,
}

/// Drives the secondary (register-targeted ALU) encoding machinery.
pub struct ExtAluRow {
    pub mnemonic: &'static str,
    pub opcode: u8,
    pub is_unary: bool,
    pub mem_dest: bool,
}

/// Which status field sizes a mnemonic's immediate operand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImmClass {
    M,
    X,
    Fixed8,
    Fixed16,
}

use AddrMode::*;

#[rustfmt::skip]
static DEFS: &[(&str, &[(AddrMode, u8)])] = &[
    ("ADC", &[(IndirectX, 0x61), (StackRel, 0x63), (Direct, 0x65), (IndirectLong, 0x67),
              (Immediate, 0x69), (Absolute, 0x6D), (Long, 0x6F), (IndirectY, 0x71),
              (Indirect, 0x72), (StackRelY, 0x73), (DirectX, 0x75), (IndirectLongY, 0x77),
              (AbsoluteY, 0x79), (AbsoluteX, 0x7D), (LongX, 0x7F)]),
    ("AND", &[(IndirectX, 0x21), (StackRel, 0x23), (Direct, 0x25), (IndirectLong, 0x27),
              (Immediate, 0x29), (Absolute, 0x2D), (Long, 0x2F), (IndirectY, 0x31),
              (Indirect, 0x32), (StackRelY, 0x33), (DirectX, 0x35), (IndirectLongY, 0x37),
              (AbsoluteY, 0x39), (AbsoluteX, 0x3D), (LongX, 0x3F)]),
    ("ASL", &[(Direct, 0x06), (Accumulator, 0x0A), (Absolute, 0x0E), (DirectX, 0x16),
              (AbsoluteX, 0x1E)]),
    ("BCC", &[(Relative, 0x90)]),
    ("BCS", &[(Relative, 0xB0)]),
    ("BEQ", &[(Relative, 0xF0)]),
    ("BIT", &[(Direct, 0x24), (Immediate, 0x89), (Absolute, 0x2C), (DirectX, 0x34),
              (AbsoluteX, 0x3C)]),
    ("BMI", &[(Relative, 0x30)]),
    ("BNE", &[(Relative, 0xD0)]),
    ("BPL", &[(Relative, 0x10)]),
    ("BRA", &[(Relative, 0x80)]),
    ("BRK", &[(Implied, 0x00)]),
    ("BRL", &[(RelativeLong, 0x82)]),
    ("BVC", &[(Relative, 0x50)]),
    ("BVS", &[(Relative, 0x70)]),
    ("CLC", &[(Implied, 0x18)]),
    ("CLD", &[(Implied, 0xD8)]),
    ("CLI", &[(Implied, 0x58)]),
    ("CLV", &[(Implied, 0xB8)]),
    ("CMP", &[(IndirectX, 0xC1), (StackRel, 0xC3), (Direct, 0xC5), (IndirectLong, 0xC7),
              (Immediate, 0xC9), (Absolute, 0xCD), (Long, 0xCF), (IndirectY, 0xD1),
              (Indirect, 0xD2), (StackRelY, 0xD3), (DirectX, 0xD5), (IndirectLongY, 0xD7),
              (AbsoluteY, 0xD9), (AbsoluteX, 0xDD), (LongX, 0xDF)]),
    ("CPX", &[(Immediate, 0xE0), (Direct, 0xE4), (Absolute, 0xEC)]),
    ("CPY", &[(Immediate, 0xC0), (Direct, 0xC4), (Absolute, 0xCC)]),
    ("DEC", &[(Accumulator, 0x3A), (Direct, 0xC6), (Absolute, 0xCE), (DirectX, 0xD6),
              (AbsoluteX, 0xDE)]),
    ("DEX", &[(Implied, 0xCA)]),
    ("DEY", &[(Implied, 0x88)]),
    ("EOR", &[(IndirectX, 0x41), (StackRel, 0x43), (Direct, 0x45), (IndirectLong, 0x47),
              (Immediate, 0x49), (Absolute, 0x4D), (Long, 0x4F), (IndirectY, 0x51),
              (Indirect, 0x52), (StackRelY, 0x53), (DirectX, 0x55), (IndirectLongY, 0x57),
              (AbsoluteY, 0x59), (AbsoluteX, 0x5D), (LongX, 0x5F)]),
    ("INC", &[(Accumulator, 0x1A), (Direct, 0xE6), (Absolute, 0xEE), (DirectX, 0xF6),
              (AbsoluteX, 0xFE)]),
    ("INX", &[(Implied, 0xE8)]),
    ("INY", &[(Implied, 0xC8)]),
    ("JML", &[(Long, 0x5C), (AbsIndirectLong, 0xDC)]),
    ("JMP", &[(Absolute, 0x4C), (AbsIndirect, 0x6C), (AbsIndirectX, 0x7C)]),
    ("JSL", &[(Long, 0x22)]),
    ("JSR", &[(Absolute, 0x20), (AbsIndirectX, 0xFC)]),
    ("LDA", &[(IndirectX, 0xA1), (StackRel, 0xA3), (Direct, 0xA5), (IndirectLong, 0xA7),
              (Immediate, 0xA9), (Absolute, 0xAD), (Long, 0xAB), (IndirectY, 0xB1),
              (Indirect, 0xB2), (StackRelY, 0xB3), (DirectX, 0xB5), (IndirectLongY, 0xB7),
              (AbsoluteY, 0xB9), (AbsoluteX, 0xBD), (LongX, 0xBF)]),
    ("LDX", &[(Immediate, 0xA2), (Direct, 0xA6), (Absolute, 0xAE), (DirectY, 0xB6),
              (AbsoluteY, 0xBE)]),
    ("LDY", &[(Immediate, 0xA0), (Direct, 0xA4), (Absolute, 0xAC), (DirectX, 0xB4),
              (AbsoluteX, 0xBC)]),
    ("LSR", &[(Direct, 0x46), (Accumulator, 0x4A), (Absolute, 0x4E), (DirectX, 0x56),
              (AbsoluteX, 0x5E)]),
    ("MVN", &[(BlockMove, 0x44)]),
    ("MVP", &[(BlockMove, 0x54)]),
    ("NOP", &[(Implied, 0xEA)]),
    ("ORA", &[(IndirectX, 0x01), (StackRel, 0x03), (Direct, 0x05), (IndirectLong, 0x07),
              (Immediate, 0x09), (Absolute, 0x0D), (Long, 0x0F), (IndirectY, 0x11),
              (Indirect, 0x12), (StackRelY, 0x13), (DirectX, 0x15), (IndirectLongY, 0x17),
              (AbsoluteY, 0x19), (AbsoluteX, 0x1D), (LongX, 0x1F)]),
    ("PEA", &[(Absolute, 0xF4)]),
    ("PEI", &[(Direct, 0xD4)]),
    ("PER", &[(RelativeLong, 0x62)]),
    ("PHA", &[(Implied, 0x48)]),
    ("PHD", &[(Implied, 0x0B)]),
    ("PHK", &[(Implied, 0x4B)]),
    ("PHP", &[(Implied, 0x08)]),
    ("PHX", &[(Implied, 0xDA)]),
    ("PHY", &[(Implied, 0x5A)]),
    ("PLA", &[(Implied, 0x68)]),
    ("PLD", &[(Implied, 0x2B)]),
    ("PLP", &[(Implied, 0x28)]),
    ("PLX", &[(Implied, 0xFA)]),
    ("PLY", &[(Implied, 0x7A)]),
    ("REP", &[(Immediate, 0xC2)]),
    ("ROL", &[(Direct, 0x26), (Accumulator, 0x2A), (Absolute, 0x2E), (DirectX, 0x36),
              (AbsoluteX, 0x3E)]),
    ("ROR", &[(Direct, 0x66), (Accumulator, 0x6A), (Absolute, 0x6E), (DirectX, 0x76),
              (AbsoluteX, 0x7E)]),
    ("RTI", &[(Implied, 0x40)]),
    ("RTL", &[(Implied, 0x6B)]),
    ("RTS", &[(Implied, 0x60)]),
    ("SBC", &[(IndirectX, 0xE1), (StackRel, 0xE3), (Direct, 0xE5), (IndirectLong, 0xE7),
              (Immediate, 0xE9), (Absolute, 0xED), (Long, 0xEF), (IndirectY, 0xF1),
              (Indirect, 0xF2), (StackRelY, 0xF3), (DirectX, 0xF5), (IndirectLongY, 0xF7),
              (AbsoluteY, 0xF9), (AbsoluteX, 0xFD)]),
    ("SEC", &[(Implied, 0x38)]),
    ("SED", &[(Implied, 0xF8)]),
    ("SEI", &[(Implied, 0x78)]),
    ("SEP", &[(Immediate, 0xE2)]),
    ("STA", &[(IndirectX, 0x81), (StackRel, 0x83), (Direct, 0x85), (IndirectLong, 0x87),
              (Absolute, 0x8D), (Long, 0x8F), (IndirectY, 0x91), (Indirect, 0x92),
              (StackRelY, 0x93), (DirectX, 0x95), (IndirectLongY, 0x97), (AbsoluteY, 0x99),
              (AbsoluteX, 0x9D), (LongX, 0x9F)]),
    ("STP", &[(Implied, 0xDB)]),
    ("STX", &[(Direct, 0x86), (Absolute, 0x8E), (DirectY, 0x96)]),
    ("STY", &[(Direct, 0x84), (Absolute, 0x8C), (DirectX, 0x94)]),
    ("STZ", &[(Direct, 0x64), (DirectX, 0x74), (Absolute, 0x9C), (AbsoluteX, 0x9E)]),
    ("TAX", &[(Implied, 0xAA)]),
    ("TAY", &[(Implied, 0xA8)]),
    ("TCD", &[(Implied, 0x5B)]),
    ("TCS", &[(Implied, 0x1B)]),
    ("TDC", &[(Implied, 0x7B)]),
    ("TRB", &[(Direct, 0x14), (Absolute, 0x1C)]),
    ("TSB", &[(Direct, 0x04), (Absolute, 0x0C)]),
    ("TSC", &[(Implied, 0x3B)]),
    ("TSX", &[(Implied, 0xBA)]),
    ("TXA", &[(Implied, 0x8A)]),
    ("TXS", &[(Implied, 0x9A)]),
    ("TXY", &[(Implied, 0x9B)]),
    ("TYA", &[(Implied, 0x98)]),
    ("TYX", &[(Implied, 0xBB)]),
    ("WAI", &[(Implied, 0xCB)]),
    ("XBA", &[(Implied, 0xEB)]),
    ("XCE", &[(Implied, 0xFB)]),
];

#[rustfmt::skip]
static EXTENDED: &[ExtendedRow] = &[
    ExtendedRow { mnemonic: "MUL",    mode: Direct,      opcode: 0x00 },
    ExtendedRow { mnemonic: "MUL",    mode: Absolute,    opcode: 0x01 },
    ExtendedRow { mnemonic: "MULU",   mode: Direct,      opcode: 0x02 },
    ExtendedRow { mnemonic: "MULU",   mode: Absolute,    opcode: 0x03 },
    ExtendedRow { mnemonic: "DIV",    mode: Direct,      opcode: 0x04 },
    ExtendedRow { mnemonic: "DIV",    mode: Absolute,    opcode: 0x05 },
    ExtendedRow { mnemonic: "DIVU",   mode: Direct,      opcode: 0x06 },
    ExtendedRow { mnemonic: "DIVU",   mode: Absolute,    opcode: 0x07 },
    ExtendedRow { mnemonic: "CAS",    mode: Direct,      opcode: 0x10 },
    ExtendedRow { mnemonic: "CAS",    mode: Absolute,    opcode: 0x11 },
    ExtendedRow { mnemonic: "LLI",    mode: Direct,      opcode: 0x12 },
    ExtendedRow { mnemonic: "LLI",    mode: Absolute,    opcode: 0x13 },
    ExtendedRow { mnemonic: "SCI",    mode: Direct,      opcode: 0x14 },
    ExtendedRow { mnemonic: "SCI",    mode: Absolute,    opcode: 0x15 },
    ExtendedRow { mnemonic: "SETD",   mode: Immediate32, opcode: 0x20 },
    ExtendedRow { mnemonic: "SETD",   mode: Direct,      opcode: 0x21 },
    ExtendedRow { mnemonic: "SETB",   mode: Immediate32, opcode: 0x22 },
    ExtendedRow { mnemonic: "SETB",   mode: Direct,      opcode: 0x23 },
    ExtendedRow { mnemonic: "TDA",    mode: Implied,     opcode: 0x24 },
    ExtendedRow { mnemonic: "TBA",    mode: Implied,     opcode: 0x25 },
    ExtendedRow { mnemonic: "RWE",    mode: Implied,     opcode: 0x30 },
    ExtendedRow { mnemonic: "RWD",    mode: Implied,     opcode: 0x31 },
    ExtendedRow { mnemonic: "TRAP",   mode: Immediate,   opcode: 0x40 },
    ExtendedRow { mnemonic: "FENCE",  mode: Implied,     opcode: 0x50 },
    ExtendedRow { mnemonic: "FENCER", mode: Implied,     opcode: 0x51 },
    ExtendedRow { mnemonic: "FENCEW", mode: Implied,     opcode: 0x52 },
    ExtendedRow { mnemonic: "TTA",    mode: Implied,     opcode: 0x86 },
    ExtendedRow { mnemonic: "TAT",    mode: Implied,     opcode: 0x87 },
    ExtendedRow { mnemonic: "LDQ",    mode: Direct,      opcode: 0x88 },
    ExtendedRow { mnemonic: "LDQ",    mode: Absolute,    opcode: 0x89 },
    ExtendedRow { mnemonic: "STQ",    mode: Direct,      opcode: 0x8A },
    ExtendedRow { mnemonic: "STQ",    mode: Absolute,    opcode: 0x8B },
    ExtendedRow { mnemonic: "LEA",    mode: Direct,      opcode: 0xA0 },
    ExtendedRow { mnemonic: "LEA",    mode: DirectX,     opcode: 0xA1 },
    ExtendedRow { mnemonic: "LEA",    mode: Absolute,    opcode: 0xA2 },
    ExtendedRow { mnemonic: "LEA",    mode: AbsoluteX,   opcode: 0xA3 },
    ExtendedRow { mnemonic: "LDF",    mode: FpuDirect,   opcode: 0xB0 },
    ExtendedRow { mnemonic: "LDF",    mode: FpuAbsolute, opcode: 0xB1 },
    ExtendedRow { mnemonic: "LDF",    mode: FpuLong,     opcode: 0xB2 },
    ExtendedRow { mnemonic: "LDF",    mode: FpuIndirect, opcode: 0xB3 },
    ExtendedRow { mnemonic: "STF",    mode: FpuDirect,   opcode: 0xB4 },
    ExtendedRow { mnemonic: "STF",    mode: FpuAbsolute, opcode: 0xB5 },
    ExtendedRow { mnemonic: "STF",    mode: FpuLong,     opcode: 0xB6 },
    ExtendedRow { mnemonic: "STF",    mode: FpuIndirect, opcode: 0xB7 },
    ExtendedRow { mnemonic: "MVF",    mode: FpuTwoReg,   opcode: 0xB8 },
    ExtendedRow { mnemonic: "TFA",    mode: FpuOneReg,   opcode: 0xB9 },
    ExtendedRow { mnemonic: "TAF",    mode: FpuOneReg,   opcode: 0xBA },
];

/// The register-targeted ALU family: `$02 <opcode> <size:2|target:1|mode:5>
/// [dest_dp] [operand]`. The op index sits in the opcode's low nibble.
#[rustfmt::skip]
static EXT_ALU: &[ExtAluRow] = &[
    ExtAluRow { mnemonic: "LD",  opcode: 0xE0, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "ST",  opcode: 0xE1, is_unary: false, mem_dest: true },
    ExtAluRow { mnemonic: "ADC", opcode: 0xE2, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "SBC", opcode: 0xE3, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "AND", opcode: 0xE4, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "ORA", opcode: 0xE5, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "EOR", opcode: 0xE6, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "CMP", opcode: 0xE7, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "BIT", opcode: 0xD0, is_unary: false, mem_dest: false },
    ExtAluRow { mnemonic: "TSB", opcode: 0xD1, is_unary: true,  mem_dest: true },
    ExtAluRow { mnemonic: "TRB", opcode: 0xD2, is_unary: true,  mem_dest: true },
    ExtAluRow { mnemonic: "STZ", opcode: 0xD3, is_unary: true,  mem_dest: true },
    ExtAluRow { mnemonic: "INC", opcode: 0xD4, is_unary: true,  mem_dest: true },
    ExtAluRow { mnemonic: "DEC", opcode: 0xD5, is_unary: true,  mem_dest: true },
];

/// Source-mode codes in the extended-ALU mode byte (5 bits).
pub mod alu_mode {
    pub const IMM: u8 = 0;
    pub const DP: u8 = 1;
    pub const DPX: u8 = 2;
    pub const ABS: u8 = 3;
    pub const ABSX: u8 = 4;
    pub const ACC: u8 = 5;
    pub const IND: u8 = 6;
    pub const INDY: u8 = 7;
    pub const INDL: u8 = 8;
    pub const INDLY: u8 = 9;
    pub const SR: u8 = 10;
    pub const SRY: u8 = 11;
    pub const ABS32: u8 = 12;
    pub const ABS32X: u8 = 13;
    pub const LONG: u8 = 14;
    pub const LONGX: u8 = 15;
    pub const INDX: u8 = 16;
    pub const ABSY: u8 = 17;
    pub const ABS32Y: u8 = 18;
    pub const DPY: u8 = 19;
}

pub fn alu_mode_of(mode: AddrMode) -> Option<u8> {
    Some(match mode {
        Immediate | Immediate32 => alu_mode::IMM,
        Direct => alu_mode::DP,
        DirectX => alu_mode::DPX,
        DirectY => alu_mode::DPY,
        Absolute => alu_mode::ABS,
        AbsoluteX => alu_mode::ABSX,
        AbsoluteY => alu_mode::ABSY,
        Accumulator => alu_mode::ACC,
        Indirect => alu_mode::IND,
        IndirectX => alu_mode::INDX,
        IndirectY => alu_mode::INDY,
        IndirectLong => alu_mode::INDL,
        IndirectLongY => alu_mode::INDLY,
        StackRel => alu_mode::SR,
        StackRelY => alu_mode::SRY,
        Absolute32 => alu_mode::ABS32,
        Absolute32X => alu_mode::ABS32X,
        Absolute32Y => alu_mode::ABS32Y,
        Long => alu_mode::LONG,
        LongX => alu_mode::LONGX,
        _ => return None,
    })
}

/// Sub-opcodes of the `$02 $98` / `$02 $E9` barrel shifter (high 3 bits of
/// the packed `(op:3|count:5)` byte).
pub fn shift_subop(name: &str) -> Option<u8> {
    Some(match name {
        "SHL" => 0,
        "SHR" => 1,
        "SAR" => 2,
        "ROL" => 3,
        "ROR" => 4,
        _ => return None,
    })
}

/// Sub-opcodes of the `$02 $99` / `$02 $EA` extend family.
pub fn extend_subop(name: &str) -> Option<u8> {
    Some(match name {
        "SEXT8" => 0,
        "SEXT16" => 1,
        "ZEXT8" => 2,
        "ZEXT16" => 3,
        "CLZ" => 4,
        "CTZ" => 5,
        "POPCNT" => 6,
        _ => return None,
    })
}

/// Shift count value meaning "take the count from A".
pub const SHIFT_COUNT_FROM_A: u8 = 0x1F;

pub const EXT_SHIFT_DP: u8 = 0x98;
pub const EXT_EXTEND_DP: u8 = 0x99;
pub const EXT_SHIFT_ACC: u8 = 0xE9;
pub const EXT_EXTEND_ACC: u8 = 0xEA;

lazy_static! {
    pub static ref INSTRUCTIONS: Vec<InstructionRow> = {
        DEFS.iter()
            .map(|(mnemonic, modes)| {
                let mut opcodes = [SENTINEL; NUM_MODES];
                for (mode, op) in modes.iter() {
                    opcodes[mode.index()] = *op;
                }
                InstructionRow { mnemonic, opcodes }
            })
            .collect()
    };
    static ref MNEMONIC_INDEX: HashMap<&'static str, usize> = {
        INSTRUCTIONS.iter().enumerate().map(|(j, row)| (row.mnemonic, j)).collect()
    };
    pub static ref DECODE: [Option<DecodeEntry>; 256] = {
        let mut table = [None; 256];
        for row in INSTRUCTIONS.iter() {
            for (index, &op) in row.opcodes.iter().enumerate() {
                if op == SENTINEL {
                    continue;
                }
                let mode = mode_from_index(index);
                debug_assert!(table[op as usize].is_none(), "opcode {:02x} assigned twice", op);
                table[op as usize] = Some(DecodeEntry {
                    mnemonic: row.mnemonic,
                    mode,
                    cycles: base_cycles(row.mnemonic, mode),
                });
            }
        }
        table
    };
}

fn mode_from_index(index: usize) -> AddrMode {
    // Safe by construction: indexes come straight from AddrMode::index().
    const MODES: [AddrMode; NUM_MODES] = [
        Implied, Accumulator, Immediate, Direct, DirectX, DirectY, Absolute, AbsoluteX,
        AbsoluteY, Indirect, IndirectX, IndirectY, IndirectLong, IndirectLongY, Long, LongX,
        Relative, RelativeLong, StackRel, StackRelY, BlockMove, AbsIndirect, AbsIndirectX,
        AbsIndirectLong, Immediate32, Absolute32, Absolute32X, Absolute32Y, FpuTwoReg,
        FpuOneReg, FpuDirect, FpuAbsolute, FpuIndirect, FpuLong,
    ];
    MODES[index]
}

pub fn find_instruction(mnemonic: &str) -> Option<&'static InstructionRow> {
    let upper = mnemonic.to_ascii_uppercase();
    MNEMONIC_INDEX.get(upper.as_str()).map(|&j| &INSTRUCTIONS[j])
}

pub fn find_extended(mnemonic: &str, mode: AddrMode) -> Option<&'static ExtendedRow> {
    let upper = mnemonic.to_ascii_uppercase();
    EXTENDED.iter().find(|row| row.mnemonic == upper && row.mode == mode)
}

pub fn extended_mnemonic(mnemonic: &str) -> bool {
    let upper = mnemonic.to_ascii_uppercase();
    EXTENDED.iter().any(|row| row.mnemonic == upper)
}

pub fn find_ext_alu(mnemonic: &str) -> Option<&'static ExtAluRow> {
    let upper = mnemonic.to_ascii_uppercase();
    EXT_ALU.iter().find(|row| row.mnemonic == upper)
}

pub fn ext_alu_by_opcode(opcode: u8) -> Option<&'static ExtAluRow> {
    EXT_ALU.iter().find(|row| row.opcode == opcode)
}

pub fn decode(opcode: u8) -> Option<&'static DecodeEntry> {
    DECODE[opcode as usize].as_ref()
}

pub fn imm_class(mnemonic: &str) -> ImmClass {
    match mnemonic {
        "LDX" | "LDY" | "CPX" | "CPY" => ImmClass::X,
        "REP" | "SEP" => ImmClass::Fixed16,
        "TRAP" => ImmClass::Fixed8,
        _ => ImmClass::M,
    }
}

/// Control-flow instructions may carry full 32-bit absolute operands in
/// 32-bit mode; data accesses must go through `B+` or the extended encodings.
pub fn is_control_flow(mnemonic: &str) -> bool {
    matches!(mnemonic, "JMP" | "JSR" | "JML" | "JSL")
}

pub fn is_branch(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "BCC" | "BCS" | "BEQ" | "BMI" | "BNE" | "BPL" | "BRA" | "BVC" | "BVS" | "BRL"
    )
}

/// The long-relative fallback used when an 8-bit displacement is out of
/// range (only BRA has one).
pub fn long_branch_form(mnemonic: &str) -> Option<&'static str> {
    match mnemonic {
        "BRA" => Some("BRL"),
        _ => None,
    }
}

/// Opcodes the `$42` WID prefix may legally precede: immediate and absolute
/// data accesses. Everything else under the prefix is compat-NOP or illegal.
pub fn wid_allowed(opcode: u8) -> bool {
    match decode(opcode) {
        Some(entry) => {
            !is_control_flow(entry.mnemonic)
                && !matches!(entry.mnemonic, "PEA" | "REP" | "SEP" | "MVN" | "MVP")
                && matches!(
                    entry.mode,
                    Immediate | Absolute | AbsoluteX | AbsoluteY
                )
        }
        None => false,
    }
}

/// Coarse per-instruction cycle counts. Block move is 7 per iteration (it
/// re-fetches itself), interrupts add their entry sequence separately.
fn base_cycles(mnemonic: &str, mode: AddrMode) -> u8 {
    // Specific opcodes first, then the addressing-mode baseline.
    match (mnemonic, mode) {
        ("BRK", _) => 8,
        ("JMP", Absolute) => 3,
        ("JMP", AbsIndirect) => 5,
        ("JMP", AbsIndirectX) => 6,
        ("JML", Long) => 4,
        ("JML", AbsIndirectLong) => 6,
        ("JSR", Absolute) => 6,
        ("JSR", AbsIndirectX) => 8,
        ("JSL", _) => 8,
        ("RTS", _) => 6,
        ("RTL", _) => 6,
        ("RTI", _) => 7,
        ("PEA", _) => 5,
        ("PEI", _) => 6,
        ("PER", _) => 6,
        ("PHA", _) | ("PHX", _) | ("PHY", _) | ("PHP", _) | ("PHK", _) => 3,
        ("PHD", _) => 4,
        ("PLA", _) | ("PLX", _) | ("PLY", _) | ("PLP", _) => 4,
        ("PLD", _) => 5,
        ("REP", _) | ("SEP", _) => 3,
        ("STP", _) | ("WAI", _) => 3,
        ("XBA", _) => 3,
        ("MVN", _) | ("MVP", _) => 7,
        ("ASL", Direct) | ("LSR", Direct) | ("ROL", Direct) | ("ROR", Direct)
        | ("INC", Direct) | ("DEC", Direct) | ("TSB", Direct) | ("TRB", Direct) => 5,
        ("ASL", DirectX) | ("LSR", DirectX) | ("ROL", DirectX) | ("ROR", DirectX)
        | ("INC", DirectX) | ("DEC", DirectX) => 6,
        ("ASL", Absolute) | ("LSR", Absolute) | ("ROL", Absolute) | ("ROR", Absolute)
        | ("INC", Absolute) | ("DEC", Absolute) | ("TSB", Absolute) | ("TRB", Absolute) => 6,
        ("ASL", AbsoluteX) | ("LSR", AbsoluteX) | ("ROL", AbsoluteX) | ("ROR", AbsoluteX)
        | ("INC", AbsoluteX) | ("DEC", AbsoluteX) => 7,
        _ => match mode {
            Implied | Accumulator => 2,
            Immediate | Immediate32 => 2,
            Relative => 2,
            RelativeLong => 3,
            Direct => 3,
            DirectX | DirectY => 4,
            Absolute | AbsoluteX | AbsoluteY => 4,
            Indirect | IndirectY => 5,
            IndirectX => 6,
            IndirectLong | IndirectLongY => 6,
            Long | LongX => 5,
            StackRel => 4,
            StackRelY => 7,
            AbsIndirect => 5,
            AbsIndirectX | AbsIndirectLong => 6,
            Absolute32 | Absolute32X | Absolute32Y => 5,
            BlockMove => 7,
            _ => 2,
        },
    }
}

/// Cycle counts for the extended families; coarse, like the primary table.
pub fn ext_cycles(ext_opcode: u8) -> u8 {
    match ext_opcode {
        0x00..=0x03 => 8,  // MUL/MULU
        0x04..=0x07 => 12, // DIV/DIVU
        0x10..=0x15 => 6,  // CAS/LLI/SCI
        0x20..=0x25 => 4,  // SETD/SETB/TDA/TBA
        0x30 | 0x31 => 2,  // RWE/RWD
        0x40 => 8,         // TRAP
        0x50..=0x52 => 2,  // fences
        0x86 | 0x87 => 2,  // TTA/TAT
        0x88..=0x8B => 8,  // LDQ/STQ
        0x98 | 0x99 | 0xE9 | 0xEA => 3,
        0xA0..=0xA3 => 3,  // LEA
        0xB0..=0xBA => 6,  // FPU moves
        0xD0..=0xD5 | 0xE0..=0xE7 => 4,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_map_has_no_duplicates() {
        let mut seen = [false; 256];
        for row in INSTRUCTIONS.iter() {
            for &op in row.opcodes.iter() {
                if op == SENTINEL {
                    continue;
                }
                assert!(!seen[op as usize], "opcode {:02x} assigned twice", op);
                seen[op as usize] = true;
            }
        }
        // Prefixes and the permanently unassigned bytes stay out of the map.
        for hole in [0x02u8, 0x42, 0x8B, 0xAF, 0xFF] {
            assert!(!seen[hole as usize], "{:02x} must stay unassigned", hole);
        }
    }

    #[test]
    fn key_vectors_match_the_manual() {
        let lda = find_instruction("lda").unwrap();
        assert_eq!(lda.opcode(Immediate), Some(0xA9));
        assert_eq!(lda.opcode(Absolute), Some(0xAD));
        assert_eq!(lda.opcode(IndirectLongY), Some(0xB7));
        assert_eq!(lda.opcode(Long), Some(0xAB));
        assert_eq!(lda.opcode(LongX), Some(0xBF));
        let sta = find_instruction("STA").unwrap();
        assert_eq!(sta.opcode(Absolute), Some(0x8D));
        assert_eq!(sta.opcode(Long), Some(0x8F));
        assert_eq!(sta.opcode(LongX), Some(0x9F));
        assert_eq!(sta.opcode(Immediate), None);
        // MVN/MVP are swapped relative to the 65816.
        assert_eq!(find_instruction("MVN").unwrap().opcode(BlockMove), Some(0x44));
        assert_eq!(find_instruction("MVP").unwrap().opcode(BlockMove), Some(0x54));
    }

    #[test]
    fn extended_lookup_is_case_insensitive() {
        assert_eq!(find_extended("cas", Direct).unwrap().opcode, 0x10);
        assert_eq!(find_extended("SCI", Absolute).unwrap().opcode, 0x15);
        assert!(find_extended("CAS", AbsoluteX).is_none());
        assert_eq!(find_ext_alu("ld").unwrap().opcode, 0xE0);
    }

    #[test]
    fn wid_prefix_covers_data_accesses_only() {
        assert!(wid_allowed(0xA9)); // LDA #
        assert!(wid_allowed(0x8D)); // STA abs
        assert!(!wid_allowed(0x4C)); // JMP abs
        assert!(!wid_allowed(0x80)); // BRA
        assert!(!wid_allowed(0xC2)); // REP
    }
}
