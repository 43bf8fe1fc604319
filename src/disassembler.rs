// This is where we make sense of binary input again: one instruction per
// call, mirroring the encoder through the same ISA tables. The emulator's
// state printer and the offline listing both come through here.

use crate::fields::{AddrMode, Width};
use crate::isa::{self, ImmClass};

/// Disassemble the instruction at `bytes[0..]`, fetched from address `pc`,
/// under the given width context. Returns the byte length and the text.
pub fn disassemble(bytes: &[u8], pc: u32, m: Width, x: Width, _emulation: bool) -> (usize, String) {
    if bytes.is_empty() {
        return (0, String::new());
    }
    match bytes[0] {
        isa::EXT_PREFIX => disassemble_extended(bytes, m),
        isa::WID_PREFIX => disassemble_wid(bytes),
        opcode => match isa::decode(opcode) {
            Some(entry) => disassemble_standard(entry.mnemonic, entry.mode, bytes, pc, m, x),
            None => (1, format!(".db ${:02x}", opcode)),
        },
    }
}

fn le(bytes: &[u8], offset: usize, count: usize) -> u32 {
    let mut value = 0u32;
    for j in 0..count {
        value |= (*bytes.get(offset + j).unwrap_or(&0) as u32) << (8 * j);
    }
    value
}

fn disassemble_standard(
    mnemonic: &str,
    mode: AddrMode,
    bytes: &[u8],
    pc: u32,
    m: Width,
    x: Width,
) -> (usize, String) {
    let control_flow = isa::is_control_flow(mnemonic);
    let wide = m == Width::W32;
    match mode {
        AddrMode::Implied => (1, mnemonic.to_string()),
        AddrMode::Accumulator => (1, format!("{} A", mnemonic)),
        AddrMode::Immediate => {
            let width = match isa::imm_class(mnemonic) {
                ImmClass::M => m,
                ImmClass::X => x,
                ImmClass::Fixed8 => Width::W8,
                ImmClass::Fixed16 => Width::W16,
            };
            let count = width.bytes() as usize;
            let value = le(bytes, 1, count);
            (1 + count, format!("{} #{}", mnemonic, width.from(value)))
        }
        AddrMode::Direct => (2, format!("{} ${:02x}", mnemonic, le(bytes, 1, 1))),
        AddrMode::DirectX => (2, format!("{} ${:02x},X", mnemonic, le(bytes, 1, 1))),
        AddrMode::DirectY => (2, format!("{} ${:02x},Y", mnemonic, le(bytes, 1, 1))),
        AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY => {
            let suffix = match mode {
                AddrMode::AbsoluteX => ",X",
                AddrMode::AbsoluteY => ",Y",
                _ => "",
            };
            if control_flow && wide {
                let target = le(bytes, 1, 4);
                (5, format!("{} ${:08x}{}", mnemonic, target, suffix))
            } else {
                let addr = le(bytes, 1, 2);
                // Data absolutes are B-relative in 32-bit mode; spell it.
                let prefix = if wide && !control_flow && mnemonic != "PEA" { "B+" } else { "" };
                (3, format!("{} {}${:04x}{}", mnemonic, prefix, addr, suffix))
            }
        }
        AddrMode::Indirect => (2, format!("{} (${:02x})", mnemonic, le(bytes, 1, 1))),
        AddrMode::IndirectX => (2, format!("{} (${:02x},X)", mnemonic, le(bytes, 1, 1))),
        AddrMode::IndirectY => (2, format!("{} (${:02x}),Y", mnemonic, le(bytes, 1, 1))),
        AddrMode::IndirectLong => (2, format!("{} [${:02x}]", mnemonic, le(bytes, 1, 1))),
        AddrMode::IndirectLongY => (2, format!("{} [${:02x}],Y", mnemonic, le(bytes, 1, 1))),
        AddrMode::StackRel => (2, format!("{} ${:02x},S", mnemonic, le(bytes, 1, 1))),
        AddrMode::StackRelY => (2, format!("{} (${:02x},S),Y", mnemonic, le(bytes, 1, 1))),
        AddrMode::Long => (4, format!("{} ${:06x}", mnemonic, le(bytes, 1, 3))),
        AddrMode::LongX => (4, format!("{} ${:06x},X", mnemonic, le(bytes, 1, 3))),
        AddrMode::Relative => {
            if wide {
                let disp = le(bytes, 1, 2) as u16 as i16 as i32;
                let target = pc.wrapping_add(3).wrapping_add(disp as u32);
                (3, format!("{} ${:08x}", mnemonic, target))
            } else {
                let disp = le(bytes, 1, 1) as u8 as i8 as i32;
                let target = pc.wrapping_add(2).wrapping_add(disp as u32);
                (2, format!("{} ${:04x}", mnemonic, target & 0xFFFF))
            }
        }
        AddrMode::RelativeLong => {
            let disp = le(bytes, 1, 2) as u16 as i16 as i32;
            let target = pc.wrapping_add(3).wrapping_add(disp as u32);
            (3, format!("{} ${:08x}", mnemonic, target))
        }
        AddrMode::BlockMove => {
            // Destination byte is fetched first.
            let dst = le(bytes, 1, 1);
            let src = le(bytes, 2, 1);
            (3, format!("{} ${:02x},${:02x}", mnemonic, src, dst))
        }
        AddrMode::AbsIndirect | AddrMode::AbsIndirectX | AddrMode::AbsIndirectLong => {
            let count = if wide { 4 } else { 2 };
            let addr = le(bytes, 1, count);
            let text = match mode {
                AddrMode::AbsIndirect => format!("{} (${:0w$x})", mnemonic, addr, w = count * 2),
                AddrMode::AbsIndirectX => format!("{} (${:0w$x},X)", mnemonic, addr, w = count * 2),
                _ => format!("{} [${:0w$x}]", mnemonic, addr, w = count * 2),
            };
            (1 + count, text)
        }
        _ => (1, format!(".db ${:02x}", bytes[0])),
    }
}

fn disassemble_wid(bytes: &[u8]) -> (usize, String) {
    let opcode = match bytes.get(1) {
        Some(&op) => op,
        None => return (1, ".db $42".to_string()),
    };
    if !isa::wid_allowed(opcode) {
        return (2, format!(".db $42,${:02x}", opcode));
    }
    let entry = isa::decode(opcode).unwrap();
    let value = le(bytes, 2, 4);
    let text = match entry.mode {
        AddrMode::Immediate => format!("{} #${:08x}", entry.mnemonic, value),
        AddrMode::AbsoluteX => format!("{} ${:08x},X", entry.mnemonic, value),
        AddrMode::AbsoluteY => format!("{} ${:08x},Y", entry.mnemonic, value),
        _ => format!("{} ${:08x}", entry.mnemonic, value),
    };
    (6, text)
}

fn alu_op_name(opcode: u8) -> Option<&'static str> {
    isa::ext_alu_by_opcode(opcode).map(|row| row.mnemonic)
}

fn dp_slot(dp: u8) -> String {
    if dp % 4 == 0 {
        format!("R{}", dp / 4)
    } else {
        format!("${:02x}", dp)
    }
}

fn shift_name(subop: u8) -> &'static str {
    match subop {
        0 => "SHL",
        1 => "SHR",
        2 => "SAR",
        3 => "ROL",
        4 => "ROR",
        _ => "SHL?",
    }
}

fn extend_name(subop: u8) -> &'static str {
    match subop {
        0 => "SEXT8",
        1 => "SEXT16",
        2 => "ZEXT8",
        3 => "ZEXT16",
        4 => "CLZ",
        5 => "CTZ",
        6 => "POPCNT",
        _ => "EXT?",
    }
}

fn disassemble_extended(bytes: &[u8], m: Width) -> (usize, String) {
    let ext = match bytes.get(1) {
        Some(&op) => op,
        None => return (1, ".db $02".to_string()),
    };
    let dp = |j: usize| le(bytes, j, 1);
    let abs = |j: usize| le(bytes, j, 2);
    match ext {
        0x00..=0x07 => {
            let name = ["MUL", "MUL", "MULU", "MULU", "DIV", "DIV", "DIVU", "DIVU"][ext as usize];
            if ext % 2 == 0 {
                (3, format!("{} ${:02x}", name, dp(2)))
            } else {
                (4, format!("{} ${:04x}", name, abs(2)))
            }
        }
        0x10..=0x15 => {
            let name = ["CAS", "CAS", "LLI", "LLI", "SCI", "SCI"][(ext - 0x10) as usize];
            if ext % 2 == 0 {
                (3, format!("{} ${:02x}", name, dp(2)))
            } else {
                (4, format!("{} ${:04x}", name, abs(2)))
            }
        }
        0x20 => (6, format!("SETD #${:08x}", le(bytes, 2, 4))),
        0x21 => (3, format!("SETD ${:02x}", dp(2))),
        0x22 => (6, format!("SETB #${:08x}", le(bytes, 2, 4))),
        0x23 => (3, format!("SETB ${:02x}", dp(2))),
        0x24 => (2, "TDA".to_string()),
        0x25 => (2, "TBA".to_string()),
        0x30 => (2, "RWE".to_string()),
        0x31 => (2, "RWD".to_string()),
        0x40 => (3, format!("TRAP #${:02x}", dp(2))),
        0x50 => (2, "FENCE".to_string()),
        0x51 => (2, "FENCER".to_string()),
        0x52 => (2, "FENCEW".to_string()),
        0x86 => (2, "TTA".to_string()),
        0x87 => (2, "TAT".to_string()),
        0x88 => (3, format!("LDQ ${:02x}", dp(2))),
        0x89 => (4, format!("LDQ ${:04x}", abs(2))),
        0x8A => (3, format!("STQ ${:02x}", dp(2))),
        0x8B => (4, format!("STQ ${:04x}", abs(2))),
        isa::EXT_SHIFT_DP => {
            let packed = dp(2) as u8;
            let count = packed & 0x1F;
            let count_text = if count == isa::SHIFT_COUNT_FROM_A {
                "A".to_string()
            } else {
                format!("{}", count)
            };
            (
                5,
                format!(
                    "{} {},{},{}",
                    shift_name(packed >> 5),
                    dp_slot(dp(3) as u8),
                    dp_slot(dp(4) as u8),
                    count_text
                ),
            )
        }
        isa::EXT_EXTEND_DP => (
            5,
            format!(
                "{} {},{}",
                extend_name(dp(2) as u8),
                dp_slot(dp(3) as u8),
                dp_slot(dp(4) as u8)
            ),
        ),
        0xA0 => (3, format!("LEA ${:02x}", dp(2))),
        0xA1 => (3, format!("LEA ${:02x},X", dp(2))),
        0xA2 => (4, format!("LEA ${:04x}", abs(2))),
        0xA3 => (4, format!("LEA ${:04x},X", abs(2))),
        0xB0 => (4, format!("LDF F{},${:02x}", dp(2), dp(3))),
        0xB1 => (5, format!("LDF F{},${:04x}", dp(2), abs(3))),
        0xB2 => (6, format!("LDF F{},${:06x}", dp(2), le(bytes, 3, 3))),
        0xB3 => (4, format!("LDF F{},(${:02x})", dp(2), dp(3))),
        0xB4 => (4, format!("STF F{},${:02x}", dp(2), dp(3))),
        0xB5 => (5, format!("STF F{},${:04x}", dp(2), abs(3))),
        0xB6 => (6, format!("STF F{},${:06x}", dp(2), le(bytes, 3, 3))),
        0xB7 => (4, format!("STF F{},(${:02x})", dp(2), dp(3))),
        0xB8 => (3, format!("MVF F{},F{}", dp(2) >> 4, dp(2) & 0xF)),
        0xB9 => (3, format!("TFA F{}", dp(2))),
        0xBA => (3, format!("TAF F{}", dp(2))),
        isa::EXT_SHIFT_ACC => {
            let packed = dp(2) as u8;
            let count = packed & 0x1F;
            let count_text = if count == isa::SHIFT_COUNT_FROM_A {
                "A".to_string()
            } else {
                format!("{}", count)
            };
            (3, format!("{} A,A,{}", shift_name(packed >> 5), count_text))
        }
        isa::EXT_EXTEND_ACC => (3, format!("{} A,A", extend_name(dp(2) as u8))),
        0xD0..=0xD7 | 0xE0..=0xE7 => disassemble_ext_alu(bytes, ext),
        other => {
            let _ = m;
            (2, format!(".db $02,${:02x}", other))
        }
    }
}

fn disassemble_ext_alu(bytes: &[u8], ext: u8) -> (usize, String) {
    let name = match alu_op_name(ext) {
        Some(name) => name,
        None => return (2, format!(".db $02,${:02x}", ext)),
    };
    let mode_byte = *bytes.get(2).unwrap_or(&0);
    let width = Width::from_field(mode_byte >> 6);
    let target = mode_byte & 0x20 != 0;
    let mode = mode_byte & 0x1F;
    let mut offset = 3usize;
    let dest = if target {
        let dp = *bytes.get(offset).unwrap_or(&0);
        offset += 1;
        dp_slot(dp)
    } else {
        "A".to_string()
    };
    use crate::isa::alu_mode as am;
    let (src, operand_len): (String, usize) = match mode {
        am::IMM => {
            let count = width.bytes() as usize;
            (format!("#{}", width.from(le(bytes, offset, count))), count)
        }
        am::ACC => ("A".to_string(), 0),
        am::DP => (format!("${:02x}", le(bytes, offset, 1)), 1),
        am::DPX => (format!("${:02x},X", le(bytes, offset, 1)), 1),
        am::DPY => (format!("${:02x},Y", le(bytes, offset, 1)), 1),
        am::IND => (format!("(${:02x})", le(bytes, offset, 1)), 1),
        am::INDX => (format!("(${:02x},X)", le(bytes, offset, 1)), 1),
        am::INDY => (format!("(${:02x}),Y", le(bytes, offset, 1)), 1),
        am::INDL => (format!("[${:02x}]", le(bytes, offset, 1)), 1),
        am::INDLY => (format!("[${:02x}],Y", le(bytes, offset, 1)), 1),
        am::SR => (format!("${:02x},S", le(bytes, offset, 1)), 1),
        am::SRY => (format!("(${:02x},S),Y", le(bytes, offset, 1)), 1),
        am::ABS => (format!("B+${:04x}", le(bytes, offset, 2)), 2),
        am::ABSX => (format!("B+${:04x},X", le(bytes, offset, 2)), 2),
        am::ABSY => (format!("B+${:04x},Y", le(bytes, offset, 2)), 2),
        am::ABS32 => (format!("${:08x}", le(bytes, offset, 4)), 4),
        am::ABS32X => (format!("${:08x},X", le(bytes, offset, 4)), 4),
        am::ABS32Y => (format!("${:08x},Y", le(bytes, offset, 4)), 4),
        am::LONG => (format!("${:06x}", le(bytes, offset, 3)), 3),
        am::LONGX => (format!("${:06x},X", le(bytes, offset, 3)), 3),
        _ => (format!("?{}", mode), 0),
    };
    let suffix = match width {
        Width::W8 => ".B",
        Width::W16 => ".W",
        Width::W32 => ".L",
    };
    let unary = isa::ext_alu_by_opcode(ext).map(|row| row.is_unary).unwrap_or(false);
    let text = if unary {
        format!("{}{} {}", name, suffix, src)
    } else {
        format!("{}{} {},{}", name, suffix, dest, src)
    };
    (offset + operand_len, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediates_follow_the_width_context() {
        let (len, text) = disassemble(&[0xA9, 0x42], 0, Width::W8, Width::W8, true);
        assert_eq!((len, text.as_str()), (2, "LDA #$42"));
        let (len, text) = disassemble(&[0xA9, 0x34, 0x12], 0, Width::W16, Width::W16, false);
        assert_eq!((len, text.as_str()), (3, "LDA #$1234"));
        let (len, text) =
            disassemble(&[0xA9, 0x78, 0x56, 0x34, 0x12], 0, Width::W32, Width::W32, false);
        assert_eq!((len, text.as_str()), (5, "LDA #$12345678"));
    }

    #[test]
    fn absolutes_render_bank_relative_in_32_bit_mode() {
        let (len, text) = disassemble(&[0xAD, 0x00, 0x10], 0, Width::W32, Width::W32, false);
        assert_eq!((len, text.as_str()), (3, "LDA B+$1000"));
        let (len, text) = disassemble(&[0x8D, 0x34, 0x12], 0, Width::W8, Width::W8, false);
        assert_eq!((len, text.as_str()), (3, "STA $1234"));
    }

    #[test]
    fn branches_compute_their_targets() {
        // BRA +2 from $1000: target = $1004.
        let (len, text) = disassemble(&[0x80, 0x02], 0x1000, Width::W8, Width::W8, false);
        assert_eq!((len, text.as_str()), (2, "BRA $1004"));
        let (len, text) = disassemble(&[0x80, 0x10, 0x00], 0x1000, Width::W32, Width::W32, false);
        assert_eq!((len, text.as_str()), (3, "BRA $00001013"));
    }

    #[test]
    fn extended_alu_round_trips_textually() {
        // ADC.B A,R0 = 02 E2 01 00.
        let (len, text) = disassemble(&[0x02, 0xE2, 0x01, 0x00], 0, Width::W32, Width::W32, false);
        assert_eq!((len, text.as_str()), (4, "ADC.B A,$00"));
    }

    #[test]
    fn unknown_extended_bytes_decode_as_data() {
        let (len, text) = disassemble(&[0x02, 0x77], 0, Width::W32, Width::W32, false);
        assert_eq!((len, text.as_str()), (2, ".db $02,$77"));
    }
}
