// Output writers: flat binary, Intel HEX and the line-oriented symbol map.

use crate::assembler::{Section, SymbolTable};
use std::fmt::Write;

const HEX_RECORD_LEN: usize = 16;

/// Intel HEX rendering of the section contents: type 00 data records,
/// type 04 extended linear address records whenever the upper 16 address
/// bits change, and the `:00000001FF` EOF record.
pub fn intel_hex(sections: &[Section]) -> String {
    let mut out = String::new();
    let mut high_word: Option<u16> = None;
    for section in sections {
        if section.data.is_empty() {
            continue;
        }
        let mut address = section.org;
        for chunk in section.data.chunks(HEX_RECORD_LEN) {
            let upper = (address >> 16) as u16;
            if high_word != Some(upper) {
                if upper != 0 || high_word.is_some() {
                    push_record(&mut out, 0, 0x04, &upper.to_be_bytes());
                }
                high_word = Some(upper);
            }
            push_record(&mut out, (address & 0xFFFF) as u16, 0x00, chunk);
            address = address.wrapping_add(chunk.len() as u32);
        }
    }
    out.push_str(":00000001FF\n");
    out
}

fn push_record(out: &mut String, address: u16, kind: u8, data: &[u8]) {
    let mut sum = data.len() as u32 + (address >> 8) as u32 + (address & 0xFF) as u32 + kind as u32;
    write!(out, ":{:02X}{:04X}{:02X}", data.len(), address, kind).unwrap();
    for &byte in data {
        write!(out, "{:02X}", byte).unwrap();
        sum += byte as u32;
    }
    let checksum = (!(sum as u8)).wrapping_add(1);
    writeln!(out, "{:02X}", checksum).unwrap();
}

/// `HHHHHHHH T NAME` per line, `T` in {L,C,S}; comments start with '#'.
pub fn symbol_map(symbols: &SymbolTable) -> String {
    let mut out = String::from("# m65832 symbol map\n");
    for sym in symbols.iter_sorted() {
        if sym.defined {
            writeln!(out, "{}", sym).unwrap();
        }
    }
    out
}

/// Human-oriented listing for the -l flag.
pub fn symbol_listing(symbols: &SymbolTable) -> String {
    let mut out = String::new();
    for sym in symbols.iter_sorted() {
        if sym.defined {
            writeln!(out, "{:24} = ${:08X}", sym.name, sym.value).unwrap();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Section;

    fn section(org: u32, data: Vec<u8>) -> Section {
        let mut section = Section {
            name: "text".into(),
            org,
            pc: org + data.len() as u32,
            size: data.len() as u32,
            data,
            org_set: true,
        };
        section.size = section.data.len() as u32;
        section
    }

    fn checksum_ok(record: &str) -> bool {
        let bytes: Vec<u8> = (1..record.len())
            .step_by(2)
            .map(|j| u8::from_str_radix(&record[j..j + 2], 16).unwrap())
            .collect();
        bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
    }

    #[test]
    fn records_balance_to_zero() {
        let hex = intel_hex(&[section(0x8000, (0..40u8).collect())]);
        for line in hex.lines() {
            assert!(line.starts_with(':'));
            assert!(checksum_ok(line), "bad checksum in {}", line);
        }
        assert!(hex.ends_with(":00000001FF\n"));
    }

    #[test]
    fn extended_linear_address_above_64k() {
        let hex = intel_hex(&[section(0x0001_0000, vec![0xAA; 4])]);
        let mut lines = hex.lines();
        let ela = lines.next().unwrap();
        assert_eq!(ela, ":020000040001F9");
        assert!(lines.next().unwrap().starts_with(":04000000AAAAAAAA"));
    }

    #[test]
    fn known_record_encoding() {
        // 3 bytes at 0x0030: classic fixture, checksum computed by hand.
        let mut out = String::new();
        push_record(&mut out, 0x0030, 0x00, &[0x02, 0x33, 0x7A]);
        assert_eq!(out, ":0300300002337A1E\n");
    }
}
