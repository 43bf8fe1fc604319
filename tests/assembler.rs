mod common;

use common::{assemble, try_assemble};
use m65832::assembler::Assembler;
use m65832::disassembler::disassemble;
use m65832::fields::Width;
use m65832::output;
use pretty_assertions::assert_eq;
use std::io::Write;

#[test]
fn round_trip_8_bit_mode() {
    let bytes = assemble(".m8\n.x8\n lda #$42\n sta $1234\n");
    assert_eq!(bytes, vec![0xA9, 0x42, 0x8D, 0x34, 0x12]);
}

#[test]
fn round_trip_16_bit_mode() {
    let bytes = assemble(".m16\n.x16\n lda #$1234\n lda [$10],y\n");
    assert_eq!(bytes, vec![0xA9, 0x34, 0x12, 0xB7, 0x10]);
}

#[test]
fn round_trip_32_bit_mode() {
    let bytes = assemble(".m32\n lda #$12345678\n lda B+$1000\n");
    assert_eq!(bytes, vec![0xA9, 0x78, 0x56, 0x34, 0x12, 0xAD, 0x00, 0x10]);
}

/// Every encoded instruction must disassemble to text the assembler maps
/// back onto the same bytes under the same width context.
#[test]
fn assembler_and_disassembler_agree() {
    let cases_8 = [
        "LDA #$42",
        "STA $1234",
        "ORA ($10),Y",
        "ASL A",
        "JMP ($1234)",
        "LDA [$10],Y",
        "STA $123456",
        "LDX #$7f",
        "PHP",
        "TSB $40",
    ];
    for case in cases_8 {
        let source = format!(".m8\n.x8\n {}\n", case);
        let bytes = assemble(&source);
        let (len, text) = disassemble(&bytes, 0, Width::W8, Width::W8, false);
        assert_eq!(len, bytes.len(), "length mismatch for {}", case);
        let again = assemble(&format!(".m8\n.x8\n {}\n", text));
        assert_eq!(again, bytes, "{} -> {} did not round-trip", case, text);
    }
    let cases_32 = ["LDA #$12345678", "LDA B+$1000", "JMP $00002000"];
    for case in cases_32 {
        let source = format!(".m32\n {}\n", case);
        let bytes = assemble(&source);
        let (len, text) = disassemble(&bytes, 0, Width::W32, Width::W32, false);
        assert_eq!(len, bytes.len(), "length mismatch for {}", case);
        let again = assemble(&format!(".m32\n {}\n", text));
        assert_eq!(again, bytes, "{} -> {} did not round-trip", case, text);
    }
}

#[test]
fn extended_alu_width_suffixes() {
    // ADC.B A,R0 -> op $E2, size 00, A-target, DP source.
    let bytes = assemble(" adc.b a,r0\n");
    assert_eq!(bytes, vec![0x02, 0xE2, 0x01, 0x00]);
    let bytes = assemble(" adc.w a,r0\n");
    assert_eq!(bytes, vec![0x02, 0xE2, 0x41, 0x00]);
    // LD.L R1,#imm32: register target adds the dest byte.
    let bytes = assemble(" ld.l r1, #$12345678\n");
    assert_eq!(bytes, vec![0x02, 0xE0, 0xA0, 0x04, 0x78, 0x56, 0x34, 0x12]);
}

#[test]
fn thirty_two_bit_absolutes_route_to_the_extended_encoding() {
    let bytes = assemble(".m32\n lda $00001080\n");
    assert_eq!(bytes, vec![0x02, 0xE0, 0x8C, 0x80, 0x10, 0x00, 0x00]);
    // STA spells ST under the hood.
    let bytes = assemble(".m32\n sta $00002000\n");
    assert_eq!(bytes, vec![0x02, 0xE1, 0x8C, 0x00, 0x20, 0x00, 0x00]);
}

#[test]
fn bare_16_bit_absolutes_are_rejected_in_32_bit_mode() {
    assert!(try_assemble(".m32\n lda $1234\n").is_err());
    assert!(try_assemble(".m32\n lda $123456\n").is_ok()); // 24-bit long is fine
    assert!(try_assemble(".m32\n lda B+$1234\n").is_ok());
    // Control flow takes bare targets.
    assert!(try_assemble(".m32\n jmp $1234\n").is_ok());
}

#[test]
fn misaligned_dp_is_rejected_in_32_bit_mode() {
    assert!(try_assemble(".m32\n lda $13\n").is_err());
    assert!(try_assemble(".m32\n lda $14\n").is_ok());
}

#[test]
fn branch_displacements_follow_the_mode() {
    // 32-bit mode: 16-bit displacement, here $100 bytes forward.
    let bytes = assemble(".m32\nstart: bra target\n.ds $100\ntarget: nop\n");
    assert_eq!(&bytes[..3], &[0x80, 0x00, 0x01]);
    // 8-bit mode: one displacement byte.
    let bytes = assemble(".m8\n bra next\nnext: nop\n");
    assert_eq!(&bytes[..2], &[0x80, 0x00]);
}

#[test]
fn out_of_range_branches_promote_to_brl_or_fail() {
    // Backward branch beyond -128: BRA has a long form, so it promotes.
    let source = ".m8\nback: nop\n.ds $200\n bra back\n";
    let bytes = assemble(source);
    assert_eq!(bytes[0x201], 0x82, "expected BRL");
    // BNE has no long form below 32-bit mode.
    assert!(try_assemble(".m8\nback: nop\n.ds $200\n bne back\n").is_err());
}

#[test]
fn jump_operands_widen_in_32_bit_mode() {
    let bytes = assemble(".m32\n jmp $00002000\n");
    assert_eq!(bytes, vec![0x4C, 0x00, 0x20, 0x00, 0x00]);
    let bytes = assemble(".m16\n jmp $2000\n");
    assert_eq!(bytes, vec![0x4C, 0x00, 0x20]);
    let bytes = assemble(".m32\n jmp ($80001080)\n");
    assert_eq!(bytes, vec![0x6C, 0x80, 0x10, 0x00, 0x80]);
}

#[test]
fn block_move_operand_order() {
    // MVN src, dst: destination byte is emitted first.
    let bytes = assemble(" mvn $01,$02\n");
    assert_eq!(bytes, vec![0x44, 0x02, 0x01]);
    let bytes = assemble(" mvp $03,$04\n");
    assert_eq!(bytes, vec![0x54, 0x04, 0x03]);
}

#[test]
fn data_directives() {
    let bytes = assemble(".byte 1, 2, $ff\n.word $1234\n.long $89abcdef\n");
    assert_eq!(
        bytes,
        vec![1, 2, 0xFF, 0x34, 0x12, 0xEF, 0xCD, 0xAB, 0x89]
    );
    let bytes = assemble(".ascii \"Hi\"\n.asciz \"ok\"\n");
    assert_eq!(bytes, vec![b'H', b'i', b'o', b'k', 0]);
    let bytes = assemble(".byte 1\n.align 4\n.byte 2\n");
    assert_eq!(bytes, vec![1, 0, 0, 0, 2]);
    let bytes = assemble(".byte 1\n.p2align 2\n.byte 2\n");
    assert_eq!(bytes, vec![1, 0, 0, 0, 2]);
    let bytes = assemble(".ds 3\n.byte 9\n");
    assert_eq!(bytes, vec![0, 0, 0, 9]);
}

#[test]
fn org_pads_forward_and_rejects_backwards() {
    let bytes = assemble(".org $100\n.byte 1\n.org $104\n.byte 2\n");
    assert_eq!(bytes, vec![1, 0, 0, 0, 2]);
    assert!(try_assemble(".org $100\n.byte 1\n.org $0f0\n").is_err());
}

#[test]
fn equates_and_labels() {
    let bytes = assemble("SIZE = 4\nCOUNT EQU 3\n.byte SIZE, COUNT\n");
    assert_eq!(bytes, vec![4, 3]);
    // Symbols fold case; .L locals stay case-sensitive.
    let bytes = assemble(".m8\nStart: bra START\n");
    assert_eq!(bytes, vec![0x80, 0xFE]);
    let bytes = assemble(".m8\n.Lloop: bra .Lloop\n");
    assert_eq!(bytes, vec![0x80, 0xFE]);
}

#[test]
fn expressions_evaluate_left_to_right_in_operands() {
    let bytes = assemble(".byte 2+3*4\n");
    assert_eq!(bytes, vec![20]);
}

#[test]
fn undefined_symbols_fail_pass_two() {
    assert!(try_assemble(".m8\n jmp missing\n").is_err());
}

#[test]
fn forward_references_assume_the_absolute_form() {
    // Both passes size the operand as 16-bit absolute even though the
    // label lands below $100.
    let bytes = assemble(".m8\n lda data\n stp\ndata: .byte 5\n");
    assert_eq!(bytes, vec![0xAD, 0x04, 0x00, 0xDB, 0x05]);
    // Backward references keep the tight direct-page form.
    let bytes = assemble(".m8\nval: .byte 9\n lda val\n");
    assert_eq!(bytes, vec![0x09, 0xA5, 0x00]);
    // In 32-bit mode a forward data reference takes the 32-bit encoding.
    let bytes = assemble(".m32\n lda data\n stp\ndata: .byte 5\n");
    assert_eq!(
        bytes,
        vec![0x02, 0xE0, 0x8C, 0x08, 0x00, 0x00, 0x00, 0xDB, 0x05]
    );
}

#[test]
fn include_files_resolve_through_search_paths() {
    let dir = tempfile::tempdir().unwrap();
    let inc_path = dir.path().join("defs.inc");
    let mut inc = std::fs::File::create(&inc_path).unwrap();
    writeln!(inc, "MAGIC = $42").unwrap();
    drop(inc);

    let mut asm = Assembler::new();
    asm.add_include_path(dir.path());
    asm.assemble_str(".include \"defs.inc\"\n.byte MAGIC\n", "main.s").unwrap();
    assert_eq!(asm.flat_image(), &[0x42]);
}

#[test]
fn cfi_balance_is_checked() {
    assert!(try_assemble(".cfi_startproc\n.cfi_endproc\n").is_ok());
    assert!(try_assemble(".cfi_endproc\n").is_err());
    assert!(try_assemble(".cfi_startproc\n").is_err());
    assert!(try_assemble(".cfi_startproc\n.cfi_restore_state\n.cfi_endproc\n").is_err());
}

#[test]
fn elf_metadata_is_accepted_and_discarded() {
    let bytes = assemble(".globl main\n.type main,@function\n.byte 1\n.size main, .-main\n");
    assert_eq!(bytes, vec![1]);
}

#[test]
fn symbol_map_format() {
    let mut asm = Assembler::new();
    asm.assemble_str(".org $2000\nmain: .byte 0\nLIMIT = 16\n", "main.s").unwrap();
    let map = output::symbol_map(&asm.symbols);
    assert!(map.starts_with('#'));
    assert!(map.contains("00002000 L MAIN"), "map was:\n{}", map);
    assert!(map.contains("00000010 C LIMIT"), "map was:\n{}", map);
}

#[test]
fn intel_hex_output_checksums() {
    let mut asm = Assembler::new();
    let mut source = String::from(".org $8000\n");
    for j in 0..64 {
        source.push_str(&format!(".word {}\n", j * 17));
    }
    source.push_str(".ds 896\n");
    asm.assemble_str(&source, "image.s").unwrap();
    let hex = output::intel_hex(asm.sections());
    let mut lines = hex.lines().collect::<Vec<_>>();
    assert_eq!(lines.pop().unwrap(), ":00000001FF");
    for line in lines {
        let bytes: Vec<u8> = (1..line.len())
            .step_by(2)
            .map(|j| u8::from_str_radix(&line[j..j + 2], 16).unwrap())
            .collect();
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0, "bad checksum in {}", line);
    }
}

#[test]
fn sections_track_their_own_pc() {
    let mut asm = Assembler::new();
    asm.assemble_str(
        ".text\n.org $1000\n.byte 1\n.data\n.org $4000\n.byte 2\n.text\n.byte 3\n",
        "sections.s",
    )
    .unwrap();
    let text = asm.sections().iter().find(|s| s.name == "text").unwrap();
    let data = asm.sections().iter().find(|s| s.name == "data").unwrap();
    assert_eq!(text.org, 0x1000);
    assert_eq!(text.data, vec![1, 3]);
    assert_eq!(data.org, 0x4000);
    assert_eq!(data.data, vec![2]);
}
