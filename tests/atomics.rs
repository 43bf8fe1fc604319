mod common;

use common::{assemble, boot, set_widths};
use m65832::fields::Width;
use m65832::processor::{Status, StopReason};
use pretty_assertions::assert_eq;

#[test]
fn store_between_ll_and_sc_breaks_the_reservation() {
    // LLI $40; plain store to $40; SCI $40 must fail and leave memory as
    // the plain store wrote it.
    let code = assemble(".m8\n lli $40\n lda #$55\n sta $40\n lda #$77\n sci $40\n stp\n");
    let mut cpu = boot(&code);
    cpu.mem.raw_write8(0x40, 0x01);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(!cpu.p.contains(Status::Z), "SC must report failure");
    assert_eq!(cpu.mem.raw_read8(0x40), 0x55, "memory must be unchanged by SCI");
}

#[test]
fn undisturbed_ll_sc_succeeds() {
    let code = assemble(".m8\n lli $40\n lda #$77\n sci $40\n stp\n");
    let mut cpu = boot(&code);
    cpu.mem.raw_write8(0x40, 0x01);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(cpu.p.contains(Status::Z), "SC must report success");
    assert_eq!(cpu.mem.raw_read8(0x40), 0x77);
}

#[test]
fn sc_without_reservation_fails() {
    let code = assemble(".m8\n lda #$77\n sci $40\n stp\n");
    let mut cpu = boot(&code);
    cpu.mem.raw_write8(0x40, 0x01);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(!cpu.p.contains(Status::Z));
    assert_eq!(cpu.mem.raw_read8(0x40), 0x01);
}

#[test]
fn sc_consumes_the_reservation() {
    // A second SCI right after a successful one must fail.
    let code = assemble(".m8\n lli $40\n lda #$77\n sci $40\n sci $40\n stp\n");
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(!cpu.p.contains(Status::Z));
}

#[test]
fn exception_entry_invalidates_the_reservation() {
    let code = assemble(".m8\n lli $40\n brk\n");
    let mut cpu = boot(&code);
    // BRK vector: handler is just an RTI-less landing pad.
    common::write32(&mut cpu, m65832::processor::VEC_BRK, 0x4000);
    cpu.mem.raw_write8(0x4000, 0xDB); // STP
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(!cpu.reservation_valid());
}

#[test]
fn cas_matching_stores_and_sets_z() {
    let code = assemble(".m8\n cas $40\n stp\n");
    let mut cpu = boot(&code);
    cpu.mem.raw_write8(0x40, 5);
    cpu.x = 5;
    cpu.a = 9;
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(cpu.p.contains(Status::Z));
    assert_eq!(cpu.mem.raw_read8(0x40), 9);
}

#[test]
fn cas_mismatch_loads_current_into_x() {
    let code = assemble(".m8\n cas $40\n stp\n");
    let mut cpu = boot(&code);
    cpu.mem.raw_write8(0x40, 9);
    cpu.x = 7;
    cpu.a = 1;
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(!cpu.p.contains(Status::Z));
    assert_eq!(cpu.mem.raw_read8(0x40), 9, "memory must be unchanged");
    assert_eq!(cpu.x, 9, "X observes the current value");
}

#[test]
fn cas_compares_at_the_m_width() {
    let code = assemble(".m16\n cas B+$2000\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W16, Width::W8);
    common::write16(&mut cpu, 0x2000, 0x1234);
    cpu.x = 0x1234;
    cpu.a = 0x5678;
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert!(cpu.p.contains(Status::Z));
    assert_eq!(common::read16(&mut cpu, 0x2000), 0x5678);
}
