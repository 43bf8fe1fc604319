mod common;

use common::{assemble, boot_at, write32};
use m65832::fields::Width;
use m65832::mmu::{
    FAULT_L1_NOT_PRESENT, MMUCR_PG, PTE_PRESENT, PTE_WRITE,
};
use m65832::processor::{Cpu, Status, StopReason, Trap, SYSREG_BASE};
use pretty_assertions::assert_eq;

const PTBR: u32 = 0x0004_0000;

/// Install a 4 KiB mapping va -> pa. `l2_base` picks where this mapping's
/// second-level table lives (one per L1 slot).
fn map_page(cpu: &mut Cpu, va: u32, pa: u32, l2_base: u32, flags: u64) {
    let l1_index = va >> 22;
    let l1_addr = PTBR + l1_index * 8;
    let l1 = (l2_base as u64) | PTE_PRESENT;
    for j in 0..8 {
        cpu.mem.raw_write8(l1_addr + j, (l1 >> (8 * j)) as u8);
    }
    let l2_index = (va >> 12) & 0x3FF;
    let pte = (((pa as u64) >> 12) << 12) | flags;
    for j in 0..8 {
        cpu.mem.raw_write8(l2_base + l2_index * 8 + j, (pte >> (8 * j)) as u8);
    }
}

fn enable_paging(cpu: &mut Cpu) {
    cpu.mmu.ptbr = PTBR as u64;
    cpu.mmu.mmucr = MMUCR_PG;
}

#[test]
fn high_virtual_addresses_translate_through_the_tables() {
    // Identity-map the code page and alias 0x80001xxx onto phys 0x1xxx.
    // JMP ($80001080) reads its pointer through the high alias and lands
    // on code fetched through the same mapping.
    let code = assemble(".m32\n jmp ($80001080)\n");
    let mut cpu = boot_at(&code, 0x1000);
    common::set_widths(&mut cpu, Width::W32, Width::W8);
    map_page(&mut cpu, 0x0000_1000, 0x1000, 0x0005_0000, PTE_PRESENT | PTE_WRITE);
    map_page(&mut cpu, 0x8000_1000, 0x1000, 0x0006_0000, PTE_PRESENT | PTE_WRITE);

    // Pointer at phys $1080 -> VA $80001090; code there: LDA #imm32, STP.
    write32(&mut cpu, 0x1080, 0x8000_1090);
    let target = assemble(".m32\n lda #$00000077\n stp\n");
    cpu.mem.load(0x1090, &target);

    enable_paging(&mut cpu);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert_eq!(cpu.a, 0x77);
}

#[test]
fn missing_l1_entry_reports_fault_va_and_code() {
    let code = assemble(".m32\n lda $c0000000\n stp\n");
    let mut cpu = boot_at(&code, 0x1000);
    common::set_widths(&mut cpu, Width::W32, Width::W8);
    map_page(&mut cpu, 0x0000_1000, 0x1000, 0x0005_0000, PTE_PRESENT | PTE_WRITE);
    enable_paging(&mut cpu);

    // No page-fault handler installed: the run loop stops.
    assert_eq!(cpu.run(1_000), StopReason::Trap(Trap::PageFault));
    assert_eq!(cpu.mmu.faultva, 0xC000_0000);
    assert_eq!(cpu.mmu.fault_code(), FAULT_L1_NOT_PRESENT);
}

#[test]
fn page_fault_with_handler_continues_through_the_vector() {
    let code = assemble(".m32\n lda $c0000000\n stp\n");
    let mut cpu = boot_at(&code, 0x1000);
    common::set_widths(&mut cpu, Width::W32, Width::W8);
    map_page(&mut cpu, 0x0000_1000, 0x1000, 0x0005_0000, PTE_PRESENT | PTE_WRITE);
    // Map the vector page and the handler page identically; the native
    // vector table wraps into the 1 MiB test RAM.
    map_page(&mut cpu, 0xFFFF_F000, 0xF_F000, 0x0007_0000, PTE_PRESENT | PTE_WRITE);
    map_page(&mut cpu, 0x0000_2000, 0x2000, 0x0005_0000, PTE_PRESENT | PTE_WRITE);
    map_page(&mut cpu, 0x0000_0000, 0x0000, 0x0005_0000, PTE_PRESENT | PTE_WRITE);
    write32(&mut cpu, m65832::processor::VEC_PAGEFAULT, 0x2000);
    cpu.mem.raw_write8(0x2000, 0xDB); // handler: STP
    enable_paging(&mut cpu);

    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    // The handler ran to its STP; the fault bookkeeping is still visible.
    assert_eq!(cpu.pc, 0x2001);
    assert_eq!(cpu.mmu.faultva, 0xC000_0000);
}

#[test]
fn user_mode_cannot_touch_system_registers() {
    // B points at the sysreg page so a 16-bit B+ access reaches it.
    let code = assemble(".m8\n lda B+$f000\n stp\n");
    let mut cpu = boot_at(&code, 0x1000);
    cpu.p = Status::empty(); // user, native
    cpu.b = 0xFFFF_0000;
    assert_eq!(cpu.run(100), StopReason::Trap(Trap::Privilege));
}

#[test]
fn sysregs_bypass_translation_and_read_back() {
    let mut cpu = boot_at(&[0xDB], 0x1000);
    // Timer compare register at offset $44.
    cpu.write8(SYSREG_BASE + 0x44, 0x2A).unwrap();
    assert_eq!(cpu.read8(SYSREG_BASE + 0x44, m65832::mmu::Access::Read).unwrap(), 0x2A);
    assert_eq!(cpu.timer.cmp, 0x2A);
}

#[test]
fn tlb_flush_register_drops_cached_translations() {
    let mut cpu = boot_at(&[0xDB], 0x1000);
    map_page(&mut cpu, 0x4000_0000, 0x3000, 0x0005_0000, PTE_PRESENT | PTE_WRITE);
    enable_paging(&mut cpu);
    cpu.mem.raw_write8(0x3004, 0x5E);

    // First access walks and fills the TLB.
    assert_eq!(cpu.read8(0x4000_0004, m65832::mmu::Access::Read).unwrap(), 0x5E);
    // Poison the L1 entry; the TLB still serves the page.
    for j in 0..8 {
        cpu.mem.raw_write8(PTBR + (0x4000_0000u32 >> 22) * 8 + j, 0);
    }
    assert_eq!(cpu.read8(0x4000_0004, m65832::mmu::Access::Read).unwrap(), 0x5E);
    // Any write to TLBFLUSH drops everything; the next access faults.
    cpu.write8(SYSREG_BASE + 0x1C, 1).unwrap();
    assert!(cpu.read8(0x4000_0004, m65832::mmu::Access::Read).is_err());
}
