#![allow(dead_code)]

use m65832::assembler::Assembler;
use m65832::fields::Width;
use m65832::memory::Memory;
use m65832::processor::{Cpu, Status};

pub const CODE_BASE: u32 = 0x1000;

pub fn assemble(source: &str) -> Vec<u8> {
    let mut asm = Assembler::new();
    asm.assemble_str(source, "test.s").expect("assembly failed");
    asm.flat_image().to_vec()
}

pub fn try_assemble(source: &str) -> Result<Vec<u8>, u32> {
    let mut asm = Assembler::new();
    match asm.assemble_str(source, "test.s") {
        Ok(()) => Ok(asm.flat_image().to_vec()),
        Err(_) => Err(asm.error_count().max(1)),
    }
}

/// Native supervisor CPU (8-bit widths) with the code at CODE_BASE and
/// 1 MiB of wrapping RAM.
pub fn boot(code: &[u8]) -> Cpu {
    boot_at(code, CODE_BASE)
}

pub fn boot_at(code: &[u8], base: u32) -> Cpu {
    let mut mem = Memory::new(1 << 20);
    mem.load(base, code);
    let mut cpu = Cpu::new(mem);
    cpu.pc = base;
    cpu.p = Status::S;
    cpu.s = 0x01FF;
    cpu
}

pub fn set_widths(cpu: &mut Cpu, m: Width, x: Width) {
    let cleared = cpu.p.bits() & !((3 << 6) | (3 << 4));
    let bits = cleared | ((m.field() as u16) << 6) | ((x.field() as u16) << 4);
    cpu.p = Status::from_bits_truncate(bits);
}

pub fn write16(cpu: &mut Cpu, addr: u32, value: u16) {
    for j in 0..2 {
        cpu.mem.raw_write8(addr.wrapping_add(j), (value >> (8 * j)) as u8);
    }
}

pub fn write32(cpu: &mut Cpu, addr: u32, value: u32) {
    for j in 0..4 {
        cpu.mem.raw_write8(addr.wrapping_add(j), (value >> (8 * j)) as u8);
    }
}

pub fn read16(cpu: &mut Cpu, addr: u32) -> u16 {
    (0..2).fold(0u16, |acc, j| {
        acc | (cpu.mem.raw_read8(addr.wrapping_add(j)) as u16) << (8 * j)
    })
}

pub fn read32(cpu: &mut Cpu, addr: u32) -> u32 {
    (0..4).fold(0u32, |acc, j| {
        acc | (cpu.mem.raw_read8(addr.wrapping_add(j)) as u32) << (8 * j)
    })
}
