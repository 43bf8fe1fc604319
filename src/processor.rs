// This is the place for the basic processor implementation: architectural
// state, the memory-access policy (watchpoints -> system registers -> MMIO
// -> MMU -> RAM), exception entry and exit, interrupt arbitration and the
// run loop. Opcode semantics live in the instructions module.

use crate::disassembler::disassemble;
use crate::fields::{FlagDelta, Value, Width};
use crate::memory::Memory;
use crate::mmu::{Access, Mmu};
use bitflags::bitflags;
use log::{debug, trace};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::io::prelude::*;
use termion::{clear, color, cursor};
use thiserror::Error;

bitflags! {
    /// The 16-bit status word. M/X are 2-bit width fields (00 -> 8,
    /// 01 -> 16, 10 -> 32) honored even in emulation mode.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Status: u16 {
        const C = 1 << 0;
        const Z = 1 << 1;
        const I = 1 << 2;
        const D = 1 << 3;
        const X0 = 1 << 4;
        const X1 = 1 << 5;
        const M0 = 1 << 6;
        const M1 = 1 << 7;
        const V = 1 << 8;
        const N = 1 << 9;
        const E = 1 << 10;
        const S = 1 << 11;
        const R = 1 << 12;
        const K = 1 << 13;
    }
}

/// Exception causes. Software interrupts keep the run loop going through
/// their handlers; the fatal ones stop it with state inspectable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Trap {
    #[default]
    None,
    Brk,
    Cop,
    Irq,
    Nmi,
    Abort,
    PageFault,
    Syscall,
    IllegalOp,
    Privilege,
    Breakpoint,
    Watchpoint,
}

/// Why `run` returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    CycleBudget,
    StepBudget,
    Breakpoint(u32),
    Trap(Trap),
    Stopped,
}

/// In-flight failure of a memory access or decode. The step loop converts
/// these into exception entry or a fatal stop.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("page fault at ${va:08x} (code {code})")]
    Page { va: u32, code: u8 },
    #[error("privilege violation at ${pc:08x}")]
    Privilege { pc: u32 },
    #[error("illegal opcode ${opcode:02x} at ${pc:08x}")]
    Illegal { opcode: u8, pc: u32 },
}

// Native vector table: 32-bit entries butting up against the top of the
// address space, with 256 syscall slots behind them.
pub const VEC_RESET: u32 = 0xFFFF_FBE0;
pub const VEC_BRK: u32 = VEC_RESET + 0x04;
pub const VEC_COP: u32 = VEC_RESET + 0x08;
pub const VEC_IRQ: u32 = VEC_RESET + 0x0C;
pub const VEC_NMI: u32 = VEC_RESET + 0x10;
pub const VEC_ABORT: u32 = VEC_RESET + 0x14;
pub const VEC_PAGEFAULT: u32 = VEC_RESET + 0x18;
pub const VEC_ILLEGAL: u32 = VEC_RESET + 0x1C;
pub const VEC_SYSCALL: u32 = 0xFFFF_FC00;

// Emulation-mode 16-bit vectors at the classic page.
pub const EVEC_PAGEFAULT: u32 = 0xFFF0;
pub const EVEC_ILLEGAL: u32 = 0xFFF2;
pub const EVEC_COP: u32 = 0xFFF4;
pub const EVEC_ABORT: u32 = 0xFFF8;
pub const EVEC_NMI: u32 = 0xFFFA;
pub const EVEC_RESET: u32 = 0xFFFC;
pub const EVEC_IRQ: u32 = 0xFFFE;

pub const SYSREG_BASE: u32 = 0xFFFF_F000;
pub const SYSREG_END: u32 = 0xFFFF_F0FF;

const TIMER_ENABLE: u32 = 1 << 0;
const TIMER_IRQ_ENABLE: u32 = 1 << 1;

#[derive(Debug, Default)]
pub struct Timer {
    pub ctrl: u32,
    pub cmp: u32,
    pub cnt: u32,
    pending: bool,
}

impl Timer {
    fn tick(&mut self, cycles: u32) {
        if self.ctrl & TIMER_ENABLE == 0 {
            return;
        }
        self.cnt = self.cnt.wrapping_add(cycles);
        if self.ctrl & TIMER_IRQ_ENABLE != 0 && self.cnt >= self.cmp {
            self.pending = true;
        }
    }

    pub fn irq_asserted(&self) -> bool {
        self.pending
            && self.ctrl & (TIMER_ENABLE | TIMER_IRQ_ENABLE) == (TIMER_ENABLE | TIMER_IRQ_ENABLE)
            && self.cnt >= self.cmp
    }

    fn recheck(&mut self) {
        // Software moved CNT or CMP: recompute the level.
        self.pending = self.ctrl & TIMER_IRQ_ENABLE != 0 && self.cnt >= self.cmp;
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Watchpoint {
    pub base: u32,
    pub len: u32,
    pub on_read: bool,
    pub on_write: bool,
}

pub struct Cpu {
    pub a: u32,
    pub x: u32,
    pub y: u32,
    pub d: u32,
    pub b: u32,
    pub t: u32,
    pub s: u32,
    pub pc: u32,
    pub p: Status,
    /// R0..R63, visible through DP when `P.R` is set.
    pub regfile: [u32; 64],
    pub fregs: [f64; 8],
    pub mmu: Mmu,
    pub timer: Timer,
    pub mem: Memory,
    pub cycles: u64,
    pub trap: Trap,
    pub stopped: bool,
    pub waiting: bool,
    pub irq_pending: bool,
    pub nmi_pending: bool,
    pub abort_pending: bool,
    pub breakpoints: HashSet<u32>,
    pub watchpoints: Vec<Watchpoint>,
    ll_addr: u32,
    ll_valid: bool,
    watch_hit: Option<u32>,
}

impl Cpu {
    pub fn new(mem: Memory) -> Self {
        Cpu {
            a: 0,
            x: 0,
            y: 0,
            d: 0,
            b: 0,
            t: 0,
            s: 0x01FF,
            pc: 0,
            p: Status::empty(),
            regfile: [0; 64],
            fregs: [0.0; 8],
            mmu: Mmu::new(),
            timer: Timer::default(),
            mem,
            cycles: 0,
            trap: Trap::None,
            stopped: false,
            waiting: false,
            irq_pending: false,
            nmi_pending: false,
            abort_pending: false,
            breakpoints: HashSet::new(),
            watchpoints: Vec::new(),
            ll_addr: 0,
            ll_valid: false,
            watch_hit: None,
        }
    }

    /// Architectural reset: emulation mode, supervisor, IRQ masked, decimal
    /// set, 8-bit widths, PC from the 16-bit vector at $FFFC.
    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.d = 0;
        self.b = 0;
        self.t = 0;
        self.s = 0x01FF;
        self.p = Status::E | Status::S | Status::I | Status::D;
        self.stopped = false;
        self.waiting = false;
        self.trap = Trap::None;
        self.cycles = 0;
        self.ll_valid = false;
        self.mmu = Mmu::new();
        self.timer = Timer::default();
        let lo = self.mem.raw_read8(EVEC_RESET) as u32;
        let hi = self.mem.raw_read8(EVEC_RESET + 1) as u32;
        self.pc = (hi << 8) | lo;
        debug!("reset -> pc=${:04x}", self.pc);
    }

    // ------------------------------------------------------------------
    // Status helpers

    pub fn emulation(&self) -> bool {
        self.p.contains(Status::E)
    }

    pub fn supervisor(&self) -> bool {
        self.p.contains(Status::S)
    }

    pub fn m_width(&self) -> Width {
        Width::from_field(((self.p.bits() >> 6) & 3) as u8)
    }

    pub fn x_width(&self) -> Width {
        Width::from_field(((self.p.bits() >> 4) & 3) as u8)
    }

    /// Unknown prefix tails are NOPs instead of traps in compatibility mode.
    pub fn compat(&self) -> bool {
        self.m_width() == Width::W32 || self.p.contains(Status::K)
    }

    pub fn apply_flags(&mut self, delta: FlagDelta) {
        if let Some(c) = delta.c {
            self.p.set(Status::C, c);
        }
        if let Some(z) = delta.z {
            self.p.set(Status::Z, z);
        }
        if let Some(v) = delta.v {
            self.p.set(Status::V, v);
        }
        if let Some(n) = delta.n {
            self.p.set(Status::N, n);
        }
    }

    pub fn set_p(&mut self, bits: u16) {
        self.p = Status::from_bits_truncate(bits);
        self.clamp_stack();
    }

    fn clamp_stack(&mut self) {
        if self.emulation() {
            self.s = 0x0100 | (self.s & 0xFF);
        }
    }

    // ------------------------------------------------------------------
    // Memory pipeline

    fn check_watch(&mut self, addr: u32, is_write: bool) {
        for wp in &self.watchpoints {
            let hit = addr.wrapping_sub(wp.base) < wp.len
                && ((is_write && wp.on_write) || (!is_write && wp.on_read));
            if hit {
                self.watch_hit = Some(addr);
            }
        }
    }

    fn translate(&mut self, va: u32, access: Access) -> Result<u32, Fault> {
        if !self.mmu.enabled() {
            return Ok(va);
        }
        let supervisor = self.supervisor();
        let Cpu { mmu, mem, .. } = self;
        mmu.translate(va, access, supervisor, |addr| mem.raw_read64(addr))
            .map_err(|fault| Fault::Page { va: fault.va, code: fault.code })
    }

    /// The byte read policy: watchpoints, system registers (supervisor
    /// only, bypassing the MMU), MMIO regions, translation, then RAM.
    pub fn read8(&mut self, va: u32, access: Access) -> Result<u8, Fault> {
        self.check_watch(va, false);
        if (SYSREG_BASE..=SYSREG_END).contains(&va) {
            if !self.supervisor() {
                return Err(Fault::Privilege { pc: self.pc });
            }
            return Ok(self.sysreg_read8(va - SYSREG_BASE));
        }
        if self.mem.region_at(va).is_some() {
            return Ok(self.mem.phys_read8(va));
        }
        let pa = self.translate(va, access)?;
        Ok(self.mem.raw_read8(pa))
    }

    pub fn write8(&mut self, va: u32, value: u8) -> Result<(), Fault> {
        self.check_watch(va, true);
        if (SYSREG_BASE..=SYSREG_END).contains(&va) {
            if !self.supervisor() {
                return Err(Fault::Privilege { pc: self.pc });
            }
            self.sysreg_write8(va - SYSREG_BASE, value);
            return Ok(());
        }
        if self.mem.region_at(va).is_some() {
            self.clear_reservation_on(va);
            self.mem.phys_write8(va, value);
            return Ok(());
        }
        let pa = self.translate(va, Access::Write)?;
        self.clear_reservation_on(pa);
        self.mem.raw_write8(pa, value);
        Ok(())
    }

    pub fn read_value(&mut self, va: u32, width: Width, access: Access) -> Result<Value, Fault> {
        let mut raw = 0u32;
        for j in 0..width.bytes() {
            raw |= (self.read8(va.wrapping_add(j), access)? as u32) << (8 * j);
        }
        Ok(width.from(raw))
    }

    pub fn write_value(&mut self, va: u32, value: Value) -> Result<(), Fault> {
        let raw = value.inner();
        for j in 0..value.width().bytes() {
            self.write8(va.wrapping_add(j), (raw >> (8 * j)) as u8)?;
        }
        Ok(())
    }

    pub fn read16(&mut self, va: u32, access: Access) -> Result<u16, Fault> {
        Ok(self.read_value(va, Width::W16, access)?.inner() as u16)
    }

    pub fn read32(&mut self, va: u32, access: Access) -> Result<u32, Fault> {
        Ok(self.read_value(va, Width::W32, access)?.inner())
    }

    /// Best-effort read for tracing: no fault recording, no watchpoints.
    pub fn peek8(&mut self, va: u32) -> u8 {
        if (SYSREG_BASE..=SYSREG_END).contains(&va) {
            return self.sysreg_read8(va - SYSREG_BASE);
        }
        if self.mem.region_at(va).is_some() {
            return self.mem.phys_read8(va);
        }
        let saved_cr = self.mmu.mmucr;
        let saved_va = self.mmu.faultva;
        let result = self.translate(va, Access::Read);
        self.mmu.mmucr = saved_cr;
        self.mmu.faultva = saved_va;
        match result {
            Ok(pa) => self.mem.raw_read8(pa),
            Err(_) => 0,
        }
    }

    // ------------------------------------------------------------------
    // System registers (supervisor-only aperture, MMU bypassed)

    fn sysreg_read8(&mut self, offset: u32) -> u8 {
        let byte = offset & 3;
        let value = match offset & !3 {
            0x00 => self.mmu.mmucr,
            0x08 => self.mmu.asid as u32,
            0x10 => self.mmu.faultva,
            0x14 => self.mmu.ptbr as u32,
            0x18 => (self.mmu.ptbr >> 32) as u32,
            0x40 => self.timer.ctrl,
            0x44 => self.timer.cmp,
            0x48 => self.timer.cnt,
            _ => 0,
        };
        (value >> (8 * byte)) as u8
    }

    fn sysreg_write8(&mut self, offset: u32, value: u8) {
        let byte = offset & 3;
        let shift = 8 * byte;
        let mask = !(0xFFu32 << shift);
        let merge = |old: u32| (old & mask) | ((value as u32) << shift);
        match offset & !3 {
            0x00 => self.mmu.mmucr = merge(self.mmu.mmucr),
            0x04 => {
                // Byte stores invalidate with a partial VA; dropping more
                // entries than asked is always safe.
                self.mmu.invalidate_va((value as u32) << shift);
            }
            0x08 => {
                if byte == 0 {
                    self.mmu.asid = value;
                }
            }
            0x0C => {
                if byte == 0 {
                    self.mmu.invalidate_asid(value);
                }
            }
            0x10 => self.mmu.faultva = merge(self.mmu.faultva),
            0x14 => {
                let lo = merge(self.mmu.ptbr as u32);
                self.mmu.ptbr = (self.mmu.ptbr & !0xFFFF_FFFF) | lo as u64;
            }
            0x18 => {
                let hi = merge((self.mmu.ptbr >> 32) as u32);
                self.mmu.ptbr = (self.mmu.ptbr & 0xFFFF_FFFF) | ((hi as u64) << 32);
            }
            0x1C => self.mmu.flush(),
            0x40 => {
                self.timer.ctrl = merge(self.timer.ctrl);
                self.timer.recheck();
            }
            0x44 => {
                self.timer.cmp = merge(self.timer.cmp);
                self.timer.recheck();
            }
            0x48 => {
                self.timer.cnt = merge(self.timer.cnt);
                self.timer.recheck();
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Stack

    fn s_step(&mut self, down: bool) {
        if down {
            self.s = self.s.wrapping_sub(1);
        } else {
            self.s = self.s.wrapping_add(1);
        }
        self.clamp_stack();
    }

    pub fn push8(&mut self, value: u8) -> Result<(), Fault> {
        self.write8(self.s, value)?;
        self.s_step(true);
        Ok(())
    }

    pub fn pull8(&mut self) -> Result<u8, Fault> {
        self.s_step(false);
        self.read8(self.s, Access::Read)
    }

    pub fn push16(&mut self, value: u16) -> Result<(), Fault> {
        self.push8((value >> 8) as u8)?;
        self.push8(value as u8)
    }

    pub fn pull16(&mut self) -> Result<u16, Fault> {
        let lo = self.pull8()? as u16;
        let hi = self.pull8()? as u16;
        Ok((hi << 8) | lo)
    }

    pub fn push32(&mut self, value: u32) -> Result<(), Fault> {
        self.push16((value >> 16) as u16)?;
        self.push16(value as u16)
    }

    pub fn pull32(&mut self) -> Result<u32, Fault> {
        let lo = self.pull16()? as u32;
        let hi = self.pull16()? as u32;
        Ok((hi << 16) | lo)
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), Fault> {
        match value {
            Value::Byte(b) => self.push8(b),
            Value::Word(w) => self.push16(w),
            Value::Long(l) => self.push32(l),
        }
    }

    pub fn pull_width(&mut self, width: Width) -> Result<Value, Fault> {
        Ok(match width {
            Width::W8 => Value::Byte(self.pull8()?),
            Width::W16 => Value::Word(self.pull16()?),
            Width::W32 => Value::Long(self.pull32()?),
        })
    }

    // ------------------------------------------------------------------
    // LL/SC reservation

    pub fn set_reservation(&mut self, addr: u32) {
        self.ll_addr = addr;
        self.ll_valid = true;
    }

    /// Store-conditional check: consumes the reservation either way.
    pub fn take_reservation(&mut self, addr: u32) -> bool {
        let ok = self.ll_valid && self.ll_addr == addr;
        self.ll_valid = false;
        ok
    }

    pub fn reservation_valid(&self) -> bool {
        self.ll_valid
    }

    fn clear_reservation_on(&mut self, addr: u32) {
        if self.ll_valid && addr == self.ll_addr {
            self.ll_valid = false;
        }
    }

    // ------------------------------------------------------------------
    // Exceptions

    /// Common entry: push 32-bit PC + 16-bit P (regardless of E), mask
    /// IRQs, drop decimal, enter supervisor, load the vector.
    pub fn take_exception(&mut self, native: u32, emu: u32) -> Result<(), Fault> {
        self.ll_valid = false;
        self.push32(self.pc)?;
        self.push16(self.p.bits())?;
        self.p.insert(Status::I | Status::S);
        self.p.remove(Status::D);
        self.pc = if self.emulation() {
            self.read16(emu, Access::Read)? as u32
        } else {
            self.read32(native, Access::Read)?
        };
        Ok(())
    }

    /// RTI always pulls 16-bit P then 32-bit PC; switching modes on the way
    /// out is legal and intended.
    pub fn rti(&mut self) -> Result<(), Fault> {
        let p = self.pull16()?;
        self.set_p(p);
        self.pc = self.pull32()?;
        self.ll_valid = false;
        Ok(())
    }

    pub fn syscall(&mut self, number: u8) -> Result<(), Fault> {
        self.trap = Trap::Syscall;
        // TRAP always vectors through the native table.
        let vector = VEC_SYSCALL + 4 * number as u32;
        self.ll_valid = false;
        self.push32(self.pc)?;
        self.push16(self.p.bits())?;
        self.p.insert(Status::I | Status::S);
        self.p.remove(Status::D);
        self.pc = self.read32(vector, Access::Read)?;
        Ok(())
    }

    fn irq_line(&mut self) -> bool {
        self.irq_pending || self.timer.irq_asserted() || self.mem.any_region_irq()
    }

    /// ABORT > NMI > IRQ, checked between instructions. WAI parks until
    /// any line asserts, even a masked IRQ.
    fn service_interrupts(&mut self) -> Result<bool, Fault> {
        if self.abort_pending {
            self.abort_pending = false;
            self.waiting = false;
            self.trap = Trap::Abort;
            self.take_exception(VEC_ABORT, EVEC_ABORT)?;
            self.cycles += 8;
            return Ok(true);
        }
        if self.nmi_pending {
            self.nmi_pending = false;
            self.waiting = false;
            self.trap = Trap::Nmi;
            self.take_exception(VEC_NMI, EVEC_NMI)?;
            self.cycles += 8;
            return Ok(true);
        }
        if self.irq_line() {
            self.waiting = false;
            if !self.p.contains(Status::I) {
                self.trap = Trap::Irq;
                self.take_exception(VEC_IRQ, EVEC_IRQ)?;
                self.cycles += 8;
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Stepping

    /// Execute one instruction (or deliver one interrupt). Returns the stop
    /// reason when the step was fatal.
    pub fn step(&mut self) -> Option<StopReason> {
        if self.stopped {
            return Some(StopReason::Stopped);
        }
        self.trap = Trap::None;
        self.watch_hit = None;

        match self.service_interrupts() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(fault) => return self.handle_fault(fault, self.pc),
        }
        if self.waiting {
            self.cycles += 1;
            return None;
        }

        let pc_before = self.pc;
        let outcome = self.execute_one();
        match outcome {
            Ok(cycles) => {
                self.cycles += cycles as u64;
                self.timer.tick(cycles);
            }
            Err(fault) => {
                // Faulting instructions restart: report the faulting PC.
                self.pc = pc_before;
                return self.handle_fault(fault, pc_before);
            }
        }

        if self.watch_hit.is_some() {
            self.trap = Trap::Watchpoint;
            return Some(StopReason::Trap(Trap::Watchpoint));
        }
        if self.stopped {
            return Some(StopReason::Stopped);
        }
        None
    }

    fn handle_fault(&mut self, fault: Fault, pc: u32) -> Option<StopReason> {
        match fault {
            Fault::Page { va, code } => {
                self.trap = Trap::PageFault;
                trace!("page fault va=${:08x} code={} pc=${:08x}", va, code, pc);
                let saved = (self.mmu.mmucr, self.mmu.faultva);
                match self.take_exception(VEC_PAGEFAULT, EVEC_PAGEFAULT) {
                    // No handler installed: stop with state inspectable.
                    Ok(()) if self.pc == 0 => Some(StopReason::Trap(Trap::PageFault)),
                    Ok(()) => None,
                    Err(_) => {
                        // The entry sequence faulted too; keep the original
                        // fault visible.
                        self.mmu.mmucr = saved.0;
                        self.mmu.faultva = saved.1;
                        Some(StopReason::Trap(Trap::PageFault))
                    }
                }
            }
            Fault::Privilege { .. } => {
                self.trap = Trap::Privilege;
                Some(StopReason::Trap(Trap::Privilege))
            }
            Fault::Illegal { opcode, .. } => {
                self.trap = Trap::IllegalOp;
                debug!("illegal opcode ${:02x} at ${:08x}", opcode, pc);
                let _ = self.take_exception(VEC_ILLEGAL, EVEC_ILLEGAL);
                Some(StopReason::Trap(Trap::IllegalOp))
            }
        }
    }

    /// Run until the cycle budget is exhausted or something stops us. A
    /// breakpoint on the resume address does not re-trigger immediately.
    pub fn run(&mut self, cycle_budget: u64) -> StopReason {
        let limit = self.cycles.saturating_add(cycle_budget);
        let mut first = true;
        loop {
            if !first && self.breakpoints.contains(&self.pc) {
                self.trap = Trap::Breakpoint;
                return StopReason::Breakpoint(self.pc);
            }
            first = false;
            if let Some(reason) = self.step() {
                return reason;
            }
            if self.cycles >= limit {
                return StopReason::CycleBudget;
            }
        }
    }

    /// Step at most `count` instructions, breakpoints ignored.
    pub fn step_n(&mut self, count: u64) -> StopReason {
        for _ in 0..count {
            if let Some(reason) = self.step() {
                return reason;
            }
        }
        StopReason::StepBudget
    }

    // ------------------------------------------------------------------
    // Tracing

    pub fn disassemble_at(&mut self, addr: u32) -> (usize, String) {
        let mut bytes = [0u8; 8];
        for (j, slot) in bytes.iter_mut().enumerate() {
            *slot = self.peek8(addr.wrapping_add(j as u32));
        }
        disassemble(&bytes, addr, self.m_width(), self.x_width(), self.emulation())
    }

    /// One-line trace in the `pc  disasm  A:... P:nvmxdizc` shape.
    pub fn trace_line(&mut self) -> String {
        let (_, text) = self.disassemble_at(self.pc);
        let p = self.p;
        let flag = |bit: Status, ch: char| {
            if p.contains(bit) {
                ch.to_ascii_uppercase()
            } else {
                ch
            }
        };
        format!(
            "{:08x}  {:<28} A:{:08x} X:{:08x} Y:{:08x} S:{:08x} D:{:08x} B:{:08x} T:{:08x} P:{}{}{}{}{}{}{}{}{}{} cyc:{}",
            self.pc,
            text,
            self.a,
            self.x,
            self.y,
            self.s,
            self.d,
            self.b,
            self.t,
            flag(Status::N, 'n'),
            flag(Status::V, 'v'),
            flag(Status::E, 'e'),
            flag(Status::S, 's'),
            flag(Status::R, 'r'),
            flag(Status::K, 'k'),
            flag(Status::D, 'd'),
            flag(Status::I, 'i'),
            flag(Status::Z, 'z'),
            flag(Status::C, 'c'),
            self.cycles,
        )
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔═══════════════ CPU state ═══════════════╗")?;
        writeln!(f, "║ A  {:08x}   X  {:08x}   Y {:08x} ║", self.a, self.x, self.y)?;
        writeln!(f, "║ D  {:08x}   B  {:08x}   T {:08x} ║", self.d, self.b, self.t)?;
        writeln!(f, "║ S  {:08x}   PC {:08x}              ║", self.s, self.pc)?;
        writeln!(
            f,
            "║ P  {:04x}  M={} X={} E={} S={} R={} K={}         ║",
            self.p.bits(),
            self.m_width(),
            self.x_width(),
            self.emulation() as u8,
            self.supervisor() as u8,
            self.p.contains(Status::R) as u8,
            self.p.contains(Status::K) as u8,
        )?;
        write!(f, "╚═════════════════════════════════════════╝")
    }
}

// ----------------------------------------------------------------------
// Interactive debugger (single step, breakpoints, memory watch)

pub struct Debugger {
    code_running: bool,
    last_cmd: DebugCommand,
    watches: HashSet<u32>,
    window: usize,
}

#[derive(PartialEq, Clone)]
enum DebugCommand {
    Quit,
    SetBreakpoint(Option<String>),
    DeleteBreakpoint(Option<String>),
    Continue,
    Step,
    Jump(Option<String>),
    Watch(Option<String>),
    Unwatch(Option<String>),
}

impl Debugger {
    pub fn new() -> Box<Self> {
        Box::new(Debugger {
            code_running: false,
            last_cmd: DebugCommand::Step,
            watches: HashSet::new(),
            window: 12,
        })
    }

    pub fn update(&mut self, cpu: &mut Cpu) -> crate::devices::Signal {
        use crate::devices::Signal;
        if self.code_running && !cpu.breakpoints.contains(&cpu.pc) {
            return Signal::Ok;
        }
        self.code_running = false;
        self.draw(cpu);
        let cmd = self.get_command();
        match &cmd {
            DebugCommand::Quit => Signal::Quit,
            DebugCommand::SetBreakpoint(arg) => {
                if let Some(addr) = parse_address(arg) {
                    cpu.breakpoints.insert(addr);
                    println!("Breakpoint created.");
                } else {
                    println!("Invalid address!");
                }
                Signal::NoOp
            }
            DebugCommand::DeleteBreakpoint(arg) => {
                if let Some(addr) = parse_address(arg) {
                    cpu.breakpoints.remove(&addr);
                    println!("Breakpoint deleted.");
                } else {
                    println!("Invalid address!");
                }
                Signal::NoOp
            }
            DebugCommand::Watch(arg) => {
                if let Some(addr) = parse_address(arg) {
                    self.watches.insert(addr);
                }
                Signal::NoOp
            }
            DebugCommand::Unwatch(arg) => {
                if let Some(addr) = parse_address(arg) {
                    self.watches.remove(&addr);
                }
                Signal::NoOp
            }
            DebugCommand::Continue => {
                self.code_running = true;
                Signal::Ok
            }
            DebugCommand::Step => {
                self.last_cmd = cmd;
                Signal::Ok
            }
            DebugCommand::Jump(arg) => {
                if let Some(addr) = parse_address(arg) {
                    cpu.pc = addr;
                    self.last_cmd = cmd;
                    Signal::Ok
                } else {
                    Signal::NoOp
                }
            }
        }
    }

    fn draw(&mut self, cpu: &mut Cpu) {
        print!("{}{}", clear::All, cursor::Goto(1, 1));
        println!("{}", cpu);
        println!();
        let mut addr = cpu.pc;
        for row in 0..self.window {
            let (len, text) = cpu.disassemble_at(addr);
            let mut raw = String::new();
            for j in 0..len {
                raw.push_str(&format!("{:02x} ", cpu.peek8(addr.wrapping_add(j as u32))));
            }
            let marker = if row == 0 {
                format!("{}>{}", color::Fg(color::Green), color::Fg(color::Reset))
            } else if cpu.breakpoints.contains(&addr) {
                format!("{}*{}", color::Fg(color::Red), color::Fg(color::Reset))
            } else {
                " ".to_string()
            };
            println!("{}{:08x}  {:<24} {}", marker, addr, raw, text);
            addr = addr.wrapping_add(len as u32);
        }
        if !self.watches.is_empty() {
            println!("\nWatched memory:");
            let mut sorted: Vec<u32> = self.watches.iter().copied().collect();
            sorted.sort();
            for watch in sorted {
                let value = cpu.peek8(watch) as u32
                    | (cpu.peek8(watch.wrapping_add(1)) as u32) << 8
                    | (cpu.peek8(watch.wrapping_add(2)) as u32) << 16
                    | (cpu.peek8(watch.wrapping_add(3)) as u32) << 24;
                println!("{:08x}: {:08x}", watch, value);
            }
        }
        println!("\nn to step, c to continue, b/d <addr> for breakpoints, j <addr> to jump, w/u <addr> to watch, q to quit.");
        print!("> ");
        io::stdout().flush().expect("");
    }

    fn get_command(&mut self) -> DebugCommand {
        let mut input = String::new();
        io::stdin().read_line(&mut input).unwrap_or(0);
        let mut cmd = input.split_whitespace();
        match cmd.next() {
            Some("q") => DebugCommand::Quit,
            Some("s") | Some("n") => DebugCommand::Step,
            Some("b") => DebugCommand::SetBreakpoint(cmd.next().map(String::from)),
            Some("d") => DebugCommand::DeleteBreakpoint(cmd.next().map(String::from)),
            Some("j") => DebugCommand::Jump(cmd.next().map(String::from)),
            Some("w") => DebugCommand::Watch(cmd.next().map(String::from)),
            Some("u") => DebugCommand::Unwatch(cmd.next().map(String::from)),
            Some("c") => DebugCommand::Continue,
            _ => self.last_cmd.clone(),
        }
    }
}

fn parse_address(address: &Option<String>) -> Option<u32> {
    match address {
        Some(addr) => u32::from_str_radix(addr.trim_start_matches('$'), 16).ok(),
        None => None,
    }
}
