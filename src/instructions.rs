// Fetch-decode-execute. One instruction per call: the decode table picks the
// (mnemonic, mode) pair, an addressing helper turns the mode into an
// effective address, and a width-polymorphic kernel does the work at the
// M or X width. The $02 and $42 prefixes get their own dispatchers.

use crate::fields::{FlagDelta, Value, Width};
use crate::isa;
use crate::mmu::Access;
use crate::processor::{
    Cpu, Fault, Status, Trap, EVEC_IRQ, VEC_BRK,
};

/// Where an operand lives. Immediates never materialize an address; DP
/// accesses reroute into the register window when `P.R` is set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Ea {
    Mem(u32),
    Window(u8),
    Acc,
}

enum Source {
    Imm(Value),
    Place(Ea),
}

impl Cpu {
    // ------------------------------------------------------------------
    // Operand fetch

    fn fetch8(&mut self) -> Result<u8, Fault> {
        let byte = self.read8(self.pc, Access::Execute)?;
        self.pc = self.pc.wrapping_add(1);
        Ok(byte)
    }

    fn fetch16(&mut self) -> Result<u16, Fault> {
        let lo = self.fetch8()? as u16;
        let hi = self.fetch8()? as u16;
        Ok((hi << 8) | lo)
    }

    fn fetch24(&mut self) -> Result<u32, Fault> {
        let lo = self.fetch16()? as u32;
        let hi = self.fetch8()? as u32;
        Ok((hi << 16) | lo)
    }

    fn fetch32(&mut self) -> Result<u32, Fault> {
        let lo = self.fetch16()? as u32;
        let hi = self.fetch16()? as u32;
        Ok((hi << 16) | lo)
    }

    fn fetch_width(&mut self, width: Width) -> Result<Value, Fault> {
        Ok(match width {
            Width::W8 => Value::Byte(self.fetch8()?),
            Width::W16 => Value::Word(self.fetch16()?),
            Width::W32 => Value::Long(self.fetch32()?),
        })
    }

    fn xi(&self) -> u32 {
        self.x & self.x_width().mask()
    }

    fn yi(&self) -> u32 {
        self.y & self.x_width().mask()
    }

    // ------------------------------------------------------------------
    // Register-window bytes

    fn win_read8(&self, offset: u8) -> u8 {
        let reg = (offset >> 2) as usize;
        let byte = offset & 3;
        (self.regfile[reg] >> (8 * byte)) as u8
    }

    fn win_write8(&mut self, offset: u8, value: u8) {
        let reg = (offset >> 2) as usize;
        let shift = 8 * (offset & 3) as u32;
        self.regfile[reg] = (self.regfile[reg] & !(0xFF << shift)) | ((value as u32) << shift);
    }

    fn ea_read(&mut self, ea: Ea, width: Width) -> Result<Value, Fault> {
        match ea {
            Ea::Mem(addr) => self.read_value(addr, width, Access::Read),
            Ea::Window(offset) => {
                let mut raw = 0u32;
                for j in 0..width.bytes() {
                    raw |= (self.win_read8((offset as u32 + j) as u8) as u32) << (8 * j);
                }
                Ok(width.from(raw))
            }
            Ea::Acc => Ok(width.from(self.a)),
        }
    }

    fn ea_write(&mut self, ea: Ea, value: Value) -> Result<(), Fault> {
        match ea {
            Ea::Mem(addr) => self.write_value(addr, value),
            Ea::Window(offset) => {
                let raw = value.inner();
                for j in 0..value.width().bytes() {
                    self.win_write8((offset as u32 + j) as u8, (raw >> (8 * j)) as u8);
                }
                Ok(())
            }
            Ea::Acc => {
                self.set_acc_width(value);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Width-aware register access

    fn acc(&self, width: Width) -> Value {
        width.from(self.a)
    }

    fn set_acc_width(&mut self, value: Value) {
        let mask = value.width().mask();
        self.a = (self.a & !mask) | (value.inner() & mask);
    }

    fn set_index(&mut self, value: Value) -> u32 {
        // Index registers zero-extend at the X width.
        value.inner() & value.width().mask()
    }

    // ------------------------------------------------------------------
    // Addressing modes

    fn dp_ea(&self, offset: u32) -> Ea {
        if self.p.contains(Status::R) && offset < 0x100 {
            Ea::Window(offset as u8)
        } else {
            Ea::Mem(self.d.wrapping_add(offset))
        }
    }

    fn ea_dp(&mut self, index: u32) -> Result<Ea, Fault> {
        let base = self.fetch8()? as u32;
        Ok(self.dp_ea(base.wrapping_add(index)))
    }

    fn ea_abs(&mut self, index: u32) -> Result<Ea, Fault> {
        let offset = self.fetch16()? as u32;
        Ok(Ea::Mem(self.b.wrapping_add(offset).wrapping_add(index)))
    }

    fn ea_long(&mut self, index: u32) -> Result<Ea, Fault> {
        let addr = self.fetch24()?;
        Ok(Ea::Mem(addr.wrapping_add(index)))
    }

    fn dp_pointer16(&mut self, offset: u32) -> Result<u32, Fault> {
        let ea = self.dp_ea(offset);
        Ok(self.ea_read(ea, Width::W16)?.inner())
    }

    fn dp_pointer32(&mut self, offset: u32) -> Result<u32, Fault> {
        let ea = self.dp_ea(offset);
        Ok(self.ea_read(ea, Width::W32)?.inner())
    }

    fn resolve_ea(&mut self, mode: crate::fields::AddrMode) -> Result<Ea, Fault> {
        use crate::fields::AddrMode::*;
        Ok(match mode {
            Accumulator => Ea::Acc,
            Direct => self.ea_dp(0)?,
            DirectX => {
                let index = self.xi();
                self.ea_dp(index)?
            }
            DirectY => {
                let index = self.yi();
                self.ea_dp(index)?
            }
            Absolute => self.ea_abs(0)?,
            AbsoluteX => {
                let index = self.xi();
                self.ea_abs(index)?
            }
            AbsoluteY => {
                let index = self.yi();
                self.ea_abs(index)?
            }
            Long => self.ea_long(0)?,
            LongX => {
                let index = self.xi();
                self.ea_long(index)?
            }
            Indirect => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base)?;
                Ea::Mem(self.b.wrapping_add(ptr))
            }
            IndirectX => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base.wrapping_add(self.xi()))?;
                Ea::Mem(self.b.wrapping_add(ptr))
            }
            IndirectY => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base)?;
                Ea::Mem(self.b.wrapping_add(ptr).wrapping_add(self.yi()))
            }
            IndirectLong => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer32(base)?;
                Ea::Mem(ptr)
            }
            IndirectLongY => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer32(base)?;
                Ea::Mem(ptr.wrapping_add(self.yi()))
            }
            StackRel => {
                let offset = self.fetch8()? as u32;
                Ea::Mem(self.s.wrapping_add(offset))
            }
            StackRelY => {
                let offset = self.fetch8()? as u32;
                let ptr = self
                    .read_value(self.s.wrapping_add(offset), Width::W16, Access::Read)?
                    .inner();
                Ea::Mem(self.b.wrapping_add(ptr).wrapping_add(self.yi()))
            }
            other => unreachable!("mode {:?} resolved elsewhere", other),
        })
    }

    fn operand(&mut self, mode: crate::fields::AddrMode, width: Width) -> Result<Source, Fault> {
        use crate::fields::AddrMode::*;
        Ok(match mode {
            Immediate => Source::Imm(self.fetch_width(width)?),
            mode => Source::Place(self.resolve_ea(mode)?),
        })
    }

    fn source_value(&mut self, source: &Source, width: Width) -> Result<Value, Fault> {
        match source {
            Source::Imm(value) => Ok(*value),
            Source::Place(ea) => self.ea_read(*ea, width),
        }
    }

    // ------------------------------------------------------------------
    // Main dispatch

    pub(crate) fn execute_one(&mut self) -> Result<u32, Fault> {
        let opcode_pc = self.pc;
        let opcode = self.fetch8()?;
        match opcode {
            isa::EXT_PREFIX => return self.execute_extended(opcode_pc),
            isa::WID_PREFIX => return self.execute_wid(opcode_pc),
            _ => {}
        }
        let entry = match isa::decode(opcode) {
            Some(entry) => entry,
            None => {
                // Reserved byte: NOP under compat, illegal otherwise.
                return if self.compat() {
                    Ok(2)
                } else {
                    Err(Fault::Illegal { opcode, pc: opcode_pc })
                };
            }
        };
        let mut cycles = entry.cycles as u32;
        let m = self.m_width();
        let xw = self.x_width();
        let mnemonic = entry.mnemonic;
        let mode = entry.mode;

        match mnemonic {
            // ---- loads and stores ------------------------------------
            "LDA" => {
                let src = self.operand(mode, m)?;
                let value = self.source_value(&src, m)?;
                self.set_acc_width(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "LDX" => {
                let src = self.operand(mode, xw)?;
                let value = self.source_value(&src, xw)?;
                self.x = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "LDY" => {
                let src = self.operand(mode, xw)?;
                let value = self.source_value(&src, xw)?;
                self.y = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "STA" => {
                let ea = self.resolve_ea(mode)?;
                let value = self.acc(m);
                self.ea_write(ea, value)?;
            }
            "STX" => {
                let ea = self.resolve_ea(mode)?;
                let value = xw.from(self.x);
                self.ea_write(ea, value)?;
            }
            "STY" => {
                let ea = self.resolve_ea(mode)?;
                let value = xw.from(self.y);
                self.ea_write(ea, value)?;
            }
            "STZ" => {
                let ea = self.resolve_ea(mode)?;
                self.ea_write(ea, m.zero())?;
            }
            // ---- ALU -------------------------------------------------
            "ADC" | "SBC" | "AND" | "ORA" | "EOR" | "CMP" | "BIT" => {
                let src = self.operand(mode, m)?;
                let value = self.source_value(&src, m)?;
                let immediate = matches!(src, Source::Imm(_));
                self.alu_binary(mnemonic, value, immediate);
            }
            "CPX" | "CPY" => {
                let src = self.operand(mode, xw)?;
                let value = self.source_value(&src, xw)?;
                let reg = if mnemonic == "CPX" { self.x } else { self.y };
                let flags = xw.from(reg).compare(value);
                self.apply_flags(flags);
            }
            // ---- read-modify-write -----------------------------------
            "ASL" | "LSR" | "ROL" | "ROR" | "INC" | "DEC" | "TSB" | "TRB" => {
                let ea = self.resolve_ea(mode)?;
                let value = self.ea_read(ea, m)?;
                let (result, flags) = self.rmw(mnemonic, value);
                self.ea_write(ea, result)?;
                self.apply_flags(flags);
            }
            // ---- branches --------------------------------------------
            "BCC" | "BCS" | "BEQ" | "BMI" | "BNE" | "BPL" | "BRA" | "BVC" | "BVS" | "BRL" => {
                let wide = m == Width::W32 || mnemonic == "BRL";
                let disp = if wide {
                    self.fetch16()? as i16 as i32
                } else {
                    self.fetch8()? as i8 as i32
                };
                if self.branch_taken(mnemonic) {
                    self.pc = self.pc.wrapping_add(disp as u32);
                    cycles += 1;
                }
            }
            // ---- jumps and returns -----------------------------------
            "JMP" | "JML" | "JSR" | "JSL" => {
                cycles = self.jump(mnemonic, mode, m, cycles)?;
            }
            "RTS" | "RTL" => {
                self.pc = self.pull32()?;
            }
            "RTI" => {
                self.rti()?;
            }
            // ---- stack -----------------------------------------------
            "PHA" => self.push_value(self.acc(m))?,
            "PHX" => self.push_value(xw.from(self.x))?,
            "PHY" => self.push_value(xw.from(self.y))?,
            "PHP" => self.push16(self.p.bits())?,
            "PHD" => self.push32(self.d)?,
            "PHK" => self.push8((self.pc >> 16) as u8)?,
            "PLA" => {
                let value = self.pull_width(m)?;
                self.set_acc_width(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "PLX" => {
                let value = self.pull_width(xw)?;
                self.x = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "PLY" => {
                let value = self.pull_width(xw)?;
                self.y = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "PLP" => {
                let bits = self.pull16()?;
                self.set_p(bits);
            }
            "PLD" => {
                self.d = self.pull32()?;
                let value = Value::Long(self.d);
                self.apply_flags(FlagDelta::nz(value));
            }
            "PEA" => {
                let value = self.fetch16()?;
                self.push16(value)?;
            }
            "PEI" => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base)?;
                self.push16(ptr as u16)?;
            }
            "PER" => {
                let disp = self.fetch16()? as i16 as i32;
                let addr = self.pc.wrapping_add(disp as u32);
                self.push32(addr)?;
            }
            // ---- flag management -------------------------------------
            "CLC" => self.p.remove(Status::C),
            "SEC" => self.p.insert(Status::C),
            "CLD" => self.p.remove(Status::D),
            "SED" => self.p.insert(Status::D),
            "CLI" => self.p.remove(Status::I),
            "SEI" => self.p.insert(Status::I),
            "CLV" => self.p.remove(Status::V),
            "REP" => {
                let mut mask = self.fetch16()?;
                if !self.supervisor() {
                    // User code clearing S is silently masked out.
                    mask &= !Status::S.bits();
                }
                let bits = self.p.bits() & !mask;
                self.set_p(bits);
            }
            "SEP" => {
                let mask = self.fetch16()?;
                if !self.supervisor() && mask & Status::S.bits() != 0 {
                    return Err(Fault::Privilege { pc: opcode_pc });
                }
                let bits = self.p.bits() | mask;
                self.set_p(bits);
            }
            "XCE" => {
                let carry = self.p.contains(Status::C);
                let emu = self.p.contains(Status::E);
                self.p.set(Status::C, emu);
                self.p.set(Status::E, carry);
                let bits = self.p.bits();
                self.set_p(bits);
            }
            // ---- transfers -------------------------------------------
            "TAX" => {
                let value = xw.from(self.a);
                self.x = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TAY" => {
                let value = xw.from(self.a);
                self.y = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TXA" => {
                let value = m.from(self.x);
                self.set_acc_width(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TYA" => {
                let value = m.from(self.y);
                self.set_acc_width(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TXY" => {
                let value = xw.from(self.x);
                self.y = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TYX" => {
                let value = xw.from(self.y);
                self.x = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TSX" => {
                let value = xw.from(self.s);
                self.x = self.set_index(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "TXS" => {
                self.s = self.x;
                let bits = self.p.bits();
                self.set_p(bits);
            }
            "TCD" => {
                self.d = self.a;
                self.apply_flags(FlagDelta::nz(Value::Long(self.d)));
            }
            "TDC" => {
                self.a = self.d;
                self.apply_flags(FlagDelta::nz(Value::Long(self.a)));
            }
            "TCS" => {
                self.s = self.a;
                let bits = self.p.bits();
                self.set_p(bits);
            }
            "TSC" => {
                self.a = self.s;
                self.apply_flags(FlagDelta::nz(Value::Long(self.a)));
            }
            "XBA" => {
                let lo = self.a & 0xFF;
                let hi = (self.a >> 8) & 0xFF;
                self.a = (self.a & 0xFFFF_0000) | (lo << 8) | hi;
                let value = Value::Byte(hi as u8);
                self.apply_flags(FlagDelta::nz(value));
            }
            // ---- block move ------------------------------------------
            "MVN" | "MVP" => {
                let dst_bank = self.fetch8()? as u32;
                let src_bank = self.fetch8()? as u32;
                let src = (src_bank << 16) | (self.x & 0xFFFF);
                let dst = (dst_bank << 16) | (self.y & 0xFFFF);
                let byte = self.read8(src, Access::Read)?;
                self.write8(dst, byte)?;
                if mnemonic == "MVN" {
                    self.x = self.x.wrapping_add(1);
                    self.y = self.y.wrapping_add(1);
                } else {
                    self.x = self.x.wrapping_sub(1);
                    self.y = self.y.wrapping_sub(1);
                }
                self.a = self.a.wrapping_sub(1);
                if self.a != 0xFFFF_FFFF {
                    // Not done: the instruction re-fetches itself.
                    self.pc = opcode_pc;
                }
            }
            // ---- misc ------------------------------------------------
            "NOP" => {}
            "BRK" => {
                // No signature byte: the pushed PC is the address right
                // after the opcode.
                self.trap = Trap::Brk;
                self.take_exception(VEC_BRK, EVEC_IRQ)?;
            }
            "WAI" => {
                self.waiting = true;
            }
            "STP" => {
                if !self.supervisor() {
                    return Err(Fault::Privilege { pc: opcode_pc });
                }
                self.stopped = true;
            }
            other => unreachable!("unhandled mnemonic {}", other),
        }
        Ok(cycles)
    }

    fn alu_binary(&mut self, mnemonic: &str, value: Value, immediate: bool) {
        let m = self.m_width();
        let acc = self.acc(m);
        let carry = self.p.contains(Status::C);
        let decimal = self.p.contains(Status::D);
        match mnemonic {
            "ADC" => {
                let (result, flags) = if decimal {
                    acc.adc_decimal(value, carry)
                } else {
                    acc.adc(value, carry)
                };
                self.set_acc_width(result);
                self.apply_flags(flags);
            }
            "SBC" => {
                let (result, flags) = if decimal {
                    acc.sbc_decimal(value, carry)
                } else {
                    acc.sbc(value, carry)
                };
                self.set_acc_width(result);
                self.apply_flags(flags);
            }
            "AND" => {
                let (result, flags) = acc.and(value);
                self.set_acc_width(result);
                self.apply_flags(flags);
            }
            "ORA" => {
                let (result, flags) = acc.or(value);
                self.set_acc_width(result);
                self.apply_flags(flags);
            }
            "EOR" => {
                let (result, flags) = acc.xor(value);
                self.set_acc_width(result);
                self.apply_flags(flags);
            }
            "CMP" => {
                let flags = acc.compare(value);
                self.apply_flags(flags);
            }
            "BIT" => {
                let masked = acc.inner() & value.inner();
                self.p.set(Status::Z, masked & m.mask() == 0);
                if !immediate {
                    self.p.set(Status::N, value.inner() & m.sign_bit() != 0);
                    self.p.set(Status::V, value.inner() & (m.sign_bit() >> 1) != 0);
                }
            }
            _ => unreachable!(),
        }
    }

    fn rmw(&mut self, mnemonic: &str, value: Value) -> (Value, FlagDelta) {
        let m = self.m_width();
        let carry = self.p.contains(Status::C);
        match mnemonic {
            "ASL" => value.asl(false, false),
            "LSR" => value.lsr(false, false),
            "ROL" => value.asl(carry, true),
            "ROR" => value.lsr(carry, true),
            "INC" => {
                let result = m.from(value.inner().wrapping_add(1));
                (result, FlagDelta::nz(result))
            }
            "DEC" => {
                let result = m.from(value.inner().wrapping_sub(1));
                (result, FlagDelta::nz(result))
            }
            "TSB" => {
                let acc = self.a & m.mask();
                let result = m.from(value.inner() | acc);
                let mut flags = FlagDelta::new();
                flags.z = Some(value.inner() & acc == 0);
                (result, flags)
            }
            "TRB" => {
                let acc = self.a & m.mask();
                let result = m.from(value.inner() & !acc);
                let mut flags = FlagDelta::new();
                flags.z = Some(value.inner() & acc == 0);
                (result, flags)
            }
            _ => unreachable!(),
        }
    }

    fn branch_taken(&self, mnemonic: &str) -> bool {
        match mnemonic {
            "BRA" | "BRL" => true,
            "BCC" => !self.p.contains(Status::C),
            "BCS" => self.p.contains(Status::C),
            "BNE" => !self.p.contains(Status::Z),
            "BEQ" => self.p.contains(Status::Z),
            "BPL" => !self.p.contains(Status::N),
            "BMI" => self.p.contains(Status::N),
            "BVC" => !self.p.contains(Status::V),
            "BVS" => self.p.contains(Status::V),
            _ => unreachable!(),
        }
    }

    fn jump(
        &mut self,
        mnemonic: &str,
        mode: crate::fields::AddrMode,
        m: Width,
        cycles: u32,
    ) -> Result<u32, Fault> {
        use crate::fields::AddrMode::*;
        let wide = m == Width::W32;
        let target = match mode {
            Absolute => {
                let addr = if wide { self.fetch32()? } else { self.fetch16()? as u32 };
                if wide {
                    addr
                } else {
                    (self.pc & 0xFFFF_0000) | addr
                }
            }
            Long => self.fetch24()?,
            AbsIndirect => {
                let ptr = if wide { self.fetch32()? } else { self.fetch16()? as u32 };
                if wide {
                    self.read32(ptr, Access::Read)?
                } else {
                    self.read16(ptr, Access::Read)? as u32
                }
            }
            AbsIndirectX => {
                let base = if wide { self.fetch32()? } else { self.fetch16()? as u32 };
                let ptr = base.wrapping_add(self.xi());
                if wide {
                    self.read32(ptr, Access::Read)?
                } else {
                    self.read16(ptr, Access::Read)? as u32
                }
            }
            AbsIndirectLong => {
                let ptr = if wide { self.fetch32()? } else { self.fetch16()? as u32 };
                self.read32(ptr, Access::Read)?
            }
            other => unreachable!("jump mode {:?}", other),
        };
        if matches!(mnemonic, "JSR" | "JSL") {
            self.push32(self.pc)?;
        }
        self.pc = target;
        Ok(cycles)
    }

    // ------------------------------------------------------------------
    // $02 extended prefix

    fn execute_extended(&mut self, opcode_pc: u32) -> Result<u32, Fault> {
        let ext = self.fetch8()?;
        let m = self.m_width();
        let cycles = isa::ext_cycles(ext) as u32;
        match ext {
            0x00..=0x07 => self.ext_muldiv(ext, m)?,
            0x10..=0x15 => self.ext_atomic(ext, m)?,
            0x20 => {
                self.d = self.fetch32()?;
            }
            0x21 => {
                let ea = self.ea_dp(0)?;
                self.d = self.ea_read(ea, Width::W32)?.inner();
            }
            0x22 => {
                self.b = self.fetch32()?;
            }
            0x23 => {
                let ea = self.ea_dp(0)?;
                self.b = self.ea_read(ea, Width::W32)?.inner();
            }
            0x24 => {
                self.a = self.d;
                self.apply_flags(FlagDelta::nz(Value::Long(self.a)));
            }
            0x25 => {
                self.a = self.b;
                self.apply_flags(FlagDelta::nz(Value::Long(self.a)));
            }
            0x30 => self.p.insert(Status::R),
            0x31 => self.p.remove(Status::R),
            0x40 => {
                let number = self.fetch8()?;
                self.syscall(number)?;
            }
            // Memory ordering is sequential by construction; the fences
            // only cost their two cycles.
            0x50 | 0x51 | 0x52 => {}
            0x86 => {
                self.a = self.t;
                self.apply_flags(FlagDelta::nz(Value::Long(self.a)));
            }
            0x87 => {
                self.t = self.a;
            }
            0x88 | 0x89 => {
                let addr = self.ext_addr(ext & 1 == 1)?;
                let lo = self.read32(addr, Access::Read)?;
                let hi = self.read32(addr.wrapping_add(4), Access::Read)?;
                self.a = lo;
                self.t = hi;
            }
            0x8A | 0x8B => {
                let addr = self.ext_addr(ext & 1 == 1)?;
                self.write_value(addr, Value::Long(self.a))?;
                self.write_value(addr.wrapping_add(4), Value::Long(self.t))?;
            }
            isa::EXT_SHIFT_DP => {
                let packed = self.fetch8()?;
                let dest = self.fetch8()?;
                let src = self.fetch8()?;
                let value = self.ea_read(self.dp_ea(src as u32), m)?;
                let result = self.barrel(packed, value);
                self.ea_write(self.dp_ea(dest as u32), result)?;
            }
            isa::EXT_EXTEND_DP => {
                let subop = self.fetch8()?;
                let dest = self.fetch8()?;
                let src = self.fetch8()?;
                let result = self.extend_op(subop, self.dp_ea(src as u32))?;
                self.ea_write(self.dp_ea(dest as u32), Value::Long(result))?;
                self.apply_flags(FlagDelta::nz(Value::Long(result)));
            }
            0xA0..=0xA3 => {
                let addr = match ext {
                    0xA0 => {
                        let base = self.fetch8()? as u32;
                        self.d.wrapping_add(base)
                    }
                    0xA1 => {
                        let base = self.fetch8()? as u32;
                        self.d.wrapping_add(base).wrapping_add(self.xi())
                    }
                    0xA2 => {
                        let base = self.fetch16()? as u32;
                        self.b.wrapping_add(base)
                    }
                    _ => {
                        let base = self.fetch16()? as u32;
                        self.b.wrapping_add(base).wrapping_add(self.xi())
                    }
                };
                self.a = addr;
                self.apply_flags(FlagDelta::nz(Value::Long(addr)));
            }
            0xB0..=0xBA => self.ext_fpu(ext)?,
            isa::EXT_SHIFT_ACC => {
                let packed = self.fetch8()?;
                let value = self.acc(m);
                let result = self.barrel(packed, value);
                self.set_acc_width(result);
            }
            isa::EXT_EXTEND_ACC => {
                let subop = self.fetch8()?;
                let result = self.extend_op(subop, Ea::Acc)?;
                self.a = result;
                self.apply_flags(FlagDelta::nz(Value::Long(result)));
            }
            0xD0..=0xD5 | 0xE0..=0xE7 => return self.ext_alu(ext, opcode_pc).map(|_| cycles),
            other => {
                return if self.compat() {
                    Ok(2)
                } else {
                    Err(Fault::Illegal { opcode: other, pc: opcode_pc })
                };
            }
        }
        Ok(cycles)
    }

    fn ext_addr(&mut self, absolute: bool) -> Result<u32, Fault> {
        if absolute {
            let offset = self.fetch16()? as u32;
            Ok(self.b.wrapping_add(offset))
        } else {
            let base = self.fetch8()? as u32;
            match self.dp_ea(base) {
                Ea::Mem(addr) => Ok(addr),
                // 64-bit and atomic transfers need real memory; window
                // slots alias through D like any other DP access would.
                Ea::Window(offset) => Ok(self.d.wrapping_add(offset as u32)),
                Ea::Acc => unreachable!(),
            }
        }
    }

    fn ext_muldiv(&mut self, ext: u8, m: Width) -> Result<(), Fault> {
        let addr = self.ext_addr(ext & 1 == 1)?;
        let value = self.read_value(addr, m, Access::Read)?;
        let acc = self.acc(m);
        match ext & 6 {
            0x00 => {
                // Signed multiply: high half lands in T.
                let product = acc.sign_extend().wrapping_mul(value.sign_extend());
                let result = m.from(product as u32);
                self.set_acc_width(result);
                self.t = (product >> m.bits()) as u32;
                self.apply_flags(FlagDelta::nz(result));
            }
            0x02 => {
                let product = acc.inner() as u64 * value.inner() as u64;
                let result = m.from(product as u32);
                self.set_acc_width(result);
                self.t = (product >> m.bits()) as u32;
                self.apply_flags(FlagDelta::nz(result));
            }
            0x04 => {
                if value.inner() & m.mask() == 0 {
                    // Quotient saturates, remainder keeps the dividend.
                    self.t = acc.inner();
                    self.set_acc_width(m.from(0));
                    self.p.insert(Status::V);
                } else {
                    let quotient = acc.sign_extend().wrapping_div(value.sign_extend());
                    let remainder = acc.sign_extend().wrapping_rem(value.sign_extend());
                    let result = m.from(quotient as u32);
                    self.set_acc_width(result);
                    self.t = remainder as u32;
                    self.p.remove(Status::V);
                    self.apply_flags(FlagDelta::nz(result));
                }
            }
            _ => {
                if value.inner() & m.mask() == 0 {
                    self.t = acc.inner();
                    self.set_acc_width(m.from(0));
                    self.p.insert(Status::V);
                } else {
                    let quotient = acc.inner() / value.inner();
                    let remainder = acc.inner() % value.inner();
                    let result = m.from(quotient);
                    self.set_acc_width(result);
                    self.t = remainder;
                    self.p.remove(Status::V);
                    self.apply_flags(FlagDelta::nz(result));
                }
            }
        }
        Ok(())
    }

    fn ext_atomic(&mut self, ext: u8, m: Width) -> Result<(), Fault> {
        let addr = self.ext_addr(ext & 1 == 1)?;
        let pa = self.phys_of(addr)?;
        match ext & !1 {
            0x10 => {
                // CAS: compare against X, store A on match.
                let current = self.read_value(addr, m, Access::Read)?;
                if current.inner() == self.x & m.mask() {
                    self.write_value(addr, self.acc(m))?;
                    self.p.insert(Status::Z);
                } else {
                    self.x = current.inner();
                    self.p.remove(Status::Z);
                }
            }
            0x12 => {
                let value = self.read_value(addr, m, Access::Read)?;
                self.set_acc_width(value);
                self.apply_flags(FlagDelta::nz(value));
                self.set_reservation(pa);
            }
            _ => {
                if self.take_reservation(pa) {
                    self.write_value(addr, self.acc(m))?;
                    self.p.insert(Status::Z);
                } else {
                    self.p.remove(Status::Z);
                }
            }
        }
        Ok(())
    }

    /// Physical address of a virtual one, for the LL/SC reservation.
    fn phys_of(&mut self, va: u32) -> Result<u32, Fault> {
        if !self.mmu.enabled() {
            return Ok(va);
        }
        let supervisor = self.supervisor();
        let Cpu { mmu, mem, .. } = self;
        mmu.translate(va, Access::Read, supervisor, |addr| mem.raw_read64(addr))
            .map_err(|fault| Fault::Page { va: fault.va, code: fault.code })
    }

    fn barrel(&mut self, packed: u8, value: Value) -> Value {
        let op = packed >> 5;
        let count_field = packed & 0x1F;
        let count = if count_field == isa::SHIFT_COUNT_FROM_A {
            self.a & 0x1F
        } else {
            count_field as u32
        };
        let width = value.width();
        let bits = width.bits();
        let count = count % bits.max(1);
        let raw = value.inner() & width.mask();
        let (result, carry) = match op {
            0 => {
                // SHL
                let carry = count > 0 && (raw >> (bits - count)) & 1 != 0;
                (raw.checked_shl(count).unwrap_or(0), carry)
            }
            1 => {
                let carry = count > 0 && (raw >> (count - 1)) & 1 != 0;
                (raw.checked_shr(count).unwrap_or(0), carry)
            }
            2 => {
                let carry = count > 0 && (raw >> (count - 1)) & 1 != 0;
                let shifted = ((value.sign_extend() >> count) as u32) & width.mask();
                (shifted, carry)
            }
            3 => {
                let rotated = if count == 0 {
                    raw
                } else {
                    ((raw << count) | (raw >> (bits - count))) & width.mask()
                };
                (rotated, rotated & 1 != 0)
            }
            _ => {
                let rotated = if count == 0 {
                    raw
                } else {
                    ((raw >> count) | (raw << (bits - count))) & width.mask()
                };
                (rotated, rotated & width.sign_bit() != 0)
            }
        };
        let result = width.from(result);
        let mut flags = FlagDelta::nz(result);
        if count > 0 {
            flags.c = Some(carry);
        }
        self.apply_flags(flags);
        result
    }

    fn extend_op(&mut self, subop: u8, src: Ea) -> Result<u32, Fault> {
        Ok(match subop {
            0 => self.ea_read(src, Width::W8)?.sign_extend() as u32,
            1 => self.ea_read(src, Width::W16)?.sign_extend() as u32,
            2 => self.ea_read(src, Width::W8)?.inner(),
            3 => self.ea_read(src, Width::W16)?.inner(),
            4 => self.ea_read(src, Width::W32)?.inner().leading_zeros(),
            5 => self.ea_read(src, Width::W32)?.inner().trailing_zeros(),
            _ => self.ea_read(src, Width::W32)?.inner().count_ones(),
        })
    }

    fn ext_fpu(&mut self, ext: u8) -> Result<(), Fault> {
        match ext {
            0xB8 => {
                let packed = self.fetch8()?;
                let dst = ((packed >> 4) & 7) as usize;
                let src = (packed & 7) as usize;
                self.fregs[dst] = self.fregs[src];
            }
            0xB9 => {
                let reg = (self.fetch8()? & 7) as usize;
                // F -> A converts, truncating toward zero.
                self.a = self.fregs[reg] as i64 as u32;
                self.apply_flags(FlagDelta::nz(Value::Long(self.a)));
            }
            0xBA => {
                let reg = (self.fetch8()? & 7) as usize;
                self.fregs[reg] = self.a as i32 as f64;
            }
            _ => {
                let load = ext < 0xB4;
                let reg = (self.fetch8()? & 7) as usize;
                let addr = match ext & 3 {
                    0 => {
                        let base = self.fetch8()? as u32;
                        self.d.wrapping_add(base)
                    }
                    1 => {
                        let offset = self.fetch16()? as u32;
                        self.b.wrapping_add(offset)
                    }
                    2 => self.fetch24()?,
                    _ => {
                        let base = self.fetch8()? as u32;
                        self.dp_pointer16(base)?.wrapping_add(self.b)
                    }
                };
                if load {
                    let lo = self.read32(addr, Access::Read)? as u64;
                    let hi = self.read32(addr.wrapping_add(4), Access::Read)? as u64;
                    self.fregs[reg] = f64::from_bits((hi << 32) | lo);
                } else {
                    let bits = self.fregs[reg].to_bits();
                    self.write_value(addr, Value::Long(bits as u32))?;
                    self.write_value(addr.wrapping_add(4), Value::Long((bits >> 32) as u32))?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Register-targeted ALU ($02 $D0..$D5 / $E0..$E7)

    fn ext_alu(&mut self, ext: u8, opcode_pc: u32) -> Result<(), Fault> {
        let row = match isa::ext_alu_by_opcode(ext) {
            Some(row) => row,
            None => return Err(Fault::Illegal { opcode: ext, pc: opcode_pc }),
        };
        let mode_byte = self.fetch8()?;
        let width = Width::from_field(mode_byte >> 6);
        let target_reg = if mode_byte & 0x20 != 0 {
            Some(self.fetch8()?)
        } else {
            None
        };
        let mode = mode_byte & 0x1F;
        let source = self.ext_alu_source(mode, width)?;

        if row.is_unary {
            // The mode describes the destination operand itself.
            let place = match source {
                Source::Place(ea) => ea,
                Source::Imm(_) => return Err(Fault::Illegal { opcode: ext, pc: opcode_pc }),
            };
            let value = self.ea_read(place, width)?;
            let (result, flags) = match row.mnemonic {
                "STZ" => (width.zero(), FlagDelta::new()),
                "INC" => {
                    let result = width.from(value.inner().wrapping_add(1));
                    (result, FlagDelta::nz(result))
                }
                "DEC" => {
                    let result = width.from(value.inner().wrapping_sub(1));
                    (result, FlagDelta::nz(result))
                }
                "TSB" => {
                    let acc = self.a & width.mask();
                    let mut flags = FlagDelta::new();
                    flags.z = Some(value.inner() & acc == 0);
                    (width.from(value.inner() | acc), flags)
                }
                "TRB" => {
                    let acc = self.a & width.mask();
                    let mut flags = FlagDelta::new();
                    flags.z = Some(value.inner() & acc == 0);
                    (width.from(value.inner() & !acc), flags)
                }
                _ => return Err(Fault::Illegal { opcode: ext, pc: opcode_pc }),
            };
            self.ea_write(place, result)?;
            self.apply_flags(flags);
            return Ok(());
        }

        // Destination register value (A or an R-slot) at the chosen width.
        let dest_read = |cpu: &Cpu| match target_reg {
            Some(dp) => {
                let reg = (dp >> 2) as usize % 64;
                width.from(cpu.regfile[reg] >> (8 * (dp & 3)))
            }
            None => width.from(cpu.a),
        };
        let dest_write = |cpu: &mut Cpu, value: Value| match target_reg {
            Some(dp) => {
                let reg = (dp >> 2) as usize % 64;
                let shift = 8 * (dp & 3) as u32;
                let mask = value.width().mask() << shift;
                cpu.regfile[reg] =
                    (cpu.regfile[reg] & !mask) | ((value.inner() << shift) & mask);
            }
            None => cpu.set_acc_width(value),
        };

        match row.mnemonic {
            "LD" => {
                let value = self.source_value(&source, width)?;
                dest_write(self, value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "ST" => {
                let value = dest_read(self);
                match source {
                    Source::Place(ea) => self.ea_write(ea, value)?,
                    Source::Imm(_) => {
                        return Err(Fault::Illegal { opcode: ext, pc: opcode_pc })
                    }
                }
            }
            "ADC" | "SBC" | "AND" | "ORA" | "EOR" => {
                let value = self.source_value(&source, width)?;
                let acc = dest_read(self);
                let carry = self.p.contains(Status::C);
                let (result, flags) = match row.mnemonic {
                    "ADC" => acc.adc(value, carry),
                    "SBC" => acc.sbc(value, carry),
                    "AND" => acc.and(value),
                    "ORA" => acc.or(value),
                    _ => acc.xor(value),
                };
                dest_write(self, result);
                self.apply_flags(flags);
            }
            "CMP" => {
                let value = self.source_value(&source, width)?;
                let acc = dest_read(self);
                let flags = acc.compare(value);
                self.apply_flags(flags);
            }
            "BIT" => {
                let value = self.source_value(&source, width)?;
                let acc = dest_read(self);
                self.p.set(Status::Z, acc.inner() & value.inner() == 0);
                self.p.set(Status::N, value.inner() & width.sign_bit() != 0);
                self.p.set(Status::V, value.inner() & (width.sign_bit() >> 1) != 0);
            }
            _ => return Err(Fault::Illegal { opcode: ext, pc: opcode_pc }),
        }
        Ok(())
    }

    fn ext_alu_source(&mut self, mode: u8, width: Width) -> Result<Source, Fault> {
        use crate::isa::alu_mode as am;
        Ok(match mode {
            am::IMM => Source::Imm(self.fetch_width(width)?),
            am::ACC => Source::Place(Ea::Acc),
            am::DP => Source::Place(self.ea_dp(0)?),
            am::DPX => {
                let index = self.xi();
                Source::Place(self.ea_dp(index)?)
            }
            am::DPY => {
                let index = self.yi();
                Source::Place(self.ea_dp(index)?)
            }
            am::ABS => Source::Place(self.ea_abs(0)?),
            am::ABSX => {
                let index = self.xi();
                Source::Place(self.ea_abs(index)?)
            }
            am::ABSY => {
                let index = self.yi();
                Source::Place(self.ea_abs(index)?)
            }
            am::IND => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base)?;
                Source::Place(Ea::Mem(self.b.wrapping_add(ptr)))
            }
            am::INDX => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base.wrapping_add(self.xi()))?;
                Source::Place(Ea::Mem(self.b.wrapping_add(ptr)))
            }
            am::INDY => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer16(base)?;
                Source::Place(Ea::Mem(self.b.wrapping_add(ptr).wrapping_add(self.yi())))
            }
            am::INDL => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer32(base)?;
                Source::Place(Ea::Mem(ptr))
            }
            am::INDLY => {
                let base = self.fetch8()? as u32;
                let ptr = self.dp_pointer32(base)?;
                Source::Place(Ea::Mem(ptr.wrapping_add(self.yi())))
            }
            am::SR => {
                let offset = self.fetch8()? as u32;
                Source::Place(Ea::Mem(self.s.wrapping_add(offset)))
            }
            am::SRY => {
                let offset = self.fetch8()? as u32;
                let ptr = self
                    .read_value(self.s.wrapping_add(offset), Width::W16, Access::Read)?
                    .inner();
                Source::Place(Ea::Mem(self.b.wrapping_add(ptr).wrapping_add(self.yi())))
            }
            am::ABS32 => {
                let addr = self.fetch32()?;
                Source::Place(Ea::Mem(addr))
            }
            am::ABS32X => {
                let addr = self.fetch32()?;
                Source::Place(Ea::Mem(addr.wrapping_add(self.xi())))
            }
            am::ABS32Y => {
                let addr = self.fetch32()?;
                Source::Place(Ea::Mem(addr.wrapping_add(self.yi())))
            }
            am::LONG => {
                let addr = self.fetch24()?;
                Source::Place(Ea::Mem(addr))
            }
            am::LONGX => {
                let addr = self.fetch24()?;
                Source::Place(Ea::Mem(addr.wrapping_add(self.xi())))
            }
            other => {
                return Err(Fault::Illegal { opcode: other, pc: self.pc });
            }
        })
    }

    // ------------------------------------------------------------------
    // $42 WID prefix: the next data opcode takes a 32-bit immediate or a
    // 32-bit absolute address.

    fn execute_wid(&mut self, opcode_pc: u32) -> Result<u32, Fault> {
        let opcode = self.fetch8()?;
        if !isa::wid_allowed(opcode) {
            return if self.compat() {
                Ok(2)
            } else {
                Err(Fault::Illegal { opcode, pc: opcode_pc })
            };
        }
        let entry = isa::decode(opcode).unwrap();
        let cycles = entry.cycles as u32 + 1;
        use crate::fields::AddrMode::*;
        let source = match entry.mode {
            Immediate => Source::Imm(Value::Long(self.fetch32()?)),
            Absolute => Source::Place(Ea::Mem(self.fetch32()?)),
            AbsoluteX => {
                let addr = self.fetch32()?;
                Source::Place(Ea::Mem(addr.wrapping_add(self.xi())))
            }
            AbsoluteY => {
                let addr = self.fetch32()?;
                Source::Place(Ea::Mem(addr.wrapping_add(self.yi())))
            }
            _ => return Err(Fault::Illegal { opcode, pc: opcode_pc }),
        };
        let w = Width::W32;
        match entry.mnemonic {
            "LDA" => {
                let value = self.source_value(&source, w)?;
                self.set_acc_width(value);
                self.apply_flags(FlagDelta::nz(value));
            }
            "LDX" => {
                let value = self.source_value(&source, w)?;
                self.x = value.inner();
                self.apply_flags(FlagDelta::nz(value));
            }
            "LDY" => {
                let value = self.source_value(&source, w)?;
                self.y = value.inner();
                self.apply_flags(FlagDelta::nz(value));
            }
            "STA" | "STX" | "STY" | "STZ" => {
                let value = match entry.mnemonic {
                    "STA" => Value::Long(self.a),
                    "STX" => Value::Long(self.x),
                    "STY" => Value::Long(self.y),
                    _ => Value::Long(0),
                };
                match source {
                    Source::Place(ea) => self.ea_write(ea, value)?,
                    Source::Imm(_) => return Err(Fault::Illegal { opcode, pc: opcode_pc }),
                }
            }
            "ADC" | "SBC" | "AND" | "ORA" | "EOR" | "CMP" | "BIT" => {
                let value = self.source_value(&source, w)?;
                let immediate = matches!(source, Source::Imm(_));
                let saved = self.p;
                // The width override applies regardless of M; fake it by
                // running the kernel on 32-bit values directly.
                let acc = Value::Long(self.a);
                let carry = saved.contains(Status::C);
                let decimal = saved.contains(Status::D);
                match entry.mnemonic {
                    "ADC" => {
                        let (result, flags) = if decimal {
                            acc.adc_decimal(value, carry)
                        } else {
                            acc.adc(value, carry)
                        };
                        self.a = result.inner();
                        self.apply_flags(flags);
                    }
                    "SBC" => {
                        let (result, flags) = if decimal {
                            acc.sbc_decimal(value, carry)
                        } else {
                            acc.sbc(value, carry)
                        };
                        self.a = result.inner();
                        self.apply_flags(flags);
                    }
                    "AND" | "ORA" | "EOR" => {
                        let (result, flags) = match entry.mnemonic {
                            "AND" => acc.and(value),
                            "ORA" => acc.or(value),
                            _ => acc.xor(value),
                        };
                        self.a = result.inner();
                        self.apply_flags(flags);
                    }
                    "CMP" => {
                        let flags = acc.compare(value);
                        self.apply_flags(flags);
                    }
                    _ => {
                        let masked = acc.inner() & value.inner();
                        self.p.set(Status::Z, masked == 0);
                        if !immediate {
                            self.p.set(Status::N, value.inner() & 0x8000_0000 != 0);
                            self.p.set(Status::V, value.inner() & 0x4000_0000 != 0);
                        }
                    }
                }
            }
            "CPX" | "CPY" => {
                let value = self.source_value(&source, w)?;
                let reg = if entry.mnemonic == "CPX" { self.x } else { self.y };
                let flags = Value::Long(reg).compare(value);
                self.apply_flags(flags);
            }
            "INC" | "DEC" | "ASL" | "LSR" | "ROL" | "ROR" | "TSB" | "TRB" => {
                let place = match source {
                    Source::Place(ea) => ea,
                    Source::Imm(_) => return Err(Fault::Illegal { opcode, pc: opcode_pc }),
                };
                let value = self.ea_read(place, w)?;
                let carry = self.p.contains(Status::C);
                let (result, flags) = match entry.mnemonic {
                    "ASL" => value.asl(false, false),
                    "LSR" => value.lsr(false, false),
                    "ROL" => value.asl(carry, true),
                    "ROR" => value.lsr(carry, true),
                    "INC" => {
                        let result = Value::Long(value.inner().wrapping_add(1));
                        (result, FlagDelta::nz(result))
                    }
                    "DEC" => {
                        let result = Value::Long(value.inner().wrapping_sub(1));
                        (result, FlagDelta::nz(result))
                    }
                    "TSB" => {
                        let acc = self.a;
                        let mut flags = FlagDelta::new();
                        flags.z = Some(value.inner() & acc == 0);
                        (Value::Long(value.inner() | acc), flags)
                    }
                    _ => {
                        let acc = self.a;
                        let mut flags = FlagDelta::new();
                        flags.z = Some(value.inner() & acc == 0);
                        (Value::Long(value.inner() & !acc), flags)
                    }
                };
                self.ea_write(place, result)?;
                self.apply_flags(flags);
            }
            other => {
                let _ = other;
                return Err(Fault::Illegal { opcode, pc: opcode_pc });
            }
        }
        Ok(cycles)
    }
}
