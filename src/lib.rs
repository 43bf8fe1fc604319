pub mod assembler;
pub mod devices;
pub mod disassembler;
pub mod expression;
pub mod fields;
mod instructions;
pub mod isa;
pub mod memory;
pub mod mmu;
pub mod operand;
pub mod output;
pub mod processor;

use devices::{Signal, TraceStream};
use log::info;
use memory::{Memory, DEFAULT_RAM_SIZE};
use processor::{Cpu, Debugger, StopReason};
use std::fs;
use std::io;
use std::path::Path;

/// Conventional console-out device slot.
pub const TRACE_STREAM_BASE: u32 = 0xFFFF_F100;

pub struct Configuration {
    pub ram_size: usize,
    pub base_address: u32,
    /// Start here instead of the reset vector.
    pub entry: Option<u32>,
    pub trace: bool,
    pub console: bool,
    /// Bytes poked into memory before reset (vectors, test fixtures).
    pub memory_layout: Vec<(u32, u8)>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            ram_size: DEFAULT_RAM_SIZE,
            base_address: 0,
            entry: None,
            trace: false,
            console: true,
            memory_layout: Vec::new(),
        }
    }
}

pub struct Emulator {
    pub cpu: Cpu,
    base_address: u32,
    entry: Option<u32>,
    trace: bool,
}

impl Emulator {
    pub fn new(config: Configuration) -> Emulator {
        let mut mem = Memory::new(config.ram_size);
        if config.console {
            // The console device never overlaps anything at construction.
            mem.add_region(TRACE_STREAM_BASE, 0x10, TraceStream::new()).unwrap();
        }
        let mut cpu = Cpu::new(mem);
        for (addr, byte) in &config.memory_layout {
            cpu.mem.raw_write8(*addr, *byte);
        }
        Emulator {
            cpu,
            base_address: config.base_address,
            entry: config.entry,
            trace: config.trace,
        }
    }

    pub fn load_file(&mut self, path: &Path) -> io::Result<()> {
        let image = fs::read(path)?;
        self.load_image(&image);
        Ok(())
    }

    pub fn load_image(&mut self, image: &[u8]) {
        self.cpu.mem.load(self.base_address, image);
        info!("loaded {} bytes at ${:08x}", image.len(), self.base_address);
    }

    /// Reset and apply the entry override, if any.
    pub fn start(&mut self) {
        self.cpu.reset();
        if let Some(entry) = self.entry {
            self.cpu.pc = entry;
        }
    }

    /// Drive the CPU until the cycle budget runs out or it stops. With
    /// `debug` the interactive debugger takes over pacing.
    pub fn run(&mut self, cycle_budget: u64, debug: bool) -> StopReason {
        if !debug {
            if self.trace {
                let limit = self.cpu.cycles.saturating_add(cycle_budget);
                loop {
                    println!("{}", self.cpu.trace_line());
                    if let Some(reason) = self.cpu.step() {
                        return reason;
                    }
                    if self.cpu.cycles >= limit {
                        return StopReason::CycleBudget;
                    }
                }
            }
            return self.cpu.run(cycle_budget);
        }
        let mut debugger = Debugger::new();
        let limit = self.cpu.cycles.saturating_add(cycle_budget);
        loop {
            match debugger.update(&mut self.cpu) {
                Signal::Quit => return StopReason::Stopped,
                Signal::NoOp => continue,
                Signal::Ok => {}
            }
            if let Some(reason) = self.cpu.step() {
                return reason;
            }
            if self.cpu.cycles >= limit {
                return StopReason::CycleBudget;
            }
        }
    }
}
