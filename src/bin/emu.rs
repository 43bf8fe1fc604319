use anyhow::{Context, Result};
use clap::Parser;
use m65832::processor::StopReason;
use m65832::{Configuration, Emulator};
use std::path::PathBuf;

/// M65832 emulator: loads a flat binary and runs it.
#[derive(Parser)]
#[command(name = "m65832-emu")]
struct Args {
    /// Flat binary image.
    image: PathBuf,

    /// Load address of the image.
    #[arg(long, value_parser = parse_num, default_value = "0")]
    base: u32,

    /// Start here instead of the reset vector.
    #[arg(long, value_parser = parse_num)]
    entry: Option<u32>,

    /// Cycle budget.
    #[arg(long, default_value_t = 100_000_000)]
    cycles: u64,

    /// RAM size in bytes (power of two).
    #[arg(long, value_parser = parse_num, default_value = "16777216")]
    ram: u32,

    /// Print an instruction trace while running.
    #[arg(long)]
    trace: bool,

    /// Attach the interactive debugger.
    #[arg(long)]
    debug: bool,
}

fn parse_num(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix('$') {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Configuration {
        ram_size: args.ram as usize,
        base_address: args.base,
        entry: args.entry,
        trace: args.trace,
        ..Configuration::default()
    };
    let mut emulator = Emulator::new(config);
    emulator
        .load_file(&args.image)
        .with_context(|| format!("loading {}", args.image.display()))?;
    emulator.start();

    let reason = emulator.run(args.cycles, args.debug);
    match reason {
        StopReason::Stopped => println!("\nstopped (STP)"),
        StopReason::CycleBudget => println!("\ncycle budget exhausted"),
        StopReason::StepBudget => println!("\nstep budget exhausted"),
        StopReason::Breakpoint(addr) => println!("\nbreakpoint at ${:08x}", addr),
        StopReason::Trap(trap) => println!("\nfatal trap: {:?}", trap),
    }
    println!("{}", emulator.cpu);
    println!("cycles: {}", emulator.cpu.cycles);
    Ok(())
}
