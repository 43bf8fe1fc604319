use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use m65832::assembler::Assembler;
use m65832::output;
use std::fs;
use std::path::PathBuf;

const MAX_INCLUDE_PATHS: usize = 8;

/// Two-pass assembler for the M65832.
#[derive(Parser)]
#[command(name = "m65832-asm", disable_help_flag = true)]
struct Args {
    /// Source file.
    input: PathBuf,

    /// Output file (flat binary, or Intel HEX with --hex).
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write a symbol map.
    #[arg(short = 'm', long = "map", value_name = "FILE")]
    map: Option<PathBuf>,

    /// Include search path (repeatable).
    #[arg(short = 'I', value_name = "PATH")]
    include: Vec<PathBuf>,

    /// Emit Intel HEX instead of a flat binary.
    #[arg(short = 'h', long = "hex")]
    hex: bool,

    /// Print the symbol listing after a clean build.
    #[arg(short = 'l')]
    listing: bool,

    /// Verbose diagnostics.
    #[arg(short = 'v')]
    verbose: bool,

    #[arg(long = "help", action = ArgAction::HelpLong)]
    help: Option<bool>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    if args.include.len() > MAX_INCLUDE_PATHS {
        bail!("at most {} include paths are supported", MAX_INCLUDE_PATHS);
    }

    let mut asm = Assembler::new();
    asm.set_verbose(args.verbose);
    for path in &args.include {
        asm.add_include_path(path.clone());
    }

    if let Err(err) = asm.assemble_file(&args.input) {
        eprintln!("{}: {}", args.input.display(), err);
        std::process::exit(1);
    }

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension(if args.hex { "hex" } else { "bin" }));
    if args.hex {
        fs::write(&output_path, output::intel_hex(asm.sections()))
            .with_context(|| format!("writing {}", output_path.display()))?;
    } else {
        fs::write(&output_path, asm.flat_image())
            .with_context(|| format!("writing {}", output_path.display()))?;
    }

    if let Some(map_path) = &args.map {
        fs::write(map_path, output::symbol_map(&asm.symbols))
            .with_context(|| format!("writing {}", map_path.display()))?;
    }
    if args.listing {
        print!("{}", output::symbol_listing(&asm.symbols));
    }
    if args.verbose {
        eprintln!(
            "{} -> {} ({} bytes)",
            args.input.display(),
            output_path.display(),
            asm.flat_image().len()
        );
    }
    Ok(())
}
