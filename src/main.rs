use clap::Parser;
use log::LevelFilter;
use pmd2fur::{ConvertOptions, Converter};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "pmd2fur")]
#[command(version = "0.1.0")]
#[command(about = "PMD (.M) to Furnace (.fur) converter", long_about = None)]
struct Args {
    /// Input PMD file
    input: PathBuf,

    /// Output Furnace module (defaults to INPUT with a .fur extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// PMD ticks per pattern row
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=255))]
    ticks_per_row: u32,

    /// Rows per pattern
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u16).range(1..=256))]
    pattern_length: u16,

    /// Write the module zlib-compressed
    #[arg(short, long)]
    compress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("fur"));

    let converter = Converter::new(ConvertOptions {
        ticks_per_row: args.ticks_per_row,
        pattern_length: args.pattern_length as usize,
        compress: args.compress,
        ..ConvertOptions::default()
    });

    match converter.convert_file(&args.input, &output) {
        Ok(conversion) => {
            if !conversion.warnings.is_empty() {
                eprintln!("{} warning(s):", conversion.warnings.len());
                for warning in &conversion.warnings {
                    eprintln!("  {}", warning);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
