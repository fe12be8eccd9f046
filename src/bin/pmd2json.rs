//! PMD to JSON dump

use clap::Parser;
use log::LevelFilter;
use pmd2fur::converter::interpret;
use pmd2fur::error::Warnings;
use pmd2fur::pmd::{PmdJson, PmdReader};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pmd2json")]
#[command(version = "0.1.0")]
#[command(about = "Dump a PMD (.M) file as JSON", long_about = None)]
struct Args {
    /// Input PMD file
    input: PathBuf,

    /// Output JSON file (writes to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output compact JSON (default is pretty-printed)
    #[arg(short, long)]
    compact: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let data = fs::read(&args.input)?;
    let module = PmdReader::new(&data).parse_module()?;
    let mut warnings = Warnings::new();
    let timelines = interpret(&data, &module, &mut warnings)?;

    let pmd_json = PmdJson::new(&module, timelines, &warnings.into_vec());

    let json_string = if args.compact {
        serde_json::to_string(&pmd_json)?
    } else {
        serde_json::to_string_pretty(&pmd_json)?
    };

    match args.output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(json_string.as_bytes())?;
            file.write_all(b"\n")?;
        }
        None => {
            println!("{}", json_string);
        }
    }

    Ok(())
}
