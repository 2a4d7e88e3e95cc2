//! # imzarr Converter
//!
//! Command-line tool for converting imzML mass spectrometry imaging
//! datasets to Zarr.
//!
//! ## Usage
//!
//! ```bash
//! # Convert a header/payload pair
//! imzarr convert sample.imzML sample.ibd -o sample.zarr
//!
//! # Resolve the pair from a directory
//! imzarr convert acquisition/ -o sample.zarr
//!
//! # Verify that a header and payload belong together
//! imzarr check acquisition/
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use imzarr::convert::{ConvertOptions, DEFAULT_MAX_CHUNK_BYTES};
use imzarr::imzml;

/// imzarr - imzML to Zarr converter
#[derive(Parser)]
#[command(name = "imzarr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an imzML dataset to a Zarr store
    Convert {
        /// Input .imzML file, or a directory containing the pair
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Input .ibd file (inferred when INPUT is a directory)
        #[arg(value_name = "IBD")]
        ibd: Option<PathBuf>,

        /// Output Zarr directory (must not exist)
        #[arg(short, long, value_name = "DEST")]
        output: PathBuf,

        /// Image name recorded in the store metadata
        #[arg(short, long)]
        name: Option<String>,

        /// Per-chunk byte budget
        #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_BYTES)]
        max_chunk_bytes: u64,
    },

    /// Check that a directory holds a matching imzML/ibd pair
    Check {
        /// Directory containing the pair
        #[arg(value_name = "DIR")]
        directory: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Convert {
            input,
            ibd,
            output,
            name,
            max_chunk_bytes,
        } => run_convert(input, ibd, output, name, max_chunk_bytes),
        Commands::Check { directory } => run_check(directory),
    }
}

fn run_convert(
    input: PathBuf,
    ibd: Option<PathBuf>,
    output: PathBuf,
    name: Option<String>,
    max_chunk_bytes: u64,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("input does not exist: {}", input.display());
    }

    let options = ConvertOptions {
        name,
        chunk_hint: None,
        max_chunk_bytes,
    };

    info!("Input:  {}", input.display());
    info!("Output: {}", output.display());

    let ok = match (input.is_dir(), ibd) {
        (true, _) => imzarr::convert_dir(&input, &output, &options),
        (false, Some(ibd)) => imzarr::convert(&input, &ibd, &output, &options),
        (false, None) => {
            // infer the payload as the .ibd sibling of the header
            let ibd = input.with_extension("ibd");
            imzarr::convert(&input, &ibd, &output, &options)
        }
    };

    if !ok {
        anyhow::bail!("conversion failed");
    }
    println!("Converted to {}", output.display());
    Ok(())
}

fn run_check(directory: PathBuf) -> Result<()> {
    let (imzml_path, ibd_path) = imzml::find_pair(&directory)
        .ok_or_else(|| anyhow::anyhow!("no imzML/ibd pair found in {}", directory.display()))?;

    println!("Header:  {}", imzml_path.display());
    println!("Payload: {}", ibd_path.display());

    if imzml::uuids_match(&imzml_path, &ibd_path) {
        println!("UUIDs match");
        Ok(())
    } else {
        anyhow::bail!("UUID mismatch between header and payload");
    }
}
