//! Carapace envelope inspector
//!
//! Prints the schema section of an envelope (types, fingerprints, enum
//! transforms) and its data rendered with the writer's field names. No local
//! types are needed.
//!
//! Usage:
//!   carapace-inspect payload.bin
//!   carapace-inspect --hex --json payload.hex
//!   carapace-inspect --verify payload.bin

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use carapace_engine::DecodeLimits;
use carapace_inspect::{inspect, load_input, render};
use clap::Parser;
use tracing::{Level, debug, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "carapace-inspect")]
#[command(about = "Inspect Carapace serialization envelopes")]
struct Args {
    /// Envelope file
    path: PathBuf,

    /// The file holds hex text instead of raw bytes
    #[arg(long)]
    hex: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Exit with failure when a declared fingerprint does not verify
    #[arg(long)]
    verify: bool,

    /// Maximum value nesting accepted in the data section
    #[arg(long, default_value_t = DecodeLimits::default().max_depth)]
    max_depth: usize,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let bytes = load_input(&args.path, args.hex)?;
    debug!("Read {} bytes from {:?}", bytes.len(), args.path);

    let limits = DecodeLimits {
        max_depth: args.max_depth,
        ..DecodeLimits::default()
    };
    let summary = inspect(&bytes, &limits)?;
    println!("{}", render(&summary, args.json)?);

    if args.verify && !summary.all_verified() {
        warn!("Envelope has entries whose fingerprint does not verify");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
