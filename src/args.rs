//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the sample clock and take captures
    Capture(CaptureArgs),
    /// Decode a raw capture into tab separated time (ns) and channel voltages
    Decode {
        /// Raw capture file, or `-` for stdin
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct CaptureArgs {
    /// Physical memory device to map the peripherals from
    #[clap(long, default_value = "/dev/mem")]
    pub mem: PathBuf,
    /// Hexadecimal (sans leading 0x) peripheral base address (3F000000 on the Pi 2 and 3)
    #[clap(short = 'b', long, value_parser = valid_address, default_value = "20000000")]
    pub peripheral_base: u64,
    /// Core to pin the sampling thread to
    #[clap(long)]
    pub cpu: Option<usize>,
    /// Number of captures to take, 0 to keep going until interrupted
    #[clap(short = 'n', long, default_value_t = 1)]
    pub count: usize,
    /// Directory to write one file per capture into (stdout if not given)
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// Write the raw wire bytes instead of decoded samples
    #[clap(long)]
    pub raw: bool,
    /// Ring buffer capacity (captures) between the sampler and the writer
    #[clap(short, long, default_value_t = 16)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub capacity: u64,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_address(s: &str) -> Result<u64, String> {
    u64::from_str_radix(s, 16).map_err(|_| "Invalid hex literal".to_string())
}
