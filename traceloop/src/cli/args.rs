//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "traceloop",
    about = "Record the latest syscalls of containers in overwritable perf rings",
    after_help = "\
EXAMPLES:
    traceloop                                Trace two simulated containers until Ctrl+C
    traceloop --containers 4 --duration 5    Four containers, stop after 5 seconds
    traceloop --json --quiet | jq .syscall   JSON lines only
    traceloop --config traceloop.json        Ring sizing from a config file"
)]
pub struct Args {
    /// Number of simulated containers to attach
    #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u32).range(1..=64))]
    pub containers: u32,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Milliseconds between two reads of every container
    #[arg(short, long, default_value = "500", value_parser = clap::value_parser!(u64).range(10..))]
    pub interval: u64,

    /// Print one JSON object per event instead of text
    #[arg(long)]
    pub json: bool,

    /// Tracer configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Read syscall declarations from this tracefs mount
    #[arg(long, value_name = "DIR")]
    pub tracefs: Option<PathBuf>,

    /// Pages per CPU for each container's perf ring (overrides the config file)
    #[arg(long)]
    pub pages: Option<usize>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
