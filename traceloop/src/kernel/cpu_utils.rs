//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use std::fs;
use std::io;

use crate::domain::CpuId;

const ONLINE_CPUS_PATH: &str = "/sys/devices/system/cpu/online";

/// Get list of online CPU IDs from /sys/devices/system/cpu/online
///
/// Returns a vector of CPU IDs (e.g., [0, 1, 2, 3] for a 4-core system).
/// The format in /sys is like "0-3" or "0-3,8-11" for NUMA systems.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn online_cpus() -> io::Result<Vec<CpuId>> {
    parse_cpu_list(&fs::read_to_string(ONLINE_CPUS_PATH)?)
}

/// Number of per-CPU rings to create
///
/// Falls back to the scheduler's view of available parallelism, then to 1.
#[must_use]
pub fn ring_count() -> usize {
    match online_cpus() {
        Ok(cpus) if !cpus.is_empty() => cpus.len(),
        _ => std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
    }
}

fn parse_cpu_list(content: &str) -> io::Result<Vec<CpuId>> {
    let invalid = |e: std::num::ParseIntError| io::Error::new(io::ErrorKind::InvalidData, e);
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let start: u32 = start.parse().map_err(invalid)?;
            let end: u32 = end.parse().map_err(invalid)?;
            cpus.extend((start..=end).map(CpuId));
        } else {
            // Single CPU like "5"
            cpus.push(CpuId(range.parse().map_err(invalid)?));
        }
    }

    Ok(cpus)
}
