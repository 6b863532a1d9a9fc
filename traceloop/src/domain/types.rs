//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep mount namespace ids, pids and CPU numbers from
//! being mixed up in function signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mount namespace inode number
///
/// Routing key of the outer perf-buffer map: every record emitted by a task
/// in this namespace lands in the ring registered under it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MountNsId(pub u64);

impl fmt::Display for MountNsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mntns:{}", self.0)
    }
}

impl From<u64> for MountNsId {
    fn from(id: u64) -> Self {
        MountNsId(id)
    }
}

/// Process ID (kernel TGID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(MountNsId(4_026_531_840).to_string(), "mntns:4026531840");
        assert_eq!(Pid(42).to_string(), "PID:42");
        assert_eq!(CpuId(3).to_string(), "CPU:3");
    }

    #[test]
    fn test_mount_ns_id_serializes_as_number() {
        let json = serde_json::to_string(&MountNsId(7)).unwrap();
        assert_eq!(json, "7");
    }
}
