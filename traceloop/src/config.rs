//! Tracer configuration
//!
//! Every field has a default, so a partial JSON document (or none at all) is a
//! valid configuration.

use serde::Deserialize;
use std::path::PathBuf;

use traceloop_common::PERF_BUFFER_PAGES;

/// Used when the host page size cannot be queried
pub const FALLBACK_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracerConfig {
    /// Pages per CPU for each container's perf ring
    pub perf_buffer_pages: usize,

    /// Bytes per page
    pub page_size: usize,

    /// Mount point of tracefs, used to read syscall declarations
    ///
    /// `None` keeps the compiled-in declarations only.
    pub tracefs_root: Option<PathBuf>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            perf_buffer_pages: PERF_BUFFER_PAGES,
            page_size: host_page_size(),
            tracefs_root: None,
        }
    }
}

impl TracerConfig {
    /// Size of one per-CPU ring in bytes
    #[must_use]
    pub fn ring_bytes_per_cpu(&self) -> usize {
        self.perf_buffer_pages.saturating_mul(self.page_size)
    }
}

/// Host page size from `sysconf(_SC_PAGESIZE)`
#[must_use]
pub fn host_page_size() -> usize {
    // SAFETY: sysconf has no preconditions and only reads process-wide state
    #[allow(unsafe_code)]
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(FALLBACK_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TracerConfig::default();
        assert_eq!(config.perf_buffer_pages, 64);
        assert!(config.page_size.is_power_of_two());
        assert_eq!(config.ring_bytes_per_cpu(), 64 * config.page_size);
        assert!(config.tracefs_root.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: TracerConfig = serde_json::from_str(r#"{"perf_buffer_pages": 2}"#).unwrap();
        assert_eq!(config.perf_buffer_pages, 2);
        assert_eq!(config.page_size, host_page_size());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<TracerConfig, _> = serde_json::from_str(r#"{"pages": 2}"#);
        assert!(result.is_err());
    }
}
