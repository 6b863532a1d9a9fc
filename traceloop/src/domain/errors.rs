//! Structured error types for traceloop
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::MountNsId;
use thiserror::Error;

/// Errors surfaced by the [`Tracer`](crate::tracer::Tracer) facade
#[derive(Error, Debug)]
pub enum TraceloopError {
    #[error("Failed to allocate perf buffer for container {container_id}: {source}")]
    BufferAllocation {
        container_id: String,
        #[source]
        source: KernelError,
    },

    #[error("No reader for container {0}")]
    ReaderNotFound(String),

    #[error("No perf buffer routed for {0}")]
    RoutingNotFound(MountNsId),

    #[error("Container {0} is already attached")]
    AlreadyAttached(String),

    #[error("Tracer is stopped")]
    Stopped,

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl TraceloopError {
    /// Whether polling again later can succeed
    ///
    /// Lookup failures come from metadata that may not be loaded yet; all the
    /// other variants describe state that a retry does not change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TraceloopError::Lookup(_))
    }
}

/// Syscall metadata lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Unknown syscall number {0}")]
    UnknownSyscall(u16),

    #[error("No declaration for syscall {0}")]
    UnknownDeclaration(String),

    #[error("Syscall {syscall} has no parameter at index {index}")]
    UnknownParameter { syscall: String, index: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Perf ring is closed")]
    Closed,

    #[error("Ring index {index} out of range ({count} rings)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Perf ring backend failure: {0}")]
    Backend(String),
}

/// Failures reported by a [`KernelBackend`](crate::kernel::KernelBackend)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Failed to create perf ring: {0}")]
    RingCreation(String),

    #[error("Failed to update route for mount namespace {mount_ns_id}: {reason}")]
    RouteUpdate { mount_ns_id: u64, reason: String },

    #[error("No route for mount namespace {0}")]
    RouteNotFound(u64),

    #[error("Failed to install parameter probes: {0}")]
    ProbeInstall(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_reader_not_found_display() {
        let err = TraceloopError::ReaderNotFound("c1".to_string());
        assert_eq!(err.to_string(), "No reader for container c1");
    }

    #[test]
    fn test_routing_not_found_display() {
        let err = TraceloopError::RoutingNotFound(MountNsId(99));
        assert_eq!(err.to_string(), "No perf buffer routed for mntns:99");
    }

    #[test]
    fn test_buffer_allocation_keeps_source() {
        let err = TraceloopError::BufferAllocation {
            container_id: "c1".to_string(),
            source: KernelError::RingCreation("ENOMEM".to_string()),
        };
        assert!(err.to_string().contains("c1"));
        assert!(err.to_string().contains("ENOMEM"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_only_lookup_errors_are_retryable() {
        assert!(TraceloopError::from(LookupError::UnknownSyscall(1000)).is_retryable());
        assert!(!TraceloopError::Stopped.is_retryable());
        assert!(!TraceloopError::from(RingError::Closed).is_retryable());
    }

    #[test]
    fn test_unknown_parameter_display() {
        let err = LookupError::UnknownParameter { syscall: "read".to_string(), index: 7 };
        assert_eq!(err.to_string(), "Syscall read has no parameter at index 7");
    }
}
