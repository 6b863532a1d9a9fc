//! Kernel side of traceloop
//!
//! The tracer never talks to the kernel directly. It goes through a
//! [`KernelBackend`], which owns the loaded programs, the outer
//! mount-namespace → perf-ring map and the per-syscall parameter probe map.
//! [`simulated::SimulatedKernel`] is an in-process backend that emulates the
//! kernel programs byte for byte.

pub mod cpu_utils;
pub mod encode;
pub mod simulated;

use std::sync::Arc;

use crate::domain::{KernelError, MountNsId};
use crate::ring::PerfRing;
pub use crate::syscalls::ParameterProbe;

pub trait KernelBackend: Send + Sync {
    type Ring: PerfRing;

    /// Fill the probe map read by the `sys_enter`/`sys_exit` programs
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ProbeInstall`] if the map cannot be updated.
    fn install_parameter_probes(&self, probes: &[ParameterProbe]) -> Result<(), KernelError>;

    /// Create one overwritable perf ring per CPU
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::RingCreation`] on allocation failure.
    fn create_ring(&self, name: &str, bytes_per_cpu: usize) -> Result<Self::Ring, KernelError>;

    /// Route records of tasks in `mount_ns_id` to `ring`
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::RouteUpdate`] if the namespace is already routed
    /// or the map update fails.
    fn route(&self, mount_ns_id: MountNsId, ring: &Self::Ring) -> Result<(), KernelError>;

    /// # Errors
    ///
    /// Returns [`KernelError::RouteNotFound`] if the namespace is not routed.
    fn unroute(&self, mount_ns_id: MountNsId) -> Result<(), KernelError>;

    /// Detach programs and tracepoints
    fn release(&self);
}

impl<T: KernelBackend> KernelBackend for Arc<T> {
    type Ring = T::Ring;

    fn install_parameter_probes(&self, probes: &[ParameterProbe]) -> Result<(), KernelError> {
        (**self).install_parameter_probes(probes)
    }

    fn create_ring(&self, name: &str, bytes_per_cpu: usize) -> Result<Self::Ring, KernelError> {
        (**self).create_ring(name, bytes_per_cpu)
    }

    fn route(&self, mount_ns_id: MountNsId, ring: &Self::Ring) -> Result<(), KernelError> {
        (**self).route(mount_ns_id, ring)
    }

    fn unroute(&self, mount_ns_id: MountNsId) -> Result<(), KernelError> {
        (**self).unroute(mount_ns_id)
    }

    fn release(&self) {
        (**self).release();
    }
}
