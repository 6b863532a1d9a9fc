//! # traceloop - Per-Container Syscall Flight Recorder
//!
//! traceloop keeps the most recent system calls of every traced container in
//! an overwritable perf ring. Nothing is streamed while the container runs:
//! when the caller asks, the ring is drained and its raw records are rebuilt
//! into strace-like events.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Containerized Tasks                         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ raw_syscalls tracepoints
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Kernel Programs (KernelBackend)                 │
//! │  • sys_enter / sys_exit: enter, exit, continuation records      │
//! │  • probe map: which arguments to dereference, per syscall       │
//! │  • routing map: mount namespace id → per-container perf ring    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ overwritable (write_backward) perf rings
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    traceloop (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │     Ring     │──▶│   Decoder    │──▶│  Correlator  │        │
//! │  │   (reader)   │   │  (records)   │   │ (enter/exit) │        │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘        │
//! │         ▲                                     │                │
//! │         │                                     ▼                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │    Tracer    │   │   Syscalls   │   │  Enrichment  │        │
//! │  │   (facade)   │   │  (metadata)  │   │ (pod, ctr)   │        │
//! │  └──────────────┘   └──────────────┘   └──────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`tracer`]: attach/detach/delete/read/stop over a [`kernel::KernelBackend`]
//! - [`ring`]: non-blocking reader for backward perf rings, plus an in-memory
//!   ring with the same byte layout
//! - [`decoder`]: raw sample → enter/exit or continuation record
//! - [`correlator`]: merges enters, exits and continuations by timestamp
//! - [`syscalls`]: syscall numbers, parameter names, parameter probes and
//!   tracefs declarations
//! - [`kernel`]: backend seam and the in-process [`kernel::simulated`] backend
//! - [`enrichment`]: Kubernetes metadata attached to events
//! - [`event`]: decoded and correlated event types
//! - [`config`], [`domain`], [`cli`]
//!
//! ## Typical Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use traceloop::config::TracerConfig;
//! use traceloop::domain::MountNsId;
//! use traceloop::kernel::simulated::SimulatedKernel;
//! use traceloop::syscalls::SyscallTable;
//! use traceloop::tracer::Tracer;
//!
//! # fn main() -> Result<(), traceloop::domain::TraceloopError> {
//! let table = SyscallTable::host();
//! let kernel = Arc::new(SimulatedKernel::with_host_cpus(Arc::clone(&table)));
//! let tracer = Tracer::new(kernel, table, TracerConfig::default())?;
//!
//! tracer.attach("web-1", MountNsId(4_026_532_201))?;
//! for event in tracer.read("web-1")? {
//!     println!("{event}");
//! }
//! tracer.stop();
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod correlator;
pub mod decoder;
pub mod domain;
pub mod enrichment;
pub mod event;
pub mod kernel;
pub mod ring;
pub mod syscalls;
pub mod tracer;
