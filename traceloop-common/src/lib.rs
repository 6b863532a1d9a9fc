//! # Shared Record Layouts (eBPF ↔ Userspace)
//!
//! Defines the records the kernel-side traceloop programs write into the
//! per-container perf buffers. All types use `#[repr(C)]` so both sides agree
//! on field offsets; the sizes below are the ABI and must only change together
//! with the kernel programs.
//!
//! ## Record Shapes
//!
//! 1. [`SyscallEventRecord`] - one per `sys_enter` / `sys_exit` hit
//! 2. [`SyscallEventContRecord`] - the dereferenced value of one pointer
//!    argument, sharing the timestamp of its enter record
//!
//! Userspace tells the two apart by the raw sample length only, see
//! [`SYSCALL_EVENT_SAMPLE_SIZE`] and [`SYSCALL_EVENT_CONT_SAMPLE_SIZE`].

#![cfg_attr(not(test), no_std)]

// ============================================================================
// Layout Constants
// ============================================================================

/// Number of raw argument slots captured at syscall entry
pub const SYSCALL_ARGS: usize = 6;

/// Kernel `TASK_COMM_LEN`
pub const TASK_COMM_LEN: usize = 16;

/// Size of the parameter buffer carried by a continuation record
///
/// The kernel program always writes a NUL at `PARAM_LEN - 1`.
pub const PARAM_LEN: usize = 128;

/// Pages per CPU allocated for each container's perf buffer
pub const PERF_BUFFER_PAGES: usize = 64;

// ============================================================================
// Record Discriminants
// ============================================================================

/// `SyscallEventRecord::typ` for a `sys_enter` record
pub const SYSCALL_EVENT_TYPE_ENTER: u8 = 0;

/// `SyscallEventRecord::typ` for a `sys_exit` record
pub const SYSCALL_EVENT_TYPE_EXIT: u8 = 1;

// ============================================================================
// Parameter Length Sentinels
// ============================================================================
//
// The kernel program reads per-syscall definitions of six `u64` slots. A zero
// slot means "do not dereference"; otherwise the slot is one of the sentinels
// below, optionally OR-ed with `PARAM_PROBE_AT_EXIT_MASK`. The same width is
// reused for `SyscallEventContRecord::length`.

/// The value is a NUL-terminated string
pub const USE_NULL_BYTE_LENGTH: u64 = 0x0fff_ffff_ffff_ffff;

/// The value length is the syscall return value
pub const USE_RET_AS_PARAM_LENGTH: u64 = 0x0fff_ffff_ffff_fffe;

/// The value length is the argument at index `slot - USE_ARG_INDEX_AS_PARAM_LENGTH`
pub const USE_ARG_INDEX_AS_PARAM_LENGTH: u64 = 0x0fff_ffff_ffff_fff0;

/// Dereference at `sys_exit` instead of `sys_enter` (output buffers)
pub const PARAM_PROBE_AT_EXIT_MASK: u64 = 0xf000_0000_0000_0000;

/// Per-syscall parameter probe definition, one slot per argument
pub type SyscallDef = [u64; SYSCALL_ARGS];

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Syscall enter or exit record
///
/// **Size**: 88 bytes, delivered as a 92-byte perf raw sample
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SyscallEventRecord {
    /// Monotonic timestamp (`bpf_ktime_get_ns()`), taken at `sys_enter`
    ///
    /// The exit record and every continuation record reuse the enter
    /// timestamp, which makes it the correlation key.
    pub timestamp: u64,

    /// Raw argument registers at `sys_enter`
    ///
    /// For exit records only `args[0]` is meaningful: it holds the syscall
    /// return value (a C `long`).
    pub args: [u64; SYSCALL_ARGS],

    /// Thread group id of the caller
    pub pid: u32,

    /// CPU the record was produced on
    pub cpu: u16,

    /// Syscall number for the host architecture
    pub id: u16,

    /// Command name, NUL-padded
    pub comm: [u8; TASK_COMM_LEN],

    /// Number of continuation records emitted for this enter
    pub cont_nr: u8,

    /// [`SYSCALL_EVENT_TYPE_ENTER`] or [`SYSCALL_EVENT_TYPE_EXIT`]
    pub typ: u8,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 6],
}

/// Dereferenced pointer argument
///
/// **Size**: 152 bytes, delivered as a 156-byte perf raw sample
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SyscallEventContRecord {
    /// Timestamp of the enter record this value belongs to
    pub timestamp: u64,

    /// Number of meaningful bytes in `param`, or [`USE_NULL_BYTE_LENGTH`]
    pub length: u64,

    /// Argument index (0-based)
    pub index: u8,

    /// Non-zero when `bpf_probe_read` failed; `param` is then garbage
    pub failed: u8,

    /// Raw argument bytes
    pub param: [u8; PARAM_LEN],

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 6],
}

// ============================================================================
// Perf Sample Sizing
// ============================================================================

/// Kernel `round_up()` for power-of-two `y`
#[must_use]
pub const fn round_up(x: usize, y: usize) -> usize {
    ((x - 1) | (y - 1)) + 1
}

/// Length of the raw sample the kernel delivers for a record of `record_size`
///
/// `perf_prepare_sample()` pads the raw payload so that it plus its `u32`
/// size prefix is a multiple of 8 bytes.
#[must_use]
pub const fn perf_sample_size(record_size: usize) -> usize {
    round_up(record_size + core::mem::size_of::<u32>(), core::mem::size_of::<u64>())
        - core::mem::size_of::<u32>()
}

/// Raw sample length of a [`SyscallEventRecord`]
pub const SYSCALL_EVENT_SAMPLE_SIZE: usize =
    perf_sample_size(core::mem::size_of::<SyscallEventRecord>());

/// Raw sample length of a [`SyscallEventContRecord`]
pub const SYSCALL_EVENT_CONT_SAMPLE_SIZE: usize =
    perf_sample_size(core::mem::size_of::<SyscallEventContRecord>());
