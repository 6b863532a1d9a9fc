//! Pointer-argument probe definitions
//!
//! For each listed syscall the kernel program copies the memory behind the
//! marked arguments into continuation records. A slot is `0` (leave the
//! argument alone) or one of the length sentinels from `traceloop_common`,
//! optionally OR-ed with [`PARAM_PROBE_AT_EXIT_MASK`] for output buffers that
//! are only filled when the syscall returns.

use traceloop_common::{
    SyscallDef, PARAM_PROBE_AT_EXIT_MASK, SYSCALL_ARGS, USE_ARG_INDEX_AS_PARAM_LENGTH,
    USE_NULL_BYTE_LENGTH, USE_RET_AS_PARAM_LENGTH,
};

const NUL: u64 = USE_NULL_BYTE_LENGTH;

/// Definition installed for one syscall number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterProbe {
    pub syscall_id: u16,
    pub definition: SyscallDef,
}

/// How the kernel program sizes one probed argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeLength {
    /// Up to the first NUL byte
    NulTerminated,
    /// The syscall return value
    ReturnValue,
    /// The value of another argument
    ArgumentValue(usize),
}

/// One decoded slot of a [`SyscallDef`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSlot {
    pub length: ProbeLength,
    pub at_exit: bool,
}

impl ParameterProbe {
    /// Decoded slot for argument `index`, `None` if it is not probed
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<ProbeSlot> {
        decode_slot(*self.definition.get(index)?)
    }

    /// Probed argument indexes with their decoded slots
    pub fn slots(&self) -> impl Iterator<Item = (usize, ProbeSlot)> + '_ {
        (0..SYSCALL_ARGS).filter_map(|i| self.slot(i).map(|s| (i, s)))
    }
}

/// Decode a raw definition slot
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn decode_slot(raw: u64) -> Option<ProbeSlot> {
    if raw == 0 {
        return None;
    }
    let at_exit = raw & PARAM_PROBE_AT_EXIT_MASK != 0;
    let value = raw & !PARAM_PROBE_AT_EXIT_MASK;

    let length = match value {
        USE_NULL_BYTE_LENGTH => ProbeLength::NulTerminated,
        USE_RET_AS_PARAM_LENGTH => ProbeLength::ReturnValue,
        v if (USE_ARG_INDEX_AS_PARAM_LENGTH
            ..USE_ARG_INDEX_AS_PARAM_LENGTH + SYSCALL_ARGS as u64)
            .contains(&v) =>
        {
            ProbeLength::ArgumentValue((v - USE_ARG_INDEX_AS_PARAM_LENGTH) as usize)
        }
        _ => return None,
    };

    Some(ProbeSlot { length, at_exit })
}

/// Probed syscalls by name
///
/// Names are resolved to numbers per architecture by
/// [`SyscallTable::parameter_probes`](super::SyscallTable::parameter_probes).
#[rustfmt::skip]
pub static PARAMETER_PROBES: &[(&str, SyscallDef)] = &[
    ("execve",      [NUL, 0, 0, 0, 0, 0]),
    ("access",      [NUL, 0, 0, 0, 0, 0]),
    ("open",        [NUL, 0, 0, 0, 0, 0]),
    ("openat",      [0, NUL, 0, 0, 0, 0]),
    ("mkdir",       [NUL, 0, 0, 0, 0, 0]),
    ("chdir",       [NUL, 0, 0, 0, 0, 0]),
    ("pivot_root",  [NUL, NUL, 0, 0, 0, 0]),
    ("mount",       [NUL, NUL, NUL, 0, 0, 0]),
    ("umount2",     [NUL, 0, 0, 0, 0, 0]),
    ("sethostname", [NUL, 0, 0, 0, 0, 0]),
    ("statfs",      [NUL, 0, 0, 0, 0, 0]),
    ("stat",        [NUL, 0, 0, 0, 0, 0]),
    ("statx",       [0, NUL, 0, 0, 0, 0]),
    ("lstat",       [NUL, 0, 0, 0, 0, 0]),
    ("fgetxattr",   [0, NUL, 0, 0, 0, 0]),
    ("lgetxattr",   [NUL, NUL, 0, 0, 0, 0]),
    ("getxattr",    [NUL, NUL, 0, 0, 0, 0]),
    ("newfstatat",  [0, NUL, 0, 0, 0, 0]),
    ("read",        [0, USE_RET_AS_PARAM_LENGTH | PARAM_PROBE_AT_EXIT_MASK, 0, 0, 0, 0]),
    ("write",       [0, USE_ARG_INDEX_AS_PARAM_LENGTH + 2, 0, 0, 0, 0]),
    ("getcwd",      [NUL | PARAM_PROBE_AT_EXIT_MASK, 0, 0, 0, 0, 0]),
    ("pread64",     [0, USE_RET_AS_PARAM_LENGTH | PARAM_PROBE_AT_EXIT_MASK, 0, 0, 0, 0]),
    ("connect",     [0, USE_ARG_INDEX_AS_PARAM_LENGTH + 2, 0, 0, 0, 0]),
];
