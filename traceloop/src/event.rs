//! Decoded records and correlated syscall events

use serde::Serialize;
use std::fmt;

use crate::domain::MountNsId;
use crate::enrichment::CommonData;
use traceloop_common::SYSCALL_ARGS;

/// Enter-or-exit specific part of a [`SyscallEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallPhase {
    Enter { args: [u64; SYSCALL_ARGS] },
    Exit { return_value: i64 },
}

/// A decoded `sys_enter` or `sys_exit` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallEvent {
    pub timestamp: u64,
    pub continuation_count: u8,
    pub cpu: u16,
    pub syscall_id: u16,
    pub pid: u32,
    pub comm: String,
    pub mount_ns_id: MountNsId,
    pub phase: SyscallPhase,
}

impl SyscallEvent {
    #[must_use]
    pub fn is_enter(&self) -> bool {
        matches!(self.phase, SyscallPhase::Enter { .. })
    }

    /// Raw arguments; all zero for exit records
    #[must_use]
    pub fn args(&self) -> [u64; SYSCALL_ARGS] {
        match self.phase {
            SyscallPhase::Enter { args } => args,
            SyscallPhase::Exit { .. } => [0; SYSCALL_ARGS],
        }
    }

    #[must_use]
    pub fn return_value(&self) -> Option<i64> {
        match self.phase {
            SyscallPhase::Enter { .. } => None,
            SyscallPhase::Exit { return_value } => Some(return_value),
        }
    }
}

/// A decoded continuation record: the value behind one pointer argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationEvent {
    pub timestamp: u64,
    pub argument_index: u8,
    /// Quoted, escaped value, or the dereference-failure placeholder
    pub text: String,
    pub dereference_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyscallParam {
    pub name: String,
    pub value: String,
}

/// One reconstructed syscall, possibly partial
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelatedEvent {
    #[serde(flatten)]
    pub common: CommonData,
    pub mount_ns_id: MountNsId,
    pub timestamp: u64,
    pub cpu: u16,
    pub pid: u32,
    pub comm: String,
    pub syscall: String,
    pub parameters: Vec<SyscallParam>,
    #[serde(rename = "ret", skip_serializing_if = "Option::is_none")]
    pub return_value: Option<i64>,
    pub complete: bool,
}

impl fmt::Display for CorrelatedEvent {
    /// strace-like line: `[ts] comm(pid) name(a=1, b="x") = ret`
    ///
    /// Partial enters end in `<unfinished>`; partial exits print `...` in
    /// place of their missing parameters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}({}) {}(", self.timestamp, self.comm, self.pid, self.syscall)?;

        if !self.complete && self.parameters.is_empty() && self.return_value.is_some() {
            f.write_str("...")?;
        }
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", param.name, param.value)?;
        }
        f.write_str(")")?;

        match self.return_value {
            Some(ret) => write!(f, " = {ret}"),
            None if self.complete => f.write_str(" = ?"),
            None => f.write_str(" <unfinished>"),
        }
    }
}
