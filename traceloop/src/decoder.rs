//! # Binary Record Decoder
//!
//! Turns one perf raw sample into a [`DecodedRecord`]. The two record shapes
//! written by the kernel program are told apart by the raw sample length
//! alone; see [`SYSCALL_EVENT_SAMPLE_SIZE`] and
//! [`SYSCALL_EVENT_CONT_SAMPLE_SIZE`].
//!
//! Samples of any other length, and enter/exit records with an unknown type
//! byte, are torn or foreign writes. They decode to
//! [`DecodedRecord::Unrecognized`] and are skipped by the caller.

use log::debug;
use std::mem::size_of;

use crate::domain::MountNsId;
use crate::event::{ContinuationEvent, SyscallEvent, SyscallPhase};
use traceloop_common::{
    SyscallEventContRecord, SyscallEventRecord, PARAM_LEN, SYSCALL_EVENT_CONT_SAMPLE_SIZE,
    SYSCALL_EVENT_SAMPLE_SIZE, SYSCALL_EVENT_TYPE_ENTER, SYSCALL_EVENT_TYPE_EXIT,
    USE_NULL_BYTE_LENGTH,
};

/// Text used for a parameter whose pointer could not be read
pub const DEREFERENCE_FAILED: &str = "(Failed to dereference pointer)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Syscall(SyscallEvent),
    Continuation(ContinuationEvent),
    Unrecognized { size: usize },
}

/// Decode one raw sample read from the ring of `mount_ns_id`
#[must_use]
pub fn decode_sample(sample: &[u8], mount_ns_id: MountNsId) -> DecodedRecord {
    match sample.len() {
        SYSCALL_EVENT_SAMPLE_SIZE => decode_syscall(sample, mount_ns_id),
        SYSCALL_EVENT_CONT_SAMPLE_SIZE => decode_continuation(sample),
        size => {
            debug!("Skipping sample of unexpected size {size} from {mount_ns_id}");
            DecodedRecord::Unrecognized { size }
        }
    }
}

fn decode_syscall(sample: &[u8], mount_ns_id: MountNsId) -> DecodedRecord {
    let Some(bytes) = sample.get(..size_of::<SyscallEventRecord>()) else {
        return DecodedRecord::Unrecognized { size: sample.len() };
    };
    // SAFETY: `bytes` is exactly size_of::<SyscallEventRecord>() long, and the
    // record is plain old data for which every bit pattern is valid
    #[allow(unsafe_code)]
    let record = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<SyscallEventRecord>()) };

    let phase = match record.typ {
        SYSCALL_EVENT_TYPE_ENTER => SyscallPhase::Enter { args: record.args },
        #[allow(clippy::cast_possible_wrap)]
        SYSCALL_EVENT_TYPE_EXIT => SyscallPhase::Exit { return_value: record.args[0] as i64 },
        typ => {
            debug!("Skipping syscall record with type {typ} at {}", record.timestamp);
            return DecodedRecord::Unrecognized { size: sample.len() };
        }
    };

    DecodedRecord::Syscall(SyscallEvent {
        timestamp: record.timestamp,
        continuation_count: record.cont_nr,
        cpu: record.cpu,
        syscall_id: record.id,
        pid: record.pid,
        comm: c_string(&record.comm),
        mount_ns_id,
        phase,
    })
}

fn decode_continuation(sample: &[u8]) -> DecodedRecord {
    let Some(bytes) = sample.get(..size_of::<SyscallEventContRecord>()) else {
        return DecodedRecord::Unrecognized { size: sample.len() };
    };
    // SAFETY: `bytes` is exactly size_of::<SyscallEventContRecord>() long, and
    // the record is plain old data for which every bit pattern is valid
    #[allow(unsafe_code)]
    let record =
        unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<SyscallEventContRecord>()) };

    let dereference_failed = record.failed != 0;
    let text = if dereference_failed {
        DEREFERENCE_FAILED.to_string()
    } else {
        quote(parameter_bytes(&record.param, record.length))
    };

    DecodedRecord::Continuation(ContinuationEvent {
        timestamp: record.timestamp,
        argument_index: record.index,
        text,
        dereference_failed,
    })
}

/// Meaningful bytes of a parameter buffer for the recorded length
///
/// Lengths the kernel left as an unresolved sentinel take the whole buffer.
fn parameter_bytes(param: &[u8; PARAM_LEN], length: u64) -> &[u8] {
    if length == USE_NULL_BYTE_LENGTH {
        return until_nul(param);
    }
    match usize::try_from(length) {
        Ok(len) if len < PARAM_LEN => &param[..len],
        _ => param,
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn c_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(until_nul(bytes)).into_owned()
}

/// Printable, double-quoted form of raw parameter bytes
fn quote(bytes: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(bytes))
}
