//! Producer-side record encoding
//!
//! Lays out [`SyscallEventRecord`] and [`SyscallEventContRecord`] the way the
//! kernel program writes them, already padded to the raw sample length the
//! perf subsystem delivers.

use std::mem::offset_of;

use traceloop_common::{
    SyscallEventContRecord, SyscallEventRecord, SYSCALL_EVENT_CONT_SAMPLE_SIZE,
    SYSCALL_EVENT_SAMPLE_SIZE,
};

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Raw sample bytes of an enter/exit record
#[must_use]
pub fn syscall_sample(record: &SyscallEventRecord) -> Vec<u8> {
    let mut buf = vec![0u8; SYSCALL_EVENT_SAMPLE_SIZE];
    put(&mut buf, offset_of!(SyscallEventRecord, timestamp), &record.timestamp.to_ne_bytes());
    let args = offset_of!(SyscallEventRecord, args);
    for (i, arg) in record.args.iter().enumerate() {
        put(&mut buf, args + i * 8, &arg.to_ne_bytes());
    }
    put(&mut buf, offset_of!(SyscallEventRecord, pid), &record.pid.to_ne_bytes());
    put(&mut buf, offset_of!(SyscallEventRecord, cpu), &record.cpu.to_ne_bytes());
    put(&mut buf, offset_of!(SyscallEventRecord, id), &record.id.to_ne_bytes());
    put(&mut buf, offset_of!(SyscallEventRecord, comm), &record.comm);
    buf[offset_of!(SyscallEventRecord, cont_nr)] = record.cont_nr;
    buf[offset_of!(SyscallEventRecord, typ)] = record.typ;
    buf
}

/// Raw sample bytes of a continuation record
#[must_use]
pub fn continuation_sample(record: &SyscallEventContRecord) -> Vec<u8> {
    let mut buf = vec![0u8; SYSCALL_EVENT_CONT_SAMPLE_SIZE];
    put(
        &mut buf,
        offset_of!(SyscallEventContRecord, timestamp),
        &record.timestamp.to_ne_bytes(),
    );
    put(&mut buf, offset_of!(SyscallEventContRecord, length), &record.length.to_ne_bytes());
    buf[offset_of!(SyscallEventContRecord, index)] = record.index;
    buf[offset_of!(SyscallEventContRecord, failed)] = record.failed;
    put(&mut buf, offset_of!(SyscallEventContRecord, param), &record.param);
    buf
}
