//! In-memory backward perf ring
//!
//! Byte-compatible with a kernel perf ring opened with `write_backward`: the
//! producer side ([`RingWriter`]) lays out `perf_event_header` records exactly
//! as the kernel does and moves the head down, and the consumer side
//! ([`MemoryRing`]) implements [`PerfRing`] with copies of the data area.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{
    PerfEventHeader, PerfRing, RingSnapshot, PERF_EVENT_HEADER_SIZE, PERF_RECORD_LOST,
    PERF_RECORD_SAMPLE,
};
use crate::domain::RingError;

#[derive(Debug)]
struct CpuRing {
    head: u64,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Shared {
    cpus: Vec<Mutex<CpuRing>>,
    closed: AtomicBool,
}

/// Consumer handle
#[derive(Debug)]
pub struct MemoryRing {
    shared: Arc<Shared>,
}

/// Producer handle, held by the simulated kernel
#[derive(Debug, Clone)]
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl MemoryRing {
    /// `cpus` rings of `bytes_per_cpu` bytes each
    #[must_use]
    pub fn new(cpus: usize, bytes_per_cpu: usize) -> Self {
        let shared = Arc::new(Shared {
            cpus: (0..cpus)
                .map(|_| Mutex::new(CpuRing { head: 0, data: vec![0; bytes_per_cpu] }))
                .collect(),
            closed: AtomicBool::new(false),
        });
        MemoryRing { shared }
    }

    /// Producer handle for the same rings
    #[must_use]
    pub fn writer(&self) -> RingWriter {
        RingWriter { shared: Arc::clone(&self.shared) }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl PerfRing for MemoryRing {
    fn ring_count(&self) -> usize {
        self.shared.cpus.len()
    }

    fn snapshot(&self, index: usize) -> Result<RingSnapshot, RingError> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        let cpu = self.shared.cpus.get(index).ok_or(RingError::IndexOutOfRange {
            index,
            count: self.shared.cpus.len(),
        })?;
        let cpu = cpu.lock();
        Ok(RingSnapshot { head: cpu.head, data: cpu.data.clone() })
    }

    fn close(&mut self) -> Result<(), RingError> {
        self.shared.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl RingWriter {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.shared.cpus.len()
    }

    /// Write a `PERF_RECORD_SAMPLE` carrying `payload` as its raw data
    ///
    /// `payload` must already be padded the way the kernel pads raw samples
    /// (see `traceloop_common::perf_sample_size`). Returns `false` if the
    /// ring is closed, `cpu` does not exist or the record cannot fit.
    pub fn write_sample(&self, cpu: usize, payload: &[u8]) -> bool {
        let Ok(raw_size) = u32::try_from(payload.len()) else {
            return false;
        };
        let mut body = Vec::with_capacity(4 + payload.len());
        body.extend_from_slice(&raw_size.to_ne_bytes());
        body.extend_from_slice(payload);
        self.write_record(cpu, PERF_RECORD_SAMPLE, &body)
    }

    /// Write a `PERF_RECORD_LOST` record
    pub fn write_lost(&self, cpu: usize, id: u64, lost: u64) -> bool {
        let mut body = [0u8; 16];
        body[..8].copy_from_slice(&id.to_ne_bytes());
        body[8..].copy_from_slice(&lost.to_ne_bytes());
        self.write_record(cpu, PERF_RECORD_LOST, &body)
    }

    fn write_record(&self, cpu: usize, kind: u32, body: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(ring) = self.shared.cpus.get(cpu) else {
            return false;
        };
        let record_size = PERF_EVENT_HEADER_SIZE + body.len();
        let Ok(header_size) = u16::try_from(record_size) else {
            return false;
        };

        let mut ring = ring.lock();
        if record_size > ring.data.len() {
            return false;
        }

        let header = PerfEventHeader { kind, misc: 0, size: header_size };
        let head = ring.head.wrapping_sub(record_size as u64);
        write_wrapped(&mut ring.data, head, &header.to_bytes());
        write_wrapped(
            &mut ring.data,
            head.wrapping_add(PERF_EVENT_HEADER_SIZE as u64),
            body,
        );
        ring.head = head;
        true
    }
}

fn write_wrapped(data: &mut [u8], position: u64, bytes: &[u8]) {
    let size = data.len();
    #[allow(clippy::cast_possible_truncation)]
    let start = (position % size as u64) as usize;
    let first = bytes.len().min(size - start);
    data[start..start + first].copy_from_slice(&bytes[..first]);
    let rest = bytes.len() - first;
    if rest > 0 {
        data[..rest].copy_from_slice(&bytes[first..]);
    }
}
