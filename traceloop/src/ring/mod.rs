//! # Per-Container Perf Rings
//!
//! Each traced container owns one perf ring per CPU, opened in overwrite
//! mode (`write_backward`): the kernel never blocks or drops on a full ring,
//! it moves `data_head` *down* and overwrites the oldest records. Userspace
//! therefore cannot consume in place. It snapshots each ring, walks forward
//! from the current head towards the head it saw last time, and remembers
//! the new head.
//!
//! ```text
//!  data area (size S, indexes taken modulo S)
//!  ┌──────────┬─────────┬─────────┬─────────┬───────────────┐
//!  │  stale   │ rec N   │ rec N-1 │  ...    │ already read  │
//!  └──────────┴─────────┴─────────┴─────────┴───────────────┘
//!             ▲ head                          ▲ previous head
//! ```
//!
//! At most `S` bytes are walked. When more than `S` bytes were written since
//! the previous read, the oldest record in the window is usually cut by the
//! wraparound and the walk stops at it.

pub mod memory;

use log::{debug, trace};

use crate::domain::RingError;

/// `PERF_RECORD_LOST`
pub const PERF_RECORD_LOST: u32 = 2;

/// `PERF_RECORD_SAMPLE`
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// `sizeof(struct perf_event_header)`
pub const PERF_EVENT_HEADER_SIZE: usize = 8;

/// Size prefix of a `PERF_SAMPLE_RAW` payload
const RAW_SIZE_PREFIX: usize = 4;

/// Copy of one per-CPU ring at an instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSnapshot {
    /// Kernel `data_head`; decreases as records are written
    pub head: u64,
    /// The whole data area
    pub data: Vec<u8>,
}

/// A set of per-CPU overwritable perf rings
pub trait PerfRing: Send {
    fn ring_count(&self) -> usize;

    /// # Errors
    ///
    /// [`RingError::Closed`] once the ring is closed,
    /// [`RingError::IndexOutOfRange`] for a CPU index past `ring_count()`.
    fn snapshot(&self, index: usize) -> Result<RingSnapshot, RingError>;

    /// Release the rings. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to release the rings.
    fn close(&mut self) -> Result<(), RingError>;
}

/// `struct perf_event_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfEventHeader {
    pub kind: u32,
    pub misc: u16,
    pub size: u16,
}

impl PerfEventHeader {
    #[must_use]
    pub fn to_bytes(self) -> [u8; PERF_EVENT_HEADER_SIZE] {
        let mut out = [0u8; PERF_EVENT_HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.to_ne_bytes());
        out[4..6].copy_from_slice(&self.misc.to_ne_bytes());
        out[6..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; PERF_EVENT_HEADER_SIZE]) -> Self {
        Self {
            kind: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_ne_bytes([bytes[4], bytes[5]]),
            size: u16::from_ne_bytes([bytes[6], bytes[7]]),
        }
    }
}

/// Counters of one [`OverwritableReader::read`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// `PERF_RECORD_SAMPLE` payloads handed to the caller
    pub samples: usize,
    /// Sum of the counts carried by `PERF_RECORD_LOST` records
    pub lost: u64,
    /// Records of other types, skipped
    pub other_records: usize,
    /// Walks that ended on a record cut by the wraparound
    pub truncated: usize,
}

impl ReadStats {
    fn merge(&mut self, other: ReadStats) {
        self.samples += other.samples;
        self.lost += other.lost;
        self.other_records += other.other_records;
        self.truncated += other.truncated;
    }
}

/// Non-blocking reader over an overwritable [`PerfRing`]
///
/// Keeps one previous-head cursor per CPU ring, so a record is delivered by
/// at most one `read` call.
#[derive(Debug)]
pub struct OverwritableReader<R: PerfRing> {
    ring: R,
    previous_heads: Vec<u64>,
}

impl<R: PerfRing> OverwritableReader<R> {
    /// Cursors start at the initial kernel head (0)
    pub fn new(ring: R) -> Self {
        let previous_heads = vec![0; ring.ring_count()];
        Self { ring, previous_heads }
    }

    pub fn ring(&self) -> &R {
        &self.ring
    }

    /// Deliver every sample written since the previous call
    ///
    /// Samples of one CPU ring are passed to `on_sample` oldest first.
    ///
    /// # Errors
    ///
    /// Propagates snapshot errors, [`RingError::Closed`] included. Cursors of
    /// rings already walked in this call keep their new position.
    pub fn read<F>(&mut self, mut on_sample: F) -> Result<ReadStats, RingError>
    where
        F: FnMut(&[u8]),
    {
        let mut stats = ReadStats::default();

        for (index, previous_head) in self.previous_heads.iter_mut().enumerate() {
            let snapshot = self.ring.snapshot(index)?;
            let ring_stats = walk(&snapshot, *previous_head, &mut on_sample);
            if ring_stats.samples > 0 || ring_stats.lost > 0 {
                trace!(
                    "ring {index}: {} samples, {} lost, head {:#x} -> {:#x}",
                    ring_stats.samples,
                    ring_stats.lost,
                    *previous_head,
                    snapshot.head
                );
            }
            stats.merge(ring_stats);
            *previous_head = snapshot.head;
        }

        if stats.lost > 0 {
            debug!("perf rings reported {} lost records", stats.lost);
        }
        Ok(stats)
    }

    /// # Errors
    ///
    /// Propagates the backend's close failure.
    pub fn close(&mut self) -> Result<(), RingError> {
        self.ring.close()
    }
}

/// Walk one snapshot from its head towards `previous_head`
fn walk<F>(snapshot: &RingSnapshot, previous_head: u64, on_sample: &mut F) -> ReadStats
where
    F: FnMut(&[u8]),
{
    let mut stats = ReadStats::default();
    let size = snapshot.data.len();
    if size == 0 {
        return stats;
    }

    let available = usize::try_from(previous_head.wrapping_sub(snapshot.head))
        .unwrap_or(usize::MAX)
        .min(size);

    // Newest first while walking, delivered oldest first below
    let mut samples: Vec<Vec<u8>> = Vec::new();
    let mut offset = 0usize;

    while offset + PERF_EVENT_HEADER_SIZE <= available {
        let position = snapshot.head.wrapping_add(offset as u64);
        let mut header_bytes = [0u8; PERF_EVENT_HEADER_SIZE];
        copy_wrapped(&snapshot.data, position, &mut header_bytes);
        let header = PerfEventHeader::from_bytes(header_bytes);

        let record_size = usize::from(header.size);
        if record_size < PERF_EVENT_HEADER_SIZE {
            break;
        }
        if offset + record_size > available {
            stats.truncated += 1;
            break;
        }

        let mut body = vec![0u8; record_size - PERF_EVENT_HEADER_SIZE];
        copy_wrapped(
            &snapshot.data,
            position.wrapping_add(PERF_EVENT_HEADER_SIZE as u64),
            &mut body,
        );

        match header.kind {
            PERF_RECORD_SAMPLE => match raw_payload(&body) {
                Some(payload) => samples.push(payload.to_vec()),
                None => {
                    debug!("Malformed raw sample of {record_size} bytes, stopping walk");
                    break;
                }
            },
            PERF_RECORD_LOST => {
                if let Some(lost) = body.get(8..16) {
                    let mut count = [0u8; 8];
                    count.copy_from_slice(lost);
                    stats.lost += u64::from_ne_bytes(count);
                }
            }
            _ => stats.other_records += 1,
        }

        offset += record_size;
    }

    for sample in samples.iter().rev() {
        on_sample(sample);
    }
    stats.samples = samples.len();
    stats
}

/// Raw data of a `PERF_SAMPLE_RAW` record body
fn raw_payload(body: &[u8]) -> Option<&[u8]> {
    let prefix = body.get(..RAW_SIZE_PREFIX)?;
    let len = u32::from_ne_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let len = usize::try_from(len).ok()?;
    body.get(RAW_SIZE_PREFIX..RAW_SIZE_PREFIX.checked_add(len)?)
}

/// Copy `out.len()` bytes starting at ring position `position`, wrapping
fn copy_wrapped(data: &[u8], position: u64, out: &mut [u8]) {
    let size = data.len();
    #[allow(clippy::cast_possible_truncation)]
    let start = (position % size as u64) as usize;
    let first = out.len().min(size - start);
    out[..first].copy_from_slice(&data[start..start + first]);
    let rest = out.len() - first;
    if rest > 0 {
        out[first..].copy_from_slice(&data[..rest]);
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRing;
    use super::*;

    fn payload(tag: u8, len: usize) -> Vec<u8> {
        vec![tag; len]
    }

    fn collect(reader: &mut OverwritableReader<MemoryRing>) -> (Vec<Vec<u8>>, ReadStats) {
        let mut out = Vec::new();
        let stats = reader.read(|s| out.push(s.to_vec())).unwrap();
        (out, stats)
    }

    #[test]
    fn test_header_bytes() {
        let header = PerfEventHeader { kind: PERF_RECORD_SAMPLE, misc: 0, size: 104 };
        assert_eq!(PerfEventHeader::from_bytes(header.to_bytes()), header);
    }

    #[test]
    fn test_reads_samples_oldest_first() {
        let ring = MemoryRing::new(1, 4096);
        let writer = ring.writer();
        let mut reader = OverwritableReader::new(ring);

        assert!(writer.write_sample(0, &payload(1, 92)));
        assert!(writer.write_sample(0, &payload(2, 156)));

        let (samples, stats) = collect(&mut reader);
        assert_eq!(samples, vec![payload(1, 92), payload(2, 156)]);
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn test_cursor_does_not_redeliver() {
        let ring = MemoryRing::new(1, 4096);
        let writer = ring.writer();
        let mut reader = OverwritableReader::new(ring);

        writer.write_sample(0, &payload(1, 92));
        assert_eq!(collect(&mut reader).0.len(), 1);
        assert!(collect(&mut reader).0.is_empty());

        writer.write_sample(0, &payload(2, 92));
        assert_eq!(collect(&mut reader).0, vec![payload(2, 92)]);
    }

    #[test]
    fn test_wraparound_keeps_newest() {
        // 104-byte records in a 1024-byte ring: 9 fit, the 10th-oldest is cut
        let ring = MemoryRing::new(1, 1024);
        let writer = ring.writer();
        let mut reader = OverwritableReader::new(ring);

        for tag in 0..30u8 {
            writer.write_sample(0, &payload(tag, 92));
        }

        let (samples, stats) = collect(&mut reader);
        let tags: Vec<u8> = samples.iter().map(|s| s[0]).collect();
        assert_eq!(tags, (21..30).collect::<Vec<u8>>());
        assert_eq!(stats.truncated, 1);
    }

    #[test]
    fn test_lost_records_are_counted() {
        let ring = MemoryRing::new(1, 4096);
        let writer = ring.writer();
        let mut reader = OverwritableReader::new(ring);

        writer.write_lost(0, 7, 12);
        writer.write_sample(0, &payload(1, 92));

        let (samples, stats) = collect(&mut reader);
        assert_eq!(samples.len(), 1);
        assert_eq!(stats.lost, 12);
    }

    #[test]
    fn test_multiple_cpus() {
        let ring = MemoryRing::new(3, 4096);
        let writer = ring.writer();
        let mut reader = OverwritableReader::new(ring);

        writer.write_sample(0, &payload(0, 92));
        writer.write_sample(2, &payload(2, 92));

        let (samples, _) = collect(&mut reader);
        assert_eq!(samples, vec![payload(0, 92), payload(2, 92)]);
    }

    #[test]
    fn test_closed_ring_errors() {
        let ring = MemoryRing::new(1, 4096);
        let mut reader = OverwritableReader::new(ring);
        reader.close().unwrap();
        assert_eq!(reader.read(|_| {}).unwrap_err(), RingError::Closed);
        // closing twice is fine
        reader.close().unwrap();
    }

    #[test]
    fn test_zero_header_stops_walk() {
        let snapshot = RingSnapshot { head: 0u64.wrapping_sub(64), data: vec![0; 256] };
        let mut count = 0;
        let stats = walk(&snapshot, 0, &mut |_: &[u8]| count += 1);
        assert_eq!(count, 0);
        assert_eq!(stats, ReadStats::default());
    }

    #[test]
    fn test_copy_wrapped() {
        let data = [1u8, 2, 3, 4];
        let mut out = [0u8; 3];
        copy_wrapped(&data, 3, &mut out);
        assert_eq!(out, [4, 1, 2]);
    }
}
