//! # Event Correlation
//!
//! Rebuilds syscalls from the decoded records of one read pass. The enter
//! timestamp is the only correlation key: the kernel program stamps the exit
//! record and every continuation record with it.
//!
//! ## Matching Rules
//!
//! - The continuation set of a timestamp belongs to the first enter seen at
//!   that timestamp and is discarded afterwards.
//! - `exit`, `exit_group` and `rt_sigreturn` never produce an exit record, so
//!   their enter alone is complete.
//! - Any other enter consumes the first exit at its timestamp with the same
//!   syscall number and pid.
//! - Leftovers become partial events: enters keep their parameters and lack a
//!   return value, exits carry the return value and no parameters.
//!
//! Groupings are ordered maps and keep arrival order inside a timestamp, so
//! the result only depends on the input sequence.

use log::{debug, warn};
use std::collections::BTreeMap;

use crate::decoder::DecodedRecord;
use crate::domain::LookupError;
use crate::enrichment::{CommonData, Enricher};
use crate::event::{ContinuationEvent, CorrelatedEvent, SyscallEvent, SyscallParam};
use crate::syscalls::SyscallTable;

/// Syscalls whose enter is never followed by an exit record
pub const NO_EXIT_SYSCALLS: [&str; 3] = ["exit", "exit_group", "rt_sigreturn"];

/// Counters of one [`Correlator::correlate`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationStats {
    pub complete: usize,
    pub partial_enters: usize,
    pub partial_exits: usize,
    /// Orphan exits dropped because their syscall number is unknown
    pub skipped_exits: usize,
    pub unrecognized: usize,
}

pub struct Correlator<'a> {
    table: &'a SyscallTable,
    enricher: Option<&'a dyn Enricher>,
}

impl<'a> Correlator<'a> {
    #[must_use]
    pub fn new(table: &'a SyscallTable, enricher: Option<&'a dyn Enricher>) -> Self {
        Self { table, enricher }
    }

    /// Correlate records into events sorted by timestamp
    ///
    /// # Errors
    ///
    /// A name or declaration lookup failure for an enter record aborts the
    /// whole pass.
    pub fn correlate<I>(&self, records: I) -> Result<Vec<CorrelatedEvent>, LookupError>
    where
        I: IntoIterator<Item = DecodedRecord>,
    {
        self.correlate_with_stats(records).map(|(events, _)| events)
    }

    /// [`correlate`](Self::correlate), also returning the pass counters
    ///
    /// # Errors
    ///
    /// See [`correlate`](Self::correlate).
    pub fn correlate_with_stats<I>(
        &self,
        records: I,
    ) -> Result<(Vec<CorrelatedEvent>, CorrelationStats), LookupError>
    where
        I: IntoIterator<Item = DecodedRecord>,
    {
        let mut stats = CorrelationStats::default();
        let mut enters: BTreeMap<u64, Vec<SyscallEvent>> = BTreeMap::new();
        let mut exits: BTreeMap<u64, Vec<SyscallEvent>> = BTreeMap::new();
        let mut continuations: BTreeMap<u64, Vec<ContinuationEvent>> = BTreeMap::new();

        for record in records {
            match record {
                DecodedRecord::Syscall(event) if event.is_enter() => {
                    enters.entry(event.timestamp).or_default().push(event);
                }
                DecodedRecord::Syscall(event) => {
                    exits.entry(event.timestamp).or_default().push(event);
                }
                DecodedRecord::Continuation(cont) => {
                    continuations.entry(cont.timestamp).or_default().push(cont);
                }
                DecodedRecord::Unrecognized { .. } => stats.unrecognized += 1,
            }
        }

        let mut events = Vec::new();

        for (timestamp, group) in enters {
            for enter in group {
                let syscall = self.table.name_for_number(enter.syscall_id)?;
                let declaration = self.table.declaration_for(syscall)?;

                // Only the first enter at a timestamp gets the continuations
                let conts = continuations.remove(&timestamp).unwrap_or_default();
                let parameters = build_parameters(declaration.parameters(), &enter, conts);

                let mut event = base_event(&enter, syscall);
                event.parameters = parameters;

                if NO_EXIT_SYSCALLS.contains(&syscall) {
                    event.complete = true;
                    stats.complete += 1;
                } else if let Some(exit) = take_matching_exit(&mut exits, &enter) {
                    event.return_value = exit.return_value();
                    event.complete = true;
                    stats.complete += 1;
                } else {
                    debug!("No exit for {syscall} at {timestamp}");
                    stats.partial_enters += 1;
                }

                events.push(event);
            }
        }

        for exit in exits.into_values().flatten() {
            match self.table.name_for_number(exit.syscall_id) {
                Ok(syscall) => {
                    let mut event = base_event(&exit, syscall);
                    event.return_value = exit.return_value();
                    stats.partial_exits += 1;
                    events.push(event);
                }
                Err(e) => {
                    warn!("Dropping exit record at {}: {e}", exit.timestamp);
                    stats.skipped_exits += 1;
                }
            }
        }

        if !continuations.is_empty() {
            debug!("{} continuation groups had no enter record", continuations.len());
        }

        if let Some(enricher) = self.enricher {
            for event in &mut events {
                enricher.enrich(&mut event.common, event.mount_ns_id);
            }
        }

        events.sort_by_key(|e| e.timestamp);

        debug!(
            "Correlated {} events ({} complete, {} partial enters, {} partial exits)",
            events.len(),
            stats.complete,
            stats.partial_enters,
            stats.partial_exits
        );
        Ok((events, stats))
    }
}

fn base_event(record: &SyscallEvent, syscall: &str) -> CorrelatedEvent {
    CorrelatedEvent {
        common: CommonData::default(),
        mount_ns_id: record.mount_ns_id,
        timestamp: record.timestamp,
        cpu: record.cpu,
        pid: record.pid,
        comm: record.comm.clone(),
        syscall: syscall.to_string(),
        parameters: Vec::new(),
        return_value: None,
        complete: false,
    }
}

/// Decimal raw arguments, superseded by the first continuation per index
fn build_parameters(
    names: &[String],
    enter: &SyscallEvent,
    mut conts: Vec<ContinuationEvent>,
) -> Vec<SyscallParam> {
    let args = enter.args();

    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let value = match conts.iter().position(|c| usize::from(c.argument_index) == index) {
                Some(pos) => conts.swap_remove(pos).text,
                None => args.get(index).copied().unwrap_or_default().to_string(),
            };
            SyscallParam { name: name.clone(), value }
        })
        .collect()
}

/// Remove and return the first exit at the enter's timestamp for the same
/// syscall and pid
fn take_matching_exit(
    exits: &mut BTreeMap<u64, Vec<SyscallEvent>>,
    enter: &SyscallEvent,
) -> Option<SyscallEvent> {
    let group = exits.get_mut(&enter.timestamp)?;
    let pos = group
        .iter()
        .position(|e| e.syscall_id == enter.syscall_id && e.pid == enter.pid)?;
    let exit = group.remove(pos);
    if group.is_empty() {
        exits.remove(&enter.timestamp);
    }
    Some(exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DEREFERENCE_FAILED;
    use crate::domain::MountNsId;
    use crate::event::SyscallPhase;

    const MNTNS: MountNsId = MountNsId(7);

    fn table() -> SyscallTable {
        SyscallTable::builtin()
    }

    fn nr(table: &SyscallTable, name: &str) -> u16 {
        table.number_for_name(name).unwrap()
    }

    fn enter(ts: u64, id: u16, pid: u32, args: [u64; 6]) -> DecodedRecord {
        DecodedRecord::Syscall(SyscallEvent {
            timestamp: ts,
            continuation_count: 0,
            cpu: 0,
            syscall_id: id,
            pid,
            comm: "test".to_string(),
            mount_ns_id: MNTNS,
            phase: SyscallPhase::Enter { args },
        })
    }

    fn exit(ts: u64, id: u16, pid: u32, ret: i64) -> DecodedRecord {
        DecodedRecord::Syscall(SyscallEvent {
            timestamp: ts,
            continuation_count: 0,
            cpu: 0,
            syscall_id: id,
            pid,
            comm: "test".to_string(),
            mount_ns_id: MNTNS,
            phase: SyscallPhase::Exit { return_value: ret },
        })
    }

    fn cont(ts: u64, index: u8, text: &str) -> DecodedRecord {
        DecodedRecord::Continuation(ContinuationEvent {
            timestamp: ts,
            argument_index: index,
            text: text.to_string(),
            dereference_failed: text == DEREFERENCE_FAILED,
        })
    }

    fn values(event: &CorrelatedEvent) -> Vec<&str> {
        event.parameters.iter().map(|p| p.value.as_str()).collect()
    }

    #[test]
    fn test_matched_pair_with_continuation() {
        let t = table();
        let openat = nr(&t, "openat");
        let records = vec![
            enter(100, openat, 1, [4_294_967_196, 0x7ffd_0000, 0, 0, 0, 0]),
            cont(100, 1, "\"/etc/hosts\""),
            exit(100, openat, 1, 3),
        ];

        let events = Correlator::new(&t, None).correlate(records).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert!(e.complete);
        assert_eq!(e.syscall, "openat");
        assert_eq!(e.return_value, Some(3));
        assert_eq!(values(e), vec!["4294967196", "\"/etc/hosts\"", "0", "0"]);
        assert_eq!(e.parameters[1].name, "filename");
    }

    #[test]
    fn test_lone_enter_is_partial() {
        let t = table();
        let records = vec![enter(200, nr(&t, "write"), 4, [5, 0, 0, 0, 0, 0])];

        let (events, stats) = Correlator::new(&t, None).correlate_with_stats(records).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert!(!e.complete);
        assert_eq!(e.timestamp, 200);
        assert_eq!(e.return_value, None);
        assert_eq!(e.parameters[0].name, "fd");
        assert_eq!(e.parameters[0].value, "5");
        assert_eq!(values(e), vec!["5", "0", "0"]);
        assert_eq!(stats.partial_enters, 1);
        assert_eq!(stats.complete, 0);
    }

    #[test]
    fn test_matched_exit_is_consumed_once() {
        let t = table();
        let read = nr(&t, "read");
        let records = vec![enter(5, read, 1, [0; 6]), enter(5, read, 1, [0; 6]), exit(5, read, 1, 0)];

        let events = Correlator::new(&t, None).correlate(records).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events.iter().filter(|e| e.complete).count(), 1);
        assert_eq!(events.iter().filter(|e| e.return_value.is_some()).count(), 1);
    }

    #[test]
    fn test_exit_requires_same_pid_and_syscall() {
        let t = table();
        let read = nr(&t, "read");
        let write = nr(&t, "write");
        let records = vec![
            enter(5, read, 1, [0; 6]),
            exit(5, read, 2, 10),
            exit(5, write, 1, 11),
        ];

        let (events, stats) = Correlator::new(&t, None).correlate_with_stats(records).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| !e.complete));
        assert_eq!(stats.partial_enters, 1);
        assert_eq!(stats.partial_exits, 2);
    }

    #[test]
    fn test_no_exit_syscalls_are_complete() {
        let t = table();
        let records = vec![
            enter(1, nr(&t, "exit_group"), 1, [0; 6]),
            enter(2, nr(&t, "exit"), 2, [1, 0, 0, 0, 0, 0]),
            enter(3, nr(&t, "rt_sigreturn"), 3, [0; 6]),
        ];

        let events = Correlator::new(&t, None).correlate(records).unwrap();
        assert_eq!(events.len(), 3);
        for e in &events {
            assert!(e.complete, "{} should be complete", e.syscall);
            assert_eq!(e.return_value, None);
        }
    }

    #[test]
    fn test_continuations_go_to_first_enter_only() {
        let t = table();
        let openat = nr(&t, "openat");
        let records = vec![
            enter(9, openat, 1, [0, 111, 0, 0, 0, 0]),
            enter(9, openat, 2, [0, 222, 0, 0, 0, 0]),
            cont(9, 1, "\"/a\""),
        ];

        let events = Correlator::new(&t, None).correlate(records).unwrap();
        assert_eq!(events[0].parameters[1].value, "\"/a\"");
        assert_eq!(events[1].parameters[1].value, "222");
    }

    #[test]
    fn test_dereference_failure_placeholder() {
        let t = table();
        let openat = nr(&t, "openat");
        let records = vec![
            enter(1, openat, 1, [0, 0xdead, 0, 0, 0, 0]),
            cont(1, 1, DEREFERENCE_FAILED),
            exit(1, openat, 1, -14),
        ];

        let events = Correlator::new(&t, None).correlate(records).unwrap();
        assert_eq!(events[0].parameters[1].value, DEREFERENCE_FAILED);
        assert_eq!(events[0].return_value, Some(-14));
    }

    #[test]
    fn test_unknown_enter_aborts() {
        let t = table();
        let records = vec![enter(1, 4000, 1, [0; 6])];
        assert_eq!(
            Correlator::new(&t, None).correlate(records).unwrap_err(),
            LookupError::UnknownSyscall(4000)
        );
    }

    #[test]
    fn test_unknown_orphan_exit_is_skipped() {
        let t = table();
        let records = vec![exit(1, 4000, 1, 0), exit(2, nr(&t, "close"), 1, 0)];

        let (events, stats) = Correlator::new(&t, None).correlate_with_stats(records).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(stats.skipped_exits, 1);
        assert!(events[0].parameters.is_empty());
        assert_eq!(events[0].return_value, Some(0));
    }

    #[test]
    fn test_missing_declaration_aborts() {
        let mut t = table();
        t.forget_declaration("close");
        let records = vec![enter(1, nr(&t, "close"), 1, [0; 6])];
        assert_eq!(
            Correlator::new(&t, None).correlate(records).unwrap_err(),
            LookupError::UnknownDeclaration("close".to_string())
        );
    }

    #[test]
    fn test_output_is_sorted_and_enriched() {
        let t = table();
        let close = nr(&t, "close");
        let records = vec![
            exit(30, close, 1, 0),
            enter(10, close, 1, [3, 0, 0, 0, 0, 0]),
            exit(10, close, 1, 0),
            enter(20, close, 1, [4, 0, 0, 0, 0, 0]),
        ];
        let enricher = |common: &mut CommonData, mntns: MountNsId| {
            common.container = format!("ctr-{}", mntns.0);
        };

        let events = Correlator::new(&t, Some(&enricher)).correlate(records).unwrap();
        let timestamps: Vec<u64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert!(events.iter().all(|e| e.common.container == "ctr-7"));
    }

    #[test]
    fn test_unrecognized_records_are_counted() {
        let t = table();
        let records = vec![DecodedRecord::Unrecognized { size: 3 }];
        let (events, stats) = Correlator::new(&t, None).correlate_with_stats(records).unwrap();
        assert!(events.is_empty());
        assert_eq!(stats.unrecognized, 1);
    }
}
