//! Correlation output must not depend on the order records were read in

use proptest::prelude::*;

use traceloop::correlator::Correlator;
use traceloop::decoder::DecodedRecord;
use traceloop::domain::MountNsId;
use traceloop::event::{ContinuationEvent, CorrelatedEvent, SyscallEvent, SyscallPhase};
use traceloop::syscalls::SyscallTable;

const CLOSE: u16 = 3;
const OPENAT: u16 = 257;

/// One syscall as its enter, exit and continuation records
#[derive(Debug, Clone)]
struct Call {
    timestamp: u64,
    openat: bool,
    pid: u32,
    has_exit: bool,
    ret: i64,
}

fn syscall_record(call: &Call, id: u16, phase: SyscallPhase) -> DecodedRecord {
    DecodedRecord::Syscall(SyscallEvent {
        timestamp: call.timestamp,
        continuation_count: u8::from(call.openat),
        cpu: 0,
        syscall_id: id,
        pid: call.pid,
        comm: "prop".to_string(),
        mount_ns_id: MountNsId(1),
        phase,
    })
}

fn records(call: &Call) -> Vec<DecodedRecord> {
    let id = if call.openat { OPENAT } else { CLOSE };
    let mut out = vec![syscall_record(call, id, SyscallPhase::Enter { args: [call.timestamp; 6] })];
    if call.openat {
        out.push(DecodedRecord::Continuation(ContinuationEvent {
            timestamp: call.timestamp,
            argument_index: 1,
            text: format!("\"/tmp/{}\"", call.timestamp),
            dereference_failed: false,
        }));
    }
    if call.has_exit {
        out.push(syscall_record(call, id, SyscallPhase::Exit { return_value: call.ret }));
    }
    out
}

fn call_strategy() -> impl Strategy<Value = Call> {
    (any::<bool>(), 1u32..5, any::<bool>(), -5i64..100).prop_map(|(openat, pid, has_exit, ret)| {
        Call { timestamp: 0, openat, pid, has_exit, ret }
    })
}

/// Calls with distinct timestamps, flattened to records and shuffled
fn shuffled_records() -> impl Strategy<Value = (Vec<Call>, Vec<DecodedRecord>)> {
    (prop::collection::btree_set(1u64..10_000, 1..40), prop::collection::vec(call_strategy(), 40))
        .prop_flat_map(|(timestamps, templates)| {
            let calls: Vec<Call> = timestamps
                .into_iter()
                .zip(templates)
                .map(|(timestamp, call)| Call { timestamp, ..call })
                .collect();
            let flat: Vec<DecodedRecord> = calls.iter().flat_map(records).collect();
            (Just(calls), Just(flat).prop_shuffle())
        })
}

fn correlate(table: &SyscallTable, records: Vec<DecodedRecord>) -> Vec<CorrelatedEvent> {
    Correlator::new(table, None).correlate(records).unwrap()
}

proptest! {
    #[test]
    fn prop_output_is_sorted_and_permutation_invariant((calls, shuffled) in shuffled_records()) {
        let table = SyscallTable::builtin_for(traceloop::syscalls::Arch::X86_64);
        let in_order: Vec<DecodedRecord> = calls.iter().flat_map(records).collect();

        let expected = correlate(&table, in_order);
        let actual = correlate(&table, shuffled);

        prop_assert!(actual.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(actual.len(), calls.len());
    }

    #[test]
    fn prop_every_exit_is_consumed_once((calls, shuffled) in shuffled_records()) {
        let table = SyscallTable::builtin_for(traceloop::syscalls::Arch::X86_64);
        let events = correlate(&table, shuffled);

        for (call, event) in calls.iter().zip(&events) {
            prop_assert_eq!(event.timestamp, call.timestamp);
            prop_assert_eq!(event.complete, call.has_exit);
            prop_assert_eq!(event.return_value, call.has_exit.then_some(call.ret));
            // Enter parameters always survive, with or without exit
            prop_assert!(!event.parameters.is_empty());
            if call.openat {
                prop_assert_eq!(&event.parameters[1].value, &format!("\"/tmp/{}\"", call.timestamp));
            }
        }
    }
}
