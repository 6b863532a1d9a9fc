//! # Simulated Kernel
//!
//! An in-process [`KernelBackend`] that behaves like the traceloop kernel
//! programs:
//!
//! - `create_ring` allocates byte-exact backward perf rings ([`MemoryRing`])
//! - `route`/`unroute` maintain the mount-namespace → ring map
//! - [`SimulatedKernel::invoke`] plays one syscall through the `sys_enter` and
//!   `sys_exit` programs: an enter record, continuation records for the
//!   arguments selected by the installed parameter probes (at enter, or at
//!   exit for output buffers), then the exit record, all sharing the enter
//!   timestamp. Syscalls that do not return (`exit_group`) emit no exit.
//!
//! Raw samples and `PERF_RECORD_LOST` records can be injected to exercise the
//! reader on malformed input, and the next ring creation or route update can
//! be made to fail.

use dashmap::DashMap;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{encode, KernelBackend, ParameterProbe};
use crate::domain::{KernelError, LookupError, MountNsId};
use crate::ring::memory::{MemoryRing, RingWriter};
use crate::syscalls::probes::{ProbeLength, ProbeSlot};
use crate::syscalls::SyscallTable;
use traceloop_common::{
    SyscallDef, SyscallEventContRecord, SyscallEventRecord, PARAM_LEN, SYSCALL_ARGS,
    SYSCALL_EVENT_TYPE_ENTER, SYSCALL_EVENT_TYPE_EXIT, TASK_COMM_LEN, USE_NULL_BYTE_LENGTH,
};

/// First fake user-space address handed out for pointer arguments
const USER_BASE: u64 = 0x7ffd_0000_0000;

/// Syscall named by a [`SyscallInvocation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallTarget {
    Name(String),
    Number(u16),
}

/// One syscall made by a task in a traced container
#[derive(Debug, Clone)]
pub struct SyscallInvocation {
    pub mount_ns_id: MountNsId,
    pub syscall: SyscallTarget,
    pub pid: u32,
    pub comm: String,
    pub cpu: u16,
    pub args: [u64; SYSCALL_ARGS],
    /// User memory behind pointer arguments, by argument index
    ///
    /// A probed argument without an entry fails to dereference.
    pub memory: HashMap<usize, Vec<u8>>,
    /// `None` for syscalls that never return
    pub return_value: Option<i64>,
    /// Fixed enter timestamp instead of the kernel clock
    pub timestamp: Option<u64>,
}

impl SyscallInvocation {
    pub fn new(mount_ns_id: MountNsId, syscall: &str) -> Self {
        Self::with_target(mount_ns_id, SyscallTarget::Name(syscall.to_string()))
    }

    /// Invocation by raw number, which may be unknown to every table
    pub fn by_number(mount_ns_id: MountNsId, id: u16) -> Self {
        Self::with_target(mount_ns_id, SyscallTarget::Number(id))
    }

    fn with_target(mount_ns_id: MountNsId, syscall: SyscallTarget) -> Self {
        Self {
            mount_ns_id,
            syscall,
            pid: 1,
            comm: String::new(),
            cpu: 0,
            args: [0; SYSCALL_ARGS],
            memory: HashMap::new(),
            return_value: Some(0),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    #[must_use]
    pub fn comm(mut self, comm: &str) -> Self {
        self.comm = comm.to_string();
        self
    }

    #[must_use]
    pub fn cpu(mut self, cpu: u16) -> Self {
        self.cpu = cpu;
        self
    }

    #[must_use]
    pub fn arg(mut self, index: usize, value: u64) -> Self {
        if let Some(slot) = self.args.get_mut(index) {
            *slot = value;
        }
        self
    }

    /// Pointer argument to a NUL-terminated string
    #[must_use]
    pub fn string_arg(self, index: usize, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.buffer_arg(index, bytes)
    }

    /// Pointer argument to a buffer
    #[must_use]
    pub fn buffer_arg(mut self, index: usize, bytes: impl Into<Vec<u8>>) -> Self {
        self = self.arg(index, USER_BASE + (index as u64) * 0x1000);
        self.memory.insert(index, bytes.into());
        self
    }

    /// Pointer argument whose memory is unmapped
    #[must_use]
    pub fn bad_pointer_arg(mut self, index: usize) -> Self {
        self.memory.remove(&index);
        self.arg(index, 0xdead_0000)
    }

    #[must_use]
    pub fn returns(mut self, value: i64) -> Self {
        self.return_value = Some(value);
        self
    }

    #[must_use]
    pub fn no_return(mut self) -> Self {
        self.return_value = None;
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    ring_creation: Option<String>,
    route: Option<String>,
}

/// In-process stand-in for the traceloop kernel programs and maps
#[derive(Debug)]
pub struct SimulatedKernel {
    table: Arc<SyscallTable>,
    cpus: usize,
    probes: RwLock<HashMap<u16, SyscallDef>>,
    routes: DashMap<MountNsId, RingWriter>,
    rings: Mutex<Vec<RingWriter>>,
    failures: Mutex<FailurePlan>,
    clock: AtomicU64,
    released: AtomicBool,
}

impl SimulatedKernel {
    #[must_use]
    pub fn new(table: Arc<SyscallTable>, cpus: usize) -> Self {
        Self {
            table,
            cpus: cpus.max(1),
            probes: RwLock::new(HashMap::new()),
            routes: DashMap::new(),
            rings: Mutex::new(Vec::new()),
            failures: Mutex::new(FailurePlan::default()),
            clock: AtomicU64::new(1_000),
            released: AtomicBool::new(false),
        }
    }

    /// One ring per online CPU of the host
    #[must_use]
    pub fn with_host_cpus(table: Arc<SyscallTable>) -> Self {
        Self::new(table, super::cpu_utils::ring_count())
    }

    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpus
    }

    /// Make the next `create_ring` call fail
    pub fn fail_next_ring_creation(&self, reason: &str) {
        self.failures.lock().ring_creation = Some(reason.to_string());
    }

    /// Make the next `route` call fail
    pub fn fail_next_route(&self, reason: &str) {
        self.failures.lock().route = Some(reason.to_string());
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_routed(&self, mount_ns_id: MountNsId) -> bool {
        self.routes.contains_key(&mount_ns_id)
    }

    /// Rings created and not yet closed by their owner
    #[must_use]
    pub fn open_rings(&self) -> usize {
        let mut rings = self.rings.lock();
        rings.retain(|w| !w.is_closed());
        rings.len()
    }

    #[must_use]
    pub fn installed_probes(&self) -> Vec<ParameterProbe> {
        let mut probes: Vec<_> = self
            .probes
            .read()
            .iter()
            .map(|(&syscall_id, &definition)| ParameterProbe { syscall_id, definition })
            .collect();
        probes.sort_by_key(|p| p.syscall_id);
        probes
    }

    /// Next monotonic timestamp
    fn now(&self) -> u64 {
        self.clock.fetch_add(1_000, Ordering::Relaxed)
    }

    fn writer_for(&self, mount_ns_id: MountNsId) -> Option<RingWriter> {
        if self.is_released() {
            return None;
        }
        self.routes.get(&mount_ns_id).map(|w| w.value().clone())
    }

    fn cpu_index(&self, cpu: u16) -> usize {
        usize::from(cpu) % self.cpus
    }

    /// CPU number recorded for a task running on `cpu`
    fn recorded_cpu(&self, cpu: u16) -> u16 {
        u16::try_from(self.cpu_index(cpu)).unwrap_or(cpu)
    }

    /// Run `invocation` through the `sys_enter` and `sys_exit` programs
    ///
    /// Returns the enter timestamp, or `None` when no ring is routed for the
    /// invocation's mount namespace and nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownDeclaration`] for a name this kernel's
    /// table does not number.
    pub fn invoke(&self, invocation: &SyscallInvocation) -> Result<Option<u64>, LookupError> {
        let id = match &invocation.syscall {
            SyscallTarget::Number(id) => *id,
            SyscallTarget::Name(name) => self
                .table
                .number_for_name(name)
                .ok_or_else(|| LookupError::UnknownDeclaration(name.clone()))?,
        };

        let Some(writer) = self.writer_for(invocation.mount_ns_id) else {
            debug!("No ring routed for {}, dropping syscall {id}", invocation.mount_ns_id);
            return Ok(None);
        };

        let timestamp = invocation.timestamp.unwrap_or_else(|| self.now());
        let cpu = self.cpu_index(invocation.cpu);
        let probe = self.probes.read().get(&id).copied().map(|definition| ParameterProbe {
            syscall_id: id,
            definition,
        });

        let enter_conts: Vec<_> = probe
            .iter()
            .flat_map(ParameterProbe::slots)
            .filter(|(_, slot)| !slot.at_exit)
            .map(|(index, slot)| continuation(invocation, timestamp, index, slot))
            .collect();

        let recorded_cpu = self.recorded_cpu(invocation.cpu);
        let mut enter = base_record(invocation, timestamp, id, recorded_cpu);
        enter.typ = SYSCALL_EVENT_TYPE_ENTER;
        enter.args = invocation.args;
        enter.cont_nr = u8::try_from(enter_conts.len()).unwrap_or(u8::MAX);
        writer.write_sample(cpu, &encode::syscall_sample(&enter));
        for cont in &enter_conts {
            writer.write_sample(cpu, &encode::continuation_sample(cont));
        }

        let Some(ret) = invocation.return_value else {
            return Ok(Some(timestamp));
        };

        for (index, slot) in probe.iter().flat_map(ParameterProbe::slots) {
            if slot.at_exit {
                let cont = continuation(invocation, timestamp, index, slot);
                writer.write_sample(cpu, &encode::continuation_sample(&cont));
            }
        }

        let mut exit = base_record(invocation, timestamp, id, recorded_cpu);
        exit.typ = SYSCALL_EVENT_TYPE_EXIT;
        #[allow(clippy::cast_sign_loss)]
        let raw_ret = ret as u64;
        exit.args[0] = raw_ret;
        writer.write_sample(cpu, &encode::syscall_sample(&exit));

        Ok(Some(timestamp))
    }

    /// Inject a raw sample into the ring routed for `mount_ns_id`
    pub fn emit_raw(&self, mount_ns_id: MountNsId, cpu: u16, sample: &[u8]) -> bool {
        self.writer_for(mount_ns_id)
            .is_some_and(|w| w.write_sample(self.cpu_index(cpu), sample))
    }

    /// Inject a `PERF_RECORD_LOST` record
    pub fn emit_lost(&self, mount_ns_id: MountNsId, cpu: u16, lost: u64) -> bool {
        self.writer_for(mount_ns_id)
            .is_some_and(|w| w.write_lost(self.cpu_index(cpu), 0, lost))
    }
}

fn base_record(
    invocation: &SyscallInvocation,
    timestamp: u64,
    id: u16,
    cpu: u16,
) -> SyscallEventRecord {
    let mut comm = [0u8; TASK_COMM_LEN];
    // TASK_COMM_LEN includes the NUL
    let len = invocation.comm.len().min(TASK_COMM_LEN - 1);
    comm[..len].copy_from_slice(&invocation.comm.as_bytes()[..len]);

    SyscallEventRecord {
        timestamp,
        args: [0; SYSCALL_ARGS],
        pid: invocation.pid,
        cpu,
        id,
        comm,
        cont_nr: 0,
        typ: SYSCALL_EVENT_TYPE_ENTER,
        _padding: [0; 6],
    }
}

/// Continuation record for one probed argument, as the kernel program reads it
fn continuation(
    invocation: &SyscallInvocation,
    timestamp: u64,
    index: usize,
    slot: ProbeSlot,
) -> SyscallEventContRecord {
    let mut record = SyscallEventContRecord {
        timestamp,
        length: 0,
        index: u8::try_from(index).unwrap_or(u8::MAX),
        failed: 0,
        param: [0; PARAM_LEN],
        _padding: [0; 6],
    };

    let Some(memory) = invocation.memory.get(&index) else {
        record.failed = 1;
        return record;
    };

    // The last byte always stays NUL
    let capacity = PARAM_LEN - 1;
    let (copy, length) = match slot.length {
        ProbeLength::NulTerminated => {
            let end = memory.iter().position(|&b| b == 0).unwrap_or(memory.len());
            (end.min(capacity), USE_NULL_BYTE_LENGTH)
        }
        ProbeLength::ReturnValue => {
            let wanted = invocation.return_value.and_then(|r| usize::try_from(r).ok()).unwrap_or(0);
            let n = wanted.min(memory.len()).min(capacity);
            (n, n as u64)
        }
        ProbeLength::ArgumentValue(arg) => {
            let wanted = invocation
                .args
                .get(arg)
                .and_then(|&v| usize::try_from(v).ok())
                .unwrap_or(0);
            let n = wanted.min(memory.len()).min(capacity);
            (n, n as u64)
        }
    };

    record.param[..copy].copy_from_slice(&memory[..copy]);
    record.length = length;
    record
}

impl KernelBackend for SimulatedKernel {
    type Ring = MemoryRing;

    fn install_parameter_probes(&self, probes: &[ParameterProbe]) -> Result<(), KernelError> {
        let mut map = self.probes.write();
        for probe in probes {
            map.insert(probe.syscall_id, probe.definition);
        }
        info!("Installed {} parameter probes", probes.len());
        Ok(())
    }

    fn create_ring(&self, name: &str, bytes_per_cpu: usize) -> Result<MemoryRing, KernelError> {
        if let Some(reason) = self.failures.lock().ring_creation.take() {
            return Err(KernelError::RingCreation(format!("{name}: {reason}")));
        }
        if bytes_per_cpu == 0 {
            return Err(KernelError::RingCreation(format!("{name}: zero-sized ring")));
        }

        let ring = MemoryRing::new(self.cpus, bytes_per_cpu);
        let mut rings = self.rings.lock();
        // Closed rings are only kept alive by this list
        rings.retain(|w| !w.is_closed());
        rings.push(ring.writer());
        drop(rings);
        debug!("Created {name}: {} x {bytes_per_cpu} bytes", self.cpus);
        Ok(ring)
    }

    fn route(&self, mount_ns_id: MountNsId, ring: &MemoryRing) -> Result<(), KernelError> {
        if let Some(reason) = self.failures.lock().route.take() {
            return Err(KernelError::RouteUpdate { mount_ns_id: mount_ns_id.0, reason });
        }
        match self.routes.entry(mount_ns_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(KernelError::RouteUpdate {
                mount_ns_id: mount_ns_id.0,
                reason: "already routed".to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ring.writer());
                Ok(())
            }
        }
    }

    fn unroute(&self, mount_ns_id: MountNsId) -> Result<(), KernelError> {
        self.routes
            .remove(&mount_ns_id)
            .map(|_| ())
            .ok_or(KernelError::RouteNotFound(mount_ns_id.0))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.routes.clear();
            info!("Released simulated kernel programs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_sample, DecodedRecord};
    use crate::ring::{OverwritableReader, PerfRing};

    const MNTNS: MountNsId = MountNsId(4_026_532_001);

    fn kernel() -> SimulatedKernel {
        let table = Arc::new(SyscallTable::builtin());
        let kernel = SimulatedKernel::new(Arc::clone(&table), 2);
        kernel.install_parameter_probes(&table.parameter_probes()).unwrap();
        kernel
    }

    fn drain(reader: &mut OverwritableReader<MemoryRing>) -> Vec<DecodedRecord> {
        let mut out = Vec::new();
        reader.read(|s| out.push(decode_sample(s, MNTNS))).unwrap();
        out
    }

    fn routed(kernel: &SimulatedKernel) -> OverwritableReader<MemoryRing> {
        let ring = kernel.create_ring("perf_buffer_test", 4096).unwrap();
        kernel.route(MNTNS, &ring).unwrap();
        OverwritableReader::new(ring)
    }

    #[test]
    fn test_unrouted_namespace_records_nothing() {
        let kernel = kernel();
        let inv = SyscallInvocation::new(MNTNS, "getpid");
        assert_eq!(kernel.invoke(&inv), Ok(None));
    }

    #[test]
    fn test_enter_continuation_exit_share_timestamp() {
        let kernel = kernel();
        let mut reader = routed(&kernel);

        let inv = SyscallInvocation::new(MNTNS, "openat")
            .pid(10)
            .comm("cat")
            .string_arg(1, "/etc/hosts")
            .returns(3);
        let ts = kernel.invoke(&inv).unwrap().unwrap();

        let records = drain(&mut reader);
        assert_eq!(records.len(), 3);
        let DecodedRecord::Syscall(enter) = &records[0] else { panic!("enter first") };
        assert!(enter.is_enter());
        assert_eq!(enter.timestamp, ts);
        assert_eq!(enter.continuation_count, 1);
        let DecodedRecord::Continuation(cont) = &records[1] else { panic!("then continuation") };
        assert_eq!(cont.timestamp, ts);
        assert_eq!(cont.argument_index, 1);
        assert_eq!(cont.text, "\"/etc/hosts\"");
        let DecodedRecord::Syscall(exit) = &records[2] else { panic!("exit last") };
        assert_eq!(exit.return_value(), Some(3));
        assert_eq!(exit.timestamp, ts);
    }

    #[test]
    fn test_at_exit_probe_uses_return_value() {
        let kernel = kernel();
        let mut reader = routed(&kernel);

        let inv = SyscallInvocation::new(MNTNS, "read")
            .arg(0, 3)
            .buffer_arg(1, b"hello world".to_vec())
            .arg(2, 64)
            .returns(5);
        kernel.invoke(&inv).unwrap();

        let records = drain(&mut reader);
        let DecodedRecord::Syscall(enter) = &records[0] else { panic!("enter first") };
        assert_eq!(enter.continuation_count, 0);
        let DecodedRecord::Continuation(cont) = &records[1] else { panic!("continuation") };
        assert_eq!(cont.text, "\"hello\"");
    }

    #[test]
    fn test_argument_index_length() {
        let kernel = kernel();
        let mut reader = routed(&kernel);

        let inv = SyscallInvocation::new(MNTNS, "write")
            .arg(0, 1)
            .buffer_arg(1, b"abcdef".to_vec())
            .arg(2, 4)
            .returns(4);
        kernel.invoke(&inv).unwrap();

        let conts: Vec<_> = drain(&mut reader)
            .into_iter()
            .filter_map(|r| match r {
                DecodedRecord::Continuation(c) => Some(c.text),
                _ => None,
            })
            .collect();
        assert_eq!(conts, vec!["\"abcd\"".to_string()]);
    }

    #[test]
    fn test_bad_pointer_fails_dereference() {
        let kernel = kernel();
        let mut reader = routed(&kernel);

        kernel.invoke(&SyscallInvocation::new(MNTNS, "openat").bad_pointer_arg(1)).unwrap();
        let failed = drain(&mut reader).into_iter().any(|r| {
            matches!(r, DecodedRecord::Continuation(c) if c.dereference_failed)
        });
        assert!(failed);
    }

    #[test]
    fn test_no_return_emits_no_exit() {
        let kernel = kernel();
        let mut reader = routed(&kernel);

        kernel.invoke(&SyscallInvocation::new(MNTNS, "exit_group").no_return()).unwrap();
        assert_eq!(drain(&mut reader).len(), 1);
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let kernel = kernel();
        let inv = SyscallInvocation::new(MNTNS, "frobnicate");
        assert!(kernel.invoke(&inv).is_err());
    }

    #[test]
    fn test_route_twice_fails() {
        let kernel = kernel();
        let ring = kernel.create_ring("a", 4096).unwrap();
        kernel.route(MNTNS, &ring).unwrap();
        assert!(matches!(kernel.route(MNTNS, &ring), Err(KernelError::RouteUpdate { .. })));
    }

    #[test]
    fn test_unroute_unknown() {
        let kernel = kernel();
        assert_eq!(kernel.unroute(MNTNS), Err(KernelError::RouteNotFound(MNTNS.0)));
    }

    #[test]
    fn test_injected_failures_fire_once() {
        let kernel = kernel();
        kernel.fail_next_ring_creation("ENOMEM");
        assert!(kernel.create_ring("a", 4096).is_err());
        assert!(kernel.create_ring("a", 4096).is_ok());

        let ring = kernel.create_ring("b", 4096).unwrap();
        kernel.fail_next_route("E2BIG");
        assert!(kernel.route(MNTNS, &ring).is_err());
        assert!(kernel.route(MNTNS, &ring).is_ok());
    }

    #[test]
    fn test_open_rings_tracks_close() {
        let kernel = kernel();
        let mut ring = kernel.create_ring("a", 4096).unwrap();
        assert_eq!(kernel.open_rings(), 1);
        ring.close().unwrap();
        assert_eq!(kernel.open_rings(), 0);
    }

    #[test]
    fn test_closed_rings_are_not_retained() {
        let kernel = kernel();
        for _ in 0..100 {
            kernel.create_ring("x", 4096).unwrap().close().unwrap();
        }
        assert!(kernel.rings.lock().len() <= 1);
        assert_eq!(kernel.open_rings(), 0);
        assert!(kernel.rings.lock().is_empty());

        let _open = kernel.create_ring("y", 4096).unwrap();
        assert_eq!(kernel.rings.lock().len(), 1);
    }

    #[test]
    fn test_release_stops_recording() {
        let kernel = kernel();
        let _reader = routed(&kernel);
        kernel.release();
        assert!(kernel.is_released());
        assert!(!kernel.is_routed(MNTNS));
        assert_eq!(kernel.invoke(&SyscallInvocation::new(MNTNS, "getpid")), Ok(None));
    }

    #[test]
    fn test_emit_lost_is_counted() {
        let kernel = kernel();
        let mut reader = routed(&kernel);
        assert!(kernel.emit_lost(MNTNS, 0, 4));
        let stats = reader.read(|_| {}).unwrap();
        assert_eq!(stats.lost, 4);
    }
}
