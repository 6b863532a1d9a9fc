//! # Tracer Facade
//!
//! Public entry point of the library. A [`Tracer`] owns a kernel backend and
//! one [`ContainerReader`] per attached container:
//!
//! ```text
//! attach(id, mntns) ─▶ create_ring ─▶ route(mntns) ─▶ readers[id]
//! read(id)          ─▶ snapshot rings ─▶ decode ─▶ correlate ─▶ events
//! detach(mntns)     ─▶ unroute(mntns)
//! delete(id)        ─▶ readers.remove(id) ─▶ unroute(mntns) if still routed ─▶ close ring
//! ```
//!
//! Polling is left to the caller. Readers of different containers sit behind
//! their own mutex, so concurrent `read` calls only contend per container.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::TracerConfig;
use crate::correlator::Correlator;
use crate::decoder::decode_sample;
use crate::domain::{KernelError, MountNsId, RingError, TraceloopError};
use crate::enrichment::Enricher;
use crate::event::CorrelatedEvent;
use crate::kernel::KernelBackend;
use crate::ring::{OverwritableReader, PerfRing};
use crate::syscalls::SyscallTable;

/// Ring reader of one attached container
///
/// `reader` is `None` once the container has been deleted; a caller still
/// holding the entry then reads nothing.
#[derive(Debug)]
pub struct ContainerReader<R: PerfRing> {
    container_id: String,
    mount_ns_id: MountNsId,
    reader: Option<OverwritableReader<R>>,
}

impl<R: PerfRing> ContainerReader<R> {
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    #[must_use]
    pub fn mount_ns_id(&self) -> MountNsId {
        self.mount_ns_id
    }

    fn close(&mut self) -> Result<(), RingError> {
        match self.reader.take() {
            Some(mut reader) => reader.close(),
            None => Ok(()),
        }
    }
}

type SharedReader<R> = Arc<Mutex<ContainerReader<R>>>;

pub struct Tracer<K: KernelBackend> {
    backend: K,
    table: Arc<SyscallTable>,
    enricher: Option<Arc<dyn Enricher>>,
    config: TracerConfig,
    readers: DashMap<String, SharedReader<K::Ring>>,
    /// Routed namespaces and the container each one was attached for
    routes: Mutex<HashMap<MountNsId, String>>,
    stopped: AtomicBool,
}

impl<K: KernelBackend> Tracer<K> {
    /// Create a tracer and install the parameter probes of `table`
    ///
    /// # Errors
    ///
    /// Returns [`TraceloopError::Kernel`] if the probe map cannot be filled.
    pub fn new(
        backend: K,
        table: Arc<SyscallTable>,
        config: TracerConfig,
    ) -> Result<Self, TraceloopError> {
        let probes = table.parameter_probes();
        backend.install_parameter_probes(&probes)?;
        info!(
            "Tracer ready: {} syscalls known, {} probed, {} bytes per CPU ring",
            table.len(),
            probes.len(),
            config.ring_bytes_per_cpu()
        );

        Ok(Self {
            backend,
            table,
            enricher: None,
            config,
            readers: DashMap::new(),
            routes: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Run every correlated event through `enricher`
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn backend(&self) -> &K {
        &self.backend
    }

    pub fn table(&self) -> &SyscallTable {
        &self.table
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Start collecting syscalls of tasks in `mount_ns_id` under `container_id`
    ///
    /// # Errors
    ///
    /// - [`TraceloopError::Stopped`] after [`stop`](Self::stop)
    /// - [`TraceloopError::AlreadyAttached`] if `container_id` has a reader
    /// - [`TraceloopError::BufferAllocation`] if the ring cannot be created or
    ///   routed; a ring created here is closed again
    pub fn attach(&self, container_id: &str, mount_ns_id: MountNsId) -> Result<(), TraceloopError> {
        if self.is_stopped() {
            return Err(TraceloopError::Stopped);
        }
        if self.readers.contains_key(container_id) {
            return Err(TraceloopError::AlreadyAttached(container_id.to_string()));
        }

        let allocation_error = |source: KernelError| TraceloopError::BufferAllocation {
            container_id: container_id.to_string(),
            source,
        };

        let name = format!("perf_buffer_{}", mount_ns_id.0);
        let ring = self
            .backend
            .create_ring(&name, self.config.ring_bytes_per_cpu())
            .map_err(allocation_error)?;

        if let Err(e) = self.route(container_id, mount_ns_id, &ring) {
            close_ring(&name, ring);
            return Err(allocation_error(e));
        }

        // Allocation above runs without the map shard held
        let conflict = match self.readers.entry(container_id.to_string()) {
            Entry::Occupied(_) => TraceloopError::AlreadyAttached(container_id.to_string()),
            Entry::Vacant(_) if self.is_stopped() => TraceloopError::Stopped,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(ContainerReader {
                    container_id: container_id.to_string(),
                    mount_ns_id,
                    reader: Some(OverwritableReader::new(ring)),
                })));
                info!("Attached container {container_id} ({mount_ns_id})");
                return Ok(());
            }
        };

        // Lost the slot to a concurrent attach or stop
        if let Err(e) = self.release_route(container_id, mount_ns_id) {
            warn!("Failed to unroute {mount_ns_id} of discarded {name}: {e}");
        }
        close_ring(&name, ring);
        Err(conflict)
    }

    /// Route `mount_ns_id` to `ring` and record `container_id` as its owner
    fn route(
        &self,
        container_id: &str,
        mount_ns_id: MountNsId,
        ring: &K::Ring,
    ) -> Result<(), KernelError> {
        let mut routes = self.routes.lock();
        self.backend.route(mount_ns_id, ring)?;
        routes.insert(mount_ns_id, container_id.to_string());
        Ok(())
    }

    /// Remove the routing of `mount_ns_id` if `container_id` still owns it
    fn release_route(&self, container_id: &str, mount_ns_id: MountNsId) -> Result<(), KernelError> {
        let mut routes = self.routes.lock();
        if routes.get(&mount_ns_id).map(String::as_str) != Some(container_id) {
            return Ok(());
        }
        routes.remove(&mount_ns_id);
        match self.backend.unroute(mount_ns_id) {
            Ok(()) | Err(KernelError::RouteNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop routing records of `mount_ns_id`; the reader stays readable
    ///
    /// # Errors
    ///
    /// Returns [`TraceloopError::RoutingNotFound`] if the namespace is not
    /// routed.
    pub fn detach(&self, mount_ns_id: MountNsId) -> Result<(), TraceloopError> {
        let mut routes = self.routes.lock();
        match self.backend.unroute(mount_ns_id) {
            Ok(()) => {
                routes.remove(&mount_ns_id);
                drop(routes);
                info!("Detached {mount_ns_id}");
                Ok(())
            }
            Err(KernelError::RouteNotFound(_)) => {
                routes.remove(&mount_ns_id);
                Err(TraceloopError::RoutingNotFound(mount_ns_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the reader of `container_id`, release its routing if it still
    /// has one, and close its ring
    ///
    /// # Errors
    ///
    /// - [`TraceloopError::ReaderNotFound`] if no reader exists
    /// - [`TraceloopError::Kernel`] if the routing entry cannot be removed;
    ///   the ring is closed regardless
    /// - [`TraceloopError::Ring`] if the ring fails to close
    pub fn delete(&self, container_id: &str) -> Result<(), TraceloopError> {
        let (_, shared) = self
            .readers
            .remove(container_id)
            .ok_or_else(|| TraceloopError::ReaderNotFound(container_id.to_string()))?;

        let mut reader = shared.lock();
        let unrouted = self.release_route(container_id, reader.mount_ns_id);
        reader.close()?;
        drop(reader);
        unrouted?;

        info!("Deleted reader of container {container_id}");
        Ok(())
    }

    /// Drain the ring of `container_id` and correlate what it held
    ///
    /// A ring closed by a concurrent [`delete`](Self::delete) yields no
    /// events.
    ///
    /// # Errors
    ///
    /// - [`TraceloopError::ReaderNotFound`] if no reader exists
    /// - [`TraceloopError::Lookup`] if an enter record names an unknown
    ///   syscall; the drained records are lost
    /// - [`TraceloopError::Ring`] for ring failures other than closing
    pub fn read(&self, container_id: &str) -> Result<Vec<CorrelatedEvent>, TraceloopError> {
        // Map guard dropped before taking the reader lock
        let shared = self
            .readers
            .get(container_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TraceloopError::ReaderNotFound(container_id.to_string()))?;

        let mut guard = shared.lock();
        let mount_ns_id = guard.mount_ns_id;
        let Some(reader) = guard.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        let stats = match reader.read(|sample| records.push(decode_sample(sample, mount_ns_id))) {
            Ok(stats) => stats,
            Err(RingError::Closed) => {
                debug!("Ring of container {container_id} closed while reading");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        drop(guard);

        if stats.lost > 0 {
            warn!("Container {container_id}: {} records lost to overwrite", stats.lost);
        }
        if stats.truncated > 0 {
            debug!("Container {container_id}: {} truncated records skipped", stats.truncated);
        }

        let correlator = Correlator::new(&self.table, self.enricher.as_deref());
        Ok(correlator.correlate(records)?)
    }

    /// Delete every reader and release the kernel programs
    ///
    /// Later calls do nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        for container_id in self.containers() {
            match self.delete(&container_id) {
                Ok(()) | Err(TraceloopError::ReaderNotFound(_)) => {}
                Err(e) => error!("Failed to delete reader of container {container_id}: {e}"),
            }
        }
        self.backend.release();
        self.routes.lock().clear();
        info!("Tracer stopped");
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ids of the containers with a reader, sorted
    #[must_use]
    pub fn containers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.readers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Mount namespace a container was attached with
    #[must_use]
    pub fn mount_ns_id_of(&self, container_id: &str) -> Option<MountNsId> {
        self.readers.get(container_id).map(|entry| entry.value().lock().mount_ns_id)
    }
}

fn close_ring<R: PerfRing>(name: &str, mut ring: R) {
    if let Err(e) = ring.close() {
        warn!("Failed to close {name}: {e}");
    }
}

impl<K: KernelBackend> Drop for Tracer<K> {
    fn drop(&mut self) {
        self.stop();
    }
}
