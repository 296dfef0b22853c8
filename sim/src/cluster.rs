//! The cluster: every worker's cache/CPU/network endpoint wired onto the
//! shared [`Fabric`], plus the routing glue needed to turn a placed task
//! into a submitted one.
//!
//! Grounded on `examples/original_source/cluster.py`'s `Cluster`, which
//! owns the per-worker `Cache`/`CPU` pair and the `NetworkInterface`
//! binding both to the topology. Unlike the Python original (one `Cluster`
//! object driving every worker's SimPy process), this crate's `Cluster` is
//! pure wiring: the actual work happens in [`crate::executor`], scheduled
//! through the [`crate::kernel::Kernel`] each worker's [`WorkerRuntime`]
//! shares.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use chainsim_net::{Port, Request, RpcKind};

use crate::cache::{Cache, EvictionPolicy, LatencyModel, SerializationPolicy};
use crate::cpu::CpuShare;
use crate::fabric::FabricHandle;
use crate::kernel::{Kernel, SimEvent};

/// Everything a single worker node needs to run tasks: its cache, its CPU
/// share, and the network bookkeeping an [`crate::executor`] uses to
/// issue fetches and correlate their responses.
pub struct WorkerRuntime {
    /// This worker's address.
    pub ip: String,
    /// This worker's object cache.
    pub cache: Rc<std::cell::RefCell<Cache>>,
    /// This worker's CPU share.
    pub cpu: Rc<std::cell::RefCell<CpuShare>>,
    pub(crate) fabric: FabricHandle,
    pub(crate) response_port: Port,
    /// Every worker's cache port, immutable after cluster construction
    /// (specification §5: topology wiring is read-only during simulation).
    pub(crate) cache_ports: Rc<HashMap<String, Port>>,
    next_req_id: Cell<u64>,
    pub(crate) outstanding: Rc<std::cell::RefCell<HashMap<u64, SimEvent<Request>>>>,
    /// Number of executor slots configured for this worker (topology
    /// `executors` count). Slots round-robin task dispatch but do not
    /// themselves bound concurrency -- the CPU share already models that
    /// (specification §4.5, §4.4).
    pub slots: usize,
    next_slot: Cell<usize>,
}

impl WorkerRuntime {
    /// Allocates the next request id for a fetch this worker issues.
    pub(crate) fn next_req_id(&self) -> u64 {
        let id = self.next_req_id.get();
        self.next_req_id.set(id + 1);
        id
    }

    /// Round-robins across this worker's configured executor slots. Purely
    /// informational (e.g. for logging); nothing currently gates on it.
    pub fn next_slot(&self) -> usize {
        let s = self.next_slot.get();
        self.next_slot.set((s + 1) % self.slots.max(1));
        s
    }

    /// The cache port of the worker owning `ip`, if known.
    pub fn cache_port_of(&self, ip: &str) -> Option<Port> {
        self.cache_ports.get(ip).copied()
    }
}

/// The whole cluster: every worker, wired onto one shared [`Fabric`].
///
/// Grounded on `cluster.py`'s top-level `Cluster` object.
pub struct Cluster {
    /// The shared network fabric every worker's cache and executor send
    /// requests through.
    pub fabric: FabricHandle,
    workers: HashMap<String, Rc<WorkerRuntime>>,
    order: Vec<String>,
    cache_ports: Rc<HashMap<String, Port>>,
}

impl Cluster {
    /// Creates an empty cluster bound to `fabric`. `cache_ports` is built
    /// once, up front, from the topology (every worker's configured
    /// `cache.port`), since a worker issuing a remote fetch needs to know
    /// its destination's cache port before it can address a request to it.
    pub fn new(fabric: FabricHandle, cache_ports: HashMap<String, Port>) -> Self {
        Cluster { fabric, workers: HashMap::new(), order: Vec::new(), cache_ports: Rc::new(cache_ports) }
    }

    /// Registers a worker: builds its cache and CPU, and binds both the
    /// cache-request and fetch-response ports on the shared fabric.
    ///
    /// `fabric.add_nic(ip, rate)` must already have been called for `ip`
    /// before this runs -- [`crate::fabric::Fabric::register_recipient`]
    /// marks a flow on an existing nic and is a silent no-op if the nic is
    /// not there yet, which would otherwise surface later as every
    /// request to this worker failing to deliver.
    #[allow(clippy::too_many_arguments)]
    pub fn add_worker(
        &mut self,
        ip: impl Into<String>,
        cache_port: Port,
        response_port: Port,
        slots: usize,
        serialization_policy: SerializationPolicy,
        eviction_policy: EvictionPolicy,
        serialization_model: LatencyModel,
        deserialization_model: LatencyModel,
    ) -> Rc<WorkerRuntime> {
        let ip = ip.into();
        let cache = Rc::new(std::cell::RefCell::new(Cache::new(
            ip.clone(),
            serialization_policy,
            eviction_policy,
            serialization_model,
            deserialization_model,
        )));
        let cpu = CpuShare::new(ip.clone());
        let outstanding: Rc<std::cell::RefCell<HashMap<u64, SimEvent<Request>>>> =
            Rc::new(std::cell::RefCell::new(HashMap::new()));

        {
            let cache = cache.clone();
            let fabric_for_reply = self.fabric.clone();
            self.fabric.borrow_mut().register_recipient(&ip, cache_port, move |kernel, req| {
                let fabric = fabric_for_reply.clone();
                Cache::handle_request(&cache, kernel, req, move |k, resp| crate::fabric::Fabric::send(&fabric, k, resp));
            });
        }
        {
            let outstanding = outstanding.clone();
            self.fabric.borrow_mut().register_recipient(&ip, response_port, move |kernel, resp| {
                let pending = outstanding.borrow_mut().remove(&resp.req_id);
                if let Some(event) = pending {
                    event.succeed(kernel, resp);
                }
            });
        }

        let runtime = Rc::new(WorkerRuntime {
            ip: ip.clone(),
            cache,
            cpu,
            fabric: self.fabric.clone(),
            response_port,
            cache_ports: self.cache_ports.clone(),
            next_req_id: Cell::new(0),
            outstanding,
            slots: slots.max(1),
            next_slot: Cell::new(0),
        });
        self.workers.insert(ip.clone(), runtime.clone());
        self.order.push(ip);
        runtime
    }

    /// Looks up a worker's runtime by IP.
    pub fn worker(&self, ip: &str) -> Option<&Rc<WorkerRuntime>> {
        self.workers.get(ip)
    }

    /// Every registered worker's IP, in registration order (used by
    /// `round_robin`/`random` placement and by `chain_color_rr`'s
    /// first-come mapping).
    pub fn active_workers(&self) -> &[String] {
        &self.order
    }

    /// Submits `task_id` (already placed on a worker by the scheduler) to
    /// that worker's executor pipeline.
    pub fn submit(&self, kernel: &Kernel, job: crate::graph::JobHandle, task_id: crate::graph::TaskId) {
        let worker_ip = job.borrow().tasks[task_id].worker.clone().expect("scheduler sets worker before submit");
        let worker = self.worker(&worker_ip).expect("worker exists").clone();
        crate::executor::execute(worker, kernel, job, task_id);
    }
}

/// Convenience used by [`crate::executor`] to decide a response's kind
/// without importing `chainsim_net::RpcKind` directly at every call site.
pub(crate) fn is_local_response(rpc: RpcKind) -> bool {
    matches!(rpc, RpcKind::LocalCacheResponseData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EvictionPolicy, LatencyModel, SerializationPolicy};
    use crate::fabric::Fabric;

    #[test]
    fn worker_registration_binds_both_ports() {
        let fabric = Fabric::new();
        fabric.borrow_mut().add_nic("10.0.0.1", 1_000_000.0);
        let mut ports = HashMap::new();
        ports.insert("10.0.0.1".to_string(), 9000u16);
        let mut cluster = Cluster::new(fabric, ports);
        let worker = cluster.add_worker(
            "10.0.0.1",
            9000,
            9001,
            2,
            SerializationPolicy::Lazy,
            EvictionPolicy::None,
            LatencyModel::ZERO,
            LatencyModel::ZERO,
        );
        assert_eq!(worker.ip, "10.0.0.1");
        assert_eq!(cluster.active_workers(), &["10.0.0.1".to_string()]);
    }
}
