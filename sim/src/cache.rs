//! CacheEngine: per-worker in-memory object cache (specification §4.3).
//!
//! Grounded on `examples/original_source/storage.py`'s `Cache`. `insert`
//! and `peek` are continuation-taking rather than generator-based (no
//! `yield`): `peek`'s caller supplies the "rest of the computation" to run
//! once the object is visible, matching the kernel's callback style
//! throughout this crate (see `kernel.rs`'s module doc for why).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chainsim_bytes::Payload;
use chainsim_net::Request;

use crate::kernel::{Kernel, SimEvent};

/// Governs whether producers and local readers block on (de)serialization
/// latency (specification §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationPolicy {
    /// Producer does not block on serialization; local readers do not
    /// wait either.
    Lazy,
    /// Producer blocks on serialization finishing; local readers incur
    /// deserialization latency on hit.
    SyncWDeser,
    /// Producer blocks on serialization; local readers do not deserialize.
    SyncNoDeser,
}

/// Cache eviction policy. Specification §9: capacity is advisory and no
/// eviction is required of the core; `None` is the default and the only
/// variant this crate actually implements behavior for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Never evict (the only behavior implemented).
    #[default]
    None,
    /// Reserved for a future first-in-first-out eviction policy.
    Fifo,
    /// Reserved for a future least-recently-used eviction policy.
    Lru,
}

struct Entry {
    size: Payload,
    pending: Option<SimEvent<Payload>>,
}

/// The result of a [`Cache::peek`]: hit size (0 for a miss) and any time
/// spent waiting on a concurrent insertion's serialization.
#[derive(Debug, Clone, Copy)]
pub struct PeekResult {
    /// Object size, or `Payload::EMPTY` if absent.
    pub size: Payload,
    /// Time spent suspended waiting for serialization to finish.
    pub ser_wait_time: f64,
}

/// A model for (de)serialization latency as a function of object size.
///
/// Grounded on `examples/original_source/utils.py`'s `fit_serialization`/
/// `fit_deserialization` (regression fits over measured (de)serialization
/// costs); chainsim exposes the same shape, a simple affine model, so a
/// `ConfigFacade` loader can plug in measured coefficients without this
/// crate knowing anything about curve-fitting.
#[derive(Debug, Clone, Copy)]
pub struct LatencyModel {
    /// Fixed overhead, independent of size.
    pub fixed: f64,
    /// Additional cost per byte.
    pub per_byte: f64,
}

impl LatencyModel {
    /// A model with no cost at all (useful for tests and traces that do
    /// not specify latency coefficients).
    pub const ZERO: LatencyModel = LatencyModel { fixed: 0.0, per_byte: 0.0 };

    /// The latency for an object of the given size.
    pub fn latency(&self, size: Payload) -> f64 {
        self.fixed + self.per_byte * size.len() as f64
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        LatencyModel::ZERO
    }
}

/// A worker's object cache, request-queue-serialized (specification §5:
/// "Each cache is owned by exactly one worker; all access is serialized
/// through its request queue" -- here, simply through `&mut`/`RefCell`
/// access from a single-threaded kernel, so no explicit queue is needed).
pub struct Cache {
    /// The IP of the worker this cache belongs to.
    pub owner_ip: String,
    pub(crate) serialization_policy: SerializationPolicy,
    #[allow(dead_code)]
    eviction_policy: EvictionPolicy,
    serialization_model: LatencyModel,
    deserialization_model: LatencyModel,
    entries: HashMap<String, Entry>,
}

impl Cache {
    /// Creates an empty cache for the worker at `owner_ip`.
    pub fn new(
        owner_ip: impl Into<String>,
        serialization_policy: SerializationPolicy,
        eviction_policy: EvictionPolicy,
        serialization_model: LatencyModel,
        deserialization_model: LatencyModel,
    ) -> Self {
        Cache {
            owner_ip: owner_ip.into(),
            serialization_policy,
            eviction_policy,
            serialization_model,
            deserialization_model,
            entries: HashMap::new(),
        }
    }

    /// This cache's effective serialization policy.
    pub fn serialization_policy(&self) -> SerializationPolicy {
        self.serialization_policy
    }

    /// The deserialization latency model (used by the executor to charge
    /// remote/local readers on hit).
    pub fn deserialization_model(&self) -> LatencyModel {
        self.deserialization_model
    }

    /// The serialization latency model (used by the executor to populate
    /// a task's `serialization_time` accounting field).
    pub fn serialization_model(&self) -> LatencyModel {
        self.serialization_model
    }

    /// Inserts `name`/`size` into the cache, becoming visible to `peek`
    /// immediately but marked pending until `serialization_latency`
    /// elapses, at which point the returned event fires. The entry's
    /// `size` is visible via `peek` from the moment `insert` is called,
    /// regardless of pending state -- matching
    /// `examples/original_source/storage.py::Cache.insert`, which writes
    /// into `self.cache` before the serialization `yield`.
    pub fn insert(this: &Rc<RefCell<Self>>, kernel: &Kernel, name: impl Into<String>, size: Payload) -> SimEvent<Payload> {
        let name = name.into();
        let pending: SimEvent<Payload> = SimEvent::new();
        let latency = this.borrow().serialization_model.latency(size);
        tracing::trace!(owner = %this.borrow().owner_ip, object = %name, bytes = size.len(), latency, "cache insert");
        this.borrow_mut().entries.insert(name.clone(), Entry { size, pending: Some(pending.clone()) });

        let cache = this.clone();
        let pending_clone = pending.clone();
        let entry_name = name;
        kernel.after(latency, move |k| {
            if let Some(e) = cache.borrow_mut().entries.get_mut(&entry_name) {
                e.pending = None;
            }
            pending_clone.succeed(k, size);
        });
        pending
    }

    /// Looks up `key`. If present and pending with `wait == true`, suspends
    /// `then` on the pending insertion; otherwise invokes `then`
    /// immediately (scheduled at the current time) with whatever size is
    /// currently visible (0 if absent).
    pub fn peek(this: &Rc<RefCell<Self>>, kernel: &Kernel, key: &str, wait: bool, then: impl FnOnce(&mut Kernel, PeekResult) + 'static) {
        let (size, pending) = {
            let this = this.borrow();
            match this.entries.get(key) {
                Some(e) => (e.size, e.pending.clone()),
                None => (Payload::EMPTY, None),
            }
        };
        match pending {
            Some(p) if wait => {
                let wait_start = kernel.now();
                p.on(kernel, move |k, _| {
                    let ser_wait_time = k.now() - wait_start;
                    then(k, PeekResult { size, ser_wait_time });
                });
            }
            _ => {
                kernel.after(0.0, move |k| then(k, PeekResult { size, ser_wait_time: 0.0 }));
            }
        }
    }

    /// Translates an incoming `fetch_data`/`fetch_from_local_cache`
    /// request into a hit or miss response, gated by the effective
    /// serialization policy: a local request (its `src_ip` equals this
    /// cache's `owner_ip`) bypasses waiting unless the policy is
    /// `SyncWDeser`; a remote request always waits (specification §4.3,
    /// grounded on `storage.py::Cache.run`'s
    /// `req.src == self.out_port.ip` gate).
    pub fn handle_request(this: &Rc<RefCell<Self>>, kernel: &Kernel, req: Request, respond: impl FnOnce(&mut Kernel, Request) + 'static) {
        let (owner_ip, policy) = {
            let this = this.borrow();
            (this.owner_ip.clone(), this.serialization_policy)
        };
        let is_local = req.src_ip == owner_ip;
        let wait = !(is_local && policy != SerializationPolicy::SyncWDeser);
        let key = req.obj.clone();
        Cache::peek(this, kernel, &key, wait, move |k, result| {
            use chainsim_net::{FetchStatus, RpcKind};
            let rpc = if is_local { RpcKind::LocalCacheResponseData } else { RpcKind::CacheResponseData };
            let status = if result.size.is_empty() { FetchStatus::Miss } else { FetchStatus::Hit };
            tracing::trace!(owner = %owner_ip, object = %key, local = is_local, hit = matches!(status, FetchStatus::Hit), "cache request resolved");
            let resp = Request {
                time: k.now(),
                req_id: req.req_id,
                src_ip: owner_ip,
                src_port: req.dst_port,
                dst_ip: req.src_ip,
                dst_port: req.src_port,
                rpc,
                payload: result.size,
                obj: req.obj,
                ser_wait: result.ser_wait_time,
                deser_time: 0.0,
                status,
            };
            respond(k, resp);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(policy: SerializationPolicy) -> Rc<RefCell<Cache>> {
        Rc::new(RefCell::new(Cache::new(
            "10.0.0.1",
            policy,
            EvictionPolicy::None,
            LatencyModel { fixed: 5.0, per_byte: 0.0 },
            LatencyModel::ZERO,
        )))
    }

    #[test]
    fn insert_then_peek_without_wait_sees_size_immediately() {
        let mut kernel = Kernel::new();
        let cache = cache(SerializationPolicy::Lazy);
        Cache::insert(&cache, &kernel, "o1", Payload::of_size(100));
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        Cache::peek(&cache, &kernel, "o1", false, move |_, r| *seen2.borrow_mut() = Some(r.size));
        kernel.run();
        assert_eq!(seen.borrow().unwrap().len(), 100);
    }

    #[test]
    fn waiting_peek_blocks_until_serialization_completes() {
        let mut kernel = Kernel::new();
        let cache = cache(SerializationPolicy::SyncWDeser);
        Cache::insert(&cache, &kernel, "o1", Payload::of_size(10));
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        Cache::peek(&cache, &kernel, "o1", true, move |k, r| *seen2.borrow_mut() = Some((k.now(), r.ser_wait_time)));
        kernel.run();
        let (t, wait) = seen.borrow().unwrap();
        assert_eq!(t, crate::kernel::SimTime::new(5.0));
        assert_eq!(wait, 5.0);
    }

    #[test]
    fn insert_visibility_persists_after_completion() {
        // Cache insert visibility property (specification §8): after
        // insert completes, a non-waiting peek keeps returning the size.
        let mut kernel = Kernel::new();
        let cache = cache(SerializationPolicy::Lazy);
        Cache::insert(&cache, &kernel, "o1", Payload::of_size(42));
        kernel.run();
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        Cache::peek(&cache, &kernel, "o1", false, move |_, r| *seen2.borrow_mut() = Some(r));
        kernel.run();
        let r = seen.borrow().unwrap();
        assert_eq!(r.size.len(), 42);
        assert_eq!(r.ser_wait_time, 0.0);
    }

    #[test]
    fn missing_key_is_a_miss() {
        let mut kernel = Kernel::new();
        let cache = cache(SerializationPolicy::Lazy);
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        Cache::peek(&cache, &kernel, "missing", false, move |_, r| *seen2.borrow_mut() = Some(r.size));
        kernel.run();
        assert!(seen.borrow().unwrap().is_empty());
    }
}
