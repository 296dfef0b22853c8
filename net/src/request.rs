use chainsim_bytes::Payload;
use chainsim_logging::SimTime;

use crate::{Ip, Port};

/// The wire message exchanged between every pair of NetFabric entities.
///
/// Grounded on `examples/original_source/netsim.py`'s `Request` and on the
/// data model in the specification §3. `payload` stands in for the
/// Python original's `data` dict plus its `__sizeof__`-derived `size`: a
/// request never actually carries object bytes, only the byte count that
/// determines its transmission delay.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Time the request was created (for wait-time accounting).
    pub time: SimTime,
    /// Monotonically increasing id used to correlate a response.
    pub req_id: u64,
    /// Source address, stamped by the sending `NetworkInterface::put`.
    pub src_ip: Ip,
    /// Source port.
    pub src_port: Port,
    /// Destination address.
    pub dst_ip: Ip,
    /// Destination port.
    pub dst_port: Port,
    /// The RPC this request carries.
    pub rpc: RpcKind,
    /// Wire payload size.
    pub payload: Payload,
    /// Name of the object this request fetches or reports on.
    pub obj: String,
    /// Serialization wait incurred before this response was produced, if
    /// any (cache hit responses only): time the requester spent blocked on
    /// a concurrent producer's still-pending serialization.
    pub ser_wait: f64,
    /// Deserialization latency the requester must additionally pay before
    /// this hit's payload is usable, per the cache's effective
    /// serialization policy (specification §4.3): always charged to remote
    /// readers, charged to local readers only under `syncwdeser`.
    pub deser_time: f64,
    /// Hit/miss outcome, for fetch responses.
    pub status: FetchStatus,
}

/// Outcome of a fetch, carried on response requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Not a fetch response.
    NotApplicable,
    /// The object was present.
    Hit,
    /// The object was absent.
    Miss,
}

/// The RPC kinds exchanged between executors, caches, and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    /// A fetch for a remote object.
    FetchData,
    /// A fetch for an object expected to be in the local cache.
    FetchFromLocalCache,
    /// A cache's response to a remote `FetchData`.
    CacheResponseData,
    /// A cache's response to a local `FetchFromLocalCache`.
    LocalCacheResponseData,
    /// A storage node's response to a `FetchData` for cold data.
    ResponseData,
}

impl Request {
    /// True if this request's `rpc` is a response carrying a cache/storage
    /// hit (non-empty payload), as opposed to a fetch or a miss.
    pub fn is_hit_response(&self) -> bool {
        matches!(
            self.rpc,
            RpcKind::CacheResponseData | RpcKind::LocalCacheResponseData | RpcKind::ResponseData
        ) && !self.payload.is_empty()
    }
}
