use std::collections::{HashSet, VecDeque};

use crate::error::NetError;
use crate::request::Request;
use crate::{Ip, Port};

/// A worker's or storage node's network interface card.
///
/// Two queues, exactly as in the specification §4.2: `put` routes an
/// incoming request to the local `in` queue (if addressed here) or the
/// outbound `out` queue (stamping the source address first). The `out`
/// queue is drained one message at a time by the simulation kernel, which
/// computes each send's [`crate::transmit_delay`] and schedules the next
/// pop only after that delay elapses — this struct only holds the queue
/// state, it does not itself schedule anything.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    ip: Ip,
    rate_bps: f64,
    in_queue: VecDeque<Request>,
    out_queue: VecDeque<Request>,
    flows: HashSet<Port>,
}

impl NetworkInterface {
    /// Creates an interface bound to `ip` with outbound link rate `rate_bps`.
    pub fn new(ip: impl Into<Ip>, rate_bps: f64) -> Self {
        NetworkInterface {
            ip: ip.into(),
            rate_bps,
            in_queue: VecDeque::new(),
            out_queue: VecDeque::new(),
            flows: HashSet::new(),
        }
    }

    /// This interface's address.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// The interface's outbound link rate, in bits/second.
    pub fn rate_bps(&self) -> f64 {
        self.rate_bps
    }

    /// Registers a local port as having a recipient (a cache, storage, or
    /// executor callback) so `pop_in` does not fail with `NoRecipient`.
    pub fn add_flow(&mut self, port: Port) {
        self.flows.insert(port);
    }

    /// Routes `req`: local delivery if addressed to this interface,
    /// otherwise enqueues outbound after stamping the source address.
    pub fn put(&mut self, mut req: Request) {
        if req.dst_ip == self.ip {
            self.in_queue.push_back(req);
        } else {
            req.src_ip = self.ip.clone();
            self.out_queue.push_back(req);
        }
    }

    /// True if there is a request waiting to be sent.
    pub fn has_outbound(&self) -> bool {
        !self.out_queue.is_empty()
    }

    /// Pops the next outbound request, in FIFO order (preserves the
    /// ordering-preservation testable property for same-source-same-dest
    /// traffic).
    pub fn pop_outbound(&mut self) -> Option<Request> {
        self.out_queue.pop_front()
    }

    /// True if there is a request waiting for local dispatch.
    pub fn has_inbound(&self) -> bool {
        !self.in_queue.is_empty()
    }

    /// Pops and dispatches the next inbound request to its `dst_port`.
    ///
    /// Fails with [`NetError::NoRecipient`] if no flow was registered for
    /// that port; this is a fatal condition per the specification §4.2.
    pub fn pop_inbound(&mut self) -> Result<Request, NetError> {
        let req = self.in_queue.pop_front().expect("caller checked has_inbound");
        if self.flows.contains(&req.dst_port) {
            Ok(req)
        } else {
            Err(NetError::NoRecipient { ip: self.ip.clone(), port: req.dst_port })
        }
    }
}
