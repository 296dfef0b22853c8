use std::collections::VecDeque;

use crate::request::Request;
use crate::Ip;

/// A bandwidth-limited FIFO switch port with an optional queue-size limit.
///
/// Grounded on `examples/original_source/netsim.py`'s `SwitchPort`: on
/// overflow the message is dropped and `packets_drop` increments, with no
/// signal back to the sender (§4.2, §7 "soft" error). Transmit timing
/// itself is driven the same way as [`crate::NetworkInterface`]: the kernel
/// pops one message at a time and computes its own delay from `rate_bps`.
#[derive(Debug, Clone)]
pub struct SwitchPort {
    rate_bps: f64,
    byte_limit: Option<u64>,
    packet_limit: Option<usize>,
    queue: VecDeque<Request>,
    queued_bytes: u64,
    bound_ip: Option<Ip>,
    is_gateway: bool,
    /// Count of messages dropped for exceeding a configured queue limit.
    pub packets_drop: u64,
}

impl SwitchPort {
    /// Creates an unbound port with link rate `rate_bps` and no queue
    /// limits (unbounded queueing, the specification's default).
    pub fn new(rate_bps: f64) -> Self {
        SwitchPort {
            rate_bps,
            byte_limit: None,
            packet_limit: None,
            queue: VecDeque::new(),
            queued_bytes: 0,
            bound_ip: None,
            is_gateway: false,
            packets_drop: 0,
        }
    }

    /// Sets a byte-count queue limit.
    pub fn with_byte_limit(mut self, limit: u64) -> Self {
        self.byte_limit = Some(limit);
        self
    }

    /// Sets a packet-count queue limit.
    pub fn with_packet_limit(mut self, limit: usize) -> Self {
        self.packet_limit = Some(limit);
        self
    }

    /// The port's outbound link rate, in bits/second.
    pub fn rate_bps(&self) -> f64 {
        self.rate_bps
    }

    /// True if this port is free (not yet bound to a sink).
    pub fn is_free(&self) -> bool {
        self.bound_ip.is_none()
    }

    /// Binds this port to `sink_ip`, optionally as the router's default
    /// gateway port.
    pub fn bind(&mut self, sink_ip: Ip, as_gateway: bool) {
        self.bound_ip = Some(sink_ip);
        self.is_gateway = as_gateway;
    }

    /// The address this port is bound to, if any.
    pub fn bound_ip(&self) -> Option<&str> {
        self.bound_ip.as_deref()
    }

    /// True if this port was marked as the router's default gateway.
    pub fn is_gateway(&self) -> bool {
        self.is_gateway
    }

    /// Attempts to enqueue `req`. Returns `true` if accepted, `false` if
    /// dropped for exceeding a configured limit (and increments
    /// `packets_drop` in that case).
    pub fn try_enqueue(&mut self, req: Request) -> bool {
        let would_be_bytes = self.queued_bytes + req.payload.len();
        if let Some(limit) = self.byte_limit {
            if would_be_bytes > limit {
                self.packets_drop += 1;
                return false;
            }
        }
        if let Some(limit) = self.packet_limit {
            if self.queue.len() + 1 > limit {
                self.packets_drop += 1;
                return false;
            }
        }
        self.queued_bytes = would_be_bytes;
        self.queue.push_back(req);
        true
    }

    /// True if a message is queued for transmission.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pops the next message in FIFO order.
    pub fn pop(&mut self) -> Option<Request> {
        let req = self.queue.pop_front();
        if let Some(r) = &req {
            self.queued_bytes -= r.payload.len();
        }
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsim_bytes::Payload;
    use chainsim_logging::SimTime;
    use crate::request::{FetchStatus, RpcKind};

    fn req_of_size(bytes: u64) -> Request {
        Request {
            time: SimTime::ZERO,
            req_id: 0,
            src_ip: "a".into(),
            src_port: 0,
            dst_ip: "b".into(),
            dst_port: 0,
            rpc: RpcKind::FetchData,
            payload: Payload::of_size(bytes),
            obj: "obj".into(),
            ser_wait: 0.0,
            deser_time: 0.0,
            status: FetchStatus::NotApplicable,
        }
    }

    #[test]
    fn third_message_dropped_at_byte_limit() {
        // Matches end-to-end scenario 6: a 2 KB byte-limit port receiving
        // three 1 KB messages back to back drops the third.
        let mut port = SwitchPort::new(1_000_000.0).with_byte_limit(2048);
        assert!(port.try_enqueue(req_of_size(1024)));
        assert!(port.try_enqueue(req_of_size(1024)));
        assert!(!port.try_enqueue(req_of_size(1024)));
        assert_eq!(port.packets_drop, 1);
        assert!(port.pop().is_some());
        assert!(port.pop().is_some());
        assert!(port.pop().is_none());
    }

    #[test]
    fn packet_limit_independent_of_size() {
        let mut port = SwitchPort::new(1_000_000.0).with_packet_limit(1);
        assert!(port.try_enqueue(req_of_size(1)));
        assert!(!port.try_enqueue(req_of_size(1)));
        assert_eq!(port.packets_drop, 1);
    }

    #[test]
    fn unbounded_by_default() {
        let mut port = SwitchPort::new(1_000_000.0);
        for _ in 0..1000 {
            assert!(port.try_enqueue(req_of_size(10_000)));
        }
        assert_eq!(port.packets_drop, 0);
    }
}
