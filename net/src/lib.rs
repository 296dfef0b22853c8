//! NetFabric: the point-to-point network fabric for chainsim.
//!
//! Grounded on the teacher's `timely_communication::networking` module
//! (`MessageHeader`, socket bootstrap) for the shape of a wire-level
//! request/header type, and on `examples/original_source/netsim.py` for the
//! actual entity model (`NetworkInterface`, `SwitchPort`, `Router`) this
//! crate implements. Unlike the teacher's module, nothing here opens a real
//! socket: every entity is a pure, synchronously-driven queue that the
//! simulation kernel (in the `chainsim` crate) advances by popping requests
//! and scheduling virtual-time delays for them.
#![forbid(missing_docs)]

mod error;
mod interface;
mod request;
mod router;
mod switch;

pub use error::NetError;
pub use interface::NetworkInterface;
pub use request::{FetchStatus, Request, RpcKind};
pub use router::Router;
pub use switch::SwitchPort;

/// An endpoint address: dotted-quad-style string, as used throughout the
/// topology YAML and trace files (`examples/original_source/cluster.py`
/// addresses nodes by plain IP strings, not a parsed `Ipv4Addr`).
pub type Ip = String;

/// A transport port number.
pub type Port = u16;

/// Transmission delay, in virtual time units, for `payload` over a link of
/// `rate_bps` bits/second.
///
/// Matches the testable property in the specification: `⌈8·size/rate⌉`.
pub fn transmit_delay(payload: chainsim_bytes::Payload, rate_bps: f64) -> f64 {
    assert!(rate_bps > 0.0, "link rate must be positive");
    (payload.bits() as f64 / rate_bps).ceil()
}

/// Strips the last dotted octet from an IPv4-style address string, giving
/// its containing subnet. `"10.0.1.5"` becomes `"10.0.1"`.
pub fn subnet_of(ip: &str) -> Option<&str> {
    ip.rsplit_once('.').map(|(prefix, _)| prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_delay_matches_ceiling_formula() {
        let p = chainsim_bytes::Payload::of_size(125);
        // 125 bytes * 8 bits = 1000 bits; at 300 bps -> ceil(1000/300) = 4.
        assert_eq!(transmit_delay(p, 300.0), 4.0);
    }

    #[test]
    fn subnet_strips_last_octet() {
        assert_eq!(subnet_of("10.0.1.5"), Some("10.0.1"));
        assert_eq!(subnet_of("gateway"), None);
    }
}
