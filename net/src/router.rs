use crate::error::NetError;
use crate::switch::SwitchPort;
use crate::{subnet_of, Ip};

/// A static-route-table switch, grounded on
/// `examples/original_source/netsim.py`'s `Router`: a fixed bank of
/// [`SwitchPort`]s, connected to sinks at topology-construction time, and a
/// route table resolved exact-IP first, then by subnet, then by default
/// gateway (specification §4.2).
///
/// Route-table writes happen only through [`Router::connect`] and
/// [`Router::add_subnet_route`], both intended to run during topology
/// construction; `route` never mutates state, matching the
/// read-only-during-simulation guarantee in specification §5.
pub struct Router {
    ip: Ip,
    ports: Vec<SwitchPort>,
    free: Vec<usize>,
    exact: std::collections::HashMap<Ip, usize>,
    subnet: std::collections::HashMap<String, usize>,
    gateway: Option<usize>,
}

impl Router {
    /// Creates a router with `n_ports` free ports, each with link rate
    /// `rate_bps`.
    pub fn new(ip: impl Into<Ip>, n_ports: usize, rate_bps: f64) -> Self {
        let ports: Vec<SwitchPort> = (0..n_ports).map(|_| SwitchPort::new(rate_bps)).collect();
        let free = (0..n_ports).collect();
        Router {
            ip: ip.into(),
            ports,
            free,
            exact: std::collections::HashMap::new(),
            subnet: std::collections::HashMap::new(),
            gateway: None,
        }
    }

    /// This router's own address.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Binds the next free port to `sink_ip`, registering it as an exact
    /// route and, if `as_gateway`, as the default gateway for any
    /// destination with no more specific match.
    pub fn connect(&mut self, sink_ip: impl Into<Ip>, as_gateway: bool) -> Result<usize, NetError> {
        let port_id = self.free.pop().ok_or_else(|| NetError::NoFreePorts { router: self.ip.clone() })?;
        let sink_ip = sink_ip.into();
        self.ports[port_id].bind(sink_ip.clone(), as_gateway);
        self.exact.insert(sink_ip, port_id);
        if as_gateway {
            self.gateway = Some(port_id);
        }
        Ok(port_id)
    }

    /// Registers `subnet` (a truncated IP prefix, e.g. `"10.0.1"`) as
    /// routed through `port_id`, for domain-level routing between
    /// sub-networks.
    pub fn add_subnet_route(&mut self, subnet: impl Into<String>, port_id: usize) {
        self.subnet.insert(subnet.into(), port_id);
    }

    /// Resolves `dst_ip` to a port id: exact match, then subnet match,
    /// then the default gateway, in that order.
    pub fn route(&self, dst_ip: &str) -> Result<usize, NetError> {
        if let Some(&p) = self.exact.get(dst_ip) {
            return Ok(p);
        }
        if let Some(prefix) = subnet_of(dst_ip) {
            if let Some(&p) = self.subnet.get(prefix) {
                return Ok(p);
            }
        }
        self.gateway.ok_or_else(|| NetError::NoRoute { dst: dst_ip.to_string() })
    }

    /// Mutable access to a port by id, for enqueueing/popping traffic.
    pub fn port_mut(&mut self, port_id: usize) -> &mut SwitchPort {
        &mut self.ports[port_id]
    }

    /// Number of ports on this router.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }
}
