use crate::{Ip, Port};

/// Failures raised by the network fabric at simulation runtime.
///
/// Both variants are fatal per the specification: a route or recipient miss
/// indicates a topology bug, not a transient condition the simulation can
/// route around.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A request arrived at an interface's local queue for a `dport` with
    /// no registered flow.
    #[error("no recipient registered for {ip}:{port}")]
    NoRecipient {
        /// The interface's own address.
        ip: Ip,
        /// The destination port that had no registered flow.
        port: Port,
    },

    /// A router could not resolve a destination to any port: no exact
    /// match, no subnet match, and no default gateway.
    #[error("no route to {dst}")]
    NoRoute {
        /// The unroutable destination address.
        dst: Ip,
    },

    /// `Router::connect` was called with no free ports remaining.
    #[error("router {router} has no free ports left")]
    NoFreePorts {
        /// The router that ran out of ports.
        router: Ip,
    },
}
