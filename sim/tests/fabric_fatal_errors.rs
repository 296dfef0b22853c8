//! Exercises specification §7's "route or recipient miss is fatal"
//! contract at the [`Fabric`] driver level, not just inside `chainsim_net`'s
//! own unit tests (which only assert that `Router::route`/`NetworkInterface::
//! pop_inbound` themselves return `Err`, not that the simulation surfaces
//! it). A regression that turns `fabric.rs`'s propagation back into a silent
//! drop would make a run stall out at the horizon instead of failing fast
//! with a `NetError` -- these tests catch exactly that regression.

use chainsim::fabric::Fabric;
use chainsim::kernel::Kernel;
use chainsim_bytes::Payload;
use chainsim_logging::SimTime;
use chainsim_net::{FetchStatus, NetError, Request, RpcKind};

fn req(src: &str, dst: &str, dport: u16) -> Request {
    Request {
        time: SimTime::ZERO,
        req_id: 1,
        src_ip: src.into(),
        src_port: 0,
        dst_ip: dst.into(),
        dst_port: dport,
        rpc: RpcKind::FetchData,
        payload: Payload::of_size(1000),
        obj: "obj".into(),
        ser_wait: 0.0,
        deser_time: 0.0,
        status: FetchStatus::NotApplicable,
    }
}

/// A request addressed to an IP the router has no route to (no subnet
/// route, no directly-connected port) must abort the run with
/// `NetError::NoRoute`, not vanish into the port queue.
#[test]
fn route_miss_is_fatal_not_a_silent_drop() {
    let mut kernel = Kernel::new();
    kernel.set_horizon(SimTime::new(1000.0));
    let fabric = Fabric::new();
    {
        let mut f = fabric.borrow_mut();
        f.add_nic("10.0.0.1", 1_000_000.0);
        f.add_router("10.0.0.254", 4, 1_000_000.0);
    }
    fabric.borrow_mut().connect_nic("10.0.0.1", "10.0.0.254", false);
    // 10.0.0.99 is never connected and no subnet route covers it.

    Fabric::send(&fabric, &kernel, req("10.0.0.1", "10.0.0.99", 9));
    let drained = kernel.run();

    assert!(!drained, "a fatal network error must stop the run, not let it drain cleanly");
    assert!(
        matches!(kernel.take_net_error(), Some(NetError::NoRoute { .. })),
        "expected a recorded NoRoute error, found none"
    );
}

/// A request that reaches its destination interface but whose port has no
/// registered recipient must abort the run with `NetError::NoRecipient`,
/// not be silently swallowed by `drain_inbound`.
#[test]
fn missing_recipient_is_fatal_not_a_silent_drop() {
    let mut kernel = Kernel::new();
    kernel.set_horizon(SimTime::new(1000.0));
    let fabric = Fabric::new();
    {
        let mut f = fabric.borrow_mut();
        f.add_nic("10.0.0.1", 1_000_000.0);
        f.add_nic("10.0.0.2", 1_000_000.0);
        f.add_router("10.0.0.254", 4, 1_000_000.0);
    }
    fabric.borrow_mut().connect_nic("10.0.0.1", "10.0.0.254", false);
    fabric.borrow_mut().connect_nic("10.0.0.2", "10.0.0.254", false);
    // Port 9 on 10.0.0.2 is never registered via `register_recipient`.

    Fabric::send(&fabric, &kernel, req("10.0.0.1", "10.0.0.2", 9));
    let drained = kernel.run();

    assert!(!drained, "a fatal network error must stop the run, not let it drain cleanly");
    assert!(
        matches!(kernel.take_net_error(), Some(NetError::NoRecipient { .. })),
        "expected a recorded NoRecipient error, found none"
    );
}
