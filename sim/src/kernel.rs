//! The virtual-time cooperative event loop (specification §4.1).
//!
//! Grounded on two corpus references rather than the teacher's own
//! `scheduling::Activations` (which tracks dataflow-operator activation with
//! no notion of elapsed time, and so has nothing to say about `timeout`):
//! `other_examples/.../ndebuhr-sim.../processor.rs`'s explicit
//! `until_next_event` timer-delta state machine, and
//! `other_examples/.../dslab.../scheduler.rs`'s synchronous
//! `submit`/`complete` handler dispatch. Both are real, compiling Rust
//! discrete-event-simulation crates that avoid `async`/`await` entirely;
//! chainsim follows suit; a hand-rolled `Waker`-based executor would add a
//! second way to get suspension wrong for no expressive benefit over plain
//! continuation closures scheduled on a time-ordered heap.
//!
//! The teacher's pervasive `Rc<RefCell<...>>` single-threaded shared
//! mutability idiom (`worker.rs`'s `paths`, `activations`, `identifiers`) is
//! kept: [`Kernel`] is a cheap `Rc<RefCell<Inner>>` handle, cloned freely by
//! every component that needs to schedule continuations.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

use chainsim_net::NetError;

pub use chainsim_logging::SimTime;

/// A boxed one-shot continuation: "the rest of the computation" to run once
/// its wait condition resolves.
type Continuation = Box<dyn FnOnce(&mut Kernel)>;

struct Scheduled {
    time: SimTime,
    seq: u64,
    action: Continuation,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Ascending by (time, seq): combined with `Reverse` in the
        // `BinaryHeap`, this pops the earliest-scheduled, lowest-sequence
        // entry first -- i.e. FIFO among same-time entries, per spec §4.1.
        self.time.cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

struct Inner {
    now: SimTime,
    seq: u64,
    heap: BinaryHeap<Reverse<Scheduled>>,
    horizon: Option<SimTime>,
    fatal_net_error: Option<NetError>,
}

/// The simulation kernel: a cloneable handle onto a shared virtual-time
/// priority queue.
///
/// Cloning a `Kernel` is cheap (an `Rc` bump) and is how every component
/// (executors, caches, CPUs, NICs) gets to schedule its own continuations
/// without a central dispatcher routing on their behalf.
#[derive(Clone)]
pub struct Kernel {
    inner: Rc<RefCell<Inner>>,
}

impl Kernel {
    /// Creates a kernel at time zero with no horizon.
    pub fn new() -> Self {
        Kernel {
            inner: Rc::new(RefCell::new(Inner {
                now: SimTime::ZERO,
                seq: 0,
                heap: BinaryHeap::new(),
                horizon: None,
                fatal_net_error: None,
            })),
        }
    }

    /// The current virtual time.
    pub fn now(&self) -> SimTime {
        self.inner.borrow().now
    }

    /// Sets a hard horizon: the loop stops before running any event
    /// scheduled strictly after this time. Used to detect a stalled
    /// simulation (specification §7, "the core simulator ... lets the job
    /// stall, visible via horizon timeout").
    pub fn set_horizon(&self, at: SimTime) {
        self.inner.borrow_mut().horizon = Some(at);
    }

    /// Records `err` as the run's fatal network error, if none has been
    /// recorded yet (first one wins, matching
    /// [`crate::scheduler::Scheduler::first_error`]'s deferred-error
    /// convention). A route or recipient miss is fatal per specification
    /// §7 ("indicates a topology bug"), not a condition the simulation can
    /// route around, so [`Kernel::run`] stops at the next loop iteration
    /// once this is set rather than continuing toward a horizon timeout.
    pub fn record_net_error(&self, err: NetError) {
        let mut inner = self.inner.borrow_mut();
        if inner.fatal_net_error.is_none() {
            inner.fatal_net_error = Some(err);
        }
    }

    /// Takes the first recorded fatal network error, if any.
    pub fn take_net_error(&self) -> Option<NetError> {
        self.inner.borrow_mut().fatal_net_error.take()
    }

    fn next_seq(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.seq;
        inner.seq += 1;
        seq
    }

    /// Schedules `action` to run `delay` time units from now.
    ///
    /// `delay` must be non-negative; a delay of `0.0` still goes through
    /// the heap, preserving FIFO ordering among same-time continuations.
    pub fn after(&self, delay: f64, action: impl FnOnce(&mut Kernel) + 'static) {
        assert!(delay >= 0.0, "cannot schedule into the past");
        let seq = self.next_seq();
        let time = self.now().advance(delay);
        self.inner.borrow_mut().heap.push(Reverse(Scheduled { time, seq, action: Box::new(action) }));
    }

    /// Schedules a cancellable continuation. The returned [`TimerHandle`]
    /// can be used to suppress the action if it fires after cancellation;
    /// this is the kernel's only interruptible primitive (specification
    /// §4.1, §5), used by [`crate::cpu::CpuShare`] to recompute finish
    /// times as concurrency changes.
    pub fn after_cancellable(&self, delay: f64, action: impl FnOnce(&mut Kernel) + 'static) -> TimerHandle {
        let cancelled = Rc::new(Cell::new(false));
        let flag = cancelled.clone();
        self.after(delay, move |k| {
            if !flag.get() {
                action(k);
            }
        });
        TimerHandle { cancelled }
    }

    /// Runs the event loop until the heap is empty or the horizon is
    /// reached.
    ///
    /// Returns `true` if the loop drained naturally (no more events),
    /// `false` if it stopped early because of the horizon -- a stalled
    /// simulation per specification §7.
    pub fn run(&mut self) -> bool {
        loop {
            if self.inner.borrow().fatal_net_error.is_some() {
                return false;
            }
            let next = {
                let mut inner = self.inner.borrow_mut();
                inner.heap.pop()
            };
            match next {
                None => return true,
                Some(Reverse(scheduled)) => {
                    let stop = {
                        let inner = self.inner.borrow();
                        matches!(inner.horizon, Some(h) if scheduled.time > h)
                    };
                    if stop {
                        tracing::debug!(at = ?scheduled.time, "kernel hit its horizon with events still pending");
                        // Put it back so a caller inspecting the kernel
                        // afterward can see what was still pending.
                        let seq = scheduled.seq;
                        let time = scheduled.time;
                        self.inner.borrow_mut().heap.push(Reverse(Scheduled { time, seq, action: scheduled.action }));
                        return false;
                    }
                    self.inner.borrow_mut().now = scheduled.time;
                    (scheduled.action)(self);
                }
            }
        }
    }

    /// True if no events remain pending.
    pub fn is_idle(&self) -> bool {
        self.inner.borrow().heap.is_empty()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

/// A handle that can cancel a still-pending [`Kernel::after_cancellable`]
/// continuation.
///
/// Cancelling after the continuation has already run is a harmless no-op.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    /// Suppresses the pending continuation, if it has not already run.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }
}

struct EventInner<V> {
    value: Option<V>,
    waiters: Vec<Box<dyn FnOnce(&mut Kernel, V)>>,
}

/// A one-shot condition with a value, corresponding to `simpy.events.Event`
/// by way of the specification's `event()` primitive.
///
/// `SimEvent` fires at most once ([`SimEvent::succeed`]); registering a
/// callback after it has already fired invokes the callback immediately
/// (scheduled at the current time, so it still goes through the kernel's
/// FIFO-at-equal-time ordering) with the stored value, per specification
/// §9 "Task lifetime".
pub struct SimEvent<V> {
    inner: Rc<RefCell<EventInner<V>>>,
}

impl<V> Clone for SimEvent<V> {
    fn clone(&self) -> Self {
        SimEvent { inner: self.inner.clone() }
    }
}

impl<V: Clone + 'static> SimEvent<V> {
    /// Creates a not-yet-fired event.
    pub fn new() -> Self {
        SimEvent { inner: Rc::new(RefCell::new(EventInner { value: None, waiters: Vec::new() })) }
    }

    /// True if the event has already fired.
    pub fn is_fired(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    /// Fires the event with `value`, waking every currently registered
    /// waiter. Firing an already-fired event panics: completion events are
    /// documented (specification §3) to fire at most once.
    pub fn succeed(&self, kernel: &Kernel, value: V) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            assert!(inner.value.is_none(), "SimEvent fired more than once");
            inner.value = Some(value.clone());
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            let v = value.clone();
            kernel.after(0.0, move |k| waiter(k, v));
        }
    }

    /// Registers `cb` to run once the event fires (or immediately, at the
    /// current time, if it already has).
    pub fn on(&self, kernel: &Kernel, cb: impl FnOnce(&mut Kernel, V) + 'static) {
        let existing = self.inner.borrow().value.clone();
        match existing {
            Some(v) => kernel.after(0.0, move |k| cb(k, v)),
            None => self.inner.borrow_mut().waiters.push(Box::new(cb)),
        }
    }
}

impl<V: Clone + 'static> Default for SimEvent<V> {
    fn default() -> Self {
        SimEvent::new()
    }
}

/// Waits for every event in `events` to fire, then invokes `then` with
/// their values in the same order -- the specification's `all_of`
/// composite wait.
pub fn all_of<V: Clone + 'static>(
    kernel: &Kernel,
    events: Vec<SimEvent<V>>,
    then: impl FnOnce(&mut Kernel, Vec<V>) + 'static,
) {
    if events.is_empty() {
        kernel.after(0.0, move |k| then(k, Vec::new()));
        return;
    }
    let total = events.len();
    let remaining = Rc::new(Cell::new(total));
    let results: Rc<RefCell<Vec<Option<V>>>> = Rc::new(RefCell::new((0..total).map(|_| None).collect()));
    let then = Rc::new(RefCell::new(Some(then)));
    for (index, event) in events.into_iter().enumerate() {
        let remaining = remaining.clone();
        let results = results.clone();
        let then = then.clone();
        event.on(kernel, move |k, value| {
            results.borrow_mut()[index] = Some(value);
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                if let Some(cb) = then.borrow_mut().take() {
                    let collected = results.borrow_mut().drain(..).map(|o| o.expect("all resolved")).collect();
                    cb(k, collected);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdCell;

    #[test]
    fn timeout_fires_at_correct_time() {
        let mut kernel = Kernel::new();
        let seen = Rc::new(StdCell::new(None));
        let seen2 = seen.clone();
        kernel.after(5.0, move |k| seen2.set(Some(k.now())));
        kernel.run();
        assert_eq!(seen.get(), Some(SimTime::new(5.0)));
    }

    #[test]
    fn equal_time_events_fire_fifo() {
        let mut kernel = Kernel::new();
        let order = Rc::new(StdCell::new(Vec::<u32>::new()));
        for i in 0..5u32 {
            let order = order.clone();
            kernel.after(0.0, move |_| {
                let mut v = order.take();
                v.push(i);
                order.set(v);
            });
        }
        kernel.run();
        assert_eq!(order.take(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut kernel = Kernel::new();
        let fired = Rc::new(StdCell::new(false));
        let fired2 = fired.clone();
        let handle = kernel.after_cancellable(10.0, move |_| fired2.set(true));
        handle.cancel();
        kernel.run();
        assert!(!fired.get());
    }

    #[test]
    fn event_invokes_late_registration_immediately() {
        let mut kernel = Kernel::new();
        let event: SimEvent<u32> = SimEvent::new();
        event.succeed(&kernel, 7);
        let seen = Rc::new(StdCell::new(None));
        let seen2 = seen.clone();
        event.on(&kernel, move |_, v| seen2.set(Some(v)));
        kernel.run();
        assert_eq!(seen.get(), Some(7));
    }

    #[test]
    fn all_of_waits_for_every_event() {
        let mut kernel = Kernel::new();
        let e1: SimEvent<u32> = SimEvent::new();
        let e2: SimEvent<u32> = SimEvent::new();
        let done = Rc::new(StdCell::new(None));
        let done2 = done.clone();
        all_of(&kernel, vec![e1.clone(), e2.clone()], move |_, values| {
            done2.set(Some(values));
        });
        kernel.after(1.0, {
            let e1 = e1.clone();
            move |k| e1.succeed(k, 1)
        });
        kernel.after(2.0, move |k| e2.succeed(k, 2));
        kernel.run();
        assert_eq!(done.take(), Some(vec![1, 2]));
    }

    #[test]
    fn horizon_stops_the_loop() {
        let mut kernel = Kernel::new();
        kernel.set_horizon(SimTime::new(5.0));
        kernel.after(10.0, |_| {});
        let drained = kernel.run();
        assert!(!drained);
        assert!(!kernel.is_idle());
    }
}
