//! Virtual-time event log registry.
//!
//! Grounded on the teacher's `timely_logging::{Registry, Logger}` (a
//! wall-clock-`Instant`-based buffering logger used throughout timely
//! dataflow for operator/communication tracing). A deterministic
//! discrete-event simulator cannot let wall-clock time leak into its logs —
//! two runs of the same trace must produce byte-identical logs — so every
//! timestamp here is the simulator's own [`SimTime`], stamped explicitly by
//! the caller rather than sampled from an `Instant`.
#![forbid(missing_docs)]

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ordered_float::OrderedFloat;

/// Virtual simulation time, in abstract time units.
///
/// A thin newtype over `OrderedFloat<f64>` so it can key a `BinaryHeap` and
/// be compared/hashed, while still printing like a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(pub OrderedFloat<f64>);

impl SimTime {
    /// The origin of virtual time.
    pub const ZERO: SimTime = SimTime(OrderedFloat(0.0));

    /// Build a `SimTime` from a plain `f64`.
    pub fn new(t: f64) -> Self {
        SimTime(OrderedFloat(t))
    }

    /// The underlying `f64`.
    pub fn as_f64(&self) -> f64 {
        self.0.into_inner()
    }

    /// `self + delay`, where `delay` is a non-negative duration in time units.
    pub fn advance(&self, delay: f64) -> SimTime {
        SimTime::new(self.as_f64() + delay)
    }
}

impl std::ops::Sub for SimTime {
    type Output = f64;
    fn sub(self, rhs: SimTime) -> f64 {
        self.as_f64() - rhs.as_f64()
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.as_f64())
    }
}

/// A registry of named, independently typed event loggers.
///
/// Mirrors the teacher's `Registry`: a name is bound once to a flush action,
/// and every [`Logger<T>`] handed out under that name shares the same
/// buffer and action until `remove` severs the binding.
pub struct Registry {
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry { map: HashMap::new() }
    }

    /// Binds a log name to an action invoked on buffer flush.
    ///
    /// Returns any previously bound logger under this name (boxed as `Any`,
    /// as its element type is erased here); existing `Logger<T>` handles
    /// already cloned out under the old binding keep using the old action.
    pub fn insert<T: 'static>(
        &mut self,
        name: impl Into<String>,
        action: Box<dyn Fn(&[(SimTime, T)])>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(action);
        self.map.insert(name.into(), Box::new(logger))
    }

    /// Removes a bound logger, signalling end-of-stream to its action.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a clone of a named logger, if bound.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

/// A buffering logger for one named event stream.
///
/// `log` is called with the simulation time at which the event occurred;
/// buffered events are flushed to `action` once the buffer fills, or on an
/// explicit [`Logger::flush`].
pub struct Logger<T> {
    action: Rc<Box<dyn Fn(&[(SimTime, T)])>>,
    buffer: Rc<RefCell<Vec<(SimTime, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            action: self.action.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

impl<T> Logger<T> {
    /// Allocates a new shareable logger bound to a flush action.
    pub fn new(action: Box<dyn Fn(&[(SimTime, T)])>) -> Self {
        Logger {
            action: Rc::new(action),
            buffer: Rc::new(RefCell::new(Vec::with_capacity(1024))),
        }
    }

    /// Records an event at the given simulation time.
    ///
    /// Flushes automatically once the buffer reaches its initial capacity;
    /// callers that need every event visible immediately should call
    /// [`Logger::flush`] after logging.
    pub fn log(&self, at: SimTime, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((at, event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes any buffered events to the bound action.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        if !buffer.is_empty() {
            (self.action)(&buffer[..]);
            buffer.clear();
        }
    }
}
