//! Byte-size accounting for wire payloads.
//!
//! The simulator never moves real bytes between workers: every "object" or
//! "message" that crosses the network is a logical value whose only
//! observable property is how many bytes it would occupy on the wire. This
//! crate is the safe replacement for the teacher's `rc`/`arc` shared-slice
//! types (which exist to let a dataflow worker hand out disjoint mutable
//! views into one real allocation): a simulator has no real allocation to
//! slice, only sizes to account for, so `Payload` tracks a byte count
//! instead of a pointer.
//!
//! #Examples
//!
//! ```
//! use chainsim_bytes::Payload;
//!
//! let p = Payload::of_size(1024);
//! assert_eq!(p.len(), 1024);
//! assert_eq!(p.bits(), 8192);
//! ```
#![forbid(missing_docs)]

use serde::Serialize;

/// A byte count standing in for a wire payload.
///
/// `Payload` is `Copy` because a size is just a number; there is no backing
/// storage to share or move. Use [`Payload::of`] to derive a size from a
/// serializable value (via `bincode`'s size estimate) or [`Payload::of_size`]
/// when the size is already known (e.g. from a trace file's `nbytes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Payload {
    bytes: u64,
}

impl Payload {
    /// An empty payload (header-only messages use this).
    pub const EMPTY: Payload = Payload { bytes: 0 };

    /// A payload of exactly `bytes` bytes.
    pub fn of_size(bytes: u64) -> Self {
        Payload { bytes }
    }

    /// Derive a payload size from a serializable value's encoded length.
    ///
    /// Falls back to 0 if the value cannot be measured; this only happens
    /// for types with custom, non-`bincode`-compatible `Serialize` impls,
    /// none of which chainsim uses for wire payloads.
    pub fn of<T: Serialize>(value: &T) -> Self {
        let bytes = bincode::serialized_size(value).unwrap_or(0);
        Payload { bytes }
    }

    /// Number of bytes.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    /// True if this payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Number of bits, for bandwidth-limited transmission-delay math.
    pub fn bits(&self) -> u64 {
        self.bytes * 8
    }
}

impl std::ops::Add for Payload {
    type Output = Payload;
    fn add(self, rhs: Payload) -> Payload {
        Payload { bytes: self.bytes + rhs.bytes }
    }
}

impl std::iter::Sum for Payload {
    fn sum<I: Iterator<Item = Payload>>(iter: I) -> Self {
        iter.fold(Payload::EMPTY, |a, b| a + b)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}B", self.bytes)
    }
}
