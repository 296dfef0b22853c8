//! Typed error enums at each of this crate's seams (specification §7),
//! aggregated into a single top-level [`SimError`] the CLI converts to a
//! process exit code.
//!
//! Grounded on the corpus's broad use of `thiserror` for per-module error
//! enums (e.g. `other_examples/` manifests); `chainsim_net::NetError`
//! (defined in its own crate) is folded in via `#[from]` rather than
//! duplicated here.

use thiserror::Error;

/// Failures building a [`crate::config::Topology`] or validating it against
/// recognized node kinds/policies (specification §7, "fatal at
/// construction").
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A topology node declared a `type` other than `worker`/`router`/`storage`.
    #[error("unknown node type {kind:?} for node {name}")]
    UnknownNodeType { name: String, kind: String },
    /// A worker's `gateway` names a router not present in the topology.
    #[error("node {name} references unknown gateway {gateway}")]
    MissingRoute { name: String, gateway: String },
    /// `cluster.scheduling` named a policy this crate does not implement.
    #[error("unsupported scheduling policy {0:?}")]
    UnsupportedPolicy(String),
    /// `cluster.serialization` named a policy this crate does not implement.
    #[error("unsupported serialization policy {0:?}")]
    UnsupportedSerialization(String),
    /// The YAML failed to parse at all.
    #[error("invalid topology YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failures building a [`crate::graph::Job`] from trace files (specification
/// §7, "fatal at job build").
#[derive(Debug, Error)]
pub enum TraceError {
    /// An edge record in a `.g` file named a vertex id never declared.
    #[error("edge references unknown vertex {0}")]
    UnknownVertex(u64),
    /// A `.g` record's numeric field (vertex id, edge endpoint) did not
    /// parse as a `u64`.
    #[error("malformed {field} field in {kind:?} record: {value:?}")]
    MalformedField { kind: &'static str, field: &'static str, value: String },
    /// Chain decomposition or job construction found a cycle; `task` is the
    /// id of a task on it.
    #[error("cycle in DAG at task {0}")]
    CycleDetected(usize),
    /// A `.json` trace task had no `compute` action in its `startstops`.
    #[error("task {0:?} is missing a compute start/stop pair")]
    MissingStartStop(String),
    /// The `.json` trace referenced a task name absent from the `.g` file.
    #[error("json trace references unknown task {0:?}")]
    UnknownTask(String),
    /// The `.optimal` file is missing an entry for a task that needs one.
    #[error("no optimal placement recorded for task {0:?}")]
    MissingPlacement(String),
    /// The trace file itself failed to parse as JSON.
    #[error("invalid json trace: {0}")]
    Json(#[from] serde_json::Error),
    /// The trace file could not be read from disk.
    #[error("failed reading trace file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that occur while the scheduler is submitting tasks
/// (specification §7: "unsupported scheduling policy: fatal at first
/// submit"; "missing optimal placement: fatal when optimal policy is
/// selected").
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `cluster.scheduling` named a policy this crate does not implement.
    #[error("unsupported scheduling policy {0:?}")]
    UnsupportedPolicy(String),
    /// The `optimal` policy was selected but no placement entry exists for
    /// this task.
    #[error("missing optimal placement for task {0:?}")]
    MissingPlacement(String),
    /// The cluster has no active workers to place a task on.
    #[error("no active workers available")]
    NoActiveWorkers,
}

/// The top-level error this crate's CLI surfaces, aggregating every
/// subsystem's error kind. A `SimError` always becomes a single-line
/// diagnostic and a nonzero exit (specification §7).
#[derive(Debug, Error)]
pub enum SimError {
    /// See [`ConfigError`].
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// See [`TraceError`].
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
    /// See [`SchedulerError`].
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    /// A route could not be resolved at runtime -- indicates a topology bug
    /// (specification §7, "fatal -- indicates a topology bug").
    #[error("network error: {0}")]
    Net(#[from] chainsim_net::NetError),
    /// The simulation stalled: the kernel's horizon was reached with events
    /// still pending (specification §7, "lets the job stall, visible via
    /// horizon timeout").
    #[error("simulation stalled: horizon reached with {pending} job(s) incomplete")]
    Stalled { pending: usize },
}
