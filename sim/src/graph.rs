//! The task DAG: compact integer-id vertex arrays with CSR-like adjacency,
//! per specification §9 ("avoids graph-library object-graph cycles
//! entirely"). Grounded on `examples/original_source/simulator/job.py`'s
//! `Task`/`Job` (in particular `Task.Stats`, kept here as [`TaskStats`])
//! with the `graph_tool` vertex-property-table representation replaced by
//! plain `Vec`s indexed by task id.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chainsim_bytes::Payload;

use crate::kernel::{SimEvent, SimTime};
use crate::stats::TaskRecord;

/// A task's id within its owning [`Job`]. Stable for the task's lifetime.
pub type TaskId = usize;

/// A task's completion lifecycle. Advances monotonically
/// (`Waiting` -> `Submitted` -> `Finished`), per specification §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not yet submitted to any worker.
    Waiting,
    /// Placed on a worker and en route through the executor/CPU pipeline.
    Submitted,
    /// Finished; `completion_event` has fired.
    Finished,
}

/// An output object produced by a task's completion.
///
/// Owned exclusively by the cache of the worker that produced it
/// (specification §3); `owner` is `None` until the producing task is
/// placed.
#[derive(Debug, Clone)]
pub struct Object {
    /// The object's name (by convention, the producing task's name).
    pub name: String,
    /// Size in bytes.
    pub size: Payload,
    /// The IP of the worker whose cache holds this object, once placed.
    pub owner: Option<String>,
}

impl Object {
    /// An object of the given name and size, with no owner yet.
    pub fn new(name: impl Into<String>, size: Payload) -> Self {
        Object { name: name.into(), size, owner: None }
    }
}

/// Per-task CPU-share bookkeeping (specification §4.4, §8).
///
/// Grounded directly on `original_source/simulator/job.py`'s `Task.Stats`.
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    /// Virtual time the task first began executing on the CPU.
    pub start_time: Option<SimTime>,
    /// Virtual time the task's computation finished.
    pub end_time: Option<SimTime>,
    /// Virtual time the task's current concurrency-sharing interval began.
    pub cur_exec_rate_start: Option<SimTime>,
    /// Accumulated fraction of `exec_time` completed so far, in `[0, 1]`.
    pub progress: f64,
    /// The CPU's current estimate of when this task will finish.
    pub estimated_finish_time: Option<SimTime>,
    /// `(time, concurrency)` checkpoints recorded on every rate change,
    /// kept for diagnostics and for the CPU-share progress testable
    /// property (specification §8).
    pub execution_history: Vec<(SimTime, usize)>,
}

/// A unit of computation in a job DAG (specification §3).
pub struct Task {
    /// This task's id within its job.
    pub id: TaskId,
    /// Human-readable name, unique within the job.
    pub name: String,
    /// Virtual-time units of CPU work required.
    pub exec_time: f64,
    /// Ordered ids of the tasks whose `output` this task consumes as
    /// input.
    pub inputs: Vec<TaskId>,
    /// This task's own output object.
    pub output: Object,
    /// Placement cost recorded by the scheduler, paid before the executor
    /// issues any fetch.
    pub schedule_delay: f64,
    /// Chain color assigned by [`crate::chains`] Phase A.
    pub color: i64,
    /// Color of the out-neighbor that continues this task's chain.
    pub child_color: i64,
    /// Number of hierarchical-merge rounds folded into `color`.
    pub hcolor_bits: u32,
    /// Snapshot of `color` before each merge round (specification §4.6
    /// Phase B/C).
    pub color_history: Vec<i64>,
    /// The worker this task was placed on, set exactly once.
    pub worker: Option<String>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Fires once, with the full accounting record, when the task
    /// finishes end to end (after any cache insert).
    pub completion_event: SimEvent<TaskRecord>,
    /// Fires once the CPU finishes this task's computation (before cache
    /// insert); consumed only by the executor.
    pub computation_completion_event: SimEvent<()>,
    /// CPU-share bookkeeping.
    pub stats: TaskStats,
    /// True for a synthetic prefetch task injected by the scheduler
    /// (specification §4.5, §4.7); NOPs have no output and are excluded
    /// from CPU-share admission and from global completion accounting.
    pub is_nop: bool,
}

impl Task {
    /// Builds a task with the given name, execution time, and output size.
    /// `id` is assigned by the owning [`Job`].
    pub fn new(id: TaskId, name: impl Into<String>, exec_time: f64, output_size: Payload) -> Self {
        let name = name.into();
        Task {
            id,
            output: Object::new(name.clone(), output_size),
            name,
            exec_time,
            inputs: Vec::new(),
            schedule_delay: 0.0,
            color: -1,
            child_color: -1,
            hcolor_bits: 0,
            color_history: Vec::new(),
            worker: None,
            status: TaskStatus::Waiting,
            completion_event: SimEvent::new(),
            computation_completion_event: SimEvent::new(),
            stats: TaskStats::default(),
            is_nop: false,
        }
    }

    /// Builds a zero-exec-time prefetch NOP task targeting `color`, per
    /// specification §4.5/§4.6 and `original_source/simulator/job.py`'s
    /// `Job.get_next_tasks`.
    pub fn new_nop(id: TaskId, name: impl Into<String>, input: TaskId, color: i64) -> Self {
        let mut t = Task::new(id, name, 0.0, Payload::EMPTY);
        t.inputs.push(input);
        t.color = color;
        t.is_nop = true;
        t
    }
}

/// A job: a DAG of tasks with CSR-like out/in adjacency, per specification
/// §9.
///
/// Edge `a -> b` means `b.inputs` contains `a`'s id, i.e. `b` consumes
/// `a.output`. Invariants (specification §3): acyclic; for every edge
/// `(a, b)`, `a.output` is one of `b`'s inputs; `t.completion_event` fires
/// iff `t.status == Finished`.
pub struct Job {
    /// The job's name (the trace file's base name).
    pub name: String,
    /// All tasks, indexed by id.
    pub tasks: Vec<Task>,
    /// `out_adj[a]` lists every `b` with an edge `a -> b`.
    pub out_adj: Vec<Vec<TaskId>>,
    /// `in_adj[b]` lists every `a` with an edge `a -> b`.
    pub in_adj: Vec<Vec<TaskId>>,
    name_to_id: HashMap<String, TaskId>,
}

/// A shared handle onto a [`Job`], cloned freely by every component that
/// needs to read or update a task's status, stats, or completion events
/// (the scheduler, the executor, the CPU share) for the job's lifetime.
pub type JobHandle = Rc<RefCell<Job>>;

impl Job {
    /// Creates an empty job.
    pub fn new(name: impl Into<String>) -> Self {
        Job { name: name.into(), tasks: Vec::new(), out_adj: Vec::new(), in_adj: Vec::new(), name_to_id: HashMap::new() }
    }

    /// Adds a task, assigning it the next free id. Returns that id.
    pub fn add_task(&mut self, mut build: impl FnMut(TaskId) -> Task) -> TaskId {
        let id = self.tasks.len();
        let task = build(id);
        self.name_to_id.insert(task.name.clone(), id);
        self.tasks.push(task);
        self.out_adj.push(Vec::new());
        self.in_adj.push(Vec::new());
        id
    }

    /// Records edge `src -> dst` (`dst` consumes `src`'s output) in both
    /// adjacency arrays. Does not mutate `dst.inputs`; callers populate
    /// that explicitly so input order is caller-controlled.
    pub fn add_edge(&mut self, src: TaskId, dst: TaskId) {
        self.out_adj[src].push(dst);
        self.in_adj[dst].push(src);
    }

    /// Looks up a task id by name.
    pub fn id_of(&self, name: &str) -> Option<TaskId> {
        self.name_to_id.get(name).copied()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if the job has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Source tasks: those with no in-neighbors, ready at admission.
    pub fn source_tasks(&self) -> Vec<TaskId> {
        (0..self.tasks.len()).filter(|&id| self.in_adj[id].is_empty()).collect()
    }

    /// True if every in-neighbor of `id` has finished.
    pub fn is_ready(&self, id: TaskId) -> bool {
        self.in_adj[id].iter().all(|&p| self.tasks[p].status == TaskStatus::Finished)
    }

    /// Out-neighbors of `finished` that have become ready now that it has
    /// finished (i.e. every other in-neighbor was already finished).
    pub fn newly_ready_successors(&self, finished: TaskId) -> Vec<TaskId> {
        self.out_adj[finished]
            .iter()
            .copied()
            .filter(|&d| self.tasks[d].status != TaskStatus::Finished && self.is_ready(d))
            .collect()
    }

    /// Validates acyclicity via a DFS colouring (white/grey/black); returns
    /// the id of a task on a cycle, if one exists. Run once at job-build
    /// time (specification §7, "cycle in DAG" is fatal at job build).
    ///
    /// Driven through an explicit stack rather than recursion, the same way
    /// `chains.rs`'s own DFS is, since a task DAG can be deep enough to risk
    /// overflowing the real call stack.
    pub fn find_cycle(&self) -> Option<TaskId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark { White, Grey, Black }
        let mut mark = vec![Mark::White; self.tasks.len()];
        for start in 0..self.tasks.len() {
            if mark[start] != Mark::White {
                continue;
            }
            let mut stack: Vec<(TaskId, usize)> = vec![(start, 0)];
            mark[start] = Mark::Grey;
            while let Some(&mut (v, ref mut next_child)) = stack.last_mut() {
                if *next_child < self.out_adj[v].len() {
                    let w = self.out_adj[v][*next_child];
                    *next_child += 1;
                    match mark[w] {
                        Mark::Grey => return Some(w),
                        Mark::White => {
                            mark[w] = Mark::Grey;
                            stack.push((w, 0));
                        }
                        Mark::Black => {}
                    }
                } else {
                    mark[v] = Mark::Black;
                    stack.pop();
                }
            }
        }
        None
    }
}
