//! Scheduler: job admission, ready-task dispatch, placement policies, and
//! prefetch-NOP injection (specification §4.7).
//!
//! Grounded on `examples/original_source/simulator/scheduler.py`'s
//! `Scheduler`. The Python original's `job_queue`/`task_queue` pair becomes
//! one `jobs` map keyed by job name, since this crate dispatches a job's
//! ready tasks the instant they become ready rather than polling a queue --
//! there is no wall-clock loop to poll inside a single-threaded kernel.

use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::cluster::Cluster;
use crate::error::SchedulerError;
use crate::graph::{JobHandle, Task, TaskId};
use crate::kernel::Kernel;
use crate::stats::{JobStats, JobSummary, TaskRecord};

/// A placement policy (specification §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Cyclic iterator over active workers.
    RoundRobin,
    /// Uniform over all workers.
    Random,
    /// `HashRing` keyed by `task.output.name`.
    ConsistentHash,
    /// `HashRing` keyed by `task.color`.
    ChainColorCh,
    /// First-come round-robin mapping from color to a worker, cached.
    ChainColorRr,
    /// `task.color >> (hcolor_bits - floor(log2(active_workers)))`, then a
    /// cached round-robin mapping.
    HcolorRr,
    /// Pre-recorded placement from the trace.
    Vanilla,
    /// Pre-computed ILP output loaded per task.
    Optimal,
}

impl Policy {
    /// Parses a `cluster.scheduling` config value, per specification §9's
    /// recognized options.
    pub fn parse(name: &str) -> Result<Policy, SchedulerError> {
        match name {
            "round_robin" => Ok(Policy::RoundRobin),
            "random" => Ok(Policy::Random),
            "consistent_hash" => Ok(Policy::ConsistentHash),
            "chain_color_ch" => Ok(Policy::ChainColorCh),
            "chain_color_rr" => Ok(Policy::ChainColorRr),
            "hcolor_rr" => Ok(Policy::HcolorRr),
            "vanilla" => Ok(Policy::Vanilla),
            "optimal" => Ok(Policy::Optimal),
            other => Err(SchedulerError::UnsupportedPolicy(other.to_string())),
        }
    }

    /// The canonical config string for this policy, used as the `policy`
    /// column of a job's statistics CSV row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::RoundRobin => "round_robin",
            Policy::Random => "random",
            Policy::ConsistentHash => "consistent_hash",
            Policy::ChainColorCh => "chain_color_ch",
            Policy::ChainColorRr => "chain_color_rr",
            Policy::HcolorRr => "hcolor_rr",
            Policy::Vanilla => "vanilla",
            Policy::Optimal => "optimal",
        }
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A deterministic consistent-hash ring. Uses `DefaultHasher` rather than
/// `HashMap`'s randomized `RandomState`: `DefaultHasher::new()` uses fixed
/// keys, so the same key always lands at the same ring position across
/// runs and platforms -- specification §9's "ensure the hashing function is
/// platform-stable so tests are reproducible".
pub struct HashRing {
    ring: BTreeMap<u64, String>,
}

impl HashRing {
    /// Builds a ring from `nodes`.
    pub fn new(nodes: &[String]) -> Self {
        let mut ring = BTreeMap::new();
        for node in nodes {
            ring.insert(hash_key(node), node.clone());
        }
        HashRing { ring }
    }

    /// The node owning `key`: the first ring entry at or after `key`'s
    /// hash, wrapping around to the lowest entry.
    pub fn get(&self, key: &str) -> Option<&String> {
        if self.ring.is_empty() {
            return None;
        }
        let h = hash_key(key);
        self.ring.range(h..).next().map(|(_, v)| v).or_else(|| self.ring.values().next())
    }
}

fn floor_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - 1 - n.leading_zeros()
    }
}

/// Trace-derived placement hints a job may carry, consumed by the
/// `vanilla`/`optimal` policies.
#[derive(Debug, Clone, Default)]
pub struct PlacementHints {
    /// `task_id -> worker ip`, from the `worker` field of a `.json` trace.
    pub vanilla: HashMap<TaskId, String>,
    /// `task_id -> (start_ts, worker ip)`, from a `.optimal` file.
    pub optimal: HashMap<TaskId, (f64, String)>,
}

struct JobRuntime {
    hints: PlacementHints,
    stats: JobStats,
    admitted_at: crate::kernel::SimTime,
    pending: usize,
}

/// Job admission, ready-task dispatch, and placement (specification §4.7).
pub struct Scheduler {
    policy: Policy,
    cluster: Rc<Cluster>,
    prefetch: bool,
    ring: HashRing,
    rr_index: Cell<usize>,
    color_rr_index: Cell<usize>,
    chain_color_rr: RefCell<HashMap<i64, String>>,
    hcolor_rr: RefCell<HashMap<i64, String>>,
    rng: RefCell<SmallRng>,
    jobs: RefCell<HashMap<String, JobRuntime>>,
    results: RefCell<Vec<JobSummary>>,
    errors: RefCell<Vec<String>>,
}

impl Scheduler {
    /// Builds a scheduler for `policy` over `cluster`'s workers.
    /// `prefetch` mirrors `cluster.prefetch` from the topology config.
    pub fn new(policy: Policy, cluster: Rc<Cluster>, prefetch: bool) -> Rc<Scheduler> {
        let ring = HashRing::new(cluster.active_workers());
        Rc::new(Scheduler {
            policy,
            cluster,
            prefetch,
            ring,
            rr_index: Cell::new(0),
            color_rr_index: Cell::new(0),
            chain_color_rr: RefCell::new(HashMap::new()),
            hcolor_rr: RefCell::new(HashMap::new()),
            rng: RefCell::new(SmallRng::seed_from_u64(0xC0FF_EE00)),
            jobs: RefCell::new(HashMap::new()),
            results: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
        })
    }

    /// Admits `job`: records its placement hints, marks every source task
    /// ready, and dispatches them. Fails fast if the cluster has no
    /// workers, or (for `vanilla`/`optimal`) a source task has no recorded
    /// placement -- both are fatal at first submit per specification §7.
    pub fn admit(this: &Rc<Self>, kernel: &Kernel, job: JobHandle, hints: PlacementHints) -> Result<(), SchedulerError> {
        if this.cluster.active_workers().is_empty() {
            return Err(SchedulerError::NoActiveWorkers);
        }
        let (name, ready, total) = {
            let j = job.borrow();
            (j.name.clone(), j.source_tasks(), j.len())
        };
        tracing::debug!(job = %name, policy = ?this.policy, tasks = total, "admitting job");
        this.jobs.borrow_mut().insert(
            name,
            JobRuntime { hints, stats: JobStats::default(), admitted_at: kernel.now(), pending: total },
        );
        for id in ready {
            Scheduler::dispatch(this, kernel, &job, id)?;
        }
        Ok(())
    }

    /// Every job summary produced so far (one per job that has fully
    /// completed).
    pub fn results(&self) -> Vec<JobSummary> {
        self.results.borrow().clone()
    }

    /// The first deferred dispatch failure recorded while processing
    /// completion callbacks, if any. Failures during admission surface
    /// directly as a `Result::Err` from [`Scheduler::admit`]; failures
    /// discovered later (e.g. a missing optimal placement for a task that
    /// only becomes ready mid-run) have no synchronous caller to return to,
    /// so they are recorded here and the affected subtree simply never
    /// dispatches -- visible as a stalled simulation via the kernel's
    /// horizon (specification §7).
    pub fn first_error(&self) -> Option<String> {
        self.errors.borrow().first().cloned()
    }

    fn dispatch(this: &Rc<Self>, kernel: &Kernel, job: &JobHandle, task_id: TaskId) -> Result<(), SchedulerError> {
        let already_placed = job.borrow().tasks[task_id].worker.clone();
        let worker_ip = match already_placed {
            Some(w) => w,
            None => this.resolve_worker(job, task_id)?,
        };
        let is_nop = {
            let mut j = job.borrow_mut();
            let task = &mut j.tasks[task_id];
            task.worker = Some(worker_ip.clone());
            task.output.owner = Some(worker_ip);
            task.schedule_delay = 0.0;
            task.is_nop
        };
        tracing::trace!(task = task_id, worker = %worker_ip, nop = is_nop, "dispatching task");
        if !is_nop {
            let this2 = this.clone();
            let job_for_cb = job.clone();
            let completion = job.borrow().tasks[task_id].completion_event.clone();
            completion.on(kernel, move |k, record| {
                Scheduler::on_task_finished(&this2, k, &job_for_cb, task_id, record);
            });
        }
        this.cluster.submit(kernel, job.clone(), task_id);
        Ok(())
    }

    fn resolve_worker(&self, job: &JobHandle, task_id: TaskId) -> Result<String, SchedulerError> {
        let workers = self.cluster.active_workers();
        if workers.is_empty() {
            return Err(SchedulerError::NoActiveWorkers);
        }
        match self.policy {
            Policy::RoundRobin => {
                let i = self.rr_index.get();
                self.rr_index.set((i + 1) % workers.len());
                Ok(workers[i % workers.len()].clone())
            }
            Policy::Random => {
                let i = self.rng.borrow_mut().gen_range(0..workers.len());
                Ok(workers[i].clone())
            }
            Policy::ConsistentHash => {
                let key = job.borrow().tasks[task_id].output.name.clone();
                self.ring.get(&key).cloned().ok_or(SchedulerError::NoActiveWorkers)
            }
            Policy::ChainColorCh => {
                let color = job.borrow().tasks[task_id].color;
                self.ring.get(&color.to_string()).cloned().ok_or(SchedulerError::NoActiveWorkers)
            }
            Policy::ChainColorRr => {
                let color = job.borrow().tasks[task_id].color;
                Ok(self.cached_rr(&self.chain_color_rr, color, workers))
            }
            Policy::HcolorRr => {
                let (color, bits) = {
                    let j = job.borrow();
                    (j.tasks[task_id].color, j.tasks[task_id].hcolor_bits)
                };
                let shift = bits.saturating_sub(floor_log2(workers.len()));
                let bucket = color >> shift;
                Ok(self.cached_rr(&self.hcolor_rr, bucket, workers))
            }
            Policy::Vanilla => {
                let (job_name, task_name) = {
                    let j = job.borrow();
                    (j.name.clone(), j.tasks[task_id].name.clone())
                };
                let jobs = self.jobs.borrow();
                let hints = &jobs.get(&job_name).expect("job admitted before dispatch").hints;
                hints.vanilla.get(&task_id).cloned().ok_or(SchedulerError::MissingPlacement(task_name))
            }
            Policy::Optimal => {
                let (job_name, task_name) = {
                    let j = job.borrow();
                    (j.name.clone(), j.tasks[task_id].name.clone())
                };
                let jobs = self.jobs.borrow();
                let hints = &jobs.get(&job_name).expect("job admitted before dispatch").hints;
                hints.optimal.get(&task_id).map(|(_, w)| w.clone()).ok_or(SchedulerError::MissingPlacement(task_name))
            }
        }
    }

    fn cached_rr(&self, cache: &RefCell<HashMap<i64, String>>, key: i64, workers: &[String]) -> String {
        if let Some(w) = cache.borrow().get(&key) {
            return w.clone();
        }
        let i = self.color_rr_index.get();
        self.color_rr_index.set((i + 1) % workers.len());
        let w = workers[i % workers.len()].clone();
        cache.borrow_mut().insert(key, w.clone());
        w
    }

    /// Per-task completion callback (specification §4.7): folds the
    /// record into the job's running stats, computes newly-ready
    /// successors, optionally injects a prefetch NOP ahead of a successor
    /// whose color differs from the completed task's, then dispatches
    /// every ready successor.
    fn on_task_finished(this: &Rc<Self>, kernel: &mut Kernel, job: &JobHandle, task_id: TaskId, record: TaskRecord) {
        let job_name = job.borrow().name.clone();
        let completed_color = job.borrow().tasks[task_id].color;
        let ready = job.borrow().newly_ready_successors(task_id);

        let mut summary = None;
        {
            let mut jobs = this.jobs.borrow_mut();
            if let Some(rt) = jobs.get_mut(&job_name) {
                rt.stats.record(record);
                rt.pending = rt.pending.saturating_sub(1);
                if rt.pending == 0 {
                    let makespan = kernel.now() - rt.admitted_at;
                    summary = Some(rt.stats.summarize(job_name.clone(), this.policy.as_str(), makespan));
                }
            }
        }
        if let Some(s) = summary {
            tracing::debug!(job = %job_name, execution_time = s.execution_time, "job completed");
            this.results.borrow_mut().push(s);
        }

        for dep in ready {
            if this.prefetch {
                let dep_color = job.borrow().tasks[dep].color;
                if dep_color != completed_color {
                    Scheduler::inject_prefetch_nop(this, kernel, job, task_id, dep);
                }
            }
            if let Err(e) = Scheduler::dispatch(this, kernel, job, dep) {
                tracing::warn!(job = %job_name, task = dep, error = %e, "deferred dispatch failed");
                this.errors.borrow_mut().push(e.to_string());
            }
        }
    }

    /// Builds and submits a zero-compute NOP that fetches `producer`'s
    /// output into `dependent`'s eventual worker, then pins that same
    /// worker onto `dependent` so the real dispatch that follows resolves
    /// to the same place a cached policy would have picked anyway.
    ///
    /// This crate's resolution of specification §4.5's "causing the data
    /// to land in the target color's worker cache": the NOP's own
    /// completion (`executor.rs`) re-homes `producer.output.owner` to the
    /// NOP's worker, so `dependent`'s subsequent fetch of that input sees
    /// a local owner.
    fn inject_prefetch_nop(this: &Rc<Self>, kernel: &Kernel, job: &JobHandle, producer: TaskId, dependent: TaskId) {
        let dependent_color = job.borrow().tasks[dependent].color;
        let dependent_worker = match this.resolve_worker(job, dependent) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(task = dependent, error = %e, "prefetch NOP injection failed to resolve a worker");
                this.errors.borrow_mut().push(e.to_string());
                return;
            }
        };
        tracing::trace!(producer, dependent, color = dependent_color, worker = %dependent_worker, "injecting prefetch NOP");
        let nop_name = format!("NOP-{producer}-{dependent}");
        let nop_id = job.borrow_mut().add_task(|id| Task::new_nop(id, nop_name, producer, dependent_color));
        {
            let mut j = job.borrow_mut();
            j.tasks[nop_id].worker = Some(dependent_worker.clone());
            j.tasks[nop_id].output.owner = Some(dependent_worker.clone());
            // Pin the real dependent's worker now, so the dispatch that
            // follows sees it already placed and skips re-resolving.
            j.tasks[dependent].worker = Some(dependent_worker);
        }
        if let Err(e) = Scheduler::dispatch(this, kernel, job, nop_id) {
            this.errors.borrow_mut().push(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_documented_policy_name() {
        for name in [
            "round_robin",
            "random",
            "consistent_hash",
            "chain_color_ch",
            "chain_color_rr",
            "hcolor_rr",
            "vanilla",
            "optimal",
        ] {
            assert!(Policy::parse(name).is_ok());
        }
    }

    #[test]
    fn unknown_policy_name_is_rejected() {
        assert!(matches!(Policy::parse("bogus"), Err(SchedulerError::UnsupportedPolicy(_))));
    }

    #[test]
    fn hash_ring_is_deterministic_across_instances() {
        let nodes = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string(), "10.0.0.3".to_string()];
        let ring1 = HashRing::new(&nodes);
        let ring2 = HashRing::new(&nodes);
        for key in ["alpha", "beta", "gamma", "delta"] {
            assert_eq!(ring1.get(key), ring2.get(key));
        }
    }

    #[test]
    fn hash_ring_covers_every_key_to_some_node() {
        let nodes = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let ring = HashRing::new(&nodes);
        for key in ["a", "b", "c", "d", "e"] {
            assert!(ring.get(key).is_some());
        }
    }

    #[test]
    fn floor_log2_matches_power_of_two_boundaries() {
        assert_eq!(floor_log2(1), 0);
        assert_eq!(floor_log2(2), 1);
        assert_eq!(floor_log2(3), 1);
        assert_eq!(floor_log2(4), 2);
        assert_eq!(floor_log2(8), 3);
    }
}
