//! CPUShare: per-worker fair-share CPU (specification §4.4).
//!
//! Grounded on the specification's own algorithm description (the source's
//! several coexisting `cluster.py`/`job.py` variants do not agree on a
//! single CPU-sharing model; this crate implements the reconciled
//! richest variant per specification §9's "Open questions"), writing
//! through to each task's own [`crate::graph::TaskStats`] so the CPU-share
//! progress invariant (specification §8) can be checked directly against
//! task state rather than a shadow copy.
//!
//! Mirrors the `Rc<RefCell<...>>` handle idiom of [`crate::cache::Cache`]:
//! every entry point takes the shared handle as an explicit `this: &Rc<RefCell<Self>>`
//! parameter so a pending timer's continuation can clone its own handle back
//! into the CPU.

use std::rc::Rc;
use std::cell::RefCell;

use crate::graph::{JobHandle, TaskId};
use crate::kernel::{Kernel, SimTime, TimerHandle};

struct Placed {
    token: u64,
    job: JobHandle,
    task_id: TaskId,
    exec_time: f64,
}

/// A worker's single logical CPU slot, time-shared equally across every
/// task currently placed on it.
pub struct CpuShare {
    worker_ip: String,
    running: Vec<Placed>,
    timer: Option<TimerHandle>,
    next_token: u64,
}

impl CpuShare {
    /// Creates an idle CPU for the worker at `worker_ip`.
    pub fn new(worker_ip: impl Into<String>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(CpuShare {
            worker_ip: worker_ip.into(),
            running: Vec::new(),
            timer: None,
            next_token: 0,
        }))
    }

    /// Number of tasks currently sharing the CPU.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Places `task_id` (from `job`, with the given `exec_time`) onto the
    /// CPU, recomputing every running task's progress and estimated finish
    /// time per specification §4.4 step 1-2, then rescheduling the
    /// earliest-finish timer.
    ///
    /// `task_id` must not be a prefetch NOP: specification §9 resolves the
    /// open question on NOP admission as "not counted" -- callers
    /// ([`crate::executor::Executor`]) must exclude NOPs before calling
    /// this.
    pub fn place(this: &Rc<RefCell<Self>>, kernel: &Kernel, job: JobHandle, task_id: TaskId, exec_time: f64) {
        let now = kernel.now();
        {
            let mut inner = this.borrow_mut();
            inner.update_progress(now);
            let token = inner.next_token;
            inner.next_token += 1;
            inner.running.push(Placed { token, job, task_id, exec_time });
            inner.start_intervals(now);
            tracing::trace!(worker = %inner.worker_ip, running = inner.running.len(), exec_time, "cpu share placed task");
        }
        CpuShare::reschedule(this, kernel);
    }

    /// Updates every running task's `progress` for the interval since its
    /// last rate change, at the CPU's concurrency level *before* this
    /// update (specification §4.4 step 1).
    fn update_progress(&mut self, now: SimTime) {
        let n = self.running.len();
        if n == 0 {
            return;
        }
        for r in &self.running {
            let mut job = r.job.borrow_mut();
            let stats = &mut job.tasks[r.task_id].stats;
            let start = stats.cur_exec_rate_start.unwrap_or(now);
            stats.progress += (now - start) / n as f64;
        }
    }

    /// Starts a fresh rate interval for every running task at the new
    /// concurrency level (specification §4.4 step 2).
    fn start_intervals(&mut self, now: SimTime) {
        let n = self.running.len();
        for r in &self.running {
            let mut job = r.job.borrow_mut();
            let stats = &mut job.tasks[r.task_id].stats;
            stats.cur_exec_rate_start = Some(now);
            if stats.start_time.is_none() {
                stats.start_time = Some(now);
            }
            let remaining = (r.exec_time - stats.progress).max(0.0);
            let finish = now.advance(remaining * n as f64);
            stats.estimated_finish_time = Some(finish);
            stats.execution_history.push((now, n));
        }
    }

    /// Cancels any pending timer and schedules a fresh one for the
    /// earliest `estimated_finish_time` among running tasks, tie-breaking
    /// by insertion order (specification §4.4, "Tie-break ... is stable in
    /// insertion order").
    fn reschedule(this: &Rc<RefCell<Self>>, kernel: &Kernel) {
        let mut inner = this.borrow_mut();
        if let Some(old) = inner.timer.take() {
            old.cancel();
        }
        let mut best: Option<(usize, SimTime, u64)> = None;
        for (idx, r) in inner.running.iter().enumerate() {
            let finish = r.job.borrow().tasks[r.task_id].stats.estimated_finish_time.expect("set by start_intervals");
            if best.as_ref().map_or(true, |(_, bt, _)| finish < *bt) {
                best = Some((idx, finish, r.token));
            }
        }
        drop(inner);
        if let Some((_, finish, token)) = best {
            let now = kernel.now();
            let delay = (finish - now).max(0.0);
            let cpu = this.clone();
            let handle = kernel.after_cancellable(delay, move |k| {
                CpuShare::on_finish(&cpu, k, token);
            });
            this.borrow_mut().timer = Some(handle);
        }
    }

    /// Fired when the earliest-finish timer elapses: completes the
    /// matching task's computation, removes it from the running set,
    /// redoes the progress update on whoever remains, and reschedules
    /// (specification §4.4, "When a task finishes").
    fn on_finish(this: &Rc<RefCell<Self>>, kernel: &mut Kernel, token: u64) {
        let removed = {
            let mut inner = this.borrow_mut();
            let now = kernel.now();
            inner.update_progress(now);
            let pos = inner.running.iter().position(|r| r.token == token);
            pos.map(|i| inner.running.remove(i))
        };
        if let Some(placed) = removed {
            let now = kernel.now();
            {
                let mut job = placed.job.borrow_mut();
                let task = &mut job.tasks[placed.task_id];
                task.stats.end_time = Some(now);
            }
            let event = placed.job.borrow().tasks[placed.task_id].computation_completion_event.clone();
            tracing::trace!(worker = %this.borrow().worker_ip, task = placed.task_id, at = ?now, "cpu share task finished");
            event.succeed(kernel, ());
            this.borrow_mut().start_intervals(now);
        }
        CpuShare::reschedule(this, kernel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Job, Task};
    use chainsim_bytes::Payload;
    use std::cell::RefCell as StdRefCell;

    fn job_with(exec_times: &[f64]) -> JobHandle {
        let mut job = Job::new("j");
        for (i, &t) in exec_times.iter().enumerate() {
            job.add_task(|id| Task::new(id, format!("t{i}"), t, Payload::EMPTY));
        }
        Rc::new(RefCell::new(job))
    }

    #[test]
    fn single_task_finishes_after_its_own_exec_time() {
        let mut kernel = Kernel::new();
        let cpu = CpuShare::new("w1");
        let job = job_with(&[10.0]);
        CpuShare::place(&cpu, &kernel, job.clone(), 0, 10.0);
        let fired = Rc::new(StdRefCell::new(None));
        let fired2 = fired.clone();
        job.borrow().tasks[0].computation_completion_event.on(&kernel, move |k, _| {
            fired2.borrow_mut().replace(k.now());
        });
        kernel.run();
        assert_eq!(fired.borrow().unwrap(), SimTime::new(10.0));
    }

    #[test]
    fn two_equal_tasks_share_and_finish_together() {
        // Two tasks of exec_time 10 placed at t=0 share the CPU 50/50 the
        // whole time: each needs 10 * 2 = 20 wall-clock time to finish.
        let mut kernel = Kernel::new();
        let cpu = CpuShare::new("w1");
        let job = job_with(&[10.0, 10.0]);
        CpuShare::place(&cpu, &kernel, job.clone(), 0, 10.0);
        CpuShare::place(&cpu, &kernel, job.clone(), 1, 10.0);
        let finishes = Rc::new(StdRefCell::new(Vec::new()));
        for id in [0usize, 1] {
            let finishes = finishes.clone();
            job.borrow().tasks[id].computation_completion_event.on(&kernel, move |k, _| {
                finishes.borrow_mut().push(k.now());
            });
        }
        kernel.run();
        assert_eq!(*finishes.borrow(), vec![SimTime::new(20.0), SimTime::new(20.0)]);
    }

    #[test]
    fn late_arrival_extends_the_first_tasks_finish() {
        // t0 (exec 10) starts alone; at t=4 it has done 4 units of
        // progress, 6 remaining. t1 (exec 6) joins then: both now take
        // 2x as long for their remaining work. t0 needs 6*2=12 more ->
        // finishes at 16. t1 needs 6*2=12 more -> finishes at 16 too.
        let mut kernel = Kernel::new();
        let cpu = CpuShare::new("w1");
        let job = job_with(&[10.0, 6.0]);
        CpuShare::place(&cpu, &kernel, job.clone(), 0, 10.0);
        {
            let cpu = cpu.clone();
            let job = job.clone();
            kernel.after(4.0, move |k| CpuShare::place(&cpu, k, job, 1, 6.0));
        }
        let finishes = Rc::new(StdRefCell::new(Vec::new()));
        for id in [0usize, 1] {
            let finishes = finishes.clone();
            job.borrow().tasks[id].computation_completion_event.on(&kernel, move |k, _| {
                finishes.borrow_mut().push((id, k.now()));
            });
        }
        kernel.run();
        let mut seen = finishes.borrow().clone();
        seen.sort();
        assert_eq!(seen, vec![(0, SimTime::new(16.0)), (1, SimTime::new(16.0))]);
    }

    #[test]
    fn progress_integrates_to_elapsed_busy_time() {
        // CPU share progress invariant (specification §8): with two tasks
        // co-resident the whole interval, each accrues exactly half the
        // elapsed time as progress once both finish.
        let mut kernel = Kernel::new();
        let cpu = CpuShare::new("w1");
        let job = job_with(&[5.0, 5.0]);
        CpuShare::place(&cpu, &kernel, job.clone(), 0, 5.0);
        CpuShare::place(&cpu, &kernel, job.clone(), 1, 5.0);
        kernel.run();
        assert_eq!(job.borrow().tasks[0].stats.progress, 5.0);
        assert_eq!(job.borrow().tasks[1].stats.progress, 5.0);
    }
}
