//! Per-task and per-job accounting records (specification §6), produced by
//! the [`crate::executor::Executor`] and consumed by the
//! [`crate::scheduler::Scheduler`]'s stats sink.
//!
//! Grounded on `examples/original_source/simulator/scheduler.py`'s
//! `task_finished_cb` (the per-task `event.value` dict it accumulates into
//! `self.stats`) and `execute_job`'s final CSV line.

use chainsim_logging::SimTime;

/// The full accounting record fired with a task's `completion_event`
/// (specification §6, "per-task accounting record").
#[derive(Debug, Clone, Default)]
pub struct TaskRecord {
    /// The task's name.
    pub name: String,
    /// Total time spent transmitting this task's fetched inputs over the
    /// network (remote fetches only).
    pub transfer: f64,
    /// Time spent computing on the CPU (wall-clock, under sharing).
    pub cpu_time: f64,
    /// Bytes read from a remote worker's cache.
    pub remote_read: u64,
    /// Bytes read from the local worker's cache.
    pub local_read: u64,
    /// Time spent waiting for all input fetches to resolve.
    pub fetch_time: f64,
    /// Virtual time the task became ready / started its fetch phase.
    pub start_ts: SimTime,
    /// Virtual time the task fully completed (after any cache insert).
    pub end_ts: SimTime,
    /// Total deserialization latency charged to this task's input reads.
    pub deserialization_time: f64,
    /// Serialization latency charged to this task's own output write.
    pub serialization_time: f64,
    /// End-to-end delay from readiness to completion.
    pub task_endtoend_delay: f64,
    /// True if this task produced and wrote an output object.
    pub write: bool,
    /// Time this task's own write, or a local reader of it, spent waiting
    /// on a concurrent serialization.
    pub wait_for_serialization: f64,
    /// The worker this task ran on.
    pub worker: String,
}

/// Running accumulator for a job's statistics, flushed to a [`JobSummary`]
/// once every task has completed.
///
/// Grounded on `scheduler.py`'s `self.stats` dict, accumulated field by
/// field across every `task_finished_cb` invocation.
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    /// Every per-task record collected so far.
    pub tasks: Vec<TaskRecord>,
    /// Sum of `TaskRecord::transfer`.
    pub transmit_time: f64,
    /// Sum of `TaskRecord::cpu_time`.
    pub cpu_time: f64,
    /// Sum of `TaskRecord::remote_read`.
    pub remote_read: u64,
    /// Sum of `TaskRecord::local_read`.
    pub local_read: u64,
    /// Sum of `TaskRecord::deserialization_time`.
    pub deser_time: f64,
    /// Sum of `TaskRecord::serialization_time`.
    pub ser_time: f64,
    /// Sum of `TaskRecord::task_endtoend_delay`.
    pub task_time: f64,
}

impl JobStats {
    /// Folds one task's accounting record into the running totals.
    pub fn record(&mut self, record: TaskRecord) {
        self.transmit_time += record.transfer;
        self.cpu_time += record.cpu_time;
        self.remote_read += record.remote_read;
        self.local_read += record.local_read;
        self.deser_time += record.deserialization_time;
        self.ser_time += record.serialization_time;
        self.task_time += record.task_endtoend_delay;
        self.tasks.push(record);
    }

    /// Produces the final per-job summary, given the job's name, the
    /// placement policy used, and its makespan.
    pub fn summarize(&self, name: impl Into<String>, policy: impl Into<String>, execution_time: f64) -> JobSummary {
        JobSummary {
            name: name.into(),
            policy: policy.into(),
            execution_time,
            remote_read: self.remote_read,
            local_read: self.local_read,
            transmit_time: self.transmit_time,
            cpu_time: self.cpu_time,
            deser_time: self.deser_time,
            ser_time: self.ser_time,
            task_time: self.task_time,
        }
    }
}

/// One line of the statistics CSV (specification §6, "per-job summary
/// line").
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// The job's name.
    pub name: String,
    /// The placement policy used for this run.
    pub policy: String,
    /// Makespan: admission to last-task-completion.
    pub execution_time: f64,
    /// Total bytes read remotely across every task.
    pub remote_read: u64,
    /// Total bytes read locally across every task.
    pub local_read: u64,
    /// Total time spent transmitting fetched inputs.
    pub transmit_time: f64,
    /// Total CPU time across every task.
    pub cpu_time: f64,
    /// Total deserialization time across every task.
    pub deser_time: f64,
    /// Total serialization time across every task.
    pub ser_time: f64,
    /// Total task end-to-end delay across every task.
    pub task_time: f64,
}

impl JobSummary {
    /// Formats this summary as one CSV row, matching the column order in
    /// specification §6: `name,policy,execution_time,remote_read,
    /// local_read,transmit_time,cpu_time,deser_time,ser_time,task_time`.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.name,
            self.policy,
            self.execution_time,
            self.remote_read,
            self.local_read,
            self.transmit_time,
            self.cpu_time,
            self.deser_time,
            self.ser_time,
            self.task_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_accumulates_totals() {
        let mut stats = JobStats::default();
        stats.record(TaskRecord { transfer: 1.0, cpu_time: 2.0, remote_read: 3, local_read: 4, deserialization_time: 5.0, serialization_time: 6.0, task_endtoend_delay: 7.0, ..Default::default() });
        stats.record(TaskRecord { transfer: 1.0, cpu_time: 2.0, remote_read: 3, local_read: 4, deserialization_time: 5.0, serialization_time: 6.0, task_endtoend_delay: 7.0, ..Default::default() });
        assert_eq!(stats.transmit_time, 2.0);
        assert_eq!(stats.remote_read, 6);
        assert_eq!(stats.tasks.len(), 2);
    }

    #[test]
    fn csv_row_matches_column_order() {
        let summary = JobSummary {
            name: "job1".into(),
            policy: "round_robin".into(),
            execution_time: 10.0,
            remote_read: 5,
            local_read: 6,
            transmit_time: 1.0,
            cpu_time: 2.0,
            deser_time: 3.0,
            ser_time: 4.0,
            task_time: 8.0,
        };
        assert_eq!(summary.to_csv_row(), "job1,round_robin,10,5,6,1,2,3,4,8");
    }
}
