//! Executor: per-task-submission control/data plane (specification §4.5).
//!
//! Grounded on `examples/original_source/cluster.py`'s
//! `Executor.execute_function`: wait `schedule_delay`, issue one fetch per
//! input (local or remote per the input's owner), wait for every fetch to
//! resolve, submit to the CPU, then write the output through the cache.
//! Continuation-style throughout, matching `kernel.rs`'s module doc on why
//! this crate has no `async`/`await`.

use std::rc::Rc;

use chainsim_bytes::Payload;
use chainsim_net::{FetchStatus, Request, RpcKind};

use crate::cache::SerializationPolicy;
use crate::cluster::WorkerRuntime;
use crate::graph::{JobHandle, TaskId, TaskStatus};
use crate::kernel::{all_of, Kernel, SimEvent, SimTime};
use crate::stats::TaskRecord;

/// What fetching one input resolved to, after any deserialization wait has
/// already elapsed.
#[derive(Clone, Copy)]
struct FetchOutcome {
    size: Payload,
    is_local: bool,
    ser_wait_time: f64,
    deserialization_time: f64,
    transfer: f64,
}

/// Submits `task_id` to `worker`'s pipeline: waits the scheduler-recorded
/// placement cost, then begins the fetch phase.
pub fn execute(worker: Rc<WorkerRuntime>, kernel: &Kernel, job: JobHandle, task_id: TaskId) {
    let schedule_delay = job.borrow().tasks[task_id].schedule_delay;
    kernel.after(schedule_delay.max(0.0), move |k| begin_fetch(worker, k, job, task_id));
}

fn begin_fetch(worker: Rc<WorkerRuntime>, kernel: &mut Kernel, job: JobHandle, task_id: TaskId) {
    let fetch_start = kernel.now();
    job.borrow_mut().tasks[task_id].status = TaskStatus::Submitted;

    let inputs: Vec<TaskId> = job.borrow().tasks[task_id].inputs.clone();
    if inputs.is_empty() {
        after_fetch(worker, kernel, job, task_id, fetch_start, Vec::new());
        return;
    }

    let events: Vec<SimEvent<FetchOutcome>> =
        inputs.iter().map(|&input_id| fetch_one(&worker, kernel, &job, &task_id, input_id)).collect();

    let worker2 = worker.clone();
    let job2 = job.clone();
    all_of(kernel, events, move |k, outcomes| {
        after_fetch(worker2, k, job2, task_id, fetch_start, outcomes);
    });
}

/// Issues one fetch for `input_id`'s output, addressed local or remote
/// depending on its current owner, and returns an event that resolves once
/// the response (including any deserialization wait) is fully accounted
/// for.
fn fetch_one(
    worker: &Rc<WorkerRuntime>,
    kernel: &Kernel,
    job: &JobHandle,
    _task_id: &TaskId,
    input_id: TaskId,
) -> SimEvent<FetchOutcome> {
    let (owner_ip, obj_name) = {
        let j = job.borrow();
        let out = &j.tasks[input_id].output;
        (out.owner.clone().expect("producer is placed before any consumer reads it"), out.name.clone())
    };
    let is_local_owner = owner_ip == worker.ip;
    let dst_port = worker.cache_port_of(&owner_ip).expect("every worker's cache port is known at cluster construction");

    let req_id = worker.next_req_id();
    let raw_response: SimEvent<Request> = SimEvent::new();
    worker.outstanding.borrow_mut().insert(req_id, raw_response.clone());

    let send_time = kernel.now();
    let rpc = if is_local_owner { RpcKind::FetchFromLocalCache } else { RpcKind::FetchData };
    let req = Request {
        time: send_time,
        req_id,
        src_ip: worker.ip.clone(),
        src_port: worker.response_port,
        dst_ip: owner_ip,
        dst_port,
        rpc,
        payload: Payload::EMPTY,
        obj: obj_name,
        ser_wait: 0.0,
        deser_time: 0.0,
        status: FetchStatus::NotApplicable,
    };
    crate::fabric::Fabric::send(&worker.fabric, kernel, req);

    let outcome_event: SimEvent<FetchOutcome> = SimEvent::new();
    let worker = worker.clone();
    let outcome_for_wait = outcome_event.clone();
    raw_response.on(kernel, move |kernel, resp| {
        let arrival = kernel.now();
        let is_local = crate::cluster::is_local_response(resp.rpc);
        let hit = matches!(resp.status, FetchStatus::Hit);
        let size = resp.payload;
        let deser = if !hit {
            0.0
        } else if is_local {
            if worker.cache.borrow().serialization_policy() == SerializationPolicy::SyncWDeser {
                worker.cache.borrow().deserialization_model().latency(size)
            } else {
                0.0
            }
        } else {
            worker.cache.borrow().deserialization_model().latency(size)
        };
        let transfer = if is_local { 0.0 } else { (arrival - send_time).max(0.0) };
        let ser_wait = resp.ser_wait;
        kernel.after(deser, move |k| {
            outcome_for_wait.succeed(
                k,
                FetchOutcome { size, is_local, ser_wait_time: ser_wait, deserialization_time: deser, transfer },
            );
        });
    });
    outcome_event
}

struct FetchAggregate {
    transfer: f64,
    remote_read: u64,
    local_read: u64,
    deserialization_time: f64,
    wait_for_serialization: f64,
    fetch_time: f64,
}

fn aggregate(now: SimTime, fetch_start: SimTime, outcomes: &[FetchOutcome]) -> FetchAggregate {
    let mut agg = FetchAggregate {
        transfer: 0.0,
        remote_read: 0,
        local_read: 0,
        deserialization_time: 0.0,
        wait_for_serialization: 0.0,
        fetch_time: now - fetch_start,
    };
    for o in outcomes {
        agg.transfer += o.transfer;
        agg.deserialization_time += o.deserialization_time;
        agg.wait_for_serialization += o.ser_wait_time;
        if o.is_local {
            agg.local_read += o.size.len();
        } else {
            agg.remote_read += o.size.len();
        }
    }
    agg
}

fn after_fetch(
    worker: Rc<WorkerRuntime>,
    kernel: &mut Kernel,
    job: JobHandle,
    task_id: TaskId,
    fetch_start: SimTime,
    outcomes: Vec<FetchOutcome>,
) {
    let agg = aggregate(kernel.now(), fetch_start, &outcomes);
    let (exec_time, is_nop) = {
        let j = job.borrow();
        (j.tasks[task_id].exec_time, j.tasks[task_id].is_nop)
    };

    if is_nop {
        // Prefetch NOPs are excluded from CPU-share admission per
        // specification §9's resolved open question; their "computation"
        // is instantaneous.
        finish_after_compute(worker, kernel, job, task_id, fetch_start, agg);
        return;
    }

    let cpu = worker.cpu.clone();
    crate::cpu::CpuShare::place(&cpu, kernel, job.clone(), task_id, exec_time);
    let worker2 = worker.clone();
    let job2 = job.clone();
    let completion = job.borrow().tasks[task_id].computation_completion_event.clone();
    completion.on(kernel, move |k, ()| {
        finish_after_compute(worker2, k, job2, task_id, fetch_start, agg);
    });
}

fn finish_after_compute(
    worker: Rc<WorkerRuntime>,
    kernel: &mut Kernel,
    job: JobHandle,
    task_id: TaskId,
    fetch_start: SimTime,
    agg: FetchAggregate,
) {
    let is_nop = job.borrow().tasks[task_id].is_nop;

    if is_nop {
        // The NOP's single input is the object being prefetched into this
        // worker's cache. Populating the cache here and re-homing the
        // producing task's `Object.owner` to this worker is this crate's
        // resolution of specification §4.5's "causing the data to land in
        // the target color's worker cache": a later consumer placed on
        // the same worker (as it will be, since the NOP is injected with
        // that consumer's own resolved placement) now sees a local read.
        let input_id = job.borrow().tasks[task_id].inputs[0];
        let (name, size) = {
            let j = job.borrow();
            (j.tasks[input_id].output.name.clone(), j.tasks[input_id].output.size)
        };
        crate::cache::Cache::insert(&worker.cache, kernel, name, size);
        job.borrow_mut().tasks[input_id].output.owner = Some(worker.ip.clone());
        finalize(worker, kernel, job, task_id, fetch_start, agg, 0.0);
        return;
    }

    let (name, size) = {
        let j = job.borrow();
        let out = &j.tasks[task_id].output;
        (out.name.clone(), out.size)
    };
    let serialization_time = worker.cache.borrow().serialization_model().latency(size);
    let policy = worker.cache.borrow().serialization_policy();
    match policy {
        SerializationPolicy::Lazy => {
            crate::cache::Cache::insert(&worker.cache, kernel, name, size);
            finalize(worker, kernel, job, task_id, fetch_start, agg, serialization_time);
        }
        SerializationPolicy::SyncWDeser | SerializationPolicy::SyncNoDeser => {
            let event = crate::cache::Cache::insert(&worker.cache, kernel, name, size);
            let worker2 = worker.clone();
            let job2 = job.clone();
            event.on(kernel, move |k, _| {
                finalize(worker2, k, job2, task_id, fetch_start, agg, serialization_time);
            });
        }
    }
}

fn finalize(
    worker: Rc<WorkerRuntime>,
    kernel: &mut Kernel,
    job: JobHandle,
    task_id: TaskId,
    fetch_start: SimTime,
    agg: FetchAggregate,
    serialization_time: f64,
) {
    let now = kernel.now();
    let record = {
        let mut j = job.borrow_mut();
        let task = &mut j.tasks[task_id];
        task.status = TaskStatus::Finished;
        let cpu_time = match (task.stats.start_time, task.stats.end_time) {
            (Some(s), Some(e)) => e - s,
            _ => 0.0,
        };
        TaskRecord {
            name: task.name.clone(),
            transfer: agg.transfer,
            cpu_time,
            remote_read: agg.remote_read,
            local_read: agg.local_read,
            fetch_time: agg.fetch_time,
            start_ts: fetch_start,
            end_ts: now,
            deserialization_time: agg.deserialization_time,
            serialization_time,
            task_endtoend_delay: now - fetch_start,
            write: !task.is_nop && !task.output.name.is_empty(),
            wait_for_serialization: agg.wait_for_serialization,
            worker: worker.ip.clone(),
        }
    };
    let event = job.borrow().tasks[task_id].completion_event.clone();
    event.succeed(kernel, record);
}
