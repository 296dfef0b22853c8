//! Trace loading: turns a `.g`/`.json` trace pair into a [`crate::graph::Job`]
//! with its chain colors already assigned, plus whatever `.optimal`
//! placement hints accompany it (specification §4.8, §6).
//!
//! Grounded on `examples/original_source/simulator/job.py`'s trace
//! ingestion: `.g` is the vertex/edge list (`v,<vid>,<name>` /
//! `e,<src>,<dst>`), `.json` carries each task's output size and
//! `compute` start/stop pair plus its trace-recorded `worker`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;

use chainsim_bytes::Payload;

use crate::chains::assign_colors;
use crate::error::TraceError;
use crate::graph::{Job, JobHandle, Task, TaskId};
use crate::scheduler::PlacementHints;

/// One `compute`/`transfer`/... interval recorded for a task.
#[derive(Debug, Clone, Deserialize)]
pub struct StartStop {
    /// The interval's kind; only `"compute"` is consumed.
    pub action: String,
    /// Interval start, virtual time units.
    pub start: f64,
    /// Interval end, virtual time units.
    pub stop: f64,
}

/// A task's `msg` sub-record: its output size and recorded intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceMsg {
    /// Output object size, bytes.
    pub nbytes: u64,
    /// Every recorded interval for this task.
    pub startstops: Vec<StartStop>,
}

/// One task entry in a `.json` trace.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceTaskEntry {
    /// This task's size/timing record.
    pub msg: TraceMsg,
    /// The worker this task ran on in the trace, as a `scheme://ip:port/...`
    /// style string (`examples/original_source/job.py`'s Dask-style worker
    /// address). Only the `ip` component is used, by [`extract_ip`].
    pub worker: String,
}

/// The parsed contents of a `.g` file: vertices in declaration order and
/// validated edges.
#[derive(Debug, Clone, Default)]
pub struct GraphRecord {
    /// `(vertex id, name)` pairs, in file order.
    pub vertices: Vec<(u64, String)>,
    /// `(src vertex id, dst vertex id)` edges.
    pub edges: Vec<(u64, u64)>,
}

/// Parses a single numeric `.g` field, rejecting a missing or non-`u64`
/// value instead of silently defaulting it to `0` -- a malformed id would
/// otherwise collide with a real vertex 0 and corrupt the graph silently.
fn parse_vid(kind: &'static str, field: &'static str, raw: Option<&str>) -> Result<u64, TraceError> {
    let raw = raw.unwrap_or_default().trim();
    raw.parse().map_err(|_| TraceError::MalformedField { kind, field, value: raw.to_string() })
}

/// Parses a `.g` file's `v,<vid>,<name>` / `e,<src>,<dst>` records,
/// rejecting an edge that names a vertex id never declared.
pub fn parse_graph(text: &str) -> Result<GraphRecord, TraceError> {
    let mut record = GraphRecord::default();
    let mut seen = std::collections::HashSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split(',');
        match parts.next() {
            Some("v") => {
                let vid = parse_vid("v", "vid", parts.next())?;
                let name = parts.next().unwrap_or_default().trim().to_string();
                seen.insert(vid);
                record.vertices.push((vid, name));
            }
            Some("e") => {
                let src = parse_vid("e", "src", parts.next())?;
                let dst = parse_vid("e", "dst", parts.next())?;
                if !seen.contains(&src) {
                    return Err(TraceError::UnknownVertex(src));
                }
                if !seen.contains(&dst) {
                    return Err(TraceError::UnknownVertex(dst));
                }
                record.edges.push((src, dst));
            }
            _ => {}
        }
    }
    Ok(record)
}

/// Extracts the `ip` component from a `scheme://ip:port/...`-style worker
/// address, or returns the input unchanged if it doesn't look like one.
fn extract_ip(worker_field: &str) -> String {
    let after_scheme = worker_field.split("://").nth(1).unwrap_or(worker_field);
    let host = after_scheme.split('/').next().unwrap_or(after_scheme);
    host.split(':').next().unwrap_or(host).to_string()
}

/// Builds a [`Job`] (with chain colors already assigned) and its
/// trace-recorded `vanilla` placement hints from a parsed `.g`/`.json`
/// pair.
pub fn build_job(name: &str, graph: &GraphRecord, timings: &HashMap<String, TraceTaskEntry>) -> Result<(Job, PlacementHints), TraceError> {
    let mut job = Job::new(name);
    let mut vid_to_task: HashMap<u64, TaskId> = HashMap::with_capacity(graph.vertices.len());
    let mut hints = PlacementHints::default();

    for (vid, vname) in &graph.vertices {
        let entry = timings.get(vname).ok_or_else(|| TraceError::UnknownTask(vname.clone()))?;
        let compute = entry
            .msg
            .startstops
            .iter()
            .find(|s| s.action == "compute")
            .ok_or_else(|| TraceError::MissingStartStop(vname.clone()))?;
        let exec_time = (compute.stop - compute.start).max(0.0);
        let size = Payload::of_size(entry.msg.nbytes);
        let task_id = job.add_task(|id| Task::new(id, vname.clone(), exec_time, size));
        vid_to_task.insert(*vid, task_id);
        hints.vanilla.insert(task_id, extract_ip(&entry.worker));
    }

    for &(src, dst) in &graph.edges {
        let src_id = *vid_to_task.get(&src).expect("parse_graph validated every edge's endpoints");
        let dst_id = *vid_to_task.get(&dst).expect("parse_graph validated every edge's endpoints");
        job.add_edge(src_id, dst_id);
        job.tasks[dst_id].inputs.push(src_id);
    }

    if let Some(cycle) = job.find_cycle() {
        return Err(TraceError::CycleDetected(cycle));
    }

    assign_colors(&mut job);
    Ok((job, hints))
}

/// Parses a `.optimal` file's `task_name,start_ts,worker_id` rows.
pub fn parse_optimal(text: &str) -> HashMap<String, (f64, String)> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split(',');
        if let (Some(name), Some(start), Some(worker)) = (parts.next(), parts.next(), parts.next()) {
            if let Ok(start_ts) = start.trim().parse::<f64>() {
                out.insert(name.trim().to_string(), (start_ts, worker.trim().to_string()));
            }
        }
    }
    out
}

/// Folds a parsed `.optimal` map into `hints.optimal`, keyed by task id.
pub fn apply_optimal_hints(job: &Job, hints: &mut PlacementHints, optimal: &HashMap<String, (f64, String)>) {
    for (name, (start, worker)) in optimal {
        if let Some(id) = job.id_of(name) {
            hints.optimal.insert(id, (*start, worker.clone()));
        }
    }
}

/// Parses a `.colors` ground-truth file's `task_name,color` rows. Not
/// consumed by the scheduler itself; provided for tests and diagnostics
/// that compare this crate's computed coloring against a trace's recorded
/// one.
pub fn parse_colors(text: &str) -> HashMap<String, i64> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split(',');
        if let (Some(name), Some(color)) = (parts.next(), parts.next()) {
            if let Ok(c) = color.trim().parse::<i64>() {
                out.insert(name.trim().to_string(), c);
            }
        }
    }
    out
}

/// Loads `<workload_dir>/<name>.g` and `.json` (required), plus
/// `<name>.optimal` (optional), building a ready-to-admit job.
pub fn load_job(workload_dir: &Path, name: &str) -> Result<(JobHandle, PlacementHints), TraceError> {
    let g_text = std::fs::read_to_string(workload_dir.join(format!("{name}.g")))?;
    let json_text = std::fs::read_to_string(workload_dir.join(format!("{name}.json")))?;

    let graph = parse_graph(&g_text)?;
    let timings: HashMap<String, TraceTaskEntry> = serde_json::from_str(&json_text)?;
    let (job, mut hints) = build_job(name, &graph, &timings)?;

    let optimal_path = workload_dir.join(format!("{name}.optimal"));
    if optimal_path.exists() {
        let text = std::fs::read_to_string(&optimal_path)?;
        apply_optimal_hints(&job, &mut hints, &parse_optimal(&text));
    }

    Ok((Rc::new(RefCell::new(job)), hints))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(nbytes: u64, start: f64, stop: f64, worker: &str) -> TraceTaskEntry {
        TraceTaskEntry {
            msg: TraceMsg { nbytes, startstops: vec![StartStop { action: "compute".into(), start, stop }] },
            worker: worker.to_string(),
        }
    }

    #[test]
    fn parses_vertices_and_edges() {
        let g = "v,0,a\nv,1,b\ne,0,1\n";
        let graph = parse_graph(g).unwrap();
        assert_eq!(graph.vertices, vec![(0, "a".to_string()), (1, "b".to_string())]);
        assert_eq!(graph.edges, vec![(0, 1)]);
    }

    #[test]
    fn edge_to_unknown_vertex_is_rejected() {
        let g = "v,0,a\ne,0,5\n";
        assert!(matches!(parse_graph(g), Err(TraceError::UnknownVertex(5))));
    }

    #[test]
    fn malformed_vertex_id_is_rejected_not_defaulted() {
        let g = "v,not-a-number,a\n";
        assert!(matches!(parse_graph(g), Err(TraceError::MalformedField { kind: "v", field: "vid", .. })));
    }

    #[test]
    fn malformed_edge_endpoint_is_rejected_not_defaulted() {
        let g = "v,0,a\ne,0,not-a-number\n";
        assert!(matches!(parse_graph(g), Err(TraceError::MalformedField { kind: "e", field: "dst", .. })));
    }

    #[test]
    fn extracts_ip_from_scheme_and_port() {
        assert_eq!(extract_ip("tcp://10.0.0.1:9000/0"), "10.0.0.1");
        assert_eq!(extract_ip("10.0.0.2"), "10.0.0.2");
    }

    #[test]
    fn builds_linear_job_with_vanilla_hints() {
        let graph = parse_graph("v,0,a\nv,1,b\ne,0,1\n").unwrap();
        let mut timings = HashMap::new();
        timings.insert("a".to_string(), entry(10, 0.0, 5.0, "tcp://10.0.0.1:9000/0"));
        timings.insert("b".to_string(), entry(10, 5.0, 15.0, "tcp://10.0.0.2:9000/0"));
        let (job, hints) = build_job("j", &graph, &timings).unwrap();
        assert_eq!(job.len(), 2);
        assert_eq!(job.tasks[1].inputs, vec![0]);
        assert_eq!(hints.vanilla[&0], "10.0.0.1");
        assert!(job.tasks[0].color >= 0, "chain colors must be assigned after build_job");
    }

    #[test]
    fn missing_compute_interval_is_fatal() {
        let graph = parse_graph("v,0,a\n").unwrap();
        let mut timings = HashMap::new();
        let mut e = entry(10, 0.0, 5.0, "10.0.0.1");
        e.msg.startstops[0].action = "transfer".into();
        timings.insert("a".to_string(), e);
        assert!(matches!(build_job("j", &graph, &timings), Err(TraceError::MissingStartStop(_))));
    }

    #[test]
    fn optimal_rows_parse_into_task_and_worker() {
        let optimal = parse_optimal("a,1.5,10.0.0.1\nb,2.0,10.0.0.2\n");
        assert_eq!(optimal["a"], (1.5, "10.0.0.1".to_string()));
    }

    #[test]
    fn colors_file_parses_ground_truth() {
        let colors = parse_colors("a,3\nb,7\n");
        assert_eq!(colors["a"], 3);
        assert_eq!(colors["b"], 7);
    }
}
