//! DagChains: chain decomposition and hierarchical chain merging
//! (specification §4.6), grounded directly on
//! `examples/original_source/simulator/coloringcolocation.py` (mirrored in
//! `job.py`'s own copy of the same pipeline). The `graph_tool`
//! vertex-property tables become plain indexed `Vec`s over [`crate::graph::Job`].
//!
//! All three phases are driven through explicit stacks rather than
//! recursion (the Python original recurses per-vertex in `DFS`), since a
//! Rust implementation has no guarantee of the original's effectively
//! unbounded call stack and a deep DAG should not risk overflowing ours.

use std::collections::HashMap;

use crate::graph::{Job, TaskId};

/// Runs the full three-phase pipeline: chain decomposition, iterative
/// hierarchical merge, and bit encoding. Mutates every task's `color`,
/// `child_color`, `color_history`, and `hcolor_bits` in place.
pub fn assign_colors(job: &mut Job) {
    let n_chains = chain_decomposition(job);
    hierarchical_merge(job, n_chains);
    bit_encode(job);
}

/// Phase A: chain decomposition by Simon (1988)'s topological-sort-based
/// algorithm. Returns the number of chains (colors) produced.
pub fn chain_decomposition(job: &mut Job) -> usize {
    let n = job.len();
    if n == 0 {
        return 0;
    }

    let (close_time, sorted_nodes) = topological_close_order(job);

    let mut color = vec![-1i64; n];
    let mut child_color = vec![-1i64; n];
    let mut next_color: i64 = 0;

    for &v in &sorted_nodes {
        if color[v] != -1 {
            continue;
        }
        let c = next_color;
        next_color += 1;
        color[v] = c;
        let mut cur = v;
        loop {
            // Among uncolored out-neighbors, follow the one with the
            // largest close time, to avoid splitting a straight chain
            // (specification §4.6 Phase A, step 2).
            let mut chosen: Option<TaskId> = None;
            let mut best_close = -1i64;
            for &w in &job.out_adj[cur] {
                if color[w] == -1 && close_time[w] as i64 > best_close {
                    best_close = close_time[w] as i64;
                    chosen = Some(w);
                }
            }
            match chosen {
                Some(w) => {
                    color[w] = c;
                    child_color[cur] = c;
                    cur = w;
                }
                None => {
                    child_color[cur] = color[cur];
                    break;
                }
            }
        }
    }

    for v in 0..n {
        job.tasks[v].color = color[v];
        job.tasks[v].child_color = child_color[v];
    }

    next_color as usize
}

/// Iterative DFS from every source vertex, returning each vertex's close
/// time and the reverse-close-time topological order ("sorted_nodes" in
/// the Python original).
fn topological_close_order(job: &Job) -> (Vec<usize>, Vec<TaskId>) {
    let n = job.len();
    let mut visited = vec![false; n];
    let mut close_time = vec![0usize; n];
    let mut finish_order = Vec::with_capacity(n);
    let mut clock = 0usize;

    for start in job.source_tasks() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        clock += 1;
        let mut stack: Vec<(TaskId, usize)> = vec![(start, 0)];
        while let Some(&mut (v, ref mut next_child)) = stack.last_mut() {
            if *next_child < job.out_adj[v].len() {
                let w = job.out_adj[v][*next_child];
                *next_child += 1;
                if !visited[w] {
                    visited[w] = true;
                    clock += 1;
                    stack.push((w, 0));
                }
            } else {
                close_time[v] = clock;
                clock += 1;
                finish_order.push(v);
                stack.pop();
            }
        }
    }

    finish_order.reverse();
    (close_time, finish_order)
}

/// Phase B: repeatedly build the cross-chain adjacency matrix and merge
/// until no cross-chain edges remain, snapshotting each round's coloring
/// into every task's `color_history`.
pub fn hierarchical_merge(job: &mut Job, n_chains: usize) {
    if n_chains == 0 {
        return;
    }
    loop {
        let h = build_adjacency(job, n_chains);
        if h.iter().all(|row| row.iter().all(|&x| x == 0)) {
            break;
        }
        let mut h = h;
        let merged = merge_chains(n_chains, &mut h);
        recolor(job, &merged);
    }
    checkpoint(job);
}

fn build_adjacency(job: &Job, n_chains: usize) -> Vec<Vec<u32>> {
    let mut h = vec![vec![0u32; n_chains]; n_chains];
    let mut visited = vec![false; job.len()];
    let mut stack: Vec<TaskId> = Vec::new();
    for s in job.source_tasks() {
        if !visited[s] {
            visited[s] = true;
            stack.push(s);
        }
    }
    while let Some(v) = stack.pop() {
        let cv = job.tasks[v].color as usize;
        for &w in &job.out_adj[v] {
            let cw = job.tasks[w].color as usize;
            if cv != cw {
                h[cv][cw] += 1;
                h[cw][cv] += 1;
            }
            if !visited[w] {
                visited[w] = true;
                stack.push(w);
            }
        }
    }
    h
}

/// For each unassigned color (ascending), merges in the neighbor with the
/// smallest row-sum (tie -> lowest index), zeroing both colors' rows and
/// columns. Returns the merge map: `merged[c]` is the color `c` was folded
/// into (or `c` itself if untouched).
fn merge_chains(n_chains: usize, h: &mut [Vec<u32>]) -> Vec<usize> {
    let mut merged: Vec<Option<usize>> = vec![None; n_chains];
    for ch in 0..n_chains {
        if merged[ch].is_some() {
            continue;
        }
        merged[ch] = Some(ch);
        let mut best: Option<usize> = None;
        let mut best_sum: u64 = u64::MAX;
        for opt in 0..n_chains {
            if h[ch][opt] > 0 {
                let row_sum: u64 = h[opt].iter().map(|&x| x as u64).sum();
                if row_sum < best_sum {
                    best_sum = row_sum;
                    best = Some(opt);
                }
            }
        }
        if let Some(m_color) = best {
            merged[m_color] = Some(ch);
            for k in 0..n_chains {
                h[m_color][k] = 0;
                h[k][m_color] = 0;
            }
            for k in 0..n_chains {
                h[ch][k] = 0;
                h[k][ch] = 0;
            }
        }
    }
    merged.into_iter().map(|o| o.expect("every color visited")).collect()
}

fn checkpoint(job: &mut Job) {
    for task in &mut job.tasks {
        let c = task.color;
        task.color_history.push(c);
    }
}

fn recolor(job: &mut Job, merged: &[usize]) {
    checkpoint(job);
    for task in &mut job.tasks {
        task.color = merged[task.color as usize] as i64;
    }
}

/// Phase C: bit-encodes the hierarchical color by folding `color_history`
/// backward from its last (coarsest) snapshot to its first (finest,
/// Phase-A) snapshot.
pub fn bit_encode(job: &mut Job) {
    if job.is_empty() {
        return;
    }
    let n_steps = job.tasks[0].color_history.len();
    if n_steps == 0 {
        return;
    }

    let mut fc_prev: HashMap<i64, i64> = HashMap::new();
    for s in (0..n_steps).rev() {
        let mut fc_cur: HashMap<i64, i64> = HashMap::new();
        if s == n_steps - 1 {
            // Coarsest snapshot: there is no parent level to diverge from,
            // so each distinct color here is its own root. Enumerate them
            // in ascending order rather than collapsing every root to a
            // shared 0 -- two chains that never shared a merge round (no
            // cross edges at all between them) must stay distinguishable,
            // or every placement policy keyed on the final color would see
            // them as one.
            let mut roots: Vec<i64> = job.tasks.iter().map(|t| t.color_history[s]).collect();
            roots.sort_unstable();
            roots.dedup();
            for (idx, c) in roots.into_iter().enumerate() {
                fc_cur.insert(c, idx as i64);
            }
        } else {
            for task in &job.tasks {
                let c = task.color_history[s];
                let c_old = task.color_history[s + 1];
                let base = fc_prev[&c_old] << 1;
                let value = base | i64::from(c != c_old);
                fc_cur.entry(c).or_insert(value);
            }
        }
        fc_prev = fc_cur;
    }

    for task in &mut job.tasks {
        let finest = task.color_history[0];
        task.color = fc_prev[&finest];
        task.hcolor_bits = n_steps as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Task;
    use chainsim_bytes::Payload;
    use proptest::prelude::*;

    fn chain_job(len: usize) -> Job {
        let mut job = Job::new("chain");
        let mut prev = None;
        for i in 0..len {
            let id = job.add_task(|id| Task::new(id, format!("t{i}"), 1.0, Payload::of_size(1)));
            if let Some(p) = prev {
                job.add_edge(p, id);
                job.tasks[id].inputs.push(p);
            }
            prev = Some(id);
        }
        job
    }

    #[test]
    fn linear_chain_gets_a_single_color() {
        let mut job = chain_job(4);
        let n_chains = chain_decomposition(&mut job);
        assert_eq!(n_chains, 1);
        let colors: Vec<i64> = job.tasks.iter().map(|t| t.color).collect();
        assert!(colors.iter().all(|&c| c == colors[0]));
    }

    #[test]
    fn every_vertex_gets_a_color() {
        let mut job = chain_job(6);
        chain_decomposition(&mut job);
        assert!(job.tasks.iter().all(|t| t.color != -1));
    }

    #[test]
    fn diamond_splits_into_two_chains() {
        // a -> b -> d, a -> c -> d: b and c cannot share a's chain both at
        // once, so decomposition must produce exactly two chains.
        let mut job = Job::new("diamond");
        let a = job.add_task(|id| Task::new(id, "a", 1.0, Payload::of_size(1)));
        let b = job.add_task(|id| Task::new(id, "b", 1.0, Payload::of_size(1)));
        let c = job.add_task(|id| Task::new(id, "c", 1.0, Payload::of_size(1)));
        let d = job.add_task(|id| Task::new(id, "d", 1.0, Payload::of_size(1)));
        for (s, t) in [(a, b), (a, c), (b, d), (c, d)] {
            job.add_edge(s, t);
            job.tasks[t].inputs.push(s);
        }
        let n_chains = chain_decomposition(&mut job);
        assert_eq!(n_chains, 2);
    }

    #[test]
    fn hierarchical_merge_terminates_with_zero_matrix() {
        let mut job = Job::new("diamond");
        let a = job.add_task(|id| Task::new(id, "a", 1.0, Payload::of_size(1)));
        let b = job.add_task(|id| Task::new(id, "b", 1.0, Payload::of_size(1)));
        let c = job.add_task(|id| Task::new(id, "c", 1.0, Payload::of_size(1)));
        let d = job.add_task(|id| Task::new(id, "d", 1.0, Payload::of_size(1)));
        for (s, t) in [(a, b), (a, c), (b, d), (c, d)] {
            job.add_edge(s, t);
            job.tasks[t].inputs.push(s);
        }
        let n_chains = chain_decomposition(&mut job);
        hierarchical_merge(&mut job, n_chains);
        let h = build_adjacency(&mut job, n_chains);
        assert!(h.iter().all(|row| row.iter().all(|&x| x == 0)));
    }

    #[test]
    fn coloring_is_idempotent() {
        let mut job1 = chain_job(8);
        let mut job2 = chain_job(8);
        assign_colors(&mut job1);
        assign_colors(&mut job2);
        let colors1: Vec<i64> = job1.tasks.iter().map(|t| t.color).collect();
        let colors2: Vec<i64> = job2.tasks.iter().map(|t| t.color).collect();
        assert_eq!(colors1, colors2);
    }

    #[test]
    fn disjoint_chains_keep_distinct_final_colors() {
        // Regression for the bit_encode collapse this crate used to have:
        // two chains that never share a merge round (no cross edges at
        // all) must not be folded onto the same final color, or every
        // color-keyed placement policy would see them as one chain.
        let mut job = Job::new("disjoint");
        let a1 = job.add_task(|id| Task::new(id, "a1", 1.0, Payload::of_size(1)));
        let a2 = job.add_task(|id| Task::new(id, "a2", 1.0, Payload::of_size(1)));
        let b1 = job.add_task(|id| Task::new(id, "b1", 1.0, Payload::of_size(1)));
        let b2 = job.add_task(|id| Task::new(id, "b2", 1.0, Payload::of_size(1)));
        for (s, t) in [(a1, a2), (b1, b2)] {
            job.add_edge(s, t);
            job.tasks[t].inputs.push(s);
        }
        assign_colors(&mut job);
        assert_eq!(job.tasks[a1].color, job.tasks[a2].color);
        assert_eq!(job.tasks[b1].color, job.tasks[b2].color);
        assert_ne!(job.tasks[a1].color, job.tasks[b1].color);
    }

    fn random_dag(n: usize, edge_bits: u32) -> Job {
        // Every edge goes from a lower to a higher id, which makes the
        // graph acyclic by construction regardless of which bits are set.
        let mut job = Job::new("random");
        for i in 0..n {
            job.add_task(|id| Task::new(id, format!("t{i}"), 1.0, Payload::of_size(1)));
        }
        let mut bit = 0u32;
        for src in 0..n {
            for dst in (src + 1)..n {
                if (edge_bits >> (bit % 32)) & 1 == 1 {
                    job.add_edge(src, dst);
                    job.tasks[dst].inputs.push(src);
                }
                bit += 1;
            }
        }
        job
    }

    proptest! {
        /// Chain decomposition soundness (specification §8): every vertex
        /// is colored exactly once, with a non-negative color, and the
        /// number of chains produced never exceeds the vertex count (a
        /// single vertex is always a valid, if degenerate, chain).
        #[test]
        fn chain_decomposition_colors_every_vertex(n in 1usize..10, edge_bits in any::<u32>()) {
            let mut job = random_dag(n, edge_bits);
            let n_chains = chain_decomposition(&mut job);

            prop_assert!(job.tasks.iter().all(|t| t.color != -1));
            prop_assert!(n_chains >= 1);
            prop_assert!(n_chains <= n);
        }

        /// Running the full pipeline twice on independently built, but
        /// structurally identical, random DAGs yields bit-identical final
        /// colors -- the algorithm has no hidden iteration-order
        /// dependence on anything but the graph's own shape.
        #[test]
        fn assign_colors_is_idempotent_on_random_dags(n in 1usize..10, edge_bits in any::<u32>()) {
            let mut job1 = random_dag(n, edge_bits);
            let mut job2 = random_dag(n, edge_bits);
            assign_colors(&mut job1);
            assign_colors(&mut job2);
            let colors1: Vec<i64> = job1.tasks.iter().map(|t| t.color).collect();
            let colors2: Vec<i64> = job2.tasks.iter().map(|t| t.color).collect();
            prop_assert_eq!(colors1, colors2);
        }
    }
}
