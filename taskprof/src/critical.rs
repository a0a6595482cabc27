//! Longest path over the global task DAG, weighted by node compute time.

use std::collections::{HashMap, VecDeque};

use log::info;
use taskprof_trace::TraceError;

use crate::graph::{GlobalGraph, NodeId};

#[derive(Debug, Clone)]
pub struct CriticalPath {
    /// Node identities along the path, source first.
    pub nodes: Vec<NodeId>,
    /// Path weight: sum of compute times along it, µs.
    pub total_time: u64,
}

/// BFS relaxation from every per-process root. Successors are the node's
/// intra-process successors plus its send→recv edges. Edges always point
/// forward in time, so a node relaxed more often than there are nodes
/// means the input was not a DAG.
pub fn compute(graph: &GlobalGraph) -> Result<CriticalPath, TraceError> {
    let nnodes = graph.node_count();
    let mut distance: HashMap<NodeId, u64> = HashMap::with_capacity(nnodes);
    let mut predecessor: HashMap<NodeId, NodeId> = HashMap::new();
    let mut relaxed: HashMap<NodeId, usize> = HashMap::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    for process in graph.graphs.values() {
        for &uid in &process.roots {
            let id = NodeId {
                pid: process.pid,
                uid,
            };
            let time = match graph.node(id) {
                Some(node) => node.time,
                None => continue,
            };
            let entry = distance.entry(id).or_insert(0);
            if *entry < time {
                *entry = time;
            }
            queue.push_back(id);

            while let Some(current) = queue.pop_front() {
                let node = match graph.node(current) {
                    Some(node) => node,
                    None => continue,
                };
                let base = distance[&current];
                let intra = node.successors.iter().map(|&uid| NodeId {
                    pid: current.pid,
                    uid,
                });
                let remote = graph
                    .send_to_recv
                    .get(&current)
                    .into_iter()
                    .flatten()
                    .copied();
                for succ in intra.chain(remote) {
                    let succ_time = match graph.node(succ) {
                        Some(node) => node.time,
                        // successor was cancelled and never became a node
                        None => continue,
                    };
                    let candidate = base + succ_time;
                    if distance.get(&succ).map_or(true, |&d| candidate > d) {
                        distance.insert(succ, candidate);
                        predecessor.insert(succ, current);
                        let count = relaxed.entry(succ).or_insert(0);
                        *count += 1;
                        if *count > nnodes {
                            return Err(TraceError::CycleDetected {
                                node: succ.to_string(),
                            });
                        }
                        queue.push_back(succ);
                    }
                }
            }
        }
    }

    // The path ends at the best leaf; if every leaf feeds a remote edge,
    // fall back to the best-distance node overall.
    let end = graph
        .leaves
        .iter()
        .copied()
        .filter(|id| distance.contains_key(id))
        .max_by_key(|id| distance[id])
        .or_else(|| distance.iter().max_by_key(|(_, &d)| d).map(|(&id, _)| id));
    let end = match end {
        Some(end) => end,
        None => {
            return Ok(CriticalPath {
                nodes: Vec::new(),
                total_time: 0,
            })
        }
    };

    let mut nodes = vec![end];
    let mut current = end;
    while let Some(&prev) = predecessor.get(&current) {
        nodes.push(prev);
        current = prev;
    }
    nodes.reverse();

    Ok(CriticalPath {
        total_time: distance[&end],
        nodes,
    })
}

/// Stamp each node of the path with its position, for the DOT rendering.
pub fn mark(graph: &mut GlobalGraph, path: &CriticalPath) {
    for (index, &id) in path.nodes.iter().enumerate() {
        if let Some(node) = graph.node_mut(id) {
            node.critical_index = Some(index);
        }
    }
}

/// Log the work/span summary: total work T1, span T∞, thread count P and
/// the longest single-process wall time TP. T∞ ≤ TP ≤ T1 on a well-formed
/// trace.
pub fn log_work_span(graph: &GlobalGraph, path: &CriticalPath, nthreads: usize, max_wall: u64) {
    let work: u64 = graph.nodes().map(|n| n.time).sum();
    info!(
        "work/span: T1 = {:.6}s, Tinf = {:.6}s, P = {}, TP = {:.6}s",
        work as f64 * 1e-6,
        path.total_time as f64 * 1e-6,
        nthreads,
        max_wall as f64 * 1e-6,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, ProcessGraph};
    use std::collections::BTreeMap;

    fn node(pid: u32, uid: u32, time: u64, successors: Vec<u32>, predecessors: Vec<u32>) -> Node {
        Node {
            id: NodeId { pid, uid },
            label: format!("t{uid}"),
            priority: 0,
            omp_priority: 0,
            time,
            schedule_id: uid,
            last_sched: 0,
            successors,
            predecessors,
            critical_index: None,
        }
    }

    fn single_process(nodes: Vec<Node>) -> GlobalGraph {
        let pid = 0;
        let mut graph = ProcessGraph {
            pid,
            ..ProcessGraph::default()
        };
        for n in nodes {
            if n.predecessors.is_empty() {
                graph.roots.push(n.id.uid);
            }
            if n.successors.is_empty() {
                graph.leaves.push(n.id.uid);
            }
            graph.nodes.insert(n.id.uid, n);
        }
        let mut graphs = BTreeMap::new();
        let leaves = graph
            .leaves
            .iter()
            .map(|&uid| NodeId { pid, uid })
            .collect();
        let roots = graph
            .roots
            .iter()
            .map(|&uid| NodeId { pid, uid })
            .collect();
        graphs.insert(pid, graph);
        GlobalGraph {
            graphs,
            leaves,
            roots,
            ..GlobalGraph::default()
        }
    }

    #[test]
    fn chain_weight_is_the_sum_of_node_times() {
        let graph = single_process(vec![
            node(0, 1, 90, vec![2], vec![]),
            node(0, 2, 50, vec![], vec![1]),
        ]);
        let path = compute(&graph).unwrap();
        assert_eq!(path.total_time, 140);
        assert_eq!(
            path.nodes,
            vec![NodeId { pid: 0, uid: 1 }, NodeId { pid: 0, uid: 2 }]
        );
    }

    #[test]
    fn heavier_branch_wins() {
        let graph = single_process(vec![
            node(0, 1, 10, vec![2, 3], vec![]),
            node(0, 2, 100, vec![4], vec![1]),
            node(0, 3, 5, vec![4], vec![1]),
            node(0, 4, 1, vec![], vec![2, 3]),
        ]);
        let path = compute(&graph).unwrap();
        assert_eq!(path.total_time, 111);
        assert_eq!(
            path.nodes.iter().map(|n| n.uid).collect::<Vec<_>>(),
            vec![1, 2, 4]
        );
    }

    #[test]
    fn distance_is_strictly_increasing_along_the_path() {
        let graph = single_process(vec![
            node(0, 1, 7, vec![2], vec![]),
            node(0, 2, 11, vec![3], vec![1]),
            node(0, 3, 13, vec![], vec![2]),
        ]);
        let path = compute(&graph).unwrap();
        let mut acc = 0;
        for id in &path.nodes {
            let t = graph.node(*id).unwrap().time;
            assert!(t > 0);
            acc += t;
        }
        assert_eq!(acc, path.total_time);
    }

    #[test]
    fn cycle_is_detected() {
        let graph = single_process(vec![
            node(0, 1, 1, vec![2], vec![]),
            node(0, 2, 1, vec![3], vec![1]),
            node(0, 3, 1, vec![2], vec![2]),
        ]);
        assert!(matches!(
            compute(&graph),
            Err(TraceError::CycleDetected { .. })
        ));
    }

    #[test]
    fn empty_graph_yields_an_empty_path() {
        let graph = GlobalGraph::default();
        let path = compute(&graph).unwrap();
        assert!(path.nodes.is_empty());
        assert_eq!(path.total_time, 0);
    }
}
