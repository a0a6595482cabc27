//! Task graph construction: per-process graphs, the global cross-process
//! graph, and send/recv matching.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;
use taskprof_trace::record::{Record, RecordPayload};
use taskprof_trace::{Pid, RankMap, RecordStore, TraceError, Uid, INITIAL_PARENT_UID};

use crate::replay::ProcessReplay;

/// Globally unique task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub pid: Pid,
    pub uid: Uid,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tx{}x{}", self.pid, self.uid)
    }
}

/// One scheduled task. Tasks that never ran (cancelled) and the runtime's
/// initial task produce no node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub priority: u32,
    pub omp_priority: u32,
    /// Total compute time: sum of schedule-pair durations, µs.
    pub time: u64,
    /// First schedule id of the task; orders nodes by execution.
    pub schedule_id: u32,
    /// Index of the penultimate schedule record, the task's last run entry.
    pub last_sched: usize,
    pub successors: Vec<Uid>,
    pub predecessors: Vec<Uid>,
    /// Position on the critical path, if the node is on it.
    pub critical_index: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ProcessGraph {
    pub pid: Pid,
    pub nodes: BTreeMap<Uid, Node>,
    pub roots: Vec<Uid>,
    pub leaves: Vec<Uid>,
    pub last_schedule_id: u32,
}

/// Key of the communications index: (comm, src rank, dst rank, count,
/// dtype, tag). BTreeMap order gives the stable matching order.
pub type CommKey = (u32, u32, u32, u32, u32, u32);

/// Send and receive record references accumulated under one key.
#[derive(Debug, Default)]
pub struct CommBucket {
    pub sends: Vec<(Pid, usize)>,
    pub recvs: Vec<(Pid, usize)>,
}

#[derive(Debug, Default)]
pub struct GlobalGraph {
    pub graphs: BTreeMap<Pid, ProcessGraph>,
    pub send_to_recv: BTreeMap<NodeId, Vec<NodeId>>,
    pub recv_to_send: BTreeMap<NodeId, Vec<NodeId>>,
    pub roots: Vec<NodeId>,
    pub leaves: Vec<NodeId>,
    pub communications: BTreeMap<CommKey, CommBucket>,
    pub unmatched_sends: usize,
    pub unmatched_recvs: usize,
}

impl GlobalGraph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graphs.get(&id.pid).and_then(|g| g.nodes.get(&id.uid))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.graphs
            .get_mut(&id.pid)
            .and_then(|g| g.nodes.get_mut(&id.uid))
    }

    pub fn node_count(&self) -> usize {
        self.graphs.values().map(|g| g.nodes.len()).sum()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graphs.values().flat_map(|g| g.nodes.values())
    }

    /// Intra-process arcs, counting edges into cancelled successors too.
    pub fn arc_count(&self) -> usize {
        self.nodes().map(|n| n.successors.len()).sum()
    }

    /// Send records referenced by the communications index.
    pub fn remote_arc_count(&self) -> usize {
        self.communications.values().map(|b| b.sends.len()).sum()
    }
}

/// Build one process graph from a finished replay.
pub fn build_process_graph(
    replay: &ProcessReplay,
    records: &[Record],
) -> Result<ProcessGraph, TraceError> {
    let pid = replay.pid;
    let mut graph = ProcessGraph {
        pid,
        ..ProcessGraph::default()
    };

    for (uid, handle) in &replay.state.tasks {
        let create = match &records[handle.create].payload {
            RecordPayload::Create(c) => c,
            _ => {
                return Err(TraceError::inconsistent(
                    pid,
                    *uid,
                    "task handle does not point at a Create record",
                ))
            }
        };
        if create.parent_uid == INITIAL_PARENT_UID {
            continue;
        }
        let scheds = match replay.state.schedules.get(uid) {
            Some(scheds) if !scheds.is_empty() => scheds,
            // never scheduled: cancelled before it could run
            _ => continue,
        };

        let mut time = 0u64;
        for pair in scheds.chunks(2) {
            if pair.len() == 2 {
                time += records[pair[1]].time.saturating_sub(records[pair[0]].time);
            }
        }
        let first = match &records[scheds[0]].payload {
            RecordPayload::Schedule(s) => s,
            _ => {
                return Err(TraceError::inconsistent(
                    pid,
                    *uid,
                    "schedule index does not point at a Schedule record",
                ))
            }
        };
        let schedule_id = scheds
            .iter()
            .filter_map(|&i| match &records[i].payload {
                RecordPayload::Schedule(s) => Some(s.schedule_id),
                _ => None,
            })
            .min()
            .unwrap_or(first.schedule_id);

        let node = Node {
            id: NodeId { pid, uid: *uid },
            label: create.label.clone(),
            priority: first.priority,
            omp_priority: create.omp_priority,
            time,
            schedule_id,
            last_sched: scheds[scheds.len() - 2],
            successors: replay
                .state
                .successors
                .get(uid)
                .cloned()
                .unwrap_or_default(),
            predecessors: replay
                .state
                .predecessor_uids
                .get(uid)
                .cloned()
                .unwrap_or_default(),
            critical_index: None,
        };
        graph.last_schedule_id = graph.last_schedule_id.max(node.schedule_id);
        if node.predecessors.is_empty() {
            graph.roots.push(*uid);
        }
        if node.successors.is_empty() {
            graph.leaves.push(*uid);
        }
        graph.nodes.insert(*uid, node);
    }
    Ok(graph)
}

/// Assemble the global graph: per-process graphs, the communications
/// index, and cross-process send→recv edges matched in stable key order.
pub fn build_global_graph(
    replays: &BTreeMap<Pid, ProcessReplay>,
    store: &RecordStore,
    ranks: &RankMap,
) -> Result<GlobalGraph, TraceError> {
    let mut global = GlobalGraph::default();

    for (pid, replay) in replays {
        let graph = build_process_graph(replay, store.records(*pid))?;
        global.graphs.insert(*pid, graph);
    }

    // Index every send and recv under its full routing key. Ranks address
    // the processes; the source of a send is the sender's own rank and the
    // destination of a recv is the receiver's own rank.
    for (pid, replay) in replays {
        let records = store.records(*pid);
        let rank = ranks.rank_of(*pid);
        for &i in &replay.state.sends {
            if let RecordPayload::Send(s) = &records[i].payload {
                let key = (s.comm, rank, s.dst, s.count, s.dtype, s.tag);
                global
                    .communications
                    .entry(key)
                    .or_default()
                    .sends
                    .push((*pid, i));
            }
        }
        for &i in &replay.state.recvs {
            if let RecordPayload::Recv(r) = &records[i].payload {
                let key = (r.comm, r.src, rank, r.count, r.dtype, r.tag);
                global
                    .communications
                    .entry(key)
                    .or_default()
                    .recvs
                    .push((*pid, i));
            }
        }
    }

    // Pair the i-th send with the i-th recv under each key. The remainder
    // is kept for diagnostics; origin ranks may simply be untraced.
    for (key, bucket) in &global.communications {
        let matched = bucket.sends.len().min(bucket.recvs.len());
        global.unmatched_sends += bucket.sends.len() - matched;
        global.unmatched_recvs += bucket.recvs.len() - matched;
        for i in 0..matched {
            let (spid, sidx) = bucket.sends[i];
            let (rpid, ridx) = bucket.recvs[i];
            let suid = match &store.records(spid)[sidx].payload {
                RecordPayload::Send(s) => s.uid,
                _ => continue,
            };
            let ruid = match &store.records(rpid)[ridx].payload {
                RecordPayload::Recv(r) => r.uid,
                _ => continue,
            };
            let sid = NodeId {
                pid: spid,
                uid: suid,
            };
            let rid = NodeId {
                pid: rpid,
                uid: ruid,
            };
            let have_both = global.node(sid).is_some() && global.node(rid).is_some();
            if !have_both {
                warn!(
                    "communication {key:?}: endpoint task missing from the graph ({sid} -> {rid})"
                );
                continue;
            }
            global.send_to_recv.entry(sid).or_default().push(rid);
            global.recv_to_send.entry(rid).or_default().push(sid);
        }
    }

    if global.unmatched_sends > 0 || global.unmatched_recvs > 0 {
        warn!(
            "partial communication: {} unmatched sends, {} unmatched recvs",
            global.unmatched_sends, global.unmatched_recvs
        );
    }

    // Global endpoints: local roots/leaves that are not glued to another
    // process by a communication edge.
    for graph in global.graphs.values() {
        for &uid in &graph.leaves {
            let id = NodeId {
                pid: graph.pid,
                uid,
            };
            if !global.send_to_recv.contains_key(&id) {
                global.leaves.push(id);
            }
        }
        for &uid in &graph.roots {
            let id = NodeId {
                pid: graph.pid,
                uid,
            };
            if !global.recv_to_send.contains_key(&id) {
                global.roots.push(id);
            }
        }
    }

    Ok(global)
}
