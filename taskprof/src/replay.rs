//! Deterministic scheduling replay.
//!
//! Walks one process's records in canonical order and rebuilds the
//! scheduler's view of it: which tasks were ready, what ran on each
//! hardware thread, when threads idled, and how long paused tasks stayed
//! blocked. All processes are independent; the pipeline replays them one
//! after another and broadcasts lifecycle events to the registered passes.

use std::collections::{BTreeMap, HashMap, HashSet};

use taskprof_trace::record::{Record, RecordPayload, TaskProperties, TaskStatuses};
use taskprof_trace::{Pid, Tid, Time, TraceError, Uid};

use crate::pass::{Dispatcher, Hook, ProcessCtx, TaskCtx};
use crate::progress::Progress;

/// Communication markers attached to a task while its records are seen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommFlags {
    pub send: bool,
    pub recv: bool,
    pub allreduce: bool,
}

impl CommFlags {
    pub fn is_communication(&self) -> bool {
        self.send || self.recv || self.allreduce
    }
}

/// Authoritative per-task record handles.
#[derive(Debug, Clone, Copy)]
pub struct TaskHandle {
    pub create: usize,
    pub delete: Option<usize>,
}

/// A task currently paused on a block.
#[derive(Debug, Clone, Copy)]
pub struct PendingBlock {
    pub blocked: usize,
    pub overlap: u64,
    pub idle: u64,
}

/// One finished block/resume interval of a task.
#[derive(Debug, Clone, Copy)]
pub struct AsyncRun {
    pub blocked: usize,
    pub unblocked: usize,
    /// Time some other task was running while this one was blocked.
    pub overlap: u64,
    /// Time the blocking thread sat idle while this one was blocked.
    pub idle: u64,
}

/// Ready-queue depth statistics, sampled at every start/resume decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct Readiness {
    pub max: usize,
    pub sum: u64,
    pub nschedules: u64,
}

impl Readiness {
    fn observe(&mut self, ready_len: usize) {
        let depth = ready_len + 1;
        self.max = self.max.max(depth);
        self.sum += depth as u64;
        self.nschedules += 1;
    }

    pub fn avg(&self) -> f64 {
        if self.nschedules == 0 {
            0.0
        } else {
            self.sum as f64 / self.nschedules as f64
        }
    }
}

/// Working state of a single process replay. Passes receive it read-only;
/// after the replay it is frozen inside [`ProcessReplay`].
#[derive(Debug, Default)]
pub struct ReplayState {
    pub ready: HashSet<Uid>,
    pub predecessors: HashMap<Uid, u64>,
    pub successors: BTreeMap<Uid, Vec<Uid>>,
    pub predecessor_uids: BTreeMap<Uid, Vec<Uid>>,
    pub tasks: BTreeMap<Uid, TaskHandle>,
    /// Schedule record indices per task, in replay order. Even entries
    /// enter a run, odd entries leave it.
    pub schedules: BTreeMap<Uid, Vec<usize>>,
    /// Per-thread stack of active schedule records; the top is running.
    pub bind: BTreeMap<Tid, Vec<usize>>,
    pub pending: BTreeMap<Uid, PendingBlock>,
    pub completed: BTreeMap<Uid, Vec<AsyncRun>>,
    /// (t, ±1) deltas: +1 when a task blocks, -1 when it resumes.
    pub blocked_deltas: Vec<(Time, i64)>,
    pub readiness: Readiness,
    /// Flat schedule timestamps per task; pairwise differences are run
    /// durations.
    pub granularities: BTreeMap<Uid, Vec<Time>>,
    pub comm_flags: BTreeMap<Uid, CommFlags>,
    pub sends: Vec<usize>,
    pub recvs: Vec<usize>,
    pub idle_time: u64,
    pub first_task_time: Option<Time>,
    pub last_task_time: Option<Time>,
}

/// Per-process time buckets, derived once the replay is done.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessAccounting {
    pub nthreads: usize,
    /// Wall time of the process, `tf - t0`.
    pub wall: u64,
    /// Thread time, `wall * nthreads`.
    pub total: u64,
    pub in_task: u64,
    pub out_task: u64,
    pub idle: u64,
    pub overhead: u64,
    pub send: u64,
    pub recv: u64,
    pub allreduce: u64,
    pub nsend: usize,
    pub nrecv: usize,
    pub nallreduce: usize,
    pub async_total: u64,
    pub async_overlap: u64,
    pub async_idle: u64,
}

/// Outcome of one process replay.
#[derive(Debug)]
pub struct ProcessReplay {
    pub pid: Pid,
    pub rank: u32,
    pub t0: Time,
    pub tf: Time,
    pub state: ReplayState,
    pub accounting: ProcessAccounting,
}

fn schedule_uid(records: &[Record], index: usize) -> Option<Uid> {
    match &records[index].payload {
        RecordPayload::Schedule(s) => Some(s.uid),
        _ => None,
    }
}

/// Replay one process's sorted records, broadcasting lifecycle events.
pub fn replay_process(
    pid: Pid,
    rank: u32,
    records: &[Record],
    dispatcher: &mut Dispatcher,
    progress: &mut Progress,
) -> Result<ProcessReplay, TraceError> {
    let t0 = records.first().map(|r| r.time).unwrap_or(0);
    let tf = records.last().map(|r| r.time).unwrap_or(0);

    let mut state = ReplayState::default();
    for record in records {
        state.bind.entry(record.tid).or_default();
    }

    // Schedule positions per thread, for the idle-window lookup.
    let mut sched_pos: HashMap<Tid, Vec<(usize, Time)>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        if matches!(record.payload, RecordPayload::Schedule(_)) {
            sched_pos.entry(record.tid).or_default().push((i, record.time));
        }
    }

    dispatcher.process_start(&ProcessCtx {
        pid,
        rank,
        t0,
        tf,
        records,
        state: &state,
    });

    for i in 0..records.len() {
        progress.update();
        let record = &records[i];
        let time = record.time;
        let tid = record.tid;
        let mut hooks: Vec<Hook> = Vec::new();

        match &record.payload {
            RecordPayload::Create(c) => {
                if state.tasks.contains_key(&c.uid) {
                    return Err(TraceError::inconsistent(pid, c.uid, "duplicate Create"));
                }
                state.tasks.insert(
                    c.uid,
                    TaskHandle {
                        create: i,
                        delete: None,
                    },
                );
                state.comm_flags.insert(c.uid, CommFlags::default());
                let count = state.predecessors.entry(c.uid).or_insert(0);
                *count += c.npredecessors as u64;
                state.first_task_time =
                    Some(state.first_task_time.map_or(time, |t| t.min(time)));
                state.last_task_time = Some(state.last_task_time.map_or(time, |t| t.max(time)));
                hooks.push(Hook::Create);
                if *count == 0 && !c.properties.contains(TaskProperties::INITIAL) {
                    state.ready.insert(c.uid);
                    hooks.push(Hook::Ready);
                }
            }

            RecordPayload::Delete(d) => {
                let handle = state.tasks.get_mut(&d.uid).ok_or_else(|| {
                    TraceError::inconsistent(pid, d.uid, "Delete for a task never created")
                })?;
                handle.delete = Some(i);
                if d.statuses.contains(TaskStatuses::CANCELLED) {
                    state.ready.remove(&d.uid);
                    state.pending.remove(&d.uid);
                }
                hooks.push(Hook::Delete);
            }

            RecordPayload::Dependency(dep) => {
                if !state.tasks.contains_key(&dep.out_uid) {
                    return Err(TraceError::inconsistent(
                        pid,
                        dep.out_uid,
                        "dependency source never created",
                    ));
                }
                if !state.tasks.contains_key(&dep.in_uid) {
                    return Err(TraceError::inconsistent(
                        pid,
                        dep.in_uid,
                        "dependency target never created",
                    ));
                }
                let count = state.predecessors.entry(dep.in_uid).or_insert(0);
                *count = count.saturating_sub(1);
                hooks.push(Hook::Dependency);
                if *count == 0 {
                    let started = state
                        .schedules
                        .get(&dep.in_uid)
                        .map_or(false, |s| !s.is_empty());
                    let initial = match &records[state.tasks[&dep.in_uid].create].payload {
                        RecordPayload::Create(c) => {
                            c.properties.contains(TaskProperties::INITIAL)
                        }
                        _ => false,
                    };
                    if !started && !initial && state.ready.insert(dep.in_uid) {
                        hooks.push(Hook::Ready);
                    }
                }
                state.successors.entry(dep.out_uid).or_default().push(dep.in_uid);
                state
                    .predecessor_uids
                    .entry(dep.in_uid)
                    .or_default()
                    .push(dep.out_uid);
            }

            RecordPayload::Schedule(s) => {
                state.granularities.entry(s.uid).or_default().push(time);
                let statuses = s.statuses;

                if statuses.contains(TaskStatuses::COMPLETED) {
                    let stack = state.bind.entry(tid).or_default();
                    if stack.pop().is_none() {
                        return Err(TraceError::inconsistent(
                            pid,
                            s.uid,
                            format!("completion on empty thread {tid}"),
                        ));
                    }
                    accumulate_overlap(&mut state, records, pid, s.uid, time)?;
                    hooks.push(Hook::Completed);
                } else if statuses.contains(TaskStatuses::UNBLOCKED) {
                    let ready_len = state.ready.len();
                    state.readiness.observe(ready_len);
                    state.bind.entry(tid).or_default().push(i);
                    // A task may unblock before fully blocking; then no
                    // pause/resume interval exists.
                    if let Some(pending) = state.pending.remove(&s.uid) {
                        state.completed.entry(s.uid).or_default().push(AsyncRun {
                            blocked: pending.blocked,
                            unblocked: i,
                            overlap: pending.overlap,
                            idle: pending.idle,
                        });
                        state.blocked_deltas.push((time, -1));
                    }
                    hooks.push(Hook::Unblocked);
                    hooks.push(Hook::Resumed);
                } else if statuses.contains(TaskStatuses::BLOCKING) {
                    {
                        let stack = state.bind.entry(tid).or_default();
                        let top = stack.last().copied().ok_or_else(|| {
                            TraceError::inconsistent(
                                pid,
                                s.uid,
                                format!("pause on empty thread {tid}"),
                            )
                        })?;
                        if schedule_uid(records, top) != Some(s.uid) {
                            return Err(TraceError::inconsistent(
                                pid,
                                s.uid,
                                format!("pausing task is not on top of thread {tid}"),
                            ));
                        }
                        stack.pop();
                    }
                    accumulate_overlap(&mut state, records, pid, s.uid, time)?;
                    if state.pending.contains_key(&s.uid) {
                        return Err(TraceError::inconsistent(
                            pid,
                            s.uid,
                            "blocked twice without resuming",
                        ));
                    }
                    state.pending.insert(
                        s.uid,
                        PendingBlock {
                            blocked: i,
                            overlap: 0,
                            idle: 0,
                        },
                    );
                    state.blocked_deltas.push((time, 1));
                    hooks.push(Hook::Blocked);
                    hooks.push(Hook::Paused);
                } else if !statuses.contains(TaskStatuses::BLOCKED) {
                    // First run or plain resume.
                    if let Some(count) = state.predecessors.get(&s.uid) {
                        if *count != 0 {
                            return Err(TraceError::inconsistent(
                                pid,
                                s.uid,
                                "scheduled with unresolved predecessors",
                            ));
                        }
                    }
                    let first_run = state.ready.remove(&s.uid);
                    if first_run {
                        let ready_len = state.ready.len();
                        state.readiness.observe(ready_len);
                    }
                    state.bind.entry(tid).or_default().push(i);
                    hooks.push(if first_run { Hook::Started } else { Hook::Resumed });
                }

                state.schedules.entry(s.uid).or_default().push(i);

                // A thread that just finished or paused its task with
                // nothing ready idles until its next schedule event.
                if state.ready.is_empty()
                    && (statuses.contains(TaskStatuses::COMPLETED)
                        || (statuses.contains(TaskStatuses::BLOCKING)
                            && !statuses.contains(TaskStatuses::UNBLOCKED)))
                {
                    let next = sched_pos.get(&tid).and_then(|positions| {
                        let at = positions.partition_point(|&(pos, _)| pos <= i);
                        positions.get(at).map(|&(_, t)| t)
                    });
                    let duration = next.unwrap_or(tf).saturating_sub(time);
                    state.idle_time += duration;
                    for pending in state.pending.values_mut() {
                        pending.idle += duration;
                    }
                }
            }

            RecordPayload::Send(send) => {
                if let Some(flags) = state.comm_flags.get_mut(&send.uid) {
                    flags.send = true;
                    state.sends.push(i);
                }
            }
            RecordPayload::Recv(recv) => {
                if let Some(flags) = state.comm_flags.get_mut(&recv.uid) {
                    flags.recv = true;
                    state.recvs.push(i);
                }
            }
            RecordPayload::Allreduce(all) => {
                if let Some(flags) = state.comm_flags.get_mut(&all.uid) {
                    flags.allreduce = true;
                }
            }

            // Rank records feed the rank map, markers delimit the trace,
            // and standalone Blocked/Unblocked records mirror schedule
            // statuses; none of them alters the replay.
            RecordPayload::Rank(_)
            | RecordPayload::Ignore { .. }
            | RecordPayload::Blocked { .. }
            | RecordPayload::Unblocked { .. } => {}
        }

        for hook in hooks {
            dispatcher.emit(
                hook,
                &TaskCtx {
                    pid,
                    rank,
                    t0,
                    tf,
                    records,
                    index: i,
                    state: &state,
                },
            );
        }
    }

    check_invariants(pid, records, &state)?;
    let accounting = account(pid, records, &state, t0, tf)?;

    dispatcher.process_end(&ProcessCtx {
        pid,
        rank,
        t0,
        tf,
        records,
        state: &state,
    });

    Ok(ProcessReplay {
        pid,
        rank,
        t0,
        tf,
        state,
        accounting,
    })
}

/// A task just left a run (completed or paused): every task currently
/// blocked overlapped with it since it entered the run or since the block
/// began, whichever is later.
fn accumulate_overlap(
    state: &mut ReplayState,
    records: &[Record],
    pid: Pid,
    uid: Uid,
    now: Time,
) -> Result<(), TraceError> {
    if state.pending.is_empty() {
        return Ok(());
    }
    let scheds = state
        .schedules
        .get(&uid)
        .filter(|s| s.len() % 2 == 1)
        .ok_or_else(|| {
            TraceError::inconsistent(pid, uid, "closing a schedule pair that never opened")
        })?;
    let entered = records[scheds[scheds.len() - 1]].time;
    for pending in state.pending.values_mut() {
        let blocked_at = records[pending.blocked].time;
        pending.overlap += now.saturating_sub(blocked_at.max(entered));
    }
    Ok(())
}

fn check_invariants(pid: Pid, records: &[Record], state: &ReplayState) -> Result<(), TraceError> {
    for (uid, count) in &state.predecessors {
        if *count != 0 {
            return Err(TraceError::inconsistent(
                pid,
                *uid,
                format!("{count} unresolved predecessors at end of trace"),
            ));
        }
    }
    if let Some(uid) = state.ready.iter().next() {
        return Err(TraceError::inconsistent(
            pid,
            *uid,
            "ready but never scheduled",
        ));
    }
    if let Some((uid, _)) = state.pending.iter().next() {
        return Err(TraceError::inconsistent(
            pid,
            *uid,
            "still blocked at end of trace",
        ));
    }
    for (tid, stack) in &state.bind {
        if let Some(&top) = stack.last() {
            let uid = schedule_uid(records, top).unwrap_or(0);
            return Err(TraceError::inconsistent(
                pid,
                uid,
                format!("still bound to thread {tid} at end of trace"),
            ));
        }
    }
    for (uid, scheds) in &state.schedules {
        if scheds.len() % 2 != 0 {
            return Err(TraceError::inconsistent(
                pid,
                *uid,
                "odd number of schedule events",
            ));
        }
    }
    Ok(())
}

fn account(
    pid: Pid,
    records: &[Record],
    state: &ReplayState,
    t0: Time,
    tf: Time,
) -> Result<ProcessAccounting, TraceError> {
    let nthreads = state.bind.len();
    let wall = tf.saturating_sub(t0);
    let total = wall * nthreads as u64;

    let mut acc = ProcessAccounting {
        nthreads,
        wall,
        total,
        idle: state.idle_time,
        ..ProcessAccounting::default()
    };

    for (uid, scheds) in &state.schedules {
        let flags = state.comm_flags.get(uid).copied().unwrap_or_default();
        if flags.send {
            acc.nsend += 1;
        } else if flags.recv {
            acc.nrecv += 1;
        } else if flags.allreduce {
            acc.nallreduce += 1;
        }
        for pair in scheds.chunks(2) {
            let enter = &records[pair[0]];
            let leave = &records[pair[1]];
            if enter.tid != leave.tid {
                return Err(TraceError::inconsistent(
                    pid,
                    *uid,
                    "schedule pair spans two threads",
                ));
            }
            if leave.time < enter.time {
                return Err(TraceError::inconsistent(
                    pid,
                    *uid,
                    "schedule pair ends before it starts",
                ));
            }
            let dt = leave.time - enter.time;
            acc.in_task += dt;
            if flags.send {
                acc.send += dt;
            } else if flags.recv {
                acc.recv += dt;
            } else if flags.allreduce {
                acc.allreduce += dt;
            }
        }
    }

    acc.out_task = acc.total.saturating_sub(acc.in_task);
    acc.overhead = acc.out_task.saturating_sub(acc.idle);

    for runs in state.completed.values() {
        for run in runs {
            acc.async_total +=
                records[run.unblocked].time.saturating_sub(records[run.blocked].time);
            acc.async_overlap += run.overlap;
            acc.async_idle += run.idle;
        }
    }
    acc.async_total *= nthreads as u64;

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskprof_trace::record::{
        CreateRecord, DeleteRecord, DependencyRecord, ScheduleRecord,
    };

    fn create(uid: Uid, time: Time) -> Record {
        Record::new(
            0,
            0,
            time,
            RecordPayload::Create(CreateRecord {
                uid,
                persistent_uid: 0,
                properties: TaskProperties::EXPLICIT,
                statuses: TaskStatuses::empty(),
                label: format!("t{uid}"),
                color: 0,
                parent_uid: 0xFFFF_FFFE,
                omp_priority: 0,
                npredecessors: 0,
            }),
        )
    }

    fn schedule(uid: Uid, tid: Tid, time: Time, sched_id: u32, statuses: TaskStatuses) -> Record {
        Record::new(
            0,
            tid,
            time,
            RecordPayload::Schedule(ScheduleRecord {
                uid,
                priority: 0,
                properties: TaskProperties::EXPLICIT,
                statuses,
                schedule_id: sched_id,
                hwcounters: [0; 4],
            }),
        )
    }

    fn delete(uid: Uid, time: Time, statuses: TaskStatuses) -> Record {
        Record::new(
            0,
            0,
            time,
            RecordPayload::Delete(DeleteRecord {
                uid,
                priority: 0,
                properties: TaskProperties::EXPLICIT,
                statuses,
            }),
        )
    }

    fn dependency(out_uid: Uid, in_uid: Uid, time: Time) -> Record {
        Record::new(
            0,
            0,
            time,
            RecordPayload::Dependency(DependencyRecord { out_uid, in_uid }),
        )
    }

    fn run(records: &[Record]) -> Result<ProcessReplay, TraceError> {
        let mut dispatcher = Dispatcher::new(Vec::new()).unwrap();
        let mut progress = Progress::disabled();
        replay_process(0, 0, records, &mut dispatcher, &mut progress)
    }

    #[test]
    fn single_task_accounting() {
        let records = vec![
            create(1, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 200, 1, TaskStatuses::COMPLETED),
            delete(1, 210, TaskStatuses::COMPLETED),
        ];
        let replay = run(&records).unwrap();
        let acc = replay.accounting;
        assert_eq!(acc.nthreads, 1);
        assert_eq!(acc.total, 110);
        assert_eq!(acc.in_task, 90);
        assert_eq!(acc.out_task, 20);
        assert_eq!(acc.total, acc.in_task + acc.out_task);
        assert_eq!(acc.out_task, acc.idle + acc.overhead);
        // idle runs from completion to end of trace
        assert_eq!(acc.idle, 10);
        assert_eq!(replay.state.readiness.max, 1);
    }

    #[test]
    fn dependency_orders_two_tasks() {
        let records = vec![
            create(1, 100),
            create(2, 100),
            dependency(1, 2, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 200, 1, TaskStatuses::COMPLETED),
            schedule(2, 0, 210, 2, TaskStatuses::STARTED),
            schedule(2, 0, 260, 2, TaskStatuses::COMPLETED),
            delete(1, 270, TaskStatuses::COMPLETED),
            delete(2, 271, TaskStatuses::COMPLETED),
        ];
        let replay = run(&records).unwrap();
        assert_eq!(replay.state.successors.get(&1), Some(&vec![2]));
        assert_eq!(replay.state.predecessor_uids.get(&2), Some(&vec![1]));
        assert!(replay.state.predecessors.values().all(|&c| c == 0));
        assert_eq!(replay.accounting.in_task, 140);
    }

    #[test]
    fn block_and_resume_produces_one_async_run() {
        let records = vec![
            create(1, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 140, 2, TaskStatuses::BLOCKING),
            schedule(1, 0, 170, 3, TaskStatuses::UNBLOCKED),
            schedule(1, 0, 200, 4, TaskStatuses::COMPLETED),
            delete(1, 210, TaskStatuses::COMPLETED),
        ];
        let replay = run(&records).unwrap();
        let state = &replay.state;
        assert_eq!(state.schedules[&1].len(), 4);
        assert_eq!(state.blocked_deltas, vec![(140, 1), (170, -1)]);
        let runs = &state.completed[&1];
        assert_eq!(runs.len(), 1);
        assert_eq!(records[runs[0].blocked].time, 140);
        assert_eq!(records[runs[0].unblocked].time, 170);
        // thread idled from the block to the resume
        assert_eq!(runs[0].idle, 30);
        assert_eq!(runs[0].overlap, 0);
        assert_eq!(replay.accounting.in_task, 60);
        assert_eq!(replay.accounting.async_total, 30);
        assert_eq!(state.blocked_deltas.iter().map(|(_, d)| d).sum::<i64>(), 0);
    }

    #[test]
    fn overlap_accrues_while_another_task_runs() {
        let records = vec![
            create(1, 100),
            create(2, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 140, 2, TaskStatuses::BLOCKING),
            schedule(2, 1, 150, 3, TaskStatuses::STARTED),
            schedule(2, 1, 180, 4, TaskStatuses::COMPLETED),
            schedule(1, 0, 190, 5, TaskStatuses::UNBLOCKED),
            schedule(1, 0, 200, 6, TaskStatuses::COMPLETED),
            delete(1, 210, TaskStatuses::COMPLETED),
            delete(2, 211, TaskStatuses::COMPLETED),
        ];
        let replay = run(&records).unwrap();
        let runs = &replay.state.completed[&1];
        // task 2 ran 150..180 while task 1 was blocked 140..190
        assert_eq!(runs[0].overlap, 30);
    }

    #[test]
    fn cancelled_task_leaves_no_node_state() {
        let records = vec![
            create(1, 100),
            create(2, 105),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 200, 1, TaskStatuses::COMPLETED),
            delete(2, 205, TaskStatuses::CANCELLED),
            delete(1, 210, TaskStatuses::COMPLETED),
        ];
        let replay = run(&records).unwrap();
        assert!(replay.state.schedules.get(&2).is_none());
        assert!(replay.state.tasks[&2].delete.is_some());
    }

    #[test]
    fn unscheduled_ready_task_is_an_inconsistency() {
        let records = vec![
            create(1, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 200, 1, TaskStatuses::COMPLETED),
            create(2, 205),
            delete(1, 210, TaskStatuses::COMPLETED),
        ];
        match run(&records) {
            Err(TraceError::TraceInconsistent { uid, .. }) => assert_eq!(uid, 2),
            other => panic!("expected TraceInconsistent, got {other:?}"),
        }
    }

    #[test]
    fn odd_schedules_are_an_inconsistency() {
        let records = vec![
            create(1, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            delete(1, 210, TaskStatuses::empty()),
        ];
        assert!(matches!(
            run(&records),
            Err(TraceError::TraceInconsistent { .. })
        ));
    }

    #[test]
    fn send_marks_the_owning_task() {
        let mut records = vec![
            create(1, 100),
            schedule(1, 0, 110, 1, TaskStatuses::STARTED),
            schedule(1, 0, 200, 1, TaskStatuses::COMPLETED),
            delete(1, 210, TaskStatuses::COMPLETED),
        ];
        records.insert(
            2,
            Record::new(
                0,
                0,
                120,
                RecordPayload::Send(taskprof_trace::record::SendRecord {
                    uid: 1,
                    count: 1,
                    dtype: 3,
                    dst: 1,
                    tag: 7,
                    comm: 0,
                    completed: 1,
                }),
            ),
        );
        let replay = run(&records).unwrap();
        assert!(replay.state.comm_flags[&1].send);
        assert_eq!(replay.state.sends.len(), 1);
        assert_eq!(replay.accounting.nsend, 1);
        assert_eq!(replay.accounting.send, 90);
    }
}
