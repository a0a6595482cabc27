//! Repair of causality inversions in the raw record log.
//!
//! Two passes run over each process before the canonical sort:
//!
//! 1. Persistent-task dependency fix. A persistent task slot is reset and
//!    reused, so several physical uids share one persistent uid. When the
//!    instrumentation records a dependency after its successor has already
//!    completed and been reset, the recorded successor uid points at a
//!    stale incarnation (`in_uid < out_uid` with both endpoints
//!    persistent). The fix retargets `in_uid` to the next reuse of the
//!    successor's persistent uid.
//! 2. Creation back-shift. Instrumentation clocks may flush an event that
//!    references a task before the task's creation record; the creation
//!    timestamp is moved back to the earliest such event. Rank and marker
//!    records do not participate.

use std::collections::HashMap;

use log::warn;

use crate::error::TraceError;
use crate::record::{Record, RecordPayload, TaskProperties};
use crate::store::RecordStore;
use crate::{Time, Uid};

/// Counters describing what the repair touched, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    pub retargeted_dependencies: usize,
    pub dropped_dependencies: usize,
    pub shifted_creations: usize,
}

/// Fix persistent-task dependencies and creation timestamps, then sort each
/// process's records into canonical replay order. Applying it twice is a
/// no-op. `tick` fires once per record and pass.
pub fn repair(
    store: &mut RecordStore,
    mut tick: impl FnMut(),
) -> Result<RepairReport, TraceError> {
    let mut report = RepairReport::default();
    let pids: Vec<_> = store.pids().collect();
    for pid in pids {
        let records = match store.records_mut(pid) {
            Some(records) => records,
            None => continue,
        };
        fix_persistent_dependencies(pid, records, &mut report, &mut tick)?;
        backshift_creations(records, &mut report, &mut tick);
        records.sort_by_key(Record::sort_key);
    }
    Ok(report)
}

struct PersistentSlot {
    persistent_uid: Uid,
    index: usize,
}

fn fix_persistent_dependencies(
    pid: u32,
    records: &mut Vec<Record>,
    report: &mut RepairReport,
    tick: &mut impl FnMut(),
) -> Result<(), TraceError> {
    // uid -> creation properties; persistent uid -> uids in discovery order
    let mut properties: HashMap<Uid, TaskProperties> = HashMap::new();
    let mut reuses: HashMap<Uid, Vec<Uid>> = HashMap::new();
    let mut slots: HashMap<Uid, PersistentSlot> = HashMap::new();

    for record in records.iter() {
        tick();
        if let RecordPayload::Create(c) = &record.payload {
            if properties.insert(c.uid, c.properties).is_some() {
                return Err(TraceError::inconsistent(pid, c.uid, "duplicate Create"));
            }
            if c.persistent_uid != 0 {
                let uids = reuses.entry(c.persistent_uid).or_default();
                uids.push(c.uid);
                slots.insert(
                    c.uid,
                    PersistentSlot {
                        persistent_uid: c.persistent_uid,
                        index: uids.len() - 1,
                    },
                );
            }
        }
    }

    let mut dropped = Vec::new();
    for (i, record) in records.iter_mut().enumerate() {
        let dep = match &mut record.payload {
            RecordPayload::Dependency(dep) => dep,
            _ => continue,
        };
        if dep.in_uid >= dep.out_uid {
            continue;
        }
        let both_persistent = properties
            .get(&dep.out_uid)
            .map_or(false, |p| p.contains(TaskProperties::PERSISTENT))
            && properties
                .get(&dep.in_uid)
                .map_or(false, |p| p.contains(TaskProperties::PERSISTENT));
        if !both_persistent {
            continue;
        }
        // Walk the slot's reuse list until the successor is causally after
        // the predecessor. Stopping there keeps the fix a fixed point: a
        // retargeted record no longer matches the trigger above.
        let (persistent_uid, mut index) = match slots.get(&dep.in_uid) {
            Some(slot) => (slot.persistent_uid, slot.index),
            None => continue,
        };
        let uids = &reuses[&persistent_uid];
        let target = loop {
            index += 1;
            match uids.get(index).copied() {
                None => {
                    warn!(
                        "process {pid}: dropping dependency {} -> {}: successor slot has no later reuse",
                        dep.out_uid, dep.in_uid
                    );
                    break None;
                }
                Some(uid) if uid == dep.out_uid => {
                    warn!(
                        "process {pid}: dropping dependency {} -> {}: retarget would self-loop",
                        dep.out_uid, dep.in_uid
                    );
                    break None;
                }
                Some(uid) if uid > dep.out_uid => break Some(uid),
                Some(_) => continue, // still a stale incarnation
            }
        };
        match target {
            Some(uid) => {
                dep.in_uid = uid;
                report.retargeted_dependencies += 1;
            }
            None => dropped.push(i),
        }
    }

    if !dropped.is_empty() {
        report.dropped_dependencies += dropped.len();
        let mut keep = dropped.into_iter().peekable();
        let mut index = 0;
        records.retain(|_| {
            let drop = keep.peek() == Some(&index);
            if drop {
                keep.next();
            }
            index += 1;
            !drop
        });
    }
    Ok(())
}

fn backshift_creations(
    records: &mut [Record],
    report: &mut RepairReport,
    tick: &mut impl FnMut(),
) {
    let mut earliest: HashMap<Uid, Time> = HashMap::new();
    for record in records.iter() {
        tick();
        if matches!(record.payload, RecordPayload::Create(_)) {
            continue;
        }
        if let Some(uid) = record.task_uid() {
            let entry = earliest.entry(uid).or_insert(record.time);
            if record.time < *entry {
                *entry = record.time;
            }
        }
    }
    for record in records.iter_mut() {
        if let RecordPayload::Create(c) = &record.payload {
            if let Some(&t) = earliest.get(&c.uid) {
                if t < record.time {
                    record.time = t;
                    report.shifted_creations += 1;
                }
            }
        }
    }
}
