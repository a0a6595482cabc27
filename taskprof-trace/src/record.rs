//! Typed trace records and their canonical replay ordering.

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::{Pid, Tid, Time, Uid};

/// `parent_uid` sentinel marking the runtime's initial task.
pub const INITIAL_PARENT_UID: Uid = 0xFFFF_FFFF;

/// Maximum task label length on disk (NUL padded).
pub const LABEL_MAX: usize = 64;

bitflags! {
    /// Task properties, bit order matching the on-disk encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskProperties: u32 {
        const UNDEFERRED   = 1 << 0;
        const UNTIED       = 1 << 1;
        const EXPLICIT     = 1 << 2;
        const IMPLICIT     = 1 << 3;
        const INITIAL      = 1 << 4;
        const INCLUDED     = 1 << 5;
        const FINAL        = 1 << 6;
        const MERGED       = 1 << 7;
        const MERGEABLE    = 1 << 8;
        const DEPEND       = 1 << 9;
        const PRIORITY     = 1 << 10;
        const UP           = 1 << 11;
        const GRAINSIZE    = 1 << 12;
        const IF           = 1 << 13;
        const NOGROUP      = 1 << 14;
        const HAS_FIBER    = 1 << 15;
        const PERSISTENT   = 1 << 16;
        const CONTROL_FLOW = 1 << 17;
    }
}

bitflags! {
    /// Task lifecycle statuses, bit order matching the on-disk encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskStatuses: u32 {
        const STARTED         = 1 << 0;
        const COMPLETED       = 1 << 1;
        const BLOCKING        = 1 << 2;
        const BLOCKED         = 1 << 3;
        const UNBLOCKED       = 1 << 4;
        const IN_BLOCKED_LIST = 1 << 5;
        const CANCELLED       = 1 << 6;
    }
}

impl TaskProperties {
    /// Names of the set bits, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl TaskStatuses {
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// Combined property and status names, used by the record dump and the
/// Chrome-trace argument blobs.
pub fn flag_names(properties: TaskProperties, statuses: TaskStatuses) -> Vec<&'static str> {
    let mut names = properties.names();
    names.extend(statuses.names());
    names
}

/// On-disk record kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum RecordKind {
    Begin = 0,
    End = 1,
    Dependency = 2,
    Schedule = 3,
    Create = 4,
    Delete = 5,
    Send = 6,
    Recv = 7,
    Allreduce = 8,
    Rank = 9,
    Blocked = 10,
    Unblocked = 11,
}

impl RecordKind {
    pub fn from_u32(kind: u32) -> Option<RecordKind> {
        Some(match kind {
            0 => RecordKind::Begin,
            1 => RecordKind::End,
            2 => RecordKind::Dependency,
            3 => RecordKind::Schedule,
            4 => RecordKind::Create,
            5 => RecordKind::Delete,
            6 => RecordKind::Send,
            7 => RecordKind::Recv,
            8 => RecordKind::Allreduce,
            9 => RecordKind::Rank,
            10 => RecordKind::Blocked,
            11 => RecordKind::Unblocked,
            _ => return None,
        })
    }

    /// Total on-disk record size, generic header included.
    pub fn size(&self) -> usize {
        match self {
            RecordKind::Begin | RecordKind::End => 16,
            RecordKind::Dependency => 24,
            RecordKind::Schedule => 72,
            RecordKind::Create => 112,
            RecordKind::Delete => 32,
            RecordKind::Send => 48,
            RecordKind::Recv => 48,
            RecordKind::Allreduce => 40,
            RecordKind::Rank => 24,
            RecordKind::Blocked => 24,
            RecordKind::Unblocked => 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRecord {
    pub uid: Uid,
    pub persistent_uid: Uid,
    pub properties: TaskProperties,
    pub statuses: TaskStatuses,
    pub label: String,
    pub color: u32,
    pub parent_uid: Uid,
    pub omp_priority: u32,
    /// Reserved by the runtime; always zero in current traces, but the
    /// replay still feeds it into the predecessor counter.
    pub npredecessors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecord {
    pub uid: Uid,
    pub priority: u32,
    pub properties: TaskProperties,
    pub statuses: TaskStatuses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyRecord {
    pub out_uid: Uid,
    pub in_uid: Uid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub uid: Uid,
    pub priority: u32,
    pub properties: TaskProperties,
    pub statuses: TaskStatuses,
    /// Monotonically assigned by the instrumented runtime.
    pub schedule_id: u32,
    pub hwcounters: [u64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRecord {
    pub uid: Uid,
    pub count: u32,
    pub dtype: u32,
    pub dst: u32,
    pub tag: u32,
    pub comm: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvRecord {
    pub uid: Uid,
    pub count: u32,
    pub dtype: u32,
    pub src: u32,
    pub tag: u32,
    pub comm: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllreduceRecord {
    pub uid: Uid,
    pub count: u32,
    pub dtype: u32,
    pub op: u32,
    pub comm: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankRecord {
    pub comm: u32,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    /// BEGIN/END phase markers; carried along but ignored by the replay.
    Ignore { end: bool },
    Create(CreateRecord),
    Delete(DeleteRecord),
    Dependency(DependencyRecord),
    Schedule(ScheduleRecord),
    Send(SendRecord),
    Recv(RecvRecord),
    Allreduce(AllreduceRecord),
    Rank(RankRecord),
    Blocked { uid: Uid },
    Unblocked { uid: Uid },
}

/// One instrumentation event: common header plus a kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub pid: Pid,
    pub tid: Tid,
    pub time: Time,
    pub payload: RecordPayload,
}

impl Record {
    pub fn new(pid: Pid, tid: Tid, time: Time, payload: RecordPayload) -> Record {
        Record {
            pid,
            tid,
            time,
            payload,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match &self.payload {
            RecordPayload::Ignore { end: false } => RecordKind::Begin,
            RecordPayload::Ignore { end: true } => RecordKind::End,
            RecordPayload::Create(_) => RecordKind::Create,
            RecordPayload::Delete(_) => RecordKind::Delete,
            RecordPayload::Dependency(_) => RecordKind::Dependency,
            RecordPayload::Schedule(_) => RecordKind::Schedule,
            RecordPayload::Send(_) => RecordKind::Send,
            RecordPayload::Recv(_) => RecordKind::Recv,
            RecordPayload::Allreduce(_) => RecordKind::Allreduce,
            RecordPayload::Rank(_) => RecordKind::Rank,
            RecordPayload::Blocked { .. } => RecordKind::Blocked,
            RecordPayload::Unblocked { .. } => RecordKind::Unblocked,
        }
    }

    /// The task this record refers to, if any. For dependencies this is the
    /// successor, which is the endpoint the creation back-shift cares about.
    pub fn task_uid(&self) -> Option<Uid> {
        match &self.payload {
            RecordPayload::Ignore { .. } | RecordPayload::Rank(_) => None,
            RecordPayload::Create(c) => Some(c.uid),
            RecordPayload::Delete(d) => Some(d.uid),
            RecordPayload::Dependency(d) => Some(d.in_uid),
            RecordPayload::Schedule(s) => Some(s.uid),
            RecordPayload::Send(s) => Some(s.uid),
            RecordPayload::Recv(r) => Some(r.uid),
            RecordPayload::Allreduce(a) => Some(a.uid),
            RecordPayload::Blocked { uid } | RecordPayload::Unblocked { uid } => Some(*uid),
        }
    }

    /// Tie-break rank within a single timestamp. Ranks come first so that
    /// pid/rank translation is available before anything else, creations
    /// precede dependencies, dependencies precede schedules, and deletions
    /// are observed last.
    fn kind_order(&self) -> i32 {
        match &self.payload {
            RecordPayload::Rank(_) => -1,
            RecordPayload::Ignore { .. } | RecordPayload::Create(_) => 0,
            RecordPayload::Dependency(_) => 1,
            RecordPayload::Schedule(_) => 2,
            RecordPayload::Blocked { .. } => 3,
            RecordPayload::Unblocked { .. } => 4,
            RecordPayload::Send(_) => 5,
            RecordPayload::Recv(_) => 6,
            RecordPayload::Allreduce(_) => 7,
            RecordPayload::Delete(_) => 8,
        }
    }

    /// Canonical replay ordering: `(timestamp, kind order, schedule id)`.
    pub fn sort_key(&self) -> (Time, i32, u32) {
        let schedule_id = match &self.payload {
            RecordPayload::Schedule(s) => s.schedule_id,
            _ => 0,
        };
        (self.time, self.kind_order(), schedule_id)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = |f: &mut fmt::Formatter<'_>, name: &str| {
            write!(
                f,
                "{}(pid={}, tid={}, time={}",
                name, self.pid, self.tid, self.time
            )
        };
        match &self.payload {
            RecordPayload::Ignore { end } => {
                head(f, if *end { "End" } else { "Begin" })?;
                write!(f, ")")
            }
            RecordPayload::Create(c) => {
                head(f, "Create")?;
                write!(
                    f,
                    ", uid={}, persistent_uid={}, flags={:?}, label=\"{}\", color={}, parent_uid={}, omp_priority={})",
                    c.uid,
                    c.persistent_uid,
                    flag_names(c.properties, c.statuses),
                    c.label,
                    c.color,
                    c.parent_uid,
                    c.omp_priority
                )
            }
            RecordPayload::Delete(d) => {
                head(f, "Delete")?;
                write!(
                    f,
                    ", uid={}, priority={}, flags={:?})",
                    d.uid,
                    d.priority,
                    flag_names(d.properties, d.statuses)
                )
            }
            RecordPayload::Dependency(d) => {
                head(f, "Dependency")?;
                write!(f, ", out_uid={}, in_uid={})", d.out_uid, d.in_uid)
            }
            RecordPayload::Schedule(s) => {
                head(f, "Schedule")?;
                write!(
                    f,
                    ", uid={}, priority={}, flags={:?}, schedule_id={}, hwcounters={:?})",
                    s.uid,
                    s.priority,
                    flag_names(s.properties, s.statuses),
                    s.schedule_id,
                    s.hwcounters
                )
            }
            RecordPayload::Send(s) => {
                head(f, "Send")?;
                write!(
                    f,
                    ", uid={}, count={}, dtype={}, dst={}, tag={}, comm={}, completed={})",
                    s.uid, s.count, s.dtype, s.dst, s.tag, s.comm, s.completed
                )
            }
            RecordPayload::Recv(r) => {
                head(f, "Recv")?;
                write!(
                    f,
                    ", uid={}, count={}, dtype={}, src={}, tag={}, comm={}, completed={})",
                    r.uid, r.count, r.dtype, r.src, r.tag, r.comm, r.completed
                )
            }
            RecordPayload::Allreduce(a) => {
                head(f, "Allreduce")?;
                write!(
                    f,
                    ", uid={}, count={}, dtype={}, op={}, comm={}, completed={})",
                    a.uid, a.count, a.dtype, a.op, a.comm, a.completed
                )
            }
            RecordPayload::Rank(r) => {
                head(f, "Rank")?;
                write!(f, ", comm={}, rank={})", r.comm, r.rank)
            }
            RecordPayload::Blocked { uid } => {
                head(f, "Blocked")?;
                write!(f, ", uid={})", uid)
            }
            RecordPayload::Unblocked { uid } => {
                head(f, "Unblocked")?;
                write!(f, ", uid={})", uid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(time: Time, schedule_id: u32) -> Record {
        Record::new(
            0,
            0,
            time,
            RecordPayload::Schedule(ScheduleRecord {
                uid: 1,
                priority: 0,
                properties: TaskProperties::empty(),
                statuses: TaskStatuses::STARTED,
                schedule_id,
                hwcounters: [0; 4],
            }),
        )
    }

    #[test]
    fn kind_order_breaks_timestamp_ties() {
        let create = Record::new(
            0,
            0,
            100,
            RecordPayload::Create(CreateRecord {
                uid: 1,
                persistent_uid: 0,
                properties: TaskProperties::EXPLICIT,
                statuses: TaskStatuses::empty(),
                label: "t".into(),
                color: 0,
                parent_uid: 0,
                omp_priority: 0,
                npredecessors: 0,
            }),
        );
        let dep = Record::new(
            0,
            0,
            100,
            RecordPayload::Dependency(DependencyRecord {
                out_uid: 0,
                in_uid: 1,
            }),
        );
        let rank = Record::new(0, 0, 100, RecordPayload::Rank(RankRecord { comm: 0, rank: 0 }));
        let delete = Record::new(
            0,
            0,
            100,
            RecordPayload::Delete(DeleteRecord {
                uid: 1,
                priority: 0,
                properties: TaskProperties::empty(),
                statuses: TaskStatuses::empty(),
            }),
        );

        let mut records = vec![delete.clone(), dep.clone(), create.clone(), rank.clone()];
        records.sort_by_key(Record::sort_key);
        assert_eq!(records, vec![rank, create, dep, delete]);
    }

    #[test]
    fn schedule_id_is_the_tertiary_key() {
        let mut records = vec![schedule(100, 2), schedule(100, 1)];
        records.sort_by_key(Record::sort_key);
        assert_eq!(
            records
                .iter()
                .map(|r| match &r.payload {
                    RecordPayload::Schedule(s) => s.schedule_id,
                    _ => unreachable!(),
                })
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn flag_names_follow_bit_order() {
        let props = TaskProperties::EXPLICIT | TaskProperties::PERSISTENT;
        let stats = TaskStatuses::COMPLETED;
        assert_eq!(
            flag_names(props, stats),
            vec!["EXPLICIT", "PERSISTENT", "COMPLETED"]
        );
    }

    #[test]
    fn unknown_bits_are_retained() {
        let props = TaskProperties::from_bits_retain(1 << 30 | 1);
        assert_eq!(props.names(), vec!["UNDEFERRED"]);
        assert_eq!(props.bits(), 1 << 30 | 1);
    }
}
