//! Record model, binary codec and log repair for task-runtime traces.
//!
//! An instrumented task-parallel runtime writes one binary file per
//! (process, thread) pair. This crate decodes those files into typed
//! records, groups them per process, repairs the causality inversions the
//! instrumentation is known to produce, and sorts each process's log into
//! the canonical replay order that the analysis crate consumes.

pub mod codec;
pub mod error;
pub mod rank;
pub mod record;
pub mod repair;
pub mod store;

pub use codec::{read_trace_file, write_trace_file, FileHeader};
pub use error::TraceError;
pub use rank::RankMap;
pub use record::{
    AllreduceRecord, CreateRecord, DeleteRecord, DependencyRecord, RankRecord, Record,
    RecordKind, RecordPayload, RecvRecord, ScheduleRecord, SendRecord, TaskProperties,
    TaskStatuses, INITIAL_PARENT_UID, LABEL_MAX,
};
pub use repair::{repair, RepairReport};
pub use store::{count_files, RecordStore};

/// Process identifier, as stamped into each trace file header.
pub type Pid = u32;
/// Hardware thread identifier within a process.
pub type Tid = u32;
/// Task identifier, unique within a process.
pub type Uid = u32;
/// Monotonic timestamp in microseconds.
pub type Time = u64;
