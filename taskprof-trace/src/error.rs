use std::path::PathBuf;

use thiserror::Error;

use crate::{Pid, Uid};

/// Errors surfaced while decoding, repairing or replaying a trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: bad magic {found:?}, expected \"task\"")]
    BadMagic { path: PathBuf, found: [u8; 4] },

    #[error("unknown record kind {kind}")]
    UnknownKind { kind: u32 },

    #[error("short read: expected {expected} bytes, found {found}")]
    ShortRead { expected: usize, found: usize },

    #[error("inconsistent trace: process {pid}, task {uid}: {invariant}")]
    TraceInconsistent {
        pid: Pid,
        uid: Uid,
        invariant: String,
    },

    #[error("cycle detected in task graph at node {node}")]
    CycleDetected { node: String },
}

impl TraceError {
    pub fn inconsistent(pid: Pid, uid: Uid, invariant: impl Into<String>) -> Self {
        TraceError::TraceInconsistent {
            pid,
            uid,
            invariant: invariant.into(),
        }
    }

    /// Whether this error denotes a malformed or self-contradictory trace,
    /// as opposed to an environmental failure.
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            TraceError::TraceInconsistent { .. } | TraceError::CycleDetected { .. }
        )
    }
}
