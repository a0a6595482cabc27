//! Per-process record storage.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{debug, info};
use walkdir::WalkDir;

use crate::codec::read_trace_file;
use crate::error::TraceError;
use crate::record::Record;
use crate::{Pid, Tid};

/// All records of a trace, grouped by owning process in as-read order.
/// The store owns the records; every later stage refers to them by
/// per-process index.
#[derive(Debug, Default)]
pub struct RecordStore {
    processes: BTreeMap<Pid, Vec<Record>>,
}

/// Number of regular files under `dir`; the unit of loading progress.
pub fn count_files(dir: &Path) -> Result<usize, TraceError> {
    let mut count = 0;
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(walk_error)?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

fn walk_error(error: walkdir::Error) -> TraceError {
    TraceError::Io(error.into_io_error().unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")
    }))
}

impl RecordStore {
    pub fn new() -> RecordStore {
        RecordStore::default()
    }

    /// Load every regular file under `dir`, in sorted path order so that
    /// ingestion is deterministic. `tick` is invoked once per file.
    pub fn load_dir(dir: &Path, mut tick: impl FnMut()) -> Result<RecordStore, TraceError> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1) {
            let entry = entry.map_err(walk_error)?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let mut store = RecordStore::new();
        for path in &paths {
            let (header, records) = read_trace_file(path)?;
            debug!(
                "{}: pid {} tid {}, {} records",
                path.display(),
                header.pid,
                header.tid,
                records.len()
            );
            store
                .processes
                .entry(header.pid)
                .or_default()
                .extend(records);
            tick();
        }
        info!(
            "loaded {} records from {} files across {} processes",
            store.total_records(),
            paths.len(),
            store.processes.len()
        );
        Ok(store)
    }

    pub fn insert(&mut self, pid: Pid, records: Vec<Record>) {
        self.processes.entry(pid).or_default().extend(records);
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.keys().copied()
    }

    pub fn records(&self, pid: Pid) -> &[Record] {
        self.processes.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn records_mut(&mut self, pid: Pid) -> Option<&mut Vec<Record>> {
        self.processes.get_mut(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, &Vec<Record>)> {
        self.processes.iter().map(|(pid, records)| (*pid, records))
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn total_records(&self) -> usize {
        self.processes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Distinct hardware threads seen in a process's records. Every
    /// per-thread file contributes its tid through the file header, so this
    /// covers threads that only produced markers.
    pub fn thread_ids(&self, pid: Pid) -> BTreeSet<Tid> {
        self.records(pid).iter().map(|r| r.tid).collect()
    }
}
