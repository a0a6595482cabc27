//! Process id ⇔ (communicator, rank) translation.

use std::collections::HashMap;

use crate::record::RecordPayload;
use crate::store::RecordStore;
use crate::Pid;

/// The world communicator every traced process belongs to.
pub const WORLD_COMM: u32 = 0;

/// Bijections between pids and per-communicator ranks, built from Rank
/// records. First observation wins; later records for the same (pid, comm)
/// pair are ignored. Append-only while loading, read-only afterwards.
#[derive(Debug, Default)]
pub struct RankMap {
    p2c2r: HashMap<Pid, HashMap<u32, u32>>,
    c2r2p: HashMap<u32, HashMap<u32, Pid>>,
}

impl RankMap {
    pub fn new() -> RankMap {
        RankMap::default()
    }

    pub fn from_store(store: &RecordStore) -> RankMap {
        let mut map = RankMap::new();
        for (pid, records) in store.iter() {
            for record in records {
                if let RecordPayload::Rank(r) = &record.payload {
                    map.observe(pid, r.comm, r.rank);
                }
            }
        }
        map
    }

    pub fn observe(&mut self, pid: Pid, comm: u32, rank: u32) {
        self.p2c2r
            .entry(pid)
            .or_default()
            .entry(comm)
            .or_insert(rank);
        self.c2r2p
            .entry(comm)
            .or_default()
            .entry(rank)
            .or_insert(pid);
    }

    pub fn rank_in(&self, pid: Pid, comm: u32) -> Option<u32> {
        self.p2c2r.get(&pid).and_then(|m| m.get(&comm)).copied()
    }

    /// World rank of a process; untraced processes keep their pid as rank.
    pub fn rank_of(&self, pid: Pid) -> u32 {
        self.rank_in(pid, WORLD_COMM).unwrap_or(pid)
    }

    pub fn pid_of(&self, comm: u32, rank: u32) -> Option<Pid> {
        self.c2r2p.get(&comm).and_then(|m| m.get(&rank)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_wins() {
        let mut map = RankMap::new();
        map.observe(7, 0, 2);
        map.observe(7, 0, 9);
        assert_eq!(map.rank_of(7), 2);
        assert_eq!(map.pid_of(0, 2), Some(7));
    }

    #[test]
    fn unknown_pids_default_to_their_pid() {
        let map = RankMap::new();
        assert_eq!(map.rank_of(3), 3);
        assert_eq!(map.rank_in(3, 0), None);
    }

    #[test]
    fn communicators_are_independent() {
        let mut map = RankMap::new();
        map.observe(4, 0, 1);
        map.observe(4, 5, 0);
        assert_eq!(map.rank_in(4, 5), Some(0));
        assert_eq!(map.rank_of(4), 1);
    }
}
