//! Statistics report: graph shape, time buckets and granularity, written
//! to `<prefix>-stats.json`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use log::info;
use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::graph::NodeId;
use crate::pass::{Env, Pass};

/// Seconds are reported with microsecond precision.
fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

fn seconds(usec: u64) -> f64 {
    round6(usec as f64 * 1e-6)
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round6(part as f64 / whole as f64 * 100.0)
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[derive(Default)]
struct DegreeSummary {
    max: usize,
    min: usize,
    med: usize,
    avg: f64,
}

fn summarize_degrees(mut degrees: Vec<usize>) -> DegreeSummary {
    if degrees.is_empty() {
        return DegreeSummary::default();
    }
    degrees.sort_unstable();
    let sum: usize = degrees.iter().sum();
    DegreeSummary {
        max: degrees[degrees.len() - 1],
        min: degrees[0],
        med: degrees[degrees.len() / 2],
        avg: round1(sum as f64 / degrees.len() as f64),
    }
}

fn grain_summary(mut grains: Vec<u64>) -> Value {
    if grains.is_empty() {
        return json!({"max": 0.0, "min": 0.0, "med": 0.0, "avg": 0.0});
    }
    grains.sort_unstable();
    let sum: u64 = grains.iter().sum();
    json!({
        "max": seconds(grains[grains.len() - 1]),
        "min": seconds(grains[0]),
        "med": seconds(grains[grains.len() / 2]),
        "avg": round6(sum as f64 / grains.len() as f64 * 1e-6),
    })
}

pub struct StatsPass;

impl StatsPass {
    pub fn new() -> StatsPass {
        StatsPass
    }

    fn build(&self, env: &Env) -> Value {
        let accounting: Vec<_> = env.replays.values().map(|r| r.accounting).collect();

        let n_threads: usize = accounting.iter().map(|a| a.nthreads).sum();
        let total: u64 = accounting.iter().map(|a| a.total).sum();
        let in_task: u64 = accounting.iter().map(|a| a.in_task).sum();
        let out_task: u64 = accounting.iter().map(|a| a.out_task).sum();
        let idle: u64 = accounting.iter().map(|a| a.idle).sum();
        let overhead = out_task.saturating_sub(idle);
        let send: u64 = accounting.iter().map(|a| a.send).sum();
        let recv: u64 = accounting.iter().map(|a| a.recv).sum();
        let allreduce: u64 = accounting.iter().map(|a| a.allreduce).sum();
        let communication = send + recv + allreduce;
        let compute_time = in_task.saturating_sub(communication);
        let max_wall: u64 = accounting.iter().map(|a| a.wall).max().unwrap_or(0);

        let nsend: usize = accounting.iter().map(|a| a.nsend).sum();
        let nrecv: usize = accounting.iter().map(|a| a.nrecv).sum();
        let nallreduce: usize = accounting.iter().map(|a| a.nallreduce).sum();

        let async_total: u64 = accounting.iter().map(|a| a.async_total).sum();
        let async_overlap: u64 = accounting.iter().map(|a| a.async_overlap).sum();
        let async_idle: u64 = accounting.iter().map(|a| a.async_idle).sum();
        let async_overhead = async_total.saturating_sub(async_overlap + async_idle);

        let first_task = env
            .replays
            .values()
            .filter_map(|r| r.state.first_task_time)
            .min();
        let last_task = env
            .replays
            .values()
            .filter_map(|r| r.state.last_task_time)
            .max();
        let graph_gen = match (first_task, last_task) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        };

        let mut parallelism = Map::new();
        for (pid, replay) in &env.replays {
            let readiness = replay.state.readiness;
            parallelism.insert(
                pid.to_string(),
                json!({
                    "max": readiness.max,
                    "avg": round1(readiness.avg()),
                    "nschedules": readiness.nschedules,
                }),
            );
        }

        // Node degrees over every process graph.
        let mut in_degrees = Vec::new();
        let mut out_degrees = Vec::new();
        let mut total_degrees = Vec::new();
        for node in env.graph.nodes() {
            in_degrees.push(node.predecessors.len());
            out_degrees.push(node.successors.len());
            total_degrees.push(node.predecessors.len() + node.successors.len());
        }
        let deg_in = summarize_degrees(in_degrees);
        let deg_out = summarize_degrees(out_degrees);
        let deg_total = summarize_degrees(total_degrees);

        // Granularities: run durations per node, globally and per label.
        let mut grains = Vec::new();
        let mut grains_by_label: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (pid, replay) in &env.replays {
            for (uid, times) in &replay.state.granularities {
                let id = NodeId {
                    pid: *pid,
                    uid: *uid,
                };
                let node = match env.graph.node(id) {
                    Some(node) => node,
                    None => continue,
                };
                let grain: u64 = times
                    .chunks(2)
                    .filter(|pair| pair.len() == 2)
                    .map(|pair| pair[1].saturating_sub(pair[0]))
                    .sum();
                grains.push(grain);
                grains_by_label
                    .entry(node.label.clone())
                    .or_default()
                    .push(grain);
            }
        }
        let mut by_label = Map::new();
        for (label, grains) in grains_by_label {
            by_label.insert(label, grain_summary(grains));
        }
        let mut granularity = grain_summary(grains);
        granularity["by-label"] = Value::Object(by_label);

        let ntasks = env.graph.node_count();
        let ncommunication = nsend + nrecv + nallreduce;
        let narcs = env.graph.arc_count();
        let nremote = env.graph.remote_arc_count();

        json!({
            "about": {
                "n-processes": env.replays.len(),
                "n-threads-total": n_threads,
            },
            "records": {
                "total": env.store.total_records(),
                "parallelism": parallelism,
            },
            "graph": {
                "tasks": {
                    "n": {
                        "total": ntasks,
                        "compute": ntasks as i64 - ncommunication as i64,
                        "communication": {
                            "total": ncommunication,
                            "allreduce": nallreduce,
                            "send": nsend,
                            "recv": nrecv,
                        },
                    },
                    "degrees": {
                        "max": {"total": deg_total.max, "in": deg_in.max, "out": deg_out.max},
                        "min": {"total": deg_total.min, "in": deg_in.min, "out": deg_out.min},
                        "med": {"total": deg_total.med, "in": deg_in.med, "out": deg_out.med},
                        "avg": {"total": deg_total.avg, "in": deg_in.avg, "out": deg_out.avg},
                    },
                },
                "arcs": {
                    "total": narcs,
                    "local": narcs as i64 - nremote as i64,
                    "remote": nremote,
                },
                "granularity (s.)": granularity,
            },
            "time": {
                "flat (s.)": {
                    "total": seconds(total),
                    "max-process-time": seconds(max_wall),
                    "graph-gen": seconds(graph_gen),
                    "in-task": {
                        "total": seconds(in_task),
                        "compute": seconds(compute_time),
                        "communication": {
                            "total": seconds(communication),
                            "recv": seconds(recv),
                            "send": seconds(send),
                            "allreduce": seconds(allreduce),
                        },
                    },
                    "out-task": {
                        "total": seconds(out_task),
                        "overhead": seconds(overhead),
                        "idle": seconds(idle),
                    },
                    "asynchronous": {
                        "total": seconds(async_total),
                        "overlap": seconds(async_overlap),
                        "idle": seconds(async_idle),
                        "overhead": seconds(async_overhead),
                    },
                },
                "proportion (%)": {
                    "in-task": {
                        "total": percent(in_task, total),
                        "compute": percent(compute_time, total),
                        "communication": {
                            "total": percent(communication, total),
                            "recv": percent(recv, total),
                            "send": percent(send, total),
                            "allreduce": percent(allreduce, total),
                        },
                    },
                    "out-task": {
                        "total": percent(out_task, total),
                        "overhead": percent(overhead, total),
                        "idle": percent(idle, total),
                    },
                    "asynchronous": {
                        "overlap": percent(async_overlap, async_total),
                        "idle": percent(async_idle, async_total),
                        "overhead": percent(async_overhead, async_total),
                    },
                },
            },
        })
    }
}

impl Default for StatsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for StatsPass {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn on_end(&mut self, env: &mut Env, config: &Config) -> anyhow::Result<()> {
        let stats = self.build(env);
        let path = config.artifact("-stats.json");
        info!("writing `{}` to disk...", path.display());
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &stats)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_keeps_six_digits() {
        assert_eq!(round6(0.123_456_789), 0.123_457);
        assert_eq!(seconds(90), 0.00009);
    }

    #[test]
    fn degree_summary_of_empty_set_is_zero() {
        let summary = summarize_degrees(Vec::new());
        assert_eq!(summary.max, 0);
        assert_eq!(summary.min, 0);
        assert_eq!(summary.avg, 0.0);
    }

    #[test]
    fn degree_summary_sorts_before_the_median() {
        let summary = summarize_degrees(vec![5, 1, 3]);
        assert_eq!(summary.min, 1);
        assert_eq!(summary.med, 3);
        assert_eq!(summary.max, 5);
        assert_eq!(summary.avg, 3.0);
    }
}
