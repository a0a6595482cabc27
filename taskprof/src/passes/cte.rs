//! Chrome-trace emitter: one duration event per schedule pair, flow
//! arrows for block/resume intervals, dependencies and communications,
//! and thread-name metadata. Lanes are keyed by MPI rank, not pid, so
//! multi-process traces line up the way the application was launched.

use std::fs::File;
use std::io::{BufWriter, Write};

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use log::info;
use taskprof_trace::record::{flag_names, Record, RecordPayload};
use taskprof_trace::{Time, Uid};

use crate::config::Config;
use crate::pass::{Env, Pass, ProcessCtx};
use crate::replay::ReplayState;

/// Reserved color names understood by the Chrome trace viewer.
const COLORS: &[&str] = &[
    "thread_state_uninterruptible",
    "thread_state_iowait",
    "thread_state_running",
    "thread_state_runnable",
    "thread_state_sleeping",
    "thread_state_unknown",
    "background_memory_dump",
    "light_memory_dump",
    "detailed_memory_dump",
    "generic_work",
    "good",
    "bad",
    "terrible",
    "grey",
    "yellow",
    "olive",
    "rail_response",
    "rail_animation",
    "rail_idle",
    "rail_load",
    "startup",
    "cq_build_running",
    "cq_build_passed",
    "cq_build_failed",
];

#[derive(Serialize)]
struct CteEvent {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cat: Option<&'static str>,
    ph: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cname: Option<&'static str>,
}

/// Stable numeric id for a flow, derived from its identifier string.
fn flow_id(identifier: &str) -> u64 {
    let digest = Sha256::digest(identifier.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Nudge flow endpoints off the exact pair boundary so the viewer renders
/// the arrow inside the slice it belongs to.
fn nudge(span: Time) -> f64 {
    (0.01f64).min(0.01 * span as f64)
}

pub struct CtePass {
    schedule: bool,
    creation: bool,
    dependencies: bool,
    communications: bool,
    color: bool,
    events: Vec<CteEvent>,
}

impl CtePass {
    pub fn new() -> CtePass {
        CtePass {
            schedule: true,
            creation: false,
            dependencies: false,
            communications: false,
            color: false,
            events: Vec::new(),
        }
    }

    fn schedule_record<'a>(records: &'a [Record], index: usize) -> Option<&'a Record> {
        match records[index].payload {
            RecordPayload::Schedule(_) => Some(&records[index]),
            _ => None,
        }
    }

    fn emit_schedule_pairs(&mut self, ctx: &ProcessCtx<'_>, state: &ReplayState) {
        for (uid, scheds) in &state.schedules {
            let handle = match state.tasks.get(uid) {
                Some(handle) => handle,
                None => continue,
            };
            let create = match &ctx.records[handle.create].payload {
                RecordPayload::Create(c) => c,
                _ => continue,
            };
            if create.label.starts_with("EMPTY") {
                continue;
            }
            let flags = state.comm_flags.get(uid).copied().unwrap_or_default();

            for pair in scheds.chunks(2) {
                if pair.len() != 2 {
                    continue;
                }
                let enter = &ctx.records[pair[0]];
                let leave = &ctx.records[pair[1]];
                let (s_enter, s_leave) = match (&enter.payload, &leave.payload) {
                    (RecordPayload::Schedule(a), RecordPayload::Schedule(b)) => (a, b),
                    _ => continue,
                };
                let mut args = json!({
                    "uid": uid,
                    "ts": enter.time,
                    "created": ctx.records[handle.create].time,
                    "priority": s_enter.priority,
                    "properties_begin": flag_names(s_enter.properties, s_enter.statuses),
                    "properties_end": flag_names(s_leave.properties, s_leave.statuses),
                    "color": create.color,
                    "hwcounters_begin": s_enter.hwcounters,
                    "hwcounters_end": s_leave.hwcounters,
                });
                if flags.is_communication() {
                    let mut mpi = Vec::new();
                    if flags.recv {
                        mpi.push("recv");
                    }
                    if flags.send {
                        mpi.push("send");
                    }
                    if flags.allreduce {
                        mpi.push("allreduce");
                    }
                    args["mpi"] = json!(mpi);
                }
                self.events.push(CteEvent {
                    name: create.label.clone(),
                    cat: Some("task-schedule"),
                    ph: "X",
                    ts: Some(enter.time as f64),
                    dur: Some((leave.time - enter.time) as f64),
                    pid: ctx.rank,
                    tid: enter.tid,
                    id: None,
                    args: Some(args),
                    cname: if self.color {
                        Some(COLORS[create.color as usize % COLORS.len()])
                    } else {
                        None
                    },
                });
            }

            // Arrows between consecutive runs of the same task.
            for window in scheds.windows(4).step_by(2) {
                let r0 = &ctx.records[window[0]];
                let r1 = &ctx.records[window[1]];
                let r2 = &ctx.records[window[2]];
                let r3 = &ctx.records[window[3]];
                let (s1, s2) = match (&r1.payload, &r2.payload) {
                    (RecordPayload::Schedule(a), RecordPayload::Schedule(b)) => (a, b),
                    _ => continue,
                };
                let cat = if s1
                    .statuses
                    .contains(taskprof_trace::TaskStatuses::BLOCKING)
                    && s2
                        .statuses
                        .contains(taskprof_trace::TaskStatuses::UNBLOCKED)
                {
                    "block-resume"
                } else {
                    "yield"
                };
                let identifier =
                    format!("{cat}-{}-{}-{}-{uid}", ctx.pid, r1.tid, r2.tid);
                let id = Some(flow_id(&identifier));
                self.events.push(CteEvent {
                    name: identifier.clone(),
                    cat: Some(cat),
                    ph: "s",
                    ts: Some(r1.time as f64 - nudge(r1.time - r0.time)),
                    dur: None,
                    pid: ctx.rank,
                    tid: r1.tid,
                    id,
                    args: None,
                    cname: None,
                });
                self.events.push(CteEvent {
                    name: identifier,
                    cat: Some(cat),
                    ph: "t",
                    ts: Some(r2.time as f64 + nudge(r3.time - r2.time)),
                    dur: None,
                    pid: ctx.rank,
                    tid: r2.tid,
                    id,
                    args: None,
                    cname: None,
                });
            }
        }
    }

    fn emit_lifecycle(&mut self, ctx: &ProcessCtx<'_>, state: &ReplayState) {
        for (uid, handle) in &state.tasks {
            let create_record = &ctx.records[handle.create];
            let create = match &create_record.payload {
                RecordPayload::Create(c) => c,
                _ => continue,
            };
            self.events.push(CteEvent {
                name: create.label.clone(),
                cat: Some("task-create"),
                ph: "X",
                ts: Some(create_record.time as f64),
                dur: Some(1.0),
                pid: ctx.rank,
                tid: create_record.tid,
                id: None,
                args: Some(json!({
                    "uid": uid,
                    "ts": create_record.time,
                    "priority": create.omp_priority,
                    "properties": flag_names(create.properties, create.statuses),
                })),
                cname: None,
            });

            if self.dependencies {
                if let Some(parent) = state.tasks.get(&create.parent_uid) {
                    let parent_record = &ctx.records[parent.create];
                    let cat = "task-create-control";
                    let identifier = format!("{cat}-{uid}-{}", create.parent_uid);
                    let id = Some(flow_id(&identifier));
                    self.events.push(CteEvent {
                        name: identifier.clone(),
                        cat: Some(cat),
                        ph: "s",
                        ts: Some(parent_record.time as f64 + 0.5),
                        dur: None,
                        pid: ctx.rank,
                        tid: parent_record.tid,
                        id,
                        args: None,
                        cname: None,
                    });
                    self.events.push(CteEvent {
                        name: identifier,
                        cat: Some(cat),
                        ph: "t",
                        ts: Some(create_record.time as f64 + 0.5),
                        dur: None,
                        pid: ctx.rank,
                        tid: create_record.tid,
                        id,
                        args: None,
                        cname: None,
                    });
                }
            }

            if let Some(delete_index) = handle.delete {
                let delete_record = &ctx.records[delete_index];
                if let RecordPayload::Delete(d) = &delete_record.payload {
                    self.events.push(CteEvent {
                        name: create.label.clone(),
                        cat: Some("task-delete"),
                        ph: "X",
                        ts: Some(delete_record.time as f64),
                        dur: Some(1.0),
                        pid: ctx.rank,
                        tid: delete_record.tid,
                        id: None,
                        args: Some(json!({
                            "uid": uid,
                            "ts": delete_record.time,
                            "priority": d.priority,
                            "properties": flag_names(d.properties, d.statuses),
                        })),
                        cname: None,
                    });
                }
            }
        }
    }

    fn emit_dependencies(&mut self, ctx: &ProcessCtx<'_>, state: &ReplayState) {
        for (out_uid, successors) in &state.successors {
            let from = state
                .schedules
                .get(out_uid)
                .and_then(|s| s.last().copied())
                .and_then(|i| Self::schedule_record(ctx.records, i));
            let from = match from {
                Some(from) => from,
                None => continue,
            };
            for in_uid in successors {
                // a cancelled successor never ran
                let to = state
                    .schedules
                    .get(in_uid)
                    .and_then(|s| s.first().copied())
                    .and_then(|i| Self::schedule_record(ctx.records, i));
                let to = match to {
                    Some(to) => to,
                    None => continue,
                };
                let identifier = format!(
                    "dependency-{}-{}-{}-{out_uid}-{in_uid}",
                    ctx.pid, from.tid, to.tid
                );
                let id = Some(flow_id(&identifier));
                self.events.push(CteEvent {
                    name: identifier.clone(),
                    cat: Some("dependencies"),
                    ph: "s",
                    ts: Some(from.time as f64),
                    dur: None,
                    pid: ctx.rank,
                    tid: from.tid,
                    id,
                    args: None,
                    cname: None,
                });
                self.events.push(CteEvent {
                    name: identifier,
                    cat: Some("dependencies"),
                    ph: "t",
                    ts: Some(to.time as f64 + 1e-6),
                    dur: None,
                    pid: ctx.rank,
                    tid: to.tid,
                    id,
                    args: None,
                    cname: None,
                });
            }
        }
    }

    fn emit_thread_names(&mut self, ctx: &ProcessCtx<'_>, state: &ReplayState) {
        for tid in state.bind.keys() {
            self.events.push(CteEvent {
                name: "thread_name".to_string(),
                cat: None,
                ph: "M",
                ts: None,
                dur: None,
                pid: ctx.rank,
                tid: *tid,
                id: None,
                args: Some(json!({"name": format!("omp thread {tid}")})),
                cname: None,
            });
        }
    }

    fn emit_communications(&mut self, env: &Env) {
        for bucket in env.graph.communications.values() {
            let matched = bucket.sends.len().min(bucket.recvs.len());
            for i in 0..matched {
                let (spid, sidx) = bucket.sends[i];
                let (rpid, ridx) = bucket.recvs[i];
                let send_record = &env.store.records(spid)[sidx];
                let send = match &send_record.payload {
                    RecordPayload::Send(s) => s,
                    _ => continue,
                };
                let recv_uid: Uid = match &env.store.records(rpid)[ridx].payload {
                    RecordPayload::Recv(r) => r.uid,
                    _ => continue,
                };
                let rnode = match env.graph.node(crate::graph::NodeId {
                    pid: rpid,
                    uid: recv_uid,
                }) {
                    Some(node) => node,
                    None => continue,
                };
                let target = &env.store.records(rpid)[rnode.last_sched];

                let identifier = format!(
                    "communication-{}-{}-{}-{}-{}-{}-{}-{recv_uid}",
                    send.comm, spid, send.dst, send.count, send.dtype, send.tag, send.uid
                );
                let id = Some(flow_id(&identifier));
                self.events.push(CteEvent {
                    name: identifier.clone(),
                    cat: Some("communication"),
                    ph: "s",
                    ts: Some(send_record.time as f64),
                    dur: None,
                    pid: env.ranks.rank_of(spid),
                    tid: send_record.tid,
                    id,
                    args: None,
                    cname: None,
                });
                self.events.push(CteEvent {
                    name: identifier,
                    cat: Some("communication"),
                    ph: "t",
                    ts: Some(target.time as f64),
                    dur: None,
                    pid: env.ranks.rank_of(rpid),
                    tid: target.tid,
                    id,
                    args: None,
                    cname: None,
                });
            }
        }
    }
}

impl Default for CtePass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for CtePass {
    fn name(&self) -> &'static str {
        "cte"
    }

    fn on_start(&mut self, config: &Config) {
        self.schedule = config.schedule;
        self.creation = config.creation;
        self.dependencies = config.dependencies;
        self.communications = config.communications;
        self.color = config.color;
    }

    fn on_process_inspection_end(&mut self, ctx: &ProcessCtx<'_>) {
        let state = ctx.state;
        if self.schedule {
            self.emit_schedule_pairs(ctx, state);
        }
        if self.creation {
            self.emit_lifecycle(ctx, state);
        }
        if self.schedule && self.dependencies {
            self.emit_dependencies(ctx, state);
        }
        if self.schedule || self.creation {
            self.emit_thread_names(ctx, state);
        }
    }

    fn on_end(&mut self, env: &mut Env, config: &Config) -> anyhow::Result<()> {
        if self.schedule && self.communications {
            self.emit_communications(env);
        }
        let path = config.artifact(".json");
        info!("writing `{}` to disk...", path.display());
        let events = std::mem::take(&mut self.events);
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &json!({ "traceEvents": events }))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
