//! Observer passes and their dispatcher.
//!
//! The replay engine broadcasts task lifecycle events, in canonical record
//! order, to every registered pass. Passes keep their own state and must
//! not mutate the replay; whatever they produce for other passes goes
//! through [`Env`] at `on_end` time. Ordering between passes is derived
//! from explicit `requires`/`provides` declarations, with registration
//! order as the tie-break.

use std::collections::{BTreeMap, HashSet};

use anyhow::bail;
use taskprof_trace::record::Record;
use taskprof_trace::{Pid, RankMap, RecordStore, Time};

use crate::config::Config;
use crate::critical::CriticalPath;
use crate::graph::GlobalGraph;
use crate::replay::{ProcessReplay, ReplayState};

/// Everything the end-of-pipeline passes can read and extend.
#[derive(Debug)]
pub struct Env {
    pub store: RecordStore,
    pub ranks: RankMap,
    pub replays: BTreeMap<Pid, ProcessReplay>,
    pub graph: GlobalGraph,
    pub critical: Option<CriticalPath>,
}

/// Scope of one process replay.
pub struct ProcessCtx<'a> {
    pub pid: Pid,
    pub rank: u32,
    pub t0: Time,
    pub tf: Time,
    pub records: &'a [Record],
    pub state: &'a ReplayState,
}

/// One task lifecycle event inside a process replay. `state` reflects the
/// replay after the event was applied.
pub struct TaskCtx<'a> {
    pub pid: Pid,
    pub rank: u32,
    pub t0: Time,
    pub tf: Time,
    pub records: &'a [Record],
    pub index: usize,
    pub state: &'a ReplayState,
}

impl TaskCtx<'_> {
    pub fn record(&self) -> &Record {
        &self.records[self.index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Create,
    Delete,
    Dependency,
    Ready,
    Started,
    Completed,
    Blocked,
    Unblocked,
    Paused,
    Resumed,
}

#[allow(unused_variables)]
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Key under which this pass's output is known to other passes.
    fn provides(&self) -> &'static str {
        self.name()
    }

    /// Outputs of other passes that must be produced first.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn on_start(&mut self, config: &Config) {}
    fn on_process_inspection_start(&mut self, ctx: &ProcessCtx<'_>) {}
    fn on_process_inspection_end(&mut self, ctx: &ProcessCtx<'_>) {}
    fn on_task_create(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_delete(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_dependency(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_ready(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_started(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_completed(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_blocked(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_unblocked(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_paused(&mut self, ctx: &TaskCtx<'_>) {}
    fn on_task_resumed(&mut self, ctx: &TaskCtx<'_>) {}

    fn on_end(&mut self, env: &mut Env, config: &Config) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Broadcasts lifecycle events to passes, in dependency order.
pub struct Dispatcher {
    passes: Vec<Box<dyn Pass>>,
}

impl Dispatcher {
    /// Order passes so that every `requires()` key is provided by an
    /// earlier pass. Registration order breaks ties.
    pub fn new(passes: Vec<Box<dyn Pass>>) -> anyhow::Result<Dispatcher> {
        let provided: HashSet<&'static str> = passes.iter().map(|p| p.provides()).collect();
        for pass in &passes {
            for req in pass.requires() {
                if !provided.contains(req) {
                    bail!(
                        "pass `{}` requires `{}`, which no registered pass provides",
                        pass.name(),
                        req
                    );
                }
            }
        }

        let mut remaining = passes;
        let mut ordered = Vec::with_capacity(remaining.len());
        let mut done: HashSet<&'static str> = HashSet::new();
        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .position(|p| p.requires().iter().all(|r| done.contains(r)));
            match next {
                Some(i) => {
                    let pass = remaining.remove(i);
                    done.insert(pass.provides());
                    ordered.push(pass);
                }
                None => {
                    let names: Vec<_> = remaining.iter().map(|p| p.name()).collect();
                    bail!("dependency cycle among passes: {}", names.join(", "));
                }
            }
        }
        Ok(Dispatcher { passes: ordered })
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn on_start(&mut self, config: &Config) {
        for pass in &mut self.passes {
            pass.on_start(config);
        }
    }

    pub fn process_start(&mut self, ctx: &ProcessCtx<'_>) {
        for pass in &mut self.passes {
            pass.on_process_inspection_start(ctx);
        }
    }

    pub fn process_end(&mut self, ctx: &ProcessCtx<'_>) {
        for pass in &mut self.passes {
            pass.on_process_inspection_end(ctx);
        }
    }

    pub fn emit(&mut self, hook: Hook, ctx: &TaskCtx<'_>) {
        for pass in &mut self.passes {
            match hook {
                Hook::Create => pass.on_task_create(ctx),
                Hook::Delete => pass.on_task_delete(ctx),
                Hook::Dependency => pass.on_task_dependency(ctx),
                Hook::Ready => pass.on_task_ready(ctx),
                Hook::Started => pass.on_task_started(ctx),
                Hook::Completed => pass.on_task_completed(ctx),
                Hook::Blocked => pass.on_task_blocked(ctx),
                Hook::Unblocked => pass.on_task_unblocked(ctx),
                Hook::Paused => pass.on_task_paused(ctx),
                Hook::Resumed => pass.on_task_resumed(ctx),
            }
        }
    }

    pub fn on_end(&mut self, env: &mut Env, config: &Config) -> anyhow::Result<()> {
        for pass in &mut self.passes {
            pass.on_end(env, config)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        name: &'static str,
        requires: &'static [&'static str],
    }

    impl Pass for Named {
        fn name(&self) -> &'static str {
            self.name
        }
        fn requires(&self) -> &'static [&'static str] {
            self.requires
        }
    }

    #[test]
    fn passes_are_sorted_by_their_requirements() {
        let dispatcher = Dispatcher::new(vec![
            Box::new(Named {
                name: "dot",
                requires: &["critical"],
            }),
            Box::new(Named {
                name: "critical",
                requires: &[],
            }),
            Box::new(Named {
                name: "stats",
                requires: &[],
            }),
        ])
        .unwrap();
        assert_eq!(dispatcher.pass_names(), vec!["critical", "dot", "stats"]);
    }

    #[test]
    fn unknown_requirement_is_rejected() {
        let result = Dispatcher::new(vec![Box::new(Named {
            name: "dot",
            requires: &["missing"],
        })]);
        assert!(result.is_err());
    }

    #[test]
    fn requirement_cycles_are_rejected() {
        let result = Dispatcher::new(vec![
            Box::new(Named {
                name: "a",
                requires: &["b"],
            }),
            Box::new(Named {
                name: "b",
                requires: &["a"],
            }),
        ]);
        assert!(result.is_err());
    }
}
