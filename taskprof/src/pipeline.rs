//! Pipeline orchestration: load, repair, replay, glue, then run the
//! end-of-pipeline passes.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use log::info;
use taskprof_trace::{count_files, repair, RankMap, RecordStore};

use crate::config::Config;
use crate::graph::build_global_graph;
use crate::pass::{Dispatcher, Env};
use crate::passes;
use crate::progress::Progress;
use crate::replay::replay_process;

/// Run the whole analysis with the default pass line-up. Returns the final
/// environment so callers (tests, mostly) can inspect every intermediate
/// result.
pub fn run(config: &Config) -> anyhow::Result<Env> {
    run_with_passes(config, passes::default_passes())
}

pub fn run_with_passes(
    config: &Config,
    passes: Vec<Box<dyn crate::pass::Pass>>,
) -> anyhow::Result<Env> {
    let mut dispatcher = Dispatcher::new(passes)?;
    dispatcher.on_start(config);

    let mut progress = Progress::new(config.progress);

    info!("converting raw trace to records...");
    let nfiles = count_files(&config.input)
        .with_context(|| format!("scanning `{}`", config.input.display()))?;
    progress.begin("loading traces", nfiles as u64);
    let mut store = RecordStore::load_dir(&config.input, || progress.update())
        .with_context(|| format!("loading traces from `{}`", config.input.display()))?;
    progress.finish();
    if store.is_empty() {
        bail!("no trace records found in `{}`", config.input.display());
    }

    info!("fixing record timings...");
    progress.begin("repairing records", 2 * store.total_records() as u64);
    let report = repair(&mut store, || progress.update())?;
    progress.finish();
    if report.retargeted_dependencies > 0 || report.dropped_dependencies > 0 {
        info!(
            "repair: {} dependencies retargeted, {} dropped, {} creations back-shifted",
            report.retargeted_dependencies,
            report.dropped_dependencies,
            report.shifted_creations
        );
    }

    let ranks = RankMap::from_store(&store);

    let mut replays = BTreeMap::new();
    let pids: Vec<_> = store.pids().collect();
    for pid in pids {
        let records = store.records(pid);
        if records.is_empty() {
            continue;
        }
        let rank = ranks.rank_of(pid);
        info!("replaying process {pid} of rank {rank}");
        progress.begin(&format!("process {pid}"), records.len() as u64);
        let replay = replay_process(pid, rank, records, &mut dispatcher, &mut progress)?;
        progress.finish();
        replays.insert(pid, replay);
    }

    info!("generating global task dependency graph...");
    let graph = build_global_graph(&replays, &store, &ranks)?;

    let mut env = Env {
        store,
        ranks,
        replays,
        graph,
        critical: None,
    };
    dispatcher.on_end(&mut env, config)?;
    Ok(env)
}
