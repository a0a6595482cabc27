//! Critical-path pass: runs the longest-path computation once every
//! process has been replayed and the global graph is glued together.

use log::info;

use crate::config::Config;
use crate::critical;
use crate::pass::{Env, Pass};

pub struct CriticalPass;

impl CriticalPass {
    pub fn new() -> CriticalPass {
        CriticalPass
    }
}

impl Default for CriticalPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for CriticalPass {
    fn name(&self) -> &'static str {
        "critical"
    }

    fn on_end(&mut self, env: &mut Env, _config: &Config) -> anyhow::Result<()> {
        let path = critical::compute(&env.graph)?;
        critical::mark(&mut env.graph, &path);
        info!(
            "critical path: {} nodes, {:.6}s",
            path.nodes.len(),
            path.total_time as f64 * 1e-6
        );
        let nthreads = env.replays.values().map(|r| r.accounting.nthreads).sum();
        let max_wall = env
            .replays
            .values()
            .map(|r| r.accounting.wall)
            .max()
            .unwrap_or(0);
        critical::log_work_span(&env.graph, &path, nthreads, max_wall);
        env.critical = Some(path);
        Ok(())
    }
}
