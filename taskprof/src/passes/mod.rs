//! Concrete passes: critical path, statistics report, Chrome-trace
//! emitter, DOT renderer and the raw record dumps.

pub mod critical;
pub mod cte;
pub mod dot;
pub mod records;
pub mod stats;

pub use critical::CriticalPass;
pub use cte::CtePass;
pub use dot::DotPass;
pub use records::RecordsPass;
pub use stats::StatsPass;

use crate::pass::Pass;

/// The default pass line-up. The dispatcher orders them by their declared
/// requirements.
pub fn default_passes() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(StatsPass::new()),
        Box::new(CriticalPass::new()),
        Box::new(DotPass::new()),
        Box::new(CtePass::new()),
        Box::new(RecordsPass::new()),
    ]
}
