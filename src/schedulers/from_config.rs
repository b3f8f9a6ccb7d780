use std::sync::Arc;

use parse_display::Display;

use super::*;
use crate::milp::MilpSolver;
use crate::provisioner::ProvisionerConfig;

/// Build the optimizer selected by `cfg.scheduler`.
/// Replay bypasses optimization entirely and gets `None`.
pub fn from_config(cfg: &ProvisionerConfig, n_regions: usize, solver: Arc<dyn MilpSolver>) -> Option<Optimizer> {
    info!(scheduler = %cfg.scheduler, "using");
    let limits = cfg.limits(n_regions);
    let strategy: Arc<dyn Strategy> = match cfg.scheduler {
        SchedulerKind::Carbon => Arc::new(CarbonAware::new(limits, cfg.max_latency, solver)),
        SchedulerKind::Latency => Arc::new(LatencyAware::new(limits, solver)),
        SchedulerKind::Replay => return None,
    };
    debug!(?limits, "server limits");
    Some(Optimizer::new(strategy).with_timeout(cfg.solver_timeout()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Carbon,
    Latency,
    Replay,
}
