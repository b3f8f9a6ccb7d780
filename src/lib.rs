use std::sync::Arc;

use rand_seeder::{Seeder, SipRng};
use serde::{Deserialize, Serialize};

use crate::collaborators::{LogDeployer, LogLoadBalancer, NoMetrics};
use crate::milp::MicroLp;
use crate::provisioner::{Provisioner, ProvisionerConfig};
use crate::simulator::{ControlLoop, RunSummary};
use crate::utils::prelude::*;
use crate::workload::{Workload, WorkloadConfig};

pub mod collaborators;
pub mod dataset;
pub mod milp;
pub mod provisioner;
pub mod region;
pub mod schedulers;
pub mod simulator;
pub mod types;
pub mod utils;
pub mod workload;

pub use crate::utils::prelude::{Error, Result};

/// Seed of the workload generator when the configuration names none
pub const DEFAULT_SEED: &str = "stripy zebra";

/// Everything a run needs, deserialized once from the layered configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub seed: Option<String>,
    pub dataset: dataset::DatasetConfig,
    pub provisioner: ProvisionerConfig,
    pub workload: WorkloadConfig,
}

impl SimConfig {
    /// Snapshot of the global configuration
    pub fn fetch() -> Result<Self> {
        config().fetch()
    }
}

/// Run the configured simulation end to end against the offline collaborators
pub fn run_sim() -> Result<RunSummary> {
    let cfg = SimConfig::fetch()?;
    run_with(&cfg)
}

pub fn run_with(cfg: &SimConfig) -> Result<RunSummary> {
    let _g = info_span!("sim").entered();

    cfg.provisioner.validate()?;
    let horizon = cfg.provisioner.horizon()?;
    let model = dataset::load(&cfg.dataset, &horizon, cfg.provisioner.server_capacity)?;
    // fail before anything is generated
    model.index_of(&cfg.provisioner.load_balancer_region)?;

    let mut rng: SipRng = Seeder::from(cfg.seed.as_deref().unwrap_or(DEFAULT_SEED)).make_rng();
    let workload = Workload::from_config(
        &cfg.workload,
        &model,
        horizon.hours,
        cfg.provisioner.request_rate_override,
        &mut rng,
    )?;

    let provisioner = Provisioner::from_config(&cfg.provisioner, model, workload, Arc::new(MicroLp));
    let mut control = ControlLoop::new(
        provisioner,
        horizon,
        cfg.provisioner.load_balancer_region.as_str(),
        LogDeployer,
        LogLoadBalancer,
        NoMetrics,
    )?
    .with_policy(cfg.provisioner.on_infeasible)
    .with_scheduler_name(cfg.provisioner.scheduler.to_string());

    let _g = info_span!("run").entered();
    control.run()
}
