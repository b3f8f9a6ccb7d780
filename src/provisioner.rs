//! Per-hour provisioning: build the hour's request batches, pick between the
//! optimizer and the replay path, and derive load-balancing weights.

use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::milp::MilpSolver;
use crate::region::RegionModel;
use crate::schedulers::{self, sanitize_latencies, Optimizer, SchedulerKind, ServerLimits};
use crate::simulator::InfeasiblePolicy;
use crate::types::{Hour, RequestBatch, ScheduleDecision, ScheduleInputs, SimulationHorizon};
use crate::utils::prelude::*;
use crate::workload::Workload;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    pub scheduler: SchedulerKind,
    pub horizon_hours: usize,
    /// `YYYY-MM-DD`, the first hour is midnight UTC
    pub start_date: String,
    /// carbon strategy only: links slower than this carry no traffic
    pub max_latency: f64,
    /// defaults to `max_servers_per_region` times the number of regions
    #[serde(default)]
    pub max_total_servers: Option<u32>,
    pub max_servers_per_region: u32,
    /// requests per hour a single server sustains
    pub server_capacity: f64,
    /// region hosting the load balancer
    pub load_balancer_region: String,
    /// fixed request volume replacing every trace value
    #[serde(default)]
    pub request_rate_override: Option<f64>,
    #[serde(default)]
    pub on_infeasible: InfeasiblePolicy,
    #[serde(default)]
    pub solver_timeout_secs: Option<f64>,
}

impl ProvisionerConfig {
    pub fn horizon(&self) -> Result<SimulationHorizon> {
        SimulationHorizon::parse(&self.start_date, self.horizon_hours)
    }

    pub fn limits(&self, n_regions: usize) -> ServerLimits {
        ServerLimits {
            max_total_servers: self
                .max_total_servers
                .unwrap_or_else(|| self.max_servers_per_region.saturating_mul(n_regions as u32)),
            max_servers_per_region: self.max_servers_per_region,
        }
    }

    pub fn solver_timeout(&self) -> Option<Duration> {
        self.solver_timeout_secs
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.server_capacity > 0.0) {
            return Err(config::ConfigError::Message(format!(
                "provisioner.server_capacity must be positive, got {}",
                self.server_capacity
            ))
            .into());
        }
        if self.horizon_hours == 0 {
            return Err(config::ConfigError::Message("provisioner.horizon_hours must be at least 1".into()).into());
        }
        Ok(())
    }
}

/// What gets applied for one hour
#[derive(Debug, Clone, PartialEq)]
pub struct HourPlan {
    pub hour: Hour,
    pub decision: ScheduleDecision,
    /// percentage of traffic per region, in region order
    pub weights: Vec<u32>,
}

/// `weight[j] = round(100 · served_j / total)`, all zero when nothing is routed
pub fn load_balancing_weights(route: &[Vec<u64>]) -> Vec<u32> {
    let n = route.first().map_or(0, Vec::len);
    let served = (0..n).map(|j| route.iter().map(|row| row[j]).sum::<u64>()).collect_vec();
    let total: u64 = served.iter().sum();
    if total == 0 {
        return vec![0; n];
    }
    served
        .iter()
        .map(|&s| (100.0 * s as f64 / total as f64).round() as u32)
        .collect()
}

pub struct Provisioner {
    model: RegionModel,
    workload: Workload,
    /// `None` replays historical demand
    optimizer: Option<Optimizer>,
}

impl Provisioner {
    pub fn new(model: RegionModel, workload: Workload, optimizer: Option<Optimizer>) -> Self {
        Self {
            model,
            workload,
            optimizer,
        }
    }

    pub fn from_config(cfg: &ProvisionerConfig, model: RegionModel, workload: Workload, solver: Arc<dyn MilpSolver>) -> Self {
        let optimizer = schedulers::from_config(cfg, model.len(), solver);
        Self::new(model, workload, optimizer)
    }

    pub fn model(&self) -> &RegionModel {
        &self.model
    }

    pub fn build_batches(&self, hour: Hour) -> Result<Vec<RequestBatch<'_>>> {
        self.model
            .regions()
            .iter()
            .map(|region| {
                let volume = self.workload.volume(&self.model, region.index(), hour)?;
                Ok(RequestBatch::new(region, volume))
            })
            .collect()
    }

    fn carbon_intensities(&self, hour: Hour) -> Result<Vec<f64>> {
        (0..self.model.len())
            .map(|j| self.model.carbon_intensity(j, hour))
            .collect()
    }

    fn latencies(&self) -> Vec<Vec<f64>> {
        let n = self.model.len();
        let mut latencies = (0..n)
            .map(|i| (0..n).map(|j| self.model.latency(i, j)).collect())
            .collect_vec();
        sanitize_latencies(&mut latencies);
        latencies
    }

    /// Optimizer input for `hour`, with latencies already sanitized
    pub fn schedule_inputs(&self, hour: Hour) -> Result<ScheduleInputs> {
        let batches = self.build_batches(hour)?;
        for batch in &batches {
            trace!(%batch, "built");
        }
        Ok(ScheduleInputs {
            carbon_intensities: self.carbon_intensities(hour)?,
            latencies: self.latencies(),
            capacities: self.model.regions().iter().map(|r| r.capacity()).collect(),
            demand: batches.iter().map(RequestBatch::requests).collect(),
        })
    }

    /// Every region serves its own historical demand with just enough servers
    pub fn replay(&self, hour: Hour) -> Result<ScheduleDecision> {
        let n = self.model.len();
        let mut servers = Vec::with_capacity(n);
        let mut route = vec![vec![0; n]; n];
        for region in self.model.regions() {
            let j = region.index();
            let demand = self.model.demand_vector_for_hour(j, hour)?[j].max(0.0);
            servers.push((demand / region.capacity()).ceil() as u32);
            route[j][j] = demand.round() as u64;
        }
        Ok(ScheduleDecision {
            servers,
            route,
            carbon_intensities: self.carbon_intensities(hour)?,
            latencies: self.latencies(),
            objective: 0.0,
        })
    }

    pub fn provision(&self, hour: Hour) -> Result<HourPlan> {
        let decision = match &self.optimizer {
            Some(optimizer) => optimizer.schedule(hour, self.schedule_inputs(hour)?)?,
            None => {
                debug!(%hour, "replaying demand");
                self.replay(hour)?
            }
        };
        let weights = load_balancing_weights(&decision.route);
        debug!(?weights, "derived weights");
        Ok(HourPlan { hour, decision, weights })
    }
}
