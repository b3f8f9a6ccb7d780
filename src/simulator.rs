//! The control loop: one hour at a time, strictly in order.
//!
//! Each hour is provisioned, applied to the deployer and the load balancer, and then
//! checked against whatever traffic the metrics source measured. The next hour only
//! starts once the previous one is fully applied.

use std::collections::BTreeMap;

use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::collaborators::{Deployer, LoadBalancer, MetricsSource, ObservedTraffic};
use crate::provisioner::{HourPlan, Provisioner};
use crate::types::{Hour, SimulationHorizon};
use crate::utils::prelude::*;

/// What to do with an hour the optimizer can not place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InfeasiblePolicy {
    /// stop the whole run
    Abort,
    /// log the inputs, record the hour as skipped and go on
    Skip,
}

impl Default for InfeasiblePolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// Realized against expected traffic for one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDeviation {
    pub region: String,
    pub expected: f64,
    pub observed: u64,
}

impl RoutingDeviation {
    pub fn delta(&self) -> f64 {
        self.observed as f64 - self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourRecord {
    pub hour: Hour,
    pub servers: BTreeMap<String, u32>,
    pub weights: BTreeMap<String, u32>,
    pub carbon_intensities: BTreeMap<String, f64>,
    /// requests served times carbon intensity, summed over regions
    pub estimated_carbon: f64,
    /// mean latency of a routed request
    pub mean_latency: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deviations: Vec<RoutingDeviation>,
}

impl HourRecord {
    fn from_plan(plan: &HourPlan, names: &[&str]) -> Self {
        let d = &plan.decision;
        let by_region = |values: &[u32]| -> BTreeMap<String, u32> {
            names.iter().map(|n| (*n).to_owned()).zip(values.iter().copied()).collect()
        };

        let estimated_carbon = (0..d.n_regions())
            .map(|j| d.served_by(j) as f64 * d.carbon_intensities[j])
            .sum();
        let routed = d.total_routed();
        let mean_latency = if routed == 0 {
            0.0
        } else {
            d.route
                .iter()
                .zip(&d.latencies)
                .flat_map(|(row, lat)| row.iter().zip(lat).map(|(&x, &l)| x as f64 * l))
                .sum::<f64>()
                / routed as f64
        };

        Self {
            hour: plan.hour,
            servers: by_region(&d.servers),
            weights: by_region(&plan.weights),
            carbon_intensities: names
                .iter()
                .map(|n| (*n).to_owned())
                .zip(d.carbon_intensities.iter().copied())
                .collect(),
            estimated_carbon,
            mean_latency,
            deviations: vec![],
        }
    }

    pub fn total_servers(&self) -> u32 {
        self.servers.values().sum()
    }
}

/// Compare observed per-region traffic against the share the weights asked for
pub fn routing_deviations(weights: &BTreeMap<String, u32>, observed: &ObservedTraffic) -> Vec<RoutingDeviation> {
    let weight_sum: u32 = weights.values().sum();
    let total = observed.total() as f64;
    weights
        .iter()
        .map(|(region, &w)| {
            let expected = if weight_sum == 0 {
                0.0
            } else {
                f64::from(w) * total / f64::from(weight_sum)
            };
            RoutingDeviation {
                region: region.clone(),
                expected,
                observed: observed.served_by(region),
            }
        })
        .collect()
}

/// Aggregate of a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub scheduler: String,
    pub records: Vec<HourRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Hour>,
}

impl RunSummary {
    pub fn total_estimated_carbon(&self) -> f64 {
        self.records.iter().map(|r| r.estimated_carbon).sum()
    }

    pub fn server_hours(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.total_servers())).sum()
    }
}

pub struct ControlLoop<D, L, M> {
    provisioner: Provisioner,
    horizon: SimulationHorizon,
    load_balancer_region: String,
    policy: InfeasiblePolicy,
    scheduler: String,
    deployer: D,
    load_balancer: L,
    metrics: M,
}

impl<D, L, M> ControlLoop<D, L, M>
where
    D: Deployer,
    L: LoadBalancer,
    M: MetricsSource,
{
    /// Fails with `UnknownRegion` when the load balancer is not hosted in a loaded region
    pub fn new(
        provisioner: Provisioner,
        horizon: SimulationHorizon,
        load_balancer_region: impl Into<String>,
        deployer: D,
        load_balancer: L,
        metrics: M,
    ) -> Result<Self> {
        let load_balancer_region = load_balancer_region.into();
        provisioner.model().index_of(&load_balancer_region)?;
        Ok(Self {
            provisioner,
            horizon,
            load_balancer_region,
            policy: InfeasiblePolicy::default(),
            scheduler: String::new(),
            deployer,
            load_balancer,
            metrics,
        })
    }

    pub fn with_policy(mut self, policy: InfeasiblePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Label recorded in the summary
    pub fn with_scheduler_name(mut self, name: impl Into<String>) -> Self {
        self.scheduler = name.into();
        self
    }

    pub fn deployer(&self) -> &D {
        &self.deployer
    }

    pub fn load_balancer(&self) -> &L {
        &self.load_balancer
    }

    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary {
            scheduler: self.scheduler.clone(),
            ..Default::default()
        };
        for hour in self.horizon.iter() {
            let _g = info_span!("hour", %hour).entered();
            match self.step(hour) {
                Ok(record) => summary.records.push(record),
                Err(err @ Error::InfeasibleSchedule { .. }) if self.policy == InfeasiblePolicy::Skip => {
                    warn!(%err, "skipping hour");
                    summary.skipped.push(hour);
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            hours = summary.records.len(),
            skipped = summary.skipped.len(),
            carbon = summary.total_estimated_carbon(),
            server_hours = summary.server_hours(),
            "run finished"
        );
        Ok(summary)
    }

    fn step(&mut self, hour: Hour) -> Result<HourRecord> {
        let plan = self.provisioner.provision(hour)?;
        let names = self.provisioner.model().region_names();
        let mut record = HourRecord::from_plan(&plan, &names);

        self.deployer.apply_servers(&record.servers)?;
        self.load_balancer
            .apply_weights(&self.load_balancer_region, &record.weights)?;

        if let Some(observed) = self.metrics.observe(hour)? {
            record.deviations = routing_deviations(&record.weights, &observed);
            for d in &record.deviations {
                debug!(region = %d.region, expected = d.expected, observed = d.observed, "routing");
            }
        }
        Ok(record)
    }
}
