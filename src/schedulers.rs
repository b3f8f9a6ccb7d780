//! Placement and routing optimizers.
//!
//! A `Strategy` turns one hour of `ScheduleInputs` into a `ScheduleDecision` by
//! solving a MILP over two families of integer variables:
//! `route[i][j]`, requests from region i served by j, and `servers[j]`.
//!
//! Constraints shared by every strategy:
//! 1. `Σ_j servers[j] <= max_total_servers`
//! 2. `Σ_i route[i][j] <= servers[j] · capacity[j]` for every j
//! 3. `Σ_j route[i][j] == demand[i]` for every i
//! 4. `0 <= servers[j] <= max_servers_per_region`
//!
//! The `Optimizer` wraps a strategy with the per-hour policy: infeasibility is an
//! error carrying the input snapshot, and idle regions never keep servers.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::milp::{Assignment, MilpProblem, Relation, VarId};
use crate::types::{Hour, ScheduleDecision, ScheduleInputs};
use crate::utils::prelude::*;

mod carbon;
mod from_config;
mod latency;

pub use carbon::CarbonAware;
pub use from_config::{from_config, SchedulerKind};
pub use latency::LatencyAware;

/// Objective reported by a strategy whose solver found no solution
pub const INFEASIBLE_OBJECTIVE: f64 = -10_000.0;

/// Stand-in for unknown latencies, large enough that no solver routes over them
pub const LATENCY_PENALTY: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerLimits {
    pub max_total_servers: u32,
    pub max_servers_per_region: u32,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Never fails: an unsolvable hour comes back with `INFEASIBLE_OBJECTIVE`
    fn solve(&self, inputs: &ScheduleInputs) -> ScheduleDecision;
}

/// Replace undefined latencies with `LATENCY_PENALTY`, returns how many were replaced
pub fn sanitize_latencies(latencies: &mut [Vec<f64>]) -> usize {
    let mut replaced = 0;
    for value in latencies.iter_mut().flatten().filter(|v| v.is_nan()) {
        *value = LATENCY_PENALTY;
        replaced += 1;
    }
    if replaced > 0 {
        warn!(replaced, penalty = LATENCY_PENALTY, "NaN in latency matrix, using penalty instead");
    }
    replaced
}

/// Variables and shared constraints of the placement problem
struct RoutingProblem {
    problem: MilpProblem,
    route: Vec<Vec<VarId>>,
    servers: Vec<VarId>,
}

impl RoutingProblem {
    /// `route_cap(i, j)` may bound individual links
    fn new(inputs: &ScheduleInputs, limits: ServerLimits, route_cap: impl Fn(usize, usize) -> Option<f64>) -> Self {
        let n = inputs.n_regions();
        let mut problem = MilpProblem::new();

        let route = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| problem.add_integer(format!("x_{}_{}", i, j), route_cap(i, j)))
                    .collect_vec()
            })
            .collect_vec();
        let servers = (0..n)
            .map(|j| problem.add_integer(format!("s_{}", j), Some(f64::from(limits.max_servers_per_region))))
            .collect_vec();

        problem.add_constraint(
            "max_server",
            servers.iter().map(|&s| (s, 1.0)).collect(),
            Relation::LessEq,
            f64::from(limits.max_total_servers),
        );
        for j in 0..n {
            let terms = (0..n)
                .map(|i| (route[i][j], 1.0))
                .chain(std::iter::once((servers[j], -inputs.capacities[j])))
                .collect();
            problem.add_constraint(format!("capacity_{}", j), terms, Relation::LessEq, 0.0);
        }
        for i in 0..n {
            let terms = route[i].iter().map(|&x| (x, 1.0)).collect();
            problem.add_constraint(format!("all_requests_{}", i), terms, Relation::Equal, inputs.demand[i] as f64);
        }

        Self { problem, route, servers }
    }

    fn decode(&self, assignment: &Assignment, inputs: &ScheduleInputs) -> ScheduleDecision {
        ScheduleDecision {
            servers: self
                .servers
                .iter()
                .map(|&s| assignment.integer(s) as u32)
                .collect(),
            route: self
                .route
                .iter()
                .map(|row| row.iter().map(|&x| assignment.integer(x)).collect())
                .collect(),
            carbon_intensities: inputs.carbon_intensities.clone(),
            latencies: inputs.latencies.clone(),
            objective: assignment.objective,
        }
    }
}

/// All-zero decision flagged with `INFEASIBLE_OBJECTIVE`
fn infeasible_decision(inputs: &ScheduleInputs) -> ScheduleDecision {
    let n = inputs.n_regions();
    ScheduleDecision {
        servers: vec![0; n],
        route: vec![vec![0; n]; n],
        carbon_intensities: inputs.carbon_intensities.clone(),
        latencies: inputs.latencies.clone(),
        objective: INFEASIBLE_OBJECTIVE,
    }
}

/// Runs a strategy for one hour and enforces the per-hour policy
#[derive(Clone)]
pub struct Optimizer {
    strategy: Arc<dyn Strategy>,
    timeout: Option<Duration>,
}

impl Optimizer {
    pub fn new(strategy: Arc<dyn Strategy>) -> Self {
        Self { strategy, timeout: None }
    }

    /// Run the solver on a dedicated thread and give up after `timeout`.
    /// The solver itself can not be cancelled, an abandoned thread runs to completion in the background.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn schedule(&self, hour: Hour, inputs: ScheduleInputs) -> Result<ScheduleDecision> {
        let _g = debug_span!("optimize", %hour, strategy = self.strategy.name()).entered();

        let decision = match self.timeout {
            None => self.strategy.solve(&inputs),
            Some(timeout) => match self.solve_on_worker(&inputs, timeout)? {
                Some(decision) => decision,
                None => {
                    warn!(?timeout, "solver timed out");
                    infeasible_decision(&inputs)
                }
            },
        };

        if decision.objective < 0.0 {
            error!(
                %hour,
                demand = ?inputs.demand,
                capacities = ?inputs.capacities,
                total_demand = inputs.total_demand(),
                total_capacity = inputs.capacities.iter().sum::<f64>(),
                latencies = ?inputs.latencies,
                carbon_intensities = ?inputs.carbon_intensities,
                "could not place servers"
            );
            return Err(Error::InfeasibleSchedule {
                hour,
                inputs: Box::new(inputs),
            });
        }

        let mut decision = decision;
        decision.clear_idle_regions();
        info!(objective = decision.objective, servers = ?decision.servers, "placed servers");
        Ok(decision)
    }

    fn solve_on_worker(&self, inputs: &ScheduleInputs, timeout: Duration) -> Result<Option<ScheduleDecision>> {
        let (tx, rx) = mpsc::channel();
        let strategy = Arc::clone(&self.strategy);
        let inputs = inputs.clone();
        thread::Builder::new()
            .name("solver".into())
            .spawn(move || {
                // the receiver is gone after a timeout, nothing to report then
                let _ = tx.send(strategy.solve(&inputs));
            })?;
        Ok(rx.recv_timeout(timeout).ok())
    }
}
