use std::sync::Arc;

use super::*;
use crate::milp::MilpSolver;
use crate::utils::float::{max_of, normalizer};

/// weight of the carbon term, the rest goes to the server count
const ALPHA: f64 = 0.9;

/// Route demand to the cleanest regions without crossing `max_latency`
pub struct CarbonAware {
    limits: ServerLimits,
    max_latency: f64,
    solver: Arc<dyn MilpSolver>,
}

impl CarbonAware {
    pub fn new(limits: ServerLimits, max_latency: f64, solver: Arc<dyn MilpSolver>) -> Self {
        Self {
            limits,
            max_latency,
            solver,
        }
    }
}

impl Strategy for CarbonAware {
    fn name(&self) -> &'static str {
        "carbon"
    }

    fn solve(&self, inputs: &ScheduleInputs) -> ScheduleDecision {
        let max_carbon = max_of(inputs.carbon_intensities.iter().copied()).unwrap_or(0.0);
        let n1 = normalizer(max_carbon * inputs.total_demand() as f64);
        let n2 = normalizer(f64::from(self.limits.max_total_servers));

        let mut rp = RoutingProblem::new(inputs, self.limits, |i, j| {
            if inputs.latencies[i][j] > self.max_latency {
                Some(0.0)
            } else {
                None
            }
        });
        for row in &rp.route {
            for (j, &x) in row.iter().enumerate() {
                rp.problem.minimize_term(x, ALPHA * n1 * inputs.carbon_intensities[j]);
            }
        }
        for &s in &rp.servers {
            rp.problem.minimize_term(s, (1.0 - ALPHA) * n2);
        }

        match self.solver.solve(&rp.problem) {
            Ok(assignment) => rp.decode(&assignment, inputs),
            Err(failure) => {
                warn!(%failure, "carbon placement failed");
                infeasible_decision(inputs)
            }
        }
    }
}
