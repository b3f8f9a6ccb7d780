use std::sync::Arc;

use super::*;
use crate::milp::MilpSolver;
use crate::utils::float::{max_of, normalizer};

const ALPHA: f64 = 0.5;

/// Balance routed latency against the number of servers, no hard latency ceiling
pub struct LatencyAware {
    limits: ServerLimits,
    solver: Arc<dyn MilpSolver>,
}

impl LatencyAware {
    pub fn new(limits: ServerLimits, solver: Arc<dyn MilpSolver>) -> Self {
        Self { limits, solver }
    }
}

impl Strategy for LatencyAware {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn solve(&self, inputs: &ScheduleInputs) -> ScheduleDecision {
        // worst latency out of each origin, weighted by its demand
        let worst_case: f64 = inputs
            .latencies
            .iter()
            .zip(&inputs.demand)
            .map(|(row, &d)| d as f64 * max_of(row.iter().copied()).unwrap_or(0.0))
            .sum();
        let n1 = normalizer(worst_case);
        let n2 = normalizer(f64::from(self.limits.max_total_servers));

        let mut rp = RoutingProblem::new(inputs, self.limits, |_, _| None);
        for (i, row) in rp.route.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                rp.problem.minimize_term(x, ALPHA * n1 * inputs.latencies[i][j]);
            }
        }
        for &s in &rp.servers {
            rp.problem.minimize_term(s, (1.0 - ALPHA) * n2);
        }

        match self.solver.solve(&rp.problem) {
            Ok(assignment) => rp.decode(&assignment, inputs),
            Err(failure) => {
                warn!(%failure, "latency placement failed");
                infeasible_decision(inputs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milp::MicroLp;

    fn strategy(per_region: u32, total: u32) -> LatencyAware {
        LatencyAware::new(
            ServerLimits {
                max_total_servers: total,
                max_servers_per_region: per_region,
            },
            Arc::new(MicroLp),
        )
    }

    #[test]
    fn serves_traffic_locally() {
        let inputs = ScheduleInputs {
            carbon_intensities: vec![1.0, 500.0, 900.0],
            latencies: vec![
                vec![0.0, 100.0, 250.0],
                vec![100.0, 0.0, 200.0],
                vec![250.0, 200.0, 0.0],
            ],
            capacities: vec![10.0, 10.0, 10.0],
            demand: vec![30, 20, 10],
        };
        let d = strategy(10, 30).solve(&inputs);

        assert!(d.objective >= 0.0);
        assert_eq!(d.route, vec![vec![30, 0, 0], vec![0, 20, 0], vec![0, 0, 10]]);
        assert_eq!(d.servers, vec![3, 2, 1]);
    }

    #[test]
    fn spills_over_when_local_capacity_runs_out() {
        let inputs = ScheduleInputs {
            carbon_intensities: vec![1.0, 1.0],
            latencies: vec![vec![0.0, 80.0], vec![80.0, 0.0]],
            capacities: vec![10.0, 10.0],
            demand: vec![30, 0],
        };
        let d = strategy(2, 4).solve(&inputs);

        assert!(d.objective >= 0.0);
        assert_eq!(d.routed_from(0), 30);
        assert_eq!(d.route[0][0], 20);
        assert_eq!(d.route[0][1], 10);
        assert_eq!(d.servers, vec![2, 1]);
    }

    #[test]
    fn no_demand_costs_nothing() {
        let inputs = ScheduleInputs {
            carbon_intensities: vec![1.0, 1.0],
            latencies: vec![vec![0.0, 80.0], vec![80.0, 0.0]],
            capacities: vec![10.0, 10.0],
            demand: vec![0, 0],
        };
        let d = strategy(2, 4).solve(&inputs);
        approx::assert_abs_diff_eq!(d.objective, 0.0, epsilon = 1e-9);
        assert_eq!(d.servers, vec![0, 0]);
    }
}
