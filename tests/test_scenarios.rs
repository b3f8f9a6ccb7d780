use std::path::PathBuf;
use std::sync::Arc;

use rand_seeder::{Seeder, SipRng};

use carbonsim::dataset::DatasetConfig;
use carbonsim::milp::MicroLp;
use carbonsim::provisioner::{load_balancing_weights, Provisioner, ProvisionerConfig};
use carbonsim::region::{Region, RegionModel};
use carbonsim::schedulers::{CarbonAware, LatencyAware, Optimizer, SchedulerKind, ServerLimits, Strategy};
use carbonsim::simulator::InfeasiblePolicy;
use carbonsim::types::{Hour, ScheduleDecision, ScheduleInputs};
use carbonsim::workload::{DemandDistribution, SyntheticWorkload, Workload, WorkloadConfig, WorkloadMode};
use carbonsim::{Error, SimConfig};

fn limits(per_region: u32, total: u32) -> ServerLimits {
    ServerLimits {
        max_total_servers: total,
        max_servers_per_region: per_region,
    }
}

fn carbon(per_region: u32, total: u32, max_latency: f64) -> Optimizer {
    Optimizer::new(Arc::new(CarbonAware::new(limits(per_region, total), max_latency, Arc::new(MicroLp))))
}

fn latency(per_region: u32, total: u32) -> Optimizer {
    Optimizer::new(Arc::new(LatencyAware::new(limits(per_region, total), Arc::new(MicroLp))))
}

fn assert_valid(inputs: &ScheduleInputs, d: &ScheduleDecision) {
    let n = inputs.n_regions();
    for i in 0..n {
        assert_eq!(d.routed_from(i), inputs.demand[i], "flow conservation at origin {}", i);
    }
    for j in 0..n {
        let served = d.served_by(j) as f64;
        assert!(served <= f64::from(d.servers[j]) * inputs.capacities[j], "capacity at {}", j);
        if d.served_by(j) == 0 {
            assert_eq!(d.servers[j], 0, "idle region {} keeps servers", j);
        }
    }
}

fn three_regions(demand: Vec<u64>) -> ScheduleInputs {
    ScheduleInputs {
        carbon_intensities: vec![120.0, 30.0, 450.0],
        latencies: vec![
            vec![0.0, 180.0, 90.0],
            vec![180.0, 0.0, 260.0],
            vec![90.0, 260.0, 0.0],
        ],
        capacities: vec![10.0, 10.0, 10.0],
        demand,
    }
}

#[test]
fn two_region_carbon_scenario() {
    let inputs = ScheduleInputs {
        carbon_intensities: vec![1.0, 5.0],
        latencies: vec![vec![0.0, 50.0], vec![50.0, 0.0]],
        capacities: vec![10.0, 10.0],
        demand: vec![10, 5],
    };
    let d = carbon(5, 10, 100.0).schedule(Hour(0), inputs.clone()).unwrap();

    assert_valid(&inputs, &d);
    assert!(d.servers[0] >= 2);
    assert_eq!(d.served_by(0), 15);
    assert_eq!(d.servers[1], 0);
}

#[test]
fn carbon_respects_latency_ceiling() {
    let max_latency = 200.0;
    for demand in vec![vec![40, 10, 25], vec![0, 70, 5], vec![15, 15, 15]] {
        let inputs = three_regions(demand);
        let d = carbon(10, 30, max_latency).schedule(Hour(0), inputs.clone()).unwrap();
        assert_valid(&inputs, &d);
        for i in 0..3 {
            for j in 0..3 {
                if inputs.latencies[i][j] > max_latency {
                    assert_eq!(d.route[i][j], 0, "route {} -> {} over the ceiling", i, j);
                }
            }
        }
    }
}

#[test]
fn latency_strategy_is_valid() {
    for demand in vec![vec![40, 10, 25], vec![0, 70, 5], vec![15, 15, 15]] {
        let inputs = three_regions(demand);
        let d = latency(10, 30).schedule(Hour(0), inputs.clone()).unwrap();
        assert_valid(&inputs, &d);
        assert!(d.objective >= 0.0);
    }
}

#[test]
fn infeasible_demand() {
    let inputs = three_regions(vec![500, 500, 500]);
    for opt in &[carbon(5, 10, 1000.0), latency(5, 10)] {
        match opt.schedule(Hour(7), inputs.clone()) {
            Err(Error::InfeasibleSchedule { hour, inputs: snapshot }) => {
                assert_eq!(hour, Hour(7));
                assert_eq!(*snapshot, inputs);
            }
            other => panic!("expected an infeasible schedule, got {:?}", other),
        }
    }
}

#[test]
fn replay_scenario() {
    let model = RegionModel::new(
        vec![
            Region::new("north", vec![100.0], vec![0.0, 30.0], 10.0),
            Region::new("south", vec![200.0], vec![30.0, 0.0], 10.0),
        ],
        vec![vec![23.0, 40.0]],
    )
    .unwrap();
    let p = Provisioner::new(model, Workload::Trace { rate_override: None }, None);
    let plan = p.provision(Hour(0)).unwrap();

    assert_eq!(plan.decision.servers, vec![3, 4]);
    assert_eq!(plan.decision.route, vec![vec![23, 0], vec![0, 40]]);
    assert_eq!(plan.weights, vec![37, 63]);
}

#[test]
fn weights_sum_to_about_100() {
    let routes = vec![
        vec![vec![1, 1, 1], vec![0, 0, 0], vec![0, 0, 0]],
        vec![vec![10, 3], vec![7, 1]],
        vec![vec![5, 5, 5, 5, 5, 5, 1]],
    ];
    for route in routes {
        let sum: u32 = load_balancing_weights(&route).iter().sum();
        assert!((97..=103).contains(&sum), "{:?} sums to {}", route, sum);
    }
}

#[test]
fn synthetic_volume_preservation() {
    let model = RegionModel::new(
        vec![
            Region::new("a", vec![1.0; 13], vec![0.0, 1.0], 10.0),
            Region::new("b", vec![1.0; 13], vec![1.0, 0.0], 10.0),
        ],
        (0..13).map(|h| vec![100.0 + h as f64, 3.0 * h as f64]).collect(),
    )
    .unwrap();
    let hours = 12;

    for dist in &[DemandDistribution::Exponential, DemandDistribution::Bimodal, DemandDistribution::Trimodal] {
        let mut rng: SipRng = Seeder::from("volume").make_rng();
        let synthetic = SyntheticWorkload::generate(&model, hours, *dist, &mut rng).unwrap();
        for region in 0..model.len() {
            let total = synthetic.historical_total(region);
            let generated: f64 = synthetic.volumes(region).iter().sum();
            // each of the hours + 1 values is rounded on its own
            assert!(
                (generated - total).abs() <= (hours + 1) as f64 / 2.0,
                "{}: {} generated for {}",
                dist,
                generated,
                total
            );
        }
    }
}

fn demo_config(scheduler: SchedulerKind, mode: WorkloadMode) -> SimConfig {
    SimConfig {
        seed: Some("scenario".into()),
        dataset: DatasetConfig {
            dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/resources/dataset")),
            name: "demo".into(),
            carbon_intensity_file: "carbon_intensities.csv".into(),
            request_file: "requests.csv".into(),
            latency_file: "latency.csv".into(),
            offset_file: "offset.csv".into(),
        },
        provisioner: ProvisionerConfig {
            scheduler,
            horizon_hours: 3,
            start_date: "2022-08-13".into(),
            max_latency: 500.0,
            max_total_servers: None,
            max_servers_per_region: 100,
            server_capacity: 10.0,
            load_balancer_region: "us-east-1".into(),
            request_rate_override: None,
            on_infeasible: InfeasiblePolicy::Abort,
            solver_timeout_secs: None,
        },
        workload: WorkloadConfig {
            mode,
            distribution: "BIMODAL".into(),
        },
    }
}

#[test]
fn end_to_end_on_demo_data() {
    for scheduler in &[SchedulerKind::Carbon, SchedulerKind::Latency, SchedulerKind::Replay] {
        for mode in &[WorkloadMode::Trace, WorkloadMode::Synthetic] {
            let summary = carbonsim::run_with(&demo_config(*scheduler, *mode)).unwrap();
            assert_eq!(summary.scheduler, scheduler.to_string());
            assert_eq!(summary.records.len(), 3);
            assert!(summary.skipped.is_empty());
            for record in &summary.records {
                assert_eq!(record.servers.len(), 3);
                let weights: u32 = record.weights.values().sum();
                assert!((97..=103).contains(&weights) || weights == 0);
                assert!(record.estimated_carbon >= 0.0);
            }
        }
    }
}

#[test]
fn skip_policy_keeps_going() {
    let mut cfg = demo_config(SchedulerKind::Carbon, WorkloadMode::Trace);
    // one server per region can never serve the demo traffic
    cfg.provisioner.max_servers_per_region = 1;
    assert!(matches!(carbonsim::run_with(&cfg), Err(Error::InfeasibleSchedule { hour: Hour(0), .. })));

    cfg.provisioner.on_infeasible = InfeasiblePolicy::Skip;
    let summary = carbonsim::run_with(&cfg).unwrap();
    assert!(summary.records.is_empty());
    assert_eq!(summary.skipped, vec![Hour(0), Hour(1), Hour(2)]);
}

#[test]
fn startup_validation() {
    let mut cfg = demo_config(SchedulerKind::Replay, WorkloadMode::Synthetic);
    cfg.workload.distribution = "GAUSSIAN".into();
    assert!(matches!(carbonsim::run_with(&cfg), Err(Error::InvalidDistribution(_))));

    let mut cfg = demo_config(SchedulerKind::Replay, WorkloadMode::Trace);
    cfg.provisioner.load_balancer_region = "moon-1".into();
    assert!(matches!(carbonsim::run_with(&cfg), Err(Error::UnknownRegion(_))));

    let mut cfg = demo_config(SchedulerKind::Replay, WorkloadMode::Trace);
    cfg.provisioner.start_date = "2030-01-01".into();
    assert!(matches!(carbonsim::run_with(&cfg), Err(Error::DateNotFound { .. })));

    let mut cfg = demo_config(SchedulerKind::Replay, WorkloadMode::Trace);
    cfg.provisioner.horizon_hours = 60;
    assert!(matches!(carbonsim::run_with(&cfg), Err(Error::WindowOverflow { .. })));
}

#[test]
fn strategies_are_interchangeable() {
    let strategies: Vec<Box<dyn Strategy>> = vec![
        Box::new(CarbonAware::new(limits(10, 30), 1000.0, Arc::new(MicroLp))),
        Box::new(LatencyAware::new(limits(10, 30), Arc::new(MicroLp))),
    ];
    let inputs = three_regions(vec![12, 8, 4]);
    for s in &strategies {
        let d = s.solve(&inputs);
        assert!(d.objective >= 0.0, "{} failed", s.name());
        for i in 0..3 {
            assert_eq!(d.routed_from(i), inputs.demand[i]);
        }
    }
}
