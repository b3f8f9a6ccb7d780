//! The outside world as seen by the control loop.
//!
//! Deployment, load balancing and metrics live in other systems. The loop only
//! talks to them through these traits. The bundled implementations log what they
//! would have done, which is all an offline run needs.

use std::collections::BTreeMap;

use crate::types::Hour;
use crate::utils::prelude::*;

/// Makes the requested number of servers exist in each region
pub trait Deployer {
    fn apply_servers(&mut self, servers: &BTreeMap<String, u32>) -> Result<()>;
}

/// Biases traffic toward regions by integer weight
pub trait LoadBalancer {
    fn apply_weights(&mut self, host_region: &str, weights: &BTreeMap<String, u32>) -> Result<()>;
}

/// Requests observed between one pair of regions in a measurement window
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedPair {
    pub origin: String,
    pub destination: String,
    pub requests: u64,
    /// mean service time in milliseconds
    pub mean_service_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedTraffic {
    pub pairs: Vec<ObservedPair>,
}

impl ObservedTraffic {
    pub fn total(&self) -> u64 {
        self.pairs.iter().map(|p| p.requests).sum()
    }

    /// requests served by `region`, whatever their origin
    pub fn served_by(&self, region: &str) -> u64 {
        self.pairs
            .iter()
            .filter(|p| p.destination == region)
            .map(|p| p.requests)
            .sum()
    }
}

/// Supplies the traffic realized during an hour, if anything was measured
pub trait MetricsSource {
    fn observe(&mut self, hour: Hour) -> Result<Option<ObservedTraffic>>;
}

#[derive(Debug, Default)]
pub struct LogDeployer;

impl Deployer for LogDeployer {
    fn apply_servers(&mut self, servers: &BTreeMap<String, u32>) -> Result<()> {
        for (region, count) in servers {
            info!(%region, count, "deploy servers");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogLoadBalancer;

impl LoadBalancer for LogLoadBalancer {
    fn apply_weights(&mut self, host_region: &str, weights: &BTreeMap<String, u32>) -> Result<()> {
        info!(host = host_region, ?weights, "update load balancer");
        Ok(())
    }
}

/// Nothing is ever measured offline
#[derive(Debug, Default)]
pub struct NoMetrics;

impl MetricsSource for NoMetrics {
    fn observe(&mut self, _hour: Hour) -> Result<Option<ObservedTraffic>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(origin: &str, destination: &str, requests: u64) -> ObservedPair {
        ObservedPair {
            origin: origin.into(),
            destination: destination.into(),
            requests,
            mean_service_time: 12.0,
        }
    }

    #[test]
    fn traffic_sums() {
        let traffic = ObservedTraffic {
            pairs: vec![pair("a", "a", 10), pair("b", "a", 5), pair("b", "b", 3)],
        };
        assert_eq!(traffic.total(), 18);
        assert_eq!(traffic.served_by("a"), 15);
        assert_eq!(traffic.served_by("c"), 0);
    }

    #[test]
    fn offline_collaborators_accept_everything() {
        let mut servers = BTreeMap::new();
        servers.insert("a".to_owned(), 3);
        assert!(LogDeployer.apply_servers(&servers).is_ok());
        assert!(LogLoadBalancer.apply_weights("a", &servers).is_ok());
        assert_eq!(NoMetrics.observe(Hour(0)).unwrap(), None);
    }
}
