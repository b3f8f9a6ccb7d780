use std::fmt;

use chrono::NaiveDate;
use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::region::Region;
use crate::utils::prelude::*;

/// Index of an hour, relative to the start of the simulation horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[display("hour {0}")]
pub struct Hour(pub usize);

impl Hour {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Extra hours of data loaded past the end of the horizon
pub const LOOKAHEAD_HOURS: usize = 24;

/// The ordered hours to process, anchored at midnight UTC of the start date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationHorizon {
    pub start: NaiveDate,
    pub hours: usize,
}

impl SimulationHorizon {
    pub fn new(start: NaiveDate, hours: usize) -> Self {
        Self { start, hours }
    }

    /// Parse a `YYYY-MM-DD` start date
    pub fn parse(start: &str, hours: usize) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").map_err(|_| Error::InvalidDate(start.to_owned()))?;
        Ok(Self::new(start, hours))
    }

    /// Epoch seconds of the first hour
    pub fn start_timestamp(&self) -> Result<i64> {
        let midnight = self
            .start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::InvalidDate(self.start.to_string()))?;
        Ok(midnight.and_utc().timestamp())
    }

    /// Number of rows every time series must provide from the start row on
    pub fn window_len(&self) -> usize {
        self.hours + LOOKAHEAD_HOURS
    }

    pub fn iter(&self) -> impl Iterator<Item = Hour> {
        (0..self.hours).map(Hour)
    }
}

/// Requests originating at one region during one hour
#[derive(Debug, Clone, Copy)]
pub struct RequestBatch<'a> {
    pub volume: f64,
    pub region: &'a Region,
}

impl<'a> RequestBatch<'a> {
    pub fn new(region: &'a Region, volume: f64) -> Self {
        Self { volume, region }
    }

    pub fn origin(&self) -> &'a str {
        self.region.name()
    }

    /// Volume as a whole number of requests, what the optimizer routes
    pub fn requests(&self) -> u64 {
        self.volume.max(0.0).round() as u64
    }
}

impl fmt::Display for RequestBatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestBatch({}, {:.0})", self.origin(), self.volume)
    }
}

/// Everything the optimizer sees for one hour.
/// Rows of `latencies` are origins, columns destinations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleInputs {
    pub carbon_intensities: Vec<f64>,
    pub latencies: Vec<Vec<f64>>,
    pub capacities: Vec<f64>,
    pub demand: Vec<u64>,
}

impl ScheduleInputs {
    pub fn n_regions(&self) -> usize {
        self.demand.len()
    }

    pub fn total_demand(&self) -> u64 {
        self.demand.iter().sum()
    }
}

/// Placement and routing for one hour
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleDecision {
    /// servers to run per region
    pub servers: Vec<u32>,
    /// `route[i][j]`: requests originating at i served by j
    pub route: Vec<Vec<u64>>,
    pub carbon_intensities: Vec<f64>,
    pub latencies: Vec<Vec<f64>>,
    pub objective: f64,
}

impl ScheduleDecision {
    pub fn n_regions(&self) -> usize {
        self.servers.len()
    }

    /// requests served by region `j`
    pub fn served_by(&self, j: usize) -> u64 {
        self.route.iter().map(|row| row[j]).sum()
    }

    /// requests originating at region `i`
    pub fn routed_from(&self, i: usize) -> u64 {
        self.route[i].iter().sum()
    }

    pub fn total_routed(&self) -> u64 {
        self.route.iter().flatten().sum()
    }

    /// A region that receives no traffic must not be provisioned
    pub fn clear_idle_regions(&mut self) {
        for j in 0..self.n_regions() {
            if self.served_by(j) == 0 && self.servers[j] != 0 {
                debug!(region = j, servers = self.servers[j], "no routed demand, dropping servers");
                self.servers[j] = 0;
            }
        }
    }
}
