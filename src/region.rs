//! Per-region time series, shared read-only by every hour of a run.

use std::fmt;

use itertools::Itertools;

use crate::types::Hour;
use crate::utils::prelude::*;

/// One geographic region
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    name: String,
    index: usize,
    /// one value per hour
    carbon_intensity: Vec<f64>,
    /// latency to every region by index, NaN when unknown
    latency: Vec<f64>,
    /// requests per hour one server sustains
    capacity: f64,
    /// hour offset to UTC
    utc_offset: f64,
    average_carbon_intensity: f64,
}

impl Region {
    pub fn new(name: impl Into<String>, carbon_intensity: Vec<f64>, latency: Vec<f64>, capacity: f64) -> Self {
        let average_carbon_intensity = if carbon_intensity.is_empty() {
            0.0
        } else {
            carbon_intensity.iter().sum::<f64>() / carbon_intensity.len() as f64
        };
        Self {
            name: name.into(),
            index: 0,
            carbon_intensity,
            latency,
            capacity,
            utc_offset: 0.0,
            average_carbon_intensity,
        }
    }

    pub fn with_utc_offset(mut self, offset: f64) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// position in the model, also the row/column in every matrix
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn utc_offset(&self) -> f64 {
        self.utc_offset
    }

    /// mean carbon intensity over the loaded window
    pub fn average_carbon_intensity(&self) -> f64 {
        self.average_carbon_intensity
    }

    fn carbon_at(&self, hour: Hour) -> Option<f64> {
        self.carbon_intensity.get(hour.index()).copied()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({})", self.name)
    }
}

/// All regions plus the shared demand table.
///
/// The demand table has one row per hour and one column per region: the requests
/// originating at that region. Every region reads the same table.
#[derive(Debug, Clone)]
pub struct RegionModel {
    regions: Vec<Region>,
    demand: Vec<Vec<f64>>,
}

impl RegionModel {
    pub fn new(mut regions: Vec<Region>, demand: Vec<Vec<f64>>) -> Result<Self> {
        let n = regions.len();
        if let Some(r) = regions.iter().find(|r| r.latency.len() != n) {
            return Err(Error::MalformedData {
                file: "latency".into(),
                reason: format!("{} has {} latency entries, expected {}", r.name, r.latency.len(), n),
            });
        }
        if let Some((h, row)) = demand.iter().find_position(|row| row.len() != n) {
            return Err(Error::MalformedData {
                file: "requests".into(),
                reason: format!("row {} has {} columns, expected {}", h, row.len(), n),
            });
        }
        if let Some(dup) = regions.iter().map(|r| &r.name).duplicates().next() {
            return Err(Error::MalformedData {
                file: "regions".into(),
                reason: format!("duplicate region {}", dup),
            });
        }

        for (idx, region) in regions.iter_mut().enumerate() {
            region.index = idx;
        }
        Ok(Self { regions, demand })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region_names(&self) -> Vec<&str> {
        self.regions.iter().map(Region::name).collect()
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.regions
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::UnknownRegion(name.to_owned()))
    }

    /// Hours for which every series has data
    pub fn hours_available(&self) -> usize {
        self.regions
            .iter()
            .map(|r| r.carbon_intensity.len())
            .chain(std::iter::once(self.demand.len()))
            .min()
            .unwrap_or(0)
    }

    fn demand_row(&self, region: usize, hour: Hour) -> Result<&[f64]> {
        self.demand
            .get(hour.index())
            .map(Vec::as_slice)
            .ok_or_else(|| self.missing(region, hour))
    }

    fn missing(&self, region: usize, hour: Hour) -> Error {
        Error::MissingData {
            region: self
                .regions
                .get(region)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| format!("#{}", region)),
            hour,
        }
    }

    /// Requests originating at `region` during `hour`
    pub fn demand_for_hour(&self, region: usize, hour: Hour) -> Result<f64> {
        self.demand_row(region, hour)?
            .get(region)
            .copied()
            .ok_or_else(|| self.missing(region, hour))
    }

    /// The whole demand row for `hour`, one entry per region
    pub fn demand_vector_for_hour(&self, region: usize, hour: Hour) -> Result<&[f64]> {
        if region >= self.len() {
            return Err(self.missing(region, hour));
        }
        self.demand_row(region, hour)
    }

    pub fn carbon_intensity(&self, region: usize, hour: Hour) -> Result<f64> {
        self.regions
            .get(region)
            .and_then(|r| r.carbon_at(hour))
            .ok_or_else(|| self.missing(region, hour))
    }

    /// Symmetric lookup, falls back to the reverse direction when one side is missing.
    /// NaN when neither direction is known.
    pub fn latency(&self, a: usize, b: usize) -> f64 {
        let lookup = |from: usize, to: usize| {
            self.regions
                .get(from)
                .and_then(|r| r.latency.get(to))
                .copied()
                .unwrap_or(f64::NAN)
        };
        let forward = lookup(a, b);
        if forward.is_nan() {
            lookup(b, a)
        } else {
            forward
        }
    }
}
