//! Request volume per region and hour, replayed from the trace or synthesized.

use std::str::FromStr;

use parse_display::Display;
use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Exp, Normal};

use crate::region::RegionModel;
use crate::types::Hour;
use crate::utils::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkloadMode {
    /// historical demand as is
    Trace,
    /// historical total volume, reshaped by a random distribution
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub mode: WorkloadMode,
    /// validated at startup, see `DemandDistribution`
    pub distribution: String,
}

/// Shape of the per-hour multiplicative factors of a synthetic workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "UPPERCASE")]
pub enum DemandDistribution {
    /// exponential with scale 0.5
    Exponential,
    /// normal(1.0, 0.12) for the first half, normal(1.1, 0.06) for the second
    Bimodal,
    /// normal(0.9, 0.07), normal(1.0, 0.07), normal(1.1, 0.07) by thirds
    Trimodal,
}

impl FromStr for DemandDistribution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EXPONENTIAL" => Ok(Self::Exponential),
            "BIMODAL" => Ok(Self::Bimodal),
            "TRIMODAL" => Ok(Self::Trimodal),
            other => Err(Error::InvalidDistribution(other.to_owned())),
        }
    }
}

impl DemandDistribution {
    /// Draw `len` raw factors
    pub fn draw(&self, len: usize, rng: &mut impl Rng) -> Result<Vec<f64>> {
        let factors = match self {
            Self::Exponential => {
                // statrs parameterizes by rate, the scale is 1 / rate
                let exp = Exp::new(1.0 / 0.5)?;
                (0..len).map(|_| exp.sample(rng)).collect()
            }
            Self::Bimodal => {
                let first = len / 2;
                let mut out = draw_normal(1.0, 0.12, first, rng)?;
                out.extend(draw_normal(1.1, 0.06, len - first, rng)?);
                out
            }
            Self::Trimodal => {
                let third = len / 3;
                let mut out = draw_normal(0.9, 0.07, third, rng)?;
                out.extend(draw_normal(1.0, 0.07, len - 2 * third, rng)?);
                out.extend(draw_normal(1.1, 0.07, third, rng)?);
                out
            }
        };
        Ok(factors)
    }
}

fn draw_normal(mean: f64, std_dev: f64, n: usize, rng: &mut impl Rng) -> Result<Vec<f64>> {
    let normal = Normal::new(mean, std_dev)?;
    Ok((0..n).map(|_| normal.sample(rng)).collect())
}

/// Spread `total` over the hours in proportion to `factors`, each hour rounded to a whole request
pub fn spread_volume(total: f64, factors: &[f64]) -> Vec<f64> {
    let clamped: Vec<f64> = factors.iter().map(|f| f.max(0.0)).collect();
    let sum: f64 = clamped.iter().sum();
    if approx::abs_diff_eq!(sum, 0.0) {
        let even = total / factors.len().max(1) as f64;
        return vec![even.round(); factors.len()];
    }
    clamped.iter().map(|f| (f / sum * total).round()).collect()
}

/// Synthetic volumes for every region over `hours + 1` hours.
/// Each region keeps its historical total over the same hours.
#[derive(Debug, Clone)]
pub struct SyntheticWorkload {
    distribution: DemandDistribution,
    /// `volumes[region][hour]`
    volumes: Vec<Vec<f64>>,
    totals: Vec<f64>,
}

impl SyntheticWorkload {
    pub fn generate(model: &RegionModel, hours: usize, distribution: DemandDistribution, rng: &mut impl Rng) -> Result<Self> {
        let len = hours + 1;
        let mut volumes = Vec::with_capacity(model.len());
        let mut totals = Vec::with_capacity(model.len());
        for region in model.regions() {
            let total = (0..len)
                .map(|h| model.demand_for_hour(region.index(), Hour(h)))
                .sum::<Result<f64>>()?;
            let factors = distribution.draw(len, rng)?;
            let spread = spread_volume(total, &factors);
            debug!(region = region.name(), total, %distribution, "synthesized workload");
            volumes.push(spread);
            totals.push(total);
        }
        Ok(Self {
            distribution,
            volumes,
            totals,
        })
    }

    pub fn distribution(&self) -> DemandDistribution {
        self.distribution
    }

    /// historical volume the synthetic sequence of `region` preserves
    pub fn historical_total(&self, region: usize) -> f64 {
        self.totals[region]
    }

    pub fn volumes(&self, region: usize) -> &[f64] {
        &self.volumes[region]
    }

    pub fn volume(&self, region: usize, hour: Hour) -> Option<f64> {
        self.volumes.get(region)?.get(hour.index()).copied()
    }
}

/// Where the hourly batch volumes come from
#[derive(Debug, Clone)]
pub enum Workload {
    Trace {
        /// fixed request rate replacing every trace value
        rate_override: Option<f64>,
    },
    Synthetic(SyntheticWorkload),
}

impl Workload {
    /// Build from configuration. Fails early on an unknown distribution name.
    pub fn from_config(
        cfg: &WorkloadConfig,
        model: &RegionModel,
        hours: usize,
        rate_override: Option<f64>,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let distribution: DemandDistribution = cfg.distribution.parse()?;
        info!(mode = %cfg.mode, %distribution, "using workload");
        Ok(match cfg.mode {
            WorkloadMode::Trace => Self::Trace { rate_override },
            WorkloadMode::Synthetic => Self::Synthetic(SyntheticWorkload::generate(model, hours, distribution, rng)?),
        })
    }

    /// Volume originating at `region` during `hour`
    pub fn volume(&self, model: &RegionModel, region: usize, hour: Hour) -> Result<f64> {
        match self {
            Self::Trace {
                rate_override: Some(rate),
            } if *rate > 0.0 => Ok(*rate),
            Self::Trace { .. } => model.demand_for_hour(region, hour),
            Self::Synthetic(synthetic) => synthetic.volume(region, hour).ok_or_else(|| Error::MissingData {
                region: model
                    .regions()
                    .get(region)
                    .map(|r| r.name().to_owned())
                    .unwrap_or_default(),
                hour,
            }),
        }
    }
}
