//! Loads a region dataset from CSV files.
//!
//! A dataset directory holds four tables:
//! - carbon intensities: a `timestamp` column (UTC epoch seconds) plus one column per region
//! - requests: same layout as carbon intensities
//! - latency: one column per region, rows in region order, empty cells are unknown
//! - offset: one column per region, a single row of UTC hour offsets. Its header fixes the region order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::region::{Region, RegionModel};
use crate::types::{Hour, SimulationHorizon};
use crate::utils::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// directory containing one sub directory per dataset
    pub dir: PathBuf,
    pub name: String,
    pub carbon_intensity_file: String,
    pub request_file: String,
    pub latency_file: String,
    pub offset_file: String,
}

impl DatasetConfig {
    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(&self.name).join(file)
    }
}

/// A table keyed by timestamp, with one value column per region
#[derive(Debug, Clone, PartialEq)]
pub struct TimeTable {
    file: String,
    timestamps: Vec<i64>,
    /// rows of values in region order
    rows: Vec<Vec<f64>>,
}

impl TimeTable {
    pub fn read(path: &Path, regions: &[String]) -> Result<Self> {
        let file = path.display().to_string();
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| Error::MalformedData {
                    file: file.clone(),
                    reason: format!("missing column `{}`", name),
                })
        };
        let ts_col = column("timestamp")?;
        let region_cols = regions.iter().map(|r| column(r.as_str())).collect::<Result<Vec<_>>>()?;

        let mut timestamps = vec![];
        let mut rows = vec![];
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let ts = record
                .get(ts_col)
                .and_then(|v| parse_timestamp(v.trim()))
                .ok_or_else(|| Error::MalformedData {
                    file: file.clone(),
                    reason: format!("bad timestamp on data row {}", line),
                })?;
            let row = region_cols
                .iter()
                .map(|&c| parse_cell(record.get(c).unwrap_or("")))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Error::MalformedData {
                    file: file.clone(),
                    reason: format!("non numeric value on data row {}", line),
                })?;
            timestamps.push(ts);
            rows.push(row);
        }

        Ok(Self { file, timestamps, rows })
    }

    /// Rows `[start, start + len)` where `start` is the row stamped with `timestamp`
    pub fn window(&self, timestamp: i64, date: &str, len: usize) -> Result<Vec<Vec<f64>>> {
        let start = self
            .timestamps
            .iter()
            .position(|&ts| ts == timestamp)
            .ok_or_else(|| Error::DateNotFound {
                date: date.to_owned(),
                file: self.file.clone(),
            })?;
        let end = start + len;
        if end > self.rows.len() {
            return Err(Error::WindowOverflow {
                file: self.file.clone(),
                end,
                available: self.rows.len(),
            });
        }
        debug!(file = %self.file, start, end, "slicing window");
        Ok(self.rows[start..end].to_vec())
    }

    /// Values of one region, in time order
    fn column(rows: &[Vec<f64>], idx: usize) -> Vec<f64> {
        rows.iter().map(|row| row[idx]).collect()
    }
}

/// Timestamps are integers, but tolerate a float rendering like `1660348800.0`
fn parse_timestamp(v: &str) -> Option<i64> {
    v.parse::<i64>()
        .ok()
        .or_else(|| v.parse::<f64>().ok().map(|f| f as i64))
}

/// Empty or `nan` cells are unknown values
fn parse_cell(v: &str) -> Option<f64> {
    let v = v.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("nan") {
        Some(f64::NAN)
    } else {
        v.parse().ok()
    }
}

/// Blank or `nan` cells are only tolerated in the latency matrix.
/// Inside a time table window every value must be known.
fn require_complete(rows: &[Vec<f64>], regions: &[String]) -> Result<()> {
    for (h, row) in rows.iter().enumerate() {
        if let Some(idx) = row.iter().position(|v| !v.is_finite()) {
            return Err(Error::MissingData {
                region: regions[idx].clone(),
                hour: Hour(h),
            });
        }
    }
    Ok(())
}

/// Region names and their UTC offsets, from the header and single row of the offset table
fn read_offsets(path: &Path) -> Result<Vec<(String, f64)>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let record = reader.records().next().transpose()?.ok_or_else(|| Error::MalformedData {
        file: path.display().to_string(),
        reason: "no offset row".into(),
    })?;
    headers
        .iter()
        .zip(record.iter())
        .map(|(name, offset)| {
            let offset = parse_cell(offset).ok_or_else(|| Error::MalformedData {
                file: path.display().to_string(),
                reason: format!("bad offset for {}", name),
            })?;
            Ok((name.trim().to_owned(), offset))
        })
        .collect()
}

/// Latency matrix, rows and columns in the given region order
fn read_latency(path: &Path, regions: &[String]) -> Result<Vec<Vec<f64>>> {
    let file = path.display().to_string();
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let cols = regions
        .iter()
        .map(|r| {
            headers
                .iter()
                .position(|h| h.trim() == r.as_str())
                .ok_or_else(|| Error::MalformedData {
                    file: file.clone(),
                    reason: format!("missing column `{}`", r),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let matrix = reader
        .records()
        .take(regions.len())
        .map(|record| {
            let record = record?;
            Ok(cols
                .iter()
                .map(|&c| parse_cell(record.get(c).unwrap_or("")).unwrap_or(f64::NAN))
                .collect())
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;
    if matrix.len() != regions.len() {
        return Err(Error::MalformedData {
            file,
            reason: format!("{} latency rows for {} regions", matrix.len(), regions.len()),
        });
    }
    Ok(matrix)
}

/// Load every table, validate the window against `horizon`, and build the region model
pub fn load(cfg: &DatasetConfig, horizon: &SimulationHorizon, server_capacity: f64) -> Result<RegionModel> {
    let _g = info_span!("load", dataset = %cfg.name).entered();

    let offsets = read_offsets(&cfg.path(&cfg.offset_file))?;
    let names: Vec<String> = offsets.iter().map(|(n, _)| n.clone()).collect();
    info!(regions = ?names, "found regions");

    let date = horizon.start.format("%Y-%m-%d").to_string();
    let ts = horizon.start_timestamp()?;
    let len = horizon.window_len();

    let carbon = TimeTable::read(&cfg.path(&cfg.carbon_intensity_file), &names)?.window(ts, &date, len)?;
    require_complete(&carbon, &names)?;
    let demand = TimeTable::read(&cfg.path(&cfg.request_file), &names)?.window(ts, &date, len)?;
    require_complete(&demand, &names)?;
    let latency = read_latency(&cfg.path(&cfg.latency_file), &names)?;

    // the latency matrix is read by row, region i's vector is its row
    let regions = offsets
        .into_iter()
        .zip(latency)
        .enumerate()
        .map(|(idx, ((name, offset), lat))| {
            Region::new(name, TimeTable::column(&carbon, idx), lat, server_capacity).with_utc_offset(offset)
        })
        .collect();

    let model = RegionModel::new(regions, demand)?;
    for region in model.regions() {
        debug!(
            region = region.name(),
            avg_carbon = region.average_carbon_intensity(),
            utc_offset = region.utc_offset(),
            "loaded region"
        );
    }
    Ok(model)
}
