use thiserror::Error;

use crate::types::{Hour, ScheduleInputs};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    InvalidConfig(#[from] config::ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Stats(#[from] statrs::StatsError),

    /// No row of the table carries the requested start timestamp
    #[error("date {date} does not exist in file {file}")]
    DateNotFound { date: String, file: String },
    /// The requested window (horizon plus lookahead) runs past the data
    #[error("the selected interval overflows in file {file}: needs row {end}, only {available} available")]
    WindowOverflow { file: String, end: usize, available: usize },
    #[error("invalid start date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("malformed data in {file}: {reason}")]
    MalformedData { file: String, reason: String },
    #[error("region {region} has no data for {hour}")]
    MissingData { region: String, hour: Hour },
    #[error("unknown region `{0}`")]
    UnknownRegion(String),

    #[error("invalid distribution `{0}`, expected one of EXPONENTIAL, BIMODAL, TRIMODAL")]
    InvalidDistribution(String),

    /// The optimizer could not place servers for this hour. Carries the whole input for diagnosis.
    #[error("could not place servers at {hour}: total demand {} against {} regions", .inputs.total_demand(), .inputs.n_regions())]
    InfeasibleSchedule { hour: Hour, inputs: Box<ScheduleInputs> },

    #[error(transparent)]
    Others(#[from] anyhow::Error),
}

/// A type alias that forces the usage of the custom error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<tracing_subscriber::reload::Error> for Error {
    fn from(err: tracing_subscriber::reload::Error) -> Self {
        Self::Others(anyhow::Error::from(err))
    }
}

impl From<tracing_subscriber::util::TryInitError> for Error {
    fn from(err: tracing_subscriber::util::TryInitError) -> Self {
        Self::Others(anyhow::Error::from(err))
    }
}
