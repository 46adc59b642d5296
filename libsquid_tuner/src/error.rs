//! Error types for each component of the tuning system.
//!
//! Errors here mean the hardware could not be talked to or the data could not
//! be handled. Failing to converge within the retry budget is *not* an error;
//! that is a reported outcome (see [`crate::tuner::TuneOutcome`]).

use std::path::PathBuf;

use thiserror::Error;

use super::squid_array::BiasParam;
use super::status::BatchStatus;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config is invalid: {0}")]
    InvalidField(String),
}

/// Errors raised by a data acquisition backend.
#[derive(Debug, Error)]
pub enum DaqError {
    #[error("DAQ did not respond while sampling channel {0}")]
    Unresponsive(String),
    #[error("DAQ task referenced unknown channel {0}")]
    UnknownChannel(String),
    #[error("Output level of {0} V exceeds the DAQ output range of {1} V")]
    OutputOutOfRange(f64, f64),
    #[error("DAQ returned an empty buffer for channel {0}")]
    EmptyBuffer(String),
    #[error("DAQ communication failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Errors raised by the array controller electronics.
#[derive(Debug, Error)]
pub enum ArrayError {
    #[error("Array controller did not respond")]
    Unresponsive,
    #[error("Array controller rejected {param}: {value} is outside [0, {limit}]")]
    ValueOutOfRange {
        param: BiasParam,
        value: f64,
        limit: f64,
    },
    #[error("Array controller communication failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Errors raised by the preamplifier.
#[derive(Debug, Error)]
pub enum PreampError {
    #[error("Preamp did not respond")]
    Unresponsive,
    #[error("Preamp cannot realize gain {0}")]
    InvalidGain(u32),
    #[error("Preamp cannot realize filter corners ({0} Hz, {1} Hz)")]
    InvalidFilter(f64, f64),
}

/// Errors raised while tuning. These abort the procedure; a tuning stage that
/// merely fails to converge reports that through its outcome instead.
#[derive(Debug, Error)]
pub enum TuneError {
    #[error("Tuning failed due to DAQ error: {0}")]
    DaqError(#[from] DaqError),
    #[error("Tuning failed due to array controller error: {0}")]
    ArrayError(#[from] ArrayError),
    #[error("Conversion search step must be positive, got {0}")]
    BadSearchStep(f64),
}

/// Errors raised by the dependent measurement stages.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("Measurement failed due to DAQ error: {0}")]
    DaqError(#[from] DaqError),
    #[error("Measurement failed due to array controller error: {0}")]
    ArrayError(#[from] ArrayError),
    #[error("Measurement failed due to preamp error: {0}")]
    PreampError(#[from] PreampError),
    #[error("Sweep fit needs at least two points, got {0}")]
    TooFewPoints(usize),
    #[error("Sweep stimulus has no spread, cannot fit a line")]
    FlatStimulus,
}

/// Errors raised while persisting tune reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Cannot write reports as output directory {0:?} does not exist")]
    BadOutputDir(PathBuf),
    #[error("Report writing failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Report failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

/// Errors raised by the two stage tune and lock procedure.
#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error("Procedure failed due to tuning error: {0}")]
    TuneError(#[from] TuneError),
    #[error("Procedure failed due to measurement error: {0}")]
    MeasureError(#[from] MeasureError),
    #[error("Procedure failed due to array controller error: {0}")]
    ArrayError(#[from] ArrayError),
    #[error("Procedure failed to format timestamp: {0}")]
    TimeError(#[from] time::error::Format),
}

/// Errors raised by a batch sweep, composing the errors of everything below.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch failed due to procedure error: {0}")]
    ProcedureError(#[from] ProcedureError),
    #[error("Batch failed due to report error: {0}")]
    ReportError(#[from] ReportError),
    #[error("Batch failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Batch failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<BatchStatus>),
}
