//! Data acquisition interface.
//!
//! The tuning layers talk to whatever digitizer drives the experiment through
//! the [`Daq`] trait. Acquisitions are blocking; a call returns once the
//! requested buffers are full. Channel names follow the device naming of the
//! backend (`ai0`, `ao1`, ...) and are mapped to their roles by
//! [`crate::config::DaqChannels`].

use fxhash::FxHashMap;
use ndarray::Array1;

use super::error::DaqError;

/// A waveform to play on one output channel while inputs are recorded.
#[derive(Debug, Clone)]
pub struct OutputSignal {
    pub channel: String,
    pub samples: Vec<f64>,
}

impl OutputSignal {
    /// Hold `level` volts on `channel` for `n` samples.
    pub fn constant(channel: &str, level: f64, n: usize) -> Self {
        Self {
            channel: channel.to_string(),
            samples: vec![level; n],
        }
    }

    /// Linear ramp from `start` to `stop` volts over `n` samples.
    pub fn ramp(channel: &str, start: f64, stop: f64, n: usize) -> Self {
        Self {
            channel: channel.to_string(),
            samples: Array1::linspace(start, stop, n).to_vec(),
        }
    }
}

/// One finished acquisition: a sample buffer per requested input channel,
/// all of equal length, recorded at `sample_rate`.
#[derive(Debug, Clone, Default)]
pub struct Acquisition {
    channels: FxHashMap<String, Vec<f64>>,
    pub sample_rate: f64,
}

impl Acquisition {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            channels: FxHashMap::default(),
            sample_rate,
        }
    }

    pub fn insert(&mut self, channel: &str, samples: Vec<f64>) {
        self.channels.insert(channel.to_string(), samples);
    }

    pub fn channel(&self, channel: &str) -> Option<&[f64]> {
        self.channels.get(channel).map(|samples| samples.as_slice())
    }

    /// Samples for `channel`, or the error the tuning layers report when a
    /// backend failed to record a channel it was asked for.
    pub fn require(&self, channel: &str) -> Result<&[f64], DaqError> {
        self.channel(channel)
            .ok_or_else(|| DaqError::UnknownChannel(channel.to_string()))
    }
}

/// A digitizer with synchronized analog output.
pub trait Daq {
    /// Play `output` while recording `inputs` at `sample_rate`, blocking
    /// until every buffer is full.
    fn acquire(
        &mut self,
        output: &OutputSignal,
        inputs: &[&str],
        sample_rate: f64,
    ) -> Result<Acquisition, DaqError>;

    /// Record `inputs` for `duration` seconds at `sample_rate` with the
    /// outputs held at their parked levels.
    fn monitor(
        &mut self,
        inputs: &[&str],
        duration: f64,
        sample_rate: f64,
    ) -> Result<Acquisition, DaqError>;

    /// Park one output channel at a DC level.
    fn write_static(&mut self, channel: &str, level: f64) -> Result<(), DaqError>;
}
