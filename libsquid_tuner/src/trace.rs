//! Small signal statistics used throughout the tuning procedure.

use serde::{Deserialize, Serialize};

/// Mean and population standard deviation of a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalStats {
    pub mean: f64,
    pub std: f64,
}

/// A recorded SQUID characteristic: the test stimulus and the response of the
/// amplifier output, sample for sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacteristicTrace {
    pub stimulus: Vec<f64>,
    pub response: Vec<f64>,
}

impl CharacteristicTrace {
    pub fn new(stimulus: Vec<f64>, response: Vec<f64>) -> Self {
        Self { stimulus, response }
    }

    pub fn len(&self) -> usize {
        self.response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    /// Vertical midpoint of the response. This is the level the centering
    /// stage nulls against its target offset.
    pub fn midpoint(&self) -> Option<f64> {
        midpoint(&self.response)
    }

    pub fn peak_to_peak(&self) -> Option<f64> {
        peak_to_peak(&self.response)
    }
}

/// Spread between the extreme values of `samples`. None when empty.
pub fn peak_to_peak(samples: &[f64]) -> Option<f64> {
    let (min, max) = extrema(samples)?;
    Some(max - min)
}

/// Halfway between the extreme values of `samples`. None when empty.
pub fn midpoint(samples: &[f64]) -> Option<f64> {
    let (min, max) = extrema(samples)?;
    Some((max + min) / 2.0)
}

/// Mean and population standard deviation. None when empty.
pub fn stats(samples: &[f64]) -> Option<SignalStats> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
    Some(SignalStats {
        mean,
        std: var.sqrt(),
    })
}

fn extrema(samples: &[f64]) -> Option<(f64, f64)> {
    let first = *samples.first()?;
    let mut min = first;
    let mut max = first;
    for &s in samples {
        min = min.min(s);
        max = max.max(s);
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midpoint() {
        let samples = [0.0, 3.0, -1.0, 2.0];
        assert_eq!(midpoint(&samples), Some(1.0));
        assert_eq!(midpoint(&[]), None);
    }

    #[test]
    fn test_midpoint_ignores_distribution() {
        // Only the extremes matter, not how samples cluster between them.
        let samples = [2.0, 2.0, 2.0, 2.0, 0.0, 4.0];
        assert_eq!(midpoint(&samples), Some(2.0));
    }

    #[test]
    fn test_stats() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        let stats = stats(&samples).unwrap();
        assert!((stats.mean - 2.5).abs() < 1.0e-12);
        assert!((stats.std - 1.25_f64.sqrt()).abs() < 1.0e-12);
    }

    #[test]
    fn test_trace_midpoint() {
        let trace = CharacteristicTrace::new(vec![0.0, 1.0, 2.0], vec![-1.0, 0.5, 2.0]);
        assert_eq!(trace.midpoint(), Some(0.5));
        assert_eq!(trace.peak_to_peak(), Some(3.0));
        assert_eq!(trace.len(), 3);
        assert!(CharacteristicTrace::default().midpoint().is_none());
    }
}
