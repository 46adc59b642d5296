//! Measurements run on a locked SQUID.
//!
//! Two figures of merit decide whether a working point is any good: the RMS
//! noise of the locked output and the linearity of its response to a field
//! coil sweep. Both expect the device to already be locked; they reconfigure
//! the sensitivity range and the preamp for their own needs and re-arm the
//! electronics before sampling.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::config::MeasureSettings;
use super::daq::{Daq, OutputSignal};
use super::error::{DaqError, MeasureError};
use super::preamp::Preamp;
use super::squid_array::{SensitivityMode, SquidArray};
use super::trace;

/// Noise figures of the locked output, referred to flux quanta through the
/// configured conversion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoiseReport {
    /// Standing offset of the locked output.
    pub mean_phi0: f64,
    /// Fluctuation about the mean.
    pub std_phi0: f64,
    /// RMS about zero, offset included.
    pub rms_phi0: f64,
    pub peak_to_peak_phi0: f64,
    pub preamp_overloaded: bool,
}

/// Least squares line through a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepFit {
    /// Volts of response per ampere of coil current.
    pub slope: f64,
    pub intercept: f64,
    /// Mean squared deviation from the fit; smaller is more linear.
    pub residual_variance: f64,
}

/// Field coil response of a locked SQUID with its linear fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutualSweep {
    /// Coil current at each point, amperes.
    pub current: Vec<f64>,
    /// Output response at each point, volts.
    pub response: Vec<f64>,
    pub fit: SweepFit,
}

/// Record the locked output for the configured window and reduce it to noise
/// figures. Warns if the preamp saturates during the window.
pub fn measure_noise<D: Daq, A: SquidArray, P: Preamp>(
    daq: &mut D,
    array: &mut A,
    preamp: &mut P,
    settings: &MeasureSettings,
) -> Result<NoiseReport, MeasureError> {
    array.set_sensitivity(SensitivityMode::High)?;
    preamp.set_gain(1)?;
    preamp.set_filter(1.0, 100000.0)?;
    array.reset()?;

    let overloaded = preamp.is_overloaded()?;
    if overloaded {
        log::warn!("Preamp reports overload during the noise measurement");
    }

    let saa = settings.channels.saa_input.as_str();
    let acq = daq.monitor(&[saa], settings.noise_window, settings.monitor_rate)?;
    let samples = acq.require(saa)?;
    let stats = trace::stats(samples).ok_or_else(|| DaqError::EmptyBuffer(saa.to_string()))?;
    let peak_to_peak =
        trace::peak_to_peak(samples).ok_or_else(|| DaqError::EmptyBuffer(saa.to_string()))?;

    Ok(NoiseReport {
        mean_phi0: stats.mean * settings.conversion,
        std_phi0: stats.std * settings.conversion,
        rms_phi0: (stats.mean.powi(2) + stats.std.powi(2)).sqrt() * settings.conversion,
        peak_to_peak_phi0: peak_to_peak * settings.conversion,
        preamp_overloaded: overloaded,
    })
}

/// Ramp the field coil through the bias resistor and fit the locked response
/// against the coil current.
pub fn measure_mutual_inductance<D: Daq, A: SquidArray, P: Preamp>(
    daq: &mut D,
    array: &mut A,
    preamp: &mut P,
    settings: &MeasureSettings,
) -> Result<MutualSweep, MeasureError> {
    array.set_sensitivity(SensitivityMode::Medium)?;
    preamp.set_gain(1)?;
    preamp.set_filter(1.0, 300.0)?;
    array.reset()?;

    let ramp = OutputSignal::ramp(
        &settings.channels.coil_output,
        -settings.sweep_amplitude,
        settings.sweep_amplitude,
        settings.sweep_points,
    );
    let saa = settings.channels.saa_input.as_str();
    let acq = daq.acquire(&ramp, &[saa], settings.sample_rate)?;
    let response = acq.require(saa)?.to_vec();
    let current: Vec<f64> = ramp
        .samples
        .iter()
        .map(|v| v / settings.bias_resistance)
        .collect();
    // Park the coil again once the sweep is down
    daq.write_static(&settings.channels.coil_output, 0.0)?;

    let fit = fit_line(&current, &response)?;
    log::info!(
        "Coil sweep: {:.4e} V/A with residual variance {:.4e}",
        fit.slope,
        fit.residual_variance
    );
    Ok(MutualSweep {
        current,
        response,
        fit,
    })
}

/// Ordinary least squares fit of y against x.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<SweepFit, MeasureError> {
    if x.len() != y.len() || x.len() < 2 {
        return Err(MeasureError::TooFewPoints(x.len().min(y.len())));
    }
    let x = Array1::from_vec(x.to_vec());
    let y = Array1::from_vec(y.to_vec());
    let n = x.len() as f64;
    let sx = x.sum();
    let sy = y.sum();
    let sxx = x.dot(&x);
    let sxy = x.dot(&y);
    let denom = n * sxx - sx * sx;
    if denom.abs() < f64::EPSILON {
        return Err(MeasureError::FlatStimulus);
    }
    let slope = (n * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / n;
    let predictions = x.mapv(|v| slope * v + intercept);
    let residual_variance = (&y - &predictions).mapv(|r| r * r).sum() / n;
    Ok(SweepFit {
        slope,
        intercept,
        residual_variance,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::{Config, DaqChannels};
    use crate::sim::{PreampOp, SimArray, SimDaq, SimPreamp, SimRig, SimSettings};
    use crate::squid_array::{BiasParam, FeedbackLoop};

    fn locked_rig() -> (SimDaq, SimArray, Arc<Mutex<SimRig>>) {
        let rig = Arc::new(Mutex::new(SimRig::new(
            DaqChannels::default(),
            SimSettings::default(),
        )));
        let mut array = SimArray::new(rig.clone());
        array.lock(FeedbackLoop::Squid).unwrap();
        array.set(BiasParam::SquidFlux, 80.0).unwrap();
        (SimDaq::new(rig.clone()), array, rig)
    }

    #[test]
    fn test_fit_line_exact() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let fit = fit_line(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1.0e-12);
        assert!((fit.intercept - 1.0).abs() < 1.0e-12);
        assert!(fit.residual_variance < 1.0e-12);
    }

    #[test]
    fn test_fit_line_rejects_degenerate_input() {
        assert!(matches!(
            fit_line(&[1.0], &[2.0]),
            Err(MeasureError::TooFewPoints(1))
        ));
        assert!(matches!(
            fit_line(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]),
            Err(MeasureError::FlatStimulus)
        ));
    }

    #[test]
    fn test_measure_noise_on_quiet_rig() {
        let (mut daq, mut array, rig) = locked_rig();
        let mut preamp = SimPreamp::new();
        let settings = Config::default().measure_settings();

        let noise = measure_noise(&mut daq, &mut array, &mut preamp, &settings).unwrap();
        // squid stage: 0.05 * (80 - 70) = 0.5 V, noiseless, reported in
        // flux quanta through the conversion
        assert!((noise.mean_phi0 - 0.5 * settings.conversion).abs() < 1.0e-12);
        assert_eq!(noise.std_phi0, 0.0);
        assert!((noise.rms_phi0 - 0.5 * settings.conversion).abs() < 1.0e-12);
        assert_eq!(noise.peak_to_peak_phi0, 0.0);
        assert!(!noise.preamp_overloaded);
        assert_eq!(
            preamp.ops,
            vec![
                PreampOp::Gain(1),
                PreampOp::Filter(1.0, 100000.0),
                PreampOp::OverloadCheck,
            ]
        );
        assert_eq!(
            rig.lock().unwrap().sensitivity(),
            crate::squid_array::SensitivityMode::High
        );
    }

    #[test]
    fn test_measure_mutual_inductance_fits_coupling() {
        let (mut daq, mut array, _) = locked_rig();
        let mut preamp = SimPreamp::new();
        let settings = Config::default().measure_settings();

        let sweep =
            measure_mutual_inductance(&mut daq, &mut array, &mut preamp, &settings).unwrap();
        assert_eq!(sweep.current.len(), settings.sweep_points);
        // coupling of 0.3 V/V through a 340 ohm resistor
        assert!((sweep.fit.slope - 102.0).abs() < 1.0e-6);
        assert!(sweep.fit.residual_variance < 1.0e-12);
    }
}
