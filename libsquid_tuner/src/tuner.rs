//! The closed loop tuning engine.
//!
//! [`ArrayTuner`] drives one SQUID through the two tuning stages. Each stage
//! is a bounded retry loop: configure the electronics, measure where the
//! signal sits, compare against the target, and if the error is out of
//! tolerance spend one attempt on a correction. Corrections are scaled by a
//! freshly calibrated sensitivity and follow a saturate-and-jump policy when
//! they leave the usable bias range. Running out of attempts is an expected
//! outcome and is reported as a value; only hardware faults are errors.

use serde::{Deserialize, Serialize};

use super::config::TuneSettings;
use super::constants::{
    JUMP_SIGMA, SENSITIVITY_CEILING, SENSITIVITY_FLOOR, TEST_PULSE_LEVEL, TEST_PULSE_SAMPLES,
};
use super::daq::{Daq, OutputSignal};
use super::error::{DaqError, TuneError};
use super::squid_array::{BiasParam, FeedbackLoop, SensitivityMode, SquidArray, TestSignal};
use super::trace::{self, CharacteristicTrace, SignalStats};

/// The two feedback configurations a tuning stage runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuneStage {
    /// Array feedback with the test oscillator on; the measured level is the
    /// midpoint of the recorded characteristic.
    Center,
    /// Squid feedback with the test oscillator off; the measured level is the
    /// midpoint of a short monitoring window.
    Lock,
}

/// One stage of tuning, fully specified.
#[derive(Debug, Clone, Copy)]
pub struct TuneRequest {
    pub stage: TuneStage,
    /// The bias parameter corrections are applied to.
    pub param: BiasParam,
    /// Level the stage tries to reach, volts.
    pub target_offset: f64,
    /// Acceptable residual error, volts.
    pub tolerance: f64,
    /// Correction budget.
    pub max_attempts: u32,
}

/// Terminal state of one tuning stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TuneOutcome {
    /// The error landed within tolerance after `attempts_used` corrections.
    Converged { attempts_used: u32, error: f64 },
    /// The budget ran out; `error` is the final measured distance.
    Exhausted { error: f64 },
}

impl TuneOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, TuneOutcome::Converged { .. })
    }

    pub fn attempts_used(&self) -> Option<u32> {
        match self {
            TuneOutcome::Converged { attempts_used, .. } => Some(*attempts_used),
            TuneOutcome::Exhausted { .. } => None,
        }
    }

    pub fn error(&self) -> f64 {
        match self {
            TuneOutcome::Converged { error, .. } => *error,
            TuneOutcome::Exhausted { error } => *error,
        }
    }
}

/// A flux quantum jump found by [`ArrayTuner::find_conversion`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxJump {
    /// Bias value at which the jump appeared, device units.
    pub bias_value: f64,
    /// Flux quanta per volt inferred from the jump height.
    pub conversion: f64,
}

/// Saturate-and-jump correction policy. A correction that would drive the
/// bias negative means the working point saturated low: step up by
/// `jump_step` instead. One that would exceed `ceiling` means it saturated
/// high: wrap back to zero and approach again.
pub fn apply_correction(value: f64, delta: f64, jump_step: f64, ceiling: f64) -> f64 {
    let proposed = value + delta;
    if proposed < 0.0 {
        value + jump_step
    } else if proposed > ceiling {
        0.0
    } else {
        proposed
    }
}

/// Drives one SQUID of the array through the centering and lock stages.
#[derive(Debug)]
pub struct ArrayTuner<D: Daq, A: SquidArray> {
    daq: D,
    array: A,
    settings: TuneSettings,
    last_characteristic: Option<CharacteristicTrace>,
}

impl<D: Daq, A: SquidArray> ArrayTuner<D, A> {
    pub fn new(daq: D, array: A, settings: TuneSettings) -> Self {
        Self {
            daq,
            array,
            settings,
            last_characteristic: None,
        }
    }

    pub fn settings(&self) -> &TuneSettings {
        &self.settings
    }

    /// The characteristic recorded by the most recent centering measurement.
    pub fn last_characteristic(&self) -> Option<&CharacteristicTrace> {
        self.last_characteristic.as_ref()
    }

    pub fn parts_mut(&mut self) -> (&mut D, &mut A) {
        (&mut self.daq, &mut self.array)
    }

    pub fn into_parts(self) -> (D, A) {
        (self.daq, self.array)
    }

    /// Center the SQUID response by nulling the characteristic midpoint
    /// against the configured offset, adjusting the array flux bias.
    pub fn tune_squid(&mut self) -> Result<TuneOutcome, TuneError> {
        let request = TuneRequest {
            stage: TuneStage::Center,
            param: BiasParam::ArrayFlux,
            target_offset: self.settings.aflux_offset,
            tolerance: self.settings.aflux_tol,
            max_attempts: self.settings.max_attempts,
        };
        self.tune(&request)
    }

    /// Close the squid feedback loop and null the residual lock point offset,
    /// adjusting the squid flux bias.
    pub fn lock_squid(&mut self) -> Result<TuneOutcome, TuneError> {
        let request = TuneRequest {
            stage: TuneStage::Lock,
            param: BiasParam::SquidFlux,
            target_offset: self.settings.sflux_offset,
            tolerance: self.settings.squid_tol,
            max_attempts: self.settings.max_attempts,
        };
        self.tune(&request)
    }

    /// The bounded retry loop shared by both stages.
    pub fn tune(&mut self, request: &TuneRequest) -> Result<TuneOutcome, TuneError> {
        let mut attempts_left = request.max_attempts;
        loop {
            self.prepare_stage(request.stage)?;
            let level = self.measure_stage(request.stage)?;
            let error = level - request.target_offset;
            log::debug!(
                "{} error {error:+.4} V against tolerance {:.4} V, {attempts_left} attempts left",
                request.param,
                request.tolerance
            );
            if error.abs() <= request.tolerance {
                return Ok(TuneOutcome::Converged {
                    attempts_used: request.max_attempts - attempts_left,
                    error,
                });
            }
            if attempts_left == 0 {
                log::warn!(
                    "Could not bring {} within {:.4} V of target, final error {error:+.4} V",
                    request.param,
                    request.tolerance
                );
                return Ok(TuneOutcome::Exhausted { error });
            }
            self.adjust(request.param, error)?;
            attempts_left -= 1;
        }
    }

    /// Estimate the local sensitivity of the output to `param` by finite
    /// difference. The parameter is restored before returning; estimates
    /// outside the credible range are clamped with their sign preserved.
    pub fn calibrate(&mut self, param: BiasParam) -> Result<f64, TuneError> {
        let original = self.array.get(param)?;
        let step = self.settings.calibration_step;
        let window = self.settings.calibration_window;

        let baseline = self.mean_signal(window)?;
        self.array.set(param, original + step)?;
        let shifted = match self.mean_signal(window) {
            Ok(stats) => stats,
            Err(error) => {
                // Best effort restore before bailing out
                let _ = self.array.set(param, original);
                return Err(error);
            }
        };
        self.array.set(param, original)?;

        let raw = (shifted.mean - baseline.mean) / step;
        let clamped = raw.signum() * raw.abs().clamp(SENSITIVITY_FLOOR, SENSITIVITY_CEILING);
        if clamped != raw {
            log::warn!("Sensitivity of output to {param} out of range: {raw:.4e} V per unit, clamped to {clamped:.4e}");
        }
        Ok(clamped)
    }

    /// Turn a measured error into a bias correction and apply it, then re-arm
    /// the electronics.
    pub fn adjust(&mut self, param: BiasParam, error: f64) -> Result<(), TuneError> {
        let value = self.array.get(param)?;
        let sensitivity = self.calibrate(param)?;
        let delta = -error / sensitivity;
        let next = apply_correction(
            value,
            delta,
            self.settings.jump_step,
            self.settings.bias_ceiling,
        );
        log::debug!("Adjusting {param}: error {error:+.4} V, sensitivity {sensitivity:.4}, {value:.2} -> {next:.2}");
        self.array.set(param, next)?;
        self.array.reset()?;
        Ok(())
    }

    /// Sweep the test oscillator across the SQUID and record the response.
    pub fn characteristic(&mut self) -> Result<CharacteristicTrace, TuneError> {
        let pulse = OutputSignal::constant(
            &self.settings.channels.test_output,
            TEST_PULSE_LEVEL,
            TEST_PULSE_SAMPLES,
        );
        let inputs = [
            self.settings.channels.saa_input.as_str(),
            self.settings.channels.test_input.as_str(),
        ];
        let acq = self
            .daq
            .acquire(&pulse, &inputs, self.settings.sample_rate)?;
        let trace = CharacteristicTrace::new(
            acq.require(&self.settings.channels.test_input)?.to_vec(),
            acq.require(&self.settings.channels.saa_input)?.to_vec(),
        );
        // Park the marker line again once the buffer is down
        self.daq
            .write_static(&self.settings.channels.test_output, 0.0)?;
        Ok(trace)
    }

    /// Step `param` from zero to its full scale looking for a flux quantum
    /// slip across a reset. Expects a locked device. Returns the jump and the
    /// conversion it implies, or None when no slip shows up.
    pub fn find_conversion(
        &mut self,
        param: BiasParam,
        step_size: f64,
        window: f64,
    ) -> Result<Option<FluxJump>, TuneError> {
        // A non-positive step would never walk the loop below to the limit
        if step_size <= 0.0 {
            return Err(TuneError::BadSearchStep(step_size));
        }
        self.array.set_test_signal(TestSignal::Off)?;
        self.array.set(param, 0.0)?;
        self.array.reset()?;
        let limit = self.array.bias_limit(param)?;

        let mut bias = 0.0;
        while bias <= limit {
            self.array.set_sensitivity(SensitivityMode::Medium)?;
            self.array.set(param, bias)?;
            let before = self.mean_signal(window)?;
            self.array.reset()?;
            let after = self.mean_signal(window)?;
            let jump = (before.mean - after.mean).abs();
            if jump > JUMP_SIGMA * before.std.max(after.std) {
                log::info!("Flux quantum jump at {param} = {bias}: {jump:.4} V");
                return Ok(Some(FluxJump {
                    bias_value: bias,
                    conversion: 1.0 / jump,
                }));
            }
            bias += step_size;
        }
        log::warn!("No flux quantum jump found stepping {param} up to {limit}");
        Ok(None)
    }

    fn prepare_stage(&mut self, stage: TuneStage) -> Result<(), TuneError> {
        match stage {
            TuneStage::Center => self.enter_center_mode(),
            TuneStage::Lock => self.enter_lock_mode(),
        }
    }

    /// Array feedback, squid flux parked at half scale, test oscillator on
    /// the squid flux input, bias at the working point.
    fn enter_center_mode(&mut self) -> Result<(), TuneError> {
        self.array.lock(FeedbackLoop::Array)?;
        let park = self.array.bias_limit(BiasParam::SquidFlux)? / 2.0;
        self.array.set(BiasParam::SquidFlux, park)?;
        self.array.set_test_input(BiasParam::SquidFlux)?;
        self.array.set_test_signal(TestSignal::On)?;
        self.array.set(BiasParam::SquidBias, self.settings.squid_bias)?;
        self.array.set_sensitivity(SensitivityMode::High)?;
        self.array.reset()?;
        Ok(())
    }

    /// Squid feedback with the test oscillator off.
    fn enter_lock_mode(&mut self) -> Result<(), TuneError> {
        self.array.lock(FeedbackLoop::Squid)?;
        self.array.set_test_signal(TestSignal::Off)?;
        self.array.reset()?;
        Ok(())
    }

    fn measure_stage(&mut self, stage: TuneStage) -> Result<f64, TuneError> {
        let saa = self.settings.channels.saa_input.clone();
        match stage {
            TuneStage::Center => {
                let trace = self.characteristic()?;
                let level = trace
                    .midpoint()
                    .ok_or(DaqError::EmptyBuffer(saa))?;
                self.last_characteristic = Some(trace);
                Ok(level)
            }
            TuneStage::Lock => {
                let acq = self.daq.monitor(
                    &[saa.as_str()],
                    self.settings.monitor_window,
                    self.settings.sample_rate,
                )?;
                let samples = acq.require(&saa)?;
                Ok(trace::midpoint(samples).ok_or(DaqError::EmptyBuffer(saa.clone()))?)
            }
        }
    }

    /// Mean and spread of the amplifier output over a short window.
    fn mean_signal(&mut self, window: f64) -> Result<SignalStats, TuneError> {
        let saa = self.settings.channels.saa_input.clone();
        let acq = self
            .daq
            .monitor(&[saa.as_str()], window, self.settings.monitor_rate)?;
        let samples = acq.require(&saa)?;
        Ok(trace::stats(samples).ok_or(DaqError::EmptyBuffer(saa.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::{Config, DaqChannels};
    use crate::sim::{SimArray, SimDaq, SimOp, SimRig, SimSettings, StageResponse};

    fn sim_tuner(
        sim: SimSettings,
    ) -> (ArrayTuner<SimDaq, SimArray>, Arc<Mutex<SimRig>>) {
        let rig = Arc::new(Mutex::new(SimRig::new(DaqChannels::default(), sim)));
        let daq = SimDaq::new(rig.clone());
        let array = SimArray::new(rig.clone());
        let settings = Config::default().tune_settings(100.0, 0.0, 0.0);
        (ArrayTuner::new(daq, array, settings), rig)
    }

    #[test]
    fn test_apply_correction_in_range() {
        assert_eq!(apply_correction(50.0, 5.0, 50.0, 150.0), 55.0);
    }

    #[test]
    fn test_apply_correction_low_saturation() {
        // A negative proposal jumps up by the configured step
        assert_eq!(apply_correction(10.0, -30.0, 50.0, 150.0), 60.0);
    }

    #[test]
    fn test_apply_correction_high_saturation() {
        // A proposal past the ceiling wraps back to zero
        assert_eq!(apply_correction(140.0, 20.0, 50.0, 150.0), 0.0);
    }

    #[test]
    fn test_tune_converges_on_affine_response() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        let outcome = tuner.tune_squid().unwrap();
        assert!(outcome.converged());
        assert_eq!(outcome.attempts_used(), Some(1));
        assert!(outcome.error().abs() <= 0.01);
        // The array stage zero crossing sits at 60
        let a_flux = rig.lock().unwrap().value(BiasParam::ArrayFlux);
        assert!((a_flux - 60.0).abs() < 1.0e-9);
        assert!(tuner.last_characteristic().is_some());
    }

    #[test]
    fn test_tune_without_adjust_when_within_tolerance() {
        let mut sim = SimSettings::default();
        // Already centered at the starting bias
        sim.array = StageResponse {
            gain: 0.02,
            center: 0.0,
        };
        let (mut tuner, rig) = sim_tuner(sim);
        let outcome = tuner.tune_squid().unwrap();
        assert_eq!(outcome.attempts_used(), Some(0));
        assert_eq!(rig.lock().unwrap().set_count(BiasParam::ArrayFlux), 0);
    }

    #[test]
    fn test_tune_zero_budget_fails_without_adjust() {
        let (daq, array, rig) = {
            let rig = Arc::new(Mutex::new(SimRig::new(
                DaqChannels::default(),
                SimSettings::default(),
            )));
            (SimDaq::new(rig.clone()), SimArray::new(rig.clone()), rig)
        };
        let mut settings = Config::default().tune_settings(100.0, 0.0, 0.0);
        settings.max_attempts = 0;
        let mut tuner = ArrayTuner::new(daq, array, settings);
        let outcome = tuner.tune_squid().unwrap();
        assert!(!outcome.converged());
        assert_eq!(rig.lock().unwrap().set_count(BiasParam::ArrayFlux), 0);
    }

    #[test]
    fn test_tune_exhausts_budget_when_railed() {
        let mut sim = SimSettings::default();
        // Every reachable bias leaves the output pinned at the negative rail
        sim.array = StageResponse {
            gain: 1.0,
            center: 1000.0,
        };
        let (mut tuner, rig) = sim_tuner(sim);
        let outcome = tuner.tune_squid().unwrap();
        assert!(matches!(outcome, TuneOutcome::Exhausted { .. }));
        // Each correction writes the bias three times: the calibration
        // perturbation, its restore, and the correction itself
        let budget = tuner.settings().max_attempts as usize;
        assert_eq!(
            rig.lock().unwrap().set_count(BiasParam::ArrayFlux),
            3 * budget
        );
    }

    #[test]
    fn test_calibrate_restores_parameter() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        let mut hand = SimArray::new(rig.clone());
        hand.set(BiasParam::ArrayFlux, 20.0).unwrap();
        rig.lock().unwrap().ops.clear();

        let sensitivity = tuner.calibrate(BiasParam::ArrayFlux).unwrap();
        assert!((sensitivity - 0.02).abs() < 1.0e-9);
        assert!((rig.lock().unwrap().value(BiasParam::ArrayFlux) - 20.0).abs() < 1.0e-12);
        assert_eq!(
            rig.lock().unwrap().ops,
            vec![
                SimOp::Set(BiasParam::ArrayFlux, 30.0),
                SimOp::Set(BiasParam::ArrayFlux, 20.0),
            ]
        );
        // Calibration alone never re-arms; that is the adjust step's job
        assert_eq!(rig.lock().unwrap().reset_count(), 0);
    }

    #[test]
    fn test_calibrate_clamps_large_sensitivity() {
        let mut sim = SimSettings::default();
        sim.array = StageResponse {
            gain: 1000.0,
            center: 60.0,
        };
        sim.rail = 1.0e9;
        let (mut tuner, _) = sim_tuner(sim);
        let sensitivity = tuner.calibrate(BiasParam::ArrayFlux).unwrap();
        assert_eq!(sensitivity, 100.0);
    }

    #[test]
    fn test_calibrate_clamps_preserving_sign() {
        let mut sim = SimSettings::default();
        sim.array = StageResponse {
            gain: -1000.0,
            center: 60.0,
        };
        sim.rail = 1.0e9;
        let (mut tuner, rig) = sim_tuner(sim);
        let mut hand = SimArray::new(rig.clone());
        hand.set(BiasParam::ArrayFlux, 20.0).unwrap();

        let sensitivity = tuner.calibrate(BiasParam::ArrayFlux).unwrap();
        assert_eq!(sensitivity, -100.0);
        // Restored on the way out regardless of sign
        assert!((rig.lock().unwrap().value(BiasParam::ArrayFlux) - 20.0).abs() < 1.0e-12);
    }

    #[test]
    fn test_calibrate_clamps_small_sensitivity() {
        let mut sim = SimSettings::default();
        sim.array = StageResponse {
            gain: 1.0e-5,
            center: 60.0,
        };
        let (mut tuner, _) = sim_tuner(sim);
        let sensitivity = tuner.calibrate(BiasParam::ArrayFlux).unwrap();
        assert_eq!(sensitivity, 0.001);
    }

    #[test]
    fn test_adjust_applies_jump_policy_and_resets() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        let mut hand = SimArray::new(rig.clone());
        hand.set(BiasParam::ArrayFlux, 10.0).unwrap();

        // sensitivity is 0.02, so an error of 0.6 V proposes a delta of -30
        tuner.adjust(BiasParam::ArrayFlux, 0.6).unwrap();
        assert!((rig.lock().unwrap().value(BiasParam::ArrayFlux) - 60.0).abs() < 1.0e-9);
        assert_eq!(rig.lock().unwrap().ops.last(), Some(&SimOp::Reset));
        assert_eq!(rig.lock().unwrap().reset_count(), 1);
    }

    #[test]
    fn test_adjust_wraps_past_ceiling() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        let mut hand = SimArray::new(rig.clone());
        hand.set(BiasParam::ArrayFlux, 140.0).unwrap();

        // delta of +15 would land at 155, past the 150 ceiling
        tuner.adjust(BiasParam::ArrayFlux, -0.3).unwrap();
        assert_eq!(rig.lock().unwrap().value(BiasParam::ArrayFlux), 0.0);
        assert_eq!(rig.lock().unwrap().ops.last(), Some(&SimOp::Reset));
    }

    #[test]
    fn test_unresponsive_daq_aborts_tuning() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        rig.lock().unwrap().set_daq_down(true);
        assert!(matches!(
            tuner.tune_squid(),
            Err(TuneError::DaqError(DaqError::Unresponsive(_)))
        ));
    }

    #[test]
    fn test_unresponsive_array_aborts_tuning() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        rig.lock().unwrap().set_array_down(true);
        assert!(matches!(tuner.tune_squid(), Err(TuneError::ArrayError(_))));
    }

    #[test]
    fn test_find_conversion_detects_jump() {
        let mut sim = SimSettings::default();
        sim.jump_at = Some(40.0);
        sim.jump_height = 0.5;
        let (mut tuner, rig) = sim_tuner(sim);
        let mut hand = SimArray::new(rig.clone());
        hand.lock(FeedbackLoop::Squid).unwrap();

        let jump = tuner
            .find_conversion(BiasParam::SquidFlux, 10.0, 0.01)
            .unwrap()
            .expect("expected a flux jump");
        assert_eq!(jump.bias_value, 40.0);
        assert!((jump.conversion - 2.0).abs() < 1.0e-9);
    }

    #[test]
    fn test_find_conversion_without_jump() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        let mut hand = SimArray::new(rig.clone());
        hand.lock(FeedbackLoop::Squid).unwrap();

        let jump = tuner
            .find_conversion(BiasParam::SquidFlux, 50.0, 0.01)
            .unwrap();
        assert!(jump.is_none());
    }

    #[test]
    fn test_find_conversion_rejects_bad_step() {
        let (mut tuner, rig) = sim_tuner(SimSettings::default());
        assert!(matches!(
            tuner.find_conversion(BiasParam::SquidFlux, 0.0, 0.01),
            Err(TuneError::BadSearchStep(_))
        ));
        assert!(matches!(
            tuner.find_conversion(BiasParam::SquidFlux, -5.0, 0.01),
            Err(TuneError::BadSearchStep(_))
        ));
        // Rejected before touching the hardware
        assert!(rig.lock().unwrap().ops.is_empty());
    }
}
