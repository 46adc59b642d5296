//! Simulated hardware backends.
//!
//! [`SimRig`] models the rig as two affine response stages with output
//! saturation: in array feedback the output midpoint follows the array flux
//! bias, in squid feedback it follows the squid flux bias. [`SimDaq`] and
//! [`SimArray`] share one rig behind a mutex so they stay consistent, and the
//! rig records every controller action in order. The simulation is fully
//! deterministic; it backs the test suite and lets the CLI rehearse a sweep
//! without a cooled array.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::config::DaqChannels;
use super::daq::{Acquisition, Daq, OutputSignal};
use super::error::{ArrayError, DaqError, PreampError};
use super::preamp::Preamp;
use super::squid_array::{BiasParam, FeedbackLoop, SensitivityMode, SquidArray, TestSignal};

/// Affine response of one feedback stage: level = gain * (value - center).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageResponse {
    /// Volts of output per device unit of bias.
    pub gain: f64,
    /// Bias value at which the output crosses zero.
    pub center: f64,
}

impl StageResponse {
    fn level(&self, value: f64) -> f64 {
        self.gain * (value - self.center)
    }
}

/// Response model of the simulated rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSettings {
    /// Array stage response to the array flux bias.
    pub array: StageResponse,
    /// Squid stage response to the squid flux bias.
    pub squid: StageResponse,
    /// Output saturation, volts.
    pub rail: f64,
    /// Amplitude of the characteristic modulation around the midpoint, volts.
    pub modulation_depth: f64,
    /// Full scale of the flux bias DACs, device units.
    pub flux_limit: f64,
    /// Full scale of the current bias DAC, device units.
    pub squid_bias_limit: f64,
    /// Full scale of the analog outputs, volts.
    pub output_range: f64,
    /// Coupling from the coil output into the array output, volts per volt.
    pub coil_coupling: f64,
    /// Squid flux above which a reset latches a flux quantum jump.
    pub jump_at: Option<f64>,
    /// Height of a latched jump, volts.
    pub jump_height: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            array: StageResponse {
                gain: 0.02,
                center: 60.0,
            },
            squid: StageResponse {
                gain: 0.05,
                center: 70.0,
            },
            rail: 10.0,
            modulation_depth: 0.5,
            flux_limit: 150.0,
            squid_bias_limit: 2000.0,
            output_range: 10.0,
            coil_coupling: 0.3,
            jump_at: None,
            jump_height: 0.5,
        }
    }
}

/// One recorded controller action, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimOp {
    Set(BiasParam, f64),
    Reset,
    Lock(FeedbackLoop),
    TestSignal(TestSignal),
    TestInput(BiasParam),
    Sensitivity(SensitivityMode),
}

/// Deterministic stand-in for the physical rig.
#[derive(Debug)]
pub struct SimRig {
    channels: DaqChannels,
    settings: SimSettings,
    s_bias: f64,
    s_flux: f64,
    a_flux: f64,
    feedback: FeedbackLoop,
    test_signal: TestSignal,
    sensitivity: SensitivityMode,
    latched_jump: f64,
    daq_down: bool,
    array_down: bool,
    /// Every controller action since construction, in order.
    pub ops: Vec<SimOp>,
}

impl SimRig {
    pub fn new(channels: DaqChannels, settings: SimSettings) -> Self {
        Self {
            channels,
            settings,
            s_bias: 0.0,
            s_flux: 0.0,
            a_flux: 0.0,
            feedback: FeedbackLoop::Array,
            test_signal: TestSignal::Off,
            sensitivity: SensitivityMode::High,
            latched_jump: 0.0,
            daq_down: false,
            array_down: false,
            ops: Vec::new(),
        }
    }

    /// Simulate a dead DAQ from now on.
    pub fn set_daq_down(&mut self, down: bool) {
        self.daq_down = down;
    }

    /// Simulate a dead array controller from now on.
    pub fn set_array_down(&mut self, down: bool) {
        self.array_down = down;
    }

    pub fn value(&self, param: BiasParam) -> f64 {
        match param {
            BiasParam::SquidBias => self.s_bias,
            BiasParam::SquidFlux => self.s_flux,
            BiasParam::ArrayFlux => self.a_flux,
        }
    }

    pub fn sensitivity(&self) -> SensitivityMode {
        self.sensitivity
    }

    /// Number of bias writes recorded for `param`.
    pub fn set_count(&self, param: BiasParam) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, SimOp::Set(p, _) if *p == param))
            .count()
    }

    pub fn reset_count(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, SimOp::Reset)).count()
    }

    fn set_value(&mut self, param: BiasParam, value: f64) {
        match param {
            BiasParam::SquidBias => self.s_bias = value,
            BiasParam::SquidFlux => self.s_flux = value,
            BiasParam::ArrayFlux => self.a_flux = value,
        }
    }

    fn limit(&self, param: BiasParam) -> f64 {
        match param {
            BiasParam::SquidBias => self.settings.squid_bias_limit,
            BiasParam::SquidFlux | BiasParam::ArrayFlux => self.settings.flux_limit,
        }
    }

    /// Output level of the active feedback stage, before saturation.
    fn stage_level(&self) -> f64 {
        match self.feedback {
            FeedbackLoop::Array => self.settings.array.level(self.a_flux),
            FeedbackLoop::Squid => self.settings.squid.level(self.s_flux) + self.latched_jump,
        }
    }

    fn saturate(&self, level: f64) -> f64 {
        level.clamp(-self.settings.rail, self.settings.rail)
    }

    fn apply_reset(&mut self) {
        self.latched_jump = match self.settings.jump_at {
            Some(threshold) if self.s_flux >= threshold => self.settings.jump_height,
            _ => 0.0,
        };
    }
}

/// Simulated digitizer. Clone freely; all clones share the same rig.
#[derive(Debug, Clone)]
pub struct SimDaq {
    rig: Arc<Mutex<SimRig>>,
}

impl SimDaq {
    pub fn new(rig: Arc<Mutex<SimRig>>) -> Self {
        Self { rig }
    }
}

impl Daq for SimDaq {
    fn acquire(
        &mut self,
        output: &OutputSignal,
        inputs: &[&str],
        sample_rate: f64,
    ) -> Result<Acquisition, DaqError> {
        let rig = self.rig.lock().unwrap();
        if rig.daq_down {
            return Err(DaqError::Unresponsive(
                inputs.first().map(|s| s.to_string()).unwrap_or_default(),
            ));
        }
        let peak = output.samples.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
        if peak > rig.settings.output_range {
            return Err(DaqError::OutputOutOfRange(peak, rig.settings.output_range));
        }
        if output.channel != rig.channels.test_output && output.channel != rig.channels.coil_output
        {
            return Err(DaqError::UnknownChannel(output.channel.clone()));
        }

        let n = output.samples.len();
        let base = rig.stage_level();
        let depth = match rig.test_signal {
            TestSignal::On => rig.settings.modulation_depth,
            TestSignal::Off => 0.0,
        };
        let coupling = if output.channel == rig.channels.coil_output {
            rig.settings.coil_coupling
        } else {
            0.0
        };
        // Two full oscillator periods per buffer, sampled so the extrema land
        // exactly on grid points for the default buffer length.
        let mut stimulus = Vec::with_capacity(n);
        let mut response = Vec::with_capacity(n);
        for (i, drive) in output.samples.iter().enumerate() {
            let theta = std::f64::consts::TAU * 2.0 * i as f64 / n as f64;
            let s = theta.sin();
            stimulus.push(s);
            response.push(rig.saturate(base + depth * s + coupling * drive));
        }

        let mut acq = Acquisition::new(sample_rate);
        for input in inputs {
            if *input == rig.channels.saa_input {
                acq.insert(input, response.clone());
            } else if *input == rig.channels.test_input {
                acq.insert(input, stimulus.clone());
            } else {
                return Err(DaqError::UnknownChannel(input.to_string()));
            }
        }
        Ok(acq)
    }

    fn monitor(
        &mut self,
        inputs: &[&str],
        duration: f64,
        sample_rate: f64,
    ) -> Result<Acquisition, DaqError> {
        let rig = self.rig.lock().unwrap();
        if rig.daq_down {
            return Err(DaqError::Unresponsive(
                inputs.first().map(|s| s.to_string()).unwrap_or_default(),
            ));
        }
        let n = ((duration * sample_rate) as usize).max(1);
        // The test modulation is symmetric, so a monitoring window averages
        // back to the stage level.
        let level = rig.saturate(rig.stage_level());
        let mut acq = Acquisition::new(sample_rate);
        for input in inputs {
            if *input == rig.channels.saa_input {
                acq.insert(input, vec![level; n]);
            } else if *input == rig.channels.test_input {
                acq.insert(input, vec![0.0; n]);
            } else {
                return Err(DaqError::UnknownChannel(input.to_string()));
            }
        }
        Ok(acq)
    }

    fn write_static(&mut self, channel: &str, level: f64) -> Result<(), DaqError> {
        let rig = self.rig.lock().unwrap();
        if rig.daq_down {
            return Err(DaqError::Unresponsive(channel.to_string()));
        }
        if level.abs() > rig.settings.output_range {
            return Err(DaqError::OutputOutOfRange(level, rig.settings.output_range));
        }
        if channel != rig.channels.test_output && channel != rig.channels.coil_output {
            return Err(DaqError::UnknownChannel(channel.to_string()));
        }
        Ok(())
    }
}

/// Simulated array controller. Clone freely; all clones share the same rig.
#[derive(Debug, Clone)]
pub struct SimArray {
    rig: Arc<Mutex<SimRig>>,
}

impl SimArray {
    pub fn new(rig: Arc<Mutex<SimRig>>) -> Self {
        Self { rig }
    }
}

impl SquidArray for SimArray {
    fn get(&mut self, param: BiasParam) -> Result<f64, ArrayError> {
        let rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        Ok(rig.value(param))
    }

    fn set(&mut self, param: BiasParam, value: f64) -> Result<(), ArrayError> {
        let mut rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        if value < 0.0 || value > rig.limit(param) {
            return Err(ArrayError::ValueOutOfRange {
                param,
                value,
                limit: rig.limit(param),
            });
        }
        rig.ops.push(SimOp::Set(param, value));
        rig.set_value(param, value);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ArrayError> {
        let mut rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        rig.ops.push(SimOp::Reset);
        rig.apply_reset();
        Ok(())
    }

    fn lock(&mut self, feedback: FeedbackLoop) -> Result<(), ArrayError> {
        let mut rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        rig.ops.push(SimOp::Lock(feedback));
        rig.feedback = feedback;
        Ok(())
    }

    fn set_test_signal(&mut self, signal: TestSignal) -> Result<(), ArrayError> {
        let mut rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        rig.ops.push(SimOp::TestSignal(signal));
        rig.test_signal = signal;
        Ok(())
    }

    fn set_test_input(&mut self, param: BiasParam) -> Result<(), ArrayError> {
        let mut rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        rig.ops.push(SimOp::TestInput(param));
        Ok(())
    }

    fn set_sensitivity(&mut self, mode: SensitivityMode) -> Result<(), ArrayError> {
        let mut rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        rig.ops.push(SimOp::Sensitivity(mode));
        rig.sensitivity = mode;
        Ok(())
    }

    fn bias_limit(&mut self, param: BiasParam) -> Result<f64, ArrayError> {
        let rig = self.rig.lock().unwrap();
        if rig.array_down {
            return Err(ArrayError::Unresponsive);
        }
        Ok(rig.limit(param))
    }
}

/// One recorded preamp action.
#[derive(Debug, Clone, PartialEq)]
pub enum PreampOp {
    Gain(u32),
    Filter(f64, f64),
    OverloadCheck,
}

/// Simulated preamplifier.
#[derive(Debug, Clone, Default)]
pub struct SimPreamp {
    pub overloaded: bool,
    pub down: bool,
    /// Every preamp action since construction, in order.
    pub ops: Vec<PreampOp>,
}

impl SimPreamp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preamp for SimPreamp {
    fn set_gain(&mut self, gain: u32) -> Result<(), PreampError> {
        if self.down {
            return Err(PreampError::Unresponsive);
        }
        if gain == 0 || gain > 100000 {
            return Err(PreampError::InvalidGain(gain));
        }
        self.ops.push(PreampOp::Gain(gain));
        Ok(())
    }

    fn set_filter(&mut self, low: f64, high: f64) -> Result<(), PreampError> {
        if self.down {
            return Err(PreampError::Unresponsive);
        }
        if low < 0.0 || low >= high {
            return Err(PreampError::InvalidFilter(low, high));
        }
        self.ops.push(PreampOp::Filter(low, high));
        Ok(())
    }

    fn is_overloaded(&mut self) -> Result<bool, PreampError> {
        if self.down {
            return Err(PreampError::Unresponsive);
        }
        self.ops.push(PreampOp::OverloadCheck);
        Ok(self.overloaded)
    }
}
