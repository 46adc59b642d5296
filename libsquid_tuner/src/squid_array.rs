//! Interface to the SQUID array controller electronics.
//!
//! The controller owns the bias DACs, the feedback loops, and the internal
//! test oscillator. Every mutation of a bias parameter must be followed by a
//! [`SquidArray::reset`] before the next measurement is trusted; the tuning
//! layers enforce this.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::error::ArrayError;

/// The adjustable bias parameters of the controller, in device units
/// (DAC counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BiasParam {
    /// Current bias of the SQUID under test.
    SquidBias,
    /// Flux bias of the SQUID under test. Adjusted by the lock stage.
    SquidFlux,
    /// Flux bias of the amplifier array. Adjusted by the centering stage.
    ArrayFlux,
}

impl Display for BiasParam {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BiasParam::SquidBias => write!(f, "S_bias"),
            BiasParam::SquidFlux => write!(f, "S_flux"),
            BiasParam::ArrayFlux => write!(f, "A_flux"),
        }
    }
}

/// Which feedback loop the controller closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackLoop {
    /// Feedback on the amplifier array; the SQUID characteristic is visible.
    Array,
    /// Feedback on the SQUID under test; the output follows its lock point.
    Squid,
}

/// State of the internal test oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSignal {
    On,
    Off,
}

/// Gain range of the controller output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityMode {
    High,
    Medium,
    Low,
}

/// The array controller as the tuning layers see it.
pub trait SquidArray {
    fn get(&mut self, param: BiasParam) -> Result<f64, ArrayError>;

    fn set(&mut self, param: BiasParam, value: f64) -> Result<(), ArrayError>;

    /// Re-arm the feedback electronics. Must follow every bias change that is
    /// meant to persist into the next measurement.
    fn reset(&mut self) -> Result<(), ArrayError>;

    fn lock(&mut self, feedback: FeedbackLoop) -> Result<(), ArrayError>;

    fn set_test_signal(&mut self, signal: TestSignal) -> Result<(), ArrayError>;

    /// Route the internal test oscillator onto the input of `param`.
    fn set_test_input(&mut self, param: BiasParam) -> Result<(), ArrayError>;

    fn set_sensitivity(&mut self, mode: SensitivityMode) -> Result<(), ArrayError>;

    /// Full scale of `param` in device units.
    fn bias_limit(&mut self, param: BiasParam) -> Result<f64, ArrayError>;
}
