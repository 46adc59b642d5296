//! Interface to the preamplifier between the array output and the digitizer.

use super::error::PreampError;

/// The preamplifier as the measurement stages see it.
pub trait Preamp {
    fn set_gain(&mut self, gain: u32) -> Result<(), PreampError>;

    /// Band pass corner frequencies in Hz. `low` must be below `high`.
    fn set_filter(&mut self, low: f64, high: f64) -> Result<(), PreampError>;

    /// True when the input stage reports overload. An overloaded preamp makes
    /// the noise figures meaningless.
    fn is_overloaded(&mut self) -> Result<bool, PreampError>;
}
