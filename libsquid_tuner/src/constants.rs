//! Fixed characteristics of the tuning electronics that are not configuration.

/// Smallest credible sensitivity magnitude in volts per bias unit. Finite
/// difference estimates below this are indistinguishable from noise and would
/// produce runaway corrections if trusted.
pub const SENSITIVITY_FLOOR: f64 = 0.001;

/// Largest credible sensitivity magnitude in volts per bias unit.
pub const SENSITIVITY_CEILING: f64 = 100.0;

/// A reset shift must exceed this many standard deviations of the monitored
/// signal before it counts as a trapped flux quantum.
pub const JUMP_SIGMA: f64 = 8.0;

/// DC level in volts held on the marker output while the characteristic is
/// recorded.
pub const TEST_PULSE_LEVEL: f64 = 2.0;

/// Number of samples in one characteristic acquisition.
pub const TEST_PULSE_SAMPLES: usize = 2000;
