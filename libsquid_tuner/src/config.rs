//! Configuration of a tuning run.
//!
//! The [`Config`] structure is read from a YAML file (see
//! [`Config::read_config_file`]) and carries everything a batch sweep needs:
//! the channel wiring, the bias grid, the tolerances and retry budgets of the
//! two tuning stages, and the settings of the dependent measurements. Use the
//! `new` subcommand of the CLI to generate a template.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::sim::SimSettings;

/// Which physical channel plays which role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqChannels {
    /// Input wired to the array amplifier output.
    pub saa_input: String,
    /// Input wired to the controller test oscillator monitor.
    pub test_input: String,
    /// Output wired to the acquisition marker line.
    pub test_output: String,
    /// Output wired to the field coil through the bias resistor.
    pub coil_output: String,
}

impl Default for DaqChannels {
    fn default() -> Self {
        Self {
            saa_input: String::from("ai0"),
            test_input: String::from("ai1"),
            test_output: String::from("ao0"),
            coil_output: String::from("ao1"),
        }
    }
}

/// Everything one tuning run is allowed to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub channels: DaqChannels,
    /// Directory that receives the tune reports. Must exist.
    pub output_path: PathBuf,
    /// SQUID bias values of the sweep grid, device units.
    pub squid_bias: Vec<f64>,
    /// Target midpoint offsets for the centering stage, volts.
    pub aflux_offsets: Vec<f64>,
    /// Target lock point offsets for the lock stage, volts.
    pub sflux_offsets: Vec<f64>,
    /// Acceptable residual error of the lock stage, volts.
    pub squid_tol: f64,
    /// Acceptable residual error of the centering stage, volts.
    pub aflux_tol: f64,
    /// Correction budget of each stage.
    pub max_attempts: u32,
    /// Bias step taken when a correction would drive the parameter negative.
    pub jump_step: f64,
    /// Bias value above which a correction wraps back to zero.
    pub bias_ceiling: f64,
    /// Bias perturbation used for sensitivity calibration, device units.
    pub calibration_step: f64,
    /// Averaging window of one calibration measurement, seconds.
    pub calibration_window: f64,
    /// Sample rate of characteristic and lock point acquisitions, Hz.
    pub sample_rate: f64,
    /// Sample rate of averaged monitoring windows, Hz.
    pub monitor_rate: f64,
    /// Length of the lock point monitoring window, seconds.
    pub monitor_window: f64,
    /// Flux quanta per volt at the array output.
    pub conversion: f64,
    /// Length of the noise monitoring window, seconds.
    pub noise_window: f64,
    /// Number of points in the mutual inductance sweep.
    pub sweep_points: usize,
    /// Drive amplitude of the mutual inductance sweep, volts.
    pub sweep_amplitude: f64,
    /// Resistor between the coil output and the field coil, ohms.
    pub bias_resistance: f64,
    /// Search for a flux quantum jump after locking.
    pub search_conversion: bool,
    /// Bias step of the jump search, device units.
    pub conversion_step: f64,
    /// Averaging window of the jump search, seconds.
    pub conversion_window: f64,
    /// Response model used when the CLI rehearses against simulated hardware.
    pub simulator: SimSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: DaqChannels::default(),
            output_path: PathBuf::from("None"),
            squid_bias: vec![100.0],
            aflux_offsets: vec![0.0],
            sflux_offsets: vec![0.0],
            squid_tol: 0.1,
            aflux_tol: 0.01,
            max_attempts: 5,
            jump_step: 50.0,
            bias_ceiling: 150.0,
            calibration_step: 10.0,
            calibration_window: 0.25,
            sample_rate: 100000.0,
            monitor_rate: 256000.0,
            monitor_window: 0.01,
            conversion: 1.0 / 1.44,
            noise_window: 0.1,
            sweep_points: 1000,
            sweep_amplitude: 1.0e-3,
            bias_resistance: 340.0,
            search_conversion: false,
            conversion_step: 1.0,
            conversion_window: 0.1,
            simulator: SimSettings::default(),
        }
    }
}

impl Config {
    /// Read and deserialize the configuration at `config_path`.
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Reject settings the tuning algorithms cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.squid_bias.is_empty()
            || self.aflux_offsets.is_empty()
            || self.sflux_offsets.is_empty()
        {
            return Err(ConfigError::InvalidField(String::from(
                "sweep grid vectors must not be empty",
            )));
        }
        if self.squid_tol <= 0.0 || self.aflux_tol <= 0.0 {
            return Err(ConfigError::InvalidField(String::from(
                "tolerances must be positive",
            )));
        }
        if self.sample_rate <= 0.0 || self.monitor_rate <= 0.0 {
            return Err(ConfigError::InvalidField(String::from(
                "sample rates must be positive",
            )));
        }
        if self.monitor_window <= 0.0
            || self.calibration_window <= 0.0
            || self.noise_window <= 0.0
        {
            return Err(ConfigError::InvalidField(String::from(
                "monitoring windows must be positive",
            )));
        }
        if self.calibration_step == 0.0 {
            return Err(ConfigError::InvalidField(String::from(
                "calibration step must not be zero",
            )));
        }
        if self.jump_step <= 0.0 || self.bias_ceiling <= 0.0 {
            return Err(ConfigError::InvalidField(String::from(
                "correction policy bounds must be positive",
            )));
        }
        if self.sweep_points < 2 {
            return Err(ConfigError::InvalidField(String::from(
                "mutual inductance sweep needs at least two points",
            )));
        }
        if self.bias_resistance <= 0.0 {
            return Err(ConfigError::InvalidField(String::from(
                "bias resistance must be positive",
            )));
        }
        if self.search_conversion && self.conversion_step <= 0.0 {
            return Err(ConfigError::InvalidField(String::from(
                "conversion search step must be positive",
            )));
        }
        Ok(())
    }

    /// Number of points in the sweep grid.
    pub fn grid_size(&self) -> usize {
        self.squid_bias.len() * self.aflux_offsets.len() * self.sflux_offsets.len()
    }

    /// Tuning settings for one grid point.
    pub fn tune_settings(
        &self,
        squid_bias: f64,
        aflux_offset: f64,
        sflux_offset: f64,
    ) -> TuneSettings {
        TuneSettings {
            squid_bias,
            aflux_offset,
            sflux_offset,
            squid_tol: self.squid_tol,
            aflux_tol: self.aflux_tol,
            max_attempts: self.max_attempts,
            jump_step: self.jump_step,
            bias_ceiling: self.bias_ceiling,
            calibration_step: self.calibration_step,
            calibration_window: self.calibration_window,
            sample_rate: self.sample_rate,
            monitor_rate: self.monitor_rate,
            monitor_window: self.monitor_window,
            channels: self.channels.clone(),
        }
    }

    /// Settings of the measurement stages that follow a successful lock.
    pub fn measure_settings(&self) -> MeasureSettings {
        MeasureSettings {
            conversion: self.conversion,
            noise_window: self.noise_window,
            monitor_rate: self.monitor_rate,
            sample_rate: self.sample_rate,
            sweep_points: self.sweep_points,
            sweep_amplitude: self.sweep_amplitude,
            bias_resistance: self.bias_resistance,
            channels: self.channels.clone(),
        }
    }

    /// Settings of the full two stage procedure.
    pub fn procedure_settings(&self) -> ProcedureSettings {
        ProcedureSettings {
            measure: self.measure_settings(),
            search_conversion: self.search_conversion,
            conversion_step: self.conversion_step,
            conversion_window: self.conversion_window,
        }
    }
}

/// Per point settings of the two tuning stages.
#[derive(Debug, Clone)]
pub struct TuneSettings {
    pub squid_bias: f64,
    pub aflux_offset: f64,
    pub sflux_offset: f64,
    pub squid_tol: f64,
    pub aflux_tol: f64,
    pub max_attempts: u32,
    pub jump_step: f64,
    pub bias_ceiling: f64,
    pub calibration_step: f64,
    pub calibration_window: f64,
    pub sample_rate: f64,
    pub monitor_rate: f64,
    pub monitor_window: f64,
    pub channels: DaqChannels,
}

/// Settings of the noise and mutual inductance measurements.
#[derive(Debug, Clone)]
pub struct MeasureSettings {
    pub conversion: f64,
    pub noise_window: f64,
    pub monitor_rate: f64,
    pub sample_rate: f64,
    pub sweep_points: usize,
    pub sweep_amplitude: f64,
    pub bias_resistance: f64,
    pub channels: DaqChannels,
}

/// Settings of the full procedure run at each grid point.
#[derive(Debug, Clone)]
pub struct ProcedureSettings {
    pub measure: MeasureSettings,
    pub search_conversion: bool,
    pub conversion_step: f64,
    pub conversion_window: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.squid_bias, config.squid_bias);
        assert_eq!(parsed.max_attempts, config.max_attempts);
        assert_eq!(parsed.channels.saa_input, config.channels.saa_input);
        assert_eq!(parsed.bias_ceiling, config.bias_ceiling);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.squid_bias.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField(_))
        ));

        config = Config::default();
        config.aflux_tol = 0.0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.sweep_points = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grid_size() {
        let mut config = Config::default();
        config.squid_bias = vec![80.0, 100.0];
        config.aflux_offsets = vec![0.0, 0.1, 0.2];
        config.sflux_offsets = vec![0.0];
        assert_eq!(config.grid_size(), 6);
    }
}
