//! # squid_tuner
//!
//! squid_tuner is an automated tuning service for SQUID array amplifiers,
//! written in Rust. Given a grid of candidate bias points it drives each
//! SQUID through a two stage procedure: center the device response on its
//! characteristic, then close the feedback loop and null the residual lock
//! point offset. Points that lock are characterized (output noise, field
//! coil response, optionally the flux quantum conversion) and written out as
//! YAML reports; points that fail to converge are recorded and skipped.
//!
//! Tuning real superconducting electronics is a game of bounded retries.
//! Every correction is scaled by a freshly measured sensitivity and clamped
//! by a saturate-and-jump policy, and each stage only gets a configurable
//! number of attempts. Running out of attempts is a normal result, reported
//! as data; only a hardware fault aborts a sweep.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust
//! before, see the [Rust docs](https://www.rust-lang.org/tools/install) for
//! tool chain installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./squid_tuner_cli`
//! from the top level repository. The binary lands in your cargo install
//! location (typically `~/.cargo/bin/`) and can be removed with
//! `cargo uninstall squid_tuner_cli`.
//!
//! ## Hardware
//!
//! The tuning layers only see three traits: [`daq::Daq`] for the digitizer,
//! [`squid_array::SquidArray`] for the array controller, and
//! [`preamp::Preamp`] for the preamplifier. Wiring in a new rig means
//! implementing those three traits for its drivers. The bundled [`sim`]
//! module implements all three against a deterministic response model; the
//! test suite runs on it, and the CLI uses it to rehearse a sweep without a
//! cooled array.
//!
//! ## Configuration
//!
//! Sweeps are configured with a YAML file; `squid_tuner_cli new` writes a
//! template. The format is as follows:
//!
//! ```yml
//! channels:
//!   saa_input: ai0
//!   test_input: ai1
//!   test_output: ao0
//!   coil_output: ao1
//! output_path: None
//! squid_bias:
//! - 100.0
//! aflux_offsets:
//! - 0.0
//! sflux_offsets:
//! - 0.0
//! squid_tol: 0.1
//! aflux_tol: 0.01
//! max_attempts: 5
//! jump_step: 50.0
//! bias_ceiling: 150.0
//! calibration_step: 10.0
//! calibration_window: 0.25
//! sample_rate: 100000.0
//! monitor_rate: 256000.0
//! monitor_window: 0.01
//! conversion: 0.6944444444444444
//! noise_window: 0.1
//! sweep_points: 1000
//! sweep_amplitude: 0.001
//! bias_resistance: 340.0
//! search_conversion: false
//! conversion_step: 1.0
//! conversion_window: 0.1
//! simulator:
//!   array:
//!     gain: 0.02
//!     center: 60.0
//!   squid:
//!     gain: 0.05
//!     center: 70.0
//!   rail: 10.0
//!   modulation_depth: 0.5
//!   flux_limit: 150.0
//!   squid_bias_limit: 2000.0
//!   output_range: 10.0
//!   coil_coupling: 0.3
//!   jump_at: null
//!   jump_height: 0.5
//! ```
//!
//! `output_path` must point at an existing directory; it receives the
//! reports. The sweep grid is the cartesian product of `squid_bias`,
//! `aflux_offsets` and `sflux_offsets`, run in that nesting order. The
//! `simulator` block only matters when running against the simulated rig.
//!
//! ## Output
//!
//! A sweep writes one YAML report per locked grid point into `output_path`,
//! plus a log file from the CLI. Reports are named by their zero padded grid
//! index:
//!
//! ```text
//! tune_0000.yaml
//! timestamp - UTC wall clock time of the lock
//! squid_bias, aflux_offset, sflux_offset - the grid point
//! tune, lock - outcome of each stage with attempts used and residual error
//! characteristic - the recorded stimulus/response trace
//! noise - mean, std, rms and peak to peak in flux quanta, preamp overload flag
//! sweep - coil currents, responses, and the fitted slope/linearity
//! conversion - flux quantum jump, when the search is enabled and finds one
//! ```
//!
//! Failed points leave no report; the run log and the final ranking table
//! carry what is known about them.
pub mod batch;
pub mod config;
pub mod constants;
pub mod daq;
pub mod error;
pub mod measure;
pub mod preamp;
pub mod procedure;
pub mod report_writer;
pub mod sim;
pub mod squid_array;
pub mod status;
pub mod trace;
pub mod tuner;
