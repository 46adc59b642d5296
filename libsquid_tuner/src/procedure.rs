//! The full procedure run at one grid point: center, lock, characterize.
//!
//! The two tuning stages gate everything else. A point that fails to center
//! never reaches the lock stage, and a point that fails to lock is discarded
//! outright; only a locked point is measured and reported. The outcome type
//! enforces this: a report only exists inside [`ProcedureOutcome::Locked`].

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::config::ProcedureSettings;
use super::daq::Daq;
use super::error::ProcedureError;
use super::measure::{self, MutualSweep, NoiseReport};
use super::preamp::Preamp;
use super::squid_array::{BiasParam, SquidArray};
use super::trace::CharacteristicTrace;
use super::tuner::{ArrayTuner, FluxJump, TuneOutcome};

/// Everything a locked grid point leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneReport {
    /// UTC wall clock time of the lock, RFC 3339.
    pub timestamp: String,
    pub squid_bias: f64,
    pub aflux_offset: f64,
    pub sflux_offset: f64,
    pub tune: TuneOutcome,
    pub lock: TuneOutcome,
    /// The characteristic recorded by the last centering measurement.
    pub characteristic: CharacteristicTrace,
    pub noise: NoiseReport,
    pub sweep: MutualSweep,
    pub conversion: Option<FluxJump>,
}

/// Terminal state of one grid point.
#[derive(Debug, Clone)]
pub enum ProcedureOutcome {
    Locked(Box<TuneReport>),
    TuneFailed(TuneOutcome),
    LockFailed { tune: TuneOutcome, lock: TuneOutcome },
}

impl ProcedureOutcome {
    pub fn locked(&self) -> bool {
        matches!(self, ProcedureOutcome::Locked(_))
    }

    pub fn report(&self) -> Option<&TuneReport> {
        match self {
            ProcedureOutcome::Locked(report) => Some(report),
            _ => None,
        }
    }
}

/// Runs the tuning stages and, on success, the dependent measurements.
#[derive(Debug)]
pub struct TuneProcedure<D: Daq, A: SquidArray, P: Preamp> {
    tuner: ArrayTuner<D, A>,
    preamp: P,
    settings: ProcedureSettings,
}

impl<D: Daq, A: SquidArray, P: Preamp> TuneProcedure<D, A, P> {
    pub fn new(tuner: ArrayTuner<D, A>, preamp: P, settings: ProcedureSettings) -> Self {
        Self {
            tuner,
            preamp,
            settings,
        }
    }

    /// Hand the hardware back, for the next grid point.
    pub fn into_parts(self) -> (D, A, P) {
        let (daq, array) = self.tuner.into_parts();
        (daq, array, self.preamp)
    }

    pub fn run(&mut self) -> Result<ProcedureOutcome, ProcedureError> {
        let tune = self.tuner.tune_squid()?;
        if !tune.converged() {
            log::warn!(
                "Centering failed with residual error {:+.4} V, discarding this point",
                tune.error()
            );
            return Ok(ProcedureOutcome::TuneFailed(tune));
        }

        let lock = self.tuner.lock_squid()?;
        if !lock.converged() {
            log::warn!(
                "Lock failed with residual error {:+.4} V, discarding this point",
                lock.error()
            );
            return Ok(ProcedureOutcome::LockFailed { tune, lock });
        }
        if let Some(attempts) = lock.attempts_used() {
            log::info!("Locked after {attempts} corrections");
        }

        let conversion = if self.settings.search_conversion {
            let (_, array) = self.tuner.parts_mut();
            let parked = array.get(BiasParam::SquidFlux)?;
            let found = self.tuner.find_conversion(
                BiasParam::SquidFlux,
                self.settings.conversion_step,
                self.settings.conversion_window,
            )?;
            // The search walked the flux bias away; put the lock point back
            let (_, array) = self.tuner.parts_mut();
            array.set(BiasParam::SquidFlux, parked)?;
            array.reset()?;
            found
        } else {
            None
        };

        let (daq, array) = self.tuner.parts_mut();
        let noise = measure::measure_noise(daq, array, &mut self.preamp, &self.settings.measure)?;
        let (daq, array) = self.tuner.parts_mut();
        let sweep = measure::measure_mutual_inductance(
            daq,
            array,
            &mut self.preamp,
            &self.settings.measure,
        )?;

        let characteristic = self.tuner.last_characteristic().cloned().unwrap_or_default();
        let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;

        Ok(ProcedureOutcome::Locked(Box::new(TuneReport {
            timestamp,
            squid_bias: self.tuner.settings().squid_bias,
            aflux_offset: self.tuner.settings().aflux_offset,
            sflux_offset: self.tuner.settings().sflux_offset,
            tune,
            lock,
            characteristic,
            noise,
            sweep,
            conversion,
        })))
    }
}
