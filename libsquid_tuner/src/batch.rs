//! Sequential sweep of the procedure over the configured bias grid.
//!
//! Grid points run strictly one after another; the hardware is a single
//! shared resource and the bias history matters. A point that fails to
//! converge is recorded and the sweep moves on. A hardware fault aborts the
//! whole sweep.

use std::path::PathBuf;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use super::config::Config;
use super::daq::Daq;
use super::error::BatchError;
use super::preamp::Preamp;
use super::procedure::{ProcedureOutcome, TuneProcedure};
use super::report_writer::ReportWriter;
use super::squid_array::SquidArray;
use super::status::{BatchStatus, Stage};
use super::tuner::ArrayTuner;

/// Figures of merit a sweep summary can be ranked by. Lower is better for
/// both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    /// RMS noise of the locked output.
    Noise,
    /// Residual variance of the coil sweep fit.
    Linearity,
}

/// One grid point in the sweep summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub squid_bias: f64,
    pub aflux_offset: f64,
    pub sflux_offset: f64,
    pub locked: bool,
    /// RMS noise of the locked output, flux quanta.
    pub noise_rms: Option<f64>,
    /// Residual variance of the sweep fit; smaller is more linear.
    pub linearity: Option<f64>,
    pub report_path: Option<PathBuf>,
}

impl BatchRow {
    fn figure(&self, metric: RankMetric) -> f64 {
        match metric {
            RankMetric::Noise => self.noise_rms.unwrap_or(f64::INFINITY),
            RankMetric::Linearity => self.linearity.unwrap_or(f64::INFINITY),
        }
    }
}

/// Results of a finished sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub rows: Vec<BatchRow>,
}

impl BatchSummary {
    pub fn locked_count(&self) -> usize {
        self.rows.iter().filter(|row| row.locked).count()
    }

    /// Locked rows ranked best first by `metric`.
    pub fn ranked(&self, metric: RankMetric) -> Vec<&BatchRow> {
        let mut locked: Vec<&BatchRow> = self.rows.iter().filter(|row| row.locked).collect();
        locked.sort_by(|a, b| {
            a.figure(metric)
                .partial_cmp(&b.figure(metric))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        locked
    }

    /// Table of the best locked points for the run log, ordered by `metric`.
    pub fn format_ranked(&self, metric: RankMetric, count: usize) -> String {
        let mut table = String::from("Noise (phi0)  Linearity     S_bias  Report\n");
        for row in self.ranked(metric).into_iter().take(count) {
            let path = row
                .report_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            table.push_str(&format!(
                "{:<12.4e}  {:<12.4e}  {:<6.1}  {}\n",
                row.noise_rms.unwrap_or(f64::NAN),
                row.linearity.unwrap_or(f64::NAN),
                row.squid_bias,
                path
            ));
        }
        table
    }
}

fn failed_row(squid_bias: f64, aflux_offset: f64, sflux_offset: f64) -> BatchRow {
    BatchRow {
        squid_bias,
        aflux_offset,
        sflux_offset,
        locked: false,
        noise_rms: None,
        linearity: None,
        report_path: None,
    }
}

/// Run the procedure at every grid point in order, writing a report for each
/// point that locks and sending progress over `tx`.
pub fn run_batch<D: Daq, A: SquidArray, P: Preamp>(
    config: &Config,
    mut daq: D,
    mut array: A,
    mut preamp: P,
    tx: &Sender<BatchStatus>,
) -> Result<BatchSummary, BatchError> {
    config.validate()?;
    let writer = ReportWriter::new(&config.output_path)?;
    let total = config.grid_size();
    log::info!("Sweeping {total} grid points");

    let mut summary = BatchSummary::default();
    let mut index = 0_usize;

    for &squid_bias in config.squid_bias.iter() {
        for &aflux_offset in config.aflux_offsets.iter() {
            for &sflux_offset in config.sflux_offsets.iter() {
                tx.send(BatchStatus::new(
                    index as f32 / total as f32,
                    index,
                    Stage::Tune,
                ))?;
                log::info!(
                    "Grid point {index}: S_bias {squid_bias}, offsets ({aflux_offset}, {sflux_offset})"
                );

                let settings = config.tune_settings(squid_bias, aflux_offset, sflux_offset);
                let tuner = ArrayTuner::new(daq, array, settings);
                let mut procedure =
                    TuneProcedure::new(tuner, preamp, config.procedure_settings());
                let result = procedure.run();
                let (d, a, p) = procedure.into_parts();
                daq = d;
                array = a;
                preamp = p;

                let (stage, row) = match result? {
                    ProcedureOutcome::Locked(report) => {
                        let path = writer.write(&report, index)?;
                        (
                            Stage::Complete,
                            BatchRow {
                                squid_bias,
                                aflux_offset,
                                sflux_offset,
                                locked: true,
                                noise_rms: Some(report.noise.rms_phi0),
                                linearity: Some(report.sweep.fit.residual_variance),
                                report_path: Some(path),
                            },
                        )
                    }
                    ProcedureOutcome::TuneFailed(_) => {
                        (Stage::Tune, failed_row(squid_bias, aflux_offset, sflux_offset))
                    }
                    ProcedureOutcome::LockFailed { .. } => {
                        (Stage::Lock, failed_row(squid_bias, aflux_offset, sflux_offset))
                    }
                };
                log::info!("Grid point {index} finished at stage {stage}");
                summary.rows.push(row);
                tx.send(BatchStatus::new(
                    (index + 1) as f32 / total as f32,
                    index,
                    stage,
                ))?;
                index += 1;
            }
        }
    }

    log::info!(
        "Sweep finished with {} of {total} points locked",
        summary.locked_count()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::sim::{SimArray, SimDaq, SimPreamp, SimRig, SimSettings};

    #[test]
    fn test_batch_mixed_outcomes() {
        let dir = std::env::temp_dir().join(format!("tune_batch_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = Config::default();
        config.output_path = dir.clone();
        config.squid_bias = vec![100.0];
        // The second offset is unreachable; that point must fail without
        // stopping the sweep
        config.aflux_offsets = vec![0.0, 9999.0];
        config.sflux_offsets = vec![0.0];

        let rig = Arc::new(Mutex::new(SimRig::new(
            config.channels.clone(),
            SimSettings::default(),
        )));
        let (tx, rx) = mpsc::channel();
        let summary = run_batch(
            &config,
            SimDaq::new(rig.clone()),
            SimArray::new(rig.clone()),
            SimPreamp::new(),
            &tx,
        )
        .unwrap();
        drop(tx);

        assert_eq!(summary.rows.len(), 2);
        assert_eq!(summary.locked_count(), 1);
        assert!(summary.rows[0].locked);
        assert!(!summary.rows[1].locked);
        assert!(dir.join("tune_0000.yaml").exists());
        assert!(!dir.join("tune_0001.yaml").exists());

        let updates: Vec<BatchStatus> = rx.try_iter().collect();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates[1].stage, Stage::Complete);
        assert_eq!(updates[3].stage, Stage::Tune);
        assert!((updates[3].progress - 1.0).abs() < 1.0e-6);

        let ranked = summary.ranked(RankMetric::Noise);
        assert_eq!(ranked.len(), 1);
        assert!(summary
            .format_ranked(RankMetric::Noise, 10)
            .contains("tune_0000.yaml"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_ranked_orders_by_each_metric() {
        // Quietest point is the least linear one, so the two orderings differ
        let mut quiet = failed_row(80.0, 0.0, 0.0);
        quiet.locked = true;
        quiet.noise_rms = Some(1.0e-4);
        quiet.linearity = Some(5.0e-6);
        let mut linear = failed_row(90.0, 0.0, 0.0);
        linear.locked = true;
        linear.noise_rms = Some(2.0e-4);
        linear.linearity = Some(1.0e-7);
        let summary = BatchSummary {
            rows: vec![quiet, linear, failed_row(100.0, 0.0, 0.0)],
        };

        let by_noise = summary.ranked(RankMetric::Noise);
        assert_eq!(by_noise.len(), 2);
        assert_eq!(by_noise[0].squid_bias, 80.0);
        assert_eq!(by_noise[1].squid_bias, 90.0);

        let by_linearity = summary.ranked(RankMetric::Linearity);
        assert_eq!(by_linearity[0].squid_bias, 90.0);
        assert_eq!(by_linearity[1].squid_bias, 80.0);
    }

    #[test]
    fn test_batch_requires_output_dir() {
        let mut config = Config::default();
        config.output_path = std::path::PathBuf::from("/surely/not/a/real/directory");
        let rig = Arc::new(Mutex::new(SimRig::new(
            config.channels.clone(),
            SimSettings::default(),
        )));
        let (tx, _rx) = mpsc::channel();
        let result = run_batch(
            &config,
            SimDaq::new(rig.clone()),
            SimArray::new(rig.clone()),
            SimPreamp::new(),
            &tx,
        );
        assert!(matches!(result, Err(BatchError::ReportError(_))));
    }
}
