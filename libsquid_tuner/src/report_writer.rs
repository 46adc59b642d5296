//! Persists tune reports, one YAML file per locked grid point.

use std::path::{Path, PathBuf};

use super::error::ReportError;
use super::procedure::TuneReport;

/// Writes reports into an existing output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: &Path) -> Result<Self, ReportError> {
        if !output_dir.exists() {
            return Err(ReportError::BadOutputDir(output_dir.to_path_buf()));
        }
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Report file for one grid point, named by its zero padded index.
    pub fn report_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("tune_{index:0>4}.yaml"))
    }

    pub fn write(&self, report: &TuneReport, index: usize) -> Result<PathBuf, ReportError> {
        let path = self.report_path(index);
        let yaml = serde_yaml::to_string(report)?;
        std::fs::write(&path, yaml)?;
        log::info!("Wrote report {path:?}");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::{MutualSweep, NoiseReport, SweepFit};
    use crate::trace::CharacteristicTrace;
    use crate::tuner::TuneOutcome;

    fn sample_report() -> TuneReport {
        TuneReport {
            timestamp: String::from("2026-01-05T16:30:00Z"),
            squid_bias: 100.0,
            aflux_offset: 0.0,
            sflux_offset: 0.0,
            tune: TuneOutcome::Converged {
                attempts_used: 1,
                error: 0.002,
            },
            lock: TuneOutcome::Converged {
                attempts_used: 2,
                error: 0.01,
            },
            characteristic: CharacteristicTrace::new(vec![0.0, 1.0], vec![0.5, 0.7]),
            noise: NoiseReport {
                mean_phi0: 0.0,
                std_phi0: 7.0e-5,
                rms_phi0: 7.0e-5,
                peak_to_peak_phi0: 4.0e-4,
                preamp_overloaded: false,
            },
            sweep: MutualSweep {
                current: vec![-1.0e-6, 1.0e-6],
                response: vec![-1.0e-4, 1.0e-4],
                fit: SweepFit {
                    slope: 100.0,
                    intercept: 0.0,
                    residual_variance: 0.0,
                },
            },
            conversion: None,
        }
    }

    #[test]
    fn test_report_path_padding() {
        let writer = ReportWriter::new(Path::new(".")).unwrap();
        assert!(writer.report_path(7).ends_with("tune_0007.yaml"));
        assert!(writer.report_path(12345).ends_with("tune_12345.yaml"));
    }

    #[test]
    fn test_missing_output_dir() {
        assert!(matches!(
            ReportWriter::new(Path::new("/surely/not/a/real/directory")),
            Err(ReportError::BadOutputDir(_))
        ));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = std::env::temp_dir().join(format!("tune_writer_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let writer = ReportWriter::new(&dir).unwrap();

        let path = writer.write(&sample_report(), 3).unwrap();
        assert!(path.ends_with("tune_0003.yaml"));
        let yaml = std::fs::read_to_string(&path).unwrap();
        let parsed: TuneReport = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            parsed.lock,
            TuneOutcome::Converged {
                attempts_used: 2,
                error: 0.01
            }
        );
        assert_eq!(parsed.characteristic.response, vec![0.5, 0.7]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
