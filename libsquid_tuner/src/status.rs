//! Progress reporting from a running sweep to the frontend.

use std::fmt::{Display, Formatter};

/// How far a grid point has gotten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Tune,
    Lock,
    Complete,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Tune => write!(f, "tune"),
            Stage::Lock => write!(f, "lock"),
            Stage::Complete => write!(f, "complete"),
        }
    }
}

/// Status of a running sweep, sent over a channel as points finish.
#[derive(Debug, Clone, Default)]
pub struct BatchStatus {
    /// Fraction of the grid finished.
    pub progress: f32,
    /// Index of the grid point being worked.
    pub point: usize,
    pub stage: Stage,
}

impl BatchStatus {
    pub fn new(progress: f32, point: usize, stage: Stage) -> Self {
        Self {
            progress,
            point,
            stage,
        }
    }
}
