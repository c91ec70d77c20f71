//! Pipeline configuration.

use crate::core::noise::NoiseModel;
use crate::error::SlamResult;
use crate::manifold::{SE2, SE3};

/// Extra relinearization passes run after a timestep that closed a loop.
pub const LOOP_CLOSURE_RELINEARIZATION_PASSES: usize = 20;

/// Configuration of the timestep pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlamConfig {
    /// Solver passes without new constraints after a loop closure
    pub loop_closure_passes: usize,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            loop_closure_passes: LOOP_CLOSURE_RELINEARIZATION_PASSES,
        }
    }
}

impl SlamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loop_closure_passes(mut self, passes: usize) -> Self {
        self.loop_closure_passes = passes;
        self
    }
}

/// Prior on the first pose used by dataset runs.
pub trait PosePrior {
    fn default_prior_noise() -> SlamResult<NoiseModel>;
}

impl PosePrior for SE2 {
    /// Variances 1e-6 on translation and 1e-8 on heading.
    fn default_prior_noise() -> SlamResult<NoiseModel> {
        NoiseModel::from_variances(&[1e-6, 1e-6, 1e-8])
    }
}

impl PosePrior for SE3 {
    /// Variances 1e-4 on translation and 1e-6 on rotation.
    fn default_prior_noise() -> SlamResult<NoiseModel> {
        NoiseModel::from_variances(&[1e-4, 1e-4, 1e-4, 1e-6, 1e-6, 1e-6])
    }
}
