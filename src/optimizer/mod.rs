//! Incremental nonlinear least-squares solving.
//!
//! The pipeline talks to the solver only through [`IncrementalSolver`]:
//! - `update` absorbs a graph delta (new factors and initial values) and
//!   re-solves;
//! - `relinearize` re-solves without new information;
//! - `current_estimate`, `marginal_covariances`, `current_error` and `factors`
//!   expose the solver state.
//!
//! [`IncrementalSmoother`] is the reference implementation: a dense Gauss-Newton
//! smoother that keeps every factor and performs a bounded number of iterations
//! per update.

use crate::core::factors::FactorGraph;
use crate::core::key::Key;
use crate::core::values::Values;
use crate::manifold::Pose;
use std::fmt;
use thiserror::Error;

pub mod marginals;
pub mod smoother;

pub use marginals::Marginals;
pub use smoother::{IncrementalSmoother, SmootherConfig};

/// Failures reported by an incremental solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// The linear system is singular: some variable is not determined by the
    /// constraints, or a factor references a variable without a value
    #[error("indeterminate linear system{}: {reason}", key_suffix(.key))]
    IndeterminateSystem { key: Option<Key>, reason: String },

    /// An initial value was supplied for a variable the solver already has
    #[error("variable {0} already exists in the solver")]
    DuplicateKey(Key),

    /// A query named a variable the solver does not know
    #[error("variable {0} is not part of the estimate")]
    UnknownKey(Key),
}

fn key_suffix(key: &Option<Key>) -> String {
    match key {
        Some(key) => format!(" near variable {key}"),
        None => String::new(),
    }
}

impl SolverError {
    /// Variable named by the failure, if any.
    pub fn key(&self) -> Option<Key> {
        match self {
            SolverError::IndeterminateSystem { key, .. } => *key,
            SolverError::DuplicateKey(key) | SolverError::UnknownKey(key) => Some(*key),
        }
    }
}

/// Statistics of one solver update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateSummary {
    /// Gauss-Newton iterations performed
    pub iterations: usize,
    /// Total cost before the update, at the initial guesses
    pub initial_error: f64,
    /// Total cost after the update
    pub final_error: f64,
}

impl fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iterations: {}, error: {:.6e} -> {:.6e}",
            self.iterations, self.initial_error, self.final_error
        )
    }
}

/// A solver that absorbs new constraints incrementally.
pub trait IncrementalSolver<P: Pose> {
    /// Add new factors and initial values for new variables, then re-solve.
    fn update(
        &mut self,
        factors: FactorGraph<P>,
        values: Values<P>,
    ) -> Result<UpdateSummary, SolverError>;

    /// Re-solve without new constraints.
    fn relinearize(&mut self) -> Result<UpdateSummary, SolverError> {
        self.update(FactorGraph::new(), Values::new())
    }

    /// Current best estimate of every variable.
    fn current_estimate(&self) -> &Values<P>;

    /// Marginal covariances of `keys`, including their cross terms.
    fn marginal_covariances(&self, keys: &[Key]) -> Result<Marginals, SolverError>;

    /// Total cost of all factors at the current estimate.
    fn current_error(&self) -> Result<f64, SolverError>;

    /// All factors added so far.
    fn factors(&self) -> &FactorGraph<P>;
}
