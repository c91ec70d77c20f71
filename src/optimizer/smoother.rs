//! Sparse Gauss-Newton incremental smoother.
//!
//! The smoother keeps the full factor graph and the running estimate. Each
//! `update` appends the delta and runs a bounded number of Gauss-Newton
//! iterations on the whole problem, starting from the current estimate. With the
//! default of one iteration per update this behaves like a relinearizing
//! incremental smoother: repeated `relinearize` calls keep refining the estimate.
//!
//! The normal equations `H δ = g` with `H = Σ JᵀJ` and `g = −Σ Jᵀr` are assembled
//! block-sparse and solved by a sparse Cholesky factorization whose symbolic
//! analysis is reused while the graph structure is unchanged. A variable no
//! factor constrains, or a rank-deficient `H`, is reported as
//! [`SolverError::IndeterminateSystem`].

use crate::core::factors::FactorGraph;
use crate::core::key::Key;
use crate::core::values::Values;
use crate::error::SlamError;
use crate::linalg::{HessianBuilder, LinAlgError, SparseCholeskyFactor, SparseCholeskySolver};
use crate::manifold::Pose;
use crate::optimizer::{IncrementalSolver, Marginals, SolverError, UpdateSummary};
use nalgebra::DVector;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Configuration for [`IncrementalSmoother`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmootherConfig {
    /// Gauss-Newton iterations per update
    pub max_iterations_per_update: usize,
    /// Stop iterating once the step norm falls below this value
    pub step_tolerance: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_update: 1,
            step_tolerance: 1e-10,
        }
    }
}

impl SmootherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of Gauss-Newton iterations per update (at least one)
    pub fn with_max_iterations_per_update(mut self, iterations: usize) -> Self {
        self.max_iterations_per_update = iterations.max(1);
        self
    }

    pub fn with_step_tolerance(mut self, tolerance: f64) -> Self {
        self.step_tolerance = tolerance;
        self
    }
}

/// Reference [`IncrementalSolver`] over sparse normal equations.
#[derive(Debug, Clone)]
pub struct IncrementalSmoother<P: Pose> {
    config: SmootherConfig,
    graph: FactorGraph<P>,
    estimate: Values<P>,
    linear_solver: SparseCholeskySolver,
    updates: usize,
}

impl<P: Pose> Default for IncrementalSmoother<P> {
    fn default() -> Self {
        Self::with_config(SmootherConfig::default())
    }
}

impl<P: Pose> IncrementalSmoother<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SmootherConfig) -> Self {
        Self {
            config,
            graph: FactorGraph::new(),
            estimate: Values::new(),
            linear_solver: SparseCholeskySolver::new(),
            updates: 0,
        }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Number of `update` / `relinearize` calls so far.
    pub fn update_count(&self) -> usize {
        self.updates
    }

    /// Variables in solve order with their tangent dimensions.
    fn layout(&self) -> Vec<(Key, usize)> {
        self.estimate
            .keys()
            .into_iter()
            .filter_map(|key| self.estimate.dim_of(key).map(|dim| (key, dim)))
            .collect()
    }

    fn check_factor_keys(&self) -> Result<(), SolverError> {
        for factor in &self.graph {
            if let Some(key) = factor
                .keys()
                .into_iter()
                .find(|k| !self.estimate.contains(*k))
            {
                return Err(SolverError::IndeterminateSystem {
                    key: Some(key),
                    reason: format!("{factor} references a variable without a value"),
                });
            }
        }
        Ok(())
    }

    /// Assemble `H` and `g` at the current estimate.
    fn normal_equations(
        &self,
        layout: &[(Key, usize)],
    ) -> Result<(HessianBuilder, DVector<f64>), SolverError> {
        let mut offsets = HashMap::with_capacity(layout.len());
        let mut total = 0;
        for &(key, dim) in layout {
            offsets.insert(key, total);
            total += dim;
        }

        let mut hessian = HessianBuilder::new(total);
        let mut gradient = DVector::zeros(total);

        for factor in &self.graph {
            let linearized = factor.linearize(&self.estimate).map_err(to_solver_error)?;
            let r = &linearized.residual;

            for (key_i, j_i) in &linearized.jacobians {
                let offset_i = offset_of(&offsets, *key_i)?;
                let mut g_block = gradient.rows_mut(offset_i, j_i.ncols());
                g_block -= j_i.transpose() * r;

                for (key_j, j_j) in &linearized.jacobians {
                    let offset_j = offset_of(&offsets, *key_j)?;
                    hessian.add_block(offset_i, offset_j, &(j_i.transpose() * j_j));
                }
            }
        }

        Ok((hessian, gradient))
    }

    /// One Gauss-Newton step; returns the step norm.
    fn gauss_newton_step(&mut self) -> Result<f64, SolverError> {
        let layout = self.layout();
        let (hessian, gradient) = self.normal_equations(&layout)?;
        let delta = factorize(&mut self.linear_solver, &hessian, &layout)?
            .solve(&gradient)
            .map_err(|e| linalg_error(e, &layout))?;

        let mut offset = 0;
        for &(key, dim) in &layout {
            let step = delta.rows(offset, dim).into_owned();
            self.estimate.retract(key, &step).map_err(to_solver_error)?;
            offset += dim;
        }
        Ok(delta.norm())
    }
}

impl<P: Pose> IncrementalSolver<P> for IncrementalSmoother<P> {
    fn update(
        &mut self,
        factors: FactorGraph<P>,
        values: Values<P>,
    ) -> Result<UpdateSummary, SolverError> {
        self.estimate.extend(values).map_err(|e| match e {
            SlamError::DuplicateKey(key) => SolverError::DuplicateKey(key),
            other => to_solver_error(other),
        })?;
        let new_factors = factors.len();
        self.graph.extend(factors);
        self.updates += 1;

        self.check_factor_keys()?;
        if self.graph.is_empty() {
            return Ok(UpdateSummary {
                iterations: 0,
                initial_error: 0.0,
                final_error: 0.0,
            });
        }

        let initial_error = self.current_error()?;
        let mut iterations = 0;
        while iterations < self.config.max_iterations_per_update {
            let step_norm = self.gauss_newton_step()?;
            iterations += 1;
            trace!("gauss-newton iteration {iterations}: |δ| = {step_norm:.3e}");
            if step_norm < self.config.step_tolerance {
                break;
            }
        }
        let final_error = self.current_error()?;

        let summary = UpdateSummary {
            iterations,
            initial_error,
            final_error,
        };
        debug!(
            "update #{} (+{new_factors} factors, {} variables): {summary}",
            self.updates,
            self.estimate.len()
        );
        Ok(summary)
    }

    fn current_estimate(&self) -> &Values<P> {
        &self.estimate
    }

    fn marginal_covariances(&self, keys: &[Key]) -> Result<Marginals, SolverError> {
        if keys.is_empty() {
            return Ok(Marginals::default());
        }
        if let Some(&key) = keys.iter().find(|k| !self.estimate.contains(**k)) {
            return Err(SolverError::UnknownKey(key));
        }
        self.check_factor_keys()?;

        let layout = self.layout();
        let (hessian, _) = self.normal_equations(&layout)?;
        let mut linear_solver = self.linear_solver.clone();
        let factor = factorize(&mut linear_solver, &hessian, &layout)?;
        Marginals::from_factor(&layout, factor, keys)
    }

    fn current_error(&self) -> Result<f64, SolverError> {
        self.graph.error(&self.estimate).map_err(to_solver_error)
    }

    fn factors(&self) -> &FactorGraph<P> {
        &self.graph
    }
}

/// Factorize `H`, naming the variable of an empty column when there is one.
fn factorize(
    solver: &mut SparseCholeskySolver,
    hessian: &HessianBuilder,
    layout: &[(Key, usize)],
) -> Result<SparseCholeskyFactor, SolverError> {
    if let Some(column) = hessian.empty_column() {
        return Err(linalg_error(
            LinAlgError::NotPositiveDefinite {
                column: Some(column),
            },
            layout,
        ));
    }
    let matrix = hessian.build().map_err(|e| linalg_error(e, layout))?;
    solver
        .factorize(&matrix)
        .map_err(|e| linalg_error(e, layout))
}

fn offset_of(offsets: &HashMap<Key, usize>, key: Key) -> Result<usize, SolverError> {
    offsets.get(&key).copied().ok_or(SolverError::UnknownKey(key))
}

fn to_solver_error(error: SlamError) -> SolverError {
    match error {
        SlamError::MissingKey(key) => SolverError::IndeterminateSystem {
            key: Some(key),
            reason: "variable has no value".to_string(),
        },
        other => SolverError::IndeterminateSystem {
            key: None,
            reason: other.to_string(),
        },
    }
}

/// Map a factorization failure to the variable owning the failing column.
fn linalg_error(error: LinAlgError, layout: &[(Key, usize)]) -> SolverError {
    let key = match &error {
        LinAlgError::NotPositiveDefinite {
            column: Some(column),
        } => {
            let mut offset = 0;
            layout.iter().find_map(|&(key, dim)| {
                let owns = (offset..offset + dim).contains(column);
                offset += dim;
                owns.then_some(key)
            })
        }
        _ => None,
    };
    SolverError::IndeterminateSystem {
        key,
        reason: error.to_string(),
    }
}
