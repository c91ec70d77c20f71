//! Pending graph delta between solver updates.

use crate::core::factors::{Factor, FactorGraph};
use crate::core::key::{LandmarkKey, PoseKey};
use crate::core::values::Values;
use crate::error::SlamResult;
use crate::manifold::Pose;

/// Buffers new factors and initial values until the next solver update.
///
/// Factors keep their insertion order. No referential checks are made here;
/// a factor whose keys have no value anywhere is caught by the solver.
#[derive(Debug, Clone)]
pub struct GraphAccumulator<P: Pose> {
    factors: FactorGraph<P>,
    values: Values<P>,
}

impl<P: Pose> Default for GraphAccumulator<P> {
    fn default() -> Self {
        Self {
            factors: FactorGraph::new(),
            values: Values::new(),
        }
    }
}

impl<P: Pose> GraphAccumulator<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_factor(&mut self, factor: Factor<P>) {
        self.factors.push(factor);
    }

    /// Initial guess for a new pose. A key may only be given one value per delta.
    pub fn add_pose(&mut self, key: PoseKey, pose: P) -> SlamResult<()> {
        self.values.insert_pose(key, pose)
    }

    /// Initial guess for a new landmark.
    pub fn add_landmark(&mut self, key: LandmarkKey, point: P::Point) -> SlamResult<()> {
        self.values.insert_landmark(key, point)
    }

    /// Hand over the pending delta and start a new empty one.
    pub fn flush(&mut self) -> (FactorGraph<P>, Values<P>) {
        let delta = std::mem::take(self);
        (delta.factors, delta.values)
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty() && self.values.is_empty()
    }

    pub fn pending_factors(&self) -> &FactorGraph<P> {
        &self.factors
    }

    pub fn pending_values(&self) -> &Values<P> {
        &self.values
    }
}
