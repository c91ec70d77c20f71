//! Rigid-body poses and Euclidean points used as graph variables.
//!
//! This module provides the two pose groups the estimator runs on:
//! - **SE(2)**: planar rigid transformations, tangent `[x, y, θ]`
//! - **SE(3)**: spatial rigid transformations, tangent `[x, y, z, ωx, ωy, ωz]`
//!
//! Both store a `nalgebra` isometry and expose the operations the pipeline relies
//! on: composition, inverse, point transformation, and a local chart
//! (`retract` / `local`) used by the solver to apply increments.
//!
//! Group  | DOF | points      | retract(δ)                | local(other)
//! ------ | --- | ----------- | ------------------------- | ---------------------------
//! SE(2)  | 3   | `Point2`    | `X ∘ Iso2(δxy, δθ)`        | chart⁻¹(X⁻¹ ∘ Y)
//! SE(3)  | 6   | `Point3`    | `X ∘ Iso3(δxyz, δω)`       | chart⁻¹(X⁻¹ ∘ Y)
//!
//! Points are plain Euclidean vectors; their increments are additive.

use nalgebra::{DMatrix, DVector, Point2, Point3};
use std::fmt::Debug;

pub mod se2;
pub mod se3;

pub use se2::SE2;
pub use se3::SE3;

/// Step used for central-difference Jacobians.
const NUMERICAL_DIFF_STEP: f64 = 1e-6;

/// Core trait for the Lie groups used as pose variables.
///
/// `retract` and `local` form a chart around `self`: for any pose `x` and small
/// tangent `δ`, `x.local(&x.retract(δ)) == δ`.
pub trait LieGroup: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Degrees of freedom - dimension of the tangent space
    const DOF: usize;

    /// Neutral element e such that e ∘ g = g ∘ e = g.
    fn identity() -> Self;

    /// Group composition `self ∘ other`.
    fn compose(&self, other: &Self) -> Self;

    /// Group inverse.
    fn inverse(&self) -> Self;

    /// Relative transformation `self⁻¹ ∘ other`.
    fn between(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// Apply a tangent increment on the right: `self ∘ chart(δ)`.
    fn retract(&self, delta: &DVector<f64>) -> Self;

    /// Tangent coordinates of `other` around `self`.
    fn local(&self, other: &Self) -> DVector<f64>;

    /// Jacobians of the relative-pose error `self.local(&from.between(to))`
    /// with respect to `from` and `to`, where `self` is the measured motion.
    fn between_jacobians(&self, from: &Self, to: &Self) -> (DMatrix<f64>, DMatrix<f64>) {
        let d_from = numerical_jacobian(Self::DOF, |d| {
            self.local(&from.retract(d).between(to))
        });
        let d_to = numerical_jacobian(Self::DOF, |d| {
            self.local(&from.between(&to.retract(d)))
        });
        (d_from, d_to)
    }
}

/// Euclidean point type acted on by a pose.
pub trait EuclideanPoint: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Number of coordinates
    const DIM: usize;

    fn origin() -> Self;

    fn to_dvector(&self) -> DVector<f64>;

    /// Build a point from the first `DIM` entries of `data`.
    fn from_slice(data: &[f64]) -> Self;

    /// Additive increment.
    fn retract(&self, delta: &DVector<f64>) -> Self {
        let moved = self.to_dvector() + delta;
        Self::from_slice(moved.as_slice())
    }

    /// Distance from the origin.
    fn norm(&self) -> f64 {
        self.to_dvector().norm()
    }
}

impl EuclideanPoint for Point2<f64> {
    const DIM: usize = 2;

    fn origin() -> Self {
        Point2::origin()
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.coords.as_slice())
    }

    fn from_slice(data: &[f64]) -> Self {
        Point2::new(data[0], data[1])
    }
}

impl EuclideanPoint for Point3<f64> {
    const DIM: usize = 3;

    fn origin() -> Self {
        Point3::origin()
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.coords.as_slice())
    }

    fn from_slice(data: &[f64]) -> Self {
        Point3::new(data[0], data[1], data[2])
    }
}

/// A rigid-body pose acting on points of its own dimension.
pub trait Pose: LieGroup {
    /// Point type living in the same space
    type Point: EuclideanPoint;

    /// Map a point from this pose's local frame into the world frame.
    fn transform_from(&self, point: &Self::Point) -> Self::Point;

    /// Map a world-frame point into this pose's local frame.
    fn transform_to(&self, point: &Self::Point) -> Self::Point;

    /// Jacobians of [`Pose::transform_to`] with respect to the pose and the point.
    fn transform_to_jacobians(&self, point: &Self::Point) -> (DMatrix<f64>, DMatrix<f64>) {
        let d_pose = numerical_jacobian(Self::DOF, |d| {
            self.retract(d).transform_to(point).to_dvector()
        });
        let d_point = numerical_jacobian(Self::Point::DIM, |d| {
            self.transform_to(&point.retract(d)).to_dvector()
        });
        (d_pose, d_point)
    }

    /// Jacobians of [`Pose::transform_from`] with respect to the pose and the point.
    fn transform_from_jacobians(&self, point: &Self::Point) -> (DMatrix<f64>, DMatrix<f64>) {
        let d_pose = numerical_jacobian(Self::DOF, |d| {
            self.retract(d).transform_from(point).to_dvector()
        });
        let d_point = numerical_jacobian(Self::Point::DIM, |d| {
            self.transform_from(&point.retract(d)).to_dvector()
        });
        (d_pose, d_point)
    }

    /// Position of the pose origin in the world frame.
    fn position(&self) -> Self::Point {
        self.transform_from(&Self::Point::origin())
    }
}

/// Central-difference Jacobian of `f` around a zero increment of size `dim`.
///
/// `f` receives the tangent increment and returns the function value at the
/// perturbed point; the result has one column per tangent coordinate.
pub fn numerical_jacobian<F>(dim: usize, f: F) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let mut columns = Vec::with_capacity(dim);
    for i in 0..dim {
        let mut delta = DVector::zeros(dim);
        delta[i] = NUMERICAL_DIFF_STEP;
        let forward = f(&delta);
        delta[i] = -NUMERICAL_DIFF_STEP;
        let backward = f(&delta);
        columns.push((forward - backward) / (2.0 * NUMERICAL_DIFF_STEP));
    }

    if columns.is_empty() {
        return DMatrix::zeros(f(&DVector::zeros(0)).len(), 0);
    }
    DMatrix::from_columns(&columns)
}
