//! SE(2) - Special Euclidean Group in 2D
//!
//! Planar rigid transformations stored as a `nalgebra::Isometry2`.
//! Tangent elements are `[x, y, θ]`: translation first, rotation last.

use crate::manifold::{LieGroup, Pose};
use nalgebra::{DMatrix, DVector, Isometry2, Matrix2, Point2, Rotation2, Vector2};
use std::fmt;

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2 {
    isometry: Isometry2<f64>,
}

impl fmt::Display for SE2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.x(),
            self.y(),
            self.angle()
        )
    }
}

impl From<Isometry2<f64>> for SE2 {
    fn from(isometry: Isometry2<f64>) -> Self {
        Self { isometry }
    }
}

impl SE2 {
    /// Space dimension - dimension of the ambient space that the group acts on
    pub const DIM: usize = 2;

    /// Create SE2 from translation components and angle.
    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        Self {
            isometry: Isometry2::new(Vector2::new(x, y), theta),
        }
    }

    /// Pure translation.
    pub fn translation(x: f64, y: f64) -> Self {
        Self::from_xy_angle(x, y, 0.0)
    }

    pub fn isometry(&self) -> &Isometry2<f64> {
        &self.isometry
    }

    /// Get the x component of translation.
    pub fn x(&self) -> f64 {
        self.isometry.translation.vector.x
    }

    /// Get the y component of translation.
    pub fn y(&self) -> f64 {
        self.isometry.translation.vector.y
    }

    /// Get the rotation angle in radians, in `(-π, π]`.
    pub fn angle(&self) -> f64 {
        self.isometry.rotation.angle()
    }

    fn chart(delta: &DVector<f64>) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(delta[0], delta[1]), delta[2])
    }

    fn rotation_matrix(&self) -> Matrix2<f64> {
        self.isometry.rotation.to_rotation_matrix().into_inner()
    }
}

/// 3 x 3 Jacobian from a rotation/translation block and a rotation column.
fn jacobian(translation: Matrix2<f64>, rotation: Vector2<f64>, angle: f64) -> DMatrix<f64> {
    let mut j = DMatrix::zeros(3, 3);
    j.view_mut((0, 0), (2, 2)).copy_from(&translation);
    j.view_mut((0, 2), (2, 1)).copy_from(&rotation);
    j[(2, 2)] = angle;
    j
}

impl LieGroup for SE2 {
    const DOF: usize = 3;

    fn identity() -> Self {
        Self {
            isometry: Isometry2::identity(),
        }
    }

    fn compose(&self, other: &Self) -> Self {
        Self {
            isometry: self.isometry * other.isometry,
        }
    }

    fn inverse(&self) -> Self {
        Self {
            isometry: self.isometry.inverse(),
        }
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        Self {
            isometry: self.isometry * Self::chart(delta),
        }
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        let relative = self.isometry.inverse() * other.isometry;
        DVector::from_vec(vec![
            relative.translation.vector.x,
            relative.translation.vector.y,
            relative.rotation.angle(),
        ])
    }

    fn between_jacobians(&self, from: &Self, to: &Self) -> (DMatrix<f64>, DMatrix<f64>) {
        let relative = from.between(to);
        let t = relative.isometry.translation.vector;
        let measured_t = self.rotation_matrix().transpose();
        let error_rotation = Rotation2::new(relative.angle() - self.angle()).into_inner();

        let d_from = jacobian(-measured_t, measured_t * Vector2::new(t.y, -t.x), -1.0);
        let d_to = jacobian(error_rotation, Vector2::zeros(), 1.0);
        (d_from, d_to)
    }
}

impl Pose for SE2 {
    type Point = Point2<f64>;

    fn transform_from(&self, point: &Point2<f64>) -> Point2<f64> {
        self.isometry.transform_point(point)
    }

    fn transform_to(&self, point: &Point2<f64>) -> Point2<f64> {
        self.isometry.inverse_transform_point(point)
    }

    fn transform_to_jacobians(&self, point: &Point2<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let p = self.transform_to(point);
        let mut d_pose = DMatrix::zeros(2, 3);
        d_pose
            .view_mut((0, 0), (2, 2))
            .copy_from(&(-Matrix2::<f64>::identity()));
        d_pose[(0, 2)] = p.y;
        d_pose[(1, 2)] = -p.x;
        let r_t = self.rotation_matrix().transpose();
        let d_point = DMatrix::from_column_slice(2, 2, r_t.as_slice());
        (d_pose, d_point)
    }

    fn transform_from_jacobians(&self, point: &Point2<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let r = self.rotation_matrix();
        let mut d_pose = DMatrix::zeros(2, 3);
        d_pose.view_mut((0, 0), (2, 2)).copy_from(&r);
        d_pose
            .view_mut((0, 2), (2, 1))
            .copy_from(&(r * Vector2::new(-point.y, point.x)));
        let d_point = DMatrix::from_column_slice(2, 2, r.as_slice());
        (d_pose, d_point)
    }
}
