//! SE(3) - Special Euclidean Group in 3D
//!
//! Spatial rigid transformations stored as a `nalgebra::Isometry3`.
//! Tangent elements are `[x, y, z, ωx, ωy, ωz]` where `ω` is a scaled rotation axis.

use crate::manifold::{LieGroup, Pose};
use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix3, Point3, Quaternion, Translation3, UnitQuaternion,
    Vector3,
};
use std::fmt;

/// SE(3) group element representing rigid body transformations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    isometry: Isometry3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation();
        let q = self.rotation_quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [{:.4}, {:.4}, {:.4}, {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

impl From<Isometry3<f64>> for SE3 {
    fn from(isometry: Isometry3<f64>) -> Self {
        Self { isometry }
    }
}

impl SE3 {
    /// Space dimension - dimension of the ambient space that the group acts on
    pub const DIM: usize = 3;

    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            isometry: Isometry3::from_parts(Translation3::from(translation), rotation),
        }
    }

    /// Create from a translation and a (not necessarily normalized) quaternion.
    pub fn from_translation_quaternion(
        translation: Vector3<f64>,
        quaternion: Quaternion<f64>,
    ) -> Self {
        Self::new(translation, UnitQuaternion::from_quaternion(quaternion))
    }

    /// Create from translation and roll / pitch / yaw angles.
    pub fn from_translation_euler(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(
            Vector3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }

    pub fn isometry(&self) -> &Isometry3<f64> {
        &self.isometry
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.isometry.translation.vector
    }

    pub fn rotation_quaternion(&self) -> UnitQuaternion<f64> {
        self.isometry.rotation
    }

    pub fn x(&self) -> f64 {
        self.isometry.translation.vector.x
    }

    pub fn y(&self) -> f64 {
        self.isometry.translation.vector.y
    }

    pub fn z(&self) -> f64 {
        self.isometry.translation.vector.z
    }

    fn rotation_matrix(&self) -> Matrix3<f64> {
        self.isometry.rotation.to_rotation_matrix().into_inner()
    }

    fn chart(delta: &DVector<f64>) -> Isometry3<f64> {
        Isometry3::new(
            Vector3::new(delta[0], delta[1], delta[2]),
            Vector3::new(delta[3], delta[4], delta[5]),
        )
    }
}

impl LieGroup for SE3 {
    const DOF: usize = 6;

    fn identity() -> Self {
        Self {
            isometry: Isometry3::identity(),
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
        let t = relative.translation.vector;
        let omega = relative.rotation.scaled_axis();
        DVector::from_vec(vec![t.x, t.y, t.z, omega.x, omega.y, omega.z])
    }
}

impl Pose for SE3 {
    type Point = Point3<f64>;

    fn transform_from(&self, point: &Point3<f64>) -> Point3<f64> {
        self.isometry.transform_point(point)
    }

    fn transform_to(&self, point: &Point3<f64>) -> Point3<f64> {
        self.isometry.inverse_transform_point(point)
    }

    fn transform_to_jacobians(&self, point: &Point3<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let p = self.transform_to(point);
        let d_pose = pose_jacobian(-Matrix3::identity(), p.coords.cross_matrix());
        let r_t = self.rotation_matrix().transpose();
        (d_pose, DMatrix::from_column_slice(3, 3, r_t.as_slice()))
    }

    fn transform_from_jacobians(&self, point: &Point3<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let r = self.rotation_matrix();
        let d_pose = pose_jacobian(r, -(r * point.coords.cross_matrix()));
        (d_pose, DMatrix::from_column_slice(3, 3, r.as_slice()))
    }
}

/// 3 x 6 Jacobian `[translation | rotation]` of a point map.
fn pose_jacobian(translation: Matrix3<f64>, rotation: Matrix3<f64>) -> DMatrix<f64> {
    let mut j = DMatrix::zeros(3, 6);
    j.view_mut((0, 0), (3, 3)).copy_from(&translation);
    j.view_mut((0, 3), (3, 3)).copy_from(&rotation);
    j
}
