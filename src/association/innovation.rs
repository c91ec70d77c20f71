//! Innovations of observation-landmark pairings and their covariances.
//!
//! For an observation `z` (in the frame of the current pose `T`) paired with a
//! landmark `l`, the innovation is taken in the world frame:
//!
//! ```text
//! ν = T ⊕ z − l
//! S = J P Jᵀ + J_z R J_zᵀ
//! ```
//!
//! where `P` is the joint marginal covariance of `(T, l)`, `J = [∂ν/∂T, −I]` and
//! `J_z = ∂ν/∂z`. Several pairings sharing the same pose are stacked into one
//! joint innovation, which is what the joint compatibility test evaluates.

use crate::association::AssociationError;
use crate::core::key::{Key, LandmarkKey, PoseKey};
use crate::core::measurements::Observation;
use crate::core::values::Values;
use crate::manifold::{EuclideanPoint, Pose};
use crate::optimizer::{Marginals, SolverError};
use nalgebra::{DMatrix, DVector};

/// Innovation of one observation-landmark pairing.
#[derive(Debug, Clone)]
pub struct Innovation {
    pub observation: usize,
    pub landmark: LandmarkKey,
    /// `T ⊕ z − l`
    pub residual: DVector<f64>,
    /// `∂ν/∂T` in the pose's local chart
    pub pose_jacobian: DMatrix<f64>,
    /// Observation noise mapped into the world frame, `J_z R J_zᵀ`
    pub measurement_covariance: DMatrix<f64>,
}

/// Evaluates innovations against the latest pose of an estimate.
pub struct InnovationModel<'a, P: Pose> {
    estimate: &'a Values<P>,
    marginals: &'a Marginals,
    pose_key: PoseKey,
    pose: P,
}

impl<'a, P: Pose> InnovationModel<'a, P> {
    /// Model anchored at the most recent pose of `estimate`.
    pub fn new(estimate: &'a Values<P>, marginals: &'a Marginals) -> Result<Self, AssociationError> {
        let pose_key = estimate
            .latest_pose_key()
            .ok_or(AssociationError::MissingEstimate(Key::Pose(PoseKey(0))))?;
        let pose = estimate
            .pose(pose_key)
            .cloned()
            .ok_or(AssociationError::MissingEstimate(Key::Pose(pose_key)))?;
        Ok(Self {
            estimate,
            marginals,
            pose_key,
            pose,
        })
    }

    pub fn pose_key(&self) -> PoseKey {
        self.pose_key
    }

    pub fn pose(&self) -> &P {
        &self.pose
    }

    /// Distance from the current pose to the landmark.
    pub fn predicted_range(&self, landmark: &P::Point) -> f64 {
        (landmark.to_dvector() - self.pose.position().to_dvector()).norm()
    }

    /// Innovation of pairing observation `index` with `landmark`.
    pub fn innovation(
        &self,
        index: usize,
        observation: &Observation<P::Point>,
        landmark: LandmarkKey,
    ) -> Result<Innovation, AssociationError> {
        let point = self
            .estimate
            .landmark(landmark)
            .ok_or(AssociationError::MissingEstimate(Key::Landmark(landmark)))?
            .to_dvector();
        let pose = &self.pose;
        let z = &observation.point;

        let residual = pose.transform_from(z).to_dvector() - &point;
        let (pose_jacobian, measurement_jacobian) = pose.transform_from_jacobians(z);
        let measurement_covariance = &measurement_jacobian
            * observation.noise.covariance()
            * measurement_jacobian.transpose();

        Ok(Innovation {
            observation: index,
            landmark,
            residual,
            pose_jacobian,
            measurement_covariance,
        })
    }

    /// NIS of a single pairing, `None` if its covariance is degenerate.
    pub fn nis(&self, innovation: &Innovation) -> Result<Option<f64>, AssociationError> {
        self.joint_nis(&[innovation])
    }

    /// Joint NIS of pairings with distinct landmarks.
    ///
    /// Returns `None` when the joint innovation covariance is not positive definite.
    pub fn joint_nis(&self, innovations: &[&Innovation]) -> Result<Option<f64>, AssociationError> {
        if innovations.is_empty() {
            return Ok(Some(0.0));
        }
        let dim = P::Point::DIM;
        let dof = P::DOF;
        let m = innovations.len();

        let mut keys = Vec::with_capacity(m + 1);
        keys.push(Key::Pose(self.pose_key));
        keys.extend(innovations.iter().map(|i| Key::Landmark(i.landmark)));
        let covariance = self
            .marginals
            .joint_marginal_covariance(&keys)
            .map_err(|e| match e {
                SolverError::UnknownKey(key) => AssociationError::MissingEstimate(key),
                _ => AssociationError::MissingEstimate(Key::Pose(self.pose_key)),
            })?;

        let mut jacobian = DMatrix::zeros(m * dim, dof + m * dim);
        let mut residual = DVector::zeros(m * dim);
        let mut noise = DMatrix::zeros(m * dim, m * dim);
        for (i, innovation) in innovations.iter().enumerate() {
            let row = i * dim;
            jacobian
                .view_mut((row, 0), (dim, dof))
                .copy_from(&innovation.pose_jacobian);
            jacobian
                .view_mut((row, dof + row), (dim, dim))
                .copy_from(&(-DMatrix::<f64>::identity(dim, dim)));
            residual.rows_mut(row, dim).copy_from(&innovation.residual);
            noise
                .view_mut((row, row), (dim, dim))
                .copy_from(&innovation.measurement_covariance);
        }

        let s = &jacobian * covariance * jacobian.transpose() + noise;
        // Symmetrize against round-off before factorizing.
        let s = (&s + s.transpose()) * 0.5;
        if s.iter().any(|v| !v.is_finite()) {
            return Ok(None);
        }
        Ok(s.cholesky()
            .map(|cholesky| residual.dot(&cholesky.solve(&residual))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::noise::NoiseModel;
    use crate::manifold::SE2;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn setup() -> (Values<SE2>, Marginals) {
        let mut estimate = Values::new();
        estimate
            .insert_pose(PoseKey(0), SE2::from_xy_angle(1.0, 0.0, std::f64::consts::FRAC_PI_2))
            .unwrap();
        estimate
            .insert_landmark(LandmarkKey(0), Point2::new(1.0, 2.0))
            .unwrap();
        estimate
            .insert_landmark(LandmarkKey(1), Point2::new(-1.0, 1.0))
            .unwrap();

        // Exact pose, landmarks with unit variance.
        let mut covariance = DMatrix::zeros(7, 7);
        for i in 3..7 {
            covariance[(i, i)] = 1.0;
        }
        let marginals = Marginals::new(
            &[
                (Key::Pose(PoseKey(0)), 3),
                (Key::Landmark(LandmarkKey(0)), 2),
                (Key::Landmark(LandmarkKey(1)), 2),
            ],
            covariance,
        )
        .unwrap();
        (estimate, marginals)
    }

    #[test]
    fn test_innovation_in_world_frame() {
        let (estimate, marginals) = setup();
        let model = InnovationModel::new(&estimate, &marginals).unwrap();
        assert_eq!(model.pose_key(), PoseKey(0));

        // Pose faces +y, so a point 2 m ahead lands at (1, 2).
        let obs = Observation::new(Point2::new(2.0, 0.0), NoiseModel::isotropic(2, 1.0).unwrap());
        let innovation = model.innovation(0, &obs, LandmarkKey(0)).unwrap();
        assert_relative_eq!(innovation.residual, DVector::zeros(2), epsilon = 1e-12);
        assert_relative_eq!(model.nis(&innovation).unwrap().unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(model.predicted_range(&Point2::new(1.0, 2.0)), 2.0);
    }

    #[test]
    fn test_nis_uses_landmark_and_measurement_covariance() {
        let (estimate, marginals) = setup();
        let model = InnovationModel::new(&estimate, &marginals).unwrap();

        // Residual of 2 along x; S = I (landmark) + I (measurement) = 2I.
        let obs = Observation::new(Point2::new(2.0, -2.0), NoiseModel::isotropic(2, 1.0).unwrap());
        let innovation = model.innovation(0, &obs, LandmarkKey(0)).unwrap();
        assert_relative_eq!(innovation.residual, DVector::from_vec(vec![2.0, 0.0]), epsilon = 1e-9);
        assert_relative_eq!(model.nis(&innovation).unwrap().unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_joint_nis_of_independent_pairs_adds_up() {
        let (estimate, marginals) = setup();
        let model = InnovationModel::new(&estimate, &marginals).unwrap();
        let noise = NoiseModel::isotropic(2, 1.0).unwrap();

        let a = model
            .innovation(0, &Observation::new(Point2::new(2.0, -1.0), noise.clone()), LandmarkKey(0))
            .unwrap();
        let b = model
            .innovation(1, &Observation::new(Point2::new(1.0, 2.5), noise), LandmarkKey(1))
            .unwrap();

        let separate = model.nis(&a).unwrap().unwrap() + model.nis(&b).unwrap().unwrap();
        let joint = model.joint_nis(&[&a, &b]).unwrap().unwrap();
        assert_relative_eq!(joint, separate, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_marginal_is_reported() {
        let (mut estimate, marginals) = setup();
        estimate
            .insert_landmark(LandmarkKey(2), Point2::new(0.0, 0.0))
            .unwrap();
        let model = InnovationModel::new(&estimate, &marginals).unwrap();
        let obs = Observation::new(Point2::new(1.0, 0.0), NoiseModel::isotropic(2, 1.0).unwrap());
        let innovation = model.innovation(0, &obs, LandmarkKey(2)).unwrap();
        assert_eq!(
            model.nis(&innovation),
            Err(AssociationError::MissingEstimate(Key::Landmark(LandmarkKey(2))))
        );
    }
}
