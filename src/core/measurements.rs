//! Sensor input consumed by the pipeline, one `Timestep` at a time.

use crate::core::noise::NoiseModel;
use crate::manifold::{SE2, SE3};
use crate::manifold::{EuclideanPoint, LieGroup, Pose};
use nalgebra::{Point2, Point3};

/// Relative motion between two consecutive poses, in the frame of the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Odometry<P: Pose> {
    pub relative_pose: P,
    pub noise: NoiseModel,
}

impl<P: Pose> Odometry<P> {
    pub fn new(relative_pose: P, noise: NoiseModel) -> Self {
        Self {
            relative_pose,
            noise,
        }
    }

    /// Whether the noise model matches the pose tangent dimension.
    pub fn is_consistent(&self) -> bool {
        self.noise.dim() == P::DOF
    }
}

/// A landmark position measured in the frame of the observing pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<Pt: EuclideanPoint> {
    pub point: Pt,
    pub noise: NoiseModel,
    /// Ground-truth landmark tag, only read by known-association.
    pub landmark_id: Option<usize>,
}

impl<Pt: EuclideanPoint> Observation<Pt> {
    pub fn new(point: Pt, noise: NoiseModel) -> Self {
        Self {
            point,
            noise,
            landmark_id: None,
        }
    }

    pub fn with_landmark_id(mut self, id: usize) -> Self {
        self.landmark_id = Some(id);
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.noise.dim() == Pt::DIM
    }
}

/// Everything sensed between two pipeline steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestep<P: Pose> {
    pub step: usize,
    pub odometry: Option<Odometry<P>>,
    pub observations: Vec<Observation<P::Point>>,
}

impl<P: Pose> Timestep<P> {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            odometry: None,
            observations: Vec::new(),
        }
    }

    pub fn with_odometry(mut self, relative_pose: P, noise: NoiseModel) -> Self {
        self.odometry = Some(Odometry::new(relative_pose, noise));
        self
    }

    pub fn with_observation(mut self, observation: Observation<P::Point>) -> Self {
        self.observations.push(observation);
        self
    }

    pub fn with_observations<I>(mut self, observations: I) -> Self
    where
        I: IntoIterator<Item = Observation<P::Point>>,
    {
        self.observations.extend(observations);
        self
    }

    /// Pose increment carried by this timestep, identity when there is none.
    pub fn motion(&self) -> P {
        self.odometry
            .as_ref()
            .map(|o| o.relative_pose.clone())
            .unwrap_or_else(P::identity)
    }
}

pub type Observation2D = Observation<Point2<f64>>;
pub type Observation3D = Observation<Point3<f64>>;
pub type Timestep2D = Timestep<SE2>;
pub type Timestep3D = Timestep<SE3>;
