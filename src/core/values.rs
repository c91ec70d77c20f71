//! Containers for variable values.
//!
//! `Values` maps pose keys to poses and landmark keys to points. It is used both
//! for the solver's running estimate and for the initial guesses carried by a
//! graph delta.

use crate::core::key::{Key, LandmarkKey, PoseKey};
use crate::error::{SlamError, SlamResult};
use crate::manifold::{EuclideanPoint, LieGroup, Pose};
use nalgebra::DVector;
use std::collections::BTreeMap;

/// A single variable value, either a pose or a landmark position.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable<P: Pose> {
    Pose(P),
    Point(P::Point),
}

impl<P: Pose> Variable<P> {
    /// Tangent dimension of the variable.
    pub fn dim(&self) -> usize {
        match self {
            Variable::Pose(_) => P::DOF,
            Variable::Point(_) => P::Point::DIM,
        }
    }
}

/// Pose and landmark values keyed by their identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Values<P: Pose> {
    poses: BTreeMap<PoseKey, P>,
    landmarks: BTreeMap<LandmarkKey, P::Point>,
}

impl<P: Pose> Default for Values<P> {
    fn default() -> Self {
        Self {
            poses: BTreeMap::new(),
            landmarks: BTreeMap::new(),
        }
    }
}

impl<P: Pose> Values<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pose(&mut self, key: PoseKey, pose: P) -> SlamResult<()> {
        if self.poses.contains_key(&key) {
            return Err(SlamError::DuplicateKey(key.into()));
        }
        self.poses.insert(key, pose);
        Ok(())
    }

    pub fn insert_landmark(&mut self, key: LandmarkKey, point: P::Point) -> SlamResult<()> {
        if self.landmarks.contains_key(&key) {
            return Err(SlamError::DuplicateKey(key.into()));
        }
        self.landmarks.insert(key, point);
        Ok(())
    }

    /// Insert any variable, rejecting keys that are already present.
    pub fn insert(&mut self, key: Key, value: Variable<P>) -> SlamResult<()> {
        match (key, value) {
            (Key::Pose(key), Variable::Pose(pose)) => self.insert_pose(key, pose),
            (Key::Landmark(key), Variable::Point(point)) => self.insert_landmark(key, point),
            (key, _) => Err(SlamError::InvalidInput(format!(
                "value kind does not match key {key}"
            ))),
        }
    }

    pub fn pose(&self, key: PoseKey) -> Option<&P> {
        self.poses.get(&key)
    }

    pub fn landmark(&self, key: LandmarkKey) -> Option<&P::Point> {
        self.landmarks.get(&key)
    }

    pub fn get(&self, key: Key) -> Option<Variable<P>> {
        match key {
            Key::Pose(key) => self.pose(key).cloned().map(Variable::Pose),
            Key::Landmark(key) => self.landmark(key).copied().map(Variable::Point),
        }
    }

    /// Pose for `key`, or `MissingKey`.
    pub fn require_pose(&self, key: PoseKey) -> SlamResult<&P> {
        self.pose(key)
            .ok_or_else(|| SlamError::MissingKey(key.into()))
    }

    /// Landmark for `key`, or `MissingKey`.
    pub fn require_landmark(&self, key: LandmarkKey) -> SlamResult<&P::Point> {
        self.landmark(key)
            .ok_or_else(|| SlamError::MissingKey(key.into()))
    }

    pub fn contains(&self, key: Key) -> bool {
        match key {
            Key::Pose(key) => self.poses.contains_key(&key),
            Key::Landmark(key) => self.landmarks.contains_key(&key),
        }
    }

    /// All keys, poses first, each space in ascending order.
    pub fn keys(&self) -> Vec<Key> {
        self.poses
            .keys()
            .map(|&k| Key::Pose(k))
            .chain(self.landmarks.keys().map(|&k| Key::Landmark(k)))
            .collect()
    }

    pub fn pose_keys(&self) -> impl Iterator<Item = PoseKey> + '_ {
        self.poses.keys().copied()
    }

    pub fn landmark_keys(&self) -> impl Iterator<Item = LandmarkKey> + '_ {
        self.landmarks.keys().copied()
    }

    pub fn poses(&self) -> impl Iterator<Item = (PoseKey, &P)> {
        self.poses.iter().map(|(k, v)| (*k, v))
    }

    pub fn landmarks(&self) -> impl Iterator<Item = (LandmarkKey, &P::Point)> {
        self.landmarks.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.poses.len() + self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty() && self.landmarks.is_empty()
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    pub fn latest_pose_key(&self) -> Option<PoseKey> {
        self.poses.keys().next_back().copied()
    }

    /// Tangent dimension of the variable stored under `key`.
    pub fn dim_of(&self, key: Key) -> Option<usize> {
        self.contains(key).then(|| match key {
            Key::Pose(_) => P::DOF,
            Key::Landmark(_) => P::Point::DIM,
        })
    }

    /// Move every value of `other` into `self`, failing on the first shared key.
    ///
    /// On error `self` is left unchanged.
    pub fn extend(&mut self, other: Values<P>) -> SlamResult<()> {
        if let Some(key) = other.keys().into_iter().find(|k| self.contains(*k)) {
            return Err(SlamError::DuplicateKey(key));
        }
        self.poses.extend(other.poses);
        self.landmarks.extend(other.landmarks);
        Ok(())
    }

    /// Poses in key order.
    pub fn trajectory(&self) -> Vec<(PoseKey, P)> {
        self.poses.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    /// Landmark positions in key order.
    pub fn landmark_points(&self) -> Vec<(LandmarkKey, P::Point)> {
        self.landmarks.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Apply a tangent increment to the variable under `key`.
    pub(crate) fn retract(&mut self, key: Key, delta: &DVector<f64>) -> SlamResult<()> {
        match key {
            Key::Pose(k) => {
                let pose = self
                    .poses
                    .get_mut(&k)
                    .ok_or(SlamError::MissingKey(key))?;
                *pose = pose.retract(delta);
            }
            Key::Landmark(k) => {
                let point = self
                    .landmarks
                    .get_mut(&k)
                    .ok_or(SlamError::MissingKey(key))?;
                *point = point.retract(delta);
            }
        }
        Ok(())
    }
}
