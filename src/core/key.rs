//! Variable keys and the key manager.
//!
//! Poses and landmarks live in two disjoint identifier spaces. `PoseKey(i)` is the
//! pose after the i-th timestep, `LandmarkKey(j)` the j-th landmark ever created.
//! Both print in the `x{n}` / `l{n}` style used for variable names in factor graphs.

use std::fmt;

/// Identifier of a pose variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoseKey(pub u64);

/// Identifier of a landmark variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LandmarkKey(pub u64);

/// Any variable key. Poses order before landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Pose(PoseKey),
    Landmark(LandmarkKey),
}

impl fmt::Display for PoseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl fmt::Display for LandmarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Pose(key) => key.fmt(f),
            Key::Landmark(key) => key.fmt(f),
        }
    }
}

impl From<PoseKey> for Key {
    fn from(key: PoseKey) -> Self {
        Key::Pose(key)
    }
}

impl From<LandmarkKey> for Key {
    fn from(key: LandmarkKey) -> Self {
        Key::Landmark(key)
    }
}

impl Key {
    pub fn is_pose(&self) -> bool {
        matches!(self, Key::Pose(_))
    }

    pub fn is_landmark(&self) -> bool {
        matches!(self, Key::Landmark(_))
    }
}

/// Allocates monotonically increasing pose and landmark keys.
///
/// Counters only move forward; there is no way to release a key.
#[derive(Debug, Clone, Default)]
pub struct KeyManager {
    poses: u64,
    landmarks: u64,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next pose key.
    pub fn next_pose_key(&mut self) -> PoseKey {
        let key = PoseKey(self.poses);
        self.poses += 1;
        key
    }

    /// Allocate the next landmark key.
    pub fn next_landmark_key(&mut self) -> LandmarkKey {
        let key = LandmarkKey(self.landmarks);
        self.landmarks += 1;
        key
    }

    /// The key `next_pose_key` would return, without allocating it.
    pub fn peek_next_pose_key(&self) -> PoseKey {
        PoseKey(self.poses)
    }

    /// Most recently allocated pose key.
    pub fn current_pose_key(&self) -> Option<PoseKey> {
        self.poses.checked_sub(1).map(PoseKey)
    }

    pub fn pose_count(&self) -> u64 {
        self.poses
    }

    pub fn landmark_count(&self) -> u64 {
        self.landmarks
    }
}
