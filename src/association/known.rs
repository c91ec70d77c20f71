//! Association from ground-truth landmark tags.

use crate::association::{Association, AssociationError, DataAssociation, Hypothesis};
use crate::core::key::LandmarkKey;
use crate::core::measurements::Observation;
use crate::core::values::Values;
use crate::manifold::Pose;
use crate::optimizer::Marginals;
use std::collections::HashMap;

/// Binds observations by their `landmark_id` to the key created for that id.
///
/// Untagged observations and ids seen for the first time become new landmarks.
#[derive(Debug, Clone, Default)]
pub struct KnownAssociation {
    keys: HashMap<usize, LandmarkKey>,
}

impl KnownAssociation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key registered for a ground-truth id.
    pub fn key_for(&self, id: usize) -> Option<LandmarkKey> {
        self.keys.get(&id).copied()
    }
}

impl<P: Pose> DataAssociation<P> for KnownAssociation {
    fn name(&self) -> &'static str {
        "known"
    }

    fn associate(
        &self,
        estimate: &Values<P>,
        _marginals: &Marginals,
        observations: &[Observation<P::Point>],
    ) -> Result<Hypothesis, AssociationError> {
        let associations = observations
            .iter()
            .enumerate()
            .map(|(index, observation)| {
                observation
                    .landmark_id
                    .and_then(|id| self.key_for(id))
                    .filter(|key| estimate.landmark(*key).is_some())
                    .map_or_else(
                        || Association::new_landmark(index),
                        |key| Association::bound(index, key),
                    )
            })
            .collect();
        Ok(Hypothesis::new(associations, 0.0))
    }

    fn on_landmarks_created(
        &mut self,
        observations: &[Observation<P::Point>],
        created: &[(usize, LandmarkKey)],
    ) {
        for &(index, key) in created {
            if let Some(id) = observations.get(index).and_then(|o| o.landmark_id) {
                self.keys.entry(id).or_insert(key);
            }
        }
    }
}
