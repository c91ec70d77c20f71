//! Maximum-likelihood data association.

use crate::association::innovation::InnovationModel;
use crate::association::{
    Association, AssociationConfig, AssociationError, DataAssociation, Hypothesis,
};
use crate::core::key::LandmarkKey;
use crate::core::measurements::Observation;
use crate::core::values::Values;
use crate::manifold::{EuclideanPoint, Pose};
use crate::optimizer::Marginals;
use tracing::trace;

/// Associates every observation independently with the landmark of smallest
/// NIS, provided it passes the individual compatibility gate.
///
/// Several observations of one timestep may bind to the same landmark.
#[derive(Debug, Clone, Default)]
pub struct MaximumLikelihood {
    config: AssociationConfig,
}

impl MaximumLikelihood {
    pub fn new(config: AssociationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }
}

impl<P: Pose> DataAssociation<P> for MaximumLikelihood {
    fn name(&self) -> &'static str {
        "ml"
    }

    fn associate(
        &self,
        estimate: &Values<P>,
        marginals: &Marginals,
        observations: &[Observation<P::Point>],
    ) -> Result<Hypothesis, AssociationError> {
        let model = InnovationModel::new(estimate, marginals)?;
        let gate = self.config.chi2_threshold(P::Point::DIM);

        let mut associations = Vec::with_capacity(observations.len());
        let mut total_nis = 0.0;
        for (index, observation) in observations.iter().enumerate() {
            let mut best: Option<(LandmarkKey, f64)> = None;

            for (key, point) in estimate.landmarks() {
                if model.predicted_range(point) > self.config.max_range() {
                    continue;
                }
                let innovation = model.innovation(index, observation, key)?;
                let Some(nis) = model.nis(&innovation)? else {
                    trace!("z{index} vs {key}: degenerate innovation covariance");
                    continue;
                };
                if nis <= gate && best.map_or(true, |(_, b)| nis < b) {
                    best = Some((key, nis));
                }
            }

            match best {
                Some((key, nis)) => {
                    trace!("z{index} -> {key} (nis {nis:.3}, gate {gate:.3})");
                    total_nis += nis;
                    associations.push(Association::bound(index, key));
                }
                None => associations.push(Association::new_landmark(index)),
            }
        }

        Ok(Hypothesis::new(associations, total_nis))
    }
}
