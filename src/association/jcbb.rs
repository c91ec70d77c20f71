//! Joint compatibility branch and bound (JCBB).
//!
//! The search walks the observations in order. At each level the observation is
//! either paired with one of its individually compatible landmarks (not yet used
//! in the partial hypothesis) or left unpaired. A pairing is only explored if the
//! joint NIS of every pairing made so far passes the chi-square gate for the
//! stacked innovation dimension. The best hypothesis pairs the most
//! observations; ties go to the lower joint NIS.

use crate::association::innovation::{Innovation, InnovationModel};
use crate::association::{
    Association, AssociationConfig, AssociationError, DataAssociation, Hypothesis,
};
use crate::core::key::LandmarkKey;
use crate::core::measurements::Observation;
use crate::core::values::Values;
use crate::manifold::{EuclideanPoint, Pose};
use crate::optimizer::Marginals;
use std::collections::HashSet;
use tracing::debug;

/// Joint compatibility strategy.
#[derive(Debug, Clone, Default)]
pub struct JointCompatibility {
    config: AssociationConfig,
}

impl JointCompatibility {
    pub fn new(config: AssociationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }
}

struct Best {
    pairs: Vec<Option<usize>>,
    paired: usize,
    nis: f64,
}

struct Search<'m, 'a, P: Pose> {
    model: &'m InnovationModel<'a, P>,
    /// Individually compatible innovations per observation, by ascending NIS
    candidates: Vec<Vec<(Innovation, f64)>>,
    config: &'m AssociationConfig,
    current: Vec<Option<usize>>,
    used: HashSet<LandmarkKey>,
    best: Best,
    nodes: usize,
}

impl<P: Pose> Search<'_, '_, P> {
    fn bound_innovations(&self) -> Vec<&Innovation> {
        self.current
            .iter()
            .enumerate()
            .filter_map(|(obs, choice)| choice.map(|c| &self.candidates[obs][c].0))
            .collect()
    }

    fn visit(&mut self, level: usize, paired: usize, nis: f64) -> Result<(), AssociationError> {
        self.nodes += 1;
        if level == self.candidates.len() {
            if paired > self.best.paired || (paired == self.best.paired && nis < self.best.nis) {
                self.best = Best {
                    pairs: self.current.clone(),
                    paired,
                    nis,
                };
            }
            return Ok(());
        }

        let remaining = self.candidates.len() - level;
        // Even pairing every remaining observation cannot beat the incumbent.
        if paired + remaining < self.best.paired
            || (paired + remaining == self.best.paired && nis >= self.best.nis)
        {
            return Ok(());
        }

        let dim = P::Point::DIM;
        for choice in 0..self.candidates[level].len() {
            let landmark = self.candidates[level][choice].0.landmark;
            if self.used.contains(&landmark) {
                continue;
            }

            let mut innovations = self.bound_innovations();
            innovations.push(&self.candidates[level][choice].0);
            let gate = self.config.chi2_threshold(dim * innovations.len());
            let Some(joint) = self.model.joint_nis(&innovations)? else {
                continue;
            };
            if joint > gate {
                continue;
            }

            self.current[level] = Some(choice);
            self.used.insert(landmark);
            self.visit(level + 1, paired + 1, joint)?;
            self.used.remove(&landmark);
            self.current[level] = None;
        }

        // Leave this observation unpaired.
        let reachable = paired + remaining - 1;
        if reachable > self.best.paired || (reachable == self.best.paired && nis < self.best.nis) {
            self.visit(level + 1, paired, nis)?;
        }
        Ok(())
    }
}

impl<P: Pose> DataAssociation<P> for JointCompatibility {
    fn name(&self) -> &'static str {
        "jcbb"
    }

    fn associate(
        &self,
        estimate: &Values<P>,
        marginals: &Marginals,
        observations: &[Observation<P::Point>],
    ) -> Result<Hypothesis, AssociationError> {
        let model = InnovationModel::new(estimate, marginals)?;
        let gate = self.config.chi2_threshold(P::Point::DIM);

        // Individual compatibility
        let mut candidates = Vec::with_capacity(observations.len());
        for (index, observation) in observations.iter().enumerate() {
            let mut compatible = Vec::new();
            for (key, point) in estimate.landmarks() {
                if model.predicted_range(point) > self.config.max_range() {
                    continue;
                }
                let innovation = model.innovation(index, observation, key)?;
                if let Some(nis) = model.nis(&innovation)? {
                    if nis <= gate {
                        compatible.push((innovation, nis));
                    }
                }
            }
            compatible.sort_by(|a, b| a.1.total_cmp(&b.1));
            candidates.push(compatible);
        }

        let mut search = Search {
            model: &model,
            candidates,
            config: &self.config,
            current: vec![None; observations.len()],
            used: HashSet::new(),
            best: Best {
                pairs: vec![None; observations.len()],
                paired: 0,
                nis: f64::INFINITY,
            },
            nodes: 0,
        };
        search.visit(0, 0, 0.0)?;

        let best = &search.best;
        let associations = best
            .pairs
            .iter()
            .enumerate()
            .map(|(obs, choice)| match choice {
                Some(c) => Association::bound(obs, search.candidates[obs][*c].0.landmark),
                None => Association::new_landmark(obs),
            })
            .collect();
        let nis = if best.paired == 0 { 0.0 } else { best.nis };
        debug!(
            "jcbb paired {}/{} observations (joint nis {nis:.3}, {} nodes)",
            best.paired,
            observations.len(),
            search.nodes
        );

        Ok(Hypothesis::new(associations, nis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::MaximumLikelihood;
    use crate::core::key::{Key, PoseKey};
    use crate::core::noise::NoiseModel;
    use crate::manifold::{LieGroup, SE2};
    use nalgebra::{DMatrix, Point2};

    fn observation(x: f64, y: f64) -> Observation<Point2<f64>> {
        Observation::new(Point2::new(x, y), NoiseModel::isotropic(2, 0.1).unwrap())
    }

    fn scene(landmarks: &[(f64, f64)], correlation: f64) -> (Values<SE2>, Marginals) {
        let mut estimate = Values::new();
        estimate.insert_pose(PoseKey(0), SE2::identity()).unwrap();
        let mut layout = vec![(Key::Pose(PoseKey(0)), 3)];
        for (i, (x, y)) in landmarks.iter().enumerate() {
            let key = LandmarkKey(i as u64);
            estimate.insert_landmark(key, Point2::new(*x, *y)).unwrap();
            layout.push((Key::Landmark(key), 2));
        }

        let n = 3 + 2 * landmarks.len();
        let mut covariance = DMatrix::identity(n, n) * 0.01;
        for i in 0..3 {
            covariance[(i, i)] = 1e-8;
        }
        // Correlate the x coordinates of the first two landmarks.
        if landmarks.len() >= 2 {
            covariance[(3, 5)] = correlation;
            covariance[(5, 3)] = correlation;
        }
        let marginals = Marginals::new(&layout, covariance).unwrap();
        (estimate, marginals)
    }

    #[test]
    fn test_pairs_every_observation_when_consistent() {
        let (estimate, marginals) = scene(&[(5.0, 0.0), (5.0, 3.0), (0.0, 4.0)], 0.0);
        let jcbb = JointCompatibility::default();
        let observations = vec![
            observation(0.05, 4.0),
            observation(5.0, 0.05),
            observation(20.0, 20.0),
            observation(4.95, 3.0),
        ];

        let h = jcbb.associate(&estimate, &marginals, &observations).unwrap();
        assert_eq!(
            h.associations(),
            &[
                Association::bound(0, LandmarkKey(2)),
                Association::bound(1, LandmarkKey(0)),
                Association::new_landmark(2),
                Association::bound(3, LandmarkKey(1)),
            ]
        );
        assert!(h.validate(4, &estimate).is_ok());
    }

    #[test]
    fn test_each_landmark_used_once() {
        let (estimate, marginals) = scene(&[(5.0, 0.0)], 0.0);
        let jcbb = JointCompatibility::default();
        let observations = vec![observation(5.0, 0.1), observation(5.0, -0.02)];

        let h = jcbb.associate(&estimate, &marginals, &observations).unwrap();
        assert_eq!(h.num_associated(), 1);
        // The closer observation keeps the landmark.
        assert_eq!(h.associations()[1], Association::bound(1, LandmarkKey(0)));
    }

    #[test]
    fn test_rejects_jointly_incompatible_pair_that_ml_accepts() {
        // Landmark x coordinates are strongly positively correlated, so the two
        // observations displaced in opposite x directions cannot both be right.
        let (estimate, marginals) = scene(&[(5.0, 0.0), (5.0, 3.0)], 0.0099);
        let observations = vec![observation(5.35, 0.0), observation(4.65, 3.0)];

        let ml = MaximumLikelihood::default();
        let ml_h = ml.associate(&estimate, &marginals, &observations).unwrap();
        assert_eq!(ml_h.num_associated(), 2);

        let jcbb = JointCompatibility::default();
        let h = jcbb.associate(&estimate, &marginals, &observations).unwrap();
        assert_eq!(h.num_associated(), 1);
        assert!(h.validate(2, &estimate).is_ok());
    }
}
