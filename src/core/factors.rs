//! Factors connecting pose and landmark variables.
//!
//! Every factor produces a residual in the tangent space of its measurement,
//! whitened by its noise model. The solver minimizes `Σ ½‖R r‖²` over all factors.
//!
//! Factor        | keys              | residual
//! ------------- | ----------------- | ------------------------------------------
//! `Prior`       | pose              | `prior.local(x)`
//! `Between`     | pose, pose        | `measured.local(x_i⁻¹ ∘ x_j)`
//! `PoseToPoint` | pose, landmark    | `x⁻¹ · l − z` (landmark in the pose frame)
//!
//! Jacobians are taken with respect to each variable's local chart. They come
//! from [`LieGroup::between_jacobians`] and [`Pose::transform_to_jacobians`],
//! closed-form for SE(2) and for point transforms.

use crate::core::key::{Key, LandmarkKey, PoseKey};
use crate::core::noise::NoiseModel;
use crate::core::values::Values;
use crate::error::{SlamError, SlamResult};
use crate::manifold::{EuclideanPoint, LieGroup, Pose};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;
use std::fmt;

/// A probabilistic constraint between variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Factor<P: Pose> {
    /// Absolute measurement of a single pose.
    Prior {
        key: PoseKey,
        prior: P,
        noise: NoiseModel,
    },
    /// Relative motion from `from` to `to`, expressed in the `from` frame.
    Between {
        from: PoseKey,
        to: PoseKey,
        measured: P,
        noise: NoiseModel,
    },
    /// Landmark position measured in the frame of `pose`.
    PoseToPoint {
        pose: PoseKey,
        landmark: LandmarkKey,
        measured: P::Point,
        noise: NoiseModel,
    },
}

/// Whitened residual and per-variable Jacobian blocks of a factor.
#[derive(Debug, Clone)]
pub struct LinearizedFactor {
    pub residual: DVector<f64>,
    pub jacobians: Vec<(Key, DMatrix<f64>)>,
}

impl<P: Pose> Factor<P> {
    pub fn prior(key: PoseKey, prior: P, noise: NoiseModel) -> Self {
        Factor::Prior { key, prior, noise }
    }

    pub fn between(from: PoseKey, to: PoseKey, measured: P, noise: NoiseModel) -> Self {
        Factor::Between {
            from,
            to,
            measured,
            noise,
        }
    }

    pub fn pose_to_point(
        pose: PoseKey,
        landmark: LandmarkKey,
        measured: P::Point,
        noise: NoiseModel,
    ) -> Self {
        Factor::PoseToPoint {
            pose,
            landmark,
            measured,
            noise,
        }
    }

    /// Keys of the variables this factor constrains.
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Factor::Prior { key, .. } => vec![Key::Pose(*key)],
            Factor::Between { from, to, .. } => vec![Key::Pose(*from), Key::Pose(*to)],
            Factor::PoseToPoint { pose, landmark, .. } => {
                vec![Key::Pose(*pose), Key::Landmark(*landmark)]
            }
        }
    }

    pub fn involves(&self, key: Key) -> bool {
        self.keys().contains(&key)
    }

    /// Residual dimension.
    pub fn dim(&self) -> usize {
        match self {
            Factor::Prior { .. } | Factor::Between { .. } => P::DOF,
            Factor::PoseToPoint { .. } => P::Point::DIM,
        }
    }

    pub fn noise(&self) -> &NoiseModel {
        match self {
            Factor::Prior { noise, .. }
            | Factor::Between { noise, .. }
            | Factor::PoseToPoint { noise, .. } => noise,
        }
    }

    pub fn is_prior(&self) -> bool {
        matches!(self, Factor::Prior { .. })
    }

    /// Residual before whitening.
    pub fn unwhitened_error(&self, values: &Values<P>) -> SlamResult<DVector<f64>> {
        self.check_noise_dim()?;
        match self {
            Factor::Prior { key, prior, .. } => Ok(prior.local(values.require_pose(*key)?)),
            Factor::Between {
                from, to, measured, ..
            } => {
                let x_from = values.require_pose(*from)?;
                let x_to = values.require_pose(*to)?;
                Ok(between_residual(measured, x_from, x_to))
            }
            Factor::PoseToPoint {
                pose,
                landmark,
                measured,
                ..
            } => {
                let x = values.require_pose(*pose)?;
                let l = values.require_landmark(*landmark)?;
                Ok(point_residual(x, l, measured))
            }
        }
    }

    pub fn whitened_error(&self, values: &Values<P>) -> SlamResult<DVector<f64>> {
        Ok(self.noise().whiten(&self.unwhitened_error(values)?))
    }

    /// Contribution `½‖R r‖²` to the total cost.
    pub fn error(&self, values: &Values<P>) -> SlamResult<f64> {
        Ok(0.5 * self.whitened_error(values)?.norm_squared())
    }

    /// Whitened residual and Jacobians at `values`.
    pub fn linearize(&self, values: &Values<P>) -> SlamResult<LinearizedFactor> {
        let residual = self.unwhitened_error(values)?;
        let jacobians = match self {
            Factor::Prior { key, prior, .. } => {
                let x = values.require_pose(*key)?;
                let (_, j) = prior.between_jacobians(&P::identity(), x);
                vec![(Key::Pose(*key), j)]
            }
            Factor::Between {
                from, to, measured, ..
            } => {
                let x_from = values.require_pose(*from)?;
                let x_to = values.require_pose(*to)?;
                let (j_from, j_to) = measured.between_jacobians(x_from, x_to);
                vec![(Key::Pose(*from), j_from), (Key::Pose(*to), j_to)]
            }
            Factor::PoseToPoint {
                pose,
                landmark,
                measured,
                ..
            } => {
                let x = values.require_pose(*pose)?;
                let l = values.require_landmark(*landmark)?;
                let (j_pose, j_point) = x.transform_to_jacobians(l);
                vec![(Key::Pose(*pose), j_pose), (Key::Landmark(*landmark), j_point)]
            }
        };

        let noise = self.noise();
        Ok(LinearizedFactor {
            residual: noise.whiten(&residual),
            jacobians: jacobians
                .into_iter()
                .map(|(key, j)| (key, noise.whiten_jacobian(&j)))
                .collect(),
        })
    }

    fn check_noise_dim(&self) -> SlamResult<()> {
        if self.noise().dim() != self.dim() {
            return Err(SlamError::InvalidInput(format!(
                "factor on {} has residual dimension {} but noise dimension {}",
                KeyList(&self.keys()),
                self.dim(),
                self.noise().dim()
            )));
        }
        Ok(())
    }
}

fn between_residual<P: Pose>(measured: &P, from: &P, to: &P) -> DVector<f64> {
    measured.local(&from.between(to))
}

fn point_residual<P: Pose>(pose: &P, landmark: &P::Point, measured: &P::Point) -> DVector<f64> {
    pose.transform_to(landmark).to_dvector() - measured.to_dvector()
}

struct KeyList<'a>(&'a [Key]);

impl fmt::Display for KeyList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

impl<P: Pose> fmt::Display for Factor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Factor::Prior { .. } => "Prior",
            Factor::Between { .. } => "Between",
            Factor::PoseToPoint { .. } => "PoseToPoint",
        };
        write!(f, "{kind}({})", KeyList(&self.keys()))
    }
}

/// Ordered collection of factors.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorGraph<P: Pose> {
    factors: Vec<Factor<P>>,
}

impl<P: Pose> Default for FactorGraph<P> {
    fn default() -> Self {
        Self {
            factors: Vec::new(),
        }
    }
}

impl<P: Pose> FactorGraph<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, factor: Factor<P>) {
        self.factors.push(factor);
    }

    pub fn extend(&mut self, other: FactorGraph<P>) {
        self.factors.extend(other.factors);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Factor<P>> {
        self.factors.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Factor<P>> {
        self.factors.get(index)
    }

    /// Every key referenced by at least one factor.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors.iter().flat_map(|f| f.keys()).collect()
    }

    /// Factors that reference `key`.
    pub fn factors_touching(&self, key: Key) -> Vec<&Factor<P>> {
        self.factors.iter().filter(|f| f.involves(key)).collect()
    }

    /// Total cost `Σ ½‖R r‖²` at `values`.
    pub fn error(&self, values: &Values<P>) -> SlamResult<f64> {
        self.factors.iter().map(|f| f.error(values)).sum()
    }
}

impl<P: Pose> FromIterator<Factor<P>> for FactorGraph<P> {
    fn from_iter<I: IntoIterator<Item = Factor<P>>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}

impl<'a, P: Pose> IntoIterator for &'a FactorGraph<P> {
    type Item = &'a Factor<P>;
    type IntoIter = std::slice::Iter<'a, Factor<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.factors.iter()
    }
}

impl<P: Pose> IntoIterator for FactorGraph<P> {
    type Item = Factor<P>;
    type IntoIter = std::vec::IntoIter<Factor<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.factors.into_iter()
    }
}
