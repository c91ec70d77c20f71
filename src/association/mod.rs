//! Data association: deciding which landmark each observation belongs to.
//!
//! A strategy receives the current estimate, the marginal covariances and the
//! observations of one timestep and returns a [`Hypothesis`] with exactly one
//! [`Association`] per observation. An association either binds the
//! observation to an existing landmark key or marks it as a new landmark.
//!
//! Strategies:
//! - [`KnownAssociation`]: uses ground-truth landmark tags carried by the observations
//! - [`MaximumLikelihood`]: per observation, the most likely individually compatible landmark
//! - [`JointCompatibility`]: branch and bound over jointly compatible hypotheses (JCBB)
//!
//! Compatibility is a chi-square test on the normalized innovation squared
//! (NIS) at [`AssociationConfig::confidence_level`].

use crate::core::key::{Key, LandmarkKey};
use crate::core::measurements::Observation;
use crate::core::values::Values;
use crate::manifold::Pose;
use crate::optimizer::Marginals;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod chi2;
pub mod innovation;
pub mod jcbb;
pub mod known;
pub mod ml;

pub use chi2::{chi2_cdf, chi2inv};
pub use jcbb::JointCompatibility;
pub use known::KnownAssociation;
pub use ml::MaximumLikelihood;

/// Errors raised by association strategies or by hypothesis validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssociationError {
    #[error("hypothesis has {actual} associations for {expected} observations")]
    IncompleteHypothesis { expected: usize, actual: usize },

    #[error("association refers to observation {index} but only {count} were given")]
    ObservationOutOfRange { index: usize, count: usize },

    #[error("observation {0} is associated more than once")]
    DuplicateObservation(usize),

    #[error("association binds to landmark {0} which is not in the estimate")]
    UnknownLandmark(LandmarkKey),

    #[error("no estimate or marginal available for {0}")]
    MissingEstimate(Key),

    #[error("invalid association configuration: {0}")]
    InvalidConfig(String),
}

/// Decision for a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    /// Index into the timestep's observations
    pub observation: usize,
    /// Existing landmark, or `None` for a new one
    pub landmark: Option<LandmarkKey>,
}

impl Association {
    pub fn new_landmark(observation: usize) -> Self {
        Self {
            observation,
            landmark: None,
        }
    }

    pub fn bound(observation: usize, landmark: LandmarkKey) -> Self {
        Self {
            observation,
            landmark: Some(landmark),
        }
    }

    pub fn is_new(&self) -> bool {
        self.landmark.is_none()
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.landmark {
            Some(key) => write!(f, "z{} -> {key}", self.observation),
            None => write!(f, "z{} -> new", self.observation),
        }
    }
}

/// The full set of association decisions for one timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    associations: Vec<Association>,
    nis: f64,
}

impl Hypothesis {
    pub fn new(associations: Vec<Association>, nis: f64) -> Self {
        Self { associations, nis }
    }

    /// Every observation becomes a new landmark.
    pub fn unassociated(observation_count: usize) -> Self {
        Self {
            associations: (0..observation_count).map(Association::new_landmark).collect(),
            nis: 0.0,
        }
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Association> {
        self.associations.iter()
    }

    pub fn len(&self) -> usize {
        self.associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }

    /// Number of observations bound to existing landmarks.
    pub fn num_associated(&self) -> usize {
        self.associations.iter().filter(|a| !a.is_new()).count()
    }

    /// Normalized innovation squared of the bound subset.
    pub fn nis(&self) -> f64 {
        self.nis
    }

    /// Check the hypothesis against the observations it answers and the estimate
    /// its bindings refer to.
    pub fn validate<P: Pose>(
        &self,
        observation_count: usize,
        estimate: &Values<P>,
    ) -> Result<(), AssociationError> {
        let mut seen = HashSet::with_capacity(self.associations.len());
        for association in &self.associations {
            if association.observation >= observation_count {
                return Err(AssociationError::ObservationOutOfRange {
                    index: association.observation,
                    count: observation_count,
                });
            }
            if !seen.insert(association.observation) {
                return Err(AssociationError::DuplicateObservation(association.observation));
            }
            if let Some(key) = association.landmark {
                if estimate.landmark(key).is_none() {
                    return Err(AssociationError::UnknownLandmark(key));
                }
            }
        }
        if self.associations.len() != observation_count {
            return Err(AssociationError::IncompleteHypothesis {
                expected: observation_count,
                actual: self.associations.len(),
            });
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Hypothesis {
    type Item = &'a Association;
    type IntoIter = std::slice::Iter<'a, Association>;

    fn into_iter(self) -> Self::IntoIter {
        self.associations.iter()
    }
}

/// Gate configuration shared by the statistical strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationConfig {
    confidence_level: f64,
    max_range: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.99,
            max_range: 1e9,
        }
    }
}

impl AssociationConfig {
    /// `confidence_level` must lie in (0, 1) and `max_range` must be positive.
    pub fn new(confidence_level: f64, max_range: f64) -> Result<Self, AssociationError> {
        if confidence_level.is_nan() || confidence_level <= 0.0 || confidence_level >= 1.0 {
            return Err(AssociationError::InvalidConfig(format!(
                "confidence level must be in (0, 1), got {confidence_level}"
            )));
        }
        if max_range.is_nan() || max_range <= 0.0 {
            return Err(AssociationError::InvalidConfig(format!(
                "max range must be positive, got {max_range}"
            )));
        }
        Ok(Self {
            confidence_level,
            max_range,
        })
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn max_range(&self) -> f64 {
        self.max_range
    }

    /// Gate on the NIS of a `dof`-dimensional innovation.
    pub fn chi2_threshold(&self, dof: usize) -> f64 {
        chi2inv(self.confidence_level, dof)
    }
}

/// A data-association strategy.
pub trait DataAssociation<P: Pose> {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Associate `observations`, taken from the latest pose in `estimate`.
    ///
    /// Only called when at least one landmark exists. The returned hypothesis
    /// must hold one association per observation.
    fn associate(
        &self,
        estimate: &Values<P>,
        marginals: &Marginals,
        observations: &[Observation<P::Point>],
    ) -> Result<Hypothesis, AssociationError>;

    /// Called after the pipeline created landmarks; `created` pairs observation
    /// indices with the allocated keys.
    fn on_landmarks_created(
        &mut self,
        _observations: &[Observation<P::Point>],
        _created: &[(usize, LandmarkKey)],
    ) {
    }
}

/// Selectable association strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationMethod {
    Known,
    #[default]
    MaximumLikelihood,
    JointCompatibility,
}

impl AssociationMethod {
    /// Construct the strategy.
    pub fn build<P: Pose>(self, config: AssociationConfig) -> Box<dyn DataAssociation<P>> {
        match self {
            AssociationMethod::Known => Box::new(KnownAssociation::new()),
            AssociationMethod::MaximumLikelihood => Box::new(MaximumLikelihood::new(config)),
            AssociationMethod::JointCompatibility => Box::new(JointCompatibility::new(config)),
        }
    }
}

impl fmt::Display for AssociationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationMethod::Known => write!(f, "known"),
            AssociationMethod::MaximumLikelihood => write!(f, "ml"),
            AssociationMethod::JointCompatibility => write!(f, "jcbb"),
        }
    }
}

impl FromStr for AssociationMethod {
    type Err = AssociationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "known" => Ok(AssociationMethod::Known),
            "ml" | "maximum-likelihood" => Ok(AssociationMethod::MaximumLikelihood),
            "jcbb" | "joint-compatibility" => Ok(AssociationMethod::JointCompatibility),
            other => Err(AssociationError::InvalidConfig(format!(
                "unknown association method '{other}', expected known, ml or jcbb"
            ))),
        }
    }
}
