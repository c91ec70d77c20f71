//! The timestep pipeline.
//!
//! [`Slam`] turns a stream of [`Timestep`]s into an incrementally solved factor
//! graph:
//!
//! 1. odometry adds a between factor and an initial guess for the next pose,
//!    followed by a solver update;
//! 2. observations are associated against existing landmarks using the current
//!    estimate and marginals (every observation is new while no landmark exists);
//! 3. bound observations add factors to existing landmarks, unbound ones create
//!    landmarks initialized at `T ⊕ z`; one solver update follows;
//! 4. if any observation was bound (a loop closure), the solver runs
//!    [`SlamConfig::loop_closure_passes`] extra relinearization passes.
//!
//! States move `Uninitialized → Initialized → Running`; any solver failure or
//! association contract violation moves the pipeline to `Failed`, after which
//! the last estimate stays readable but no further timestep is accepted.

use crate::association::{AssociationError, DataAssociation, Hypothesis};
use crate::core::accumulator::GraphAccumulator;
use crate::core::factors::{Factor, FactorGraph};
use crate::core::key::{KeyManager, LandmarkKey, PoseKey};
use crate::core::measurements::Timestep;
use crate::core::noise::NoiseModel;
use crate::core::values::Values;
use crate::manifold::{EuclideanPoint, LieGroup, Pose, SE2, SE3};
use crate::optimizer::{IncrementalSmoother, IncrementalSolver, Marginals, SolverError};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info};

pub mod config;
pub mod diagnostics;

pub use config::{PosePrior, SlamConfig, LOOP_CLOSURE_RELINEARIZATION_PASSES};
pub use diagnostics::{Diagnostic, FailureKind, UpdateStage};

/// Lifecycle of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initialized,
    Running,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Uninitialized => write!(f, "uninitialized"),
            PipelineState::Initialized => write!(f, "initialized"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Timesteps that violate the input ordering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingError {
    #[error("first timestep must have step 0, got {step}")]
    FirstStepNotZero { step: usize },

    #[error("first timestep must not carry odometry")]
    OdometryOnFirstStep,

    #[error("step {step} does not follow step {previous}")]
    NonIncreasingStep { previous: usize, step: usize },

    #[error("timestep {step} has no odometry")]
    MissingOdometry { step: usize },
}

/// Errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError<P: Pose> {
    #[error("pipeline is not initialized")]
    NotInitialized,

    #[error("pipeline is already initialized")]
    AlreadyInitialized,

    #[error("pipeline halted after an earlier failure")]
    Halted,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timestep out of order: {0}")]
    Ordering(#[from] OrderingError),

    #[error("association contract violated at step {step}: {error}")]
    AssociationContract {
        step: usize,
        #[source]
        error: AssociationError,
    },

    #[error("{0}")]
    Indeterminate(Box<Diagnostic<P>>),
}

impl<P: Pose> PipelineError<P> {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Indeterminate(_) => FailureKind::SystemIndeterminate,
            PipelineError::AssociationContract { .. } => FailureKind::AssociationContractViolation,
            PipelineError::Ordering(_) => FailureKind::OrderingViolation,
            PipelineError::NotInitialized
            | PipelineError::AlreadyInitialized
            | PipelineError::Halted
            | PipelineError::InvalidInput(_) => FailureKind::Usage,
        }
    }

    /// Diagnostic bundle of a solver failure.
    pub fn diagnostic(&self) -> Option<&Diagnostic<P>> {
        match self {
            PipelineError::Indeterminate(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }
}

/// What happened while processing one timestep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimestepReport {
    pub step: usize,
    /// Pose key current after the timestep
    pub pose: Option<PoseKey>,
    /// Landmarks created, in observation order
    pub new_landmarks: Vec<LandmarkKey>,
    /// Observations bound to existing landmarks
    pub associated: usize,
    pub loop_closure: bool,
    /// Solver updates performed, extra passes included
    pub solver_updates: usize,
    /// Relinearization passes after a loop closure
    pub extra_passes: usize,
}

/// Incremental landmark SLAM pipeline.
pub struct Slam<P: Pose, S: IncrementalSolver<P> = IncrementalSmoother<P>> {
    config: SlamConfig,
    solver: S,
    keys: KeyManager,
    accumulator: GraphAccumulator<P>,
    association: Option<Box<dyn DataAssociation<P>>>,
    state: PipelineState,
    last_step: Option<usize>,
}

pub type Slam2D = Slam<SE2>;
pub type Slam3D = Slam<SE3>;

impl<P: Pose> Slam<P> {
    /// Pipeline backed by the reference smoother.
    pub fn new(config: SlamConfig) -> Self {
        Self::with_solver(config, IncrementalSmoother::new())
    }
}

impl<P: Pose> Default for Slam<P> {
    fn default() -> Self {
        Self::new(SlamConfig::default())
    }
}

impl<P: Pose, S: IncrementalSolver<P>> Slam<P, S> {
    pub fn with_solver(config: SlamConfig, solver: S) -> Self {
        Self {
            config,
            solver,
            keys: KeyManager::new(),
            accumulator: GraphAccumulator::new(),
            association: None,
            state: PipelineState::Uninitialized,
            last_step: None,
        }
    }

    /// Anchor the first pose at the identity and hand over the association strategy.
    pub fn initialize(
        &mut self,
        pose_prior_noise: NoiseModel,
        association: Box<dyn DataAssociation<P>>,
    ) -> Result<(), PipelineError<P>> {
        match self.state {
            PipelineState::Uninitialized => {}
            PipelineState::Failed => return Err(PipelineError::Halted),
            _ => return Err(PipelineError::AlreadyInitialized),
        }
        if pose_prior_noise.dim() != P::DOF {
            return Err(PipelineError::InvalidInput(format!(
                "pose prior noise has dimension {}, expected {}",
                pose_prior_noise.dim(),
                P::DOF
            )));
        }

        let key = self.keys.next_pose_key();
        self.accumulator
            .add_factor(Factor::prior(key, P::identity(), pose_prior_noise));
        self.accumulator
            .add_pose(key, P::identity())
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;

        info!("initializing pipeline with {} association", association.name());
        self.association = Some(association);
        self.flush_and_update(UpdateStage::Initialization, None)?;
        self.state = PipelineState::Initialized;
        Ok(())
    }

    /// Fuse one timestep into the graph.
    pub fn process_timestep(
        &mut self,
        timestep: &Timestep<P>,
    ) -> Result<TimestepReport, PipelineError<P>> {
        match self.state {
            PipelineState::Uninitialized => return Err(PipelineError::NotInitialized),
            PipelineState::Failed => return Err(PipelineError::Halted),
            PipelineState::Initialized | PipelineState::Running => {}
        }
        self.check_order(timestep)?;
        self.check_measurements(timestep)?;

        let step = timestep.step;
        self.last_step = Some(step);
        self.state = PipelineState::Running;
        let mut report = TimestepReport {
            step,
            ..TimestepReport::default()
        };

        if let Some(odometry) = &timestep.odometry {
            let previous_key = self.current_pose_key()?;
            let previous = self.require_pose(previous_key, UpdateStage::Odometry, step)?;
            let next_key = self.keys.peek_next_pose_key();

            self.accumulator.add_factor(Factor::between(
                previous_key,
                next_key,
                odometry.relative_pose.clone(),
                odometry.noise.clone(),
            ));
            self.accumulator
                .add_pose(next_key, previous.compose(&odometry.relative_pose))
                .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
            self.flush_and_update(UpdateStage::Odometry, Some(step))?;
            self.keys.next_pose_key();
            report.solver_updates += 1;
        }
        let pose_key = self.current_pose_key()?;
        report.pose = Some(pose_key);

        let observations = &timestep.observations;
        if observations.is_empty() {
            debug!("step {step}: no observations");
            return Ok(report);
        }

        let estimate = self.solver.current_estimate().clone();
        let marginals = self.marginals_of(&estimate, step)?;
        let hypothesis = self.hypothesis(&estimate, &marginals, timestep)?;

        let pose = self.require_pose(pose_key, UpdateStage::Observations, step)?;
        let mut associations = hypothesis.associations().to_vec();
        associations.sort_by_key(|a| a.observation);

        let mut created = Vec::new();
        for association in &associations {
            let observation = &observations[association.observation];
            match association.landmark {
                Some(landmark) => {
                    self.accumulator.add_factor(Factor::pose_to_point(
                        pose_key,
                        landmark,
                        observation.point,
                        observation.noise.clone(),
                    ));
                    report.associated += 1;
                    report.loop_closure = true;
                }
                None => {
                    let landmark = self.keys.next_landmark_key();
                    self.accumulator.add_factor(Factor::pose_to_point(
                        pose_key,
                        landmark,
                        observation.point,
                        observation.noise.clone(),
                    ));
                    self.accumulator
                        .add_landmark(landmark, pose.transform_from(&observation.point))
                        .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                    created.push((association.observation, landmark));
                    report.new_landmarks.push(landmark);
                }
            }
        }
        if !created.is_empty() {
            if let Some(association) = self.association.as_mut() {
                association.on_landmarks_created(observations, &created);
            }
        }

        debug!(
            "step {step}: associated {}/{} observations, {} new landmarks",
            report.associated,
            observations.len(),
            report.new_landmarks.len()
        );
        self.flush_and_update(UpdateStage::Observations, Some(step))?;
        report.solver_updates += 1;

        if report.loop_closure {
            for pass in 0..self.config.loop_closure_passes {
                if let Err(e) = self.solver.relinearize() {
                    return Err(self.fail(UpdateStage::LoopClosure { pass }, Some(step), e));
                }
                report.extra_passes += 1;
                report.solver_updates += 1;
            }
            debug!("step {step}: loop closure, {} extra passes", report.extra_passes);
        }

        Ok(report)
    }

    pub fn current_estimate(&self) -> &Values<P> {
        self.solver.current_estimate()
    }

    /// Every factor handed to the solver so far.
    pub fn graph(&self) -> &FactorGraph<P> {
        self.solver.factors()
    }

    /// Total cost of the graph at the current estimate.
    pub fn error(&self) -> Result<f64, SolverError> {
        self.solver.current_error()
    }

    /// Pose estimates in key order.
    pub fn trajectory(&self) -> Vec<P> {
        self.current_estimate()
            .trajectory()
            .into_iter()
            .map(|(_, pose)| pose)
            .collect()
    }

    /// Landmark estimates in key order.
    pub fn landmark_points(&self) -> Vec<P::Point> {
        self.current_estimate()
            .landmark_points()
            .into_iter()
            .map(|(_, point)| point)
            .collect()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    /// Name of the association strategy, once initialized.
    pub fn association_name(&self) -> Option<&'static str> {
        self.association.as_ref().map(|a| a.name())
    }

    fn check_order(&self, timestep: &Timestep<P>) -> Result<(), OrderingError> {
        match self.last_step {
            None => {
                if timestep.step != 0 {
                    return Err(OrderingError::FirstStepNotZero {
                        step: timestep.step,
                    });
                }
                if timestep.odometry.is_some() {
                    return Err(OrderingError::OdometryOnFirstStep);
                }
            }
            Some(previous) => {
                if timestep.step <= previous {
                    return Err(OrderingError::NonIncreasingStep {
                        previous,
                        step: timestep.step,
                    });
                }
                if timestep.odometry.is_none() {
                    return Err(OrderingError::MissingOdometry {
                        step: timestep.step,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_measurements(&self, timestep: &Timestep<P>) -> Result<(), PipelineError<P>> {
        if let Some(odometry) = &timestep.odometry {
            if !odometry.is_consistent() {
                return Err(PipelineError::InvalidInput(format!(
                    "odometry noise of step {} has dimension {}, expected {}",
                    timestep.step,
                    odometry.noise.dim(),
                    P::DOF
                )));
            }
        }
        if let Some(index) = timestep.observations.iter().position(|o| !o.is_consistent()) {
            return Err(PipelineError::InvalidInput(format!(
                "observation {index} of step {} has noise dimension {}, expected {}",
                timestep.step,
                timestep.observations[index].noise.dim(),
                P::Point::DIM
            )));
        }
        Ok(())
    }

    fn current_pose_key(&self) -> Result<PoseKey, PipelineError<P>> {
        self.keys
            .current_pose_key()
            .ok_or(PipelineError::NotInitialized)
    }

    fn require_pose(
        &mut self,
        key: PoseKey,
        stage: UpdateStage,
        step: usize,
    ) -> Result<P, PipelineError<P>> {
        match self.solver.current_estimate().pose(key) {
            Some(pose) => Ok(pose.clone()),
            None => Err(self.fail(stage, Some(step), SolverError::UnknownKey(key.into()))),
        }
    }

    fn marginals_of(
        &mut self,
        estimate: &Values<P>,
        step: usize,
    ) -> Result<Marginals, PipelineError<P>> {
        self.solver
            .marginal_covariances(&estimate.keys())
            .map_err(|e| self.fail(UpdateStage::Marginals, Some(step), e))
    }

    /// Association for the timestep, validated against the contract.
    fn hypothesis(
        &mut self,
        estimate: &Values<P>,
        marginals: &Marginals,
        timestep: &Timestep<P>,
    ) -> Result<Hypothesis, PipelineError<P>> {
        let observations = &timestep.observations;
        if self.keys.landmark_count() == 0 {
            return Ok(Hypothesis::unassociated(observations.len()));
        }

        let association = self
            .association
            .as_ref()
            .ok_or(PipelineError::NotInitialized)?;
        let result = association
            .associate(estimate, marginals, observations)
            .and_then(|h| h.validate(observations.len(), estimate).map(|()| h));

        result.map_err(|error| {
            self.state = PipelineState::Failed;
            error!("step {}: association contract violated: {error}", timestep.step);
            PipelineError::AssociationContract {
                step: timestep.step,
                error,
            }
        })
    }

    fn flush_and_update(
        &mut self,
        stage: UpdateStage,
        step: Option<usize>,
    ) -> Result<(), PipelineError<P>> {
        let (factors, values) = self.accumulator.flush();
        match self.solver.update(factors, values) {
            Ok(summary) => {
                debug!("{stage}: {summary}");
                Ok(())
            }
            Err(e) => Err(self.fail(stage, step, e)),
        }
    }

    fn fail(&mut self, stage: UpdateStage, step: Option<usize>, error: SolverError) -> PipelineError<P> {
        self.state = PipelineState::Failed;
        let diagnostic = Diagnostic {
            stage,
            step,
            error,
            graph: self.solver.factors().clone(),
            estimate: self.solver.current_estimate().clone(),
        };
        error!("{diagnostic}");
        PipelineError::Indeterminate(Box::new(diagnostic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{Association, AssociationMethod, KnownAssociation};
    use crate::core::measurements::Observation;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn prior() -> NoiseModel {
        NoiseModel::from_sigmas(&[1e-6, 1e-6, 1e-6]).unwrap()
    }

    fn odom_noise() -> NoiseModel {
        NoiseModel::from_sigmas(&[0.05, 0.05, 0.01]).unwrap()
    }

    fn obs_noise() -> NoiseModel {
        NoiseModel::isotropic(2, 0.05).unwrap()
    }

    fn initialized() -> Slam2D {
        let mut slam = Slam2D::default();
        slam.initialize(prior(), Box::new(KnownAssociation::new()))
            .unwrap();
        slam
    }

    /// Always binds every observation to a landmark that does not exist.
    struct Rogue;

    impl DataAssociation<SE2> for Rogue {
        fn name(&self) -> &'static str {
            "rogue"
        }

        fn associate(
            &self,
            _estimate: &Values<SE2>,
            _marginals: &Marginals,
            observations: &[Observation<Point2<f64>>],
        ) -> Result<Hypothesis, AssociationError> {
            Ok(Hypothesis::new(
                (0..observations.len())
                    .map(|i| Association::bound(i, LandmarkKey(99)))
                    .collect(),
                0.0,
            ))
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut slam = Slam2D::default();
        assert_eq!(slam.state(), PipelineState::Uninitialized);
        assert!(matches!(
            slam.process_timestep(&Timestep::new(0)),
            Err(PipelineError::NotInitialized)
        ));

        slam.initialize(prior(), AssociationMethod::Known.build(Default::default()))
            .unwrap();
        assert_eq!(slam.state(), PipelineState::Initialized);
        assert_eq!(slam.association_name(), Some("known"));
        let again = slam.initialize(prior(), Box::new(KnownAssociation::new()));
        assert!(matches!(again, Err(PipelineError::AlreadyInitialized)));

        slam.process_timestep(&Timestep::new(0)).unwrap();
        assert_eq!(slam.state(), PipelineState::Running);
    }

    #[test]
    fn test_ordering_violations_leave_state_untouched() {
        let mut slam = initialized();

        let err = slam
            .process_timestep(&Timestep::new(1).with_odometry(SE2::translation(1.0, 0.0), odom_noise()))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::OrderingViolation);

        let err = slam
            .process_timestep(&Timestep::new(0).with_odometry(SE2::translation(1.0, 0.0), odom_noise()))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ordering(OrderingError::OdometryOnFirstStep)
        ));

        slam.process_timestep(&Timestep::new(0)).unwrap();
        let err = slam.process_timestep(&Timestep::new(0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ordering(OrderingError::NonIncreasingStep { previous: 0, step: 0 })
        ));
        let err = slam.process_timestep(&Timestep::new(1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ordering(OrderingError::MissingOdometry { step: 1 })
        ));

        assert_eq!(slam.state(), PipelineState::Running);
        assert_eq!(slam.keys().pose_count(), 1);
        slam.process_timestep(&Timestep::new(1).with_odometry(SE2::translation(1.0, 0.0), odom_noise()))
            .unwrap();
    }

    #[test]
    fn test_first_observation_creates_landmark() {
        let mut slam = initialized();
        let report = slam
            .process_timestep(
                &Timestep::new(0).with_observation(Observation::new(Point2::new(1.0, 0.0), obs_noise())),
            )
            .unwrap();

        assert_eq!(report.new_landmarks, vec![LandmarkKey(0)]);
        assert!(!report.loop_closure);
        assert_eq!(report.extra_passes, 0);
        assert_eq!(report.solver_updates, 1);

        let points = slam.landmark_points();
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0], Point2::new(1.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_contract_violation_halts_pipeline() {
        let mut slam = Slam2D::default();
        slam.initialize(prior(), Box::new(Rogue)).unwrap();
        let obs = || Observation::new(Point2::new(1.0, 0.0), obs_noise());

        slam.process_timestep(&Timestep::new(0).with_observation(obs()))
            .unwrap();
        let err = slam
            .process_timestep(
                &Timestep::new(1)
                    .with_odometry(SE2::translation(1.0, 0.0), odom_noise())
                    .with_observation(obs()),
            )
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::AssociationContractViolation);
        assert!(matches!(
            err,
            PipelineError::AssociationContract {
                step: 1,
                error: AssociationError::UnknownLandmark(LandmarkKey(99))
            }
        ));
        assert_eq!(slam.state(), PipelineState::Failed);
        assert!(matches!(
            slam.process_timestep(&Timestep::new(2).with_odometry(SE2::identity(), odom_noise())),
            Err(PipelineError::Halted)
        ));
        // The last estimate stays readable.
        assert_eq!(slam.trajectory().len(), 2);
    }

    #[test]
    fn test_mismatched_noise_is_rejected_up_front() {
        let mut slam = initialized();
        let err = slam
            .process_timestep(&Timestep::new(0).with_observation(Observation::new(
                Point2::new(1.0, 0.0),
                NoiseModel::isotropic(3, 0.1).unwrap(),
            )))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Usage);
        assert_eq!(slam.state(), PipelineState::Initialized);

        let mut fresh = Slam2D::default();
        let err = fresh
            .initialize(NoiseModel::isotropic(6, 1.0).unwrap(), Box::new(KnownAssociation::new()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
