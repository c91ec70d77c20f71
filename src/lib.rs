//! # da-slam
//!
//! Incremental landmark SLAM with pluggable data association.
//!
//! Odometry and landmark observations arrive one [`Timestep`] at a time and are
//! fused into a factor graph that an incremental smoother keeps solved. Which
//! existing landmark an observation belongs to is decided by a
//! [`DataAssociation`] strategy working on the current estimate and marginal
//! covariances.
//!
//! ## Features
//!
//! - **Pose types**: SE(2) with 2D point landmarks, SE(3) with 3D point landmarks
//! - **Association strategies**: known (ground-truth ids), maximum likelihood, and
//!   joint compatibility branch and bound (JCBB)
//! - **Incremental solving**: dense Gauss-Newton smoother behind the
//!   [`IncrementalSolver`] trait, with marginal covariance recovery
//! - **Loop closures**: extra relinearization passes whenever an observation is
//!   bound to an existing landmark
//! - **Diagnostics**: solver failures return the full graph and estimate
//! - **Datasets**: g2o landmark datasets in and solved graphs out
//!
//! ## Example
//!
//! ```no_run
//! use da_slam::{AssociationMethod, NoiseModel, Observation, PosePrior, Slam2D, Timestep, SE2};
//! use nalgebra::Point2;
//!
//! let mut slam = Slam2D::default();
//! slam.initialize(
//!     SE2::default_prior_noise()?,
//!     AssociationMethod::MaximumLikelihood.build(Default::default()),
//! )?;
//!
//! let noise = NoiseModel::isotropic(2, 0.1)?;
//! let timestep = Timestep::new(0).with_observation(Observation::new(Point2::new(1.0, 0.0), noise));
//! let report = slam.process_timestep(&timestep)?;
//! assert_eq!(report.new_landmarks.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod association;
pub mod core;
pub mod error;
pub mod io;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod optimizer;
pub mod slam;

// Re-export core types
pub use crate::core::accumulator::GraphAccumulator;
pub use crate::core::factors::{Factor, FactorGraph};
pub use crate::core::key::{Key, KeyManager, LandmarkKey, PoseKey};
pub use crate::core::measurements::{
    Observation, Observation2D, Observation3D, Odometry, Timestep, Timestep2D, Timestep3D,
};
pub use crate::core::noise::NoiseModel;
pub use crate::core::values::{Values, Variable};
pub use error::{SlamError, SlamResult};

// Re-export manifold types
pub use manifold::{EuclideanPoint, LieGroup, Pose, SE2, SE3};

// Re-export association types
pub use association::{
    Association, AssociationConfig, AssociationError, AssociationMethod, DataAssociation,
    Hypothesis, JointCompatibility, KnownAssociation, MaximumLikelihood,
};

// Re-export optimizer types
pub use optimizer::{
    IncrementalSmoother, IncrementalSolver, Marginals, SmootherConfig, SolverError,
    UpdateSummary,
};

// Re-export pipeline types
pub use slam::{
    Diagnostic, FailureKind, OrderingError, PipelineError, PipelineState, PosePrior, Slam,
    Slam2D, Slam3D, SlamConfig, TimestepReport, UpdateStage,
};

// Re-export io and logger
pub use io::{G2oDataset, G2oLoader, G2oWriter, IoError};
pub use logger::{init_logger, init_logger_with_level};
