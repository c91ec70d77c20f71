//! Failure diagnostics.
//!
//! A solver failure inside the pipeline is wrapped into a [`Diagnostic`] that
//! carries the factor graph and the estimate at the moment of failure, so the
//! run can be inspected offline.

use crate::core::factors::{Factor, FactorGraph};
use crate::core::values::Values;
use crate::io::IoError;
use crate::manifold::Pose;
use crate::optimizer::SolverError;
use std::fmt;
use std::fs;
use std::path::Path;

/// Failure taxonomy of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The constraints do not determine every variable
    SystemIndeterminate,
    /// A strategy returned a malformed hypothesis
    AssociationContractViolation,
    /// Timesteps arrived out of order or with the wrong shape
    OrderingViolation,
    /// The pipeline was used in the wrong state or with malformed input
    Usage,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::SystemIndeterminate => write!(f, "system indeterminate"),
            FailureKind::AssociationContractViolation => {
                write!(f, "association contract violation")
            }
            FailureKind::OrderingViolation => write!(f, "ordering violation"),
            FailureKind::Usage => write!(f, "usage error"),
        }
    }
}

/// Pipeline stage during which a solver update failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Initialization,
    Odometry,
    Marginals,
    Observations,
    /// Extra relinearization pass after a loop closure (zero-based)
    LoopClosure { pass: usize },
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStage::Initialization => write!(f, "initialization"),
            UpdateStage::Odometry => write!(f, "odometry update"),
            UpdateStage::Marginals => write!(f, "marginal covariance computation"),
            UpdateStage::Observations => write!(f, "observation update"),
            UpdateStage::LoopClosure { pass } => {
                write!(f, "loop closure relinearization pass {}", pass + 1)
            }
        }
    }
}

/// A solver failure together with the graph and estimate it happened on.
#[derive(Debug, Clone)]
pub struct Diagnostic<P: Pose> {
    pub stage: UpdateStage,
    /// Timestep being processed, `None` during initialization
    pub step: Option<usize>,
    pub error: SolverError,
    pub graph: FactorGraph<P>,
    pub estimate: Values<P>,
}

impl<P: Pose> Diagnostic<P> {
    pub fn kind(&self) -> FailureKind {
        FailureKind::SystemIndeterminate
    }

    /// Factors touching the variable named by the failure, or every factor if
    /// the failure names none.
    pub fn offending_factors(&self) -> Vec<&Factor<P>> {
        match self.error.key() {
            Some(key) => self.graph.factors_touching(key),
            None => self.graph.iter().collect(),
        }
    }

    /// Human-readable report of the failure.
    pub fn report(&self) -> String {
        let mut out = String::new();
        match self.write_report_to(&mut out) {
            Ok(()) => out,
            Err(fmt::Error) => format!("{self}\n"),
        }
    }

    /// Write the report of [`Diagnostic::report`] into `f`.
    pub fn write_report_to(&self, f: &mut impl fmt::Write) -> fmt::Result {
        writeln!(f, "failure: {}", self.kind())?;
        writeln!(f, "stage: {}", self.stage)?;
        match self.step {
            Some(step) => writeln!(f, "step: {step}")?,
            None => writeln!(f, "step: -")?,
        }
        writeln!(f, "error: {}", self.error)?;
        writeln!(
            f,
            "graph: {} factors, estimate: {} poses / {} landmarks",
            self.graph.len(),
            self.estimate.pose_count(),
            self.estimate.landmark_count()
        )?;

        let offending = self.offending_factors();
        writeln!(f, "offending factors ({}):", offending.len())?;
        for factor in offending {
            writeln!(f, "  {factor}")?;
        }
        Ok(())
    }

    /// Store the report at `path`.
    pub fn write_report<Q: AsRef<Path>>(&self, path: Q) -> Result<(), IoError> {
        fs::write(path, self.report())?;
        Ok(())
    }
}

impl<P: Pose> fmt::Display for Diagnostic<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solver failed during {}", self.stage)?;
        if let Some(step) = self.step {
            write!(f, " at step {step}")?;
        }
        write!(f, ": {}", self.error)
    }
}

impl<P: Pose> std::error::Error for Diagnostic<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::{Key, LandmarkKey, PoseKey};
    use crate::core::noise::NoiseModel;
    use crate::manifold::{LieGroup, SE2};
    use nalgebra::Point2;

    fn diagnostic() -> Diagnostic<SE2> {
        let mut graph = FactorGraph::new();
        graph.push(Factor::prior(
            PoseKey(0),
            SE2::identity(),
            NoiseModel::isotropic(3, 0.1).unwrap(),
        ));
        graph.push(Factor::pose_to_point(
            PoseKey(0),
            LandmarkKey(4),
            Point2::new(1.0, 0.0),
            NoiseModel::isotropic(2, 0.1).unwrap(),
        ));
        let mut estimate = Values::new();
        estimate.insert_pose(PoseKey(0), SE2::identity()).unwrap();

        Diagnostic {
            stage: UpdateStage::Observations,
            step: Some(3),
            error: SolverError::IndeterminateSystem {
                key: Some(Key::Landmark(LandmarkKey(4))),
                reason: "variable has no value".to_string(),
            },
            graph,
            estimate,
        }
    }

    #[test]
    fn test_offending_factors() {
        let diag = diagnostic();
        let offending = diag.offending_factors();
        assert_eq!(offending.len(), 1);
        assert_eq!(offending[0].to_string(), "PoseToPoint(x0, l4)");
        assert_eq!(diag.kind(), FailureKind::SystemIndeterminate);
    }

    #[test]
    fn test_report_and_display() {
        let diag = diagnostic();
        let report = diag.report();
        assert!(report.contains("stage: observation update"));
        assert!(report.contains("step: 3"));
        assert!(report.contains("PoseToPoint(x0, l4)"));
        assert!(diag.to_string().starts_with("solver failed during observation update at step 3"));
        assert_eq!(
            UpdateStage::LoopClosure { pass: 0 }.to_string(),
            "loop closure relinearization pass 1"
        );
    }

    /// Accepts `capacity` bytes, then refuses further writes.
    struct Bounded {
        written: String,
        capacity: usize,
    }

    impl fmt::Write for Bounded {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if self.written.len() + s.len() > self.capacity {
                return Err(fmt::Error);
            }
            self.written.push_str(s);
            Ok(())
        }
    }

    #[test]
    fn test_write_report_to_stops_at_first_error() {
        let diag = diagnostic();
        let mut full = String::new();
        diag.write_report_to(&mut full).unwrap();
        assert_eq!(full, diag.report());

        let mut sink = Bounded {
            written: String::new(),
            capacity: 40,
        };
        assert_eq!(diag.write_report_to(&mut sink), Err(fmt::Error));
        assert!(sink.written.starts_with("failure: system indeterminate\n"));
        assert!(!sink.written.contains("offending factors"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exception.txt");
        diagnostic().write_report(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("failure: system indeterminate"));
    }
}
