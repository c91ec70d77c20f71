//! Error types for the da-slam library
//!
//! This module provides the crate-level error and result types. Module-specific
//! errors (`LinAlgError`, `SolverError`, `AssociationError`, `IoError`) convert into
//! `SlamError` so that setup code can use `?` across module boundaries. Pipeline
//! failures carry graph snapshots and live in `slam::PipelineError`.

use crate::core::key::Key;
use crate::io::IoError;
use crate::linalg::LinAlgError;
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Main result type used throughout the da-slam library
pub type SlamResult<T> = Result<T, SlamError>;

/// Main error type for the da-slam library
#[derive(Debug, Error)]
pub enum SlamError {
    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A value was inserted twice for the same key
    #[error("Duplicate value for key {0}")]
    DuplicateKey(Key),

    /// A factor or query referenced a key without a value
    #[error("Missing value for key {0}")]
    MissingKey(Key),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    /// Dataset reading / writing errors
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

impl From<std::io::Error> for SlamError {
    fn from(err: std::io::Error) -> Self {
        SlamError::Io(IoError::from(err))
    }
}

impl From<ParseFloatError> for SlamError {
    fn from(err: ParseFloatError) -> Self {
        SlamError::InvalidInput(format!("Failed to parse float: {err}"))
    }
}

impl From<ParseIntError> for SlamError {
    fn from(err: ParseIntError) -> Self {
        SlamError::InvalidInput(format!("Failed to parse integer: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::LandmarkKey;
    use std::io::ErrorKind;

    #[test]
    fn test_slam_error_display() {
        let error = SlamError::InvalidInput("sigma must be positive".to_string());
        assert_eq!(error.to_string(), "Invalid input: sigma must be positive");

        let error = SlamError::DuplicateKey(Key::Landmark(LandmarkKey(4)));
        assert_eq!(error.to_string(), "Duplicate value for key l4");
    }

    #[test]
    fn test_slam_error_from_io() {
        let io_error = std::io::Error::new(ErrorKind::NotFound, "File not found");
        let slam_error = SlamError::from(io_error);

        match slam_error {
            SlamError::Io(err) => assert!(err.to_string().contains("File not found")),
            _ => panic!("Expected IO error"),
        }
    }

    #[test]
    fn test_slam_error_from_parse() {
        let parse_error = "abc".parse::<f64>().unwrap_err();
        assert!(matches!(
            SlamError::from(parse_error),
            SlamError::InvalidInput(_)
        ));
    }
}
