//! Gaussian noise models attached to measurements and factors.

use crate::error::{SlamError, SlamResult};
use nalgebra::{Cholesky, DMatrix, DVector};

/// Zero-mean Gaussian noise, stored as a square-root information matrix `R`
/// with `RᵀR = Σ⁻¹`.
///
/// Whitening a residual `r` gives `R r`, whose squared norm is the Mahalanobis
/// distance of `r` under the model.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    sqrt_information: DMatrix<f64>,
    covariance: DMatrix<f64>,
}

impl NoiseModel {
    /// Diagonal model from standard deviations.
    pub fn from_sigmas(sigmas: &[f64]) -> SlamResult<Self> {
        if sigmas.is_empty() {
            return Err(SlamError::InvalidInput(
                "noise model needs at least one sigma".to_string(),
            ));
        }
        if let Some(bad) = sigmas.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(SlamError::InvalidInput(format!(
                "sigmas must be positive and finite, got {bad}"
            )));
        }

        let sigmas = DVector::from_column_slice(sigmas);
        Ok(Self {
            sqrt_information: DMatrix::from_diagonal(&sigmas.map(|s| 1.0 / s)),
            covariance: DMatrix::from_diagonal(&sigmas.map(|s| s * s)),
        })
    }

    /// Diagonal model from variances.
    pub fn from_variances(variances: &[f64]) -> SlamResult<Self> {
        let sigmas: Vec<f64> = variances.iter().map(|v| v.sqrt()).collect();
        Self::from_sigmas(&sigmas)
    }

    /// Same sigma on every axis.
    pub fn isotropic(dim: usize, sigma: f64) -> SlamResult<Self> {
        Self::from_sigmas(&vec![sigma; dim])
    }

    /// Full model from a covariance matrix.
    pub fn from_covariance(covariance: DMatrix<f64>) -> SlamResult<Self> {
        let dim = check_square(&covariance)?;
        let cholesky = Cholesky::new(covariance.clone()).ok_or_else(|| {
            SlamError::InvalidInput("covariance is not positive definite".to_string())
        })?;

        // Σ = L Lᵀ  =>  R = L⁻¹
        let sqrt_information = cholesky
            .l()
            .solve_lower_triangular(&DMatrix::identity(dim, dim))
            .ok_or_else(|| SlamError::InvalidInput("covariance factor is singular".to_string()))?;

        Ok(Self {
            sqrt_information,
            covariance,
        })
    }

    /// Full model from an information matrix.
    pub fn from_information(information: DMatrix<f64>) -> SlamResult<Self> {
        check_square(&information)?;
        let cholesky = Cholesky::new(information).ok_or_else(|| {
            SlamError::InvalidInput("information matrix is not positive definite".to_string())
        })?;

        // Λ = L Lᵀ  =>  R = Lᵀ
        Ok(Self {
            sqrt_information: cholesky.l().transpose(),
            covariance: cholesky.inverse(),
        })
    }

    pub fn dim(&self) -> usize {
        self.covariance.nrows()
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn sqrt_information(&self) -> &DMatrix<f64> {
        &self.sqrt_information
    }

    pub fn information(&self) -> DMatrix<f64> {
        self.sqrt_information.transpose() * &self.sqrt_information
    }

    /// Standard deviations along each axis (square roots of the covariance diagonal).
    pub fn sigmas(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| v.sqrt())
    }

    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        &self.sqrt_information * residual
    }

    pub fn whiten_jacobian(&self, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
        &self.sqrt_information * jacobian
    }

    /// Squared Mahalanobis norm of `residual`.
    pub fn squared_mahalanobis(&self, residual: &DVector<f64>) -> f64 {
        self.whiten(residual).norm_squared()
    }
}

fn check_square(matrix: &DMatrix<f64>) -> SlamResult<usize> {
    if matrix.nrows() == 0 || matrix.nrows() != matrix.ncols() {
        return Err(SlamError::InvalidInput(format!(
            "noise matrix must be square and non-empty, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    Ok(matrix.nrows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigmas_model() {
        let noise = NoiseModel::from_sigmas(&[0.1, 2.0]).unwrap();
        assert_eq!(noise.dim(), 2);
        assert_relative_eq!(noise.covariance()[(0, 0)], 0.01, epsilon = 1e-15);
        assert_relative_eq!(noise.covariance()[(1, 1)], 4.0);

        let whitened = noise.whiten(&DVector::from_vec(vec![0.1, 2.0]));
        assert_relative_eq!(whitened, DVector::from_vec(vec![1.0, 1.0]), epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_sigmas() {
        assert!(NoiseModel::from_sigmas(&[]).is_err());
        assert!(NoiseModel::from_sigmas(&[1.0, 0.0]).is_err());
        assert!(NoiseModel::from_sigmas(&[f64::NAN]).is_err());
        assert!(NoiseModel::from_variances(&[-1.0]).is_err());
    }

    #[test]
    fn test_covariance_and_information_agree() {
        let covariance = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let from_cov = NoiseModel::from_covariance(covariance.clone()).unwrap();
        let from_info =
            NoiseModel::from_information(covariance.clone().try_inverse().unwrap()).unwrap();

        assert_relative_eq!(from_cov.information(), from_info.information(), epsilon = 1e-10);
        assert_relative_eq!(from_info.covariance(), &covariance, epsilon = 1e-10);

        let r = DVector::from_vec(vec![0.3, -0.7]);
        assert_relative_eq!(
            from_cov.squared_mahalanobis(&r),
            from_info.squared_mahalanobis(&r),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_rejects_indefinite_covariance() {
        let covariance = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(NoiseModel::from_covariance(covariance).is_err());
        assert!(NoiseModel::from_covariance(DMatrix::zeros(2, 3)).is_err());
    }
}
