//! Marginal covariance queries.
//!
//! Marginals either wrap an explicit joint covariance or a sparse Cholesky
//! factor of the information matrix. In the factored form a block of `H⁻¹` is
//! recovered by solving for the columns it spans; solved columns are cached so
//! repeated queries over the same variables cost nothing extra.

use crate::core::key::Key;
use crate::linalg::SparseCholeskyFactor;
use crate::optimizer::SolverError;
use nalgebra::{DMatrix, DVector};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone)]
enum Source {
    Dense(DMatrix<f64>),
    Factored {
        factor: Rc<SparseCholeskyFactor>,
        columns: RefCell<HashMap<usize, DVector<f64>>>,
    },
}

/// Covariance of a set of variables, sliced per key on demand.
#[derive(Debug, Clone)]
pub struct Marginals {
    /// key -> (offset, dim) into the covariance source
    index: BTreeMap<Key, (usize, usize)>,
    source: Source,
}

impl Default for Marginals {
    fn default() -> Self {
        Self {
            index: BTreeMap::new(),
            source: Source::Dense(DMatrix::zeros(0, 0)),
        }
    }
}

impl Marginals {
    /// Build from a joint covariance whose blocks follow `layout` in order.
    pub fn new(layout: &[(Key, usize)], covariance: DMatrix<f64>) -> Result<Self, SolverError> {
        let (index, total) = index_layout(layout)?;
        if covariance.nrows() != total || covariance.ncols() != total {
            return Err(SolverError::IndeterminateSystem {
                key: None,
                reason: format!(
                    "marginal layout spans {total} rows but covariance is {}x{}",
                    covariance.nrows(),
                    covariance.ncols()
                ),
            });
        }
        Ok(Self {
            index,
            source: Source::Dense(covariance),
        })
    }

    /// Build over a factored information matrix whose blocks follow `layout`,
    /// exposing only `keys`.
    pub fn from_factor(
        layout: &[(Key, usize)],
        factor: SparseCholeskyFactor,
        keys: &[Key],
    ) -> Result<Self, SolverError> {
        let (full, total) = index_layout(layout)?;
        if factor.dim() != total {
            return Err(SolverError::IndeterminateSystem {
                key: None,
                reason: format!(
                    "marginal layout spans {total} rows but the factor has {}",
                    factor.dim()
                ),
            });
        }
        let mut index = BTreeMap::new();
        for &key in keys {
            let slot = full.get(&key).copied().ok_or(SolverError::UnknownKey(key))?;
            index.insert(key, slot);
        }
        Ok(Self {
            index,
            source: Source::Factored {
                factor: Rc::new(factor),
                columns: RefCell::new(HashMap::new()),
            },
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.index.keys().copied()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.index.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Covariance of a single variable in its tangent space.
    pub fn marginal_covariance(&self, key: Key) -> Result<DMatrix<f64>, SolverError> {
        self.joint_marginal_covariance(&[key])
    }

    /// Joint covariance of `keys`, blocks ordered as given.
    pub fn joint_marginal_covariance(&self, keys: &[Key]) -> Result<DMatrix<f64>, SolverError> {
        let slots = keys
            .iter()
            .map(|&k| self.slot(k))
            .collect::<Result<Vec<_>, _>>()?;
        let rows: Vec<usize> = slots
            .iter()
            .flat_map(|&(offset, dim)| offset..offset + dim)
            .collect();

        match &self.source {
            Source::Dense(covariance) => Ok(DMatrix::from_fn(rows.len(), rows.len(), |r, c| {
                covariance[(rows[r], rows[c])]
            })),
            Source::Factored { factor, columns } => {
                let mut cache = columns.borrow_mut();
                let missing: Vec<usize> = rows
                    .iter()
                    .copied()
                    .filter(|i| !cache.contains_key(i))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                if !missing.is_empty() {
                    let solved = factor.inverse_columns(&missing).map_err(|e| {
                        SolverError::IndeterminateSystem {
                            key: None,
                            reason: e.to_string(),
                        }
                    })?;
                    for (j, &i) in missing.iter().enumerate() {
                        cache.insert(i, solved.column(j).into_owned());
                    }
                }

                let mut joint = DMatrix::zeros(rows.len(), rows.len());
                for (c, col) in rows.iter().enumerate() {
                    let column = cache.get(col).ok_or(SolverError::IndeterminateSystem {
                        key: None,
                        reason: format!("covariance column {col} was not solved"),
                    })?;
                    for (r, &row) in rows.iter().enumerate() {
                        joint[(r, c)] = column[row];
                    }
                }
                Ok(joint)
            }
        }
    }

    fn slot(&self, key: Key) -> Result<(usize, usize), SolverError> {
        self.index
            .get(&key)
            .copied()
            .ok_or(SolverError::UnknownKey(key))
    }
}

fn index_layout(
    layout: &[(Key, usize)],
) -> Result<(BTreeMap<Key, (usize, usize)>, usize), SolverError> {
    let mut index = BTreeMap::new();
    let mut offset = 0;
    for &(key, dim) in layout {
        if index.insert(key, (offset, dim)).is_some() {
            return Err(SolverError::DuplicateKey(key));
        }
        offset += dim;
    }
    Ok((index, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::{LandmarkKey, PoseKey};
    use crate::linalg::{HessianBuilder, SparseCholeskySolver};
    use approx::assert_relative_eq;

    fn sample() -> Marginals {
        let covariance = DMatrix::from_fn(5, 5, |r, c| (10 * r + c) as f64);
        Marginals::new(
            &[
                (Key::Pose(PoseKey(0)), 3),
                (Key::Landmark(LandmarkKey(0)), 2),
            ],
            covariance,
        )
        .unwrap()
    }

    #[test]
    fn test_single_block() {
        let marginals = sample();
        let block = marginals
            .marginal_covariance(Key::Landmark(LandmarkKey(0)))
            .unwrap();
        assert_relative_eq!(block, DMatrix::from_row_slice(2, 2, &[33.0, 34.0, 43.0, 44.0]));
    }

    #[test]
    fn test_joint_block_follows_requested_order() {
        let marginals = sample();
        let joint = marginals
            .joint_marginal_covariance(&[Key::Landmark(LandmarkKey(0)), Key::Pose(PoseKey(0))])
            .unwrap();
        assert_eq!(joint.shape(), (5, 5));
        assert_relative_eq!(joint[(0, 0)], 33.0);
        assert_relative_eq!(joint[(0, 2)], 30.0);
        assert_relative_eq!(joint[(2, 0)], 3.0);
        assert_relative_eq!(joint[(4, 4)], 22.0);
    }

    #[test]
    fn test_unknown_key() {
        let marginals = sample();
        assert_eq!(
            marginals.marginal_covariance(Key::Pose(PoseKey(9))),
            Err(SolverError::UnknownKey(Key::Pose(PoseKey(9))))
        );
        assert!(Marginals::new(&[(Key::Pose(PoseKey(0)), 3)], DMatrix::zeros(2, 2)).is_err());
    }

    #[test]
    fn test_factored_blocks_match_dense_inverse() {
        let layout = [
            (Key::Pose(PoseKey(0)), 3),
            (Key::Pose(PoseKey(1)), 3),
            (Key::Landmark(LandmarkKey(0)), 2),
        ];
        // Diagonally dominant, so positive definite.
        let information = DMatrix::from_fn(8, 8, |r, c| {
            if r == c {
                10.0 + r as f64
            } else {
                1.0 / (1.0 + (r + c) as f64)
            }
        });
        let mut hessian = HessianBuilder::new(8);
        hessian.add_block(0, 0, &information);
        let factor = SparseCholeskySolver::new()
            .factorize(&hessian.build().unwrap())
            .unwrap();

        let keys = [Key::Landmark(LandmarkKey(0)), Key::Pose(PoseKey(0))];
        let marginals = Marginals::from_factor(&layout, factor, &keys).unwrap();
        assert!(!marginals.contains(Key::Pose(PoseKey(1))));

        let covariance = information.try_inverse().unwrap();
        let landmark = marginals
            .marginal_covariance(Key::Landmark(LandmarkKey(0)))
            .unwrap();
        assert_relative_eq!(
            landmark,
            covariance.view((6, 6), (2, 2)).into_owned(),
            epsilon = 1e-12
        );

        let joint = marginals.joint_marginal_covariance(&keys).unwrap();
        assert_eq!(joint.shape(), (5, 5));
        assert_relative_eq!(joint[(0, 2)], covariance[(6, 0)], epsilon = 1e-12);
        assert_relative_eq!(joint[(4, 1)], covariance[(2, 7)], epsilon = 1e-12);

        assert_eq!(
            marginals.marginal_covariance(Key::Pose(PoseKey(1))),
            Err(SolverError::UnknownKey(Key::Pose(PoseKey(1))))
        );
    }

    #[test]
    fn test_factored_keys_must_be_in_layout() {
        let mut hessian = HessianBuilder::new(3);
        hessian.add_block(0, 0, &DMatrix::identity(3, 3));
        let factor = SparseCholeskySolver::new()
            .factorize(&hessian.build().unwrap())
            .unwrap();
        let result = Marginals::from_factor(
            &[(Key::Pose(PoseKey(0)), 3)],
            factor,
            &[Key::Landmark(LandmarkKey(3))],
        );
        assert!(matches!(result, Err(SolverError::UnknownKey(_))));
    }
}
