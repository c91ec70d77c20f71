//! Landmark dataset I/O.
//!
//! Reads and writes graphs in the g2o text format: pose vertices, landmark
//! vertices, odometry edges between poses and pose-to-landmark observation edges.

use nalgebra::DMatrix;
use std::path::Path;
use thiserror::Error;

pub mod g2o;

pub use g2o::{G2oDataset, G2oFormat, G2oLoader, G2oWriter, ObservationEdge, OdometryEdge};

/// Errors that can occur during dataset parsing and writing
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid number format at line {line}: {value}")]
    InvalidNumber { line: usize, value: String },

    #[error("Missing required fields at line {line}")]
    MissingFields { line: usize },

    #[error("Duplicate vertex ID: {id}")]
    DuplicateVertex { id: usize },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

/// Parse the vertex id at `parts[index]`.
pub(crate) fn parse_id(parts: &[&str], index: usize, line: usize) -> Result<usize, IoError> {
    let field = parts.get(index).ok_or(IoError::MissingFields { line })?;
    field.parse::<usize>().map_err(|_| IoError::InvalidNumber {
        line,
        value: field.to_string(),
    })
}

/// Parse `count` floats starting at `parts[start]`.
pub(crate) fn parse_floats(
    parts: &[&str],
    start: usize,
    count: usize,
    line: usize,
) -> Result<Vec<f64>, IoError> {
    let fields = parts
        .get(start..start + count)
        .ok_or(IoError::MissingFields { line })?;
    fields
        .iter()
        .map(|field| {
            field.parse::<f64>().map_err(|_| IoError::InvalidNumber {
                line,
                value: field.to_string(),
            })
        })
        .collect()
}

/// Number of entries in the upper triangle of a `dim x dim` matrix.
pub(crate) fn upper_triangle_len(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Symmetric matrix from its row-major upper triangle.
pub(crate) fn symmetric_from_upper(dim: usize, upper: &[f64]) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(dim, dim);
    let mut k = 0;
    for i in 0..dim {
        for j in i..dim {
            matrix[(i, j)] = upper[k];
            matrix[(j, i)] = upper[k];
            k += 1;
        }
    }
    matrix
}

/// Row-major upper triangle of a square matrix.
pub(crate) fn upper_triangle(matrix: &DMatrix<f64>) -> Vec<f64> {
    let dim = matrix.nrows();
    let mut upper = Vec::with_capacity(upper_triangle_len(dim));
    for i in 0..dim {
        for j in i..dim {
            upper.push(matrix[(i, j)]);
        }
    }
    upper
}

/// Load a landmark dataset; the pose type picks the 2D or 3D tag set.
pub fn load_dataset<P: G2oFormat, Q: AsRef<Path>>(path: Q) -> Result<G2oDataset<P>, IoError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("g2o") | Some("txt") | None => G2oLoader::load(path),
        Some(ext) => Err(IoError::UnsupportedFormat(format!(
            "unsupported file extension '{ext}', expected .g2o or .txt"
        ))),
    }
}
