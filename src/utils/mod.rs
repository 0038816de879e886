use nalgebra::{SMatrix, SVector};

use crate::{VertexError, VertexResult};

/// Useful enumerations for constraints and detector halves.
pub mod enums;
/// Traits to give additional functionality to [`nalgebra::Vector3`] and [`nalgebra::Vector4`] (in
/// particular, to treat the latter as a four-momentum).
pub mod vectors;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// # See Also
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// The number of independent entries in a symmetric `n`-by-`n` matrix.
pub const fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Pack the lower triangle of a symmetric matrix row by row, i.e. `(0,0), (1,0), (1,1), (2,0),
/// ...`.
pub fn pack_lower<const N: usize>(matrix: &SMatrix<f64, N, N>) -> Vec<f64> {
    let mut packed = Vec::with_capacity(packed_len(N));
    for i in 0..N {
        for j in 0..=i {
            packed.push(matrix[(i, j)]);
        }
    }
    packed
}

/// Build a symmetric matrix from either a row-wise packed lower triangle or a full row-major
/// matrix.
///
/// Full matrices are symmetrized by averaging the off-diagonal pairs.
pub fn unpack_symmetric<const N: usize>(values: &[f64]) -> VertexResult<SMatrix<f64, N, N>> {
    if values.len() == packed_len(N) {
        let mut matrix = SMatrix::<f64, N, N>::zeros();
        let mut k = 0;
        for i in 0..N {
            for j in 0..=i {
                matrix[(i, j)] = values[k];
                matrix[(j, i)] = values[k];
                k += 1;
            }
        }
        Ok(matrix)
    } else if values.len() == N * N {
        Ok(symmetrize(&SMatrix::<f64, N, N>::from_row_slice(values)))
    } else {
        Err(VertexError::InvalidArgument(format!(
            "expected {} packed or {} full covariance values, got {}",
            packed_len(N),
            N * N,
            values.len()
        )))
    }
}

/// Average a matrix with its transpose.
pub fn symmetrize<const N: usize>(matrix: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    (matrix + matrix.transpose()) * 0.5
}

/// Read a fixed-size vector from a slice, failing on a length mismatch.
pub fn vector_from_slice<const N: usize>(
    values: &[f64],
    what: &str,
) -> VertexResult<SVector<f64, N>> {
    if values.len() != N {
        return Err(VertexError::InvalidArgument(format!(
            "{} must have {} entries, got {}",
            what,
            N,
            values.len()
        )));
    }
    Ok(SVector::<f64, N>::from_column_slice(values))
}
