//! Dense linear algebra on `ndarray` values, backed by `faer`.
//!
//! Only the thin singular value decomposition is needed by the estimator: the
//! anchor submatrices are small, so every decomposition runs sequentially and the
//! parallelism lives one level up (one missing cell per worker).

use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, Par};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Matrix contains non-finite entries; refusing to decompose a {rows}x{cols} matrix")]
    NonFiniteInput { rows: usize, cols: usize },
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

/// Zero-copy `faer` view of an `ndarray` matrix when the memory layout allows it,
/// otherwise an owned copy.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_row_major_slice(slice, array.nrows(), array.ncols()),
            ),
            Some(slice) if array.t().is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_column_major_slice(slice, array.nrows(), array.ncols()),
            ),
            _ => {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        match &self.storage {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Thin SVD `A = U diag(s) V^T` with singular values in non-increasing order.
///
/// Shapes: `u` is `m x k`, `s` has length `k`, `v` is `n x k`, where `k = min(m, n)`.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    pub u: Array2<f64>,
    pub s: Array1<f64>,
    pub v: Array2<f64>,
}

pub fn thin_svd<S: Data<Elem = f64>>(array: &ArrayBase<S, Ix2>) -> Result<ThinSvd, LinalgError> {
    let (rows, cols) = array.dim();
    let k = rows.min(cols);
    if k == 0 {
        return Ok(ThinSvd {
            u: Array2::zeros((rows, 0)),
            s: Array1::zeros(0),
            v: Array2::zeros((cols, 0)),
        });
    }
    if array.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFiniteInput { rows, cols });
    }

    let view = FaerArrayView::new(array);
    let mut singular = Diag::<f64>::zeros(k);
    let mut u = Mat::<f64>::zeros(rows, k);
    let mut v = Mat::<f64>::zeros(cols, k);

    let par = Par::Seq;
    let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
        rows,
        cols,
        ComputeSvdVectors::Thin,
        ComputeSvdVectors::Thin,
        par,
        Default::default(),
    ));
    let mut stack = MemStack::new(&mut mem);
    svd::svd(
        view.as_ref(),
        singular.as_mut(),
        Some(u.as_mut()),
        Some(v.as_mut()),
        par,
        &mut stack,
        Default::default(),
    )
    .map_err(|_| LinalgError::SvdNoConvergence)?;

    let values = diag_to_array(singular.as_ref());
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    Ok(ThinSvd {
        u: Array2::from_shape_fn((rows, k), |(i, j)| u[(i, order[j])]),
        s: Array1::from_shape_fn(k, |j| values[order[j]]),
        v: Array2::from_shape_fn((cols, k), |(i, j)| v[(i, order[j])]),
    })
}
