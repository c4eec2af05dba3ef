//! # Principal component regression on an anchor submatrix
//!
//! For a target cell `(r, c)` with anchor rows `R` and anchor columns `C` the
//! regression learns how the target row is expressed through the anchor rows:
//!
//! - response `y = X[r, C]`,
//! - design `A = X[R, C]^T`, one observation per anchor column,
//! - test covariate `x = X[R, c]`.
//!
//! `A` is truncated to its top singular directions, `beta = V_k S_k^-1 U_k^T y`,
//! and the estimate is `x . beta`. Two diagnostics decide feasibility: the
//! leave-one-out residual of `y` (linear span test) and the distance of `x` from
//! the retained row space of `A` (subspace inclusion test).

use crate::config::SnnConfig;
use crate::linalg::thin_svd;
use crate::rank::estimate_rank;
use crate::types::{Infeasibility, NeighborEstimate};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};

/// Leverages this close to one leave no held-out information.
const LEVERAGE_TOLERANCE: f64 = 1e-8;

/// Fitted principal component regression.
#[derive(Debug, Clone)]
pub struct PcrFit {
    /// Coefficients over the design columns.
    pub beta: Array1<f64>,
    /// Orthonormal basis (`n x rank`) of the retained row space of the design.
    pub row_basis: Array2<f64>,
    pub rank: usize,
    /// Leave-one-out mean squared error of the response.
    pub train_error: f64,
    /// `||leave-one-out residual|| / ||y||`.
    pub relative_residual: f64,
}

fn norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

fn relative(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else if numerator == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Regresses `target` on the top principal components of `design` (`m x n`).
pub fn principal_component_regression(
    design: ArrayView2<f64>,
    target: ArrayView1<f64>,
    config: &SnnConfig,
) -> Result<PcrFit, Infeasibility> {
    let (m, n) = design.dim();
    if m == 0 || n == 0 {
        return Err(Infeasibility::NoAnchors);
    }
    if target.len() != m || target.iter().any(|v| !v.is_finite()) {
        return Err(Infeasibility::IllConditioned);
    }

    let svd = thin_svd(&design).map_err(|err| {
        log::debug!("SVD of {m}x{n} anchor design failed: {err}");
        Infeasibility::IllConditioned
    })?;
    let rank = estimate_rank(svd.s.view(), (m, n), config)?;

    let u_k = svd.u.slice(s![.., ..rank]);
    let s_k = svd.s.slice(s![..rank]);
    let v_k = svd.v.slice(s![.., ..rank]);

    let coordinates = u_k.t().dot(&target);
    let beta = v_k.dot(&(&coordinates / &s_k));
    let residual = &target - &u_k.dot(&coordinates);

    let leverage = u_k.map_axis(Axis(1), |row| row.dot(&row));
    if leverage.iter().any(|&h| h >= 1.0 - LEVERAGE_TOLERANCE) {
        return Err(Infeasibility::Overfit);
    }
    let held_out = &residual / &leverage.mapv(|h| 1.0 - h);
    let train_error = held_out.mapv(|e| e * e).mean().unwrap_or(0.0);
    let relative_residual = relative(norm(held_out.view()), norm(target));

    if !beta.iter().all(|b| b.is_finite()) || !train_error.is_finite() {
        return Err(Infeasibility::IllConditioned);
    }
    if relative_residual > config.linear_span_eps {
        return Err(Infeasibility::LinearSpan(relative_residual));
    }

    Ok(PcrFit {
        beta,
        row_basis: v_k.to_owned(),
        rank,
        train_error,
        relative_residual,
    })
}

/// `||x - B B^T x|| / ||x||` for an orthonormal basis `B`.
pub fn subspace_residual(basis: ArrayView2<f64>, x: ArrayView1<f64>) -> f64 {
    let projection = basis.dot(&basis.t().dot(&x));
    let residual = &x - &projection;
    relative(norm(residual.view()), norm(x))
}

/// Estimate for `cell` from one synthetic neighbor defined by `rows` x `cols`.
pub fn synth_neighbor(
    matrix: ArrayView2<f64>,
    cell: (usize, usize),
    rows: &[usize],
    cols: &[usize],
    config: &SnnConfig,
) -> Result<NeighborEstimate, Infeasibility> {
    if rows.is_empty() || cols.is_empty() {
        return Err(Infeasibility::NoAnchors);
    }
    let (target_row, target_col) = cell;

    let target = matrix.row(target_row).select(Axis(0), cols);
    let design = matrix
        .select(Axis(0), rows)
        .select(Axis(1), cols)
        .reversed_axes();
    let covariate = matrix.column(target_col).select(Axis(0), rows);
    if covariate.iter().any(|v| !v.is_finite()) {
        return Err(Infeasibility::IllConditioned);
    }

    let fit = principal_component_regression(design.view(), target.view(), config)?;

    let inclusion = subspace_residual(fit.row_basis.view(), covariate.view());
    if inclusion > config.subspace_eps {
        return Err(Infeasibility::Subspace(inclusion));
    }

    let raw = covariate.dot(&fit.beta);
    if !raw.is_finite() {
        return Err(Infeasibility::IllConditioned);
    }

    Ok(NeighborEstimate {
        value: config.clip(raw),
        train_error: fit.train_error,
        rank: fit.rank,
    })
}
