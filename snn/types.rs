use std::fmt;
use thiserror::Error;

/// Outcome of predicting a single cell.
///
/// An infeasible prediction carries no value: missing-data gaps are an expected
/// operating condition, so this is a flag rather than an error.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    value: f64,
    feasible: bool,
}

impl Prediction {
    pub fn feasible(value: f64) -> Self {
        Self {
            value,
            feasible: true,
        }
    }

    pub fn infeasible() -> Self {
        Self {
            value: f64::NAN,
            feasible: false,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.feasible
    }

    pub fn value(&self) -> Option<f64> {
        self.feasible.then_some(self.value)
    }

    /// The value, or `NaN` when infeasible. Convenient for filling matrices.
    pub fn value_or_nan(&self) -> f64 {
        if self.feasible { self.value } else { f64::NAN }
    }
}

impl PartialEq for Prediction {
    fn eq(&self, other: &Self) -> bool {
        self.feasible == other.feasible && (!self.feasible || self.value == other.value)
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(value) => write!(f, "({value}, feasible)"),
            None => f.write_str("(undefined, infeasible)"),
        }
    }
}

/// Why a synthetic neighbor could not produce an estimate.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Infeasibility {
    #[error("no anchor biclique with at least one row and one column exists")]
    NoAnchors,
    #[error("every singular value of the anchor submatrix fell below the numerical floor")]
    DegenerateRank,
    #[error("the regression interpolates every anchor column, so the held-out error is undefined")]
    Overfit,
    #[error("target row leaves the anchor span (relative held-out residual {0:.3e})")]
    LinearSpan(f64),
    #[error("target column leaves the anchor subspace (relative residual {0:.3e})")]
    Subspace(f64),
    #[error("anchor regression is numerically ill-conditioned")]
    IllConditioned,
}

/// Estimate contributed by one synthetic neighbor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborEstimate {
    pub value: f64,
    /// Leave-one-out mean squared error over the anchor columns.
    pub train_error: f64,
    pub rank: usize,
}
