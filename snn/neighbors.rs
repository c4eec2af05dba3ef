//! Combines the estimates of several synthetic neighbors into one prediction.

use crate::config::WeightingScheme;
use crate::types::{Infeasibility, NeighborEstimate, Prediction};

/// Aggregates neighbor outcomes. Infeasible neighbors are skipped; with none
/// feasible the prediction is infeasible.
pub fn aggregate(
    candidates: &[Result<NeighborEstimate, Infeasibility>],
    weights: WeightingScheme,
) -> Prediction {
    let feasible: Vec<&NeighborEstimate> = candidates.iter().filter_map(|c| c.as_ref().ok()).collect();
    if feasible.is_empty() {
        return Prediction::infeasible();
    }
    if let [only] = feasible.as_slice() {
        return Prediction::feasible(only.value);
    }

    let value = match weights {
        WeightingScheme::Uniform => mean(feasible.iter().map(|c| c.value)),
        WeightingScheme::Distance => {
            let exact: Vec<f64> = feasible
                .iter()
                .filter(|c| c.train_error <= 0.0)
                .map(|c| c.value)
                .collect();
            if exact.is_empty() {
                let (weighted, total) = feasible.iter().fold((0.0, 0.0), |(sum, norm), c| {
                    let w = 1.0 / c.train_error;
                    (sum + w * c.value, norm + w)
                });
                weighted / total
            } else {
                mean(exact.into_iter())
            }
        }
    };

    if value.is_finite() {
        Prediction::feasible(value)
    } else {
        Prediction::infeasible()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    sum / n as f64
}
