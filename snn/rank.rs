//! Effective rank of an anchor submatrix from its singular value spectrum.

use crate::config::SnnConfig;
use crate::types::Infeasibility;
use ndarray::ArrayView1;

/// Rule used to cut the spectrum before the numerical floor and `max_rank` apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RankPolicy {
    /// Keep the smallest prefix whose share of spectral energy exceeds the fraction.
    Spectral(f64),
    /// Gavish–Donoho universal singular value threshold with unknown noise level.
    Universal,
}

impl RankPolicy {
    pub fn from_config(config: &SnnConfig) -> Self {
        match config.spectral_t {
            Some(t) => Self::Spectral(t),
            None => Self::Universal,
        }
    }
}

/// Smallest `k` such that `sum(s[..k]^2) / sum(s^2) > t`; all values when `t >= 1`.
pub fn spectral_rank(singular_values: ArrayView1<f64>, t: f64) -> usize {
    let n = singular_values.len();
    if t >= 1.0 {
        return n;
    }
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    if total <= 0.0 {
        return 0;
    }
    let mut cumulative = 0.0;
    for (k, s) in singular_values.iter().enumerate() {
        cumulative += s * s;
        if cumulative / total > t {
            return k + 1;
        }
    }
    n
}

/// `omega(beta)` approximation of the optimal hard-threshold coefficient.
fn omega(beta: f64) -> f64 {
    0.56 * beta.powi(3) - 0.95 * beta.powi(2) + 1.82 * beta + 1.43
}

fn median(values: ArrayView1<f64>) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => 0.5 * (sorted[n / 2 - 1] + sorted[n / 2]),
    }
}

/// Cutoff `omega(beta) * median(s)` for a matrix of the given shape.
pub fn universal_threshold(singular_values: ArrayView1<f64>, shape: (usize, usize)) -> f64 {
    let (m, n) = shape;
    let (small, large) = (m.min(n), m.max(n));
    if large == 0 {
        return 0.0;
    }
    let beta = small as f64 / large as f64;
    omega(beta) * median(singular_values)
}

/// Number of singular values above the universal threshold, at least one for a
/// non-empty spectrum. The numerical floor applied afterwards can still reach zero.
pub fn universal_rank(singular_values: ArrayView1<f64>, shape: (usize, usize)) -> usize {
    if singular_values.is_empty() {
        return 0;
    }
    let cutoff = universal_threshold(singular_values, shape);
    singular_values.iter().filter(|&&s| s > cutoff).count().max(1)
}

/// Rank used by the regression. Singular values must be sorted in non-increasing order.
///
/// A rank of zero is reported as infeasible rather than rounded up.
pub fn estimate_rank(
    singular_values: ArrayView1<f64>,
    shape: (usize, usize),
    config: &SnnConfig,
) -> Result<usize, Infeasibility> {
    let policy_rank = match RankPolicy::from_config(config) {
        RankPolicy::Spectral(t) => spectral_rank(singular_values, t),
        RankPolicy::Universal => universal_rank(singular_values, shape),
    };
    let above_floor = singular_values
        .iter()
        .take_while(|&&s| s > config.min_singular_value)
        .count();
    let mut rank = policy_rank.min(above_floor);
    if let Some(max_rank) = config.max_rank {
        rank = rank.min(max_rank);
    }
    if rank == 0 {
        return Err(Infeasibility::DegenerateRank);
    }
    Ok(rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn spectral_rank_counts_energy_prefix() {
        let s = array![3.0, 1.0, 0.1];
        // Energies: 9 / 10.01, 10 / 10.01, 1.
        assert_eq!(spectral_rank(s.view(), 0.5), 1);
        assert_eq!(spectral_rank(s.view(), 0.95), 2);
        assert_eq!(spectral_rank(s.view(), 0.9999), 3);
        assert_eq!(spectral_rank(s.view(), 1.0), 3);
        assert_eq!(spectral_rank(array![0.0, 0.0].view(), 0.9), 0);
    }

    #[test]
    fn universal_threshold_uses_median_and_aspect_ratio() {
        let s = array![10.0, 4.0, 1.0, 0.5];
        let cutoff = universal_threshold(s.view(), (4, 4));
        // omega(1) = 2.86 and median = 2.5.
        assert_abs_diff_eq!(cutoff, 2.86 * 2.5, epsilon = 1e-12);
        assert_eq!(universal_rank(s.view(), (4, 4)), 1);
        assert_eq!(universal_threshold(s.view(), (8, 4)), universal_threshold(s.view(), (4, 8)));
    }

    #[test]
    fn universal_rank_never_drops_below_one_before_the_floor() {
        // A single singular value always sits below omega * median.
        assert_eq!(universal_rank(array![7.0].view(), (1, 7)), 1);
        assert_eq!(universal_rank(Array1::<f64>::zeros(0).view(), (0, 3)), 0);
        assert_eq!(
            estimate_rank(array![1e-12].view(), (1, 7), &SnnConfig::default()),
            Err(Infeasibility::DegenerateRank)
        );
    }

    #[test]
    fn floor_and_max_rank_clamp() {
        let s = array![5.0, 3.0, 2.0, 1e-9];
        let spectral = SnnConfig {
            spectral_t: Some(1.0),
            ..SnnConfig::default()
        };
        assert_eq!(estimate_rank(s.view(), (4, 6), &spectral).unwrap(), 3);

        let capped = SnnConfig {
            max_rank: Some(2),
            ..spectral.clone()
        };
        assert_eq!(estimate_rank(s.view(), (4, 6), &capped).unwrap(), 2);
    }

    #[test]
    fn all_values_below_floor_is_infeasible() {
        let s = array![1e-9, 1e-10];
        assert_eq!(
            estimate_rank(s.view(), (2, 2), &SnnConfig::default()),
            Err(Infeasibility::DegenerateRank)
        );
    }

    #[test]
    fn exact_low_rank_spectrum_keeps_signal_only() {
        let s = array![120.0, 35.0, 3e-14, 1e-14, 5e-15];
        assert_eq!(estimate_rank(s.view(), (5, 7), &SnnConfig::default()).unwrap(), 2);
    }
}
