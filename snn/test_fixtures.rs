//! Shared low-rank panels for unit tests.

use ndarray::Array2;

/// Entries of a noiseless rank-two panel:
/// `100 * (a_i * b_j + c_i * d_j)` with `a_i = 1 + i`, `c_i = 1 + i % 3`,
/// `b_j = 2 + j / 2`, `d_j = j % 4 - 1.5`.
pub(crate) fn fixture_truth(i: usize, j: usize) -> f64 {
    let a = 1.0 + i as f64;
    let c = 1.0 + (i % 3) as f64;
    let b = 2.0 + 0.5 * j as f64;
    let d = (j % 4) as f64 - 1.5;
    100.0 * (a * b + c * d)
}

pub(crate) fn fixture_panel(rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| fixture_truth(i, j))
}

/// 9 x 7 fixture with holes at (0, 0), (7, 1), (8, 1) and (5, 6).
///
/// For target (0, 0) the unique maximum anchor is rows `[1, 2, 3, 4, 6, 7, 8]`
/// and columns `[2, 3, 4, 5, 6]`.
pub(crate) fn anchor_fixture() -> Array2<f64> {
    let mut x = fixture_panel(9, 7);
    for cell in [(0, 0), (7, 1), (8, 1), (5, 6)] {
        x[cell] = f64::NAN;
    }
    x
}

/// SplitMix64 finalizer; used to derive reproducible noise without an RNG.
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Uniform noise in `[-1, 1)` keyed on the cell.
fn cell_noise(i: usize, j: usize) -> f64 {
    let bits = splitmix64(0x5EED ^ (((i as u64) << 32) | j as u64)) >> 11;
    bits as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

/// 13 x 13 rank-two panel plus noise of amplitude 2, with holes at (0, 0) and
/// (4, 7).
///
/// The candidates of (0, 0) form a square 12 x 12 block with one hole, so dropping
/// row 4 and dropping column 7 tie at 132 entries.
pub(crate) fn noisy_tie_fixture() -> Array2<f64> {
    let mut x = Array2::from_shape_fn((13, 13), |(i, j)| {
        fixture_truth(i, j) + 2.0 * cell_noise(i, j)
    });
    for cell in [(0, 0), (4, 7)] {
        x[cell] = f64::NAN;
    }
    x
}
