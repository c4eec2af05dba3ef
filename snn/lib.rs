//! Synthetic Nearest Neighbors (SNN) matrix completion for panel data.
//!
//! A long-format table is pivoted into a `units x (times * interventions)` matrix
//! per metric. Each missing cell is estimated from the largest fully observed
//! anchor submatrix around it, through a low-rank principal component regression,
//! optionally averaged over several synthetic neighbors.
#![deny(unused_variables)]

pub mod anchors;
pub mod config;
pub mod estimator;
pub mod graph;
pub mod linalg;
pub mod neighbors;
pub mod panel;
pub mod pcr;
pub mod progress;
pub mod rank;
pub mod types;

#[cfg(test)]
mod test_fixtures;

pub use config::{ConfigError, SnnConfig, WeightingScheme};
pub use estimator::{SnnError, SnnEstimator};
pub use panel::{Panel, PanelError};
pub use types::{Infeasibility, Prediction};
