//! # The SNN estimator
//!
//! `SnnEstimator` owns a frozen configuration, the anchor cache and, once fitted,
//! the observed and completed matrices of every metric. Predictions never mutate
//! their input; infeasible cells come back flagged instead of failing.

use crate::anchors::{AnchorCache, AnchorSet, cell_rng, find_anchors, neighbor_groups};
use crate::config::{ConfigError, SnnConfig, python_bool, python_float, python_option};
use crate::neighbors::aggregate;
use crate::panel::{Panel, PanelError, build_panel};
use crate::pcr::synth_neighbor;
use crate::progress::{CompletionObserver, ConsoleCompletionProgress, NoopCompletionProgress};
use crate::types::{Infeasibility, Prediction};
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use rayon::prelude::*;
use std::fmt;
use thiserror::Error;

/// Seed used for random anchor splits unless [`SnnEstimator::with_seed`] overrides it.
pub const DEFAULT_SEED: u64 = 0;

#[derive(Error, Debug)]
pub enum SnnError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid panel input: {0}")]
    Panel(#[from] PanelError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("The estimator has not been fitted yet. Call fit() or fit_matrix() first.")]
    NotFitted,
    #[error("The estimator was fitted from a bare matrix and carries no panel labels.")]
    NoPanel,
    #[error("Metric '{0}' was not part of the fit.")]
    UnknownMetric(String),
    #[error("No {axis} labelled '{label}' exists in the fitted panel.")]
    UnknownLabel { axis: &'static str, label: String },
    #[error("Cell ({row}, {col}) lies outside the {rows}x{cols} matrix.")]
    CellOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
}

#[derive(Debug, Clone)]
struct FittedMetric {
    name: String,
    matrix: Array2<f64>,
    matrix_full: Array2<f64>,
}

/// Synthetic Nearest Neighbors matrix completion.
#[derive(Debug)]
pub struct SnnEstimator {
    config: SnnConfig,
    seed: u64,
    cache: AnchorCache,
    panel: Option<Panel>,
    fitted: Vec<FittedMetric>,
}

impl Default for SnnEstimator {
    fn default() -> Self {
        Self {
            config: SnnConfig::default(),
            seed: DEFAULT_SEED,
            cache: AnchorCache::new(),
            panel: None,
            fitted: Vec::new(),
        }
    }
}

fn check_cell(matrix: &ArrayView2<f64>, cell: (usize, usize)) -> Result<(), SnnError> {
    let (rows, cols) = matrix.dim();
    let (row, col) = cell;
    if row >= rows || col >= cols {
        return Err(SnnError::CellOutOfBounds {
            row,
            col,
            rows,
            cols,
        });
    }
    Ok(())
}

impl SnnEstimator {
    pub fn new(config: SnnConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn config(&self) -> &SnnConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Builds the panel from a long-format table and completes every metric.
    ///
    /// The first metric is the primary one served by [`Self::matrix`] and
    /// [`Self::matrix_full`].
    pub fn fit(
        &mut self,
        df: &DataFrame,
        unit_column: &str,
        time_column: &str,
        metrics: &[&str],
        actions: &[&str],
    ) -> Result<(), SnnError> {
        self.cache.clear();
        let panel = build_panel(df, unit_column, time_column, metrics, actions)?;
        let mut fitted = Vec::with_capacity(metrics.len());
        for name in panel.metrics() {
            let matrix = panel
                .matrix(name)
                .ok_or_else(|| SnnError::UnknownMetric(name.clone()))?;
            fitted.push(self.fit_metric(name, matrix));
        }
        self.panel = Some(panel);
        self.fitted = fitted;
        Ok(())
    }

    /// Fits a single metric from an already built `units x columns` matrix.
    pub fn fit_matrix(&mut self, metric: &str, matrix: Array2<f64>) -> Result<(), SnnError> {
        self.cache.clear();
        let fitted = self.fit_metric(metric, matrix);
        self.panel = None;
        self.fitted = vec![fitted];
        Ok(())
    }

    fn fit_metric(&self, name: &str, matrix: Array2<f64>) -> FittedMetric {
        log::info!(
            "Fitting metric '{}' on a {}x{} matrix.",
            name,
            matrix.nrows(),
            matrix.ncols()
        );
        let matrix_full = self.complete_labelled(matrix.view(), name);
        FittedMetric {
            name: name.to_string(),
            matrix,
            matrix_full,
        }
    }

    fn primary(&self) -> Result<&FittedMetric, SnnError> {
        self.fitted.first().ok_or(SnnError::NotFitted)
    }

    fn fitted_metric(&self, metric: &str) -> Result<&FittedMetric, SnnError> {
        if self.fitted.is_empty() {
            return Err(SnnError::NotFitted);
        }
        self.fitted
            .iter()
            .find(|m| m.name == metric)
            .ok_or_else(|| SnnError::UnknownMetric(metric.to_string()))
    }

    /// Observed matrix of the primary metric.
    pub fn matrix(&self) -> Result<&Array2<f64>, SnnError> {
        Ok(&self.primary()?.matrix)
    }

    /// Completed matrix of the primary metric.
    pub fn matrix_full(&self) -> Result<&Array2<f64>, SnnError> {
        Ok(&self.primary()?.matrix_full)
    }

    pub fn matrix_for(&self, metric: &str) -> Result<&Array2<f64>, SnnError> {
        Ok(&self.fitted_metric(metric)?.matrix)
    }

    pub fn matrix_full_for(&self, metric: &str) -> Result<&Array2<f64>, SnnError> {
        Ok(&self.fitted_metric(metric)?.matrix_full)
    }

    pub fn panel(&self) -> Option<&Panel> {
        self.panel.as_ref()
    }

    pub fn anchor_cache(&self) -> &AnchorCache {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Anchor set of `cell` in `matrix`, or `None` when no anchor exists.
    pub fn find_anchors(
        &self,
        matrix: ArrayView2<f64>,
        cell: (usize, usize),
    ) -> Result<Option<AnchorSet>, SnnError> {
        check_cell(&matrix, cell)?;
        Ok(find_anchors(matrix, cell, &self.cache))
    }

    /// Estimate of `cell` from the rest of `matrix`.
    ///
    /// The target entry itself is never used, so observed cells get an
    /// out-of-sample estimate.
    pub fn predict(
        &self,
        matrix: ArrayView2<f64>,
        cell: (usize, usize),
    ) -> Result<Prediction, SnnError> {
        check_cell(&matrix, cell)?;
        Ok(self.predict_cell(matrix, cell))
    }

    fn predict_cell(&self, matrix: ArrayView2<f64>, cell: (usize, usize)) -> Prediction {
        let Some(anchors) = find_anchors(matrix, cell, &self.cache) else {
            log::debug!("Cell {:?} is infeasible: {}", cell, Infeasibility::NoAnchors);
            return Prediction::infeasible();
        };

        let mut rng = self.config.random_splits.then(|| cell_rng(self.seed, cell));
        let groups = neighbor_groups(&anchors.rows, self.config.n_neighbors, rng.as_mut());
        let candidates: Vec<_> = groups
            .iter()
            .map(|rows| synth_neighbor(matrix, cell, rows, &anchors.cols, &self.config))
            .collect();

        for reason in candidates.iter().filter_map(|c| c.as_ref().err()) {
            log::debug!("Synthetic neighbor for cell {:?} rejected: {}", cell, reason);
        }
        aggregate(&candidates, self.config.weights)
    }

    /// Copy of `matrix` with every missing cell imputed; infeasible cells stay `NaN`.
    pub fn complete(&self, matrix: ArrayView2<f64>) -> Array2<f64> {
        self.complete_labelled(matrix, "matrix")
    }

    fn complete_labelled(&self, matrix: ArrayView2<f64>, label: &str) -> Array2<f64> {
        if self.config.verbose {
            self.complete_with_progress(matrix, label, &ConsoleCompletionProgress::new())
        } else {
            self.complete_with_progress(matrix, label, &NoopCompletionProgress)
        }
    }

    /// [`Self::complete`] reporting each imputed cell to `observer`.
    pub fn complete_with_progress(
        &self,
        matrix: ArrayView2<f64>,
        label: &str,
        observer: &dyn CompletionObserver,
    ) -> Array2<f64> {
        let missing: Vec<(usize, usize)> = matrix
            .indexed_iter()
            .filter(|(_, v)| v.is_nan())
            .map(|(cell, _)| cell)
            .collect();
        observer.on_start(label, missing.len());

        let predictions: Vec<((usize, usize), Prediction)> = missing
            .par_iter()
            .map(|&cell| {
                let prediction = self.predict_cell(matrix, cell);
                observer.on_cell_done(prediction.is_feasible());
                (cell, prediction)
            })
            .collect();

        let mut completed = matrix.to_owned();
        let mut infeasible = 0;
        for (cell, prediction) in predictions {
            completed[cell] = prediction.value_or_nan();
            infeasible += usize::from(!prediction.is_feasible());
        }
        let imputed = missing.len() - infeasible;
        observer.on_finish(imputed, infeasible);
        log::info!(
            "Completed '{}': {} missing cells, {} imputed, {} infeasible.",
            label,
            missing.len(),
            imputed,
            infeasible
        );
        completed
    }

    fn fitted_panel(&self) -> Result<&Panel, SnnError> {
        if self.fitted.is_empty() {
            return Err(SnnError::NotFitted);
        }
        self.panel.as_ref().ok_or(SnnError::NoPanel)
    }

    /// Completed value of a cell addressed by its panel labels.
    pub fn query(
        &self,
        metric: &str,
        unit: &str,
        time: &str,
        intervention: &str,
    ) -> Result<Prediction, SnnError> {
        let panel = self.fitted_panel()?;
        let matrix_full = self.matrix_full_for(metric)?;
        let cell = panel.cell_of(unit, time, intervention).ok_or_else(|| {
            let (axis, label) = if !panel.units().iter().any(|u| u == unit) {
                ("unit", unit)
            } else if !panel.times().iter().any(|t| t == time) {
                ("time", time)
            } else {
                ("intervention", intervention)
            };
            SnnError::UnknownLabel {
                axis,
                label: label.to_string(),
            }
        })?;
        let value = matrix_full[cell];
        Ok(if value.is_nan() {
            Prediction::infeasible()
        } else {
            Prediction::feasible(value)
        })
    }

    /// Long-format view of a completed metric: one row per unit, time and
    /// intervention, with the completed value (null when infeasible) and whether
    /// the cell was observed.
    pub fn completed_frame(&self, metric: &str) -> Result<DataFrame, SnnError> {
        let panel = self.fitted_panel()?;
        let fitted = self.fitted_metric(metric)?;

        let capacity = fitted.matrix.len();
        let mut units = Vec::with_capacity(capacity);
        let mut times = Vec::with_capacity(capacity);
        let mut interventions = Vec::with_capacity(capacity);
        let mut values = Vec::with_capacity(capacity);
        let mut observed = Vec::with_capacity(capacity);
        for ((row, col), &value) in fitted.matrix_full.indexed_iter() {
            let Some((time, intervention)) = panel.column_labels(col) else {
                continue;
            };
            units.push(panel.units()[row].clone());
            times.push(time.to_string());
            interventions.push(intervention.to_string());
            values.push((!value.is_nan()).then_some(value));
            observed.push(!fitted.matrix[(row, col)].is_nan());
        }

        let frame = df!(
            "unit" => units,
            "time" => times,
            "intervention" => interventions,
            metric => values,
            "observed" => observed
        )?;
        Ok(frame)
    }
}

impl fmt::Display for SnnEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        let metric = match self.fitted.as_slice() {
            [] => "None".to_string(),
            [only] => format!("'{}'", only.name),
            many => format!("[{}]", many.iter().map(|m| format!("'{}'", m.name)).join(", ")),
        };
        write!(
            f,
            "SNN(linear_span_eps={}, max_rank={}, max_value={}, metric={}, \
             min_singular_value={}, min_value={}, n_neighbors={}, random_splits={}, \
             spectral_t={}, subspace_eps={}, verbose={}, weights='{}')",
            python_float(c.linear_span_eps),
            python_option(c.max_rank, |r| r.to_string()),
            python_option(c.max_value, python_float),
            metric,
            python_float(c.min_singular_value),
            python_option(c.min_value, python_float),
            c.n_neighbors,
            python_bool(c.random_splits),
            python_option(c.spectral_t, python_float),
            python_float(c.subspace_eps),
            python_bool(c.verbose),
            c.weights,
        )
    }
}
