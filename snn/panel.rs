//! # Panel construction
//!
//! Turns a long-format table (one row per unit, time and intervention) into a dense
//! `(units, times, interventions)` tensor per metric, and flattens each tensor into
//! the `units x (times * interventions)` matrix the estimator works on. Column
//! `t * interventions + i` of the matrix holds time `t` under intervention `i`.
//!
//! Unobserved grid cells are `NaN`. The source `DataFrame` is never modified.

use ahash::AHashMap;
use itertools::Itertools;
use ndarray::{Array2, Array3, ArrayView2, Zip};
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("The required column '{0}' was not found in the input table.")]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the key column '{0}'.")]
    MissingKeyValues(String),
    #[error(
        "The observation (unit '{unit}', time '{time}', intervention '{intervention}') appears more than once."
    )]
    DuplicateObservation {
        unit: String,
        time: String,
        intervention: String,
    },
    #[error("The input table has no rows.")]
    EmptyTable,
    #[error("At least one metric column must be requested.")]
    NoMetrics,
    #[error("Observation mask has shape {found:?}, but the matrix has shape {expected:?}.")]
    MaskShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// Distinct labels of one panel axis in their canonical order.
#[derive(Debug, Clone)]
struct AxisIndex {
    labels: Vec<String>,
    positions: AHashMap<String, usize>,
}

impl AxisIndex {
    fn new(labels: Vec<String>) -> Self {
        let positions = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self { labels, positions }
    }

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }
}

/// Dense per-metric tensors over sorted unit, time and intervention labels.
#[derive(Debug, Clone)]
pub struct Panel {
    units: AxisIndex,
    times: AxisIndex,
    interventions: AxisIndex,
    metrics: Vec<String>,
    tensors: Vec<Array3<f64>>,
}

impl Panel {
    pub fn units(&self) -> &[String] {
        &self.units.labels
    }

    pub fn times(&self) -> &[String] {
        &self.times.labels
    }

    pub fn interventions(&self) -> &[String] {
        &self.interventions.labels
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// `(units, times, interventions)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.units.len(), self.times.len(), self.interventions.len())
    }

    pub fn tensor(&self, metric: &str) -> Option<&Array3<f64>> {
        let k = self.metrics.iter().position(|m| m == metric)?;
        Some(&self.tensors[k])
    }

    /// The metric's tensor flattened to `units x (times * interventions)`.
    pub fn matrix(&self, metric: &str) -> Option<Array2<f64>> {
        let tensor = self.tensor(metric)?;
        let (n_units, n_times, n_interventions) = tensor.dim();
        Some(Array2::from_shape_fn(
            (n_units, n_times * n_interventions),
            |(u, col)| tensor[(u, col / n_interventions, col % n_interventions)],
        ))
    }

    /// Matrix column holding time position `time` under intervention position `intervention`.
    pub fn column_index(&self, time: usize, intervention: usize) -> usize {
        time * self.interventions.len() + intervention
    }

    /// Time and intervention labels of a matrix column.
    pub fn column_labels(&self, col: usize) -> Option<(&str, &str)> {
        let n_interventions = self.interventions.len();
        if n_interventions == 0 {
            return None;
        }
        let time = self.times.labels.get(col / n_interventions)?;
        let intervention = self.interventions.labels.get(col % n_interventions)?;
        Some((time.as_str(), intervention.as_str()))
    }

    /// Matrix cell `(row, col)` addressed by labels.
    pub fn cell_of(&self, unit: &str, time: &str, intervention: &str) -> Option<(usize, usize)> {
        let row = self.units.position(unit)?;
        let t = self.times.position(time)?;
        let i = self.interventions.position(intervention)?;
        Some((row, self.column_index(t, i)))
    }
}

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, PanelError> {
    df.column(name)
        .map_err(|_| PanelError::ColumnNotFound(name.to_string()))
}

/// Per-row string labels of a key column, plus numeric values when the whole
/// column converts to numbers.
fn key_labels(df: &DataFrame, name: &str) -> Result<(Vec<String>, Option<Vec<f64>>), PanelError> {
    let col = column(df, name)?;
    if col.null_count() > 0 {
        return Err(PanelError::MissingKeyValues(name.to_string()));
    }

    let as_text = col
        .cast(&DataType::String)
        .map_err(|_| PanelError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "string-convertible key",
            found_type: format!("{:?}", col.dtype()),
        })?;
    let labels: Vec<String> = as_text
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect();

    let numeric = match col.cast(&DataType::Float64) {
        Ok(casted) if casted.null_count() == 0 => {
            let values: Vec<f64> = casted
                .as_materialized_series()
                .f64()?
                .into_no_null_iter()
                .collect();
            Some(values)
        }
        _ => None,
    };
    Ok((labels, numeric))
}

/// Sorted distinct labels (numeric order when values are given) and each row's position.
fn build_axis(labels: &[String], numeric: Option<&[f64]>) -> (AxisIndex, Vec<usize>) {
    let mut distinct: Vec<(Option<f64>, &String)> = labels
        .iter()
        .enumerate()
        .map(|(row, label)| (numeric.map(|values| values[row]), label))
        .unique_by(|(_, label)| *label)
        .collect();
    distinct.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.1.cmp(b.1)),
        _ => a.1.cmp(b.1),
    });
    let axis = AxisIndex::new(distinct.into_iter().map(|(_, label)| label.clone()).collect());
    let rows = labels
        .iter()
        .map(|label| axis.position(label).unwrap_or(0))
        .collect();
    (axis, rows)
}

fn metric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, PanelError> {
    let col = column(df, name)?;
    let wrong_type = || PanelError::ColumnWrongType {
        column_name: name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", col.dtype()),
    };
    let casted = col.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > col.null_count() {
        return Err(wrong_type());
    }
    Ok(casted
        .as_materialized_series()
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Builds the panel tensors for `metrics` from a long-format table.
///
/// Intervention labels are the `actions` values of a row joined with `-`; with no
/// action columns every row shares the single intervention `""`.
pub fn build_panel(
    df: &DataFrame,
    unit_column: &str,
    time_column: &str,
    metrics: &[&str],
    actions: &[&str],
) -> Result<Panel, PanelError> {
    if metrics.is_empty() {
        return Err(PanelError::NoMetrics);
    }
    for name in [unit_column, time_column]
        .iter()
        .chain(metrics)
        .chain(actions)
    {
        column(df, name)?;
    }
    if df.height() == 0 {
        return Err(PanelError::EmptyTable);
    }

    let (unit_labels, unit_numeric) = key_labels(df, unit_column)?;
    let (time_labels, time_numeric) = key_labels(df, time_column)?;
    let (units, unit_rows) = build_axis(&unit_labels, unit_numeric.as_deref());
    let (times, time_rows) = build_axis(&time_labels, time_numeric.as_deref());

    let action_labels: Vec<Vec<String>> = actions
        .iter()
        .map(|name| key_labels(df, name).map(|(labels, _)| labels))
        .collect::<Result<_, _>>()?;
    let intervention_labels: Vec<String> = (0..df.height())
        .map(|row| action_labels.iter().map(|labels| labels[row].as_str()).join("-"))
        .collect();
    let (interventions, intervention_rows) = build_axis(&intervention_labels, None);

    let shape = (units.len(), times.len(), interventions.len());
    let mut seen = Array3::from_elem(shape, false);
    for row in 0..df.height() {
        let key = (unit_rows[row], time_rows[row], intervention_rows[row]);
        if seen[key] {
            return Err(PanelError::DuplicateObservation {
                unit: unit_labels[row].clone(),
                time: time_labels[row].clone(),
                intervention: intervention_labels[row].clone(),
            });
        }
        seen[key] = true;
    }

    let mut tensors = Vec::with_capacity(metrics.len());
    for name in metrics {
        let values = metric_values(df, name)?;
        let mut tensor = Array3::from_elem(shape, f64::NAN);
        for (row, value) in values.into_iter().enumerate() {
            tensor[(unit_rows[row], time_rows[row], intervention_rows[row])] = value;
        }
        tensors.push(tensor);
    }

    log::info!(
        "Built panel with {} units, {} times, {} interventions and {} metric(s).",
        shape.0,
        shape.1,
        shape.2,
        metrics.len()
    );

    Ok(Panel {
        units,
        times,
        interventions,
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        tensors,
    })
}

/// Copy of `matrix` with every `true` entry of `mask` treated as missing.
pub fn apply_observation_mask(
    matrix: ArrayView2<f64>,
    mask: ArrayView2<bool>,
) -> Result<Array2<f64>, PanelError> {
    if matrix.dim() != mask.dim() {
        return Err(PanelError::MaskShapeMismatch {
            expected: matrix.dim(),
            found: mask.dim(),
        });
    }
    let mut masked = matrix.to_owned();
    Zip::from(&mut masked).and(&mask).for_each(|value, &hidden| {
        if hidden {
            *value = f64::NAN;
        }
    });
    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn long_table() -> DataFrame {
        df!(
            "unit" => [10i64, 2, 10, 2, 10, 2],
            "time" => [1i64, 1, 2, 2, 1, 2],
            "action" => ["ctrl", "ctrl", "ctrl", "ctrl", "treat", "treat"],
            "sales" => [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(6.0)],
            "visits" => [7i64, 8, 9, 10, 11, 12]
        )
        .unwrap()
    }

    #[test]
    fn builds_time_major_matrix() {
        let df = long_table();
        let panel = build_panel(&df, "unit", "time", &["sales", "visits"], &["action"]).unwrap();
        assert_eq!(panel.units(), ["2", "10"]);
        assert_eq!(panel.times(), ["1", "2"]);
        assert_eq!(panel.interventions(), ["ctrl", "treat"]);
        assert_eq!(panel.shape(), (2, 2, 2));

        let sales = panel.matrix("sales").unwrap();
        assert_eq!(sales.dim(), (2, 4));
        // Unit 2: (t1, ctrl) = 2, (t1, treat) absent, (t2, ctrl) null, (t2, treat) = 6.
        assert_eq!(sales[(0, 0)], 2.0);
        assert!(sales[(0, 1)].is_nan());
        assert!(sales[(0, 2)].is_nan());
        assert_eq!(sales[(0, 3)], 6.0);
        // Unit 10: 1, 5, 3, absent.
        assert_eq!(sales[(1, 0)], 1.0);
        assert_eq!(sales[(1, 1)], 5.0);
        assert_eq!(sales[(1, 2)], 3.0);
        assert!(sales[(1, 3)].is_nan());

        assert_eq!(panel.matrix("visits").unwrap()[(1, 1)], 11.0);
        assert_eq!(panel.cell_of("10", "2", "ctrl"), Some((1, 2)));
        assert_eq!(panel.column_labels(3), Some(("2", "treat")));
        assert_eq!(panel.cell_of("3", "2", "ctrl"), None);
        assert!(panel.matrix("revenue").is_none());
    }

    #[test]
    fn numeric_keys_sort_numerically_and_strings_lexicographically() {
        let df = df!(
            "unit" => ["b", "a", "c"],
            "time" => [10i64, 9, 100],
            "sales" => [1.0, 2.0, 3.0]
        )
        .unwrap();
        let panel = build_panel(&df, "unit", "time", &["sales"], &[]).unwrap();
        assert_eq!(panel.units(), ["a", "b", "c"]);
        assert_eq!(panel.times(), ["9", "10", "100"]);
        assert_eq!(panel.interventions(), [""]);
        let x = panel.matrix("sales").unwrap();
        assert_eq!(x.dim(), (3, 3));
        assert_eq!(x[(0, 0)], 2.0);
        assert_eq!(x[(2, 2)], 3.0);
    }

    #[test]
    fn multiple_actions_join_with_dash() {
        let df = df!(
            "unit" => [1i64, 1],
            "time" => [1i64, 1],
            "a" => ["x", "x"],
            "b" => [1i64, 2],
            "sales" => [1.0, 2.0]
        )
        .unwrap();
        let panel = build_panel(&df, "unit", "time", &["sales"], &["a", "b"]).unwrap();
        assert_eq!(panel.interventions(), ["x-1", "x-2"]);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let df = df!(
            "unit" => [1i64, 1],
            "time" => [3i64, 3],
            "sales" => [1.0, 2.0]
        )
        .unwrap();
        match build_panel(&df, "unit", "time", &["sales"], &[]) {
            Err(PanelError::DuplicateObservation { unit, time, intervention }) => {
                assert_eq!((unit.as_str(), time.as_str(), intervention.as_str()), ("1", "3", ""));
            }
            other => panic!("Expected DuplicateObservation, got {:?}", other),
        }
    }

    #[test]
    fn invalid_inputs_are_reported() {
        let df = long_table();
        assert!(matches!(
            build_panel(&df, "unit", "time", &["revenue"], &[]),
            Err(PanelError::ColumnNotFound(name)) if name == "revenue"
        ));
        assert!(matches!(
            build_panel(&df, "unit", "time", &[], &[]),
            Err(PanelError::NoMetrics)
        ));
        assert!(matches!(
            build_panel(&df, "unit", "time", &["action"], &[]),
            Err(PanelError::ColumnWrongType { .. })
        ));

        let null_keys = df!(
            "unit" => [Some(1i64), None],
            "time" => [1i64, 2],
            "sales" => [1.0, 2.0]
        )
        .unwrap();
        assert!(matches!(
            build_panel(&null_keys, "unit", "time", &["sales"], &[]),
            Err(PanelError::MissingKeyValues(name)) if name == "unit"
        ));
    }

    #[test]
    fn source_table_is_untouched() {
        let df = long_table();
        let before = df.clone();
        build_panel(&df, "unit", "time", &["sales"], &["action"]).unwrap();
        assert!(df.equals_missing(&before));
    }

    #[test]
    fn observation_mask_hides_entries() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let mask = array![[false, true], [false, false]];
        let masked = apply_observation_mask(x.view(), mask.view()).unwrap();
        assert!(masked[(0, 1)].is_nan());
        assert_eq!(masked[(1, 1)], 4.0);
        assert_eq!(x[(0, 1)], 2.0);

        let wrong = Array2::from_elem((3, 2), false);
        assert!(matches!(
            apply_observation_mask(x.view(), wrong.view()),
            Err(PanelError::MaskShapeMismatch { .. })
        ));
    }
}
