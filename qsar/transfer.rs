//! # Transfer Instance Selection
//!
//! Decides which rows of a donor ("source") target are worth borrowing into a
//! training set built for another ("target") target, and how much each borrowed
//! row should weigh.
//!
//! A source row is compared to every target row with the continuous Tanimoto
//! coefficient over the feature vectors. Rows that are close to enough target rows
//! are selected. Rows whose molecule identifier already occurs in the target are
//! never borrowed, because the target's own measurement for that molecule is
//! already in the training set.
//!
//! The scan is `O(|source| * |target|)` similarity evaluations and is run in
//! parallel over source rows.

use crate::dataset::{Dataset, DatasetError, RowView};
use ahash::AHashSet;
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TransferError {
    #[error("Tanimoto similarity needs equal-length vectors; got lengths {left} and {right}.")]
    LengthMismatch { left: usize, right: usize },
    #[error("Target dataset has {target_width} features but the source dataset has {source_width}.")]
    WidthMismatch {
        target_width: usize,
        source_width: usize,
    },
    #[error("Neighbour similarity threshold {0} must lie within [0, 1].")]
    InvalidThreshold(f64),
    #[error("The neighbour-count divisor must be at least 1.")]
    InvalidDivisor,
}

/// Continuous Tanimoto coefficient `a·b / (|a|² + |b|² - a·b)`.
///
/// Two all-zero vectors have no overlap to measure and score `0.0`.
pub fn tanimoto(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64, TransferError> {
    if a.len() != b.len() {
        return Err(TransferError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let ab = a.dot(&b);
    let denom = a.dot(&a) + b.dot(&b) - ab;
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok(ab / denom)
}

/// How a selected row is weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPolicy {
    /// The similarity between the two targets themselves.
    #[default]
    OrgSim,
    /// The highest neighbour similarity found for the row.
    MaxNeighborSim,
    /// Every selected row weighs `1`.
    Uniform,
    /// The sum of all similarities to the target, divided by the target size.
    MeanNeighborSim,
}

/// Tunable constants of the selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// Lower bound (inclusive) for a target row to count as a neighbour. The upper
    /// bound is always `1.0`, exclusive.
    pub neighbor_threshold: f64,
    /// A row is selected when its neighbour count reaches
    /// `target_size / min_neighbor_divisor` (integer division).
    pub min_neighbor_divisor: usize,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            neighbor_threshold: 0.5,
            min_neighbor_divisor: 4,
        }
    }
}

impl SelectionParams {
    pub fn validate(&self) -> Result<(), TransferError> {
        if !(0.0..=1.0).contains(&self.neighbor_threshold) {
            return Err(TransferError::InvalidThreshold(self.neighbor_threshold));
        }
        if self.min_neighbor_divisor == 0 {
            return Err(TransferError::InvalidDivisor);
        }
        Ok(())
    }
}

/// Similarity summary of one source row against the whole target.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NeighborStats {
    /// Target rows with similarity in `[threshold, 1.0)`.
    pub count: usize,
    /// Highest similarity among those neighbours, `0.0` if there are none.
    pub max: f64,
    /// Sum of the similarities to every target row, unfiltered.
    pub sum: f64,
}

/// A source row chosen for borrowing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedRow {
    /// Row index in the source dataset.
    pub index: usize,
    pub weight: f64,
}

fn scan_row(
    target: &Dataset,
    row: RowView<'_>,
    threshold: f64,
) -> Result<NeighborStats, TransferError> {
    let mut stats = NeighborStats::default();
    for target_row in target.rows() {
        let sim = tanimoto(row.features, target_row.features)?;
        stats.sum += sim;
        if sim >= threshold && sim < 1.0 {
            stats.count += 1;
            if sim > stats.max {
                stats.max = sim;
            }
        }
    }
    Ok(stats)
}

/// Selects source rows similar to the target and assigns their weights.
///
/// The result is in source order. Neither dataset is modified.
pub fn select(
    target: &Dataset,
    source: &Dataset,
    pair_similarity: f64,
    policy: WeightPolicy,
    params: &SelectionParams,
) -> Result<Vec<SelectedRow>, TransferError> {
    params.validate()?;
    if target.width() != source.width() {
        return Err(TransferError::WidthMismatch {
            target_width: target.width(),
            source_width: source.width(),
        });
    }
    if target.is_empty() {
        return Ok(Vec::new());
    }

    let target_ids: AHashSet<&str> = target.molecule_ids().iter().map(String::as_str).collect();
    let required = target.len() / params.min_neighbor_divisor;
    let target_size = target.len() as f64;

    let picked = (0..source.len())
        .into_par_iter()
        .map(|index| -> Result<Option<SelectedRow>, TransferError> {
            let row = source.row(index);
            if target_ids.contains(row.molecule_id) {
                return Ok(None);
            }
            let stats = scan_row(target, row, params.neighbor_threshold)?;
            if stats.count < required {
                return Ok(None);
            }
            let weight = match policy {
                WeightPolicy::OrgSim => pair_similarity,
                WeightPolicy::MaxNeighborSim => stats.max,
                WeightPolicy::Uniform => 1.0,
                WeightPolicy::MeanNeighborSim => stats.sum / target_size,
            };
            Ok(Some(SelectedRow { index, weight }))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(picked.into_iter().flatten().collect())
}

/// Copies the selected rows out of `source`, carrying their weights.
pub fn materialize(source: &Dataset, selected: &[SelectedRow]) -> Result<Dataset, DatasetError> {
    let indices: Vec<usize> = selected.iter().map(|s| s.index).collect();
    let weights: Array1<f64> = selected.iter().map(|s| s.weight).collect();
    source.select_rows(&indices).with_weights(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MOLECULE_ID_COLUMN;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn dataset(ids: &[&str], rows: Vec<Vec<f64>>) -> Dataset {
        let width = rows[0].len();
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Dataset::new(
            MOLECULE_ID_COLUMN,
            (0..width).map(|i| format!("b{i}")).collect(),
            "pchembl",
            ids.iter().map(|s| s.to_string()).collect(),
            Array2::from_shape_vec((rows.len(), width), flat).unwrap(),
            Array1::from_elem(rows.len(), 6.0),
        )
        .unwrap()
    }

    #[test]
    fn tanimoto_self_identity_and_bounds() {
        let v = array![1.0, 0.0, 1.0, 1.0];
        assert_abs_diff_eq!(tanimoto(v.view(), v.view()).unwrap(), 1.0, epsilon = 1e-12);

        let w = array![0.0, 1.0, 1.0, 0.0];
        let s = tanimoto(v.view(), w.view()).unwrap();
        // dot = 1, |v|² = 3, |w|² = 2
        assert_abs_diff_eq!(s, 1.0 / 4.0, epsilon = 1e-12);
        assert!((0.0..=1.0).contains(&s));

        let zero = Array1::<f64>::zeros(4);
        assert_eq!(tanimoto(zero.view(), zero.view()).unwrap(), 0.0);
    }

    #[test]
    fn tanimoto_rejects_unequal_lengths() {
        let a = array![1.0, 0.0];
        let b = array![1.0];
        assert_eq!(
            tanimoto(a.view(), b.view()),
            Err(TransferError::LengthMismatch { left: 2, right: 1 })
        );
    }

    #[test]
    fn shared_molecules_are_never_selected() {
        let target = dataset(&["m1", "m2"], vec![vec![1.0, 1.0, 0.0], vec![1.0, 0.0, 1.0]]);
        // "m1" is a near copy of every target row but is already measured on the target.
        let source = dataset(
            &["m1", "s2"],
            vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]],
        );
        let picked = select(
            &target,
            &source,
            0.7,
            WeightPolicy::Uniform,
            &SelectionParams::default(),
        )
        .unwrap();
        assert_eq!(picked, vec![SelectedRow { index: 1, weight: 1.0 }]);
    }

    #[test]
    fn exact_duplicates_do_not_count_as_neighbours() {
        let target = dataset(&["t1", "t2", "t3", "t4"], vec![vec![1.0, 1.0]; 4]);
        let identical = dataset(&["s1"], vec![vec![1.0, 1.0]]);
        let picked = select(
            &target,
            &identical,
            0.7,
            WeightPolicy::Uniform,
            &SelectionParams::default(),
        )
        .unwrap();
        assert!(picked.is_empty());
    }

    #[test]
    fn weight_policies() {
        // Target rows: a=[1,1,0,0], b=[1,1,1,1], c=[0,0,0,1], d=[0,0,1,1].
        let target = dataset(
            &["a", "b", "c", "d"],
            vec![
                vec![1.0, 1.0, 0.0, 0.0],
                vec![1.0, 1.0, 1.0, 1.0],
                vec![0.0, 0.0, 0.0, 1.0],
                vec![0.0, 0.0, 1.0, 1.0],
            ],
        );
        // s=[1,1,1,0]: sims a=2/3, b=3/4, c=0, d=1/4.
        let source = dataset(&["s"], vec![vec![1.0, 1.0, 1.0, 0.0]]);
        let params = SelectionParams::default();
        let weight = |policy| select(&target, &source, 0.3, policy, &params).unwrap()[0].weight;

        assert_abs_diff_eq!(weight(WeightPolicy::OrgSim), 0.3);
        assert_abs_diff_eq!(weight(WeightPolicy::MaxNeighborSim), 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(weight(WeightPolicy::Uniform), 1.0);
        let mean = (2.0 / 3.0 + 0.75 + 0.0 + 0.25) / 4.0;
        assert_abs_diff_eq!(weight(WeightPolicy::MeanNeighborSim), mean, epsilon = 1e-12);
    }

    #[test]
    fn neighbour_count_threshold_uses_integer_division() {
        // Eight target rows: a row needs at least 8 / 4 = 2 neighbours.
        let mut rows = vec![vec![1.0, 1.0, 0.0, 0.0]];
        rows.extend(std::iter::repeat_n(vec![0.0, 0.0, 1.0, 1.0], 7));
        let ids: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let target = dataset(&id_refs, rows);

        // One neighbour only (similarity 2/3 with the first row).
        let source = dataset(&["s"], vec![vec![1.0, 1.0, 1.0, 0.0]]);
        let params = SelectionParams::default();
        let picked = select(&target, &source, 1.0, WeightPolicy::Uniform, &params).unwrap();
        assert!(picked.is_empty());

        let relaxed = SelectionParams {
            min_neighbor_divisor: 8,
            ..params
        };
        let picked = select(&target, &source, 1.0, WeightPolicy::Uniform, &relaxed).unwrap();
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn selection_preserves_source_order_and_materializes_weights() {
        let target = dataset(&["t1", "t2"], vec![vec![1.0, 1.0, 0.0], vec![1.0, 1.0, 1.0]]);
        let source = dataset(
            &["s1", "s2", "s3"],
            vec![vec![1.0, 0.0, 0.0], vec![1.0, 1.0, 0.5], vec![0.0, 1.0, 1.0]],
        );
        let picked = select(
            &target,
            &source,
            0.9,
            WeightPolicy::OrgSim,
            &SelectionParams::default(),
        )
        .unwrap();
        let indices: Vec<usize> = picked.iter().map(|s| s.index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);

        let borrowed = materialize(&source, &picked).unwrap();
        assert_eq!(borrowed.len(), picked.len());
        assert!(borrowed.weights().iter().all(|&w| w == 0.9));
    }

    #[test]
    fn width_and_parameter_validation() {
        let target = dataset(&["t"], vec![vec![1.0, 0.0]]);
        let source = dataset(&["s"], vec![vec![1.0, 0.0, 0.0]]);
        assert_eq!(
            select(&target, &source, 1.0, WeightPolicy::Uniform, &SelectionParams::default()),
            Err(TransferError::WidthMismatch {
                target_width: 2,
                source_width: 3
            })
        );

        let bad = SelectionParams {
            neighbor_threshold: 1.5,
            ..SelectionParams::default()
        };
        assert_eq!(bad.validate(), Err(TransferError::InvalidThreshold(1.5)));
        let bad = SelectionParams {
            min_neighbor_divisor: 0,
            ..SelectionParams::default()
        };
        assert_eq!(bad.validate(), Err(TransferError::InvalidDivisor));
    }
}
