//! # Learner Seam
//!
//! The harness does not own a learning algorithm. Cross-validation and the batch
//! driver only see two traits:
//!
//! - [`Learner`]: a stateless recipe that, given a [`ModelFrame`], returns a
//!   freshly trained [`Predictor`]. Every fold calls `fit` again, so no state can
//!   leak from one fold into the next.
//! - [`Predictor`]: a trained model that maps an unlabeled matrix to one number
//!   per row.
//!
//! Two small reference learners live here so the binary is usable on its own:
//! a weighted mean baseline and a Tanimoto k-nearest-neighbour regressor. Which one
//! runs is chosen by [`ModelSpec`], the serializable form used in config files.

use crate::dataset::ModelFrame;
use crate::transfer::tanimoto;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Cannot train a model on an empty training partition.")]
    EmptyTrainingSet,
    #[error(
        "Training matrix has {rows} rows but {labels} labels and {weights} weights were supplied."
    )]
    ShapeMismatch {
        rows: usize,
        labels: usize,
        weights: usize,
    },
    #[error("Model was trained on {expected} columns but was asked to predict from {found}.")]
    ColumnCountMismatch { expected: usize, found: usize },
    #[error(
        "Instance weights must be finite and non-negative, with a positive total. Found total {total}."
    )]
    DegenerateWeights { total: f64 },
    #[error("Non-finite training label at row {0}.")]
    NonFiniteLabel(usize),
    #[error("The number of neighbours must be at least 1.")]
    InvalidNeighbourCount,
}

/// A trained model.
pub trait Predictor: Send + Sync {
    /// Predicts one value per row of `x`.
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError>;
}

/// A recipe for training a fresh [`Predictor`].
pub trait Learner: Sync {
    fn fit(&self, frame: &ModelFrame) -> Result<Box<dyn Predictor>, ModelError>;
}

/// Serializable choice of reference learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Predicts the weighted mean of the training labels.
    Mean,
    /// Weighted k-nearest neighbours under the continuous Tanimoto similarity.
    Knn {
        #[serde(default = "default_neighbours")]
        k: usize,
    },
}

pub const DEFAULT_NEIGHBOURS: usize = 5;

fn default_neighbours() -> usize {
    DEFAULT_NEIGHBOURS
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::Knn {
            k: DEFAULT_NEIGHBOURS,
        }
    }
}

impl Learner for ModelSpec {
    fn fit(&self, frame: &ModelFrame) -> Result<Box<dyn Predictor>, ModelError> {
        match *self {
            ModelSpec::Mean => MeanLearner.fit(frame),
            ModelSpec::Knn { k } => KnnLearner::new(k)?.fit(frame),
        }
    }
}

/// Checks the frame and returns the total instance weight.
fn validate_frame(frame: &ModelFrame) -> Result<f64, ModelError> {
    let rows = frame.x.nrows();
    if rows == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if frame.y.len() != rows || frame.weights.len() != rows {
        return Err(ModelError::ShapeMismatch {
            rows,
            labels: frame.y.len(),
            weights: frame.weights.len(),
        });
    }
    if let Some(row) = frame.y.iter().position(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteLabel(row));
    }
    let total = frame.weights.sum();
    if frame.weights.iter().any(|&w| !w.is_finite() || w < 0.0) || total <= 0.0 {
        return Err(ModelError::DegenerateWeights { total });
    }
    Ok(total)
}

fn weighted_mean(y: ArrayView1<f64>, weights: ArrayView1<f64>, total: f64) -> f64 {
    y.dot(&weights) / total
}

/// Baseline learner: every prediction is the weighted training mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanLearner;

struct ConstantPredictor {
    value: f64,
    width: usize,
}

impl Learner for MeanLearner {
    fn fit(&self, frame: &ModelFrame) -> Result<Box<dyn Predictor>, ModelError> {
        let total = validate_frame(frame)?;
        Ok(Box::new(ConstantPredictor {
            value: weighted_mean(frame.y.view(), frame.weights.view(), total),
            width: frame.x.ncols(),
        }))
    }
}

impl Predictor for ConstantPredictor {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.width {
            return Err(ModelError::ColumnCountMismatch {
                expected: self.width,
                found: x.ncols(),
            });
        }
        Ok(Array1::from_elem(x.nrows(), self.value))
    }
}

/// k-nearest-neighbour regression under the continuous Tanimoto similarity.
///
/// A neighbour contributes `instance_weight * max(similarity, 0)`. When every
/// contribution is zero the neighbours are averaged by instance weight alone, and
/// when that is zero too the training mean is returned.
#[derive(Debug, Clone, Copy)]
pub struct KnnLearner {
    k: usize,
}

impl KnnLearner {
    pub fn new(k: usize) -> Result<Self, ModelError> {
        if k == 0 {
            return Err(ModelError::InvalidNeighbourCount);
        }
        Ok(Self { k })
    }
}

struct KnnPredictor {
    k: usize,
    x: Array2<f64>,
    y: Array1<f64>,
    weights: Array1<f64>,
    fallback: f64,
}

impl Learner for KnnLearner {
    fn fit(&self, frame: &ModelFrame) -> Result<Box<dyn Predictor>, ModelError> {
        let total = validate_frame(frame)?;
        Ok(Box::new(KnnPredictor {
            k: self.k.min(frame.x.nrows()),
            x: frame.x.clone(),
            y: frame.y.clone(),
            weights: frame.weights.clone(),
            fallback: weighted_mean(frame.y.view(), frame.weights.view(), total),
        }))
    }
}

impl KnnPredictor {
    fn predict_row(&self, query: ArrayView1<f64>) -> f64 {
        let mut neighbours: Vec<(f64, usize)> = self
            .x
            .axis_iter(Axis(0))
            .enumerate()
            // Widths are checked by the caller, so the similarity is always defined.
            .map(|(i, row)| (tanimoto(query, row).unwrap_or(0.0), i))
            .collect();
        neighbours.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        neighbours.truncate(self.k);

        let (mut num, mut den) = (0.0, 0.0);
        for &(sim, i) in &neighbours {
            let w = self.weights[i] * sim.max(0.0);
            num += w * self.y[i];
            den += w;
        }
        if den > 0.0 {
            return num / den;
        }

        let (mut num, mut den) = (0.0, 0.0);
        for &(_, i) in &neighbours {
            num += self.weights[i] * self.y[i];
            den += self.weights[i];
        }
        if den > 0.0 { num / den } else { self.fallback }
    }
}

impl Predictor for KnnPredictor {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.x.ncols() {
            return Err(ModelError::ColumnCountMismatch {
                expected: self.x.ncols(),
                found: x.ncols(),
            });
        }
        let predictions: Vec<f64> = x
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.predict_row(row))
            .collect();
        Ok(Array1::from_vec(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn frame(x: Array2<f64>, y: Array1<f64>, weights: Array1<f64>) -> ModelFrame {
        ModelFrame {
            column_names: (0..x.ncols()).map(|i| format!("c{i}")).collect(),
            x,
            y,
            weights,
        }
    }

    #[test]
    fn mean_learner_respects_weights() {
        let data = frame(
            array![[1.0], [0.0]],
            array![2.0, 10.0],
            array![3.0, 1.0],
        );
        let model = MeanLearner.fit(&data).unwrap();
        let preds = model.predict(array![[5.0], [6.0]].view()).unwrap();
        assert_abs_diff_eq!(preds[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(preds[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn fit_rejects_empty_and_degenerate_frames() {
        let empty = frame(Array2::zeros((0, 2)), Array1::zeros(0), Array1::zeros(0));
        assert_eq!(MeanLearner.fit(&empty).err(), Some(ModelError::EmptyTrainingSet));

        let zero_weights = frame(array![[1.0]], array![1.0], array![0.0]);
        assert!(matches!(
            MeanLearner.fit(&zero_weights).err(),
            Some(ModelError::DegenerateWeights { .. })
        ));

        let nan_label = frame(array![[1.0]], array![f64::NAN], array![1.0]);
        assert_eq!(MeanLearner.fit(&nan_label).err(), Some(ModelError::NonFiniteLabel(0)));
    }

    #[test]
    fn knn_recovers_identical_neighbour() {
        let data = frame(
            array![[1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]],
            array![7.0, 3.0, 5.0],
            array![1.0, 1.0, 1.0],
        );
        let model = KnnLearner::new(1).unwrap().fit(&data).unwrap();
        let preds = model.predict(array![[0.0, 0.0, 1.0]].view()).unwrap();
        assert_abs_diff_eq!(preds[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn knn_blends_by_similarity() {
        let data = frame(
            array![[1.0, 0.0], [1.0, 1.0]],
            array![2.0, 4.0],
            array![1.0, 1.0],
        );
        let model = ModelSpec::Knn { k: 2 }.fit(&data).unwrap();
        // Query [1, 0]: similarity 1.0 to the first row and 0.5 to the second.
        let preds = model.predict(array![[1.0, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(preds[0], (2.0 + 0.5 * 4.0) / 1.5, epsilon = 1e-12);
    }

    #[test]
    fn knn_falls_back_when_nothing_is_similar() {
        let data = frame(array![[1.0, 0.0]], array![6.0], array![2.0]);
        let model = KnnLearner::new(3).unwrap().fit(&data).unwrap();
        let preds = model.predict(array![[0.0, 1.0]].view()).unwrap();
        assert_abs_diff_eq!(preds[0], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn predictors_check_column_count() {
        let data = frame(array![[1.0, 0.0]], array![6.0], array![1.0]);
        let model = ModelSpec::Mean.fit(&data).unwrap();
        assert_eq!(
            model.predict(array![[1.0]].view()).err(),
            Some(ModelError::ColumnCountMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(KnnLearner::new(0).err(), Some(ModelError::InvalidNeighbourCount));
    }

    #[test]
    fn model_spec_reads_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            model: ModelSpec,
        }
        let knn: Wrapper = toml::from_str("[model]\nkind = \"knn\"\nk = 3\n").unwrap();
        assert_eq!(knn.model, ModelSpec::Knn { k: 3 });
        let default_k: Wrapper = toml::from_str("[model]\nkind = \"knn\"\n").unwrap();
        assert_eq!(default_k.model, ModelSpec::Knn { k: DEFAULT_NEIGHBOURS });
        let mean: Wrapper = toml::from_str("[model]\nkind = \"mean\"\n").unwrap();
        assert_eq!(mean.model, ModelSpec::Mean);
    }
}
