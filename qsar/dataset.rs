//! # Tabular Data Model
//!
//! The in-memory tables the whole harness operates on. There are two shapes:
//!
//! - [`Dataset`]: one drug target's data. Each row is a molecule identifier, a
//!   fixed-width feature vector and a numeric activity label, plus an instance
//!   weight that is `1.0` unless a transfer-learning step assigned something else.
//! - [`CombinedDataset`]: the concatenation of a whole target group, carrying two
//!   categorical columns (molecule identifier and target identifier) and any number
//!   of similarity columns in addition to the shared feature block.
//!
//! Every transformation in this module returns a new value. Nothing is edited in
//! place, so a dataset handed to one fold or one group can never be observed half
//! way through a change made for another.

use ahash::AHashMap;
use ndarray::{Array1, Array2, ArrayView1, Axis, concatenate, s};
use thiserror::Error;

/// Header of the molecule identifier column, both on disk and in combined datasets.
pub const MOLECULE_ID_COLUMN: &str = "MOLECULE_CHEMBL_ID";
/// Header of the categorical target identifier column injected during assembly.
pub const TARGET_ID_COLUMN: &str = "ORGANISM_TID";
/// Prefix of the numeric "similarity to target X" columns.
pub const SIMILARITY_COLUMN_PREFIX: &str = "SIM_TO_";

#[derive(Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error(
        "Dataset has {ids} molecule identifiers, {rows} feature rows and {labels} labels; all three must agree."
    )]
    RowCountMismatch {
        ids: usize,
        rows: usize,
        labels: usize,
    },
    #[error("Dataset declares {names} feature names but its feature matrix has {width} columns.")]
    FeatureNameMismatch { names: usize, width: usize },
    #[error("Weight vector has {found} entries but the dataset has {expected} rows.")]
    WeightCountMismatch { found: usize, expected: usize },
    #[error("Column '{column}' has {found} values but the dataset has {expected} rows.")]
    ColumnLengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },
    #[error("Feature index {index} is out of range for a dataset with {width} features.")]
    FeatureIndexOutOfRange { index: usize, width: usize },
    #[error("Value '{value}' is not part of the declared domain of column '{column}'.")]
    UnknownCategory { column: String, value: String },
    #[error("Datasets do not share a schema: {0}")]
    SchemaMismatch(String),
    #[error("Cannot concatenate an empty list of datasets.")]
    NothingToConcatenate,
}

/// A borrowed view of one dataset row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub molecule_id: &'a str,
    pub features: ArrayView1<'a, f64>,
    pub label: f64,
    pub weight: f64,
}

/// One target's data: identifier column, feature block, label column.
#[derive(Debug, Clone)]
pub struct Dataset {
    id_column: String,
    feature_names: Vec<String>,
    label_name: String,
    molecule_ids: Vec<String>,
    /// Shape: [n_rows, n_features].
    features: Array2<f64>,
    labels: Array1<f64>,
    weights: Array1<f64>,
}

impl Dataset {
    /// Builds a dataset with unit weights, validating that every column has one
    /// entry per row and that the feature names match the matrix width.
    pub fn new(
        id_column: impl Into<String>,
        feature_names: Vec<String>,
        label_name: impl Into<String>,
        molecule_ids: Vec<String>,
        features: Array2<f64>,
        labels: Array1<f64>,
    ) -> Result<Self, DatasetError> {
        if molecule_ids.len() != features.nrows() || labels.len() != features.nrows() {
            return Err(DatasetError::RowCountMismatch {
                ids: molecule_ids.len(),
                rows: features.nrows(),
                labels: labels.len(),
            });
        }
        if feature_names.len() != features.ncols() {
            return Err(DatasetError::FeatureNameMismatch {
                names: feature_names.len(),
                width: features.ncols(),
            });
        }
        let weights = Array1::ones(labels.len());
        Ok(Self {
            id_column: id_column.into(),
            feature_names,
            label_name: label_name.into(),
            molecule_ids,
            features,
            labels,
            weights,
        })
    }

    /// Replaces the instance weights.
    pub fn with_weights(mut self, weights: Array1<f64>) -> Result<Self, DatasetError> {
        if weights.len() != self.len() {
            return Err(DatasetError::WeightCountMismatch {
                found: weights.len(),
                expected: self.len(),
            });
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Width of the feature vector shared by every row.
    pub fn width(&self) -> usize {
        self.features.ncols()
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn label_name(&self) -> &str {
        &self.label_name
    }

    pub fn molecule_ids(&self) -> &[String] {
        &self.molecule_ids
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn row(&self, index: usize) -> RowView<'_> {
        RowView {
            molecule_id: &self.molecule_ids[index],
            features: self.features.row(index),
            label: self.labels[index],
            weight: self.weights[index],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    /// Describes the first schema difference between two datasets, if any.
    /// Molecule identifier headers are allowed to differ; features and label are not.
    pub fn schema_difference(&self, other: &Dataset) -> Option<String> {
        if self.width() != other.width() {
            return Some(format!(
                "feature width {} differs from {}",
                other.width(),
                self.width()
            ));
        }
        if let Some((expected, found)) = self
            .feature_names
            .iter()
            .zip(&other.feature_names)
            .find(|(a, b)| a != b)
        {
            return Some(format!("feature column '{found}' where '{expected}' was expected"));
        }
        if self.label_name != other.label_name {
            return Some(format!(
                "label column '{}' where '{}' was expected",
                other.label_name, self.label_name
            ));
        }
        None
    }

    /// Returns a new dataset with the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            id_column: self.id_column.clone(),
            feature_names: self.feature_names.clone(),
            label_name: self.label_name.clone(),
            molecule_ids: indices.iter().map(|&i| self.molecule_ids[i].clone()).collect(),
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
            weights: self.weights.select(Axis(0), indices),
        }
    }

    /// Keeps only the listed feature columns, in the listed order.
    pub fn select_features(&self, indices: &[usize]) -> Result<Dataset, DatasetError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.width()) {
            return Err(DatasetError::FeatureIndexOutOfRange {
                index,
                width: self.width(),
            });
        }
        Ok(Dataset {
            id_column: self.id_column.clone(),
            feature_names: indices
                .iter()
                .map(|&i| self.feature_names[i].clone())
                .collect(),
            label_name: self.label_name.clone(),
            molecule_ids: self.molecule_ids.clone(),
            features: self.features.select(Axis(1), indices),
            labels: self.labels.clone(),
            weights: self.weights.clone(),
        })
    }

    /// Stacks datasets that share a schema, keeping row order and weights.
    pub fn concat(parts: &[&Dataset]) -> Result<Dataset, DatasetError> {
        let (first, rest) = parts
            .split_first()
            .ok_or(DatasetError::NothingToConcatenate)?;
        if let Some(diff) = rest.iter().find_map(|part| first.schema_difference(part)) {
            return Err(DatasetError::SchemaMismatch(diff));
        }

        let feature_views: Vec<_> = parts.iter().map(|d| d.features.view()).collect();
        let label_views: Vec<_> = parts.iter().map(|d| d.labels.view()).collect();
        let weight_views: Vec<_> = parts.iter().map(|d| d.weights.view()).collect();
        let features = concatenate(Axis(0), &feature_views)
            .map_err(|e| DatasetError::SchemaMismatch(e.to_string()))?;
        let labels = concatenate(Axis(0), &label_views)
            .map_err(|e| DatasetError::SchemaMismatch(e.to_string()))?;
        let weights = concatenate(Axis(0), &weight_views)
            .map_err(|e| DatasetError::SchemaMismatch(e.to_string()))?;

        Ok(Dataset {
            id_column: first.id_column.clone(),
            feature_names: first.feature_names.clone(),
            label_name: first.label_name.clone(),
            molecule_ids: parts
                .iter()
                .flat_map(|d| d.molecule_ids.iter().cloned())
                .collect(),
            features,
            labels,
            weights,
        })
    }

    /// The learner's view of the selected rows: features only, no identifier.
    pub fn model_frame(&self, rows: &[usize]) -> ModelFrame {
        ModelFrame {
            column_names: self.feature_names.clone(),
            x: self.features.select(Axis(0), rows),
            y: self.labels.select(Axis(0), rows),
            weights: self.weights.select(Axis(0), rows),
        }
    }
}

/// A categorical column: a declared domain plus one domain code per row.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalColumn {
    name: String,
    domain: Vec<String>,
    codes: Vec<usize>,
}

impl CategoricalColumn {
    /// Encodes `values` against an explicitly declared domain. Every value must be
    /// a member of the domain.
    pub fn with_domain<S: AsRef<str>>(
        name: impl Into<String>,
        domain: Vec<String>,
        values: &[S],
    ) -> Result<Self, DatasetError> {
        let name = name.into();
        let codes = {
            let index: AHashMap<&str, usize> = domain
                .iter()
                .enumerate()
                .map(|(code, value)| (value.as_str(), code))
                .collect();
            values
                .iter()
                .map(|value| {
                    index.get(value.as_ref()).copied().ok_or_else(|| {
                        DatasetError::UnknownCategory {
                            column: name.clone(),
                            value: value.as_ref().to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            name,
            domain,
            codes,
        })
    }

    /// Encodes `values` with a domain made of the distinct values in order of
    /// first occurrence.
    pub fn from_first_occurrence(name: impl Into<String>, values: Vec<String>) -> Self {
        let mut index: AHashMap<String, usize> = AHashMap::with_capacity(values.len());
        let mut domain = Vec::new();
        let codes = values
            .into_iter()
            .map(|value| match index.get(&value) {
                Some(&code) => code,
                None => {
                    let code = domain.len();
                    index.insert(value.clone(), code);
                    domain.push(value);
                    code
                }
            })
            .collect();
        Self {
            name: name.into(),
            domain,
            codes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &[String] {
        &self.domain
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    pub fn code(&self, row: usize) -> usize {
        self.codes[row]
    }

    pub fn value(&self, row: usize) -> &str {
        &self.domain[self.codes[row]]
    }

    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.codes.iter().map(move |&code| self.domain[code].as_str())
    }
}

/// A named numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericColumn {
    name: String,
    values: Array1<f64>,
}

impl NumericColumn {
    pub fn new(name: impl Into<String>, values: Array1<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }
}

/// A whole target group merged into one table.
///
/// Logical column order: molecule identifier, similarity columns, target
/// identifier, features, label.
#[derive(Debug, Clone)]
pub struct CombinedDataset {
    molecule_ids: CategoricalColumn,
    similarity: Vec<NumericColumn>,
    target_ids: CategoricalColumn,
    feature_names: Vec<String>,
    /// Shape: [n_rows, n_features].
    features: Array2<f64>,
    label_name: String,
    labels: Array1<f64>,
}

impl CombinedDataset {
    pub fn new(
        molecule_ids: CategoricalColumn,
        target_ids: CategoricalColumn,
        feature_names: Vec<String>,
        features: Array2<f64>,
        label_name: impl Into<String>,
        labels: Array1<f64>,
    ) -> Result<Self, DatasetError> {
        let n = labels.len();
        for column in [&molecule_ids, &target_ids] {
            if column.len() != n {
                return Err(DatasetError::ColumnLengthMismatch {
                    column: column.name().to_string(),
                    found: column.len(),
                    expected: n,
                });
            }
        }
        if features.nrows() != n {
            return Err(DatasetError::RowCountMismatch {
                ids: molecule_ids.len(),
                rows: features.nrows(),
                labels: n,
            });
        }
        if feature_names.len() != features.ncols() {
            return Err(DatasetError::FeatureNameMismatch {
                names: feature_names.len(),
                width: features.ncols(),
            });
        }
        Ok(Self {
            molecule_ids,
            similarity: Vec::new(),
            target_ids,
            feature_names,
            features,
            label_name: label_name.into(),
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn molecule_ids(&self) -> &CategoricalColumn {
        &self.molecule_ids
    }

    pub fn target_ids(&self) -> &CategoricalColumn {
        &self.target_ids
    }

    /// Similarity columns in table order (leftmost first).
    pub fn similarity_columns(&self) -> &[NumericColumn] {
        &self.similarity
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn label_name(&self) -> &str {
        &self.label_name
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    /// Full header in table order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(3 + self.similarity.len() + self.feature_names.len());
        names.push(self.molecule_ids.name().to_string());
        names.extend(self.similarity.iter().map(|c| c.name().to_string()));
        names.push(self.target_ids.name().to_string());
        names.extend(self.feature_names.iter().cloned());
        names.push(self.label_name.clone());
        names
    }

    /// Inserts a numeric column directly after the molecule identifier, i.e. in
    /// front of every similarity column added before it.
    pub fn with_leading_similarity(mut self, column: NumericColumn) -> Result<Self, DatasetError> {
        if column.values.len() != self.len() {
            return Err(DatasetError::ColumnLengthMismatch {
                column: column.name,
                found: column.values.len(),
                expected: self.len(),
            });
        }
        self.similarity.insert(0, column);
        Ok(self)
    }

    /// Number of rows carrying each target identifier, indexed by domain code.
    pub fn rows_per_target(&self) -> Vec<usize> {
        let mut counts = vec![0; self.target_ids.domain().len()];
        for &code in self.target_ids.codes() {
            counts[code] += 1;
        }
        counts
    }

    /// The learner's view of the selected rows.
    ///
    /// The molecule identifier is dropped. Similarity columns are copied as-is, the
    /// target identifier becomes one indicator column per domain value, and the
    /// feature block follows. Weights are uniform.
    pub fn model_frame(&self, rows: &[usize]) -> ModelFrame {
        let n_sim = self.similarity.len();
        let n_targets = self.target_ids.domain().len();
        let offset = n_sim + n_targets;
        let width = offset + self.feature_names.len();

        let mut column_names = Vec::with_capacity(width);
        column_names.extend(self.similarity.iter().map(|c| c.name().to_string()));
        column_names.extend(
            self.target_ids
                .domain()
                .iter()
                .map(|t| format!("{}={t}", self.target_ids.name())),
        );
        column_names.extend(self.feature_names.iter().cloned());

        let mut x = Array2::zeros((rows.len(), width));
        for (out, &row) in rows.iter().enumerate() {
            for (j, column) in self.similarity.iter().enumerate() {
                x[[out, j]] = column.values[row];
            }
            x[[out, n_sim + self.target_ids.code(row)]] = 1.0;
            x.slice_mut(s![out, offset..])
                .assign(&self.features.row(row));
        }

        ModelFrame {
            column_names,
            x,
            y: self.labels.select(Axis(0), rows),
            weights: Array1::ones(rows.len()),
        }
    }
}

/// The numeric matrix handed to a learner. The label is kept separate.
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub column_names: Vec<String>,
    /// Shape: [n_rows, column_names.len()].
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub weights: Array1<f64>,
}

impl ModelFrame {
    pub fn nrows(&self) -> usize {
        self.x.nrows()
    }
}
