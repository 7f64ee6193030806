//! Merges the per-target datasets of one group into a single [`CombinedDataset`].
//!
//! Rows keep their order: all rows of the first target, then all rows of the
//! second, and so on. Each row is tagged with the target it came from, and the
//! molecule identifiers are carried as a categorical column whose domain is the
//! de-duplicated identifiers in first-occurrence order.

use crate::dataset::{
    CategoricalColumn, CombinedDataset, Dataset, DatasetError, MOLECULE_ID_COLUMN,
    TARGET_ID_COLUMN,
};
use crate::io::DataError;
use ahash::AHashSet;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Cannot assemble an empty group: the manifest lists no targets.")]
    EmptyGroup,
    #[error("Target '{0}' is listed more than once in the group.")]
    DuplicateTarget(String),
    #[error("Failed to load the dataset for target '{target}': {source}")]
    Load {
        target: String,
        #[source]
        source: DataError,
    },
    #[error(
        "The dataset for target '{target}' does not match the first target's schema: {detail}"
    )]
    SchemaMismatch { target: String, detail: String },
    #[error("Failed to build the combined dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// Anything that can hand out the dataset of a target by identifier.
pub trait DatasetSource: Sync {
    fn load(&self, target_id: &str) -> Result<Dataset, DataError>;
}

/// In-memory sources, mostly for tests and for callers that already hold the data.
impl DatasetSource for HashMap<String, Dataset> {
    fn load(&self, target_id: &str) -> Result<Dataset, DataError> {
        self.get(target_id)
            .cloned()
            .ok_or_else(|| DataError::UnknownTarget(target_id.to_string()))
    }
}

/// Loads every target of the group in order and stacks them into one table.
pub fn assemble(
    target_ids: &[String],
    source: &(impl DatasetSource + ?Sized),
) -> Result<CombinedDataset, AssemblyError> {
    if target_ids.is_empty() {
        return Err(AssemblyError::EmptyGroup);
    }
    let mut seen = AHashSet::with_capacity(target_ids.len());
    if let Some(duplicate) = target_ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(AssemblyError::DuplicateTarget(duplicate.clone()));
    }

    let mut parts: Vec<Dataset> = Vec::with_capacity(target_ids.len());
    for target in target_ids {
        let dataset = source.load(target).map_err(|source| AssemblyError::Load {
            target: target.clone(),
            source,
        })?;
        if let Some(first) = parts.first() {
            if let Some(detail) = dataset.schema_difference(first) {
                return Err(AssemblyError::SchemaMismatch {
                    target: target.clone(),
                    detail,
                });
            }
        }
        log::debug!("Target {target} contributes {} rows", dataset.len());
        parts.push(dataset);
    }

    let tags: Vec<&str> = target_ids
        .iter()
        .zip(&parts)
        .flat_map(|(target, part)| std::iter::repeat_n(target.as_str(), part.len()))
        .collect();
    let target_column = CategoricalColumn::with_domain(TARGET_ID_COLUMN, target_ids.to_vec(), &tags)?;

    let refs: Vec<&Dataset> = parts.iter().collect();
    let stacked = Dataset::concat(&refs)?;
    let molecule_column =
        CategoricalColumn::from_first_occurrence(MOLECULE_ID_COLUMN, stacked.molecule_ids().to_vec());

    log::info!(
        "Assembled {} targets into {} rows ({} distinct molecules)",
        target_ids.len(),
        stacked.len(),
        molecule_column.domain().len()
    );

    Ok(CombinedDataset::new(
        molecule_column,
        target_column,
        stacked.feature_names().to_vec(),
        stacked.features().clone(),
        stacked.label_name(),
        stacked.labels().clone(),
    )?)
}
