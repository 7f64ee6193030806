//! Adds "similarity to target X" columns to a combined dataset.

use crate::dataset::{CombinedDataset, DatasetError, NumericColumn, SIMILARITY_COLUMN_PREFIX};
use crate::similarity::SimilarityTable;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value written when the similarity table has no entry for a pair.
pub const MISSING_SIMILARITY_SENTINEL: f64 = -1.0;

/// What to do when a pair of targets has no similarity score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingSimilarityPolicy {
    /// Write [`MISSING_SIMILARITY_SENTINEL`] and keep going.
    #[default]
    Sentinel,
    /// Abort on the first missing pair.
    Fail,
}

#[derive(Error, Debug)]
pub enum AugmentError {
    #[error(
        "No similarity score between targets '{row_target}' and '{column_target}' (row {row}); \
         set the missing-similarity policy to 'sentinel' to tolerate this."
    )]
    MissingPair {
        row: usize,
        row_target: String,
        column_target: String,
    },
    #[error("Failed to insert similarity column: {0}")]
    Dataset(#[from] DatasetError),
}

/// One row whose similarity to a column's target could not be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSimilarity {
    pub row: usize,
    pub row_target: String,
    pub column_target: String,
}

#[derive(Debug)]
pub struct Augmented {
    pub data: CombinedDataset,
    pub missing: Vec<MissingSimilarity>,
}

/// Inserts one `SIM_TO_<t>` column per entry of `target_ids`.
///
/// Each column is placed in front of the similarity columns added before it, so
/// the final order is the reverse of `target_ids`. A row belonging to `t` itself
/// gets exactly `1.0`.
pub fn augment(
    data: CombinedDataset,
    target_ids: &[String],
    table: &SimilarityTable,
    policy: MissingSimilarityPolicy,
) -> Result<Augmented, AugmentError> {
    let mut data = data;
    let mut missing = Vec::new();

    for column_target in target_ids {
        // One lookup per (row target, column target) pair.
        let per_code: Vec<Option<f64>> = data
            .target_ids()
            .domain()
            .iter()
            .map(|row_target| {
                if row_target == column_target {
                    Some(1.0)
                } else {
                    table.lookup(row_target, column_target)
                }
            })
            .collect();

        let mut values = Array1::zeros(data.len());
        for (row, &code) in data.target_ids().codes().iter().enumerate() {
            values[row] = match per_code[code] {
                Some(score) => score,
                None => {
                    let row_target = data.target_ids().value(row).to_string();
                    if policy == MissingSimilarityPolicy::Fail {
                        return Err(AugmentError::MissingPair {
                            row,
                            row_target,
                            column_target: column_target.clone(),
                        });
                    }
                    log::warn!(
                        "No similarity between {row_target} and {column_target} for row {row}; using {MISSING_SIMILARITY_SENTINEL}"
                    );
                    missing.push(MissingSimilarity {
                        row,
                        row_target,
                        column_target: column_target.clone(),
                    });
                    MISSING_SIMILARITY_SENTINEL
                }
            };
        }

        let name = format!("{SIMILARITY_COLUMN_PREFIX}{column_target}");
        data = data.with_leading_similarity(NumericColumn::new(name, values))?;
    }

    if !missing.is_empty() {
        log::warn!(
            "{} similarity lookups fell back to {MISSING_SIMILARITY_SENTINEL}",
            missing.len()
        );
    }
    Ok(Augmented { data, missing })
}
