//! Experiment configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) is a
//! valid configuration. Command-line flags are applied on top of the loaded
//! values and the merged result is validated once with
//! [`ExperimentConfig::validate`].

use crate::augment::MissingSimilarityPolicy;
use crate::model::ModelSpec;
use crate::transfer::{SelectionParams, TransferError, WeightPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Cross-validation needs at least 2 folds; the configuration asks for {0}.")]
    InvalidFolds(usize),
    #[error("The dataset extension must not be empty.")]
    EmptyExtension,
    #[error("The number of neighbours for the knn model must be at least 1.")]
    InvalidNeighbours,
    #[error("Invalid transfer selection settings: {0}")]
    Transfer(#[from] TransferError),
}

/// Where the similarity-pair file lives and how to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Appended to the group name: `<manifest_dir>/<group><suffix>`.
    pub suffix: String,
    pub has_header: bool,
    pub missing: MissingSimilarityPolicy,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            suffix: "_pid.pid".to_string(),
            has_header: true,
            missing: MissingSimilarityPolicy::Sentinel,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    #[serde(flatten)]
    pub selection: SelectionParams,
    pub weight_policy: WeightPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Directory holding the group manifests and similarity-pair files.
    pub manifest_dir: PathBuf,
    /// Directory holding one dataset file per target.
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub dataset_extension: String,
    pub folds: usize,
    /// Shuffle rows with this seed before building folds. No shuffle when absent.
    pub shuffle_seed: Option<u64>,
    /// Adds a `rep` column to group prediction files when set.
    pub repetition: Option<usize>,
    /// Optional `targetId,i,j,...` file restricting each target's features.
    pub feature_selection: Option<PathBuf>,
    pub similarity: SimilarityConfig,
    pub transfer: TransferConfig,
    pub model: ModelSpec,
}

pub const DEFAULT_FOLDS: usize = 10;

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            manifest_dir: PathBuf::from("."),
            data_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            dataset_extension: "csv".to_string(),
            folds: DEFAULT_FOLDS,
            shuffle_seed: None,
            repetition: None,
            feature_selection: None,
            similarity: SimilarityConfig::default(),
            transfer: TransferConfig::default(),
            model: ModelSpec::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.folds < 2 {
            return Err(ConfigError::InvalidFolds(self.folds));
        }
        if self.dataset_extension.trim().is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        if matches!(self.model, ModelSpec::Knn { k: 0 }) {
            return Err(ConfigError::InvalidNeighbours);
        }
        self.transfer.selection.validate()?;
        Ok(())
    }

    /// `<manifest_dir>/<group><suffix>`
    pub fn similarity_path(&self, group: &str) -> PathBuf {
        self.manifest_dir
            .join(format!("{group}{}", self.similarity.suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_yields_defaults() {
        let config: ExperimentConfig = toml::from_str("").unwrap();
        assert_eq!(config, ExperimentConfig::default());
        assert_eq!(config.folds, 10);
        assert_eq!(config.similarity.suffix, "_pid.pid");
        assert_abs_diff_eq!(config.transfer.selection.neighbor_threshold, 0.5);
        assert_eq!(config.transfer.selection.min_neighbor_divisor, 4);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let text = r#"
            folds = 5
            shuffle_seed = 11
            data_dir = "data"

            [similarity]
            missing = "fail"

            [transfer]
            neighbor_threshold = 0.7
            weight_policy = "mean_neighbor_sim"

            [model]
            kind = "mean"
        "#;
        let config: ExperimentConfig = toml::from_str(text).unwrap();
        assert_eq!(config.folds, 5);
        assert_eq!(config.shuffle_seed, Some(11));
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.similarity.missing, MissingSimilarityPolicy::Fail);
        assert!(config.similarity.has_header);
        assert_abs_diff_eq!(config.transfer.selection.neighbor_threshold, 0.7);
        assert_eq!(config.transfer.selection.min_neighbor_divisor, 4);
        assert_eq!(config.transfer.weight_policy, WeightPolicy::MeanNeighborSim);
        assert_eq!(config.model, ModelSpec::Mean);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = ExperimentConfig {
            folds: 1,
            ..ExperimentConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFolds(1))));
        config.folds = 3;
        config.transfer.selection.min_neighbor_divisor = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Transfer(_))));
        config.transfer.selection.min_neighbor_divisor = 4;
        config.model = ModelSpec::Knn { k: 0 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNeighbours)
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let config = ExperimentConfig {
            repetition: Some(2),
            feature_selection: Some(PathBuf::from("fs.csv")),
            ..ExperimentConfig::default()
        };
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), config.to_toml().unwrap()).unwrap();
        assert_eq!(ExperimentConfig::load(file.path()).unwrap(), config);
        assert_eq!(
            config.similarity_path("Kinases"),
            PathBuf::from("./Kinases_pid.pid")
        );
    }
}
