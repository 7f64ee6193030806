// ========================================================================================
//
//                                  EXPERIMENT DRIVERS
//
// ========================================================================================
//
// A batch discovers every group manifest, then runs one independent pipeline per
// group in parallel:
//
//   multi-task            assemble -> cross-validate -> MTL_<group>.csv
//   similarity multi-task assemble -> augment -> cross-validate -> SimMTL_<group>.csv
//   single-task           per target: cross-validate -> STL_<group>_<target>.csv
//   transfer              per target: own rows + selected donor rows -> TL_<group>_<target>.csv
//
// Per-target files carry the group name because a target may belong to several
// groups, and a transfer set depends on the other members of its group.
//
// A group is the unit of failure. Its files are staged and committed together
// once every step succeeded; on error nothing is written, the error is reported
// in the summary and the remaining groups carry on.

use crate::assemble::{AssemblyError, DatasetSource, assemble};
use crate::augment::{AugmentError, MissingSimilarityPolicy, augment};
use crate::config::ExperimentConfig;
use crate::cv::{CrossValidator, CvError};
use crate::dataset::{Dataset, DatasetError};
use crate::io::{
    CsvDirectory, DataError, FeatureSelection, GroupManifest, RecordLayout, SelectedFeatures,
    StagedOutputs, discover_manifests, read_manifest, strip_extension,
};
use crate::model::Learner;
use crate::similarity::{SimilarityError, SimilarityTable};
use crate::transfer::{TransferError, WeightPolicy, materialize, select};
use itertools::{Either, Itertools};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_EXTENSION: &str = "txt";

#[derive(Error, Debug)]
pub enum GroupError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Augment(#[from] AugmentError),
    #[error(transparent)]
    CrossValidation(#[from] CvError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("Target '{target}' failed: {source}")]
    Target {
        target: String,
        #[source]
        source: Box<GroupError>,
    },
    #[error(
        "No similarity score between targets '{target}' and '{donor}'; set the missing-similarity policy to 'sentinel' to skip such donors."
    )]
    MissingDonorSimilarity { target: String, donor: String },
}

/// Which pipeline a batch runs for each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    MultiTask,
    SimilarityMultiTask,
    SingleTask,
    Transfer,
}

impl ExperimentKind {
    pub fn output_prefix(self) -> &'static str {
        match self {
            ExperimentKind::MultiTask => "MTL",
            ExperimentKind::SimilarityMultiTask => "SimMTL",
            ExperimentKind::SingleTask => "STL",
            ExperimentKind::Transfer => "TL",
        }
    }
}

/// What one successful group produced.
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    pub group: String,
    pub outputs: Vec<PathBuf>,
    /// Prediction records, or training rows for transfer sets.
    pub rows_written: usize,
    pub missing_similarities: usize,
}

#[derive(Debug)]
pub struct GroupOutcome {
    pub group: String,
    pub result: Result<GroupReport, GroupError>,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub completed: Vec<GroupReport>,
    pub failed: Vec<(String, GroupError)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Dataset loading as configured: one file per target, optionally filtered.
pub struct TargetData {
    directory: CsvDirectory,
    selection: Option<FeatureSelection>,
}

impl TargetData {
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, DataError> {
        let selection = config
            .feature_selection
            .as_deref()
            .map(FeatureSelection::from_path)
            .transpose()?;
        if let Some(selection) = &selection {
            log::info!("Feature selection defined for {} targets", selection.len());
        }
        Ok(Self {
            directory: CsvDirectory::new(&config.data_dir, &config.dataset_extension),
            selection,
        })
    }
}

impl DatasetSource for TargetData {
    fn load(&self, target_id: &str) -> Result<Dataset, DataError> {
        match &self.selection {
            Some(selection) => SelectedFeatures::new(&self.directory, selection).load(target_id),
            None => self.directory.load(target_id),
        }
    }
}

fn output_path(config: &ExperimentConfig, kind: ExperimentKind, name: &str) -> PathBuf {
    config
        .output_dir
        .join(format!("{}_{name}.csv", kind.output_prefix()))
}

fn load_similarity(config: &ExperimentConfig, group: &str) -> Result<SimilarityTable, GroupError> {
    let path = config.similarity_path(group);
    log::debug!("Reading similarity pairs from {}", path.display());
    Ok(SimilarityTable::from_path(
        &path,
        config.similarity.has_header,
    )?)
}

fn in_target<T>(target: &str, result: Result<T, GroupError>) -> Result<T, GroupError> {
    result.map_err(|source| GroupError::Target {
        target: target.to_string(),
        source: Box::new(source),
    })
}

/// Runs one group's pipeline and writes its output files.
pub fn run_group(
    config: &ExperimentConfig,
    kind: ExperimentKind,
    manifest: &GroupManifest,
    source: &(impl DatasetSource + ?Sized),
    learner: &dyn Learner,
) -> Result<GroupReport, GroupError> {
    let validator = CrossValidator::new(config.folds, config.shuffle_seed);
    let mut report = GroupReport {
        group: manifest.name.clone(),
        ..GroupReport::default()
    };

    let mut outputs = StagedOutputs::new();
    match kind {
        ExperimentKind::MultiTask | ExperimentKind::SimilarityMultiTask => {
            let mut data = assemble(&manifest.target_ids, source)?;
            if kind == ExperimentKind::SimilarityMultiTask {
                let table = load_similarity(config, &manifest.name)?;
                let augmented = augment(
                    data,
                    &manifest.target_ids,
                    &table,
                    config.similarity.missing,
                )?;
                report.missing_similarities = augmented.missing.len();
                data = augmented.data;
            }
            let records = validator.run(&data, learner)?;
            let path = output_path(config, kind, &manifest.name);
            outputs.predictions(&path, &records, group_layout(kind, config.repetition))?;
            report.rows_written = records.len();
        }
        ExperimentKind::SingleTask => {
            let layout = RecordLayout::SingleTask(config.repetition.unwrap_or(1));
            for target in &manifest.target_ids {
                let records = in_target(
                    target,
                    source
                        .load(target)
                        .map_err(GroupError::from)
                        .and_then(|data| {
                            validator
                                .run_single_task(target, &data, learner)
                                .map_err(GroupError::from)
                        }),
                )?;
                let path = output_path(config, kind, &format!("{}_{target}", manifest.name));
                outputs.predictions(&path, &records, layout)?;
                report.rows_written += records.len();
            }
        }
        ExperimentKind::Transfer => {
            let table = load_similarity(config, &manifest.name)?;
            for target in &manifest.target_ids {
                let set = in_target(
                    target,
                    build_transfer_set(target, &manifest.target_ids, source, &table, config),
                )?;
                let path = output_path(config, kind, &format!("{}_{target}", manifest.name));
                outputs.weighted_dataset(&path, &set)?;
                report.rows_written += set.len();
            }
        }
    }
    report.outputs = outputs.commit()?;

    log::info!(
        "Group {} done: {} rows written to {} file(s)",
        manifest.name,
        report.rows_written,
        report.outputs.len()
    );
    Ok(report)
}

/// Similarity-augmented files always carry a `rep` column, defaulting to 1.
fn group_layout(kind: ExperimentKind, repetition: Option<usize>) -> RecordLayout {
    match (kind, repetition) {
        (_, Some(rep)) => RecordLayout::Repeated(rep),
        (ExperimentKind::SimilarityMultiTask, None) => RecordLayout::Repeated(1),
        (_, None) => RecordLayout::Grouped,
    }
}

/// Builds the weighted training set for `target_id`: its own rows at weight 1,
/// then the selected rows of every other member of `group`, in group order.
pub fn build_transfer_set(
    target_id: &str,
    group: &[String],
    source: &(impl DatasetSource + ?Sized),
    table: &SimilarityTable,
    config: &ExperimentConfig,
) -> Result<Dataset, GroupError> {
    let params = &config.transfer.selection;
    let policy = config.transfer.weight_policy;
    params.validate()?;

    let target = source.load(target_id)?;
    let mut parts = vec![target.clone()];
    for donor_id in group.iter().filter(|id| id.as_str() != target_id) {
        let pair_similarity = match table.lookup(target_id, donor_id) {
            Some(score) => score,
            None => match config.similarity.missing {
                MissingSimilarityPolicy::Fail => {
                    return Err(GroupError::MissingDonorSimilarity {
                        target: target_id.to_string(),
                        donor: donor_id.clone(),
                    });
                }
                MissingSimilarityPolicy::Sentinel if policy == WeightPolicy::OrgSim => {
                    log::warn!(
                        "No similarity between {target_id} and {donor_id}; skipping donor"
                    );
                    continue;
                }
                // The pair score is unused by the other weight policies.
                MissingSimilarityPolicy::Sentinel => 0.0,
            },
        };
        let donor = source.load(donor_id)?;
        let selected = select(&target, &donor, pair_similarity, policy, params)?;
        log::debug!(
            "Donor {donor_id} contributes {} of {} rows to {target_id}",
            selected.len(),
            donor.len()
        );
        parts.push(materialize(&donor, &selected)?);
    }

    let refs: Vec<&Dataset> = parts.iter().collect();
    let set = Dataset::concat(&refs)?;
    log::info!(
        "Transfer set for {target_id}: {} own rows, {} borrowed",
        target.len(),
        set.len() - target.len()
    );
    Ok(set)
}

/// Discovers every manifest under `config.manifest_dir` and runs `kind` on each
/// group in parallel. `on_group_done` is called once per group as it finishes.
pub fn run_batch(
    config: &ExperimentConfig,
    kind: ExperimentKind,
    learner: &dyn Learner,
    on_group_done: &(dyn Fn(&GroupOutcome) + Sync),
) -> Result<BatchSummary, GroupError> {
    let manifests = discover_manifests(&config.manifest_dir, MANIFEST_EXTENSION)?;
    if manifests.is_empty() {
        log::warn!(
            "No *.{MANIFEST_EXTENSION} manifests found in {}",
            config.manifest_dir.display()
        );
    }
    let source = TargetData::from_config(config)?;
    fs::create_dir_all(&config.output_dir).map_err(|source| DataError::Io {
        path: config.output_dir.display().to_string(),
        source,
    })?;

    let outcomes: Vec<GroupOutcome> = manifests
        .par_iter()
        .map(|path| {
            let outcome = run_manifest(config, kind, path, &source, learner);
            if let Err(e) = &outcome.result {
                log::warn!("Group {} failed: {e}", outcome.group);
            }
            on_group_done(&outcome);
            outcome
        })
        .collect();

    let (completed, failed): (Vec<GroupReport>, Vec<(String, GroupError)>) = outcomes.into_iter().partition_map(|outcome| match outcome.result {
        Ok(report) => Either::Left(report),
        Err(e) => Either::Right((outcome.group, e)),
    });
    Ok(BatchSummary { completed, failed })
}

fn run_manifest(
    config: &ExperimentConfig,
    kind: ExperimentKind,
    path: &Path,
    source: &TargetData,
    learner: &dyn Learner,
) -> GroupOutcome {
    let fallback_name = path
        .file_name()
        .map(|n| strip_extension(&n.to_string_lossy()).to_string())
        .unwrap_or_default();
    match read_manifest(path) {
        Ok(manifest) => GroupOutcome {
            group: manifest.name.clone(),
            result: run_group(config, kind, &manifest, source, learner),
        },
        Err(e) => GroupOutcome {
            group: fallback_name,
            result: Err(e.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MOLECULE_ID_COLUMN;
    use crate::model::MeanLearner;
    use ndarray::{Array1, Array2, array};
    use std::collections::HashMap;
    use std::io::Cursor;

    fn dataset(ids: &[&str], features: Array2<f64>) -> Dataset {
        let n = ids.len();
        Dataset::new(
            MOLECULE_ID_COLUMN,
            (0..features.ncols()).map(|j| format!("b{j}")).collect(),
            "pchembl_value",
            ids.iter().map(|s| s.to_string()).collect(),
            features,
            Array1::from_shape_fn(n, |i| 5.0 + i as f64),
        )
        .unwrap()
    }

    fn source() -> HashMap<String, Dataset> {
        HashMap::from([
            (
                "T1".to_string(),
                dataset(&["a", "b"], array![[1.0, 1.0, 0.0], [1.0, 0.0, 1.0]]),
            ),
            (
                "T2".to_string(),
                dataset(
                    &["c", "a", "d"],
                    array![[1.0, 1.0, 1.0], [1.0, 1.0, 0.0], [0.0, 1.0, 1.0]],
                ),
            ),
            (
                "T3".to_string(),
                dataset(&["e"], array![[1.0, 1.0, 0.5]]),
            ),
        ])
    }

    fn group() -> Vec<String> {
        vec!["T1".into(), "T2".into(), "T3".into()]
    }

    /// Two target rows with divisor 2: a donor row needs one neighbour.
    fn transfer_config() -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.transfer.selection.min_neighbor_divisor = 2;
        config
    }

    #[test]
    fn transfer_set_keeps_target_rows_first() {
        let table = SimilarityTable::from_reader(Cursor::new("T1,T2,0.3\nT1,T3,0.6\n"), false)
            .unwrap();
        let config = transfer_config();
        let set = build_transfer_set("T1", &group(), &source(), &table, &config).unwrap();

        let ids: Vec<&str> = set.molecule_ids().iter().map(String::as_str).collect();
        // "a" is shared with the target and never borrowed; "d" has no neighbour.
        assert_eq!(ids, vec!["a", "b", "c", "e"]);
        assert_eq!(set.weights().to_vec(), vec![1.0, 1.0, 0.3, 0.6]);
    }

    #[test]
    fn missing_pair_skips_or_fails_by_policy() {
        let table = SimilarityTable::from_reader(Cursor::new("T1,T2,0.3\n"), false).unwrap();
        let mut config = transfer_config();
        let set = build_transfer_set("T1", &group(), &source(), &table, &config).unwrap();
        assert_eq!(set.len(), 3);

        config.transfer.weight_policy = WeightPolicy::Uniform;
        let set = build_transfer_set("T1", &group(), &source(), &table, &config).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.weights().iter().all(|&w| w == 1.0));

        config.similarity.missing = MissingSimilarityPolicy::Fail;
        assert!(matches!(
            build_transfer_set("T1", &group(), &source(), &table, &config),
            Err(GroupError::MissingDonorSimilarity { donor, .. }) if donor == "T3"
        ));
    }

    #[test]
    fn single_task_failure_names_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExperimentConfig {
            output_dir: dir.path().to_path_buf(),
            folds: 3,
            ..ExperimentConfig::default()
        };
        let manifest = GroupManifest {
            name: "g".into(),
            target_ids: vec!["T2".into(), "T1".into()],
        };
        // T2 has three rows and succeeds; T1 has only two, which fails the group.
        let err = run_group(
            &config,
            ExperimentKind::SingleTask,
            &manifest,
            &source(),
            &MeanLearner,
        )
        .unwrap_err();
        assert!(matches!(&err, GroupError::Target { target, .. } if target == "T1"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let manifest = GroupManifest {
            name: "g".into(),
            target_ids: vec!["T2".into()],
        };
        let report = run_group(
            &config,
            ExperimentKind::SingleTask,
            &manifest,
            &source(),
            &MeanLearner,
        )
        .unwrap();
        assert_eq!(report.outputs, vec![dir.path().join("STL_g_T2.csv")]);
        assert_eq!(report.rows_written, 3);
    }

    #[test]
    fn similarity_runs_always_write_a_repetition_column() {
        assert_eq!(
            group_layout(ExperimentKind::SimilarityMultiTask, None),
            RecordLayout::Repeated(1)
        );
        assert_eq!(
            group_layout(ExperimentKind::MultiTask, None),
            RecordLayout::Grouped
        );
        assert_eq!(
            group_layout(ExperimentKind::MultiTask, Some(3)),
            RecordLayout::Repeated(3)
        );
    }
}
