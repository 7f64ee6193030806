// ========================================================================================
//
//                           STRATIFIED K-FOLD CROSS-VALIDATION
//
// ========================================================================================
//
// A fold plan is a permutation of the row indices plus k contiguous blocks over it.
// Fold n tests on block n and trains on everything else.
//
// Stratified plans group the rows by stratum (target identifier), strata ordered by
// first appearance, then deal them out with stride k: positions 0, k, 2k, ... of the
// grouped order first, then 1, k+1, ..., and so on. Block n of that dealt order has
// floor(N/k) rows, plus one for the first N mod k blocks. Every stratum with at least
// k rows therefore lands in every test block.
//
// Folds are trained independently and in parallel. A failure in any fold fails the
// whole run.

use crate::dataset::{CombinedDataset, Dataset, ModelFrame};
use crate::model::{Learner, ModelError};
use ahash::AHashMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvError {
    #[error("Cross-validation needs at least 2 folds, but {0} were requested.")]
    InvalidFoldCount(usize),
    #[error("Cannot split {rows} rows into {folds} folds; every fold needs at least one row.")]
    TooFewRows { rows: usize, folds: usize },
    #[error("Model failed in fold {fold}: {source}")]
    Model {
        fold: usize,
        #[source]
        source: ModelError,
    },
    #[error("Fold {fold} expected {expected} predictions but the model returned {found}.")]
    PredictionCount {
        fold: usize,
        expected: usize,
        found: usize,
    },
}

/// One test-row prediction. `fold` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub fold: usize,
    pub target_id: String,
    pub molecule_id: String,
    pub actual: f64,
    pub predicted: f64,
}

/// Assignment of rows to k test blocks.
#[derive(Debug, Clone)]
pub struct FoldPlan {
    order: Vec<usize>,
    /// `bounds[n]..bounds[n + 1]` is fold n's block in `order`.
    bounds: Vec<usize>,
}

fn check_fold_count(rows: usize, folds: usize) -> Result<(), CvError> {
    if folds < 2 {
        return Err(CvError::InvalidFoldCount(folds));
    }
    if folds > rows {
        return Err(CvError::TooFewRows { rows, folds });
    }
    Ok(())
}

fn initial_order(rows: usize, shuffle_seed: Option<u64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows).collect();
    if let Some(seed) = shuffle_seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    order
}

fn block_bounds(rows: usize, folds: usize) -> Vec<usize> {
    let base = rows / folds;
    let extra = rows % folds;
    let mut bounds = Vec::with_capacity(folds + 1);
    bounds.push(0);
    for n in 0..folds {
        let size = base + usize::from(n < extra);
        bounds.push(bounds[n] + size);
    }
    bounds
}

impl FoldPlan {
    /// Balances folds on `strata`, one entry per row.
    pub fn stratified(
        strata: &[usize],
        folds: usize,
        shuffle_seed: Option<u64>,
    ) -> Result<Self, CvError> {
        let rows = strata.len();
        check_fold_count(rows, folds)?;

        let mut grouped = initial_order(rows, shuffle_seed);
        let mut rank: AHashMap<usize, usize> = AHashMap::new();
        for &row in &grouped {
            let next = rank.len();
            rank.entry(strata[row]).or_insert(next);
        }
        grouped.sort_by_key(|&row| rank[&strata[row]]);

        let order = (0..folds)
            .flat_map(|start| grouped.iter().skip(start).step_by(folds).copied())
            .collect();
        Ok(Self {
            order,
            bounds: block_bounds(rows, folds),
        })
    }

    /// Contiguous folds over the row order (after an optional shuffle).
    pub fn sequential(rows: usize, folds: usize, shuffle_seed: Option<u64>) -> Result<Self, CvError> {
        check_fold_count(rows, folds)?;
        Ok(Self {
            order: initial_order(rows, shuffle_seed),
            bounds: block_bounds(rows, folds),
        })
    }

    pub fn folds(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn test_rows(&self, fold: usize) -> &[usize] {
        &self.order[self.bounds[fold]..self.bounds[fold + 1]]
    }

    /// Every row outside `fold`, in plan order.
    pub fn train_rows(&self, fold: usize) -> Vec<usize> {
        let (start, end) = (self.bounds[fold], self.bounds[fold + 1]);
        self.order[..start]
            .iter()
            .chain(&self.order[end..])
            .copied()
            .collect()
    }
}

/// Runs k-fold cross-validation with a fresh model per fold.
#[derive(Debug, Clone, Copy)]
pub struct CrossValidator {
    pub folds: usize,
    pub shuffle_seed: Option<u64>,
}

impl CrossValidator {
    pub fn new(folds: usize, shuffle_seed: Option<u64>) -> Self {
        Self {
            folds,
            shuffle_seed,
        }
    }

    /// Target-stratified cross-validation over a combined group dataset.
    pub fn run(
        &self,
        data: &CombinedDataset,
        learner: &dyn Learner,
    ) -> Result<Vec<PredictionRecord>, CvError> {
        let plan = FoldPlan::stratified(data.target_ids().codes(), self.folds, self.shuffle_seed)?;
        evaluate(&plan, learner, |rows| data.model_frame(rows), |row| {
            (
                data.target_ids().value(row).to_string(),
                data.molecule_ids().value(row).to_string(),
            )
        })
    }

    /// Plain k-fold cross-validation over one target's dataset.
    pub fn run_single_task(
        &self,
        target_id: &str,
        data: &Dataset,
        learner: &dyn Learner,
    ) -> Result<Vec<PredictionRecord>, CvError> {
        let plan = FoldPlan::sequential(data.len(), self.folds, self.shuffle_seed)?;
        evaluate(&plan, learner, |rows| data.model_frame(rows), |row| {
            (target_id.to_string(), data.molecule_ids()[row].clone())
        })
    }
}

fn evaluate<F, L>(
    plan: &FoldPlan,
    learner: &dyn Learner,
    frame: F,
    label_row: L,
) -> Result<Vec<PredictionRecord>, CvError>
where
    F: Fn(&[usize]) -> ModelFrame + Sync,
    L: Fn(usize) -> (String, String) + Sync,
{
    let folds = plan.folds();
    let per_fold = (0..folds)
        .into_par_iter()
        .map(|n| -> Result<Vec<PredictionRecord>, CvError> {
            let fold = n + 1;
            let test = plan.test_rows(n);
            let train = frame(&plan.train_rows(n));
            let model = learner
                .fit(&train)
                .map_err(|source| CvError::Model { fold, source })?;
            let test_frame = frame(test);
            let predicted = model
                .predict(test_frame.x.view())
                .map_err(|source| CvError::Model { fold, source })?;
            if predicted.len() != test.len() {
                return Err(CvError::PredictionCount {
                    fold,
                    expected: test.len(),
                    found: predicted.len(),
                });
            }
            log::info!(
                "Fold {fold}/{folds}: trained on {} rows, predicted {}",
                train.nrows(),
                test.len()
            );
            Ok(test
                .iter()
                .zip(test_frame.y.iter().zip(predicted.iter()))
                .map(|(&row, (&actual, &predicted))| {
                    let (target_id, molecule_id) = label_row(row);
                    PredictionRecord {
                        fold,
                        target_id,
                        molecule_id,
                        actual,
                        predicted,
                    }
                })
                .collect())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(per_fold.into_iter().flatten().collect())
}
