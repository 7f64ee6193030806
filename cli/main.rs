#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;

use mtqsar::augment::MissingSimilarityPolicy;
use mtqsar::config::{ConfigError, ExperimentConfig};
use mtqsar::model::{DEFAULT_NEIGHBOURS, ModelSpec};
use mtqsar::pipeline::{BatchSummary, ExperimentKind, GroupOutcome, run_batch};
use mtqsar::transfer::WeightPolicy;

#[derive(Clone, Copy, ValueEnum)]
pub enum ModelCli {
    Mean,
    Knn,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum MissingSimilarityCli {
    Sentinel,
    Fail,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WeightPolicyCli {
    OrgSim,
    MaxNeighborSim,
    Uniform,
    MeanNeighborSim,
}

/// Flags shared by every experiment. Each one overrides the config file.
#[derive(Args)]
pub struct CommonArgs {
    /// TOML experiment configuration (optional; every field has a default)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory containing the group manifests (*.txt) and similarity-pair files
    #[arg(long, value_name = "DIR")]
    pub manifest_dir: Option<PathBuf>,

    /// Directory containing one dataset file per target
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory the result files are written to
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of cross-validation folds
    #[arg(long, value_name = "K")]
    pub folds: Option<usize>,

    /// Shuffle rows with this seed before building folds
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Repetition index written in the `rep` column
    #[arg(long, value_name = "N")]
    pub rep: Option<usize>,

    /// Reference learner
    #[arg(long, value_enum)]
    pub model: Option<ModelCli>,

    /// Number of neighbours for the knn learner
    #[arg(long, value_name = "K")]
    pub k: Option<usize>,

    /// Feature-selection file with `targetId,i,j,...` lines
    #[arg(long, value_name = "PATH")]
    pub feature_selection: Option<PathBuf>,

    /// What to do when a pair of targets has no similarity score
    #[arg(long, value_enum)]
    pub missing_similarity: Option<MissingSimilarityCli>,
}

#[derive(Args)]
pub struct TransferArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// How borrowed rows are weighted
    #[arg(long, value_enum)]
    pub weight_policy: Option<WeightPolicyCli>,

    /// Minimum Tanimoto similarity for a target row to count as a neighbour
    #[arg(long, value_name = "SIM")]
    pub threshold: Option<f64>,

    /// A donor row needs at least target_size / DIVISOR neighbours
    #[arg(long, value_name = "DIVISOR")]
    pub divisor: Option<usize>,
}

#[derive(Parser)]
#[command(
    name = "mtqsar",
    about = "Multi-task QSAR experiment harness",
    long_about = "Assembles groups of related drug-target datasets, optionally augments them \
                 with target-similarity columns, and records per-molecule predictions from \
                 target-stratified cross-validation."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Multi-task cross-validation over every group
    #[command(about = "Multi-task cross-validation (outputs: MTL_<group>.csv)")]
    Mtl(CommonArgs),

    /// Multi-task cross-validation with target-similarity columns
    #[command(about = "Similarity-augmented multi-task cross-validation (outputs: SimMTL_<group>.csv)")]
    SimMtl(CommonArgs),

    /// Per-target baseline
    #[command(about = "Single-task cross-validation per target (outputs: STL_<group>_<target>.csv)")]
    SingleTask(CommonArgs),

    /// Build weighted transfer-learning training sets
    #[command(about = "Borrow similar rows from related targets (outputs: TL_<group>_<target>.csv)")]
    Transfer(TransferArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Mtl(args)) => run(ExperimentKind::MultiTask, &args, None),
        Some(Commands::SimMtl(args)) => run(ExperimentKind::SimilarityMultiTask, &args, None),
        Some(Commands::SingleTask(args)) => run(ExperimentKind::SingleTask, &args, None),
        Some(Commands::Transfer(args)) => run(ExperimentKind::Transfer, &args.common, Some(&args)),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!();
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// Loads the config file (if any) and applies the command-line overrides.
fn resolve_config(
    common: &CommonArgs,
    transfer: Option<&TransferArgs>,
) -> Result<ExperimentConfig, ConfigError> {
    let mut config = match &common.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };

    if let Some(dir) = &common.manifest_dir {
        config.manifest_dir = dir.clone();
    }
    if let Some(dir) = &common.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &common.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(folds) = common.folds {
        config.folds = folds;
    }
    if common.seed.is_some() {
        config.shuffle_seed = common.seed;
    }
    if common.rep.is_some() {
        config.repetition = common.rep;
    }
    if let Some(path) = &common.feature_selection {
        config.feature_selection = Some(path.clone());
    }
    if let Some(missing) = common.missing_similarity {
        config.similarity.missing = match missing {
            MissingSimilarityCli::Sentinel => MissingSimilarityPolicy::Sentinel,
            MissingSimilarityCli::Fail => MissingSimilarityPolicy::Fail,
        };
    }

    let current_k = match config.model {
        ModelSpec::Knn { k } => k,
        ModelSpec::Mean => DEFAULT_NEIGHBOURS,
    };
    config.model = match (common.model, common.k) {
        (Some(ModelCli::Mean), _) => ModelSpec::Mean,
        (Some(ModelCli::Knn), k) => ModelSpec::Knn {
            k: k.unwrap_or(current_k),
        },
        (None, Some(k)) if matches!(config.model, ModelSpec::Knn { .. }) => ModelSpec::Knn { k },
        (None, _) => config.model.clone(),
    };

    if let Some(args) = transfer {
        if let Some(policy) = args.weight_policy {
            config.transfer.weight_policy = match policy {
                WeightPolicyCli::OrgSim => WeightPolicy::OrgSim,
                WeightPolicyCli::MaxNeighborSim => WeightPolicy::MaxNeighborSim,
                WeightPolicyCli::Uniform => WeightPolicy::Uniform,
                WeightPolicyCli::MeanNeighborSim => WeightPolicy::MeanNeighborSim,
            };
        }
        if let Some(threshold) = args.threshold {
            config.transfer.selection.neighbor_threshold = threshold;
        }
        if let Some(divisor) = args.divisor {
            config.transfer.selection.min_neighbor_divisor = divisor;
        }
    }

    config.validate()?;
    Ok(config)
}

/// Runs one batch. `Ok(false)` means at least one group failed.
fn run(
    kind: ExperimentKind,
    common: &CommonArgs,
    transfer: Option<&TransferArgs>,
) -> Result<bool, Box<dyn std::error::Error>> {
    let config = resolve_config(common, transfer)?;
    println!(
        "Running {} experiments: manifests from {}, datasets from {}, results to {}",
        kind.output_prefix(),
        config.manifest_dir.display(),
        config.data_dir.display(),
        config.output_dir.display()
    );

    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template(">  {spinner} {pos} groups done  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    let on_group_done = |outcome: &GroupOutcome| {
        pb.inc(1);
        pb.set_message(outcome.group.clone());
    };

    let summary = run_batch(&config, kind, &config.model, &on_group_done)?;
    pb.finish_and_clear();
    print_summary(&summary);
    Ok(summary.is_success())
}

fn print_summary(summary: &BatchSummary) {
    for report in &summary.completed {
        println!(
            "[OK]     {}: {} rows in {} file(s){}",
            report.group,
            report.rows_written,
            report.outputs.len(),
            if report.missing_similarities > 0 {
                format!(", {} missing similarities", report.missing_similarities)
            } else {
                String::new()
            }
        );
    }
    for (group, error) in &summary.failed {
        println!("[FAILED] {group}: {error}");
    }
    println!(
        "{} group(s) completed, {} failed.",
        summary.completed.len(),
        summary.failed.len()
    );
}
