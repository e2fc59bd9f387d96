//! Multi-attribute face mask classification CLI
//!
//! Entry point for metadata preparation, dataset inspection, training and
//! inference over face-crop images using the Burn framework.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use mask_attr::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use mask_attr::dataset::{
    build_metadata, compute_channel_stats, DatasetSplits, DistributionReport, MetadataTable,
    SplitConfig, TrainMode, EVAL_CHANNEL_STATS, NUM_CLASSES,
};
use mask_attr::inference::{run_inference, Predictor};
use mask_attr::settings::{InferSettings, MetricKind, ModelKind, OptimizerKind, TrainSettings};
use mask_attr::training::{run_training, Criterion};
use mask_attr::utils::logging::{init_logging, LogConfig};

/// Multi-attribute face mask classification
///
/// Trains and evaluates face-crop classifiers for mask wearing, gender and
/// age bucket, either as one 18-way composite model or as an ensemble of
/// three single-attribute models.
#[derive(Parser, Debug)]
#[command(name = "mask_attr")]
#[command(version = "0.1.0")]
#[command(about = "Multi-attribute face mask classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the metadata CSV from the raw training image tree
    Prepare {
        /// Root directory holding one folder per person
        #[arg(short, long, default_value = "/opt/ml/input/data/train/images")]
        data_dir: PathBuf,

        /// Output metadata CSV path
        #[arg(short, long, default_value = "processed_train.csv")]
        output: PathBuf,
    },

    /// Compute per-channel normalization statistics from training images
    Stats {
        /// Metadata CSV listing the images
        #[arg(short, long, default_value = "processed_train.csv")]
        metadata: PathBuf,

        /// Image root the metadata paths are rebased onto
        #[arg(short, long, default_value = "/opt/ml/input/data/train/images")]
        data_dir: PathBuf,

        /// Maximum number of images to sample (0 = all)
        #[arg(short, long, default_value = "3000")]
        limit: usize,
    },

    /// Preview the group-aware train/validation split
    Split {
        /// Metadata CSV listing the images
        #[arg(short, long, default_value = "processed_train.csv")]
        metadata: PathBuf,

        /// Image root the metadata paths are rebased onto
        #[arg(short, long, default_value = "/opt/ml/input/data/train/images")]
        data_dir: PathBuf,

        /// Fraction of person groups held out for validation
        #[arg(long, default_value = "0.2")]
        val_ratio: f64,

        /// Random seed for the group shuffle
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Optional JSON path for the distribution report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train a classifier
    Train {
        /// Metadata CSV produced by `prepare`
        #[arg(long, default_value = "processed_train.csv")]
        metadata: PathBuf,

        /// Image root the metadata paths are rebased onto
        #[arg(long, default_value = "/opt/ml/input/data/train/images")]
        data_dir: PathBuf,

        /// Directory that receives run directories
        #[arg(long, default_value = "./model")]
        model_dir: PathBuf,

        /// Run name; a numeric suffix is appended when the name is taken
        #[arg(short, long, default_value = "exp")]
        name: String,

        /// Reuse the run directory instead of suffixing
        #[arg(long, default_value = "false")]
        dump: bool,

        /// Random seed for splitting, shuffling and initialization
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of training epochs
        #[arg(short, long, default_value = "5")]
        epochs: usize,

        /// Input size as height width
        #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"], default_values_t = [512, 384])]
        resize: Vec<usize>,

        /// Batch size for training
        #[arg(short, long, default_value = "64")]
        batch_size: usize,

        /// Batch size for validation
        #[arg(long, default_value = "64")]
        val_batch_size: usize,

        /// Model architecture
        #[arg(long, value_enum, default_value = "backbone")]
        model: ModelKind,

        /// Previously exported backbone weights to start from
        #[arg(long)]
        backbone_weights: Option<PathBuf>,

        /// Backbone layers excluded from gradient updates
        #[arg(long, num_args = 0..)]
        freeze: Vec<String>,

        /// Optimizer
        #[arg(long, value_enum, default_value = "adam")]
        optimizer: OptimizerKind,

        /// Initial learning rate
        #[arg(long, default_value = "0.001")]
        lr: f64,

        /// Halve the learning rate every this many epochs
        #[arg(long, default_value = "20")]
        lr_decay_step: usize,

        /// Fraction of person groups held out for validation
        #[arg(long, default_value = "0.2")]
        val_ratio: f64,

        /// Loss criterion
        #[arg(long, value_enum, default_value = "cross-entropy")]
        criterion: Criterion,

        /// Batches between training log lines
        #[arg(long, default_value = "20")]
        log_interval: usize,

        /// Which label to train on
        #[arg(long, value_enum, default_value = "multi")]
        mode: TrainMode,

        /// Override the normalization mean (three channel values)
        #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
        mean: Option<Vec<f32>>,

        /// Override the normalization std (three channel values)
        #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
        std: Option<Vec<f32>>,

        /// Measure normalization statistics from the split instead of using
        /// the built-in constants
        #[arg(long, default_value = "false")]
        compute_stats: bool,
    },

    /// Run batched inference over an evaluation manifest
    Infer {
        /// Evaluation root holding info.csv and an images/ directory
        #[arg(long, default_value = "/opt/ml/input/data/eval")]
        data_dir: PathBuf,

        /// Run directory holding the checkpoints
        #[arg(long, default_value = "./model")]
        model_dir: PathBuf,

        /// Directory that receives output.csv
        #[arg(long, default_value = "./output")]
        output_dir: PathBuf,

        /// Batch size for inference
        #[arg(short, long, default_value = "1000")]
        batch_size: usize,

        /// Input size as height width
        #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"], default_values_t = [96, 128])]
        resize: Vec<usize>,

        /// Model architecture the checkpoints were trained with
        #[arg(long, value_enum, default_value = "backbone")]
        model: ModelKind,

        /// Combine the mask/gender/age models instead of one composite model
        #[arg(long, default_value = "false")]
        ensemble: bool,

        /// Which best checkpoint to load
        #[arg(long, value_enum, default_value = "acc")]
        metric: MetricKind,
    },

    /// Classify a single image with the composite model
    Predict {
        /// Image file to classify
        #[arg(short, long)]
        image: PathBuf,

        /// Run directory holding the checkpoint
        #[arg(long, default_value = "./model")]
        model_dir: PathBuf,

        /// Model architecture the checkpoint was trained with
        #[arg(long, value_enum, default_value = "backbone")]
        model: ModelKind,

        /// Which best checkpoint to load
        #[arg(long, value_enum, default_value = "acc")]
        metric: MetricKind,

        /// Input size as height width
        #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"], default_values_t = [96, 128])]
        resize: Vec<usize>,

        /// Number of top classes to show
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Prepare { data_dir, output } => {
            cmd_prepare(&data_dir, &output)?;
        }

        Commands::Stats {
            metadata,
            data_dir,
            limit,
        } => {
            cmd_stats(&metadata, &data_dir, limit)?;
        }

        Commands::Split {
            metadata,
            data_dir,
            val_ratio,
            seed,
            output,
        } => {
            cmd_split(&metadata, &data_dir, val_ratio, seed, output.as_deref())?;
        }

        Commands::Train {
            metadata,
            data_dir,
            model_dir,
            name,
            dump,
            seed,
            epochs,
            resize,
            batch_size,
            val_batch_size,
            model,
            backbone_weights,
            freeze,
            optimizer,
            lr,
            lr_decay_step,
            val_ratio,
            criterion,
            log_interval,
            mode,
            mean,
            std,
            compute_stats,
        } => {
            let defaults = TrainSettings::default();
            let mut settings = TrainSettings {
                metadata,
                data_dir,
                model_dir,
                name,
                dump,
                seed,
                epochs,
                resize: [resize[0], resize[1]],
                batch_size,
                val_batch_size,
                model,
                optimizer,
                learning_rate: lr,
                lr_decay_step,
                val_ratio,
                criterion,
                log_interval,
                mode,
                mean: defaults.mean,
                std: defaults.std,
                compute_stats,
                backbone_weights,
                freeze,
            };
            if let Some(values) = mean {
                settings.mean = [values[0], values[1], values[2]];
            }
            if let Some(values) = std {
                settings.std = [values[0], values[1], values[2]];
            }

            println!("  🖥️ Backend: {}", backend_name());
            run_training::<TrainingBackend>(settings).context("training failed")?;
        }

        Commands::Infer {
            data_dir,
            model_dir,
            output_dir,
            batch_size,
            resize,
            model,
            ensemble,
            metric,
        } => {
            let settings = InferSettings {
                data_dir,
                model_dir,
                output_dir,
                batch_size,
                resize: [resize[0], resize[1]],
                model,
                ensemble,
                metric,
            };
            println!("  🖥️ Backend: {}", backend_name());
            run_inference::<DefaultBackend>(settings).context("inference failed")?;
        }

        Commands::Predict {
            image,
            model_dir,
            model,
            metric,
            resize,
            top_k,
        } => {
            cmd_predict(
                &image,
                &model_dir,
                model,
                metric,
                [resize[0], resize[1]],
                top_k,
            )?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════╗
 ║   😷 Mask Attribute Classification                       ║
 ║   Mask / Gender / Age from Face Crops with Burn + Rust   ║
 ╚══════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_prepare(data_dir: &Path, output: &Path) -> Result<()> {
    info!("Preparing metadata from {}", data_dir.display());
    println!("{}", "Preparing Metadata...".cyan().bold());

    let summary = build_metadata(data_dir, output).context("metadata preparation failed")?;
    println!("{}", summary);
    println!(
        "  💾 Metadata written to {}",
        output.display().to_string().cyan()
    );
    Ok(())
}

fn cmd_stats(metadata: &Path, data_dir: &Path, limit: usize) -> Result<()> {
    info!("Computing channel statistics from {}", metadata.display());
    println!("{}", "Computing Channel Statistics...".cyan().bold());

    let mut table = MetadataTable::load(metadata)?;
    table.rebase_paths(data_dir)?;
    let paths: Vec<PathBuf> = table
        .records()
        .iter()
        .map(|r| r.full_path.clone())
        .collect();

    let limit = if limit == 0 { None } else { Some(limit) };
    let sampled = limit.map(|l| l.min(paths.len())).unwrap_or(paths.len());
    let stats = compute_channel_stats(&paths, limit).context("statistics computation failed")?;

    println!("  📊 Sampled {} of {} images", sampled, paths.len());
    println!("  📈 {}", stats);
    println!();
    println!("{}", "Pass to training with:".yellow());
    println!(
        "  --mean {} {} {} --std {} {} {}",
        stats.mean[0], stats.mean[1], stats.mean[2], stats.std[0], stats.std[1], stats.std[2]
    );
    Ok(())
}

fn cmd_split(
    metadata: &Path,
    data_dir: &Path,
    val_ratio: f64,
    seed: u64,
    output: Option<&Path>,
) -> Result<()> {
    info!("Previewing split of {}", metadata.display());
    println!("{}", "Previewing Data Split...".cyan().bold());

    let mut table = MetadataTable::load(metadata)?;
    table.rebase_paths(data_dir)?;
    let config = SplitConfig::new(val_ratio, seed)?;
    let splits = DatasetSplits::from_table(&table, &config)?;

    println!("{}", splits.stats());
    let report = DistributionReport::new(&splits);
    print!("{}", report);

    if let Some(path) = output {
        report.save_json(path)?;
        println!(
            "  💾 Report written to {}",
            path.display().to_string().cyan()
        );
    }
    Ok(())
}

fn cmd_predict(
    image: &Path,
    model_dir: &Path,
    model: ModelKind,
    metric: MetricKind,
    resize: [usize; 2],
    top_k: usize,
) -> Result<()> {
    info!("Predicting {}", image.display());
    println!("{}", "Predicting...".cyan().bold());
    println!("  📷 Image:   {}", image.display());
    println!("  🖥️ Backend: {}", backend_name());

    let checkpoint = model_dir.join(metric.checkpoint_stem("best"));
    let predictor = Predictor::<DefaultBackend>::from_checkpoint(
        model,
        NUM_CLASSES,
        &checkpoint,
        EVAL_CHANNEL_STATS,
        resize,
        default_device(),
    )
    .context("failed to load model")?;

    let result = predictor.predict(image)?.truncated(top_k);
    println!();
    print!("{}", result.display());
    Ok(())
}
