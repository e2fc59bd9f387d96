//! End-to-end supervised training
//!
//! Wires together metadata loading, group splitting, normalization, the
//! trainer and all run artifacts: checkpoints for the best accuracy and best
//! macro F1, a metrics CSV, SVG charts, per-epoch prediction grids and
//! optional experiment tracking. One invocation trains one model for one
//! training mode; the attribute ensemble is produced by three runs.

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, Optimizer, SgdConfig};
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use image::{Rgb, RgbImage};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::dataset::{
    compute_channel_stats, denormalize_chw, DatasetSplits, DistributionReport, FaceCropBatch,
    FaceCropBatcher, FaceCropDataset, ImageTransform, MetadataTable, SplitConfig,
};
use crate::model::{
    BackboneClassifier, BackboneClassifierConfig, ClassifierModel, CnnClassifier,
    CnnClassifierConfig,
};
use crate::settings::{resolve_run_dir, save_snapshot, ModelKind, OptimizerKind, TrainSettings};
use crate::training::scheduler::LrSchedule;
use crate::training::trainer::{BestUpdate, Trainer, WEIGHT_DECAY};
use crate::utils::charts::{
    generate_bar_chart, generate_confusion_heatmap, generate_line_chart, BarData, DataSeries,
};
use crate::utils::error::{PipelineError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::Metrics;
use crate::utils::tracking::TrackingSink;
use crate::utils::{format_duration, format_number};

/// Images sampled when measuring normalization statistics.
const STATS_SAMPLE_LIMIT: usize = 3000;

/// Tiles in the per-epoch prediction grid.
const GRID_TILES: usize = 16;
const GRID_COLUMNS: usize = 4;

/// Train one model according to the settings.
pub fn run_training<B: AutodiffBackend>(settings: TrainSettings) -> Result<()> {
    let start = Instant::now();
    println!("\n{}", "Initializing Training...".green().bold());

    B::seed(settings.seed);
    let device = B::Device::default();

    let run_dir = resolve_run_dir(&settings.model_dir, &settings.name, settings.dump)?;
    let stem = settings.mode.checkpoint_stem();
    std::fs::create_dir_all(run_dir.join("grids"))?;
    save_snapshot(&settings, &run_dir, stem)?;
    println!("  Run directory: {}", run_dir.display().to_string().cyan());

    let mut sink = TrackingSink::discover(Path::new("tracking.json"), &run_dir)?;

    println!("\n{}", "Loading Metadata...".cyan());
    let mut table = MetadataTable::load(&settings.metadata)?;
    table.rebase_paths(&settings.data_dir)?;
    println!(
        "  📊 {} samples across {} person groups",
        format_number(table.len()),
        format_number(table.group_count())
    );

    println!("\n{}", "Creating Data Splits...".cyan());
    let split_config = SplitConfig::new(settings.val_ratio, settings.seed)?;
    let splits = DatasetSplits::from_table(&table, &split_config)?;
    println!("{}", splits.stats());
    let report = DistributionReport::new(&splits);
    print!("{}", report);
    report.save_json(&run_dir.join("distribution.json"))?;

    let stats = if settings.compute_stats {
        println!("\n{}", "Computing Channel Statistics...".cyan());
        let paths: Vec<PathBuf> = splits.train.iter().map(|r| r.full_path.clone()).collect();
        let stats = compute_channel_stats(&paths, Some(STATS_SAMPLE_LIMIT))?;
        println!("  📈 {}", stats);
        stats
    } else {
        settings.channel_stats()
    };

    let transform = ImageTransform::new(settings.resize);
    let train_dataset = FaceCropDataset::with_transform(splits.train, settings.mode, transform);
    let val_dataset = FaceCropDataset::with_transform(splits.valid, settings.mode, transform);
    let batcher = FaceCropBatcher::new(stats, settings.resize);

    let schedule = LrSchedule::step_decay(settings.learning_rate, 0.5, settings.lr_decay_step);

    println!("\n{}", "Training Configuration:".cyan());
    println!(
        "  🧠 Model:      {:?} ({} classes, mode {})",
        settings.model,
        settings.mode.num_classes(),
        settings.mode
    );
    println!(
        "  📊 Input size: {}x{} (height x width)",
        settings.resize[0], settings.resize[1]
    );
    println!(
        "  📦 Batch size: {} (validation {})",
        settings.batch_size, settings.val_batch_size
    );
    println!("  🔄 Epochs:     {} (seed {})", settings.epochs, settings.seed);
    println!(
        "  📈 Optimizer:  {:?}, {}",
        settings.optimizer,
        schedule.description()
    );
    println!("  🏷️ Criterion:  {:?}", settings.criterion);

    println!("\n{}", "Creating Model...".cyan());
    match settings.model {
        ModelKind::Scratch => {
            let config = CnnClassifierConfig::new().with_num_classes(settings.mode.num_classes());
            let model = CnnClassifier::<B>::new(&config, &device);
            train_with_optimizer(
                model,
                &settings,
                &schedule,
                &device,
                &train_dataset,
                &val_dataset,
                &batcher,
                &run_dir,
                stem,
                &mut sink,
            )?;
        }
        ModelKind::Backbone => {
            let config =
                BackboneClassifierConfig::new().with_num_classes(settings.mode.num_classes());
            let mut model = BackboneClassifier::<B>::new(&config, &device);
            if let Some(weights) = &settings.backbone_weights {
                println!(
                    "  📦 Loading backbone weights from {}",
                    weights.display().to_string().cyan()
                );
                model = model.load_backbone(weights, &device)?;
            }
            if !settings.freeze.is_empty() {
                println!("  ❄️ Freezing layers: {}", settings.freeze.join(", "));
                model = model.freeze_layers(&settings.freeze)?;
            }
            let trained = train_with_optimizer(
                model,
                &settings,
                &schedule,
                &device,
                &train_dataset,
                &val_dataset,
                &batcher,
                &run_dir,
                stem,
                &mut sink,
            )?;
            export_best_backbone(trained, &run_dir, stem, &device)?;
        }
    }

    println!("\n{}", "Training Complete! 🎉".green().bold());
    println!(
        "  Total time: {}",
        format_duration(start.elapsed().as_secs_f64())
    );
    println!("\n{}", "Next steps:".yellow().bold());
    println!(
        "  → Inspect metrics.csv and the SVG charts in {}",
        run_dir.display()
    );
    println!(
        "  → Run inference: mask_attr infer --model-dir {}",
        run_dir.display()
    );
    Ok(())
}

fn train_with_optimizer<B, M>(
    model: M,
    settings: &TrainSettings,
    schedule: &LrSchedule,
    device: &B::Device,
    train_dataset: &FaceCropDataset,
    val_dataset: &FaceCropDataset,
    batcher: &FaceCropBatcher,
    run_dir: &Path,
    stem: &str,
    sink: &mut Option<TrackingSink>,
) -> Result<M>
where
    B: AutodiffBackend,
    M: ClassifierModel<B> + AutodiffModule<B>,
    M::InnerModule: ClassifierModel<B::InnerBackend>,
{
    match settings.optimizer {
        OptimizerKind::Adam => {
            let optimizer = AdamConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(WEIGHT_DECAY)))
                .init();
            let trainer = Trainer::new(
                model,
                optimizer,
                schedule.clone(),
                settings.criterion,
                device.clone(),
            );
            fit(trainer, settings, train_dataset, val_dataset, batcher, run_dir, stem, sink)
        }
        OptimizerKind::Sgd => {
            let optimizer = SgdConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(WEIGHT_DECAY)))
                .init();
            let trainer = Trainer::new(
                model,
                optimizer,
                schedule.clone(),
                settings.criterion,
                device.clone(),
            );
            fit(trainer, settings, train_dataset, val_dataset, batcher, run_dir, stem, sink)
        }
    }
}

/// Best validation scores written next to the checkpoints.
#[derive(Debug, Clone, Default, Serialize)]
struct BestRecord {
    accuracy: f64,
    accuracy_epoch: usize,
    macro_f1: f64,
    f1_epoch: usize,
}

impl BestRecord {
    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// One row of `metrics.csv`.
#[derive(Serialize)]
struct EpochRow {
    epoch: usize,
    train_loss: f64,
    train_acc: f64,
    train_f1: f64,
    val_loss: f64,
    val_acc: f64,
    val_f1: f64,
    lr: f64,
}

#[allow(clippy::too_many_arguments)]
fn fit<B, M, O>(
    mut trainer: Trainer<B, M, O>,
    settings: &TrainSettings,
    train_dataset: &FaceCropDataset,
    val_dataset: &FaceCropDataset,
    batcher: &FaceCropBatcher,
    run_dir: &Path,
    stem: &str,
    sink: &mut Option<TrackingSink>,
) -> Result<M>
where
    B: AutodiffBackend,
    M: ClassifierModel<B> + AutodiffModule<B>,
    M::InnerModule: ClassifierModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    println!("\n{}", "Starting Training...".green().bold());
    let mut logger = TrainingLogger::new(settings.epochs);
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let has_validation = !val_dataset.records().is_empty();
    if !has_validation {
        tracing::warn!("Validation split is empty; checkpoints track the latest epoch instead");
    }

    let mut metrics_writer = csv::Writer::from_path(run_dir.join("metrics.csv"))?;
    let mut best_record = BestRecord::default();
    let mut final_val: Option<Metrics> = None;
    let mut val_losses: Vec<f64> = Vec::new();

    for epoch in 0..settings.epochs {
        println!(
            "\n{}",
            format!("Epoch {}/{}", epoch + 1, settings.epochs)
                .yellow()
                .bold()
        );
        logger.start_epoch(epoch);

        let train_stats = trainer.train_epoch(
            train_dataset,
            batcher,
            settings.batch_size,
            settings.log_interval,
            &mut rng,
        )?;
        let val_metrics = trainer.evaluate(val_dataset, batcher, settings.val_batch_size)?;

        let mut update = trainer.update_best(&val_metrics);
        if !has_validation {
            update = BestUpdate {
                accuracy_improved: true,
                f1_improved: false,
            };
        }

        if update.accuracy_improved {
            trainer.save_checkpoint(&run_dir.join(stem))?;
            best_record.accuracy = val_metrics.accuracy;
            best_record.accuracy_epoch = epoch + 1;
            logger.log_new_best("accuracy", val_metrics.accuracy);
        }
        if update.f1_improved {
            trainer.save_checkpoint(&run_dir.join(format!("{}f1", stem)))?;
            best_record.macro_f1 = val_metrics.macro_f1;
            best_record.f1_epoch = epoch + 1;
            logger.log_new_best("macro F1", val_metrics.macro_f1);
        }
        if update.accuracy_improved || update.f1_improved {
            best_record.save(&run_dir.join(format!("{}_scores.json", stem)))?;
        }

        let marker = if update.accuracy_improved && has_validation {
            " (best)".green().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} Loss: {:.4} | Train Acc: {:.2}% | Val Loss: {:.4} | Val Acc: {:.2}% | Val F1: {:.4}{}",
            "→".cyan(),
            train_stats.loss,
            train_stats.accuracy * 100.0,
            val_metrics.loss.unwrap_or(0.0),
            val_metrics.accuracy * 100.0,
            val_metrics.macro_f1,
            marker
        );

        metrics_writer.serialize(EpochRow {
            epoch: epoch + 1,
            train_loss: train_stats.loss,
            train_acc: train_stats.accuracy,
            train_f1: train_stats.macro_f1,
            val_loss: val_metrics.loss.unwrap_or(0.0),
            val_acc: val_metrics.accuracy,
            val_f1: val_metrics.macro_f1,
            lr: trainer.state().current_lr,
        })?;
        metrics_writer.flush()?;

        if let Some(sink) = sink.as_mut() {
            sink.log_scalars(
                epoch,
                &[
                    ("train_loss", train_stats.loss),
                    ("train_acc", train_stats.accuracy),
                    ("train_f1", train_stats.macro_f1),
                    ("val_loss", val_metrics.loss.unwrap_or(0.0)),
                    ("val_acc", val_metrics.accuracy),
                    ("val_f1", val_metrics.macro_f1),
                    ("lr", trainer.state().current_lr),
                ],
            )?;
        }

        if has_validation {
            let valid_model = trainer.model().valid();
            let inner_device = <B::InnerBackend as Backend>::Device::default();
            let grid_path = run_dir
                .join("grids")
                .join(format!("epoch_{:03}.png", epoch + 1));
            render_prediction_grid(&valid_model, val_dataset, batcher, &inner_device, &grid_path)?;
        }

        logger.end_epoch(
            train_stats.loss,
            val_metrics.accuracy,
            val_metrics.macro_f1,
            trainer.state().current_lr,
        );
        val_losses.push(val_metrics.loss.unwrap_or(0.0));
        final_val = Some(val_metrics);
        trainer.advance_epoch();
    }

    let state = trainer.state();
    let loss_series = vec![
        DataSeries::from_values("train loss", &state.train_losses, "#3498db"),
        DataSeries::from_values("val loss", &val_losses, "#e67e22"),
    ];
    generate_line_chart(
        "Training Loss",
        "Epoch",
        "Loss",
        &loss_series,
        &run_dir.join("loss.svg"),
    )?;
    let val_series = vec![
        DataSeries::from_values("val accuracy", &state.val_accuracies, "#2ecc71"),
        DataSeries::from_values("val macro F1", &state.val_f1_scores, "#9b59b6"),
    ];
    generate_line_chart(
        "Validation Metrics",
        "Epoch",
        "Score",
        &val_series,
        &run_dir.join("validation.svg"),
    )?;

    if let Some(metrics) = final_val.as_ref().filter(|m| m.total_samples > 0) {
        let bars: Vec<BarData> = metrics
            .per_class
            .iter()
            .map(|c| BarData::new(c.class_idx.to_string(), c.f1))
            .collect();
        generate_bar_chart(
            "Per-class F1 (validation)",
            "Class",
            "F1",
            &bars,
            &run_dir.join("per_class_f1.svg"),
        )?;
        generate_confusion_heatmap(
            &format!("Confusion Matrix ({})", train_dataset.mode()),
            &metrics.confusion_matrix,
            &run_dir.join(format!("{}confusion_matrix.svg", stem)),
        )?;
        metrics
            .confusion_matrix
            .save_csv(&run_dir.join(format!("{}confusion_matrix.csv", stem)))?;
        println!("\n{}", metrics.display());
    }

    logger.log_complete(state.best_val_accuracy, state.best_val_f1);
    if has_validation {
        let best_loss = val_losses.iter().copied().fold(f64::INFINITY, f64::min);
        println!("  📉 Best val loss: {:.4}", best_loss);
    }
    println!(
        "\n  💾 Checkpoints: {} (accuracy) / {}f1 (macro F1)",
        run_dir.join(stem).display(),
        stem
    );
    Ok(trainer.into_model())
}

/// Export the backbone weights of the accuracy-best checkpoint.
///
/// Falls back to the final model when no checkpoint was written.
fn export_best_backbone<B: AutodiffBackend>(
    model: BackboneClassifier<B>,
    run_dir: &Path,
    stem: &str,
    device: &B::Device,
) -> Result<()> {
    let best_path = run_dir.join(stem);
    let model = if best_path.with_extension("mpk").exists() {
        let recorder = CompactRecorder::new();
        model
            .load_file(best_path.clone(), &recorder, device)
            .map_err(|e| {
                PipelineError::Model(format!(
                    "failed to reload best checkpoint '{}': {:?}",
                    best_path.display(),
                    e
                ))
            })?
    } else {
        model
    };

    let backbone_path = run_dir.join(format!("{}_backbone", stem));
    model.save_backbone(&backbone_path)?;
    println!(
        "  💾 Backbone weights exported to {}",
        backbone_path.display().to_string().cyan()
    );
    Ok(())
}

/// Render a tiled grid of validation samples with prediction borders.
///
/// Correct predictions get a green border, wrong ones red. Tiles are the
/// first samples of the dataset, denormalized back to viewable pixels.
fn render_prediction_grid<BB, M>(
    model: &M,
    dataset: &FaceCropDataset,
    batcher: &FaceCropBatcher,
    device: &BB::Device,
    path: &Path,
) -> Result<()>
where
    BB: Backend,
    M: ClassifierModel<BB>,
{
    let count = GRID_TILES.min(dataset.records().len());
    if count == 0 {
        return Ok(());
    }

    let items = (0..count)
        .map(|i| dataset.get_checked(i))
        .collect::<Result<Vec<_>>>()?;
    let batch: FaceCropBatch<BB> = batcher.batch(items, device);

    let output = model.forward(batch.images.clone());
    let predictions: Vec<usize> = output
        .argmax(1)
        .squeeze::<1>(1)
        .into_data()
        .to_vec::<i64>()
        .unwrap()
        .into_iter()
        .map(|v| v as usize)
        .collect();
    let targets: Vec<usize> = batch
        .targets
        .into_data()
        .to_vec::<i64>()
        .unwrap()
        .into_iter()
        .map(|v| v as usize)
        .collect();
    let images: Vec<f32> = batch.images.into_data().to_vec::<f32>().unwrap();

    let [height, width] = batcher.resize();
    let tile_len = 3 * height * width;
    let rows = count.div_ceil(GRID_COLUMNS);
    let mut canvas = RgbImage::new((GRID_COLUMNS * width) as u32, (rows * height) as u32);

    for (idx, (pred, target)) in predictions.iter().zip(targets.iter()).enumerate() {
        let tile = denormalize_chw(
            &images[idx * tile_len..(idx + 1) * tile_len],
            batcher.stats(),
            height,
            width,
        );
        let border = if pred == target {
            Rgb([46u8, 204, 113])
        } else {
            Rgb([231u8, 76, 60])
        };
        let ox = (idx % GRID_COLUMNS) * width;
        let oy = (idx / GRID_COLUMNS) * height;
        for y in 0..height {
            for x in 0..width {
                let on_border = x < 2 || y < 2 || x >= width - 2 || y >= height - 2;
                let pixel = if on_border {
                    border
                } else {
                    *tile.get_pixel(x as u32, y as u32)
                };
                canvas.put_pixel((ox + x) as u32, (oy + y) as u32, pixel);
            }
        }
    }

    canvas.save(path).map_err(|e| {
        PipelineError::Training(format!(
            "failed to write prediction grid '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::prepare::build_metadata;
    use crate::dataset::TrainMode;
    use crate::training::trainer::Criterion;
    use burn_ndarray::NdArray;
    use image::{Rgb as TestRgb, RgbImage as TestRgbImage};

    type TestAutodiffBackend = burn::backend::Autodiff<NdArray>;

    fn make_person(images: &Path, name: &str, value: u8) {
        let person = images.join(name);
        std::fs::create_dir_all(&person).unwrap();
        for stem in ["mask1", "incorrect_mask", "normal"] {
            TestRgbImage::from_pixel(16, 16, TestRgb([value, value, value]))
                .save(person.join(format!("{}.jpg", stem)))
                .unwrap();
        }
    }

    #[test]
    fn test_run_training_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        make_person(&images, "000001_female_Asian_45", 60);
        make_person(&images, "000002_male_Asian_20", 120);
        make_person(&images, "000003_female_Asian_65", 180);
        make_person(&images, "000004_male_Asian_33", 220);

        let metadata = dir.path().join("metadata.csv");
        build_metadata(&images, &metadata).unwrap();

        let settings = TrainSettings {
            metadata,
            data_dir: images,
            model_dir: dir.path().join("model"),
            name: "exp".to_string(),
            epochs: 1,
            resize: [32, 32],
            batch_size: 4,
            val_batch_size: 4,
            model: ModelKind::Scratch,
            learning_rate: 1e-3,
            val_ratio: 0.25,
            criterion: Criterion::CrossEntropy,
            log_interval: 1,
            mode: TrainMode::Mask,
            ..TrainSettings::default()
        };

        run_training::<TestAutodiffBackend>(settings).unwrap();

        let run_dir = dir.path().join("model").join("exp");
        assert!(run_dir.join("mask.json").exists());
        assert!(run_dir.join("mask.mpk").exists());
        assert!(run_dir.join("maskf1.mpk").exists());
        assert!(run_dir.join("mask_scores.json").exists());
        assert!(run_dir.join("metrics.csv").exists());
        assert!(run_dir.join("loss.svg").exists());
        assert!(run_dir.join("validation.svg").exists());
        assert!(run_dir.join("maskconfusion_matrix.svg").exists());
        assert!(run_dir.join("maskconfusion_matrix.csv").exists());
        assert!(run_dir.join("distribution.json").exists());
        assert!(run_dir.join("grids").join("epoch_001.png").exists());

        let metrics = std::fs::read_to_string(run_dir.join("metrics.csv")).unwrap();
        let mut lines = metrics.lines();
        assert_eq!(
            lines.next().unwrap(),
            "epoch,train_loss,train_acc,train_f1,val_loss,val_acc,val_f1,lr"
        );
        assert_eq!(lines.count(), 1);
    }
}
