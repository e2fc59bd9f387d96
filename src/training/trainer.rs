//! Training engine
//!
//! Owns the model, optimizer and training state and executes epochs over a
//! `FaceCropDataset`. Samples are read through the checked accessor, so an
//! unreadable image fails the epoch instead of shrinking it silently.
//! Validation runs the autodiff-free inner module and returns full metrics
//! including the confusion matrix.

use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use clap::ValueEnum;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::dataset::{FaceCropBatch, FaceCropBatcher, FaceCropDataset};
use crate::model::ClassifierModel;
use crate::training::scheduler::LrSchedule;
use crate::utils::error::{PipelineError, Result};
use crate::utils::metrics::{AccuracyTracker, Metrics, RunningAverage};

/// Weight decay applied by both optimizers.
pub const WEIGHT_DECAY: f32 = 5e-4;

/// Smoothing factor used by the label smoothing criterion.
pub const LABEL_SMOOTHING: f32 = 0.1;

/// Loss function selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    CrossEntropy,
    LabelSmoothing,
}

impl Criterion {
    /// The smoothing factor this criterion applies, if any.
    pub fn smoothing(self) -> Option<f32> {
        match self {
            Criterion::CrossEntropy => None,
            Criterion::LabelSmoothing => Some(LABEL_SMOOTHING),
        }
    }

    fn loss<BB: Backend>(
        self,
        logits: &Tensor<BB, 2>,
        targets: &Tensor<BB, 1, Int>,
    ) -> Tensor<BB, 1> {
        let mut config = CrossEntropyLossConfig::new();
        if let Some(smoothing) = self.smoothing() {
            config = config.with_smoothing(Some(smoothing));
        }
        config
            .init(&logits.device())
            .forward(logits.clone(), targets.clone())
    }
}

/// Mutable state carried across epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Current zero-based epoch
    pub epoch: usize,
    /// Optimizer steps taken so far
    pub iteration: usize,
    /// Best validation accuracy seen
    pub best_val_accuracy: f64,
    /// Epoch that produced the best accuracy
    pub best_accuracy_epoch: usize,
    /// Best validation macro F1 seen
    pub best_val_f1: f64,
    /// Epoch that produced the best macro F1
    pub best_f1_epoch: usize,
    /// Average training loss per epoch
    pub train_losses: Vec<f64>,
    /// Validation accuracy per epoch
    pub val_accuracies: Vec<f64>,
    /// Validation macro F1 per epoch
    pub val_f1_scores: Vec<f64>,
    /// Total samples processed
    pub samples_seen: usize,
    /// Learning rate of the current epoch
    pub current_lr: f64,
}

impl TrainingState {
    pub fn new(initial_lr: f64) -> Self {
        Self {
            epoch: 0,
            iteration: 0,
            best_val_accuracy: 0.0,
            best_accuracy_epoch: 0,
            best_val_f1: 0.0,
            best_f1_epoch: 0,
            train_losses: Vec::new(),
            val_accuracies: Vec::new(),
            val_f1_scores: Vec::new(),
            samples_seen: 0,
            current_lr: initial_lr,
        }
    }

    pub fn record_train_loss(&mut self, loss: f64) {
        self.train_losses.push(loss);
    }

    pub fn record_validation(&mut self, accuracy: f64, macro_f1: f64) {
        self.val_accuracies.push(accuracy);
        self.val_f1_scores.push(macro_f1);
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Which best-so-far trackers a validation pass improved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BestUpdate {
    pub accuracy_improved: bool,
    pub f1_improved: bool,
}

/// Aggregates from one training epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub batches: usize,
}

/// Drives optimization of one model over one label set.
pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
{
    model: M,
    optimizer: O,
    schedule: LrSchedule,
    criterion: Criterion,
    state: TrainingState,
    device: B::Device,
    num_classes: usize,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: ClassifierModel<B> + AutodiffModule<B>,
    M::InnerModule: ClassifierModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    pub fn new(
        model: M,
        optimizer: O,
        schedule: LrSchedule,
        criterion: Criterion,
        device: B::Device,
    ) -> Self {
        let num_classes = model.num_classes();
        let state = TrainingState::new(schedule.get_lr(0));
        Self {
            model,
            optimizer,
            schedule,
            criterion,
            state,
            device,
            num_classes,
        }
    }

    /// Run one epoch over shuffled batches, including the remainder batch.
    ///
    /// Emits a windowed progress log every `log_interval` batches; the window
    /// accumulators reset after each log line.
    pub fn train_epoch(
        &mut self,
        dataset: &FaceCropDataset,
        batcher: &FaceCropBatcher,
        batch_size: usize,
        log_interval: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<EpochStats> {
        dataset.ensure_transform()?;
        if dataset.records().is_empty() {
            return Err(PipelineError::Training(
                "training dataset is empty".to_string(),
            ));
        }
        if batch_size == 0 {
            return Err(PipelineError::Training(
                "batch size must be greater than zero".to_string(),
            ));
        }

        let lr = self.schedule.get_lr(self.state.epoch);
        self.state.current_lr = lr;
        let log_interval = log_interval.max(1);

        let mut indices: Vec<usize> = (0..dataset.records().len()).collect();
        indices.shuffle(rng);
        let num_batches = indices.len().div_ceil(batch_size);

        let mut model = self.model.clone();

        let mut window_loss = RunningAverage::new();
        let mut window_acc = AccuracyTracker::new();
        let mut window_preds: Vec<usize> = Vec::new();
        let mut window_targets: Vec<usize> = Vec::new();

        let mut epoch_loss = RunningAverage::new();
        let mut epoch_acc = AccuracyTracker::new();
        let mut epoch_preds: Vec<usize> = Vec::new();
        let mut epoch_targets: Vec<usize> = Vec::new();

        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let items = chunk
                .iter()
                .map(|&i| dataset.get_checked(i))
                .collect::<Result<Vec<_>>>()?;
            let batch: FaceCropBatch<B> = batcher.batch(items, &self.device);
            let actual_batch_size = chunk.len();

            let output = model.forward(batch.images.clone());
            let loss = self.criterion.loss(&output, &batch.targets);
            let loss_value: f64 = loss.clone().into_scalar().elem();

            let predictions = output.argmax(1).squeeze::<1>(1);
            let correct: i64 = predictions
                .clone()
                .equal(batch.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();

            let preds: Vec<usize> = predictions
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

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = self.optimizer.step(lr, model, grads);

            self.state.iteration += 1;
            self.state.samples_seen += actual_batch_size;

            window_loss.add(loss_value);
            window_acc.add_batch(correct as usize, actual_batch_size);
            window_preds.extend_from_slice(&preds);
            window_targets.extend_from_slice(&targets);

            epoch_loss.add(loss_value);
            epoch_acc.add_batch(correct as usize, actual_batch_size);
            epoch_preds.extend(preds);
            epoch_targets.extend(targets);

            if (batch_idx + 1) % log_interval == 0 || batch_idx + 1 == num_batches {
                let window =
                    Metrics::from_predictions(&window_preds, &window_targets, self.num_classes);
                info!(
                    "Epoch {} batch {:>4}/{}: loss {:.4}, acc {:.2}%, f1 {:.4}, lr {:.2e}",
                    self.state.epoch + 1,
                    batch_idx + 1,
                    num_batches,
                    window_loss.average(),
                    window_acc.accuracy() * 100.0,
                    window.macro_f1,
                    lr
                );
                window_loss.reset();
                window_acc.reset();
                window_preds.clear();
                window_targets.clear();
            }
        }

        self.model = model;

        let macro_f1 =
            Metrics::from_predictions(&epoch_preds, &epoch_targets, self.num_classes).macro_f1;
        let stats = EpochStats {
            loss: epoch_loss.average(),
            accuracy: epoch_acc.accuracy(),
            macro_f1,
            batches: num_batches,
        };
        self.state.record_train_loss(stats.loss);
        debug!(
            "Epoch {} finished: {} batches, {} samples seen total",
            self.state.epoch + 1,
            stats.batches,
            self.state.samples_seen
        );
        Ok(stats)
    }

    /// Evaluate the current model on a dataset without gradient tracking.
    pub fn evaluate(
        &self,
        dataset: &FaceCropDataset,
        batcher: &FaceCropBatcher,
        batch_size: usize,
    ) -> Result<Metrics> {
        dataset.ensure_transform()?;
        if dataset.records().is_empty() {
            return Ok(Metrics::from_predictions(&[], &[], self.num_classes));
        }

        let model = self.model.valid();
        let device = <B::InnerBackend as Backend>::Device::default();

        let mut all_predictions: Vec<usize> = Vec::new();
        let mut all_targets: Vec<usize> = Vec::new();
        let mut loss_avg = RunningAverage::new();

        let indices: Vec<usize> = (0..dataset.records().len()).collect();
        for chunk in indices.chunks(batch_size.max(1)) {
            let items = chunk
                .iter()
                .map(|&i| dataset.get_checked(i))
                .collect::<Result<Vec<_>>>()?;
            let batch: FaceCropBatch<B::InnerBackend> = batcher.batch(items, &device);

            let output = model.forward(batch.images.clone());
            let loss = self.criterion.loss(&output, &batch.targets);
            loss_avg.add(loss.into_scalar().elem());

            let predictions = output.argmax(1).squeeze::<1>(1);
            all_predictions.extend(
                predictions
                    .into_data()
                    .to_vec::<i64>()
                    .unwrap()
                    .into_iter()
                    .map(|v| v as usize),
            );
            all_targets.extend(
                batch
                    .targets
                    .into_data()
                    .to_vec::<i64>()
                    .unwrap()
                    .into_iter()
                    .map(|v| v as usize),
            );
        }

        let mut metrics =
            Metrics::from_predictions(&all_predictions, &all_targets, self.num_classes);
        metrics.loss = Some(loss_avg.average());
        Ok(metrics)
    }

    /// Fold a validation result into the best-so-far trackers.
    pub fn update_best(&mut self, metrics: &Metrics) -> BestUpdate {
        let mut update = BestUpdate::default();
        if metrics.accuracy > self.state.best_val_accuracy {
            self.state.best_val_accuracy = metrics.accuracy;
            self.state.best_accuracy_epoch = self.state.epoch;
            update.accuracy_improved = true;
        }
        if metrics.macro_f1 > self.state.best_val_f1 {
            self.state.best_val_f1 = metrics.macro_f1;
            self.state.best_f1_epoch = self.state.epoch;
            update.f1_improved = true;
        }
        self.state.record_validation(metrics.accuracy, metrics.macro_f1);
        update
    }

    /// Save the full model record. The recorder appends its own extension.
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let recorder = CompactRecorder::new();
        self.model
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| {
                PipelineError::Model(format!(
                    "failed to save checkpoint to '{}': {:?}",
                    path.display(),
                    e
                ))
            })?;
        debug!("Saved checkpoint to {}", path.display());
        Ok(())
    }

    /// Restore the model from a checkpoint record.
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let recorder = CompactRecorder::new();
        let model = self
            .model
            .clone()
            .load_file(path.to_path_buf(), &recorder, &self.device)
            .map_err(|e| {
                PipelineError::Model(format!(
                    "failed to load checkpoint from '{}': {:?}",
                    path.display(),
                    e
                ))
            })?;
        self.model = model;
        info!("Loaded checkpoint from {}", path.display());
        Ok(())
    }

    pub fn advance_epoch(&mut self) {
        self.state.epoch += 1;
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::metadata::SampleRecord;
    use crate::dataset::stats::ChannelStats;
    use crate::dataset::{ImageTransform, TrainMode};
    use crate::model::cnn::{CnnClassifier, CnnClassifierConfig};
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use rand::SeedableRng;
    use std::path::PathBuf;

    type TestAutodiffBackend = burn::backend::Autodiff<NdArray>;

    #[test]
    fn test_training_state_records() {
        let mut state = TrainingState::new(1e-3);
        assert_eq!(state.epoch, 0);
        assert!((state.current_lr - 1e-3).abs() < 1e-12);

        state.record_train_loss(0.9);
        state.record_train_loss(0.6);
        state.record_validation(0.5, 0.4);
        assert_eq!(state.train_losses, vec![0.9, 0.6]);
        assert_eq!(state.val_accuracies, vec![0.5]);
        assert_eq!(state.val_f1_scores, vec![0.4]);
    }

    #[test]
    fn test_criterion_smoothing() {
        assert_eq!(Criterion::CrossEntropy.smoothing(), None);
        assert_eq!(Criterion::LabelSmoothing.smoothing(), Some(LABEL_SMOOTHING));
    }

    fn tiny_dataset(dir: &std::path::Path) -> FaceCropDataset {
        let mut samples = Vec::new();
        for (i, value) in [40u8, 90, 160, 220].iter().enumerate() {
            let path = dir.join(format!("face{}.png", i));
            RgbImage::from_pixel(8, 8, Rgb([*value, *value, *value]))
                .save(&path)
                .unwrap();
            let mask = i % 3;
            samples.push(SampleRecord {
                full_path: PathBuf::from(&path),
                group: format!("{:06}_male_Asian_20", i),
                mask,
                gender: 0,
                age: 0,
                class: mask * 6,
            });
        }
        FaceCropDataset::with_transform(samples, TrainMode::Mask, ImageTransform::new([32, 32]))
    }

    fn test_batcher() -> FaceCropBatcher {
        let stats = ChannelStats {
            mean: [0.5, 0.5, 0.5],
            std: [0.25, 0.25, 0.25],
        };
        FaceCropBatcher::new(stats, [32, 32])
    }

    #[test]
    fn test_train_epoch_and_evaluate() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset(dir.path());
        let batcher = test_batcher();

        let device = Default::default();
        let config = CnnClassifierConfig::new().with_num_classes(3);
        let model = CnnClassifier::<TestAutodiffBackend>::new(&config, &device);
        let mut trainer = Trainer::new(
            model,
            AdamConfig::new().init(),
            LrSchedule::constant(1e-3),
            Criterion::CrossEntropy,
            device,
        );

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let stats = trainer
            .train_epoch(&dataset, &batcher, 2, 1, &mut rng)
            .unwrap();
        assert_eq!(stats.batches, 2);
        assert!(stats.loss.is_finite());
        assert_eq!(trainer.state().iteration, 2);
        assert_eq!(trainer.state().samples_seen, 4);

        let metrics = trainer.evaluate(&dataset, &batcher, 2).unwrap();
        assert_eq!(metrics.total_samples, 4);
        assert!(metrics.loss.unwrap().is_finite());
    }

    #[test]
    fn test_train_epoch_keeps_remainder_batch() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset(dir.path());
        let batcher = test_batcher();

        let device = Default::default();
        let config = CnnClassifierConfig::new().with_num_classes(3);
        let model = CnnClassifier::<TestAutodiffBackend>::new(&config, &device);
        let mut trainer = Trainer::new(
            model,
            AdamConfig::new().init(),
            LrSchedule::constant(1e-3),
            Criterion::CrossEntropy,
            device,
        );

        // 4 samples at batch size 3 -> one full batch plus a remainder of 1.
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let stats = trainer
            .train_epoch(&dataset, &batcher, 3, 10, &mut rng)
            .unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(trainer.state().samples_seen, 4);
    }

    #[test]
    fn test_update_best_tracks_both_metrics() {
        let device = Default::default();
        let config = CnnClassifierConfig::new().with_num_classes(2);
        let model = CnnClassifier::<TestAutodiffBackend>::new(&config, &device);
        let mut trainer = Trainer::new(
            model,
            AdamConfig::new().init(),
            LrSchedule::default(),
            Criterion::CrossEntropy,
            device,
        );

        let good = Metrics::from_predictions(&[0, 1, 1], &[0, 1, 1], 2);
        let update = trainer.update_best(&good);
        assert!(update.accuracy_improved);
        assert!(update.f1_improved);

        let worse = Metrics::from_predictions(&[0, 0, 0], &[0, 1, 1], 2);
        let update = trainer.update_best(&worse);
        assert!(!update.accuracy_improved);
        assert!(!update.f1_improved);
        assert!((trainer.state().best_val_accuracy - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_save_and_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = CnnClassifierConfig::new().with_num_classes(3);
        let model = CnnClassifier::<TestAutodiffBackend>::new(&config, &device);
        let mut trainer = Trainer::new(
            model,
            AdamConfig::new().init(),
            LrSchedule::default(),
            Criterion::CrossEntropy,
            device,
        );

        let path = dir.path().join("checkpoints").join("best");
        trainer.save_checkpoint(&path).unwrap();
        assert!(path.with_extension("mpk").exists());
        trainer.load_checkpoint(&path).unwrap();
    }

    #[test]
    fn test_train_epoch_requires_transform() {
        let dataset = FaceCropDataset::new(Vec::new(), TrainMode::Multi);
        let batcher = test_batcher();

        let device = Default::default();
        let model =
            CnnClassifier::<TestAutodiffBackend>::new(&CnnClassifierConfig::new(), &device);
        let mut trainer = Trainer::new(
            model,
            AdamConfig::new().init(),
            LrSchedule::default(),
            Criterion::CrossEntropy,
            device,
        );

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let result = trainer.train_epoch(&dataset, &batcher, 2, 1, &mut rng);
        assert!(matches!(result, Err(PipelineError::Dataset(_))));
    }
}
