//! Batch inference over an evaluation manifest
//!
//! The evaluation data root holds an `info.csv` manifest with an `ImageID`
//! column and an `images/` directory containing the files it names. Output
//! is the manifest with every original column preserved and an `ans` column
//! carrying the predicted composite class.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::dataset::{
    FaceCropBatch, FaceCropBatcher, FaceCropItem, ImageTransform, EVAL_CHANNEL_STATS,
    NUM_AGE_CLASSES, NUM_CLASSES, NUM_GENDER_CLASSES, NUM_MASK_CLASSES,
};
use crate::inference::predictor::LoadedModel;
use crate::model::ClassifierModel;
use crate::settings::InferSettings;
use crate::utils::error::{PipelineError, Result};
use crate::utils::logging::ProgressLogger;
use crate::utils::{format_duration, format_number};

/// Outcome of a batch inference run.
#[derive(Debug, Clone)]
pub struct InferenceReport {
    /// Rows predicted and written
    pub rows: usize,
    /// Path of the written CSV
    pub output: PathBuf,
}

/// The evaluation manifest with all columns preserved as-is.
pub struct Manifest {
    headers: csv::StringRecord,
    rows: Vec<csv::StringRecord>,
    image_id_idx: usize,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::PathNotFound(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let image_id_idx = headers.iter().position(|h| h == "ImageID").ok_or_else(|| {
            PipelineError::Inference(format!(
                "manifest '{}' has no ImageID column",
                path.display()
            ))
        })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?);
        }
        if rows.is_empty() {
            return Err(PipelineError::Inference(format!(
                "manifest '{}' lists no images",
                path.display()
            )));
        }
        Ok(Self {
            headers,
            rows,
            image_id_idx,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Image file names in manifest order.
    pub fn image_ids(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(|row| row.get(self.image_id_idx).unwrap_or(""))
    }

    /// Write the manifest with an `ans` column holding the predictions.
    ///
    /// An existing `ans` column is overwritten in place; otherwise the
    /// column is appended after the original ones.
    pub fn save_with_answers(&self, path: &Path, answers: &[usize]) -> Result<()> {
        if answers.len() != self.rows.len() {
            return Err(PipelineError::Inference(format!(
                "expected {} answers, got {}",
                self.rows.len(),
                answers.len()
            )));
        }

        let ans_idx = self.headers.iter().position(|h| h == "ans");
        let mut writer = csv::Writer::from_path(path)?;

        let mut header_out: Vec<&str> = self.headers.iter().collect();
        if ans_idx.is_none() {
            header_out.push("ans");
        }
        writer.write_record(&header_out)?;

        for (row, answer) in self.rows.iter().zip(answers) {
            let answer = answer.to_string();
            let mut out: Vec<&str> = row.iter().collect();
            match ans_idx {
                Some(idx) => out[idx] = &answer,
                None => out.push(&answer),
            }
            writer.write_record(&out)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Predict the composite class for every manifest row and write `output.csv`.
pub fn run_inference<B: Backend>(settings: InferSettings) -> Result<InferenceReport> {
    let start = Instant::now();
    println!("\n{}", "Initializing Inference...".green().bold());
    let device = B::Device::default();

    let manifest_path = settings.data_dir.join("info.csv");
    let images_dir = settings.data_dir.join("images");
    let manifest = Manifest::load(&manifest_path)?;
    println!(
        "  📊 {} images listed in {}",
        format_number(manifest.len()),
        manifest_path.display().to_string().cyan()
    );

    let transform = ImageTransform::new(settings.resize);
    let batcher = FaceCropBatcher::new(EVAL_CHANNEL_STATS, settings.resize);

    let predictions = if settings.ensemble {
        println!("\n{}", "Loading Attribute Ensemble...".cyan());
        let heads = [
            ("mask", NUM_MASK_CLASSES),
            ("gender", NUM_GENDER_CLASSES),
            ("age", NUM_AGE_CLASSES),
        ];
        let mut per_head = Vec::with_capacity(heads.len());
        for (base, num_classes) in heads {
            let stem = settings.metric.checkpoint_stem(base);
            let model = LoadedModel::<B>::load(
                settings.model,
                num_classes,
                &settings.model_dir.join(&stem),
                &device,
            )?;
            println!("  ✅ {} head ready ({})", base, stem);
            per_head.push(predict_classes(
                &model,
                &manifest,
                &images_dir,
                &transform,
                &batcher,
                settings.batch_size,
                &device,
            )?);
        }
        per_head[0]
            .iter()
            .zip(&per_head[1])
            .zip(&per_head[2])
            .map(|((mask, gender), age)| mask * 6 + gender * 3 + age)
            .collect()
    } else {
        println!("\n{}", "Loading Model...".cyan());
        let stem = settings.metric.checkpoint_stem("best");
        let model = LoadedModel::<B>::load(
            settings.model,
            NUM_CLASSES,
            &settings.model_dir.join(&stem),
            &device,
        )?;
        predict_classes(
            &model,
            &manifest,
            &images_dir,
            &transform,
            &batcher,
            settings.batch_size,
            &device,
        )?
    };

    std::fs::create_dir_all(&settings.output_dir)?;
    let output = settings.output_dir.join("output.csv");
    manifest.save_with_answers(&output, &predictions)?;

    println!("\n{}", "Inference Complete! 🎉".green().bold());
    println!(
        "  💾 Predictions written to {}",
        output.display().to_string().cyan()
    );
    println!(
        "  Total time: {}",
        format_duration(start.elapsed().as_secs_f64())
    );

    Ok(InferenceReport {
        rows: predictions.len(),
        output,
    })
}

/// Run one model over every manifest image, in manifest order.
fn predict_classes<B: Backend, M: ClassifierModel<B>>(
    model: &M,
    manifest: &Manifest,
    images_dir: &Path,
    transform: &ImageTransform,
    batcher: &FaceCropBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<usize>> {
    if batch_size == 0 {
        return Err(PipelineError::Inference(
            "batch size must be greater than zero".to_string(),
        ));
    }

    let ids: Vec<&str> = manifest.image_ids().collect();
    let mut progress = ProgressLogger::new("inference", ids.len());
    let mut predictions = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(batch_size) {
        let mut items = Vec::with_capacity(chunk.len());
        for id in chunk {
            let path = images_dir.join(id);
            let image = transform.apply(&path)?;
            items.push(FaceCropItem {
                image,
                label: 0,
                path: path.display().to_string(),
            });
        }

        let batch: FaceCropBatch<B> = batcher.batch(items, device);
        let output = model.forward(batch.images);
        let classes = output
            .argmax(1)
            .squeeze::<1>(1)
            .into_data()
            .to_vec::<i64>()
            .unwrap();
        predictions.extend(classes.into_iter().map(|c| c as usize));
        progress.update(predictions.len());
    }

    progress.finish();
    Ok(predictions)
}
