//! Offline experiment tracking
//!
//! When a `tracking.json` file is present in the working directory, its
//! `init` block (project, entity, run name) is picked up and every epoch's
//! scalar metrics are appended to `tracking.jsonl` inside the run directory,
//! one JSON object per line. The file can later be replayed into whatever
//! dashboard the experiment belongs to. Without a config file, tracking is
//! silently disabled.

use crate::utils::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Top-level layout of `tracking.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub init: TrackingInit,
}

/// Run identification fields from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingInit {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One line of the tracking log.
#[derive(Debug, Serialize, Deserialize)]
struct TrackingRecord<'a> {
    step: usize,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<&'a str>,
    metrics: BTreeMap<&'a str, f64>,
}

/// Appends epoch-level scalars to a JSONL file in the run directory.
pub struct TrackingSink {
    init: TrackingInit,
    file: File,
}

impl TrackingSink {
    /// Look for a tracking config and open the sink when one exists.
    ///
    /// Returns `Ok(None)` when `config_path` does not exist; a config file
    /// that exists but cannot be parsed is an error.
    pub fn discover(config_path: &Path, run_dir: &Path) -> Result<Option<Self>> {
        if !config_path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(config_path)?;
        let config: TrackingConfig = serde_json::from_str(&contents).map_err(|e| {
            PipelineError::Config(format!(
                "failed to parse tracking config '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let log_path = run_dir.join("tracking.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        tracing::info!(
            "Experiment tracking enabled, logging to {}",
            log_path.display()
        );

        Ok(Some(Self {
            init: config.init,
            file,
        }))
    }

    /// Append one record of named scalars for the given step.
    pub fn log_scalars(&mut self, step: usize, scalars: &[(&str, f64)]) -> Result<()> {
        let record = TrackingRecord {
            step,
            timestamp: chrono::Utc::now().to_rfc3339(),
            project: self.init.project.as_deref(),
            entity: self.init.entity.as_deref(),
            run: self.init.name.as_deref(),
            metrics: scalars.iter().copied().collect(),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        writeln!(self.file, "{}", line)?;
        Ok(())
    }

    /// The run name from the config, when one was given.
    pub fn run_name(&self) -> Option<&str> {
        self.init.name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let sink =
            TrackingSink::discover(&dir.path().join("tracking.json"), dir.path()).unwrap();
        assert!(sink.is_none());
    }

    #[test]
    fn test_discover_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tracking.json");
        std::fs::write(&config_path, "not json").unwrap();

        let result = TrackingSink::discover(&config_path, dir.path());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_log_scalars_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tracking.json");
        std::fs::write(
            &config_path,
            r#"{"init": {"project": "faces", "name": "exp1"}}"#,
        )
        .unwrap();

        let mut sink = TrackingSink::discover(&config_path, dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(sink.run_name(), Some("exp1"));

        sink.log_scalars(0, &[("train_loss", 1.25), ("val_acc", 0.5)])
            .unwrap();
        sink.log_scalars(1, &[("train_loss", 0.75), ("val_acc", 0.62)])
            .unwrap();

        let contents = std::fs::read_to_string(dir.path().join("tracking.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["step"], 0);
        assert_eq!(first["project"], "faces");
        assert_eq!(first["run"], "exp1");
        assert!((first["metrics"]["train_loss"].as_f64().unwrap() - 1.25).abs() < 1e-10);
        assert!(first["entity"].is_null());
    }
}
