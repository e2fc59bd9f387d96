//! Metadata table loading and validation
//!
//! The pipeline is driven by a CSV metadata file with one row per face crop.
//! Each row carries the absolute image path recorded at preparation time, the
//! person directory it came from (used for group-aware splitting) and the
//! three attribute labels plus their composite class.

use crate::dataset::encode_class;
use crate::utils::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One labeled face crop from the metadata CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Absolute path to the image file
    #[serde(rename = "FullPath")]
    pub full_path: PathBuf,
    /// Person directory name, e.g. `000001_female_Asian_45`
    #[serde(rename = "path")]
    pub group: String,
    /// Mask label: 0 = worn, 1 = incorrect, 2 = not worn
    #[serde(rename = "Mask")]
    pub mask: usize,
    /// Gender label: 0 = male, 1 = female
    #[serde(rename = "Gender")]
    pub gender: usize,
    /// Age bucket: 0 = under 30, 1 = 30 to 59, 2 = 60 and over
    #[serde(rename = "Age")]
    pub age: usize,
    /// Composite class: `mask * 6 + gender * 3 + age`
    #[serde(rename = "Class")]
    pub class: usize,
}

impl SampleRecord {
    /// Check label ranges and composite class consistency.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.mask > 2 {
            return Err(format!("mask label {} out of range 0..=2", self.mask));
        }
        if self.gender > 1 {
            return Err(format!("gender label {} out of range 0..=1", self.gender));
        }
        if self.age > 2 {
            return Err(format!("age label {} out of range 0..=2", self.age));
        }
        match encode_class(self.mask, self.gender, self.age) {
            Some(expected) if expected == self.class => Ok(()),
            Some(expected) => Err(format!(
                "class {} does not match labels (expected {})",
                self.class, expected
            )),
            None => Err("labels do not form a valid class".to_string()),
        }
    }
}

/// The full metadata table for one dataset.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    records: Vec<SampleRecord>,
}

impl MetadataTable {
    /// Load and validate a metadata CSV.
    ///
    /// Every row is validated eagerly; a malformed or inconsistent row fails
    /// the whole load with the offending row number in the error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::PathNotFound(path.to_path_buf()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for (idx, row) in reader.deserialize::<SampleRecord>().enumerate() {
            let record = row.map_err(|e| {
                PipelineError::Metadata(format!("row {}: {}", idx + 1, e))
            })?;
            record.validate().map_err(|e| {
                PipelineError::Metadata(format!(
                    "row {} ('{}'): {}",
                    idx + 1,
                    record.full_path.display(),
                    e
                ))
            })?;
            records.push(record);
        }

        if records.is_empty() {
            return Err(PipelineError::Metadata(format!(
                "metadata file '{}' contains no samples",
                path.display()
            )));
        }

        Ok(Self { records })
    }

    pub fn from_records(records: Vec<SampleRecord>) -> Self {
        Self { records }
    }

    /// Rewrite every image path so the part after the `images` component is
    /// joined onto `data_root`.
    ///
    /// Metadata files carry the absolute paths of the machine they were
    /// prepared on; rebasing makes them usable anywhere the image tree is
    /// mounted.
    pub fn rebase_paths(&mut self, data_root: &Path) -> Result<()> {
        for record in &mut self.records {
            let components: Vec<_> = record.full_path.iter().collect();
            let marker = components
                .iter()
                .position(|c| *c == "images")
                .ok_or_else(|| {
                    PipelineError::Metadata(format!(
                        "cannot rebase '{}': no 'images' component in path",
                        record.full_path.display()
                    ))
                })?;
            let mut rebased = data_root.to_path_buf();
            for part in &components[marker + 1..] {
                rebased.push(part);
            }
            record.full_path = rebased;
        }
        Ok(())
    }

    /// Write the table back out as CSV.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SampleRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct person groups in the table.
    pub fn group_count(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.records.iter().filter(|r| seen.insert(&r.group)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("metadata.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "FullPath,path,Mask,Gender,Age,Class\n\
             /data/train/images/000001_female_Asian_45/mask1.jpg,000001_female_Asian_45,0,1,1,4\n\
             /data/train/images/000002_male_Asian_20/normal.jpg,000002_male_Asian_20,2,0,0,12\n",
        );

        let table = MetadataTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.group_count(), 2);

        let first = &table.records()[0];
        assert_eq!(first.group, "000001_female_Asian_45");
        assert_eq!(first.mask, 0);
        assert_eq!(first.gender, 1);
        assert_eq!(first.age, 1);
        assert_eq!(first.class, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let result = MetadataTable::load(Path::new("/nonexistent/metadata.csv"));
        assert!(matches!(result, Err(PipelineError::PathNotFound(_))));
    }

    #[test]
    fn test_load_rejects_inconsistent_class() {
        let dir = tempfile::tempdir().unwrap();
        // mask=0, gender=1, age=1 encodes to class 4, not 7.
        let path = write_csv(
            dir.path(),
            "FullPath,path,Mask,Gender,Age,Class\n\
             /data/images/p/mask1.jpg,p,0,1,1,7\n",
        );

        let result = MetadataTable::load(&path);
        match result {
            Err(PipelineError::Metadata(msg)) => {
                assert!(msg.contains("row 1"));
                assert!(msg.contains("expected 4"));
            }
            other => panic!("expected metadata error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_out_of_range_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "FullPath,path,Mask,Gender,Age,Class\n\
             /data/images/p/mask1.jpg,p,3,0,0,0\n",
        );

        let result = MetadataTable::load(&path);
        assert!(matches!(result, Err(PipelineError::Metadata(_))));
    }

    #[test]
    fn test_rebase_paths() {
        let records = vec![SampleRecord {
            full_path: PathBuf::from("/opt/ml/input/data/train/images/000001_female_Asian_45/mask1.jpg"),
            group: "000001_female_Asian_45".to_string(),
            mask: 0,
            gender: 1,
            age: 1,
            class: 4,
        }];
        let mut table = MetadataTable::from_records(records);
        table.rebase_paths(Path::new("/mnt/faces")).unwrap();

        assert_eq!(
            table.records()[0].full_path,
            PathBuf::from("/mnt/faces/000001_female_Asian_45/mask1.jpg")
        );
    }

    #[test]
    fn test_rebase_paths_without_marker() {
        let records = vec![SampleRecord {
            full_path: PathBuf::from("/somewhere/else/mask1.jpg"),
            group: "p".to_string(),
            mask: 0,
            gender: 0,
            age: 0,
            class: 0,
        }];
        let mut table = MetadataTable::from_records(records);
        let result = table.rebase_paths(Path::new("/mnt/faces"));
        assert!(matches!(result, Err(PipelineError::Metadata(_))));
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![SampleRecord {
            full_path: PathBuf::from("/data/images/p/incorrect_mask.jpg"),
            group: "p".to_string(),
            mask: 1,
            gender: 0,
            age: 2,
            class: 8,
        }];
        let table = MetadataTable::from_records(records.clone());

        let path = dir.path().join("out.csv");
        table.save(&path).unwrap();
        let reloaded = MetadataTable::load(&path).unwrap();
        assert_eq!(reloaded.records(), records.as_slice());
    }
}
