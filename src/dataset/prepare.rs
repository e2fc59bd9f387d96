//! Metadata preparation from the raw image tree
//!
//! The raw dataset is organized as one directory per photographed person,
//! named `{id}_{gender}_{race}_{age}`, each holding seven crops: five worn
//! masks (`mask1` to `mask5`), one `incorrect_mask` and one `normal`. This
//! module walks that tree and emits the metadata CSV the rest of the
//! pipeline consumes.

use crate::dataset::metadata::{MetadataTable, SampleRecord};
use crate::utils::error::{PipelineError, Result, ResultExt};
use crate::utils::logging::ProgressLogger;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

/// Counts reported after building a metadata file.
#[derive(Debug, Clone, Serialize)]
pub struct PrepareSummary {
    pub persons: usize,
    pub samples: usize,
    pub skipped_files: usize,
}

impl fmt::Display for PrepareSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prepared {} samples from {} person directories ({} files skipped)",
            self.samples, self.persons, self.skipped_files
        )
    }
}

/// Scan the raw image tree and write a metadata CSV.
///
/// Gender and age labels come from the person directory name, the mask label
/// from the file stem. A directory or file that does not match the expected
/// naming fails the whole run; only non-image files and hidden entries are
/// skipped.
pub fn build_metadata(data_dir: &Path, output: &Path) -> Result<PrepareSummary> {
    if !data_dir.is_dir() {
        return Err(PipelineError::PathNotFound(data_dir.to_path_buf()));
    }

    let mut person_dirs: Vec<_> = WalkDir::new(data_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !name.starts_with('_')
        })
        .map(|e| e.into_path())
        .collect();
    person_dirs.sort();

    if person_dirs.is_empty() {
        return Err(PipelineError::Metadata(format!(
            "no person directories found under '{}'",
            data_dir.display()
        )));
    }

    let mut records = Vec::new();
    let mut skipped_files = 0usize;
    let mut progress = ProgressLogger::new("Scanning person directories", person_dirs.len());

    for person_dir in &person_dirs {
        let dir_name = person_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (gender, age) = parse_person_dir(&dir_name)?;

        let mut files: Vec<_> = WalkDir::new(person_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for file in files {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if stem.starts_with('.') {
                skipped_files += 1;
                continue;
            }
            let is_image = file
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    matches!(ext.as_str(), "jpg" | "jpeg" | "png")
                })
                .unwrap_or(false);
            if !is_image {
                skipped_files += 1;
                continue;
            }

            let mask = mask_label_from_stem(&stem).ok_or_else(|| {
                PipelineError::Metadata(format!(
                    "unrecognized file stem '{}' in '{}'",
                    stem,
                    file.display()
                ))
            })?;

            records.push(SampleRecord {
                full_path: file.clone(),
                group: dir_name.clone(),
                mask,
                gender,
                age,
                class: mask * 6 + gender * 3 + age,
            });
        }
        progress.increment();
    }
    progress.finish();

    let summary = PrepareSummary {
        persons: person_dirs.len(),
        samples: records.len(),
        skipped_files,
    };
    MetadataTable::from_records(records).save(output)?;
    tracing::info!("Wrote metadata to {}: {}", output.display(), summary);

    Ok(summary)
}

/// Parse `{id}_{gender}_{race}_{age}` into gender and age bucket labels.
fn parse_person_dir(name: &str) -> Result<(usize, usize)> {
    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() != 4 {
        return Err(PipelineError::Metadata(format!(
            "person directory '{}' does not match '{{id}}_{{gender}}_{{race}}_{{age}}'",
            name
        )));
    }

    let gender = match parts[1] {
        "male" => 0,
        "female" => 1,
        other => {
            return Err(PipelineError::Metadata(format!(
                "unknown gender '{}' in directory '{}'",
                other, name
            )))
        }
    };
    let age: u32 = parts[3]
        .parse()
        .with_context(|| format!("invalid age '{}' in directory '{}'", parts[3], name))?;

    Ok((gender, age_bucket(age)))
}

/// Bucket a raw age into the three age classes.
pub fn age_bucket(age: u32) -> usize {
    if age < 30 {
        0
    } else if age < 60 {
        1
    } else {
        2
    }
}

fn mask_label_from_stem(stem: &str) -> Option<usize> {
    match stem {
        "mask1" | "mask2" | "mask3" | "mask4" | "mask5" => Some(0),
        "incorrect_mask" => Some(1),
        "normal" => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::metadata::MetadataTable;

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    fn make_person(dir: &Path, name: &str, files: &[&str]) {
        let person = dir.join(name);
        std::fs::create_dir(&person).unwrap();
        for file in files {
            touch(&person.join(file));
        }
    }

    #[test]
    fn test_build_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        make_person(
            &images,
            "000001_female_Asian_45",
            &["mask1.jpg", "incorrect_mask.jpg", "normal.jpg", "notes.txt"],
        );
        make_person(&images, "000002_male_Asian_20", &["mask3.png", "._mask3.png"]);

        let output = dir.path().join("metadata.csv");
        let summary = build_metadata(&images, &output).unwrap();
        assert_eq!(summary.persons, 2);
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.skipped_files, 2);

        let table = MetadataTable::load(&output).unwrap();
        assert_eq!(table.len(), 4);

        let records = table.records();
        // Sorted person dirs, sorted files within: incorrect_mask first.
        assert_eq!(records[0].group, "000001_female_Asian_45");
        assert_eq!(records[0].mask, 1);
        assert_eq!(records[0].gender, 1);
        assert_eq!(records[0].age, 1);
        assert_eq!(records[0].class, 10);

        let normal = records.iter().find(|r| r.mask == 2).unwrap();
        assert_eq!(normal.class, 2 * 6 + 1 * 3 + 1);

        let young_male = records.iter().find(|r| r.group.starts_with("000002")).unwrap();
        assert_eq!(young_male.mask, 0);
        assert_eq!(young_male.gender, 0);
        assert_eq!(young_male.age, 0);
        assert_eq!(young_male.class, 0);
    }

    #[test]
    fn test_malformed_directory_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        make_person(dir.path(), "000001_female_Asian", &["mask1.jpg"]);

        let result = build_metadata(dir.path(), &dir.path().join("out.csv"));
        match result {
            Err(PipelineError::Metadata(msg)) => assert!(msg.contains("000001_female_Asian")),
            other => panic!("expected metadata error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_gender_fails() {
        let dir = tempfile::tempdir().unwrap();
        make_person(dir.path(), "000001_robot_Asian_45", &["mask1.jpg"]);

        let result = build_metadata(dir.path(), &dir.path().join("out.csv"));
        assert!(matches!(result, Err(PipelineError::Metadata(_))));
    }

    #[test]
    fn test_unknown_stem_fails() {
        let dir = tempfile::tempdir().unwrap();
        make_person(dir.path(), "000001_female_Asian_45", &["selfie.jpg"]);

        let result = build_metadata(dir.path(), &dir.path().join("out.csv"));
        match result {
            Err(PipelineError::Metadata(msg)) => assert!(msg.contains("selfie")),
            other => panic!("expected metadata error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_dir_fails() {
        let result = build_metadata(
            Path::new("/nonexistent/images"),
            Path::new("/tmp/out.csv"),
        );
        assert!(matches!(result, Err(PipelineError::PathNotFound(_))));
    }

    #[test]
    fn test_age_buckets() {
        assert_eq!(age_bucket(0), 0);
        assert_eq!(age_bucket(29), 0);
        assert_eq!(age_bucket(30), 1);
        assert_eq!(age_bucket(59), 1);
        assert_eq!(age_bucket(60), 2);
        assert_eq!(age_bucket(95), 2);
    }
}
