//! Group-aware train/validation splitting
//!
//! Face crops of the same person are highly correlated (same face, different
//! mask states), so splitting is done on person groups rather than individual
//! samples. All crops of a person land in exactly one side of the split.

use crate::dataset::metadata::{MetadataTable, SampleRecord};
use crate::dataset::{AGE_LABELS, GENDER_LABELS, MASK_LABELS};
use crate::utils::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Parameters for the group split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of person groups assigned to validation
    pub val_fraction: f64,
    /// RNG seed for group shuffling
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            val_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(val_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&val_fraction) {
            return Err(PipelineError::Split(format!(
                "validation fraction {} must be in [0, 1)",
                val_fraction
            )));
        }
        Ok(Self { val_fraction, seed })
    }
}

/// Sample records partitioned into train and validation sets.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: Vec<SampleRecord>,
    pub valid: Vec<SampleRecord>,
}

impl DatasetSplits {
    /// Split a metadata table by person group.
    ///
    /// Distinct groups are collected in first-seen order, shuffled with a
    /// seeded RNG, and `floor(groups * val_fraction)` of them become the
    /// validation set. The same seed always produces the same split.
    pub fn from_table(table: &MetadataTable, config: &SplitConfig) -> Result<Self> {
        let mut groups: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for record in table.records() {
            if seen.insert(record.group.as_str()) {
                groups.push(record.group.as_str());
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        groups.shuffle(&mut rng);

        let num_valid_groups = (groups.len() as f64 * config.val_fraction).floor() as usize;
        let valid_groups: HashSet<&str> = groups[..num_valid_groups].iter().copied().collect();

        let mut train = Vec::new();
        let mut valid = Vec::new();
        for record in table.records() {
            if valid_groups.contains(record.group.as_str()) {
                valid.push(record.clone());
            } else {
                train.push(record.clone());
            }
        }

        if train.is_empty() {
            return Err(PipelineError::Split(
                "no training samples left after splitting".to_string(),
            ));
        }

        Ok(Self { train, valid })
    }

    pub fn stats(&self) -> SplitStats {
        SplitStats {
            train_samples: self.train.len(),
            train_groups: count_groups(&self.train),
            valid_samples: self.valid.len(),
            valid_groups: count_groups(&self.valid),
        }
    }
}

fn count_groups(records: &[SampleRecord]) -> usize {
    let mut seen = HashSet::new();
    records.iter().filter(|r| seen.insert(&r.group)).count()
}

/// Sample and group counts per split side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitStats {
    pub train_samples: usize,
    pub train_groups: usize,
    pub valid_samples: usize,
    pub valid_groups: usize,
}

impl fmt::Display for SplitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = (self.train_samples + self.valid_samples).max(1);
        writeln!(f, "Dataset split:")?;
        writeln!(
            f,
            "  Train: {:>7} samples across {:>5} groups ({:.1}%)",
            self.train_samples,
            self.train_groups,
            self.train_samples as f64 / total as f64 * 100.0
        )?;
        write!(
            f,
            "  Valid: {:>7} samples across {:>5} groups ({:.1}%)",
            self.valid_samples,
            self.valid_groups,
            self.valid_samples as f64 / total as f64 * 100.0
        )
    }
}

/// Per-attribute label counts for one split side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitDistribution {
    pub name: String,
    pub total: usize,
    pub mask: [usize; 3],
    pub gender: [usize; 2],
    pub age: [usize; 3],
}

impl SplitDistribution {
    pub fn new(name: impl Into<String>, records: &[SampleRecord]) -> Self {
        let mut mask = [0usize; 3];
        let mut gender = [0usize; 2];
        let mut age = [0usize; 3];
        for record in records {
            mask[record.mask] += 1;
            gender[record.gender] += 1;
            age[record.age] += 1;
        }
        Self {
            name: name.into(),
            total: records.len(),
            mask,
            gender,
            age,
        }
    }
}

/// Label distributions for both sides of a split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionReport {
    pub splits: Vec<SplitDistribution>,
}

impl DistributionReport {
    pub fn new(splits: &DatasetSplits) -> Self {
        Self {
            splits: vec![
                SplitDistribution::new("train", &splits.train),
                SplitDistribution::new("valid", &splits.valid),
            ],
        }
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn write_attribute_line(
    f: &mut fmt::Formatter<'_>,
    attribute: &str,
    labels: &[&str],
    counts: &[usize],
    total: usize,
) -> fmt::Result {
    let total = total.max(1);
    let parts: Vec<String> = labels
        .iter()
        .zip(counts.iter())
        .map(|(label, &count)| {
            format!(
                "{} {} ({:.1}%)",
                label,
                count,
                count as f64 / total as f64 * 100.0
            )
        })
        .collect();
    writeln!(f, "    {:<8} {}", attribute, parts.join(" | "))
}

impl fmt::Display for DistributionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Label distribution:")?;
        for split in &self.splits {
            writeln!(f, "  {} ({} samples)", split.name, split.total)?;
            write_attribute_line(f, "mask", &MASK_LABELS, &split.mask, split.total)?;
            write_attribute_line(f, "gender", &GENDER_LABELS, &split.gender, split.total)?;
            write_attribute_line(f, "age", &AGE_LABELS, &split.age, split.total)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(group: &str, file: &str, mask: usize, gender: usize, age: usize) -> SampleRecord {
        SampleRecord {
            full_path: PathBuf::from(format!("/data/images/{}/{}", group, file)),
            group: group.to_string(),
            mask,
            gender,
            age,
            class: mask * 6 + gender * 3 + age,
        }
    }

    fn sample_table(num_groups: usize) -> MetadataTable {
        let mut records = Vec::new();
        for g in 0..num_groups {
            let group = format!("{:06}_female_Asian_45", g);
            for (file, mask) in [("mask1.jpg", 0), ("incorrect_mask.jpg", 1), ("normal.jpg", 2)] {
                records.push(record(&group, file, mask, 1, 1));
            }
        }
        MetadataTable::from_records(records)
    }

    #[test]
    fn test_split_is_group_disjoint() {
        let table = sample_table(10);
        let splits =
            DatasetSplits::from_table(&table, &SplitConfig::default()).unwrap();

        let train_groups: HashSet<&String> = splits.train.iter().map(|r| &r.group).collect();
        let valid_groups: HashSet<&String> = splits.valid.iter().map(|r| &r.group).collect();
        assert!(train_groups.is_disjoint(&valid_groups));
        assert_eq!(splits.train.len() + splits.valid.len(), table.len());
    }

    #[test]
    fn test_split_takes_floor_of_groups() {
        // 10 groups at 0.25 -> floor(2.5) = 2 validation groups of 3 samples.
        let table = sample_table(10);
        let config = SplitConfig::new(0.25, 42).unwrap();
        let splits = DatasetSplits::from_table(&table, &config).unwrap();

        let stats = splits.stats();
        assert_eq!(stats.valid_groups, 2);
        assert_eq!(stats.valid_samples, 6);
        assert_eq!(stats.train_groups, 8);
    }

    #[test]
    fn test_split_is_deterministic() {
        let table = sample_table(40);
        let config = SplitConfig::default();
        let a = DatasetSplits::from_table(&table, &config).unwrap();
        let b = DatasetSplits::from_table(&table, &config).unwrap();
        assert_eq!(a.valid, b.valid);

        let other_seed = SplitConfig::new(0.2, 7).unwrap();
        let c = DatasetSplits::from_table(&table, &other_seed).unwrap();
        // Picking the same 8 of 40 groups under a different seed is
        // vanishingly unlikely.
        assert_ne!(a.valid, c.valid);
    }

    #[test]
    fn test_zero_fraction_keeps_everything_in_train() {
        let table = sample_table(5);
        let config = SplitConfig::new(0.0, 42).unwrap();
        let splits = DatasetSplits::from_table(&table, &config).unwrap();
        assert_eq!(splits.train.len(), table.len());
        assert!(splits.valid.is_empty());
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        assert!(SplitConfig::new(1.0, 42).is_err());
        assert!(SplitConfig::new(-0.1, 42).is_err());
    }

    #[test]
    fn test_distribution_report_counts() {
        let records = vec![
            record("a", "mask1.jpg", 0, 0, 0),
            record("a", "normal.jpg", 2, 0, 0),
            record("b", "mask1.jpg", 0, 1, 2),
        ];
        let distribution = SplitDistribution::new("train", &records);
        assert_eq!(distribution.total, 3);
        assert_eq!(distribution.mask, [2, 0, 1]);
        assert_eq!(distribution.gender, [2, 1]);
        assert_eq!(distribution.age, [2, 0, 1]);
    }

    #[test]
    fn test_distribution_report_save_json() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table(4);
        let splits = DatasetSplits::from_table(&table, &SplitConfig::default()).unwrap();
        let report = DistributionReport::new(&splits);

        let path = dir.path().join("distribution.json");
        report.save_json(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: DistributionReport = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.splits.len(), 2);
        assert_eq!(parsed.splits[0].name, "train");
    }
}
