//! Duplicate guard: rejects updates that mostly repeat known samples.
//!
//! Every new sample is compared against the existing samples in order; the
//! first existing sample closer than the distance threshold is recorded as
//! its match and the scan moves on to the next new sample. This is a
//! first-match scan, not a nearest-neighbour search, so the reported
//! existing label is the earliest one within range.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// Default match radius in normalized landmark space.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.02;

/// Default abort threshold, in percent.
pub const DEFAULT_RATIO_THRESHOLD: f64 = 70.0;

/// How duplicate ratios are aggregated into a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateGranularity {
    /// Abort if the train ratio or the test ratio reaches the threshold.
    #[default]
    PerSplit,
    /// Abort if the mean of the two split ratios reaches the threshold.
    MeanOfSplits,
    /// Abort if any update label reaches the threshold within either split.
    PerClass,
}

/// Thresholds for the guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicatePolicy {
    pub distance_threshold: f32,
    /// Percent in `[0, 100]`.
    pub ratio_threshold: f64,
    pub granularity: DuplicateGranularity,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            granularity: DuplicateGranularity::PerSplit,
        }
    }
}

/// One new sample matched to an existing sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub new_index: usize,
    pub existing_index: usize,
    pub new_label: String,
    pub existing_label: String,
}

/// Result of scanning one update split against its base split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitCheck {
    pub total: usize,
    pub matches: usize,
    /// Percent of `total` that matched.
    pub ratio: f64,
    /// Percent of each update label's rows that matched.
    pub per_class: BTreeMap<String, f64>,
    pub pairs: Vec<DuplicatePair>,
}

impl SplitCheck {
    fn from_pairs(new: &Dataset, pairs: Vec<DuplicatePair>) -> Self {
        let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
        for label in new.labels() {
            *totals.entry(label.as_str()).or_insert(0) += 1;
        }
        let mut hits: BTreeMap<&str, usize> = BTreeMap::new();
        for pair in &pairs {
            *hits.entry(pair.new_label.as_str()).or_insert(0) += 1;
        }
        let per_class = totals
            .iter()
            .map(|(label, total)| {
                let matched = hits.get(label).copied().unwrap_or(0);
                (label.to_string(), duplicate_ratio(matched, *total))
            })
            .collect();

        SplitCheck {
            total: new.len(),
            matches: pairs.len(),
            ratio: duplicate_ratio(pairs.len(), new.len()),
            per_class,
            pairs,
        }
    }
}

/// Outcome of the guard for one update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub policy: DuplicatePolicy,
    pub train: SplitCheck,
    pub test: SplitCheck,
    pub rejected: bool,
}

impl DuplicateReport {
    /// Highest ratio that took part in the decision.
    pub fn decisive_ratio(&self) -> f64 {
        match self.policy.granularity {
            DuplicateGranularity::PerSplit => self.train.ratio.max(self.test.ratio),
            DuplicateGranularity::MeanOfSplits => (self.train.ratio + self.test.ratio) / 2.0,
            DuplicateGranularity::PerClass => self
                .train
                .per_class
                .values()
                .chain(self.test.per_class.values())
                .copied()
                .fold(0.0, f64::max),
        }
    }
}

/// Squared Euclidean distance; rows must have equal length.
fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Match each new sample to the first existing sample strictly closer than
/// `distance_threshold`.
pub fn find_duplicates(
    existing: &Dataset,
    new: &Dataset,
    distance_threshold: f32,
) -> Vec<DuplicatePair> {
    if existing.feature_len() != new.feature_len() {
        return Vec::new();
    }
    let limit = distance_threshold * distance_threshold;
    let mut pairs = Vec::new();
    for (new_index, (row, new_label)) in new.iter().enumerate() {
        let hit = existing
            .iter()
            .enumerate()
            .find(|(_, (candidate, _))| squared_distance(row, candidate) < limit);
        if let Some((existing_index, (_, existing_label))) = hit {
            pairs.push(DuplicatePair {
                new_index,
                existing_index,
                new_label: new_label.to_string(),
                existing_label: existing_label.to_string(),
            });
        }
    }
    pairs
}

/// `matches / total` as a percentage; 0 for an empty split.
pub fn duplicate_ratio(matches: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        matches as f64 * 100.0 / total as f64
    }
}

impl DuplicatePolicy {
    /// Scan both update splits against the matching base splits and decide.
    pub fn check(
        &self,
        base_train: &Dataset,
        base_test: &Dataset,
        update_train: &Dataset,
        update_test: &Dataset,
    ) -> DuplicateReport {
        let train = SplitCheck::from_pairs(
            update_train,
            find_duplicates(base_train, update_train, self.distance_threshold),
        );
        let test = SplitCheck::from_pairs(
            update_test,
            find_duplicates(base_test, update_test, self.distance_threshold),
        );

        let threshold = self.ratio_threshold;
        let rejected = match self.granularity {
            DuplicateGranularity::PerSplit => train.ratio >= threshold || test.ratio >= threshold,
            DuplicateGranularity::MeanOfSplits => (train.ratio + test.ratio) / 2.0 >= threshold,
            DuplicateGranularity::PerClass => train
                .per_class
                .values()
                .chain(test.per_class.values())
                .any(|r| *r >= threshold),
        };

        DuplicateReport {
            policy: *self,
            train,
            test,
            rejected,
        }
    }
}
