//! Landmark datasets: labeled fixed-length feature rows.
//!
//! A `Dataset` stores its features row-major in one flat `Vec<f32>` next to
//! a parallel `Vec<String>` of labels. Every row has exactly `feature_len`
//! values and a non-empty label.

pub mod ingest;
pub mod npy;

use std::io::BufRead;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Number of scalars per sample in the MediaPipe hand model (21 points x 3).
pub const DEFAULT_FEATURE_LEN: usize = 63;

/// One labeled feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub features: Vec<f32>,
    pub label: String,
}

/// Ordered sequence of samples sharing one feature length.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_len: usize,
    features: Vec<f32>,
    labels: Vec<String>,
}

impl Dataset {
    /// Create an empty dataset with rows of `feature_len` values.
    pub fn new(feature_len: usize) -> Result<Self, DatasetError> {
        if feature_len == 0 {
            return Err(DatasetError::ZeroFeatureLength);
        }
        Ok(Self {
            feature_len,
            features: Vec::new(),
            labels: Vec::new(),
        })
    }

    /// Build a dataset from owned samples, validating every row.
    pub fn from_samples(
        feature_len: usize,
        samples: impl IntoIterator<Item = Sample>,
    ) -> Result<Self, DatasetError> {
        let mut dataset = Self::new(feature_len)?;
        for sample in samples {
            dataset.push(&sample.features, &sample.label)?;
        }
        Ok(dataset)
    }

    /// Build a dataset from a flat row-major buffer and its labels.
    pub fn from_parts(
        feature_len: usize,
        features: Vec<f32>,
        labels: Vec<String>,
    ) -> Result<Self, DatasetError> {
        if feature_len == 0 {
            return Err(DatasetError::ZeroFeatureLength);
        }
        if features.len() != labels.len() * feature_len {
            return Err(DatasetError::FeatureLength {
                expected: labels.len() * feature_len,
                actual: features.len(),
            });
        }
        if let Some(row) = labels.iter().position(|l| l.is_empty()) {
            return Err(DatasetError::EmptyLabel { row });
        }
        Ok(Self {
            feature_len,
            features,
            labels,
        })
    }

    /// Append one row.
    pub fn push(&mut self, features: &[f32], label: &str) -> Result<(), DatasetError> {
        if features.len() != self.feature_len {
            return Err(DatasetError::FeatureLength {
                expected: self.feature_len,
                actual: features.len(),
            });
        }
        if label.is_empty() {
            return Err(DatasetError::EmptyLabel {
                row: self.labels.len(),
            });
        }
        self.features.extend_from_slice(features);
        self.labels.push(label.to_string());
        Ok(())
    }

    /// Append every row of `other`.
    pub fn extend_from(&mut self, other: &Dataset) -> Result<(), DatasetError> {
        self.ensure_feature_len(other.feature_len)?;
        self.features.extend_from_slice(&other.features);
        self.labels.extend(other.labels.iter().cloned());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    /// Flat row-major feature buffer.
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Feature row `index`.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.feature_len)?;
        self.features.get(start..start + self.feature_len)
    }

    /// All feature rows in order.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.features.chunks_exact(self.feature_len)
    }

    /// `(features, label)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&[f32], &str)> {
        self.rows().zip(self.labels.iter().map(String::as_str))
    }

    /// New dataset holding the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        let mut features = Vec::with_capacity(indices.len() * self.feature_len);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            if let Some(row) = self.row(i) {
                features.extend_from_slice(row);
                labels.push(self.labels[i].clone());
            }
        }
        Dataset {
            feature_len: self.feature_len,
            features,
            labels,
        }
    }

    /// Fail unless rows hold exactly `expected` values.
    pub fn ensure_feature_len(&self, expected: usize) -> Result<(), DatasetError> {
        if self.feature_len != expected {
            return Err(DatasetError::FeatureLength {
                expected,
                actual: self.feature_len,
            });
        }
        Ok(())
    }

    /// Parse CSV with a header row containing a `label` column; every other
    /// column is a feature, in header order.
    pub fn from_csv_reader<R: BufRead>(reader: R) -> Result<Self, DatasetError> {
        let mut lines = reader.lines().enumerate();
        let header = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(DatasetError::Empty),
            }
        };
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let label_col = columns
            .iter()
            .position(|c| *c == "label")
            .ok_or_else(|| DatasetError::Csv {
                line: 1,
                reason: "header has no `label` column".to_string(),
            })?;
        let mut dataset = Self::new(columns.len() - 1).map_err(|_| DatasetError::Csv {
            line: 1,
            reason: "header has no feature columns".to_string(),
        })?;

        let mut row = Vec::with_capacity(dataset.feature_len);
        for (idx, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if cells.len() != columns.len() {
                return Err(DatasetError::Csv {
                    line: line_no,
                    reason: format!("expected {} cells, got {}", columns.len(), cells.len()),
                });
            }
            row.clear();
            for (col, cell) in cells.iter().enumerate() {
                if col == label_col {
                    continue;
                }
                let value = cell.parse::<f32>().map_err(|e| DatasetError::Csv {
                    line: line_no,
                    reason: format!("column {}: {e}", columns[col]),
                })?;
                row.push(value);
            }
            dataset.push(&row, cells[label_col])?;
        }
        Ok(dataset)
    }
}

/// A dataset partitioned into train and test parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Dataset,
    pub test: Dataset,
}

/// Deterministically partition `dataset`.
///
/// Indices are permuted with a `StdRng` seeded from `seed`; the first
/// `ceil(len * test_fraction)` permuted indices form `test`, the rest form
/// `train`. Both parts must be non-empty.
pub fn split_train_test(
    dataset: &Dataset,
    test_fraction: f64,
    seed: u64,
) -> Result<Split, DatasetError> {
    let len = dataset.len();
    let too_small = DatasetError::TooSmall { len, test_fraction };
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(too_small);
    }
    let n_test = (len as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= len {
        return Err(too_small);
    }

    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    Ok(Split {
        train: dataset.select(train_idx),
        test: dataset.select(test_idx),
    })
}
