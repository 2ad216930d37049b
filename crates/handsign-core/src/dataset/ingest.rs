//! Update batch ingestion.
//!
//! Clients submit one gesture name and a list of captured landmark rows.
//! A row is either a flat list of scalars or a list of `{x, y, z}` points,
//! flattened in `x, y, z` order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Dataset;
use crate::error::DatasetError;

/// One MediaPipe landmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LandmarkRow {
    Flat(Vec<f32>),
    Points(Vec<Point3>),
}

impl LandmarkRow {
    fn flatten_into(&self, out: &mut Vec<f32>) {
        out.clear();
        match self {
            LandmarkRow::Flat(values) => out.extend_from_slice(values),
            LandmarkRow::Points(points) => {
                for p in points {
                    out.extend_from_slice(&[p.x, p.y, p.z]);
                }
            }
        }
    }
}

/// Newly captured samples for a single gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub gesture: String,
    pub landmarks: Vec<LandmarkRow>,
}

impl UpdateBatch {
    pub fn from_json_file(path: &Path) -> Result<Self, DatasetError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Convert into a dataset where every row is labeled `gesture`.
    pub fn to_dataset(&self, feature_len: usize) -> Result<Dataset, DatasetError> {
        let gesture = self.gesture.trim();
        if gesture.is_empty() {
            return Err(DatasetError::EmptyLabel { row: 0 });
        }
        if self.landmarks.is_empty() {
            return Err(DatasetError::Empty);
        }
        let mut dataset = Dataset::new(feature_len)?;
        let mut row = Vec::with_capacity(feature_len);
        for landmarks in &self.landmarks {
            landmarks.flatten_into(&mut row);
            dataset.push(&row, gesture)?;
        }
        Ok(dataset)
    }
}
