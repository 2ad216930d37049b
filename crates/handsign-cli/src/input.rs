//! Loading update batches from disk.
//!
//! Accepted layouts:
//! - JSON object `{"gesture": .., "landmarks": [..]}`
//! - JSON array of landmark rows (requires `--gesture`)
//! - CSV with a `label` column and one column per feature

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use handsign_core::dataset::ingest::{LandmarkRow, UpdateBatch};
use handsign_core::Dataset;

pub fn load_batch(path: &Path, gesture: Option<&str>, feature_len: usize) -> Result<UpdateBatch> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let mut batch = if is_csv {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let dataset = Dataset::from_csv_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))?;
        dataset.ensure_feature_len(feature_len)?;
        batch_from_dataset(&dataset, gesture)?
    } else {
        let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        parse_json(&raw, gesture).with_context(|| format!("failed to parse {}", path.display()))?
    };

    if let Some(gesture) = gesture {
        batch.gesture = gesture.to_string();
    }
    Ok(batch)
}

fn parse_json(raw: &[u8], gesture: Option<&str>) -> Result<UpdateBatch> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    if value.is_array() {
        let Some(gesture) = gesture else {
            bail!("a bare landmark array needs --gesture");
        };
        let landmarks: Vec<LandmarkRow> = serde_json::from_value(value)?;
        return Ok(UpdateBatch {
            gesture: gesture.to_string(),
            landmarks,
        });
    }
    Ok(serde_json::from_value(value)?)
}

fn batch_from_dataset(dataset: &Dataset, gesture: Option<&str>) -> Result<UpdateBatch> {
    let gesture = match gesture {
        Some(g) => g.to_string(),
        None => {
            let mut labels: Vec<&String> = dataset.labels().iter().collect();
            labels.sort();
            labels.dedup();
            match labels.as_slice() {
                [only] => (*only).clone(),
                [] => bail!("update file has no rows"),
                _ => bail!("update file mixes {} labels; pass --gesture", labels.len()),
            }
        }
    };
    Ok(UpdateBatch {
        gesture,
        landmarks: dataset.rows().map(|row| LandmarkRow::Flat(row.to_vec())).collect(),
    })
}
