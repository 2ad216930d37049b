//! Dataset merger.

use crate::dataset::{Dataset, Split};
use crate::error::DatasetError;

/// Concatenate `base` then `update`.
pub fn merge(base: &Dataset, update: &Dataset) -> Result<Dataset, DatasetError> {
    let mut merged = base.clone();
    merged.extend_from(update)?;
    Ok(merged)
}

/// Merge train with train and test with test.
pub fn merge_splits(base: &Split, update: &Split) -> Result<Split, DatasetError> {
    Ok(Split {
        train: merge(&base.train, &update.train)?,
        test: merge(&base.test, &update.test)?,
    })
}
