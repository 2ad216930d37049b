//! Inputs derived from the merged data for the training engine and compiler.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::Dataset;

/// Inverse-frequency class weights.
///
/// `weight[c] = max_count / count[c]`, so the most frequent class gets 1.0.
/// Classes with no samples get 0.0. Indices `>= num_classes` are ignored.
pub fn class_weights(class_indices: &[usize], num_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; num_classes];
    for &c in class_indices {
        if let Some(slot) = counts.get_mut(c) {
            *slot += 1;
        }
    }
    let max_count = counts.iter().copied().max().unwrap_or(0);
    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                0.0
            } else {
                max_count as f32 / count as f32
            }
        })
        .collect()
}

/// Up to `limit` rows of `train`, shuffled with a seeded RNG, for calibration.
pub fn representative_samples(train: &Dataset, limit: usize, seed: u64) -> Dataset {
    let mut indices: Vec<usize> = (0..train.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices.truncate(limit);
    train.select(&indices)
}
