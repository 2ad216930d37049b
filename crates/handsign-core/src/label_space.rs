//! Label space: the bijection between gesture names and class indices.
//!
//! Index 0 is always the `none` background class. Base labels are sorted
//! and take indices `1..=|base|`; update-only labels are sorted on their own
//! and appended after the last base index. A label already known from the
//! base keeps its base index.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Reserved background class, always index 0.
pub const NONE_LABEL: &str = "none";

/// Dense label/index bijection for one update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpace {
    label_to_index: BTreeMap<String, usize>,
    index_to_label: Vec<String>,
    first_update_index: usize,
}

impl LabelSpace {
    /// Build the label space for a run from the four label columns.
    pub fn build(
        base_train: &[String],
        base_test: &[String],
        update_train: &[String],
        update_test: &[String],
    ) -> Self {
        let mut space = LabelSpace {
            label_to_index: BTreeMap::from([(NONE_LABEL.to_string(), 0)]),
            index_to_label: vec![NONE_LABEL.to_string()],
            first_update_index: 1,
        };

        for label in sorted_without_none(&[base_train, base_test]) {
            space.insert(label);
        }
        space.first_update_index = space.index_to_label.len();

        for label in sorted_without_none(&[update_train, update_test]) {
            if !space.label_to_index.contains_key(label) {
                space.insert(label);
            }
        }
        space
    }

    fn insert(&mut self, label: &str) {
        let index = self.index_to_label.len();
        self.label_to_index.insert(label.to_string(), index);
        self.index_to_label.push(label.to_string());
    }

    /// Number of classes, including `none`.
    pub fn len(&self) -> usize {
        self.index_to_label.len()
    }

    /// Never true: `none` is always present.
    pub fn is_empty(&self) -> bool {
        self.index_to_label.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.label_to_index.get(label).copied()
    }

    pub fn label_at(&self, index: usize) -> Option<&str> {
        self.index_to_label.get(index).map(String::as_str)
    }

    pub fn label_to_index(&self) -> &BTreeMap<String, usize> {
        &self.label_to_index
    }

    /// Labels ordered by class index.
    pub fn labels(&self) -> &[String] {
        &self.index_to_label
    }

    /// Labels introduced by the update, in index order.
    pub fn new_labels(&self) -> &[String] {
        &self.index_to_label[self.first_update_index..]
    }

    /// Map each label to its class index.
    pub fn encode(&self, labels: &[String]) -> Result<Vec<usize>, DatasetError> {
        labels
            .iter()
            .map(|l| {
                self.index_of(l)
                    .ok_or_else(|| DatasetError::UnknownLabel { label: l.clone() })
            })
            .collect()
    }
}

fn sorted_without_none<'a>(columns: &[&'a [String]]) -> BTreeSet<&'a str> {
    columns
        .iter()
        .flat_map(|c| c.iter())
        .map(String::as_str)
        .filter(|l| *l != NONE_LABEL)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn base_labels_come_first_even_if_update_sorts_earlier() {
        let space = LabelSpace::build(
            &labels(&["zeta", "none", "mu"]),
            &labels(&["mu"]),
            &labels(&["alpha"]),
            &labels(&["alpha", "beta"]),
        );
        assert_eq!(space.labels(), &labels(&["none", "mu", "zeta", "alpha", "beta"]));
        assert_eq!(space.index_of("alpha"), Some(3));
        assert_eq!(space.new_labels(), &labels(&["alpha", "beta"]));
    }

    #[test]
    fn known_update_label_keeps_base_index_without_gap() {
        let space = LabelSpace::build(
            &labels(&["A", "B"]),
            &labels(&["A"]),
            &labels(&["B", "C"]),
            &labels(&["A"]),
        );
        assert_eq!(space.index_of("B"), Some(2));
        assert_eq!(space.index_of("C"), Some(3));
        assert_eq!(space.len(), 4);
        assert_eq!(space.new_labels(), &labels(&["C"]));
    }

    #[test]
    fn none_only_inputs_yield_single_class() {
        let space = LabelSpace::build(&labels(&["none"]), &[], &labels(&["none"]), &[]);
        assert_eq!(space.len(), 1);
        assert_eq!(space.label_at(0), Some(NONE_LABEL));
        assert!(space.new_labels().is_empty());
    }

    #[test]
    fn encode_rejects_unknown_label() {
        let space = LabelSpace::build(&labels(&["A"]), &[], &[], &[]);
        assert_eq!(space.encode(&labels(&["A", "none"])).unwrap(), vec![1, 0]);
        assert!(matches!(
            space.encode(&labels(&["Z"])),
            Err(DatasetError::UnknownLabel { .. })
        ));
    }
}
