//! Version codes and artifact file names.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// `{unix_seconds}_{8 hex chars}`, unique per update run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionCode(String);

impl VersionCode {
    pub fn generate() -> Self {
        let uid = uuid::Uuid::new_v4().simple().to_string();
        VersionCode(format!("{}_{}", chrono::Utc::now().timestamp(), &uid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VersionCode {
    fn from(s: &str) -> Self {
        VersionCode(s.to_string())
    }
}

impl fmt::Display for VersionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four co-versioned file names of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactNames {
    pub weights: String,
    pub compiled: String,
    pub train: String,
    pub test: String,
}

impl ArtifactNames {
    pub fn new(code: &str, weights_ext: &str, compiled_ext: &str) -> Self {
        ArtifactNames {
            weights: format!("{code}_model_cnn.{weights_ext}"),
            compiled: format!("{code}_cnn.{compiled_ext}"),
            train: format!("{code}_train_hand_landmarks.npy"),
            test: format!("{code}_test_hand_landmarks.npy"),
        }
    }

    /// Name of the archive holding weights and both splits.
    pub fn bundle_archive(code: &str) -> String {
        format!("{code}.zip")
    }

    pub fn in_dir(&self, dir: &Path) -> ArtifactPaths {
        ArtifactPaths {
            weights: dir.join(&self.weights),
            compiled: dir.join(&self.compiled),
            train: dir.join(&self.train),
            test: dir.join(&self.test),
        }
    }
}

/// Local locations of one bundle's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub weights: PathBuf,
    pub compiled: PathBuf,
    pub train: PathBuf,
    pub test: PathBuf,
}
