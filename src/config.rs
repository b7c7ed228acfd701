use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::engine::EngineError;
use crate::core::scanner::path_key;

/// Extensions tracked when no other set is configured.
pub const DEFAULT_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "jfif"];

pub const DEFAULT_BINS: usize = 8;

/// Everything needed to bind a [`MatchEngine`](crate::MatchEngine) to one directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub root: PathBuf,
    /// Explicit catalog location. See [`EngineConfig::resolved_save_file`] for the default.
    pub save_file: Option<PathBuf>,
    /// Histogram bins per channel and for edge orientation.
    pub bins: usize,
    /// Square side length images are decimated to before extraction.
    pub resize: Option<u32>,
    pub extensions: Vec<String>,
    pub include_subfolders: bool,
    /// Persist after this many extracted files; 0 persists once at the end.
    pub checkpoint_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            save_file: None,
            bins: DEFAULT_BINS,
            resize: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            include_subfolders: true,
            checkpoint_interval: 0,
        }
    }
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_save_file(mut self, save_file: impl Into<PathBuf>) -> Self {
        self.save_file = Some(save_file.into());
        self
    }

    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    pub fn with_resize(mut self, resize: Option<u32>) -> Self {
        self.resize = resize;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bins == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "bins must be at least 1".to_string(),
            });
        }
        if self.resize == Some(0) {
            return Err(EngineError::InvalidConfig {
                reason: "resize dimension must be greater than 0".to_string(),
            });
        }
        if self.extensions.is_empty() {
            return Err(EngineError::InvalidConfig {
                reason: "at least one image extension is required".to_string(),
            });
        }
        Ok(())
    }

    /// Catalog file for this root: the explicit `save_file`, otherwise one file per
    /// root under the user cache directory, named by a hash of the root path.
    pub fn resolved_save_file(&self) -> PathBuf {
        if let Some(path) = &self.save_file {
            return path.clone();
        }
        default_save_file(&self.root)
    }
}

fn default_save_file(root: &Path) -> PathBuf {
    let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    match dirs::cache_dir() {
        Some(cache) => {
            let digest = blake3::hash(path_key(&canonical).as_bytes()).to_hex();
            cache
                .join("simscan")
                .join(format!("{}.json", &digest.as_str()[..16]))
        }
        None => canonical.join(".simscan.json"),
    }
}
