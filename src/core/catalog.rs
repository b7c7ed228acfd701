use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::core::features::{FeatureError, FeatureExtractor, FeatureVector};
use crate::core::savefile::{self, SaveFile, SavedEntry, SavedInfo, SavedMeta};
use crate::core::scanner::{ImageScanner, ScanError, path_key};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid catalog root: {0}")]
    InvalidRoot(#[from] ScanError),

    #[error("Failed to read catalog {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write catalog {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Path not tracked by catalog: {path}")]
    PathNotTracked { path: String },
}

/// One tracked image file.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub path: String,
    pub last_modified: f64,
    pub features: Option<FeatureVector>,
    pub compared: bool,
}

impl CatalogEntry {
    /// New entries never inherit state from a previous entry for the same path.
    fn fresh(path: String, last_modified: f64) -> Self {
        Self {
            path,
            last_modified,
            features: None,
            compared: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionMetadata {
    pub root: String,
    pub created: i64,
    pub lifetime_matches: u64,
    pub lifetime_comparisons: u64,
    /// Extractor settings every cached feature vector was computed with.
    pub bins: usize,
    pub resize: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FillReport {
    pub extracted: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone)]
pub struct FillProgress {
    pub done: usize,
    pub total: usize,
    pub current: String,
}

pub type ProgressCallback = Box<dyn Fn(FillProgress) + Send + Sync>;

/// Persisted mapping from image path to cached features and comparison status.
///
/// The catalog is the only owner of durable state. Every feature vector or
/// comparison result becomes durable by going through one of its methods.
pub struct Catalog {
    save_path: PathBuf,
    root: PathBuf,
    meta: CollectionMetadata,
    entries: BTreeMap<String, CatalogEntry>,
    scanner: ImageScanner,
}

impl Catalog {
    /// Load the catalog at `save_path`, or start an empty one.
    ///
    /// A missing or unreadable save file is not an error: the previous state is
    /// dropped and a fresh catalog created now takes its place. Cached features
    /// computed with settings other than `extractor`'s are dropped and every
    /// entry becomes uncompared again.
    pub fn open(
        root: &Path,
        save_path: &Path,
        scanner: ImageScanner,
        extractor: &FeatureExtractor,
    ) -> Result<Self, CatalogError> {
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let root_key = path_key(&root);
        let settings = (extractor.bins(), extractor.resize());

        let loaded = if save_path.exists() {
            match savefile::read(save_path) {
                Ok(save) => {
                    log::info!(
                        "Loaded catalog {} ({} entries)",
                        save_path.display(),
                        save.data.len()
                    );
                    Some(save)
                }
                Err(e) => {
                    log::warn!("{}; starting with an empty catalog", e);
                    None
                }
            }
        } else {
            log::info!("No catalog at {}; starting fresh", save_path.display());
            None
        };

        let (meta, entries, recorded) = match loaded {
            Some(save) => {
                let recorded = save.meta.bins.map(|bins| (bins, save.meta.resize));
                let (meta, entries) = Self::from_save(save, settings);
                (meta, entries, recorded)
            }
            None => (
                CollectionMetadata {
                    root: root_key.clone(),
                    created: chrono::Utc::now().timestamp(),
                    lifetime_matches: 0,
                    lifetime_comparisons: 0,
                    bins: settings.0,
                    resize: settings.1,
                },
                BTreeMap::new(),
                Some(settings),
            ),
        };

        let mut catalog = Self {
            save_path: save_path.to_path_buf(),
            root,
            meta,
            entries,
            scanner,
        };
        let mut changed = false;

        if catalog.meta.root != root_key {
            log::warn!(
                "Catalog {} was tracking {}; now tracking {}",
                catalog.save_path.display(),
                catalog.meta.root,
                root_key
            );
            catalog.meta.root = root_key;
            changed = true;
        }

        if recorded != Some(settings) {
            let dropped = catalog.drop_cached_features();
            if dropped > 0 {
                let previous = match recorded {
                    Some((bins, resize)) => format!("bins={} resize={:?}", bins, resize),
                    None => "unrecorded settings".to_string(),
                };
                log::warn!(
                    "Catalog {} holds features from {}; recomputing {} entries with bins={} resize={:?}",
                    catalog.save_path.display(),
                    previous,
                    dropped,
                    settings.0,
                    settings.1
                );
            }
            changed = true;
        }

        if changed {
            catalog.save()?;
        }
        Ok(catalog)
    }

    fn from_save(
        save: SaveFile,
        settings: (usize, Option<u32>),
    ) -> (CollectionMetadata, BTreeMap<String, CatalogEntry>) {
        let meta = CollectionMetadata {
            root: save.meta.root,
            created: save.meta.created,
            lifetime_matches: save.meta.lifetime_matches,
            lifetime_comparisons: save.meta.lifetime_comparisons,
            bins: settings.0,
            resize: settings.1,
        };

        let entries = save
            .data
            .into_iter()
            .map(|(path, saved)| {
                let features = (!saved.features.is_empty()).then_some(saved.features);
                let entry = CatalogEntry {
                    path: path.clone(),
                    last_modified: saved.info.last_modified,
                    features,
                    compared: saved.info.compared,
                };
                (path, entry)
            })
            .collect();

        (meta, entries)
    }

    /// Forget every cached feature vector and comparison flag.
    fn drop_cached_features(&mut self) -> usize {
        let mut dropped = 0;
        for entry in self.entries.values_mut() {
            if entry.features.take().is_some() {
                dropped += 1;
            }
            entry.compared = false;
        }
        dropped
    }

    fn to_save(&self) -> SaveFile {
        let data = self
            .entries
            .iter()
            .map(|(path, entry)| {
                let saved = SavedEntry {
                    features: entry.features.clone().unwrap_or_default(),
                    info: SavedInfo {
                        compared: entry.compared,
                        last_modified: entry.last_modified,
                    },
                };
                (path.clone(), saved)
            })
            .collect();

        SaveFile {
            meta: SavedMeta {
                root: self.meta.root.clone(),
                created: self.meta.created,
                lifetime_matches: self.meta.lifetime_matches,
                lifetime_comparisons: self.meta.lifetime_comparisons,
                bins: Some(self.meta.bins),
                resize: self.meta.resize,
            },
            data,
        }
    }

    pub fn save(&self) -> Result<(), CatalogError> {
        savefile::write(&self.save_path, &self.to_save())?;
        log::debug!("Updated catalog {}", self.save_path.display());
        Ok(())
    }

    /// Sync tracked entries with the files currently under the root.
    ///
    /// Entries whose file is gone or whose modification time changed are removed;
    /// files not yet tracked (including the modified ones) are added fresh.
    /// Writes only when something changed.
    pub fn reconcile(&mut self) -> Result<ReconcileReport, CatalogError> {
        let on_disk: HashMap<String, f64> = self
            .scanner
            .discover(&self.root)?
            .into_iter()
            .map(|file| (file.key, file.last_modified))
            .collect();

        let mut report = ReconcileReport::default();

        self.entries.retain(|path, entry| {
            let current = on_disk.get(path);
            let keep = current.is_some_and(|modified| *modified == entry.last_modified);
            if !keep {
                report.removed.push(path.clone());
            }
            keep
        });

        for (path, modified) in &on_disk {
            if !self.entries.contains_key(path) {
                self.entries
                    .insert(path.clone(), CatalogEntry::fresh(path.clone(), *modified));
                report.added.push(path.clone());
            }
        }
        report.added.sort();

        if !report.is_unchanged() {
            log::info!(
                "Reconciled {}: {} added, {} removed",
                self.root.display(),
                report.added.len(),
                report.removed.len()
            );
            self.save()?;
        }

        Ok(report)
    }

    /// Extract features for every entry that has none.
    ///
    /// Files that fail to decode or have the wrong channel layout are reported
    /// and stay featureless, so a later run retries them. With a
    /// `checkpoint_interval` of N > 0 the catalog is written after every N
    /// files, otherwise once at the end.
    pub fn fill_features(
        &mut self,
        extractor: &FeatureExtractor,
        checkpoint_interval: usize,
        progress: Option<&ProgressCallback>,
    ) -> Result<FillReport, CatalogError> {
        let pending: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.features.is_none())
            .map(|entry| entry.path.clone())
            .collect();

        let mut report = FillReport::default();
        let total = pending.len();
        if total == 0 {
            return Ok(report);
        }

        let chunk_size = if checkpoint_interval == 0 {
            total
        } else {
            checkpoint_interval
        };
        let done = AtomicUsize::new(0);

        for chunk in pending.chunks(chunk_size) {
            let results: Vec<(String, Result<FeatureVector, FeatureError>)> = chunk
                .par_iter()
                .map(|path| {
                    let result = extractor.extract_path(Path::new(path));
                    let done = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(callback) = progress {
                        callback(FillProgress {
                            done,
                            total,
                            current: path.clone(),
                        });
                    }
                    (path.clone(), result)
                })
                .collect();

            let mut changed = false;
            for (path, result) in results {
                match result {
                    Ok(features) => {
                        if let Some(entry) = self.entries.get_mut(&path) {
                            entry.features = Some(features);
                            report.extracted += 1;
                            changed = true;
                        }
                    }
                    Err(e) => {
                        log::warn!("Could not compute features for {}: {}", path, e);
                        report.skipped.push(SkippedFile {
                            path,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if changed {
                self.save()?;
            }
        }

        log::info!(
            "Computed features for {} file(s), skipped {}",
            report.extracted,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Replace the features of one tracked entry and persist.
    pub fn store_features(
        &mut self,
        path: &str,
        features: FeatureVector,
    ) -> Result<(), CatalogError> {
        let Some(entry) = self.entries.get_mut(path) else {
            log::warn!("Can not update features for {}: path not in catalog", path);
            return Err(CatalogError::PathNotTracked {
                path: path.to_string(),
            });
        };
        entry.features = Some(features);
        self.save()
    }

    /// Feature vectors split into `(compared, uncompared)`. Entries without
    /// features are in neither.
    pub fn partition_by_compared(
        &self,
    ) -> (BTreeMap<String, FeatureVector>, BTreeMap<String, FeatureVector>) {
        let mut compared = BTreeMap::new();
        let mut uncompared = BTreeMap::new();

        for (path, entry) in &self.entries {
            let Some(features) = &entry.features else {
                continue;
            };
            if entry.compared {
                compared.insert(path.clone(), features.clone());
            } else {
                uncompared.insert(path.clone(), features.clone());
            }
        }

        (compared, uncompared)
    }

    pub fn all_features(&self) -> BTreeMap<String, FeatureVector> {
        self.entries
            .iter()
            .filter_map(|(path, entry)| {
                entry
                    .features
                    .as_ref()
                    .map(|features| (path.clone(), features.clone()))
            })
            .collect()
    }

    /// Set `compared` on every entry with features, or clear it on every entry
    /// when `unmark` is true. Returns how many entries changed.
    pub fn mark_all_compared(&mut self, unmark: bool) -> Result<usize, CatalogError> {
        let target = !unmark;
        let mut changed = 0;

        for entry in self.entries.values_mut() {
            // a featureless entry took part in no comparison
            if target && entry.features.is_none() {
                continue;
            }
            if entry.compared != target {
                entry.compared = target;
                changed += 1;
            }
        }

        if changed > 0 {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn record_stats(&mut self, matches: u64, comparisons: u64) -> Result<(), CatalogError> {
        self.meta.lifetime_matches += matches;
        self.meta.lifetime_comparisons += comparisons;
        self.save()
    }

    pub fn entry(&self, path: &str) -> Option<&CatalogEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn featureless_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.features.is_none())
            .count()
    }

    pub fn metadata(&self) -> &CollectionMetadata {
        &self.meta
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }
}
