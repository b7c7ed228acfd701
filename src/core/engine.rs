use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::core::catalog::{Catalog, CatalogError, ProgressCallback, SkippedFile};
use crate::core::features::{FeatureError, FeatureExtractor, FeatureVector};
use crate::core::scanner::{ImageScanner, path_key};
use crate::core::similarity::{self, ScoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Feature(#[from] FeatureError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairMatch {
    pub path_a: String,
    pub path_b: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleMatch {
    pub path: String,
    pub score: f64,
}

/// Ranked matches of one comparison run plus its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareOutcome<T> {
    /// Scores at or above the threshold, best first.
    pub matches: Vec<T>,
    /// Pairs enumerated, including those that failed to score.
    pub attempted: u64,
    pub failed: u64,
    /// Tracked files left out because they have no features.
    pub skipped_files: usize,
}

impl<T> CompareOutcome<T> {
    pub fn scored(&self) -> u64 {
        self.attempted - self.failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub extracted: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifetimeStats {
    pub matches: u64,
    pub comparisons: u64,
    pub created: i64,
}

type Scored<'a> = (&'a str, &'a str, Result<f64, ScoreError>);

/// Drives extraction and pairwise comparison over a [`Catalog`].
pub struct MatchEngine {
    catalog: Catalog,
    extractor: FeatureExtractor,
    checkpoint_interval: usize,
    progress: Option<ProgressCallback>,
}

impl MatchEngine {
    /// Bind to the catalog described by `config` without touching the filesystem tree.
    pub fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let scanner = ImageScanner::new(&config.extensions, config.include_subfolders);
        let extractor = FeatureExtractor::new(config.bins, config.resize);
        let catalog = Catalog::open(
            &config.root,
            &config.resolved_save_file(),
            scanner,
            &extractor,
        )?;

        Ok(Self {
            catalog,
            extractor,
            checkpoint_interval: config.checkpoint_interval,
            progress: None,
        })
    }

    /// Open the catalog and bring it up to date with the directory tree.
    pub fn initialize(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut engine = Self::open(config)?;
        engine.refresh()?;
        Ok(engine)
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Reconcile with the filesystem, then extract features for new entries.
    pub fn refresh(&mut self) -> Result<RefreshSummary, EngineError> {
        let reconciled = self.catalog.reconcile()?;
        let filled = self.catalog.fill_features(
            &self.extractor,
            self.checkpoint_interval,
            self.progress.as_ref(),
        )?;

        Ok(RefreshSummary {
            added: reconciled.added.len(),
            removed: reconciled.removed.len(),
            extracted: filled.extracted,
            skipped: filled.skipped,
        })
    }

    /// Score pairs across the collection and keep those at or above `threshold`.
    ///
    /// With `skip_compared`, pairs where both sides were compared in an earlier
    /// pass are not scored again: new entries are scored among themselves and
    /// against every compared entry. Every entry with features is marked
    /// compared afterwards.
    pub fn compare_all(
        &mut self,
        threshold: f64,
        skip_compared: bool,
    ) -> Result<CompareOutcome<PairMatch>, EngineError> {
        let (compared, uncompared) = if skip_compared {
            self.catalog.partition_by_compared()
        } else {
            (BTreeMap::new(), self.catalog.all_features())
        };

        let start = Instant::now();
        let scored = score_pairs(&uncompared, &compared);
        let attempted = scored.len() as u64;

        let mut failed = 0u64;
        let mut matches = Vec::new();
        for (path_a, path_b, result) in scored {
            match result {
                Ok(score) if score >= threshold => matches.push(PairMatch {
                    path_a: path_a.to_string(),
                    path_b: path_b.to_string(),
                    score,
                }),
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Skipped pair {} / {}: {}", path_a, path_b, e);
                    failed += 1;
                }
            }
        }
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        log::info!(
            "Compared {} new against {} known image(s) in {} comparison(s), {} match(es) at {} [{:.2?}]",
            uncompared.len(),
            compared.len(),
            attempted,
            matches.len(),
            threshold,
            start.elapsed()
        );

        if attempted > 0 {
            self.catalog
                .record_stats(matches.len() as u64, attempted - failed)?;
        }
        self.catalog.mark_all_compared(false)?;

        Ok(CompareOutcome {
            matches,
            attempted,
            failed,
            skipped_files: self.catalog.featureless_count(),
        })
    }

    /// Score one image file against every catalog entry except itself.
    ///
    /// A lookup only: no comparison flags or lifetime counters change.
    pub fn compare_one(
        &self,
        path: &Path,
        threshold: f64,
    ) -> Result<CompareOutcome<SingleMatch>, EngineError> {
        let features = self.extractor.extract_path(path)?;
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(self.rank_against_catalog(&path_key(&canonical), &features, threshold))
    }

    /// Like [`compare_one`](Self::compare_one) for an image that is not on disk.
    /// `label` stands in for its path when excluding self-matches.
    pub fn compare_bytes(
        &self,
        label: &str,
        bytes: &[u8],
        threshold: f64,
    ) -> Result<CompareOutcome<SingleMatch>, EngineError> {
        let features = self.extractor.extract_bytes(bytes)?;
        Ok(self.rank_against_catalog(label, &features, threshold))
    }

    fn rank_against_catalog(
        &self,
        key: &str,
        features: &FeatureVector,
        threshold: f64,
    ) -> CompareOutcome<SingleMatch> {
        let all = self.catalog.all_features();
        let candidates: Vec<(&String, &FeatureVector)> =
            all.iter().filter(|(path, _)| path.as_str() != key).collect();

        let scored: Vec<(&String, Result<f64, ScoreError>)> = candidates
            .par_iter()
            .map(|&(path, other)| (path, similarity::score(features, other)))
            .collect();

        let attempted = scored.len() as u64;
        let mut failed = 0u64;
        let mut matches = Vec::new();
        for (path, result) in scored {
            match result {
                Ok(score) if score >= threshold => matches.push(SingleMatch {
                    path: path.clone(),
                    score,
                }),
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Skipped {}: {}", path, e);
                    failed += 1;
                }
            }
        }
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        CompareOutcome {
            matches,
            attempted,
            failed,
            skipped_files: self.catalog.featureless_count(),
        }
    }

    /// Clear every comparison flag so the next pass compares everything again.
    pub fn reset_compared(&mut self) -> Result<usize, EngineError> {
        Ok(self.catalog.mark_all_compared(true)?)
    }

    pub fn loaded_file_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn lifetime_stats(&self) -> LifetimeStats {
        let meta = self.catalog.metadata();
        LifetimeStats {
            matches: meta.lifetime_matches,
            comparisons: meta.lifetime_comparisons,
            created: meta.created,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

/// Every unordered pair within `uncompared`, then every `uncompared` × `compared`
/// pair, in that enumeration order.
fn score_pairs<'a>(
    uncompared: &'a BTreeMap<String, FeatureVector>,
    compared: &'a BTreeMap<String, FeatureVector>,
) -> Vec<Scored<'a>> {
    let new: Vec<(&String, &FeatureVector)> = uncompared.iter().collect();
    let known: Vec<(&String, &FeatureVector)> = compared.iter().collect();

    let mut scored: Vec<Scored<'a>> = (0..new.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            let (path_a, features_a) = new[i];
            new[i + 1..].iter().map(move |&(path_b, features_b)| {
                (
                    path_a.as_str(),
                    path_b.as_str(),
                    similarity::score(features_a, features_b),
                )
            })
        })
        .collect();

    let across: Vec<Scored<'a>> = new
        .par_iter()
        .flat_map_iter(|&(path_a, features_a)| {
            known.iter().map(move |&(path_b, features_b)| {
                (
                    path_a.as_str(),
                    path_b.as_str(),
                    similarity::score(features_a, features_b),
                )
            })
        })
        .collect();

    scored.extend(across);
    scored
}
