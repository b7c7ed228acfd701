//! Incremental search for visually similar images in a directory tree.
//!
//! Each image is reduced to color and edge-orientation histograms, cached in a
//! JSON catalog keyed by path and modification time. Reruns only extract
//! features for new or changed files and only compare pairs that involve them.

pub mod config;
pub mod core;

pub use crate::config::EngineConfig;
pub use crate::core::catalog::{
    Catalog, CatalogEntry, CatalogError, CollectionMetadata, FillProgress, FillReport,
    ProgressCallback, ReconcileReport, SkippedFile,
};
pub use crate::core::engine::{
    CompareOutcome, EngineError, LifetimeStats, MatchEngine, PairMatch, RefreshSummary,
    SingleMatch,
};
pub use crate::core::features::{FeatureError, FeatureExtractor, FeatureVector};
pub use crate::core::scanner::{ImageScanner, ScanError};
pub use crate::core::similarity::{ScoreError, score};
