//! On-disk catalog format.
//!
//! ```text
//! { "meta": { "root", "created", "lifetime_matches", "lifetime_comparisons", "bins", "resize" },
//!   "data": { "<path>": { "features": { "<group>": [..] }, "info": { "compared", "last_modified" } } } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::catalog::CatalogError;
use crate::core::features::FeatureVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    pub meta: SavedMeta,
    #[serde(default)]
    pub data: BTreeMap<String, SavedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMeta {
    pub root: String,
    pub created: i64,
    #[serde(default)]
    pub lifetime_matches: u64,
    #[serde(default)]
    pub lifetime_comparisons: u64,
    /// Extraction settings the stored features were computed with. Absent in
    /// files written before they were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<usize>,
    #[serde(default)]
    pub resize: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedEntry {
    #[serde(default)]
    pub features: FeatureVector,
    pub info: SavedInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedInfo {
    pub compared: bool,
    pub last_modified: f64,
}

pub fn read(path: &Path) -> Result<SaveFile, CatalogError> {
    let bytes = fs::read(path).map_err(|e| CatalogError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| CatalogError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes next to `path` first and renames over it, so readers never see a partial file.
pub fn write(path: &Path, save: &SaveFile) -> Result<(), CatalogError> {
    let write_err = |source: std::io::Error| CatalogError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let temp_path = temp_path_for(path);
    let file = File::create(&temp_path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);

    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    save.serialize(&mut serializer)?;
    writer.write_all(b"\n").map_err(write_err)?;
    writer.flush().map_err(write_err)?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(write_err)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
