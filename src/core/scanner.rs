use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Catalog key for a path: the lossy string form with `/` separators.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Modification time as fractional seconds since the Unix epoch.
pub fn modified_seconds(metadata: &fs::Metadata) -> std::io::Result<f64> {
    let modified = metadata.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(since_epoch.as_secs_f64())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFile {
    pub key: String,
    pub path: PathBuf,
    pub last_modified: f64,
}

/// Walks a directory tree for files with a recognized image extension.
#[derive(Debug, Clone)]
pub struct ImageScanner {
    supported_formats: HashSet<String>,
    include_subfolders: bool,
}

impl ImageScanner {
    pub fn new(extensions: &[String], include_subfolders: bool) -> Self {
        let supported_formats = extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect();

        Self {
            supported_formats,
            include_subfolders,
        }
    }

    pub fn is_supported_format(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.supported_formats.contains(&ext))
    }

    /// Files under `root` in file-name order. Unreadable entries are skipped.
    pub fn discover(&self, root: &Path) -> Result<Vec<DiscoveredFile>, ScanError> {
        if !root.exists() {
            return Err(ScanError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }
        if !root.is_dir() {
            return Err(ScanError::InvalidPath {
                path: format!("{} is not a directory", root.to_string_lossy()),
            });
        }

        let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
        if !self.include_subfolders {
            walker = walker.max_depth(1);
        }

        let mut discovered = Vec::new();
        for entry in walker.into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_supported_format(entry.path()) {
                continue;
            }

            let last_modified = match entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|m| modified_seconds(&m))
            {
                Ok(seconds) => seconds,
                Err(e) => {
                    log::warn!(
                        "Could not read modification time for {}: {}",
                        entry.path().display(),
                        e
                    );
                    continue;
                }
            };

            discovered.push(DiscoveredFile {
                key: path_key(entry.path()),
                path: entry.path().to_path_buf(),
                last_modified,
            });
        }

        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXTENSIONS;
    use crate::core::fixtures::{solid_image, write_png};
    use tempfile::TempDir;

    fn default_scanner(include_subfolders: bool) -> ImageScanner {
        let extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        ImageScanner::new(&extensions, include_subfolders)
    }

    #[test]
    fn test_supported_format_detection() {
        let scanner = default_scanner(true);

        assert!(scanner.is_supported_format(Path::new("test.jpg")));
        assert!(scanner.is_supported_format(Path::new("test.JPEG")));
        assert!(scanner.is_supported_format(Path::new("test.png")));
        assert!(scanner.is_supported_format(Path::new("test.WebP")));
        assert!(scanner.is_supported_format(Path::new("test.jfif")));
        assert!(!scanner.is_supported_format(Path::new("test.gif")));
        assert!(!scanner.is_supported_format(Path::new("test.txt")));
        assert!(!scanner.is_supported_format(Path::new("test")));
    }

    #[test]
    fn test_file_type_filtering() {
        let temp_dir = TempDir::new().unwrap();
        write_png(&temp_dir.path().join("b.png"), &solid_image(4, 4, [1, 2, 3]));
        write_png(&temp_dir.path().join("a.png"), &solid_image(4, 4, [1, 2, 3]));
        fs::write(temp_dir.path().join("notes.txt"), b"text content").unwrap();

        let files = default_scanner(true).discover(temp_dir.path()).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files[0].key.ends_with("/a.png"));
        assert!(files[1].key.ends_with("/b.png"));
        assert!(files.iter().all(|f| f.last_modified > 0.0));
    }

    #[test]
    fn test_subfolder_toggle() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        write_png(&temp_dir.path().join("top.png"), &solid_image(4, 4, [0, 0, 0]));
        write_png(&nested.join("deep.png"), &solid_image(4, 4, [0, 0, 0]));

        let all = default_scanner(true).discover(temp_dir.path()).unwrap();
        assert_eq!(all.len(), 2);

        let top = default_scanner(false).discover(temp_dir.path()).unwrap();
        assert_eq!(top.len(), 1);
        assert!(top[0].key.ends_with("/top.png"));
    }

    #[test]
    fn test_invalid_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            default_scanner(true).discover(&missing),
            Err(ScanError::InvalidPath { .. })
        ));

        let file = temp_dir.path().join("file.png");
        write_png(&file, &solid_image(2, 2, [0, 0, 0]));
        assert!(matches!(
            default_scanner(true).discover(&file),
            Err(ScanError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_path_key_normalizes_separators() {
        assert_eq!(path_key(Path::new("C:\\photos\\a.jpg")), "C:/photos/a.jpg");
        assert_eq!(path_key(Path::new("/photos/a.jpg")), "/photos/a.jpg");
    }
}
