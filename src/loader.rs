//! Database and suite config loader.
//!
//! Finds test database documents on disk and reads them as text.

use crate::config::SuiteConfig;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Error type for loading operations.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
}

/// File names probed for the suite configuration, in order.
pub const CONFIG_FILENAMES: [&str; 3] = ["r2r.yaml", "r2r.yml", "r2r.toml"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Load a suite config from an explicit file.
pub fn load_config(path: &Path) -> Result<SuiteConfig, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config: SuiteConfig = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents)?,
        "toml" => toml::from_str(&contents)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    if config.root.is_none() {
        config.root = path.parent().map(Path::to_path_buf);
    }
    Ok(config)
}

/// Look for a suite config in `dir`.
///
/// Returns `None` if no config file exists, `Err` if one exists but is invalid.
pub fn find_config(dir: &Path) -> Result<Option<SuiteConfig>, LoadError> {
    for name in CONFIG_FILENAMES {
        let path = dir.join(name);
        if path.is_file() {
            return load_config(&path).map(Some);
        }
    }
    Ok(None)
}

/// Find all documents below `path`, or return the single file.
pub fn find_documents(path: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut documents = Vec::new();
    collect_documents_recursive(path, &mut documents)?;
    documents.sort();
    Ok(documents)
}

fn collect_documents_recursive(
    dir: &Path,
    documents: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') || CONFIG_FILENAMES.contains(&n));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_documents_recursive(&path, documents)?;
        } else {
            documents.push(path);
        }
    }
    Ok(())
}

/// List every regular file below `dir`, sorted. Used for load and fuzz targets.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    collect_files_recursive(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files_recursive(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Read a document as text, decompressing gzip documents.
pub fn read_document(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = if bytes.starts_with(&GZIP_MAGIC) {
        gunzip(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), "gunzip failed, reading as text: {e}");
            bytes
        })
    } else {
        bytes
    };
    let text = String::from_utf8_lossy(&bytes);
    if cfg!(windows) {
        Ok(text.replace("\r\n", "\n"))
    } else {
        Ok(text.into_owned())
    }
}
