//! Where program units come from.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// File extension of unit sources.
pub const UNIT_EXTENSION: &str = "bca";

/// Error reading a program source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Filesystem failure.
    #[error("{path}: {source}")]
    Io {
        /// File or directory being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The archive could not be read.
    #[error("{path}: {source}")]
    Archive {
        /// Archive file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: zip::result::ZipError,
    },
    /// A unit file is not UTF-8.
    #[error("unit {0} is not valid UTF-8")]
    NotUtf8(String),
    /// A path does not map to a unit name.
    #[error("{0} is not a valid unit path")]
    BadPath(String),
    /// The source holds no units at all.
    #[error("{0} contains no .bca units")]
    Empty(String),
}

/// A provider of raw unit sources, keyed by unit name.
pub trait ProgramSource {
    /// Display name used in logs.
    fn name(&self) -> String;

    /// Read every unit. Called once; the result is the program's snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the underlying storage cannot be read.
    fn units(&self) -> Result<BTreeMap<String, String>, SourceError>;
}

/// Convert a relative path like `team/nav/Pathing.bca` to a unit name.
fn unit_name(rel: &Path) -> Option<String> {
    if rel.extension().and_then(|e| e.to_str()) != Some(UNIT_EXTENSION) {
        return None;
    }
    let mut parts = Vec::new();
    for component in rel.with_extension("").components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Units stored as `<root>/<unit>.bca` files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Read units below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProgramSource for DirectorySource {
    fn name(&self) -> String {
        self.root.display().to_string()
    }

    fn units(&self) -> Result<BTreeMap<String, String>, SourceError> {
        let mut units = BTreeMap::new();
        for entry in WalkDir::new(&self.root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| SourceError::Io {
                path: self.root.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| SourceError::BadPath(entry.path().display().to_string()))?;
            let Some(name) = unit_name(rel) else {
                continue;
            };
            let text = std::fs::read_to_string(entry.path()).map_err(|e| {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    SourceError::NotUtf8(name.clone())
                } else {
                    SourceError::Io {
                        path: entry.path().to_path_buf(),
                        source: e,
                    }
                }
            })?;
            units.insert(name, text);
        }
        if units.is_empty() {
            return Err(SourceError::Empty(self.name()));
        }
        Ok(units)
    }
}

/// Units packaged in a zip archive.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
}

impl ArchiveSource {
    /// Read units from the archive at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProgramSource for ArchiveSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn units(&self) -> Result<BTreeMap<String, String>, SourceError> {
        let archive_err = |source| SourceError::Archive {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(archive_err)?;
        let mut units = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(archive_err)?;
            if entry.is_dir() {
                continue;
            }
            let Some(rel) = entry.enclosed_name() else {
                return Err(SourceError::BadPath(entry.name().to_string()));
            };
            let Some(name) = unit_name(&rel) else {
                continue;
            };
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(|source| SourceError::Io {
                path: self.path.join(&rel),
                source,
            })?;
            let text = String::from_utf8(bytes).map_err(|_| SourceError::NotUtf8(name.clone()))?;
            units.insert(name, text);
        }
        if units.is_empty() {
            return Err(SourceError::Empty(self.name()));
        }
        Ok(units)
    }
}

/// Units held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    units: BTreeMap<String, String>,
}

impl MemorySource {
    /// An empty source.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: BTreeMap::new(),
        }
    }

    /// Add a unit.
    #[must_use]
    pub fn with_unit(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.units.insert(name.into(), source.into());
        self
    }
}

impl ProgramSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn units(&self) -> Result<BTreeMap<String, String>, SourceError> {
        if self.units.is_empty() {
            return Err(SourceError::Empty(self.name.clone()));
        }
        Ok(self.units.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_names_from_paths() {
        assert_eq!(
            unit_name(Path::new("team/nav/Pathing.bca")).as_deref(),
            Some("team/nav/Pathing")
        );
        assert_eq!(unit_name(Path::new("team/notes.txt")), None);
        assert_eq!(unit_name(Path::new("../team/X.bca")), None);
    }

    #[test]
    fn test_empty_memory_source_is_an_error() {
        assert!(matches!(
            MemorySource::new("m").units(),
            Err(SourceError::Empty(_))
        ));
    }
}
