//! SFV-style checksum manifests.
//!
//! One entry per line, `<filename><whitespace><checksum>`. The checksum is the
//! last whitespace-separated token, so file names may contain spaces. Lines
//! starting with `;` are comments. Checksums are carried but never verified;
//! the manifest is only used to tell whether every listed file is present.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ManifestError, Result};
use crate::snapshot::DirSnapshot;

/// Parsed manifest: file name to checksum
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse manifest text
    ///
    /// # Errors
    ///
    /// [`ManifestError::Malformed`] for a line without a checksum,
    /// [`ManifestError::Empty`] when no entries remain after comments.
    pub fn parse(content: &str) -> std::result::Result<Self, ManifestError> {
        let mut entries = BTreeMap::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let malformed = || ManifestError::Malformed {
                line: index + 1,
                content: raw.to_string(),
            };
            let (name, checksum) = line.rsplit_once(char::is_whitespace).ok_or_else(malformed)?;
            let name = name.trim_end();
            if name.is_empty() {
                return Err(malformed());
            }
            entries.insert(name.to_string(), checksum.to_string());
        }

        if entries.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Self { entries })
    }

    /// Read and parse the manifest at `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes))?)
    }

    /// Listed file names, sorted
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Checksum recorded for `file`
    pub fn checksum(&self, file: &str) -> Option<&str> {
        self.entries.get(file).map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a parsed manifest
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Listed files absent from `snapshot`, sorted
    pub fn missing(&self, snapshot: &DirSnapshot) -> Vec<String> {
        self.files()
            .filter(|file| !snapshot.contains(file))
            .map(str::to_string)
            .collect()
    }
}
