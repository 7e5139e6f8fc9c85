//! Point-in-time listing of one directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Base names of the direct entries of one directory
///
/// Names are trimmed of surrounding whitespace, as release tools sometimes
/// pad them. Sub-directory names are included; their contents are not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirSnapshot {
    root: PathBuf,
    files: BTreeSet<String>,
}

impl DirSnapshot {
    /// List the entries of `root`
    pub async fn capture(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut files = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let name = name.trim();
            if !name.is_empty() {
                files.insert(name.to_string());
            }
        }
        Ok(Self { root, files })
    }

    /// Build a snapshot from known names, without touching the filesystem
    pub fn from_names<I, S>(root: impl Into<PathBuf>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            root: root.into(),
            files: names
                .into_iter()
                .map(|name| name.as_ref().trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// Directory the snapshot was taken of
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `true` if `name` is present
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    /// Names matching `filter`, sorted
    pub fn find<F>(&self, filter: F) -> Vec<&str>
    where
        F: Fn(&str) -> bool,
    {
        self.files
            .iter()
            .map(String::as_str)
            .filter(|name| filter(name))
            .collect()
    }

    /// Names with extension `ext` (no leading dot, case-insensitive), sorted
    pub fn find_ext(&self, ext: &str) -> Vec<&str> {
        self.find(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        })
    }

    /// `name` itself, if present
    pub fn find_name(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Full path of `name` inside the root
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Iterate over every name, sorted
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if the directory was empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
