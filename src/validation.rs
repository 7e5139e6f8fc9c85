//! Decides whether a directory holds an archive that should be extracted.
//!
//! Checks run in order and the first failing one names the [`SkipReason`]:
//! a manifest exists, it parses, every file it lists is present, an archive
//! exists, and the archive's contents are not already next to it.

use std::path::Path;

use crate::archiver::ArchiveInspector;
use crate::config::HuntConfig;
use crate::error::SkipReason;
use crate::manifest::Manifest;
use crate::snapshot::DirSnapshot;
use crate::types::Target;

/// Validate `snapshot` and return the archive to extract
pub async fn find_extractable(
    snapshot: &DirSnapshot,
    inspector: &dyn ArchiveInspector,
    config: &HuntConfig,
) -> Result<Target, SkipReason> {
    let manifests = snapshot.find_ext(&config.manifest_ext);
    let Some(manifest_name) = manifests.first() else {
        return Err(SkipReason::NoManifest);
    };

    let manifest = Manifest::load(&snapshot.path(manifest_name))
        .await
        .map_err(|e| SkipReason::InvalidManifest(e.to_string()))?;

    let missing = manifest.missing(snapshot);
    if !missing.is_empty() {
        return Err(SkipReason::MissingFiles(missing));
    }

    let archives = snapshot.find_ext(&config.archive_ext);
    let archive = pick_archive(&archives).ok_or(SkipReason::NoArchive)?;

    let entries = inspector
        .list_contents(&snapshot.path(archive))
        .await
        .map_err(|e| SkipReason::ListFailed(e.to_string()))?;

    // Extraction drops archive paths, so compare base names
    for entry in &entries {
        let base = Path::new(entry)
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if snapshot.contains(base.trim()) {
            return Err(SkipReason::AlreadyExtracted(base.trim().to_string()));
        }
    }

    tracing::debug!(
        dir = ?snapshot.root(),
        archive,
        manifest = manifest_name,
        entries = entries.len(),
        "directory is extractable"
    );
    Ok(Target::new(archive, snapshot.root()))
}

/// First volume of a multi-part set (`*.part1.rar`, `*.part01.rar`, ...),
/// otherwise the first name in sorted order.
pub fn pick_archive<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    let first_volume = candidates.iter().copied().find(|name| {
        Path::new(name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
            .and_then(|stem| {
                stem.rsplit_once(".part")
                    .map(|(_, number)| number.parse::<u32>() == Ok(1))
            })
            .unwrap_or(false)
    });
    first_volume.or_else(|| candidates.iter().copied().min())
}
