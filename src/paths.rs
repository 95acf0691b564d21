//! Archive path handling
//!
//! BSA archives store Windows-style paths with backslashes and compare them
//! case-insensitively. This module handles:
//! - Splitting archive paths into components (both `\` and `/` accepted)
//! - Case-insensitive name comparison
//! - Mapping archive paths below an extraction directory without escaping it

use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, ErrorCode, Result};

/// Archive path separator
pub const SEPARATOR: char = '\\';

/// Split an archive path into its non-empty components
/// `textures\armor/iron.dds` -> `["textures", "armor", "iron.dds"]`
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['\\', '/']).filter(|s| !s.is_empty() && *s != ".")
}

/// Convert any path to the archive convention (backslashes, trimmed)
/// `Data/Textures/armor.dds` -> `Data\Textures\armor.dds`
pub fn to_archive_path(path: &str) -> String {
    components(path).collect::<Vec<_>>().join("\\")
}

/// Check if two archive names or paths are equal (case-insensitive)
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Join two archive path pieces, skipping an empty prefix
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, SEPARATOR, name)
    }
}

/// Get the parent folder of an archive path, empty at the root (handles both / and \)
pub fn parent_of(path: &str) -> &str {
    path.rfind(['\\', '/']).map(|idx| &path[..idx]).unwrap_or("")
}

/// Get the filename from an archive path (handles both / and \)
pub fn file_name(path: &str) -> &str {
    path.rfind(['\\', '/'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Resolve an archive-relative path below `base`
///
/// Rejects components that would climb out of `base` (`..`) or that carry a
/// drive prefix, so a hostile archive cannot write outside the output
/// directory.
pub fn resolve_output_path(base: &Path, archive_path: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in components(archive_path) {
        if component == ".." || component.contains(':') {
            return Err(ArchiveError::with_detail(
                ErrorCode::InvalidData,
                format!("unsafe path in archive: {}", archive_path),
            ));
        }
        resolved.push(component);
    }
    Ok(resolved)
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::io("mkdir", parent, e))?;
        }
    }
    Ok(())
}
