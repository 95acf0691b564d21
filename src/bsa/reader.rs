//! BSA reading: parse into the tree, verify hashes, decode files

use ba2::tes4::{
    Archive, ArchiveKey, ArchiveOptions, DirectoryHash, DirectoryKey, FileCompressionOptions, FileHash,
};
use ba2::{ByteSlice, Reader};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{detect_format, engine_error, ArchiveFormat};
use crate::error::{ArchiveError, ErrorCode, Result};
use crate::tree::{FileSource, Tree};

/// A parsed archive kept alive for decoding its files
pub(crate) struct Packed {
    archive: Archive<'static>,
    options: ArchiveOptions,
}

impl Packed {
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Decode one file by its folder and file hashes
    pub fn read_file(&self, directory: &DirectoryHash, file: &FileHash) -> Result<Vec<u8>> {
        let folder = self.archive.get(directory).ok_or_else(|| {
            ArchiveError::with_detail(ErrorCode::InvalidData, format!("no folder with hash {:?}", directory))
        })?;
        let (file_key, file) = folder.get_key_value(file).ok_or_else(|| {
            ArchiveError::with_detail(ErrorCode::InvalidData, format!("no file with hash {:?}", file))
        })?;

        if file.is_decompressed() {
            return Ok(file.as_bytes().to_vec());
        }

        // Convert archive options to compression options (includes version info)
        let compression_options: FileCompressionOptions = (&self.options).into();
        let decompressed = file.decompress(&compression_options).map_err(|e| {
            ArchiveError::with_detail(
                ErrorCode::InvalidData,
                format!(
                    "failed to decompress {}: {}",
                    String::from_utf8_lossy(file_key.name().as_bytes()),
                    e
                ),
            )
        })?;
        Ok(decompressed.as_bytes().to_vec())
    }
}

/// Parse the archive at `path` into a tree
///
/// With `test_hashes`, every named folder and file must carry the hash the
/// engine computes for its name, otherwise the load fails with
/// `InvalidHashes`.
pub(crate) fn read(path: &Path, test_hashes: bool) -> Result<(Tree, Packed)> {
    match detect_format(path)? {
        ArchiveFormat::Bsa => {}
        other => {
            warn!("Refusing to open {:?} archive {}", other, path.display());
            return Err(ArchiveError::with_detail(
                ErrorCode::InvalidData,
                format!("{} is a {:?} archive, not a TES4 BSA", path.display(), other),
            ));
        }
    }

    let (archive, options): (Archive, _) = Archive::read(path)
        .map_err(|e| engine_error(e, "read", path, ErrorCode::InvalidData))?;

    if test_hashes {
        verify_hashes(&archive, path)?;
    }

    let mut tree = Tree::new();
    for (dir_index, (dir_key, folder)) in archive.iter().enumerate() {
        let dir_name = String::from_utf8_lossy(dir_key.name().as_bytes());
        // Root files live in "." (or an unnamed directory)
        let folder_id = tree.add_folder(Tree::ROOT, &dir_name);

        for (file_index, (file_key, file)) in folder.iter().enumerate() {
            let mut file_name = String::from_utf8_lossy(file_key.name().as_bytes()).to_string();
            if file_name.is_empty() {
                file_name = format!("unnamed_{}_{}", dir_index, file_index);
            }

            // Get decompressed size if compressed, otherwise raw size
            let size = file.decompressed_len().unwrap_or(file.len()) as u64;
            let source = FileSource::Packed {
                directory: *dir_key.hash(),
                file: *file_key.hash(),
            };
            let id = tree.create_file(&file_name, source, file.is_compressed(), size);
            tree.attach(folder_id, id).map_err(|e| {
                ArchiveError::with_detail(ErrorCode::InvalidData, format!("{}: {}", path.display(), e))
            })?;
        }
    }

    info!(
        "Opened BSA {} ({} files, {} folders)",
        path.display(),
        tree.file_total(),
        archive.iter().count()
    );

    Ok((tree, Packed { archive, options }))
}

fn verify_hashes(archive: &Archive<'static>, path: &Path) -> Result<()> {
    let mismatch = |name: &[u8]| {
        warn!(
            "Hash mismatch in {} for '{}'",
            path.display(),
            String::from_utf8_lossy(name)
        );
        ArchiveError::with_detail(
            ErrorCode::InvalidHashes,
            format!("{}: '{}'", path.display(), String::from_utf8_lossy(name)),
        )
    };

    for (dir_key, folder) in archive.iter() {
        let dir_name = dir_key.name().as_bytes();
        if !dir_name.is_empty() && ArchiveKey::from(dir_name).hash() != dir_key.hash() {
            return Err(mismatch(dir_name));
        }

        for (file_key, _) in folder.iter() {
            let file_name = file_key.name().as_bytes();
            if !file_name.is_empty() && DirectoryKey::from(file_name).hash() != file_key.hash() {
                return Err(mismatch(file_name));
            }
        }
    }

    debug!("Verified hashes of {}", path.display());
    Ok(())
}
