//! BSA archive creation

use ba2::tes4::{
    Archive, ArchiveFlags, ArchiveKey, ArchiveOptions, ArchiveTypes, Directory, DirectoryKey,
    File as BsaFile, FileCompressionOptions, Version,
};
use ba2::CompressableFrom;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::engine_error;
use super::reader::Packed;
use crate::error::{ArchiveError, ErrorCode, Result};
use crate::tree::{FileSource, Tree};

/// Archive-level settings used when serializing
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriteSettings {
    pub version: Version,
    pub flags: ArchiveFlags,
    pub types: ArchiveTypes,
}

/// Helper struct to hold file data for BSA creation
struct FileEntry {
    dir_path: String,
    file_name: String,
    data: Vec<u8>,
    compress: bool,
}

impl FileEntry {
    /// Create a BSA file, optionally compressing it
    fn as_bsa_file(&self, version: Version) -> Result<BsaFile<'static>> {
        // Create an uncompressed file from our raw data
        let uncompressed = BsaFile::from_decompressed(self.data.clone().into_boxed_slice());

        if self.compress {
            let compression_options = FileCompressionOptions::builder().version(version).build();

            uncompressed.compress(&compression_options).map_err(|e| {
                ArchiveError::with_detail(
                    ErrorCode::ZlibInitFailed,
                    format!("failed to compress {}\\{}: {}", self.dir_path, self.file_name, e),
                )
            })
        } else {
            Ok(uncompressed)
        }
    }
}

/// Load the bytes of every attached file, in tree order
fn collect_entries(tree: &Tree, packed: Option<&Packed>) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    for id in tree.walk_files() {
        let node = tree.file(id);
        let parent = node.parent.unwrap_or(Tree::ROOT);
        let dir_path = tree.folder_path(parent);

        let data = match &node.source {
            FileSource::External(source) => fs::read(source).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    ArchiveError::with_detail(
                        ErrorCode::SourceFileMissing,
                        source.display().to_string(),
                    )
                } else {
                    ArchiveError::io("read", source, e)
                }
            })?,
            FileSource::Packed { directory, file } => match packed {
                Some(packed) => packed.read_file(directory, file)?,
                None => {
                    return Err(ArchiveError::with_detail(
                        ErrorCode::InvalidData,
                        format!("{} has no backing archive", tree.file_path(id)),
                    ))
                }
            },
        };

        entries.push(FileEntry {
            // Root files go to "." (BSA convention)
            dir_path: if dir_path.is_empty() { ".".to_string() } else { dir_path },
            file_name: node.name.clone(),
            data,
            compress: node.compressed,
        });
    }

    Ok(entries)
}

/// Serialize `tree` to `output_path`
///
/// The archive is written to a temporary file next to `output_path` and moved
/// into place once complete, so a loaded archive can be written back over its
/// own (memory mapped) source.
pub(crate) fn write(
    tree: &Tree,
    packed: Option<&Packed>,
    settings: WriteSettings,
    output_path: &Path,
) -> Result<()> {
    let entries = collect_entries(tree, packed)?;
    let total_size: u64 = entries.iter().map(|e| e.data.len() as u64).sum();

    let mut flags = settings.flags;
    if entries.iter().any(|e| e.compress) {
        flags |= ArchiveFlags::COMPRESSED;
    } else {
        flags &= !ArchiveFlags::COMPRESSED;
    }

    info!(
        "Building BSA: {} ({} files, {} MB, version {:?}, flags {:?})",
        output_path.display(),
        entries.len(),
        total_size / 1_000_000,
        settings.version,
        flags
    );

    let mut archive = Archive::new();
    for entry in &entries {
        let file = entry.as_bsa_file(settings.version)?;
        let archive_key = ArchiveKey::from(entry.dir_path.as_bytes());
        let directory_key = DirectoryKey::from(entry.file_name.as_bytes());

        match archive.get_mut(&archive_key) {
            Some(directory) => {
                directory.insert(directory_key, file);
            }
            None => {
                let mut directory = Directory::default();
                directory.insert(directory_key, file);
                archive.insert(archive_key, directory);
            }
        }
    }

    let options = ArchiveOptions::builder()
        .version(settings.version)
        .flags(flags)
        .types(settings.types)
        .build();

    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::io("mkdir", parent, e))?;
    }

    let temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ArchiveError::io("open", output_path, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        archive
            .write(&mut writer, &options)
            .map_err(|e| engine_error(e, "write", output_path, ErrorCode::InvalidData))?;
        writer
            .flush()
            .map_err(|e| ArchiveError::io("write", output_path, e))?;
    }
    temp.persist(output_path)
        .map_err(|e| ArchiveError::io("rename", output_path, e.error))?;

    debug!("Wrote {} bytes of file data", total_size);
    info!("Created BSA: {}", output_path.display());
    Ok(())
}
