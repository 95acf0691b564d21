//! Archive handle
//!
//! An [`Archive`] is the shared owner of one container's tree. It is either
//! freshly created (nothing on disk until [`Archive::write`]) or loaded from
//! an existing file. Folder and file handles keep the same shared state alive.
//!
//! Structural operations (write, extraction) hold the archive's operation lock
//! for their whole duration, so overlapping requests on one archive queue
//! behind each other instead of racing.

use ba2::tes4::Version;
use once_cell::sync::OnceCell;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bsa::reader::{self, Packed};
use crate::bsa::writer::{self, WriteSettings};
use crate::bsa::{default_flags, detect_types, detect_version, FormatVariant};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ErrorCode, Result};
use crate::paths;
use crate::task::{ArchiveTask, TaskRunner};
use crate::tree::{FileEntry, FileId, FileSource, Folder, Tree};

/// Lifecycle state of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// Created in memory; `write` produces the file
    CreatedEmpty,
    /// Parsed from an existing file
    Loaded { test_hashes: bool },
}

/// Flat listing entry for a file in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFileEntry {
    pub path: String,
    pub size: u64,
}

/// State shared by an archive and every handle derived from it
pub(crate) struct Shared {
    path: PathBuf,
    state: ArchiveState,
    settings: WriteSettings,
    packed: Option<Packed>,
    tree: RwLock<Tree>,
    operation: Mutex<()>,
    config: ArchiveConfig,
    /// Bound on first background operation when not created by a runner
    runner: OnceCell<TaskRunner>,
}

impl Shared {
    pub(crate) fn tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn tree_mut(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.operation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes of one file, from the container or from its staged source
    fn file_bytes(&self, source: &FileSource) -> Result<Vec<u8>> {
        match source {
            FileSource::Packed { directory, file } => match &self.packed {
                Some(packed) => packed.read_file(directory, file),
                None => Err(ArchiveError::with_detail(
                    ErrorCode::InvalidData,
                    "packed file without a backing archive",
                )),
            },
            FileSource::External(path) => fs::read(path).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    ArchiveError::with_detail(ErrorCode::SourceFileMissing, path.display().to_string())
                } else {
                    ArchiveError::io("read", path, e)
                }
            }),
        }
    }

    /// Write one file below `output_dir`, preserving its archive path
    fn extract_to(&self, archive_path: &str, source: &FileSource, output_dir: &Path) -> Result<PathBuf> {
        let target = paths::resolve_output_path(output_dir, archive_path)?;
        paths::ensure_parent_dirs(&target)?;
        let data = self.file_bytes(source)?;
        fs::write(&target, &data).map_err(|e| ArchiveError::io("write", &target, e))?;
        debug!("Extracted {} ({} bytes)", archive_path, data.len());
        Ok(target)
    }

    fn prepare_output_dir(&self, output_dir: &Path) -> Result<()> {
        if self.config.create_output_dirs {
            fs::create_dir_all(output_dir).map_err(|e| ArchiveError::io("mkdir", output_dir, e))
        } else {
            fs::metadata(output_dir)
                .map(|_| ())
                .map_err(|e| ArchiveError::io("stat", output_dir, e))
        }
    }
}

/// Handle to an opened or newly created archive
#[derive(Clone)]
pub struct Archive {
    shared: Arc<Shared>,
}

impl Archive {
    /// Parse the archive at `path`
    ///
    /// This blocks on file I/O; callers on an async runtime should go through
    /// [`TaskRunner::load`] or [`crate::load_archive`] instead.
    pub fn open(path: impl AsRef<Path>, test_hashes: bool, config: &ArchiveConfig) -> Result<Archive> {
        let path = absolute(path.as_ref());
        let (tree, packed) = reader::read(&path, test_hashes)?;
        let options = packed.options();
        let settings = WriteSettings {
            version: options.version(),
            flags: options.flags(),
            types: options.types(),
        };
        if let Some(variant) = FormatVariant::from_version(settings.version) {
            debug!("{} uses the {} layout", path.display(), variant);
        }

        Ok(Archive {
            shared: Arc::new(Shared {
                path,
                state: ArchiveState::Loaded { test_hashes },
                settings,
                packed: Some(packed),
                tree: RwLock::new(tree),
                operation: Mutex::new(()),
                config: config.clone(),
                runner: OnceCell::new(),
            }),
        })
    }

    /// Create an empty archive bound to `path`; nothing touches the disk
    ///
    /// Version and content types are inferred from the file name. No tokio
    /// runtime is needed until a background operation is started.
    pub fn create_empty(path: impl AsRef<Path>, config: &ArchiveConfig) -> Archive {
        let path = absolute(path.as_ref());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let fallback = config.version().unwrap_or(Version::v104);
        let version = detect_version(&name, fallback);

        Archive {
            shared: Arc::new(Shared {
                settings: WriteSettings {
                    version,
                    flags: default_flags(version),
                    types: detect_types(&name),
                },
                path,
                state: ArchiveState::CreatedEmpty,
                packed: None,
                tree: RwLock::new(Tree::new()),
                operation: Mutex::new(()),
                config: config.clone(),
                runner: OnceCell::new(),
            }),
        }
    }

    /// Run this archive's background operations on `runner`
    pub(crate) fn bind(self, runner: &TaskRunner) -> Archive {
        let _ = self.shared.runner.set(runner.clone());
        self
    }

    /// Submit `job` to the bound runner, or to the process-wide one if none is bound
    fn submit<T, F>(&self, name: &'static str, job: F) -> ArchiveTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match self.shared.runner.get_or_try_init(TaskRunner::current) {
            Ok(runner) => runner.submit(name, job),
            Err(e) => ArchiveTask::failed(
                name,
                ArchiveError::with_detail(ErrorCode::Unknown, format!("cannot start {}: {}", name, e)),
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn state(&self) -> ArchiveState {
        self.shared.state
    }

    /// Whether hashes were verified on load; always false for new archives
    pub fn test_hashes(&self) -> bool {
        matches!(self.shared.state, ArchiveState::Loaded { test_hashes: true })
    }

    /// Engine version the archive was read with, or will be written as
    pub fn version(&self) -> Version {
        self.shared.settings.version
    }

    /// Named on-disk variant, `None` for layouts this layer does not name
    pub fn format_variant(&self) -> Option<FormatVariant> {
        FormatVariant::from_version(self.shared.settings.version)
    }

    pub fn root(&self) -> Folder {
        Folder::new(self.shared.clone(), Tree::ROOT)
    }

    /// Total number of files in the archive
    pub fn file_count(&self) -> usize {
        self.shared.tree().file_total()
    }

    /// Every file with its path and uncompressed size
    pub fn list_files(&self) -> Vec<ArchiveFileEntry> {
        let ids = self.shared.tree().walk_files();
        ids.into_iter()
            .map(|id| {
                let file = FileEntry::new(self.shared.clone(), id);
                ArchiveFileEntry {
                    path: file.full_path(),
                    size: file.size(),
                }
            })
            .collect()
    }

    /// Find a file by archive path (case-insensitive, `\` or `/` separated)
    pub fn find_file(&self, path: &str) -> Option<FileEntry> {
        let id = self.shared.tree().find_path(path)?;
        Some(FileEntry::new(self.shared.clone(), id))
    }

    /// Stage an external file for the next write
    ///
    /// The source is not checked here; a missing source makes `write` fail
    /// with `SourceFileMissing`.
    pub fn create_file(&self, name: &str, source_path: impl Into<PathBuf>, compressed: bool) -> FileEntry {
        let id = self.shared.tree_mut().create_file(
            name,
            FileSource::External(source_path.into()),
            compressed,
            0,
        );
        FileEntry::new(self.shared.clone(), id)
    }

    /// Stage every regular file below `dir`, mirroring its folder structure
    ///
    /// Returns the number of staged files. Files whose path already exists in
    /// the archive are skipped with a warning.
    pub fn stage_directory(&self, dir: &Path, compressed: bool) -> Result<usize> {
        fs::metadata(dir).map_err(|e| ArchiveError::io("stat", dir, e))?;

        let mut staged = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                match e.into_io_error() {
                    Some(io_err) => ArchiveError::io("open", &path, io_err),
                    None => ArchiveError::with_detail(
                        ErrorCode::InvalidData,
                        format!("filesystem loop at {}", path.display()),
                    ),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = entry.path().strip_prefix(dir).map_err(|_| {
                ArchiveError::with_detail(ErrorCode::InvalidData, entry.path().display().to_string())
            })?;
            let folder_path = rel_path
                .parent()
                .map(|p| paths::to_archive_path(&p.to_string_lossy()))
                .unwrap_or_default();
            let name = entry.file_name().to_string_lossy().to_string();

            let file = self.create_file(&name, entry.path(), compressed);
            let folder = self.root().add_folder(&folder_path);
            match folder.add_file(&file) {
                Ok(()) => staged += 1,
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        info!("Staged {} files from {}", staged, dir.display());
        Ok(staged)
    }

    /// Serialize the archive to its path, blocking until done
    pub fn write(&self) -> Result<()> {
        let _exclusive = self.shared.exclusive();
        let tree = self.shared.tree();
        writer::write(
            &tree,
            self.shared.packed.as_ref(),
            self.shared.settings,
            &self.shared.path,
        )
    }

    /// Serialize the archive on a background worker
    pub fn write_async(&self) -> ArchiveTask<()> {
        let archive = self.clone();
        self.submit("write", move || archive.write())
    }

    /// Extract one file below `output_dir`, preserving its archive path
    pub fn extract_one(&self, file: &FileEntry, output_dir: impl Into<PathBuf>) -> ArchiveTask<()> {
        let output_dir = output_dir.into();
        let shared = self.shared.clone();
        let foreign = !file.belongs_to(&self.shared);
        let file_id = file.id();

        self.submit("extract", move || {
            if foreign {
                return Err(ArchiveError::with_detail(
                    ErrorCode::InvalidData,
                    "file belongs to a different archive",
                ));
            }
            extract_one_blocking(&shared, file_id, &output_dir)
        })
    }

    /// Extract every file below `output_dir`
    pub fn extract_all(&self, output_dir: impl Into<PathBuf>) -> ArchiveTask<()> {
        self.extract_all_with(output_dir, |_, _| true)
    }

    /// Extract every file, asking `progress(index, path)` before each one
    ///
    /// Returning `false` stops the batch with `Canceled`. The first failing
    /// file aborts the batch; files already written stay on disk.
    pub fn extract_all_with<F>(&self, output_dir: impl Into<PathBuf>, progress: F) -> ArchiveTask<()>
    where
        F: FnMut(usize, &str) -> bool + Send + 'static,
    {
        let output_dir = output_dir.into();
        let shared = self.shared.clone();
        self.submit("extract-all", move || {
            extract_all_blocking(&shared, &output_dir, progress)
        })
    }
}

fn extract_one_blocking(shared: &Shared, file_id: FileId, output_dir: &Path) -> Result<()> {
    let _exclusive = shared.exclusive();
    let (archive_path, source) = {
        let tree = shared.tree();
        (tree.file_path(file_id), tree.file(file_id).source.clone())
    };

    shared.prepare_output_dir(output_dir)?;
    shared.extract_to(&archive_path, &source, output_dir)?;
    Ok(())
}

fn extract_all_blocking<F>(shared: &Shared, output_dir: &Path, mut progress: F) -> Result<()>
where
    F: FnMut(usize, &str) -> bool,
{
    let _exclusive = shared.exclusive();
    let files: Vec<(String, FileSource)> = {
        let tree = shared.tree();
        tree.walk_files()
            .into_iter()
            .map(|id| (tree.file_path(id), tree.file(id).source.clone()))
            .collect()
    };

    shared.prepare_output_dir(output_dir)?;

    let mut bytes = 0u64;
    for (index, (archive_path, source)) in files.iter().enumerate() {
        if !progress(index, archive_path) {
            info!(
                "Extraction of {} canceled after {} of {} files",
                shared.path.display(),
                index,
                files.len()
            );
            return Err(ArchiveError::new(ErrorCode::Canceled));
        }

        let target = shared.extract_to(archive_path, source, output_dir)?;
        bytes += fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
    }

    info!(
        "Extracted {} files ({:.1} MB) from {}",
        files.len(),
        bytes as f64 / 1024.0 / 1024.0,
        shared.path.display()
    );
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.shared.path)
            .field("state", &self.shared.state)
            .field("version", &self.shared.settings.version)
            .finish()
    }
}
