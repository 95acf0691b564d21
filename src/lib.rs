//! bsarc - asynchronous access to Bethesda Softworks Archives
//!
//! Opens, creates, navigates and extracts TES4-family BSA files. Slow work
//! runs on background workers and reports back through [`ArchiveTask`]s or
//! completion handlers; tree navigation is synchronous.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = bsarc::TaskRunner::current()?;
//! let archive = runner.load("Skyrim - Misc.bsa", true).await?;
//! println!("{} files", archive.root().recursive_file_count());
//! archive.extract_all("out").await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod bsa;
pub mod config;
pub mod error;
pub mod paths;
pub mod task;
pub mod tree;

pub use archive::{Archive, ArchiveFileEntry, ArchiveState};
pub use bsa::{ArchiveFormat, FormatVariant};
pub use config::{ArchiveConfig, ConfigError};
pub use error::{ArchiveError, ErrorCode, TreeError};
pub use task::{ArchiveTask, TaskRunner};
pub use tree::{FileEntry, Folder};

use std::path::PathBuf;

/// Open the archive at `path` in the background
///
/// `on_done` is called exactly once with the archive or the error. Fails
/// only when called outside a tokio runtime.
pub fn load_archive<F>(path: impl Into<PathBuf>, test_hashes: bool, on_done: F) -> Result<(), ConfigError>
where
    F: FnOnce(error::Result<Archive>) + Send + 'static,
{
    TaskRunner::current()?.load(path, test_hashes).on_done(on_done);
    Ok(())
}

/// Create an empty archive bound to `path` in the background
///
/// `on_done` is called exactly once. Nothing is written until
/// [`Archive::write`].
pub fn create_archive<F>(path: impl Into<PathBuf>, on_done: F) -> Result<(), ConfigError>
where
    F: FnOnce(error::Result<Archive>) + Send + 'static,
{
    TaskRunner::current()?.create(path).on_done(on_done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_create_then_load_with_handlers() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        std::fs::write(&source, b"contents").unwrap();
        let path = temp_dir.path().join("handlers.bsa");

        let (tx, rx) = oneshot::channel();
        create_archive(&path, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
        let archive = rx.await.unwrap().unwrap();
        let file = archive.create_file("a.txt", &source, false);
        archive.root().add_file(&file).unwrap();
        archive.write().unwrap();

        let (tx, rx) = oneshot::channel();
        load_archive(&path, true, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
        let loaded = rx.await.unwrap().unwrap();
        assert_eq!(loaded.root().file(0).name(), "a.txt");
        assert_eq!(loaded.root().file(0).size(), 8);
    }

    #[tokio::test]
    async fn test_load_handler_receives_errors() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = oneshot::channel();
        load_archive(temp_dir.path().join("nope.bsa"), false, move |result| {
            let _ = tx.send(result.map(|_| ()).map_err(|e| (e.code(), e.errno())));
        })
        .unwrap();

        let (code, errno) = rx.await.unwrap().unwrap_err();
        assert_eq!(code, ErrorCode::FileNotFound);
        assert_eq!(errno, Some(libc::ENOENT));
    }

    #[test]
    fn test_entry_points_need_runtime() {
        assert!(load_archive("x.bsa", false, |_| {}).is_err());
    }
}
