//! Archive operation outcomes
//!
//! Every archive operation reports through [`ArchiveError`], whether it ran
//! directly on the caller's thread or on a background worker. Two codes
//! (`AccessFailed`, `FileNotFound`) come from the operating system and carry
//! the errno and the failing call; the rest are format or logic failures.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Outcome codes for archive operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Success
    None,
    AccessFailed,
    Canceled,
    FileNotFound,
    InvalidData,
    InvalidHashes,
    SourceFileMissing,
    ZlibInitFailed,
    /// Any engine code this layer does not recognize
    Unknown,
}

impl ErrorCode {
    /// Map a raw engine status code onto the taxonomy
    ///
    /// Codes follow the numbering used by the classic BSA toolkit
    /// (0 = none through 7 = canceled); anything else is `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ErrorCode::None,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessFailed,
            3 => ErrorCode::InvalidData,
            4 => ErrorCode::InvalidHashes,
            5 => ErrorCode::SourceFileMissing,
            6 => ErrorCode::ZlibInitFailed,
            7 => ErrorCode::Canceled,
            _ => ErrorCode::Unknown,
        }
    }

    /// Human-readable description, `None` for success
    pub fn description(self) -> Option<&'static str> {
        match self {
            ErrorCode::None => None,
            ErrorCode::AccessFailed => Some("access failed"),
            ErrorCode::Canceled => Some("canceled"),
            ErrorCode::FileNotFound => Some("file not found"),
            ErrorCode::InvalidData => Some("invalid data"),
            ErrorCode::InvalidHashes => Some("invalid hashes"),
            ErrorCode::SourceFileMissing => Some("source file missing"),
            ErrorCode::ZlibInitFailed => Some("zlib init failed"),
            ErrorCode::Unknown => Some("unknown"),
        }
    }

    /// True for codes that originate from a failed system call
    pub fn is_os_error(self) -> bool {
        matches!(self, ErrorCode::AccessFailed | ErrorCode::FileNotFound)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description().unwrap_or("success"))
    }
}

/// Error reported by archive operations
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A system call failed
    #[error("{source}, {syscall} '{}'", .path.display())]
    Os {
        code: ErrorCode,
        syscall: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive content or the requested operation is invalid
    #[error("{code}{}", .detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
    Archive {
        code: ErrorCode,
        detail: Option<String>,
    },
}

impl ArchiveError {
    /// Build a format/logic error carrying only its description
    pub fn new(code: ErrorCode) -> Self {
        ArchiveError::Archive { code, detail: None }
    }

    /// Build a format/logic error with extra context
    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        ArchiveError::Archive {
            code,
            detail: Some(detail.into()),
        }
    }

    /// Wrap an I/O failure of `syscall` on `path`
    ///
    /// Missing files map to `FileNotFound`, everything else to `AccessFailed`.
    /// I/O errors without an OS error number get `EIO` so the errno is
    /// never zero.
    pub fn io(syscall: &'static str, path: &Path, source: io::Error) -> Self {
        let code = if source.kind() == io::ErrorKind::NotFound {
            ErrorCode::FileNotFound
        } else {
            ErrorCode::AccessFailed
        };
        let source = match source.raw_os_error() {
            Some(_) => source,
            None if code == ErrorCode::FileNotFound => io::Error::from_raw_os_error(libc::ENOENT),
            None => io::Error::new(
                source.kind(),
                OsDetail {
                    errno: libc::EIO,
                    message: source.to_string(),
                },
            ),
        };
        ArchiveError::Os {
            code,
            syscall,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ArchiveError::Os { code, .. } | ArchiveError::Archive { code, .. } => *code,
        }
    }

    /// System error number for OS-class errors
    pub fn errno(&self) -> Option<i32> {
        match self {
            ArchiveError::Os { source, .. } => Some(
                source
                    .raw_os_error()
                    .or_else(|| {
                        source
                            .get_ref()
                            .and_then(|inner| inner.downcast_ref::<OsDetail>())
                            .map(|detail| detail.errno)
                    })
                    .unwrap_or(libc::EIO),
            ),
            ArchiveError::Archive { .. } => None,
        }
    }

    /// Name of the failed system call for OS-class errors
    pub fn syscall(&self) -> Option<&'static str> {
        match self {
            ArchiveError::Os { syscall, .. } => Some(syscall),
            ArchiveError::Archive { .. } => None,
        }
    }

    /// Path the failing system call operated on
    pub fn path(&self) -> Option<&Path> {
        match self {
            ArchiveError::Os { path, .. } => Some(path),
            ArchiveError::Archive { .. } => None,
        }
    }

    pub fn is_os_error(&self) -> bool {
        matches!(self, ArchiveError::Os { .. })
    }
}

impl From<ErrorCode> for ArchiveError {
    fn from(code: ErrorCode) -> Self {
        ArchiveError::new(code)
    }
}

/// Carries a synthetic errno for I/O failures the OS did not number
#[derive(Debug)]
struct OsDetail {
    errno: i32,
    message: String,
}

impl fmt::Display for OsDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (os error {})", self.message, self.errno)
    }
}

impl std::error::Error for OsDetail {}

/// Result type for archive operations
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// Misuse of the tree mutation API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("'{name}' already exists in folder '{folder}'")]
    DuplicateName { folder: String, name: String },

    #[error("file '{0}' is already attached to a folder")]
    AlreadyAttached(String),

    #[error("file '{0}' belongs to a different archive")]
    ForeignArchive(String),

    #[error("'{0}' is not a valid file name (empty, '.', '..' or contains a path separator)")]
    InvalidName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions() {
        assert_eq!(ErrorCode::None.description(), None);
        assert_eq!(ErrorCode::AccessFailed.description(), Some("access failed"));
        assert_eq!(ErrorCode::InvalidHashes.description(), Some("invalid hashes"));
        assert_eq!(ErrorCode::ZlibInitFailed.description(), Some("zlib init failed"));
        assert_eq!(ErrorCode::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_from_raw_falls_back_to_unknown() {
        assert_eq!(ErrorCode::from_raw(0), ErrorCode::None);
        assert_eq!(ErrorCode::from_raw(4), ErrorCode::InvalidHashes);
        assert_eq!(ErrorCode::from_raw(42), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_raw(-1), ErrorCode::Unknown);
    }

    #[test]
    fn test_os_errors_carry_errno_and_syscall() {
        let err = ArchiveError::io(
            "open",
            Path::new("/missing.bsa"),
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert_eq!(err.code(), ErrorCode::FileNotFound);
        assert_eq!(err.errno(), Some(libc::ENOENT));
        assert_eq!(err.syscall(), Some("open"));
        assert!(err.to_string().contains("open '/missing.bsa'"));

        let err = ArchiveError::io(
            "write",
            Path::new("/ro/out.bsa"),
            io::Error::from_raw_os_error(libc::EACCES),
        );
        assert_eq!(err.code(), ErrorCode::AccessFailed);
        assert_eq!(err.errno(), Some(libc::EACCES));
    }

    #[test]
    fn test_unnumbered_io_errors_get_errno() {
        let err = ArchiveError::io(
            "read",
            Path::new("a.bsa"),
            io::Error::new(io::ErrorKind::UnexpectedEof, "short read"),
        );
        assert_eq!(err.code(), ErrorCode::AccessFailed);
        assert_eq!(err.errno(), Some(libc::EIO));

        let err = ArchiveError::io("stat", Path::new("a.bsa"), io::ErrorKind::NotFound.into());
        assert_eq!(err.code(), ErrorCode::FileNotFound);
        assert_eq!(err.errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_format_errors_have_no_errno() {
        let err = ArchiveError::new(ErrorCode::InvalidData);
        assert_eq!(err.errno(), None);
        assert_eq!(err.syscall(), None);
        assert_eq!(err.to_string(), "invalid data");

        let err = ArchiveError::with_detail(ErrorCode::SourceFileMissing, "a.txt");
        assert_eq!(err.to_string(), "source file missing: a.txt");
    }
}
