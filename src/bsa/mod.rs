//! BSA (Bethesda Archive) engine adapter
//!
//! Drives the `ba2` crate's TES4 codec (Oblivion, FO3, FNV, Skyrim, SSE):
//! - `reader`: parse an archive into the folder/file tree, verify hashes,
//!   decode packed files
//! - `writer`: serialize a tree (packed and staged files) back to disk
//!
//! The byte layout, hashing and compression all live in `ba2`.

pub(crate) mod reader;
pub(crate) mod writer;

use ba2::tes4::{ArchiveFlags, ArchiveTypes, Version};
use std::error::Error as StdError;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

use crate::error::{ArchiveError, ErrorCode, Result};

/// On-disk layout revision this layer names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVariant {
    /// v103
    Oblivion,
    /// v104; Fallout 3 and New Vegas share this layout
    Skyrim,
}

impl FormatVariant {
    /// Variant of an engine version, `None` for layouts without a name here
    pub fn from_version(version: Version) -> Option<Self> {
        match version {
            Version::v103 => Some(FormatVariant::Oblivion),
            Version::v104 => Some(FormatVariant::Skyrim),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatVariant::Oblivion => "oblivion",
            FormatVariant::Skyrim => "skyrim",
        }
    }
}

impl fmt::Display for FormatVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archive container kind, by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// TES4 BSA (Oblivion, FO3, FNV, Skyrim)
    Bsa,
    /// FO4 BA2 (Fallout 4, Fallout 76, Starfield)
    Ba2,
    /// TES3 BSA (Morrowind)
    Tes3,
}

/// Detect the container kind from its magic bytes
///
/// Fails with an OS error when the file cannot be opened or read and with
/// `InvalidData` when the magic is not a known archive magic.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut file = File::open(path).map_err(|e| ArchiveError::io("open", path, e))?;
    let mut magic = [0u8; 4];
    if let Err(e) = file.read_exact(&mut magic) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Err(ArchiveError::with_detail(
                ErrorCode::InvalidData,
                format!("{} is too short to be an archive", path.display()),
            ));
        }
        return Err(ArchiveError::io("read", path, e));
    }

    let format = match &magic {
        b"BSA\0" => ArchiveFormat::Bsa,
        b"BTDX" => ArchiveFormat::Ba2,
        [0x00, 0x01, 0x00, 0x00] => ArchiveFormat::Tes3,
        _ => {
            return Err(ArchiveError::with_detail(
                ErrorCode::InvalidData,
                format!("{} is not a BSA archive", path.display()),
            ))
        }
    };
    debug!("Detected {:?} by magic bytes: {}", format, path.display());
    Ok(format)
}

/// BSA version detection from archive name
pub fn detect_version(name: &str, fallback: Version) -> Version {
    let name_lower = name.to_lowercase();

    // Oblivion uses v103
    if name_lower.contains("oblivion")
        || name_lower.contains("shiveringisles")
        || name_lower.contains("dlcbattlehorn")
        || name_lower.contains("dlcfrostcrag")
        || name_lower.contains("dlchorse")
        || name_lower.contains("dlcorrery")
        || name_lower.contains("dlcthievesden")
        || name_lower.contains("dlcvilelair")
        || name_lower.contains("knights")
    {
        Version::v103
    } else {
        fallback
    }
}

/// Detect archive types from BSA name
pub fn detect_types(name: &str) -> ArchiveTypes {
    let name_lower = name.to_lowercase();

    if name_lower.contains("meshes") {
        ArchiveTypes::MESHES
    } else if name_lower.contains("textures") {
        ArchiveTypes::TEXTURES
    } else if name_lower.contains("menuvoices") {
        ArchiveTypes::MENUS | ArchiveTypes::VOICES
    } else if name_lower.contains("voices") {
        ArchiveTypes::VOICES
    } else if name_lower.contains("sound") {
        ArchiveTypes::SOUNDS
    } else {
        ArchiveTypes::MISC
    }
}

/// Default flags for FO3/FNV/Skyrim BSAs, without the compression bit
pub fn default_flags(version: Version) -> ArchiveFlags {
    match version {
        Version::v103 => ArchiveFlags::DIRECTORY_STRINGS | ArchiveFlags::FILE_STRINGS,
        _ => {
            ArchiveFlags::DIRECTORY_STRINGS
                | ArchiveFlags::FILE_STRINGS
                | ArchiveFlags::RETAIN_DIRECTORY_NAMES
                | ArchiveFlags::RETAIN_FILE_NAMES
                | ArchiveFlags::RETAIN_FILE_NAME_OFFSETS
        }
    }
}

/// Map an engine failure onto the taxonomy
///
/// I/O failures anywhere in the error chain keep their OS error and become
/// `syscall` failures on `path`; everything else is `fallback`.
pub(crate) fn engine_error<E>(err: E, syscall: &'static str, path: &Path, fallback: ErrorCode) -> ArchiveError
where
    E: StdError + 'static,
{
    let mut current: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(cause) = current {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            let rebuilt = match io_err.raw_os_error() {
                Some(errno) => io::Error::from_raw_os_error(errno),
                None => io::Error::new(io_err.kind(), io_err.to_string()),
            };
            return ArchiveError::io(syscall, path, rebuilt);
        }
        current = cause.source();
    }
    ArchiveError::with_detail(fallback, format!("{}: {}", path.display(), err))
}
