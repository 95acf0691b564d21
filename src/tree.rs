//! Folder/file tree owned by an archive
//!
//! The archive keeps every folder and file record in one arena ([`Tree`]).
//! [`Folder`] and [`FileEntry`] are cheap handles: a shared reference to the
//! owning archive plus an index into that arena, so navigating never clones
//! the tree and a handle can never outlive the storage it points into.

use ba2::tes4::{DirectoryHash, FileHash};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::Shared;
use crate::error::TreeError;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FolderId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FileId(usize);

/// Where the bytes of a file come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileSource {
    /// Stored in the parsed container under these folder and file hashes
    Packed { directory: DirectoryHash, file: FileHash },
    /// External file staged for the next write
    External(PathBuf),
}

#[derive(Debug)]
struct FolderNode {
    name: String,
    parent: Option<FolderId>,
    subfolders: Vec<FolderId>,
    files: Vec<FileId>,
}

#[derive(Debug)]
pub(crate) struct FileNode {
    pub name: String,
    pub parent: Option<FolderId>,
    pub source: FileSource,
    pub compressed: bool,
    /// Uncompressed size for packed files
    pub size: u64,
}

/// Arena of folder and file records
#[derive(Debug)]
pub(crate) struct Tree {
    folders: Vec<FolderNode>,
    files: Vec<FileNode>,
}

impl Tree {
    pub const ROOT: FolderId = FolderId(0);

    pub fn new() -> Self {
        Self {
            folders: vec![FolderNode {
                name: String::new(),
                parent: None,
                subfolders: Vec::new(),
                files: Vec::new(),
            }],
            files: Vec::new(),
        }
    }

    fn folder(&self, id: FolderId) -> &FolderNode {
        &self.folders[id.0]
    }

    pub fn file(&self, id: FileId) -> &FileNode {
        &self.files[id.0]
    }

    pub fn folder_name(&self, id: FolderId) -> &str {
        &self.folder(id).name
    }

    /// Root-relative folder path, backslash separated
    pub fn folder_path(&self, id: FolderId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(folder_id) = current {
            let node = self.folder(folder_id);
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            current = node.parent;
        }
        names.reverse();
        names.join("\\")
    }

    /// Root-relative file path; detached files report just their name
    pub fn file_path(&self, id: FileId) -> String {
        let node = self.file(id);
        match node.parent {
            Some(parent) => paths::join(&self.folder_path(parent), &node.name),
            None => node.name.clone(),
        }
    }

    pub fn subfolders(&self, id: FolderId) -> &[FolderId] {
        &self.folder(id).subfolders
    }

    pub fn files_in(&self, id: FolderId) -> &[FileId] {
        &self.folder(id).files
    }

    pub fn file_total(&self) -> usize {
        self.files.iter().filter(|f| f.parent.is_some()).count()
    }

    /// Files under `id`, summed over the whole subtree
    pub fn recursive_file_count(&self, id: FolderId) -> usize {
        let node = self.folder(id);
        node.files.len()
            + node
                .subfolders
                .iter()
                .map(|&child| self.recursive_file_count(child))
                .sum::<usize>()
    }

    pub fn find_subfolder(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        self.folder(parent)
            .subfolders
            .iter()
            .copied()
            .find(|&id| paths::names_equal(&self.folder(id).name, name))
    }

    pub fn find_file(&self, parent: FolderId, name: &str) -> Option<FileId> {
        self.folder(parent)
            .files
            .iter()
            .copied()
            .find(|&id| paths::names_equal(&self.file(id).name, name))
    }

    /// Look up a file by root-relative path
    pub fn find_path(&self, path: &str) -> Option<FileId> {
        let parts: Vec<&str> = paths::components(path).collect();
        let (name, dirs) = parts.split_last()?;
        let mut folder = Self::ROOT;
        for dir in dirs {
            folder = self.find_subfolder(folder, dir)?;
        }
        self.find_file(folder, name)
    }

    /// Walk `path` below `parent`, creating missing folders
    pub fn add_folder(&mut self, parent: FolderId, path: &str) -> FolderId {
        let mut current = parent;
        for name in paths::components(path) {
            current = match self.find_subfolder(current, name) {
                Some(existing) => existing,
                None => {
                    let id = FolderId(self.folders.len());
                    self.folders.push(FolderNode {
                        name: name.to_string(),
                        parent: Some(current),
                        subfolders: Vec::new(),
                        files: Vec::new(),
                    });
                    self.folders[current.0].subfolders.push(id);
                    id
                }
            };
        }
        current
    }

    /// Create a detached file record
    pub fn create_file(&mut self, name: &str, source: FileSource, compressed: bool, size: u64) -> FileId {
        let id = FileId(self.files.len());
        self.files.push(FileNode {
            name: name.to_string(),
            parent: None,
            source,
            compressed,
            size,
        });
        id
    }

    /// Attach a detached file to `folder`
    pub fn attach(&mut self, folder: FolderId, file: FileId) -> Result<(), TreeError> {
        let name = self.file(file).name.clone();
        if !is_valid_file_name(&name) {
            return Err(TreeError::InvalidName(name));
        }
        if self.file(file).parent.is_some() {
            return Err(TreeError::AlreadyAttached(name));
        }
        if self.find_file(folder, &name).is_some() {
            return Err(TreeError::DuplicateName {
                folder: self.folder_path(folder),
                name,
            });
        }
        self.files[file.0].parent = Some(folder);
        self.folders[folder.0].files.push(file);
        Ok(())
    }

    /// Every attached file, depth first: a folder's files before its subfolders
    pub fn walk_files(&self) -> Vec<FileId> {
        let mut out = Vec::with_capacity(self.files.len());
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            let node = self.folder(id);
            out.extend(node.files.iter().copied());
            stack.extend(node.subfolders.iter().rev().copied());
        }
        out
    }
}

/// A single path component the container can store as a file name
fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['\\', '/'])
}

/// Handle to a folder of an archive
#[derive(Clone)]
pub struct Folder {
    shared: Arc<Shared>,
    id: FolderId,
}

impl Folder {
    pub(crate) fn new(shared: Arc<Shared>, id: FolderId) -> Self {
        Self { shared, id }
    }

    /// Folder name, empty for the root
    pub fn name(&self) -> String {
        self.shared.tree().folder_name(self.id).to_string()
    }

    /// Root-relative path, backslash separated
    pub fn full_path(&self) -> String {
        self.shared.tree().folder_path(self.id)
    }

    pub fn subfolder_count(&self) -> usize {
        self.shared.tree().subfolders(self.id).len()
    }

    /// Subfolder at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.subfolder_count()`.
    pub fn subfolder(&self, index: usize) -> Folder {
        match self.get_subfolder(index) {
            Some(folder) => folder,
            None => panic!(
                "subfolder index {} out of range for '{}'",
                index,
                self.full_path()
            ),
        }
    }

    pub fn get_subfolder(&self, index: usize) -> Option<Folder> {
        let id = self.shared.tree().subfolders(self.id).get(index).copied()?;
        Some(Folder::new(self.shared.clone(), id))
    }

    pub fn subfolders(&self) -> Vec<Folder> {
        let tree = self.shared.tree();
        tree.subfolders(self.id)
            .iter()
            .map(|&id| Folder::new(self.shared.clone(), id))
            .collect()
    }

    /// Number of files directly in this folder
    pub fn file_count(&self) -> usize {
        self.shared.tree().files_in(self.id).len()
    }

    /// Number of files in this folder and all of its subfolders
    pub fn recursive_file_count(&self) -> usize {
        self.shared.tree().recursive_file_count(self.id)
    }

    /// File at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.file_count()`.
    pub fn file(&self, index: usize) -> FileEntry {
        match self.get_file(index) {
            Some(file) => file,
            None => panic!(
                "file index {} out of range for '{}'",
                index,
                self.full_path()
            ),
        }
    }

    pub fn get_file(&self, index: usize) -> Option<FileEntry> {
        let id = self.shared.tree().files_in(self.id).get(index).copied()?;
        Some(FileEntry::new(self.shared.clone(), id))
    }

    pub fn files(&self) -> Vec<FileEntry> {
        let tree = self.shared.tree();
        tree.files_in(self.id)
            .iter()
            .map(|&id| FileEntry::new(self.shared.clone(), id))
            .collect()
    }

    /// Direct subfolder by name (case-insensitive)
    pub fn find_subfolder(&self, name: &str) -> Option<Folder> {
        let id = self.shared.tree().find_subfolder(self.id, name)?;
        Some(Folder::new(self.shared.clone(), id))
    }

    /// Direct file by name (case-insensitive)
    pub fn find_file(&self, name: &str) -> Option<FileEntry> {
        let id = self.shared.tree().find_file(self.id, name)?;
        Some(FileEntry::new(self.shared.clone(), id))
    }

    /// Attach a staged file to this folder
    pub fn add_file(&self, file: &FileEntry) -> Result<(), TreeError> {
        if !Arc::ptr_eq(&self.shared, &file.shared) {
            return Err(TreeError::ForeignArchive(file.name()));
        }
        self.shared.tree_mut().attach(self.id, file.id)
    }

    /// Create (or reuse) the folder at `path` below this one
    ///
    /// `path` may hold several components (`meshes\armor`); existing folders
    /// are matched case-insensitively.
    pub fn add_folder(&self, path: &str) -> Folder {
        let id = self.shared.tree_mut().add_folder(self.id, path);
        Folder::new(self.shared.clone(), id)
    }
}

impl fmt::Debug for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Folder")
            .field("path", &self.full_path())
            .field("subfolders", &self.subfolder_count())
            .field("files", &self.file_count())
            .finish()
    }
}

/// Handle to a file of an archive
#[derive(Clone)]
pub struct FileEntry {
    shared: Arc<Shared>,
    id: FileId,
}

impl FileEntry {
    pub(crate) fn new(shared: Arc<Shared>, id: FileId) -> Self {
        Self { shared, id }
    }

    pub(crate) fn id(&self) -> FileId {
        self.id
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    pub fn name(&self) -> String {
        self.shared.tree().file(self.id).name.clone()
    }

    /// Root-relative path, backslash separated
    pub fn full_path(&self) -> String {
        self.shared.tree().file_path(self.id)
    }

    /// Uncompressed size in bytes
    ///
    /// Staged files report the current size of their source, or 0 while the
    /// source does not exist.
    pub fn size(&self) -> u64 {
        let tree = self.shared.tree();
        let node = tree.file(self.id);
        match &node.source {
            FileSource::Packed { .. } => node.size,
            FileSource::External(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.shared.tree().file(self.id).compressed
    }

    /// Source path for staged files
    pub fn source_path(&self) -> Option<PathBuf> {
        match &self.shared.tree().file(self.id).source {
            FileSource::External(path) => Some(path.clone()),
            FileSource::Packed { .. } => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.shared.tree().file(self.id).parent.is_some()
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("path", &self.full_path())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external(tree: &mut Tree, name: &str) -> FileId {
        tree.create_file(name, FileSource::External(PathBuf::from(name)), false, 0)
    }

    #[test]
    fn test_root_always_present() {
        let tree = Tree::new();
        assert_eq!(tree.folder_name(Tree::ROOT), "");
        assert_eq!(tree.folder_path(Tree::ROOT), "");
        assert_eq!(tree.recursive_file_count(Tree::ROOT), 0);
    }

    #[test]
    fn test_add_folder_reuses_existing() {
        let mut tree = Tree::new();
        let sub = tree.add_folder(Tree::ROOT, "textures\\armor");
        let again = tree.add_folder(Tree::ROOT, "Textures/Armor");
        assert_eq!(sub, again);
        assert_eq!(tree.folder_path(sub), "textures\\armor");
        assert_eq!(tree.subfolders(Tree::ROOT).len(), 1);
    }

    #[test]
    fn test_attach_enforces_unique_names() {
        let mut tree = Tree::new();
        let folder = tree.add_folder(Tree::ROOT, "meshes");
        let first = external(&mut tree, "a.nif");
        let second = external(&mut tree, "A.NIF");

        tree.attach(folder, first).unwrap();
        assert_eq!(tree.file_path(first), "meshes\\a.nif");
        assert!(matches!(
            tree.attach(folder, second),
            Err(TreeError::DuplicateName { .. })
        ));
        assert!(matches!(
            tree.attach(Tree::ROOT, first),
            Err(TreeError::AlreadyAttached(_))
        ));

        // Same name is fine in another folder
        tree.attach(Tree::ROOT, second).unwrap();
        assert_eq!(tree.file_total(), 2);
    }

    #[test]
    fn test_attach_rejects_path_like_names() {
        let mut tree = Tree::new();
        for name in ["sub\\y.txt", "sub/y.txt", "", ".", ".."] {
            let file = external(&mut tree, name);
            assert!(matches!(
                tree.attach(Tree::ROOT, file),
                Err(TreeError::InvalidName(ref n)) if n == name
            ));
            assert_eq!(tree.file(file).parent, None);
        }
        assert_eq!(tree.file_total(), 0);
        assert!(tree.files_in(Tree::ROOT).is_empty());
    }

    #[test]
    fn test_recursive_count_and_walk() {
        let mut tree = Tree::new();
        let a = tree.add_folder(Tree::ROOT, "a");
        let b = tree.add_folder(a, "b");
        for (folder, name) in [(Tree::ROOT, "r.txt"), (a, "a1.txt"), (a, "a2.txt"), (b, "b1.txt")] {
            let file = external(&mut tree, name);
            tree.attach(folder, file).unwrap();
        }

        assert_eq!(tree.recursive_file_count(Tree::ROOT), 4);
        assert_eq!(tree.recursive_file_count(a), 3);
        assert_eq!(tree.recursive_file_count(b), 1);

        let walked: Vec<String> = tree.walk_files().into_iter().map(|f| tree.file_path(f)).collect();
        assert_eq!(walked, vec!["r.txt", "a\\a1.txt", "a\\a2.txt", "a\\b\\b1.txt"]);

        assert!(tree.find_path("A/B/B1.TXT").is_some());
        assert!(tree.find_path("a\\missing.txt").is_none());
    }
}
