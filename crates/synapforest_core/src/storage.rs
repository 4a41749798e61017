//! On-disk library layout and file placement helpers.
//!
//! ```text
//! <base>/files.db
//! <base>/raw_files/<item-hash>/<name>.<ext>
//! <base>/thumbnails/<item-hash>.webp
//! <base>/previews/<item-hash>.webp
//! ```
//!
//! # Invariants
//! - Every path handed out is derived from a validated `ContentId`, so no
//!   caller-controlled segment can escape `base_dir` except file names,
//!   which are checked by `validate_file_component`.
//! - Renames never overwrite an existing file.

use crate::derivative::{DerivativeKind, DERIVATIVE_EXT};
use crate::hash::ContentId;
use crate::model::item::{stored_file_name, Item};
use log::warn;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DB_FILE_NAME: &str = "files.db";
const RAW_FILES_DIR: &str = "raw_files";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file already exists: {}", .0.display())]
    TargetExists(PathBuf),
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),
    #[error("failed to {action} `{}`: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Absolute locations of one item's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPaths {
    pub raw_file: PathBuf,
    /// `None` when the item has no thumbnail.
    pub thumbnail: Option<PathBuf>,
    /// `None` when the item has no preview.
    pub preview: Option<PathBuf>,
}

/// Path arithmetic for one library directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryLayout {
    base_dir: PathBuf,
}

impl LibraryLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join(DB_FILE_NAME)
    }

    /// Creates the base directory and all artifact sub-directories.
    pub fn ensure_dirs(&self) -> StorageResult<()> {
        let dirs = [
            self.base_dir.join(RAW_FILES_DIR),
            self.base_dir.join(DerivativeKind::Thumbnail.dir_name()),
            self.base_dir.join(DerivativeKind::Preview.dir_name()),
        ];
        for dir in dirs {
            std::fs::create_dir_all(&dir)
                .map_err(|source| StorageError::io("create directory", &dir, source))?;
        }
        Ok(())
    }

    /// Directory owning every raw file of one item.
    pub fn item_dir(&self, id: &ContentId) -> PathBuf {
        self.base_dir.join(RAW_FILES_DIR).join(id.as_str())
    }

    pub fn raw_file_path(&self, id: &ContentId, name: &str, ext: &str) -> PathBuf {
        self.item_dir(id).join(stored_file_name(name, ext))
    }

    pub fn derivative_path(&self, kind: DerivativeKind, id: &ContentId) -> PathBuf {
        self.base_dir
            .join(kind.dir_name())
            .join(format!("{}.{DERIVATIVE_EXT}", id.as_str()))
    }

    pub fn item_paths(&self, item: &Item) -> ItemPaths {
        ItemPaths {
            raw_file: self.raw_file_path(&item.id, &item.name, &item.ext),
            thumbnail: item
                .have_thumbnail
                .then(|| self.derivative_path(DerivativeKind::Thumbnail, &item.id)),
            preview: item
                .have_preview
                .then(|| self.derivative_path(DerivativeKind::Preview, &item.id)),
        }
    }
}

/// Rejects names that would escape the item directory or be unusable as a
/// single path component.
pub fn validate_file_component(value: &str) -> StorageResult<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidFileName(value.to_string()));
    }
    Ok(())
}

/// Moves `from` to `to`, creating the parent of `to`.
///
/// Falls back to copy + remove when a plain rename fails (for example across
/// filesystems). On failure `from` is left in place.
pub fn move_file(from: &Path, to: &Path) -> StorageResult<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| StorageError::io("create directory", parent, source))?;
    }
    let rename_err = match std::fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if !from.is_file() {
        return Err(StorageError::io("move", from, rename_err));
    }

    if let Err(copy_err) = std::fs::copy(from, to) {
        let _ = std::fs::remove_file(to);
        return Err(StorageError::io("copy", from, copy_err));
    }
    if let Err(err) = std::fs::remove_file(from) {
        warn!(
            "event=file_move module=storage status=partial error_code=source_not_removed error={}",
            err
        );
    }
    Ok(())
}

/// Renames `dir/old_name` to `dir/new_name` without overwriting.
///
/// Identical names are a no-op.
pub fn rename_in_place(dir: &Path, old_name: &str, new_name: &str) -> StorageResult<()> {
    if old_name == new_name {
        return Ok(());
    }
    let from = dir.join(old_name);
    let to = dir.join(new_name);
    if !from.exists() {
        return Err(StorageError::io(
            "rename",
            &from,
            io::Error::new(io::ErrorKind::NotFound, "stored file is missing"),
        ));
    }
    if to.exists() {
        return Err(StorageError::TargetExists(to));
    }
    std::fs::rename(&from, &to).map_err(|source| StorageError::io("rename", &from, source))
}

/// Removes a file, treating an already-missing file as success.
///
/// Returns whether something was removed.
pub fn remove_file_if_exists(path: &Path) -> StorageResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::io("remove file", path, err)),
    }
}

/// Removes a directory tree, treating an already-missing tree as success.
pub fn remove_dir_if_exists(path: &Path) -> StorageResult<bool> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::io("remove directory", path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        move_file, remove_file_if_exists, rename_in_place, validate_file_component,
        LibraryLayout, StorageError,
    };
    use crate::derivative::DerivativeKind;
    use crate::hash::ContentId;

    #[test]
    fn layout_paths_follow_library_convention() {
        let layout = LibraryLayout::new("/lib");
        let id = ContentId::of_bytes(b"abc");
        assert_eq!(
            layout.raw_file_path(&id, "cat", "png"),
            std::path::PathBuf::from(format!("/lib/raw_files/{id}/cat.png"))
        );
        assert_eq!(
            layout.derivative_path(DerivativeKind::Preview, &id),
            std::path::PathBuf::from(format!("/lib/previews/{id}.webp"))
        );
        assert_eq!(layout.db_path(), std::path::PathBuf::from("/lib/files.db"));
    }

    #[test]
    fn rename_in_place_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let err = rename_in_place(dir.path(), "a.txt", "b.txt").unwrap_err();
        assert!(matches!(err, StorageError::TargetExists(_)));
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"b");

        rename_in_place(dir.path(), "a.txt", "a.txt").unwrap();
        rename_in_place(dir.path(), "a.txt", "c.txt").unwrap();
        assert!(dir.path().join("c.txt").exists());
    }

    #[test]
    fn move_file_creates_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("staged.bin");
        std::fs::write(&from, b"payload").unwrap();
        let to = dir.path().join("nested").join("deeper").join("final.bin");

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"payload");
    }

    #[test]
    fn remove_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_file_if_exists(&dir.path().join("ghost")).unwrap());
    }

    #[test]
    fn file_components_reject_traversal() {
        assert!(validate_file_component("photo").is_ok());
        assert!(validate_file_component("..").is_err());
        assert!(validate_file_component("a/b").is_err());
        assert!(validate_file_component("").is_err());
    }
}
