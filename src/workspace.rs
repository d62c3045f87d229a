//! Local workspace and archive file handling.
//!
//! Every job works in a temporary directory under the configured workspace
//! root, removed when the [`Workspace`] is dropped. File operations go
//! through `cap_std` directory handles.

use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::TempDir;
use thiserror::Error;

/// Error raised by workspace file operations.
#[derive(Debug, Error)]
#[error("{path}: {message}")]
pub struct WorkspaceError {
    /// Path being operated on.
    pub path: Utf8PathBuf,
    /// Underlying error text.
    pub message: String,
}

impl WorkspaceError {
    fn new(path: &Utf8Path, message: &impl fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// A job's temporary working directory.
#[derive(Debug)]
pub struct Workspace {
    path: Utf8PathBuf,
    _dir: TempDir,
}

impl Workspace {
    /// Creates `hal-<job_id>-*` under `root`, creating `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError`] when the directory cannot be created or
    /// its path is not UTF-8.
    pub fn create(root: &Utf8Path, job_id: &str) -> Result<Self, WorkspaceError> {
        ensure_dir(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("hal-{job_id}-"))
            .tempdir_in(root)
            .map_err(|err| WorkspaceError::new(root, &err))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|raw| WorkspaceError::new(root, &format!("{} is not UTF-8", raw.display())))?;
        Ok(Self { path, _dir: dir })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Creates `path` and any missing parents.
///
/// # Errors
///
/// Returns [`WorkspaceError`] when creation fails.
pub fn ensure_dir(path: &Utf8Path) -> Result<(), WorkspaceError> {
    Dir::create_ambient_dir_all(path, ambient_authority())
        .map_err(|err| WorkspaceError::new(path, &err))
}

/// Removes everything inside `path`, leaving the directory in place.
///
/// # Errors
///
/// Returns [`WorkspaceError`] when the directory cannot be read or an entry
/// cannot be removed.
pub fn clear_dir(path: &Utf8Path) -> Result<(), WorkspaceError> {
    let dir = open_dir(path)?;
    let entries = dir.entries().map_err(|err| WorkspaceError::new(path, &err))?;
    for found in entries {
        let entry = found.map_err(|err| WorkspaceError::new(path, &err))?;
        let name = entry.file_name().map_err(|err| WorkspaceError::new(path, &err))?;
        let file_type = entry.file_type().map_err(|err| WorkspaceError::new(path, &err))?;
        let removed = if file_type.is_dir() {
            dir.remove_dir_all(&name)
        } else {
            dir.remove_file(&name)
        };
        removed.map_err(|err| WorkspaceError::new(&path.join(&name), &err))?;
    }
    Ok(())
}

/// Returns `true` when `path` exists and contains at least one entry.
///
/// # Errors
///
/// Returns [`WorkspaceError`] when the directory exists but cannot be read.
pub fn has_entries(path: &Utf8Path) -> Result<bool, WorkspaceError> {
    match Dir::open_ambient_dir(path, ambient_authority()) {
        Ok(dir) => dir
            .entries()
            .map(|mut entries| entries.next().is_some())
            .map_err(|err| WorkspaceError::new(path, &err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(WorkspaceError::new(path, &err)),
    }
}

/// Returns `true` when the file at `path` exists.
///
/// # Errors
///
/// Returns [`WorkspaceError`] when existence cannot be determined.
pub fn file_exists(path: &Utf8Path) -> Result<bool, WorkspaceError> {
    let (parent, name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir
            .try_exists(name)
            .map_err(|err| WorkspaceError::new(path, &err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(WorkspaceError::new(parent, &err)),
    }
}

/// Removes the file at `path`. Returns `false` when it did not exist.
///
/// # Errors
///
/// Returns [`WorkspaceError`] for failures other than a missing file.
pub fn remove_file_if_exists(path: &Utf8Path) -> Result<bool, WorkspaceError> {
    if !file_exists(path)? {
        return Ok(false);
    }
    let (parent, name) = split(path)?;
    open_dir(parent)?
        .remove_file(name)
        .map(|()| true)
        .map_err(|err| WorkspaceError::new(path, &err))
}

/// Moves `from` to `to`, creating the destination directory. Falls back to
/// copy-and-remove when a rename is not possible.
///
/// # Errors
///
/// Returns [`WorkspaceError`] when neither strategy succeeds.
pub fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), WorkspaceError> {
    let (from_parent, from_name) = split(from)?;
    let (to_parent, to_name) = split(to)?;
    ensure_dir(to_parent)?;
    let source = open_dir(from_parent)?;
    let target = open_dir(to_parent)?;
    if let Err(err) = source.rename(from_name, &target, to_name) {
        tracing::debug!(%from, %to, error = %err, "rename failed, copying instead");
        source
            .copy(from_name, &target, to_name)
            .map_err(|copy_err| WorkspaceError::new(to, &copy_err))?;
        source
            .remove_file(from_name)
            .map_err(|remove_err| WorkspaceError::new(from, &remove_err))?;
    }
    Ok(())
}

fn open_dir(path: &Utf8Path) -> Result<Dir, WorkspaceError> {
    Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| WorkspaceError::new(path, &err))
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), WorkspaceError> {
    let name = path
        .file_name()
        .ok_or_else(|| WorkspaceError::new(path, &"path has no file name"))?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, name))
}
