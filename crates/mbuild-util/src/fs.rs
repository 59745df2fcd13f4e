//! Filesystem utilities for mbuild.

use std::path::{Path, PathBuf};

use crate::error::UtilError;

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Recursively copy the contents of `src` into `dest`, overwriting files.
///
/// Symlinks are recreated as symlinks with the same target, never followed, so
/// a link to a directory is not descended into. Returns the number of files
/// and links copied.
///
/// # Errors
/// Returns an error if `src` cannot be read or any file cannot be written.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize, UtilError> {
    ensure_dir(dest)?;
    let entries = std::fs::read_dir(src).map_err(|source| UtilError::Io {
        path: src.display().to_string(),
        source,
    })?;

    let mut copied = 0;
    for entry in entries {
        let entry = entry.map_err(|source| UtilError::Io {
            path: src.display().to_string(),
            source,
        })?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|source| UtilError::Io {
            path: from.display().to_string(),
            source,
        })?;
        if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
            copied += 1;
        } else if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|source| UtilError::Io {
                path: to.display().to_string(),
                source,
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Recreate the link at `from` as `to`, replacing whatever `to` was.
#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), UtilError> {
    let target = std::fs::read_link(from).map_err(|source| UtilError::Io {
        path: from.display().to_string(),
        source,
    })?;
    if to.symlink_metadata().is_ok_and(|m| m.is_dir()) {
        remove_dir_all_if_exists(to)?;
    } else {
        match std::fs::remove_file(to) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(UtilError::Io {
                    path: to.display().to_string(),
                    source,
                })
            }
        }
    }
    std::os::unix::fs::symlink(&target, to).map_err(|source| UtilError::Io {
        path: to.display().to_string(),
        source,
    })
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), UtilError> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|source| UtilError::Io {
            path: to.display().to_string(),
            source,
        })
}

/// Files matching a glob `pattern`, sorted by path.
///
/// # Errors
/// Returns an error if the pattern is invalid.
pub fn glob_files(pattern: &str) -> Result<Vec<PathBuf>, UtilError> {
    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| UtilError::GlobPattern {
            pattern: pattern.to_owned(),
            message: e.to_string(),
        })?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Write `contents` to `path`, creating parent directories.
///
/// # Errors
/// Returns an error if the directory or file cannot be written.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<(), UtilError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, contents).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Read a UTF-8 text file.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string(path: &Path) -> Result<String, UtilError> {
    std::fs::read_to_string(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}
