//! Release packaging: a gzipped tarball of an install tree plus a metadata sidecar.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::UtilError;

/// A release version split into its public version and build identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub build_id: String,
}

impl ReleaseInfo {
    /// Parse `"<version>-<build id>"`, e.g. `"1.4.0-1289"`.
    ///
    /// # Errors
    /// Returns an error if either half is missing or empty.
    pub fn parse(tools_version: &str) -> Result<Self, UtilError> {
        match tools_version.split_once('-') {
            Some((version, build_id)) if !version.is_empty() && !build_id.is_empty() => Ok(Self {
                version: version.to_owned(),
                build_id: build_id.to_owned(),
            }),
            _ => Err(UtilError::InvalidRelease {
                version: tools_version.to_owned(),
            }),
        }
    }
}

/// Package metadata written alongside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub release: ReleaseInfo,
    pub description: String,
    /// Where the package contents land on the target system.
    pub install_root: String,
    pub depends: Vec<String>,
    pub license: String,
}

/// What [`create_package`] produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(flatten)]
    pub info: PackageInfo,
    pub archive: PathBuf,
    pub sha256: String,
    pub files: usize,
}

/// Archive the contents of `source_dir` into `archive_path` (`.tar.gz`) and
/// write `<archive_path>.json` describing it.
///
/// `archive_path` must not live inside `source_dir`.
///
/// # Errors
/// Returns an error if the directory cannot be read or the archive or its
/// metadata cannot be written.
pub fn create_package(
    source_dir: &Path,
    archive_path: &Path,
    info: &PackageInfo,
) -> Result<PackageManifest, UtilError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source| UtilError::Io { path, source }
    };

    if let Some(parent) = archive_path.parent() {
        crate::fs::ensure_dir(parent)?;
    }
    let file = File::create(archive_path).map_err(io_err(archive_path))?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", source_dir)
        .map_err(io_err(source_dir))?;
    let encoder = builder.into_inner().map_err(io_err(archive_path))?;
    encoder.finish().map_err(io_err(archive_path))?;

    let manifest = PackageManifest {
        info: info.clone(),
        archive: archive_path.to_path_buf(),
        sha256: crate::hash::sha256_file(archive_path)?,
        files: count_files(source_dir)?,
    };

    let json = serde_json::to_string_pretty(&manifest).map_err(|e| UtilError::PackageMetadata {
        name: info.name.clone(),
        message: e.to_string(),
    })?;
    crate::fs::write_file(&metadata_path(archive_path), json.as_bytes())?;

    tracing::info!(
        package = %info.name,
        archive = %archive_path.display(),
        files = manifest.files,
        "package created"
    );
    Ok(manifest)
}

/// Path of the metadata sidecar for `archive_path`.
pub fn metadata_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

fn count_files(dir: &Path) -> Result<usize, UtilError> {
    let entries = std::fs::read_dir(dir).map_err(|source| UtilError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|source| UtilError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            count += count_files(&path)?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}
