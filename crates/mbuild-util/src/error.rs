//! Error types for mbuild-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    /// A command could not be spawned or waited on.
    #[error("cannot execute `{program}`: {source}")]
    CommandExec {
        program: String,
        source: std::io::Error,
    },

    /// A command was killed because the run was cancelled.
    #[error("`{program}` was cancelled")]
    Cancelled { program: String },

    /// Package metadata could not be serialized.
    #[error("cannot write package metadata for {name}: {message}")]
    PackageMetadata { name: String, message: String },

    /// A version string does not have the `<version>-<build>` shape.
    #[error("invalid release version \"{version}\": expected <version>-<build id>")]
    InvalidRelease { version: String },
}

impl UtilError {
    /// Whether this error means an external program is missing from the system.
    pub fn is_missing_program(&self) -> bool {
        matches!(
            self,
            Self::CommandExec { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}
