//! Read-only git metadata used to stamp version strings.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::process::run_command;

/// Placeholder used when git metadata cannot be determined.
pub const UNKNOWN_REVISION: &str = "unknown";

/// A source checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Short hash of `HEAD`, or [`UNKNOWN_REVISION`] if it cannot be read.
    pub fn current_revision(&self) -> String {
        self.git(&["rev-parse", "--verify", "--short", "HEAD"])
            .filter(|rev| !rev.is_empty())
            .unwrap_or_else(|| UNKNOWN_REVISION.to_owned())
    }

    /// Whether tracked files differ from `HEAD`. Unknown state counts as clean.
    pub fn is_dirty(&self) -> bool {
        self.git(&["diff-index", "--name-only", "HEAD"])
            .is_some_and(|changed| !changed.is_empty())
    }

    /// `"<base> <revision>"`, suffixed with `-dirty` for a modified checkout.
    pub fn version_stamp(&self, base: &str) -> String {
        let mut stamp = format!("{base} {}", self.current_revision());
        if self.is_dirty() {
            stamp.push_str("-dirty");
        }
        stamp
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = run_command(Command::new("git").args(args).current_dir(&self.path));
        match output {
            Ok(output) if output.success => Some(output.stdout.trim().to_owned()),
            Ok(output) => {
                tracing::debug!(args = ?args, stderr = %output.stderr.trim(), "git query failed");
                None
            }
            Err(e) => {
                tracing::debug!(args = ?args, error = %e, "git unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn non_repository_degrades_to_unknown() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::new(tmp.path());
        assert_eq!(repo.current_revision(), UNKNOWN_REVISION);
        assert!(!repo.is_dirty());
        assert_eq!(repo.version_stamp("4.2"), "4.2 unknown");
    }

    #[test]
    fn missing_directory_degrades_to_unknown() {
        let repo = Repository::new("/nonexistent/checkout");
        assert_eq!(repo.current_revision(), UNKNOWN_REVISION);
    }
}
