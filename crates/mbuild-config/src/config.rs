use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use mbuild_targets::{Arch, ExecutionPlatform, ToolchainKind, Variant};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "mbuild.toml";

/// Typed build configuration, resolved once at startup.
///
/// Every field is optional in `mbuild.toml`; missing fields take the defaults
/// below and command-line flags override file values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub arch: Arch,
    pub variant: Variant,
    pub toolchain: ToolchainKind,
    pub execution_platform: ExecutionPlatform,
    /// Root every relative checkout path is resolved against.
    pub workspace: PathBuf,
    /// Source checkout, relative to `workspace`.
    pub clone: PathBuf,
    /// Cores to validate; `None` selects the architecture default.
    pub cores: Option<Vec<String>>,
    /// Processor description checkout, relative to `workspace`.
    pub processor: PathBuf,
    pub toolroot: Option<PathBuf>,
    /// Where the debugger and simulator are installed; defaults to `toolroot`.
    pub debug_prefix: Option<PathBuf>,
    /// Version of the delivered tools, `<version>-<build id>` for packaging.
    pub version: String,
    /// Install prefix; empty means `<build dir>/release`.
    pub prefix: PathBuf,
    /// Staging prefix for packages; defaults to `prefix`.
    pub pkg_prefix: Option<PathBuf>,
    pub host: String,
    pub sysroot: PathBuf,
    /// Parallelism for `make -j` and fan-out targets; defaults to the CPU count.
    pub jobs: Option<usize>,
    pub license: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            arch: Arch::default(),
            variant: Variant::default(),
            toolchain: ToolchainKind::default(),
            execution_platform: ExecutionPlatform::default(),
            workspace: PathBuf::from("."),
            clone: PathBuf::from("."),
            cores: None,
            processor: PathBuf::from("processor"),
            toolroot: None,
            debug_prefix: None,
            version: "unknown".to_owned(),
            prefix: PathBuf::from("devimage"),
            pkg_prefix: None,
            host: "x86".to_owned(),
            sysroot: PathBuf::from("sysroot"),
            jobs: None,
            license: "GPL-3.0-or-later".to_owned(),
        }
    }
}

impl BuildConfig {
    /// Read and parse an `mbuild.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, contains invalid TOML, or
    /// fails validation.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: BuildConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check values that the type system cannot.
    ///
    /// # Errors
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "jobs",
                message: "must be at least 1".to_owned(),
            });
        }
        if let Some(cores) = &self.cores {
            if cores.is_empty() || cores.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    field: "cores",
                    message: "core names must be non-empty".to_owned(),
                });
            }
        }
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                message: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    /// Effective parallelism.
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }

    /// Effective core list.
    pub fn cores(&self) -> Vec<String> {
        self.cores
            .clone()
            .unwrap_or_else(|| self.arch.default_cores())
    }
}

/// Split a comma-separated core list as given on the command line.
pub fn parse_core_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid mbuild.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}
