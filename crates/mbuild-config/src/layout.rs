//! Paths derived from a [`BuildConfig`].

use std::path::{Path, PathBuf};

use mbuild_targets::{Arch, Variant};

use crate::config::BuildConfig;

/// Every directory the pipeline touches, computed once from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Source checkout.
    pub source: PathBuf,
    /// Out-of-tree build directory, `<source>/<arch>_build_<variant>_<host>`.
    pub build: PathBuf,
    /// Install prefix.
    pub prefix: PathBuf,
    /// Staging prefix for packages.
    pub pkg_prefix: PathBuf,
    /// Debugger install tree inside the staging prefix.
    pub gdb_install: PathBuf,
    pub toolroot: Option<PathBuf>,
    /// Where the debugger is copied after install.
    pub debug_prefix: Option<PathBuf>,
    /// `<processor>/<arch>-family`.
    pub family: PathBuf,
    /// Machine-description reference tests, absent for the debugger build.
    pub mds_gbu: Option<PathBuf>,
}

impl Layout {
    pub fn new(config: &BuildConfig) -> Self {
        let arch = config.arch;
        let source = config.workspace.join(&config.clone);
        let build = source.join(format!(
            "{}_build_{}_{}",
            arch.as_str(),
            config.variant.as_str(),
            config.host
        ));
        let prefix = if config.prefix.as_os_str().is_empty() {
            build.join("release")
        } else {
            config.prefix.clone()
        };
        let pkg_prefix = config
            .pkg_prefix
            .clone()
            .unwrap_or_else(|| prefix.clone());
        let gdb_install = pkg_prefix.join("gdb").join("devimage");
        let debug_prefix = config
            .debug_prefix
            .clone()
            .or_else(|| config.toolroot.clone());
        let family = config
            .workspace
            .join(&config.processor)
            .join(format!("{}-family", arch.as_str()));
        let mds_gbu = has_mds_tests(arch, config.variant)
            .then(|| family.join("BE").join("GBU").join(arch.as_str()));

        Self {
            source,
            build,
            prefix,
            pkg_prefix,
            gdb_install,
            toolroot: config.toolroot.clone(),
            debug_prefix,
            family,
            mds_gbu,
        }
    }

    /// Testsuite directory inside the build tree.
    pub fn build_testsuite(&self) -> PathBuf {
        self.build.join("gdb").join("testsuite")
    }

    /// Testsuite sources inside the checkout.
    pub fn source_testsuite(&self) -> PathBuf {
        self.source.join("gdb").join("testsuite")
    }

    /// Per-core scratch directory for validation output.
    pub fn core_dir(&self, core: &str) -> PathBuf {
        self.build.join(core)
    }

    /// `bin` directories searched before the inherited `PATH` by the testsuite.
    pub fn test_path(&self) -> Vec<PathBuf> {
        [self.debug_prefix.as_deref(), self.toolroot.as_deref()]
            .into_iter()
            .flatten()
            .map(|p: &Path| p.join("bin"))
            .collect()
    }
}

fn has_mds_tests(arch: Arch, variant: Variant) -> bool {
    !(arch == Arch::K1 && variant == Variant::Gdb)
}
