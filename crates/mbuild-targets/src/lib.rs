//! Architecture, variant, and platform keywords for mbuild.
//!
//! Every keyword the build accepts is a closed enum here, parsed once at
//! startup. The per-architecture mapping (configure triple, program prefix,
//! default core list) lives next to the types it is derived from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processor architecture the toolchain is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[default]
    K1,
    K1nsim,
}

/// Build variant: which runtime the toolchain targets, or the debugger itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Nodeos,
    #[default]
    Elf,
    Rtems,
    Linux,
    Gdb,
}

/// Kind of toolchain the build is part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainKind {
    #[default]
    Default,
    Bare,
    Rtems,
    Linux,
    Embedded,
}

/// Where validation programs execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPlatform {
    /// Real hardware through a JTAG runner.
    Hw,
    /// Instruction-set simulator.
    #[default]
    Sim,
}

/// Cores validated when the configuration does not name any.
const DEFAULT_CORES: [&str; 4] = ["k1dp", "k1io", "k1bdp", "k1bio"];

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::K1 => "k1",
            Self::K1nsim => "k1nsim",
        }
    }

    /// The `--target=` triple passed to `configure`.
    pub fn configure_triple(self, variant: Variant) -> String {
        match (self, variant) {
            (Self::K1, Variant::Gdb) => "k1-elf".to_owned(),
            (arch, variant) => format!("{}-{}", arch.as_str(), variant.as_str()),
        }
    }

    /// The `--program-prefix=` for installed tools (e.g. `k1-rtems-`).
    pub fn program_prefix(self, variant: Variant) -> String {
        let arch = self.as_str();
        match (self, variant) {
            (_, Variant::Elf) | (Self::K1, Variant::Gdb) => format!("{arch}-"),
            (_, variant) => format!("{arch}-{}-", variant.as_str()),
        }
    }

    /// Whether `configure` needs `--with-sysroot` for this combination.
    pub fn needs_sysroot(self, variant: Variant) -> bool {
        variant == Variant::Linux
    }

    /// Default list of cores to validate.
    pub fn default_cores(self) -> Vec<String> {
        DEFAULT_CORES.iter().map(|c| (*c).to_owned()).collect()
    }
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nodeos => "nodeos",
            Self::Elf => "elf",
            Self::Rtems => "rtems",
            Self::Linux => "linux",
            Self::Gdb => "gdb",
        }
    }

    /// Whether this variant builds binutils (as opposed to the debugger).
    pub fn is_binutils(self) -> bool {
        self != Self::Gdb
    }
}

impl ToolchainKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Bare => "bare",
            Self::Rtems => "rtems",
            Self::Linux => "linux",
            Self::Embedded => "embedded",
        }
    }
}

impl ExecutionPlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hw => "hw",
            Self::Sim => "sim",
        }
    }

    /// DejaGnu target board used by the testsuite.
    pub fn board(self) -> &'static str {
        match self {
            Self::Hw => "k1-jtag-runner",
            Self::Sim => "k1-iss",
        }
    }

    /// Reference summary file the testsuite results are compared against.
    pub fn reference_summary(self) -> &'static str {
        match self {
            Self::Hw => "gdb.sum.hw.ref",
            Self::Sim => "gdb.sum.ref",
        }
    }
}

macro_rules! keyword_impls {
    ($ty:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = TargetError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(TargetError::UnknownKeyword {
                    kind: $kind,
                    value: s.to_owned(),
                    expected: [$($ty::$variant.as_str()),+].join(", "),
                })
            }
        }
    };
}

keyword_impls!(Arch, "architecture", [K1, K1nsim]);
keyword_impls!(Variant, "variant", [Nodeos, Elf, Rtems, Linux, Gdb]);
keyword_impls!(ToolchainKind, "toolchain", [Default, Bare, Rtems, Linux, Embedded]);
keyword_impls!(ExecutionPlatform, "execution platform", [Hw, Sim]);

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("unknown {kind} `{value}` (expected one of: {expected})")]
    UnknownKeyword {
        kind: &'static str,
        value: String,
        expected: String,
    },
}
