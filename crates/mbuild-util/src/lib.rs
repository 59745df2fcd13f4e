#![forbid(unsafe_code)]
//! Command execution, filesystem, git, packaging, and regression helpers for mbuild.

pub mod diff;
pub mod error;
pub mod fs;
pub mod git;
pub mod hash;
pub mod package;
pub mod process;
pub mod regtest;
