//! Parse and validate `mbuild.toml` and derive the build's path layout.

pub mod config;
pub mod layout;

pub use config::{BuildConfig, ConfigError};
pub use layout::Layout;
