//! Error types for mbuild-engine.

use crate::report::Report;
use crate::target::TargetStatus;

/// Configuration errors and run aborts.
///
/// Ordinary target failures are not errors; they are statuses in the
/// [`Report`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A goal or default target names no declared target.
    #[error("unknown target `{name}`")]
    UnknownTarget { name: String },

    /// A target depends on a name that was never declared.
    #[error("target `{target}` depends on unknown target `{dependency}`")]
    UnknownDependency { target: String, dependency: String },

    /// Two targets share a name.
    #[error("target `{name}` is declared more than once")]
    DuplicateTarget { name: String },

    /// The dependency relation contains a cycle.
    #[error("dependency cycle detected: {cycle}")]
    DependencyCycle { cycle: String },

    /// No goal was requested and no default targets are set.
    #[error("no goal given and no default targets declared")]
    NoGoals,

    /// A parallel target has nothing to fan out over.
    #[error("parallel target `{target}` has no fan-out keys")]
    EmptyFanOut { target: String },

    /// The engine tried an illegal status change.
    #[error("target `{target}` cannot go from {from} to {to}")]
    InvalidTransition {
        target: String,
        from: TargetStatus,
        to: TargetStatus,
    },

    /// The fan-out worker pool could not be created.
    #[error("cannot start worker pool: {message}")]
    ThreadPool { message: String },

    /// A target hit a fatal error and the run stopped.
    ///
    /// `report` covers every target that had started.
    #[error("run aborted in `{target}`: {message}")]
    Aborted {
        target: String,
        message: String,
        report: Box<Report>,
    },

    /// The report could not be written.
    #[error("cannot write report to {path}: {message}")]
    ReportWrite { path: String, message: String },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] mbuild_util::error::UtilError),
}
