//! Target graph, dependency resolution, and execution engine for mbuild.

pub mod builder;
pub mod context;
pub mod error;
mod fanout;
pub mod report;
mod resolve;
pub mod target;

pub use builder::{Builder, DependencyFailurePolicy, RunOptions};
pub use context::{ActionContext, Check, CommandRecord, RunContext};
pub use error::EngineError;
pub use report::{BranchReport, Report, ReportEntry, RunStatus};
pub use target::{ActionError, Target, TargetStatus};
