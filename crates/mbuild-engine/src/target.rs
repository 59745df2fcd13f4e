//! Targets: named units of work with dependencies, and their run status.

use std::fmt;

use serde::Serialize;

use mbuild_util::error::UtilError;

use crate::context::ActionContext;

/// Work performed by a plain target.
pub type Action = dyn Fn(&ActionContext<'_>) -> Result<(), ActionError> + Send + Sync;

/// Work performed once per key by a parallel target.
pub type FanOutAction = dyn Fn(&ActionContext<'_>, &str) -> Result<(), ActionError> + Send + Sync;

/// Why an action stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The work ran and failed. The target is marked failed and its
    /// dependents do not run; unrelated targets continue.
    #[error("{0}")]
    Failed(String),

    /// A precondition of the whole build is missing (tool, file, directory).
    /// The run is aborted.
    #[error("{0}")]
    Fatal(String),

    /// The run was aborted elsewhere while this action was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

impl From<UtilError> for ActionError {
    fn from(e: UtilError) -> Self {
        match e {
            UtilError::Cancelled { .. } => Self::Cancelled,
            e if e.is_missing_program() => Self::Fatal(e.to_string()),
            e => Self::Failed(e.to_string()),
        }
    }
}

/// Lifecycle of a target within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TargetStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Terminal and not failed: dependents may run.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Whether moving from `self` to `next` is legal.
    ///
    /// A target either runs (`Pending -> Running -> terminal`) or is settled
    /// without running (`Pending -> Failed | Skipped`).
    pub fn can_become(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed | Self::Skipped) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "ok",
            Self::Failed => "FAILED",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) enum Work {
    Noop,
    Single(Box<Action>),
    FanOut {
        keys: Vec<String>,
        action: Box<FanOutAction>,
    },
}

/// A named unit of work.
///
/// ```
/// use mbuild_engine::{ActionError, Target};
///
/// let install = Target::new("install")
///     .depends_on(["build"])
///     .describe("Install the toolchain")
///     .action(|cx| {
///         let _build_dir = cx.results_of("build");
///         Ok::<(), ActionError>(())
///     });
/// assert_eq!(install.dependencies(), ["build"]);
/// ```
pub struct Target {
    name: String,
    dependencies: Vec<String>,
    skip: bool,
    results: Vec<String>,
    description: Option<String>,
    pub(crate) work: Work,
}

impl Target {
    /// A target that does nothing until given an action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            skip: false,
            results: Vec::new(),
            description: None,
            work: Work::Noop,
        }
    }

    /// Add dependencies, by target name. Duplicates are ignored.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.dependencies.contains(&name) {
                self.dependencies.push(name);
            }
        }
        self
    }

    /// Set the work run once per run.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&ActionContext<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.work = Work::Single(Box::new(action));
        self
    }

    /// Make this a parallel target: `action` runs concurrently once per key
    /// and the target succeeds only if every key does.
    pub fn fan_out<I, S, F>(mut self, keys: I, action: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ActionContext<'_>, &str) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.work = Work::FanOut {
            keys: keys.into_iter().map(Into::into).collect(),
            action: Box::new(action),
        };
        self
    }

    /// When set, the target reports `Skipped` and its action never runs.
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Declare an artifact this target produces, visible to dependents.
    pub fn result(mut self, artifact: impl Into<String>) -> Self {
        self.results.push(artifact.into());
        self
    }

    /// Heading used for this target in reports and listings.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.work, Work::FanOut { .. })
    }

    /// Fan-out keys, empty for plain targets.
    pub fn fan_out_keys(&self) -> &[String] {
        match &self.work {
            Work::FanOut { keys, .. } => keys,
            Work::Noop | Work::Single(_) => &[],
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let work = match &self.work {
            Work::Noop => "noop",
            Work::Single(_) => "action",
            Work::FanOut { .. } => "fan-out",
        };
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("skip", &self.skip)
            .field("results", &self.results)
            .field("keys", &self.fan_out_keys())
            .field("work", &work)
            .finish()
    }
}
