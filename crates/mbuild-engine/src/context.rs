//! Run-wide and per-action context handed to target actions.
//!
//! Everything an action may consult is passed in explicitly: the command
//! runner, the base environment, results declared by dependencies, and the
//! run's cancel token. Output captured by an action stays in its own
//! [`ActionContext`], so fan-out branches never share capture buffers.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use mbuild_util::process::{CancelToken, CommandOutput, CommandRunner, CommandSpec};

use crate::target::{ActionError, TargetStatus};

/// Lines of a failing command's stderr kept in the report.
const STDERR_TAIL_LINES: usize = 10;

/// Collaborators shared by every action of a run.
#[derive(Clone)]
pub struct RunContext {
    runner: Arc<dyn CommandRunner>,
    env: BTreeMap<String, String>,
}

impl RunContext {
    pub fn new(runner: impl CommandRunner + 'static) -> Self {
        Self::with_runner(Arc::new(runner))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            env: BTreeMap::new(),
        }
    }

    /// Set a variable for every command; a command's own value wins.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext").field("env", &self.env).finish()
    }
}

/// Outcome of one command run through an [`ActionContext`].
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub skipped: bool,
    pub duration: Duration,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
}

/// How a validation command is judged and reported.
#[derive(Debug, Clone, Default)]
pub struct Check {
    fail_msg: Option<String>,
    success_msg: Option<String>,
    skip: bool,
}

impl Check {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostic recorded when the validation fails.
    pub fn fail_msg(mut self, message: impl Into<String>) -> Self {
        self.fail_msg = Some(message.into());
        self
    }

    /// Note recorded when the validation passes.
    pub fn success_msg(mut self, message: impl Into<String>) -> Self {
        self.success_msg = Some(message.into());
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }
}

#[derive(Debug, Default)]
struct Capture {
    commands: Vec<CommandRecord>,
    notes: Vec<String>,
    failures: Vec<String>,
    results: Vec<String>,
}

/// The view of the run a single action (or fan-out branch) gets.
pub struct ActionContext<'a> {
    target: &'a str,
    key: Option<&'a str>,
    run: &'a RunContext,
    cancel: &'a CancelToken,
    upstream: &'a HashMap<String, Vec<String>>,
    capture: RefCell<Capture>,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(
        target: &'a str,
        key: Option<&'a str>,
        run: &'a RunContext,
        cancel: &'a CancelToken,
        upstream: &'a HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            target,
            key,
            run,
            cancel,
            upstream,
            capture: RefCell::new(Capture::default()),
        }
    }

    /// Name of the running target.
    pub fn target(&self) -> &str {
        self.target
    }

    /// Fan-out key, for branches of a parallel target.
    pub fn key(&self) -> Option<&str> {
        self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a command; a non-zero exit fails the action.
    ///
    /// # Errors
    /// `Failed` on non-zero exit, `Fatal` if the program does not exist,
    /// `Cancelled` if the run was aborted.
    pub fn run(&self, cmd: CommandSpec) -> Result<CommandOutput, ActionError> {
        self.run_unless(cmd, false)
    }

    /// Run a command unless `skip` is set, in which case it succeeds without running.
    ///
    /// # Errors
    /// Same as [`ActionContext::run`].
    pub fn run_unless(&self, cmd: CommandSpec, skip: bool) -> Result<CommandOutput, ActionError> {
        let (display, output) = self.execute(cmd, skip)?;
        if output.success {
            Ok(output)
        } else {
            Err(ActionError::Failed(format!(
                "`{display}` {}",
                exit_description(output.exit_code)
            )))
        }
    }

    /// Run a validation command. A failure is recorded against the target but
    /// the action keeps going, so one run reports every failing check.
    ///
    /// Returns whether the validation passed.
    ///
    /// # Errors
    /// `Fatal` if the program does not exist, `Cancelled` if the run was aborted.
    pub fn valid(&self, cmd: CommandSpec, check: &Check) -> Result<bool, ActionError> {
        let (display, output) = self.execute(cmd, check.skip)?;
        if output.success {
            if let Some(message) = &check.success_msg {
                self.note(message.clone());
            }
            return Ok(true);
        }
        let message = check
            .fail_msg
            .clone()
            .unwrap_or_else(|| format!("`{display}` {}", exit_description(output.exit_code)));
        self.fail(message);
        Ok(false)
    }

    /// Record a check that does not involve a command. Returns `ok`.
    pub fn check(&self, ok: bool, fail_msg: impl Into<String>) -> bool {
        if !ok {
            self.fail(fail_msg);
        }
        ok
    }

    /// Record a validation failure; the target fails once the action returns.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target_name = self.target, key = ?self.key, "{message}");
        self.capture.borrow_mut().failures.push(message);
    }

    /// Add a line to the captured log.
    pub fn note(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target_name = self.target, key = ?self.key, "{line}");
        self.capture.borrow_mut().notes.push(line);
    }

    /// Abort the run unless `path` is an existing file.
    ///
    /// # Errors
    /// Returns `Fatal` naming `what` and the path.
    pub fn require_file(&self, path: &Path, what: &str) -> Result<(), ActionError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(ActionError::Fatal(format!(
                "{what} not found at {}",
                path.display()
            )))
        }
    }

    /// Abort the run unless `path` is an existing directory.
    ///
    /// # Errors
    /// Returns `Fatal` naming `what` and the path.
    pub fn require_dir(&self, path: &Path, what: &str) -> Result<(), ActionError> {
        if path.is_dir() {
            Ok(())
        } else {
            Err(ActionError::Fatal(format!(
                "{what} directory {} does not exist",
                path.display()
            )))
        }
    }

    /// Publish an artifact for dependents of this target.
    pub fn add_result(&self, artifact: impl Into<String>) {
        self.capture.borrow_mut().results.push(artifact.into());
    }

    /// Artifacts published by `target`, which must have run earlier.
    pub fn results_of(&self, target: &str) -> &'a [String] {
        self.upstream.get(target).map_or(&[], Vec::as_slice)
    }

    fn execute(
        &self,
        cmd: CommandSpec,
        skip: bool,
    ) -> Result<(String, CommandOutput), ActionError> {
        if self.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }
        let mut spec = cmd;
        for (key, value) in &self.run.env {
            if !spec.environment().contains_key(key) {
                spec = spec.env(key.clone(), value.clone());
            }
        }
        let display = spec.to_string();
        let start = Instant::now();
        let output = self.run.runner().execute(&spec, skip, self.cancel)?;
        let record = CommandRecord {
            command: display.clone(),
            working_dir: spec.working_dir().map(Path::to_path_buf),
            exit_code: output.exit_code,
            success: output.success,
            skipped: output.skipped,
            duration: start.elapsed(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        };
        self.capture.borrow_mut().commands.push(record);
        Ok((display, output))
    }

    /// Settle the action's result into a status and its diagnostics.
    pub(crate) fn finish(self, result: Result<(), ActionError>) -> Execution {
        let capture = self.capture.into_inner();
        let mut diagnostics = capture.failures.clone();
        let mut fatal = None;

        let status = match result {
            Ok(()) if capture.failures.is_empty() => TargetStatus::Succeeded,
            Ok(()) => TargetStatus::Failed,
            Err(ActionError::Failed(message)) => {
                diagnostics.push(message);
                diagnostics.extend(stderr_tail(&capture.commands));
                TargetStatus::Failed
            }
            Err(ActionError::Cancelled) => {
                diagnostics.push("cancelled".to_owned());
                TargetStatus::Failed
            }
            Err(ActionError::Fatal(message)) => {
                diagnostics.push(message.clone());
                fatal = Some(message);
                TargetStatus::Failed
            }
        };

        Execution {
            status,
            diagnostics,
            fatal,
            log: render_log(&capture),
            results: capture.results,
            commands: capture.commands,
        }
    }
}

/// What one action (or branch) produced.
#[derive(Debug)]
pub(crate) struct Execution {
    pub status: TargetStatus,
    pub diagnostics: Vec<String>,
    pub fatal: Option<String>,
    pub results: Vec<String>,
    pub commands: Vec<CommandRecord>,
    /// Full captured output, ready to be written to a log file.
    pub log: String,
}

impl Execution {
    pub(crate) fn succeeded() -> Self {
        Self {
            status: TargetStatus::Succeeded,
            diagnostics: Vec::new(),
            fatal: None,
            results: Vec::new(),
            commands: Vec::new(),
            log: String::new(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            status: TargetStatus::Failed,
            diagnostics: vec!["cancelled".to_owned()],
            ..Self::succeeded()
        }
    }
}

fn exit_description(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_owned(),
    }
}

fn stderr_tail(commands: &[CommandRecord]) -> Vec<String> {
    let Some(last) = commands.iter().rev().find(|c| !c.success) else {
        return Vec::new();
    };
    let lines: Vec<&str> = last.stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines
        .get(start..)
        .unwrap_or_default()
        .iter()
        .map(|l| format!("| {l}"))
        .collect()
}

fn render_log(capture: &Capture) -> String {
    let mut log = String::new();
    for record in &capture.commands {
        let _ = writeln!(log, "$ {}", record.command);
        if record.skipped {
            let _ = writeln!(log, "(skipped)");
            continue;
        }
        log.push_str(&record.stdout);
        log.push_str(&record.stderr);
        let _ = writeln!(
            log,
            "[{} in {:.2}s]",
            exit_description(record.exit_code),
            record.duration.as_secs_f64()
        );
    }
    for note in &capture.notes {
        let _ = writeln!(log, "{note}");
    }
    for failure in &capture.failures {
        let _ = writeln!(log, "FAILED: {failure}");
    }
    log
}
