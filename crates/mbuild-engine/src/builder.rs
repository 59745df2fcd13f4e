//! The target graph and its execution engine.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::ThreadPool;

use mbuild_util::process::CancelToken;

use crate::context::{ActionContext, Execution, RunContext};
use crate::error::EngineError;
use crate::fanout;
use crate::report::{BranchReport, Report, ReportEntry};
use crate::resolve::resolve_order;
use crate::target::{Target, TargetStatus, Work};

/// What happens to a target whose dependency failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyFailurePolicy {
    /// Mark it failed without running it.
    #[default]
    Fail,
    /// Mark it skipped without running it; its own dependents are skipped too.
    Skip,
}

/// Options controlling one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on concurrently running fan-out branches.
    pub jobs: usize,
    /// Stop starting new targets after the first failure.
    pub fail_fast: bool,
    pub on_dependency_failure: DependencyFailurePolicy,
    /// Where per-target logs of captured command output are written.
    pub log_dir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            fail_fast: false,
            on_dependency_failure: DependencyFailurePolicy::default(),
            log_dir: None,
        }
    }
}

/// A static set of targets wired by name, run on request.
///
/// The graph is fixed once built; every call to [`Builder::run`] starts from
/// fresh `Pending` statuses.
#[derive(Debug)]
pub struct Builder {
    name: String,
    session: Option<String>,
    targets: Vec<Target>,
    index: HashMap<String, usize>,
    default_targets: Vec<String>,
}

impl Builder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session: None,
            targets: Vec::new(),
            index: HashMap::new(),
            default_targets: Vec::new(),
        }
    }

    /// Label the session in reports (e.g. the architecture being built).
    pub fn set_session(&mut self, label: impl Into<String>) {
        self.session = Some(label.into());
    }

    /// Declare a target. Dependencies may name targets declared later.
    ///
    /// # Errors
    /// Returns an error if a target with the same name already exists.
    pub fn add(&mut self, target: Target) -> Result<(), EngineError> {
        if self.index.contains_key(target.name()) {
            return Err(EngineError::DuplicateTarget {
                name: target.name().to_owned(),
            });
        }
        self.index
            .insert(target.name().to_owned(), self.targets.len());
        self.targets.push(target);
        Ok(())
    }

    /// Goals used when a run names none.
    ///
    /// # Errors
    /// Returns an error if any name is not a declared target.
    pub fn set_default_targets<I, S>(&mut self, names: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if let Some(unknown) = names.iter().find(|n| !self.index.contains_key(*n)) {
            return Err(EngineError::UnknownTarget {
                name: unknown.clone(),
            });
        }
        self.default_targets = names;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_targets(&self) -> &[String] {
        &self.default_targets
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.index.get(name).and_then(|i| self.targets.get(*i))
    }

    /// Targets in declaration order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    /// Execution order for `goals` (or the defaults when empty):
    /// dependencies first, each target once.
    ///
    /// # Errors
    /// Returns an error for unknown goals or dependencies, a dependency
    /// cycle, or when no goal is given and no defaults exist.
    pub fn resolve<S: AsRef<str>>(&self, goals: &[S]) -> Result<Vec<&Target>, EngineError> {
        let names: Vec<&str> = if goals.is_empty() {
            self.default_targets.iter().map(String::as_str).collect()
        } else {
            goals.iter().map(AsRef::as_ref).collect()
        };
        if names.is_empty() {
            return Err(EngineError::NoGoals);
        }

        let goal_indices = names
            .iter()
            .map(|name| {
                self.index
                    .get(*name)
                    .copied()
                    .ok_or_else(|| EngineError::UnknownTarget {
                        name: (*name).to_owned(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let order = resolve_order(&self.targets, &self.index, &goal_indices)?;
        Ok(order
            .into_iter()
            .filter_map(|i| self.targets.get(i))
            .collect())
    }

    /// Run `goals` (or the defaults when empty) and report every target.
    ///
    /// Targets run one at a time in resolved order; only the branches of a
    /// parallel target run concurrently. A failed target does not stop
    /// independent targets, but its dependents never run.
    ///
    /// # Errors
    /// Configuration errors are returned before any target runs. A fatal
    /// action error returns [`EngineError::Aborted`] with the partial report.
    pub fn run<S: AsRef<str>>(
        &self,
        goals: &[S],
        cx: &RunContext,
        options: &RunOptions,
    ) -> Result<Report, EngineError> {
        let order = self.resolve(goals)?;
        if let Some(empty) = order
            .iter()
            .find(|t| t.is_parallel() && t.fan_out_keys().is_empty())
        {
            return Err(EngineError::EmptyFanOut {
                target: empty.name().to_owned(),
            });
        }

        tracing::info!(
            builder = %self.name,
            targets = order.len(),
            "resolved {}",
            order.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
        );

        let mut session = Session::new(self, cx, options);
        for target in order {
            session.step(target)?;
        }
        Ok(session.into_report(None))
    }
}

/// Mutable state of one run.
struct Session<'b> {
    builder: &'b Builder,
    cx: &'b RunContext,
    options: &'b RunOptions,
    cancel: CancelToken,
    status: HashMap<&'b str, TargetStatus>,
    /// Targets that did not run because something upstream failed.
    blocked: HashSet<&'b str>,
    /// Artifacts published so far, by target.
    results: HashMap<String, Vec<String>>,
    entries: Vec<ReportEntry>,
    pool: Option<ThreadPool>,
    any_failure: bool,
    started: Instant,
}

impl<'b> Session<'b> {
    fn new(builder: &'b Builder, cx: &'b RunContext, options: &'b RunOptions) -> Self {
        Self {
            builder,
            cx,
            options,
            cancel: CancelToken::new(),
            status: builder
                .targets
                .iter()
                .map(|t| (t.name(), TargetStatus::Pending))
                .collect(),
            blocked: HashSet::new(),
            results: builder
                .targets
                .iter()
                .map(|t| (t.name().to_owned(), t.results().to_vec()))
                .collect(),
            entries: Vec::new(),
            pool: None,
            any_failure: false,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, target: &'b Target, next: TargetStatus) -> Result<(), EngineError> {
        let current = self
            .status
            .get(target.name())
            .copied()
            .unwrap_or(TargetStatus::Pending);
        if !current.can_become(next) {
            return Err(EngineError::InvalidTransition {
                target: target.name().to_owned(),
                from: current,
                to: next,
            });
        }
        self.status.insert(target.name(), next);
        Ok(())
    }

    fn failed_dependency(&self, target: &Target) -> Option<&'b str> {
        target.dependencies().iter().find_map(|dep| {
            let (name, status) = self.status.get_key_value(dep.as_str())?;
            (*status == TargetStatus::Failed || self.blocked.contains(name)).then_some(*name)
        })
    }

    fn step(&mut self, target: &'b Target) -> Result<(), EngineError> {
        let span = tracing::info_span!("target", name = %target.name());
        let _enter = span.enter();

        if let Some(dep) = self.failed_dependency(target) {
            let status = match self.options.on_dependency_failure {
                DependencyFailurePolicy::Fail => TargetStatus::Failed,
                DependencyFailurePolicy::Skip => TargetStatus::Skipped,
            };
            tracing::warn!(dependency = dep, "not run: dependency failed");
            self.blocked.insert(target.name());
            return self.settle(target, status, format!("dependency `{dep}` failed"));
        }
        if self.options.fail_fast && self.any_failure {
            return self.settle(
                target,
                TargetStatus::Skipped,
                "not run after earlier failure".to_owned(),
            );
        }
        if target.is_skipped() {
            tracing::info!("skipped");
            return self.settle(target, TargetStatus::Skipped, "skip flag set".to_owned());
        }

        self.transition(target, TargetStatus::Running)?;
        tracing::info!(description = target.description().unwrap_or(""), "running");
        let start = Instant::now();

        let (execution, branches) = match &target.work {
            Work::Noop => (Execution::succeeded(), Vec::new()),
            Work::Single(action) => {
                let actx =
                    ActionContext::new(target.name(), None, self.cx, &self.cancel, &self.results);
                let result = action(&actx);
                (actx.finish(result), Vec::new())
            }
            Work::FanOut { keys, action } => {
                self.ensure_pool()?;
                let Some(pool) = self.pool.as_ref() else {
                    return Err(EngineError::ThreadPool {
                        message: "worker pool unavailable".to_owned(),
                    });
                };
                let branches = fanout::run_branches(
                    pool,
                    target.name(),
                    keys,
                    action.as_ref(),
                    self.cx,
                    &self.cancel,
                    &self.results,
                );
                self.merge_branches(target, branches)
            }
        };
        let duration = start.elapsed();

        self.transition(target, execution.status)?;
        if execution.status == TargetStatus::Failed {
            self.any_failure = true;
            tracing::warn!(elapsed = ?duration, "failed");
        } else {
            tracing::info!(elapsed = ?duration, "finished");
        }

        let log = if target.is_parallel() {
            None
        } else {
            self.write_log(target.name(), None, &execution.log)
        };
        if let Some(published) = self.results.get_mut(target.name()) {
            published.extend(execution.results.iter().cloned());
        }
        self.entries.push(ReportEntry {
            name: target.name().to_owned(),
            description: target.description().map(str::to_owned),
            status: execution.status,
            duration: Some(duration),
            reason: None,
            diagnostics: execution.diagnostics,
            commands: execution.commands,
            branches,
            log,
        });

        if let Some(message) = execution.fatal {
            self.cancel.cancel();
            tracing::error!("{message}");
            let report = self.report_so_far(Some(message.clone()));
            return Err(EngineError::Aborted {
                target: target.name().to_owned(),
                message,
                report: Box::new(report),
            });
        }
        Ok(())
    }

    /// Record a target that ends without its action running.
    fn settle(
        &mut self,
        target: &'b Target,
        status: TargetStatus,
        reason: String,
    ) -> Result<(), EngineError> {
        self.transition(target, status)?;
        self.entries.push(ReportEntry::not_run(
            target.name(),
            target.description(),
            status,
            reason,
        ));
        Ok(())
    }

    /// The pool is only built once a parallel target actually runs.
    fn ensure_pool(&mut self) -> Result<(), EngineError> {
        if self.pool.is_none() {
            let pool = fanout::pool(self.options.jobs).map_err(|e| EngineError::ThreadPool {
                message: e.to_string(),
            })?;
            self.pool = Some(pool);
        }
        Ok(())
    }

    /// Reduce branch outcomes to one target execution (AND of all branches).
    fn merge_branches(
        &self,
        target: &Target,
        branches: Vec<fanout::Branch>,
    ) -> (Execution, Vec<BranchReport>) {
        let mut merged = Execution::succeeded();
        let mut reports = Vec::with_capacity(branches.len());

        for branch in branches {
            let execution = branch.execution;
            if execution.status == TargetStatus::Failed {
                merged.status = TargetStatus::Failed;
            }
            if merged.fatal.is_none() {
                merged.fatal = execution
                    .fatal
                    .as_ref()
                    .map(|m| format!("{}: {m}", branch.key));
            }
            merged.results.extend(execution.results);
            let log = self.write_log(target.name(), Some(&branch.key), &execution.log);
            reports.push(BranchReport {
                key: branch.key,
                status: execution.status,
                duration: branch.duration,
                diagnostics: execution.diagnostics,
                commands: execution.commands,
                log,
            });
        }

        let failed: Vec<&str> = reports
            .iter()
            .filter(|b| b.status == TargetStatus::Failed)
            .map(|b| b.key.as_str())
            .collect();
        if !failed.is_empty() {
            merged
                .diagnostics
                .push(format!("failed for {}", failed.join(", ")));
        }
        (merged, reports)
    }

    fn write_log(&self, target: &str, key: Option<&str>, contents: &str) -> Option<PathBuf> {
        let dir = self.options.log_dir.as_deref()?;
        let path = log_path(dir, target, key);
        match mbuild_util::fs::write_file(&path, contents.as_bytes()) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "cannot write target log");
                None
            }
        }
    }

    fn report_so_far(&self, aborted: Option<String>) -> Report {
        Report::new(
            &self.builder.name,
            self.builder.session.as_deref(),
            self.entries.clone(),
            self.started.elapsed(),
            aborted,
        )
    }

    fn into_report(self, aborted: Option<String>) -> Report {
        Report::new(
            &self.builder.name,
            self.builder.session.as_deref(),
            self.entries,
            self.started.elapsed(),
            aborted,
        )
    }
}

fn log_path(dir: &Path, target: &str, key: Option<&str>) -> PathBuf {
    match key {
        Some(key) => dir.join(format!("{target}.{key}.log")),
        None => dir.join(format!("{target}.log")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mbuild_util::error::UtilError;
    use mbuild_util::process::{CommandOutput, CommandRunner, CommandSpec};

    use super::*;
    use crate::context::Check;
    use crate::target::ActionError;

    /// Records every spawned program; `false` exits 1, anything else succeeds.
    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
    }

    impl CommandRunner for FakeRunner {
        fn execute(
            &self,
            spec: &CommandSpec,
            skip: bool,
            _cancel: &CancelToken,
        ) -> Result<CommandOutput, UtilError> {
            if skip {
                return Ok(CommandOutput::skipped());
            }
            self.calls.lock().unwrap().push(spec.program().to_owned());
            let ok = spec.program() != "false";
            Ok(CommandOutput {
                stdout: format!("{} ran\n", spec.program()),
                success: ok,
                exit_code: Some(if ok { 0 } else { 1 }),
                ..CommandOutput::default()
            })
        }
    }

    type Trace = Arc<Mutex<Vec<String>>>;

    fn context() -> (RunContext, Arc<FakeRunner>) {
        let runner = Arc::new(FakeRunner::default());
        (RunContext::with_runner(runner.clone()), runner)
    }

    fn sequential() -> RunOptions {
        RunOptions {
            jobs: 4,
            ..RunOptions::default()
        }
    }

    fn traced(name: &str, trace: &Trace) -> Target {
        let trace = Arc::clone(trace);
        let label = name.to_owned();
        Target::new(name).action(move |_| {
            trace.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    fn failing(name: &str, trace: &Trace) -> Target {
        let trace = Arc::clone(trace);
        let label = name.to_owned();
        Target::new(name).action(move |_| {
            trace.lock().unwrap().push(label.clone());
            Err(ActionError::failed("boom"))
        })
    }

    fn chain(trace: &Trace) -> Builder {
        let mut b = Builder::new("chain");
        b.add(traced("C", trace).depends_on(["B"])).unwrap();
        b.add(traced("A", trace)).unwrap();
        b.add(traced("B", trace).depends_on(["A"])).unwrap();
        b
    }

    #[test]
    fn runs_dependencies_before_dependents() {
        let trace = Trace::default();
        let b = chain(&trace);
        let (cx, _) = context();

        let report = b.run(&["C"], &cx, &sequential()).unwrap();

        assert_eq!(*trace.lock().unwrap(), ["A", "B", "C"]);
        assert!(report.succeeded());
        let names: Vec<&str> = report.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[test]
    fn shared_dependency_runs_once() {
        let trace = Trace::default();
        let mut b = Builder::new("diamond");
        b.add(traced("base", &trace)).unwrap();
        b.add(traced("left", &trace).depends_on(["base"])).unwrap();
        b.add(traced("right", &trace).depends_on(["base"])).unwrap();
        b.add(traced("top", &trace).depends_on(["left", "right"]))
            .unwrap();
        let (cx, _) = context();

        b.run(&["top", "left"], &cx, &sequential()).unwrap();

        assert_eq!(*trace.lock().unwrap(), ["base", "left", "right", "top"]);
    }

    #[test]
    fn failure_blocks_dependents_but_not_siblings() {
        let trace = Trace::default();
        let mut b = Builder::new("fail");
        b.add(failing("A", &trace)).unwrap();
        b.add(traced("B", &trace).depends_on(["A"])).unwrap();
        b.add(traced("D", &trace)).unwrap();
        let (cx, _) = context();

        let report = b.run(&["B", "D"], &cx, &sequential()).unwrap();

        assert!(!report.succeeded());
        assert_eq!(*trace.lock().unwrap(), ["A", "D"]);
        assert_eq!(report.status_of("A"), Some(TargetStatus::Failed));
        assert_eq!(report.status_of("D"), Some(TargetStatus::Succeeded));
        let blocked = report.entry("B").unwrap();
        assert_eq!(blocked.status, TargetStatus::Failed);
        assert_eq!(blocked.reason.as_deref(), Some("dependency `A` failed"));
        assert_eq!(report.entry("A").unwrap().diagnostics, ["boom"]);
    }

    #[test]
    fn skip_policy_propagates_through_dependents() {
        let trace = Trace::default();
        let mut b = Builder::new("skip");
        b.add(failing("A", &trace)).unwrap();
        b.add(traced("B", &trace).depends_on(["A"])).unwrap();
        b.add(traced("C", &trace).depends_on(["B"])).unwrap();
        let (cx, _) = context();
        let options = RunOptions {
            on_dependency_failure: DependencyFailurePolicy::Skip,
            ..sequential()
        };

        let report = b.run(&["C"], &cx, &options).unwrap();

        assert_eq!(*trace.lock().unwrap(), ["A"]);
        assert_eq!(report.status_of("B"), Some(TargetStatus::Skipped));
        assert_eq!(report.status_of("C"), Some(TargetStatus::Skipped));
        assert_eq!(
            report.entry("C").unwrap().reason.as_deref(),
            Some("dependency `B` failed")
        );
        assert!(!report.succeeded());
    }

    #[test]
    fn fail_fast_stops_starting_targets() {
        let trace = Trace::default();
        let mut b = Builder::new("fast");
        b.add(failing("A", &trace)).unwrap();
        b.add(traced("D", &trace)).unwrap();
        let (cx, _) = context();
        let options = RunOptions {
            fail_fast: true,
            ..sequential()
        };

        let report = b.run(&["A", "D"], &cx, &options).unwrap();

        assert_eq!(*trace.lock().unwrap(), ["A"]);
        let d = report.entry("D").unwrap();
        assert_eq!(d.status, TargetStatus::Skipped);
        assert_eq!(d.reason.as_deref(), Some("not run after earlier failure"));
    }

    #[test]
    fn fan_out_runs_every_key_and_fails_on_any() {
        let seen = Trace::default();
        let seen_in = Arc::clone(&seen);
        let mut b = Builder::new("fan");
        b.add(
            Target::new("cores").fan_out(["x", "y", "z"], move |cx, key| {
                seen_in.lock().unwrap().push(key.to_owned());
                assert_eq!(cx.key(), Some(key));
                if key == "y" {
                    Err(ActionError::failed("y broke"))
                } else {
                    cx.add_result(format!("out-{key}"));
                    Ok(())
                }
            }),
        )
        .unwrap();
        b.add(Target::new("after").depends_on(["cores"])).unwrap();
        let (cx, _) = context();

        let report = b.run(&["after"], &cx, &sequential()).unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["x", "y", "z"]);

        let entry = report.entry("cores").unwrap();
        assert_eq!(entry.status, TargetStatus::Failed);
        let keys: Vec<&str> = entry.branches.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, ["x", "y", "z"]);
        let failed: Vec<&str> = entry.failed_branches().map(|b| b.key.as_str()).collect();
        assert_eq!(failed, ["y"]);
        assert_eq!(entry.diagnostics, ["failed for y"]);
        assert_eq!(report.status_of("after"), Some(TargetStatus::Failed));
    }

    #[test]
    fn fan_out_with_all_keys_passing_succeeds() {
        let mut b = Builder::new("fan");
        b.add(Target::new("cores").fan_out(["a", "b"], |cx, key| {
            cx.run(CommandSpec::new("true").arg(key))?;
            Ok(())
        }))
        .unwrap();
        let (cx, runner) = context();
        let options = RunOptions {
            jobs: 1,
            ..RunOptions::default()
        };

        let report = b.run(&["cores"], &cx, &options).unwrap();

        assert!(report.succeeded());
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn empty_fan_out_is_rejected_before_running() {
        let trace = Trace::default();
        let mut b = Builder::new("fan");
        b.add(traced("first", &trace)).unwrap();
        b.add(
            Target::new("cores")
                .depends_on(["first"])
                .fan_out(Vec::<String>::new(), |_, _| Ok(())),
        )
        .unwrap();
        let (cx, _) = context();

        let err = b.run(&["cores"], &cx, &sequential()).unwrap_err();

        assert!(matches!(err, EngineError::EmptyFanOut { target } if target == "cores"));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn skipped_target_runs_nothing() {
        let trace = Trace::default();
        let mut b = Builder::new("skip");
        let trace_in = Arc::clone(&trace);
        b.add(Target::new("bare").skip(true).action(move |cx| {
            trace_in.lock().unwrap().push("bare".to_owned());
            cx.run(CommandSpec::new("make"))?;
            Ok(())
        }))
        .unwrap();
        b.add(traced("after", &trace).depends_on(["bare"])).unwrap();
        let (cx, runner) = context();

        let report = b.run(&["after"], &cx, &sequential()).unwrap();

        assert!(report.succeeded());
        assert_eq!(report.status_of("bare"), Some(TargetStatus::Skipped));
        assert_eq!(*trace.lock().unwrap(), ["after"]);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn skipped_commands_never_reach_the_process() {
        let mut b = Builder::new("skip");
        b.add(Target::new("t").action(|cx| {
            let out = cx.run_unless(CommandSpec::new("make"), true)?;
            assert!(out.skipped);
            cx.valid(CommandSpec::new("false"), &Check::new().skip(true))?;
            Ok(())
        }))
        .unwrap();
        let (cx, runner) = context();

        let report = b.run(&["t"], &cx, &sequential()).unwrap();

        assert!(report.succeeded());
        assert!(runner.calls.lock().unwrap().is_empty());
        assert!(report.entry("t").unwrap().commands.iter().all(|c| c.skipped));
    }

    #[test]
    fn failed_validation_lets_the_action_continue() {
        let mut b = Builder::new("valid");
        b.add(Target::new("check").action(|cx| {
            let ok = cx.valid(
                CommandSpec::new("false"),
                &Check::new().fail_msg("dhrystone failed on k1dp"),
            )?;
            assert!(!ok);
            cx.run(CommandSpec::new("echo"))?;
            Ok(())
        }))
        .unwrap();
        let (cx, runner) = context();

        let report = b.run(&["check"], &cx, &sequential()).unwrap();

        assert_eq!(*runner.calls.lock().unwrap(), ["false", "echo"]);
        let entry = report.entry("check").unwrap();
        assert_eq!(entry.status, TargetStatus::Failed);
        assert_eq!(entry.diagnostics, ["dhrystone failed on k1dp"]);
    }

    #[test]
    fn unknown_goal_fails_before_anything_runs() {
        let trace = Trace::default();
        let b = chain(&trace);
        let (cx, runner) = context();

        let err = b.run(&["A", "nope"], &cx, &sequential()).unwrap_err();

        assert!(matches!(err, EngineError::UnknownTarget { name } if name == "nope"));
        assert!(trace.lock().unwrap().is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let mut b = Builder::new("deps");
        b.add(Target::new("install").depends_on(["biuld"])).unwrap();
        let (cx, _) = context();

        let err = b.run(&["install"], &cx, &sequential()).unwrap_err();

        assert!(matches!(
            err,
            EngineError::UnknownDependency { target, dependency }
                if target == "install" && dependency == "biuld"
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut b = Builder::new("cycle");
        b.add(Target::new("a").depends_on(["b"])).unwrap();
        b.add(Target::new("b").depends_on(["a"])).unwrap();
        let (cx, _) = context();

        let err = b.run(&["a"], &cx, &sequential()).unwrap_err();

        assert!(matches!(err, EngineError::DependencyCycle { .. }));
    }

    #[test]
    fn cycle_among_unrequested_targets_blocks_the_run() {
        let trace = Trace::default();
        let mut b = Builder::new("cycle");
        b.add(traced("a", &trace)).unwrap();
        b.add(traced("x", &trace).depends_on(["y"])).unwrap();
        b.add(traced("y", &trace).depends_on(["x"])).unwrap();
        let (cx, runner) = context();

        let err = b.run(&["a"], &cx, &sequential()).unwrap_err();

        assert!(matches!(err, EngineError::DependencyCycle { .. }));
        assert!(trace.lock().unwrap().is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicate_target_is_rejected() {
        let mut b = Builder::new("dup");
        b.add(Target::new("a")).unwrap();
        let err = b.add(Target::new("a")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTarget { name } if name == "a"));
    }

    #[test]
    fn defaults_are_used_without_goals() {
        let trace = Trace::default();
        let mut b = chain(&trace);
        let (cx, _) = context();
        assert!(matches!(
            b.run::<&str>(&[], &cx, &sequential()).unwrap_err(),
            EngineError::NoGoals
        ));

        b.set_default_targets(["B"]).unwrap();
        b.run::<&str>(&[], &cx, &sequential()).unwrap();

        assert_eq!(*trace.lock().unwrap(), ["A", "B"]);
        assert!(b.set_default_targets(["Z"]).is_err());
    }

    #[test]
    fn fatal_error_aborts_with_partial_report() {
        let trace = Trace::default();
        let mut b = Builder::new("fatal");
        b.add(traced("first", &trace)).unwrap();
        b.add(Target::new("mds").action(|_| Err(ActionError::fatal("MDS directory missing"))))
            .unwrap();
        b.add(traced("later", &trace)).unwrap();
        let (cx, _) = context();

        let err = b
            .run(&["first", "mds", "later"], &cx, &sequential())
            .unwrap_err();

        let (target, message, report) = match err {
            EngineError::Aborted {
                target,
                message,
                report,
            } => (target, message, report),
            other => panic!("expected abort, got {other:?}"),
        };
        assert_eq!(target, "mds");
        assert_eq!(message, "MDS directory missing");
        assert_eq!(*trace.lock().unwrap(), ["first"]);
        assert_eq!(report.status_of("first"), Some(TargetStatus::Succeeded));
        assert_eq!(report.status_of("mds"), Some(TargetStatus::Failed));
        assert_eq!(report.entry("later").map(|e| e.status), None);
        assert_eq!(report.aborted.as_deref(), Some("MDS directory missing"));
        assert!(!report.succeeded());
    }

    #[test]
    fn fatal_branch_aborts_the_run() {
        let mut b = Builder::new("fatal");
        b.add(Target::new("cores").fan_out(["k1dp", "k1io"], |_, key| {
            if key == "k1io" {
                Err(ActionError::fatal("objdump not found"))
            } else {
                Ok(())
            }
        }))
        .unwrap();
        let (cx, _) = context();

        let err = b.run(&["cores"], &cx, &sequential()).unwrap_err();

        assert!(matches!(
            err,
            EngineError::Aborted { message, .. } if message == "k1io: objdump not found"
        ));
    }

    #[test]
    fn results_flow_to_dependents() {
        let mut b = Builder::new("results");
        b.add(
            Target::new("build")
                .result("/work/k1_build_elf_x86")
                .action(|cx| {
                    cx.add_result("/work/k1_build_elf_x86/gdb");
                    Ok(())
                }),
        )
        .unwrap();
        let seen = Trace::default();
        let seen_in = Arc::clone(&seen);
        b.add(Target::new("install").depends_on(["build"]).action(move |cx| {
            seen_in
                .lock()
                .unwrap()
                .extend(cx.results_of("build").iter().cloned());
            assert!(cx.results_of("unrelated").is_empty());
            Ok(())
        }))
        .unwrap();
        let (cx, _) = context();

        b.run(&["install"], &cx, &sequential()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            ["/work/k1_build_elf_x86", "/work/k1_build_elf_x86/gdb"]
        );
    }

    #[test]
    fn repeated_runs_start_fresh_and_match() {
        let trace = Trace::default();
        let mut b = Builder::new("again");
        b.add(failing("A", &trace)).unwrap();
        b.add(traced("B", &trace).depends_on(["A"])).unwrap();
        b.add(traced("C", &trace)).unwrap();
        let (cx, _) = context();

        let first = b.run(&["B", "C"], &cx, &sequential()).unwrap();
        let second = b.run(&["B", "C"], &cx, &sequential()).unwrap();

        let summary = |r: &Report| -> Vec<(String, TargetStatus)> {
            r.entries.iter().map(|e| (e.name.clone(), e.status)).collect()
        };
        assert_eq!(summary(&first), summary(&second));
        assert_eq!(*trace.lock().unwrap(), ["A", "C", "A", "C"]);
    }

    #[test]
    fn logs_are_written_per_target_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = Builder::new("logs");
        b.add(Target::new("build").action(|cx| {
            cx.run(CommandSpec::new("make").arg("all"))?;
            cx.note("build done");
            Ok(())
        }))
        .unwrap();
        b.add(Target::new("cores").fan_out(["k1dp"], |cx, _| {
            cx.run(CommandSpec::new("objdump"))?;
            Ok(())
        }))
        .unwrap();
        let (cx, _) = context();
        let options = RunOptions {
            log_dir: Some(dir.path().to_path_buf()),
            ..sequential()
        };

        let report = b.run(&["build", "cores"], &cx, &options).unwrap();

        let build_log = std::fs::read_to_string(dir.path().join("build.log")).unwrap();
        assert!(build_log.contains("$ make all"));
        assert!(build_log.contains("make ran"));
        assert!(build_log.contains("build done"));
        let branch_log = dir.path().join("cores.k1dp.log");
        assert!(std::fs::read_to_string(&branch_log)
            .unwrap()
            .contains("objdump ran"));
        assert_eq!(
            report.entry("cores").unwrap().branches[0].log.as_deref(),
            Some(branch_log.as_path())
        );
    }

    #[test]
    fn base_environment_reaches_commands() {
        #[derive(Default)]
        struct EnvRunner(Mutex<Option<String>>);
        impl CommandRunner for EnvRunner {
            fn execute(
                &self,
                spec: &CommandSpec,
                _skip: bool,
                _cancel: &CancelToken,
            ) -> Result<CommandOutput, UtilError> {
                *self.0.lock().unwrap() = spec.environment().get("LANG").cloned();
                Ok(CommandOutput {
                    success: true,
                    exit_code: Some(0),
                    ..CommandOutput::default()
                })
            }
        }

        let runner = Arc::new(EnvRunner::default());
        let cx = RunContext::with_runner(runner.clone()).env("LANG", "C");
        let mut b = Builder::new("env");
        b.add(Target::new("t").action(|cx| {
            cx.run(CommandSpec::new("make"))?;
            Ok(())
        }))
        .unwrap();

        b.run(&["t"], &cx, &sequential()).unwrap();

        assert_eq!(runner.0.lock().unwrap().as_deref(), Some("C"));
    }

    #[test]
    fn resolve_lists_targets_in_order() {
        let trace = Trace::default();
        let b = chain(&trace);
        let names: Vec<&str> = b
            .resolve(&["C"])
            .unwrap()
            .into_iter()
            .map(Target::name)
            .collect();
        assert_eq!(names, ["A", "B", "C"]);
    }
}
