//! Concurrent execution of a parallel target's branches.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};
use rayon::ThreadPool;

use mbuild_util::process::CancelToken;

use crate::context::{ActionContext, Execution, RunContext};
use crate::target::{ActionError, FanOutAction};

/// One branch's outcome, keyed so completion order does not matter.
#[derive(Debug)]
pub(crate) struct Branch {
    pub key: String,
    pub duration: Duration,
    pub execution: Execution,
}

/// Create the worker pool used for every fan-out of a run.
pub(crate) fn pool(jobs: usize) -> Result<ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .thread_name(|i| format!("mbuild-fanout-{i}"))
        .build()
}

/// Run `action` once per key on `pool` and wait for all of them.
///
/// A failing branch never stops its siblings. A fatal branch cancels the run
/// token: branches that have not started yet return immediately as cancelled,
/// and commands in flight are killed by the runner.
pub(crate) fn run_branches(
    pool: &ThreadPool,
    target: &str,
    keys: &[String],
    action: &FanOutAction,
    run: &RunContext,
    cancel: &CancelToken,
    upstream: &HashMap<String, Vec<String>>,
) -> Vec<Branch> {
    let parent = tracing::Span::current();
    pool.install(|| {
        keys.par_iter()
            .map(|key| {
                let span = tracing::info_span!(parent: &parent, "branch", key = %key);
                let _enter = span.enter();
                let start = Instant::now();

                if cancel.is_cancelled() {
                    return Branch {
                        key: key.clone(),
                        duration: start.elapsed(),
                        execution: Execution::cancelled(),
                    };
                }

                let cx = ActionContext::new(target, Some(key.as_str()), run, cancel, upstream);
                let result = action(&cx, key.as_str());
                if let Err(ActionError::Fatal(message)) = &result {
                    tracing::error!("{message}");
                    cancel.cancel();
                }
                let execution = cx.finish(result);
                if execution.status.is_ok() {
                    tracing::info!("branch finished");
                } else {
                    tracing::warn!("branch failed");
                }
                Branch {
                    key: key.clone(),
                    duration: start.elapsed(),
                    execution,
                }
            })
            .collect()
    })
}
