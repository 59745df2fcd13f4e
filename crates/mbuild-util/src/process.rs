//! Process execution: command values, the runner seam, and the system runner.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::UtilError;

/// How often a running child is polled for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program invocation: program, arguments, environment, and working directory.
///
/// Arguments are passed to the program verbatim; nothing is interpreted by a
/// shell unless the command was built with [`CommandSpec::shell`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
    path_prepend: Vec<PathBuf>,
    path_append: Vec<PathBuf>,
}

impl CommandSpec {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Create a command that runs `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run the child in `dir`.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Search `dir` before the inherited `PATH`.
    pub fn path_prepend(mut self, dir: impl AsRef<Path>) -> Self {
        self.path_prepend.push(dir.as_ref().to_path_buf());
        self
    }

    /// Search `dir` after the inherited `PATH`.
    pub fn path_append(mut self, dir: impl AsRef<Path>) -> Self {
        self.path_append.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// The `PATH` the child will see, if this command changes it.
    pub fn effective_path(&self) -> Option<OsString> {
        if self.path_prepend.is_empty() && self.path_append.is_empty() {
            return None;
        }
        let inherited = match self.env.get("PATH") {
            Some(path) => OsString::from(path),
            None => std::env::var_os("PATH").unwrap_or_default(),
        };
        let entries: Vec<PathBuf> = self
            .path_prepend
            .iter()
            .cloned()
            .chain(std::env::split_paths(&inherited))
            .chain(self.path_append.iter().cloned())
            .collect();
        std::env::join_paths(entries).ok()
    }

    /// Convert into a [`std::process::Command`] ready to spawn.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(path) = self.effective_path() {
            cmd.env("PATH", path);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Structured output from a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output as a string.
    pub stdout: String,
    /// Standard error as a string.
    pub stderr: String,
    /// Whether the command exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
    /// The command was skipped and never spawned.
    pub skipped: bool,
}

impl CommandOutput {
    /// Synthetic success reported for a skipped command.
    pub fn skipped() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            skipped: true,
            ..Self::default()
        }
    }
}

/// Shared flag telling in-flight work to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes commands on behalf of target actions.
pub trait CommandRunner: Send + Sync {
    /// Run `spec` and capture its output.
    ///
    /// With `skip` set, nothing is spawned and a synthetic success is returned.
    ///
    /// # Errors
    /// Returns an error if the program cannot be spawned, or if `cancel` fires
    /// while it runs. A non-zero exit code is **not** an error.
    fn execute(
        &self,
        spec: &CommandSpec,
        skip: bool,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, UtilError>;
}

/// Runs commands as real child processes.
///
/// The child is polled rather than waited on so it can be killed as soon as
/// the cancel token fires. On Unix it leads its own process group, and
/// cancellation kills the whole group so `make` or `sh -c` cannot leave
/// grandchildren running.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(
        &self,
        spec: &CommandSpec,
        skip: bool,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, UtilError> {
        if skip {
            tracing::debug!(command = %spec, "skipped");
            return Ok(CommandOutput::skipped());
        }
        if cancel.is_cancelled() {
            return Err(UtilError::Cancelled {
                program: spec.program().to_owned(),
            });
        }
        tracing::debug!(command = %spec, dir = ?spec.working_dir(), "exec");

        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let mut child = cmd.spawn().map_err(|source| UtilError::CommandExec {
            program: spec.program().to_owned(),
            source,
        })?;

        let stdout_reader = child.stdout.take().map(|s| thread::spawn(move || read_all(s)));
        let stderr_reader = child.stderr.take().map(|s| thread::spawn(move || read_all(s)));

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if cancel.is_cancelled() => {
                    kill_tree(&mut child);
                    let _ = child.wait();
                    // A descendant outside the group may still hold the pipes;
                    // the readers are detached rather than joined.
                    drop(stdout_reader);
                    drop(stderr_reader);
                    tracing::warn!(command = %spec, "killed after cancellation");
                    return Err(UtilError::Cancelled {
                        program: spec.program().to_owned(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(UtilError::CommandExec {
                        program: spec.program().to_owned(),
                        source,
                    })
                }
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&join_reader(stdout_reader)).into_owned(),
            stderr: String::from_utf8_lossy(&join_reader(stderr_reader)).into_owned(),
            success: status.success(),
            exit_code: status.code(),
            skipped: false,
        })
    }
}

/// Kill the child and everything in its process group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match i32::try_from(child.id()) {
        Ok(pid) => {
            if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                tracing::debug!(pid, %errno, "killpg failed, killing the child alone");
                let _ = child.kill();
            }
        }
        Err(_) => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    // Kill errors mean the child already exited.
    let _ = child.kill();
}

fn read_all(mut source: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    // A read error truncates the capture; the exit status still decides success.
    let _ = source.read_to_end(&mut buf);
    buf
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

/// Execute a command and capture its output, without cancellation support.
///
/// # Errors
/// Returns an error if the command cannot be spawned (e.g. binary not found).
/// A non-zero exit code is **not** an error; check `CommandOutput::success` instead.
pub fn run_command(cmd: &mut Command) -> Result<CommandOutput, UtilError> {
    let output = cmd.output().map_err(|source| UtilError::CommandExec {
        program: cmd.get_program().to_string_lossy().into_owned(),
        source,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
        exit_code: output.status.code(),
        skipped: false,
    })
}
