use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::bail_runner;
use crate::error::{tail, FailureKind, RunnerError, RunnerResult};

/// Upper bound on the captured stderr carried in a failure message
pub const STDERR_LIMIT: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long pipes may stay open after the process group was killed
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// A fully resolved command line for one model run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: vec![],
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Space separated rendering for logs and payloads, not meant to be re-parsed by a shell.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        // Own process group, so helpers the model spawns can be killed with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs `invocation` to completion, killing it once `timeout` has passed.
///
/// A non-zero exit maps to [`FailureKind::Execution`] carrying the captured stderr,
/// an expired budget to [`FailureKind::Timeout`]. Processes left behind in the
/// child's process group are killed once the child exits, and output still
/// unread when the budget runs out is dropped.
#[tracing::instrument(level = "info", skip(invocation), fields(program = ?invocation.program))]
pub fn run_with_timeout(invocation: &Invocation, timeout: Duration) -> RunnerResult<ProcessOutput> {
    debug!(command = %invocation.command_line(), "Spawning process");
    let start = Instant::now();
    let deadline = start + timeout;
    let mut child = invocation.command().spawn().map_err(|err| {
        RunnerError::new(
            FailureKind::Execution,
            format!("failed to start {}: {err}", invocation.program.to_string_lossy()),
        )
    })?;

    // Drained on separate threads so a chatty child never blocks on a full pipe
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(timeout_secs = timeout.as_secs(), "Process timed out, killing it");
            kill_process_group(&mut child);
            let _ = child.wait();
            bail_runner!(
                FailureKind::Timeout,
                "process timed out after {}s",
                timeout.as_secs()
            );
        }
        Err(err) => {
            kill_process_group(&mut child);
            let _ = child.wait();
            bail_runner!(FailureKind::Execution, "failed to wait for process: {}", err);
        }
    };
    let elapsed = start.elapsed();
    kill_process_group(&mut child);

    let stdout = collect(stdout_reader, deadline);
    let stderr = collect(stderr_reader, deadline);

    if !status.success() {
        bail_runner!(
            FailureKind::Execution,
            "process exited with {}: {}",
            describe(status),
            tail(stderr.trim_end(), STDERR_LIMIT)
        );
    }

    Ok(ProcessOutput {
        stdout,
        stderr,
        elapsed,
    })
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child leads its own group, its pid is the group id
    let group = Pid::from_raw(child.id() as i32);
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            debug!("Failed to kill process group {group}: {err}");
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = sender.send(String::from_utf8_lossy(&buf).into_owned());
        });
        receiver
    })
}

fn collect(reader: Option<Receiver<String>>, deadline: Instant) -> String {
    let Some(receiver) = reader else {
        return String::new();
    };
    let wait = deadline
        .saturating_duration_since(Instant::now())
        .max(PIPE_GRACE);
    receiver.recv_timeout(wait).unwrap_or_else(|_| {
        debug!("Output pipe still open, dropping it");
        String::new()
    })
}

trait ChildExt {
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
