//! External process invocation
//!
//! Every git and package-manager call goes through [ProcessRunner] with an
//! explicit argument vector, never a shell string.

use crate::error::{ReleaseError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// A command to run: program, argv, working directory and timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
            env: Vec::new(),
        }
    }

    /// Build from a full argv; the first element is the program
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ReleaseError::config("command must not be empty"))?;
        Ok(CommandSpec::new(program.as_str()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg1 arg2`, for messages only
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished (or killed) process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs external processes
pub trait ProcessRunner: Send + Sync {
    /// Run to completion; a nonzero exit is reported in the output, not as an error
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run and turn a nonzero exit or an expired timeout into an error
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec)?;
        if output.timed_out {
            return Err(ReleaseError::Timeout {
                command: spec.display(),
                timeout: spec.timeout.unwrap_or_default(),
            });
        }
        if output.exit_code != 0 {
            return Err(ReleaseError::Process {
                command: spec.display(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// [ProcessRunner] backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

/// How long captured output is still collected after a timeout kill
const DRAIN_GRACE: Duration = Duration::from_millis(500);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Output of a drained pipe; after a timeout, descendants that inherited
/// the pipe may keep it open, so only wait `DRAIN_GRACE` for it
fn collect(rx: mpsc::Receiver<Vec<u8>>, timed_out: bool) -> Vec<u8> {
    if timed_out {
        rx.recv_timeout(DRAIN_GRACE).unwrap_or_default()
    } else {
        rx.recv().unwrap_or_default()
    }
}

/// Kill the child and everything it spawned
///
/// On unix the child leads its own process group, so the whole group is
/// signalled; elsewhere only the child itself is killed.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(err) = killed {
            debug!("Could not signal process group {}: {}", group, err);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running `{}`", spec.display());
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn()?;

        // pipes are drained concurrently so a chatty child cannot block on a full buffer
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = spec.timeout.map(|t| start + t);
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                kill_tree(&mut child);
                timed_out = true;
                break None;
            }
            thread::sleep(Duration::from_millis(50));
        };

        let stdout = collect(stdout, timed_out);
        let mut stderr = String::from_utf8_lossy(&collect(stderr, timed_out)).to_string();
        if timed_out {
            if let Some(timeout) = spec.timeout {
                stderr.push_str(&format!("\ncommand timed out after {:?}", timeout));
            }
        }

        let output = CommandOutput {
            exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr,
            timed_out,
            duration: start.elapsed(),
        };
        debug!(
            "`{}` exited with {} after {:?}",
            spec.program, output.exit_code, output.duration
        );
        Ok(output)
    }
}

/// Scripted response for [RecordingRunner]
#[derive(Debug, Clone)]
struct Scripted {
    needle: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// [ProcessRunner] that records every command and runs nothing
///
/// Commands succeed with empty output unless a scripted response matches
/// a substring of their argv.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    scripted: Mutex<Vec<Scripted>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose displayed argv contains `needle` exit with `exit_code`
    pub fn respond(&self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push(Scripted {
                needle: needle.to_string(),
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
        }
    }

    /// All recorded commands as `program arg1 arg2` strings
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|c| c.display()).collect())
            .unwrap_or_default()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let display = spec.display();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|s| s.iter().find(|r| display.contains(&r.needle)).cloned());

        Ok(match scripted {
            Some(r) => CommandOutput {
                exit_code: r.exit_code,
                stdout: r.stdout,
                stderr: r.stderr,
                timed_out: false,
                duration: Duration::ZERO,
            },
            None => CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
                duration: Duration::ZERO,
            },
        })
    }
}
