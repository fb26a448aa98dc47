//! Subprocess boundary to the external flashing tools.

use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::lines::LineSplitter;
use crate::{Error, Result};

/// Program and arguments of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    subcommand: Option<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            subcommand: None,
        }
    }

    /// Appends the tool's subcommand and remembers it for [`label`](Self::label).
    pub fn subcommand(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.args.push(name.clone());
        self.subcommand = Some(name);
        self
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

    /// Name used in errors, e.g. `esptool.py erase_flash`.
    pub fn label(&self) -> String {
        match &self.subcommand {
            Some(sub) => format!("{} {}", self.program, sub),
            None => self.program.clone(),
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a tool invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs tool invocations.
///
/// Success is decided by the exit code only. Stdout and stderr are merged and
/// handed to `on_line` line by line while the process runs.
pub trait ToolRunner: Send {
    fn run(&mut self, command: &ToolCommand, on_line: &mut dyn FnMut(&str)) -> Result<ToolExit>;

    /// Runs `command` and turns a non-zero exit into [`Error::ToolFailed`].
    fn run_checked(
        &mut self,
        command: &ToolCommand,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<()> {
        let exit = self.run(command, on_line)?;
        if exit.success() {
            Ok(())
        } else {
            Err(Error::ToolFailed {
                tool: command.label(),
                code: exit.code,
            })
        }
    }
}

impl<T: ToolRunner + ?Sized> ToolRunner for Box<T> {
    fn run(&mut self, command: &ToolCommand, on_line: &mut dyn FnMut(&str)) -> Result<ToolExit> {
        (**self).run(command, on_line)
    }
}

/// Runs tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kills any invocation that runs longer than `timeout`. `None` waits
    /// forever.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&mut self, command: &ToolCommand, on_line: &mut dyn FnMut(&str)) -> Result<ToolExit> {
        tracing::debug!("spawn: {}", command);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            // Keep Python-based tools from block-buffering their progress.
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel::<String>();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(reap_on_error(&mut child, spawn_pump(stdout, tx.clone()))?);
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(reap_on_error(&mut child, spawn_pump(stderr, tx.clone()))?);
        }
        drop(tx);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    rx.recv_timeout(remaining)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(line) => on_line(&line),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(kill_on_timeout(&mut child, command));
                }
            }
        }

        for pump in pumps {
            let _ = pump.join();
        }

        let status = match deadline {
            Some(deadline) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if Instant::now() >= deadline {
                    return Err(kill_on_timeout(&mut child, command));
                }
                thread::sleep(Duration::from_millis(20));
            },
            None => child.wait()?,
        };

        tracing::debug!("{} exited with {:?}", command.label(), status.code());
        Ok(ToolExit {
            code: status.code(),
        })
    }
}

fn spawn_pump<R: Read + Send + 'static>(
    mut reader: R,
    tx: Sender<String>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("tool-output".to_string())
        .spawn(move || {
            let mut splitter = LineSplitter::new();
            let mut buf = [0u8; 1024];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in splitter.push(&buf[..n]) {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("reading tool output failed: {}", e);
                        break;
                    }
                }
            }
            if let Some(line) = splitter.finish() {
                let _ = tx.send(line);
            }
        })?;
    Ok(handle)
}

/// Kills and waits for `child` when `result` is an error, so no process is
/// left behind.
fn reap_on_error<T>(child: &mut Child, result: Result<T>) -> Result<T> {
    if result.is_err() {
        tracing::warn!("killing tool process {}", child.id());
        let _ = child.kill();
        let _ = child.wait();
    }
    result
}

fn kill_on_timeout(child: &mut Child, command: &ToolCommand) -> Error {
    tracing::error!("{} timed out, killing it", command.label());
    let _ = child.kill();
    let _ = child.wait();
    Error::timeout(format!("running `{}`", command.label()))
}
