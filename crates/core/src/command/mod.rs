//! Bounded-time invocation of external command-line tools.

use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use crate::ToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured output of a tool that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam through which every external call passes.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, giving up after `timeout`.
    ///
    /// A nonzero exit status is reported as [`ToolError::Failed`].
    fn run(&self, program: &str, args: &[&str], timeout: Duration)
        -> Result<ToolOutput, ToolError>;
}

/// Runs tools as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        tracing::debug!(program, ?args, ?timeout, "invoking external tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => ToolError::NotFound {
                    program: program.to_string(),
                },
                _ => ToolError::Spawn {
                    program: program.to_string(),
                    source,
                },
            })?;

        // Both pipes are drained concurrently; a child blocked on a full pipe
        // would otherwise never exit.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolError::TimedOut {
                        program: program.to_string(),
                        timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolError::Spawn {
                        program: program.to_string(),
                        source,
                    });
                }
            }
        };

        // A descendant can inherit the pipes and keep them open after the
        // direct child exits; reading them shares the same deadline.
        let deadline = started + timeout;
        let (Some(stdout), Some(stderr)) = (collect(stdout, deadline), collect(stderr, deadline))
        else {
            return Err(ToolError::TimedOut {
                program: program.to_string(),
                timeout,
            });
        };

        if !status.success() {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

/// `None` when the pipe is still open at `deadline`.
fn collect(pipe: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Option<String> {
    let Some(rx) = pipe else {
        return Some(String::new());
    };
    rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Canned reply for a scripted invocation.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Ok(String),
        Fail,
        Timeout,
    }

    /// In-memory stand-in for the external tools.
    ///
    /// Replies are matched on the full command line first, then on the
    /// program name alone. Anything unscripted behaves like a missing binary.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedRunner {
        exact: Mutex<HashMap<String, Reply>>,
        by_program: Mutex<HashMap<String, Reply>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn on(self, command_line: &str, reply: Reply) -> Self {
            self.exact
                .lock()
                .unwrap()
                .insert(command_line.to_string(), reply);
            self
        }

        pub(crate) fn on_program(self, program: &str, reply: Reply) -> Self {
            self.by_program
                .lock()
                .unwrap()
                .insert(program.to_string(), reply);
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &self,
            program: &str,
            args: &[&str],
            timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            let reply = self
                .exact
                .lock()
                .unwrap()
                .get(&line)
                .cloned()
                .or_else(|| self.by_program.lock().unwrap().get(program).cloned());

            match reply {
                Some(Reply::Ok(stdout)) => Ok(ToolOutput {
                    stdout,
                    stderr: String::new(),
                }),
                Some(Reply::Fail) => Err(ToolError::bad_output(program, "scripted failure")),
                Some(Reply::Timeout) => Err(ToolError::TimedOut {
                    program: program.to_string(),
                    timeout,
                }),
                None => Err(ToolError::NotFound {
                    program: program.to_string(),
                }),
            }
        }
    }
}
