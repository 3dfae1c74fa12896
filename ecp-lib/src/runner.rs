//! Running a provider plugin as a child process
//!
//! [`ProcessRunner`] is the narrow seam between the client and the operating
//! system: hand it a program, the bytes for its stdin and a deadline, get back
//! the exit status and both output streams. [`CommandRunner`] does this with
//! `tokio::process`; tests substitute scripted runners.

use crate::{EcpError, Result};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// How long to keep collecting stderr after a timed-out plugin was killed
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Captured result of a finished plugin run
///
/// Output buffers are zeroed on drop since stdout carries the password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProcessOutput {
    /// Exit code, or None if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Standard error decoded lossily for diagnostics
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run-and-capture capability used by the client
///
/// Implementations must start `program` with no arguments, deliver `stdin`
/// and close it, and return once the process has exited and both output
/// streams are closed. If `timeout` elapses first the process must be
/// terminated and [`EcpError::Timeout`] returned. A process that cannot be
/// started, or whose output cannot be read, yields
/// [`EcpError::ExecutionFailed`]. A non-zero exit is not an error at this
/// layer; it is reported through [`ProcessOutput::exit_code`].
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &Path, stdin: &[u8], timeout: Duration) -> Result<ProcessOutput>;
}

/// Production runner backed by `tokio::process`
///
/// On unix the plugin runs in its own process group, and a timeout kills the
/// whole group, including helpers the plugin forked.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, program: &Path, stdin: &[u8], timeout: Duration) -> Result<ProcessOutput> {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| EcpError::ExecutionFailed {
            path: program.to_path_buf(),
            exit_code: None,
            stderr: String::new(),
            source: Some(e),
        })?;
        let pid = child.id();

        tracing::debug!(program = %program.display(), ?pid, "spawned credential provider");

        // Feed stdin from its own task so a plugin that never reads it cannot
        // stall the exchange.
        let writer = child.stdin.take().map(|mut pipe| {
            let data = stdin.to_vec();
            tokio::spawn(async move {
                match pipe.write_all(&data).await {
                    Ok(()) => pipe.shutdown().await,
                    // The plugin exited or closed stdin without reading it all
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                    Err(e) => Err(e),
                }
            })
        });

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut stdout_task = child
            .stdout
            .take()
            .map(|pipe| drain(pipe, Arc::clone(&stdout_buf)));
        let mut stderr_task = child
            .stderr
            .take()
            .map(|pipe| drain(pipe, Arc::clone(&stderr_buf)));

        // The deadline covers exit and end-of-output: a forked helper can keep
        // the pipes open after the plugin itself has exited.
        let exchange = async {
            let status = child.wait().await.map_err(|e| EcpError::ExecutionFailed {
                path: program.to_path_buf(),
                exit_code: None,
                stderr: String::new(),
                source: Some(e),
            })?;
            for task in [stdout_task.as_mut(), stderr_task.as_mut()]
                .into_iter()
                .flatten()
            {
                join_drain(task)
                    .await
                    .map_err(|e| EcpError::ExecutionFailed {
                        path: program.to_path_buf(),
                        exit_code: status.code(),
                        stderr: String::from_utf8_lossy(&take_buffer(&stderr_buf)).into_owned(),
                        source: Some(e),
                    })?;
            }
            Ok::<_, EcpError>(status)
        };
        let outcome = tokio::time::timeout(timeout, exchange).await;

        let status = match outcome {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(program = %program.display(), ?timeout, "credential provider timed out, killing it");
                #[cfg(unix)]
                kill_process_group(pid);
                // kill() also reaps the child; an error means it already exited
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "kill after timeout failed");
                }
                if let Some(writer) = writer {
                    writer.abort();
                }
                if let Some(task) = stdout_task {
                    task.abort();
                }
                // Timeout polls the exchange first, so an expired deadline means
                // the stderr task has not been joined yet.
                if let Some(mut task) = stderr_task {
                    if tokio::time::timeout(STDERR_GRACE, &mut task).await.is_err() {
                        task.abort();
                    }
                }
                take_buffer(&stdout_buf).zeroize();
                return Err(EcpError::Timeout {
                    path: program.to_path_buf(),
                    timeout,
                    stderr: String::from_utf8_lossy(&take_buffer(&stderr_buf)).into_owned(),
                });
            }
        };

        if let Some(writer) = writer {
            if writer.is_finished() {
                if let Ok(Err(e)) = writer.await {
                    tracing::debug!(error = %e, "writing request to credential provider failed");
                }
            } else {
                writer.abort();
            }
        }

        tracing::debug!(program = %program.display(), exit_code = ?status.code(), "credential provider exited");

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: take_buffer(&stdout_buf),
            stderr: take_buffer(&stderr_buf),
        })
    }
}

/// Copy a pipe into `sink` until end of file on a background task
fn drain<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        let result = loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break Ok(()),
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
                Err(e) => break Err(e),
            }
        };
        chunk.zeroize();
        result
    })
}

/// Wait for a drain task, turning a panicked or cancelled task into an io error
async fn join_drain(task: &mut JoinHandle<io::Result<()>>) -> io::Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    }
}

fn take_buffer(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner))
}

/// SIGKILL every process in the plugin's group
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::debug!(error = %e, pid, "killing credential provider process group failed");
    }
}
