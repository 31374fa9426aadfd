//! External process supervision with merged, streamed output.
//!
//! stdout and stderr share one pipe, so the captured log keeps the order in
//! which the process wrote its lines.

use std::io::{BufRead, BufReader, PipeReader};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Lines in flight between the pipe reader and the sink.
const LINE_BUFFER: usize = 256;

/// Exit status and combined stdout/stderr of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Every line in arrival order, each terminated by `\n`
    pub output: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches an external program and waits for it.
///
/// Production code uses [`CommandSupervisor`]; orchestrator tests substitute fakes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// Each output line is passed to `sink` as soon as it is read. A nonzero
    /// exit is an `Ok` outcome; only failing to start or wait is an error.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        sink: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ProcessOutcome, LaunchError>;
}

/// Supervisor backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSupervisor;

#[async_trait]
impl ProcessSupervisor for CommandSupervisor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        sink: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ProcessOutcome, LaunchError> {
        let (reader, writer) = std::io::pipe().map_err(|e| LaunchError::Pipe { source: e })?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| LaunchError::Pipe { source: e })?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        let spawned = command.spawn();
        // The command owns the parent's write ends; the reader sees EOF only once they close.
        drop(command);
        let mut child = spawned.map_err(|e| LaunchError::Spawn {
            program: program.to_owned(),
            source: e,
        })?;
        tracing::debug!(program, pid = ?child.id(), "process started");

        let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);
        let forwarder = tokio::task::spawn_blocking(move || forward_lines(reader, tx));

        let mut output = String::new();
        while let Some(line) = rx.recv().await {
            sink(&line);
            output.push_str(&line);
            output.push('\n');
        }

        match forwarder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed reading process output"),
            Err(e) => tracing::warn!(error = %e, "process output reader panicked"),
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Err(LaunchError::Wait {
                    program: program.to_owned(),
                    output,
                    source: e,
                });
            }
        };
        tracing::debug!(program, %status, "process exited");

        Ok(ProcessOutcome {
            exit_code: status.code(),
            output,
        })
    }
}

/// Send each line of `pipe` to `tx`, decoding invalid UTF-8 lossily.
///
/// Runs on a blocking thread until every write end of the pipe is closed.
fn forward_lines(pipe: PipeReader, tx: mpsc::Sender<String>) -> std::io::Result<()> {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_owned();
        if tx.blocking_send(line).is_err() {
            // receiver gone; nothing left to deliver to
            return Ok(());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to create output pipe")]
    Pipe { source: std::io::Error },

    #[error("failed to start {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The process ran but its exit status could not be collected.
    #[error("failed waiting for {program} to exit")]
    Wait {
        program: String,
        /// Everything the process wrote before the wait failed
        output: String,
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Output captured before the failure; empty if the process never started.
    pub fn output(&self) -> &str {
        match self {
            Self::Wait { output, .. } => output,
            Self::Pipe { .. } | Self::Spawn { .. } => "",
        }
    }
}
