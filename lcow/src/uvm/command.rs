//! One-shot commands in the utility VM with a bounded wait.

use std::time::Duration;

use lcow_shared::CommandFailure;
use lcow_shared::constants::timeouts::COMMAND_TIMEOUT_SECS;

use super::{CaptureBuffer, GuestProcess, ProcessConfig, ProcessExecutor};

/// A command to run to completion inside the utility VM.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn example(uvm: &dyn lcow::UtilityVm) {
/// use lcow::uvm::GuestCommand;
/// use std::time::Duration;
///
/// let outcome = GuestCommand::new(["ls", "/sys/bus/scsi/devices/0:0:0:1/block"])
///     .timeout(Duration::from_secs(30))
///     .capture_stdout()
///     .run(uvm)
///     .await;
/// println!("{}", outcome.stdout.trim());
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct GuestCommand {
    args: Vec<String>,
    timeout: Duration,
    capture_stdout: bool,
    capture_stderr: bool,
}

/// Result of a [`GuestCommand`], with whatever output was captured either way.
#[derive(Debug)]
pub struct CommandOutcome {
    pub status: Result<(), CommandFailure>,
    pub stdout: String,
    pub stderr: String,
}

impl GuestCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            capture_stdout: false,
            capture_stderr: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn capture_stderr(mut self) -> Self {
        self.capture_stderr = true;
        self
    }

    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }

    /// Start, wait (bounded), read the exit code, close.
    ///
    /// The process handle is closed on every path that created it.
    pub async fn run<E: ProcessExecutor + ?Sized>(&self, executor: &E) -> CommandOutcome {
        let command = self.command_line();
        let stdout = CaptureBuffer::new();
        let stderr = CaptureBuffer::new();

        let mut config = ProcessConfig::new(self.args.iter().cloned());
        if self.capture_stdout {
            config = config.stdout(stdout.clone());
        }
        if self.capture_stderr {
            config = config.stderr(stderr.clone());
        }

        tracing::debug!(%command, timeout = ?self.timeout, "Starting utility VM process");

        let status = match executor.create_process(config).await {
            Ok(mut process) => {
                let status = wait_for_exit(process.as_mut(), &command, self.timeout)
                    .await
                    .and_then(|code| check_exit(&command, code));
                if let Err(e) = process.close().await {
                    tracing::debug!(%command, error = %e, "Failed to close utility VM process");
                }
                status
            }
            Err(e) => Err(CommandFailure::Start {
                command: command.clone(),
                reason: e.to_string(),
            }),
        };

        if let Err(ref failure) = status {
            tracing::debug!(%command, %failure, "Utility VM process failed");
        }

        CommandOutcome {
            status,
            stdout: stdout.to_string_lossy(),
            stderr: stderr.to_string_lossy(),
        }
    }
}

/// Wait for `process` within `timeout` and return its exit code.
pub(crate) async fn wait_for_exit(
    process: &mut dyn GuestProcess,
    command: &str,
    timeout: Duration,
) -> Result<i32, CommandFailure> {
    match tokio::time::timeout(timeout, process.wait()).await {
        Err(_) => {
            return Err(CommandFailure::Timeout {
                command: command.to_string(),
                timeout,
            });
        }
        Ok(Err(e)) => {
            return Err(CommandFailure::ExitCode {
                command: command.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(Ok(())) => {}
    }

    process.exit_code().map_err(|e| CommandFailure::ExitCode {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

/// Map a non-zero exit code to a failure.
pub(crate) fn check_exit(command: &str, code: i32) -> Result<(), CommandFailure> {
    if code == 0 {
        Ok(())
    } else {
        Err(CommandFailure::NonZeroExit {
            command: command.to_string(),
            code,
        })
    }
}
