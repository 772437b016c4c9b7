//! Best-effort diagnostics from inside the utility VM.
//!
//! When enabled (and DEBUG logging is on), a fixed set of probes dumps the
//! guest agent's stacks, logs and runtime state into the host log. Nothing
//! here ever fails the operation it is attached to.

use std::fmt::Write as _;
use std::time::Duration;

use lcow_shared::constants::timeouts::DIAGNOSTICS_TIMEOUT_SECS;
use tokio::time::Instant;
use tracing::Level;

use crate::options::DiagnosticsOptions;
use crate::uvm::{CaptureBuffer, ProcessConfig, ProcessExecutor, check_exit, wait_for_exit};

/// One shell command run in the utility VM, with a label for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticProbe {
    pub description: String,
    pub command: String,
}

impl DiagnosticProbe {
    pub fn new(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
        }
    }

    fn config(&self, stdout: CaptureBuffer) -> ProcessConfig {
        ProcessConfig::new(["sh", "-c", self.command.as_str()]).stdout(stdout)
    }
}

fn default_probes() -> Vec<DiagnosticProbe> {
    vec![
        DiagnosticProbe::new("guest agent stack dump", "kill -10 `pidof gcs`"),
        DiagnosticProbe::new("/tmp listing", "ls -l /tmp"),
        DiagnosticProbe::new("guest agent log", "cat /tmp/gcs.log"),
        DiagnosticProbe::new("guest agent stacks", "cat /tmp/gcs/gcs-stacks*"),
        DiagnosticProbe::new("guest agent panic log", "cat /tmp/gcs/paniclog*"),
        DiagnosticProbe::new("/tmp/gcs listing", "ls -l /tmp/gcs"),
        DiagnosticProbe::new("container directories", "ls -l /tmp/gcs/*"),
        DiagnosticProbe::new("container configs", "cat /tmp/gcs/*/config.json"),
        DiagnosticProbe::new("runtime state", "ls -lR /var/run/gcsrunc"),
        DiagnosticProbe::new("global runtime log", "cat /tmp/gcs/global-runc.log"),
        DiagnosticProbe::new("container runtime logs", "cat /tmp/gcs/*/runc.log"),
        DiagnosticProbe::new("process list", "ps -ef"),
    ]
}

/// Guest diagnostics collector.
///
/// The default value is disabled and collects nothing.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    enabled: bool,
    probes: Vec<DiagnosticProbe>,
    timeout: Duration,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticsOptions::default())
    }
}

impl Diagnostics {
    pub fn new(options: DiagnosticsOptions) -> Self {
        let probes = match options.override_command {
            Some(command) => vec![DiagnosticProbe::new("custom debug command", command)],
            None => default_probes(),
        };
        Self {
            enabled: options.enabled,
            probes,
            timeout: Duration::from_secs(DIAGNOSTICS_TIMEOUT_SECS),
        }
    }

    /// Shared deadline for all probes of one collection.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn probes(&self) -> &[DiagnosticProbe] {
        &self.probes
    }

    /// Collection runs only when enabled and DEBUG events would be recorded.
    pub fn is_active(&self) -> bool {
        self.enabled && tracing::enabled!(Level::DEBUG)
    }

    /// Run the probes and log their output at DEBUG.
    ///
    /// Returns the collected report, or `None` when inactive. Probe failures
    /// are logged and skipped.
    pub async fn collect<E: ProcessExecutor + ?Sized>(&self, executor: &E) -> Option<String> {
        if !self.is_active() {
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        let mut report = String::new();

        for probe in &self.probes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(
                    probe = %probe.description,
                    "Diagnostics deadline reached, skipping remaining probes"
                );
                break;
            }

            let output = self.run_probe(executor, probe, remaining).await;
            let _ = writeln!(report, "--- {} ({}) ---", probe.description, probe.command);
            report.push_str(&output);
            if !output.is_empty() && !output.ends_with('\n') {
                report.push('\n');
            }
        }

        tracing::debug!("Utility VM diagnostics:\n{}", report);
        Some(report)
    }

    async fn run_probe<E: ProcessExecutor + ?Sized>(
        &self,
        executor: &E,
        probe: &DiagnosticProbe,
        timeout: Duration,
    ) -> String {
        let stdout = CaptureBuffer::new();
        let mut process = match executor.create_process(probe.config(stdout.clone())).await {
            Ok(process) => process,
            Err(e) => {
                tracing::debug!(
                    probe = %probe.description,
                    error = %e,
                    "Failed to start diagnostics probe"
                );
                return String::new();
            }
        };

        match wait_for_exit(process.as_mut(), &probe.command, timeout).await {
            Ok(code) => {
                if let Err(failure) = check_exit(&probe.command, code) {
                    tracing::debug!(
                        probe = %probe.description,
                        %failure,
                        "Diagnostics probe failed"
                    );
                }
            }
            Err(failure) => {
                tracing::debug!(
                    probe = %probe.description,
                    %failure,
                    "Diagnostics probe did not complete"
                );
                if let Err(e) = process.kill().await {
                    tracing::debug!(
                        probe = %probe.description,
                        error = %e,
                        "Failed to kill diagnostics probe"
                    );
                }
            }
        }

        if let Err(e) = process.close().await {
            tracing::debug!(
                probe = %probe.description,
                error = %e,
                "Failed to close diagnostics probe"
            );
        }

        stdout.to_string_lossy()
    }
}
