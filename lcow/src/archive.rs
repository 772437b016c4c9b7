//! Tar archive to disk image conversion through the utility VM.
//!
//! The host has no ext4 writer, so the archive is streamed into `tar2vhd`
//! in the guest and the image it prints on stdout is written to the host
//! file:
//!
//! ```text
//! reader ──stdin──▶ tar2vhd (utility VM) ──stdout──▶ target file
//! ```

use std::path::Path;
use std::time::Duration;

use lcow_shared::constants::guest_tools::TAR2VHD;
use lcow_shared::constants::timeouts::COMMAND_TIMEOUT_SECS;
use lcow_shared::{LcowError, LcowResult};
use tokio::io::AsyncRead;

use crate::diagnostics::Diagnostics;
use crate::uvm::{ProcessConfig, UtilityVm, check_exit, wait_for_exit};

/// Streams tar archives into the utility VM and back out as disk images.
#[derive(Debug, Clone)]
pub struct ArchiveRelay {
    diagnostics: Diagnostics,
    timeout: Duration,
}

impl Default for ArchiveRelay {
    fn default() -> Self {
        Self::new(Diagnostics::default())
    }
}

impl ArchiveRelay {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Convert the tar stream `reader` into a disk image at `target`.
    ///
    /// Returns the number of bytes written to `target`. On failure the
    /// partially written `target` is removed. Diagnostics are collected
    /// once a utility VM is known, whatever the outcome.
    pub async fn tar_to_image<R>(
        &self,
        uvm: Option<&dyn UtilityVm>,
        target: &Path,
        reader: R,
    ) -> LcowResult<u64>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let uvm = uvm.ok_or(LcowError::NoGuestAvailable {
            operation: "convert tar to disk image",
        })?;

        let result = self.relay(uvm, target, reader).await;
        self.diagnostics.collect(uvm).await;

        if result.is_err() {
            remove_partial(target).await;
        }
        result
    }

    async fn relay<R>(&self, uvm: &dyn UtilityVm, target: &Path, reader: R) -> LcowResult<u64>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let file = tokio::fs::File::create(target).await.map_err(|e| {
            LcowError::ArchiveTargetCreateFailed {
                path: target.to_path_buf(),
                source: e,
            }
        })?;
        let config = ProcessConfig::new([TAR2VHD]).stdin(reader).stdout(file);

        tracing::debug!(path = %target.display(), "Starting tar2vhd in utility VM");

        let mut process = uvm.create_process(config).await.map_err(|e| {
            LcowError::ArchiveStreamStartFailed {
                path: target.to_path_buf(),
                source: Box::new(e),
            }
        })?;
        let counters = process.io_counters();

        let status = wait_for_exit(process.as_mut(), TAR2VHD, self.timeout)
            .await
            .and_then(|code| check_exit(TAR2VHD, code));
        if let Err(e) = process.close().await {
            tracing::debug!(error = %e, "Failed to close tar2vhd process");
        }

        status.map_err(|failure| LcowError::ArchiveStreamFailed {
            path: target.to_path_buf(),
            failure,
        })?;

        let bytes = counters.stdout();
        tracing::debug!(path = %target.display(), bytes, "tar2vhd completed");
        Ok(bytes)
    }
}

async fn remove_partial(target: &Path) {
    if let Err(e) = tokio::fs::remove_file(target).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            path = %target.display(),
            error = %e,
            "Failed to remove partial disk image"
        );
    }
}
