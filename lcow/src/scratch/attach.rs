use std::path::{Path, PathBuf};

use lcow_shared::{LcowError, LcowResult};

use crate::uvm::{ScsiAddress, UtilityVm};

/// A disk image hot-added to the utility VM.
///
/// Must be released with [`detach`](AttachedDisk::detach); dropping it
/// unreleased leaves the disk attached to the guest and logs a warning.
pub(crate) struct AttachedDisk<'a> {
    uvm: &'a dyn UtilityVm,
    host_path: PathBuf,
    address: ScsiAddress,
    released: bool,
}

impl<'a> AttachedDisk<'a> {
    pub(crate) async fn attach(uvm: &'a dyn UtilityVm, host_path: &Path) -> LcowResult<Self> {
        let address = uvm.add_scsi(host_path, None).await.map_err(|e| {
            // Nothing is known to be attached here, so there is nothing to roll back,
            // even if the service attached the disk before failing.
            tracing::warn!(
                path = %host_path.display(),
                error = %e,
                "Hot-add failed; no rollback performed"
            );
            LcowError::AttachFailed {
                path: host_path.to_path_buf(),
                source: Box::new(e),
            }
        })?;

        tracing::debug!(path = %host_path.display(), %address, "Disk hot-added to utility VM");
        Ok(Self {
            uvm,
            host_path: host_path.to_path_buf(),
            address,
            released: false,
        })
    }

    pub(crate) fn address(&self) -> ScsiAddress {
        self.address
    }

    pub(crate) fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Hot-remove the disk. Consumes the guard so this happens at most once.
    pub(crate) async fn detach(mut self) -> LcowResult<()> {
        self.released = true;
        tracing::debug!(
            path = %self.host_path.display(),
            address = %self.address,
            "Hot-removing disk from utility VM"
        );
        self.uvm
            .remove_scsi(&self.host_path, self.address)
            .await
            .map_err(|e| LcowError::DetachFailed {
                path: self.host_path.clone(),
                source: Box::new(e),
            })
    }
}

impl Drop for AttachedDisk<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                path = %self.host_path.display(),
                address = %self.address,
                "Attached disk dropped without detach; it stays attached to the utility VM"
            );
        }
    }
}
