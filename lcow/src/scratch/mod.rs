//! Scratch disk provisioning.
//!
//! A scratch disk is an ext4-formatted image used as a container's (or the
//! utility VM's) writable layer. The host cannot format ext4 itself, so the
//! empty image is hot-added to a running utility VM, formatted there, and
//! hot-removed again:
//!
//! ```text
//! CacheCheck ─hit──────────────────────────────────────────────▶ Done
//!     │miss
//!     ▼
//! LocalCreate → Attach → Validate → LocateDevice → Format → Detach → CacheSeed → Done
//!                           └──────────┴──────────────┴─fail─▶ Detach → Error
//! ```
//!
//! Images of the default size are cached: the first formatted image is
//! copied to the cache path, later requests copy it back without touching
//! the utility VM.

mod attach;
mod state;

pub use state::ScratchState;

use std::path::{Path, PathBuf};

use lcow_shared::constants::guest_paths::DEV_DIR;
use lcow_shared::constants::guest_tools::{MKFS_EXT4, MKFS_EXT4_ARGS};
use lcow_shared::{CommandFailure, LcowError, LcowResult};

use crate::diagnostics::Diagnostics;
use crate::disk::{ImageCreator, SparseImageCreator, copy_file};
use crate::options::ScratchOptions;
use crate::uvm::{GuestCommand, ScsiAddress, UtilityVm};
use attach::AttachedDisk;

/// Where a provisioned scratch disk came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScratchOrigin {
    /// Copied from the scratch cache.
    Cache,
    /// Freshly formatted in the utility VM.
    Formatted {
        /// Where the image sat on the guest SCSI bus while formatting.
        address: ScsiAddress,
        /// Guest block device it was formatted as, e.g. `/dev/sdb`.
        device: String,
    },
}

/// A formatted scratch disk image on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDisk {
    pub path: PathBuf,
    pub capacity_gb: u32,
    pub block_size_mb: u32,
    pub origin: ScratchOrigin,
    /// The image was also copied into the cache.
    pub cache_seeded: bool,
    /// States visited, in order, ending with [`ScratchState::Done`].
    pub trail: Vec<ScratchState>,
}

impl ScratchDisk {
    pub fn from_cache(&self) -> bool {
        self.origin == ScratchOrigin::Cache
    }

    /// Guest device the image was formatted as, if it was formatted.
    pub fn device(&self) -> Option<&str> {
        match &self.origin {
            ScratchOrigin::Cache => None,
            ScratchOrigin::Formatted { device, .. } => Some(device),
        }
    }
}

/// Creates ext4 scratch disks using a utility VM.
pub struct ScratchProvisioner<C = SparseImageCreator> {
    options: ScratchOptions,
    creator: C,
    diagnostics: Diagnostics,
}

impl ScratchProvisioner<SparseImageCreator> {
    pub fn new(options: ScratchOptions) -> Self {
        Self::with_creator(options, SparseImageCreator)
    }
}

impl<C: ImageCreator> ScratchProvisioner<C> {
    pub fn with_creator(options: ScratchOptions, creator: C) -> Self {
        Self {
            options,
            creator,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Collect guest diagnostics after the local image is created.
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn options(&self) -> &ScratchOptions {
        &self.options
    }

    /// Provision a formatted scratch disk at `dest`.
    ///
    /// `requested_gb` below the default size is raised to it. `cache` is
    /// consulted and seeded only for default-size disks; an empty path means
    /// no cache. A utility VM is needed unless the cache can serve the
    /// request.
    pub async fn provision(
        &self,
        uvm: Option<&dyn UtilityVm>,
        dest: &Path,
        requested_gb: u32,
        cache: Option<&Path>,
    ) -> LcowResult<ScratchDisk> {
        let mut trail = Vec::new();
        match self.run(uvm, dest, requested_gb, cache, &mut trail).await {
            Ok(disk) => Ok(disk),
            Err(e) => {
                tracing::debug!(
                    path = %dest.display(),
                    failed_in = %trail.last().copied().unwrap_or(ScratchState::CacheCheck),
                    state = %ScratchState::Error,
                    error = %e,
                    "Scratch disk provisioning failed"
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        uvm: Option<&dyn UtilityVm>,
        dest: &Path,
        requested_gb: u32,
        cache: Option<&Path>,
        trail: &mut Vec<ScratchState>,
    ) -> LcowResult<ScratchDisk> {
        let size_gb = self.options.effective_size_gb(requested_gb);
        let cache = cache
            .filter(|path| !path.as_os_str().is_empty())
            .filter(|_| self.options.is_cacheable(size_gb));

        if size_gb != requested_gb {
            tracing::debug!(requested_gb, size_gb, "Raised scratch size to the default");
        }

        enter(trail, ScratchState::CacheCheck, dest);
        if let Some(cache) = cache
            && cache.exists()
        {
            copy_file(cache, dest, false).map_err(|e| LcowError::CacheCopyFailed {
                cache: cache.to_path_buf(),
                dest: dest.to_path_buf(),
                source: e,
            })?;
            enter(trail, ScratchState::Done, dest);
            tracing::info!(
                path = %dest.display(),
                cache = %cache.display(),
                "Scratch disk copied from cache"
            );
            return Ok(self.disk(dest, size_gb, ScratchOrigin::Cache, false, trail));
        }

        enter(trail, ScratchState::LocalCreate, dest);
        let uvm = uvm.ok_or(LcowError::NoGuestAvailable {
            operation: "create scratch disk",
        })?;
        self.creator
            .create_image(dest, size_gb, self.options.block_size_mb)
            .map_err(|e| LcowError::DiskImageCreateFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;
        self.diagnostics.collect(uvm).await;

        enter(trail, ScratchState::Attach, dest);
        let attached = AttachedDisk::attach(uvm, dest).await?;
        let address = attached.address();

        let prepared = self.prepare_device(uvm, &attached, trail).await;

        enter(trail, ScratchState::Detach, dest);
        let device = match (prepared, attached.detach().await) {
            (Ok(device), Ok(())) => device,
            (Ok(_), Err(detach_err)) => return Err(detach_err),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(detach_err)) => {
                tracing::warn!(
                    path = %dest.display(),
                    error = %detach_err,
                    "Failed to hot-remove disk after error: {}",
                    e
                );
                return Err(e);
            }
        };

        let mut cache_seeded = false;
        if let Some(cache) = cache {
            enter(trail, ScratchState::CacheSeed, dest);
            copy_file(dest, cache, true).map_err(|e| LcowError::CacheSeedFailed {
                cache: cache.to_path_buf(),
                dest: dest.to_path_buf(),
                source: e,
            })?;
            cache_seeded = true;
        }

        enter(trail, ScratchState::Done, dest);
        tracing::info!(
            path = %dest.display(),
            size_gb,
            %device,
            cache_seeded,
            "Scratch disk created"
        );
        Ok(self.disk(
            dest,
            size_gb,
            ScratchOrigin::Formatted { address, device },
            cache_seeded,
            trail,
        ))
    }

    /// Validate, locate and format the attached disk. Returns the device path.
    async fn prepare_device(
        &self,
        uvm: &dyn UtilityVm,
        attached: &AttachedDisk<'_>,
        trail: &mut Vec<ScratchState>,
    ) -> LcowResult<String> {
        let path = attached.host_path();
        let address = attached.address();
        let timeout = self.options.command_timeout();

        enter(trail, ScratchState::Validate, path);
        GuestCommand::new(["test", "-d", address.sysfs_path().as_str()])
            .timeout(timeout)
            .run(uvm)
            .await
            .status
            .map_err(|failure| LcowError::AttachValidationFailed {
                path: path.to_path_buf(),
                failure,
            })?;

        enter(trail, ScratchState::LocateDevice, path);
        let lookup = GuestCommand::new(["ls", address.block_dir().as_str()])
            .timeout(timeout)
            .capture_stdout();
        let outcome = lookup.run(uvm).await;
        let device = outcome
            .status
            .and_then(|()| device_from_listing(&lookup.command_line(), &outcome.stdout))
            .map_err(|failure| LcowError::DeviceLookupFailed {
                path: path.to_path_buf(),
                failure,
            })?;
        tracing::debug!(path = %path.display(), %address, %device, "Located guest block device");

        enter(trail, ScratchState::Format, path);
        let outcome = GuestCommand::new(
            std::iter::once(MKFS_EXT4)
                .chain(MKFS_EXT4_ARGS.iter().copied())
                .chain(std::iter::once(device.as_str())),
        )
        .timeout(timeout)
        .capture_stderr()
        .run(uvm)
        .await;
        if let Err(failure) = outcome.status {
            return Err(LcowError::FormatFailed {
                path: path.to_path_buf(),
                failure,
                stderr: outcome.stderr.trim().to_string(),
            });
        }

        Ok(device)
    }

    fn disk(
        &self,
        dest: &Path,
        size_gb: u32,
        origin: ScratchOrigin,
        cache_seeded: bool,
        trail: &[ScratchState],
    ) -> ScratchDisk {
        ScratchDisk {
            path: dest.to_path_buf(),
            capacity_gb: size_gb,
            block_size_mb: self.options.block_size_mb,
            origin,
            cache_seeded,
            trail: trail.to_vec(),
        }
    }
}

fn enter(trail: &mut Vec<ScratchState>, state: ScratchState, path: &Path) {
    tracing::debug!(path = %path.display(), %state, "Scratch provisioning step");
    trail.push(state);
}

/// The block directory must list exactly one device name.
fn device_from_listing(command: &str, stdout: &str) -> Result<String, CommandFailure> {
    let mut names = stdout.split_whitespace();
    match (names.next(), names.next()) {
        (Some(name), None) => Ok(format!("{}/{}", DEV_DIR, name)),
        _ => Err(CommandFailure::UnexpectedOutput {
            command: command.to_string(),
            output: stdout.to_string(),
        }),
    }
}
