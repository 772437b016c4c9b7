//! Utility VM collaborator seams.
//!
//! The host compute service owns the utility VM. This crate only needs two
//! things from it: running processes inside the guest ([`ProcessExecutor`])
//! and hot-adding/removing disks on the guest SCSI bus ([`ScsiController`]).

mod command;
mod process;

pub use command::{CommandOutcome, GuestCommand};
pub(crate) use command::{check_exit, wait_for_exit};
pub use process::{CaptureBuffer, GuestProcess, GuestSink, GuestSource, IoCounters, ProcessConfig};

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use lcow_shared::LcowResult;
use lcow_shared::constants::guest_paths::{BLOCK_SUBDIR, SCSI_DEVICES};

/// Where a hot-added disk sits on the guest's synthetic SCSI bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScsiAddress {
    /// Controller index.
    pub controller: u8,
    /// Logical unit number on that controller.
    pub lun: u8,
}

impl ScsiAddress {
    pub fn new(controller: u8, lun: u8) -> Self {
        Self { controller, lun }
    }

    /// Kernel device directory for this address, e.g. `/sys/bus/scsi/devices/0:0:0:1`.
    pub fn sysfs_path(&self) -> String {
        format!("{}/{}:0:0:{}", SCSI_DEVICES, self.controller, self.lun)
    }

    /// Directory whose single entry is the block device name (e.g. `sdb`).
    pub fn block_dir(&self) -> String {
        format!("{}/{}", self.sysfs_path(), BLOCK_SUBDIR)
    }
}

impl fmt::Display for ScsiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C={} L={}", self.controller, self.lun)
    }
}

/// Runs processes inside the utility VM.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Start a process described by `config`.
    ///
    /// The executor takes ownership of the stdio endpoints and pumps them
    /// until the process exits; sinks are flushed and shut down before
    /// [`GuestProcess::wait`] returns.
    async fn create_process(&self, config: ProcessConfig) -> LcowResult<Box<dyn GuestProcess>>;
}

/// Hot-adds and hot-removes disk images on the guest SCSI bus.
#[async_trait]
pub trait ScsiController: Send + Sync {
    /// Attach `host_path`, optionally on a preferred controller.
    async fn add_scsi(&self, host_path: &Path, controller_hint: Option<u8>)
    -> LcowResult<ScsiAddress>;

    /// Detach `host_path` from `address`.
    async fn remove_scsi(&self, host_path: &Path, address: ScsiAddress) -> LcowResult<()>;
}

/// A running utility VM: everything that can both run processes and take disks.
pub trait UtilityVm: ProcessExecutor + ScsiController {}

impl<T: ProcessExecutor + ScsiController + ?Sized> UtilityVm for T {}
