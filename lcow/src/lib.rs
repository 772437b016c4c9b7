//! Host-side provisioning for Linux containers on Windows (LCOW).
//!
//! The utility VM itself is owned by the host compute service; this crate
//! reaches it through the [`uvm`] traits and builds the orchestration on
//! top:
//! - [`scratch`] - create formatted scratch disks, with a default-size cache
//! - [`mounts`] - translate bind mounts into utility VM mapped directories
//! - [`container`] - container creation ordered around that translation
//! - [`archive`] - stream a tar archive into the utility VM as a disk image
//! - [`diagnostics`] - best-effort log collection from the guest

pub mod archive;
pub mod container;
pub mod diagnostics;
pub mod disk;
pub mod mounts;
pub mod options;
pub mod scratch;
pub mod util;
pub mod uvm;

pub use archive::ArchiveRelay;
pub use container::{ContainerConfig, ContainerCreator, HvRuntime, create_lcow_container};
pub use diagnostics::{DiagnosticProbe, Diagnostics};
pub use mounts::{BindTranslation, MappedDir, translate_bind_mounts};
pub use options::{BootSettings, DiagnosticsOptions, ScratchOptions};
pub use scratch::{ScratchDisk, ScratchOrigin, ScratchProvisioner, ScratchState};
pub use uvm::{
    CaptureBuffer, GuestProcess, IoCounters, ProcessConfig, ProcessExecutor, ScsiAddress,
    ScsiController, UtilityVm,
};

pub use lcow_shared::{CommandFailure, LcowError, LcowResult};
