//! Error types for LCOW host operations.
//!
//! Errors are grouped the way callers recover from them:
//! - configuration errors (mount options) are user-fixable,
//! - precondition errors mean a utility VM was required but absent,
//! - local resource errors come from host file operations,
//! - remote execution errors wrap a [`CommandFailure`] from the guest,
//! - guest-state errors (detach) poison later operations on the same VM.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Alias for `Result<T, LcowError>`.
pub type LcowResult<T> = Result<T, LcowError>;

/// Why a command run inside the utility VM did not succeed.
#[derive(Debug, Error)]
pub enum CommandFailure {
    /// The guest refused or failed to create the process.
    #[error("failed to start `{command}`: {reason}")]
    Start { command: String, reason: String },

    /// The process did not exit within the bounded wait.
    #[error("`{command}` did not complete within {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// The process exited but its exit code could not be retrieved.
    #[error("failed to get exit code from `{command}`: {reason}")]
    ExitCode { command: String, reason: String },

    /// The process exited with a non-zero code.
    #[error("`{command}` returned non-zero exit code ({code})")]
    NonZeroExit { command: String, code: i32 },

    /// The process succeeded but printed something unusable.
    #[error("`{command}` produced unexpected output {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

impl CommandFailure {
    /// The rendered command line this failure refers to.
    pub fn command(&self) -> &str {
        match self {
            Self::Start { command, .. }
            | Self::Timeout { command, .. }
            | Self::ExitCode { command, .. }
            | Self::NonZeroExit { command, .. }
            | Self::UnexpectedOutput { command, .. } => command,
        }
    }

    /// True if the failure was the bounded wait firing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors returned by LCOW operations.
#[derive(Debug, Error)]
pub enum LcowError {
    /// A bind mount carried an option the utility VM cannot honour.
    #[error("unsupported option {option:?}")]
    UnsupportedMountOption { option: String },

    /// A bind mount did not say where in the utility VM it should live.
    #[error("no uvmpath for bind mount to {destination}")]
    MissingUvmPath { destination: String },

    /// The operation needs a running utility VM and none was supplied.
    #[error("cannot {operation} as no utility VM supplied")]
    NoGuestAvailable { operation: &'static str },

    /// Creating the local disk image failed.
    #[error("failed to create disk image {}: {source}", .path.display())]
    DiskImageCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Hot-adding the disk image to the utility VM failed.
    #[error("failed to hot-add {} to utility VM: {source}", .path.display())]
    AttachFailed {
        path: PathBuf,
        #[source]
        source: Box<LcowError>,
    },

    /// The hot-added disk never showed up on the guest SCSI bus.
    #[error("{failure} following hot-add {} to utility VM", .path.display())]
    AttachValidationFailed {
        path: PathBuf,
        #[source]
        failure: CommandFailure,
    },

    /// The guest block device name for the disk could not be determined.
    #[error("device lookup for {} failed: {failure}", .path.display())]
    DeviceLookupFailed {
        path: PathBuf,
        #[source]
        failure: CommandFailure,
    },

    /// Formatting the block device inside the utility VM failed.
    #[error("{failure} formatting {} in utility VM: {stderr}", .path.display())]
    FormatFailed {
        path: PathBuf,
        failure: CommandFailure,
        stderr: String,
    },

    /// Hot-removing the disk image from the utility VM failed.
    #[error("failed to hot-remove {}: {source}", .path.display())]
    DetachFailed {
        path: PathBuf,
        #[source]
        source: Box<LcowError>,
    },

    /// Copying the cached scratch image to its destination failed.
    #[error(
        "failed to copy cached file {} to {}: {source}",
        .cache.display(),
        .dest.display()
    )]
    CacheCopyFailed {
        cache: PathBuf,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Populating the scratch cache from a freshly formatted image failed.
    #[error(
        "failed to seed cache {} from {}: {source}",
        .cache.display(),
        .dest.display()
    )]
    CacheSeedFailed {
        cache: PathBuf,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The host file receiving the converted image could not be created.
    #[error("tar2vhd failed to create {}: {source}", .path.display())]
    ArchiveTargetCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive conversion process could not be started.
    #[error("failed to start tar2vhd for {}: {source}", .path.display())]
    ArchiveStreamStartFailed {
        path: PathBuf,
        #[source]
        source: Box<LcowError>,
    },

    /// The archive conversion process started but did not finish cleanly.
    #[error("tar2vhd for {} failed: {failure}", .path.display())]
    ArchiveStreamFailed {
        path: PathBuf,
        #[source]
        failure: CommandFailure,
    },

    /// The host compute service rejected the container configuration.
    #[error("failed to create container {id}: {source}")]
    ContainerCreateFailed {
        id: String,
        #[source]
        source: Box<LcowError>,
    },

    /// Guest process execution error reported by a collaborator.
    #[error("execution: {0}")]
    Execution(String),

    /// Storage error reported by a collaborator.
    #[error("storage: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Generic IO error.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
