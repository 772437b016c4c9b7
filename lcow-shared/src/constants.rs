//! Constants shared with the Linux utility VM.
//!
//! The guest paths here are a wire contract with the guest kernel and the
//! guest agent; they must match what the utility VM image provides.

/// Scratch (sandbox) disk sizing.
pub mod scratch {
    /// Size of the default sandbox and scratch disk in GB.
    ///
    /// Scratch disks can be expanded but never shrunk, so this is also the
    /// smallest size that will be created.
    pub const DEFAULT_SIZE_GB: u32 = 20;

    /// Block size in MB for the scratch images this crate creates.
    pub const BLOCK_SIZE_MB: u32 = 1;
}

/// Timeouts for commands run inside the utility VM.
pub mod timeouts {
    /// Bounded wait applied to every provisioning command (seconds).
    pub const COMMAND_TIMEOUT_SECS: u64 = 240;

    /// Bounded wait for the whole diagnostics collection (seconds).
    pub const DIAGNOSTICS_TIMEOUT_SECS: u64 = 30;
}

/// Paths inside the utility VM.
pub mod guest_paths {
    /// Kernel enumeration of SCSI devices, one directory per `H:C:T:L`.
    pub const SCSI_DEVICES: &str = "/sys/bus/scsi/devices";

    /// Subdirectory of a SCSI device holding its block device name.
    pub const BLOCK_SUBDIR: &str = "block";

    /// Device node directory.
    pub const DEV_DIR: &str = "/dev";
}

/// Guest-side tools invoked by the host.
pub mod guest_tools {
    /// Converts a tar stream on stdin into an ext4 image on stdout.
    pub const TAR2VHD: &str = "tar2vhd";

    /// Filesystem formatter.
    pub const MKFS_EXT4: &str = "mkfs.ext4";

    /// Tuning for throwaway scratch disks: fast format, small footprint.
    pub const MKFS_EXT4_ARGS: &[&str] = &[
        "-q",
        "-E",
        "lazy_itable_init=1",
        "-O",
        "^has_journal,sparse_super2,uninit_bg,^resize_inode",
    ];
}

/// Caller option keys for utility VM boot settings.
pub mod boot_options {
    /// Directory holding the kernel and initrd.
    pub const KIRD_PATH: &str = "lcow.kirdpath";

    /// Kernel file name within the kird directory.
    pub const KERNEL_FILE: &str = "lcow.kernel";

    /// Initrd file name within the kird directory.
    pub const INITRD_FILE: &str = "lcow.initrd";

    /// Extra kernel command line.
    pub const BOOT_PARAMETERS: &str = "lcow.bootparameters";

    /// Default kernel file name.
    pub const DEFAULT_KERNEL_FILE: &str = "bootx64.efi";

    /// Default initrd file name.
    pub const DEFAULT_INITRD_FILE: &str = "initrd.img";

    /// Directory under `ProgramFiles` holding the default kird files.
    pub const DEFAULT_KIRD_DIR: &str = "Linux Containers";
}

/// Environment variables.
pub mod envs {
    /// Non-empty value enables guest diagnostics collection.
    pub const DEBUG_ENABLE: &str = "LCOW_DEBUG_ENABLE";

    /// Overrides the diagnostic probes with a single shell command.
    pub const DEBUG_COMMAND: &str = "LCOW_DEBUG_COMMAND";

    /// Windows program files directory.
    pub const PROGRAM_FILES: &str = "ProgramFiles";
}
