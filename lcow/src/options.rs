//! Configuration for LCOW operations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use lcow_shared::constants::{boot_options, envs, scratch, timeouts};
use serde::{Deserialize, Serialize};

// ============================================================================
// Scratch Options
// ============================================================================

/// Sizing and timeouts for scratch disk provisioning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchOptions {
    /// Canonical scratch size in GB.
    ///
    /// Requests below it are raised to it, and only images of exactly this
    /// size are served from or written to the cache.
    /// Default: 20
    #[serde(default = "default_size_gb")]
    pub default_size_gb: u32,

    /// Block size in MB passed to the image creator.
    /// Default: 1
    #[serde(default = "default_block_size_mb")]
    pub block_size_mb: u32,

    /// Bounded wait for each command run in the utility VM.
    /// Default: 240
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_size_gb() -> u32 {
    scratch::DEFAULT_SIZE_GB
}

fn default_block_size_mb() -> u32 {
    scratch::BLOCK_SIZE_MB
}

fn default_command_timeout_secs() -> u64 {
    timeouts::COMMAND_TIMEOUT_SECS
}

impl Default for ScratchOptions {
    fn default() -> Self {
        Self {
            default_size_gb: default_size_gb(),
            block_size_mb: default_block_size_mb(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ScratchOptions {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Scratch disks can be grown but not shrunk; never go below the default.
    pub fn effective_size_gb(&self, requested_gb: u32) -> u32 {
        requested_gb.max(self.default_size_gb)
    }

    /// Whether an image of `size_gb` may use the cache.
    pub fn is_cacheable(&self, size_gb: u32) -> bool {
        size_gb == self.default_size_gb
    }
}

// ============================================================================
// Diagnostics Options
// ============================================================================

/// Guest diagnostics toggles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsOptions {
    /// Collect diagnostics (still requires DEBUG logging).
    #[serde(default)]
    pub enabled: bool,

    /// Shell command replacing the built-in probes.
    #[serde(default)]
    pub override_command: Option<String>,
}

impl DiagnosticsOptions {
    /// Read `LCOW_DEBUG_ENABLE` (any non-empty value) and `LCOW_DEBUG_COMMAND`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enabled: lookup(envs::DEBUG_ENABLE).is_some_and(|v| !v.is_empty()),
            override_command: lookup(envs::DEBUG_COMMAND).filter(|v| !v.trim().is_empty()),
        }
    }
}

// ============================================================================
// Boot Settings
// ============================================================================

/// Kernel, initrd and command line used to boot the utility VM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSettings {
    /// Directory holding the kernel and initrd.
    #[serde(default = "default_kird_path")]
    pub kird_path: PathBuf,

    #[serde(default = "default_kernel_file")]
    pub kernel_file: String,

    #[serde(default = "default_initrd_file")]
    pub initrd_file: String,

    #[serde(default)]
    pub boot_parameters: String,
}

fn default_kird_path() -> PathBuf {
    kird_path_under(std::env::var_os(envs::PROGRAM_FILES).map(PathBuf::from))
}

fn kird_path_under(program_files: Option<PathBuf>) -> PathBuf {
    program_files
        .unwrap_or_default()
        .join(boot_options::DEFAULT_KIRD_DIR)
}

fn default_kernel_file() -> String {
    boot_options::DEFAULT_KERNEL_FILE.to_string()
}

fn default_initrd_file() -> String {
    boot_options::DEFAULT_INITRD_FILE.to_string()
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            kird_path: default_kird_path(),
            kernel_file: default_kernel_file(),
            initrd_file: default_initrd_file(),
            boot_parameters: String::new(),
        }
    }
}

impl BootSettings {
    /// Resolve boot settings from caller options, defaulting missing or empty keys.
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        let value = |key: &str| options.get(key).filter(|v| !v.is_empty()).cloned();

        Self {
            kird_path: value(boot_options::KIRD_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(default_kird_path),
            kernel_file: value(boot_options::KERNEL_FILE).unwrap_or_else(default_kernel_file),
            initrd_file: value(boot_options::INITRD_FILE).unwrap_or_else(default_initrd_file),
            boot_parameters: value(boot_options::BOOT_PARAMETERS).unwrap_or_default(),
        }
    }
}
